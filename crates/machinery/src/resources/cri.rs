//! Image registry settings of the container runtime.

use std::collections::BTreeMap;

use resource_state::ResourceSpec;
use serde::{Deserialize, Serialize};

use crate::config::v1alpha1::{RegistryConfig, RegistryMirrorConfig};

/// Id of the registries config.
pub const REGISTRIES_ID: &str = "registries";

/// Registry mirrors and per-host settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistriesConfig {
    /// Mirrors keyed by registry host, `*` matching every host.
    pub mirrors: BTreeMap<String, RegistryMirrorConfig>,
    /// TLS and auth keyed by registry host.
    pub config: BTreeMap<String, RegistryConfig>,
}

impl ResourceSpec for RegistriesConfig {
    const TYPE: &'static str = "RegistryConfigs.cri.talos.dev";
    const NAMESPACE: &'static str = "cri";
}

impl From<crate::config::v1alpha1::RegistriesConfig> for RegistriesConfig {
    fn from(config: crate::config::v1alpha1::RegistriesConfig) -> Self {
        RegistriesConfig {
            mirrors: config.mirrors,
            config: config.config,
        }
    }
}
