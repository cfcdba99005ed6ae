//! The machine configuration as a resource.

use anyhow::Context;
use resource_state::ResourceSpec;
use serde::{Deserialize, Serialize};

use crate::config::v1alpha1::Config;
use crate::config::{Container, DecodeError};

/// Id of the active machine configuration.
pub const ACTIVE_ID: &str = "v1alpha1";

/// The active machine configuration, kept in its encoded form.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineConfig {
    /// Multi-document YAML.
    pub documents: String,
}

impl MachineConfig {
    /// Captures the encoded form of `container`.
    pub fn new(container: &Container) -> anyhow::Result<Self> {
        let bytes = container.bytes()?;
        let documents = String::from_utf8(bytes).context("config is not valid UTF-8")?;
        Ok(MachineConfig { documents })
    }

    /// Decodes the documents.
    pub fn container(&self) -> Result<Container, DecodeError> {
        Container::from_bytes(self.documents.as_bytes())
    }

    /// The `v1alpha1` document, if any.
    pub fn v1alpha1(&self) -> anyhow::Result<Option<Config>> {
        Ok(self.container()?.raw_v1alpha1().cloned())
    }
}

impl ResourceSpec for MachineConfig {
    const TYPE: &'static str = "MachineConfigs.config.talos.dev";
    const NAMESPACE: &'static str = "config";
}
