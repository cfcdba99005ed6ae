//! Kubeconfig generation with a freshly minted client certificate.

use std::time::Duration;

use kube::config::Kubeconfig;
use tracing::debug;

use crate::constants;
use crate::encoding::to_yaml;
use crate::resources::secrets::{CertAndKey, KubernetesRoot};
use crate::x509;

/// Errors generating a kubeconfig.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The client certificate could not be issued.
    #[error(transparent)]
    Certificate(#[from] x509::Error),
    #[error("failed to encode kubeconfig: {0}")]
    Encode(#[from] serde_yaml::Error),
    /// The rendered kubeconfig doesn't load back.
    #[error("generated kubeconfig is invalid: {0}")]
    Invalid(String),
}

/// Everything needed to mint a kubeconfig.
#[derive(Clone, Debug)]
pub struct GenerateInput<'a> {
    /// Issuing CA, PEM certificate and PKCS#8 PEM key.
    pub ca: &'a CertAndKey,
    /// PEM certificates trusted when talking to the server.
    pub accepted_cas: &'a [String],
    pub lifetime: Duration,
    pub common_name: &'a str,
    pub organization: &'a str,
    pub endpoint: &'a str,
    pub username: &'a str,
    pub context_name: &'a str,
    pub cluster_name: &'a str,
}

/// Renders a kubeconfig for `input` with a new client certificate.
///
/// The single context is named `<context>@<cluster>` and is the current
/// one. The output is loaded back before it is returned.
pub fn generate(input: &GenerateInput<'_>) -> Result<String, Error> {
    let client = x509::client_certificate(input.ca, input.common_name, input.organization, input.lifetime)?;
    let context = format!("{}@{}", input.context_name, input.cluster_name);

    let json = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{
            "name": input.cluster_name,
            "cluster": {
                "server": input.endpoint,
                "certificate-authority-data": base64::encode(input.accepted_cas.concat()),
            }
        }],
        "users": [{
            "name": format!("{}@{}", input.username, input.cluster_name),
            "user": {
                "client-certificate-data": base64::encode(client.crt.as_bytes()),
                "client-key-data": base64::encode(client.key.as_bytes()),
            }
        }],
        "contexts": [{
            "name": context,
            "context": {
                "cluster": input.cluster_name,
                "namespace": "default",
                "user": format!("{}@{}", input.username, input.cluster_name),
            }
        }],
        "current-context": context,
    });

    let rendered = to_yaml(&json)?;
    load_and_validate(&rendered)?;
    debug!(cluster = input.cluster_name, context = %context, "generated kubeconfig");
    Ok(rendered)
}

/// Admin kubeconfig for the cluster described by `secrets`.
///
/// The issuing CA is trusted alongside the accepted CAs.
pub fn generate_admin(secrets: &KubernetesRoot, lifetime: Duration) -> Result<String, Error> {
    let mut accepted_cas = vec![secrets.ca.crt.clone()];
    accepted_cas.extend(secrets.accepted_cas.iter().cloned());

    generate(&GenerateInput {
        ca: &secrets.ca,
        accepted_cas: &accepted_cas,
        lifetime,
        common_name: constants::ADMIN_CERT_COMMON_NAME,
        organization: constants::ADMIN_CERT_ORGANIZATION,
        endpoint: &secrets.endpoint,
        username: constants::ADMIN_CERT_COMMON_NAME,
        context_name: "admin",
        cluster_name: &secrets.name,
    })
}

/// Parses `raw` and checks that the current context resolves to a cluster
/// and a user.
pub fn load_and_validate(raw: &str) -> Result<Kubeconfig, Error> {
    let config: Kubeconfig = serde_yaml::from_str(raw).map_err(|e| Error::Invalid(e.to_string()))?;

    let current = config
        .current_context
        .as_deref()
        .ok_or_else(|| Error::Invalid("no current context".to_string()))?;
    let context = config
        .contexts
        .iter()
        .find(|c| c.name == current)
        .ok_or_else(|| Error::Invalid(format!("context {:?} not found", current)))?;
    let cluster = config
        .clusters
        .iter()
        .find(|c| c.name == context.context.cluster)
        .ok_or_else(|| Error::Invalid(format!("cluster {:?} not found", context.context.cluster)))?;
    if cluster.cluster.server.is_empty() {
        return Err(Error::Invalid(format!("cluster {:?} has no server", cluster.name)));
    }
    if !config.auth_infos.iter().any(|u| u.name == context.context.user) {
        return Err(Error::Invalid(format!("user {:?} not found", context.context.user)));
    }

    Ok(config)
}
