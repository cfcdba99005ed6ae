//! Key material derived from the machine config.

use resource_state::ResourceSpec;
use serde::{Deserialize, Serialize};

use crate::config::v1alpha1::PemCertificateAndKey;

/// Namespace of secrets.
pub const NAMESPACE: &str = "secrets";
/// Id of the Kubernetes root secrets.
pub const KUBERNETES_ROOT_ID: &str = "k8s";
/// Id of the rendered Kubernetes secrets.
pub const KUBERNETES_ID: &str = "k8s-certs";
/// Id of the machine API certificates.
pub const API_ID: &str = "api";

/// A PEM certificate with its PEM key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertAndKey {
    pub crt: String,
    pub key: String,
}

impl CertAndKey {
    /// True if either half is missing.
    pub fn is_empty(&self) -> bool {
        self.crt.is_empty() || self.key.is_empty()
    }
}

impl From<&PemCertificateAndKey> for CertAndKey {
    fn from(pem: &PemCertificateAndKey) -> Self {
        CertAndKey {
            crt: pem.crt.to_string_lossy(),
            key: pem.key.to_string_lossy(),
        }
    }
}

/// Cluster wide secrets of a control plane node, copied out of the config.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KubernetesRoot {
    pub name: String,
    pub endpoint: String,
    pub local_endpoint: String,
    pub cert_sans: Vec<String>,
    pub dns_domain: String,
    pub api_server_ips: Vec<String>,

    pub ca: CertAndKey,
    /// Additional trusted CAs, PEM.
    pub accepted_cas: Vec<String>,
    pub aggregator_ca: CertAndKey,
    pub service_account_key: String,

    pub aescbc_encryption_secret: String,
    pub secretbox_encryption_secret: String,

    pub bootstrap_token_id: String,
    pub bootstrap_token_secret: String,
}

impl ResourceSpec for KubernetesRoot {
    const TYPE: &'static str = "KubernetesRootSecrets.secrets.talos.dev";
    const NAMESPACE: &'static str = NAMESPACE;
}

/// Rendered Kubernetes secrets.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Kubernetes {
    /// Admin kubeconfig with a freshly minted client certificate.
    pub admin_kubeconfig: String,
    /// API server encryption-at-rest configuration.
    pub encryption_config: String,
}

impl ResourceSpec for Kubernetes {
    const TYPE: &'static str = "KubernetesSecrets.secrets.talos.dev";
    const NAMESPACE: &'static str = NAMESPACE;
}

/// TLS material of the machine API.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Api {
    /// Issuing CA, PEM.
    pub ca_pem: String,
    pub server_cert_pem: String,
    pub server_key_pem: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert_pem: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key_pem: Option<String>,
    /// Additional trusted CAs, PEM.
    pub accepted_cas: Vec<String>,
}

impl ResourceSpec for Api {
    const TYPE: &'static str = "ApiCertificates.secrets.talos.dev";
    const NAMESPACE: &'static str = NAMESPACE;
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::encoding::Base64Bytes;

    #[test]
    fn pem_pairs_convert_to_strings() {
        let pem = PemCertificateAndKey {
            crt: Base64Bytes::from("-----BEGIN CERTIFICATE-----"),
            key: Base64Bytes::default(),
        };
        let pair = CertAndKey::from(&pem);
        assert_eq!("-----BEGIN CERTIFICATE-----", pair.crt);
        assert!(pair.is_empty());
    }
}
