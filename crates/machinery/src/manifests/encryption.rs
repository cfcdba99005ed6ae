use serde::Serialize;

use super::Error;
use crate::encoding::to_yaml;
use crate::resources::secrets::KubernetesRoot;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EncryptionConfiguration {
    api_version: &'static str,
    kind: &'static str,
    resources: Vec<ResourceConfiguration>,
}

#[derive(Debug, Serialize)]
struct ResourceConfiguration {
    resources: Vec<&'static str>,
    providers: Vec<Provider>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
enum Provider {
    Secretbox { keys: Vec<Key> },
    Aescbc { keys: Vec<Key> },
    Identity {},
}

#[derive(Debug, Serialize)]
struct Key {
    name: &'static str,
    secret: String,
}

/// Encryption at rest for secrets, as read by `--encryption-provider-config`.
///
/// Secretbox comes first when configured so new writes use it, AES-CBC
/// stays readable and `identity` reads anything stored in plain text.
pub fn encryption_config(secrets: &KubernetesRoot) -> Result<String, Error> {
    let mut providers = Vec::new();
    if !secrets.secretbox_encryption_secret.is_empty() {
        providers.push(Provider::Secretbox {
            keys: vec![Key {
                name: "key2",
                secret: secrets.secretbox_encryption_secret.clone(),
            }],
        });
    }
    if !secrets.aescbc_encryption_secret.is_empty() {
        providers.push(Provider::Aescbc {
            keys: vec![Key {
                name: "key1",
                secret: secrets.aescbc_encryption_secret.clone(),
            }],
        });
    }
    providers.push(Provider::Identity {});

    let config = EncryptionConfiguration {
        api_version: "apiserver.config.k8s.io/v1",
        kind: "EncryptionConfiguration",
        resources: vec![ResourceConfiguration {
            resources: vec!["secrets"],
            providers,
        }],
    };
    Ok(to_yaml(&config)?)
}

#[cfg(test)]
mod test {
    use super::*;

    fn providers(yaml: &str) -> Vec<String> {
        let value: serde_yaml::Value = serde_yaml::from_str(yaml).unwrap();
        value["resources"][0]["providers"]
            .as_sequence()
            .unwrap()
            .iter()
            .map(|p| {
                p.as_mapping()
                    .unwrap()
                    .iter()
                    .next()
                    .and_then(|(k, _)| k.as_str())
                    .unwrap()
                    .to_string()
            })
            .collect()
    }

    #[test]
    fn provider_order() {
        let secrets = KubernetesRoot {
            aescbc_encryption_secret: "YWVzY2Jj".to_string(),
            secretbox_encryption_secret: "c2VjcmV0Ym94".to_string(),
            ..KubernetesRoot::default()
        };
        let yaml = encryption_config(&secrets).unwrap();
        assert!(yaml.starts_with("apiVersion: apiserver.config.k8s.io/v1\nkind: EncryptionConfiguration\n"));
        assert_eq!(vec!["secretbox", "aescbc", "identity"], providers(&yaml));
        assert!(yaml.contains("secret: c2VjcmV0Ym94"));
    }

    #[test]
    fn identity_only_without_secrets() {
        let yaml = encryption_config(&KubernetesRoot::default()).unwrap();
        assert_eq!(vec!["identity"], providers(&yaml));
        assert!(yaml.contains("identity: {}"));
    }

    #[test]
    fn aescbc_without_secretbox() {
        let secrets = KubernetesRoot {
            aescbc_encryption_secret: "YWVzY2Jj".to_string(),
            ..KubernetesRoot::default()
        };
        let yaml = encryption_config(&secrets).unwrap();
        assert_eq!(vec!["aescbc", "identity"], providers(&yaml));
    }
}
