//! Manifests applied to a freshly bootstrapped cluster.
//!
//! Each renderer builds typed Kubernetes objects and encodes them as one
//! YAML document per object. [`render`] assembles the full set keyed by
//! `<priority>-<name>`, which is also the order the set is applied in.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{HostPathVolumeSource, ServiceAccount, Toleration, Volume};
use k8s_openapi::api::rbac::v1::{ClusterRole, ClusterRoleBinding, PolicyRule, RoleRef, Subject};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;

use crate::encoding::to_yaml;
use crate::resources::k8s::BootstrapManifestsConfig;
use crate::resources::secrets::KubernetesRoot;

mod bootstrap;
mod coredns;
mod encryption;
mod flannel;
mod proxy;
mod rbac;
mod talos;

pub use encryption::encryption_config;

const KUBE_SYSTEM: &str = "kube-system";
const RBAC_GROUP: &str = "rbac.authorization.k8s.io";

/// Errors from encoding manifests.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An object doesn't encode as YAML.
    #[error("error encoding manifest: {0}")]
    Yaml(#[from] serde_yaml::Error),
    /// An embedded JSON document doesn't encode.
    #[error("error encoding embedded document: {0}")]
    Json(#[from] serde_json::Error),
}

/// One manifest of the bootstrap set.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderedManifest {
    /// `<priority>-<name>`, for example `05-flannel`.
    pub id: String,
    /// One YAML document per object.
    pub items: Vec<String>,
}

impl RenderedManifest {
    fn new(id: &str, items: Vec<String>) -> Self {
        RenderedManifest {
            id: id.to_string(),
            items,
        }
    }
}

/// Renders the bootstrap manifests enabled by `cfg`, sorted by id.
pub fn render(cfg: &BootstrapManifestsConfig, secrets: &KubernetesRoot) -> Result<Vec<RenderedManifest>, Error> {
    let mut manifests = vec![
        RenderedManifest::new(
            "00-kubelet-bootstrapping-token",
            vec![encode(&bootstrap::token_secret(secrets))?],
        ),
        RenderedManifest::new("01-csr-node-bootstrap", vec![encode(&rbac::csr_node_bootstrap())?]),
        RenderedManifest::new(
            "01-csr-approver-role-binding",
            vec![encode(&rbac::csr_approver())?],
        ),
        RenderedManifest::new("01-csr-renewal-role-binding", vec![encode(&rbac::csr_renewal())?]),
        RenderedManifest::new("02-default-sa-role-binding", vec![encode(&rbac::kube_system_default_sa())?]),
        RenderedManifest::new("02-talos-nodes-rbac", rbac::talos_nodes()?),
        RenderedManifest::new(
            "11-kube-config-in-cluster",
            vec![encode(&bootstrap::kubeconfig_in_cluster(&cfg.server)?)?],
        ),
    ];

    if cfg.coredns_enabled {
        manifests.push(RenderedManifest::new("11-core-dns", coredns::objects(cfg)?));
        manifests.push(RenderedManifest::new("11-core-dns-svc", vec![encode(&coredns::service(cfg))?]));
    }

    if cfg.flannel_enabled {
        manifests.push(RenderedManifest::new("05-flannel", flannel::objects(cfg)?));
    }

    if cfg.proxy_enabled {
        manifests.push(RenderedManifest::new("10-kube-proxy", proxy::objects(cfg)?));
    }

    if cfg.pod_security_policy_enabled {
        manifests.push(RenderedManifest::new(
            "03-default-pod-security-policy",
            rbac::pod_security_policy()?,
        ));
    }

    if cfg.talos_api_service_enabled {
        manifests.push(RenderedManifest::new("12-talos-api-service", vec![encode(&talos::api_service())?]));
        manifests.push(RenderedManifest::new(
            "13-talos-service-account-crd",
            vec![encode(&talos::service_account_crd())?],
        ));
    }

    manifests.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(manifests)
}

fn encode<T: Serialize>(object: &T) -> Result<String, Error> {
    Ok(to_yaml(object)?)
}

fn string_map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn meta(name: &str, namespace: Option<&str>, labels: &[(&str, &str)]) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        labels: if labels.is_empty() {
            None
        } else {
            Some(string_map(labels))
        },
        ..ObjectMeta::default()
    }
}

fn rule(api_group: &str, resources: &[&str], verbs: &[&str]) -> PolicyRule {
    PolicyRule {
        api_groups: Some(vec![api_group.to_string()]),
        resources: Some(strings(resources)),
        verbs: strings(verbs),
        ..PolicyRule::default()
    }
}

fn cluster_role(metadata: ObjectMeta, rules: Vec<PolicyRule>) -> ClusterRole {
    ClusterRole {
        metadata,
        rules: Some(rules),
        ..ClusterRole::default()
    }
}

fn cluster_role_binding(metadata: ObjectMeta, role: &str, subjects: Vec<Subject>) -> ClusterRoleBinding {
    ClusterRoleBinding {
        metadata,
        role_ref: RoleRef {
            api_group: RBAC_GROUP.to_string(),
            kind: "ClusterRole".to_string(),
            name: role.to_string(),
        },
        subjects: Some(subjects),
    }
}

fn group(name: &str) -> Subject {
    Subject {
        api_group: Some(RBAC_GROUP.to_string()),
        kind: "Group".to_string(),
        name: name.to_string(),
        namespace: None,
    }
}

fn service_account_subject(name: &str, namespace: &str) -> Subject {
    Subject {
        api_group: None,
        kind: "ServiceAccount".to_string(),
        name: name.to_string(),
        namespace: Some(namespace.to_string()),
    }
}

fn service_account(name: &str, labels: &[(&str, &str)]) -> ServiceAccount {
    ServiceAccount {
        metadata: meta(name, Some(KUBE_SYSTEM), labels),
        ..ServiceAccount::default()
    }
}

fn host_path_volume(name: &str, path: &str) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            type_: None,
        }),
        ..Volume::default()
    }
}

/// Tolerates every taint with the given effects.
fn tolerate_all(effects: &[&str]) -> Vec<Toleration> {
    effects
        .iter()
        .map(|effect| Toleration {
            effect: Some(effect.to_string()),
            operator: Some("Exists".to_string()),
            ..Toleration::default()
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    pub(super) fn manifests_config() -> BootstrapManifestsConfig {
        BootstrapManifestsConfig {
            server: "https://127.0.0.1:7445".to_string(),
            cluster_domain: "cluster.local".to_string(),
            pod_cidrs: vec!["10.244.0.0/16".to_string()],
            proxy_enabled: true,
            proxy_image: "registry.k8s.io/kube-proxy:v1.31.1".to_string(),
            proxy_args: vec![
                "--cluster-cidr=10.244.0.0/16".to_string(),
                "--proxy-mode=nftables".to_string(),
            ],
            coredns_enabled: true,
            coredns_image: "registry.k8s.io/coredns/coredns:v1.11.3".to_string(),
            dns_service_ip: "10.96.0.10".to_string(),
            flannel_enabled: true,
            flannel_image: "ghcr.io/siderolabs/flannel:v0.25.6".to_string(),
            ..BootstrapManifestsConfig::default()
        }
    }

    fn root() -> KubernetesRoot {
        KubernetesRoot {
            bootstrap_token_id: "abcdef".to_string(),
            bootstrap_token_secret: "0123456789abcdef".to_string(),
            ..KubernetesRoot::default()
        }
    }

    fn ids(manifests: &[RenderedManifest]) -> Vec<&str> {
        manifests.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn default_set_is_sorted_by_priority() {
        let manifests = render(&manifests_config(), &root()).unwrap();
        assert_eq!(
            vec![
                "00-kubelet-bootstrapping-token",
                "01-csr-approver-role-binding",
                "01-csr-node-bootstrap",
                "01-csr-renewal-role-binding",
                "02-default-sa-role-binding",
                "02-talos-nodes-rbac",
                "05-flannel",
                "10-kube-proxy",
                "11-core-dns",
                "11-core-dns-svc",
                "11-kube-config-in-cluster",
            ],
            ids(&manifests)
        );
    }

    #[test]
    fn disabled_components_are_left_out() {
        let cfg = BootstrapManifestsConfig {
            proxy_enabled: false,
            coredns_enabled: false,
            flannel_enabled: false,
            pod_security_policy_enabled: true,
            talos_api_service_enabled: true,
            ..manifests_config()
        };
        let manifests = render(&cfg, &root()).unwrap();
        let ids = ids(&manifests);
        assert!(!ids.contains(&"05-flannel"));
        assert!(!ids.contains(&"10-kube-proxy"));
        assert!(!ids.contains(&"11-core-dns"));
        assert!(ids.contains(&"03-default-pod-security-policy"));
        assert!(ids.contains(&"12-talos-api-service"));
        assert!(ids.contains(&"13-talos-service-account-crd"));
    }

    #[test]
    fn documents_carry_no_marker() {
        let manifests = render(&manifests_config(), &root()).unwrap();
        for manifest in manifests {
            assert!(!manifest.items.is_empty(), "{} is empty", manifest.id);
            for item in manifest.items {
                assert!(!item.starts_with("---"), "{} starts with a marker", manifest.id);
                let value: serde_yaml::Value = serde_yaml::from_str(&item).unwrap();
                assert!(value.get("kind").is_some(), "{} has no kind", manifest.id);
            }
        }
    }

    #[test]
    fn bindings_reference_cluster_roles() {
        let binding = cluster_role_binding(meta("x", None, &[]), "y", vec![group("z")]);
        let yaml = encode(&binding).unwrap();
        assert!(yaml.contains("apiVersion: rbac.authorization.k8s.io/v1"));
        assert!(yaml.contains("kind: ClusterRoleBinding"));
        assert!(yaml.contains("name: y"));
    }
}
