//! Flannel CNI with the VXLAN backend.

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Capabilities, ConfigMap, ConfigMapVolumeSource, Container, EnvVar, EnvVarSource, NodeAffinity,
    NodeSelector, NodeSelectorRequirement, NodeSelectorTerm, ObjectFieldSelector, PodSpec, PodTemplateSpec,
    ResourceRequirements, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use serde::Serialize;

use super::{
    cluster_role, cluster_role_binding, encode, host_path_volume, meta, rule, service_account,
    service_account_subject, string_map, strings, tolerate_all, Error, KUBE_SYSTEM,
};
use crate::resources::k8s::BootstrapManifestsConfig;

const NAME: &str = "flannel";
const APP: (&str, &str) = ("k8s-app", "flannel");
const TIER: (&str, &str) = ("tier", "node");
const VXLAN_PORT: u16 = 4789;

const CNI_CONF: &str = r#"{
  "name": "cbr0",
  "cniVersion": "1.0.0",
  "plugins": [
    {
      "type": "flannel",
      "delegate": {
        "hairpinMode": true,
        "isDefaultGateway": true
      }
    },
    {
      "type": "portmap",
      "capabilities": {
        "portMappings": true
      }
    }
  ]
}"#;

#[derive(Debug, Serialize)]
struct Backend {
    #[serde(rename = "Type")]
    type_: &'static str,
    #[serde(rename = "Port")]
    port: u16,
}

/// flanneld's `net-conf.json`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct NetConf {
    #[serde(skip_serializing_if = "Option::is_none")]
    network: Option<String>,
    #[serde(rename = "IPv6Network", skip_serializing_if = "Option::is_none")]
    ipv6_network: Option<String>,
    #[serde(rename = "EnableIPv6", skip_serializing_if = "Option::is_none")]
    enable_ipv6: Option<bool>,
    #[serde(rename = "EnableIPv4", skip_serializing_if = "Option::is_none")]
    enable_ipv4: Option<bool>,
    backend: Backend,
}

impl NetConf {
    /// IPv4 networks contain a dot, everything else is taken as IPv6.
    fn new(pod_cidrs: &[String]) -> Self {
        let mut conf = NetConf {
            network: None,
            ipv6_network: None,
            enable_ipv6: None,
            enable_ipv4: None,
            backend: Backend {
                type_: "vxlan",
                port: VXLAN_PORT,
            },
        };

        for cidr in pod_cidrs {
            if cidr.contains('.') {
                conf.network = Some(cidr.clone());
            } else {
                conf.ipv6_network = Some(cidr.clone());
                conf.enable_ipv6 = Some(true);
            }
        }

        if conf.network.is_none() {
            conf.enable_ipv4 = Some(false);
        }
        conf
    }
}

/// Cluster role, binding, service account, config and the daemon set.
pub(super) fn objects(cfg: &BootstrapManifestsConfig) -> Result<Vec<String>, Error> {
    Ok(vec![
        encode(&cluster_role(
            meta(NAME, None, &[APP]),
            vec![
                rule("", &["pods"], &["get"]),
                rule("", &["nodes"], &["get", "list", "watch"]),
                rule("", &["nodes/status"], &["patch"]),
            ],
        ))?,
        encode(&cluster_role_binding(
            meta(NAME, None, &[APP]),
            NAME,
            vec![service_account_subject(NAME, KUBE_SYSTEM)],
        ))?,
        encode(&service_account(NAME, &[APP]))?,
        encode(&config_map(&cfg.pod_cidrs)?)?,
        encode(&daemon_set(cfg))?,
    ])
}

pub(super) fn config_map(pod_cidrs: &[String]) -> Result<ConfigMap, Error> {
    let net_conf = serde_json::to_string_pretty(&NetConf::new(pod_cidrs))?;
    Ok(ConfigMap {
        metadata: meta("kube-flannel-cfg", Some(KUBE_SYSTEM), &[APP, TIER]),
        data: Some(string_map(&[
            ("cni-conf.json", CNI_CONF),
            ("net-conf.json", net_conf.as_str()),
        ])),
        ..ConfigMap::default()
    })
}

fn field_ref(name: &str, path: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: None,
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: None,
                field_path: path.to_string(),
            }),
            ..EnvVarSource::default()
        }),
    }
}

fn env(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        value_from: None,
    }
}

fn mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        ..VolumeMount::default()
    }
}

/// The flanneld daemon set. Without a working service network flanneld
/// can be pointed at the API server through `KUBERNETES_SERVICE_*`.
pub(super) fn daemon_set(cfg: &BootstrapManifestsConfig) -> DaemonSet {
    let labels = string_map(&[APP, TIER]);

    let mut env_vars = vec![
        field_ref("POD_NAME", "metadata.name"),
        field_ref("POD_NAMESPACE", "metadata.namespace"),
        env("EVENT_QUEUE_DEPTH", "5000"),
        env("CONT_WHEN_CACHE_NOT_READY", "false"),
    ];
    if !cfg.flannel_kube_service_host.is_empty() {
        env_vars.push(env("KUBERNETES_SERVICE_HOST", &cfg.flannel_kube_service_host));
    }
    if !cfg.flannel_kube_service_port.is_empty() {
        env_vars.push(env("KUBERNETES_SERVICE_PORT", &cfg.flannel_kube_service_port));
    }

    let mut args = strings(&["--ip-masq", "--kube-subnet-mgr"]);
    args.extend(cfg.flannel_extra_args.iter().cloned());

    let flanneld = Container {
        name: "kube-flannel".to_string(),
        image: Some(cfg.flannel_image.clone()),
        command: Some(strings(&["/opt/bin/flanneld"])),
        args: Some(args),
        env: Some(env_vars),
        resources: Some(ResourceRequirements {
            requests: Some(
                [("cpu", "100m"), ("memory", "50Mi")]
                    .iter()
                    .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
                    .collect(),
            ),
            limits: None,
        }),
        security_context: Some(SecurityContext {
            capabilities: Some(Capabilities {
                add: Some(strings(&["NET_ADMIN", "NET_RAW"])),
                drop: None,
            }),
            privileged: Some(false),
            ..SecurityContext::default()
        }),
        volume_mounts: Some(vec![
            mount("run", "/run/flannel"),
            mount("flannel-cfg", "/etc/kube-flannel/"),
        ]),
        ..Container::default()
    };

    let install_config = Container {
        name: "install-config".to_string(),
        image: Some(cfg.flannel_image.clone()),
        command: Some(strings(&["cp"])),
        args: Some(strings(&[
            "-f",
            "/etc/kube-flannel/cni-conf.json",
            "/etc/cni/net.d/10-flannel.conflist",
        ])),
        volume_mounts: Some(vec![
            mount("cni", "/etc/cni/net.d"),
            mount("flannel-cfg", "/etc/kube-flannel/"),
        ]),
        ..Container::default()
    };

    DaemonSet {
        metadata: meta("kube-flannel", Some(KUBE_SYSTEM), &[APP, TIER]),
        spec: Some(DaemonSetSpec {
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                match_expressions: None,
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    affinity: Some(Affinity {
                        node_affinity: Some(NodeAffinity {
                            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                                node_selector_terms: vec![NodeSelectorTerm {
                                    match_expressions: Some(vec![NodeSelectorRequirement {
                                        key: "kubernetes.io/os".to_string(),
                                        operator: "In".to_string(),
                                        values: Some(strings(&["linux"])),
                                    }]),
                                    match_fields: None,
                                }],
                            }),
                            ..NodeAffinity::default()
                        }),
                        ..Affinity::default()
                    }),
                    containers: vec![flanneld],
                    init_containers: Some(vec![install_config]),
                    host_network: Some(true),
                    priority_class_name: Some("system-node-critical".to_string()),
                    service_account_name: Some(NAME.to_string()),
                    tolerations: Some(tolerate_all(&["NoSchedule", "NoExecute"])),
                    volumes: Some(vec![
                        host_path_volume("run", "/run/flannel"),
                        host_path_volume("cni-plugin", "/opt/cni/bin"),
                        host_path_volume("cni", "/etc/cni/net.d"),
                        Volume {
                            name: "flannel-cfg".to_string(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: Some("kube-flannel-cfg".to_string()),
                                ..ConfigMapVolumeSource::default()
                            }),
                            ..Volume::default()
                        },
                    ]),
                    ..PodSpec::default()
                }),
            },
            ..DaemonSetSpec::default()
        }),
        ..DaemonSet::default()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::manifests::test::manifests_config;

    fn net_conf(pod_cidrs: &[&str]) -> serde_json::Value {
        let cidrs: Vec<String> = pod_cidrs.iter().map(|s| s.to_string()).collect();
        let config_map = config_map(&cidrs).unwrap();
        serde_json::from_str(&config_map.data.unwrap()["net-conf.json"]).unwrap()
    }

    #[test]
    fn ipv6_only_pod_network() {
        let conf = net_conf(&["fd00::/112"]);
        assert_eq!(
            serde_json::json!({
                "IPv6Network": "fd00::/112",
                "EnableIPv6": true,
                "EnableIPv4": false,
                "Backend": {"Type": "vxlan", "Port": 4789},
            }),
            conf
        );
    }

    #[test]
    fn ipv4_only_pod_network() {
        let conf = net_conf(&["10.244.0.0/16"]);
        assert_eq!(
            serde_json::json!({
                "Network": "10.244.0.0/16",
                "Backend": {"Type": "vxlan", "Port": 4789},
            }),
            conf
        );
    }

    #[test]
    fn dual_stack_pod_network() {
        let conf = net_conf(&["10.244.0.0/16", "fd00::/112"]);
        assert_eq!("10.244.0.0/16", conf["Network"]);
        assert_eq!("fd00::/112", conf["IPv6Network"]);
        assert_eq!(true, conf["EnableIPv6"]);
        assert!(conf.get("EnableIPv4").is_none());
    }

    #[test]
    fn net_conf_is_indented_json() {
        let config_map = config_map(&["10.244.0.0/16".to_string()]).unwrap();
        assert_eq!(
            "{\n  \"Network\": \"10.244.0.0/16\",\n  \"Backend\": {\n    \"Type\": \"vxlan\",\n    \"Port\": 4789\n  }\n}",
            config_map.data.unwrap()["net-conf.json"]
        );
    }

    #[test]
    fn kube_service_endpoint_is_passed_through() {
        let cfg = BootstrapManifestsConfig {
            flannel_kube_service_host: "127.0.0.1".to_string(),
            flannel_kube_service_port: "7445".to_string(),
            flannel_extra_args: vec!["--iface=eth1".to_string()],
            ..manifests_config()
        };
        let daemon_set = daemon_set(&cfg);
        let container = &daemon_set.spec.unwrap().template.spec.unwrap().containers[0];
        let env: Vec<_> = container
            .env
            .iter()
            .flatten()
            .map(|e| (e.name.as_str(), e.value.as_deref()))
            .collect();
        assert!(env.contains(&("KUBERNETES_SERVICE_HOST", Some("127.0.0.1"))));
        assert!(env.contains(&("KUBERNETES_SERVICE_PORT", Some("7445"))));
        assert_eq!(
            Some(vec![
                "--ip-masq".to_string(),
                "--kube-subnet-mgr".to_string(),
                "--iface=eth1".to_string()
            ]),
            container.args
        );
    }

    #[test]
    fn objects_cover_rbac_config_and_daemon_set() {
        let docs = objects(&manifests_config()).unwrap();
        assert_eq!(5, docs.len());
        assert!(docs[3].contains("name: kube-flannel-cfg"));
        assert!(docs[4].contains("kind: DaemonSet"));
        assert!(docs[4].contains("image: \"ghcr.io/siderolabs/flannel:v0.25.6\""));
    }
}
