//! kube-proxy daemon set.

use k8s_openapi::api::apps::v1::{DaemonSet, DaemonSetSpec, DaemonSetUpdateStrategy, RollingUpdateDaemonSet};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, EnvVar, EnvVarSource, ObjectFieldSelector, PodSpec, PodTemplateSpec,
    SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::bootstrap::KUBECONFIG_IN_CLUSTER;
use super::{
    cluster_role_binding, encode, host_path_volume, meta, service_account, service_account_subject, string_map,
    tolerate_all, Error, KUBE_SYSTEM,
};
use crate::resources::k8s::BootstrapManifestsConfig;

const NAME: &str = "kube-proxy";
const LABELS: &[(&str, &str)] = &[("tier", "node"), ("k8s-app", NAME)];

/// Daemon set, service account and its binding to `system:node-proxier`.
pub(super) fn objects(cfg: &BootstrapManifestsConfig) -> Result<Vec<String>, Error> {
    Ok(vec![
        encode(&daemon_set(cfg))?,
        encode(&service_account(NAME, &[]))?,
        encode(&cluster_role_binding(
            meta(NAME, None, &[]),
            "system:node-proxier",
            vec![service_account_subject(NAME, KUBE_SYSTEM)],
        ))?,
    ])
}

fn read_only(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: Some(true),
        ..VolumeMount::default()
    }
}

pub(super) fn daemon_set(cfg: &BootstrapManifestsConfig) -> DaemonSet {
    let labels = string_map(LABELS);

    let mut command = vec!["/usr/local/bin/kube-proxy".to_string()];
    command.extend(cfg.proxy_args.iter().cloned());

    let container = Container {
        name: NAME.to_string(),
        image: Some(cfg.proxy_image.clone()),
        command: Some(command),
        env: Some(vec![EnvVar {
            name: "NODE_NAME".to_string(),
            value: None,
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    api_version: None,
                    field_path: "spec.nodeName".to_string(),
                }),
                ..EnvVarSource::default()
            }),
        }]),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            ..SecurityContext::default()
        }),
        volume_mounts: Some(vec![
            read_only("lib-modules", "/lib/modules"),
            read_only("ssl-certs-host", "/etc/ssl/certs"),
            read_only("kubeconfig", "/etc/kubernetes"),
        ]),
        ..Container::default()
    };

    DaemonSet {
        metadata: meta(NAME, Some(KUBE_SYSTEM), LABELS),
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
                    containers: vec![container],
                    host_network: Some(true),
                    priority_class_name: Some("system-cluster-critical".to_string()),
                    service_account_name: Some(NAME.to_string()),
                    tolerations: Some(tolerate_all(&["NoSchedule", "NoExecute"])),
                    volumes: Some(vec![
                        host_path_volume("lib-modules", "/lib/modules"),
                        host_path_volume("ssl-certs-host", "/etc/ssl/certs"),
                        Volume {
                            name: "kubeconfig".to_string(),
                            config_map: Some(ConfigMapVolumeSource {
                                name: Some(KUBECONFIG_IN_CLUSTER.to_string()),
                                ..ConfigMapVolumeSource::default()
                            }),
                            ..Volume::default()
                        },
                    ]),
                    ..PodSpec::default()
                }),
            },
            update_strategy: Some(DaemonSetUpdateStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDaemonSet {
                    max_unavailable: Some(IntOrString::Int(1)),
                    ..RollingUpdateDaemonSet::default()
                }),
            }),
            ..DaemonSetSpec::default()
        }),
        ..DaemonSet::default()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::manifests::test::manifests_config;

    #[test]
    fn arguments_follow_the_binary() {
        let daemon_set = daemon_set(&manifests_config());
        let pod = daemon_set.spec.unwrap().template.spec.unwrap();
        assert_eq!(
            Some(vec![
                "/usr/local/bin/kube-proxy".to_string(),
                "--cluster-cidr=10.244.0.0/16".to_string(),
                "--proxy-mode=nftables".to_string(),
            ]),
            pod.containers[0].command
        );
        assert_eq!(
            Some("registry.k8s.io/kube-proxy:v1.31.1"),
            pod.containers[0].image.as_deref()
        );
    }

    #[test]
    fn kubeconfig_comes_from_the_in_cluster_config_map() {
        let daemon_set = daemon_set(&manifests_config());
        let volumes = daemon_set.spec.unwrap().template.spec.unwrap().volumes.unwrap();
        let kubeconfig = volumes.iter().find(|v| v.name == "kubeconfig").unwrap();
        assert_eq!(
            Some("kubeconfig-in-cluster"),
            kubeconfig.config_map.as_ref().and_then(|c| c.name.as_deref())
        );
    }

    #[test]
    fn renders_three_objects() {
        let docs = objects(&manifests_config()).unwrap();
        assert_eq!(3, docs.len());
        assert!(docs[0].contains("  updateStrategy:\n    rollingUpdate:\n      maxUnavailable: 1\n    type: RollingUpdate\n"));
        assert!(docs[2].contains("name: \"system:node-proxier\""));
    }
}
