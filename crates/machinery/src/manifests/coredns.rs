//! CoreDNS and the `kube-dns` service.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy, RollingUpdateDeployment};
use k8s_openapi::api::core::v1::{
    Affinity, Capabilities, ConfigMap, ConfigMapVolumeSource, Container, ContainerPort, EnvVar, HTTPGetAction,
    KeyToPath, PodAffinityTerm, PodAntiAffinity, PodSpec, PodTemplateSpec, Probe, ResourceRequirements,
    SecurityContext, Service, ServicePort, ServiceSpec, Toleration, Volume, VolumeMount, WeightedPodAffinityTerm,
};
use k8s_openapi::api::rbac::v1::ClusterRoleBinding;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{
    cluster_role, cluster_role_binding, encode, meta, rule, service_account, service_account_subject, string_map,
    strings, Error, KUBE_SYSTEM,
};
use crate::resources::k8s::BootstrapManifestsConfig;

const NAME: &str = "coredns";
const ROLE: &str = "system:coredns";
const APP: (&str, &str) = ("k8s-app", "kube-dns");

/// Every CoreDNS object except the service.
pub(super) fn objects(cfg: &BootstrapManifestsConfig) -> Result<Vec<String>, Error> {
    Ok(vec![
        encode(&service_account(NAME, &[]))?,
        encode(&role_binding())?,
        encode(&cluster_role(
            meta(ROLE, None, &[("kubernetes.io/bootstrapping", "rbac-defaults")]),
            vec![
                rule("", &["endpoints", "services", "pods", "namespaces"], &["list", "watch"]),
                rule("discovery.k8s.io", &["endpointslices"], &["list", "watch"]),
            ],
        ))?,
        encode(&config_map(&cfg.cluster_domain))?,
        encode(&deployment(&cfg.coredns_image))?,
    ])
}

fn role_binding() -> ClusterRoleBinding {
    let mut metadata = meta(ROLE, None, &[("kubernetes.io/bootstrapping", "rbac-defaults")]);
    metadata.annotations = Some(string_map(&[("rbac.authorization.kubernetes.io/autoupdate", "true")]));
    cluster_role_binding(metadata, ROLE, vec![service_account_subject(NAME, KUBE_SYSTEM)])
}

/// The Corefile. Negative and positive caching is turned off for the
/// cluster domain when one is set.
pub(super) fn corefile(cluster_domain: &str) -> String {
    let mut corefile = format!(
        ".:53 {{
    errors
    health {{
        lameduck 5s
    }}
    ready
    log . {{
        class error
    }}
    prometheus :9153

    kubernetes {} in-addr.arpa ip6.arpa {{
        pods insecure
        fallthrough in-addr.arpa ip6.arpa
        ttl 30
    }}
    forward . /etc/resolv.conf {{
       max_concurrent 1000
    }}
    cache 30",
        cluster_domain
    );

    if cluster_domain.is_empty() {
        corefile.push('\n');
    } else {
        corefile.push_str(&format!(
            " {{
       disable success {domain}
       disable denial {domain}
    }}
",
            domain = cluster_domain
        ));
    }

    corefile.push_str(
        "    loop
    reload
    loadbalance
}
",
    );
    corefile
}

fn config_map(cluster_domain: &str) -> ConfigMap {
    let corefile = corefile(cluster_domain);
    ConfigMap {
        metadata: meta(NAME, Some(KUBE_SYSTEM), &[]),
        data: Some(string_map(&[("Corefile", corefile.as_str())])),
        ..ConfigMap::default()
    }
}

fn quantities(pairs: &[(&str, &str)]) -> BTreeMap<String, Quantity> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Quantity(v.to_string())))
        .collect()
}

fn port(name: &str, protocol: &str, number: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.to_string()),
        protocol: Some(protocol.to_string()),
        container_port: number,
        ..ContainerPort::default()
    }
}

fn http_probe(path: &str, port: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(path.to_string()),
            port: IntOrString::Int(port),
            scheme: Some("HTTP".to_string()),
            ..HTTPGetAction::default()
        }),
        ..Probe::default()
    }
}

fn no_schedule(key: &str) -> Toleration {
    Toleration {
        key: Some(key.to_string()),
        operator: Some("Exists".to_string()),
        effect: Some("NoSchedule".to_string()),
        ..Toleration::default()
    }
}

fn container(image: &str) -> Container {
    Container {
        name: NAME.to_string(),
        image: Some(image.to_string()),
        image_pull_policy: Some("IfNotPresent".to_string()),
        resources: Some(ResourceRequirements {
            limits: Some(quantities(&[("memory", "170Mi")])),
            requests: Some(quantities(&[("cpu", "100m"), ("memory", "70Mi")])),
        }),
        env: Some(vec![EnvVar {
            name: "GOMEMLIMIT".to_string(),
            value: Some("161MiB".to_string()),
            value_from: None,
        }]),
        args: Some(strings(&["-conf", "/etc/coredns/Corefile"])),
        volume_mounts: Some(vec![VolumeMount {
            name: "config-volume".to_string(),
            mount_path: "/etc/coredns".to_string(),
            read_only: Some(true),
            ..VolumeMount::default()
        }]),
        ports: Some(vec![
            port("dns", "UDP", 53),
            port("dns-tcp", "TCP", 53),
            port("metrics", "TCP", 9153),
        ]),
        liveness_probe: Some(Probe {
            initial_delay_seconds: Some(60),
            timeout_seconds: Some(5),
            success_threshold: Some(1),
            failure_threshold: Some(5),
            ..http_probe("/health", 8080)
        }),
        readiness_probe: Some(http_probe("/ready", 8181)),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            capabilities: Some(Capabilities {
                add: Some(strings(&["NET_BIND_SERVICE"])),
                drop: Some(strings(&["ALL"])),
            }),
            read_only_root_filesystem: Some(true),
            ..SecurityContext::default()
        }),
        ..Container::default()
    }
}

/// Two replicas spread across nodes, one replaced at a time.
pub(super) fn deployment(image: &str) -> Deployment {
    let app = string_map(&[APP]);
    Deployment {
        metadata: meta(NAME, Some(KUBE_SYSTEM), &[APP, ("kubernetes.io/name", "CoreDNS")]),
        spec: Some(DeploymentSpec {
            replicas: Some(2),
            strategy: Some(DeploymentStrategy {
                type_: Some("RollingUpdate".to_string()),
                rolling_update: Some(RollingUpdateDeployment {
                    max_unavailable: Some(IntOrString::Int(1)),
                    max_surge: None,
                }),
            }),
            selector: LabelSelector {
                match_labels: Some(app.clone()),
                match_expressions: None,
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(app),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    node_selector: Some(string_map(&[("kubernetes.io/os", "linux")])),
                    affinity: Some(Affinity {
                        pod_anti_affinity: Some(PodAntiAffinity {
                            preferred_during_scheduling_ignored_during_execution: Some(vec![
                                WeightedPodAffinityTerm {
                                    weight: 100,
                                    pod_affinity_term: PodAffinityTerm {
                                        label_selector: Some(LabelSelector {
                                            match_expressions: Some(vec![LabelSelectorRequirement {
                                                key: APP.0.to_string(),
                                                operator: "In".to_string(),
                                                values: Some(vec![APP.1.to_string()]),
                                            }]),
                                            match_labels: None,
                                        }),
                                        topology_key: "kubernetes.io/hostname".to_string(),
                                        ..PodAffinityTerm::default()
                                    },
                                },
                            ]),
                            ..PodAntiAffinity::default()
                        }),
                        ..Affinity::default()
                    }),
                    service_account_name: Some(NAME.to_string()),
                    priority_class_name: Some("system-cluster-critical".to_string()),
                    tolerations: Some(vec![
                        no_schedule("node-role.kubernetes.io/control-plane"),
                        no_schedule("node.cloudprovider.kubernetes.io/uninitialized"),
                    ]),
                    containers: vec![container(image)],
                    dns_policy: Some("Default".to_string()),
                    volumes: Some(vec![Volume {
                        name: "config-volume".to_string(),
                        config_map: Some(ConfigMapVolumeSource {
                            name: Some(NAME.to_string()),
                            items: Some(vec![KeyToPath {
                                key: "Corefile".to_string(),
                                path: "Corefile".to_string(),
                                mode: None,
                            }]),
                            ..ConfigMapVolumeSource::default()
                        }),
                        ..Volume::default()
                    }]),
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

fn service_port(name: &str, protocol: &str, number: i32) -> ServicePort {
    ServicePort {
        name: Some(name.to_string()),
        port: number,
        protocol: Some(protocol.to_string()),
        target_port: Some(IntOrString::Int(number)),
        ..ServicePort::default()
    }
}

/// The `kube-dns` service. Dual-stack when both service IPs are set.
pub(super) fn service(cfg: &BootstrapManifestsConfig) -> Service {
    let mut cluster_ips = Vec::new();
    let mut ip_families = Vec::new();
    if !cfg.dns_service_ip.is_empty() {
        cluster_ips.push(cfg.dns_service_ip.clone());
        ip_families.push("IPv4".to_string());
    }
    if !cfg.dns_service_ipv6.is_empty() {
        cluster_ips.push(cfg.dns_service_ipv6.clone());
        ip_families.push("IPv6".to_string());
    }

    let ip_family_policy = if cluster_ips.len() == 2 {
        "RequireDualStack"
    } else {
        "SingleStack"
    };

    let mut metadata = meta(
        "kube-dns",
        Some(KUBE_SYSTEM),
        &[
            APP,
            ("kubernetes.io/cluster-service", "true"),
            ("kubernetes.io/name", "CoreDNS"),
        ],
    );
    metadata.annotations = Some(string_map(&[
        ("prometheus.io/scrape", "true"),
        ("prometheus.io/port", "9153"),
    ]));

    Service {
        metadata,
        spec: Some(ServiceSpec {
            selector: Some(string_map(&[APP])),
            cluster_ip: cluster_ips.first().cloned(),
            cluster_ips: Some(cluster_ips).filter(|ips| !ips.is_empty()),
            ip_families: Some(ip_families).filter(|families| !families.is_empty()),
            ip_family_policy: Some(ip_family_policy.to_string()),
            ports: Some(vec![
                service_port("dns", "UDP", 53),
                service_port("dns-tcp", "TCP", 53),
                service_port("metrics", "TCP", 9153),
            ]),
            ..ServiceSpec::default()
        }),
        ..Service::default()
    }
}
