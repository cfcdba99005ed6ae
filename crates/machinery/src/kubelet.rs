//! Kubelet command line and `KubeletConfiguration` derivation.
//!
//! The machine config is first reduced to a [`KubeletConfig`] resource.
//! That resource, the node name and the node IPs are then turned into the
//! [`KubeletSpec`] the kubelet service runs with.

use std::net::IpAddr;

use serde_json::{json, Map, Value};

use crate::argsbuilder::{Args, DeniedError, MergePolicies, MergePolicy};
use crate::config::unstructured::merge_values;
use crate::config::v1alpha1::{self, ExtraMount};
use crate::config::{Container, RuntimeMode};
use crate::constants;
use crate::net::{Cidr, ParseCidrError};
use crate::resources::k8s::{KubeletConfig, KubeletSpec, NodeIpConfig};

/// Reasons a kubelet spec can't be built.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// `extraConfig` touches fields the machine manages.
    #[error("{}", locked_message(.0))]
    LockedFields(Vec<String>),
    /// `extraConfig` isn't a mapping.
    #[error("extra kubelet configuration must be a mapping")]
    NotAMapping,
    /// `extraConfig` can't be represented as JSON.
    #[error("error converting extra kubelet configuration: {0}")]
    Convert(#[from] serde_json::Error),
    /// Kubelet overlays don't merge.
    #[error("error merging kubelet configuration overlays: {0}")]
    Overlay(#[from] crate::config::merge::MergeError),
    /// An `extraArgs` key is denied.
    #[error("error merging arguments: {0}")]
    Args(#[from] DeniedError),
    /// A subnet doesn't parse.
    #[error(transparent)]
    Subnet(#[from] ParseCidrError),
}

fn locked_message(fields: &[String]) -> String {
    fields
        .iter()
        .map(|f| format!("field {:?} can't be overridden", f))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Collects the kubelet settings of a config.
///
/// `KubeletConfig` documents are merged over `machine.kubelet.extraConfig`
/// in document order.
pub fn config_from_container(container: &Container) -> Result<Option<KubeletConfig>, Error> {
    let config = match container.raw_v1alpha1() {
        Some(config) => config,
        None => return Ok(None),
    };
    let machine = config.machine();
    let cluster = config.cluster();
    let kubelet = machine.kubelet();

    let mut extra_config = kubelet.extra_config.0.clone();
    for overlay in container.kubelet_overlays() {
        if extra_config.is_null() {
            extra_config = serde_yaml::Value::Mapping(Default::default());
        }
        merge_values(&mut extra_config, overlay.spec.extra_config.0.clone(), "")?;
    }

    let cluster_dns = if kubelet.cluster_dns.is_empty() {
        cluster
            .dns_service_ips()?
            .iter()
            .map(IpAddr::to_string)
            .collect()
    } else {
        kubelet.cluster_dns.clone()
    };

    Ok(Some(KubeletConfig {
        image: kubelet.image(),
        cluster_dns,
        cluster_domain: cluster.dns_domain(),
        extra_args: kubelet.extra_args.clone(),
        extra_mounts: kubelet.extra_mounts.clone(),
        extra_config: serde_json::to_value(&extra_config)?,
        cloud_provider_external: cluster.external_cloud_provider_enabled(),
        default_runtime_seccomp_enabled: kubelet.default_runtime_seccomp_enabled(),
        skip_node_registration: kubelet.skip_node_registration,
        static_pod_list_url: String::new(),
        disable_manifests_directory: kubelet.manifests_directory_disabled(),
        register_with_fqdn: kubelet.register_with_fqdn,
    }))
}

/// Subnets the node IP is chosen from.
///
/// Valid subnets prefixed with `!` are exclusions. Without any valid subnet
/// every address qualifies. Pod and service networks and the shared VIPs of
/// the machine are always excluded.
pub fn node_ip_config(config: &v1alpha1::Config) -> NodeIpConfig {
    let machine = config.machine();
    let cluster = config.cluster();

    let mut valid_subnets = Vec::new();
    let mut exclude_subnets = Vec::new();
    for subnet in machine.kubelet().node_ip_valid_subnets() {
        match subnet.strip_prefix('!') {
            Some(excluded) => exclude_subnets.push(excluded.to_string()),
            None => valid_subnets.push(subnet),
        }
    }
    if valid_subnets.is_empty() {
        valid_subnets = vec!["0.0.0.0/0".to_string(), "::/0".to_string()];
    }

    exclude_subnets.extend(cluster.pod_cidrs());
    exclude_subnets.extend(cluster.service_cidrs());
    for device in machine.devices() {
        let vips = device
            .vip
            .iter()
            .chain(device.vlans.iter().filter_map(|v| v.vip.as_ref()));
        for vip in vips {
            if !vip.ip.is_empty() {
                exclude_subnets.push(vip.ip.clone());
            }
        }
    }

    NodeIpConfig {
        valid_subnets,
        exclude_subnets,
    }
}

fn parse_subnet(subnet: &str) -> Result<Cidr, ParseCidrError> {
    if subnet.contains('/') {
        return subnet.parse();
    }
    let ip: IpAddr = subnet
        .parse()
        .map_err(|_| ParseCidrError(subnet.to_string()))?;
    Cidr::new(ip, if ip.is_ipv4() { 32 } else { 128 })
}

/// Picks the first IPv4 and the first IPv6 node address that is inside a
/// valid subnet and outside every excluded one. Order of `addresses` is
/// kept.
pub fn select_node_ips(addresses: &[String], config: &NodeIpConfig) -> Result<Vec<String>, ParseCidrError> {
    let valid = config
        .valid_subnets
        .iter()
        .map(|s| parse_subnet(s))
        .collect::<Result<Vec<_>, _>>()?;
    let excluded = config
        .exclude_subnets
        .iter()
        .map(|s| parse_subnet(s))
        .collect::<Result<Vec<_>, _>>()?;

    let mut v4 = false;
    let mut v6 = false;
    let mut selected = Vec::new();
    for address in addresses {
        let ip = match address.split('/').next().and_then(|a| a.parse::<IpAddr>().ok()) {
            Some(ip) => ip,
            None => continue,
        };
        if ip.is_loopback() || is_link_local(&ip) {
            continue;
        }
        if !valid.iter().any(|c| c.contains(&ip)) || excluded.iter().any(|c| c.contains(&ip)) {
            continue;
        }
        let family_taken = if ip.is_ipv4() { &mut v4 } else { &mut v6 };
        if *family_taken {
            continue;
        }
        *family_taken = true;
        selected.push(ip.to_string());
    }
    Ok(selected)
}

fn is_link_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_link_local(),
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
    }
}

/// Builds the kubelet spec.
///
/// `node_ips` is only consulted when the user didn't pass `node-ip`
/// through `extraArgs`; `None` there means the IPs aren't known yet and no
/// spec can be built.
pub fn spec(
    config: &KubeletConfig,
    nodename: &str,
    node_ips: Option<&[String]>,
    mode: RuntimeMode,
) -> Result<Option<KubeletSpec>, Error> {
    let mut expected_nodename = nodename.to_string();

    let mut args = Args::new();
    args.set("container-runtime", "remote")
        .set(
            "container-runtime-endpoint",
            format!("unix://{}", constants::CRI_CONTAINERD_ADDRESS),
        )
        .set("config", constants::KUBELET_CONFIG_PATH)
        .set("cert-dir", constants::KUBELET_PKI_DIR)
        .set("hostname-override", nodename);

    if !config.skip_node_registration {
        args.set("bootstrap-kubeconfig", constants::KUBELET_BOOTSTRAP_KUBECONFIG)
            .set("kubeconfig", constants::KUBELET_KUBECONFIG);
    }
    if config.cloud_provider_external {
        args.set("cloud-provider", "external");
    }

    let extra_args = Args::from(&config.extra_args);
    if extra_args.contains("hostname-override") {
        expected_nodename = String::new();
    }
    if !extra_args.contains("node-ip") {
        match node_ips {
            Some(ips) if ips.is_empty() => {}
            Some(ips) => {
                args.set_list("node-ip", ips.iter().cloned());
            }
            None => return Ok(None),
        }
    }

    let policies = MergePolicies::new().with(
        MergePolicy::Denied,
        &[
            "bootstrap-kubeconfig",
            "kubeconfig",
            "container-runtime",
            "container-runtime-endpoint",
            "config",
            "cert-dir",
        ],
    );
    args.merge(extra_args, &policies)?;

    let mut extra_mounts = system_mounts();
    extra_mounts.extend(config.extra_mounts.iter().cloned());

    Ok(Some(KubeletSpec {
        image: config.image.clone(),
        args: args.args(),
        extra_mounts,
        expected_nodename,
        config: kubelet_configuration(config, mode)?,
    }))
}

fn system_mounts() -> Vec<ExtraMount> {
    vec![ExtraMount {
        destination: constants::KUBELET_STATE_DIR.to_string(),
        type_: "bind".to_string(),
        source: constants::KUBELET_STATE_DIR.to_string(),
        options: vec!["rbind".to_string(), "rshared".to_string(), "rw".to_string()],
    }]
}

fn is_unset(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(Value::Number(_)) | Some(Value::Bool(_)) => false,
    }
}

fn set_default(config: &mut Map<String, Value>, key: &str, value: Value) {
    if is_unset(config.get(key)) {
        config.insert(key.to_string(), value);
    }
}

/// Builds the `KubeletConfiguration` document: `extraConfig` with the
/// managed fields set and defaults for everything left out.
pub fn kubelet_configuration(config: &KubeletConfig, mode: RuntimeMode) -> Result<Value, Error> {
    let mut doc = match &config.extra_config {
        Value::Null => Map::new(),
        Value::Object(map) => map.clone(),
        _ => return Err(Error::NotAMapping),
    };

    let locked: Vec<String> = constants::KUBELET_LOCKED_FIELDS
        .iter()
        .filter(|f| doc.contains_key(**f))
        .map(|f| f.to_string())
        .collect();
    if !locked.is_empty() {
        return Err(Error::LockedFields(locked));
    }

    doc.insert("apiVersion".into(), json!("kubelet.config.k8s.io/v1beta1"));
    doc.insert("kind".into(), json!("KubeletConfiguration"));
    if config.disable_manifests_directory {
        doc.remove("staticPodPath");
    } else {
        doc.insert("staticPodPath".into(), json!(constants::MANIFESTS_DIR));
    }
    if !config.static_pod_list_url.is_empty() {
        doc.insert("staticPodURL".into(), json!(config.static_pod_list_url));
    }
    doc.insert("port".into(), json!(constants::KUBELET_PORT));
    doc.insert(
        "authentication".into(),
        json!({
            "x509": {"clientCAFile": constants::KUBERNETES_CA_PATH},
            "webhook": {"enabled": !config.skip_node_registration},
            "anonymous": {"enabled": false},
        }),
    );
    doc.insert(
        "authorization".into(),
        json!({
            "mode": if config.skip_node_registration { "AlwaysAllow" } else { "Webhook" },
        }),
    );
    doc.insert("cgroupRoot".into(), json!("/"));
    doc.insert("systemCgroups".into(), json!(constants::CGROUP_SYSTEM));
    doc.insert("kubeletCgroups".into(), json!(constants::CGROUP_KUBELET));
    doc.insert("rotateCertificates".into(), json!(true));
    doc.insert("protectKernelDefaults".into(), json!(!mode.in_container()));

    if config.default_runtime_seccomp_enabled {
        doc.insert("seccompDefault".into(), json!(true));
        match doc.get_mut("featureGates") {
            Some(Value::Object(gates)) => {
                if gates.get("SeccompDefault") == Some(&json!(false)) {
                    gates.insert("SeccompDefault".into(), json!(true));
                }
            }
            _ => {
                doc.insert("featureGates".into(), json!({"SeccompDefault": true}));
            }
        }
    }

    set_default(&mut doc, "address", json!("0.0.0.0"));
    set_default(&mut doc, "oomScoreAdj", json!(constants::KUBELET_OOM_SCORE_ADJ));
    set_default(&mut doc, "clusterDomain", json!(config.cluster_domain));
    set_default(&mut doc, "clusterDNS", json!(config.cluster_dns));
    set_default(&mut doc, "serializeImagePulls", json!(false));
    set_default(&mut doc, "failSwapOn", json!(false));
    set_default(
        &mut doc,
        "systemReserved",
        json!({
            "cpu": constants::KUBELET_SYSTEM_RESERVED_CPU,
            "memory": constants::KUBELET_SYSTEM_RESERVED_MEMORY,
            "pid": constants::KUBELET_SYSTEM_RESERVED_PID,
            "ephemeral-storage": constants::KUBELET_SYSTEM_RESERVED_EPHEMERAL_STORAGE,
        }),
    );
    match doc.get_mut("logging") {
        Some(Value::Object(logging)) => set_default(logging, "format", json!("json")),
        _ => {
            doc.insert("logging".into(), json!({"format": "json"}));
        }
    }
    set_default(
        &mut doc,
        "shutdownGracePeriod",
        json!(constants::KUBELET_SHUTDOWN_GRACE_PERIOD),
    );
    set_default(
        &mut doc,
        "shutdownGracePeriodCriticalPods",
        json!(constants::KUBELET_SHUTDOWN_GRACE_PERIOD_CRITICAL_PODS),
    );
    set_default(&mut doc, "streamingConnectionIdleTimeout", json!("5m0s"));
    set_default(&mut doc, "tlsMinVersion", json!("VersionTLS13"));

    Ok(Value::Object(doc))
}

#[cfg(test)]
mod test {
    use super::*;

    fn base_config() -> KubeletConfig {
        KubeletConfig {
            image: "ghcr.io/siderolabs/kubelet:v1.31.1".into(),
            cluster_dns: vec!["10.96.0.10".into()],
            cluster_domain: "cluster.local".into(),
            ..Default::default()
        }
    }

    #[test]
    fn spec_has_managed_args() {
        let ips = vec!["172.20.0.2".to_string()];
        let spec = spec(&base_config(), "example.com", Some(&ips[..]), RuntimeMode::Metal)
            .unwrap()
            .unwrap();
        assert_eq!(
            vec![
                "--bootstrap-kubeconfig=/etc/kubernetes/bootstrap-kubeconfig",
                "--cert-dir=/var/lib/kubelet/pki",
                "--config=/etc/kubernetes/kubelet.yaml",
                "--container-runtime=remote",
                "--container-runtime-endpoint=unix:///run/containerd/containerd.sock",
                "--hostname-override=example.com",
                "--kubeconfig=/etc/kubernetes/kubeconfig-kubelet",
                "--node-ip=172.20.0.2",
            ],
            spec.args
        );
        assert_eq!("example.com", spec.expected_nodename);
        assert_eq!(constants::KUBELET_STATE_DIR, spec.extra_mounts[0].destination);
        assert_eq!(json!(["10.96.0.10"]), spec.config["clusterDNS"]);
        assert_eq!(json!(true), spec.config["protectKernelDefaults"]);
    }

    #[test]
    fn user_node_ip_skips_the_lookup() {
        let mut config = base_config();
        config.extra_args.insert("node-ip".into(), "10.0.0.1".into());
        config.extra_args.insert("hostname-override".into(), "custom".into());
        let spec = spec(&config, "example.com", None, RuntimeMode::Metal).unwrap().unwrap();
        assert!(spec.args.contains(&"--node-ip=10.0.0.1".to_string()));
        assert!(spec.args.contains(&"--hostname-override=custom".to_string()));
        assert_eq!("", spec.expected_nodename);
    }

    #[test]
    fn missing_node_ips_defer_the_spec() {
        assert!(spec(&base_config(), "node", None, RuntimeMode::Metal).unwrap().is_none());
    }

    #[test]
    fn denied_args_fail() {
        let mut config = base_config();
        config.extra_args.insert("config".into(), "/tmp/kubelet.yaml".into());
        let err = spec(&config, "node", Some(&[][..]), RuntimeMode::Metal).unwrap_err();
        assert_eq!(
            r#"error merging arguments: extra arg "config" is not allowed"#,
            err.to_string()
        );
    }

    #[test]
    fn locked_fields_are_reported() {
        let mut config = base_config();
        config.extra_config = json!({"port": 1234, "staticPodPath": "/tmp", "maxPods": 10});
        let err = kubelet_configuration(&config, RuntimeMode::Metal).unwrap_err();
        assert_eq!(
            r#"field "port" can't be overridden; field "staticPodPath" can't be overridden"#,
            err.to_string()
        );
    }

    #[test]
    fn explicit_zero_numbers_are_kept() {
        let mut config = base_config();
        config.extra_config = json!({"oomScoreAdj": 0});
        let doc = kubelet_configuration(&config, RuntimeMode::Metal).unwrap();
        assert_eq!(json!(0), doc["oomScoreAdj"]);

        let doc = kubelet_configuration(&base_config(), RuntimeMode::Metal).unwrap();
        assert_eq!(json!(constants::KUBELET_OOM_SCORE_ADJ), doc["oomScoreAdj"]);
    }

    #[test]
    fn extra_config_wins_over_defaults() {
        let mut config = base_config();
        config.extra_config = json!({"oomScoreAdj": -300, "clusterDNS": ["1.1.1.1"]});
        config.default_runtime_seccomp_enabled = true;
        config.skip_node_registration = true;
        let doc = kubelet_configuration(&config, RuntimeMode::Container).unwrap();
        assert_eq!(json!(-300), doc["oomScoreAdj"]);
        assert_eq!(json!(["1.1.1.1"]), doc["clusterDNS"]);
        assert_eq!(json!({"SeccompDefault": true}), doc["featureGates"]);
        assert_eq!(json!("AlwaysAllow"), doc["authorization"]["mode"]);
        assert_eq!(json!(false), doc["protectKernelDefaults"]);
        assert_eq!(json!("json"), doc["logging"]["format"]);
        assert_eq!(json!("30s"), doc["shutdownGracePeriod"]);
    }

    #[test]
    fn node_ips_follow_subnets() {
        let config = NodeIpConfig {
            valid_subnets: vec!["10.0.0.0/8".into(), "::/0".into()],
            exclude_subnets: vec!["10.5.0.1".into()],
        };
        let addresses = vec![
            "192.168.1.1/24".to_string(),
            "10.5.0.1/8".to_string(),
            "fe80::1/64".to_string(),
            "10.5.0.2/8".to_string(),
            "2001:db8::1/64".to_string(),
            "10.5.0.3/8".to_string(),
        ];
        assert_eq!(
            vec!["10.5.0.2".to_string(), "2001:db8::1".to_string()],
            select_node_ips(&addresses, &config).unwrap()
        );
    }

    #[test]
    fn negated_subnets_become_exclusions() {
        let config: v1alpha1::Config = serde_yaml::from_str(
            "machine:\n  kubelet:\n    nodeIP:\n      validSubnets: [10.0.0.0/8, '!10.0.0.3/32']\n",
        )
        .unwrap();
        let ip_config = node_ip_config(&config);
        assert_eq!(vec!["10.0.0.0/8".to_string()], ip_config.valid_subnets);
        assert_eq!("10.0.0.3/32", ip_config.exclude_subnets[0]);
        assert!(ip_config.exclude_subnets.contains(&constants::DEFAULT_IPV4_POD_NET.to_string()));
    }

    #[test]
    fn overlays_merge_into_extra_config() {
        let container = Container::from_bytes(
            b"version: v1alpha1\nmachine:\n  type: worker\n  kubelet:\n    extraConfig:\n      maxPods: 50\n---\nkind: KubeletConfig\nversion: v1alpha1\nspec:\n  extraConfig:\n    serverTLSBootstrap: true\n",
        )
        .unwrap();
        let config = config_from_container(&container).unwrap().unwrap();
        assert_eq!(json!(50), config.extra_config["maxPods"]);
        assert_eq!(json!(true), config.extra_config["serverTLSBootstrap"]);
        assert_eq!(vec!["10.96.0.10".to_string()], config.cluster_dns);
        assert_eq!("cluster.local", config.cluster_domain);
    }
}
