//! Control plane component configs derived from the machine config, and
//! the configuration files the API server and the scheduler read.
//!
//! Every `*_config` function returns `None` unless the config is a
//! v1alpha1 document with both a machine and a cluster section describing
//! a control plane node.

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::argsbuilder::{Args, DeniedError, MergePolicies, MergePolicy};
use crate::config::v1alpha1::{self, ResourcesConfig, VolumeMountConfig};
use crate::config::Unstructured;
use crate::constants;
use crate::images::KubernetesVersion;
use crate::net::ParseCidrError;
use crate::resources::k8s::{
    AdmissionControlConfig, AdmissionPlugin, ApiServerConfig, AuditPolicyConfig, AuthorizationConfig,
    Authorizer, BootstrapManifestsConfig, ControllerManagerConfig, ExtraManifest, ExtraManifestsConfig,
    ExtraVolume, ProxyConfig, Resources, SchedulerConfig,
};

/// Authorizer types the API server accepts.
pub const AUTHORIZER_TYPES: &[&str] = &["Node", "RBAC", "Webhook"];

/// Reasons a control plane config can't be derived.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A user argument isn't allowed.
    #[error(transparent)]
    Args(#[from] DeniedError),
    /// Service subnets don't parse.
    #[error("error calculating DNS service IPs: {0}")]
    ServiceIps(#[from] ParseCidrError),
    /// An authorizer entry is malformed.
    #[error("invalid authorizer {index}: {reason}")]
    Authorizer {
        /// Position in the user list.
        index: usize,
        /// What is wrong with it.
        reason: String,
    },
    /// Unstructured config can't be represented as JSON.
    #[error("error converting configuration: {0}")]
    Convert(#[from] serde_json::Error),
    /// A rendered file failed to serialize.
    #[error("error encoding configuration: {0}")]
    Encode(#[from] serde_yaml::Error),
}

fn control_plane_sections(config: &v1alpha1::Config) -> Option<(v1alpha1::MachineConfig, v1alpha1::ClusterConfig)> {
    let machine = config.machine.as_ref()?;
    let cluster = config.cluster.as_ref()?;
    if !machine.machine_type().is_control_plane() {
        return None;
    }
    Some((machine.clone(), cluster.clone()))
}

fn cloud_provider(cluster: &v1alpha1::ClusterConfig) -> String {
    if cluster.external_cloud_provider_enabled() {
        "external".to_string()
    } else {
        String::new()
    }
}

fn convert_volumes(volumes: &[VolumeMountConfig]) -> Vec<ExtraVolume> {
    volumes
        .iter()
        .map(|v| ExtraVolume {
            name: v.name(),
            host_path: v.host_path.clone(),
            mount_path: v.mount_path.clone(),
            read_only: v.readonly,
        })
        .collect()
}

fn quantity(value: &Unstructured, key: &str) -> Option<String> {
    match value.as_mapping()?.get(&serde_yaml::Value::from(key))? {
        serde_yaml::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Requests and limits for cpu and memory. Unset keys stay out so that
/// the pod renderer can fill in its defaults.
fn convert_resources(resources: Option<&ResourcesConfig>) -> Resources {
    let mut converted = Resources::default();
    if let Some(resources) = resources {
        for key in ["cpu", "memory"].iter() {
            if let Some(v) = quantity(&resources.requests, key) {
                converted.requests.insert(key.to_string(), v);
            }
            if let Some(v) = quantity(&resources.limits, key) {
                converted.limits.insert(key.to_string(), v);
            }
        }
    }
    converted
}

fn to_json(value: &Unstructured) -> Result<Value, serde_json::Error> {
    serde_json::to_value(&value.0)
}

/// API server settings.
pub fn api_server_config(config: &v1alpha1::Config) -> Option<ApiServerConfig> {
    let (machine, cluster) = control_plane_sections(config)?;
    let api_server = cluster.api_server();

    // A node that doesn't register has no pod IP to advertise.
    let advertised_address = if machine.kubelet().skip_node_registration {
        String::new()
    } else {
        "$(POD_IP)".to_string()
    };

    Some(ApiServerConfig {
        image: api_server.image(),
        cloud_provider: cloud_provider(&cluster),
        control_plane_endpoint: cluster.endpoint(),
        etcd_servers: vec![constants::ETCD_LOCAL_ENDPOINT.to_string()],
        local_port: cluster.local_api_server_port(),
        service_cidrs: cluster.service_cidrs(),
        extra_args: api_server.extra_args.clone(),
        extra_volumes: convert_volumes(&api_server.extra_volumes),
        environment_variables: api_server.env.clone(),
        pod_security_policy_enabled: !api_server.disable_pod_security_policy,
        advertised_address,
        resources: convert_resources(api_server.resources.as_ref()),
    })
}

/// Controller manager settings.
pub fn controller_manager_config(config: &v1alpha1::Config) -> Option<ControllerManagerConfig> {
    let (machine, cluster) = control_plane_sections(config)?;
    let controller_manager = cluster.controller_manager();

    Some(ControllerManagerConfig {
        enabled: machine.controller_manager_enabled(),
        image: controller_manager.image(),
        cloud_provider: cloud_provider(&cluster),
        pod_cidrs: cluster.pod_cidrs(),
        service_cidrs: cluster.service_cidrs(),
        extra_args: controller_manager.extra_args.clone(),
        extra_volumes: convert_volumes(&controller_manager.extra_volumes),
        environment_variables: controller_manager.env.clone(),
        resources: convert_resources(controller_manager.resources.as_ref()),
    })
}

/// Scheduler settings.
pub fn scheduler_config(config: &v1alpha1::Config) -> Option<Result<SchedulerConfig, Error>> {
    let (machine, cluster) = control_plane_sections(config)?;
    let scheduler = cluster.scheduler();

    Some(to_json(&scheduler.config).map_err(Error::from).map(|config| SchedulerConfig {
        enabled: machine.scheduler_enabled(),
        image: scheduler.image(),
        extra_args: scheduler.extra_args.clone(),
        extra_volumes: convert_volumes(&scheduler.extra_volumes),
        environment_variables: scheduler.env.clone(),
        resources: convert_resources(scheduler.resources.as_ref()),
        config,
    }))
}

/// kube-proxy arguments.
///
/// Without an explicit mode, `nftables` is used from Kubernetes 1.31 on
/// and `iptables` before. An image without a readable version tag is
/// taken to be the default Kubernetes version.
pub fn proxy_args(cluster: &v1alpha1::ClusterConfig) -> Result<Vec<String>, DeniedError> {
    let proxy = cluster.proxy();

    let mode = if proxy.mode.is_empty() {
        let version = KubernetesVersion::from_image_ref(&proxy.image())
            .or_else(|| KubernetesVersion::parse(constants::DEFAULT_KUBERNETES_VERSION));
        match version {
            Some(v) if !v.at_least(1, 31) => "iptables".to_string(),
            _ => "nftables".to_string(),
        }
    } else {
        proxy.mode.clone()
    };

    let mut args = Args::new();
    args.set_list("cluster-cidr", cluster.pod_cidrs())
        .set("hostname-override", "$(NODE_NAME)")
        .set("kubeconfig", "/etc/kubernetes/kubeconfig")
        .set("proxy-mode", mode)
        .set("conntrack-max-per-core", "0");

    let policies = MergePolicies::new().with(MergePolicy::Denied, &["kubeconfig"]);
    args.merge(&proxy.extra_args, &policies)?;

    Ok(args.args())
}

/// kube-proxy settings.
pub fn proxy_config(config: &v1alpha1::Config) -> Option<Result<ProxyConfig, Error>> {
    let (_, cluster) = control_plane_sections(config)?;
    let proxy = cluster.proxy();

    Some(proxy_args(&cluster).map_err(Error::from).map(|args| ProxyConfig {
        enabled: proxy.enabled(),
        image: proxy.image(),
        args,
    }))
}

/// Admission plugins, configuration passed through as written.
pub fn admission_control_config(config: &v1alpha1::Config) -> Option<Result<AdmissionControlConfig, Error>> {
    let (_, cluster) = control_plane_sections(config)?;

    let plugins = cluster
        .api_server()
        .admission_control
        .iter()
        .map(|plugin| {
            Ok(AdmissionPlugin {
                name: plugin.name.clone(),
                configuration: to_json(&plugin.configuration)?,
            })
        })
        .collect::<Result<Vec<_>, Error>>();

    Some(plugins.map(|config| AdmissionControlConfig { config }))
}

/// The audit policy used when the config has none.
pub fn default_audit_policy() -> Value {
    json!({
        "apiVersion": "audit.k8s.io/v1",
        "kind": "Policy",
        "rules": [{"level": "Metadata"}],
    })
}

/// Audit policy of the API server.
pub fn audit_policy_config(config: &v1alpha1::Config) -> Option<Result<AuditPolicyConfig, Error>> {
    let (_, cluster) = control_plane_sections(config)?;
    let policy = cluster.api_server().audit_policy;

    if policy.is_empty() {
        return Some(Ok(AuditPolicyConfig {
            config: default_audit_policy(),
        }));
    }
    Some(to_json(&policy).map_err(Error::from).map(|config| AuditPolicyConfig { config }))
}

fn validate_authorizer(index: usize, authorizer: &Authorizer) -> Result<(), Error> {
    let fail = |reason: String| Err(Error::Authorizer { index, reason });

    if !AUTHORIZER_TYPES.contains(&authorizer.type_.as_str()) {
        return fail(format!(
            "type {:?} is not one of {}",
            authorizer.type_,
            AUTHORIZER_TYPES.join(", ")
        ));
    }
    if authorizer.name.is_empty() {
        return fail("name is required".to_string());
    }
    if authorizer.type_ == "Webhook" && !authorizer.webhook.is_object() {
        return fail("webhook authorizers require a webhook configuration".to_string());
    }
    Ok(())
}

/// Authorizer chain of the API server.
///
/// The chain always starts with the `Node` and `RBAC` authorizers; user
/// entries of those types replace the defaults in place and every other
/// entry is appended.
pub fn authorization_config(config: &v1alpha1::Config) -> Option<Result<AuthorizationConfig, Error>> {
    let (_, cluster) = control_plane_sections(config)?;
    let api_server = cluster.api_server();
    Some(authorizers(&api_server.authorization_config).map(|config| AuthorizationConfig {
        image: api_server.image(),
        config,
    }))
}

fn authorizers(user: &[v1alpha1::AuthorizationConfigAuthorizer]) -> Result<Vec<Authorizer>, Error> {
    let mut chain = vec![
        Authorizer {
            type_: "Node".to_string(),
            name: "node".to_string(),
            webhook: Value::Null,
        },
        Authorizer {
            type_: "RBAC".to_string(),
            name: "rbac".to_string(),
            webhook: Value::Null,
        },
    ];

    for (index, entry) in user.iter().enumerate() {
        let authorizer = Authorizer {
            type_: entry.type_.clone(),
            name: entry.name.clone(),
            webhook: to_json(&entry.webhook)?,
        };
        validate_authorizer(index, &authorizer)?;

        match chain
            .iter_mut()
            .find(|a| a.type_ == authorizer.type_ && authorizer.type_ != "Webhook")
        {
            Some(existing) => *existing = authorizer,
            None => chain.push(authorizer),
        }
    }
    Ok(chain)
}

/// Settings of the manifests applied when the cluster is bootstrapped.
pub fn bootstrap_manifests_config(config: &v1alpha1::Config) -> Option<Result<BootstrapManifestsConfig, Error>> {
    let (machine, cluster) = control_plane_sections(config)?;
    Some(bootstrap_manifests(&machine, &cluster))
}

fn bootstrap_manifests(
    machine: &v1alpha1::MachineConfig,
    cluster: &v1alpha1::ClusterConfig,
) -> Result<BootstrapManifestsConfig, Error> {
    let dns_ips = cluster.dns_service_ips()?;
    let dns_service_ip = dns_ips.iter().find(|ip| ip.is_ipv4()).map(|ip| ip.to_string());
    let dns_service_ipv6 = dns_ips.iter().find(|ip| ip.is_ipv6()).map(|ip| ip.to_string());

    let features = machine.features();
    let (server, flannel_host, flannel_port) = match features.kube_prism_port() {
        Some(port) => (
            format!("https://127.0.0.1:{}", port),
            "127.0.0.1".to_string(),
            port.to_string(),
        ),
        None => (cluster.endpoint(), String::new(), String::new()),
    };

    let cni = cluster.cni();
    let proxy = cluster.proxy();

    Ok(BootstrapManifestsConfig {
        server,
        cluster_domain: cluster.dns_domain(),
        pod_cidrs: cluster.pod_cidrs(),
        proxy_enabled: proxy.enabled(),
        proxy_image: proxy.image(),
        proxy_args: proxy_args(cluster)?,
        coredns_enabled: cluster.core_dns_enabled(),
        coredns_image: cluster.core_dns_image(),
        dns_service_ip: dns_service_ip.unwrap_or_default(),
        dns_service_ipv6: dns_service_ipv6.unwrap_or_default(),
        flannel_enabled: cni.name == constants::FLANNEL_CNI,
        flannel_image: format!("{}:{}", constants::FLANNEL_IMAGE, constants::FLANNEL_VERSION),
        flannel_extra_args: cni.flannel.map(|f| f.extra_args).unwrap_or_default(),
        flannel_kube_service_host: flannel_host,
        flannel_kube_service_port: flannel_port,
        pod_security_policy_enabled: !cluster.api_server().disable_pod_security_policy,
        talos_api_service_enabled: features.talos_api_access_enabled(),
    })
}

/// Manifests fetched from URLs or inlined in the config, ordered by
/// priority: CNI first, cloud provider next, user manifests last.
pub fn extra_manifests_config(config: &v1alpha1::Config) -> Option<ExtraManifestsConfig> {
    let (_, cluster) = control_plane_sections(config)?;

    let from_url = |url: &String, priority: &str, headers: BTreeMap<String, String>| ExtraManifest {
        name: url.clone(),
        url: url.clone(),
        priority: priority.to_string(),
        extra_headers: headers,
        inline_manifest: String::new(),
    };

    let mut manifests = Vec::new();
    manifests.extend(cluster.cni().urls.iter().map(|u| from_url(u, "05", BTreeMap::new())));
    manifests.extend(
        cluster
            .external_cloud_provider_manifests()
            .iter()
            .map(|u| from_url(u, "30", BTreeMap::new())),
    );
    let headers = cluster.extra_manifest_headers();
    manifests.extend(cluster.extra_manifests.iter().map(|u| from_url(u, "99", headers.clone())));
    manifests.extend(cluster.inline_manifests.iter().map(|m| ExtraManifest {
        name: m.name.clone(),
        priority: "99".to_string(),
        inline_manifest: m.contents.clone(),
        ..ExtraManifest::default()
    }));

    Some(ExtraManifestsConfig {
        extra_manifests: manifests,
    })
}

/// File name of the admission control config in the API server config
/// directory.
pub const ADMISSION_CONTROL_FILE: &str = "admission-control-config.yaml";
/// File name of the audit policy.
pub const AUDIT_POLICY_FILE: &str = "auditpolicy.yaml";
/// File name of the authorization config.
pub const AUTHORIZATION_FILE: &str = "authorization-config.yaml";
/// File name of the scheduler config.
pub const SCHEDULER_CONFIG_FILE: &str = "scheduler-config.yaml";

/// `AdmissionConfiguration` listing every plugin.
pub fn admission_control_file(config: &AdmissionControlConfig) -> Result<String, Error> {
    let plugins: Vec<Value> = config
        .config
        .iter()
        .map(|p| json!({"name": p.name, "configuration": p.configuration}))
        .collect();
    Ok(crate::encoding::to_yaml(&json!({
        "apiVersion": "apiserver.config.k8s.io/v1",
        "kind": "AdmissionConfiguration",
        "plugins": plugins,
    }))?)
}

/// The audit policy document.
pub fn audit_policy_file(config: &AuditPolicyConfig) -> Result<String, Error> {
    Ok(crate::encoding::to_yaml(&config.config)?)
}

/// `AuthorizationConfiguration` with the authorizer chain.
pub fn authorization_file(config: &AuthorizationConfig) -> Result<String, Error> {
    let authorizers: Vec<Value> = config
        .config
        .iter()
        .map(|a| {
            let mut entry = json!({"type": a.type_, "name": a.name});
            if !a.webhook.is_null() {
                entry["webhook"] = a.webhook.clone();
            }
            entry
        })
        .collect();
    Ok(crate::encoding::to_yaml(&json!({
        "apiVersion": "apiserver.config.k8s.io/v1beta1",
        "kind": "AuthorizationConfiguration",
        "authorizers": authorizers,
    }))?)
}

/// `KubeSchedulerConfiguration`: user config with the client kubeconfig
/// pinned.
pub fn scheduler_config_file(config: &SchedulerConfig) -> Result<String, Error> {
    let mut doc = match &config.config {
        Value::Object(map) if !map.is_empty() => Value::Object(map.clone()),
        _ => json!({}),
    };
    if doc.get("apiVersion").map_or(true, Value::is_null) {
        doc["apiVersion"] = json!("kubescheduler.config.k8s.io/v1");
    }
    doc["kind"] = json!("KubeSchedulerConfiguration");
    if !doc.get("clientConnection").map_or(false, Value::is_object) {
        doc["clientConnection"] = json!({});
    }
    doc["clientConnection"]["kubeconfig"] = json!(format!("{}/kubeconfig", constants::KUBE_SCHEDULER_SECRETS_DIR));
    Ok(crate::encoding::to_yaml(&doc)?)
}

#[cfg(test)]
mod test {
    use super::*;

    fn config(yaml: &str) -> v1alpha1::Config {
        serde_yaml::from_str(yaml).unwrap()
    }

    const CONTROL_PLANE: &str = "machine:\n  type: controlplane\ncluster:\n  controlPlane:\n    endpoint: https://example.com:6443\n";

    #[test]
    fn workers_get_no_control_plane_config() {
        let worker = config("machine:\n  type: worker\ncluster:\n  clusterName: test\n");
        assert!(api_server_config(&worker).is_none());
        assert!(extra_manifests_config(&worker).is_none());
    }

    #[test]
    fn api_server_defaults() {
        let api_server = api_server_config(&config(CONTROL_PLANE)).unwrap();
        assert_eq!("https://example.com:6443", api_server.control_plane_endpoint);
        assert_eq!(6443, api_server.local_port);
        assert_eq!("$(POD_IP)", api_server.advertised_address);
        assert_eq!(vec!["https://localhost:2379".to_string()], api_server.etcd_servers);
        assert!(api_server.pod_security_policy_enabled);
        assert!(api_server.resources.requests.is_empty());
    }

    #[test]
    fn resources_keep_only_set_keys() {
        let cfg = config(
            "machine:\n  type: controlplane\ncluster:\n  apiServer:\n    resources:\n      requests:\n        cpu: 1\n      limits:\n        memory: 1Gi\n",
        );
        let api_server = api_server_config(&cfg).unwrap();
        assert_eq!(Some(&"1".to_string()), api_server.resources.requests.get("cpu"));
        assert_eq!(None, api_server.resources.requests.get("memory"));
        assert_eq!(Some(&"1Gi".to_string()), api_server.resources.limits.get("memory"));
    }

    #[test]
    fn proxy_mode_follows_the_image_version() {
        let cluster: v1alpha1::ClusterConfig =
            serde_yaml::from_str("proxy:\n  image: registry.k8s.io/kube-proxy:v1.30.2\n").unwrap();
        assert!(proxy_args(&cluster).unwrap().contains(&"--proxy-mode=iptables".to_string()));

        let cluster = v1alpha1::ClusterConfig::default();
        let args = proxy_args(&cluster).unwrap();
        assert_eq!(
            vec![
                "--cluster-cidr=10.244.0.0/16",
                "--conntrack-max-per-core=0",
                "--hostname-override=$(NODE_NAME)",
                "--kubeconfig=/etc/kubernetes/kubeconfig",
                "--proxy-mode=nftables",
            ],
            args
        );

        let denied: v1alpha1::ClusterConfig =
            serde_yaml::from_str("proxy:\n  extraArgs:\n    kubeconfig: /tmp/x\n").unwrap();
        assert!(proxy_args(&denied).is_err());
    }

    #[test]
    fn authorizers_replace_defaults_and_append() {
        let cfg = config(
            "machine:\n  type: controlplane\ncluster:\n  apiServer:\n    authorizationConfig:\n      - type: Webhook\n        name: webhook\n        webhook:\n          timeout: 3s\n      - type: RBAC\n        name: custom-rbac\n",
        );
        let authorization = authorization_config(&cfg).unwrap().unwrap();
        let names: Vec<_> = authorization.config.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(vec!["node", "custom-rbac", "webhook"], names);
        assert_eq!(json!({"timeout": "3s"}), authorization.config[2].webhook);
    }

    #[test]
    fn malformed_authorizers_fail() {
        let unknown = config(
            "machine:\n  type: controlplane\ncluster:\n  apiServer:\n    authorizationConfig:\n      - type: ABAC\n        name: abac\n",
        );
        let err = authorization_config(&unknown).unwrap().unwrap_err();
        assert!(err.to_string().contains("\"ABAC\" is not one of Node, RBAC, Webhook"));

        let webhook = config(
            "machine:\n  type: controlplane\ncluster:\n  apiServer:\n    authorizationConfig:\n      - type: Webhook\n        name: hook\n",
        );
        assert!(authorization_config(&webhook).unwrap().is_err());
    }

    #[test]
    fn bootstrap_manifests_follow_kube_prism() {
        let cfg = config(
            "machine:\n  type: controlplane\n  features:\n    kubePrism:\n      enabled: true\n      port: 7445\ncluster:\n  controlPlane:\n    endpoint: https://example.com:6443\n  network:\n    serviceSubnets: [10.96.0.0/12, 'fd00:10::/108']\n",
        );
        let manifests = bootstrap_manifests_config(&cfg).unwrap().unwrap();
        assert_eq!("https://127.0.0.1:7445", manifests.server);
        assert_eq!("7445", manifests.flannel_kube_service_port);
        assert_eq!("10.96.0.10", manifests.dns_service_ip);
        assert_eq!("fd00:10::a", manifests.dns_service_ipv6);
        assert!(manifests.flannel_enabled);
        assert!(manifests.coredns_enabled);
    }

    #[test]
    fn extra_manifests_are_prioritized() {
        let cfg = config(
            "machine:\n  type: controlplane\ncluster:\n  network:\n    cni:\n      name: custom\n      urls: [https://cni.example.com/cni.yaml]\n  extraManifests: [https://example.com/extra.yaml]\n  extraManifestHeaders:\n    Token: x\n  inlineManifests:\n    - name: inline\n      contents: 'kind: Namespace'\n",
        );
        let manifests = extra_manifests_config(&cfg).unwrap().extra_manifests;
        let order: Vec<_> = manifests.iter().map(|m| (m.priority.as_str(), m.name.as_str())).collect();
        assert_eq!(
            vec![
                ("05", "https://cni.example.com/cni.yaml"),
                ("99", "https://example.com/extra.yaml"),
                ("99", "inline"),
            ],
            order
        );
        assert_eq!(Some(&"x".to_string()), manifests[1].extra_headers.get("Token"));
        assert!(manifests[0].extra_headers.is_empty());
    }

    #[test]
    fn empty_audit_policy_uses_the_default() {
        let policy = audit_policy_config(&config(CONTROL_PLANE)).unwrap().unwrap();
        assert_eq!(default_audit_policy(), policy.config);
        assert_eq!(
            "apiVersion: audit.k8s.io/v1\nkind: Policy\nrules:\n  - level: Metadata\n",
            audit_policy_file(&policy).unwrap()
        );
    }

    #[test]
    fn scheduler_config_pins_the_kubeconfig() {
        let scheduler = SchedulerConfig {
            config: json!({"profiles": [{"schedulerName": "default-scheduler"}]}),
            ..SchedulerConfig::default()
        };
        let rendered: Value = serde_yaml::from_str(&scheduler_config_file(&scheduler).unwrap()).unwrap();
        assert_eq!(json!("KubeSchedulerConfiguration"), rendered["kind"]);
        assert_eq!(
            json!("/system/secrets/kubernetes/kube-scheduler/kubeconfig"),
            rendered["clientConnection"]["kubeconfig"]
        );
        assert_eq!(json!("default-scheduler"), rendered["profiles"][0]["schedulerName"]);
    }
}
