//! Kubernetes component specs derived from the machine config.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Pod;
use resource_state::ResourceSpec;
use serde::{Deserialize, Serialize};

use crate::config::v1alpha1::ExtraMount;

/// Namespace of node level Kubernetes resources.
pub const NAMESPACE: &str = "k8s";
/// Namespace of control plane resources.
pub const CONTROL_PLANE_NAMESPACE: &str = "controlplane";

/// Id of the kubelet resources.
pub const KUBELET_ID: &str = "kubelet";
/// Id of the node name.
pub const NODENAME_ID: &str = "nodename";
/// Id of the API server config.
pub const API_SERVER_ID: &str = "kube-apiserver";
/// Id of the controller manager config.
pub const CONTROLLER_MANAGER_ID: &str = "kube-controller-manager";
/// Id of the scheduler config.
pub const SCHEDULER_ID: &str = "kube-scheduler";
/// Id of the proxy config.
pub const PROXY_ID: &str = "kube-proxy";
/// Id of the admission control config.
pub const ADMISSION_CONTROL_ID: &str = "admission-control";
/// Id of the audit policy.
pub const AUDIT_POLICY_ID: &str = "audit-policy";
/// Id of the authorization config.
pub const AUTHORIZATION_ID: &str = "authorization";
/// Id of the bootstrap manifests config.
pub const BOOTSTRAP_MANIFESTS_ID: &str = "bootstrap-manifests";
/// Id of the extra manifests config.
pub const EXTRA_MANIFESTS_ID: &str = "extra-manifests";

macro_rules! resource_spec {
    ($ty:ident, $type_:literal, $ns:expr) => {
        impl ResourceSpec for $ty {
            const TYPE: &'static str = $type_;
            const NAMESPACE: &'static str = $ns;
        }
    };
}

/// Kubernetes node name of this machine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Nodename {
    /// RFC 1123 node name.
    pub nodename: String,
    /// Version of the hostname status the name was derived from.
    pub hostname_version: String,
    /// The kubelet doesn't register the node.
    pub skip_node_registration: bool,
}

resource_spec!(Nodename, "Nodenames.kubernetes.talos.dev", NAMESPACE);

/// Subnets the kubelet node IPs are picked from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeIpConfig {
    /// Subnets addresses must be in.
    pub valid_subnets: Vec<String>,
    /// Subnets addresses must not be in.
    pub exclude_subnets: Vec<String>,
}

resource_spec!(NodeIpConfig, "NodeIPConfigs.kubernetes.talos.dev", NAMESPACE);

/// Node IPs the kubelet advertises.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeIp {
    /// At most one IPv4 and one IPv6 address.
    pub addresses: Vec<String>,
}

resource_spec!(NodeIp, "NodeIPs.kubernetes.talos.dev", NAMESPACE);

/// Kubelet settings collected from the machine config.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KubeletConfig {
    pub image: String,
    pub cluster_dns: Vec<String>,
    pub cluster_domain: String,
    pub extra_args: BTreeMap<String, String>,
    pub extra_mounts: Vec<ExtraMount>,
    pub extra_config: serde_json::Value,
    pub cloud_provider_external: bool,
    pub default_runtime_seccomp_enabled: bool,
    pub skip_node_registration: bool,
    pub static_pod_list_url: String,
    pub disable_manifests_directory: bool,
    pub register_with_fqdn: bool,
}

resource_spec!(KubeletConfig, "KubeletConfigs.kubernetes.talos.dev", NAMESPACE);

/// What the kubelet runs with.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct KubeletSpec {
    /// Kubelet image.
    pub image: String,
    /// Command line flags, sorted.
    pub args: Vec<String>,
    /// Mounts into the kubelet container.
    pub extra_mounts: Vec<ExtraMount>,
    /// Node name the kubelet is expected to register, empty when the user
    /// overrides `hostname-override`.
    pub expected_nodename: String,
    /// The KubeletConfiguration document.
    pub config: serde_json::Value,
}

resource_spec!(KubeletSpec, "KubeletSpecs.kubernetes.talos.dev", NAMESPACE);

/// A host path volume of a control plane pod.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtraVolume {
    pub name: String,
    pub host_path: String,
    pub mount_path: String,
    pub read_only: bool,
}

/// Resource requests and limits of a control plane container, as
/// Kubernetes quantities.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resources {
    pub requests: BTreeMap<String, String>,
    pub limits: BTreeMap<String, String>,
}

/// kube-apiserver settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiServerConfig {
    pub image: String,
    pub cloud_provider: String,
    pub control_plane_endpoint: String,
    pub etcd_servers: Vec<String>,
    pub local_port: u16,
    pub service_cidrs: Vec<String>,
    pub extra_args: BTreeMap<String, String>,
    pub extra_volumes: Vec<ExtraVolume>,
    pub environment_variables: BTreeMap<String, String>,
    pub pod_security_policy_enabled: bool,
    pub advertised_address: String,
    pub resources: Resources,
}

resource_spec!(ApiServerConfig, "APIServerConfigs.kubernetes.talos.dev", CONTROL_PLANE_NAMESPACE);

/// kube-controller-manager settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ControllerManagerConfig {
    pub enabled: bool,
    pub image: String,
    pub cloud_provider: String,
    pub pod_cidrs: Vec<String>,
    pub service_cidrs: Vec<String>,
    pub extra_args: BTreeMap<String, String>,
    pub extra_volumes: Vec<ExtraVolume>,
    pub environment_variables: BTreeMap<String, String>,
    pub resources: Resources,
}

resource_spec!(
    ControllerManagerConfig,
    "ControllerManagerConfigs.kubernetes.talos.dev",
    CONTROL_PLANE_NAMESPACE
);

/// kube-scheduler settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub image: String,
    pub extra_args: BTreeMap<String, String>,
    pub extra_volumes: Vec<ExtraVolume>,
    pub environment_variables: BTreeMap<String, String>,
    pub resources: Resources,
    /// KubeSchedulerConfiguration overlay.
    pub config: serde_json::Value,
}

resource_spec!(SchedulerConfig, "SchedulerConfigs.kubernetes.talos.dev", CONTROL_PLANE_NAMESPACE);

/// kube-proxy settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub enabled: bool,
    pub image: String,
    /// Command line flags, sorted.
    pub args: Vec<String>,
}

resource_spec!(ProxyConfig, "ProxyConfigs.kubernetes.talos.dev", CONTROL_PLANE_NAMESPACE);

/// An admission plugin with its configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AdmissionPlugin {
    pub name: String,
    pub configuration: serde_json::Value,
}

/// Admission plugins of the API server.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AdmissionControlConfig {
    pub config: Vec<AdmissionPlugin>,
}

resource_spec!(
    AdmissionControlConfig,
    "AdmissionControlConfigs.kubernetes.talos.dev",
    CONTROL_PLANE_NAMESPACE
);

/// Audit policy of the API server.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditPolicyConfig {
    pub config: serde_json::Value,
}

resource_spec!(AuditPolicyConfig, "AuditPolicyConfigs.kubernetes.talos.dev", CONTROL_PLANE_NAMESPACE);

/// An authorizer of the API server authorization chain.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Authorizer {
    #[serde(rename = "type")]
    pub type_: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub webhook: serde_json::Value,
}

/// Authorization chain of the API server.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthorizationConfig {
    pub image: String,
    pub config: Vec<Authorizer>,
}

resource_spec!(
    AuthorizationConfig,
    "AuthorizationConfigs.kubernetes.talos.dev",
    CONTROL_PLANE_NAMESPACE
);

/// Inputs of the bootstrap manifests.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapManifestsConfig {
    pub server: String,
    pub cluster_domain: String,
    pub pod_cidrs: Vec<String>,

    pub proxy_enabled: bool,
    pub proxy_image: String,
    pub proxy_args: Vec<String>,

    pub coredns_enabled: bool,
    pub coredns_image: String,

    pub dns_service_ip: String,
    pub dns_service_ipv6: String,

    pub flannel_enabled: bool,
    pub flannel_image: String,
    pub flannel_extra_args: Vec<String>,
    pub flannel_kube_service_host: String,
    pub flannel_kube_service_port: String,

    pub pod_security_policy_enabled: bool,
    pub talos_api_service_enabled: bool,
}

resource_spec!(
    BootstrapManifestsConfig,
    "BootstrapManifestsConfigs.kubernetes.talos.dev",
    CONTROL_PLANE_NAMESPACE
);

/// A manifest applied after the bootstrap manifests.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraManifest {
    pub name: String,
    pub url: String,
    pub priority: String,
    pub extra_headers: BTreeMap<String, String>,
    pub inline_manifest: String,
}

/// Manifests from URLs and inline sources.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtraManifestsConfig {
    pub extra_manifests: Vec<ExtraManifest>,
}

resource_spec!(
    ExtraManifestsConfig,
    "ExtraManifestsConfigs.kubernetes.talos.dev",
    CONTROL_PLANE_NAMESPACE
);

/// A static pod run by the kubelet.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticPod {
    pub pod: Pod,
}

resource_spec!(StaticPod, "StaticPods.kubernetes.talos.dev", NAMESPACE);

/// A set of Kubernetes objects applied together, keyed `<priority>-<name>`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// One YAML document per object.
    pub items: Vec<String>,
}

impl Manifest {
    /// All objects as one YAML stream.
    pub fn to_yaml_stream(&self) -> String {
        crate::encoding::join_documents(self.items.iter().cloned())
    }
}

resource_spec!(Manifest, "Manifests.kubernetes.talos.dev", CONTROL_PLANE_NAMESPACE);
