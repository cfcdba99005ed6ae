//! Accessors that apply defaults to the raw `v1alpha1` fields.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time;

use super::*;
use crate::constants;
use crate::net::{nth_ip_in_cidr_set, split_cidrs, ParseCidrError};

/// Role of the machine in the cluster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MachineType {
    /// Type left empty.
    Unknown,
    /// Control plane node that bootstraps the cluster.
    Init,
    /// Control plane node.
    ControlPlane,
    /// Worker node.
    Worker,
}

impl MachineType {
    /// True for init and control plane nodes.
    pub fn is_control_plane(self) -> bool {
        matches!(self, MachineType::Init | MachineType::ControlPlane)
    }

    /// True for workers.
    pub fn is_worker(self) -> bool {
        self == MachineType::Worker
    }
}

/// The machine type string isn't one of the known types.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("unknown machine type {0:?}")]
pub struct UnknownMachineType(pub String);

impl FromStr for MachineType {
    type Err = UnknownMachineType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" | "unknown" => Ok(MachineType::Unknown),
            "init" => Ok(MachineType::Init),
            "controlplane" => Ok(MachineType::ControlPlane),
            "worker" | "join" => Ok(MachineType::Worker),
            other => Err(UnknownMachineType(other.to_string())),
        }
    }
}

impl fmt::Display for MachineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MachineType::Unknown => "unknown",
            MachineType::Init => "init",
            MachineType::ControlPlane => "controlplane",
            MachineType::Worker => "worker",
        })
    }
}

fn image_or(explicit: &str, repository: &str, version: &str) -> String {
    if explicit.is_empty() {
        format!("{}:v{}", repository, version)
    } else {
        explicit.to_string()
    }
}

impl Config {
    /// Machine section, or an empty one.
    pub fn machine(&self) -> MachineConfig {
        self.machine.clone().unwrap_or_default()
    }

    /// Cluster section, or an empty one.
    pub fn cluster(&self) -> ClusterConfig {
        self.cluster.clone().unwrap_or_default()
    }
}

impl MachineConfig {
    /// Parsed machine type; unknown strings map to [`MachineType::Unknown`].
    pub fn machine_type(&self) -> MachineType {
        self.type_.parse().unwrap_or(MachineType::Unknown)
    }

    /// Kubelet section, or an empty one.
    pub fn kubelet(&self) -> KubeletConfig {
        self.kubelet.clone().unwrap_or_default()
    }

    /// Network section, or an empty one.
    pub fn network(&self) -> NetworkConfig {
        self.network.clone().unwrap_or_default()
    }

    /// Registries section, or an empty one.
    pub fn registries(&self) -> RegistriesConfig {
        self.registries.clone().unwrap_or_default()
    }

    /// Features section, or an empty one.
    pub fn features(&self) -> FeaturesConfig {
        self.features.clone().unwrap_or_default()
    }

    /// Whether the controller manager runs on this machine.
    pub fn controller_manager_enabled(&self) -> bool {
        !self
            .control_plane
            .as_ref()
            .and_then(|cp| cp.controller_manager.as_ref())
            .map(|t| t.disabled)
            .unwrap_or(false)
    }

    /// Whether the scheduler runs on this machine.
    pub fn scheduler_enabled(&self) -> bool {
        !self
            .control_plane
            .as_ref()
            .and_then(|cp| cp.scheduler.as_ref())
            .map(|t| t.disabled)
            .unwrap_or(false)
    }

    /// Every network device, VLANs excluded.
    pub fn devices(&self) -> Vec<Device> {
        self.network
            .as_ref()
            .map(|n| n.interfaces.clone())
            .unwrap_or_default()
    }
}

impl KubeletConfig {
    /// Kubelet image, defaulting to the build version.
    pub fn image(&self) -> String {
        image_or(
            &self.image,
            constants::KUBELET_IMAGE,
            constants::DEFAULT_KUBERNETES_VERSION,
        )
    }

    /// Whether the default seccomp profile is enabled.
    pub fn default_runtime_seccomp_enabled(&self) -> bool {
        self.default_runtime_seccomp_profile_enabled.unwrap_or(false)
    }

    /// Whether static pods from the manifests directory are ignored.
    pub fn manifests_directory_disabled(&self) -> bool {
        self.disable_manifests_directory.unwrap_or(false)
    }

    /// Subnets the node IP is picked from.
    pub fn node_ip_valid_subnets(&self) -> Vec<String> {
        self.node_ip
            .as_ref()
            .map(|n| n.valid_subnets.clone())
            .unwrap_or_default()
    }
}

impl FeaturesConfig {
    /// KubePrism port when enabled.
    pub fn kube_prism_port(&self) -> Option<u16> {
        let prism = self.kube_prism.as_ref()?;
        if !prism.enabled.unwrap_or(false) {
            return None;
        }
        Some(if prism.port == 0 {
            constants::DEFAULT_KUBE_PRISM_PORT
        } else {
            prism.port
        })
    }

    /// Whether the machine API is exposed into the cluster.
    pub fn talos_api_access_enabled(&self) -> bool {
        self.kubernetes_talos_api_access
            .as_ref()
            .and_then(|a| a.enabled)
            .unwrap_or(false)
    }
}

impl ClusterConfig {
    /// Control plane endpoint as written.
    pub fn endpoint(&self) -> String {
        self.control_plane
            .as_ref()
            .map(|cp| cp.endpoint.clone())
            .unwrap_or_default()
    }

    /// Parsed control plane endpoint.
    pub fn endpoint_url(&self) -> Result<url::Url, url::ParseError> {
        url::Url::parse(&self.endpoint())
    }

    /// Port the API server listens on locally.
    pub fn local_api_server_port(&self) -> u16 {
        match self.control_plane.as_ref().map(|cp| cp.local_api_server_port) {
            Some(port) if port != 0 => port,
            _ => constants::DEFAULT_CONTROL_PLANE_PORT,
        }
    }

    /// Cluster DNS domain.
    pub fn dns_domain(&self) -> String {
        match self.network.as_ref().map(|n| n.dns_domain.as_str()) {
            Some(domain) if !domain.is_empty() => domain.to_string(),
            _ => constants::DEFAULT_DNS_DOMAIN.to_string(),
        }
    }

    /// CNI configuration, defaulting to Flannel.
    pub fn cni(&self) -> CniConfig {
        match self.network.as_ref().and_then(|n| n.cni.clone()) {
            Some(cni) => cni,
            None => CniConfig {
                name: constants::FLANNEL_CNI.to_string(),
                ..CniConfig::default()
            },
        }
    }

    /// Pod subnets.
    pub fn pod_cidrs(&self) -> Vec<String> {
        match self.network.as_ref().map(|n| n.pod_subnets.clone()) {
            Some(subnets) if !subnets.is_empty() => subnets,
            _ => vec![constants::DEFAULT_IPV4_POD_NET.to_string()],
        }
    }

    /// Service subnets.
    pub fn service_cidrs(&self) -> Vec<String> {
        match self.network.as_ref().map(|n| n.service_subnets.clone()) {
            Some(subnets) if !subnets.is_empty() => subnets,
            _ => vec![constants::DEFAULT_IPV4_SERVICE_NET.to_string()],
        }
    }

    /// First address of every service subnet family.
    pub fn api_server_ips(&self) -> Result<Vec<IpAddr>, ParseCidrError> {
        let cidrs = split_cidrs(&self.service_cidrs().join(","))?;
        nth_ip_in_cidr_set(&cidrs, 1)
    }

    /// Tenth address of every service subnet family.
    pub fn dns_service_ips(&self) -> Result<Vec<IpAddr>, ParseCidrError> {
        let cidrs = split_cidrs(&self.service_cidrs().join(","))?;
        nth_ip_in_cidr_set(&cidrs, 10)
    }

    /// Bootstrap token id, empty if the token is malformed.
    pub fn token_id(&self) -> String {
        split_token(&self.token).map(|(id, _)| id.to_string()).unwrap_or_default()
    }

    /// Bootstrap token secret, empty if the token is malformed.
    pub fn token_secret(&self) -> String {
        split_token(&self.token)
            .map(|(_, secret)| secret.to_string())
            .unwrap_or_default()
    }

    /// API server section, or an empty one.
    pub fn api_server(&self) -> ApiServerConfig {
        self.api_server.clone().unwrap_or_default()
    }

    /// Controller manager section, or an empty one.
    pub fn controller_manager(&self) -> ControllerManagerConfig {
        self.controller_manager.clone().unwrap_or_default()
    }

    /// Scheduler section, or an empty one.
    pub fn scheduler(&self) -> SchedulerConfig {
        self.scheduler.clone().unwrap_or_default()
    }

    /// Proxy section, or an empty one.
    pub fn proxy(&self) -> ProxyConfig {
        self.proxy.clone().unwrap_or_default()
    }

    /// Whether CoreDNS is deployed.
    pub fn core_dns_enabled(&self) -> bool {
        !self.core_dns.as_ref().map(|c| c.disabled).unwrap_or(false)
    }

    /// CoreDNS image.
    pub fn core_dns_image(&self) -> String {
        match self.core_dns.as_ref().map(|c| c.image.as_str()) {
            Some(image) if !image.is_empty() => image.to_string(),
            _ => format!("{}:{}", constants::COREDNS_IMAGE, constants::DEFAULT_COREDNS_VERSION),
        }
    }

    /// Whether an external cloud provider is used.
    pub fn external_cloud_provider_enabled(&self) -> bool {
        self.external_cloud_provider
            .as_ref()
            .and_then(|p| p.enabled)
            .unwrap_or(false)
    }

    /// Manifests of the external cloud provider.
    pub fn external_cloud_provider_manifests(&self) -> Vec<String> {
        self.external_cloud_provider
            .as_ref()
            .map(|p| p.manifests.clone())
            .unwrap_or_default()
    }

    /// Whether cluster discovery is enabled.
    pub fn discovery_enabled(&self) -> bool {
        self.discovery.as_ref().and_then(|d| d.enabled).unwrap_or(false)
    }

    /// Whether workloads may run on control plane nodes.
    pub fn scheduling_on_control_planes(&self) -> bool {
        self.allow_scheduling_on_control_planes.unwrap_or(false)
    }

    /// Lifetime of the admin kubeconfig certificate.
    pub fn admin_kubeconfig_lifetime(&self) -> time::Duration {
        match self.admin_kubeconfig.as_ref().map(|a| a.cert_lifetime) {
            Some(lifetime) if !lifetime.is_zero() => lifetime.get(),
            _ => constants::ADMIN_CERT_DEFAULT_LIFETIME,
        }
    }

    /// Extra manifest headers.
    pub fn extra_manifest_headers(&self) -> BTreeMap<String, String> {
        self.extra_manifest_headers.clone()
    }
}

fn split_token(token: &str) -> Option<(&str, &str)> {
    let mut parts = token.split('.');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(id), Some(secret), None) => Some((id, secret)),
        _ => None,
    }
}

impl ApiServerConfig {
    /// API server image.
    pub fn image(&self) -> String {
        image_or(
            &self.image,
            constants::KUBE_APISERVER_IMAGE,
            constants::DEFAULT_KUBERNETES_VERSION,
        )
    }
}

impl ControllerManagerConfig {
    /// Controller manager image.
    pub fn image(&self) -> String {
        image_or(
            &self.image,
            constants::KUBE_CONTROLLER_MANAGER_IMAGE,
            constants::DEFAULT_KUBERNETES_VERSION,
        )
    }
}

impl SchedulerConfig {
    /// Scheduler image.
    pub fn image(&self) -> String {
        image_or(
            &self.image,
            constants::KUBE_SCHEDULER_IMAGE,
            constants::DEFAULT_KUBERNETES_VERSION,
        )
    }
}

impl ProxyConfig {
    /// Whether kube-proxy is deployed.
    pub fn enabled(&self) -> bool {
        !self.disabled
    }

    /// kube-proxy image.
    pub fn image(&self) -> String {
        image_or(
            &self.image,
            constants::KUBE_PROXY_IMAGE,
            constants::DEFAULT_KUBERNETES_VERSION,
        )
    }
}

impl Device {
    /// Every address of the device, the deprecated `cidr` included.
    pub fn all_addresses(&self) -> Vec<String> {
        let mut out = self.addresses.clone();
        if !self.cidr.is_empty() {
            out.push(self.cidr.clone());
        }
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", MachineType::Unknown)]
    #[case("init", MachineType::Init)]
    #[case("controlplane", MachineType::ControlPlane)]
    #[case("worker", MachineType::Worker)]
    #[case("join", MachineType::Worker)]
    fn machine_types_parse(#[case] input: &str, #[case] expected: MachineType) {
        assert_eq!(expected, input.parse().unwrap());
    }

    #[test]
    fn cluster_defaults() {
        let cluster = ClusterConfig::default();
        assert_eq!("cluster.local", cluster.dns_domain());
        assert_eq!(vec!["10.244.0.0/16".to_string()], cluster.pod_cidrs());
        assert_eq!(6443, cluster.local_api_server_port());
        assert_eq!("flannel", cluster.cni().name);
        assert_eq!(
            vec!["10.96.0.10".parse::<IpAddr>().unwrap()],
            cluster.dns_service_ips().unwrap()
        );
        assert!(cluster.proxy().enabled());
        assert!(cluster.core_dns_enabled());
    }

    #[test]
    fn token_splits_into_id_and_secret() {
        let cluster = ClusterConfig {
            token: "abcdef.0123456789abcdef".into(),
            ..ClusterConfig::default()
        };
        assert_eq!("abcdef", cluster.token_id());
        assert_eq!("0123456789abcdef", cluster.token_secret());

        let broken = ClusterConfig {
            token: "nodot".into(),
            ..ClusterConfig::default()
        };
        assert_eq!("", broken.token_id());
    }

    #[test]
    fn images_default_to_the_build_version() {
        let kubelet = KubeletConfig::default();
        assert_eq!(
            format!("ghcr.io/siderolabs/kubelet:v{}", constants::DEFAULT_KUBERNETES_VERSION),
            kubelet.image()
        );
        let custom = KubeletConfig {
            image: "example.com/kubelet:v1".into(),
            ..KubeletConfig::default()
        };
        assert_eq!("example.com/kubelet:v1", custom.image());
    }
}
