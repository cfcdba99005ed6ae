//! The monolithic `v1alpha1` document describing a machine and the cluster
//! it belongs to.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::is_default;
use crate::config::units::{DiskSize, Duration};
use crate::config::unstructured::Unstructured;
use crate::encoding::Base64Bytes;

pub mod docs;
mod provider;
pub mod redact;
pub mod validation;

pub use provider::MachineType;

/// Version string of the document.
pub const VERSION: &str = "v1alpha1";

/// Root of the `v1alpha1` document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Document version, always `v1alpha1`.
    pub version: String,
    /// Enables debug logging of services.
    #[serde(skip_serializing_if = "is_default")]
    pub debug: bool,
    /// Deprecated persistence flag, carried for compatibility.
    #[serde(skip_serializing_if = "is_default")]
    pub persist: bool,
    /// Machine specific settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine: Option<MachineConfig>,
    /// Cluster wide settings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterConfig>,
}

config_type!(Config {
    version => "version",
    debug => "debug",
    persist => "persist",
    machine => "machine",
    cluster => "cluster",
});

/// A PEM certificate and its private key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PemCertificateAndKey {
    /// PEM certificate.
    #[serde(skip_serializing_if = "Base64Bytes::is_empty")]
    pub crt: Base64Bytes,
    /// PEM private key.
    #[serde(skip_serializing_if = "Base64Bytes::is_empty")]
    pub key: Base64Bytes,
}

config_type!(PemCertificateAndKey {
    crt => "crt",
    key => "key",
});

/// A PEM private key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PemKey {
    /// PEM private key.
    #[serde(skip_serializing_if = "Base64Bytes::is_empty")]
    pub key: Base64Bytes,
}

config_type!(PemKey { key => "key" });

/// Machine section.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MachineConfig {
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca: Option<PemCertificateAndKey>,
    #[serde(rename = "acceptedCAs", skip_serializing_if = "Vec::is_empty")]
    pub accepted_cas: Vec<PemCertificateAndKey>,
    #[serde(rename = "certSANs", skip_serializing_if = "Vec::is_empty")]
    pub cert_sans: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<MachineControlPlaneConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubelet: Option<KubeletConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<MachineDisk>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub install: Option<InstallConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<MachineFile>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<TimeConfig>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub sysctls: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub sysfs: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registries: Option<RegistriesConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_disk_encryption: Option<SystemDiskEncryptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub features: Option<FeaturesConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub udev: Option<UdevConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kernel: Option<KernelConfig>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub node_labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub node_annotations: BTreeMap<String, String>,
}

config_type!(MachineConfig {
    type_ => "type",
    token => "token",
    ca => "ca",
    accepted_cas => "acceptedCAs",
    cert_sans => "certSANs",
    control_plane => "controlPlane",
    kubelet => "kubelet",
    network => "network",
    disks => "disks",
    install => "install",
    files => "files",
    env => "env",
    time => "time",
    sysctls => "sysctls",
    sysfs => "sysfs",
    registries => "registries",
    system_disk_encryption => "systemDiskEncryption",
    features => "features",
    udev => "udev",
    logging => "logging",
    kernel => "kernel",
    node_labels => "nodeLabels",
    node_annotations => "nodeAnnotations",
});

/// Machine level control plane toggles.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MachineControlPlaneConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller_manager: Option<ComponentToggle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<ComponentToggle>,
}

config_type!(MachineControlPlaneConfig {
    controller_manager => "controllerManager",
    scheduler => "scheduler",
});

/// Switches a control plane component off on this machine.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComponentToggle {
    #[serde(skip_serializing_if = "is_default")]
    pub disabled: bool,
}

config_type!(ComponentToggle { disabled => "disabled" });

/// Kubelet settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KubeletConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(rename = "clusterDNS", skip_serializing_if = "Vec::is_empty")]
    pub cluster_dns: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_args: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_mounts: Vec<ExtraMount>,
    #[serde(skip_serializing_if = "Unstructured::is_empty")]
    pub extra_config: Unstructured,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_runtime_seccomp_profile_enabled: Option<bool>,
    #[serde(rename = "registerWithFQDN", skip_serializing_if = "is_default")]
    pub register_with_fqdn: bool,
    #[serde(rename = "nodeIP", skip_serializing_if = "Option::is_none")]
    pub node_ip: Option<KubeletNodeIpConfig>,
    #[serde(skip_serializing_if = "is_default")]
    pub skip_node_registration: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_manifests_directory: Option<bool>,
}

config_type!(KubeletConfig {
    image => "image",
    cluster_dns => "clusterDNS",
    extra_args => "extraArgs",
    extra_mounts => "extraMounts",
    extra_config => "extraConfig",
    default_runtime_seccomp_profile_enabled => "defaultRuntimeSeccompProfileEnabled",
    register_with_fqdn => "registerWithFQDN",
    node_ip => "nodeIP",
    skip_node_registration => "skipNodeRegistration",
    disable_manifests_directory => "disableManifestsDirectory",
});

/// An OCI style mount passed to the kubelet container.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtraMount {
    pub destination: String,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub type_: String,
    pub source: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

config_type!(ExtraMount {
    destination => "destination",
    type_ => "type",
    source => "source",
    options => "options",
});

/// Subnets the kubelet node IP is picked from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KubeletNodeIpConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub valid_subnets: Vec<String>,
}

config_type!(KubeletNodeIpConfig { valid_subnets => "validSubnets" });

/// Host networking.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<Device>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nameservers: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_host_entries: Vec<ExtraHost>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubespan: Option<KubeSpanConfig>,
}

config_type!(NetworkConfig {
    hostname => "hostname",
    interfaces => "interfaces",
    nameservers => "nameservers",
    extra_host_entries => "extraHostEntries",
    kubespan => "kubespan",
});

/// A static `/etc/hosts` entry.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtraHost {
    pub ip: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
}

config_type!(ExtraHost {
    ip => "ip",
    aliases => "aliases",
});

/// KubeSpan settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KubeSpanConfig {
    #[serde(skip_serializing_if = "is_default")]
    pub enabled: bool,
    #[serde(skip_serializing_if = "is_default")]
    pub allow_down_peer_bypass: bool,
}

config_type!(KubeSpanConfig {
    enabled => "enabled",
    allow_down_peer_bypass => "allowDownPeerBypass",
});

/// A network interface.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Device {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub interface: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_selector: Option<DeviceSelector>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cidr: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bond: Option<Bond>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bridge: Option<Bridge>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub vlans: Vec<Vlan>,
    #[serde(skip_serializing_if = "is_default")]
    pub mtu: u32,
    #[serde(skip_serializing_if = "is_default")]
    pub dhcp: bool,
    #[serde(skip_serializing_if = "is_default")]
    pub ignore: bool,
    #[serde(skip_serializing_if = "is_default")]
    pub dummy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dhcp_options: Option<DhcpOptions>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wireguard: Option<Wireguard>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vip: Option<Vip>,
}

config_type!(Device {
    interface => "interface",
    device_selector => "deviceSelector",
    addresses => "addresses",
    cidr => "cidr",
    routes => "routes",
    bond => "bond",
    bridge => "bridge",
    vlans => "vlans",
    mtu => "mtu",
    dhcp => "dhcp",
    ignore => "ignore",
    dummy => "dummy",
    dhcp_options => "dhcpOptions",
    wireguard => "wireguard",
    vip => "vip",
});

/// Picks a link by its hardware properties.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceSelector {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub bus_path: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub hardware_addr: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub driver: String,
}

config_type!(DeviceSelector {
    bus_path => "busPath",
    hardware_addr => "hardwareAddr",
    driver => "driver",
});

/// A static route.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Route {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub network: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub gateway: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source: String,
    #[serde(skip_serializing_if = "is_default")]
    pub metric: u32,
}

config_type!(Route {
    network => "network",
    gateway => "gateway",
    source => "source",
    metric => "metric",
});

/// Bond settings. Option names follow the kernel bonding driver.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Bond {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub interfaces: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub device_selectors: Vec<DeviceSelector>,
    #[serde(rename = "arpIPTarget", skip_serializing_if = "Vec::is_empty")]
    pub arp_ip_target: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mode: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub xmit_hash_policy: String,
    #[serde(rename = "lacpRate", skip_serializing_if = "String::is_empty")]
    pub lacp_rate: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ad_actor_system: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub arp_validate: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub arp_all_targets: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub primary: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub primary_reselect: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub fail_over_mac: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub ad_select: String,
    #[serde(skip_serializing_if = "is_default")]
    pub miimon: u32,
    #[serde(skip_serializing_if = "is_default")]
    pub updelay: u32,
    #[serde(skip_serializing_if = "is_default")]
    pub downdelay: u32,
    #[serde(skip_serializing_if = "is_default")]
    pub arp_interval: u32,
    #[serde(skip_serializing_if = "is_default")]
    pub resend_igmp: u32,
    #[serde(skip_serializing_if = "is_default")]
    pub min_links: u32,
    #[serde(skip_serializing_if = "is_default")]
    pub lp_interval: u32,
    #[serde(skip_serializing_if = "is_default")]
    pub packets_per_slave: u32,
    #[serde(skip_serializing_if = "is_default")]
    pub num_peer_notif: u8,
    #[serde(skip_serializing_if = "is_default")]
    pub tlb_dynamic_lb: u8,
    #[serde(skip_serializing_if = "is_default")]
    pub all_slaves_active: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_carrier: Option<bool>,
    #[serde(skip_serializing_if = "is_default")]
    pub ad_actor_sys_prio: u16,
    #[serde(skip_serializing_if = "is_default")]
    pub ad_user_port_key: u16,
    #[serde(skip_serializing_if = "is_default")]
    pub peer_notify_delay: u32,
}

config_type!(Bond {
    interfaces => "interfaces",
    device_selectors => "deviceSelectors",
    arp_ip_target => "arpIPTarget",
    mode => "mode",
    xmit_hash_policy => "xmitHashPolicy",
    lacp_rate => "lacpRate",
    ad_actor_system => "adActorSystem",
    arp_validate => "arpValidate",
    arp_all_targets => "arpAllTargets",
    primary => "primary",
    primary_reselect => "primaryReselect",
    fail_over_mac => "failOverMac",
    ad_select => "adSelect",
    miimon => "miimon",
    updelay => "updelay",
    downdelay => "downdelay",
    arp_interval => "arpInterval",
    resend_igmp => "resendIgmp",
    min_links => "minLinks",
    lp_interval => "lpInterval",
    packets_per_slave => "packetsPerSlave",
    num_peer_notif => "numPeerNotif",
    tlb_dynamic_lb => "tlbDynamicLb",
    all_slaves_active => "allSlavesActive",
    use_carrier => "useCarrier",
    ad_actor_sys_prio => "adActorSysPrio",
    ad_user_port_key => "adUserPortKey",
    peer_notify_delay => "peerNotifyDelay",
});

/// Bridge settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bridge {
    pub interfaces: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stp: Option<Stp>,
}

config_type!(Bridge {
    interfaces => "interfaces",
    stp => "stp",
});

/// Spanning tree settings of a bridge.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stp {
    #[serde(skip_serializing_if = "is_default")]
    pub enabled: bool,
}

config_type!(Stp { enabled => "enabled" });

/// A VLAN on top of a device.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Vlan {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cidr: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<Route>,
    #[serde(skip_serializing_if = "is_default")]
    pub dhcp: bool,
    #[serde(rename = "vlanId")]
    pub vlan_id: u16,
    #[serde(skip_serializing_if = "is_default")]
    pub mtu: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vip: Option<Vip>,
}

config_type!(Vlan {
    addresses => "addresses",
    cidr => "cidr",
    routes => "routes",
    dhcp => "dhcp",
    vlan_id => "vlanId",
    mtu => "mtu",
    vip => "vip",
});

/// DHCP client options.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DhcpOptions {
    #[serde(skip_serializing_if = "is_default")]
    pub route_metric: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<bool>,
}

config_type!(DhcpOptions {
    route_metric => "routeMetric",
    ipv4 => "ipv4",
    ipv6 => "ipv6",
});

/// A Wireguard link.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Wireguard {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub private_key: String,
    #[serde(skip_serializing_if = "is_default")]
    pub listen_port: u16,
    #[serde(skip_serializing_if = "is_default")]
    pub firewall_mark: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub peers: Vec<WireguardPeer>,
}

config_type!(Wireguard {
    private_key => "privateKey",
    listen_port => "listenPort",
    firewall_mark => "firewallMark",
    peers => "peers",
});

/// A Wireguard peer.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireguardPeer {
    pub public_key: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
    #[serde(skip_serializing_if = "Duration::is_zero")]
    pub persistent_keepalive_interval: Duration,
    #[serde(rename = "allowedIPs", skip_serializing_if = "Vec::is_empty")]
    pub allowed_ips: Vec<String>,
}

config_type!(WireguardPeer {
    public_key => "publicKey",
    endpoint => "endpoint",
    persistent_keepalive_interval => "persistentKeepaliveInterval",
    allowed_ips => "allowedIPs",
});

/// A shared virtual IP.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Vip {
    pub ip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub equinix_metal: Option<VipProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hcloud: Option<VipProvider>,
}

config_type!(Vip {
    ip => "ip",
    equinix_metal => "equinixMetal",
    hcloud => "hcloud",
});

/// Cloud API credentials used to move a virtual IP.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VipProvider {
    pub api_token: String,
}

config_type!(VipProvider { api_token => "apiToken" });

/// Extra disk with partitions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineDisk {
    pub device: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub partitions: Vec<DiskPartition>,
}

config_type!(MachineDisk {
    device => "device",
    partitions => "partitions",
});

/// A partition of an extra disk. A zero size takes the rest of the disk.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskPartition {
    #[serde(skip_serializing_if = "is_default")]
    pub size: DiskSize,
    pub mountpoint: String,
}

config_type!(DiskPartition {
    size => "size",
    mountpoint => "mountpoint",
});

/// Installation target.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstallConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub disk: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_selector: Option<InstallDiskSelector>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_kernel_args: Vec<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(skip_serializing_if = "is_default")]
    pub wipe: bool,
    #[serde(rename = "legacyBIOSSupport", skip_serializing_if = "is_default")]
    pub legacy_bios_support: bool,
}

config_type!(InstallConfig {
    disk => "disk",
    disk_selector => "diskSelector",
    extra_kernel_args => "extraKernelArgs",
    image => "image",
    wipe => "wipe",
    legacy_bios_support => "legacyBIOSSupport",
});

/// Picks the install disk by its properties. `size` is a matcher such as
/// `>= 100GB` or `4TB`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstallDiskSelector {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub size: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub model: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub serial: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub modalias: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub uuid: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub wwid: String,
    #[serde(rename = "type", skip_serializing_if = "String::is_empty")]
    pub type_: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub bus_path: String,
}

config_type!(InstallDiskSelector {
    size => "size",
    name => "name",
    model => "model",
    serial => "serial",
    modalias => "modalias",
    uuid => "uuid",
    wwid => "wwid",
    type_ => "type",
    bus_path => "busPath",
});

/// A file written to the machine at boot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineFile {
    pub content: String,
    pub permissions: u32,
    pub path: String,
    pub op: String,
}

config_type!(MachineFile {
    content => "content",
    permissions => "permissions",
    path => "path",
    op => "op",
});

/// Time synchronization.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeConfig {
    #[serde(skip_serializing_if = "is_default")]
    pub disabled: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub servers: Vec<String>,
    #[serde(skip_serializing_if = "Duration::is_zero")]
    pub boot_timeout: Duration,
}

config_type!(TimeConfig {
    disabled => "disabled",
    servers => "servers",
    boot_timeout => "bootTimeout",
});

/// Image registry mirrors and per-registry TLS/auth.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistriesConfig {
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub mirrors: BTreeMap<String, RegistryMirrorConfig>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, RegistryConfig>,
}

config_type!(RegistriesConfig {
    mirrors => "mirrors",
    config => "config",
});

/// Endpoints that serve images for a registry host.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryMirrorConfig {
    pub endpoints: Vec<String>,
    #[serde(skip_serializing_if = "is_default")]
    pub override_path: bool,
    #[serde(skip_serializing_if = "is_default")]
    pub skip_fallback: bool,
}

config_type!(RegistryMirrorConfig {
    endpoints => "endpoints",
    override_path => "overridePath",
    skip_fallback => "skipFallback",
});

/// TLS and auth for one registry host.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<RegistryTlsConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<RegistryAuthConfig>,
}

config_type!(RegistryConfig {
    tls => "tls",
    auth => "auth",
});

/// Registry TLS settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryTlsConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_identity: Option<PemCertificateAndKey>,
    #[serde(skip_serializing_if = "Base64Bytes::is_empty")]
    pub ca: Base64Bytes,
    #[serde(skip_serializing_if = "is_default")]
    pub insecure_skip_verify: bool,
}

config_type!(RegistryTlsConfig {
    client_identity => "clientIdentity",
    ca => "ca",
    insecure_skip_verify => "insecureSkipVerify",
});

/// Registry credentials.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryAuthConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub password: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub auth: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub identity_token: String,
}

config_type!(RegistryAuthConfig {
    username => "username",
    password => "password",
    auth => "auth",
    identity_token => "identityToken",
});

/// Encryption of the system partitions.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemDiskEncryptionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<EncryptionConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ephemeral: Option<EncryptionConfig>,
}

config_type!(SystemDiskEncryptionConfig {
    state => "state",
    ephemeral => "ephemeral",
});

/// Encryption of one partition.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EncryptionConfig {
    pub provider: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<EncryptionKey>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cipher: String,
    #[serde(skip_serializing_if = "is_default")]
    pub key_size: u32,
    #[serde(skip_serializing_if = "is_default")]
    pub block_size: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

config_type!(EncryptionConfig {
    provider => "provider",
    keys => "keys",
    cipher => "cipher",
    key_size => "keySize",
    block_size => "blockSize",
    options => "options",
});

/// A key slot of an encrypted partition.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncryptionKey {
    #[serde(rename = "static", skip_serializing_if = "Option::is_none")]
    pub static_: Option<StaticKey>,
    #[serde(rename = "nodeID", skip_serializing_if = "Option::is_none")]
    pub node_id: Option<NodeIdKey>,
    pub slot: u32,
}

config_type!(EncryptionKey {
    static_ => "static",
    node_id => "nodeID",
    slot => "slot",
});

/// A key derived from a static passphrase.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticKey {
    pub passphrase: String,
}

config_type!(StaticKey { passphrase => "passphrase" });

/// A key derived from the node identity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeIdKey {}

config_type!(NodeIdKey {});

/// Feature flags.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeaturesConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rbac: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stable_hostname: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kube_prism: Option<KubePrism>,
    #[serde(rename = "kubernetesTalosAPIAccess", skip_serializing_if = "Option::is_none")]
    pub kubernetes_talos_api_access: Option<KubernetesTalosApiAccess>,
    #[serde(rename = "apidCheckExtKeyUsage", skip_serializing_if = "Option::is_none")]
    pub apid_check_ext_key_usage: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_quota_support: Option<bool>,
}

config_type!(FeaturesConfig {
    rbac => "rbac",
    stable_hostname => "stableHostname",
    kube_prism => "kubePrism",
    kubernetes_talos_api_access => "kubernetesTalosAPIAccess",
    apid_check_ext_key_usage => "apidCheckExtKeyUsage",
    disk_quota_support => "diskQuotaSupport",
});

/// Local load balancer in front of the API server endpoints.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KubePrism {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "is_default")]
    pub port: u16,
}

config_type!(KubePrism {
    enabled => "enabled",
    port => "port",
});

/// Access to the machine API from inside the cluster.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KubernetesTalosApiAccess {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_roles: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_kubernetes_namespaces: Vec<String>,
}

config_type!(KubernetesTalosApiAccess {
    enabled => "enabled",
    allowed_roles => "allowedRoles",
    allowed_kubernetes_namespaces => "allowedKubernetesNamespaces",
});

/// udev rules.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdevConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<String>,
}

config_type!(UdevConfig { rules => "rules" });

/// Log shipping.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub destinations: Vec<LoggingDestination>,
}

config_type!(LoggingConfig { destinations => "destinations" });

/// One log destination.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingDestination {
    pub endpoint: String,
    pub format: String,
}

config_type!(LoggingDestination {
    endpoint => "endpoint",
    format => "format",
});

/// Kernel modules.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub modules: Vec<KernelModule>,
}

config_type!(KernelConfig { modules => "modules" });

/// A kernel module to load.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelModule {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub parameters: Vec<String>,
}

config_type!(KernelModule {
    name => "name",
    parameters => "parameters",
});

/// Cluster section.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_plane: Option<ControlPlaneConfig>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub cluster_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<ClusterNetworkConfig>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub token: String,
    #[serde(rename = "aescbcEncryptionSecret", skip_serializing_if = "String::is_empty")]
    pub aescbc_encryption_secret: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub secretbox_encryption_secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca: Option<PemCertificateAndKey>,
    #[serde(rename = "aggregatorCA", skip_serializing_if = "Option::is_none")]
    pub aggregator_ca: Option<PemCertificateAndKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_account: Option<PemKey>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_server: Option<ApiServerConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub controller_manager: Option<ControllerManagerConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduler: Option<SchedulerConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub discovery: Option<ClusterDiscoveryConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etcd: Option<EtcdConfig>,
    #[serde(rename = "coreDNS", skip_serializing_if = "Option::is_none")]
    pub core_dns: Option<CoreDnsConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_cloud_provider: Option<ExternalCloudProviderConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_manifests: Vec<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_manifest_headers: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inline_manifests: Vec<InlineManifest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_kubeconfig: Option<AdminKubeconfigConfig>,
    #[serde(alias = "allowSchedulingOnMasters", skip_serializing_if = "Option::is_none")]
    pub allow_scheduling_on_control_planes: Option<bool>,
}

config_type!(ClusterConfig {
    id => "id",
    secret => "secret",
    control_plane => "controlPlane",
    cluster_name => "clusterName",
    network => "network",
    token => "token",
    aescbc_encryption_secret => "aescbcEncryptionSecret",
    secretbox_encryption_secret => "secretboxEncryptionSecret",
    ca => "ca",
    aggregator_ca => "aggregatorCA",
    service_account => "serviceAccount",
    api_server => "apiServer",
    controller_manager => "controllerManager",
    proxy => "proxy",
    scheduler => "scheduler",
    discovery => "discovery",
    etcd => "etcd",
    core_dns => "coreDNS",
    external_cloud_provider => "externalCloudProvider",
    extra_manifests => "extraManifests",
    extra_manifest_headers => "extraManifestHeaders",
    inline_manifests => "inlineManifests",
    admin_kubeconfig => "adminKubeconfig",
    allow_scheduling_on_control_planes => "allowSchedulingOnControlPlanes" | "allowSchedulingOnMasters",
});

/// Where the control plane is reached.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlPlaneConfig {
    pub endpoint: String,
    #[serde(rename = "localAPIServerPort", skip_serializing_if = "is_default")]
    pub local_api_server_port: u16,
}

config_type!(ControlPlaneConfig {
    endpoint => "endpoint",
    local_api_server_port => "localAPIServerPort",
});

/// Pod and service networking.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClusterNetworkConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cni: Option<CniConfig>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub dns_domain: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pod_subnets: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub service_subnets: Vec<String>,
}

config_type!(ClusterNetworkConfig {
    cni => "cni",
    dns_domain => "dnsDomain",
    pod_subnets => "podSubnets",
    service_subnets => "serviceSubnets",
});

/// CNI selection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CniConfig {
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub urls: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flannel: Option<FlannelCniConfig>,
}

config_type!(CniConfig {
    name => "name",
    urls => "urls",
    flannel => "flannel",
});

/// Flannel specific CNI settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlannelCniConfig {
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

config_type!(FlannelCniConfig { extra_args => "extraArgs" });

/// A host path mounted into a control plane pod.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VolumeMountConfig {
    pub host_path: String,
    pub mount_path: String,
    #[serde(skip_serializing_if = "is_default")]
    pub readonly: bool,
}

config_type!(VolumeMountConfig {
    host_path => "hostPath",
    mount_path => "mountPath",
    readonly => "readonly",
});

impl VolumeMountConfig {
    /// Volume name derived from the mount path: `/var/lib/x` becomes
    /// `var-lib-x`.
    pub fn name(&self) -> String {
        self.mount_path
            .trim_matches('/')
            .split('/')
            .collect::<Vec<_>>()
            .join("-")
    }
}

/// Container resources. Values are Kubernetes quantities.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesConfig {
    #[serde(skip_serializing_if = "Unstructured::is_empty")]
    pub requests: Unstructured,
    #[serde(skip_serializing_if = "Unstructured::is_empty")]
    pub limits: Unstructured,
}

config_type!(ResourcesConfig {
    requests => "requests",
    limits => "limits",
});

/// An admission plugin and its configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionPluginConfig {
    pub name: String,
    pub configuration: Unstructured,
}

config_type!(AdmissionPluginConfig {
    name => "name",
    configuration => "configuration",
});

/// An authorizer of the API server authorization chain.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfigAuthorizer {
    #[serde(rename = "type")]
    pub type_: String,
    pub name: String,
    #[serde(skip_serializing_if = "Unstructured::is_empty")]
    pub webhook: Unstructured,
}

config_type!(AuthorizationConfigAuthorizer {
    type_ => "type",
    name => "name",
    webhook => "webhook",
});

/// kube-apiserver settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiServerConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_args: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_volumes: Vec<VolumeMountConfig>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(rename = "certSANs", skip_serializing_if = "Vec::is_empty")]
    pub cert_sans: Vec<String>,
    #[serde(skip_serializing_if = "is_default")]
    pub disable_pod_security_policy: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub admission_control: Vec<AdmissionPluginConfig>,
    #[serde(skip_serializing_if = "Unstructured::is_empty")]
    pub audit_policy: Unstructured,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesConfig>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authorization_config: Vec<AuthorizationConfigAuthorizer>,
}

config_type!(ApiServerConfig {
    image => "image",
    extra_args => "extraArgs",
    extra_volumes => "extraVolumes",
    env => "env",
    cert_sans => "certSANs",
    disable_pod_security_policy => "disablePodSecurityPolicy",
    admission_control => "admissionControl",
    audit_policy => "auditPolicy",
    resources => "resources",
    authorization_config => "authorizationConfig",
});

/// kube-controller-manager settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControllerManagerConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_args: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_volumes: Vec<VolumeMountConfig>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesConfig>,
}

config_type!(ControllerManagerConfig {
    image => "image",
    extra_args => "extraArgs",
    extra_volumes => "extraVolumes",
    env => "env",
    resources => "resources",
});

/// kube-proxy settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProxyConfig {
    #[serde(skip_serializing_if = "is_default")]
    pub disabled: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub mode: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_args: BTreeMap<String, String>,
}

config_type!(ProxyConfig {
    disabled => "disabled",
    image => "image",
    mode => "mode",
    extra_args => "extraArgs",
});

/// kube-scheduler settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SchedulerConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_args: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub extra_volumes: Vec<VolumeMountConfig>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesConfig>,
    #[serde(skip_serializing_if = "Unstructured::is_empty")]
    pub config: Unstructured,
}

config_type!(SchedulerConfig {
    image => "image",
    extra_args => "extraArgs",
    extra_volumes => "extraVolumes",
    env => "env",
    resources => "resources",
    config => "config",
});

/// Cluster member discovery.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterDiscoveryConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registries: Option<DiscoveryRegistriesConfig>,
}

config_type!(ClusterDiscoveryConfig {
    enabled => "enabled",
    registries => "registries",
});

/// Discovery backends.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryRegistriesConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubernetes: Option<DiscoveryBackend>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<DiscoveryBackend>,
}

config_type!(DiscoveryRegistriesConfig {
    kubernetes => "kubernetes",
    service => "service",
});

/// A discovery backend.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryBackend {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub endpoint: String,
}

config_type!(DiscoveryBackend {
    disabled => "disabled",
    endpoint => "endpoint",
});

/// etcd settings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EtcdConfig {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ca: Option<PemCertificateAndKey>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extra_args: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub advertised_subnets: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub listen_subnets: Vec<String>,
}

config_type!(EtcdConfig {
    image => "image",
    ca => "ca",
    extra_args => "extraArgs",
    advertised_subnets => "advertisedSubnets",
    listen_subnets => "listenSubnets",
});

/// CoreDNS deployment.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreDnsConfig {
    #[serde(skip_serializing_if = "is_default")]
    pub disabled: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub image: String,
}

config_type!(CoreDnsConfig {
    disabled => "disabled",
    image => "image",
});

/// External cloud provider.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExternalCloudProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub manifests: Vec<String>,
}

config_type!(ExternalCloudProviderConfig {
    enabled => "enabled",
    manifests => "manifests",
});

/// A manifest carried inline in the config.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InlineManifest {
    pub name: String,
    pub contents: String,
}

config_type!(InlineManifest {
    name => "name",
    contents => "contents",
});

/// Admin kubeconfig generation.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AdminKubeconfigConfig {
    #[serde(skip_serializing_if = "Duration::is_zero")]
    pub cert_lifetime: Duration,
}

config_type!(AdminKubeconfigConfig { cert_lifetime => "certLifetime" });
