//! Structural and semantic checks of the `v1alpha1` document.

use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;

use lazy_static::lazy_static;
use regex::Regex;

use super::*;
use crate::config::units::parse_bytes;
use crate::config::validation::{BlockDevice, RuntimeMode, ValidationError, ValidationOptions, Warnings};
use crate::constants;
use crate::net::{parse_ip_or_cidr, Cidr};

lazy_static! {
    static ref DNS_NAME: Regex =
        Regex::new(r"^([a-zA-Z0-9_][a-zA-Z0-9_-]{0,62})(\.[a-zA-Z0-9_][a-zA-Z0-9_-]{0,62})*[._]?$")
            .expect("static regex");
    static ref SIZE_MATCHER: Regex =
        Regex::new(r"^\s*(>=|<=|>|<|==)?\s*([0-9.]+\s*[a-zA-Z]*)\s*$").expect("static regex");
}

const BOND_MODES: &[&str] = &[
    "balance-rr",
    "active-backup",
    "balance-xor",
    "broadcast",
    "802.3ad",
    "balance-tlb",
    "balance-alb",
];

const XMIT_HASH_POLICIES: &[&str] = &["layer2", "layer3+4", "layer2+3", "encap2+3", "encap3+4"];

impl Config {
    /// Validates the document for `mode`.
    ///
    /// Returns the warnings on success. Every error found is reported in a
    /// single [`ValidationError`]; strict mode turns warnings into errors.
    pub fn validate(&self, mode: RuntimeMode, opts: &ValidationOptions) -> Result<Warnings, ValidationError> {
        let mut result = ValidationError::new();

        let machine = match &self.machine {
            Some(machine) => machine,
            None => {
                result.push("machine instructions are required");
                return result.finish(opts.strict);
            }
        };

        match &self.cluster {
            Some(cluster) => validate_cluster(cluster, &mut result),
            None => result.push("cluster instructions are required"),
        }

        if mode.requires_install() {
            validate_install(machine, mode, opts, &mut result);
        }

        let machine_type = match machine.type_.parse::<MachineType>() {
            Ok(MachineType::Unknown) => {
                result.warn("use \"worker\" instead of \"\" for machine type");
                MachineType::Unknown
            }
            Ok(t) => t,
            Err(e) => {
                result.push(e);
                MachineType::Unknown
            }
        };

        let cluster = self.cluster();
        if machine_type.is_control_plane() {
            validate_cni(&cluster, &mut result);
            validate_authorizers(&cluster.api_server(), &mut result);
        }

        let devices = machine.devices();
        if machine_type.is_worker() {
            for device in &devices {
                if device.vip.is_some() || device.vlans.iter().any(|v| v.vip.is_some()) {
                    result.push(format!(
                        "virtual (shared) IP is not allowed on non-controlplane nodes: {:?}",
                        device.interface
                    ));
                }
            }
        }

        validate_devices(&devices, &mut result);
        validate_disks(&machine.disks, &mut result);
        if let Some(encryption) = &machine.system_disk_encryption {
            validate_encryption("STATE", encryption.state.as_ref(), &mut result);
            validate_encryption("EPHEMERAL", encryption.ephemeral.as_ref(), &mut result);
        }
        validate_kubelet(&machine.kubelet(), &mut result);

        result.finish(opts.strict)
    }
}

fn validate_cluster(cluster: &ClusterConfig, result: &mut ValidationError) {
    let endpoint = cluster.endpoint();
    if endpoint.is_empty() {
        result.push("cluster controlplane endpoint is required");
    } else if let Err(e) = validate_endpoint_uri(&endpoint) {
        result.push(format!("invalid controlplane endpoint: {}", e));
    }

    if let Some(network) = &cluster.network {
        if !network.dns_domain.is_empty() && !is_dns_name(&network.dns_domain) {
            result.push(format!("{:?} is not a valid DNS name", network.dns_domain));
        }
        for subnet in network.pod_subnets.iter().chain(&network.service_subnets) {
            if subnet.parse::<Cidr>().is_err() {
                result.push(format!("{:?} is not a valid subnet", subnet));
            }
        }
    }

    if !cluster.external_cloud_provider_enabled() && !cluster.external_cloud_provider_manifests().is_empty() {
        result.push("external cloud provider is disabled, but manifests are provided");
    }
    for manifest in cluster.external_cloud_provider_manifests() {
        match url::Url::parse(&manifest) {
            Ok(u) if u.scheme() == "https" => {}
            _ => result.push(format!(
                "invalid external cloud provider manifest url {:?}: must be a valid https URL",
                manifest
            )),
        }
    }

    for manifest in &cluster.extra_manifests {
        match url::Url::parse(manifest) {
            Ok(u) if u.scheme() == "https" || u.scheme() == "http" => {}
            _ => result.push(format!("invalid extra manifest url {:?}", manifest)),
        }
    }

    let mut names = HashSet::new();
    for manifest in &cluster.inline_manifests {
        if manifest.name.is_empty() {
            result.push("inline manifest name can't be empty");
        } else if !names.insert(manifest.name.as_str()) {
            result.push(format!("inline manifest name {:?} is duplicate", manifest.name));
        }
    }
}

/// Checks that an endpoint is an https URL with a host.
pub fn validate_endpoint_uri(endpoint: &str) -> Result<url::Url, String> {
    let parsed = url::Url::parse(endpoint).map_err(|e| format!("{}: {}", endpoint, e))?;
    if parsed.scheme() != "https" {
        return Err(format!("{}: endpoint scheme must be https", endpoint));
    }
    match parsed.host_str() {
        Some(host) if !host.is_empty() => Ok(parsed),
        _ => Err(format!("{}: endpoint must have a host", endpoint)),
    }
}

/// True if `name` is a valid DNS name.
pub fn is_dns_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 255 || name.parse::<IpAddr>().is_ok() {
        return false;
    }
    DNS_NAME.is_match(name)
}

fn validate_install(machine: &MachineConfig, mode: RuntimeMode, opts: &ValidationOptions, result: &mut ValidationError) {
    let install = match &machine.install {
        Some(install) => install,
        None => {
            result.push(format!("install instructions are required in {:?} mode", mode.to_string()));
            return;
        }
    };

    match (&install.disk_selector, install.disk.is_empty()) {
        (None, true) => result.push("either install disk or diskSelector should be defined"),
        (Some(_), false) => result.push("install disk and diskSelector can't be used at the same time"),
        (Some(selector), true) => {
            if let Err(e) = parse_size_matcher(&selector.size) {
                result.push(e);
                return;
            }
            if opts.local {
                return;
            }
            if let Some(disks) = &opts.disks {
                if !disks.iter().any(|d| selector_matches(selector, d)) {
                    result.push("no disks matching the install disk selector");
                }
            }
        }
        (None, false) => {
            if opts.local {
                return;
            }
            if let Some(disks) = &opts.disks {
                if !disks.iter().any(|d| d.path == install.disk) {
                    result.push(format!("specified install disk does not exist: {:?}", install.disk));
                }
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum SizeOp {
    Eq,
    Ge,
    Le,
    Gt,
    Lt,
}

fn parse_size_matcher(matcher: &str) -> Result<Option<(SizeOp, u64)>, String> {
    if matcher.trim().is_empty() {
        return Ok(None);
    }
    let caps = SIZE_MATCHER
        .captures(matcher)
        .ok_or_else(|| format!("invalid disk size matcher {:?}", matcher))?;
    let op = match caps.get(1).map(|m| m.as_str()) {
        Some(">=") => SizeOp::Ge,
        Some("<=") => SizeOp::Le,
        Some(">") => SizeOp::Gt,
        Some("<") => SizeOp::Lt,
        _ => SizeOp::Eq,
    };
    let size = parse_bytes(&caps[2]).map_err(|e| format!("invalid disk size matcher {:?}: {}", matcher, e))?;
    Ok(Some((op, size)))
}

fn glob_matches(pattern: &str, value: &str) -> bool {
    if pattern.is_empty() {
        return true;
    }
    let expr = format!("^{}$", regex::escape(pattern).replace(r"\*", ".*").replace(r"\?", "."));
    Regex::new(&expr).map(|re| re.is_match(value)).unwrap_or(false)
}

/// True if `disk` satisfies every field set in the selector.
pub fn selector_matches(selector: &InstallDiskSelector, disk: &BlockDevice) -> bool {
    let size_ok = match parse_size_matcher(&selector.size) {
        Ok(None) => true,
        Ok(Some((op, size))) => match op {
            SizeOp::Eq => disk.size == size,
            SizeOp::Ge => disk.size >= size,
            SizeOp::Le => disk.size <= size,
            SizeOp::Gt => disk.size > size,
            SizeOp::Lt => disk.size < size,
        },
        Err(_) => false,
    };
    size_ok
        && glob_matches(&selector.name, &disk.path)
        && glob_matches(&selector.model, &disk.model)
        && glob_matches(&selector.serial, &disk.serial)
        && glob_matches(&selector.modalias, &disk.modalias)
        && glob_matches(&selector.uuid, &disk.uuid)
        && glob_matches(&selector.wwid, &disk.wwid)
        && glob_matches(&selector.type_, &disk.kind)
        && glob_matches(&selector.bus_path, &disk.bus_path)
}

fn validate_cni(cluster: &ClusterConfig, result: &mut ValidationError) {
    let cni = cluster.cni();
    match cni.name.as_str() {
        constants::CUSTOM_CNI => {
            if cni.urls.is_empty() {
                result.push("at least one url should be specified if using \"custom\" option for CNI");
            }
        }
        constants::FLANNEL_CNI | constants::NO_CNI => {
            if !cni.urls.is_empty() {
                result.push("\"urls\" field should only be included when \"custom\" option is set for CNI");
            }
        }
        _ => result.push(format!(
            "cni name should be one of [{:?}, {:?}, {:?}]",
            constants::FLANNEL_CNI,
            constants::CUSTOM_CNI,
            constants::NO_CNI
        )),
    }
    if cni.name != constants::FLANNEL_CNI && cni.flannel.is_some() {
        result.push("flannel configuration can't be set when the CNI is not flannel");
    }
}

/// Checks the API server authorizer chain.
pub fn validate_authorizers(api_server: &ApiServerConfig, result: &mut ValidationError) {
    for authorizer in &api_server.authorization_config {
        if authorizer.name.is_empty() {
            result.push("authorizer name can't be empty");
        }
        match authorizer.type_.as_str() {
            "Node" | "RBAC" => {}
            "Webhook" => {
                if authorizer.webhook.as_mapping().is_none() {
                    result.push(format!(
                        "authorizer {:?} of type Webhook requires a webhook configuration",
                        authorizer.name
                    ));
                }
            }
            other => result.push(format!("unknown authorizer type {:?}", other)),
        }
    }
}

fn validate_devices(devices: &[Device], result: &mut ValidationError) {
    let mut bonded: BTreeMap<&str, &str> = BTreeMap::new();
    for device in devices {
        if let Some(bond) = &device.bond {
            for slave in &bond.interfaces {
                match bonded.get(slave.as_str()) {
                    Some(master) if *master != device.interface.as_str() => result.push(format!(
                        "interface {:?} is declared as part of two bonds: {:?} and {:?}",
                        slave, master, device.interface
                    )),
                    _ => {
                        bonded.insert(slave.as_str(), device.interface.as_str());
                    }
                }
            }
        }
    }

    for device in devices {
        if device.ignore {
            continue;
        }
        let name = device.interface.as_str();

        if device.interface.is_empty() && device.device_selector.is_none() {
            result.push(
                "[networking.os.device.interface], [networking.os.device.deviceSelector]: required either config section to be set",
            );
        }

        if bonded.contains_key(name)
            && (!device.addresses.is_empty() || !device.cidr.is_empty() || device.dhcp || device.vip.is_some())
        {
            result.push(format!(
                "[networking.os.device] {:?}: bonded interface shouldn't have any addressing methods configured",
                name
            ));
        }

        if !device.cidr.is_empty() {
            if !device.addresses.is_empty() {
                result.push(format!(
                    "[networking.os.device] {:?}: interface.cidr can't be used together with interface.addresses",
                    name
                ));
            }
            result.warn(format!(
                "{:?}: machine.network.interface.cidr is deprecated, please use machine.network.interface.addresses",
                name
            ));
        }

        for address in device.all_addresses() {
            if parse_ip_or_cidr(&address).is_none() {
                result.push(format!(
                    "[networking.os.device.addresses] {:?}: invalid network address: {:?}",
                    name, address
                ));
            }
        }

        validate_routes(name, &device.routes, result);

        if let Some(bond) = &device.bond {
            validate_bond(name, bond, result);
        }

        for vlan in &device.vlans {
            if !vlan.cidr.is_empty() && !vlan.addresses.is_empty() {
                result.push(format!(
                    "[networking.os.device.vlan] {:?}.{}: vlan.cidr can't be used together with vlan.addresses",
                    name, vlan.vlan_id
                ));
            }
            for address in vlan.addresses.iter().chain(std::iter::once(&vlan.cidr)) {
                if !address.is_empty() && parse_ip_or_cidr(address).is_none() {
                    result.push(format!(
                        "[networking.os.device.vlan.addresses] {:?}.{}: invalid network address: {:?}",
                        name, vlan.vlan_id, address
                    ));
                }
            }
            validate_routes(name, &vlan.routes, result);
        }

        if let Some(wireguard) = &device.wireguard {
            validate_wireguard(name, wireguard, result);
        }

        if let Some(vip) = &device.vip {
            if vip.ip.parse::<IpAddr>().is_err() {
                result.push(format!("[networking.os.device.vip] {:?}: invalid IP address {:?}", name, vip.ip));
            }
        }
    }
}

fn validate_routes(name: &str, routes: &[Route], result: &mut ValidationError) {
    for route in routes {
        if route.network.is_empty() && route.gateway.is_empty() {
            result.push(format!(
                "[networking.os.device.route] {:?}: either network or gateway should be set",
                name
            ));
        }
        if !route.network.is_empty() && route.network.parse::<Cidr>().is_err() {
            result.push(format!(
                "[networking.os.device.route] {:?}: invalid network address: {:?}",
                name, route.network
            ));
        }
        if !route.gateway.is_empty() && route.gateway.parse::<IpAddr>().is_err() {
            result.push(format!(
                "[networking.os.device.route] {:?}: invalid gateway: {:?}",
                name, route.gateway
            ));
        }
        if !route.source.is_empty() && route.source.parse::<IpAddr>().is_err() {
            result.push(format!(
                "[networking.os.device.route] {:?}: invalid source address: {:?}",
                name, route.source
            ));
        }
    }
}

fn validate_bond(name: &str, bond: &Bond, result: &mut ValidationError) {
    let mut fail = |message: String| result.push(format!("[networking.os.device.bond] {:?}: {}", name, message));

    if !bond.interfaces.is_empty() && !bond.device_selectors.is_empty() {
        fail("interfaces and deviceSelectors can't be used at the same time".to_string());
    }

    let mode = bond.mode.as_str();
    if !mode.is_empty() && !BOND_MODES.contains(&mode) {
        fail(format!("invalid bond mode {:?}", mode));
    }

    let only_in = |field: &str, set: bool, modes: &[&str], fail: &mut dyn FnMut(String)| {
        if set && !modes.contains(&mode) {
            fail(format!("bond.{} is only available in {} mode", field, modes.join("/")));
        }
    };

    only_in("lacpRate", !bond.lacp_rate.is_empty(), &["802.3ad"], &mut fail);
    only_in("adActorSystem", !bond.ad_actor_system.is_empty(), &["802.3ad"], &mut fail);
    only_in("adSelect", !bond.ad_select.is_empty(), &["802.3ad"], &mut fail);
    only_in("adActorSysPrio", bond.ad_actor_sys_prio != 0, &["802.3ad"], &mut fail);
    only_in("adUserPortKey", bond.ad_user_port_key != 0, &["802.3ad"], &mut fail);
    only_in(
        "primary",
        !bond.primary.is_empty(),
        &["active-backup", "balance-tlb", "balance-alb"],
        &mut fail,
    );
    only_in(
        "primaryReselect",
        !bond.primary_reselect.is_empty(),
        &["active-backup", "balance-tlb", "balance-alb"],
        &mut fail,
    );
    only_in("packetsPerSlave", bond.packets_per_slave != 0, &["balance-rr"], &mut fail);
    only_in("tlbDynamicLb", bond.tlb_dynamic_lb != 0, &["balance-tlb"], &mut fail);
    only_in(
        "xmitHashPolicy",
        !bond.xmit_hash_policy.is_empty(),
        &["balance-xor", "802.3ad", "balance-tlb"],
        &mut fail,
    );

    if !bond.xmit_hash_policy.is_empty() && !XMIT_HASH_POLICIES.contains(&bond.xmit_hash_policy.as_str()) {
        fail(format!("invalid xmitHashPolicy {:?}", bond.xmit_hash_policy));
    }
    if !bond.lacp_rate.is_empty() && bond.lacp_rate != "slow" && bond.lacp_rate != "fast" {
        fail(format!("invalid lacpRate {:?}", bond.lacp_rate));
    }
    if !bond.arp_ip_target.is_empty() && bond.arp_interval == 0 {
        fail("bond.arpIPTarget requires bond.arpInterval".to_string());
    }
    for target in &bond.arp_ip_target {
        if target.parse::<IpAddr>().is_err() {
            fail(format!("invalid arpIPTarget {:?}", target));
        }
    }

    for (field, value) in &[("updelay", bond.updelay), ("downdelay", bond.downdelay)] {
        if *value == 0 {
            continue;
        }
        if bond.miimon == 0 {
            fail(format!("bond.{} requires bond.miimon", field));
        } else if value % bond.miimon != 0 {
            fail(format!("bond.{} should be a multiple of bond.miimon", field));
        }
    }
}

fn is_wireguard_key(key: &str) -> bool {
    base64::decode(key).map(|k| k.len() == 32).unwrap_or(false)
}

fn is_host_port(endpoint: &str) -> bool {
    let (host, port) = match endpoint.rsplit_once(':') {
        Some(parts) => parts,
        None => return false,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    !host.is_empty() && port.parse::<u16>().is_ok()
}

fn validate_wireguard(name: &str, wireguard: &Wireguard, result: &mut ValidationError) {
    if !is_wireguard_key(&wireguard.private_key) {
        result.push(format!(
            "[networking.os.device.wireguard] {:?}: private key is not a valid base64 encoded 32 byte key",
            name
        ));
    }
    for peer in &wireguard.peers {
        if !is_wireguard_key(&peer.public_key) {
            result.push(format!(
                "[networking.os.device.wireguard] {:?}: peer public key {:?} is not a valid base64 encoded 32 byte key",
                name, peer.public_key
            ));
        }
        if !peer.endpoint.is_empty() && !is_host_port(&peer.endpoint) {
            result.push(format!(
                "[networking.os.device.wireguard] {:?}: peer endpoint {:?} is not a valid UDP address",
                name, peer.endpoint
            ));
        }
        for allowed in &peer.allowed_ips {
            if allowed.parse::<Cidr>().is_err() {
                result.push(format!(
                    "[networking.os.device.wireguard] {:?}: peer allowed IP {:?} is not a valid CIDR",
                    name, allowed
                ));
            }
        }
    }
}

fn validate_disks(disks: &[MachineDisk], result: &mut ValidationError) {
    for disk in disks {
        let last = disk.partitions.len().saturating_sub(1);
        for (i, partition) in disk.partitions.iter().enumerate() {
            if partition.size.0 == 0 && i != last {
                result.push(format!(
                    "partition for disk {:?} is set to occupy full disk, but it's not the last partition in the list",
                    disk.device
                ));
            }
        }
    }
}

fn validate_encryption(label: &str, encryption: Option<&EncryptionConfig>, result: &mut ValidationError) {
    let encryption = match encryption {
        Some(e) => e,
        None => return,
    };
    if encryption.provider != "luks2" {
        result.push(format!(
            "{} partition encryption provider {:?} is not supported",
            label, encryption.provider
        ));
    }
    if encryption.keys.is_empty() {
        result.push(format!("{} partition encryption has no keys", label));
    }
    let mut slots = HashSet::new();
    for key in &encryption.keys {
        if !slots.insert(key.slot) {
            result.push(format!("{} partition encryption key slot {} is already used", label, key.slot));
        }
        if key.static_.is_none() && key.node_id.is_none() {
            result.push(format!(
                "{} partition encryption key at slot {} should have either static or nodeID key",
                label, key.slot
            ));
        }
    }
}

fn validate_kubelet(kubelet: &KubeletConfig, result: &mut ValidationError) {
    for key in kubelet.extra_config.keys() {
        if constants::KUBELET_LOCKED_FIELDS.contains(&key.as_str()) {
            result.push(format!("kubelet configuration field {:?} can't be overridden", key));
        }
    }
    for subnet in kubelet.node_ip_valid_subnets() {
        let subnet = subnet.trim_start_matches('!');
        if parse_ip_or_cidr(subnet).is_none() {
            result.push(format!("kubelet nodeIP subnet is not valid: {:?}", subnet));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    fn base(machine_type: &str) -> Config {
        Config {
            version: VERSION.into(),
            machine: Some(MachineConfig {
                type_: machine_type.into(),
                install: Some(InstallConfig {
                    disk: "/dev/sda".into(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            cluster: Some(ClusterConfig {
                control_plane: Some(ControlPlaneConfig {
                    endpoint: "https://10.0.0.1:6443".into(),
                    local_api_server_port: 0,
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn errors(config: &Config) -> Vec<String> {
        match config.validate(RuntimeMode::Metal, &ValidationOptions::default()) {
            Ok(_) => Vec::new(),
            Err(e) => e.errors,
        }
    }

    fn machine(config: &mut Config) -> &mut MachineConfig {
        config.machine.as_mut().unwrap()
    }

    #[test]
    fn minimal_config_is_valid() {
        assert!(errors(&base("controlplane")).is_empty());
    }

    #[test]
    fn missing_sections_are_reported() {
        let err = Config::default()
            .validate(RuntimeMode::Cloud, &ValidationOptions::default())
            .unwrap_err();
        assert_eq!(vec!["machine instructions are required".to_string()], err.errors);

        let mut config = base("worker");
        config.cluster = None;
        machine(&mut config).install = None;
        let errs = errors(&config);
        assert!(errs.contains(&"cluster instructions are required".to_string()));
        assert!(errs.contains(&"install instructions are required in \"metal\" mode".to_string()));
    }

    #[test]
    fn empty_machine_type_warns_and_strict_rejects() {
        let config = base("");
        let warnings = config
            .validate(RuntimeMode::Metal, &ValidationOptions::default())
            .unwrap();
        assert_eq!(vec!["use \"worker\" instead of \"\" for machine type".to_string()], warnings);
        assert!(config.validate(RuntimeMode::Metal, &ValidationOptions::strict()).is_err());
    }

    #[test]
    fn unknown_machine_type_is_fatal() {
        assert_eq!(vec!["unknown machine type \"master\"".to_string()], errors(&base("master")));
    }

    #[rstest]
    #[case("http://10.0.0.1:6443")]
    #[case("not a url")]
    fn bad_endpoints(#[case] endpoint: &str) {
        let mut config = base("worker");
        config.cluster.as_mut().unwrap().control_plane.as_mut().unwrap().endpoint = endpoint.into();
        let errs = errors(&config);
        assert_eq!(1, errs.len());
        assert!(errs[0].starts_with("invalid controlplane endpoint"));
    }

    #[rstest]
    #[case("custom", vec![], true)]
    #[case("custom", vec!["https://example.com/cni.yaml"], false)]
    #[case("flannel", vec!["https://example.com/cni.yaml"], true)]
    #[case("none", vec![], false)]
    #[case("calico", vec![], true)]
    fn cni_rules(#[case] name: &str, #[case] urls: Vec<&str>, #[case] fails: bool) {
        let mut config = base("controlplane");
        config.cluster.as_mut().unwrap().network = Some(ClusterNetworkConfig {
            cni: Some(CniConfig {
                name: name.into(),
                urls: urls.into_iter().map(String::from).collect(),
                flannel: None,
            }),
            ..Default::default()
        });
        assert_eq!(fails, !errors(&config).is_empty());
    }

    #[test]
    fn workers_cannot_hold_vips() {
        let mut config = base("worker");
        machine(&mut config).network = Some(NetworkConfig {
            interfaces: vec![Device {
                interface: "eth0".into(),
                dhcp: true,
                vip: Some(Vip {
                    ip: "10.0.0.5".into(),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        });
        assert_eq!(1, errors(&config).len());
    }

    #[test]
    fn device_addressing_rules() {
        let mut config = base("controlplane");
        machine(&mut config).network = Some(NetworkConfig {
            interfaces: vec![
                Device {
                    interface: "bond0".into(),
                    bond: Some(Bond {
                        interfaces: vec!["eth0".into(), "eth1".into()],
                        mode: "active-backup".into(),
                        lacp_rate: "fast".into(),
                        updelay: 150,
                        miimon: 100,
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                Device {
                    interface: "bond1".into(),
                    bond: Some(Bond {
                        interfaces: vec!["eth1".into()],
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                Device {
                    interface: "eth0".into(),
                    dhcp: true,
                    ..Default::default()
                },
                Device {
                    interface: "eth2".into(),
                    cidr: "10.0.0.2/24".into(),
                    addresses: vec!["10.0.0.3/24".into(), "bogus".into()],
                    ..Default::default()
                },
            ],
            ..Default::default()
        });
        let err = config
            .validate(RuntimeMode::Metal, &ValidationOptions::default())
            .unwrap_err();
        let joined = err.errors.join("\n");
        assert!(joined.contains("is declared as part of two bonds"));
        assert!(joined.contains("bonded interface shouldn't have any addressing methods configured"));
        assert!(joined.contains("bond.lacpRate is only available in 802.3ad mode"));
        assert!(joined.contains("bond.updelay should be a multiple of bond.miimon"));
        assert!(joined.contains("interface.cidr can't be used together with interface.addresses"));
        assert!(joined.contains("invalid network address: \"bogus\""));
        assert_eq!(1, err.warnings.len());
    }

    #[test]
    fn wireguard_keys_are_checked() {
        let key = base64::encode([7u8; 32]);
        let mut config = base("controlplane");
        machine(&mut config).network = Some(NetworkConfig {
            interfaces: vec![Device {
                interface: "wg0".into(),
                wireguard: Some(Wireguard {
                    private_key: key.clone(),
                    peers: vec![
                        WireguardPeer {
                            public_key: key,
                            endpoint: "192.168.1.1:51820".into(),
                            allowed_ips: vec!["10.1.0.0/16".into()],
                            ..Default::default()
                        },
                        WireguardPeer {
                            public_key: "short".into(),
                            endpoint: "nowhere".into(),
                            allowed_ips: vec!["10.1.0.0".into()],
                            ..Default::default()
                        },
                    ],
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        });
        assert_eq!(3, errors(&config).len());
    }

    #[test]
    fn only_the_last_partition_may_fill_the_disk() {
        let mut config = base("worker");
        machine(&mut config).disks = vec![MachineDisk {
            device: "/dev/sdb".into(),
            partitions: vec![
                DiskPartition {
                    size: Default::default(),
                    mountpoint: "/var/a".into(),
                },
                DiskPartition {
                    size: Default::default(),
                    mountpoint: "/var/b".into(),
                },
            ],
        }];
        assert_eq!(1, errors(&config).len());
    }

    #[test]
    fn encryption_slots_are_unique() {
        let mut config = base("worker");
        machine(&mut config).system_disk_encryption = Some(SystemDiskEncryptionConfig {
            state: Some(EncryptionConfig {
                provider: "luks2".into(),
                keys: vec![
                    EncryptionKey {
                        node_id: Some(NodeIdKey {}),
                        slot: 0,
                        ..Default::default()
                    },
                    EncryptionKey {
                        slot: 0,
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }),
            ephemeral: None,
        });
        assert_eq!(2, errors(&config).len());
    }

    #[test]
    fn inline_manifests_need_unique_names() {
        let mut config = base("worker");
        config.cluster.as_mut().unwrap().inline_manifests = vec![
            InlineManifest {
                name: "a".into(),
                contents: String::new(),
            },
            InlineManifest {
                name: "a".into(),
                contents: String::new(),
            },
            InlineManifest::default(),
        ];
        assert_eq!(2, errors(&config).len());
    }

    #[test]
    fn locked_kubelet_fields() {
        let mut config = base("worker");
        machine(&mut config).kubelet = Some(KubeletConfig {
            extra_config: Unstructured(serde_yaml::from_str("staticPodPath: /tmp\nmaxPods: 10\n").unwrap()),
            ..Default::default()
        });
        assert_eq!(
            vec!["kubelet configuration field \"staticPodPath\" can't be overridden".to_string()],
            errors(&config)
        );
    }

    #[test]
    fn disk_selector_matches_present_disks() {
        let mut config = base("worker");
        machine(&mut config).install = Some(InstallConfig {
            disk_selector: Some(InstallDiskSelector {
                size: ">= 100GB".into(),
                model: "Samsung*".into(),
                ..Default::default()
            }),
            ..Default::default()
        });
        let small = BlockDevice {
            path: "/dev/sda".into(),
            size: 64_000_000_000,
            model: "Samsung SSD".into(),
            ..Default::default()
        };
        let large = BlockDevice {
            size: 512_000_000_000,
            path: "/dev/sdb".into(),
            ..small.clone()
        };

        let mut opts = ValidationOptions {
            disks: Some(vec![small.clone()]),
            ..Default::default()
        };
        assert!(config.validate(RuntimeMode::Metal, &opts).is_err());

        opts.disks = Some(vec![small, large]);
        assert!(config.validate(RuntimeMode::Metal, &opts).is_ok());
    }

    #[rstest]
    #[case("cluster.local", true)]
    #[case("example.com.", true)]
    #[case("-bad", false)]
    #[case("10.0.0.1", false)]
    #[case("", false)]
    fn dns_names(#[case] name: &str, #[case] valid: bool) {
        assert_eq!(valid, is_dns_name(name));
    }
}
