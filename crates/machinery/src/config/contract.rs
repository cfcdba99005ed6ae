//! Version contracts: the release whose feature surface a configuration
//! targets.
//!
//! Features are gated on the contract being strictly newer than the release
//! that introduced them, so configs generated for an older release keep
//! their behavior after an upgrade. A missing contract means "latest" and
//! enables everything.

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref VERSION_RE: Regex = Regex::new(r"^v?(\d+)\.(\d+)($|[.-])").expect("static regex");
}

/// A `(major, minor)` release.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Contract {
    /// Major version.
    pub major: u32,
    /// Minor version.
    pub minor: u32,
}

/// The string is not a `vMAJOR.MINOR[.x]` version.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("error parsing version {0:?}")]
pub struct ParseError(pub String);

impl Contract {
    /// A contract for `major.minor`.
    pub const fn new(major: u32, minor: u32) -> Self {
        Contract { major, minor }
    }

    /// The contract of this release.
    pub const fn current() -> Self {
        Contract::new(1, 12)
    }

    /// Parses `v1.5`, `1.5.3` or `v1.6.0-alpha.1`.
    pub fn parse(version: &str) -> Result<Self, ParseError> {
        let caps = VERSION_RE
            .captures(version)
            .ok_or_else(|| ParseError(version.to_string()))?;
        let major = caps[1].parse().map_err(|_| ParseError(version.to_string()))?;
        let minor = caps[2].parse().map_err(|_| ParseError(version.to_string()))?;
        Ok(Contract { major, minor })
    }
}

impl FromStr for Contract {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Contract::parse(s)
    }
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}", self.major, self.minor)
    }
}

/// Feature predicates of a contract.
///
/// Implemented for [`Contract`] and for `Option<Contract>`, where `None`
/// answers `true` to everything.
pub trait Features {
    /// True if the contract is strictly newer than `major.minor`.
    fn greater_than(&self, major: u32, minor: u32) -> bool;

    /// ECDSA keys for generated certificates.
    fn supports_ecdsa_keys(&self) -> bool {
        self.greater_than(0, 8)
    }

    /// Cluster discovery on by default.
    fn cluster_discovery_enabled(&self) -> bool {
        self.greater_than(0, 13)
    }

    /// Pod security admission instead of pod security policies.
    fn pod_security_admission_enabled(&self) -> bool {
        self.greater_than(1, 0)
    }

    /// Stable default hostname.
    fn stable_hostname_enabled(&self) -> bool {
        self.greater_than(1, 1)
    }

    /// Kubelet runtime default seccomp profile.
    fn kubelet_default_runtime_seccomp_profile_enabled(&self) -> bool {
        self.greater_than(1, 1)
    }

    /// Control planes allow workloads by the new field name.
    fn kubernetes_allow_scheduling_on_control_planes(&self) -> bool {
        self.greater_than(1, 1)
    }

    /// The Kubernetes discovery registry off by default.
    fn kubernetes_discovery_backend_disabled(&self) -> bool {
        self.greater_than(1, 1)
    }

    /// apid checks the extended key usage of client certificates.
    fn apid_ext_key_usage_check_enabled(&self) -> bool {
        self.greater_than(1, 2)
    }

    /// API server audit policy.
    fn api_server_audit_policy_supported(&self) -> bool {
        self.greater_than(1, 2)
    }

    /// Kubelet static manifests directory off by default.
    fn kubelet_manifests_directory_disabled(&self) -> bool {
        self.greater_than(1, 2)
    }

    /// Secretbox encryption of secrets at rest.
    fn secretbox_encryption_supported(&self) -> bool {
        self.greater_than(1, 2)
    }

    /// Project quota support on the ephemeral partition.
    fn disk_quota_support_enabled(&self) -> bool {
        self.greater_than(1, 4)
    }

    /// KubePrism on by default.
    fn kube_prism_enabled(&self) -> bool {
        self.greater_than(1, 5)
    }

    /// Host DNS caching resolver.
    fn host_dns_enabled(&self) -> bool {
        self.greater_than(1, 6)
    }

    /// RSA keys for the service account.
    fn use_rsa_service_account_key(&self) -> bool {
        self.greater_than(1, 6)
    }

    /// Cluster name exposed to workers.
    fn cluster_name_for_workers_enabled(&self) -> bool {
        self.greater_than(1, 7)
    }

    /// Host DNS forwards kube-dns to the host.
    fn host_dns_forward_kube_dns_to_host(&self) -> bool {
        self.greater_than(1, 7)
    }

    /// Control plane nodes excluded from external load balancers.
    fn add_exclude_from_external_load_balancer(&self) -> bool {
        self.greater_than(1, 7)
    }

    /// Secure boot enrollment enforced.
    fn secure_boot_enroll_enforcement_supported(&self) -> bool {
        self.greater_than(1, 7)
    }
}

impl Features for Contract {
    fn greater_than(&self, major: u32, minor: u32) -> bool {
        *self > Contract::new(major, minor)
    }
}

impl Features for Option<Contract> {
    fn greater_than(&self, major: u32, minor: u32) -> bool {
        match self {
            Some(contract) => contract.greater_than(major, minor),
            None => true,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case("v1.5", Contract::new(1, 5))]
    #[case("1.5.3", Contract::new(1, 5))]
    #[case("v0.13.0-alpha.1", Contract::new(0, 13))]
    #[case("v1.12-beta", Contract::new(1, 12))]
    fn versions_parse(#[case] input: &str, #[case] expected: Contract) {
        assert_eq!(expected, input.parse::<Contract>().unwrap());
    }

    #[rstest]
    #[case("")]
    #[case("latest")]
    #[case("v1")]
    #[case("v1.5x")]
    fn bad_versions_fail(#[case] input: &str) {
        assert_eq!(Err(ParseError(input.to_string())), Contract::parse(input));
    }

    #[rstest]
    #[case(Some(Contract::new(0, 8)), false, false)]
    #[case(Some(Contract::new(0, 14)), true, false)]
    #[case(Some(Contract::new(1, 2)), true, true)]
    #[case(None, true, true)]
    fn predicates(#[case] contract: Option<Contract>, #[case] discovery: bool, #[case] stable_hostname: bool) {
        assert_eq!(discovery, contract.cluster_discovery_enabled());
        assert_eq!(stable_hostname, contract.stable_hostname_enabled());
    }

    #[test]
    fn current_enables_everything() {
        let current = Contract::current();
        assert!(current.secure_boot_enroll_enforcement_supported());
        assert_eq!("v1.12", current.to_string());
    }

    fn all(c: &Option<Contract>) -> Vec<bool> {
        vec![
            c.supports_ecdsa_keys(),
            c.cluster_discovery_enabled(),
            c.pod_security_admission_enabled(),
            c.stable_hostname_enabled(),
            c.kubelet_default_runtime_seccomp_profile_enabled(),
            c.kubernetes_allow_scheduling_on_control_planes(),
            c.kubernetes_discovery_backend_disabled(),
            c.apid_ext_key_usage_check_enabled(),
            c.api_server_audit_policy_supported(),
            c.kubelet_manifests_directory_disabled(),
            c.secretbox_encryption_supported(),
            c.disk_quota_support_enabled(),
            c.kube_prism_enabled(),
            c.host_dns_enabled(),
            c.use_rsa_service_account_key(),
            c.cluster_name_for_workers_enabled(),
            c.host_dns_forward_kube_dns_to_host(),
            c.add_exclude_from_external_load_balancer(),
            c.secure_boot_enroll_enforcement_supported(),
        ]
    }

    proptest! {
        #[test]
        fn predicates_are_monotone(a in (0u32..3, 0u32..20), b in (0u32..3, 0u32..20)) {
            let (lo, hi) = {
                let a = Contract::new(a.0, a.1);
                let b = Contract::new(b.0, b.1);
                if a <= b { (a, b) } else { (b, a) }
            };
            for (low, high) in all(&Some(lo)).into_iter().zip(all(&Some(hi))) {
                prop_assert!(!low || high);
            }
            for (high, latest) in all(&Some(hi)).into_iter().zip(all(&None)) {
                prop_assert!(!high || latest);
            }
        }
    }
}
