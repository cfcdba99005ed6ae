//! Node network state the kubelet derivation reads.

use resource_state::ResourceSpec;
use serde::{Deserialize, Serialize};

/// Id of the hostname status.
pub const HOSTNAME_ID: &str = "hostname";
/// Id of the current node addresses.
pub const CURRENT_ADDRESSES_ID: &str = "current";

/// The hostname the node currently runs with.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HostnameStatus {
    /// Short hostname.
    pub hostname: String,
    /// Domain name, may be empty.
    pub domainname: String,
}

impl HostnameStatus {
    /// Splits `name` at the first dot.
    pub fn from_fqdn(name: &str) -> Self {
        match name.split_once('.') {
            Some((hostname, domainname)) => HostnameStatus {
                hostname: hostname.to_string(),
                domainname: domainname.to_string(),
            },
            None => HostnameStatus {
                hostname: name.to_string(),
                domainname: String::new(),
            },
        }
    }

    /// Hostname with the domain appended when one is set.
    pub fn fqdn(&self) -> String {
        if self.domainname.is_empty() {
            self.hostname.clone()
        } else {
            format!("{}.{}", self.hostname, self.domainname)
        }
    }
}

impl ResourceSpec for HostnameStatus {
    const TYPE: &'static str = "HostnameStatuses.net.talos.dev";
    const NAMESPACE: &'static str = "network";
}

/// Addresses assigned to the node, as `ip/prefix`, in assignment order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeAddresses {
    /// Addresses with prefix length.
    pub addresses: Vec<String>,
}

impl ResourceSpec for NodeAddresses {
    const TYPE: &'static str = "NodeAddresses.net.talos.dev";
    const NAMESPACE: &'static str = "network";
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fqdn_splits_at_first_dot() {
        let status = HostnameStatus::from_fqdn("node-1.example.com");
        assert_eq!("node-1", status.hostname);
        assert_eq!("example.com", status.domainname);
        assert_eq!("node-1.example.com", status.fqdn());
        assert_eq!("node-1", HostnameStatus::from_fqdn("node-1").fqdn());
    }
}
