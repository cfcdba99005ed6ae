//! Kubernetes node names derived from hostnames.

/// The hostname has no character that survives the mapping.
#[derive(Debug, thiserror::Error, PartialEq)]
#[error("could not convert hostname {0:?} to a valid Kubernetes Node name")]
pub struct Error(pub String);

/// Maps a hostname to an RFC 1123 node name.
///
/// ASCII letters are lowercased, `_` becomes `-`, dots and digits are kept
/// and everything else is dropped. Leading and trailing `-` and `.` are
/// trimmed.
pub fn from_hostname(hostname: &str) -> Result<String, Error> {
    let mapped: String = hostname
        .chars()
        .filter_map(|c| match c {
            'a'..='z' | '0'..='9' | '.' | '-' => Some(c),
            'A'..='Z' => Some(c.to_ascii_lowercase()),
            '_' => Some('-'),
            _ => None,
        })
        .collect();

    let nodename = mapped.trim_matches(|c| c == '-' || c == '.');
    if nodename.is_empty() {
        return Err(Error(hostname.to_string()));
    }
    Ok(nodename.to_string())
}

/// Node name from a hostname status: the FQDN when the kubelet registers
/// with it, the short hostname otherwise.
pub fn from_hostname_parts(hostname: &str, domainname: &str, fqdn: bool) -> Result<String, Error> {
    if fqdn && !domainname.is_empty() {
        from_hostname(&format!("{}.{}", hostname, domainname))
    } else {
        from_hostname(hostname)
    }
}
