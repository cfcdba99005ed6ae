//! Kubernetes versions recovered from image references.

use std::fmt;

/// A `major.minor.patch` Kubernetes version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct KubernetesVersion {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl KubernetesVersion {
    /// A version from its parts.
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        KubernetesVersion { major, minor, patch }
    }

    /// Parses `v1.31.1`, `1.31` or `1.31.1-alpha.0`.
    pub fn parse(version: &str) -> Option<Self> {
        let version = version.trim_start_matches('v');
        let core = version.split(|c| c == '-' || c == '+').next()?;
        let mut parts = core.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        let patch = match parts.next() {
            Some(patch) => patch.parse().ok()?,
            None => 0,
        };
        Some(KubernetesVersion { major, minor, patch })
    }

    /// The version an image reference is tagged with.
    ///
    /// Digests are ignored, so `repo:v1.31.1@sha256:...` yields `1.31.1`.
    /// References without a usable tag yield `None`.
    pub fn from_image_ref(image: &str) -> Option<Self> {
        let image = image.split('@').next()?;
        let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
        let (_, tag) = image[name_start..].rsplit_once(':')?;
        Self::parse(tag)
    }

    /// True if `self >= major.minor`.
    pub fn at_least(&self, major: u64, minor: u64) -> bool {
        (self.major, self.minor) >= (major, minor)
    }
}

impl fmt::Display for KubernetesVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("registry.k8s.io/kube-proxy:v1.31.1", Some(KubernetesVersion::new(1, 31, 1)))]
    #[case("localhost:5000/kube-proxy:v1.30.0-rc.1", Some(KubernetesVersion::new(1, 30, 0)))]
    #[case("kube-proxy:1.29@sha256:abcd", Some(KubernetesVersion::new(1, 29, 0)))]
    #[case("localhost:5000/kube-proxy", None)]
    #[case("kube-proxy:latest", None)]
    fn versions_come_from_tags(#[case] image: &str, #[case] expected: Option<KubernetesVersion>) {
        assert_eq!(expected, KubernetesVersion::from_image_ref(image));
    }

    #[test]
    fn versions_compare_by_minor() {
        let version = KubernetesVersion::new(1, 31, 0);
        assert!(version.at_least(1, 31));
        assert!(version.at_least(1, 30));
        assert!(!version.at_least(1, 32));
        assert_eq!("1.31.0", version.to_string());
    }
}
