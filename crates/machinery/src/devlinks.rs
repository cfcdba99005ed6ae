//! Persistent `/dev/disk/by-id/wwn-*` links for SCSI block devices.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::scsi::Identity;

/// Block device event kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Add,
    Remove,
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "add" | "change" => Ok(Action::Add),
            "remove" => Ok(Action::Remove),
            other => Err(format!("unknown device action {:?}", other)),
        }
    }
}

/// Path of the link for `identity` under the device root, `None` when the
/// device has no WWN.
pub fn link_path(root: &Path, identity: &Identity, partition: Option<u32>) -> Option<PathBuf> {
    if identity.wwn.is_empty() {
        return None;
    }
    let mut name = format!("wwn-{}", identity.wwn);
    if let Some(partition) = partition {
        name.push_str(&format!("-part{}", partition));
    }
    Some(root.join("disk/by-id").join(name))
}

/// Creates or removes the link for `devname` under `root` (normally
/// `/dev`). Returns the link path that was touched.
pub async fn apply(
    action: Action,
    devname: &str,
    identity: &Identity,
    partition: Option<u32>,
    root: &Path,
) -> std::io::Result<Option<PathBuf>> {
    let link = match link_path(root, identity, partition) {
        Some(link) => link,
        None => {
            debug!(devname, "device has no WWN, not linking");
            return Ok(None);
        }
    };

    match action {
        Action::Add => {
            if let Some(parent) = link.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            match tokio::fs::remove_file(&link).await {
                Err(e) if e.kind() != ErrorKind::NotFound => return Err(e),
                _ => {}
            }
            let target = Path::new("../..").join(devname.trim_start_matches("/dev/"));
            tokio::fs::symlink(&target, &link).await?;
            info!(link = %link.display(), target = %target.display(), "created device link");
        }
        Action::Remove => match tokio::fs::remove_file(&link).await {
            Ok(()) => info!(link = %link.display(), "removed device link"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        },
    }
    Ok(Some(link))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::scsi::DeviceType;

    fn identity(wwn: &str) -> Identity {
        Identity {
            vendor: "ATA     ".to_string(),
            model: "QEMU HARDDISK   ".to_string(),
            revision: "2.5+".to_string(),
            type_: DeviceType::Disk,
            kernel: "8:0".to_string(),
            serial: String::new(),
            serial_short: String::new(),
            wwn: wwn.to_string(),
        }
    }

    #[tokio::test]
    async fn add_then_remove() {
        let root = tempfile::tempdir().unwrap();
        let id = identity("0x5001405000000001");

        let link = apply(Action::Add, "sda", &id, None, root.path()).await.unwrap().unwrap();
        assert_eq!(root.path().join("disk/by-id/wwn-0x5001405000000001"), link);
        assert_eq!(Path::new("../../sda"), tokio::fs::read_link(&link).await.unwrap());

        // Re-adding replaces the link.
        apply(Action::Add, "/dev/sdb", &id, None, root.path()).await.unwrap();
        assert_eq!(Path::new("../../sdb"), tokio::fs::read_link(&link).await.unwrap());

        apply(Action::Remove, "sdb", &id, None, root.path()).await.unwrap();
        assert!(tokio::fs::symlink_metadata(&link).await.is_err());
        // Removing twice is fine.
        apply(Action::Remove, "sdb", &id, None, root.path()).await.unwrap();
    }

    #[tokio::test]
    async fn partitions_get_a_suffix() {
        let root = tempfile::tempdir().unwrap();
        let link = apply(Action::Add, "sda1", &identity("0xabc"), Some(1), root.path())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(root.path().join("disk/by-id/wwn-0xabc-part1"), link);
    }

    #[tokio::test]
    async fn no_wwn_no_link() {
        let root = tempfile::tempdir().unwrap();
        let link = apply(Action::Add, "sr0", &identity(""), None, root.path()).await.unwrap();
        assert!(link.is_none());
        assert!(!root.path().join("disk").exists());
    }

    #[test]
    fn actions() {
        assert_eq!(Ok(Action::Add), "add".parse());
        assert_eq!(Ok(Action::Remove), "remove".parse());
        assert!("bind".parse::<Action>().is_err());
    }
}
