//! Btrfs filesystems and their subvolumes
//!
//! A btrfs always has exactly one top-level subvolume (id 5, empty path) as a
//! subdevice child. Further subvolumes hang below their parent subvolume.

use crate::devicegraph::Devicegraph;
use crate::devices::{Device, DeviceKind, Sid};
use crate::error::{Result, StorageError};
use crate::holders::HolderKind;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Id of the top-level subvolume
pub const BTRFS_TOP_LEVEL_ID: i64 = 5;

/// A btrfs filesystem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Btrfs {
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub mkfs_options: String,
    /// Set up snapper for the filesystem once it is created
    #[serde(default)]
    pub configure_snapper: bool,
}

/// A btrfs subvolume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtrfsSubvolume {
    pub id: i64,
    pub path: String,
    #[serde(default)]
    pub default: bool,
}

impl BtrfsSubvolume {
    pub fn is_top_level(&self) -> bool {
        self.id == BTRFS_TOP_LEVEL_ID
    }

    pub fn display_name(&self) -> String {
        if self.is_top_level() {
            "btrfs subvolume (top level)".to_string()
        } else {
            format!("btrfs subvolume {}", self.path)
        }
    }

    pub fn compare_by_id(lhs: &BtrfsSubvolume, rhs: &BtrfsSubvolume) -> Ordering {
        lhs.id.cmp(&rhs.id)
    }
}

impl Devicegraph {
    /// Create a btrfs on a block device, including its top-level subvolume
    pub fn create_btrfs(&mut self, blk_device: Sid) -> Result<Sid> {
        self.ensure_unused_blk_device(blk_device)?;

        let btrfs = self.add_device(DeviceKind::Btrfs(Btrfs::default()))?;
        self.add_holder(blk_device, btrfs, HolderKind::FilesystemUser)?;

        let top_level = self.add_device(DeviceKind::BtrfsSubvolume(BtrfsSubvolume {
            id: BTRFS_TOP_LEVEL_ID,
            path: String::new(),
            default: true,
        }))?;
        self.add_holder(btrfs, top_level, HolderKind::Subdevice)?;

        Ok(btrfs)
    }

    pub fn top_level_btrfs_subvolume(&self, btrfs: Sid) -> Result<Sid> {
        self.expect_kind(btrfs, Device::as_btrfs, "Btrfs")?;

        let subvolumes = self.direct_subvolumes(btrfs)?;
        match subvolumes.as_slice() {
            [top_level] => Ok(*top_level),
            _ => Err(StorageError::check("no top-level subvolume found")),
        }
    }

    /// All subvolumes of a btrfs, top-level first, in breadth-first order
    pub fn btrfs_subvolumes(&self, btrfs: Sid) -> Result<Vec<Sid>> {
        self.expect_kind(btrfs, Device::as_btrfs, "Btrfs")?;

        Ok(self
            .descendants(btrfs, false)?
            .into_iter()
            .filter(|sid| {
                self.find_device(*sid)
                    .map(|d| d.as_btrfs_subvolume().is_some())
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Create a subvolume below another one; gets the next free id
    pub fn create_btrfs_subvolume(&mut self, parent: Sid, path: &str) -> Result<Sid> {
        self.expect_kind(parent, Device::as_btrfs_subvolume, "BtrfsSubvolume")?;

        if path.is_empty() || path.starts_with('/') {
            return Err(StorageError::parse(format!(
                "invalid btrfs subvolume path '{}'",
                path
            )));
        }

        let btrfs = self.btrfs_of_subvolume(parent)?;
        if self.find_btrfs_subvolume_by_path(btrfs, path).is_ok() {
            return Err(StorageError::check(format!(
                "btrfs subvolume {} already exists",
                path
            )));
        }

        let next_id = self
            .btrfs_subvolumes(btrfs)?
            .into_iter()
            .filter_map(|sid| self.find_device(sid).ok()?.as_btrfs_subvolume().map(|s| s.id))
            .max()
            .unwrap_or(BTRFS_TOP_LEVEL_ID)
            .max(255)
            + 1;

        let sid = self.add_device(DeviceKind::BtrfsSubvolume(BtrfsSubvolume {
            id: next_id,
            path: path.to_string(),
            default: false,
        }))?;
        self.add_holder(parent, sid, HolderKind::Subdevice)?;
        Ok(sid)
    }

    pub fn find_btrfs_subvolume_by_path(&self, btrfs: Sid, path: &str) -> Result<Sid> {
        for sid in self.btrfs_subvolumes(btrfs)? {
            let subvolume = self.expect_kind(sid, Device::as_btrfs_subvolume, "BtrfsSubvolume")?;
            if subvolume.path == path {
                return Ok(sid);
            }
        }

        Err(StorageError::BtrfsSubvolumeNotFoundByPath(path.to_string()))
    }

    pub fn default_btrfs_subvolume(&self, btrfs: Sid) -> Result<Sid> {
        for sid in self.btrfs_subvolumes(btrfs)? {
            let subvolume = self.expect_kind(sid, Device::as_btrfs_subvolume, "BtrfsSubvolume")?;
            if subvolume.default {
                return Ok(sid);
            }
        }

        Err(StorageError::check("no default btrfs subvolume found"))
    }

    /// Make a subvolume the default one; only one subvolume is default at a time
    pub fn set_default_btrfs_subvolume(&mut self, subvolume: Sid) -> Result<()> {
        let btrfs = self.btrfs_of_subvolume(subvolume)?;

        for sid in self.btrfs_subvolumes(btrfs)? {
            if let Some(s) = self.find_device_mut(sid)?.as_btrfs_subvolume_mut() {
                s.default = sid == subvolume;
            }
        }
        Ok(())
    }

    pub fn set_btrfs_configure_snapper(&mut self, btrfs: Sid, configure: bool) -> Result<()> {
        self.find_device_mut(btrfs)?
            .as_btrfs_mut()
            .ok_or(StorageError::WrongDeviceType {
                sid: btrfs,
                expected: "Btrfs",
            })?
            .configure_snapper = configure;
        Ok(())
    }

    /// Btrfs a subvolume belongs to
    pub fn btrfs_of_subvolume(&self, subvolume: Sid) -> Result<Sid> {
        self.expect_kind(subvolume, Device::as_btrfs_subvolume, "BtrfsSubvolume")?;

        self.ancestors(subvolume, false)?
            .into_iter()
            .find(|sid| {
                self.find_device(*sid)
                    .map(|d| d.as_btrfs().is_some())
                    .unwrap_or(false)
            })
            .ok_or_else(|| StorageError::check("btrfs subvolume without btrfs"))
    }

    pub(crate) fn check_btrfs(&self, sid: Sid) -> Result<()> {
        if self.direct_subvolumes(sid)?.len() != 1 {
            return Err(StorageError::check("top-level subvolume missing"));
        }

        let defaults = self
            .btrfs_subvolumes(sid)?
            .into_iter()
            .filter(|s| {
                self.find_device(*s)
                    .ok()
                    .and_then(Device::as_btrfs_subvolume)
                    .map(|s| s.default)
                    .unwrap_or(false)
            })
            .count();
        if defaults > 1 {
            return Err(StorageError::check("more than one default btrfs subvolume"));
        }
        Ok(())
    }

    fn direct_subvolumes(&self, btrfs: Sid) -> Result<Vec<Sid>> {
        Ok(self
            .children_of_kind(btrfs, HolderKind::Subdevice)?
            .into_iter()
            .filter(|sid| {
                self.find_device(*sid)
                    .map(|d| d.as_btrfs_subvolume().is_some())
                    .unwrap_or(false)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::Region;
    use pretty_assertions::assert_eq;

    fn btrfs_graph() -> (Devicegraph, Sid) {
        let mut graph = Devicegraph::new();
        let sda = graph.create_disk("/dev/sda", Region::new(0, 1_000_000, 512).unwrap()).unwrap();
        let btrfs = graph.create_btrfs(sda).unwrap();
        (graph, btrfs)
    }

    #[test]
    fn test_top_level_subvolume() {
        let (graph, btrfs) = btrfs_graph();
        let top = graph.top_level_btrfs_subvolume(btrfs).unwrap();

        let subvolume = graph.find_device(top).unwrap().as_btrfs_subvolume().unwrap();
        assert!(subvolume.is_top_level());
        assert_eq!(subvolume.path, "");
        assert_eq!(graph.default_btrfs_subvolume(btrfs).unwrap(), top);
        graph.check().unwrap();
    }

    #[test]
    fn test_nested_subvolumes() {
        let (mut graph, btrfs) = btrfs_graph();
        let top = graph.top_level_btrfs_subvolume(btrfs).unwrap();
        let root = graph.create_btrfs_subvolume(top, "@").unwrap();
        let home = graph.create_btrfs_subvolume(root, "@/home").unwrap();

        assert_eq!(
            graph.btrfs_subvolumes(btrfs).unwrap(),
            vec![top, root, home]
        );
        assert_eq!(graph.find_btrfs_subvolume_by_path(btrfs, "@/home").unwrap(), home);
        assert_eq!(graph.btrfs_of_subvolume(home).unwrap(), btrfs);

        let ids: Vec<i64> = [root, home]
            .iter()
            .map(|s| graph.find_device(*s).unwrap().as_btrfs_subvolume().unwrap().id)
            .collect();
        assert_eq!(ids, vec![256, 257]);
    }

    #[test]
    fn test_subvolume_not_found() {
        let (graph, btrfs) = btrfs_graph();
        let err = graph.find_btrfs_subvolume_by_path(btrfs, "@/srv").unwrap_err();
        assert!(matches!(err, StorageError::BtrfsSubvolumeNotFoundByPath(ref p) if p == "@/srv"));
        assert!(err.is_device_not_found());
    }

    #[test]
    fn test_duplicate_and_invalid_paths() {
        let (mut graph, btrfs) = btrfs_graph();
        let top = graph.top_level_btrfs_subvolume(btrfs).unwrap();
        graph.create_btrfs_subvolume(top, "@").unwrap();

        assert!(graph.create_btrfs_subvolume(top, "@").is_err());
        assert!(graph.create_btrfs_subvolume(top, "/abs").is_err());
        assert!(graph.create_btrfs_subvolume(top, "").is_err());
    }

    #[test]
    fn test_set_default() {
        let (mut graph, btrfs) = btrfs_graph();
        let top = graph.top_level_btrfs_subvolume(btrfs).unwrap();
        let root = graph.create_btrfs_subvolume(top, "@").unwrap();

        graph.set_default_btrfs_subvolume(root).unwrap();
        assert_eq!(graph.default_btrfs_subvolume(btrfs).unwrap(), root);
        let top_is_default = graph
            .find_device(top)
            .unwrap()
            .as_btrfs_subvolume()
            .unwrap()
            .default;
        assert!(!top_is_default);
        graph.check().unwrap();
    }

    #[test]
    fn test_missing_top_level_fails_check() {
        let (mut graph, btrfs) = btrfs_graph();
        let top = graph.top_level_btrfs_subvolume(btrfs).unwrap();
        graph.remove_device(top).unwrap();

        let err = graph.check().unwrap_err();
        assert!(err.to_string().contains("top-level subvolume missing"));
        assert!(graph.top_level_btrfs_subvolume(btrfs).is_err());
    }

    #[test]
    fn test_compare_by_id() {
        let mut subvolumes = vec![
            BtrfsSubvolume { id: 258, path: "b".into(), default: false },
            BtrfsSubvolume { id: 5, path: "".into(), default: true },
            BtrfsSubvolume { id: 256, path: "a".into(), default: false },
        ];
        subvolumes.sort_by(BtrfsSubvolume::compare_by_id);
        let ids: Vec<i64> = subvolumes.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![5, 256, 258]);
    }

    #[test]
    fn test_configure_snapper() {
        let (mut graph, btrfs) = btrfs_graph();
        graph.set_btrfs_configure_snapper(btrfs, true).unwrap();
        assert!(graph.find_device(btrfs).unwrap().as_btrfs().unwrap().configure_snapper);
    }
}
