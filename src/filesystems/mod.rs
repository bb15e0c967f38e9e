//! Filesystems on block devices

pub mod btrfs;

pub use btrfs::{Btrfs, BtrfsSubvolume, BTRFS_TOP_LEVEL_ID};

use crate::devicegraph::Devicegraph;
use crate::devices::{Device, DeviceKind, Sid};
use crate::error::{Result, StorageError};
use crate::holders::HolderKind;
use serde::{Deserialize, Serialize};

/// Filesystem type as reported by blkid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FsType {
    Ext2,
    Ext3,
    Ext4,
    Xfs,
    Vfat,
    Swap,
    Btrfs,
    Other(String),
}

impl FsType {
    /// Map a blkid TYPE value
    pub fn from_blkid(value: &str) -> Self {
        match value {
            "ext2" => Self::Ext2,
            "ext3" => Self::Ext3,
            "ext4" => Self::Ext4,
            "xfs" => Self::Xfs,
            "vfat" => Self::Vfat,
            "swap" => Self::Swap,
            "btrfs" => Self::Btrfs,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for FsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ext2 => write!(f, "ext2"),
            Self::Ext3 => write!(f, "ext3"),
            Self::Ext4 => write!(f, "ext4"),
            Self::Xfs => write!(f, "xfs"),
            Self::Vfat => write!(f, "vfat"),
            Self::Swap => write!(f, "swap"),
            Self::Btrfs => write!(f, "btrfs"),
            Self::Other(name) => write!(f, "{}", name),
        }
    }
}

/// A filesystem other than btrfs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filesystem {
    pub fs_type: FsType,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

impl Devicegraph {
    /// Create a filesystem on a block device
    ///
    /// Btrfs gets its own device kind with a top-level subvolume, so
    /// `FsType::Btrfs` is forwarded to [`Devicegraph::create_btrfs`].
    pub fn create_filesystem(&mut self, blk_device: Sid, fs_type: FsType) -> Result<Sid> {
        if fs_type == FsType::Btrfs {
            return self.create_btrfs(blk_device);
        }

        self.ensure_unused_blk_device(blk_device)?;
        let sid = self.add_device(DeviceKind::Filesystem(Filesystem {
            fs_type,
            uuid: None,
            label: None,
        }))?;
        self.add_holder(blk_device, sid, HolderKind::FilesystemUser)?;
        Ok(sid)
    }

    /// Filesystem directly on a block device, if any
    pub fn filesystem_of(&self, blk_device: Sid) -> Result<Option<Sid>> {
        Ok(self
            .children_of_kind(blk_device, HolderKind::FilesystemUser)?
            .into_iter()
            .next())
    }

    /// Block device a filesystem lives on
    ///
    /// For a btrfs spanning several devices this is the one with the lowest sid.
    pub fn filesystem_blk_device(&self, filesystem: Sid) -> Result<Sid> {
        match self.find_device(filesystem)?.kind() {
            DeviceKind::Btrfs(_) => self.blk_parents(filesystem)?.into_iter().next().ok_or_else(|| {
                StorageError::check(format!("btrfs sid:{} has no BlkDevice parent", filesystem))
            }),
            DeviceKind::Filesystem(_) => self.single_blk_parent(filesystem),
            _ => Err(StorageError::WrongDeviceType {
                sid: filesystem,
                expected: "Filesystem",
            }),
        }
    }

    /// Set uuid and label of any filesystem, btrfs included
    pub fn set_filesystem_identity(
        &mut self,
        filesystem: Sid,
        uuid: Option<String>,
        label: Option<String>,
    ) -> Result<()> {
        match self.find_device_mut(filesystem)?.kind_mut() {
            DeviceKind::Filesystem(fs) => {
                fs.uuid = uuid;
                fs.label = label;
            }
            DeviceKind::Btrfs(btrfs) => {
                btrfs.uuid = uuid;
                btrfs.label = label;
            }
            _ => {
                return Err(StorageError::WrongDeviceType {
                    sid: filesystem,
                    expected: "Filesystem",
                })
            }
        }
        Ok(())
    }

    pub(crate) fn ensure_unused_blk_device(&self, blk_device: Sid) -> Result<()> {
        let device = self.find_device(blk_device)?;
        if !device.is_blk_device() {
            return Err(StorageError::WrongDeviceType {
                sid: blk_device,
                expected: "BlkDevice",
            });
        }
        if self.filesystem_of(blk_device)?.is_some() {
            return Err(StorageError::check(format!(
                "{} already has a filesystem",
                device.blk().map(|b| b.name.as_str()).unwrap_or_default()
            )));
        }
        Ok(())
    }

    pub(crate) fn check_filesystem(&self, sid: Sid) -> Result<()> {
        let blk_parents = self.blk_parents(sid)?;
        let multi_device = matches!(self.find_device(sid)?.kind(), DeviceKind::Btrfs(_));

        match blk_parents.len() {
            0 => Err(StorageError::check(format!(
                "filesystem sid:{} has no BlkDevice parent",
                sid
            ))),
            1 => Ok(()),
            n if multi_device => {
                log::debug!("btrfs sid:{} spans {} devices", sid, n);
                Ok(())
            }
            n => Err(StorageError::check(format!(
                "filesystem sid:{} has {} BlkDevice parents",
                sid, n
            ))),
        }
    }
}

/// All filesystems of the graph with their block device, sorted by sid
pub fn filesystems(graph: &Devicegraph) -> Vec<(&Device, Option<Sid>)> {
    graph
        .devices()
        .into_iter()
        .filter(|d| d.is_filesystem())
        .map(|d| (d, graph.filesystem_blk_device(d.sid()).ok()))
        .collect()
}
