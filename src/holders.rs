//! Holders: the edges of the devicegraph
//!
//! A holder connects a source device to a target device that is built on top of
//! it: a disk holds its partitions, a partition is used by an MD RAID or a
//! LUKS mapping, a block device is used by a filesystem.

use crate::devices::Sid;
use serde::{Deserialize, Serialize};

/// Relationship between source and target device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HolderKind {
    /// Target is carved out of the source (partition of a disk, subvolume of btrfs)
    Subdevice,
    /// Target uses the source as a member or backing device (MD member, LUKS)
    User,
    /// Target is a filesystem on the source block device
    FilesystemUser,
}

impl std::fmt::Display for HolderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Subdevice => write!(f, "Subdevice"),
            Self::User => write!(f, "User"),
            Self::FilesystemUser => write!(f, "FilesystemUser"),
        }
    }
}

/// Edge weight stored in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holder {
    pub kind: HolderKind,
}

impl Holder {
    pub fn new(kind: HolderKind) -> Self {
        Self { kind }
    }
}

impl std::fmt::Display for Holder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.kind.fmt(f)
    }
}

/// Holder as written to a saved devicegraph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderRecord {
    #[serde(rename = "source-sid")]
    pub source: Sid,
    #[serde(rename = "target-sid")]
    pub target: Sid,
    pub kind: HolderKind,
}
