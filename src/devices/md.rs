//! Linux software RAID (MD)

use super::{BlkInfo, Device, DeviceKind, Region, Sid};
use crate::devicegraph::Devicegraph;
use crate::error::{Result, StorageError};
use crate::holders::HolderKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::OnceLock;

/// MD RAID level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MdLevel {
    Raid0,
    Raid1,
    Raid4,
    Raid5,
    Raid6,
    Raid10,
    Linear,
    #[default]
    Unknown,
}

impl MdLevel {
    /// Parse the content of /sys/block/mdX/md/level
    pub fn from_sysfs(level: &str) -> Self {
        match level.trim() {
            "raid0" => Self::Raid0,
            "raid1" => Self::Raid1,
            "raid4" => Self::Raid4,
            "raid5" => Self::Raid5,
            "raid6" => Self::Raid6,
            "raid10" => Self::Raid10,
            "linear" => Self::Linear,
            _ => Self::Unknown,
        }
    }

    /// Get minimum number of devices required for this level
    pub fn min_devices(&self) -> usize {
        match self {
            Self::Raid0 | Self::Linear => 1,
            Self::Raid1 | Self::Raid10 => 2,
            Self::Raid4 | Self::Raid5 => 3,
            Self::Raid6 => 4,
            Self::Unknown => 0,
        }
    }

    /// Usable size of an array built from devices of the given sizes
    pub fn usable_size(&self, sizes: &[u64]) -> u64 {
        let n = sizes.len() as u64;
        let smallest = sizes.iter().copied().min().unwrap_or(0);

        match self {
            Self::Raid0 | Self::Linear => sizes.iter().sum(),
            Self::Raid1 => smallest,
            Self::Raid4 | Self::Raid5 => n.saturating_sub(1) * smallest,
            Self::Raid6 => n.saturating_sub(2) * smallest,
            Self::Raid10 => n * smallest / 2,
            Self::Unknown => 0,
        }
    }
}

impl std::fmt::Display for MdLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Raid0 => write!(f, "raid0"),
            Self::Raid1 => write!(f, "raid1"),
            Self::Raid4 => write!(f, "raid4"),
            Self::Raid5 => write!(f, "raid5"),
            Self::Raid6 => write!(f, "raid6"),
            Self::Raid10 => write!(f, "raid10"),
            Self::Linear => write!(f, "linear"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// An MD RAID array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Md {
    pub blk: BlkInfo,
    #[serde(default)]
    pub level: MdLevel,
    /// Chunk size in bytes, 0 if not applicable
    #[serde(default)]
    pub chunk_size: u64,
    #[serde(default)]
    pub uuid: Option<String>,
    /// Superblock version, e.g. "1.2"
    #[serde(default)]
    pub metadata: Option<String>,
}

impl Md {
    /// Number of a numeric md name: `/dev/md12` gives 12, `/dev/md/foo` gives None
    pub fn number(&self) -> Option<u32> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| Regex::new(r"^/dev/md(\d+)$").expect("md name regex is valid"));

        re.captures(&self.blk.name)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    pub fn is_numeric(&self) -> bool {
        self.number().is_some()
    }

    /// Order mds for display: named ones (`/dev/md/<name>`) by name first, then
    /// numeric ones by number.
    pub fn compare_by_name(lhs: &Md, rhs: &Md) -> Ordering {
        match (lhs.number(), rhs.number()) {
            (Some(l), Some(r)) => l.cmp(&r),
            (Some(_), None) => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (None, None) => lhs.blk.name.cmp(&rhs.blk.name),
        }
    }
}

impl Devicegraph {
    /// Create an md device without members
    pub fn create_md(&mut self, name: &str) -> Result<Sid> {
        if !name.starts_with("/dev/md") {
            return Err(StorageError::parse(format!("invalid md name '{}'", name)));
        }

        let region = Region::new(0, 0, 512)?;
        let mut blk = BlkInfo::new(name, region);
        if let Some(kernel_name) = name.strip_prefix("/dev/") {
            if !kernel_name.contains('/') {
                blk.sysfs_name = kernel_name.to_string();
            }
        }

        self.add_device(DeviceKind::Md(Md {
            blk,
            level: MdLevel::Unknown,
            chunk_size: 0,
            uuid: None,
            metadata: None,
        }))
    }

    /// All mds in the graph, in sid order
    pub fn mds(&self) -> Vec<&Md> {
        self.devices().into_iter().filter_map(Device::as_md).collect()
    }

    pub fn set_md_level(&mut self, md: Sid, level: MdLevel) -> Result<()> {
        self.md_mut(md)?.level = level;
        self.calculate_md_region(md)
    }

    /// Add a block device as member of an md
    pub fn md_add_device(&mut self, md: Sid, blk_device: Sid) -> Result<()> {
        self.expect_kind(md, Device::as_md, "Md")?;
        if !self.find_device(blk_device)?.is_blk_device() {
            return Err(StorageError::WrongDeviceType {
                sid: blk_device,
                expected: "BlkDevice",
            });
        }

        self.add_holder(blk_device, md, HolderKind::User)?;
        self.calculate_md_region(md)
    }

    pub fn md_remove_device(&mut self, md: Sid, blk_device: Sid) -> Result<()> {
        self.expect_kind(md, Device::as_md, "Md")?;
        self.remove_holder(blk_device, md)?;
        self.calculate_md_region(md)
    }

    /// Member devices of an md, sorted by sid
    pub fn md_devices(&self, md: Sid) -> Result<Vec<Sid>> {
        self.expect_kind(md, Device::as_md, "Md")?;
        Ok(self
            .parents(md)?
            .into_iter()
            .filter(|sid| {
                self.find_device(*sid)
                    .map(Device::is_blk_device)
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Recompute the md size from its level and members
    fn calculate_md_region(&mut self, md: Sid) -> Result<()> {
        let members = self.md_devices(md)?;

        let mut sizes = Vec::with_capacity(members.len());
        let mut block_size = 512;
        for member in &members {
            if let Some(blk) = self.find_device(*member)?.blk() {
                sizes.push(blk.size());
                block_size = block_size.max(blk.region.block_size());
            }
        }

        let md = self.md_mut(md)?;
        let size = md.level.usable_size(&sizes);
        md.blk.region = Region::from_bytes(size, block_size)?;
        Ok(())
    }

    pub(crate) fn check_md(&self, sid: Sid) -> Result<()> {
        let md = self.expect_kind(sid, Device::as_md, "Md")?;
        let members = self.md_devices(sid)?;

        if members.is_empty() {
            return Err(StorageError::check(format!("md {} has no devices", md.blk.name)));
        }
        if members.len() < md.level.min_devices() {
            log::warn!(
                "md {} ({}) has {} devices, {} needs at least {}",
                md.blk.name,
                md.level,
                members.len(),
                md.level,
                md.level.min_devices()
            );
        }
        Ok(())
    }

    fn md_mut(&mut self, sid: Sid) -> Result<&mut Md> {
        self.find_device_mut(sid)?
            .as_md_mut()
            .ok_or(StorageError::WrongDeviceType { sid, expected: "Md" })
    }
}
