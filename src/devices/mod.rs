//! Device model
//!
//! Every node of a [`Devicegraph`](crate::Devicegraph) is a [`Device`]: a storage id
//! plus kind-specific data. Block devices (disks, partitions, MD RAIDs, LUKS
//! mappings) share a [`BlkInfo`] record; filesystems and btrfs subvolumes do not.

pub mod blk_device;
pub mod disk;
pub mod luks;
pub mod md;
pub mod region;

pub use blk_device::BlkDevice;
pub use disk::{Disk, Partition, PartitionType, Transport};
pub use luks::{Luks, MountByType};
pub use md::{Md, MdLevel};
pub use region::Region;

use crate::filesystems::{Btrfs, BtrfsSubvolume, Filesystem};
use serde::{Deserialize, Serialize};

/// Storage id, unique within a devicegraph and kept when the graph is copied
pub type Sid = u32;

/// Data shared by all block devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlkInfo {
    /// Kernel device name (e.g., /dev/sda, /dev/mapper/cr-auto-1)
    pub name: String,
    /// Extent of the device
    pub region: Region,
    /// Name below /sys/block (e.g., sda, dm-0)
    #[serde(default)]
    pub sysfs_name: String,
    /// Sysfs path relative to /sys (e.g., /devices/virtual/block/dm-0)
    #[serde(default)]
    pub sysfs_path: String,
    /// Device number of the node, if known
    #[serde(default)]
    pub major_minor: Option<(u32, u32)>,
}

impl BlkInfo {
    /// Create block device data with only a name and a region
    pub fn new(name: impl Into<String>, region: Region) -> Self {
        Self {
            name: name.into(),
            region,
            sysfs_name: String::new(),
            sysfs_path: String::new(),
            major_minor: None,
        }
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.region.size_bytes()
    }

    /// Get human-readable size
    pub fn size_human(&self) -> String {
        bytesize::ByteSize(self.size()).to_string()
    }
}

/// Kind-specific data of a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum DeviceKind {
    Disk(Disk),
    Partition(Partition),
    Md(Md),
    Luks(Luks),
    Filesystem(Filesystem),
    Btrfs(Btrfs),
    BtrfsSubvolume(BtrfsSubvolume),
}

/// A node in the devicegraph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub(crate) sid: Sid,
    #[serde(flatten)]
    pub(crate) kind: DeviceKind,
}

impl Device {
    pub fn sid(&self) -> Sid {
        self.sid
    }

    pub fn kind(&self) -> &DeviceKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut DeviceKind {
        &mut self.kind
    }

    /// Name of the device class, e.g. "Disk" or "BtrfsSubvolume"
    pub fn classname(&self) -> &'static str {
        match self.kind {
            DeviceKind::Disk(_) => "Disk",
            DeviceKind::Partition(_) => "Partition",
            DeviceKind::Md(_) => "Md",
            DeviceKind::Luks(_) => "Luks",
            DeviceKind::Filesystem(_) => "Filesystem",
            DeviceKind::Btrfs(_) => "Btrfs",
            DeviceKind::BtrfsSubvolume(_) => "BtrfsSubvolume",
        }
    }

    /// Block device data, if this device is a block device
    pub fn blk(&self) -> Option<&BlkInfo> {
        match &self.kind {
            DeviceKind::Disk(d) => Some(&d.blk),
            DeviceKind::Partition(p) => Some(&p.blk),
            DeviceKind::Md(m) => Some(&m.blk),
            DeviceKind::Luks(l) => Some(&l.blk),
            _ => None,
        }
    }

    pub fn blk_mut(&mut self) -> Option<&mut BlkInfo> {
        match &mut self.kind {
            DeviceKind::Disk(d) => Some(&mut d.blk),
            DeviceKind::Partition(p) => Some(&mut p.blk),
            DeviceKind::Md(m) => Some(&mut m.blk),
            DeviceKind::Luks(l) => Some(&mut l.blk),
            _ => None,
        }
    }

    pub fn is_blk_device(&self) -> bool {
        self.blk().is_some()
    }

    /// True for filesystems of any type, btrfs included
    pub fn is_filesystem(&self) -> bool {
        matches!(
            self.kind,
            DeviceKind::Filesystem(_) | DeviceKind::Btrfs(_)
        )
    }

    /// Get a display name for the device
    ///
    /// Filesystems do not know their block device here; use
    /// [`Devicegraph::display_name`](crate::Devicegraph::display_name) for the
    /// full "btrfs on /dev/sda2" form.
    pub fn display_name(&self) -> String {
        match &self.kind {
            DeviceKind::Disk(disk) => {
                let model_info = disk
                    .model
                    .as_ref()
                    .map(|m| format!(" ({})", m.trim()))
                    .unwrap_or_default();
                format!("{}{} - {}", disk.blk.name, model_info, disk.blk.size_human())
            }
            DeviceKind::Filesystem(fs) => fs.fs_type.to_string(),
            DeviceKind::Btrfs(_) => "btrfs".to_string(),
            DeviceKind::BtrfsSubvolume(subvolume) => subvolume.display_name(),
            _ => match self.blk() {
                Some(blk) => format!("{} - {}", blk.name, blk.size_human()),
                None => self.classname().to_string(),
            },
        }
    }

    pub fn as_disk(&self) -> Option<&Disk> {
        match &self.kind {
            DeviceKind::Disk(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_partition(&self) -> Option<&Partition> {
        match &self.kind {
            DeviceKind::Partition(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_md(&self) -> Option<&Md> {
        match &self.kind {
            DeviceKind::Md(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_md_mut(&mut self) -> Option<&mut Md> {
        match &mut self.kind {
            DeviceKind::Md(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_luks(&self) -> Option<&Luks> {
        match &self.kind {
            DeviceKind::Luks(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_luks_mut(&mut self) -> Option<&mut Luks> {
        match &mut self.kind {
            DeviceKind::Luks(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_filesystem(&self) -> Option<&Filesystem> {
        match &self.kind {
            DeviceKind::Filesystem(fs) => Some(fs),
            _ => None,
        }
    }

    pub fn as_btrfs(&self) -> Option<&Btrfs> {
        match &self.kind {
            DeviceKind::Btrfs(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_btrfs_mut(&mut self) -> Option<&mut Btrfs> {
        match &mut self.kind {
            DeviceKind::Btrfs(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_btrfs_subvolume(&self) -> Option<&BtrfsSubvolume> {
        match &self.kind {
            DeviceKind::BtrfsSubvolume(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_btrfs_subvolume_mut(&mut self) -> Option<&mut BtrfsSubvolume> {
        match &mut self.kind {
            DeviceKind::BtrfsSubvolume(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} sid:{}", self.display_name(), self.sid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk(model: Option<&str>) -> Device {
        Device {
            sid: 1,
            kind: DeviceKind::Disk(Disk {
                blk: BlkInfo::new("/dev/sda", Region::new(0, 2048, 512).unwrap()),
                transport: Transport::Sata,
                rotational: false,
                removable: false,
                read_only: false,
                model: model.map(str::to_string),
                serial: None,
            }),
        }
    }

    #[test]
    fn test_display_name_with_model() {
        let device = disk(Some("Samsung SSD 860  "));
        let name = device.display_name();
        assert!(name.starts_with("/dev/sda (Samsung SSD 860) - "));
    }

    #[test]
    fn test_display_name_without_model() {
        let device = disk(None);
        assert!(device.display_name().starts_with("/dev/sda - "));
    }

    #[test]
    fn test_blk_accessors() {
        let device = disk(None);
        assert!(device.is_blk_device());
        assert!(!device.is_filesystem());
        assert_eq!(device.classname(), "Disk");
        assert_eq!(device.blk().unwrap().size(), 2048 * 512);
        assert!(device.as_md().is_none());
    }
}
