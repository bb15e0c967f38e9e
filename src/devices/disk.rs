//! Disks and their partitions

use super::{BlkInfo, Device, DeviceKind, Region, Sid};
use crate::devicegraph::Devicegraph;
use crate::error::{Result, StorageError};
use crate::holders::HolderKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Storage transport / controller type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Transport {
    Sata,
    Nvme,
    Scsi,
    Usb,
    Mmc,
    Virtual,
    #[default]
    Unknown,
}

impl Transport {
    /// Guess the transport from the kernel name (e.g., sda, nvme0n1)
    pub fn from_kernel_name(name: &str) -> Self {
        if name.starts_with("nvme") {
            Self::Nvme
        } else if name.starts_with("sd") {
            // Could be SATA, SCSI, or USB; sysfs "removable" refines USB later
            Self::Sata
        } else if name.starts_with("mmcblk") {
            Self::Mmc
        } else if name.starts_with("vd") || name.starts_with("xvd") || name.starts_with("loop") {
            Self::Virtual
        } else {
            Self::Unknown
        }
    }
}

impl std::fmt::Display for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sata => write!(f, "SATA"),
            Self::Nvme => write!(f, "NVMe"),
            Self::Scsi => write!(f, "SCSI"),
            Self::Usb => write!(f, "USB"),
            Self::Mmc => write!(f, "MMC"),
            Self::Virtual => write!(f, "Virtual"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A whole disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disk {
    pub blk: BlkInfo,
    #[serde(default)]
    pub transport: Transport,
    #[serde(default)]
    pub rotational: bool,
    #[serde(default)]
    pub removable: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub serial: Option<String>,
}

/// MBR partition type; GPT partitions are always primary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PartitionType {
    #[default]
    Primary,
    Extended,
    Logical,
}

/// A partition of a disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub blk: BlkInfo,
    pub number: u32,
    #[serde(default)]
    pub partition_type: PartitionType,
    /// Partition id / type code (e.g., 0x83, or a GPT type code such as "8300")
    #[serde(default)]
    pub id: Option<String>,
}

impl Partition {
    /// Extract the partition number from a device name.
    ///
    /// `sda3` gives 3, `nvme0n1p2` gives 2, `/dev/mmcblk0p1` gives 1.
    pub fn number_from_name(name: &str) -> Option<u32> {
        static RE: OnceLock<Regex> = OnceLock::new();
        let re = RE.get_or_init(|| {
            Regex::new(r"(?:\d+p|[a-z]+)(\d+)$").expect("partition number regex is valid")
        });

        re.captures(name)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }
}

impl Devicegraph {
    /// Create a disk
    pub fn create_disk(&mut self, name: &str, region: Region) -> Result<Sid> {
        let kernel_name = name.rsplit('/').next().unwrap_or(name);
        self.add_device(DeviceKind::Disk(Disk {
            blk: BlkInfo::new(name, region),
            transport: Transport::from_kernel_name(kernel_name),
            rotational: false,
            removable: false,
            read_only: false,
            model: None,
            serial: None,
        }))
    }

    /// Create a partition on a disk
    ///
    /// The region is in the disk's blocks and must lie inside the disk.
    pub fn create_partition(&mut self, disk: Sid, name: &str, region: Region) -> Result<Sid> {
        let disk_region = self.expect_kind(disk, Device::as_disk, "Disk")?.blk.region;

        if !disk_region.contains(&region)? {
            return Err(StorageError::InvalidRegion(format!(
                "partition {} {} is outside of disk {}",
                name, region, disk_region
            )));
        }

        let number = Partition::number_from_name(name).ok_or_else(|| {
            StorageError::parse(format!("no partition number in name '{}'", name))
        })?;

        let sid = self.add_device(DeviceKind::Partition(Partition {
            blk: BlkInfo::new(name, region),
            number,
            partition_type: PartitionType::Primary,
            id: None,
        }))?;
        self.add_holder(disk, sid, HolderKind::Subdevice)?;
        Ok(sid)
    }

    /// Partitions of a disk sorted by number
    pub fn partitions(&self, disk: Sid) -> Result<Vec<Sid>> {
        self.expect_kind(disk, Device::as_disk, "Disk")?;

        let mut partitions: Vec<(u32, Sid)> = self
            .children_of_kind(disk, HolderKind::Subdevice)?
            .into_iter()
            .filter_map(|sid| {
                self.find_device(sid)
                    .ok()
                    .and_then(|d| d.as_partition())
                    .map(|p| (p.number, sid))
            })
            .collect();

        partitions.sort_unstable();
        Ok(partitions.into_iter().map(|(_, sid)| sid).collect())
    }

    /// Partition must sit inside its disk and not overlap a sibling
    pub(crate) fn check_partition(&self, sid: Sid) -> Result<()> {
        let partition = self.expect_kind(sid, Device::as_partition, "Partition")?;

        let parents = self.parents(sid)?;
        let disk = match parents.as_slice() {
            [disk] => self.expect_kind(*disk, Device::as_disk, "Disk")?,
            _ => {
                return Err(StorageError::check(format!(
                    "partition {} has no single disk parent",
                    partition.blk.name
                )))
            }
        };

        if !disk.blk.region.contains(&partition.blk.region)? {
            return Err(StorageError::check(format!(
                "partition {} is outside of disk {}",
                partition.blk.name, disk.blk.name
            )));
        }

        for sibling in self.partitions(parents[0])? {
            if sibling == sid {
                continue;
            }
            let other = self.expect_kind(sibling, Device::as_partition, "Partition")?;
            if other.partition_type == PartitionType::Extended
                || partition.partition_type == PartitionType::Extended
            {
                continue;
            }
            if other.blk.region.overlaps(&partition.blk.region)? {
                return Err(StorageError::check(format!(
                    "partitions {} and {} overlap",
                    partition.blk.name, other.blk.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_detection() {
        assert_eq!(Transport::from_kernel_name("sda"), Transport::Sata);
        assert_eq!(Transport::from_kernel_name("nvme0n1"), Transport::Nvme);
        assert_eq!(Transport::from_kernel_name("vda"), Transport::Virtual);
        assert_eq!(Transport::from_kernel_name("mmcblk0"), Transport::Mmc);
        assert_eq!(Transport::from_kernel_name("dasda"), Transport::Unknown);
    }

    #[test]
    fn test_partition_number_from_name() {
        assert_eq!(Partition::number_from_name("/dev/sda1"), Some(1));
        assert_eq!(Partition::number_from_name("sda12"), Some(12));
        assert_eq!(Partition::number_from_name("/dev/nvme0n1p2"), Some(2));
        assert_eq!(Partition::number_from_name("mmcblk0p7"), Some(7));
        assert_eq!(Partition::number_from_name("/dev/sda"), None);
    }

    #[test]
    fn test_partitions_sorted_by_number() {
        let mut graph = Devicegraph::new();
        let sda = graph.create_disk("/dev/sda", Region::new(0, 100_000, 512).unwrap()).unwrap();
        let sda2 = graph
            .create_partition(sda, "/dev/sda2", Region::new(50_000, 10_000, 512).unwrap())
            .unwrap();
        let sda1 = graph
            .create_partition(sda, "/dev/sda1", Region::new(2048, 10_000, 512).unwrap())
            .unwrap();

        assert_eq!(graph.partitions(sda).unwrap(), vec![sda1, sda2]);
        graph.check().unwrap();
    }

    #[test]
    fn test_partition_outside_disk_rejected() {
        let mut graph = Devicegraph::new();
        let sda = graph.create_disk("/dev/sda", Region::new(0, 1000, 512).unwrap()).unwrap();
        let err = graph
            .create_partition(sda, "/dev/sda1", Region::new(900, 200, 512).unwrap())
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidRegion(_)));
    }

    #[test]
    fn test_overlapping_partitions_fail_check() {
        let mut graph = Devicegraph::new();
        let sda = graph.create_disk("/dev/sda", Region::new(0, 100_000, 512).unwrap()).unwrap();
        graph
            .create_partition(sda, "/dev/sda1", Region::new(2048, 10_000, 512).unwrap())
            .unwrap();
        graph
            .create_partition(sda, "/dev/sda2", Region::new(10_000, 10_000, 512).unwrap())
            .unwrap();

        let err = graph.check().unwrap_err();
        assert!(err.to_string().contains("overlap"));
    }

    #[test]
    fn test_partition_on_non_disk_rejected() {
        let mut graph = Devicegraph::new();
        let md = graph.create_md("/dev/md0").unwrap();
        let err = graph
            .create_partition(md, "/dev/md0p1", Region::new(0, 10, 512).unwrap())
            .unwrap_err();
        assert!(matches!(err, StorageError::WrongDeviceType { .. }));
    }
}
