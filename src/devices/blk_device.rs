//! Block device lookup
//!
//! [`BlkDevice`] is a borrowed handle onto a block device node of a
//! [`Devicegraph`]. Lookups by name are the usual entry point:
//!
//! ```rust
//! use blkgraph::{BlkDevice, Devicegraph};
//!
//! let device_graph = Devicegraph::new();
//!
//! match BlkDevice::find_by_name(&device_graph, "/dev/sda") {
//!     Ok(device) => println!("{}", device.display_name()),
//!     Err(e) if e.is_device_not_found() => println!("device not found"),
//!     Err(e) => panic!("{}", e),
//! }
//!
//! println!("done");
//! ```

use super::{BlkInfo, Device, Region, Sid};
use crate::devicegraph::Devicegraph;
use crate::error::{Result, StorageError};
use crate::holders::HolderKind;
use std::path::Path;

/// Handle onto a block device in a devicegraph
#[derive(Debug, Clone, Copy)]
pub struct BlkDevice<'g> {
    graph: &'g Devicegraph,
    device: &'g Device,
    blk: &'g BlkInfo,
}

impl<'g> BlkDevice<'g> {
    /// Wrap the device with the given sid; fails if it is not a block device
    pub fn from_sid(graph: &'g Devicegraph, sid: Sid) -> Result<Self> {
        let device = graph.find_device(sid)?;
        let blk = device.blk().ok_or(StorageError::WrongDeviceType {
            sid,
            expected: "BlkDevice",
        })?;

        Ok(Self { graph, device, blk })
    }

    /// Find a block device by its kernel name (e.g., /dev/sda)
    pub fn find_by_name(graph: &'g Devicegraph, name: &str) -> Result<Self> {
        graph
            .devices()
            .into_iter()
            .find(|device| device.blk().map_or(false, |blk| blk.name == name))
            .map(|device| Self::from_sid(graph, device.sid()))
            .unwrap_or_else(|| Err(StorageError::DeviceNotFoundByName(name.to_string())))
    }

    /// Find a block device by kernel name or by any path resolving to the same
    /// device node (e.g., /dev/disk/by-id/... links)
    pub fn find_by_any_name(graph: &'g Devicegraph, name: &str) -> Result<Self> {
        match Self::find_by_name(graph, name) {
            Err(e) if e.is_device_not_found() => {}
            other => return other,
        }

        let Some(major_minor) = crate::system::device_number(Path::new(name)) else {
            return Err(StorageError::DeviceNotFoundByName(name.to_string()));
        };
        log::debug!("{} is device {}:{}", name, major_minor.0, major_minor.1);

        match Self::find_by_device_number(graph, major_minor) {
            Err(e) if e.is_device_not_found() => {
                Err(StorageError::DeviceNotFoundByName(name.to_string()))
            }
            other => other,
        }
    }

    /// Find a block device by the major:minor number of its node
    pub fn find_by_device_number(graph: &'g Devicegraph, major_minor: (u32, u32)) -> Result<Self> {
        graph
            .devices()
            .into_iter()
            .find(|device| device.blk().map_or(false, |blk| blk.major_minor == Some(major_minor)))
            .map(|device| Self::from_sid(graph, device.sid()))
            .unwrap_or_else(|| {
                Err(StorageError::DeviceNotFoundByName(format!(
                    "{}:{}",
                    major_minor.0, major_minor.1
                )))
            })
    }

    /// All block devices of the graph, sorted by name
    pub fn get_all(graph: &'g Devicegraph) -> Vec<Self> {
        let mut all: Vec<Self> = graph
            .devices()
            .into_iter()
            .filter_map(|device| Self::from_sid(graph, device.sid()).ok())
            .collect();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    pub fn sid(&self) -> Sid {
        self.device.sid()
    }

    pub fn device(&self) -> &'g Device {
        self.device
    }

    pub fn name(&self) -> &'g str {
        &self.blk.name
    }

    /// Size in bytes
    pub fn size(&self) -> u64 {
        self.blk.size()
    }

    pub fn region(&self) -> Region {
        self.blk.region
    }

    pub fn sysfs_name(&self) -> &'g str {
        &self.blk.sysfs_name
    }

    pub fn sysfs_path(&self) -> &'g str {
        &self.blk.sysfs_path
    }

    /// Get human-readable size
    pub fn size_human(&self) -> String {
        self.blk.size_human()
    }

    /// Get a display name for the device
    pub fn display_name(&self) -> String {
        self.device.display_name()
    }

    /// Direct children, sorted by sid
    pub fn children(&self) -> Result<Vec<Sid>> {
        self.graph.children(self.sid())
    }

    /// Devices built on this one that are not filesystems (partitions, md, luks)
    pub fn users(&self) -> Result<Vec<Sid>> {
        Ok(self
            .children()?
            .into_iter()
            .filter(|sid| {
                !matches!(
                    self.graph.find_holder(self.sid(), *sid).map(|h| h.kind),
                    Ok(HolderKind::FilesystemUser)
                )
            })
            .collect())
    }

    /// Filesystem on this device, if any
    pub fn filesystem(&self) -> Result<Option<Sid>> {
        self.graph.filesystem_of(self.sid())
    }

    /// True if nothing is built on top of the device
    pub fn is_unused(&self) -> Result<bool> {
        Ok(self.children()?.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystems::FsType;

    fn graph() -> Devicegraph {
        let mut graph = Devicegraph::new();
        let sda = graph.create_disk("/dev/sda", Region::new(0, 1_000_000, 512).unwrap()).unwrap();
        let sda1 = graph
            .create_partition(sda, "/dev/sda1", Region::new(2048, 100_000, 512).unwrap())
            .unwrap();
        graph.create_filesystem(sda1, FsType::Ext4).unwrap();
        graph
    }

    #[test]
    fn test_find_by_name() {
        let graph = graph();
        let device = BlkDevice::find_by_name(&graph, "/dev/sda1").unwrap();
        assert_eq!(device.name(), "/dev/sda1");
        assert_eq!(device.size(), 100_000 * 512);
        assert!(device.display_name().starts_with("/dev/sda1 - "));
    }

    #[test]
    fn test_find_by_name_not_found() {
        let graph = graph();
        let err = BlkDevice::find_by_name(&graph, "/dev/sdz").unwrap_err();
        assert!(matches!(err, StorageError::DeviceNotFoundByName(ref n) if n == "/dev/sdz"));
        assert!(err.is_device_not_found());
    }

    #[test]
    fn test_empty_graph_has_no_devices() {
        let graph = Devicegraph::new();
        let err = BlkDevice::find_by_name(&graph, "/dev/sda").unwrap_err();
        assert!(err.is_device_not_found());
    }

    #[test]
    fn test_find_by_any_name_falls_back() {
        let graph = graph();
        assert!(BlkDevice::find_by_any_name(&graph, "/dev/sda").is_ok());

        let err = BlkDevice::find_by_any_name(&graph, "/nonexistent/by-id/link").unwrap_err();
        assert!(err.is_device_not_found());
    }

    #[test]
    fn test_find_by_device_number() {
        let mut graph = graph();
        let sda1 = BlkDevice::find_by_name(&graph, "/dev/sda1").unwrap().sid();
        graph.find_device_mut(sda1).unwrap().blk_mut().unwrap().major_minor = Some((8, 1));

        let device = BlkDevice::find_by_device_number(&graph, (8, 1)).unwrap();
        assert_eq!(device.sid(), sda1);
        assert_eq!(device.name(), "/dev/sda1");

        let err = BlkDevice::find_by_device_number(&graph, (8, 2)).unwrap_err();
        assert!(matches!(err, StorageError::DeviceNotFoundByName(ref n) if n == "8:2"));
    }

    #[test]
    fn test_non_blk_device_rejected() {
        let graph = graph();
        let sda1 = BlkDevice::find_by_name(&graph, "/dev/sda1").unwrap();
        let ext4 = sda1.filesystem().unwrap().unwrap();

        let err = BlkDevice::from_sid(&graph, ext4).unwrap_err();
        assert!(matches!(err, StorageError::WrongDeviceType { .. }));
    }

    #[test]
    fn test_users_exclude_filesystems() {
        let graph = graph();
        let sda = BlkDevice::find_by_name(&graph, "/dev/sda").unwrap();
        let sda1 = BlkDevice::find_by_name(&graph, "/dev/sda1").unwrap();

        assert_eq!(sda.users().unwrap(), vec![sda1.sid()]);
        assert!(sda1.users().unwrap().is_empty());
        assert!(!sda1.is_unused().unwrap());
    }

    #[test]
    fn test_get_all_sorted() {
        let graph = graph();
        let names: Vec<&str> = BlkDevice::get_all(&graph).iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["/dev/sda", "/dev/sda1"]);
    }
}
