//! Signatures from the udev database instead of running blkid

use super::{BlkidEntry, BlockEntry, SysfsSystemInfo, SystemInfo};
use crate::error::Result;
use std::ffi::OsStr;

/// [`SystemInfo`] reading block entries from sysfs and signatures from udev
#[derive(Debug, Clone, Default)]
pub struct UdevSystemInfo {
    sysfs: SysfsSystemInfo,
}

impl UdevSystemInfo {
    pub fn new(sysfs: SysfsSystemInfo) -> Self {
        Self { sysfs }
    }
}

impl SystemInfo for UdevSystemInfo {
    fn block_entries(&self) -> Result<Vec<BlockEntry>> {
        self.sysfs.block_entries()
    }

    fn blkid(&self, name: &str) -> Result<Option<BlkidEntry>> {
        let device = match ::udev::Device::from_subsystem_sysname("block".to_string(), name.to_string()) {
            Ok(device) => device,
            Err(e) => {
                log::debug!("udev has no {}, falling back to blkid: {}", name, e);
                return self.sysfs.blkid(name);
            }
        };

        let property = |key: &str| {
            device
                .property_value(key)
                .map(OsStr::to_string_lossy)
                .map(|v| v.to_string())
                .filter(|v| !v.is_empty())
        };

        let entry = BlkidEntry {
            fs_type: property("ID_FS_TYPE"),
            uuid: property("ID_FS_UUID"),
            label: property("ID_FS_LABEL"),
        };
        Ok(entry.fs_type.is_some().then_some(entry))
    }
}
