//! Probing: building a devicegraph from the running system
//!
//! The [`SystemInfo`] trait is the seam between the prober and the system. The
//! default implementation reads sysfs and runs blkid; tests use a mock.

pub mod blkid;
pub mod hotplug;
pub mod sysfs;
#[cfg(feature = "udev")]
pub mod udev;

pub use blkid::BlkidEntry;
pub use hotplug::{HotplugEvent, HotplugMonitor};
pub use sysfs::SysfsSystemInfo;
#[cfg(feature = "udev")]
pub use self::udev::UdevSystemInfo;

use crate::devicegraph::Devicegraph;
use crate::devices::{DeviceKind, MdLevel, Region, Sid};
use crate::error::Result;
use crate::filesystems::FsType;
use crate::holders::HolderKind;
use std::collections::HashMap;

/// sysfs reports sizes and offsets in 512-byte sectors
pub const SYSFS_SECTOR_SIZE: u64 = 512;

/// One entry below /sys/block, whole device or partition
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlockEntry {
    /// Kernel name (e.g., sda, sda1, dm-0, md127)
    pub name: String,
    /// Path below the sysfs root (e.g., /devices/virtual/block/dm-0)
    pub sysfs_path: String,
    /// Kernel name of the disk for partitions
    pub parent: Option<String>,
    /// First sector for partitions
    pub start: u64,
    /// Size in 512-byte sectors
    pub size: u64,
    pub logical_block_size: u32,
    pub major_minor: Option<(u32, u32)>,
    pub removable: bool,
    pub read_only: bool,
    pub rotational: bool,
    pub model: Option<String>,
    pub serial: Option<String>,
    /// Kernel names of devices holding this one (md arrays, dm mappings)
    pub holders: Vec<String>,
    pub md_level: Option<String>,
    pub md_uuid: Option<String>,
    pub md_chunk_size: Option<u64>,
    pub md_metadata: Option<String>,
    pub dm_name: Option<String>,
    pub dm_uuid: Option<String>,
}

impl BlockEntry {
    pub fn is_partition(&self) -> bool {
        self.parent.is_some()
    }

    pub fn is_md(&self) -> bool {
        self.md_level.is_some()
    }

    pub fn is_luks(&self) -> bool {
        self.dm_uuid
            .as_deref()
            .map_or(false, |uuid| uuid.starts_with("CRYPT-LUKS"))
    }

    /// Entries that never carry storage worth modelling
    fn is_ignored(&self) -> bool {
        self.size == 0
            || ["loop", "ram", "sr", "zram", "fd"]
                .iter()
                .any(|prefix| self.name.starts_with(prefix))
    }

    /// Region in logical blocks, converted from sysfs sectors
    fn region(&self) -> Result<Region> {
        let block_size = if self.logical_block_size == 0 {
            SYSFS_SECTOR_SIZE as u32
        } else {
            self.logical_block_size
        };
        let per_block = u64::from(block_size) / SYSFS_SECTOR_SIZE;
        let per_block = per_block.max(1);

        Region::new(self.start / per_block, self.size / per_block, block_size)
    }
}

/// Source of system information for probing
#[cfg_attr(test, mockall::automock)]
pub trait SystemInfo {
    /// All block devices and partitions known to the kernel
    fn block_entries(&self) -> Result<Vec<BlockEntry>>;

    /// Signature found on a device (kernel name, e.g. sda1), None if there is none
    fn blkid(&self, name: &str) -> Result<Option<BlkidEntry>>;
}

/// Builds a devicegraph from a [`SystemInfo`]
pub struct Prober<'a> {
    system_info: &'a dyn SystemInfo,
}

impl<'a> Prober<'a> {
    pub fn new(system_info: &'a dyn SystemInfo) -> Self {
        Self { system_info }
    }

    /// Probe the system
    pub fn probe(&self) -> Result<Devicegraph> {
        log::info!("Probing block devices");

        let mut entries = self.system_info.block_entries()?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut graph = Devicegraph::new();
        let mut sids: HashMap<String, Sid> = HashMap::new();

        self.probe_disks_and_mds(&mut graph, &mut sids, &entries)?;
        self.probe_partitions(&mut graph, &mut sids, &entries)?;
        self.probe_lukses(&mut graph, &mut sids, &entries)?;
        self.probe_md_members(&mut graph, &sids, &entries)?;
        self.probe_filesystems(&mut graph, &sids, &entries)?;

        log::info!(
            "Probed {} devices and {} holders",
            graph.num_devices(),
            graph.num_holders()
        );
        Ok(graph)
    }

    fn probe_disks_and_mds(
        &self,
        graph: &mut Devicegraph,
        sids: &mut HashMap<String, Sid>,
        entries: &[BlockEntry],
    ) -> Result<()> {
        for entry in entries.iter().filter(|e| !e.is_partition()) {
            if entry.is_ignored() {
                log::debug!("Skipping {}", entry.name);
                continue;
            }

            let sid = if entry.is_md() {
                let sid = graph.create_md(&format!("/dev/{}", entry.name))?;
                if let Some(md) = graph.find_device_mut(sid)?.as_md_mut() {
                    md.level = MdLevel::from_sysfs(entry.md_level.as_deref().unwrap_or_default());
                    md.chunk_size = entry.md_chunk_size.unwrap_or(0);
                    md.uuid = entry.md_uuid.clone();
                    md.metadata = entry.md_metadata.clone();
                }
                sid
            } else if entry.name.starts_with("dm-") {
                // LUKS mappings need their parents first; other dm targets are not modelled
                if !entry.is_luks() {
                    log::debug!("Skipping non-LUKS device mapper device {}", entry.name);
                }
                continue;
            } else {
                let sid = graph.create_disk(&format!("/dev/{}", entry.name), entry.region()?)?;
                if let DeviceKind::Disk(disk) = graph.find_device_mut(sid)?.kind_mut() {
                    disk.rotational = entry.rotational;
                    disk.removable = entry.removable;
                    disk.read_only = entry.read_only;
                    disk.model = entry.model.clone();
                    disk.serial = entry.serial.clone();
                    if entry.removable && disk.transport == crate::devices::Transport::Sata {
                        disk.transport = crate::devices::Transport::Usb;
                    }
                }
                sid
            };

            Self::apply_sysfs(graph, sid, entry)?;
            sids.insert(entry.name.clone(), sid);
        }
        Ok(())
    }

    fn probe_partitions(
        &self,
        graph: &mut Devicegraph,
        sids: &mut HashMap<String, Sid>,
        entries: &[BlockEntry],
    ) -> Result<()> {
        for entry in entries.iter().filter(|e| e.is_partition()) {
            let Some(parent) = entry.parent.as_ref().and_then(|p| sids.get(p)).copied() else {
                log::debug!("Skipping partition {} of unknown disk", entry.name);
                continue;
            };
            if graph.find_device(parent)?.as_disk().is_none() {
                log::debug!("Skipping partition {} of non-disk device", entry.name);
                continue;
            }

            match graph.create_partition(parent, &format!("/dev/{}", entry.name), entry.region()?) {
                Ok(sid) => {
                    Self::apply_sysfs(graph, sid, entry)?;
                    sids.insert(entry.name.clone(), sid);
                }
                Err(e) => log::warn!("Ignoring partition {}: {}", entry.name, e),
            }
        }
        Ok(())
    }

    /// LUKS mappings may stack, so repeat until no more can be placed
    fn probe_lukses(
        &self,
        graph: &mut Devicegraph,
        sids: &mut HashMap<String, Sid>,
        entries: &[BlockEntry],
    ) -> Result<()> {
        let mut pending: Vec<&BlockEntry> = entries.iter().filter(|e| e.is_luks()).collect();

        loop {
            let before = pending.len();
            let mut still_pending = Vec::new();

            for entry in pending {
                let parent = entries
                    .iter()
                    .find(|e| e.holders.contains(&entry.name))
                    .and_then(|e| sids.get(&e.name).map(|sid| (e, *sid)));

                let Some((parent_entry, parent_sid)) = parent else {
                    still_pending.push(entry);
                    continue;
                };

                let dm_name = entry.dm_name.clone().unwrap_or_else(|| entry.name.clone());
                let sid = graph.create_luks(parent_sid, &dm_name)?;
                Self::apply_sysfs(graph, sid, entry)?;

                if let Some(blkid) = self.signature(&parent_entry.name) {
                    if blkid.is_luks() {
                        if let Some(uuid) = blkid.uuid.as_deref() {
                            if let Err(e) = graph.set_luks_uuid(sid, uuid) {
                                log::warn!("Ignoring luks uuid of {}: {}", parent_entry.name, e);
                            }
                        }
                    }
                }

                sids.insert(entry.name.clone(), sid);
            }

            if still_pending.is_empty() {
                return Ok(());
            }
            if still_pending.len() == before {
                for entry in still_pending {
                    log::warn!("No parent found for LUKS device {}", entry.name);
                }
                return Ok(());
            }
            pending = still_pending;
        }
    }

    fn probe_md_members(
        &self,
        graph: &mut Devicegraph,
        sids: &HashMap<String, Sid>,
        entries: &[BlockEntry],
    ) -> Result<()> {
        for entry in entries {
            let Some(&member) = sids.get(&entry.name) else {
                continue;
            };

            for holder in &entry.holders {
                let Some(&md) = sids.get(holder) else {
                    continue;
                };
                if graph.find_device(md)?.as_md().is_some() {
                    graph.md_add_device(md, member)?;
                }
            }
        }

        // Size from the kernel is authoritative over the level-based estimate
        for entry in entries.iter().filter(|e| e.is_md()) {
            if let Some(&md) = sids.get(&entry.name) {
                Self::apply_sysfs(graph, md, entry)?;
            }
        }
        Ok(())
    }

    fn probe_filesystems(
        &self,
        graph: &mut Devicegraph,
        sids: &HashMap<String, Sid>,
        entries: &[BlockEntry],
    ) -> Result<()> {
        let mut btrfs_by_uuid: HashMap<String, Sid> = HashMap::new();

        for entry in entries {
            let Some(&sid) = sids.get(&entry.name) else {
                continue;
            };
            if !graph.children(sid)?.is_empty() {
                continue;
            }

            let Some(blkid) = self.signature(&entry.name) else {
                continue;
            };
            let Some(fs_type) = blkid.fs_type.as_deref() else {
                continue;
            };
            if blkid.is_luks() || fs_type == "linux_raid_member" {
                continue;
            }

            let fs_type = FsType::from_blkid(fs_type);
            log::debug!("Found {} on {}", fs_type, entry.name);

            if fs_type == FsType::Btrfs {
                if let Some(&btrfs) = blkid.uuid.as_ref().and_then(|u| btrfs_by_uuid.get(u)) {
                    graph.add_holder(sid, btrfs, HolderKind::FilesystemUser)?;
                    continue;
                }
            }

            let filesystem = graph.create_filesystem(sid, fs_type.clone())?;
            graph.set_filesystem_identity(filesystem, blkid.uuid.clone(), blkid.label.clone())?;

            if fs_type == FsType::Btrfs {
                if let Some(uuid) = blkid.uuid {
                    btrfs_by_uuid.insert(uuid, filesystem);
                }
            }
        }
        Ok(())
    }

    /// A device whose signature cannot be read is treated as unformatted
    fn signature(&self, name: &str) -> Option<BlkidEntry> {
        match self.system_info.blkid(name) {
            Ok(blkid) => blkid,
            Err(e) => {
                log::warn!("blkid failed on {}: {}", name, e);
                None
            }
        }
    }

    fn apply_sysfs(graph: &mut Devicegraph, sid: Sid, entry: &BlockEntry) -> Result<()> {
        let region = entry.region()?;
        if let Some(blk) = graph.find_device_mut(sid)?.blk_mut() {
            blk.region = region;
            blk.sysfs_name = entry.name.clone();
            blk.sysfs_path = entry.sysfs_path.clone();
            blk.major_minor = entry.major_minor;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::BlkDevice;
    use crate::error::StorageError;
    use pretty_assertions::assert_eq;

    const GIB_SECTORS: u64 = 2 * 1024 * 1024;

    fn disk(name: &str, sectors: u64) -> BlockEntry {
        BlockEntry {
            name: name.to_string(),
            sysfs_path: format!("/devices/pci0000:00/block/{}", name),
            size: sectors,
            logical_block_size: 512,
            ..Default::default()
        }
    }

    fn partition(name: &str, parent: &str, start: u64, sectors: u64) -> BlockEntry {
        BlockEntry {
            name: name.to_string(),
            parent: Some(parent.to_string()),
            start,
            size: sectors,
            logical_block_size: 512,
            ..Default::default()
        }
    }

    fn blkid(fs_type: &str, uuid: &str) -> Option<BlkidEntry> {
        Some(BlkidEntry {
            fs_type: Some(fs_type.to_string()),
            uuid: Some(uuid.to_string()),
            label: None,
        })
    }

    fn probe(entries: Vec<BlockEntry>, signatures: Vec<(&'static str, Option<BlkidEntry>)>) -> Devicegraph {
        let mut system_info = MockSystemInfo::new();
        system_info
            .expect_block_entries()
            .returning(move || Ok(entries.clone()));
        let signatures: HashMap<&'static str, Option<BlkidEntry>> = signatures.into_iter().collect();
        system_info
            .expect_blkid()
            .returning(move |name| Ok(signatures.get(name).cloned().flatten()));

        Prober::new(&system_info).probe().unwrap()
    }

    #[test]
    fn test_disks_and_partitions() {
        let graph = probe(
            vec![
                disk("sda", 100 * GIB_SECTORS),
                partition("sda1", "sda", 2048, GIB_SECTORS),
                partition("sda2", "sda", 2048 + GIB_SECTORS, 10 * GIB_SECTORS),
                disk("loop0", 1000),
                disk("sr0", 0),
            ],
            vec![("sda1", blkid("vfat", "ABCD-1234"))],
        );

        let names: Vec<&str> = BlkDevice::get_all(&graph).iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["/dev/sda", "/dev/sda1", "/dev/sda2"]);

        let sda1 = BlkDevice::find_by_name(&graph, "/dev/sda1").unwrap();
        assert_eq!(sda1.region().start(), 2048);
        assert_eq!(sda1.sysfs_name(), "sda1");
        let vfat = sda1.filesystem().unwrap().unwrap();
        assert_eq!(graph.display_name(vfat).unwrap(), "vfat on /dev/sda1");

        graph.check().unwrap();
    }

    #[test]
    fn test_md_with_members() {
        let mut sdb = disk("sdb", 10 * GIB_SECTORS);
        sdb.holders = vec!["md127".to_string()];
        let mut sdc = disk("sdc", 10 * GIB_SECTORS);
        sdc.holders = vec!["md127".to_string()];
        let mut md = disk("md127", 10 * GIB_SECTORS - 4096);
        md.md_level = Some("raid1".to_string());
        md.md_metadata = Some("1.2".to_string());

        let graph = probe(vec![sdb, sdc, md], vec![("md127", blkid("xfs", "u-1"))]);

        let md = BlkDevice::find_by_name(&graph, "/dev/md127").unwrap();
        assert_eq!(graph.md_devices(md.sid()).unwrap().len(), 2);
        assert_eq!(md.size(), (10 * GIB_SECTORS - 4096) * 512);
        assert_eq!(md.device().as_md().unwrap().level, MdLevel::Raid1);
        assert!(md.filesystem().unwrap().is_some());
        graph.check().unwrap();
    }

    #[test]
    fn test_luks_on_partition() {
        let mut sda2 = partition("sda2", "sda", 4096, 20 * GIB_SECTORS);
        sda2.holders = vec!["dm-0".to_string()];
        let mut dm0 = disk("dm-0", 20 * GIB_SECTORS - 4096);
        dm0.dm_name = Some("cr_root".to_string());
        dm0.dm_uuid = Some("CRYPT-LUKS2-2b4c7e6e3c9a4f4b8c430f4a1d3d1e11-cr_root".to_string());
        dm0.major_minor = Some((254, 0));

        let graph = probe(
            vec![disk("sda", 100 * GIB_SECTORS), sda2, dm0],
            vec![
                ("sda2", blkid("crypto_LUKS", "2b4c7e6e-3c9a-4f4b-8c43-0f4a1d3d1e11")),
                ("dm-0", blkid("btrfs", "fs-uuid-1")),
            ],
        );

        let luks = BlkDevice::find_by_name(&graph, "/dev/mapper/cr_root").unwrap();
        let data = luks.device().as_luks().unwrap();
        assert_eq!(data.uuid.as_deref(), Some("2b4c7e6e-3c9a-4f4b-8c43-0f4a1d3d1e11"));
        assert_eq!(luks.sysfs_name(), "dm-0");
        assert_eq!(luks.device().blk().unwrap().major_minor, Some((254, 0)));

        let btrfs = luks.filesystem().unwrap().unwrap();
        assert_eq!(graph.display_name(btrfs).unwrap(), "btrfs on /dev/mapper/cr_root");
        graph.check().unwrap();
    }

    #[test]
    fn test_multi_device_btrfs() {
        let graph = probe(
            vec![disk("sdb", GIB_SECTORS), disk("sdc", GIB_SECTORS)],
            vec![
                ("sdb", blkid("btrfs", "same-uuid")),
                ("sdc", blkid("btrfs", "same-uuid")),
            ],
        );

        let sdb = BlkDevice::find_by_name(&graph, "/dev/sdb").unwrap();
        let sdc = BlkDevice::find_by_name(&graph, "/dev/sdc").unwrap();
        assert_eq!(sdb.filesystem().unwrap(), sdc.filesystem().unwrap());

        let btrfs = sdb.filesystem().unwrap().unwrap();
        assert_eq!(graph.display_name(btrfs).unwrap(), "btrfs on /dev/sdb, /dev/sdc");
        graph.check().unwrap();
    }

    #[test]
    fn test_luks_without_parent_is_skipped() {
        let mut dm0 = disk("dm-0", GIB_SECTORS);
        dm0.dm_uuid = Some("CRYPT-LUKS2-abc-cr_orphan".to_string());

        let graph = probe(vec![dm0], vec![]);
        assert!(graph.is_empty());
    }

    #[test]
    fn test_blkid_failure_leaves_device_unformatted() {
        let mut system_info = MockSystemInfo::new();
        system_info
            .expect_block_entries()
            .returning(|| Ok(vec![disk("sda", GIB_SECTORS), disk("sdb", GIB_SECTORS)]));
        system_info.expect_blkid().returning(|name| match name {
            "sda" => Ok(blkid("ext4", "u-1")),
            _ => Err(StorageError::CommandFailed {
                cmd: format!("blkid /dev/{}", name),
                code: 8,
                stderr: "ambivalent result".to_string(),
            }),
        });

        let graph = Prober::new(&system_info).probe().unwrap();

        let sda = BlkDevice::find_by_name(&graph, "/dev/sda").unwrap();
        assert!(sda.filesystem().unwrap().is_some());
        let sdb = BlkDevice::find_by_name(&graph, "/dev/sdb").unwrap();
        assert!(sdb.filesystem().unwrap().is_none());
        graph.check().unwrap();
    }

    #[test]
    fn test_region_uses_logical_block_size() {
        let mut entry = disk("nvme0n1", 8 * 1000);
        entry.logical_block_size = 4096;
        let region = entry.region().unwrap();
        assert_eq!(region.length(), 1000);
        assert_eq!(region.block_size(), 4096);
        assert_eq!(region.size_bytes(), 8 * 1000 * 512);
    }
}
