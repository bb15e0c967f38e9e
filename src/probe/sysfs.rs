//! Reading block devices from sysfs
//!
//! Whole devices are listed below `<sysfs>/block`, their partitions are
//! subdirectories carrying a `partition` attribute.

use super::{blkid, BlkidEntry, BlockEntry, SystemInfo};
use crate::error::{Result, StorageError};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// [`SystemInfo`] backed by sysfs and blkid
#[derive(Debug, Clone)]
pub struct SysfsSystemInfo {
    sysfs_root: PathBuf,
    dev_root: PathBuf,
}

impl SysfsSystemInfo {
    pub fn new(sysfs_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            dev_root: dev_root.into(),
        }
    }

    /// Read one whole device and its partitions
    fn read_device(&self, root: &Path, dir: &Path, name: &str) -> Result<Vec<BlockEntry>> {
        let mut entry = Self::read_entry(root, dir, name)?;

        entry.logical_block_size = read_attr(dir, "queue/logical_block_size")
            .and_then(|v| v.parse().ok())
            .unwrap_or(512);
        entry.removable = read_flag(dir, "removable", false);
        entry.read_only = read_flag(dir, "ro", false);
        entry.rotational = read_flag(dir, "queue/rotational", true);
        entry.model = read_attr(dir, "device/model");
        entry.serial = read_attr(dir, "device/serial");

        if dir.join("md").is_dir() {
            entry.md_level = read_attr(dir, "md/level");
            entry.md_uuid = read_attr(dir, "md/uuid");
            entry.md_chunk_size = read_attr(dir, "md/chunk_size").and_then(|v| v.parse().ok());
            entry.md_metadata = read_attr(dir, "md/metadata_version");
        }
        if dir.join("dm").is_dir() {
            entry.dm_name = read_attr(dir, "dm/name");
            entry.dm_uuid = read_attr(dir, "dm/uuid");
        }

        let mut entries = vec![];
        for part in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let part = part.map_err(|e| StorageError::SystemError(e.to_string()))?;
            let part_dir = part.path();
            if !part.file_type().is_dir() || !part_dir.join("partition").is_file() {
                continue;
            }

            let part_name = part.file_name().to_string_lossy().to_string();
            match Self::read_entry(root, part_dir, &part_name) {
                Ok(mut part_entry) => {
                    part_entry.parent = Some(name.to_string());
                    part_entry.logical_block_size = entry.logical_block_size;
                    part_entry.start = read_attr(part_dir, "start")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(0);
                    entries.push(part_entry);
                }
                Err(e) => log::debug!("Failed to read partition {}: {}", part_name, e),
            }
        }

        entries.push(entry);
        Ok(entries)
    }

    /// Attributes shared by whole devices and partitions
    fn read_entry(root: &Path, dir: &Path, name: &str) -> Result<BlockEntry> {
        let size = read_attr(dir, "size")
            .ok_or_else(|| StorageError::SystemError(format!("{} has no size", name)))?
            .parse::<u64>()
            .map_err(|e| StorageError::parse(e.to_string()))?;

        let sysfs_path = fs::canonicalize(dir)
            .ok()
            .and_then(|real| real.strip_prefix(root).ok().map(Path::to_path_buf))
            .map(|relative| format!("/{}", relative.display()))
            .unwrap_or_else(|| format!("/block/{}", name));

        let holders = match fs::read_dir(dir.join("holders")) {
            Ok(holders) => {
                let mut holders: Vec<String> = holders
                    .flatten()
                    .map(|h| h.file_name().to_string_lossy().to_string())
                    .collect();
                holders.sort();
                holders
            }
            Err(_) => vec![],
        };

        Ok(BlockEntry {
            name: name.to_string(),
            sysfs_path,
            size,
            major_minor: read_attr(dir, "dev").and_then(|v| parse_major_minor(&v)),
            holders,
            ..Default::default()
        })
    }
}

impl Default for SysfsSystemInfo {
    fn default() -> Self {
        Self::new("/sys", "/dev")
    }
}

impl SystemInfo for SysfsSystemInfo {
    fn block_entries(&self) -> Result<Vec<BlockEntry>> {
        let block_dir = self.sysfs_root.join("block");
        if !block_dir.exists() {
            return Err(StorageError::SystemError(format!(
                "{} not found - are you on Linux?",
                block_dir.display()
            )));
        }
        let root = fs::canonicalize(&self.sysfs_root)?;

        let mut entries = vec![];
        for device in WalkDir::new(&block_dir).min_depth(1).max_depth(1) {
            let device = device.map_err(|e| StorageError::SystemError(e.to_string()))?;
            let name = device.file_name().to_string_lossy().to_string();

            match self.read_device(&root, device.path(), &name) {
                Ok(mut device_entries) => entries.append(&mut device_entries),
                Err(e) => log::debug!("Failed to read device {}: {}", name, e),
            }
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        log::debug!("Read {} block entries from {}", entries.len(), block_dir.display());
        Ok(entries)
    }

    fn blkid(&self, name: &str) -> Result<Option<BlkidEntry>> {
        blkid::probe_device(&self.dev_root.join(name))
    }
}

fn read_attr(dir: &Path, attr: &str) -> Option<String> {
    fs::read_to_string(dir.join(attr))
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn read_flag(dir: &Path, attr: &str, default: bool) -> bool {
    read_attr(dir, attr).map_or(default, |v| v == "1")
}

/// Parse the `dev` attribute ("8:0")
fn parse_major_minor(value: &str) -> Option<(u32, u32)> {
    let (major, minor) = value.split_once(':')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}
