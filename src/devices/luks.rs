//! LUKS encrypted block devices

use super::{BlkInfo, Device, DeviceKind, Region, Sid};
use crate::devicegraph::Devicegraph;
use crate::error::{Result, StorageError};
use crate::holders::HolderKind;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Space taken by the LUKS header at the start of the underlying device
pub const LUKS_METADATA_SIZE: u64 = 2 * 1024 * 1024;

/// How a device is referenced in /etc/fstab or /etc/crypttab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum MountByType {
    #[default]
    Device,
    Uuid,
    Label,
    Id,
    Path,
}

impl std::fmt::Display for MountByType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Device => write!(f, "device"),
            Self::Uuid => write!(f, "uuid"),
            Self::Label => write!(f, "label"),
            Self::Id => write!(f, "id"),
            Self::Path => write!(f, "path"),
        }
    }
}

/// A LUKS mapping on top of a block device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Luks {
    pub blk: BlkInfo,
    /// UUID of the LUKS header, empty until created or probed
    #[serde(default)]
    pub uuid: Option<String>,
    /// Device mapper table name, the mapping shows up as /dev/mapper/<name>
    pub dm_table_name: String,
    #[serde(default)]
    pub mount_by: MountByType,
    #[serde(default)]
    pub crypt_options: Vec<String>,
    #[serde(default)]
    pub in_etc_crypttab: bool,
    #[serde(skip)]
    pub password: Option<String>,
}

impl Luks {
    /// Name used to reference the underlying device in /etc/crypttab
    pub fn mount_by_name(&self, mount_by: MountByType) -> String {
        if mount_by == MountByType::Uuid {
            match &self.uuid {
                Some(uuid) => return format!("UUID={}", uuid),
                None => log::warn!("no uuid defined for {}, using fallback", self.blk.name),
            }
        }

        self.blk.name.clone()
    }

    /// First `cr-auto-N` name (N counting from 1) that is not taken
    pub fn next_free_cr_auto_name<'a>(taken: impl IntoIterator<Item = &'a str>) -> String {
        let taken: HashSet<&str> = taken.into_iter().collect();

        (1..)
            .map(|nr| format!("cr-auto-{}", nr))
            .find(|name| !taken.contains(name.as_str()))
            .unwrap_or_default()
    }
}

impl Devicegraph {
    /// Create a LUKS device on a block device
    pub fn create_luks(&mut self, blk_device: Sid, dm_table_name: &str) -> Result<Sid> {
        if !self.find_device(blk_device)?.is_blk_device() {
            return Err(StorageError::WrongDeviceType {
                sid: blk_device,
                expected: "BlkDevice",
            });
        }
        if dm_table_name.is_empty() || dm_table_name.contains('/') {
            return Err(StorageError::parse(format!(
                "invalid dm table name '{}'",
                dm_table_name
            )));
        }

        let sid = self.add_device(DeviceKind::Luks(Luks {
            blk: BlkInfo::new(format!("/dev/mapper/{}", dm_table_name), Region::new(0, 0, 512)?),
            uuid: None,
            dm_table_name: dm_table_name.to_string(),
            mount_by: MountByType::Device,
            crypt_options: Vec::new(),
            in_etc_crypttab: false,
            password: None,
        }))?;
        self.add_holder(blk_device, sid, HolderKind::User)?;
        self.calculate_luks_region(sid)?;
        Ok(sid)
    }

    /// The block device the LUKS device is built on
    pub fn luks_blk_device(&self, luks: Sid) -> Result<Sid> {
        self.expect_kind(luks, Device::as_luks, "Luks")?;
        self.single_blk_parent(luks)
    }

    /// Recompute the LUKS size after the underlying device changed size
    pub fn luks_parent_resized(&mut self, luks: Sid) -> Result<()> {
        self.calculate_luks_region(luks)
    }

    /// Set the LUKS uuid; anything that is not a valid UUID is rejected
    pub fn set_luks_uuid(&mut self, luks: Sid, uuid: &str) -> Result<()> {
        let parsed = uuid::Uuid::parse_str(uuid)
            .map_err(|e| StorageError::parse(format!("invalid luks uuid '{}': {}", uuid, e)))?;
        self.luks_mut(luks)?.uuid = Some(parsed.hyphenated().to_string());
        Ok(())
    }

    pub fn set_luks_password(&mut self, luks: Sid, password: &str) -> Result<()> {
        self.luks_mut(luks)?.password = Some(password.to_string());
        Ok(())
    }

    /// Next `cr-auto-N` name not used by any LUKS device in this graph
    pub fn next_free_cr_auto_name(&self) -> String {
        let luks_devices: Vec<&Luks> = self
            .devices()
            .into_iter()
            .filter_map(Device::as_luks)
            .collect();
        Luks::next_free_cr_auto_name(luks_devices.iter().map(|l| l.dm_table_name.as_str()))
    }

    fn calculate_luks_region(&mut self, luks: Sid) -> Result<()> {
        let parent = self.luks_blk_device(luks)?;
        let parent_region = self
            .find_device(parent)?
            .blk()
            .map(|blk| blk.region)
            .ok_or(StorageError::WrongDeviceType {
                sid: parent,
                expected: "BlkDevice",
            })?;

        let size = parent_region
            .size_bytes()
            .saturating_sub(LUKS_METADATA_SIZE);

        let luks = self.luks_mut(luks)?;
        luks.blk.region = Region::from_bytes(size, parent_region.block_size())?;
        Ok(())
    }

    pub(crate) fn check_luks(&self, sid: Sid) -> Result<()> {
        let luks = self.expect_kind(sid, Device::as_luks, "Luks")?;

        let parent = self
            .single_blk_parent(sid)
            .map_err(|_| StorageError::check("Luks has no BlkDevice parent"))?;
        let parent_size = self
            .find_device(parent)?
            .blk()
            .map(|blk| blk.size())
            .unwrap_or(0);

        if luks.blk.size() + LUKS_METADATA_SIZE > parent_size {
            return Err(StorageError::check(format!(
                "Luks {} bigger than parent BlkDevice",
                luks.blk.name
            )));
        }
        Ok(())
    }

    fn luks_mut(&mut self, sid: Sid) -> Result<&mut Luks> {
        self.find_device_mut(sid)?
            .as_luks_mut()
            .ok_or(StorageError::WrongDeviceType { sid, expected: "Luks" })
    }
}
