//! Filesystem and container signatures via blkid

use crate::error::Result;
use crate::system::execute;
use std::path::Path;
use std::process::Command;

/// blkid exits with 2 when no signature was found
const BLKID_NOTHING_FOUND: i32 = 2;

/// Signature found on a device
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlkidEntry {
    pub fs_type: Option<String>,
    pub uuid: Option<String>,
    pub label: Option<String>,
}

impl BlkidEntry {
    pub fn is_luks(&self) -> bool {
        self.fs_type.as_deref() == Some("crypto_LUKS")
    }
}

/// Low-level probe of a single device node
pub fn probe_device(path: &Path) -> Result<Option<BlkidEntry>> {
    let output = execute(
        Command::new("blkid")
            .args(["-o", "export", "-p"])
            .arg(path),
        &[BLKID_NOTHING_FOUND],
    )?;

    if output.status.code() == Some(BLKID_NOTHING_FOUND) {
        return Ok(None);
    }

    Ok(parse_export(&String::from_utf8_lossy(&output.stdout)))
}

/// Parse `blkid -o export` output; None if it carries no TYPE
pub fn parse_export(output: &str) -> Option<BlkidEntry> {
    let mut entry = BlkidEntry::default();

    for line in output.lines() {
        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        let value = Some(value.to_string()).filter(|v| !v.is_empty());
        match key {
            "TYPE" => entry.fs_type = value,
            "UUID" => entry.uuid = value,
            "LABEL" => entry.label = value,
            _ => {}
        }
    }

    entry.fs_type.is_some().then_some(entry)
}
