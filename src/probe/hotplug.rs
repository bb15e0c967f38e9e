//! Hotplug detection with inotify on sysfs

use crate::error::{Result, StorageError};
use inotify::{EventMask, Inotify, WatchMask};
use std::path::Path;

/// A block device appeared or vanished
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugEvent {
    Added(String),
    Removed(String),
}

impl std::fmt::Display for HotplugEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Added(name) => write!(f, "added {}", name),
            Self::Removed(name) => write!(f, "removed {}", name),
        }
    }
}

/// Watches `<sysfs>/class/block` for additions and removals
pub struct HotplugMonitor {
    inotify: Inotify,
    buffer: Vec<u8>,
}

impl HotplugMonitor {
    pub fn new(sysfs_root: &Path) -> Result<Self> {
        let inotify = Inotify::init()?;
        let class_block = sysfs_root.join("class/block");

        inotify
            .watches()
            .add(&class_block, WatchMask::CREATE | WatchMask::DELETE)
            .map_err(|e| {
                StorageError::SystemError(format!(
                    "Failed to watch {}: {}",
                    class_block.display(),
                    e
                ))
            })?;

        log::debug!("Watching {} for hotplug events", class_block.display());
        Ok(Self {
            inotify,
            buffer: vec![0; 4096],
        })
    }

    /// Block until at least one event arrives
    pub fn wait(&mut self) -> Result<Vec<HotplugEvent>> {
        let events = self.inotify.read_events_blocking(&mut self.buffer)?;

        Ok(events
            .filter_map(|event| {
                let name = event.name?.to_string_lossy().to_string();
                if event.mask.contains(EventMask::CREATE) {
                    Some(HotplugEvent::Added(name))
                } else if event.mask.contains(EventMask::DELETE) {
                    Some(HotplugEvent::Removed(name))
                } else {
                    None
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_add_and_remove() {
        let root = TempDir::new().unwrap();
        let class_block = root.path().join("class/block");
        fs::create_dir_all(&class_block).unwrap();

        let mut monitor = HotplugMonitor::new(root.path()).unwrap();

        fs::write(class_block.join("sdb"), "").unwrap();
        let events = monitor.wait().unwrap();
        assert_eq!(events, vec![HotplugEvent::Added("sdb".to_string())]);

        fs::remove_file(class_block.join("sdb")).unwrap();
        let events = monitor.wait().unwrap();
        assert_eq!(events, vec![HotplugEvent::Removed("sdb".to_string())]);
    }

    #[test]
    fn test_missing_directory() {
        let root = TempDir::new().unwrap();
        assert!(matches!(
            HotplugMonitor::new(root.path()),
            Err(StorageError::SystemError(_))
        ));
    }
}
