//! Error types for the storage device graph
//!
//! Provides comprehensive error handling using thiserror for ergonomic error definitions.

use crate::devices::Sid;
use thiserror::Error;

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum StorageError {
    /// No device with this storage id exists in the graph
    #[error("device not found, sid:{0}")]
    DeviceNotFoundBySid(Sid),

    /// No block device with this name exists in the graph
    #[error("device not found, name:{0}")]
    DeviceNotFoundByName(String),

    /// No btrfs subvolume with this path exists below the filesystem
    #[error("btrfs subvolume not found, path:{0}")]
    BtrfsSubvolumeNotFoundByPath(String),

    /// Device exists but has the wrong kind for the operation
    #[error("wrong device type for sid:{sid}, expected {expected}")]
    WrongDeviceType { sid: Sid, expected: &'static str },

    /// Holder between the two devices already exists
    #[error("holder already exists, source-sid:{source_sid} target-sid:{target_sid}")]
    HolderAlreadyExists { source_sid: Sid, target_sid: Sid },

    /// No holder between the two devices
    #[error("holder not found, source-sid:{source_sid} target-sid:{target_sid}")]
    HolderNotFound { source_sid: Sid, target_sid: Sid },

    /// Region is invalid or does not fit where it was placed
    #[error("invalid region: {0}")]
    InvalidRegion(String),

    /// Graph consistency check failed
    #[error("check failed: {0}")]
    CheckFailed(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Operation not allowed on a read-only storage
    #[error("storage is read-only")]
    ReadOnly,

    /// Command execution failed
    #[error("Command '{cmd}' failed with exit code {code}: {stderr}")]
    CommandFailed {
        cmd: String,
        code: i32,
        stderr: String,
    },

    /// System error
    #[error("System error: {0}")]
    SystemError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Saved devicegraph could not be read or written
    #[error("devicegraph format error: {0}")]
    Json(#[from] serde_json::Error),

    /// Environment file could not be parsed
    #[error("environment file error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Unsupported operation
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl StorageError {
    /// Create a check error
    pub fn check<S: Into<String>>(msg: S) -> Self {
        Self::CheckFailed(msg.into())
    }

    /// Create a config error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a parse error
    pub fn parse<S: Into<String>>(msg: S) -> Self {
        Self::ParseError(msg.into())
    }

    /// True for every "not found" lookup failure, whatever the lookup key was
    pub fn is_device_not_found(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFoundBySid(_)
                | Self::DeviceNotFoundByName(_)
                | Self::BtrfsSubvolumeNotFoundByPath(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_family() {
        assert!(StorageError::DeviceNotFoundBySid(42).is_device_not_found());
        assert!(StorageError::DeviceNotFoundByName("/dev/sda".into()).is_device_not_found());
        assert!(StorageError::BtrfsSubvolumeNotFoundByPath("@/home".into()).is_device_not_found());
        assert!(!StorageError::check("bad").is_device_not_found());
        assert!(!StorageError::ReadOnly.is_device_not_found());
    }

    #[test]
    fn test_device_not_found_message() {
        let err = StorageError::DeviceNotFoundByName("/dev/sda".to_string());
        assert!(err.to_string().contains("/dev/sda"));
    }

    #[test]
    fn test_command_failed() {
        let err = StorageError::CommandFailed {
            cmd: "blkid".to_string(),
            code: 2,
            stderr: "no such device".to_string(),
        };
        assert!(err.to_string().contains("blkid"));
        assert!(err.to_string().contains("exit code 2"));
    }
}
