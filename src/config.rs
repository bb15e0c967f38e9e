//! Storage environment configuration
//!
//! Defines how the system is probed and where it is found. Loaded from a TOML
//! file, then overridden by command line flags.

use crate::error::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Where the probed devicegraph comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMode {
    /// Probe the running system
    #[default]
    Standard,
    /// Start from an empty devicegraph
    None,
    /// Load a devicegraph saved earlier
    ReadDevicegraph,
}

impl std::fmt::Display for ProbeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard => write!(f, "standard"),
            Self::None => write!(f, "none"),
            Self::ReadDevicegraph => write!(f, "read_devicegraph"),
        }
    }
}

/// Relation between the running system and the target system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    #[default]
    Direct,
    Chroot,
    Image,
}

impl std::fmt::Display for TargetMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Chroot => write!(f, "chroot"),
            Self::Image => write!(f, "image"),
        }
    }
}

/// Storage environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Environment {
    pub probe_mode: ProbeMode,

    pub target_mode: TargetMode,

    /// Root of the target system for chroot and image mode
    pub target_root: PathBuf,

    /// Refuse any modification of the staging devicegraph
    pub read_only: bool,

    pub sysfs_root: PathBuf,

    pub dev_root: PathBuf,

    /// Saved devicegraph for `read_devicegraph` probe mode
    pub devicegraph_file: Option<PathBuf>,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            probe_mode: ProbeMode::default(),
            target_mode: TargetMode::default(),
            target_root: PathBuf::from("/"),
            read_only: false,
            sysfs_root: PathBuf::from("/sys"),
            dev_root: PathBuf::from("/dev"),
            devicegraph_file: None,
        }
    }
}

impl Environment {
    /// Create a new environment with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Environment working on a saved devicegraph
    pub fn with_devicegraph(path: impl Into<PathBuf>) -> Self {
        Self {
            probe_mode: ProbeMode::ReadDevicegraph,
            devicegraph_file: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            StorageError::config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Validate the environment
    pub fn validate(&self) -> Result<()> {
        if self.probe_mode == ProbeMode::ReadDevicegraph && self.devicegraph_file.is_none() {
            return Err(StorageError::config(
                "probe mode read_devicegraph needs a devicegraph file",
            ));
        }

        for (name, path) in [
            ("sysfs_root", &self.sysfs_root),
            ("dev_root", &self.dev_root),
            ("target_root", &self.target_root),
        ] {
            if !path.is_absolute() {
                return Err(StorageError::config(format!(
                    "{} must be an absolute path, got {}",
                    name,
                    path.display()
                )));
            }
        }

        Ok(())
    }

    /// Path as seen from the running system
    ///
    /// In chroot and image mode absolute paths are resolved below `target_root`.
    pub fn prefixed(&self, path: &Path) -> PathBuf {
        match self.target_mode {
            TargetMode::Direct => path.to_path_buf(),
            TargetMode::Chroot | TargetMode::Image => {
                self.target_root.join(path.strip_prefix("/").unwrap_or(path))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let env = Environment::default();
        assert_eq!(env.probe_mode, ProbeMode::Standard);
        assert_eq!(env.sysfs_root, PathBuf::from("/sys"));
        assert!(env.validate().is_ok());
    }

    #[test]
    fn test_from_toml() {
        let env = Environment::from_toml_str(
            r#"
            probe_mode = "read_devicegraph"
            read_only = true
            devicegraph_file = "/var/lib/blkgraph/probed.json"
            "#,
        )
        .unwrap();

        assert_eq!(env.probe_mode, ProbeMode::ReadDevicegraph);
        assert!(env.read_only);
        assert_eq!(env.dev_root, PathBuf::from("/dev"));
        assert!(env.validate().is_ok());
    }

    #[test]
    fn test_from_toml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "target_mode = \"chroot\"\ntarget_root = \"/mnt\"").unwrap();

        let env = Environment::from_toml_file(file.path()).unwrap();
        assert_eq!(env.target_mode, TargetMode::Chroot);

        assert!(matches!(
            Environment::from_toml_file(Path::new("/nonexistent/blkgraph.toml")),
            Err(StorageError::ConfigError(_))
        ));
    }

    #[test]
    fn test_unknown_probe_mode() {
        assert!(matches!(
            Environment::from_toml_str("probe_mode = \"guess\""),
            Err(StorageError::Toml(_))
        ));
    }

    #[test]
    fn test_validation_missing_devicegraph_file() {
        let mut env = Environment::default();
        env.probe_mode = ProbeMode::ReadDevicegraph;
        assert!(env.validate().is_err());
    }

    #[test]
    fn test_validation_relative_root() {
        let mut env = Environment::default();
        env.sysfs_root = PathBuf::from("sys");
        assert!(env.validate().is_err());
    }

    #[test]
    fn test_prefixed() {
        let mut env = Environment::default();
        assert_eq!(env.prefixed(Path::new("/sys")), PathBuf::from("/sys"));

        env.target_mode = TargetMode::Image;
        env.target_root = PathBuf::from("/mnt/image");
        assert_eq!(env.prefixed(Path::new("/sys")), PathBuf::from("/mnt/image/sys"));
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(ProbeMode::ReadDevicegraph.to_string(), "read_devicegraph");
        assert_eq!(TargetMode::Chroot.to_string(), "chroot");
    }
}
