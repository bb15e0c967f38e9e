//! Storage Device Graph Library
//!
//! Models the block devices of a system as a directed graph:
//! - Disks, partitions, MD RAIDs, LUKS mappings
//! - Filesystems, including btrfs and its subvolumes
//! - Holders connecting them (subdevice, user, filesystem user)
//!
//! # Architecture
//!
//! The library is organized into modules:
//! - `devicegraph`: The graph itself, relatives, checks, JSON and Graphviz output
//! - `devices`: Device kinds and the `BlkDevice` lookup handle
//! - `filesystems`: Filesystems and btrfs subvolumes
//! - `holders`: Edge kinds of the graph
//! - `probe`: Building a devicegraph from sysfs, blkid and udev
//! - `storage`: Probed and staging devicegraphs of one environment
//! - `config`: Environment configuration
//! - `system`: Privileges, device nodes and external commands
//! - `error`: Error types and handling
//!
//! # Example
//!
//! ```rust
//! use blkgraph::*;
//!
//! # fn main() -> Result<()> {
//! let mut graph = Devicegraph::new();
//! let sda = graph.create_disk("/dev/sda", Region::new(0, 2_000_000, 512)?)?;
//! let sda1 = graph.create_partition(sda, "/dev/sda1", Region::new(2048, 1_000_000, 512)?)?;
//! graph.create_filesystem(sda1, FsType::Ext4)?;
//! graph.check()?;
//!
//! let device = BlkDevice::find_by_name(&graph, "/dev/sda1")?;
//! assert!(device.display_name().starts_with("/dev/sda1"));
//! # Ok(())
//! # }
//! ```

#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod devicegraph;
pub mod devices;
pub mod error;
pub mod filesystems;
pub mod holders;
pub mod probe;
pub mod storage;
pub mod system;

// Re-export commonly used types
pub use config::{Environment, ProbeMode, TargetMode};
pub use devicegraph::Devicegraph;
pub use devices::{BlkDevice, BlkInfo, Device, DeviceKind, Disk, Luks, Md, MdLevel, Partition, Region, Sid};
pub use error::{Result, StorageError};
pub use filesystems::{Btrfs, BtrfsSubvolume, Filesystem, FsType};
pub use holders::{Holder, HolderKind};
pub use probe::{HotplugMonitor, Prober, SysfsSystemInfo, SystemInfo};
pub use storage::{Change, Storage};
