//! Probed and staging devicegraphs of one environment

use crate::config::{Environment, ProbeMode};
use crate::devicegraph::Devicegraph;
use crate::devices::Sid;
use crate::error::{Result, StorageError};
use crate::probe::{Prober, SysfsSystemInfo, SystemInfo};
use std::collections::BTreeSet;

/// Difference of a device between probed and staging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Create(Sid),
    Delete(Sid),
    Modify(Sid),
}

impl Change {
    pub fn sid(&self) -> Sid {
        match self {
            Self::Create(sid) | Self::Delete(sid) | Self::Modify(sid) => *sid,
        }
    }
}

impl std::fmt::Display for Change {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create(sid) => write!(f, "create sid:{}", sid),
            Self::Delete(sid) => write!(f, "delete sid:{}", sid),
            Self::Modify(sid) => write!(f, "modify sid:{}", sid),
        }
    }
}

pub struct Storage {
    environment: Environment,
    probed: Devicegraph,
    staging: Devicegraph,
}

impl Storage {
    pub fn new(environment: Environment) -> Result<Self> {
        environment.validate()?;
        Ok(Self {
            environment,
            probed: Devicegraph::new(),
            staging: Devicegraph::new(),
        })
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Fill the probed devicegraph according to the probe mode and copy it to staging
    pub fn probe(&mut self) -> Result<()> {
        match self.environment.probe_mode {
            ProbeMode::Standard => {
                if !crate::system::is_root() {
                    log::warn!("Not running as root, probed signatures may be incomplete");
                }
                let system_info = SysfsSystemInfo::new(
                    self.environment.prefixed(&self.environment.sysfs_root),
                    self.environment.prefixed(&self.environment.dev_root),
                );
                #[cfg(feature = "udev")]
                let system_info = crate::probe::UdevSystemInfo::new(system_info);

                self.probe_with(&system_info)
            }
            ProbeMode::None => {
                self.set_probed(Devicegraph::new());
                Ok(())
            }
            ProbeMode::ReadDevicegraph => {
                let path = self.environment.devicegraph_file.as_ref().ok_or_else(|| {
                    StorageError::config("probe mode read_devicegraph needs a devicegraph file")
                })?;
                let graph = Devicegraph::load(path)?;
                graph.check()?;
                self.set_probed(graph);
                Ok(())
            }
        }
    }

    /// Probe from the given system information
    pub fn probe_with(&mut self, system_info: &dyn SystemInfo) -> Result<()> {
        let graph = Prober::new(system_info).probe()?;
        if let Err(e) = graph.check() {
            log::warn!("Probed devicegraph fails check: {}", e);
        }
        self.set_probed(graph);
        Ok(())
    }

    fn set_probed(&mut self, graph: Devicegraph) {
        self.staging = graph.clone();
        self.probed = graph;
    }

    pub fn probed(&self) -> &Devicegraph {
        &self.probed
    }

    pub fn staging(&self) -> &Devicegraph {
        &self.staging
    }

    pub fn staging_mut(&mut self) -> Result<&mut Devicegraph> {
        self.ensure_writable()?;
        Ok(&mut self.staging)
    }

    /// Discard all staging changes
    pub fn reset_staging(&mut self) {
        self.staging = self.probed.clone();
    }

    pub fn ensure_writable(&self) -> Result<()> {
        if self.environment.read_only {
            return Err(StorageError::ReadOnly);
        }
        Ok(())
    }

    /// Changes from probed to staging, sorted by sid
    pub fn changes(&self) -> Vec<Change> {
        let sids: BTreeSet<Sid> = self
            .probed
            .devices()
            .into_iter()
            .chain(self.staging.devices())
            .map(|d| d.sid())
            .collect();

        sids.into_iter()
            .filter_map(|sid| {
                match (self.probed.find_device(sid), self.staging.find_device(sid)) {
                    (Err(_), Ok(_)) => Some(Change::Create(sid)),
                    (Ok(_), Err(_)) => Some(Change::Delete(sid)),
                    (Ok(lhs), Ok(rhs)) => {
                        let parents_changed =
                            self.probed.parents(sid).ok() != self.staging.parents(sid).ok();
                        (lhs != rhs || parents_changed).then_some(Change::Modify(sid))
                    }
                    (Err(_), Err(_)) => None,
                }
            })
            .collect()
    }
}
