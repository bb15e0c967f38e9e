//! Saving and loading devicegraphs as JSON

use super::Devicegraph;
use crate::devices::Device;
use crate::error::{Result, StorageError};
use crate::holders::HolderRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SavedDevicegraph {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    saved_at: Option<DateTime<Utc>>,
    devices: Vec<Device>,
    holders: Vec<HolderRecord>,
}

impl Devicegraph {
    /// Serialize the graph; devices and holders are written sorted by sid
    pub fn to_json(&self) -> Result<String> {
        let saved = SavedDevicegraph {
            version: FORMAT_VERSION,
            saved_at: Some(Utc::now()),
            devices: self.devices().into_iter().cloned().collect(),
            holders: self
                .holders()
                .into_iter()
                .map(|(source, target, holder)| HolderRecord {
                    source,
                    target,
                    kind: holder.kind,
                })
                .collect(),
        };

        Ok(serde_json::to_string_pretty(&saved)?)
    }

    /// Rebuild a graph from its JSON form, keeping all sids
    pub fn from_json(json: &str) -> Result<Self> {
        let saved: SavedDevicegraph = serde_json::from_str(json)?;

        if saved.version != FORMAT_VERSION {
            return Err(StorageError::Unsupported(format!(
                "devicegraph format version {}",
                saved.version
            )));
        }

        let mut graph = Devicegraph::new();
        for device in saved.devices {
            graph.insert_device(device)?;
        }
        for holder in saved.holders {
            graph.add_holder(holder.source, holder.target, holder.kind)?;
        }

        log::debug!(
            "loaded devicegraph with {} devices and {} holders",
            graph.num_devices(),
            graph.num_holders()
        );
        Ok(graph)
    }

    /// Write the graph to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        log::info!("Saving devicegraph to {}", path.display());
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read a graph from a file written by [`Devicegraph::save`]
    pub fn load(path: &Path) -> Result<Self> {
        log::info!("Loading devicegraph from {}", path.display());
        Self::from_json(&fs::read_to_string(path)?)
    }
}
