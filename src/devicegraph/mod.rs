//! The devicegraph: devices as nodes, holders as edges
//!
//! Built on `petgraph`'s `StableDiGraph` so node indices survive removals. Each
//! device carries a storage id ([`Sid`]) that is independent of the node index;
//! all public operations are keyed by sid.

mod io;

use crate::devices::{Device, DeviceKind, Sid};
use crate::error::{Result, StorageError};
use crate::holders::{Holder, HolderKind};
use petgraph::algo::is_cyclic_directed;
use petgraph::dot::Dot;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{Bfs, Reversed};
use petgraph::Direction;
use std::collections::HashMap;

/// A graph of storage devices
///
/// Cloning gives an independent copy with the same sids, which is how the
/// staging graph is derived from the probed one.
#[derive(Debug, Clone)]
pub struct Devicegraph {
    graph: StableDiGraph<Device, Holder>,
    vertices: HashMap<Sid, NodeIndex>,
    next_sid: Sid,
}

impl Default for Devicegraph {
    fn default() -> Self {
        Self::new()
    }
}

impl Devicegraph {
    /// Create an empty devicegraph
    pub fn new() -> Self {
        Self {
            graph: StableDiGraph::new(),
            vertices: HashMap::new(),
            next_sid: 1,
        }
    }

    /// Add a device and return its new sid
    pub fn add_device(&mut self, kind: DeviceKind) -> Result<Sid> {
        let sid = self.next_sid;
        self.next_sid = sid
            .checked_add(1)
            .ok_or_else(|| StorageError::check("no free sid left in devicegraph"))?;

        let vertex = self.graph.add_node(Device { sid, kind });
        self.vertices.insert(sid, vertex);
        Ok(sid)
    }

    /// Insert a device that already has a sid (used when loading)
    pub(crate) fn insert_device(&mut self, device: Device) -> Result<()> {
        if self.vertices.contains_key(&device.sid) {
            return Err(StorageError::check(format!(
                "duplicate sid {} in devicegraph",
                device.sid
            )));
        }

        let sid = device.sid;
        let next_sid = sid
            .checked_add(1)
            .ok_or_else(|| StorageError::check(format!("sid {} out of range", sid)))?;
        self.next_sid = self.next_sid.max(next_sid);
        let vertex = self.graph.add_node(device);
        self.vertices.insert(sid, vertex);
        Ok(())
    }

    /// Remove a device together with all holders attached to it
    pub fn remove_device(&mut self, sid: Sid) -> Result<Device> {
        let vertex = self.vertex(sid)?;
        self.vertices.remove(&sid);
        self.graph
            .remove_node(vertex)
            .ok_or(StorageError::DeviceNotFoundBySid(sid))
    }

    /// Find a device by its storage id
    pub fn find_device(&self, sid: Sid) -> Result<&Device> {
        let vertex = self.vertex(sid)?;
        Ok(&self.graph[vertex])
    }

    pub fn find_device_mut(&mut self, sid: Sid) -> Result<&mut Device> {
        let vertex = self.vertex(sid)?;
        Ok(&mut self.graph[vertex])
    }

    pub fn device_exists(&self, sid: Sid) -> bool {
        self.vertices.contains_key(&sid)
    }

    /// Connect `source` to `target`
    pub fn add_holder(&mut self, source: Sid, target: Sid, kind: HolderKind) -> Result<()> {
        let source_vertex = self.vertex(source)?;
        let target_vertex = self.vertex(target)?;

        if self.graph.find_edge(source_vertex, target_vertex).is_some() {
            return Err(StorageError::HolderAlreadyExists {
                source_sid: source,
                target_sid: target,
            });
        }

        self.graph
            .add_edge(source_vertex, target_vertex, Holder::new(kind));
        Ok(())
    }

    pub fn remove_holder(&mut self, source: Sid, target: Sid) -> Result<Holder> {
        let edge = self
            .graph
            .find_edge(self.vertex(source)?, self.vertex(target)?)
            .ok_or(StorageError::HolderNotFound {
                source_sid: source,
                target_sid: target,
            })?;

        self.graph
            .remove_edge(edge)
            .ok_or(StorageError::HolderNotFound {
                source_sid: source,
                target_sid: target,
            })
    }

    pub fn find_holder(&self, source: Sid, target: Sid) -> Result<&Holder> {
        let edge = self
            .graph
            .find_edge(self.vertex(source)?, self.vertex(target)?)
            .ok_or(StorageError::HolderNotFound {
                source_sid: source,
                target_sid: target,
            })?;

        Ok(&self.graph[edge])
    }

    /// All holders as (source sid, target sid, holder), sorted by sids
    pub fn holders(&self) -> Vec<(Sid, Sid, &Holder)> {
        let mut holders: Vec<_> = self
            .graph
            .edge_indices()
            .filter_map(|edge| {
                let (source, target) = self.graph.edge_endpoints(edge)?;
                Some((
                    self.graph[source].sid,
                    self.graph[target].sid,
                    &self.graph[edge],
                ))
            })
            .collect();
        holders.sort_by_key(|(source, target, _)| (*source, *target));
        holders
    }

    pub fn num_devices(&self) -> usize {
        self.graph.node_count()
    }

    pub fn num_holders(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// All devices, sorted by sid
    pub fn devices(&self) -> Vec<&Device> {
        let mut devices: Vec<&Device> = self
            .graph
            .node_indices()
            .map(|vertex| &self.graph[vertex])
            .collect();
        devices.sort_by_key(|d| d.sid);
        devices
    }

    /// Direct children of a device, sorted by sid
    pub fn children(&self, sid: Sid) -> Result<Vec<Sid>> {
        self.neighbors(sid, Direction::Outgoing, None)
    }

    /// Children connected through a holder of the given kind
    pub fn children_of_kind(&self, sid: Sid, kind: HolderKind) -> Result<Vec<Sid>> {
        self.neighbors(sid, Direction::Outgoing, Some(kind))
    }

    /// Direct parents of a device, sorted by sid
    pub fn parents(&self, sid: Sid) -> Result<Vec<Sid>> {
        self.neighbors(sid, Direction::Incoming, None)
    }

    /// All devices reachable from `sid`, in breadth-first order
    pub fn descendants(&self, sid: Sid, itself: bool) -> Result<Vec<Sid>> {
        let start = self.vertex(sid)?;
        let mut bfs = Bfs::new(&self.graph, start);

        let mut ret = Vec::new();
        while let Some(vertex) = bfs.next(&self.graph) {
            if vertex != start || itself {
                ret.push(self.graph[vertex].sid);
            }
        }
        Ok(ret)
    }

    /// All devices `sid` is built on, in breadth-first order
    pub fn ancestors(&self, sid: Sid, itself: bool) -> Result<Vec<Sid>> {
        let start = self.vertex(sid)?;
        let reversed = Reversed(&self.graph);
        let mut bfs = Bfs::new(reversed, start);

        let mut ret = Vec::new();
        while let Some(vertex) = bfs.next(reversed) {
            if vertex != start || itself {
                ret.push(self.graph[vertex].sid);
            }
        }
        Ok(ret)
    }

    /// Devices without parents, sorted by sid
    pub fn roots(&self) -> Vec<Sid> {
        self.filter_vertices(Direction::Incoming)
    }

    /// Devices without children, sorted by sid
    pub fn leaves(&self) -> Vec<Sid> {
        self.filter_vertices(Direction::Outgoing)
    }

    /// Display name of a device, naming the block device for filesystems
    pub fn display_name(&self, sid: Sid) -> Result<String> {
        let device = self.find_device(sid)?;
        if !device.is_filesystem() {
            return Ok(device.display_name());
        }

        let blk_names: Vec<String> = self
            .parents(sid)?
            .into_iter()
            .filter_map(|parent| self.find_device(parent).ok())
            .filter_map(|parent| parent.blk().map(|blk| blk.name.clone()))
            .collect();

        if blk_names.is_empty() {
            Ok(device.display_name())
        } else {
            Ok(format!("{} on {}", device.display_name(), blk_names.join(", ")))
        }
    }

    /// Check the graph and every device in it for consistency
    pub fn check(&self) -> Result<()> {
        if is_cyclic_directed(&self.graph) {
            return Err(StorageError::check("devicegraph contains a cycle"));
        }

        for device in self.devices() {
            let sid = device.sid;
            match device.kind {
                DeviceKind::Disk(_) => {}
                DeviceKind::Partition(_) => self.check_partition(sid)?,
                DeviceKind::Md(_) => self.check_md(sid)?,
                DeviceKind::Luks(_) => self.check_luks(sid)?,
                DeviceKind::Filesystem(_) => self.check_filesystem(sid)?,
                DeviceKind::Btrfs(_) => {
                    self.check_filesystem(sid)?;
                    self.check_btrfs(sid)?;
                }
                DeviceKind::BtrfsSubvolume(_) => {}
            }
        }

        log::debug!(
            "devicegraph check passed ({} devices, {} holders)",
            self.num_devices(),
            self.num_holders()
        );
        Ok(())
    }

    /// Write the graph in Graphviz DOT format
    pub fn write_graphviz<W: std::io::Write>(&self, mut out: W) -> Result<()> {
        write!(out, "{}", Dot::new(&self.graph))?;
        Ok(())
    }

    /// Look up a device and project it onto one kind, failing if it is another
    pub(crate) fn expect_kind<'a, T>(
        &'a self,
        sid: Sid,
        project: fn(&'a Device) -> Option<&'a T>,
        expected: &'static str,
    ) -> Result<&'a T> {
        project(self.find_device(sid)?).ok_or(StorageError::WrongDeviceType { sid, expected })
    }

    /// Parents that are block devices, sorted by sid
    pub fn blk_parents(&self, sid: Sid) -> Result<Vec<Sid>> {
        Ok(self
            .parents(sid)?
            .into_iter()
            .filter(|parent| {
                self.find_device(*parent)
                    .map(Device::is_blk_device)
                    .unwrap_or(false)
            })
            .collect())
    }

    /// Single parent that is a block device, as required by LUKS and filesystems
    pub(crate) fn single_blk_parent(&self, sid: Sid) -> Result<Sid> {
        let blk_parents = self.blk_parents(sid)?;

        match blk_parents.as_slice() {
            [parent] => Ok(*parent),
            _ => Err(StorageError::check(format!(
                "{} sid:{} has {} block device parents, expected one",
                self.find_device(sid)?.classname(),
                sid,
                blk_parents.len()
            ))),
        }
    }

    fn vertex(&self, sid: Sid) -> Result<NodeIndex> {
        self.vertices
            .get(&sid)
            .copied()
            .ok_or(StorageError::DeviceNotFoundBySid(sid))
    }

    fn neighbors(
        &self,
        sid: Sid,
        direction: Direction,
        kind: Option<HolderKind>,
    ) -> Result<Vec<Sid>> {
        let vertex = self.vertex(sid)?;

        let mut ret: Vec<Sid> = self
            .graph
            .neighbors_directed(vertex, direction)
            .filter(|other| {
                let edge = match direction {
                    Direction::Outgoing => self.graph.find_edge(vertex, *other),
                    Direction::Incoming => self.graph.find_edge(*other, vertex),
                };
                match (kind, edge) {
                    (None, _) => true,
                    (Some(kind), Some(edge)) => self.graph[edge].kind == kind,
                    (Some(_), None) => false,
                }
            })
            .map(|other| self.graph[other].sid)
            .collect();
        ret.sort_unstable();
        Ok(ret)
    }

    fn filter_vertices(&self, direction: Direction) -> Vec<Sid> {
        let mut ret: Vec<Sid> = self
            .graph
            .node_indices()
            .filter(|v| {
                self.graph
                    .neighbors_directed(*v, direction)
                    .next()
                    .is_none()
            })
            .map(|v| self.graph[v].sid)
            .collect();
        ret.sort_unstable();
        ret
    }
}
