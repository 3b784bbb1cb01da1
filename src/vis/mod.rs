//! Potentially visible set solver.
//!
//! Works on the portal graph from a portal file. Every file portal becomes
//! two one-way portals, one in each of its leaves. Base vis finds for each
//! portal the leaves it might see by a cheap flood, full vis narrows that
//! down with separating plane clipping. Leaf rows are the union of leaf
//! portal rows.

use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rayon::prelude::*;

use crate::{
    config::VisSettings,
    error::Result,
    geom::Plane,
    math::Vec3d,
    prt::{PrtError, PrtFile},
    stats::VisStats,
    winding::Winding,
};

pub mod leafbits;
pub mod flow;
pub mod state;

use leafbits::LeafBits;
use state::StateFiles;

/// Default point-on-plane epsilon of vis clipping
pub const VIS_ON_EPSILON: f64 = 0.1;

/// Portal normals closer than this are treated as equal
pub const VIS_EQUAL_EPSILON: f64 = 0.001;

/// Point limit of clipped windings during flow
pub const MAX_WINDING_FIXED: usize = 24;

/// Point limit of portal windings
pub const MAX_WINDING: usize = 64;

/// Separator cache size per test and recursion level
pub const MAX_SEPARATORS: usize = MAX_WINDING;

/// Coplanar portals facing each other with normal dot below this can't see each other
const COPLANAR_DOT: f64 = -0.99;

/// Flow progress of a portal
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[repr(u32)]
pub enum PortalStatus {
    #[default]
    None = 0,
    Working = 1,
    Done = 2,
}

impl TryFrom<u32> for PortalStatus {
    type Error = u32;

    fn try_from(value: u32) -> std::result::Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::None,
            1 => Self::Working,
            2 => Self::Done,
            _ => return Err(value),
        })
    }
}

/// Polygon with bounding sphere. Clipped windings keep the sphere of their source.
#[derive(Clone, Debug, PartialEq)]
pub struct VisWinding {
    pub points: Vec<Vec3d>,
    pub origin: Vec3d,
    pub radius: f64,
}

impl VisWinding {
    pub fn new(points: Vec<Vec3d>) -> Self {
        let origin = points.iter().fold(Vec3d::zero(), |s, p| s + *p) / points.len().max(1) as f64;
        let radius = points.iter().map(|p| (*p - origin).length()).fold(0.0, f64::max);

        Self { points, origin, radius }
    }

    /// Smallest distance from winding points to the plane
    pub fn distance_from(&self, plane: &Plane) -> f64 {
        self.points.iter().map(|p| plane.point_distance(*p).abs()).fold(f64::MAX, f64::min)
    }
}

impl From<&Winding> for VisWinding {
    fn from(winding: &Winding) -> Self {
        Self::new(winding.points().to_vec())
    }
}

/// Mutable part of a portal
#[derive(Clone, Debug, Default)]
pub struct PortalState {
    pub status: PortalStatus,

    /// Leaves the portal might see, from base vis
    pub mightsee: LeafBits,

    /// Leaves the portal sees, valid when `Done`
    pub visbits: LeafBits,
    pub nummightsee: usize,
    pub numcansee: usize,
}

/// One-way portal leading out of a leaf
#[derive(Debug)]
pub struct VisPortal {
    /// Normal points into `leaf`
    pub plane: Plane,

    /// Neighbour leaf
    pub leaf: usize,
    pub winding: VisWinding,
    pub state: RwLock<PortalState>,
}

#[derive(Clone, Debug, Default)]
pub struct VisLeaf {
    /// Portals leading out of the leaf
    pub portals: Vec<usize>,
}

/// Portal graph over vis leaves (clusters)
#[derive(Debug)]
pub struct PortalGraph {
    pub portals: Vec<VisPortal>,
    pub leafs: Vec<VisLeaf>,

    /// Cluster of every real leaf
    pub leaf_clusters: Vec<usize>,
}

impl PortalGraph {
    /// Build graph from portal file data. Each file portal gives a forward
    /// portal in its front leaf and a backward one in its back leaf.
    pub fn new(prt: &PrtFile) -> std::result::Result<Self, PrtError> {
        let num_leafs = prt.num_clusters;
        let mut leafs = vec![VisLeaf::default(); num_leafs];
        let mut portals = Vec::with_capacity(prt.portals.len() * 2);

        let new_portal = |plane: Plane, leaf: usize, winding: &Winding| VisPortal {
            plane,
            leaf,
            winding: VisWinding::from(winding),
            state: RwLock::new(PortalState {
                mightsee: LeafBits::new(num_leafs),
                visbits: LeafBits::new(num_leafs),
                ..Default::default()
            }),
        };

        for (index, source) in prt.portals.iter().enumerate() {
            if source.winding.len() < 3 {
                return Err(PrtError::DegeneratePortal(index));
            }
            let plane = source.winding.plane().ok_or(PrtError::DegeneratePortal(index))?;
            let [front, back] = source.clusters;

            leafs[front].portals.push(portals.len());
            portals.push(new_portal(plane.negate_direction(), back, &source.winding));

            leafs[back].portals.push(portals.len());
            portals.push(new_portal(plane, front, &source.winding.flipped()));
        }

        Ok(Self { portals, leafs, leaf_clusters: prt.leaf_clusters.clone() })
    }

    /// Number of vis leaves (clusters)
    pub fn num_leafs(&self) -> usize {
        self.leafs.len()
    }

    /// Rough test of `target` being visible through `portal`
    fn portal_sees(&self, portal: &VisPortal, target: &VisPortal, settings: &VisSettings) -> bool {
        let eps = settings.on_epsilon;
        let (w, tw) = (&portal.winding, &target.winding);

        // target completely behind
        if portal.plane.point_distance(tw.origin) < -tw.radius {
            return false;
        }

        let mut target_on = 0;
        let target_front = tw.points.iter().any(|p| {
            let d = portal.plane.point_distance(*p);
            if d > -eps {
                target_on += 1;
            }
            d > eps
        });
        if target_front {
            target_on = 0;
        } else if target_on != tw.points.len() {
            return false;
        }

        // portal completely in front of the target
        if target.plane.point_distance(w.origin) > w.radius {
            return false;
        }

        let mut source_on = 0;
        let source_back = w.points.iter().any(|p| {
            let d = target.plane.point_distance(*p);
            if d < eps {
                source_on += 1;
            }
            d < -eps
        });
        if source_back {
            source_on = 0;
        } else if source_on != w.points.len() {
            return false;
        }

        if (target_on != 0 || source_on != 0) && (portal.plane.normal ^ target.plane.normal) < COPLANAR_DOT {
            return false;
        }

        if settings.visdist > 0.0
            && (tw.distance_from(&portal.plane) > settings.visdist || w.distance_from(&target.plane) > settings.visdist)
        {
            return false;
        }

        true
    }

    /// Leaves reachable from `start` through `portalsee` portals
    fn simple_flood(&self, start: usize, portalsee: &[bool]) -> LeafBits {
        let mut bits = LeafBits::new(self.num_leafs());
        let mut stack = vec![start];

        while let Some(leaf) = stack.pop() {
            if bits.get(leaf) {
                continue;
            }
            bits.set(leaf, true);

            stack.extend(self.leafs[leaf].portals.iter().filter(|p| portalsee[**p]).map(|p| self.portals[*p].leaf));
        }

        bits
    }

    /// Compute mightsee of every portal
    pub fn base_portal_vis(&self, settings: &VisSettings) {
        self.portals.par_iter().enumerate().for_each(|(index, portal)| {
            let portalsee = self
                .portals
                .iter()
                .enumerate()
                .map(|(i, target)| i != index && self.portal_sees(portal, target, settings))
                .collect::<Vec<_>>();

            let mightsee = self.simple_flood(portal.leaf, &portalsee);

            let mut state = portal.state.write();
            state.nummightsee = mightsee.count();
            state.mightsee = mightsee;
        });
    }

    /// Accept mightsee as final visibility
    fn fast_vis(&mut self) {
        for portal in &mut self.portals {
            let state = portal.state.get_mut();
            state.visbits = state.mightsee.clone();
            state.status = PortalStatus::Done;
        }
    }
}

/// Full vis scheduler
struct Solver<'a> {
    graph: &'a PortalGraph,
    settings: &'a VisSettings,
    files: Option<&'a StateFiles>,

    started: Instant,

    /// Time spent by earlier runs, restored from state
    elapsed_before: Duration,

    /// Time of the last state save, the lock serializes portal scheduling
    last_save: Mutex<Instant>,
}

impl Solver<'_> {
    fn elapsed(&self) -> Duration {
        self.elapsed_before + self.started.elapsed()
    }

    /// Portal with the smallest mightsee that isn't started yet.
    /// Must be called with the scheduler lock held.
    fn next_portal(&self) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;

        for (index, portal) in self.graph.portals.iter().enumerate() {
            let state = portal.state.read();
            if state.status == PortalStatus::None && best.is_none_or(|(_, min)| state.nummightsee < min) {
                best = Some((index, state.nummightsee));
            }
        }

        let (index, _) = best?;
        self.graph.portals[index].state.write().status = PortalStatus::Working;
        Some(index)
    }

    /// Remove `dest` from mightsee of not yet started portals of `source`
    fn update_mightsee(&self, source: usize, dest: usize) {
        for portal in self.graph.leafs[source].portals.iter().map(|p| &self.graph.portals[*p]) {
            let mut state = portal.state.write();

            if state.status == PortalStatus::None && state.mightsee.get(dest) {
                state.mightsee.set(dest, false);
                state.nummightsee -= 1;
            }
        }
    }

    /// Publish portal visibility and prune mightsee of other portals. Leaves
    /// none of the portals of `portal.leaf` can see can't see that leaf either.
    fn portal_completed(&self, index: usize, visbits: LeafBits, numcansee: usize) {
        let _lock = self.last_save.lock();
        let completed = &self.graph.portals[index];

        {
            let mut state = completed.state.write();
            state.status = PortalStatus::Done;
            state.visbits = visbits;
            state.numcansee = numcansee;
        }

        let myleaf = completed.leaf;
        let mut dropped = Vec::new();
        {
            let states = self.graph.leafs[myleaf]
                .portals
                .iter()
                .map(|p| self.graph.portals[*p].state.read())
                .collect::<Vec<_>>();

            for (i, state) in states.iter().enumerate() {
                if state.status != PortalStatus::Done {
                    continue;
                }

                for (block, (might, vis)) in state.mightsee.blocks().iter().zip(state.visbits.blocks()).enumerate() {
                    let mut changed = might & !vis;

                    for (k, other) in states.iter().enumerate() {
                        if changed == 0 {
                            break;
                        }
                        if k == i {
                            continue;
                        }
                        let bits = if other.status == PortalStatus::Done { &other.visbits } else { &other.mightsee };
                        changed &= !bits.blocks()[block];
                    }

                    while changed != 0 {
                        dropped.push(block * 32 + changed.trailing_zeros() as usize);
                        changed &= changed - 1;
                    }
                }
            }
        }

        for leaf in dropped {
            self.update_mightsee(leaf, myleaf);
        }
    }

    fn save_state(&self) -> Result<()> {
        if let Some(files) = self.files {
            state::save(files, self.graph, self.settings.level, self.elapsed())?;
        }
        Ok(())
    }

    fn leaf_thread(&self) -> VisStats {
        let index = {
            let mut last_save = self.last_save.lock();

            if self.files.is_some() && last_save.elapsed() > self.settings.state_interval {
                *last_save = Instant::now();
                if let Err(err) = self.save_state() {
                    log::warn!("failed to save vis state: {err}");
                }
            }

            self.next_portal()
        };
        let Some(index) = index else {
            return VisStats::default();
        };

        let (visbits, numcansee, stats) = flow::portal_flow(self.graph, index, self.settings.level, self.settings.on_epsilon);
        self.portal_completed(index, visbits, numcansee);

        log::debug!(
            "portal:{index:4}  mightsee:{:4}  cansee:{numcansee:4}",
            self.graph.portals[index].state.read().nummightsee,
        );

        stats
    }

    /// Flow every portal not done yet
    fn run(&self) -> Result<VisStats> {
        let done = self
            .graph
            .portals
            .iter()
            .filter(|p| p.state.read().status == PortalStatus::Done)
            .count();

        let stats = (done..self.graph.portals.len())
            .into_par_iter()
            .map(|_| self.leaf_thread())
            .reduce(VisStats::default, |mut sum, stats| {
                sum += stats;
                sum
            });

        self.save_state()?;
        Ok(stats)
    }
}

/// Zero run-length compression of a visibility row
pub fn compress_row(row: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(row.len());
    let mut i = 0;

    while i < row.len() {
        out.push(row[i]);

        if row[i] != 0 {
            i += 1;
            continue;
        }

        let mut rep = 1;
        i += 1;
        while i < row.len() && row[i] == 0 && rep < 255 {
            rep += 1;
            i += 1;
        }
        out.push(rep as u8);
    }

    out
}

/// Expand row compressed by `compress_row` into `len` bytes
pub fn decompress_row(data: &[u8], len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut bytes = data.iter().copied();

    while out.len() < len {
        let Some(value) = bytes.next() else {
            break;
        };

        if value != 0 {
            out.push(value);
            continue;
        }

        let rep = bytes.next().unwrap_or(1) as usize;
        out.extend(std::iter::repeat_n(0, rep.min(len - out.len())));
    }

    out.resize(len, 0);
    out
}

/// Solver output
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VisData {
    /// Uncompressed row of every real leaf, one bit per real leaf
    pub rows: Vec<Vec<u8>>,

    /// Compressed row of every cluster
    pub compressed: Vec<Vec<u8>>,

    /// Offset of every cluster row in `visdata()`
    pub offsets: Vec<usize>,

    /// Average count of leaves visible from a leaf
    pub average_visible: usize,
}

impl VisData {
    /// Compressed rows, concatenated
    pub fn visdata(&self) -> Vec<u8> {
        self.compressed.concat()
    }

    /// Check if real leaf `to` is visible from real leaf `from`
    pub fn is_visible(&self, from: usize, to: usize) -> bool {
        self.rows[from][to >> 3] & (1 << (to & 7)) != 0
    }
}

/// Vis run result
#[derive(Clone, Debug, Default)]
pub struct VisResult {
    pub data: VisData,
    pub stats: VisStats,

    /// State was loaded and flow resumed
    pub resumed: bool,
    pub elapsed: Duration,
}

/// Visible real leaf row of a cluster and visible leaf count
fn cluster_flow(graph: &PortalGraph, cluster: usize) -> (Vec<u8>, usize) {
    let mut buffer = LeafBits::new(graph.num_leafs());

    for portal in graph.leafs[cluster].portals.iter().map(|p| &graph.portals[*p]) {
        buffer.union_with(&portal.state.read().visbits);
    }

    if buffer.get(cluster) {
        log::warn!("leaf portals saw into cluster {cluster}");
    }
    buffer.set(cluster, true);

    let num_real = graph.leaf_clusters.len();
    let mut row = vec![0u8; (num_real + 7) >> 3];
    let mut numvis = 0;

    for (leaf, leaf_cluster) in graph.leaf_clusters.iter().enumerate() {
        if buffer.get(*leaf_cluster) {
            row[leaf >> 3] |= 1 << (leaf & 7);
            numvis += 1;
        }
    }

    log::debug!("cluster {cluster:4} : {numvis:4} visible");
    (row, numvis)
}

/// Compute potentially visible sets for portal file data.
///
/// With `files` set, progress is checkpointed to the state file and an
/// existing valid state is resumed.
pub fn calc_vis(prt: &PrtFile, settings: &VisSettings, files: Option<&StateFiles>) -> Result<VisResult> {
    let started = Instant::now();
    let mut graph = PortalGraph::new(prt)?;

    log::info!("{:6} leafs", prt.num_leafs);
    log::info!("{:6} clusters", graph.num_leafs());
    log::info!("{:6} portals", prt.portals.len());

    let elapsed_before = match files {
        Some(files) if !settings.nostate => state::load(files, &mut graph),
        _ => None,
    };
    let resumed = elapsed_before.is_some();

    if resumed {
        log::info!("loaded previous state, resuming progress");
    } else {
        log::info!("calculating base vis");
        graph.base_portal_vis(settings);
    }

    log::info!("calculating full vis");
    let stats = if settings.fast {
        graph.fast_vis();
        VisStats::default()
    } else {
        let solver = Solver {
            graph: &graph,
            settings,
            files,
            started,
            elapsed_before: elapsed_before.unwrap_or_default(),
            last_save: Mutex::new(Instant::now()),
        };
        let stats = solver.run()?;
        stats.log();
        stats
    };

    log::info!("expanding clusters");
    let mut cluster_rows = Vec::with_capacity(graph.num_leafs());
    let mut total_visible = 0;

    for cluster in 0..graph.num_leafs() {
        let (row, numvis) = cluster_flow(&graph, cluster);
        let members = graph.leaf_clusters.iter().filter(|c| **c == cluster).count();

        total_visible += numvis * members;
        cluster_rows.push(row);
    }

    let compressed = cluster_rows.iter().map(|row| compress_row(row)).collect::<Vec<_>>();
    let offsets = compressed
        .iter()
        .scan(0, |offset, row| {
            let current = *offset;
            *offset += row.len();
            Some(current)
        })
        .collect::<Vec<_>>();
    let rows = graph.leaf_clusters.iter().map(|c| cluster_rows[*c].clone()).collect::<Vec<_>>();

    let average_visible = total_visible / graph.leaf_clusters.len().max(1);
    log::info!("average leafs visible: {average_visible}");

    let data = VisData { rows, compressed, offsets, average_visible };
    log::info!("visdatasize: {}", data.compressed.iter().map(Vec::len).sum::<usize>());

    if let Some(files) = files {
        if settings.autoclean {
            state::clean(files)?;
        }
    }

    Ok(VisResult { data, stats, resumed, elapsed: elapsed_before.unwrap_or_default() + started.elapsed() })
}
