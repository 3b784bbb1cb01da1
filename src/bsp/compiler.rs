//! World compile pipeline

/*
1. Chop overlapping brushes
2. Build BSP tree from brush fragments
3. Build tree portals and flood the outside from the void
4. If sealed, rebuild precise tree with refreshed side visibility and refill
5. Prune same-contents siblings
6. Build vis portals and portal file data
7. Compute potentially visible sets
8. Flatten tree for writers
*/

use std::path::Path;

use crate::{
    config::{Settings, SplitType},
    error::Result,
    math::Vec3d,
    prt::PrtFile,
    stats::PortalStats,
    vis::{self, state::StateFiles, VisResult},
};

use super::{
    brush::{Brush, OriginalBrushes},
    builder::build_tree,
    csg::chop_brushes,
    export::ExportedGraph,
    outside::FillResult,
    plane_set::PlaneSet,
    portals::PortalMode,
    Tree,
};

/// Loaded brushes with their planes
#[derive(Default)]
pub struct BrushSet {
    pub planes: PlaneSet,
    pub originals: OriginalBrushes,
    pub brushes: Vec<Brush>,

    /// Points that must not be reachable from outside, point entity origins usually
    pub occupants: Vec<Vec3d>,
}

/// Tree with portal data, ready for vis
pub struct World {
    pub planes: PlaneSet,
    pub originals: OriginalBrushes,
    pub tree: Tree,

    /// Result of the last outside fill
    pub fill: FillResult,

    /// Statistics of vis portal generation
    pub portal_stats: PortalStats,
    pub prt: PrtFile,
}

/// Compile result
pub struct Compiled {
    pub world: World,
    pub vis: VisResult,
    pub graph: ExportedGraph,
}

impl World {
    /// Map leaks, outside wasn't filled
    pub fn is_leaked(&self) -> bool {
        self.fill.leak.is_some()
    }
}

/// Fill outside of the tree if enabled
fn fill(tree: &mut Tree, set: &mut BrushSet, settings: &Settings) -> Result<FillResult> {
    if !settings.fill {
        return Ok(FillResult::default());
    }

    tree.make_tree_portals(&mut set.planes, PortalMode::Tree, settings)?;
    Ok(tree.fill_outside(&set.planes, &set.occupants, &set.originals, settings))
}

/// Build the world tree and its portal file data
pub fn build_world(mut set: BrushSet, settings: &Settings) -> Result<World> {
    log::info!("---- brush bsp ----");
    log::info!("{:8} brushes", set.brushes.len());

    let mut brushes = std::mem::take(&mut set.brushes);
    if settings.chop {
        brushes = chop_brushes(brushes, &set.planes, settings);
        log::info!("{:8} brushes after chop", brushes.len());
    }

    let mut tree = build_tree(&mut set.planes, brushes.clone(), settings.split_type, settings)?;

    log::info!("---- outside fill ----");
    let mut fill_result = fill(&mut tree, &mut set, settings)?;

    if fill_result.sealed {
        // sides facing the void are invisible now, they stop being split candidates
        for brush in &mut brushes {
            brush.refresh_visibility(&set.originals);
        }

        log::info!("---- rebuilding precise tree ----");
        tree = build_tree(&mut set.planes, brushes, SplitType::Precise, settings)?;
        fill_result = fill(&mut tree, &mut set, settings)?;
    }

    tree.prune();

    log::info!("---- vis portals ----");
    let portal_stats = tree.make_tree_portals(&mut set.planes, PortalMode::Vis, settings)?;
    let prt = tree.portal_file(&set.planes, settings);

    Ok(World {
        planes: set.planes,
        originals: set.originals,
        tree,
        fill: fill_result,
        portal_stats,
        prt,
    })
}

/// Run the whole pipeline. With `portal_path` set, the portal file is
/// written there and vis checkpoints go next to it.
pub fn compile(set: BrushSet, settings: &Settings, portal_path: Option<&Path>) -> Result<Compiled> {
    let mut world = build_world(set, settings)?;

    if world.is_leaked() {
        log::warn!("map leaks, vis runs on unfilled tree");
    }

    let files = match portal_path {
        Some(path) => {
            world.prt.save(path)?;
            Some(StateFiles::for_portal_file(path))
        }
        None => None,
    };

    log::info!("---- vis ----");
    let vis = vis::calc_vis(&world.prt, &settings.vis, files.as_ref())?;

    world.tree.detail_to_solid();
    let graph = world.tree.export(&world.planes);

    log::info!("{:8} exported nodes", graph.nodes.len());
    log::info!("{:8} exported leafs", graph.leaves.len());

    Ok(Compiled { world, vis, graph })
}

/// Vis a portal file from disk, resuming saved state
pub fn vis_portal_file(portal_path: &Path, settings: &Settings) -> Result<VisResult> {
    let prt = PrtFile::load(portal_path)?;
    let files = StateFiles::for_portal_file(portal_path);

    vis::calc_vis(&prt, &settings.vis, Some(&files))
}
