//! Compile settings

use std::time::Duration;

use crate::contents::ContentsPriority;

/// Split plane selection policy
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum SplitType {
    /// Pick FAST for big nodes, PRECISE otherwise
    #[default]
    Auto,

    /// Evaluate every candidate plane
    Precise,

    /// Split by the plane closest to node middle
    Fast,
}

/// Visibility solver settings
#[derive(Clone, Debug)]
pub struct VisSettings {
    /// Accept mightsee as final visibility
    pub fast: bool,

    /// Test level of recursive flow, 0..=4, higher is more precise
    pub level: u32,

    /// Maximal distance between portals that may see each other, 0 disables
    pub visdist: f64,

    /// Point-on-plane epsilon used by portal clipping
    pub on_epsilon: f64,

    /// Don't load vis state file
    pub nostate: bool,

    /// Remove state file after successful run
    pub autoclean: bool,

    /// Interval between state saves
    pub state_interval: Duration,
}

impl Default for VisSettings {
    fn default() -> Self {
        Self {
            fast: false,
            level: 4,
            visdist: 0.0,
            on_epsilon: 0.1,
            nostate: false,
            autoclean: true,
            state_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// Compiler settings
#[derive(Clone, Debug)]
pub struct Settings {
    /// Coordinates with magnitude at or above this are out of the world
    pub world_extent: f64,

    pub split_type: SplitType,

    /// Split plane selection epsilon
    pub epsilon: f64,

    /// Brush fragments with smaller volume are dropped
    pub microvolume: f64,

    /// AUTO switches to FAST for nodes bigger than this, values below 64 disable the check
    pub max_node_size: f64,

    /// AUTO switches to FAST when node holds bigger brush fraction than this, 0 disables
    pub midsplit_brush_fraction: f64,

    /// Run CSG chop before building the tree
    pub chop: bool,

    /// Allow chop to fragment both brushes of a pair
    pub chop_fragment: bool,

    /// Fill unreachable leaves with solid
    pub fill: bool,

    /// Distance between leak trail points
    pub leak_dist: f64,

    /// Liquids don't block visibility
    pub transwater: bool,

    /// Sky doesn't block visibility
    pub transsky: bool,

    /// Write PRT1 even if map has detail clusters
    pub force_prt1: bool,

    pub contents_priority: ContentsPriority,

    pub vis: VisSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            world_extent: 65536.0,
            split_type: SplitType::Auto,
            epsilon: 0.0001,
            microvolume: 1.0,
            max_node_size: 1024.0,
            midsplit_brush_fraction: 0.0,
            chop: true,
            chop_fragment: false,
            fill: true,
            leak_dist: 2.0,
            transwater: true,
            transsky: false,
            force_prt1: false,
            contents_priority: ContentsPriority::default(),
            vis: VisSettings::default(),
        }
    }
}

impl Settings {
    pub fn with_split_type(mut self, split_type: SplitType) -> Self {
        self.split_type = split_type;
        self
    }

    pub fn with_chop(mut self, chop: bool) -> Self {
        self.chop = chop;
        self
    }

    pub fn with_max_node_size(mut self, max_node_size: f64) -> Self {
        self.max_node_size = max_node_size;
        self
    }

    pub fn with_contents_priority(mut self, priority: ContentsPriority) -> Self {
        self.contents_priority = priority;
        self
    }

    pub fn with_vis(mut self, vis: VisSettings) -> Self {
        self.vis = vis;
        self
    }
}

impl VisSettings {
    pub fn with_fast(mut self, fast: bool) -> Self {
        self.fast = fast;
        self
    }

    pub fn with_level(mut self, level: u32) -> Self {
        self.level = level;
        self
    }

    pub fn with_visdist(mut self, visdist: f64) -> Self {
        self.visdist = visdist;
        self
    }

    pub fn with_nostate(mut self, nostate: bool) -> Self {
        self.nostate = nostate;
        self
    }
}
