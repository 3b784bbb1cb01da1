//! Per-run statistics. Every compile stage gets its own context, so
//! parallel compiles never share counters.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Counter shared by parallel builder tasks
#[derive(Debug, Default)]
pub struct Counter(AtomicUsize);

impl Counter {
    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, value: usize) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// BrushBSP statistics
#[derive(Debug, Default)]
pub struct BspStats {
    /// Decision nodes
    pub nodes: Counter,

    /// Decision nodes split by a non-visible side
    pub nonvis_nodes: Counter,

    /// Leaves, solid ones included
    pub leafs: Counter,

    /// Leaves with solid contents
    pub solid_leafs: Counter,

    /// Nodes split by the FAST midsplit
    pub midsplit_nodes: Counter,

    /// Brushes split into two fragments
    pub brush_splits: Counter,

    /// Split results thrown away as bogus
    pub bogus_brushes: Counter,

    /// Fragments dropped for being smaller than microvolume
    pub tiny_volumes: Counter,

    pub huge_midwindings: Counter,

    /// Brushes that were only slightly crossing the split plane
    pub epsilon_brushes: Counter,
}

impl BspStats {
    pub fn log(&self) {
        log::info!("{:8} decision nodes", self.nodes.get());
        log::info!("{:8} non-visible nodes", self.nonvis_nodes.get());
        log::info!("{:8} leafs ({} solid)", self.leafs.get(), self.solid_leafs.get());
        log::info!("{:8} midsplit nodes", self.midsplit_nodes.get());
        log::info!("{:8} brush splits", self.brush_splits.get());

        if self.bogus_brushes.get() > 0 {
            log::info!("{:8} bogus brushes", self.bogus_brushes.get());
        }
        if self.tiny_volumes.get() > 0 {
            log::info!("{:8} tiny volumes removed after splits", self.tiny_volumes.get());
        }
        if self.huge_midwindings.get() > 0 {
            log::info!("{:8} huge midwindings", self.huge_midwindings.get());
        }
        log::debug!("{:8} epsilon brushes", self.epsilon_brushes.get());
    }
}

/// Portal generator statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PortalStats {
    pub portals: usize,

    /// Portals with area below tiny threshold. Kept, counted for diagnostics only.
    pub tiny_portals: usize,

    /// Node portals clipped away by their ancestors
    pub clipped_away: usize,
}

impl PortalStats {
    pub fn log(&self) {
        log::info!("{:8} portals", self.portals);
        if self.tiny_portals > 0 {
            log::info!("{:8} tiny portals", self.tiny_portals);
        }
        if self.clipped_away > 0 {
            log::warn!("{:8} node portals were clipped away", self.clipped_away);
        }
    }
}

/// Visibility flow statistics, summed over worker threads
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VisStats {
    /// Portal windings tested against separators
    pub portal_test: usize,

    /// Portal windings that survived separator clipping
    pub portal_pass: usize,

    /// Portal-to-portal checks
    pub portal_check: usize,

    /// Recursive flow calls
    pub chains: usize,

    /// Leaves skipped for bringing no new mightsee bits
    pub leaf_skip: usize,

    /// Flow narrowed by visibility of a finished portal
    pub vis_test: usize,

    /// Flow narrowed by mightsee of an unfinished portal
    pub might_test: usize,

    /// Stack winding overflows, unclipped winding kept
    pub noclip: usize,

    /// Portals whose separator cache filled up
    pub separator_overflow: usize,
}

impl std::ops::AddAssign for VisStats {
    fn add_assign(&mut self, rhs: Self) {
        self.portal_test += rhs.portal_test;
        self.portal_pass += rhs.portal_pass;
        self.portal_check += rhs.portal_check;
        self.chains += rhs.chains;
        self.leaf_skip += rhs.leaf_skip;
        self.vis_test += rhs.vis_test;
        self.might_test += rhs.might_test;
        self.noclip += rhs.noclip;
        self.separator_overflow += rhs.separator_overflow;
    }
}

impl VisStats {
    pub fn log(&self) {
        log::info!(
            "portalcheck: {}  portaltest: {}  portalpass: {}",
            self.portal_check, self.portal_test, self.portal_pass,
        );
        log::info!(
            "c_vistest: {}  c_mighttest: {}  c_chains: {}  c_leafskip: {}",
            self.vis_test, self.might_test, self.chains, self.leaf_skip,
        );
        if self.noclip > 0 {
            log::info!("c_noclip: {}", self.noclip);
        }
        if self.separator_overflow > 0 {
            log::info!("separator cache overflows: {}", self.separator_overflow);
        }
    }
}
