//! BSP tree structure declaration module

use std::num::NonZeroU32;

use crate::{contents::Contents, geom::BoundBox, math::Vec3d};

/// Generic id implementation
macro_rules! impl_id {
    ($name: ident) => {
        /// Unique identifier
        #[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Ord, PartialOrd)]
        pub struct $name(NonZeroU32);

        impl $name {
            /// Build id from index. Panics if index does not fit into u32 id space.
            pub fn from_index(index: usize) -> Self {
                u32::try_from(index)
                    .ok()
                    .and_then(|index| NonZeroU32::MIN.checked_add(index))
                    .map($name)
                    .unwrap_or_else(|| panic!("{} index {index} out of range", stringify!($name)))
            }

            /// Get index by id
            pub fn into_index(self) -> usize {
                self.0.get() as usize - 1
            }
        }
    };
}

impl_id!(NodeId);
impl_id!(PortalId);
impl_id!(OriginalBrushId);

/// Plane set
pub mod plane_set;

/// Brushes and brush fragments
pub mod brush;

/// Overlapping brush chopping
pub mod csg;

/// Tree builder
pub mod builder;

/// Portal generator
pub mod portals;

/// Outside fill and leak detection
pub mod outside;

/// Flat tree representation for file writers
pub mod export;

/// Compile pipeline
pub mod compiler;

use plane_set::PlaneSet;
use portals::{Portal, PortalMode};

/// Decision node data
#[derive(Clone, Debug)]
pub struct Decision {
    /// Split plane. Front child lies in front of it.
    pub plane_num: usize,

    /// Front and back children
    pub children: [NodeId; 2],

    /// Node splits detail brushes only, space below it forms one vis cluster
    pub detail_separator: bool,

    /// Node plane comes from a hint face
    pub hint: bool,
}

/// Leaf node data
#[derive(Clone, Debug, Default)]
pub struct Leaf {
    pub contents: Contents,

    /// Original brushes with fragments inside the leaf, sorted
    pub original_brushes: Vec<OriginalBrushId>,

    /// Vis leaf number, None for solid leaves
    pub visleaf: Option<usize>,

    /// BFS distance from outside, None if not reached by the void flood
    pub outside_distance: Option<usize>,

    /// Index of the occupant point inside the leaf
    pub occupant: Option<usize>,
}

impl Leaf {
    pub fn new(contents: Contents, original_brushes: Vec<OriginalBrushId>) -> Self {
        Self { contents, original_brushes, ..Default::default() }
    }

    /// Leaf blocks outside flood fill
    pub fn is_opaque(&self) -> bool {
        self.contents.seals_map()
    }
}

/// Node kind
#[derive(Clone, Debug)]
pub enum NodeKind {
    /// Space partition
    Decision(Decision),

    /// Final convex region
    Leaf(Leaf),
}

/// BSP tree node
#[derive(Clone, Debug)]
pub struct Node {
    pub bounds: BoundBox,
    pub parent: Option<NodeId>,

    /// Portals touching the node
    pub portals: Vec<PortalId>,

    /// Vis cluster, set for non-solid leaves and top detail separators
    pub cluster: Option<usize>,

    pub kind: NodeKind,
}

impl Node {
    pub fn new_leaf(bounds: BoundBox, leaf: Leaf) -> Self {
        Self { bounds, parent: None, portals: Vec::new(), cluster: None, kind: NodeKind::Leaf(leaf) }
    }

    pub fn new_decision(bounds: BoundBox, decision: Decision) -> Self {
        Self { bounds, parent: None, portals: Vec::new(), cluster: None, kind: NodeKind::Decision(decision) }
    }

    pub fn leaf(&self) -> Option<&Leaf> {
        match &self.kind {
            NodeKind::Leaf(leaf) => Some(leaf),
            NodeKind::Decision(_) => None,
        }
    }

    pub fn leaf_mut(&mut self) -> Option<&mut Leaf> {
        match &mut self.kind {
            NodeKind::Leaf(leaf) => Some(leaf),
            NodeKind::Decision(_) => None,
        }
    }

    pub fn decision(&self) -> Option<&Decision> {
        match &self.kind {
            NodeKind::Decision(decision) => Some(decision),
            NodeKind::Leaf(_) => None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.kind, NodeKind::Leaf(_))
    }

    pub fn is_detail_separator(&self) -> bool {
        matches!(self.kind, NodeKind::Decision(Decision { detail_separator: true, .. }))
    }
}

/// BSP tree with portals
#[derive(Clone, Debug)]
pub struct Tree {
    pub nodes: Vec<Node>,

    /// Root node
    pub head: NodeId,

    /// Sentinel solid leaf for the space outside of headnode bounds
    pub outside: NodeId,

    /// Union of input brush bounds
    pub bounds: BoundBox,

    pub portals: Vec<Portal>,
}

impl Tree {
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.into_index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.into_index()]
    }

    pub fn portal(&self, id: PortalId) -> &Portal {
        &self.portals[id.into_index()]
    }

    pub fn leaf(&self, id: NodeId) -> Option<&Leaf> {
        self.node(id).leaf()
    }

    pub fn leaf_mut(&mut self, id: NodeId) -> Option<&mut Leaf> {
        self.node_mut(id).leaf_mut()
    }

    /// Node contents. Decision nodes get union of their leaf contents, a
    /// cluster is solid only if every leaf in it is solid.
    pub fn cluster_contents(&self, id: NodeId) -> Contents {
        match &self.node(id).kind {
            NodeKind::Leaf(leaf) => leaf.contents,
            NodeKind::Decision(decision) => {
                let front = self.cluster_contents(decision.children[0]);
                let back = self.cluster_contents(decision.children[1]);
                let mut combined = front | back;

                if !(front.is_solid() && back.is_solid()) {
                    combined.remove(Contents::SOLID);
                }
                combined
            }
        }
    }

    /// Check if node is a terminal of portal graph in given mode
    pub fn is_portal_leaf(&self, id: NodeId, mode: PortalMode) -> bool {
        let node = self.node(id);
        node.is_leaf() || (mode == PortalMode::Vis && node.is_detail_separator())
    }

    /// Nodes in depth-first order, front child first
    pub fn nodes_depth_first(&self) -> Vec<NodeId> {
        let mut result = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.head];

        while let Some(id) = stack.pop() {
            result.push(id);

            if let NodeKind::Decision(decision) = &self.node(id).kind {
                stack.push(decision.children[1]);
                stack.push(decision.children[0]);
            }
        }

        result
    }

    /// Leaves in depth-first order, front child first
    pub fn leaves(&self) -> Vec<NodeId> {
        self.nodes_depth_first().into_iter().filter(|id| self.node(*id).is_leaf()).collect()
    }

    /// Find leaf that contains point. In `PortalMode::Vis` detail separators count as leaves.
    /// Point lying exactly on node plane goes to the opaque side, if any.
    pub fn point_in_leaf(&self, point: Vec3d, planes: &PlaneSet, mode: PortalMode) -> NodeId {
        self.point_in_subtree(self.head, point, planes, mode)
    }

    fn point_in_subtree(&self, from: NodeId, point: Vec3d, planes: &PlaneSet, mode: PortalMode) -> NodeId {
        let mut id = from;

        loop {
            if self.is_portal_leaf(id, mode) {
                return id;
            }
            let Some(decision) = self.node(id).decision() else {
                return id;
            };

            let dist = planes.get(decision.plane_num).point_distance(point);

            id = if dist > 0.0 {
                decision.children[0]
            } else if dist < 0.0 {
                decision.children[1]
            } else {
                let front = self.point_in_subtree(decision.children[0], point, planes, mode);

                if self.is_opaque(front) {
                    return front;
                }
                decision.children[1]
            };
        }
    }

    /// Opaque leaf test, detail separators are never opaque
    pub fn is_opaque(&self, id: NodeId) -> bool {
        self.leaf(id).is_some_and(Leaf::is_opaque)
    }

    /// Tree depth, root only tree has depth 1
    pub fn depth(&self) -> usize {
        let mut max = 0;
        let mut stack = vec![(self.head, 1usize)];

        while let Some((id, depth)) = stack.pop() {
            max = max.max(depth);
            if let NodeKind::Decision(decision) = &self.node(id).kind {
                stack.extend(decision.children.map(|c| (c, depth + 1)));
            }
        }

        max
    }

    /// Drop all portals
    pub fn clear_portals(&mut self) {
        self.portals.clear();
        for node in &mut self.nodes {
            node.portals.clear();
        }
    }

    /// Turn decision node into leaf, merging children brush lists
    fn convert_to_leaf(&mut self, id: NodeId, contents: Contents) {
        let Some(decision) = self.node(id).decision().cloned() else {
            return;
        };

        let mut original_brushes = decision.children
            .iter()
            .filter_map(|c| self.leaf(*c))
            .flat_map(|l| l.original_brushes.iter().copied())
            .collect::<Vec<_>>();
        original_brushes.sort();
        original_brushes.dedup();

        let occupant = decision.children.iter().filter_map(|c| self.leaf(*c)).find_map(|l| l.occupant);
        let outside_distance = decision.children.iter().filter_map(|c| self.leaf(*c)).filter_map(|l| l.outside_distance).min();

        let node = self.node_mut(id);
        node.kind = NodeKind::Leaf(Leaf { contents, original_brushes, occupant, outside_distance, ..Default::default() });
    }

    /// Merge sibling leaves with identical contents. Empty leaves split by a
    /// hint plane stay apart. Returns number of pruned nodes.
    pub fn prune(&mut self) -> usize {
        let mut pruned = 0;

        // children come after parents in depth-first order
        for id in self.nodes_depth_first().into_iter().rev() {
            let Some(decision) = self.node(id).decision() else {
                continue;
            };
            let [front, back] = decision.children;

            let (Some(f), Some(b)) = (self.leaf(front), self.leaf(back)) else {
                continue;
            };

            if f.contents != b.contents {
                continue;
            }
            if decision.hint && f.contents.is_empty_space() {
                continue;
            }

            let contents = f.contents;
            self.convert_to_leaf(id, contents);
            pruned += 1;
        }

        if pruned > 0 {
            self.clear_portals();
        }
        log::info!("{pruned:8} pruned nodes");
        pruned
    }

    /// Remap detail contents to plain ones before export
    pub fn detail_to_solid(&mut self) {
        for node in &mut self.nodes {
            let Some(leaf) = node.leaf_mut() else {
                continue;
            };

            if leaf.contents.is_detail() {
                if leaf.contents.is_solid() {
                    leaf.contents = Contents::SOLID;
                } else if leaf.contents.contains(Contents::MIST) {
                    leaf.contents = Contents::empty();
                } else {
                    leaf.contents.remove(Contents::DETAIL);
                }
            }
        }

        for id in self.nodes_depth_first().into_iter().rev() {
            let Some(decision) = self.node(id).decision() else {
                continue;
            };

            if decision.children.iter().all(|c| self.leaf(*c).is_some_and(|l| l.contents == Contents::SOLID)) {
                self.convert_to_leaf(id, Contents::SOLID);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_index_round_trip() {
        assert_eq!(NodeId::from_index(0).into_index(), 0);
        assert_eq!(PortalId::from_index(41).into_index(), 41);
        assert_eq!(OriginalBrushId::from_index(u32::MAX as usize - 1).into_index(), u32::MAX as usize - 1);
    }

    #[test]
    #[should_panic(expected = "NodeId index")]
    fn id_index_overflow() {
        NodeId::from_index(u32::MAX as usize);
    }
}
