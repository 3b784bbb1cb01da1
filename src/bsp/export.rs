//! Flat tree representation. Nodes, leaves and planes are numbered in
//! depth-first order, front child first, so writers get stable indices.

use std::collections::HashMap;

use crate::{contents::Contents, geom::{BoundBox, Plane, PlaneType}, winding::Winding};

use super::{plane_set::PlaneSet, NodeId, NodeKind, Tree};

/// Reference to node child
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Child {
    Node(usize),
    Leaf(usize),
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ExportedPlane {
    pub plane: Plane,
    pub kind: PlaneType,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExportedNode {
    /// Index in `ExportedGraph::planes`
    pub plane: usize,

    /// Front and back children
    pub children: [Child; 2],
    pub bounds: BoundBox,
    pub detail_separator: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExportedLeaf {
    pub contents: Contents,
    pub bounds: BoundBox,
    pub visleaf: Option<usize>,
    pub cluster: Option<usize>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExportedPortal {
    /// Index in `ExportedGraph::planes`, normal points into `children[0]`
    pub plane: usize,
    pub winding: Winding,
    pub children: [Child; 2],
}

/// Tree as flat arrays. Portals touching the outside sentinel are not exported.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExportedGraph {
    pub planes: Vec<ExportedPlane>,
    pub nodes: Vec<ExportedNode>,
    pub leaves: Vec<ExportedLeaf>,
    pub portals: Vec<ExportedPortal>,
}

impl ExportedGraph {
    /// Root reference
    pub fn head(&self) -> Option<Child> {
        if !self.nodes.is_empty() {
            Some(Child::Node(0))
        } else if !self.leaves.is_empty() {
            Some(Child::Leaf(0))
        } else {
            None
        }
    }
}

/// Output plane numbering, only positive planes are written
struct PlaneMap<'a> {
    planes: &'a PlaneSet,
    indices: HashMap<usize, usize>,
    output: Vec<ExportedPlane>,
}

impl PlaneMap<'_> {
    fn get(&mut self, plane_num: usize) -> usize {
        let positive = plane_num & !1;

        *self.indices.entry(positive).or_insert_with(|| {
            let plane = self.planes.get(positive);
            self.output.push(ExportedPlane { plane: plane.plane, kind: plane.kind });
            self.output.len() - 1
        })
    }
}

impl Tree {
    /// Flatten the tree
    pub fn export(&self, planes: &PlaneSet) -> ExportedGraph {
        let order = self.nodes_depth_first();

        let mut children = HashMap::<NodeId, Child>::with_capacity(order.len());
        let (mut node_count, mut leaf_count) = (0, 0);
        for id in &order {
            let child = if self.node(*id).is_leaf() {
                leaf_count += 1;
                Child::Leaf(leaf_count - 1)
            } else {
                node_count += 1;
                Child::Node(node_count - 1)
            };
            children.insert(*id, child);
        }

        let mut plane_map = PlaneMap { planes, indices: HashMap::new(), output: Vec::new() };
        let mut graph = ExportedGraph::default();

        for id in &order {
            let node = self.node(*id);

            match &node.kind {
                NodeKind::Decision(decision) => graph.nodes.push(ExportedNode {
                    plane: plane_map.get(decision.plane_num),
                    children: decision.children.map(|c| children[&c]),
                    bounds: node.bounds,
                    detail_separator: decision.detail_separator,
                }),
                NodeKind::Leaf(leaf) => graph.leaves.push(ExportedLeaf {
                    contents: leaf.contents,
                    bounds: node.bounds,
                    visleaf: leaf.visleaf,
                    cluster: node.cluster,
                }),
            }
        }

        for portal in &self.portals {
            let (Some(front), Some(back)) = (children.get(&portal.nodes[0]), children.get(&portal.nodes[1])) else {
                continue;
            };

            graph.portals.push(ExportedPortal {
                plane: plane_map.get(portal.plane_num),
                winding: portal.winding.clone(),
                children: [*front, *back],
            });
        }

        graph.planes = plane_map.output;
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bsp::{brush::{tests::box_faces, Brush, OriginalBrushes}, builder::build_tree, portals::PortalMode},
        config::{Settings, SplitType},
        math::Vec3d,
    };

    #[test]
    fn depth_first_numbering() {
        let settings = Settings::default();
        let mut planes = PlaneSet::new();
        let mut originals = OriginalBrushes::new();
        let faces = box_faces(Vec3d::new(-16.0, -16.0, -16.0), Vec3d::new(16.0, 16.0, 16.0), "wall");
        let brush = Brush::load(0, Contents::SOLID, &faces, &mut planes, &mut originals, &settings)
            .unwrap()
            .unwrap();

        let mut tree = build_tree(&mut planes, vec![brush], SplitType::Precise, &settings).unwrap();
        tree.make_tree_portals(&mut planes, PortalMode::Tree, &settings).unwrap();
        let graph = tree.export(&planes);

        assert_eq!(graph.head(), Some(Child::Node(0)));
        assert_eq!(graph.nodes.len() + graph.leaves.len(), tree.nodes_depth_first().len());

        // every child reference points forward and every item is referenced once
        let mut seen_nodes = vec![false; graph.nodes.len()];
        let mut seen_leaves = vec![false; graph.leaves.len()];
        for (index, node) in graph.nodes.iter().enumerate() {
            assert!(node.plane < graph.planes.len());
            for child in node.children {
                match child {
                    Child::Node(n) => {
                        assert!(n > index);
                        assert!(!seen_nodes[n]);
                        seen_nodes[n] = true;
                    }
                    Child::Leaf(l) => {
                        assert!(!seen_leaves[l]);
                        seen_leaves[l] = true;
                    }
                }
            }
        }
        assert!(seen_nodes.iter().skip(1).all(|s| *s));
        assert!(seen_leaves.iter().all(|s| *s));

        assert_eq!(graph.leaves.iter().filter(|l| l.contents.is_solid()).count(), 1);

        // headnode portals touch the sentinel and stay out
        assert!(graph.portals.len() < tree.portals.len());
        assert!(graph.planes.iter().all(|p| p.plane.normal[p.kind.axis()] >= 0.0));
    }
}
