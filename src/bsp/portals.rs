//! Portal generation and portal file data

use crate::{
    config::Settings,
    contents::Contents,
    error::GeometryError,
    geom::{Plane, ON_EPSILON},
    math::Vec3d,
    prt::{PrtFile, PrtFormat, PrtPortal},
    stats::PortalStats,
    winding::Winding,
};

use super::{plane_set::PlaneSet, NodeId, NodeKind, PortalId, Tree};

/// Portals with smaller area are counted as tiny
pub const TINY_AREA: f64 = 1.0;

/// Portal plane and winding plane normals must agree this well to keep leaf order
const ANGLE_EPSILON: f64 = 0.000001;

/// Where portal generation stops
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortalMode {
    /// Portals between every pair of touching leaves
    Tree,

    /// Detail separators act as leaves, one portal set per cluster
    Vis,
}

/// Polygon shared by two nodes
#[derive(Clone, Debug)]
pub struct Portal {
    /// Plane normal points into `nodes[0]`
    pub plane_num: usize,
    pub winding: Winding,
    pub nodes: [NodeId; 2],
}

impl Portal {
    /// Index of the node in `nodes`, None if portal doesn't touch it
    pub fn side_of(&self, node: NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| *n == node)
    }

    /// Node on the other side of the portal
    pub fn other(&self, node: NodeId) -> NodeId {
        if self.nodes[0] == node { self.nodes[1] } else { self.nodes[0] }
    }

    /// Plane of the portal as seen from `node`, normal points into it
    pub fn plane_from(&self, node: NodeId, planes: &PlaneSet) -> Plane {
        let plane = planes.get(self.plane_num).plane;
        if self.nodes[0] == node { plane } else { plane.negate_direction() }
    }
}

/// Numbers assigned by `Tree::number_leafs`
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct LeafNumbering {
    /// Non-solid leaves
    pub visleafs: usize,
    pub clusters: usize,

    /// Some cluster holds more than one leaf
    pub uses_detail: bool,
}

impl Tree {
    fn add_portal(&mut self, portal: Portal) -> PortalId {
        let nodes = portal.nodes;
        self.portals.push(portal);
        let id = PortalId::from_index(self.portals.len() - 1);

        for node in nodes {
            self.node_mut(node).portals.push(id);
        }
        id
    }

    /// Six portals between headnode and the outside sentinel
    fn make_headnode_portals(&mut self, planes: &mut PlaneSet, world_extent: f64) -> Result<(), GeometryError> {
        let bounds = self.node(self.head).bounds;
        let mut bound_planes = Vec::with_capacity(6);
        let mut portals = Vec::with_capacity(6);

        for axis in 0..3 {
            for max_side in [false, true] {
                let mut normal = Vec3d::zero();

                // planes face into the headnode
                let plane = if max_side {
                    normal[axis] = -1.0;
                    Plane::new(normal, -bounds.max()[axis])
                } else {
                    normal[axis] = 1.0;
                    Plane::new(normal, bounds.min()[axis])
                };

                let plane_num = planes.add(plane)?;
                let nodes = if plane_num & 1 == 1 {
                    [self.outside, self.head]
                } else {
                    [self.head, self.outside]
                };

                bound_planes.push(plane);
                portals.push(Portal {
                    plane_num: plane_num & !1,
                    winding: Winding::base_for_plane(&plane, world_extent),
                    nodes,
                });
            }
        }

        for (i, mut portal) in portals.into_iter().enumerate() {
            let mut winding = Some(portal.winding);

            for (j, plane) in bound_planes.iter().enumerate() {
                if i == j {
                    continue;
                }
                winding = winding.and_then(|w| w.clip_front(plane, ON_EPSILON, true));
            }

            if let Some(winding) = winding {
                portal.winding = winding;
                self.add_portal(portal);
            }
        }

        Ok(())
    }

    /// Create portal on the node plane and push node portals down to the children
    fn cut_node_portals(&mut self, id: NodeId, planes: &PlaneSet, world_extent: f64, stats: &mut PortalStats) {
        let Some(decision) = self.node(id).decision().cloned() else {
            return;
        };
        let plane = planes.get(decision.plane_num).plane;
        let [front, back] = decision.children;

        let mut winding = Some(Winding::base_for_plane(&plane, world_extent));
        for portal_id in &self.node(id).portals {
            let portal = self.portal(*portal_id);
            let clip_plane = portal.plane_from(id, planes);

            winding = winding.and_then(|w| w.clip_front(&clip_plane, ON_EPSILON, true));
            if winding.is_none() {
                let at = portal.winding.points().first().copied().unwrap_or(Vec3d::zero());
                log::warn!("new portal was clipped away near ({:.3} {:.3} {:.3})", at.x, at.y, at.z);
                stats.clipped_away += 1;
                break;
            }
        }

        if let Some(winding) = winding {
            self.add_portal(Portal { plane_num: decision.plane_num, winding, nodes: [front, back] });
        }

        for portal_id in std::mem::take(&mut self.node_mut(id).portals) {
            let portal = self.portal(portal_id);
            let Some(side) = portal.side_of(id) else {
                continue;
            };
            let other = portal.nodes[side ^ 1];

            let parts = portal.winding.clip(&plane, ON_EPSILON, false);

            match parts {
                (None, _) => {
                    self.portals[portal_id.into_index()].nodes[side] = back;
                    self.node_mut(back).portals.push(portal_id);
                }
                (_, None) => {
                    self.portals[portal_id.into_index()].nodes[side] = front;
                    self.node_mut(front).portals.push(portal_id);
                }
                (Some(front_part), Some(back_part)) => {
                    let mut nodes = [other, other];
                    nodes[side] = back;

                    let portal = &mut self.portals[portal_id.into_index()];
                    let plane_num = portal.plane_num;
                    portal.winding = front_part;
                    portal.nodes[side] = front;
                    self.node_mut(front).portals.push(portal_id);

                    // other node still holds the original id, so only the new part gets linked there
                    self.add_portal(Portal { plane_num, winding: back_part, nodes });
                }
            }
        }
    }

    /// Build portals for the whole tree. Old portals are dropped.
    pub fn make_tree_portals(&mut self, planes: &mut PlaneSet, mode: PortalMode, settings: &Settings) -> Result<PortalStats, GeometryError> {
        self.clear_portals();

        let mut stats = PortalStats::default();
        self.make_headnode_portals(planes, settings.world_extent)?;

        let planes = &*planes;
        let mut stack = vec![self.head];

        while let Some(id) = stack.pop() {
            if self.is_portal_leaf(id, mode) {
                continue;
            }

            self.cut_node_portals(id, planes, settings.world_extent, &mut stats);

            if let NodeKind::Decision(decision) = &self.node(id).kind {
                stack.extend(decision.children);
            }
        }

        stats.portals = self.portals.len();
        stats.tiny_portals = self.portals.iter().filter(|p| p.winding.area() < TINY_AREA).count();
        stats.log();

        Ok(stats)
    }

    /// Check if vis can see through the portal
    pub fn portal_thru(&self, portal: &Portal, settings: &Settings) -> bool {
        let c0 = self.cluster_contents(portal.nodes[0]);
        let c1 = self.cluster_contents(portal.nodes[1]);

        portal_can_see_through(c0, c1, settings)
    }

    /// Assign visleaf and cluster numbers in depth-first order. Leaves under
    /// a detail separator share its cluster, solid leaves get none.
    pub fn number_leafs(&mut self) -> LeafNumbering {
        let mut numbering = LeafNumbering::default();
        let mut stack: Vec<(NodeId, Option<usize>)> = vec![(self.head, None)];

        while let Some((id, mut cluster)) = stack.pop() {
            let node = self.node_mut(id);

            match &mut node.kind {
                NodeKind::Decision(decision) => {
                    node.cluster = None;

                    if cluster.is_none() && decision.detail_separator {
                        numbering.uses_detail = true;
                        cluster = Some(numbering.clusters);
                        numbering.clusters += 1;
                        node.cluster = cluster;
                    }

                    let [front, back] = decision.children;
                    stack.push((back, cluster));
                    stack.push((front, cluster));
                }
                NodeKind::Leaf(leaf) => {
                    if leaf.contents.is_solid() {
                        leaf.visleaf = None;
                        node.cluster = None;
                        continue;
                    }

                    leaf.visleaf = Some(numbering.visleafs);
                    numbering.visleafs += 1;

                    node.cluster = Some(cluster.unwrap_or_else(|| {
                        numbering.clusters += 1;
                        numbering.clusters - 1
                    }));
                }
            }
        }

        numbering
    }

    /// Build portal file data from vis mode portals
    pub fn portal_file(&mut self, planes: &PlaneSet, settings: &Settings) -> PrtFile {
        let numbering = self.number_leafs();
        let by_cluster = numbering.uses_detail;

        let mut portals = Vec::new();

        for id in self.nodes_depth_first() {
            if !self.is_portal_leaf(id, PortalMode::Vis) || self.cluster_contents(id).is_solid() {
                continue;
            }

            let node = self.node(id);
            for portal in node.portals.iter().map(|p| self.portal(*p)) {
                if portal.nodes[0] != id || !self.portal_thru(portal, settings) {
                    continue;
                }

                let number = |n: NodeId| {
                    if by_cluster {
                        self.node(n).cluster
                    } else {
                        self.leaf(n).and_then(|l| l.visleaf)
                    }
                };
                let (Some(front), Some(back)) = (number(portal.nodes[0]), number(portal.nodes[1])) else {
                    log::warn!("portal between unnumbered nodes skipped");
                    continue;
                };

                // vis reads side order from the winding plane, keep them consistent
                let plane = planes.get(portal.plane_num);
                let flipped = portal
                    .winding
                    .plane()
                    .is_some_and(|p| (p.normal ^ plane.normal) < 1.0 - ANGLE_EPSILON);

                portals.push(PrtPortal {
                    clusters: if flipped { [back, front] } else { [front, back] },
                    winding: portal.winding.clone(),
                });
            }
        }

        let leaf_clusters = self
            .leaves()
            .into_iter()
            .filter(|id| self.leaf(*id).is_some_and(|l| l.visleaf.is_some()))
            .filter_map(|id| self.node(id).cluster)
            .collect::<Vec<_>>();

        log::info!("{:8} vis leafs", numbering.visleafs);
        log::info!("{:8} vis clusters", numbering.clusters);
        log::info!("{:8} vis portals", portals.len());

        if !by_cluster {
            return PrtFile {
                format: PrtFormat::Prt1,
                num_clusters: numbering.visleafs,
                num_leafs: numbering.visleafs,
                portals,
                leaf_clusters,
            };
        }

        if settings.force_prt1 {
            // clusters written as leaves, vis rejects such files
            return PrtFile {
                format: PrtFormat::Prt1,
                num_clusters: numbering.clusters,
                num_leafs: numbering.clusters,
                portals,
                leaf_clusters: (0..numbering.clusters).collect(),
            };
        }

        PrtFile {
            format: PrtFormat::Prt2,
            num_clusters: numbering.clusters,
            num_leafs: numbering.visleafs,
            portals,
            leaf_clusters,
        }
    }
}

/// Vis portal test for contents on both sides of a portal
pub fn portal_can_see_through(c0: Contents, c1: Contents, settings: &Settings) -> bool {
    if (c0 | c1).contains(Contents::ILLUSIONARY_VISBLOCKER) {
        return false;
    }

    if settings.transwater
        && ((c0.is_liquid() && c1.is_empty_space()) || (c1.is_liquid() && c0.is_empty_space()))
    {
        return true;
    }

    if settings.transsky
        && ((c0.is_sky() && c1.is_empty_space()) || (c1.is_sky() && c0.is_empty_space()))
    {
        return true;
    }

    if c0.is_solid() || c1.is_solid() {
        return false;
    }

    let see_through = |c: Contents| c.visible() - Contents::MIST;
    see_through(c0) == see_through(c1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bsp::{
            brush::{tests::box_faces, Brush, OriginalBrushes},
            builder::build_tree,
        },
        config::SplitType,
    };

    /// Hollow box room made of six walls
    pub(crate) fn room_walls(min: Vec3d, max: Vec3d, thickness: f64) -> Vec<(Vec3d, Vec3d)> {
        let mut walls = Vec::new();
        for axis in 0..3 {
            let mut lo_max = max;
            lo_max[axis] = min[axis] + thickness;
            walls.push((min, lo_max));

            let mut hi_min = min;
            hi_min[axis] = max[axis] - thickness;
            walls.push((hi_min, max));
        }
        walls
    }

    fn build(boxes: &[(Vec3d, Vec3d)], planes: &mut PlaneSet) -> Tree {
        let mut originals = OriginalBrushes::new();
        let settings = Settings::default();
        let brushes = boxes
            .iter()
            .map(|(min, max)| {
                Brush::load(0, Contents::SOLID, &box_faces(*min, *max, "wall"), planes, &mut originals, &settings)
                    .unwrap()
                    .unwrap()
            })
            .collect();

        build_tree(planes, brushes, SplitType::Precise, &settings).unwrap()
    }

    #[test]
    fn portals_are_paired() {
        let mut planes = PlaneSet::new();
        let mut tree = build(&room_walls(Vec3d::new(0.0, 0.0, 0.0), Vec3d::new(128.0, 128.0, 128.0), 16.0), &mut planes);

        tree.make_tree_portals(&mut planes, PortalMode::Tree, &Settings::default()).unwrap();
        assert!(!tree.portals.is_empty());

        for (index, portal) in tree.portals.iter().enumerate() {
            let id = PortalId::from_index(index);

            assert_ne!(portal.nodes[0], portal.nodes[1]);
            for node in portal.nodes {
                assert!(tree.node(node).is_leaf());
                assert_eq!(tree.node(node).portals.iter().filter(|p| **p == id).count(), 1);
            }

            if portal.nodes[0] == tree.outside {
                continue;
            }

            // normal points into the front node
            let plane = portal.plane_from(portal.nodes[0], &planes);
            let inside = tree.node(portal.nodes[0]).bounds.center();
            assert!(plane.point_distance(inside) > 0.0);
        }

        // every portal listed by a node is one of its own
        for (index, node) in tree.nodes.iter().enumerate() {
            for portal in &node.portals {
                assert!(tree.portal(*portal).side_of(NodeId::from_index(index)).is_some());
            }
        }
    }

    #[test]
    fn headnode_portals_touch_outside() {
        let mut planes = PlaneSet::new();
        let mut tree = build(&[(Vec3d::new(0.0, 0.0, 0.0), Vec3d::new(16.0, 16.0, 16.0))], &mut planes);

        tree.make_tree_portals(&mut planes, PortalMode::Tree, &Settings::default()).unwrap();

        let outside = tree.node(tree.outside);
        assert!(outside.portals.len() >= 6);

        let area: f64 = outside.portals.iter().map(|p| tree.portal(*p).winding.area()).sum();
        let size = tree.node(tree.head).bounds.size();
        assert!((area - 2.0 * (size.x * size.y + size.y * size.z + size.x * size.z)).abs() < 1e-3);
    }

    #[test]
    fn see_through_rules() {
        let settings = Settings::default();

        assert!(portal_can_see_through(Contents::empty(), Contents::empty(), &settings));
        assert!(portal_can_see_through(Contents::WATER, Contents::empty(), &settings));
        assert!(!portal_can_see_through(Contents::WATER, Contents::empty(), &Settings { transwater: false, ..Settings::default() }));
        assert!(!portal_can_see_through(Contents::SKY, Contents::empty(), &settings));
        assert!(portal_can_see_through(Contents::SKY, Contents::empty(), &Settings { transsky: true, ..Settings::default() }));
        assert!(!portal_can_see_through(Contents::SOLID, Contents::empty(), &settings));
        assert!(!portal_can_see_through(Contents::empty(), Contents::SOLID | Contents::DETAIL, &settings));
        assert!(!portal_can_see_through(Contents::ILLUSIONARY_VISBLOCKER, Contents::empty(), &settings));
        assert!(portal_can_see_through(Contents::MIST | Contents::DETAIL, Contents::empty(), &settings));
    }

    #[test]
    fn room_portal_file() {
        let mut planes = PlaneSet::new();
        let mut tree = build(&room_walls(Vec3d::new(0.0, 0.0, 0.0), Vec3d::new(128.0, 128.0, 128.0), 16.0), &mut planes);

        tree.make_tree_portals(&mut planes, PortalMode::Vis, &Settings::default()).unwrap();
        let prt = tree.portal_file(&planes, &Settings::default());

        assert_eq!(prt.format, PrtFormat::Prt1);
        assert_eq!(prt.num_leafs, prt.num_clusters);
        assert_eq!(prt.leaf_clusters.len(), prt.num_leafs);
        for portal in &prt.portals {
            assert!(portal.clusters.iter().all(|c| *c < prt.num_clusters));
        }
    }
}
