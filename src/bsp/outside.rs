//! Outside fill and leak detection.
//!
//! Space reachable from beyond the map bounds is flooded from the void
//! inwards. If the flood reaches a leaf holding a point entity the map
//! leaks, otherwise every flooded leaf is filled with solid.

use std::collections::VecDeque;

use crate::{config::Settings, contents::Contents, math::Vec3d};

use super::{brush::OriginalBrushes, plane_set::PlaneSet, portals::{Portal, PortalMode}, NodeId, PortalId, Tree};

/// Path from an occupied leaf to the void
#[derive(Clone, Debug)]
pub struct Leak {
    /// Index of the leaking occupant point
    pub occupant: usize,

    /// Leaf the occupant is in
    pub leaf: NodeId,

    /// Portals crossed on the way to the void, occupant side first
    pub portals: Vec<PortalId>,

    /// Points along the path, spaced by `Settings::leak_dist`
    pub trail: Vec<Vec3d>,
}

/// Outside fill result
#[derive(Clone, Debug, Default)]
pub struct FillResult {
    /// Map has occupants and none of them is reachable from the void
    pub sealed: bool,
    pub leak: Option<Leak>,

    /// Leaves turned solid
    pub outleafs: usize,
}

/// Append points from `from` towards `to`, `step` apart. `to` itself is not added.
fn push_trail_segment(trail: &mut Vec<Vec3d>, from: Vec3d, to: Vec3d, step: f64) {
    let Some(dir) = (to - from).checked_normalized() else {
        return;
    };
    let mut dist = (to - from).length();
    let mut point = from;

    while dist > step {
        trail.push(point);
        point += dir * step;
        dist -= step;
    }
}

impl Tree {
    /// Portal with non-opaque leaves on both sides, not touching the sentinel
    fn is_portal_passable(&self, portal: &Portal) -> bool {
        !portal.nodes.iter().any(|n| *n == self.outside || self.is_opaque(*n))
    }

    fn clear_occupied(&mut self) {
        for node in &mut self.nodes {
            if let Some(leaf) = node.leaf_mut() {
                leaf.outside_distance = None;
                leaf.occupant = None;
            }
        }
    }

    /// Find distinct non-opaque leaves holding occupant points
    fn find_occupied_leafs(&mut self, planes: &PlaneSet, occupants: &[Vec3d]) -> Vec<NodeId> {
        let mut result = Vec::new();

        for (index, point) in occupants.iter().enumerate() {
            let id = self.point_in_leaf(*point, planes, PortalMode::Tree);
            if self.is_opaque(id) {
                continue;
            }

            let Some(leaf) = self.leaf_mut(id) else {
                continue;
            };
            if leaf.occupant.is_some() {
                continue;
            }
            leaf.occupant = Some(index);
            result.push(id);
        }

        result
    }

    /// Breadth-first flood from the void leaf next to the outside sentinel
    fn flood_fill_from_void(&mut self) {
        let Some(start) = self.node(self.outside).portals.first().map(|p| self.portal(*p).other(self.outside)) else {
            log::warn!("outside node has no portals, nothing to flood");
            return;
        };

        let mut queue = VecDeque::from([(start, 0usize)]);

        while let Some((id, distance)) = queue.pop_front() {
            let Some(leaf) = self.leaf_mut(id) else {
                continue;
            };
            if leaf.outside_distance.is_some() {
                continue;
            }
            leaf.outside_distance = Some(distance);

            for portal in self.node(id).portals.iter().map(|p| self.portal(*p)) {
                if self.is_portal_passable(portal) {
                    queue.push_back((portal.other(id), distance + 1));
                }
            }
        }
    }

    /// Portals leading from the occupied leaf to the void by decreasing distance
    fn find_portals_to_void(&self, occupied: NodeId) -> Vec<PortalId> {
        let mut result = Vec::new();
        let mut id = occupied;

        loop {
            let Some(distance) = self.leaf(id).and_then(|l| l.outside_distance) else {
                break;
            };
            if distance == 0 {
                break;
            }

            let next = self
                .node(id)
                .portals
                .iter()
                .copied()
                .filter(|p| self.is_portal_passable(self.portal(*p)))
                .filter_map(|p| {
                    let neighbour = self.portal(p).other(id);
                    let d = self.leaf(neighbour)?.outside_distance?;
                    (d < distance).then_some((d, p, neighbour))
                })
                .min_by_key(|(d, _, _)| *d);

            let Some((_, portal, neighbour)) = next else {
                log::warn!("leak path is broken at node {}", id.into_index());
                break;
            };

            result.push(portal);
            id = neighbour;
        }

        result
    }

    fn leak_trail(&self, origin: Vec3d, portals: &[PortalId], leak_dist: f64) -> Vec<Vec3d> {
        let mut trail = Vec::new();
        let mut prev = origin;

        let void_leaf = portals.last().map(|p| {
            let portal = self.portal(*p);
            // the later node on the path has the smaller distance
            let [a, b] = portal.nodes;
            let da = self.leaf(a).and_then(|l| l.outside_distance).unwrap_or(usize::MAX);
            let db = self.leaf(b).and_then(|l| l.outside_distance).unwrap_or(usize::MAX);
            if da < db { a } else { b }
        });

        let exit = void_leaf.and_then(|leaf| {
            self.node(leaf)
                .portals
                .iter()
                .map(|p| self.portal(*p))
                .find(|p| p.side_of(self.outside).is_some())
                .map(|p| p.winding.center())
        });

        for point in portals.iter().map(|p| self.portal(*p).winding.center()).chain(exit) {
            push_trail_segment(&mut trail, prev, point, leak_dist);
            prev = point;
        }
        trail.push(prev);

        trail
    }

    /// Turn every reached non-solid non-sky leaf solid
    fn out_leafs_to_solid(&mut self) -> usize {
        let mut count = 0;

        for node in &mut self.nodes {
            let Some(leaf) = node.leaf_mut() else {
                continue;
            };
            if leaf.outside_distance.is_none() || leaf.contents.is_solid() || leaf.contents.is_sky() {
                continue;
            }

            leaf.contents = Contents::SOLID;
            count += 1;
        }

        count
    }

    /// Mark original brush sides touching non-opaque leaves visible
    fn mark_visible_sides(&self, originals: &OriginalBrushes) {
        for id in self.leaves() {
            if self.is_opaque(id) {
                continue;
            }

            for portal in self.node(id).portals.iter().map(|p| self.portal(*p)) {
                let Some(neighbour) = self.leaf(portal.other(id)) else {
                    continue;
                };

                for brush in neighbour.original_brushes.iter().map(|b| originals.get(*b)) {
                    for side in &brush.sides {
                        if side.plane_num & !1 == portal.plane_num & !1 {
                            side.set_visible(true);
                        }
                    }
                }
            }
        }
    }

    /// Flood the void and fill unreachable space. Tree must have tree mode portals.
    pub fn fill_outside(
        &mut self,
        planes: &PlaneSet,
        occupants: &[Vec3d],
        originals: &OriginalBrushes,
        settings: &Settings,
    ) -> FillResult {
        self.clear_occupied();

        let occupied = self.find_occupied_leafs(planes, occupants);
        if occupied.is_empty() {
            log::warn!("no entities in empty space, no filling performed");
            return FillResult::default();
        }

        self.flood_fill_from_void();

        let best = occupied
            .iter()
            .filter_map(|id| self.leaf(*id).and_then(|l| l.outside_distance).map(|d| (d, *id)))
            .min_by_key(|(d, _)| *d);

        if let Some((_, leaf)) = best {
            let occupant = self.leaf(leaf).and_then(|l| l.occupant).unwrap_or_default();
            let origin = occupants[occupant];

            let portals = self.find_portals_to_void(leaf);
            let trail = self.leak_trail(origin, &portals, settings.leak_dist);

            log::warn!(
                "reached occupant {occupant} at ({} {} {}), no filling performed",
                origin.x, origin.y, origin.z,
            );
            self.clear_occupied();

            return FillResult {
                sealed: false,
                leak: Some(Leak { occupant, leaf, portals, trail }),
                outleafs: 0,
            };
        }

        let outleafs = self.out_leafs_to_solid();

        originals.hide_all_sides();
        self.mark_visible_sides(originals);

        log::info!("{outleafs:8} outleafs");

        FillResult { sealed: true, leak: None, outleafs }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trail_spacing() {
        let mut trail = Vec::new();
        push_trail_segment(&mut trail, Vec3d::new(0.0, 0.0, 0.0), Vec3d::new(7.0, 0.0, 0.0), 2.0);

        assert_eq!(trail, vec![
            Vec3d::new(0.0, 0.0, 0.0),
            Vec3d::new(2.0, 0.0, 0.0),
            Vec3d::new(4.0, 0.0, 0.0),
        ]);

        trail.clear();
        push_trail_segment(&mut trail, Vec3d::new(1.0, 1.0, 1.0), Vec3d::new(1.0, 1.0, 1.0), 2.0);
        assert!(trail.is_empty());
    }
}
