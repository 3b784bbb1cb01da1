//! Exact portal visibility by recursive separating plane clipping

use std::borrow::Cow;

use crate::{geom::Plane, math::Vec3d, stats::VisStats};

use super::{leafbits::LeafBits, PortalGraph, PortalStatus, VisWinding, MAX_SEPARATORS, MAX_WINDING_FIXED, VIS_EQUAL_EPSILON};

/// Clip winding to the front of `split`. Windings with every point on the
/// plane are kept as is. If the result would have more than
/// `MAX_WINDING_FIXED` points the input is returned unclipped.
pub fn clip_winding<'w>(
    winding: Cow<'w, VisWinding>,
    split: &Plane,
    on_epsilon: f64,
    stats: &mut VisStats,
) -> Option<Cow<'w, VisWinding>> {
    let dot = split.point_distance(winding.origin);
    if dot < -winding.radius {
        return None;
    }
    if dot > winding.radius {
        return Some(winding);
    }

    let points = &winding.points;
    let dists = points.iter().map(|p| split.point_distance(*p)).collect::<Vec<_>>();

    let front = dists.iter().filter(|d| **d > on_epsilon).count();
    let back = dists.iter().filter(|d| **d < -on_epsilon).count();

    // coplanar portals stay, otherwise two portals closer than epsilon hide each other
    if front == 0 && back == 0 {
        return Some(winding);
    }
    if front == 0 {
        return None;
    }
    if back == 0 {
        return Some(winding);
    }

    let side = |d: f64| {
        if d > on_epsilon {
            1
        } else if d < -on_epsilon {
            -1
        } else {
            0
        }
    };

    let mut result = Vec::with_capacity(MAX_WINDING_FIXED);

    for i in 0..points.len() {
        let j = (i + 1) % points.len();
        let (p1, s1, s2) = (points[i], side(dists[i]), side(dists[j]));

        if s1 >= 0 {
            if result.len() == MAX_WINDING_FIXED {
                stats.noclip += 1;
                return Some(winding);
            }
            result.push(p1);
            if s1 == 0 {
                continue;
            }
        }

        if s2 == 0 || s2 == s1 {
            continue;
        }

        let p2 = points[j];
        let fraction = dists[i] / (dists[i] - dists[j]);
        let mut mid = Vec3d::zero();
        for axis in 0..3 {
            mid[axis] = if split.normal[axis] == 1.0 {
                split.distance
            } else if split.normal[axis] == -1.0 {
                -split.distance
            } else {
                p1[axis] + fraction * (p2[axis] - p1[axis])
            };
        }

        if result.len() == MAX_WINDING_FIXED {
            stats.noclip += 1;
            return Some(winding);
        }
        result.push(mid);
    }

    // bounding sphere of the source still encloses the result
    Some(Cow::Owned(VisWinding { points: result, origin: winding.origin, radius: winding.radius }))
}

/// Recursion frame
struct Frame<'a> {
    source: Cow<'a, VisWinding>,

    /// Clipped portal the flow entered the leaf through, None in the base leaf
    pass: Option<Cow<'a, VisWinding>>,

    /// Plane of the entered portal, normal points into the leaf
    portal_plane: Plane,
    mightsee: Cow<'a, LeafBits>,
}

/// Per portal flow context
struct Flow<'a> {
    graph: &'a PortalGraph,
    portal: usize,
    level: u32,
    on_epsilon: f64,

    base_plane: Plane,
    leafvis: LeafBits,
    numcansee: usize,

    /// Leaves on the recursion stack
    stack: Vec<usize>,

    /// Separator cache overflow already reported
    separators_full: bool,
    stats: VisStats,
}

impl<'a> Flow<'a> {
    /// Keep separator for the following portals of the same pass. Full
    /// caches drop it, clipping still uses it.
    fn cache_separator(&mut self, cache: &mut Vec<Plane>, separator: Plane) {
        if cache.len() < MAX_SEPARATORS {
            cache.push(separator);
            return;
        }

        if !self.separators_full {
            self.separators_full = true;
            self.stats.separator_overflow += 1;
            log::warn!("portal {}: more than {MAX_SEPARATORS} separators, cache truncated", self.portal);
        }
    }

    fn clip<'w>(&mut self, winding: Cow<'w, VisWinding>, plane: &Plane) -> Option<Cow<'w, VisWinding>> {
        clip_winding(winding, plane, self.on_epsilon, &mut self.stats)
    }

    /// Build planes through an edge of `source` and a point of `pass` that
    /// separate the two, clip `target` with them.
    ///
    /// Tests 0 and 2 keep `target` on the pass side, 1 and 3 flip the
    /// planes. Planes of tests 0 and 1 are cached in `cache`.
    fn clip_to_separators<'w>(
        &mut self,
        source: &VisWinding,
        source_plane: &Plane,
        pass: &VisWinding,
        mut target: Cow<'w, VisWinding>,
        test: usize,
        cache: &mut [Vec<Plane>; 2],
    ) -> Option<Cow<'w, VisWinding>> {
        let eps = self.on_epsilon;
        let count = source.points.len();

        for i in 0..count {
            let s0 = source.points[i];
            let v1 = source.points[(i + 1) % count] - s0;

            for (j, pj) in pass.points.iter().enumerate() {
                let d = source_plane.point_distance(*pj);
                let flip = if d < -eps {
                    true
                } else if d > eps {
                    false
                } else {
                    continue;
                };

                let normal = v1 % (*pj - s0);
                let len2 = normal.length2();
                if len2 < eps {
                    continue;
                }
                let normal = normal / len2.sqrt();
                let mut separator = Plane::new(normal, normal ^ *pj);
                if flip {
                    separator = separator.negate_direction();
                }

                let mut in_front = 0;
                let separates = pass.points.iter().enumerate().filter(|(k, _)| *k != j).all(|(_, pk)| {
                    let d = separator.point_distance(*pk);
                    if d > eps {
                        in_front += 1;
                    }
                    d >= -eps
                });
                if !separates || in_front == 0 {
                    continue;
                }

                if test & 1 != 0 {
                    separator = separator.negate_direction();
                }

                if test < 2 {
                    self.cache_separator(&mut cache[test], separator);
                }

                target = self.clip(target, &separator)?;
                break;
            }
        }

        Some(target)
    }

    fn recursive_leaf_flow(&mut self, leaf: usize, prev: &Frame<'_>) {
        self.stats.chains += 1;

        if self.stack.contains(&leaf) {
            log::warn!("recursion on leaf {leaf}");
            return;
        }

        if !self.leafvis.get(leaf) {
            self.leafvis.set(leaf, true);
            self.numcansee += 1;
        }

        self.stack.push(leaf);

        let graph = self.graph;
        let mut might = LeafBits::new(graph.leafs.len());
        let mut separators: [Vec<Plane>; 2] = Default::default();

        for portal in graph.leafs[leaf].portals.iter().map(|p| &graph.portals[*p]) {
            if !prev.mightsee.get(portal.leaf) {
                self.stats.leaf_skip += 1;
                continue;
            }

            let more = {
                let state = portal.state.read();
                let test = if state.status == PortalStatus::Done {
                    self.stats.vis_test += 1;
                    &state.visbits
                } else {
                    self.stats.might_test += 1;
                    &state.mightsee
                };
                might.assign_and(&prev.mightsee, test, &self.leafvis)
            };
            if !more {
                continue;
            }

            let backplane = portal.plane.negate_direction();
            if prev.portal_plane.normal.epsilon_eq(backplane.normal, VIS_EQUAL_EPSILON) {
                continue;
            }

            self.stats.portal_check += 1;

            let base_plane = self.base_plane;
            let Some(pass) = self.clip(Cow::Borrowed(&portal.winding), &base_plane) else {
                continue;
            };

            let Some(prev_pass) = prev.pass.as_deref() else {
                // the second leaf can only be blocked if coplanar
                let frame = Frame {
                    source: Cow::Borrowed(&*prev.source),
                    pass: Some(pass),
                    portal_plane: portal.plane,
                    mightsee: Cow::Borrowed(&might),
                };
                self.recursive_leaf_flow(portal.leaf, &frame);
                continue;
            };

            let Some(mut pass) = self.clip(pass, &prev.portal_plane) else {
                continue;
            };
            let Some(mut source) = self.clip(Cow::Borrowed(&*prev.source), &backplane) else {
                continue;
            };

            self.stats.portal_test += 1;

            // source -> pass -> target
            if self.level > 0 {
                let clipped = if separators[0].is_empty() {
                    self.clip_to_separators(&prev.source, &base_plane, prev_pass, pass, 0, &mut separators)
                } else {
                    let planes = separators[0].clone();
                    planes.iter().try_fold(pass, |w, plane| self.clip(w, plane))
                };
                let Some(clipped) = clipped else {
                    continue;
                };
                pass = clipped;
            }

            // pass -> source -> target
            if self.level > 1 {
                let clipped = if separators[1].is_empty() {
                    self.clip_to_separators(prev_pass, &prev.portal_plane, &prev.source, pass, 1, &mut separators)
                } else {
                    let planes = separators[1].clone();
                    planes.iter().try_fold(pass, |w, plane| self.clip(w, plane))
                };
                let Some(clipped) = clipped else {
                    continue;
                };
                pass = clipped;
            }

            // target -> pass -> source
            if self.level > 2 {
                let Some(clipped) = self.clip_to_separators(&pass, &portal.plane, prev_pass, source, 2, &mut separators) else {
                    continue;
                };
                source = clipped;
            }

            // pass -> target -> source
            if self.level > 3 {
                let Some(clipped) = self.clip_to_separators(prev_pass, &prev.portal_plane, &pass, source, 3, &mut separators) else {
                    continue;
                };
                source = clipped;
            }

            self.stats.portal_pass += 1;

            let frame = Frame {
                source,
                pass: Some(pass),
                portal_plane: portal.plane,
                mightsee: Cow::Borrowed(&might),
            };
            self.recursive_leaf_flow(portal.leaf, &frame);
        }

        self.stack.pop();
    }
}

/// Compute exact visibility of portal `index`. The portal must be in
/// `Working` state. Returns visible leaves, their count and flow statistics.
pub fn portal_flow(graph: &PortalGraph, index: usize, level: u32, on_epsilon: f64) -> (LeafBits, usize, VisStats) {
    let portal = &graph.portals[index];
    let mightsee = portal.state.read().mightsee.clone();

    let mut flow = Flow {
        graph,
        portal: index,
        level,
        on_epsilon,
        base_plane: portal.plane,
        leafvis: LeafBits::new(graph.leafs.len()),
        numcansee: 0,
        stack: Vec::new(),
        separators_full: false,
        stats: VisStats::default(),
    };

    let head = Frame {
        source: Cow::Borrowed(&portal.winding),
        pass: None,
        portal_plane: portal.plane,
        mightsee: Cow::Owned(mightsee),
    };
    flow.recursive_leaf_flow(portal.leaf, &head);

    (flow.leafvis, flow.numcansee, flow.stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prt::{PrtFile, PrtFormat};

    fn square(z: f64) -> VisWinding {
        VisWinding::new(vec![
            Vec3d::new(0.0, 0.0, z),
            Vec3d::new(0.0, 8.0, z),
            Vec3d::new(8.0, 8.0, z),
            Vec3d::new(8.0, 0.0, z),
        ])
    }

    #[test]
    fn clip_keeps_front_part() {
        let mut stats = VisStats::default();
        let w = square(0.0);

        let split = Plane::new(Vec3d::new(1.0, 0.0, 0.0), 2.0);
        let clipped = clip_winding(Cow::Borrowed(&w), &split, 0.1, &mut stats).unwrap();
        assert_eq!(clipped.points.len(), 4);
        assert!(clipped.points.iter().all(|p| p.x >= 2.0));
        assert!(matches!(clipped, Cow::Owned(_)));

        let behind = Plane::new(Vec3d::new(1.0, 0.0, 0.0), 20.0);
        assert!(clip_winding(Cow::Borrowed(&w), &behind, 0.1, &mut stats).is_none());

        let ahead = Plane::new(Vec3d::new(1.0, 0.0, 0.0), -20.0);
        assert!(matches!(clip_winding(Cow::Borrowed(&w), &ahead, 0.1, &mut stats), Some(Cow::Borrowed(_))));
    }

    #[test]
    fn full_separator_cache_is_reported_once() {
        let prt = PrtFile {
            format: PrtFormat::Prt1,
            num_clusters: 1,
            num_leafs: 1,
            portals: Vec::new(),
            leaf_clusters: vec![0],
        };
        let graph = PortalGraph::new(&prt).unwrap();
        let plane = Plane::new(Vec3d::new(0.0, 0.0, 1.0), 0.0);

        let mut flow = Flow {
            graph: &graph,
            portal: 7,
            level: 4,
            on_epsilon: 0.1,
            base_plane: plane,
            leafvis: LeafBits::new(1),
            numcansee: 0,
            stack: Vec::new(),
            separators_full: false,
            stats: VisStats::default(),
        };

        let mut cache = Vec::new();
        for _ in 0..MAX_SEPARATORS + 3 {
            flow.cache_separator(&mut cache, plane);
        }

        assert_eq!(cache.len(), MAX_SEPARATORS);
        assert!(flow.separators_full);
        assert_eq!(flow.stats.separator_overflow, 1);
    }

    #[test]
    fn coplanar_winding_survives_clip() {
        let mut stats = VisStats::default();
        let w = square(4.0);

        let plane = Plane::new(Vec3d::new(0.0, 0.0, -1.0), -4.0);
        assert!(clip_winding(Cow::Borrowed(&w), &plane, 0.1, &mut stats).is_some());
        assert_eq!(stats.noclip, 0);
    }
}
