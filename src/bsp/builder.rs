//! Brush BSP tree builder.
//!
//! Tree is built top-down: every node picks a splitter among brush side
//! planes, brushes get partitioned by it and both halves are built in
//! parallel. Node ids are given out by a shared append-only store.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::{
    config::{Settings, SplitType},
    contents::Contents,
    error::GeometryError,
    geom::BoundBox,
    math::Vec3d,
    stats::BspStats,
};

use super::{
    brush::{Brush, PlaneSide, SideFlags},
    plane_set::{MapPlane, PlaneSet},
    Decision, Leaf, Node, NodeId, Tree,
};

/// Space between brush bounds and headnode bounds
pub const SIDESPACE: f64 = 24.0;

/// Recursion limit, deeper trees are treated as broken input
pub const MAX_TREE_DEPTH: usize = 1024;

/// Box classification epsilon
const PLANESIDE_EPSILON: f64 = 0.001;

/// Side winding points further than this from the plane count as crossing it
const SPLIT_COUNT_EPSILON: f64 = 0.1;

/// Append-only node storage shared by builder tasks
#[derive(Default)]
struct NodeStore {
    nodes: RwLock<Vec<Node>>,
}

impl NodeStore {
    fn push(&self, node: Node) -> NodeId {
        let mut nodes = self.nodes.write();
        nodes.push(node);
        NodeId::from_index(nodes.len() - 1)
    }

    fn set_parent(&self, id: NodeId, parent: NodeId) {
        self.nodes.write()[id.into_index()].parent = Some(parent);
    }

    fn into_inner(self) -> Vec<Node> {
        self.nodes.into_inner()
    }
}

/// Split planes of the current node ancestors
#[derive(Copy, Clone)]
struct Ancestors<'a> {
    plane_num: usize,
    parent: Option<&'a Ancestors<'a>>,
}

fn ancestors_contain(mut ancestors: Option<&Ancestors>, plane_num: usize) -> bool {
    while let Some(a) = ancestors {
        if a.plane_num == plane_num {
            return true;
        }
        ancestors = a.parent;
    }
    false
}

/// Splitter evaluation counters
#[derive(Default)]
struct SplitCounts {
    splits: usize,
    hint_split: bool,
    epsilon_brushes: usize,
}

/// Chosen splitter
struct Selection {
    plane_num: usize,
    detail_separator: bool,
    hint: bool,
}

/// Classify box against plane
pub fn box_on_plane_side(bounds: &BoundBox, plane: &MapPlane) -> PlaneSide {
    let mut side = PlaneSide::empty();

    if plane.kind.is_axial() {
        let axis = plane.kind.axis();
        let coord = plane.distance * plane.normal[axis];
        let (above, below) = if plane.normal[axis] > 0.0 {
            (PlaneSide::FRONT, PlaneSide::BACK)
        } else {
            (PlaneSide::BACK, PlaneSide::FRONT)
        };

        if bounds.max()[axis] > coord + PLANESIDE_EPSILON {
            side |= above;
        }
        if bounds.min()[axis] < coord - PLANESIDE_EPSILON {
            side |= below;
        }
        return side;
    }

    // nearest and farthest corners along the normal
    let mut far = Vec3d::zero();
    let mut near = Vec3d::zero();
    for i in 0..3 {
        if plane.normal[i] < 0.0 {
            far[i] = bounds.min()[i];
            near[i] = bounds.max()[i];
        } else {
            far[i] = bounds.max()[i];
            near[i] = bounds.min()[i];
        }
    }

    if plane.point_distance(far) >= PLANESIDE_EPSILON {
        side |= PlaneSide::FRONT;
    }
    if plane.point_distance(near) < PLANESIDE_EPSILON {
        side |= PlaneSide::BACK;
    }

    side
}

/// Classify brush against plane. Counts side splits if `counts` is given.
fn test_brush_to_plane(brush: &Brush, plane_num: usize, planes: &PlaneSet, counts: Option<&mut SplitCounts>) -> PlaneSide {
    for side in &brush.sides {
        if side.plane_num == plane_num {
            return PlaneSide::BACK | PlaneSide::FACING;
        }
        if side.plane_num == plane_num ^ 1 {
            return PlaneSide::FRONT | PlaneSide::FACING;
        }
    }

    let plane = planes.get(plane_num);
    let result = box_on_plane_side(&brush.bounds, plane);

    if result != PlaneSide::BOTH {
        return result;
    }
    let Some(counts) = counts else {
        return result;
    };

    let (mut d_front, mut d_back) = (0.0f64, 0.0f64);

    for side in &brush.sides {
        if side.onnode || !side.is_visible() || side.flags.contains(SideFlags::HINTSKIP) {
            continue;
        }
        let Some(winding) = &side.winding else {
            continue;
        };

        let (mut front, mut back) = (false, false);
        for point in winding.iter() {
            let d = plane.point_distance(point);

            d_front = d_front.max(d);
            d_back = d_back.min(d);
            front |= d > SPLIT_COUNT_EPSILON;
            back |= d < -SPLIT_COUNT_EPSILON;
        }

        if front && back {
            counts.splits += 1;
            counts.hint_split |= side.flags.contains(SideFlags::HINT);
        }
    }

    if (d_front > 0.0 && d_front < 1.0) || (d_back < 0.0 && d_back > -1.0) {
        counts.epsilon_brushes += 1;
    }

    result
}

/// Bounds of both halves of a box split by plane. Halves overlap for non-axial planes.
pub fn divide_bounds(bounds: &BoundBox, plane: &MapPlane) -> [BoundBox; 2] {
    let mut front = *bounds;
    let mut back = *bounds;

    if plane.kind.is_axial() {
        let axis = plane.kind.axis();
        let dist = plane.distance * plane.normal[axis];

        if plane.normal[axis] > 0.0 {
            front.min_mut()[axis] = dist;
            back.max_mut()[axis] = dist;
        } else {
            back.min_mut()[axis] = dist;
            front.max_mut()[axis] = dist;
        }
        return [front, back];
    }

    let corners = [bounds.min(), bounds.max()];

    for a in 0..3 {
        if plane.normal[a].abs() < crate::geom::NORMAL_EPSILON {
            continue;
        }
        let b = (a + 1) % 3;
        let c = (a + 2) % 3;

        let mut split_min = bounds.max()[a];
        let mut split_max = bounds.min()[a];
        let mut corner = Vec3d::zero();

        for i in 0..2 {
            corner[b] = corners[i][b];
            for j in 0..2 {
                corner[c] = corners[j][c];

                corner[a] = bounds.min()[a];
                let dist1 = plane.point_distance(corner);
                corner[a] = bounds.max()[a];
                let dist2 = plane.point_distance(corner);

                let mid = bounds.min()[a] + (bounds.max()[a] - bounds.min()[a]) * (dist1 / (dist1 - dist2));

                split_min = mid.min(split_min).max(bounds.min()[a]);
                split_max = mid.max(split_max).min(bounds.max()[a]);
            }
        }

        if plane.normal[a] > 0.0 {
            front.min_mut()[a] = split_min;
            back.max_mut()[a] = split_max;
        } else {
            back.min_mut()[a] = split_min;
            front.max_mut()[a] = split_max;
        }
    }

    [front, back]
}

/// Split quality for midsplit, lower is better
fn split_plane_metric(plane: &MapPlane, bounds: &BoundBox) -> f64 {
    let [front, back] = divide_bounds(bounds, plane);
    (front.volume() - back.volume()).abs()
}

/// Tree builder context shared by every recursion level
struct Builder<'a> {
    planes: &'a PlaneSet,
    settings: &'a Settings,
    split_type: SplitType,
    total_brushes: usize,
    store: NodeStore,
    stats: &'a BspStats,
}

impl<'a> Builder<'a> {
    /// Check that the plane cuts node volume into two valid halves
    fn check_plane_against_volume(&self, plane_num: usize, volume: Option<&Brush>, cache: &mut HashMap<usize, bool>) -> bool {
        let Some(volume) = volume else {
            return false;
        };

        *cache.entry(plane_num).or_insert_with(|| {
            // probing splits must not show up in real statistics
            let scratch = BspStats::default();
            let result = volume.split(plane_num, self.planes, self.settings, &scratch);

            result.front.is_some() && result.back.is_some()
        })
    }

    /// Pick plane closest to node middle, axial planes preferred
    fn choose_mid_plane(&self, brushes: &[Brush], bounds: &BoundBox, volume: Option<&Brush>) -> Option<usize> {
        let mut cache = HashMap::new();
        let mut best_any: Option<(f64, usize)> = None;
        let mut best_axial: Option<(f64, usize)> = None;

        for side in brushes.iter().flat_map(|b| b.sides.iter()) {
            if side.flags.contains(SideFlags::BEVEL) || side.onnode {
                continue;
            }

            let plane_num = side.plane_num & !1;
            if !self.check_plane_against_volume(plane_num, volume, &mut cache) {
                continue;
            }

            let plane = self.planes.get(plane_num);
            let metric = split_plane_metric(plane, bounds);

            if best_any.is_none_or(|(m, _)| metric < m) {
                best_any = Some((metric, plane_num));
            }
            if plane.kind.is_axial() && best_axial.is_none_or(|(m, _)| metric < m) {
                best_axial = Some((metric, plane_num));
            }
        }

        best_axial.or(best_any).map(|(_, plane_num)| plane_num)
    }

    /// Select split plane and fill `Brush::side` for every brush. None means the node is a leaf.
    fn select_split_plane(
        &self,
        brushes: &mut [Brush],
        bounds: &BoundBox,
        volume: Option<&Brush>,
        ancestors: Option<&Ancestors>,
    ) -> Result<Option<Selection>, GeometryError> {
        if brushes.is_empty() {
            return Ok(None);
        }

        let mut split_type = self.split_type;

        if split_type == SplitType::Auto {
            if self.settings.midsplit_brush_fraction != 0.0 {
                let fraction = brushes.len() as f64 / self.total_brushes.max(1) as f64;
                if fraction > self.settings.midsplit_brush_fraction {
                    split_type = SplitType::Fast;
                }
            } else if self.settings.max_node_size >= 64.0 {
                let limit = self.settings.max_node_size - self.settings.epsilon;
                let size = bounds.size();

                if size.x > limit || size.y > limit || size.z > limit {
                    split_type = SplitType::Fast;
                }
            }
        }

        if split_type == SplitType::Fast {
            if let Some(plane_num) = self.choose_mid_plane(brushes, bounds, volume) {
                self.stats.midsplit_nodes.inc();

                for brush in brushes.iter_mut() {
                    brush.side = test_brush_to_plane(brush, plane_num, self.planes, None);
                }

                return Ok(Some(Selection { plane_num, detail_separator: false, hint: false }));
            }
        }

        let mut cache = HashMap::new();
        let mut test_sides = vec![PlaneSide::empty(); brushes.len()];
        let mut best_sides = Vec::new();
        let mut best: Option<(i64, usize, SideFlags)> = None;
        let mut detail_separator = false;

        // visible structural, nonvisible structural, visible detail, nonvisible detail
        for pass in 0..4 {
            for bi in 0..brushes.len() {
                if (pass >= 2) != brushes[bi].is_detail() {
                    continue;
                }

                for si in 0..brushes[bi].sides.len() {
                    let side = &brushes[bi].sides[si];

                    if side.flags.intersects(SideFlags::BEVEL | SideFlags::HINTSKIP)
                        || side.winding.is_none()
                        || side.onnode
                        || side.tested
                        || side.is_visible() != (pass == 0 || pass == 2)
                    {
                        continue;
                    }

                    let plane_num = side.plane_num & !1;
                    let side_flags = side.flags;

                    if ancestors_contain(ancestors, plane_num) {
                        return Err(GeometryError::PlaneReused(plane_num));
                    }
                    if !self.check_plane_against_volume(plane_num, volume, &mut cache) {
                        continue;
                    }

                    let mut counts = SplitCounts::default();
                    let (mut front, mut back, mut facing) = (0i64, 0i64, 0i64);

                    for (test, test_side) in brushes.iter_mut().zip(test_sides.iter_mut()) {
                        let s = test_brush_to_plane(test, plane_num, self.planes, Some(&mut counts));
                        *test_side = s;

                        // brushes sharing the plane don't need to test it again
                        if s.contains(PlaneSide::FACING) {
                            facing += 1;
                            for test_side in &mut test.sides {
                                if test_side.plane_num & !1 == plane_num {
                                    test_side.tested = true;
                                }
                            }
                        }
                        if s.contains(PlaneSide::FRONT) {
                            front += 1;
                        }
                        if s.contains(PlaneSide::BACK) {
                            back += 1;
                        }
                    }

                    let mut value = 5 * facing - 5 * counts.splits as i64 - (front - back).abs();
                    if self.planes.get(plane_num).kind.is_axial() {
                        value += 5;
                    }
                    value -= counts.epsilon_brushes as i64 * 1000;

                    // hint faces are split by other hints only
                    if counts.hint_split && !side_flags.contains(SideFlags::HINT) {
                        value = -9_999_999;
                    }

                    if best.is_none_or(|(v, _, _)| value > v) {
                        best = Some((value, plane_num, side_flags));
                        best_sides.clone_from(&test_sides);
                    }
                }
            }

            if best.is_some() {
                detail_separator = pass >= 2;
                break;
            }
        }

        for side in brushes.iter_mut().flat_map(|b| b.sides.iter_mut()) {
            side.tested = false;
        }

        let Some((_, plane_num, flags)) = best else {
            return Ok(None);
        };

        for (brush, side) in brushes.iter_mut().zip(best_sides) {
            brush.side = side;
        }

        if !flags.contains(SideFlags::VISIBLE) {
            self.stats.nonvis_nodes.inc();
        }

        Ok(Some(Selection { plane_num, detail_separator, hint: flags.contains(SideFlags::HINT) }))
    }

    /// Partition brushes by the selected plane, `Brush::side` must be set
    fn split_brush_list(&self, brushes: Vec<Brush>, plane_num: usize) -> [Vec<Brush>; 2] {
        let mut front = Vec::new();
        let mut back = Vec::new();

        for mut brush in brushes {
            let side = brush.side;

            if side == PlaneSide::BOTH {
                let result = brush.split(plane_num, self.planes, self.settings, self.stats);
                front.extend(result.front);
                back.extend(result.back);
                continue;
            }

            if side.contains(PlaneSide::FACING) {
                for s in &mut brush.sides {
                    if s.plane_num & !1 == plane_num {
                        s.onnode = true;
                    }
                }
            }

            if side.contains(PlaneSide::FRONT) {
                front.push(brush);
            } else if side.contains(PlaneSide::BACK) {
                back.push(brush);
            }
        }

        [front, back]
    }

    fn make_leaf(&self, brushes: &[Brush], bounds: BoundBox) -> NodeId {
        let contents = self.settings.contents_priority.combine_all(brushes.iter().map(|b| b.contents));

        let mut original_brushes = brushes.iter().filter_map(|b| b.original).collect::<Vec<_>>();
        original_brushes.sort();
        original_brushes.dedup();

        self.stats.leafs.inc();
        if contents.is_solid() {
            self.stats.solid_leafs.inc();
        }

        self.store.push(Node::new_leaf(bounds, Leaf::new(contents, original_brushes)))
    }

    fn build_r(
        &self,
        mut brushes: Vec<Brush>,
        bounds: BoundBox,
        volume: Option<Brush>,
        ancestors: Option<&Ancestors>,
        depth: usize,
    ) -> Result<NodeId, GeometryError> {
        if depth > MAX_TREE_DEPTH {
            return Err(GeometryError::TreeTooDeep(MAX_TREE_DEPTH));
        }

        let Some(selection) = self.select_split_plane(&mut brushes, &bounds, volume.as_ref(), ancestors)? else {
            return Ok(self.make_leaf(&brushes, bounds));
        };

        let plane_num = selection.plane_num;
        let plane = self.planes.get(plane_num);
        self.stats.nodes.inc();

        let [front_brushes, back_brushes] = self.split_brush_list(brushes, plane_num);

        let mut front_bounds = bounds;
        let mut back_bounds = bounds;
        if let Some(axis) = (0..3).find(|i| plane.normal[*i] == 1.0) {
            front_bounds.min_mut()[axis] = plane.distance;
            back_bounds.max_mut()[axis] = plane.distance;
        }

        let (front_volume, back_volume) = match &volume {
            Some(volume) => {
                let result = volume.split(plane_num, self.planes, self.settings, &BspStats::default());
                (result.front, result.back)
            }
            None => (None, None),
        };

        let link = Ancestors { plane_num, parent: ancestors };

        let (front, back) = rayon::join(
            || self.build_r(front_brushes, front_bounds, front_volume, Some(&link), depth + 1),
            || self.build_r(back_brushes, back_bounds, back_volume, Some(&link), depth + 1),
        );
        let children = [front?, back?];

        let id = self.store.push(Node::new_decision(bounds, Decision {
            plane_num,
            children,
            detail_separator: selection.detail_separator,
            hint: selection.hint,
        }));

        for child in children {
            self.store.set_parent(child, id);
        }

        Ok(id)
    }
}

/// Build BSP tree from brush list.
///
/// Headnode volume planes are registered here, the parallel part of the
/// build only reads the plane set.
pub fn build_tree(
    planes: &mut PlaneSet,
    brushes: Vec<Brush>,
    split_type: SplitType,
    settings: &Settings,
) -> Result<Tree, GeometryError> {
    let stats = BspStats::default();
    let tree = build_tree_counted(planes, brushes, split_type, settings, &stats)?;
    stats.log();

    Ok(tree)
}

fn build_tree_counted(
    planes: &mut PlaneSet,
    mut brushes: Vec<Brush>,
    split_type: SplitType,
    settings: &Settings,
    stats: &BspStats,
) -> Result<Tree, GeometryError> {
    let bounds = brushes.iter().fold(BoundBox::zero(), |b, brush| b.total(&brush.bounds));

    if brushes.is_empty() {
        log::info!("empty brush list, building placeholder tree");
        return empty_tree(planes);
    }

    for side in brushes.iter_mut().flat_map(|b| b.sides.iter_mut()) {
        side.onnode = false;
    }

    let head_bounds = bounds.grow(SIDESPACE);
    let volume = Brush::from_bounds(&head_bounds, planes, settings.world_extent)?;

    let builder = Builder {
        planes: &*planes,
        settings,
        split_type,
        total_brushes: brushes.len(),
        store: NodeStore::default(),
        stats,
    };

    let head = builder.build_r(brushes, head_bounds, Some(volume), None, 0)?;
    let mut nodes = builder.store.into_inner();

    nodes.push(Node::new_leaf(head_bounds, Leaf::new(Contents::SOLID, Vec::new())));
    let outside = NodeId::from_index(nodes.len() - 1);

    Ok(Tree { nodes, head, outside, bounds, portals: Vec::new() })
}

/// Tree of a single decision node with two empty leaves
fn empty_tree(planes: &mut PlaneSet) -> Result<Tree, GeometryError> {
    let plane_num = planes.add(crate::geom::Plane::new(Vec3d::new(1.0, 0.0, 0.0), 0.0))? & !1;
    let bounds = BoundBox::new(Vec3d::zero(), Vec3d::zero()).grow(SIDESPACE);

    let mut nodes = vec![
        Node::new_leaf(bounds, Leaf::new(Contents::empty(), Vec::new())),
        Node::new_leaf(bounds, Leaf::new(Contents::empty(), Vec::new())),
    ];
    let children = [NodeId::from_index(0), NodeId::from_index(1)];

    nodes.push(Node::new_decision(bounds, Decision { plane_num, children, detail_separator: false, hint: false }));
    let head = NodeId::from_index(2);
    for node in &mut nodes[..2] {
        node.parent = Some(head);
    }

    nodes.push(Node::new_leaf(bounds, Leaf::new(Contents::SOLID, Vec::new())));
    let outside = NodeId::from_index(3);

    Ok(Tree { nodes, head, outside, bounds, portals: Vec::new() })
}
