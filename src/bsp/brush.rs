//! Convex brushes and their fragments

use std::sync::atomic::{AtomicBool, Ordering};

use bitflags::bitflags;

use crate::{
    config::Settings,
    contents::Contents,
    error::GeometryError,
    geom::{BoundBox, Plane},
    stats::BspStats,
    winding::{Winding, MAX_POINTS_ON_WINDING},
};

use super::{plane_set::PlaneSet, OriginalBrushId};

/// Split brushes with all points closer than this to the plane go to one side whole
const SPLIT_EPSILON: f64 = 0.1;

/// Midwinding edge length below which split is treated as a graze
const MIDWINDING_TINY_EPSILON: f64 = 0.02;

bitflags! {
    /// Brush side flags
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SideFlags: u8 {
        /// Side may produce a visible face
        const VISIBLE = 1 << 0;

        /// Bevel plane, never used as splitter
        const BEVEL = 1 << 1;

        /// Hint face, preferred splitter
        const HINT = 1 << 2;

        /// Non-hint face of hint brush, never used as splitter
        const HINTSKIP = 1 << 3;
    }
}

bitflags! {
    /// Brush relation to plane
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct PlaneSide: u8 {
        const FRONT = 1;
        const BACK = 2;
        const BOTH = Self::FRONT.bits() | Self::BACK.bits();

        /// Brush has a side on this plane
        const FACING = 4;
    }
}

/// Brush side
#[derive(Clone, Debug)]
pub struct Side {
    pub plane_num: usize,

    /// Side polygon, None for crunched sides
    pub winding: Option<Winding>,

    pub flags: SideFlags,

    /// Index of the side in original brush, None for split-generated sides
    pub source: Option<usize>,

    /// Side already lies on some node plane
    pub onnode: bool,

    /// Used by split plane selection to skip sides already evaluated
    pub tested: bool,
}

impl Side {
    pub fn new(plane_num: usize, flags: SideFlags, source: Option<usize>) -> Self {
        Self { plane_num, winding: None, flags, source, onnode: false, tested: false }
    }

    pub fn is_visible(&self) -> bool {
        self.flags.contains(SideFlags::VISIBLE)
    }
}

/// Side of a map brush, as written in the map
#[derive(Debug)]
pub struct OriginalSide {
    pub plane_num: usize,
    pub texture: String,

    /// Side touches non-void space. Reset and recomputed by outside fill.
    pub visible: AtomicBool,
}

impl OriginalSide {
    pub fn is_visible(&self) -> bool {
        self.visible.load(Ordering::Relaxed)
    }

    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::Relaxed);
    }
}

/// Brush as loaded from map. Every fragment refers back to one of these.
#[derive(Debug)]
pub struct OriginalBrush {
    /// Index of the entity that owns the brush
    pub entity: usize,
    pub contents: Contents,
    pub sides: Vec<OriginalSide>,
    pub bounds: BoundBox,
}

/// Original brush arena
#[derive(Debug, Default)]
pub struct OriginalBrushes {
    brushes: Vec<OriginalBrush>,
}

impl OriginalBrushes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, brush: OriginalBrush) -> OriginalBrushId {
        self.brushes.push(brush);
        OriginalBrushId::from_index(self.brushes.len() - 1)
    }

    pub fn get(&self, id: OriginalBrushId) -> &OriginalBrush {
        &self.brushes[id.into_index()]
    }

    pub fn len(&self) -> usize {
        self.brushes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.brushes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (OriginalBrushId, &OriginalBrush)> {
        self.brushes.iter().enumerate().map(|(i, b)| (OriginalBrushId::from_index(i), b))
    }

    /// Mark every side invisible
    pub fn hide_all_sides(&self) {
        for brush in &self.brushes {
            for side in &brush.sides {
                side.set_visible(false);
            }
        }
    }
}

/// Brush face description used to build a brush
#[derive(Clone, Debug)]
pub struct FaceDesc {
    pub plane: Plane,
    pub texture: String,
    pub flags: SideFlags,
}

/// Convex brush or brush fragment
#[derive(Clone, Debug)]
pub struct Brush {
    /// Source brush, None for node volumes
    pub original: Option<OriginalBrushId>,
    pub contents: Contents,
    pub sides: Vec<Side>,
    pub bounds: BoundBox,

    /// Cached relation to the plane being evaluated
    pub side: PlaneSide,
}

/// Result of splitting brush by plane
pub struct SplitResult {
    pub front: Option<Brush>,
    pub back: Option<Brush>,
}

impl Brush {
    /// Register brush planes, build windings and store original brush.
    ///
    /// Faces that got clipped away are dropped with a warning. Fails if less
    /// than 3 faces survive or the brush leaves world extent. Returns `Ok(None)`
    /// for flat brushes with volume below `microvolume`.
    pub fn load(
        entity: usize,
        contents: Contents,
        faces: &[FaceDesc],
        planes: &mut PlaneSet,
        originals: &mut OriginalBrushes,
        settings: &Settings,
    ) -> Result<Option<Brush>, GeometryError> {
        let brush_index = originals.len();
        let mut sides: Vec<Side> = Vec::with_capacity(faces.len());
        let mut original_sides: Vec<OriginalSide> = Vec::with_capacity(faces.len());

        for face in faces {
            let plane_num = planes.add(face.plane)?;

            if sides.iter().any(|s| s.plane_num == plane_num) {
                log::warn!("brush {brush_index}: duplicate plane removed");
                continue;
            }

            sides.push(Side::new(plane_num, face.flags, Some(original_sides.len())));
            original_sides.push(OriginalSide {
                plane_num,
                texture: face.texture.clone(),
                visible: AtomicBool::new(face.flags.contains(SideFlags::VISIBLE)),
            });
        }

        let mut brush = Brush {
            original: None,
            contents,
            sides,
            bounds: BoundBox::zero(),
            side: PlaneSide::empty(),
        };
        brush.create_windings(planes, settings.world_extent);

        let crunched = brush.sides.iter().filter(|s| s.winding.is_none()).count();
        if crunched > 0 {
            log::warn!("brush {brush_index}: {crunched} crunched faces removed");
            brush.sides.retain(|s| s.winding.is_some());
        }

        if brush.sides.len() < 3 {
            return Err(GeometryError::DegenerateBrush { brush: brush_index, sides: brush.sides.len() });
        }

        for side in &brush.sides {
            if let Some(winding) = &side.winding {
                winding.check_point_limit(MAX_POINTS_ON_WINDING)?;
            }
        }

        brush.calc_bounds();
        if !brush.bounds.is_inside_extent(settings.world_extent) {
            let point = if brush.bounds.min().length() > brush.bounds.max().length() {
                brush.bounds.min()
            } else {
                brush.bounds.max()
            };
            return Err(GeometryError::OutOfRange { point, extent: settings.world_extent });
        }

        if brush.volume(planes) < settings.microvolume {
            log::warn!("brush {brush_index}: brush has no volume, removed");
            return Ok(None);
        }

        brush.original = Some(originals.push(OriginalBrush {
            entity,
            contents,
            sides: original_sides,
            bounds: brush.bounds,
        }));

        Ok(Some(brush))
    }

    /// Axial box brush, used as headnode volume
    pub fn from_bounds(bounds: &BoundBox, planes: &mut PlaneSet, world_extent: f64) -> Result<Brush, GeometryError> {
        let mut sides = Vec::with_capacity(6);

        for axis in 0..3 {
            let mut normal = crate::math::Vec3d::zero();
            normal[axis] = 1.0;

            sides.push(Side::new(planes.add(Plane::new(normal, bounds.max()[axis]))?, SideFlags::empty(), None));
            sides.push(Side::new(planes.add(Plane::new(-normal, -bounds.min()[axis]))?, SideFlags::empty(), None));
        }

        let mut brush = Brush {
            original: None,
            contents: Contents::empty(),
            sides,
            bounds: *bounds,
            side: PlaneSide::empty(),
        };
        brush.create_windings(planes, world_extent);
        brush.calc_bounds();

        Ok(brush)
    }

    /// Rebuild side windings from side planes
    pub fn create_windings(&mut self, planes: &PlaneSet, world_extent: f64) {
        for i in 0..self.sides.len() {
            let side = &self.sides[i];
            let mut winding = Some(Winding::base_for_plane(planes.get(side.plane_num), world_extent));

            for (j, other) in self.sides.iter().enumerate() {
                if i == j || other.flags.contains(SideFlags::BEVEL) {
                    continue;
                }
                let Some(w) = winding else {
                    break;
                };
                winding = w.clip_front(planes.get(other.plane_num ^ 1), 0.0, false);
            }

            self.sides[i].winding = winding;
        }
    }

    /// Recalculate bounds from side windings
    pub fn calc_bounds(&mut self) {
        self.bounds = BoundBox::for_points(
            self.sides.iter().filter_map(|s| s.winding.as_ref()).flat_map(|w| w.iter())
        );
    }

    pub fn is_detail(&self) -> bool {
        self.contents.is_detail()
    }

    /// Pull side visibility from original brush sides
    pub fn refresh_visibility(&mut self, originals: &OriginalBrushes) {
        let Some(id) = self.original else {
            return;
        };
        let original = originals.get(id);

        for side in &mut self.sides {
            if let Some(source) = side.source {
                side.flags.set(SideFlags::VISIBLE, original.sides[source].is_visible());
            }
        }
    }

    /// Brush volume, sum of pyramids from one corner to every face
    pub fn volume(&self, planes: &PlaneSet) -> f64 {
        let Some(corner) = self.sides.iter().find_map(|s| s.winding.as_ref()).and_then(|w| w.points().first().copied()) else {
            return 0.0;
        };

        let volume: f64 = self.sides
            .iter()
            .filter_map(|s| s.winding.as_ref().map(|w| (s.plane_num, w)))
            .map(|(plane_num, w)| -planes.get(plane_num).point_distance(corner) * w.area())
            .sum();

        volume / 3.0
    }

    /// Side of plane most of the brush lies on
    pub fn mostly_on_side(&self, plane: &Plane) -> PlaneSide {
        let mut max = 0.0;
        let mut side = PlaneSide::FRONT;

        for point in self.sides.iter().filter_map(|s| s.winding.as_ref()).flat_map(|w| w.iter()) {
            let d = plane.point_distance(point);

            if d > max {
                max = d;
                side = PlaneSide::FRONT;
            }
            if -d > max {
                max = -d;
                side = PlaneSide::BACK;
            }
        }

        side
    }

    /// Split brush by plane. Fragments keep original brush reference.
    pub fn split(&self, plane_num: usize, planes: &PlaneSet, settings: &Settings, stats: &BspStats) -> SplitResult {
        let plane = planes.get(plane_num).plane;

        let (mut d_front, mut d_back) = (0.0f64, 0.0f64);
        for point in self.sides.iter().filter_map(|s| s.winding.as_ref()).flat_map(|w| w.iter()) {
            let d = plane.point_distance(point);
            d_front = d_front.max(d);
            d_back = d_back.min(d);
        }

        if d_front < SPLIT_EPSILON {
            return SplitResult { front: None, back: Some(self.clone()) };
        }
        if d_back > -SPLIT_EPSILON {
            return SplitResult { front: Some(self.clone()), back: None };
        }

        // polygon of the brush on split plane
        let mut midwinding = Some(Winding::base_for_plane(&plane, settings.world_extent));
        for side in &self.sides {
            let Some(w) = midwinding else {
                break;
            };
            midwinding = w.clip_front(planes.get(side.plane_num ^ 1), 0.0, false);
        }

        let midwinding = match midwinding {
            Some(w) if !w.is_tiny(MIDWINDING_TINY_EPSILON) => w,
            _ => {
                return if self.mostly_on_side(&plane) == PlaneSide::FRONT {
                    SplitResult { front: Some(self.clone()), back: None }
                } else {
                    SplitResult { front: None, back: Some(self.clone()) }
                };
            }
        };

        if midwinding.is_huge(settings.world_extent) {
            stats.huge_midwindings.inc();
            log::warn!("huge midwinding at {:?}", midwinding.center());
        }

        let mut halves: [Brush; 2] = std::array::from_fn(|_| Brush {
            original: self.original,
            contents: self.contents,
            sides: Vec::with_capacity(self.sides.len() + 1),
            bounds: BoundBox::zero(),
            side: PlaneSide::empty(),
        });

        for side in &self.sides {
            let Some(w) = &side.winding else {
                continue;
            };
            let (front, back) = w.clip(&plane, 0.0, false);

            for (half, winding) in halves.iter_mut().zip([front, back]) {
                if let Some(winding) = winding {
                    half.sides.push(Side { winding: Some(winding), ..side.clone() });
                }
            }
        }

        for half in &mut halves {
            half.calc_bounds();
        }

        let bogus = halves.each_ref().map(|half| {
            half.sides.len() < 3 || !half.bounds.is_valid() || !half.bounds.is_inside_extent(settings.world_extent)
        });

        match bogus {
            [true, true] => {
                stats.bogus_brushes.inc();
                log::warn!("split removed brush");
                return SplitResult { front: None, back: None };
            }
            [true, false] => {
                stats.bogus_brushes.inc();
                return SplitResult { front: None, back: Some(self.clone()) };
            }
            [false, true] => {
                stats.bogus_brushes.inc();
                return SplitResult { front: Some(self.clone()), back: None };
            }
            [false, false] => {}
        }

        // close both halves with the midwinding
        for (i, half) in halves.iter_mut().enumerate() {
            let winding = if i == 0 { midwinding.flipped() } else { midwinding.clone() };

            half.sides.push(Side {
                plane_num: plane_num ^ i ^ 1,
                winding: Some(winding),
                flags: SideFlags::empty(),
                source: None,
                onnode: true,
                tested: false,
            });
        }

        let [front, back] = halves.map(|half| {
            if half.volume(planes) < settings.microvolume {
                stats.tiny_volumes.inc();
                None
            } else {
                Some(half)
            }
        });

        if front.is_some() && back.is_some() {
            stats.brush_splits.inc();
        }

        SplitResult { front, back }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::math::Vec3d;
    use approx::assert_relative_eq;

    /// Axial box faces with given texture
    pub(crate) fn box_faces(min: Vec3d, max: Vec3d, texture: &str) -> Vec<FaceDesc> {
        let mut faces = Vec::new();
        for axis in 0..3 {
            let mut normal = Vec3d::zero();
            normal[axis] = 1.0;

            faces.push(FaceDesc { plane: Plane::new(normal, max[axis]), texture: texture.to_string(), flags: SideFlags::VISIBLE });
            faces.push(FaceDesc { plane: Plane::new(-normal, -min[axis]), texture: texture.to_string(), flags: SideFlags::VISIBLE });
        }
        faces
    }

    fn load_box(min: Vec3d, max: Vec3d, planes: &mut PlaneSet, originals: &mut OriginalBrushes) -> Brush {
        Brush::load(0, Contents::SOLID, &box_faces(min, max, "wall"), planes, originals, &Settings::default())
            .unwrap()
            .unwrap()
    }

    #[test]
    fn load_box_brush() {
        let mut planes = PlaneSet::new();
        let mut originals = OriginalBrushes::new();
        let brush = load_box(Vec3d::new(-8.0, -8.0, -8.0), Vec3d::new(8.0, 8.0, 8.0), &mut planes, &mut originals);

        assert_eq!(brush.sides.len(), 6);
        assert!(brush.sides.iter().all(|s| s.winding.as_ref().unwrap().len() == 4));
        assert_relative_eq!(brush.volume(&planes), 4096.0, epsilon = 1e-6);
        assert_eq!(brush.bounds.min(), Vec3d::new(-8.0, -8.0, -8.0));
        assert_eq!(originals.len(), 1);
    }

    #[test]
    fn degenerate_brush_fails() {
        let mut planes = PlaneSet::new();
        let mut originals = OriginalBrushes::new();
        let faces = box_faces(Vec3d::zero(), Vec3d::new(8.0, 8.0, 8.0), "wall")[..2].to_vec();

        let result = Brush::load(0, Contents::SOLID, &faces, &mut planes, &mut originals, &Settings::default());
        assert!(matches!(result, Err(GeometryError::DegenerateBrush { .. })));
    }

    #[test]
    fn split_conserves_volume() {
        let mut planes = PlaneSet::new();
        let mut originals = OriginalBrushes::new();
        let brush = load_box(Vec3d::zero(), Vec3d::new(32.0, 32.0, 32.0), &mut planes, &mut originals);
        let stats = BspStats::default();

        let diagonal = planes.add(Plane::new(Vec3d::new(1.0, 1.0, 0.0).normalized(), 20.0)).unwrap();
        let SplitResult { front, back } = brush.split(diagonal, &planes, &Settings::default(), &stats);
        let (front, back) = (front.unwrap(), back.unwrap());

        assert_relative_eq!(front.volume(&planes) + back.volume(&planes), 32768.0, epsilon = 1e-6);
        assert_eq!(front.original, brush.original);
        assert!(front.sides.iter().any(|s| s.onnode && s.plane_num == diagonal ^ 1));
        assert!(back.sides.iter().any(|s| s.onnode && s.plane_num == diagonal));
        assert_eq!(stats.brush_splits.get(), 1);
    }

    #[test]
    fn split_grazing_plane_keeps_brush_whole() {
        let mut planes = PlaneSet::new();
        let mut originals = OriginalBrushes::new();
        let brush = load_box(Vec3d::zero(), Vec3d::new(32.0, 32.0, 32.0), &mut planes, &mut originals);

        let outside = planes.add(Plane::new(Vec3d::new(1.0, 0.0, 0.0), 32.05)).unwrap();
        let result = brush.split(outside, &planes, &Settings::default(), &BspStats::default());

        assert!(result.front.is_none());
        assert_eq!(result.back.unwrap().sides.len(), 6);
    }
}
