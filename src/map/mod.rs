///! Map description to compiler brushes

use crate::{
    bsp::{
        brush::{Brush, FaceDesc, OriginalBrushes, SideFlags},
        compiler::BrushSet,
        plane_set::PlaneSet,
    },
    config::Settings,
    contents::Contents,
    error::Result,
    geom::Plane,
    math::Vec3d,
};

/// Quake 1 map
pub mod q1;

pub use q1::{Map, MapBrush, MapEntity, MapParseError};

impl MapEntity {
    pub fn classname(&self) -> &str {
        self.properties.get("classname").map(String::as_str).unwrap_or("")
    }

    /// Parsed 'origin' property
    pub fn origin(&self) -> Option<Vec3d> {
        let values = self
            .properties
            .get("origin")?
            .split_whitespace()
            .map(str::parse::<f64>)
            .collect::<std::result::Result<Vec<_>, _>>()
            .ok()?;

        let &[x, y, z] = values.as_slice() else {
            return None;
        };
        Some(Vec3d::new(x, y, z))
    }
}

/// Brush contents and side flags from face textures and entity contents.
/// None for brushes that aren't part of the visible hull.
fn brush_faces(brush: &MapBrush, entity_contents: Contents, settings: &Settings) -> Option<(Contents, Vec<FaceDesc>)> {
    let face_contents = brush
        .faces
        .iter()
        .map(|face| Contents::for_texture(&face.texture_name))
        .collect::<Vec<_>>();

    if face_contents.iter().any(|c| c.intersects(Contents::ORIGIN | Contents::CLIP)) {
        return None;
    }

    let is_hint = face_contents.iter().any(|c| c.contains(Contents::HINT));

    let mut faces = Vec::with_capacity(brush.faces.len());
    for (face, contents) in brush.faces.iter().zip(&face_contents) {
        let Some(plane) = Plane::from_points(face.p0, face.p1, face.p2) else {
            log::warn!("face with texture {} has collinear points, skipped", face.texture_name);
            continue;
        };

        let flags = if !is_hint {
            SideFlags::VISIBLE
        } else if contents.contains(Contents::HINT) {
            SideFlags::VISIBLE | SideFlags::HINT
        } else {
            SideFlags::HINTSKIP
        };

        faces.push(FaceDesc { plane, texture: face.texture_name.clone(), flags });
    }

    if is_hint {
        return Some((Contents::empty(), faces));
    }

    let visible = face_contents.iter().fold(Contents::empty(), |acc, c| acc | c.visible());
    if visible.bits().count_ones() > 1 {
        log::warn!("brush with mixed face contents {visible:?}");
    }
    let mut contents = settings.contents_priority.winner(visible);

    // entity class turns plain solid into its own contents
    if contents.is_solid() && !entity_contents.visible().is_empty() {
        contents = entity_contents.visible();
    }
    if entity_contents.is_detail() {
        contents |= Contents::DETAIL;
    }

    Some((contents, faces))
}

impl Map {
    /// Origins of point entities, these must not see the void
    pub fn occupants(&self) -> Vec<Vec3d> {
        self.entities
            .iter()
            .filter(|entity| entity.classname() != "worldspawn")
            .filter_map(MapEntity::origin)
            .collect()
    }

    /// Load world brushes. Brushes of worldspawn and of entities merged
    /// into the world (func_group, func_detail...) are loaded, other brush
    /// entities are skipped.
    pub fn load_brushes(&self, settings: &Settings) -> Result<BrushSet> {
        let mut planes = PlaneSet::new();
        let mut originals = OriginalBrushes::new();
        let mut brushes = Vec::new();

        for (entity_index, entity) in self.entities.iter().enumerate() {
            let Some(entity_contents) = Contents::for_classname(entity.classname()) else {
                continue;
            };

            for brush in &entity.brushes {
                let Some((contents, faces)) = brush_faces(brush, entity_contents, settings) else {
                    continue;
                };

                if let Some(brush) = Brush::load(entity_index, contents, &faces, &mut planes, &mut originals, settings)? {
                    brushes.push(brush);
                }
            }
        }

        log::info!("{:8} map brushes", brushes.len());
        log::info!("{:8} planes", planes.len());

        Ok(BrushSet { planes, originals, brushes, occupants: self.occupants() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: &str = r#"
{
"classname" "worldspawn"
{
( 0 0 0 ) ( 0 1 0 ) ( 0 0 1 ) city4_2 0 0 0 1 1
( 0 0 0 ) ( 0 0 1 ) ( 1 0 0 ) city4_2 0 0 0 1 1
( 0 0 0 ) ( 1 0 0 ) ( 0 1 0 ) city4_2 0 0 0 1 1
( 32 32 32 ) ( 32 33 32 ) ( 33 32 32 ) city4_2 0 0 0 1 1
( 32 32 32 ) ( 33 32 32 ) ( 32 32 33 ) city4_2 0 0 0 1 1
( 32 32 32 ) ( 32 32 33 ) ( 32 33 32 ) city4_2 0 0 0 1 1
}
{
( 0 0 0 ) ( 0 1 0 ) ( 0 0 1 ) clip 0 0 0 1 1
( 0 0 0 ) ( 0 0 1 ) ( 1 0 0 ) clip 0 0 0 1 1
( 0 0 0 ) ( 1 0 0 ) ( 0 1 0 ) clip 0 0 0 1 1
( 32 32 32 ) ( 32 33 32 ) ( 33 32 32 ) clip 0 0 0 1 1
( 32 32 32 ) ( 33 32 32 ) ( 32 32 33 ) clip 0 0 0 1 1
( 32 32 32 ) ( 32 32 33 ) ( 32 33 32 ) clip 0 0 0 1 1
}
}
{
"classname" "func_detail"
{
( 40 0 0 ) ( 40 1 0 ) ( 40 0 1 ) city4_2 0 0 0 1 1
( 0 0 0 ) ( 0 0 1 ) ( 1 0 0 ) city4_2 0 0 0 1 1
( 0 0 0 ) ( 1 0 0 ) ( 0 1 0 ) city4_2 0 0 0 1 1
( 48 32 32 ) ( 48 33 32 ) ( 49 32 32 ) city4_2 0 0 0 1 1
( 48 32 32 ) ( 49 32 32 ) ( 48 32 33 ) city4_2 0 0 0 1 1
( 48 32 32 ) ( 48 32 33 ) ( 48 33 32 ) city4_2 0 0 0 1 1
}
}
{
"classname" "func_door"
{
( 0 0 0 ) ( 0 1 0 ) ( 0 0 1 ) door 0 0 0 1 1
( 0 0 0 ) ( 0 0 1 ) ( 1 0 0 ) door 0 0 0 1 1
( 0 0 0 ) ( 1 0 0 ) ( 0 1 0 ) door 0 0 0 1 1
( 8 8 8 ) ( 8 9 8 ) ( 9 8 8 ) door 0 0 0 1 1
( 8 8 8 ) ( 9 8 8 ) ( 8 8 9 ) door 0 0 0 1 1
( 8 8 8 ) ( 8 8 9 ) ( 8 9 8 ) door 0 0 0 1 1
}
}
{
"classname" "light"
"origin" "16 16 64"
}
{
"classname" "info_null"
}
"#;

    #[test]
    fn world_brushes_and_occupants() {
        let map = Map::parse(MAP).unwrap();
        let set = map.load_brushes(&Settings::default()).unwrap();

        // clip brush and door skipped
        assert_eq!(set.brushes.len(), 2);
        assert_eq!(set.originals.len(), 2);
        assert_eq!(set.brushes[0].contents, Contents::SOLID);
        assert_eq!(set.brushes[1].contents, Contents::SOLID | Contents::DETAIL);

        let bounds = set.brushes[0].bounds;
        assert!(bounds.min().epsilon_eq(Vec3d::new(0.0, 0.0, 0.0), 0.001));
        assert!(bounds.max().epsilon_eq(Vec3d::new(32.0, 32.0, 32.0), 0.001));

        assert_eq!(set.occupants, vec![Vec3d::new(16.0, 16.0, 64.0)]);
    }
}
