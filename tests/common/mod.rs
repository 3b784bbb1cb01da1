#![allow(dead_code)]

use bspcore::{
    bsp::{
        compiler::{self, Compiled, World},
        portals::PortalMode,
    },
    config::Settings,
    map::Map,
    math::Vec3d,
};

/// Axial box brush in .map syntax
pub fn box_brush(min: [f64; 3], max: [f64; 3], texture: &str) -> String {
    let [x0, y0, z0] = min;
    let [x1, y1, z1] = max;

    format!(
        "{{\n\
         ( {x0} {y0} {z0} ) ( {x0} {} {z0} ) ( {x0} {y0} {} ) {texture} 0 0 0 1 1\n\
         ( {x0} {y0} {z0} ) ( {x0} {y0} {} ) ( {} {y0} {z0} ) {texture} 0 0 0 1 1\n\
         ( {x0} {y0} {z0} ) ( {} {y0} {z0} ) ( {x0} {} {z0} ) {texture} 0 0 0 1 1\n\
         ( {x1} {y1} {z1} ) ( {x1} {} {z1} ) ( {} {y1} {z1} ) {texture} 0 0 0 1 1\n\
         ( {x1} {y1} {z1} ) ( {} {y1} {z1} ) ( {x1} {y1} {} ) {texture} 0 0 0 1 1\n\
         ( {x1} {y1} {z1} ) ( {x1} {y1} {} ) ( {x1} {} {z1} ) {texture} 0 0 0 1 1\n\
         }}\n",
        y0 + 1.0,
        z0 + 1.0,
        z0 + 1.0,
        x0 + 1.0,
        x0 + 1.0,
        y0 + 1.0,
        y1 + 1.0,
        x1 + 1.0,
        x1 + 1.0,
        z1 + 1.0,
        z1 + 1.0,
        y1 + 1.0,
    )
}

/// Six walls of `thickness` around the `min`..`max` interior
pub fn room(min: [f64; 3], max: [f64; 3], thickness: f64) -> Vec<String> {
    let t = thickness;
    let [x0, y0, z0] = min;
    let [x1, y1, z1] = max;

    vec![
        box_brush([x0 - t, y0 - t, z0 - t], [x0, y1 + t, z1 + t], "wall"),
        box_brush([x1, y0 - t, z0 - t], [x1 + t, y1 + t, z1 + t], "wall"),
        box_brush([x0, y0 - t, z0 - t], [x1, y0, z1 + t], "wall"),
        box_brush([x0, y1, z0 - t], [x1, y1 + t, z1 + t], "wall"),
        box_brush([x0, y0, z0 - t], [x1, y1, z0], "floor"),
        box_brush([x0, y0, z1], [x1, y1, z1 + t], "ceiling"),
    ]
}

/// Map text of worldspawn brushes and point entities
pub fn map_text(world: &[String], entities: &[(&str, [f64; 3])]) -> String {
    let mut text = String::from("{\n\"classname\" \"worldspawn\"\n");
    for brush in world {
        text.push_str(brush);
    }
    text.push_str("}\n");

    for (classname, [x, y, z]) in entities {
        text.push_str(&format!("{{\n\"classname\" \"{classname}\"\n\"origin\" \"{x} {y} {z}\"\n}}\n"));
    }

    text
}

/// Two rooms joined by a doorway and a third room far away. Lights at
/// `ROOM_CENTERS`.
pub fn three_rooms() -> String {
    let mut brushes = room([0.0, -64.0, -64.0], [272.0, 64.0, 64.0], 16.0);

    // divider with doorway y -16..16, z -64..16
    brushes.push(box_brush([128.0, -64.0, -64.0], [144.0, -16.0, 64.0], "wall"));
    brushes.push(box_brush([128.0, 16.0, -64.0], [144.0, 64.0, 64.0], "wall"));
    brushes.push(box_brush([128.0, -16.0, 16.0], [144.0, 16.0, 64.0], "wall"));

    brushes.extend(room([1000.0, -64.0, -64.0], [1128.0, 64.0, 64.0], 16.0));

    let entities = ROOM_CENTERS.map(|c| ("light", c));
    map_text(&brushes, &entities)
}

/// Brush entity of class `classname` holding `brushes`
pub fn brush_entity(classname: &str, brushes: &[String]) -> String {
    format!("{{\n\"classname\" \"{classname}\"\n{}}}\n", brushes.concat())
}

/// Four rooms in a row along x, joined by doorways y -16..16, z -16..16 that
/// line up. Lights at `CORRIDOR_CENTERS`.
pub fn corridor() -> String {
    let mut brushes = room([0.0, -64.0, -64.0], [1024.0, 64.0, 64.0], 16.0);

    for x in [256.0, 512.0, 768.0] {
        brushes.push(box_brush([x, -64.0, -64.0], [x + 16.0, -16.0, 64.0], "wall"));
        brushes.push(box_brush([x, 16.0, -64.0], [x + 16.0, 64.0, 64.0], "wall"));
        brushes.push(box_brush([x, -16.0, -64.0], [x + 16.0, 16.0, -16.0], "wall"));
        brushes.push(box_brush([x, -16.0, 16.0], [x + 16.0, 16.0, 64.0], "wall"));
    }

    let entities = CORRIDOR_CENTERS.map(|c| ("light", c));
    map_text(&brushes, &entities)
}

pub const CORRIDOR_CENTERS: [[f64; 3]; 4] = [[128.0, 0.0, 0.0], [392.0, 0.0, 0.0], [648.0, 0.0, 0.0], [904.0, 0.0, 0.0]];

pub const ROOM_CENTERS: [[f64; 3]; 3] = [[64.0, 0.0, 0.0], [208.0, 0.0, 0.0], [1064.0, 0.0, 0.0]];

pub fn compile_text(text: &str, settings: &Settings) -> Compiled {
    let map = Map::parse(text).unwrap();
    let set = map.load_brushes(settings).unwrap();

    compiler::compile(set, settings, None).unwrap()
}

pub fn build_text(text: &str, settings: &Settings) -> World {
    let map = Map::parse(text).unwrap();
    let set = map.load_brushes(settings).unwrap();

    compiler::build_world(set, settings).unwrap()
}

/// Visleaf number of the leaf holding `point`
pub fn visleaf_at(world: &World, point: [f64; 3]) -> usize {
    let [x, y, z] = point;
    let id = world.tree.point_in_leaf(Vec3d::new(x, y, z), &world.planes, PortalMode::Tree);

    world.tree.leaf(id).and_then(|l| l.visleaf).unwrap()
}
