mod common;

use bspcore::{
    bsp::{builder::build_tree, portals::PortalMode, NodeId, PortalId},
    config::{Settings, SplitType},
    map::Map,
    math::Vec3d,
    prt::PrtFormat,
};
use common::{box_brush, brush_entity, build_text, compile_text, map_text, room};

#[test]
fn sealed_box() {
    let text = map_text(&room([-64.0; 3], [64.0; 3], 16.0), &[("info_player_start", [0.0; 3])]);
    let compiled = compile_text(&text, &Settings::default());
    let world = &compiled.world;

    assert!(world.fill.sealed);
    assert!(world.fill.leak.is_none());
    assert!(world.fill.outleafs > 0);

    // interior is the only leaf left
    let tree = &world.tree;
    let inside = tree.point_in_leaf(Vec3d::zero(), &world.planes, PortalMode::Tree);
    let leaf = tree.leaf(inside).unwrap();
    assert!(leaf.contents.is_empty_space());
    assert_eq!(leaf.visleaf, Some(0));
    assert_eq!(world.prt.num_leafs, 1);
    assert!(world.prt.portals.is_empty());

    // its portals are the six faces of the box
    let portals = tree.node(inside).portals.iter().map(|p| tree.portal(*p)).collect::<Vec<_>>();
    let mut faces = Vec::new();
    for portal in &portals {
        let plane = portal.plane_from(inside, &world.planes);
        let axis = (0..3).find(|a| plane.normal[*a].abs() == 1.0).unwrap();

        assert!((plane.distance.abs() - 64.0).abs() < 1e-6);
        faces.push((axis, plane.normal[axis] > 0.0));
    }
    faces.sort();
    faces.dedup();
    assert_eq!(faces.len(), 6);

    let area: f64 = portals.iter().map(|p| p.winding.area()).sum();
    approx::assert_relative_eq!(area, 6.0 * 128.0 * 128.0, epsilon = 1e-3);

    // vis of a single leaf
    assert_eq!(compiled.vis.data.rows, vec![vec![1]]);
}

#[test]
fn leaking_box() {
    let mut brushes = room([-64.0; 3], [64.0; 3], 16.0);

    // lower +x wall, leaving a one unit slit under the ceiling
    brushes[1] = box_brush([64.0, -80.0, -80.0], [80.0, 80.0, 63.0], "wall");

    let text = map_text(&brushes, &[("info_player_start", [0.0; 3])]);
    let compiled = compile_text(&text, &Settings::default());
    let world = &compiled.world;

    assert!(world.is_leaked());
    assert!(!world.fill.sealed);
    assert_eq!(world.fill.outleafs, 0);

    let leak = world.fill.leak.as_ref().unwrap();
    assert_eq!(leak.occupant, 0);
    assert!(!leak.portals.is_empty());
    assert!(leak.trail.len() > 2);
    assert_eq!(leak.trail[0], Vec3d::zero());

    // trail ends beyond the walls
    let end = *leak.trail.last().unwrap();
    assert!((0..3).any(|axis| end[axis].abs() > 80.0), "{end:?}");

    // consecutive trail points are at most leak_dist apart, up to portal corners
    let step = Settings::default().leak_dist;
    let long_gaps = leak.trail.windows(2).filter(|w| (w[1] - w[0]).length() > 2.0 * step + 1e-6).count();
    assert!(long_gaps <= leak.portals.len() + 1);

    // unfilled tree still gets vis
    assert_eq!(compiled.vis.data.rows.len(), world.prt.num_leafs);
}

#[test]
fn no_occupants_no_fill() {
    let text = map_text(&room([-64.0; 3], [64.0; 3], 16.0), &[]);
    let world = build_text(&text, &Settings::default());

    assert!(!world.fill.sealed);
    assert!(world.fill.leak.is_none());
    assert_eq!(world.fill.outleafs, 0);
}

#[test]
fn convex_brush_in_every_split_mode() {
    let text = map_text(&[box_brush([-32.0; 3], [32.0; 3], "wall")], &[]);
    let settings = Settings::default();

    for split_type in [SplitType::Auto, SplitType::Precise, SplitType::Fast] {
        let mut set = Map::parse(&text).unwrap().load_brushes(&settings).unwrap();
        let tree = build_tree(&mut set.planes, set.brushes, split_type, &settings).unwrap();

        let decisions = tree.nodes_depth_first().into_iter().filter(|id| !tree.node(*id).is_leaf()).count();
        assert_eq!(decisions, 6, "{split_type:?}");

        // same solid shape whatever the tree looks like
        for x in (-40i32..=40).step_by(10) {
            for y in (-40..=40).step_by(10) {
                for z in (-40..=40).step_by(10) {
                    let point = Vec3d::new(x as f64, y as f64, z as f64);
                    let inside = [x, y, z].iter().all(|c| c.abs() < 32);

                    let id = tree.point_in_leaf(point, &set.planes, PortalMode::Tree);
                    assert_eq!(tree.leaf(id).unwrap().contents.is_solid(), inside, "{split_type:?} {point:?}");
                }
            }
        }
    }
}

#[test]
fn portal_pairing() {
    let world = build_text(&common::three_rooms(), &Settings::default());
    let tree = &world.tree;

    assert!(world.fill.sealed);
    assert!(!tree.portals.is_empty());

    for (index, portal) in tree.portals.iter().enumerate() {
        let id = PortalId::from_index(index);

        let holders = tree
            .nodes_depth_first()
            .into_iter()
            .filter(|n| tree.node(*n).portals.contains(&id))
            .collect::<Vec<NodeId>>();
        let mut expected = portal.nodes.iter().copied().filter(|n| *n != tree.outside).collect::<Vec<_>>();
        expected.sort();
        let mut holders = holders;
        holders.sort();
        assert_eq!(holders, expected);

        if portal.nodes.contains(&tree.outside) {
            continue;
        }

        // seen from each side, the plane faces that side and away from the other one
        for (side, node) in portal.nodes.iter().enumerate() {
            let plane = portal.plane_from(*node, &world.planes);
            let center = tree.node(*node).bounds.center();
            let other = tree.node(portal.nodes[1 - side]).bounds.center();

            assert!(plane.point_distance(center) > 0.0);
            assert!(plane.point_distance(other) < 0.0);
        }
    }
}

#[test]
fn detail_crate_shares_cluster() {
    let mut text = map_text(&room([-128.0, -64.0, -64.0], [128.0, 64.0, 64.0], 16.0), &[("info_player_start", [-96.0, 0.0, 0.0])]);
    text.push_str(&brush_entity("func_detail", &[box_brush([-16.0, -16.0, -64.0], [16.0, 16.0, -32.0], "crate")]));

    let compiled = compile_text(&text, &Settings::default());
    let world = &compiled.world;
    let prt = &world.prt;

    assert!(world.fill.sealed);
    assert_eq!(prt.format, PrtFormat::Prt2);
    assert!(prt.num_clusters < prt.num_leafs, "{} clusters, {} leafs", prt.num_clusters, prt.num_leafs);
    assert_eq!(prt.leaf_clusters.len(), prt.num_leafs);

    // the crate splits the room, its pieces stay one cluster
    let player = common::visleaf_at(world, [-96.0, 0.0, 0.0]);
    let above_crate = common::visleaf_at(world, [0.0, 0.0, 0.0]);
    assert_ne!(player, above_crate);
    assert_eq!(prt.leaf_clusters[player], prt.leaf_clusters[above_crate]);

    let data = &compiled.vis.data;
    assert_eq!(data.rows.len(), prt.num_leafs);
    assert_eq!(data.compressed.len(), prt.num_clusters);

    for i in 0..prt.num_leafs {
        assert!(data.is_visible(i, i), "leaf {i}");

        for j in 0..prt.num_leafs {
            assert_eq!(data.is_visible(i, j), data.is_visible(j, i), "leafs {i} {j}");

            if prt.leaf_clusters[i] == prt.leaf_clusters[j] {
                assert_eq!(data.rows[i], data.rows[j], "leafs {i} {j}");
            }
        }
    }
}
