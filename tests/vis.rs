mod common;

use std::{fs, time::Duration};

use bspcore::{
    bsp::compiler::vis_portal_file,
    config::{Settings, VisSettings},
    prt::PrtFile,
    vis::{self, PortalGraph},
};
use common::{build_text, corridor, three_rooms, visleaf_at, CORRIDOR_CENTERS, ROOM_CENTERS};

#[test]
fn two_rooms_and_a_third() {
    let world = build_text(&three_rooms(), &Settings::default());
    assert!(world.fill.sealed);

    let exact = vis::calc_vis(&world.prt, &VisSettings::default(), None).unwrap();
    let data = &exact.data;
    let [a, b, c] = ROOM_CENTERS.map(|p| visleaf_at(&world, p));

    assert!(data.is_visible(a, b));
    assert!(data.is_visible(b, a));
    assert!(!data.is_visible(a, c) && !data.is_visible(c, a));
    assert!(!data.is_visible(b, c) && !data.is_visible(c, b));

    let num_leafs = world.prt.num_leafs;
    assert_eq!(data.rows.len(), num_leafs);
    for i in 0..num_leafs {
        assert!(data.is_visible(i, i), "leaf {i}");
        for j in 0..num_leafs {
            assert_eq!(data.is_visible(i, j), data.is_visible(j, i), "leafs {i} {j}");
        }
    }

    // fast vis may only add leaves
    let fast = vis::calc_vis(&world.prt, &VisSettings { fast: true, ..VisSettings::default() }, None).unwrap();
    for i in 0..num_leafs {
        for j in 0..num_leafs {
            if data.is_visible(i, j) {
                assert!(fast.data.is_visible(i, j), "leafs {i} {j}");
            }
        }
    }
    assert!(!fast.data.is_visible(a, c) && !fast.data.is_visible(b, c));

    // compressed rows expand to the same visibility
    for (leaf, row) in data.rows.iter().enumerate() {
        let cluster = world.prt.leaf_clusters[leaf];
        assert_eq!(&vis::decompress_row(&data.compressed[cluster], row.len()), row);
    }
    assert_eq!(data.offsets[0], 0);
    assert_eq!(data.visdata().len(), data.compressed.iter().map(Vec::len).sum::<usize>());
}

#[test]
fn test_levels_never_lose_visibility_through_the_door() {
    let world = build_text(&three_rooms(), &Settings::default());
    let [a, b, _] = ROOM_CENTERS.map(|p| visleaf_at(&world, p));

    for level in 0..=4 {
        let settings = VisSettings { level, ..VisSettings::default() };
        let result = vis::calc_vis(&world.prt, &settings, None).unwrap();

        assert!(result.data.is_visible(a, b), "level {level}");
    }
}

#[test]
fn visdist_drops_far_leaves() {
    let world = build_text(&corridor(), &Settings::default());
    let prt = &world.prt;
    let [first, .., last] = CORRIDOR_CENTERS.map(|p| visleaf_at(&world, p));

    let unlimited = vis::calc_vis(prt, &VisSettings::default(), None).unwrap().data;
    let limited = vis::calc_vis(prt, &VisSettings { visdist: 48.0, ..VisSettings::default() }, None).unwrap().data;

    // doorways line up, the far end is in sight without a limit
    assert!(unlimited.is_visible(first, last));

    let count = |data: &vis::VisData| {
        (0..prt.num_leafs)
            .flat_map(|i| (0..prt.num_leafs).map(move |j| (i, j)))
            .filter(|(i, j)| data.is_visible(*i, *j))
            .count()
    };
    assert!(count(&limited) < count(&unlimited));

    for i in 0..prt.num_leafs {
        assert!(limited.is_visible(i, i), "leaf {i}");
        for j in 0..prt.num_leafs {
            if limited.is_visible(i, j) {
                assert!(unlimited.is_visible(i, j), "leafs {i} {j}");
            }
        }
    }

    // neighbours are always in sight
    for portal in &prt.portals {
        let [a, b] = portal.clusters;
        assert!(limited.is_visible(a, b) && limited.is_visible(b, a), "leafs {a} {b}");
    }
}

#[test]
fn portal_graph_pairs() {
    let world = build_text(&three_rooms(), &Settings::default());
    let graph = PortalGraph::new(&world.prt).unwrap();

    assert_eq!(graph.portals.len(), 2 * world.prt.portals.len());

    let mut centers = vec![None; world.prt.num_leafs];
    for id in world.tree.leaves() {
        if let Some(visleaf) = world.tree.leaf(id).and_then(|l| l.visleaf) {
            centers[visleaf] = Some(world.tree.node(id).bounds.center());
        }
    }

    for (index, source) in world.prt.portals.iter().enumerate() {
        let [front, back] = source.clusters;
        let forward = &graph.portals[2 * index];
        let backward = &graph.portals[2 * index + 1];

        assert_eq!(forward.leaf, back);
        assert_eq!(backward.leaf, front);
        assert!(graph.leafs[front].portals.contains(&(2 * index)));
        assert!(graph.leafs[back].portals.contains(&(2 * index + 1)));

        assert!(forward.plane.normal.epsilon_eq(-backward.plane.normal, 1e-9));
        assert!((forward.plane.distance + backward.plane.distance).abs() < 1e-9);

        // each one-way plane faces the leaf it leads to
        let (front_center, back_center) = (centers[front].unwrap(), centers[back].unwrap());
        assert!(forward.plane.point_distance(back_center) > 0.0);
        assert!(forward.plane.point_distance(front_center) < 0.0);
        assert!(backward.plane.point_distance(front_center) > 0.0);
    }
}

#[test]
fn portal_file_round_trip() {
    let world = build_text(&three_rooms(), &Settings::default());
    let prt = &world.prt;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rooms.prt");
    prt.save(&path).unwrap();
    let loaded = PrtFile::load(&path).unwrap();

    assert_eq!(loaded.format, prt.format);
    assert_eq!(loaded.num_leafs, prt.num_leafs);
    assert_eq!(loaded.num_clusters, prt.num_clusters);
    assert_eq!(loaded.leaf_clusters, prt.leaf_clusters);
    assert_eq!(loaded.portals.len(), prt.portals.len());

    for (a, b) in loaded.portals.iter().zip(&prt.portals) {
        assert_eq!(a.clusters, b.clusters);
        assert_eq!(a.winding.len(), b.winding.len());
        for (p, q) in a.winding.iter().zip(b.winding.iter()) {
            assert!(p.epsilon_eq(q, 1e-4));
        }
    }

    let settings = VisSettings { nostate: true, autoclean: false, ..VisSettings::default() };
    let from_file = vis::calc_vis(&loaded, &settings, None).unwrap();
    let from_tree = vis::calc_vis(prt, &settings, None).unwrap();
    assert_eq!(from_file.data.rows, from_tree.data.rows);
}

#[test]
fn state_save_and_resume() {
    let world = build_text(&three_rooms(), &Settings::default());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rooms.prt");
    let state = path.with_extension("vis");
    let temp = path.with_extension("vi0");
    world.prt.save(&path).unwrap();

    let mut settings = Settings::default();
    settings.vis.autoclean = false;

    let first = vis_portal_file(&path, &settings).unwrap();
    assert!(!first.resumed);
    assert!(state.exists());

    let second = vis_portal_file(&path, &settings).unwrap();
    assert!(second.resumed);
    assert_eq!(second.data.rows, first.data.rows);

    // state interrupted between write and rename
    fs::rename(&state, &temp).unwrap();
    let promoted = vis_portal_file(&path, &settings).unwrap();
    assert!(promoted.resumed);
    assert!(!temp.exists());
    assert_eq!(promoted.data.rows, first.data.rows);

    let mut nostate = settings.clone();
    nostate.vis.nostate = true;
    assert!(!vis_portal_file(&path, &nostate).unwrap().resumed);

    // broken state is discarded, not fatal
    fs::write(&state, b"junk").unwrap();
    let rebuilt = vis_portal_file(&path, &settings).unwrap();
    assert!(!rebuilt.resumed);
    assert_eq!(rebuilt.data.rows, first.data.rows);

    // portal file newer than state
    let state_time = fs::metadata(&state).unwrap().modified().unwrap();
    fs::File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(state_time + Duration::from_secs(60))
        .unwrap();
    let stale = vis_portal_file(&path, &settings).unwrap();
    assert!(!stale.resumed);

    // autoclean removes the state
    let clean = vis_portal_file(&path, &Settings::default()).unwrap();
    assert!(!state.exists());
    assert_eq!(clean.data.rows, first.data.rows);
}

#[test]
fn state_of_other_portal_file_is_discarded() {
    let rooms = build_text(&three_rooms(), &Settings::default());
    let single = build_text(
        &common::map_text(&common::room([-64.0; 3], [64.0; 3], 16.0), &[("light", [0.0; 3])]),
        &Settings::default(),
    );

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("map.prt");

    let mut settings = Settings::default();
    settings.vis.autoclean = false;

    rooms.prt.save(&path).unwrap();
    vis_portal_file(&path, &settings).unwrap();

    // state is fresh by time but was made for another graph
    single.prt.save(&path).unwrap();
    let state = path.with_extension("vis");
    let portal_time = fs::metadata(&path).unwrap().modified().unwrap();
    fs::File::options()
        .write(true)
        .open(&state)
        .unwrap()
        .set_modified(portal_time + Duration::from_secs(60))
        .unwrap();

    let result = vis_portal_file(&path, &settings).unwrap();
    assert!(!result.resumed);
    assert_eq!(result.data.rows, vec![vec![1]]);
}
