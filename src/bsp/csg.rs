//! Carving of overlapping solid brushes

use crate::{config::Settings, geom::ON_EPSILON, stats::BspStats};

use super::{brush::Brush, plane_set::PlaneSet};

/// Check if `b1` may bite into `b2`. Detail never bites structural.
fn brush_ge(b1: &Brush, b2: &Brush) -> bool {
    if b1.is_detail() && !b2.is_detail() {
        return false;
    }
    b1.contents.is_solid() && b2.contents.is_solid()
}

/// True if brushes surely don't intersect. Misses some non-axial cases.
fn brushes_disjoint(a: &Brush, b: &Brush) -> bool {
    if a.bounds.is_disjoint(&b.bounds, ON_EPSILON) {
        return true;
    }

    a.sides.iter().any(|sa| b.sides.iter().any(|sb| sa.plane_num == sb.plane_num ^ 1))
}

/// Fragments of `a` outside of `b`. None if brushes don't really intersect,
/// empty list if `a` lies inside `b` entirely.
fn subtract_brush(a: &Brush, b: &Brush, planes: &PlaneSet, settings: &Settings, stats: &BspStats) -> Option<Vec<Brush>> {
    let mut out = Vec::new();
    let mut inside = a.clone();

    for side in &b.sides {
        let result = inside.split(side.plane_num, planes, settings, stats);

        out.extend(result.front);
        inside = result.back?;
    }

    Some(out)
}

/// Carve intersecting solid brushes into non-intersecting pieces.
///
/// For every overlapping pair the brush allowed to bite loses the overlap.
/// If both may bite, the variant giving fewer fragments wins. Unless
/// `chop_fragment` is set, pairs that fragment both ways stay untouched.
pub fn chop_brushes(brushes: Vec<Brush>, planes: &PlaneSet, settings: &Settings) -> Vec<Brush> {
    let original_count = brushes.len();
    let stats = BspStats::default();
    let mut list = brushes;
    let mut swallowed = 0usize;
    let mut from_split = 0usize;

    let mut i = 0;
    'restart: while i < list.len() {
        let mut j = i + 1;

        while j < list.len() {
            if brushes_disjoint(&list[i], &list[j]) {
                j += 1;
                continue;
            }

            let mut sub = Vec::new();
            let mut sub2 = Vec::new();
            let mut c1 = usize::MAX;
            let mut c2 = usize::MAX;

            if brush_ge(&list[j], &list[i]) {
                let Some(pieces) = subtract_brush(&list[i], &list[j], planes, settings, &stats) else {
                    j += 1;
                    continue;
                };
                if pieces.is_empty() {
                    list.remove(i);
                    swallowed += 1;
                    continue 'restart;
                }
                c1 = pieces.len();
                sub = pieces;
            }

            if brush_ge(&list[i], &list[j]) {
                let Some(pieces) = subtract_brush(&list[j], &list[i], planes, settings, &stats) else {
                    j += 1;
                    continue;
                };
                if pieces.is_empty() {
                    list.remove(j);
                    swallowed += 1;
                    continue 'restart;
                }
                c2 = pieces.len();
                sub2 = pieces;
            }

            if sub.is_empty() && sub2.is_empty() {
                j += 1;
                continue;
            }

            if !settings.chop_fragment && c1 > 1 && c2 > 1 {
                j += 1;
                continue;
            }

            if c1 < c2 {
                from_split += sub.len();
                list.splice(i..=i, sub);
            } else {
                from_split += sub2.len();
                list.splice(j..=j, sub2);
            }
            continue 'restart;
        }

        i += 1;
    }

    log::info!("{swallowed:8} brushes swallowed");
    log::info!("{from_split:8} brushes created from chopping");
    log::info!("chopped {original_count} brushes into {}", list.len());

    list
}
