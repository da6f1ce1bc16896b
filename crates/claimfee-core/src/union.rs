//! Exact union measures over overlapping boxes.
//!
//! Both measures sweep along X. Between two consecutive event coordinates the
//! set of active boxes is constant, so the slab contributes its width times
//! the union measure of the active boxes' cross-section. Cross-sections are
//! themselves swept (Y for volume) down to merged Z intervals, so overlapping
//! active boxes are never counted twice.
//!
//! Coordinates are widened to `i64` and ranges are half-open (`max + 1`), so
//! a box ending at `i32::MAX` still produces a valid end event.

use crate::geometry::Cuboid;

/// Volume of the set union of `boxes`. Duplicates and nested boxes are fine.
pub fn union_volume(boxes: &[Cuboid]) -> i128 {
    match boxes {
        [] => 0,
        [only] => only.volume(),
        _ => sweep(boxes, x_range, |slab| {
            sweep(slab, y_range, |strip| merged_length(strip, z_range))
        }),
    }
}

/// Area of the union of the boxes' X×Z footprints, ignoring height.
pub fn footprint_union_area(boxes: &[Cuboid]) -> i128 {
    match boxes {
        [] => 0,
        [only] => only.footprint_area(),
        _ => sweep(boxes, x_range, |slab| merged_length(slab, z_range)),
    }
}

/// Blocks of `target` already covered by any of `others`.
pub fn covered_volume(target: &Cuboid, others: &[Cuboid]) -> i128 {
    let overlaps: Vec<Cuboid> = others.iter().filter_map(|o| target.intersect(o)).collect();
    union_volume(&overlaps)
}

/// Footprint cells of `target` already covered by the footprint of any of
/// `others`, regardless of whether their heights overlap.
pub fn covered_footprint(target: &Cuboid, others: &[Cuboid]) -> i128 {
    let layer = target.min_y;
    let flat_target = target.flattened(layer);
    let overlaps: Vec<Cuboid> = others
        .iter()
        .filter_map(|o| flat_target.intersect(&o.flattened(layer)))
        .collect();
    footprint_union_area(&overlaps)
}

// ---------------------------------------------------------------------------
// Sweep machinery
// ---------------------------------------------------------------------------

fn x_range(b: &Cuboid) -> (i64, i64) {
    (i64::from(b.min_x), i64::from(b.max_x) + 1)
}

fn y_range(b: &Cuboid) -> (i64, i64) {
    (i64::from(b.min_y), i64::from(b.max_y) + 1)
}

fn z_range(b: &Cuboid) -> (i64, i64) {
    (i64::from(b.min_z), i64::from(b.max_z) + 1)
}

struct Event {
    at: i64,
    start: bool,
    index: usize,
}

/// Sweep `boxes` along the axis picked by `range`, accumulating
/// `width × measure(active)` for every stretch where the active set is
/// non-empty.
fn sweep<R, M>(boxes: &[Cuboid], range: R, measure: M) -> i128
where
    R: Fn(&Cuboid) -> (i64, i64),
    M: Fn(&[Cuboid]) -> i128,
{
    let mut events = Vec::with_capacity(boxes.len() * 2);
    for (index, b) in boxes.iter().enumerate() {
        let (start, end) = range(b);
        events.push(Event {
            at: start,
            start: true,
            index,
        });
        events.push(Event {
            at: end,
            start: false,
            index,
        });
    }
    // Starts sort before ends at the same coordinate.
    events.sort_by(|a, b| a.at.cmp(&b.at).then(b.start.cmp(&a.start)));

    let mut total: i128 = 0;
    let mut active: Vec<usize> = Vec::new();
    let mut last = i64::MIN;

    for event in events {
        if !active.is_empty() && event.at > last {
            let section: Vec<Cuboid> = active.iter().map(|&i| boxes[i]).collect();
            total += i128::from(event.at - last) * measure(&section);
        }

        if event.start {
            active.push(event.index);
        } else if let Some(pos) = active.iter().position(|&i| i == event.index) {
            active.swap_remove(pos);
        }
        last = event.at;
    }

    total
}

/// Total length covered by the union of the boxes' intervals on one axis.
fn merged_length<R>(boxes: &[Cuboid], range: R) -> i128
where
    R: Fn(&Cuboid) -> (i64, i64),
{
    let mut intervals: Vec<(i64, i64)> = boxes.iter().map(range).collect();
    intervals.sort_unstable();

    let mut total: i128 = 0;
    let mut current: Option<(i64, i64)> = None;
    for (start, end) in intervals {
        current = match current {
            Some((cs, ce)) if start <= ce => Some((cs, ce.max(end))),
            Some((cs, ce)) => {
                total += i128::from(ce - cs);
                Some((start, end))
            }
            None => Some((start, end)),
        };
    }
    if let Some((cs, ce)) = current {
        total += i128::from(ce - cs);
    }
    total
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
