// crates/markplay-core/src/marks.rs
//
// MarkIndex: the requested pause marks plus the slice of them that falls
// inside the live region.
//
// Requested marks are sorted once at session start, so the active marks are
// always a contiguous sub-slice of them. We store that slice as a Range into
// `requested` rather than a second Vec; re-filtering after a drag is two
// binary searches and no allocation.
//
// Lookup flavours (all O(log n) via `partition_point`):
//   first_strictly_after  : natural playback; a mark equal to `t` is done
//   first_at_or_after     : a mark equal to `t` is still ahead
//   first_after_grace     : user seek; marks just right of the click are done
//   last_strictly_before  : "previous mark" navigation

use std::ops::Range;

use crate::region::Region;

/// Floating-point slack for mark comparisons. Not a platform tolerance:
/// it only absorbs representation error between parsed and reported times.
pub const MARK_EPSILON: f64 = 1e-6;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MarkIndex {
    requested: Vec<f64>,
    active:    Range<usize>,
}

impl MarkIndex {
    /// Build from requested marks. Input is re-sorted and de-duplicated so a
    /// hand-built list gets the same guarantees as a parsed one. Negative and
    /// non-finite values are dropped.
    pub fn new(mut requested: Vec<f64>) -> Self {
        requested.retain(|m| m.is_finite() && *m >= 0.0);
        requested.sort_by(f64::total_cmp);
        requested.dedup_by(|a, b| (*a - *b).abs() < 1e-9);
        let len = requested.len();
        Self { requested, active: 0..len }
    }

    /// Restrict the active marks to `region` (inclusive on both ends).
    pub fn filter_to_region(&mut self, region: &Region) {
        self.active = filter_to_region(&self.requested, region);
    }

    /// Drop every active mark, e.g. while no region exists.
    pub fn clear_active(&mut self) {
        self.active = 0..0;
    }

    pub fn requested(&self) -> &[f64] {
        &self.requested
    }

    pub fn active(&self) -> &[f64] {
        self.requested.get(self.active.clone()).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.active().len()
    }

    pub fn is_empty(&self) -> bool {
        self.active().is_empty()
    }

    pub fn get(&self, idx: usize) -> Option<f64> {
        self.active().get(idx).copied()
    }

    /// Smallest index whose mark is `> t` (a mark equal to `t` counts as handled).
    pub fn first_strictly_after(&self, t: f64) -> usize {
        self.active().partition_point(|&m| m <= t + MARK_EPSILON)
    }

    /// Smallest index whose mark is `>= t` (a mark equal to `t` is still ahead).
    pub fn first_at_or_after(&self, t: f64) -> usize {
        self.active().partition_point(|&m| m < t - MARK_EPSILON)
    }

    /// Exclusive lookup from `t + grace`: a mark within `grace` to the right
    /// of `t` counts as already passed.
    pub fn first_after_grace(&self, t: f64, grace: f64) -> usize {
        self.first_strictly_after(t + grace.max(0.0))
    }

    /// Nearest active mark strictly before `t`, or `region_start` if none.
    pub fn last_strictly_before(&self, t: f64, region_start: f64) -> f64 {
        let idx = self.first_at_or_after(t);
        idx.checked_sub(1)
            .and_then(|i| self.get(i))
            .unwrap_or(region_start)
    }
}

/// Range of `requested` (pre-sorted) that lies within `[region.start, region.end]`.
pub fn filter_to_region(requested: &[f64], region: &Region) -> Range<usize> {
    let lo = requested.partition_point(|&m| m < region.start);
    let hi = requested.partition_point(|&m| m <= region.end).max(lo);
    lo..hi
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(marks: &[f64], start: f64, end: f64) -> MarkIndex {
        let mut idx = MarkIndex::new(marks.to_vec());
        idx.filter_to_region(&Region { start, end });
        idx
    }

    #[test]
    fn active_is_exact_inclusive_subset() {
        let requested = [0.5, 1.0, 2.0, 5.0, 8.0, 10.0, 12.0];
        let idx = index(&requested, 1.0, 10.0);
        let expected: Vec<f64> = requested.iter().copied()
            .filter(|m| *m >= 1.0 && *m <= 10.0)
            .collect();
        assert_eq!(idx.active(), expected.as_slice());
    }

    #[test]
    fn active_subset_for_many_regions() {
        let requested: Vec<f64> = (0..40).map(|i| i as f64 * 0.75).collect();
        let idx_all = MarkIndex::new(requested.clone());
        for s in 0..12 {
            for e in (s + 1)..14 {
                let (start, end) = (s as f64 * 2.1, e as f64 * 2.1);
                let mut idx = idx_all.clone();
                idx.filter_to_region(&Region { start, end });
                let expected: Vec<f64> = requested.iter().copied()
                    .filter(|m| *m >= start && *m <= end)
                    .collect();
                assert_eq!(idx.active(), expected.as_slice(), "region [{start}, {end}]");
            }
        }
    }

    #[test]
    fn new_sorts_dedups_and_drops_invalid() {
        let idx = MarkIndex::new(vec![5.0, -1.0, 2.0, f64::NAN, 5.0, 2.0]);
        assert_eq!(idx.requested(), &[2.0, 5.0]);
    }

    #[test]
    fn strictly_after_treats_equal_as_handled() {
        let idx = index(&[2.0, 5.0, 8.0], 0.0, 10.0);
        assert_eq!(idx.first_strictly_after(0.0), 0);
        assert_eq!(idx.first_strictly_after(2.0), 1);
        assert_eq!(idx.first_strictly_after(2.0 - 1e-9), 1);
        assert_eq!(idx.first_strictly_after(4.99), 1);
        assert_eq!(idx.first_strictly_after(8.0), 3);
    }

    #[test]
    fn at_or_after_keeps_equal_ahead() {
        let idx = index(&[2.0, 5.0, 8.0], 0.0, 10.0);
        assert_eq!(idx.first_at_or_after(2.0), 0);
        assert_eq!(idx.first_at_or_after(5.0), 1);
        assert_eq!(idx.first_at_or_after(5.1), 2);
        assert_eq!(idx.first_at_or_after(9.0), 3);
    }

    #[test]
    fn grace_skips_marks_just_right_of_click() {
        let idx = index(&[2.0, 5.0, 8.0], 0.0, 10.0);
        assert_eq!(idx.first_after_grace(4.97, 0.05), 2);
        assert_eq!(idx.first_after_grace(4.90, 0.05), 1);
    }

    #[test]
    fn previous_mark_or_region_start() {
        let idx = index(&[2.0, 5.0, 8.0], 1.0, 10.0);
        assert_eq!(idx.last_strictly_before(5.0, 1.0), 2.0);
        assert_eq!(idx.last_strictly_before(5.5, 1.0), 5.0);
        assert_eq!(idx.last_strictly_before(2.0, 1.0), 1.0);
        assert_eq!(idx.last_strictly_before(10.0, 1.0), 8.0);
    }

    #[test]
    fn narrowing_region_drops_marks() {
        let mut idx = index(&[2.0, 5.0, 8.0], 0.0, 10.0);
        idx.filter_to_region(&Region { start: 0.0, end: 6.0 });
        assert_eq!(idx.active(), &[2.0, 5.0]);
        assert_eq!(idx.get(2), None);
    }
}
