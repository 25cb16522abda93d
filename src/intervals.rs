use itertools::Itertools;
use std::fmt;

/// Inclusive timestamp range, microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub lo: i64,
    pub hi: i64,
}

impl Interval {
    pub fn new(lo: i64, hi: i64) -> Self {
        Self { lo, hi }
    }

    pub fn contains(&self, ts: i64) -> bool {
        self.lo <= ts && ts <= self.hi
    }
}

/// Sorted, disjoint, non-adjacent list of inclusive ranges. Every operation keeps that shape, so
/// an empty set means "no timestamp can satisfy the predicate".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IntervalSet {
    intervals: Vec<Interval>,
}

impl IntervalSet {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn all() -> Self {
        Self::of(i64::MIN, i64::MAX)
    }

    pub fn of(lo: i64, hi: i64) -> Self {
        let intervals = if lo <= hi {
            vec![Interval::new(lo, hi)]
        } else {
            vec![]
        };
        Self { intervals }
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Interval> {
        self.intervals.iter()
    }

    pub fn contains(&self, ts: i64) -> bool {
        let i = self.intervals.partition_point(|interval| interval.hi < ts);
        self.intervals.get(i).map_or(false, |interval| interval.contains(ts))
    }

    /// Keeps only the parts of the set inside `[lo, hi]`.
    pub fn intersect(&mut self, lo: i64, hi: i64) -> &mut Self {
        self.intervals = self
            .intervals
            .iter()
            .filter_map(|interval| {
                let lo = interval.lo.max(lo);
                let hi = interval.hi.min(hi);
                (lo <= hi).then(|| Interval::new(lo, hi))
            })
            .collect();
        self
    }

    /// Removes `[lo, hi]` from the set, splitting ranges as needed.
    pub fn subtract(&mut self, lo: i64, hi: i64) -> &mut Self {
        if lo > hi {
            return self;
        }
        let mut out = Vec::with_capacity(self.intervals.len() + 1);
        for interval in &self.intervals {
            if interval.hi < lo || interval.lo > hi {
                out.push(*interval);
                continue;
            }
            if interval.lo < lo {
                out.push(Interval::new(interval.lo, lo - 1));
            }
            if interval.hi > hi {
                out.push(Interval::new(hi + 1, interval.hi));
            }
        }
        self.intervals = out;
        self
    }

    pub fn exclude(&mut self, ts: i64) -> &mut Self {
        self.subtract(ts, ts)
    }
}

impl fmt::Display for IntervalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}]",
            self.intervals
                .iter()
                .map(|interval| format!("[{}, {}]", interval.lo, interval.hi))
                .join(", ")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ranges(set: &IntervalSet) -> Vec<(i64, i64)> {
        set.iter().map(|i| (i.lo, i.hi)).collect()
    }

    #[test]
    fn intersect_narrows() {
        let mut set = IntervalSet::of(10, 100);
        set.intersect(50, 200);
        assert_eq!(ranges(&set), vec![(50, 100)]);
        set.intersect(101, 200);
        assert!(set.is_empty());
    }

    #[test]
    fn subtract_splits() {
        let mut set = IntervalSet::all();
        set.subtract(10, 20).exclude(30);
        assert_eq!(
            ranges(&set),
            vec![(i64::MIN, 9), (21, 29), (31, i64::MAX)]
        );
        assert!(set.contains(25));
        assert!(!set.contains(30));
        assert!(!set.contains(15));

        set.intersect(0, 40);
        assert_eq!(ranges(&set), vec![(0, 9), (21, 29), (31, 40)]);
        set.subtract(0, 40);
        assert!(set.is_empty());
    }

    #[test]
    fn inverted_range_is_empty() {
        assert!(IntervalSet::of(5, 4).is_empty());
        let mut set = IntervalSet::of(1, 10);
        set.subtract(7, 3);
        assert_eq!(ranges(&set), vec![(1, 10)]);
    }
}
