/// Overall percent while subjob `finished` (0-based index of the active one)
/// reports `subjob_percent`. Every subjob carries equal weight.
pub fn running_percent(finished: usize, subjob_percent: u32, total: usize) -> u32 {
    if total == 0 {
        return 100;
    }
    let p = u64::from(subjob_percent.min(100));
    ((finished as u64 * 100 + p) / total as u64) as u32
}

/// Overall percent once `finished` subjobs have completed.
pub fn finished_percent(finished: usize, total: usize) -> u32 {
    running_percent(finished, 0, total)
}

/// Remembers the last emitted percent and refuses to go backwards.
#[derive(Debug, Default, Clone, Copy)]
pub struct PercentTracker {
    last: u32,
}

impl PercentTracker {
    pub fn current(&self) -> u32 {
        self.last
    }

    /// Returns the value to emit, if it moved forward.
    pub fn advance(&mut self, percent: u32) -> Option<u32> {
        let percent = percent.min(100);
        if percent > self.last {
            self.last = percent;
            Some(percent)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_weighting() {
        assert_eq!(running_percent(0, 0, 2), 0);
        assert_eq!(running_percent(0, 50, 2), 25);
        assert_eq!(running_percent(1, 0, 2), 50);
        assert_eq!(running_percent(1, 100, 2), 100);
        assert_eq!(running_percent(1, 50, 3), 50);
        assert_eq!(running_percent(0, 99, 3), 33);
    }

    #[test]
    fn out_of_range_subjob_percent_is_clamped() {
        assert_eq!(running_percent(0, 400, 4), 25);
    }

    #[test]
    fn empty_sequence_is_complete() {
        assert_eq!(finished_percent(0, 0), 100);
    }

    #[test]
    fn finished_percent_floors() {
        assert_eq!(finished_percent(1, 3), 33);
        assert_eq!(finished_percent(2, 3), 66);
        assert_eq!(finished_percent(3, 3), 100);
    }

    #[test]
    fn tracker_is_monotonic() {
        let mut t = PercentTracker::default();
        assert_eq!(t.advance(0), None);
        assert_eq!(t.advance(40), Some(40));
        assert_eq!(t.advance(40), None);
        assert_eq!(t.advance(10), None);
        assert_eq!(t.advance(120), Some(100));
        assert_eq!(t.current(), 100);
    }
}
