use std::ops::{Add, AddAssign};

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ProgressRecord {
    pub instruments: usize,
    pub instrument_failures: usize,
    pub records_added: usize,
    pub timepoints_considered: usize,
    pub bad_timepoints: usize,
    pub searched: usize,
    pub search_skipped: usize,
    pub search_failed: usize,
}

impl Add for ProgressRecord {
    type Output = ProgressRecord;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for ProgressRecord {
    fn add_assign(&mut self, rhs: Self) {
        self.instruments += rhs.instruments;
        self.instrument_failures += rhs.instrument_failures;
        self.records_added += rhs.records_added;
        self.timepoints_considered += rhs.timepoints_considered;
        self.bad_timepoints += rhs.bad_timepoints;
        self.searched += rhs.searched;
        self.search_skipped += rhs.search_skipped;
        self.search_failed += rhs.search_failed;
    }
}
