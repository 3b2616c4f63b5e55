use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Processed and failed record counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub processed: u64,
    pub errors: u64,
}

impl Tally {
    pub fn processed(count: u64) -> Self {
        Self {
            processed: count,
            errors: 0,
        }
    }

    pub fn errors(count: u64) -> Self {
        Self {
            processed: 0,
            errors: count,
        }
    }

    pub fn total(&self) -> u64 {
        self.processed + self.errors
    }

    /// `errors / processed`, or 0 when nothing was processed.
    pub fn error_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.errors as f64 / self.processed as f64
        }
    }
}

impl Add for Tally {
    type Output = Tally;

    fn add(self, rhs: Tally) -> Tally {
        Tally {
            processed: self.processed + rhs.processed,
            errors: self.errors + rhs.errors,
        }
    }
}

impl AddAssign for Tally {
    fn add_assign(&mut self, rhs: Tally) {
        *self = *self + rhs;
    }
}

impl Sum for Tally {
    fn sum<I: Iterator<Item = Tally>>(iter: I) -> Tally {
        iter.fold(Tally::default(), Add::add)
    }
}
