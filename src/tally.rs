//! Session-wide detection counters.
//!
//! Every read-modify-write of the counters goes through one mutex, including
//! the summary write that accompanies a reset.

use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

/// Cumulative counts since the last reset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub infested: u64,
    pub not_infested: u64,
}

/// Share of each class in percent; both `0.0` when nothing was counted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Percentages {
    pub infested_percentage: f64,
    pub not_infested_percentage: f64,
}

impl Counts {
    pub fn total(&self) -> u64 {
        self.infested + self.not_infested
    }

    pub fn percentages(&self) -> Percentages {
        let total = self.total();
        if total == 0 {
            return Percentages { infested_percentage: 0.0, not_infested_percentage: 0.0 };
        }
        let total = total as f64;
        Percentages {
            infested_percentage: self.infested as f64 / total * 100.0,
            not_infested_percentage: self.not_infested as f64 / total * 100.0,
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionTally {
    counts: Mutex<Counts>,
}

impl SessionTally {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave `Counts` half-written.
    fn lock(&self) -> MutexGuard<'_, Counts> {
        self.counts.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add to the counters and return the new totals.
    pub fn record(&self, infested: u64, not_infested: u64) -> Counts {
        let mut counts = self.lock();
        counts.infested = counts.infested.saturating_add(infested);
        counts.not_infested = counts.not_infested.saturating_add(not_infested);
        *counts
    }

    pub fn snapshot(&self) -> Counts {
        *self.lock()
    }

    pub fn percentages(&self) -> Percentages {
        self.snapshot().percentages()
    }

    /// Hand the current counts to `persist` under the lock and zero them only
    /// if it succeeds. Returns the counts as they were before the reset.
    ///
    /// The lock is held for as long as `persist` runs, which may include a
    /// SQLite busy wait. Every method here blocks on that lock, so async
    /// callers go through `spawn_blocking`.
    pub fn reset_with<E>(
        &self,
        persist: impl FnOnce(Counts) -> Result<(), E>,
    ) -> Result<Counts, E> {
        let mut counts = self.lock();
        let before = *counts;
        persist(before)?;
        *counts = Counts::default();
        Ok(before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn record_accumulates() {
        let tally = SessionTally::new();
        tally.record(2, 1);
        let c = tally.record(1, 3);
        assert_eq!(c, Counts { infested: 3, not_infested: 4 });
        assert_eq!(tally.snapshot(), c);
    }

    #[test]
    fn percentages_of_empty_tally_are_zero() {
        let p = SessionTally::new().percentages();
        assert_eq!(p.infested_percentage, 0.0);
        assert_eq!(p.not_infested_percentage, 0.0);
    }

    #[test]
    fn percentages_split_total() {
        let tally = SessionTally::new();
        tally.record(1, 3);
        let p = tally.percentages();
        assert_eq!(p.infested_percentage, 25.0);
        assert_eq!(p.not_infested_percentage, 75.0);
    }

    #[test]
    fn successful_reset_zeroes_and_returns_previous() {
        let tally = SessionTally::new();
        tally.record(4, 6);
        let mut seen = None;
        let before = tally
            .reset_with(|c| {
                seen = Some(c);
                Ok::<_, ()>(())
            })
            .unwrap();
        assert_eq!(before, Counts { infested: 4, not_infested: 6 });
        assert_eq!(seen, Some(before));
        assert_eq!(tally.snapshot(), Counts::default());
    }

    #[test]
    fn failed_persist_keeps_counts() {
        let tally = SessionTally::new();
        tally.record(1, 1);
        let err = tally.reset_with(|_| Err("disk full")).unwrap_err();
        assert_eq!(err, "disk full");
        assert_eq!(tally.snapshot(), Counts { infested: 1, not_infested: 1 });
    }

    #[test]
    fn concurrent_records_are_not_lost() {
        let tally = Arc::new(SessionTally::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = Arc::clone(&tally);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        t.record(1, 2);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(tally.snapshot(), Counts { infested: 8000, not_infested: 16000 });
    }
}
