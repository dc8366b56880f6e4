//! Day-keyed completion counters.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Completions for one calendar day.
///
/// Counters never accumulate across days: recording on a new date starts
/// the counts over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    /// Countdowns completed while solo
    pub solo: u32,
    /// Countdowns completed in a synced session
    pub group: u32,
}

impl DailyStats {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            solo: 0,
            group: 0,
        }
    }

    /// Count one completion on `today`.
    pub fn record(&mut self, synced: bool, today: NaiveDate) {
        if self.date != today {
            *self = Self::new(today);
        }
        if synced {
            self.group += 1;
        } else {
            self.solo += 1;
        }
    }

    /// Consuming form of [`DailyStats::record`].
    pub fn recorded(mut self, synced: bool, today: NaiveDate) -> Self {
        self.record(synced, today);
        self
    }

    /// The counts as of `today`; zeros when the stored date is stale.
    pub fn for_day(&self, today: NaiveDate) -> Self {
        if self.date == today {
            self.clone()
        } else {
            Self::new(today)
        }
    }

    pub fn total(&self) -> u32 {
        self.solo + self.group
    }
}
