//! Statistics module for pomosync
//!
//! Counts completed countdowns per calendar day, split into solo and group
//! (synced session) completions.

mod daily;

pub use daily::DailyStats;
