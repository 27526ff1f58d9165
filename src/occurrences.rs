use std::collections::HashMap;

use chrono::{Duration, Utc};

use crate::{
    events::Timestamp,
    triggers::OccurrenceInterval,
    Result,
};

/// Counts and records rule occurrences. Backed by the host's row store; the on-disk schema is the
/// host's concern, only this query contract matters.
pub trait OccurrenceStore: Send + Sync {
    /// Number of occurrences recorded under `key` within `interval`.
    fn count_occurrences(&self, key: &str, interval: &OccurrenceInterval) -> Result<u32>;
    /// Record one occurrence under `key`, timestamped now.
    fn record_occurrence(&self, key: &str) -> Result<()>;
}

/// An [`OccurrenceStore`] holding occurrences in memory.
#[derive(Default)]
pub struct InMemoryOccurrenceStore {
    occurrences: std::sync::Mutex<HashMap<String, Vec<Timestamp>>>,
}

impl OccurrenceStore for InMemoryOccurrenceStore {
    fn count_occurrences(&self, key: &str, interval: &OccurrenceInterval) -> Result<u32> {
        let occurrences = self
            .occurrences
            .lock()
            .expect("thread holding occurrence lock should not panic");
        let Some(timestamps) = occurrences.get(key) else {
            return Ok(0);
        };
        let count = match interval {
            OccurrenceInterval::Infinity => timestamps.len(),
            OccurrenceInterval::Minutes { minutes } => {
                let cutoff = Utc::now() - Duration::minutes(*minutes as i64);
                timestamps.iter().filter(|t| **t >= cutoff).count()
            }
        };
        Ok(count as u32)
    }

    fn record_occurrence(&self, key: &str) -> Result<()> {
        let mut occurrences = self
            .occurrences
            .lock()
            .expect("thread holding occurrence lock should not panic");
        occurrences.entry(key.to_owned()).or_default().push(Utc::now());
        Ok(())
    }
}
