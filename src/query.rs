use anyhow::Result;
use chrono::{DateTime, Duration, Utc};

use crate::storage::Storage;
use crate::types::Sample;

/// Read side of the sample store, shared by the API and the evaluator.
#[derive(Clone)]
pub struct SeriesQuery {
    storage: Storage,
}

impl SeriesQuery {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// The most recent sample, or a zero-valued placeholder stamped with the
    /// current time when nothing has been collected yet.
    pub fn latest(&self) -> Result<Sample> {
        Ok(self
            .storage
            .latest()?
            .unwrap_or_else(|| Sample::empty(Utc::now())))
    }

    /// Samples from the last `duration`, oldest first.
    pub fn window(&self, duration: Duration) -> Result<Vec<Sample>> {
        self.window_at(duration, Utc::now())
    }

    pub fn window_at(&self, duration: Duration, now: DateTime<Utc>) -> Result<Vec<Sample>> {
        self.storage.since(now - duration)
    }
}
