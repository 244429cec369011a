use chrono::{DateTime, NaiveDate, TimeZone};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::error::{PipelineError, PipelineResult};
use crate::models::attendance::AttendanceEvent;
use crate::store::AttendanceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordOutcome {
    Inserted,
    Skipped,
}

/// Enforces one attendance event per identity per calendar day.
///
/// The in-memory map of last recorded dates absorbs repeat sightings
/// without touching the store. On a miss the store is asked, and the
/// store's unique `(identity, date)` constraint is the final word if two
/// callers race past both checks.
pub struct AttendanceDeduplicator {
    store: Arc<dyn AttendanceStore>,
    last_recorded: Mutex<HashMap<String, NaiveDate>>,
}

impl AttendanceDeduplicator {
    pub fn new(store: Arc<dyn AttendanceStore>) -> Self {
        Self { store, last_recorded: Mutex::new(HashMap::new()) }
    }

    pub fn record<Tz: TimeZone>(&self, identity_id: &str, display_name: &str, now: &DateTime<Tz>) -> PipelineResult<RecordOutcome> {
        let today = now.date_naive();
        if self.last_recorded.lock().get(identity_id) == Some(&today) {
            return Ok(RecordOutcome::Skipped);
        }

        let exists = self
            .store
            .exists(identity_id, today)
            .map_err(PipelineError::PersistWrite)?;
        if exists {
            debug!(student_id = %identity_id, date = %today, "attendance already on record");
            self.remember(identity_id, today);
            return Ok(RecordOutcome::Skipped);
        }

        let event = AttendanceEvent::at(identity_id, display_name, now);
        let inserted = match self.store.insert_if_absent(&event) {
            Ok(inserted) => inserted,
            Err(e) => {
                // Cache untouched so the next sighting retries the write
                error!(student_id = %identity_id, date = %today, "failed to persist attendance: {:#}", e);
                return Err(PipelineError::PersistWrite(e));
            }
        };
        self.remember(identity_id, today);
        if inserted {
            info!(student_id = %identity_id, date = %today, "attendance recorded for {}", display_name);
            Ok(RecordOutcome::Inserted)
        } else {
            debug!(student_id = %identity_id, date = %today, "attendance insert lost a race");
            Ok(RecordOutcome::Skipped)
        }
    }

    /// Date last recorded for `identity_id` according to the in-memory cache.
    pub fn cached_date(&self, identity_id: &str) -> Option<NaiveDate> {
        self.last_recorded.lock().get(identity_id).copied()
    }

    /// Drop cached dates, e.g. after attendance rows were deleted externally.
    pub fn forget(&self, identity_id: &str) {
        self.last_recorded.lock().remove(identity_id);
    }

    fn remember(&self, identity_id: &str, date: NaiveDate) {
        let mut cache = self.last_recorded.lock();
        match cache.get_mut(identity_id) {
            Some(d) if *d >= date => {}
            Some(d) => *d = date,
            None => {
                cache.insert(identity_id.to_string(), date);
            }
        }
    }
}
