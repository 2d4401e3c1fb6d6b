use super::error::TrackerError;
use super::history::merge_histories;
use super::markers::is_phase_terminal;
use super::progress;
use super::update::{CachedUpdate, StepReport, StepUpdate};
use crate::cache::{CacheSet, StatusCache};
use crate::shared::{EventLog, InstanceId};
use crate::store::HistoryStore;
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct RecordOutcome {
    pub update: StepUpdate,
    pub finalized: Option<FinalizeOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FinalizeOutcome {
    /// Entries written to the durable store.
    pub persisted: usize,
    pub from_store: usize,
    pub from_cache: usize,
}

/// Coordinates the ephemeral cache and the durable store for every workflow
/// instance.
///
/// Holds no mutable state of its own, so clones can be handed to any number
/// of concurrent pipeline-step executors.
#[derive(Clone)]
pub struct StatusTracker {
    pub(super) cache: Arc<dyn StatusCache>,
    pub(super) store: Arc<dyn HistoryStore>,
    log: Option<EventLog>,
}

impl std::fmt::Debug for StatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusTracker")
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

impl StatusTracker {
    pub fn new(cache: Arc<dyn StatusCache>, store: Arc<dyn HistoryStore>) -> Self {
        Self {
            cache,
            store,
            log: None,
        }
    }

    pub fn with_event_log(mut self, log: EventLog) -> Self {
        self.log = Some(log);
        self
    }

    pub fn event_log(&self) -> Option<&EventLog> {
        self.log.as_ref()
    }

    pub fn cache(&self) -> &dyn StatusCache {
        self.cache.as_ref()
    }

    pub fn store(&self) -> &dyn HistoryStore {
        self.store.as_ref()
    }

    /// Records one step transition. This is the only write entry point.
    ///
    /// The update always lands in the cache first; a phase-terminal
    /// transition then finalizes the instance into the durable store.
    pub fn record(
        &self,
        instance_id: &str,
        report: StepReport,
    ) -> Result<RecordOutcome, TrackerError> {
        let instance = parse_instance(instance_id)?;
        let update = report.into_update()?;
        self.write_to_cache(instance.as_str(), &update)?;

        self.log_info(
            "status.record",
            &[
                ("instance_id", json!(instance.as_str())),
                ("task", json!(update.task_name)),
                ("state", json!(update.state.as_str())),
                ("progress", json!(update.progress)),
            ],
        );

        let finalized = if is_phase_terminal(&update.task_name, update.state, update.progress) {
            Some(self.finalize(instance.as_str())?)
        } else {
            None
        };

        Ok(RecordOutcome { update, finalized })
    }

    pub(super) fn write_to_cache(
        &self,
        instance_id: &str,
        update: &StepUpdate,
    ) -> Result<(), TrackerError> {
        self.cache
            .append_history(instance_id, update.timestamp.as_millis(), update)?;
        self.cache.add_member(CacheSet::InProgress, instance_id)?;
        self.cache
            .set_latest(instance_id, &CachedUpdate::from(update))?;
        Ok(())
    }

    /// Moves an instance's history from the cache into the durable store.
    ///
    /// Store entries are merged first and cache entries second, so a cached
    /// update wins over a stored one with the same `(task, timestamp)`. The
    /// merged history replaces the stored one wholesale, which makes repeated
    /// calls idempotent.
    pub fn finalize(&self, instance_id: &str) -> Result<FinalizeOutcome, TrackerError> {
        let instance = parse_instance(instance_id)?;
        let id = instance.as_str();

        let stored = self.store.find_all(id)?;
        let cached = self.cache.history(id)?;
        let (from_store, from_cache) = (stored.len(), cached.len());
        let merged = merge_histories([stored, cached]);

        self.store.replace_all(id, &merged)?;
        self.cache.clear_instance(id)?;
        self.cache.remove_member(CacheSet::InProgress, id)?;
        self.cache.add_member(CacheSet::Persisted, id)?;

        let outcome = FinalizeOutcome {
            persisted: merged.len(),
            from_store,
            from_cache,
        };
        self.log_info(
            "status.finalize",
            &[
                ("instance_id", json!(id)),
                ("persisted", json!(outcome.persisted)),
                ("from_store", json!(outcome.from_store)),
                ("from_cache", json!(outcome.from_cache)),
            ],
        );
        Ok(outcome)
    }

    /// Full deduplicated history sorted ascending by timestamp.
    pub fn get_history(&self, instance_id: &str) -> Result<Vec<StepUpdate>, TrackerError> {
        let instance = parse_instance(instance_id)?;
        let id = instance.as_str();

        // Cache before the persisted flag: a finalize racing in between is
        // then fully visible through the store.
        let cached = self.cache.history(id)?;
        if self.cache.is_member(CacheSet::Persisted, id)? {
            let stored = self.store.find_all(id)?;
            return Ok(merge_histories([stored, cached]));
        }
        Ok(merge_histories([cached]))
    }

    /// The cache's latest pointer. Always `None` once the instance has been
    /// finalized; see [`StatusTracker::current_state`].
    pub fn get_latest_state(&self, instance_id: &str) -> Result<Option<CachedUpdate>, TrackerError> {
        let instance = parse_instance(instance_id)?;
        Ok(self.cache.latest(instance.as_str())?)
    }

    /// Current status that stays defined after finalization: the latest
    /// pointer while it is live, otherwise the last history entry.
    pub fn current_state(&self, instance_id: &str) -> Result<Option<StepUpdate>, TrackerError> {
        if let Some(update) = self
            .get_latest_state(instance_id)?
            .and_then(|latest| latest.to_step_update())
        {
            return Ok(Some(update));
        }
        Ok(self.get_history(instance_id)?.pop())
    }

    pub fn calculate_progress(&self, history: &[StepUpdate]) -> f64 {
        progress::calculate_progress(history)
    }

    pub fn in_progress_instances(&self) -> Result<Vec<String>, TrackerError> {
        Ok(self.cache.members(CacheSet::InProgress)?)
    }

    pub fn is_persisted(&self, instance_id: &str) -> Result<bool, TrackerError> {
        let instance = parse_instance(instance_id)?;
        Ok(self
            .cache
            .is_member(CacheSet::Persisted, instance.as_str())?)
    }

    pub(crate) fn log_info(&self, event: &str, fields: &[(&str, Value)]) {
        if let Some(log) = &self.log {
            log.info(event, fields);
        }
    }

    pub(crate) fn log_warn(&self, event: &str, fields: &[(&str, Value)]) {
        if let Some(log) = &self.log {
            log.warn(event, fields);
        }
    }
}

pub(crate) fn parse_instance(raw: &str) -> Result<InstanceId, TrackerError> {
    InstanceId::parse(raw).map_err(TrackerError::MissingInstanceId)
}
