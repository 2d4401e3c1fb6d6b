use super::error::TrackerError;
use super::tracker::StatusTracker;
use crate::cache::CacheSet;
use crate::shared::Timestamp;
use serde_json::json;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Every instance that was finalized, in set order.
    pub finalized: Vec<String>,
    /// Instances whose latest update had to be completed with the
    /// abandoned-instance defaults.
    pub patched: Vec<String>,
}

impl StatusTracker {
    /// Startup pass over instances left in progress by an unclean shutdown.
    ///
    /// Each one is finalized. A latest update missing its timestamp, state
    /// or progress is assumed to have failed at recovery time with zero
    /// progress and is written back before finalizing. Must run before new
    /// `record` calls are accepted.
    pub fn recover_from_cache(&self) -> Result<RecoveryReport, TrackerError> {
        let mut report = RecoveryReport::default();
        let now = Timestamp::now();

        for instance_id in self.cache.members(CacheSet::InProgress)? {
            if let Some(mut latest) = self.cache.latest(&instance_id)? {
                let patched = latest.patch_abandoned(now);
                match latest.to_step_update() {
                    Some(update) => {
                        self.write_to_cache(&instance_id, &update)?;
                        if patched {
                            report.patched.push(instance_id.clone());
                        }
                    }
                    None => self.log_warn(
                        "status.recover.unkeyed_latest",
                        &[("instance_id", json!(instance_id))],
                    ),
                }
            }

            self.finalize(&instance_id)?;
            self.log_info(
                "status.recover.finalized",
                &[("instance_id", json!(instance_id))],
            );
            report.finalized.push(instance_id);
        }

        self.log_info(
            "status.recover.completed",
            &[
                ("finalized", json!(report.finalized.len())),
                ("patched", json!(report.patched.len())),
            ],
        );
        Ok(report)
    }
}
