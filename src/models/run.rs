//! Run-level models: the root of the persisted state tree.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::dataset::DatasetState;

/// Overall status of a harvesting run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Running,
    Completed,
}

/// A timestamped free-text note attached to a run, dataset or segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteEntry {
    pub timestamp: DateTime<Utc>,
    pub note: String,
}

impl NoteEntry {
    pub fn new(note: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            note: note.to_string(),
        }
    }
}

/// One entry in the run's error log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    /// Where the error happened, e.g. "dataset=domestic-h segment=REG-H3 page=12".
    pub context: String,
}

/// One identity rotation, kept for the life of the run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationEvent {
    pub timestamp: DateTime<Utc>,
    /// Index into the identity list after the rotation.
    pub index: usize,
    /// Label of the identity rotated to.
    pub label: String,
    pub reason: String,
    pub context: String,
}

/// Network identity state, persisted so a resumed run keeps the last
/// known-good egress instead of starting over from the first proxy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityState {
    pub current_index: usize,
    #[serde(default)]
    pub history: Vec<RotationEvent>,
}

/// The configuration a run was started with, captured into the snapshot so
/// a resumed run can be inspected without the original config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfigSnapshot {
    pub datasets: Vec<String>,
    pub page_size: u32,
    pub max_pages_per_segment: u32,
    pub detail_concurrency: usize,
    pub proxies: Vec<String>,
}

/// Root of the persisted state tree for one harvesting run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub status: RunStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub config: RunConfigSnapshot,
    pub datasets: BTreeMap<String, DatasetState>,
    #[serde(default)]
    pub identity: IdentityState,
    #[serde(default)]
    pub errors: Vec<ErrorEntry>,
    #[serde(default)]
    pub notes: Vec<NoteEntry>,
}

impl RunState {
    pub fn new(run_id: &str, config: RunConfigSnapshot) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.to_string(),
            status: RunStatus::Running,
            created_at: now,
            updated_at: now,
            config,
            datasets: BTreeMap::new(),
            identity: IdentityState::default(),
            errors: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Dataset keys that still need work, in the order they were configured.
    pub fn pending_datasets(&self, configured: &[String]) -> Vec<String> {
        configured
            .iter()
            .filter(|key| {
                self.datasets
                    .get(key.as_str())
                    .map(|d| !d.is_completed())
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }

    pub fn all_datasets_completed(&self) -> bool {
        !self.datasets.is_empty() && self.datasets.values().all(|d| d.is_completed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DatasetStatus;

    #[test]
    fn test_pending_datasets_preserves_configured_order() {
        let mut run = RunState::new("20240110_120000", RunConfigSnapshot::default());
        let mut done = DatasetState::new("domestic-s", "domestic-s.jsonl");
        done.set_status(DatasetStatus::Completed, None);
        run.datasets.insert("domestic-s".to_string(), done);

        let configured = vec!["domestic-h".to_string(), "domestic-s".to_string()];
        assert_eq!(run.pending_datasets(&configured), vec!["domestic-h"]);
    }

    #[test]
    fn test_all_datasets_completed_is_false_for_empty_run() {
        let run = RunState::new("20240110_120000", RunConfigSnapshot::default());
        assert!(!run.all_datasets_completed());
    }
}
