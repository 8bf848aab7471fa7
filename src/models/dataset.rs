//! Dataset models.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run::NoteEntry;
use super::segment::SegmentState;

/// Harvest status of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl DatasetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Persistent state for one dataset within a run.
///
/// A dataset owns its output file and the segments its query space was
/// partitioned into. Its written count is always the sum of its segments'
/// written counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetState {
    pub dataset_key: String,
    pub status: DatasetStatus,
    /// Output file name under the run's datasets directory.
    pub output_file: String,
    /// Records written across all segments.
    pub written: u64,
    /// Whether segment discovery finished for this dataset. A crash during
    /// discovery leaves this false so a resumed run re-walks the query
    /// space (already-registered segments keep their probed totals).
    #[serde(default)]
    pub discovery_complete: bool,
    pub segments: BTreeMap<String, SegmentState>,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Vec<NoteEntry>,
}

impl DatasetState {
    pub fn new(dataset_key: &str, output_file: &str) -> Self {
        Self {
            dataset_key: dataset_key.to_string(),
            status: DatasetStatus::Pending,
            output_file: output_file.to_string(),
            written: 0,
            discovery_complete: false,
            segments: BTreeMap::new(),
            last_updated: Some(Utc::now()),
            notes: Vec::new(),
        }
    }

    pub fn set_status(&mut self, status: DatasetStatus, note: Option<&str>) {
        self.status = status;
        self.last_updated = Some(Utc::now());
        if let Some(note) = note {
            self.notes.push(NoteEntry::new(note));
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == DatasetStatus::Completed
    }

    /// Whether every known segment has finished.
    pub fn all_segments_completed(&self) -> bool {
        !self.segments.is_empty() && self.segments.values().all(|s| s.is_completed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_segments_completed_requires_segments() {
        let dataset = DatasetState::new("domestic-h", "domestic-h.jsonl");
        assert!(!dataset.all_segments_completed());
    }

    #[test]
    fn test_all_segments_completed() {
        let mut dataset = DatasetState::new("domestic-h", "domestic-h.jsonl");
        let mut a = SegmentState::new("REG-H1");
        a.mark_completed();
        let mut b = SegmentState::new("REG-H2");
        dataset.segments.insert(a.segment_key.clone(), a);
        assert!(dataset.all_segments_completed());

        b.mark_failed("timed out");
        dataset.segments.insert(b.segment_key.clone(), b);
        assert!(!dataset.all_segments_completed());
    }
}
