//! Condensed run summary, written at run completion and shown by `status`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{
    DatasetStatus, ErrorEntry, RotationEvent, RunState, RunStatus, SegmentStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentSummary {
    pub segment_key: String,
    pub status: SegmentStatus,
    pub total: Option<u64>,
    pub total_pages: Option<u32>,
    pub next_page: u32,
    pub written: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSummary {
    pub dataset_key: String,
    pub status: DatasetStatus,
    pub written: u64,
    pub segments: Vec<SegmentSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub updated_at: DateTime<Utc>,
    pub datasets: Vec<DatasetSummary>,
    pub errors: Vec<ErrorEntry>,
    pub rotation_history: Vec<RotationEvent>,
}

impl RunSummary {
    pub fn from_state(state: &RunState) -> Self {
        let datasets = state
            .datasets
            .values()
            .map(|dataset| DatasetSummary {
                dataset_key: dataset.dataset_key.clone(),
                status: dataset.status,
                written: dataset.written,
                segments: dataset
                    .segments
                    .values()
                    .map(|segment| SegmentSummary {
                        segment_key: segment.segment_key.clone(),
                        status: segment.status,
                        total: segment.total,
                        total_pages: segment.total_pages,
                        next_page: segment.next_page,
                        written: segment.written,
                    })
                    .collect(),
            })
            .collect();

        Self {
            run_id: state.run_id.clone(),
            status: state.status,
            updated_at: state.updated_at,
            datasets,
            errors: state.errors.clone(),
            rotation_history: state.identity.history.clone(),
        }
    }

    /// Total records written across all datasets.
    pub fn total_written(&self) -> u64 {
        self.datasets.iter().map(|d| d.written).sum()
    }
}
