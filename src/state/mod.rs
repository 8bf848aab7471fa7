//! Durable run state: the resumable progress ledger.
//!
//! The whole run is one in-memory tree (run → datasets → segments) that is
//! snapshotted to disk after every milestone. Saves rewrite the full tree
//! atomically (temp file + rename), so the file on disk is always a valid,
//! complete snapshot; a crashed run resumes from it losing at most the
//! in-flight page.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{Local, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::models::{
    DatasetState, DatasetStatus, ErrorEntry, IdentityState, NoteEntry, RotationEvent,
    RunConfigSnapshot, RunState, RunStatus, SegmentState,
};

mod summary;

pub use summary::{DatasetSummary, RunSummary, SegmentSummary};

/// State persistence failures.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("no persisted state for run {0}")]
    NotFound(String),
    #[error("state io: {0}")]
    Io(#[from] std::io::Error),
    #[error("state serialization: {0}")]
    Serde(#[from] serde_json::Error),
}

const STATE_FILE: &str = "run_state.json";
const SUMMARY_FILE: &str = "run_summary.json";
const CURRENT_RUN_FILE: &str = "current_run.json";

/// Pointer to the most recently started run, kept outside any run directory.
#[derive(Debug, Serialize, Deserialize)]
struct CurrentRunPointer {
    run_id: String,
}

/// Filesystem layout of one run.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub run_dir: PathBuf,
    pub datasets_dir: PathBuf,
    pub state_file: PathBuf,
    pub summary_file: PathBuf,
}

impl RunPaths {
    fn for_run(output_root: &Path, run_id: &str) -> Self {
        let run_dir = output_root.join("runs").join(run_id);
        Self {
            datasets_dir: run_dir.join("datasets"),
            state_file: run_dir.join(STATE_FILE),
            summary_file: run_dir.join(SUMMARY_FILE),
            run_dir,
        }
    }
}

/// Owns the in-memory state tree and its on-disk snapshot.
pub struct StateStore {
    state: RunState,
    paths: RunPaths,
}

impl StateStore {
    /// Create state for a fresh run and persist the initial snapshot.
    pub fn create_initial(
        output_root: &Path,
        config: RunConfigSnapshot,
        run_id: Option<String>,
    ) -> Result<Self, StateError> {
        let run_id = run_id.unwrap_or_else(|| Local::now().format("%Y%m%d_%H%M%S").to_string());
        let paths = RunPaths::for_run(output_root, &run_id);
        fs::create_dir_all(&paths.datasets_dir)?;

        let mut store = Self {
            state: RunState::new(&run_id, config),
            paths,
        };
        store.save()?;
        store.write_current_pointer(output_root)?;
        Ok(store)
    }

    /// Load a previously persisted run.
    pub fn load(output_root: &Path, run_id: &str) -> Result<Self, StateError> {
        let paths = RunPaths::for_run(output_root, run_id);
        let contents = match fs::read_to_string(&paths.state_file) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(StateError::NotFound(run_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };
        let state: RunState = serde_json::from_str(&contents)?;
        fs::create_dir_all(&paths.datasets_dir)?;
        Ok(Self { state, paths })
    }

    /// Id of the most recently started run under `output_root`, if any.
    pub fn latest_run_id(output_root: &Path) -> Result<Option<String>, StateError> {
        let pointer_file = output_root.join("state").join(CURRENT_RUN_FILE);
        match fs::read_to_string(&pointer_file) {
            Ok(contents) => {
                let pointer: CurrentRunPointer = serde_json::from_str(&contents)?;
                Ok(Some(pointer.run_id))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn write_current_pointer(&self, output_root: &Path) -> Result<(), StateError> {
        let state_dir = output_root.join("state");
        fs::create_dir_all(&state_dir)?;
        let pointer = CurrentRunPointer {
            run_id: self.state.run_id.clone(),
        };
        fs::write(
            state_dir.join(CURRENT_RUN_FILE),
            serde_json::to_string_pretty(&pointer)?,
        )?;
        Ok(())
    }

    /// Persist the full tree atomically.
    pub fn save(&mut self) -> Result<(), StateError> {
        self.state.touch();
        let json = serde_json::to_string_pretty(&self.state)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.paths.run_dir)?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.persist(&self.paths.state_file)
            .map_err(|err| err.error)?;
        debug!("saved run state to {}", self.paths.state_file.display());
        Ok(())
    }

    pub fn run_id(&self) -> &str {
        &self.state.run_id
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn paths(&self) -> &RunPaths {
        &self.paths
    }

    /// Absolute path of a dataset's output file.
    pub fn dataset_output_path(&mut self, dataset_key: &str) -> PathBuf {
        let file = self.dataset_mut(dataset_key).output_file.clone();
        self.paths.datasets_dir.join(file)
    }

    pub fn dataset(&self, dataset_key: &str) -> Option<&DatasetState> {
        self.state.datasets.get(dataset_key)
    }

    /// Dataset entry, default-initialized if this run never touched it.
    pub fn dataset_mut(&mut self, dataset_key: &str) -> &mut DatasetState {
        self.state
            .datasets
            .entry(dataset_key.to_string())
            .or_insert_with(|| {
                DatasetState::new(dataset_key, &format!("{dataset_key}.jsonl"))
            })
    }

    /// Make sure a dataset entry exists with its configured output file.
    pub fn ensure_dataset(&mut self, dataset_key: &str, output_file: &str) {
        self.state
            .datasets
            .entry(dataset_key.to_string())
            .or_insert_with(|| DatasetState::new(dataset_key, output_file));
    }

    /// Segment entry, default-initialized along with its dataset.
    pub fn segment_mut(&mut self, dataset_key: &str, segment_key: &str) -> &mut SegmentState {
        self.dataset_mut(dataset_key)
            .segments
            .entry(segment_key.to_string())
            .or_insert_with(|| SegmentState::new(segment_key))
    }

    /// Register a discovered segment with its probed totals and flip the
    /// dataset to running.
    pub fn register_segment(
        &mut self,
        dataset_key: &str,
        segment_key: &str,
        total: u64,
        total_pages: u32,
    ) {
        self.segment_mut(dataset_key, segment_key)
            .init_totals(total, total_pages);
        let dataset = self.dataset_mut(dataset_key);
        if dataset.status == DatasetStatus::Pending {
            dataset.set_status(DatasetStatus::Running, None);
        }
        self.state.touch();
    }

    pub fn mark_segment_in_progress(&mut self, dataset_key: &str, segment_key: &str) {
        self.segment_mut(dataset_key, segment_key).mark_in_progress();
        self.state.touch();
    }

    /// Count a finished page: advance the segment cursor and roll the
    /// written count up into the dataset.
    pub fn record_page_result(
        &mut self,
        dataset_key: &str,
        segment_key: &str,
        page: u32,
        written: u64,
    ) {
        let counted = self
            .segment_mut(dataset_key, segment_key)
            .record_page(page, written);
        if counted {
            let dataset = self.dataset_mut(dataset_key);
            dataset.written += written;
            dataset.last_updated = Some(Utc::now());
        }
        self.state.touch();
    }

    pub fn mark_segment_completed(&mut self, dataset_key: &str, segment_key: &str) {
        self.segment_mut(dataset_key, segment_key).mark_completed();
        self.state.touch();
    }

    pub fn mark_segment_failed(&mut self, dataset_key: &str, segment_key: &str, reason: &str) {
        self.segment_mut(dataset_key, segment_key).mark_failed(reason);
        self.state.touch();
    }

    pub fn set_dataset_status(
        &mut self,
        dataset_key: &str,
        status: DatasetStatus,
        note: Option<&str>,
    ) {
        self.dataset_mut(dataset_key).set_status(status, note);
        self.state.touch();
    }

    pub fn pending_datasets(&self, configured: &[String]) -> Vec<String> {
        self.state.pending_datasets(configured)
    }

    pub fn all_datasets_completed(&self) -> bool {
        self.state.all_datasets_completed()
    }

    pub fn mark_run_completed(&mut self) {
        self.state.status = RunStatus::Completed;
        self.state.touch();
    }

    pub fn record_error(&mut self, message: &str, context: &str) {
        self.state.errors.push(ErrorEntry {
            timestamp: Utc::now(),
            message: message.to_string(),
            context: context.to_string(),
        });
    }

    pub fn record_note(&mut self, note: &str) {
        self.state.notes.push(NoteEntry::new(note));
    }

    pub fn identity(&self) -> &IdentityState {
        &self.state.identity
    }

    /// Record an identity rotation into the persisted history.
    pub fn set_identity_index(&mut self, index: usize, event: RotationEvent) {
        self.state.identity.current_index = index;
        self.state.identity.history.push(event);
        self.state.touch();
    }

    /// Write the condensed run summary next to the state file.
    pub fn write_summary(&self) -> Result<(), StateError> {
        let summary = RunSummary::from_state(&self.state);
        fs::write(
            &self.paths.summary_file,
            serde_json::to_string_pretty(&summary)?,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SegmentStatus;

    fn snapshot() -> RunConfigSnapshot {
        RunConfigSnapshot {
            datasets: vec!["domestic-h".to_string()],
            page_size: 20,
            max_pages_per_segment: 500,
            detail_concurrency: 4,
            proxies: Vec::new(),
        }
    }

    #[test]
    fn test_create_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store =
            StateStore::create_initial(dir.path(), snapshot(), Some("testrun".to_string()))
                .unwrap();
        store.register_segment("domestic-h", "REG-H1", 45, 3);
        store.record_page_result("domestic-h", "REG-H1", 1, 20);
        store.save().unwrap();

        let loaded = StateStore::load(dir.path(), "testrun").unwrap();
        let segment = &loaded.state().datasets["domestic-h"].segments["REG-H1"];
        assert_eq!(segment.next_page, 2);
        assert_eq!(segment.written, 20);
        assert_eq!(loaded.state().datasets["domestic-h"].written, 20);
    }

    #[test]
    fn test_load_unknown_run_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        match StateStore::load(dir.path(), "nope") {
            Err(StateError::NotFound(id)) => assert_eq!(id, "nope"),
            other => panic!("expected NotFound, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_latest_run_pointer() {
        let dir = tempfile::tempdir().unwrap();
        assert!(StateStore::latest_run_id(dir.path()).unwrap().is_none());
        let _store =
            StateStore::create_initial(dir.path(), snapshot(), Some("run-a".to_string())).unwrap();
        assert_eq!(
            StateStore::latest_run_id(dir.path()).unwrap().as_deref(),
            Some("run-a")
        );
    }

    #[test]
    fn test_accessors_default_initialize() {
        let dir = tempfile::tempdir().unwrap();
        let mut store =
            StateStore::create_initial(dir.path(), snapshot(), Some("testrun".to_string()))
                .unwrap();
        let segment = store.segment_mut("never-touched", "REG-S");
        assert_eq!(segment.next_page, 1);
        assert_eq!(segment.status, SegmentStatus::Pending);
        assert_eq!(
            store.dataset("never-touched").unwrap().output_file,
            "never-touched.jsonl"
        );
    }

    #[test]
    fn test_dataset_written_tracks_segment_sums() {
        let dir = tempfile::tempdir().unwrap();
        let mut store =
            StateStore::create_initial(dir.path(), snapshot(), Some("testrun".to_string()))
                .unwrap();
        store.register_segment("domestic-h", "REG-H1", 30, 2);
        store.register_segment("domestic-h", "REG-H2", 15, 1);
        store.record_page_result("domestic-h", "REG-H1", 1, 20);
        store.record_page_result("domestic-h", "REG-H1", 2, 10);
        store.record_page_result("domestic-h", "REG-H2", 1, 15);
        // Replays of an already-counted page must not inflate totals.
        store.record_page_result("domestic-h", "REG-H2", 1, 15);

        let dataset = store.dataset("domestic-h").unwrap();
        let segment_sum: u64 = dataset.segments.values().map(|s| s.written).sum();
        assert_eq!(dataset.written, 45);
        assert_eq!(dataset.written, segment_sum);
    }
}
