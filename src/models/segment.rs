//! Segment models for partitioned harvesting.
//!
//! A segment is one partition of a dataset's query space, narrow enough to
//! be paged through within the configured page budget. Segments carry their
//! own resume cursor so an interrupted run can pick up mid-dataset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::run::NoteEntry;

/// Harvest status of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SegmentStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SegmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Persistent state for one query segment.
///
/// `total` and `total_pages` are set once when the segment's probe confirms
/// it fits the page budget and are never changed afterwards. `next_page` is
/// the resume cursor: the lowest page number that has not been fully
/// processed yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentState {
    /// The literal sub-query string this segment covers.
    pub segment_key: String,
    pub status: SegmentStatus,
    /// Record count reported by the remote list endpoint.
    pub total: Option<u64>,
    /// Page count derived from `total` at probe time.
    pub total_pages: Option<u32>,
    /// Next page to fetch (1-based).
    pub next_page: u32,
    /// Pages that have been fully processed and counted.
    pub processed_pages: Vec<u32>,
    /// Records written to the output file for this segment.
    pub written: u64,
    pub first_seen_at: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: Vec<NoteEntry>,
}

impl SegmentState {
    pub fn new(segment_key: &str) -> Self {
        Self {
            segment_key: segment_key.to_string(),
            status: SegmentStatus::Pending,
            total: None,
            total_pages: None,
            next_page: 1,
            processed_pages: Vec::new(),
            written: 0,
            first_seen_at: None,
            last_updated: None,
            notes: Vec::new(),
        }
    }

    /// Record the probe result. Totals are only set the first time; a
    /// re-probe of an already-known segment leaves them untouched.
    pub fn init_totals(&mut self, total: u64, total_pages: u32) {
        if self.total.is_none() {
            self.total = Some(total);
            self.total_pages = Some(total_pages);
        }
        if self.first_seen_at.is_none() {
            self.first_seen_at = Some(Utc::now());
        }
        self.last_updated = Some(Utc::now());
    }

    /// Whether `page` was already processed in a previous attempt.
    pub fn has_page(&self, page: u32) -> bool {
        self.processed_pages.contains(&page)
    }

    /// Count a finished page and advance the resume cursor.
    ///
    /// Re-recording an already-counted page is a no-op so that a resumed
    /// attempt replaying its in-flight page cannot double-count.
    pub fn record_page(&mut self, page: u32, written: u64) -> bool {
        if self.has_page(page) {
            return false;
        }
        self.processed_pages.push(page);
        if page >= self.next_page {
            self.next_page = page + 1;
        }
        self.written += written;
        self.last_updated = Some(Utc::now());
        true
    }

    pub fn mark_in_progress(&mut self) {
        self.status = SegmentStatus::InProgress;
        self.last_updated = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.status = SegmentStatus::Completed;
        self.last_updated = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, reason: &str) {
        self.status = SegmentStatus::Failed;
        self.last_updated = Some(Utc::now());
        self.notes.push(NoteEntry::new(reason));
    }

    pub fn is_completed(&self) -> bool {
        self.status == SegmentStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_page_advances_cursor() {
        let mut segment = SegmentState::new("REG-H1");
        segment.init_totals(45, 3);

        assert!(segment.record_page(1, 20));
        assert_eq!(segment.next_page, 2);
        assert!(segment.record_page(2, 20));
        assert!(segment.record_page(3, 5));
        assert_eq!(segment.next_page, 4);
        assert_eq!(segment.written, 45);
    }

    #[test]
    fn test_record_page_is_idempotent() {
        let mut segment = SegmentState::new("REG-H1");
        segment.init_totals(10, 1);

        assert!(segment.record_page(1, 10));
        assert!(!segment.record_page(1, 10));
        assert_eq!(segment.written, 10);
        assert_eq!(segment.next_page, 2);
    }

    #[test]
    fn test_totals_are_immutable_once_set() {
        let mut segment = SegmentState::new("REG-H1");
        segment.init_totals(100, 5);
        segment.init_totals(200, 10);
        assert_eq!(segment.total, Some(100));
        assert_eq!(segment.total_pages, Some(5));
    }
}
