//! Progress events emitted by the engine.
//!
//! The engine stays free of terminal concerns; the CLI subscribes to these
//! events to drive its progress display.

use tokio::sync::mpsc;

/// Progress notifications for one run.
#[derive(Debug, Clone)]
pub enum HarvestEvent {
    DatasetStarted {
        dataset: String,
        segments: usize,
    },
    SegmentStarted {
        dataset: String,
        segment: String,
        next_page: u32,
        total_pages: u32,
    },
    PageCompleted {
        dataset: String,
        segment: String,
        page: u32,
        total_pages: u32,
        written: u64,
    },
    SegmentCompleted {
        dataset: String,
        segment: String,
        written: u64,
    },
    DatasetCompleted {
        dataset: String,
        written: u64,
    },
    IdentityRotated {
        label: String,
        reason: String,
    },
}

/// Best-effort event outlet. Dropping the receiver just mutes progress;
/// it never stalls the engine.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<HarvestEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<HarvestEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: HarvestEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}
