//! The stateful harvesting engine.
//!
//! Flow for one run: the segmenter partitions each dataset's query space
//! into segments small enough to page through, the harvester walks each
//! segment page by page with a bounded detail fan-out, and the state store
//! persists a resumable cursor after every page. Remote failures are
//! classified at the client boundary; blocked failures bubble to the run
//! loop, which rotates network identity and re-attempts the dataset from
//! where it stopped.

mod client;
mod error;
mod events;
mod harvester;
mod identity;
mod pacing;
mod portal;
mod retry;
mod runner;
mod segmenter;

pub use client::{DatasetQuery, DetailPayload, ListPage, RegistryClient};
pub use error::{FetchError, HarvestError};
pub use events::{EventSink, HarvestEvent};
pub use harvester::process_segment;
pub use identity::{Identity, IdentityRotator};
pub use pacing::{DelayRange, Pacer, PacingConfig};
pub use portal::PortalClient;
pub use retry::with_retry;
pub use runner::{ClientFactory, HarvestRunner};
pub use segmenter::{discover_segments, planned_segments, SegmentPlan};
