//! The run loop: datasets processed sequentially, identity rotated on
//! blocking failures, everything resumable from the persisted state.

use std::sync::Arc;

use tracing::{info, warn};

use super::client::RegistryClient;
use super::error::HarvestError;
use super::events::{EventSink, HarvestEvent};
use super::harvester::process_segment;
use super::identity::{Identity, IdentityRotator};
use super::pacing::Pacer;
use super::segmenter::{discover_segments, planned_segments};
use crate::config::{DatasetSpec, Settings};
use crate::models::DatasetStatus;
use crate::output::DatasetWriter;
use crate::state::StateStore;

/// Builds a remote client for a given identity. Called once at startup and
/// again after every rotation, since the proxy is baked into the client.
pub type ClientFactory =
    Box<dyn Fn(&Identity) -> Result<Arc<dyn RegistryClient>, HarvestError> + Send + Sync>;

/// Drives one harvesting run to completion.
pub struct HarvestRunner {
    settings: Arc<Settings>,
    store: StateStore,
    rotator: IdentityRotator,
    pacer: Pacer,
    events: EventSink,
    client_factory: ClientFactory,
    selected: Vec<String>,
}

impl HarvestRunner {
    pub fn new(
        settings: Arc<Settings>,
        store: StateStore,
        selected: Vec<String>,
        client_factory: ClientFactory,
        events: EventSink,
    ) -> Self {
        let rotator = IdentityRotator::new(
            &settings.proxies,
            store.identity().current_index,
            settings.max_rotations,
        );
        let pacer = Pacer::new(settings.pacing.clone());
        Self {
            settings,
            store,
            rotator,
            pacer,
            events,
            client_factory,
            selected,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Process every pending dataset. Datasets run strictly one at a time;
    /// a blocking failure rotates identity and re-attempts the dataset from
    /// its persisted cursors, anything else aborts the run (resumable).
    pub async fn run(&mut self) -> Result<(), HarvestError> {
        let mut client = (self.client_factory)(self.rotator.current())?;

        for key in self.store.pending_datasets(&self.selected) {
            let Some(spec) = self.settings.dataset(&key).cloned() else {
                warn!("dataset {:?} is not configured, skipping", key);
                continue;
            };

            loop {
                match self.run_dataset(&client, &spec).await {
                    Ok(()) => break,
                    Err(err) if IdentityRotator::should_rotate_for_error(&err) => {
                        let context = format!("dataset={}", spec.key);
                        warn!("{}: blocked ({}), rotating identity", spec.key, err);
                        self.store.record_error(&err.to_string(), &context);
                        let identity = match self
                            .rotator
                            .rotate(&mut self.store, &self.pacer, &err.to_string(), &context)
                            .await
                        {
                            Ok(identity) => identity,
                            Err(rotate_err) => {
                                self.store.record_error(&rotate_err.to_string(), &context);
                                self.store.save()?;
                                return Err(rotate_err);
                            }
                        };
                        self.events.emit(HarvestEvent::IdentityRotated {
                            label: identity.label.clone(),
                            reason: err.to_string(),
                        });
                        client = (self.client_factory)(identity)?;
                    }
                    Err(err) => {
                        self.store.record_error(&err.to_string(), &format!("dataset={}", spec.key));
                        self.store.set_dataset_status(
                            &spec.key,
                            DatasetStatus::Failed,
                            Some(&err.to_string()),
                        );
                        self.store.save()?;
                        return Err(HarvestError::DatasetFailed {
                            dataset: spec.key.clone(),
                            message: err.to_string(),
                        });
                    }
                }
            }
        }

        if self.store.all_datasets_completed() {
            self.store.mark_run_completed();
        }
        self.store.save()?;
        self.store.write_summary()?;
        Ok(())
    }

    /// One attempt at a dataset: discover or reload its segments, then
    /// harvest every pending segment in order.
    async fn run_dataset(
        &mut self,
        client: &Arc<dyn RegistryClient>,
        spec: &DatasetSpec,
    ) -> Result<(), HarvestError> {
        self.store.ensure_dataset(&spec.key, &spec.output_file);
        if self
            .store
            .dataset(&spec.key)
            .map(|d| d.is_completed())
            .unwrap_or(false)
        {
            return Ok(());
        }

        // Append when any page was already counted; truncate only a
        // dataset this run never wrote to.
        let resume_output = self
            .store
            .dataset(&spec.key)
            .map(|d| {
                d.written > 0 || d.segments.values().any(|s| !s.processed_pages.is_empty())
            })
            .unwrap_or(false);

        self.store
            .set_dataset_status(&spec.key, DatasetStatus::Running, None);
        self.store.save()?;

        let mut query = spec.query();
        if query.item_id.is_empty() {
            query.item_id = match client.resolve_item_id(&spec.label).await? {
                Some(id) => {
                    info!("{}: resolved item id {} from catalog", spec.key, id);
                    self.store
                        .record_note(&format!("{}: item id {} resolved from catalog", spec.key, id));
                    id
                }
                None => {
                    return Err(HarvestError::DatasetFailed {
                        dataset: spec.key.clone(),
                        message: format!("no item id configured or resolvable for {:?}", spec.label),
                    })
                }
            };
        }

        let discovery_done = self
            .store
            .dataset(&spec.key)
            .map(|d| d.discovery_complete)
            .unwrap_or(false);
        let plans = if discovery_done {
            planned_segments(&self.store, &spec.key)
        } else {
            discover_segments(
                client,
                &self.pacer,
                &mut self.store,
                &spec.key,
                &query,
                &spec.search_value,
                &self.settings,
            )
            .await?
        };

        self.events.emit(HarvestEvent::DatasetStarted {
            dataset: spec.key.clone(),
            segments: plans.len(),
        });

        let output_path = self.store.dataset_output_path(&spec.key);
        let mut writer = DatasetWriter::open(&output_path, resume_output)?;

        for plan in &plans {
            if self.store.segment_mut(&spec.key, &plan.key).is_completed() {
                continue;
            }
            process_segment(
                client,
                &self.pacer,
                &mut self.store,
                &mut writer,
                &self.events,
                spec,
                &query,
                plan,
                &self.settings,
            )
            .await?;
        }

        self.store
            .set_dataset_status(&spec.key, DatasetStatus::Completed, None);
        self.store.save()?;
        let written = self.store.dataset(&spec.key).map(|d| d.written).unwrap_or(0);
        info!("{}: dataset completed, {} records written", spec.key, written);
        self.events.emit(HarvestEvent::DatasetCompleted {
            dataset: spec.key.clone(),
            written,
        });
        Ok(())
    }
}
