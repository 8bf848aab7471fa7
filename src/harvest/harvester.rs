//! The per-segment harvesting loop.
//!
//! Pages through a segment's query in strictly increasing page order,
//! fans out detail lookups for each page, filters and transforms the
//! results, appends them to the dataset's output file, and persists the
//! segment cursor after every page. A crash between the append and the
//! save costs at most one page of duplicate lines on resume; it never
//! loses data, because output is append-only and the cursor tracks which
//! pages were already counted.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::client::{DatasetQuery, DetailPayload, RegistryClient};
use super::error::{FetchError, HarvestError};
use super::events::{EventSink, HarvestEvent};
use super::pacing::Pacer;
use super::retry::with_retry;
use super::segmenter::SegmentPlan;
use crate::config::{DatasetSpec, Settings};
use crate::output::DatasetWriter;
use crate::state::StateStore;

/// Harvest one segment to completion, updating state after every page.
///
/// On failure the segment is marked failed with the error recorded, and
/// the error propagates to the run loop, which decides whether a fresh
/// identity is worth a retry.
#[allow(clippy::too_many_arguments)]
pub async fn process_segment(
    client: &Arc<dyn RegistryClient>,
    pacer: &Pacer,
    store: &mut StateStore,
    writer: &mut DatasetWriter,
    events: &EventSink,
    spec: &DatasetSpec,
    query: &DatasetQuery,
    plan: &SegmentPlan,
    settings: &Settings,
) -> Result<(), HarvestError> {
    match harvest_pages(client, pacer, store, writer, events, spec, query, plan, settings).await {
        Ok(()) => {
            store.mark_segment_completed(&spec.key, &plan.key);
            store.save()?;
            let written = store.segment_mut(&spec.key, &plan.key).written;
            info!(
                "{}: segment {:?} completed, {} records written",
                spec.key, plan.key, written
            );
            events.emit(HarvestEvent::SegmentCompleted {
                dataset: spec.key.clone(),
                segment: plan.key.clone(),
                written,
            });
            Ok(())
        }
        Err(err) => {
            store.mark_segment_failed(&spec.key, &plan.key, &err.to_string());
            store.save()?;
            Err(err)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn harvest_pages(
    client: &Arc<dyn RegistryClient>,
    pacer: &Pacer,
    store: &mut StateStore,
    writer: &mut DatasetWriter,
    events: &EventSink,
    spec: &DatasetSpec,
    query: &DatasetQuery,
    plan: &SegmentPlan,
    settings: &Settings,
) -> Result<(), HarvestError> {
    let retry_delay = Duration::from_millis(settings.retry_base_delay_ms);
    let total_pages = plan.total_pages;
    let mut first_page = plan.first_page.clone();

    store.mark_segment_in_progress(&spec.key, &plan.key);
    store.save()?;
    events.emit(HarvestEvent::SegmentStarted {
        dataset: spec.key.clone(),
        segment: plan.key.clone(),
        next_page: store.segment_mut(&spec.key, &plan.key).next_page,
        total_pages,
    });

    loop {
        let page_num = store.segment_mut(&spec.key, &plan.key).next_page;
        if page_num > total_pages {
            break;
        }

        // The segmenter's probe already fetched page 1; spend it instead
        // of asking again.
        let page = match first_page.take() {
            Some(page) if page_num == 1 => page,
            _ => {
                pacer.page_fetch().await;
                with_retry(
                    || client.fetch_list(query, &plan.key, page_num),
                    settings.list_retry_attempts,
                    retry_delay,
                )
                .await?
            }
        };

        if page.record_ids.is_empty() {
            debug!(
                "{}: segment {:?} page {} came back empty, closing segment",
                spec.key, plan.key, page_num
            );
            break;
        }

        let outcomes = fetch_detail_batch(
            client,
            query,
            pacer,
            &page.record_ids,
            settings.detail_concurrency,
        )
        .await;

        let mut written = 0u64;
        let mut skipped = 0u64;
        for (record_id, outcome) in page.record_ids.iter().zip(outcomes) {
            let detail = match outcome {
                Ok(Some(detail)) => Some(detail),
                Err(err) if err.is_blocked() => return Err(err.into()),
                // Missing payload or a transient miss gets its own recovery
                // budget before the record is given up on.
                Ok(None) | Err(_) => {
                    recover_detail(
                        client,
                        query,
                        record_id,
                        settings.detail_retry_attempts,
                        retry_delay,
                    )
                    .await?
                }
            };

            let Some(detail) = detail else {
                warn!(
                    "{}: no detail for record {}, skipping",
                    spec.key, record_id
                );
                skipped += 1;
                continue;
            };

            let Some(record) = spec.fields.record_from(&detail) else {
                skipped += 1;
                continue;
            };
            if !record.code.starts_with(&spec.code_prefix) {
                continue;
            }

            writer.write_record(&record)?;
            written += 1;
            pacer.between_records().await;
        }

        store.record_page_result(&spec.key, &plan.key, page_num, written);
        store.save()?;
        events.emit(HarvestEvent::PageCompleted {
            dataset: spec.key.clone(),
            segment: plan.key.clone(),
            page: page_num,
            total_pages,
            written,
        });

        if page_num % settings.page_log_interval == 0 || page_num == total_pages {
            let segment = store.segment_mut(&spec.key, &plan.key);
            info!(
                "{}: segment {:?} page {}/{}, {} written, {} skipped",
                spec.key, plan.key, page_num, total_pages, segment.written, skipped
            );
        }
    }

    Ok(())
}

/// Fetch details for a page's records with a bounded worker pool.
/// Results come back aligned with `record_ids`.
async fn fetch_detail_batch(
    client: &Arc<dyn RegistryClient>,
    query: &DatasetQuery,
    pacer: &Pacer,
    record_ids: &[String],
    concurrency: usize,
) -> Vec<Result<Option<DetailPayload>, FetchError>> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::with_capacity(record_ids.len());

    for record_id in record_ids {
        let client = client.clone();
        let query = query.clone();
        let pacer = pacer.clone();
        let record_id = record_id.clone();
        let semaphore = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
            pacer.detail_fetch().await;
            client.fetch_detail(&query, &record_id).await
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for joined in futures::future::join_all(handles).await {
        outcomes.push(match joined {
            Ok(result) => result,
            Err(err) => Err(FetchError::transient(format!("detail worker died: {err}"))),
        });
    }
    outcomes
}

/// Single-record recovery fetches with linear backoff. A record that stays
/// missing after the budget downgrades to a skip; blocked failures still
/// abort the segment.
async fn recover_detail(
    client: &Arc<dyn RegistryClient>,
    query: &DatasetQuery,
    record_id: &str,
    max_attempts: u32,
    base_delay: Duration,
) -> Result<Option<DetailPayload>, HarvestError> {
    for attempt in 1..=max_attempts.max(1) {
        tokio::time::sleep(base_delay * attempt).await;
        match client.fetch_detail(query, record_id).await {
            Ok(Some(detail)) => return Ok(Some(detail)),
            Ok(None) => {
                debug!(
                    "recovery attempt {} for record {} came back empty",
                    attempt, record_id
                );
            }
            Err(err) if err.is_blocked() => return Err(err.into()),
            Err(err) => {
                warn!(
                    "recovery attempt {} for record {} failed: {}",
                    attempt, record_id, err
                );
            }
        }
    }
    Ok(None)
}
