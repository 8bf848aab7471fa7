//! Query-space segmentation.
//!
//! The portal caps how deep any single query can be paged, so a query whose
//! result set exceeds the page budget is partitioned into narrower
//! sub-queries by appending digits, until every accepted sub-query fits or
//! the depth limit is reached. Appending a digit narrows a prefix-matched
//! search, so the walk terminates; the depth cap guards against a remote
//! that stops behaving like a prefix match.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::client::{DatasetQuery, ListPage, RegistryClient};
use super::error::HarvestError;
use super::pacing::Pacer;
use super::retry::with_retry;
use crate::config::Settings;
use crate::state::StateStore;

/// A segment ready for harvesting.
#[derive(Debug, Clone)]
pub struct SegmentPlan {
    /// The sub-query string (also the segment key in the state tree).
    pub key: String,
    pub total: u64,
    pub total_pages: u32,
    /// The probe's page 1, kept so the harvester need not re-fetch it.
    /// `None` for segments loaded from persisted state.
    pub first_page: Option<ListPage>,
}

/// Walk the query space under `base_query` and return the accepted
/// segments, registering each one in the state store as soon as it is
/// accepted so a crash mid-discovery keeps what was already found.
pub async fn discover_segments(
    client: &Arc<dyn RegistryClient>,
    pacer: &Pacer,
    store: &mut StateStore,
    dataset_key: &str,
    query: &DatasetQuery,
    base_query: &str,
    settings: &Settings,
) -> Result<Vec<SegmentPlan>, HarvestError> {
    let budget = settings.page_size as u64 * settings.max_pages_per_segment as u64;
    let retry_delay = Duration::from_millis(settings.retry_base_delay_ms);

    let mut plans = Vec::new();
    let mut visited: HashSet<String> = HashSet::new();
    let mut worklist: VecDeque<(String, u32)> = VecDeque::new();
    worklist.push_back((base_query.to_string(), 0));

    while let Some((candidate, depth)) = worklist.pop_front() {
        if !visited.insert(candidate.clone()) {
            continue;
        }

        // A previously accepted segment keeps its probed totals; no need
        // to spend a request on it again.
        if let Some(segment) = store
            .dataset(dataset_key)
            .and_then(|d| d.segments.get(&candidate))
        {
            if let (Some(total), Some(total_pages)) = (segment.total, segment.total_pages) {
                plans.push(SegmentPlan {
                    key: candidate,
                    total,
                    total_pages,
                    first_page: None,
                });
                continue;
            }
        }

        pacer.segment_probe().await;
        let page = with_retry(
            || client.fetch_list(query, &candidate, 1),
            settings.list_retry_attempts,
            retry_delay,
        )
        .await?;

        if page.total == 0 {
            debug!("query {:?} has no results, pruning branch", candidate);
            continue;
        }

        let total_pages = page.total_pages(settings.page_size);
        if page.total <= budget || depth >= settings.max_segment_depth {
            if page.total > budget {
                warn!(
                    "accepting oversized query {:?} ({} records) at depth limit {}",
                    candidate, page.total, depth
                );
            }
            store.register_segment(dataset_key, &candidate, page.total, total_pages);
            store.save()?;
            info!(
                "{}: segment {:?} accepted ({} records, {} pages)",
                dataset_key, candidate, page.total, total_pages
            );
            plans.push(SegmentPlan {
                key: candidate,
                total: page.total,
                total_pages,
                first_page: Some(page),
            });
        } else {
            debug!(
                "query {:?} has {} records (budget {}), splitting",
                candidate, page.total, budget
            );
            for digit in 0..10u32 {
                worklist.push_back((format!("{candidate}{digit}"), depth + 1));
            }
        }
    }

    store.dataset_mut(dataset_key).discovery_complete = true;
    store.save()?;
    info!("{}: discovery found {} segments", dataset_key, plans.len());
    Ok(plans)
}

/// Rebuild segment plans from persisted state for a resumed dataset.
pub fn planned_segments(store: &StateStore, dataset_key: &str) -> Vec<SegmentPlan> {
    store
        .dataset(dataset_key)
        .map(|dataset| {
            dataset
                .segments
                .values()
                .filter_map(|segment| {
                    let total = segment.total?;
                    let total_pages = segment.total_pages?;
                    Some(SegmentPlan {
                        key: segment.segment_key.clone(),
                        total,
                        total_pages,
                        first_page: None,
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;

    use super::*;
    use crate::harvest::error::FetchError;
    use crate::models::RunConfigSnapshot;

    /// List endpoint stub with a deterministic result count per query.
    struct CountStub {
        counts: HashMap<String, u64>,
        page_size: u32,
    }

    impl CountStub {
        fn new(counts: &[(&str, u64)], page_size: u32) -> Arc<dyn RegistryClient> {
            Arc::new(Self {
                counts: counts
                    .iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect(),
                page_size,
            })
        }
    }

    #[async_trait]
    impl RegistryClient for CountStub {
        async fn fetch_list(
            &self,
            _query: &DatasetQuery,
            search_value: &str,
            _page_num: u32,
        ) -> Result<ListPage, FetchError> {
            let total = self.counts.get(search_value).copied().unwrap_or(0);
            let on_page = total.min(self.page_size as u64) as usize;
            Ok(ListPage {
                total,
                page_size: self.page_size,
                record_ids: (0..on_page).map(|i| format!("{search_value}-{i}")).collect(),
            })
        }

        async fn fetch_detail(
            &self,
            _query: &DatasetQuery,
            _record_id: &str,
        ) -> Result<Option<serde_json::Value>, FetchError> {
            Ok(None)
        }
    }

    fn test_settings() -> Settings {
        Settings {
            page_size: 10,
            max_pages_per_segment: 2,
            max_segment_depth: 3,
            ..Default::default()
        }
    }

    fn test_store(dir: &tempfile::TempDir) -> StateStore {
        StateStore::create_initial(
            dir.path(),
            RunConfigSnapshot::default(),
            Some("testrun".to_string()),
        )
        .unwrap()
    }

    fn query() -> DatasetQuery {
        DatasetQuery {
            item_id: "item-1".to_string(),
            is_senior: false,
            id_field: "f4".to_string(),
        }
    }

    #[tokio::test]
    async fn test_discovery_splits_until_budget_fits() {
        // Budget is 10 × 2 = 20 records per segment.
        let client = CountStub::new(
            &[("Q", 100), ("Q1", 15), ("Q2", 25), ("Q20", 12), ("Q21", 13)],
            10,
        );
        let dir = tempfile::tempdir().unwrap();
        let mut store = test_store(&dir);
        let settings = test_settings();
        let pacer = Pacer::disabled();

        let plans = discover_segments(&client, &pacer, &mut store, "ds", &query(), "Q", &settings)
            .await
            .unwrap();

        let keys: Vec<&str> = plans.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec!["Q1", "Q20", "Q21"]);

        // Every accepted segment fits the budget and is registered.
        for plan in &plans {
            assert!(plan.total <= 20);
            assert!(plan.first_page.is_some());
            let segment = &store.dataset("ds").unwrap().segments[&plan.key];
            assert_eq!(segment.total, Some(plan.total));
        }
        assert!(store.dataset("ds").unwrap().discovery_complete);
    }

    #[tokio::test]
    async fn test_discovery_accepts_oversized_at_depth_limit() {
        // Every query reports 1000 records; with depth limit 1 the ten
        // first-level children are accepted even though they bust the
        // budget.
        let mut counts: Vec<(String, u64)> = vec![("Q".to_string(), 1000)];
        for digit in 0..10 {
            counts.push((format!("Q{digit}"), 1000));
        }
        let count_refs: Vec<(&str, u64)> =
            counts.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        let client = CountStub::new(&count_refs, 10);

        let dir = tempfile::tempdir().unwrap();
        let mut store = test_store(&dir);
        let settings = Settings {
            max_segment_depth: 1,
            ..test_settings()
        };
        let pacer = Pacer::disabled();

        let plans = discover_segments(&client, &pacer, &mut store, "ds", &query(), "Q", &settings)
            .await
            .unwrap();

        assert_eq!(plans.len(), 10);
        for plan in &plans {
            assert_eq!(plan.total, 1000);
            assert_eq!(plan.total_pages, 100);
        }
    }

    #[tokio::test]
    async fn test_empty_base_query_yields_no_segments() {
        let client = CountStub::new(&[], 10);
        let dir = tempfile::tempdir().unwrap();
        let mut store = test_store(&dir);
        let settings = test_settings();
        let pacer = Pacer::disabled();

        let plans = discover_segments(&client, &pacer, &mut store, "ds", &query(), "Q", &settings)
            .await
            .unwrap();
        assert!(plans.is_empty());
        assert!(store.dataset("ds").unwrap().segments.is_empty());
    }

    #[tokio::test]
    async fn test_rediscovery_reuses_registered_segments() {
        let client = CountStub::new(&[("Q", 15)], 10);
        let dir = tempfile::tempdir().unwrap();
        let mut store = test_store(&dir);
        let settings = test_settings();
        let pacer = Pacer::disabled();

        let first = discover_segments(&client, &pacer, &mut store, "ds", &query(), "Q", &settings)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);
        assert!(first[0].first_page.is_some());

        // Second walk finds the segment already registered and keeps its
        // totals without a fresh probe payload.
        let second = discover_segments(&client, &pacer, &mut store, "ds", &query(), "Q", &settings)
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].total, 15);
        assert!(second[0].first_page.is_none());
    }
}
