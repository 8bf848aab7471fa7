//! Remote client seam for the portal's search and detail endpoints.

use async_trait::async_trait;

use super::error::FetchError;

/// Per-dataset request parameters, fixed for the life of a dataset.
#[derive(Debug, Clone)]
pub struct DatasetQuery {
    /// Remote category identifier.
    pub item_id: String,
    /// Whether to query the advanced-search variant of the endpoint.
    pub is_senior: bool,
    /// Field of a list row that carries the record identifier.
    pub id_field: String,
}

impl DatasetQuery {
    pub fn is_senior_param(&self) -> &'static str {
        if self.is_senior {
            "Y"
        } else {
            "N"
        }
    }
}

/// One page of list results.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Total record count for the query, as reported by the endpoint.
    pub total: u64,
    /// Page size the endpoint actually applied (0 if unreported).
    pub page_size: u32,
    /// Record identifiers on this page, rows without an id dropped.
    pub record_ids: Vec<String>,
}

impl ListPage {
    /// Page count for this query, falling back to `default_page_size` when
    /// the endpoint does not echo one back.
    pub fn total_pages(&self, default_page_size: u32) -> u32 {
        let page_size = if self.page_size > 0 {
            self.page_size
        } else {
            default_page_size.max(1)
        };
        self.total.div_ceil(page_size as u64) as u32
    }
}

/// A record's detail payload: the raw field map served by the detail
/// endpoint. The engine only interprets the fields named by the dataset's
/// field mapping; everything else passes through untouched.
pub type DetailPayload = serde_json::Value;

/// The remote calls the harvesting engine depends on.
///
/// Production talks to the portal over HTTP; tests substitute a scripted
/// stub. Implementations classify their failures into [`FetchError`] kinds
/// before returning them.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Fetch one page of list results for a search value.
    async fn fetch_list(
        &self,
        query: &DatasetQuery,
        search_value: &str,
        page_num: u32,
    ) -> Result<ListPage, FetchError>;

    /// Fetch the detail payload for one record. `Ok(None)` means the
    /// endpoint answered but had no payload for this id.
    async fn fetch_detail(
        &self,
        query: &DatasetQuery,
        record_id: &str,
    ) -> Result<Option<DetailPayload>, FetchError>;

    /// Resolve a category's item id from the portal's published catalog.
    /// The default implementation reports the catalog as unavailable.
    async fn resolve_item_id(&self, _label: &str) -> Result<Option<String>, FetchError> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_pages_rounds_up() {
        let page = ListPage {
            total: 25,
            page_size: 10,
            record_ids: Vec::new(),
        };
        assert_eq!(page.total_pages(20), 3);
    }

    #[test]
    fn test_total_pages_falls_back_to_default() {
        let page = ListPage {
            total: 41,
            page_size: 0,
            record_ids: Vec::new(),
        };
        assert_eq!(page.total_pages(20), 3);
    }
}
