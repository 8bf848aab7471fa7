//! HTTP implementation of the registry client.
//!
//! Talks to the portal's data-search endpoints with the current identity's
//! proxy applied. Every failure is classified into a [`FetchError`] kind
//! here, at the boundary, so nothing downstream ever inspects message
//! text.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use super::client::{DatasetQuery, DetailPayload, ListPage, RegistryClient};
use super::error::{FetchError, HarvestError};
use super::identity::Identity;
use crate::config::Settings;

const SEARCH_PATH: &str = "/datasearch/data/nmpadata/search";
const DETAIL_PATH: &str = "/datasearch/data/nmpadata/queryDetail";
const REFERER_PATH: &str = "/datasearch/search-result.html";

/// Registry client backed by the portal's HTTP API.
pub struct PortalClient {
    http: reqwest::Client,
    base_url: String,
    catalog_url: Option<String>,
    page_size: u32,
}

impl PortalClient {
    /// Build a client bound to one network identity. Rotating identity
    /// means building a fresh client.
    pub fn new(settings: &Settings, identity: &Identity) -> Result<Self, HarvestError> {
        let base_url = url::Url::parse(&settings.base_url)
            .map_err(|err| FetchError::transient(format!("invalid base url: {err}")))?;

        let mut builder = reqwest::Client::builder()
            .user_agent(&settings.user_agent)
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .cookie_store(true)
            .gzip(true)
            .brotli(true);

        if let Some(proxy_url) = &identity.proxy_url {
            let proxy = reqwest::Proxy::all(proxy_url).map_err(|err| {
                FetchError::transient(format!("invalid proxy {proxy_url}: {err}"))
            })?;
            builder = builder.proxy(proxy);
        }

        let http = builder
            .build()
            .map_err(|err| FetchError::transient(format!("http client build failed: {err}")))?;

        Ok(Self {
            http,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
            catalog_url: settings.catalog_url.clone(),
            page_size: settings.page_size,
        })
    }

    async fn get_json(&self, url: &str, params: &[(&str, String)]) -> Result<Value, FetchError> {
        let response = self
            .http
            .get(url)
            .query(params)
            .header("Referer", format!("{}{}", self.base_url, REFERER_PATH))
            .header("Accept", "application/json, text/plain, */*")
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::from_status(status.as_u16()));
        }
        response.json().await.map_err(FetchError::from_reqwest)
    }
}

/// Descend through envelope `data` wrappers; the portal sometimes nests
/// its payload one level deeper than documented.
fn data_node(body: &Value) -> &Value {
    let mut node = body;
    for _ in 0..2 {
        match node.get("data") {
            Some(inner) if inner.is_object() => node = inner,
            _ => break,
        }
    }
    node
}

fn field_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Recursive search of the portal catalog for a category's item id.
fn find_item_id(node: &Value, label: &str) -> Option<String> {
    const NAME_KEYS: &[&str] = &["name", "dbName", "title", "itemName", "label", "cnName"];
    const ID_KEYS: &[&str] = &["itemId", "id", "nmpaItem", "value", "dbId"];

    match node {
        Value::Object(map) => {
            let name = NAME_KEYS
                .iter()
                .find_map(|key| map.get(*key).and_then(|v| v.as_str()));
            if name.is_some_and(|n| n.contains(label)) {
                for key in ID_KEYS {
                    if let Some(id) = map.get(*key).and_then(|v| v.as_str()) {
                        if id.len() > 16 {
                            return Some(id.to_string());
                        }
                    }
                }
            }
            map.values().find_map(|v| find_item_id(v, label))
        }
        Value::Array(items) => items.iter().find_map(|v| find_item_id(v, label)),
        _ => None,
    }
}

#[async_trait]
impl RegistryClient for PortalClient {
    async fn fetch_list(
        &self,
        query: &DatasetQuery,
        search_value: &str,
        page_num: u32,
    ) -> Result<ListPage, FetchError> {
        let url = format!("{}{}", self.base_url, SEARCH_PATH);
        let params = [
            ("itemId", query.item_id.clone()),
            ("isSenior", query.is_senior_param().to_string()),
            ("searchValue", search_value.to_string()),
            ("pageNum", page_num.to_string()),
            ("pageSize", self.page_size.to_string()),
            ("timestamp", Utc::now().timestamp_millis().to_string()),
        ];

        let body = self.get_json(&url, &params).await?;
        let node = data_node(&body);

        let list = node
            .get("list")
            .or_else(|| node.get("resultList"))
            .or_else(|| node.get("rows"))
            .and_then(|v| v.as_array())
            .ok_or_else(|| {
                let message = body
                    .get("message")
                    .and_then(|m| m.as_str())
                    .unwrap_or("unexpected response shape");
                FetchError::transient(format!("list payload missing: {message}"))
            })?;

        let record_ids = list
            .iter()
            .filter_map(|row| {
                row.get(&query.id_field)
                    .or_else(|| row.get("id"))
                    .and_then(field_as_string)
            })
            .collect();

        Ok(ListPage {
            total: node.get("total").and_then(|v| v.as_u64()).unwrap_or(0),
            page_size: node
                .get("pageSize")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            record_ids,
        })
    }

    async fn fetch_detail(
        &self,
        query: &DatasetQuery,
        record_id: &str,
    ) -> Result<Option<DetailPayload>, FetchError> {
        let url = format!("{}{}", self.base_url, DETAIL_PATH);
        let params = [
            ("itemId", query.item_id.clone()),
            ("id", record_id.to_string()),
            ("isSenior", query.is_senior_param().to_string()),
            ("timestamp", Utc::now().timestamp_millis().to_string()),
        ];

        let body = self.get_json(&url, &params).await?;
        let detail = data_node(&body).get("detail").cloned();
        Ok(detail.filter(|d| !d.is_null()))
    }

    async fn resolve_item_id(&self, label: &str) -> Result<Option<String>, FetchError> {
        let Some(catalog_url) = &self.catalog_url else {
            return Ok(None);
        };
        let params = [("date", Utc::now().timestamp_millis().to_string())];
        let body = self.get_json(catalog_url, &params).await?;
        let resolved = find_item_id(&body, label);
        debug!("catalog lookup for {:?}: {:?}", label, resolved);
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_item_id_walks_nested_catalog() {
        let catalog = serde_json::json!({
            "groups": [
                {
                    "name": "药品",
                    "children": [
                        {"itemName": "境内生产药品", "itemId": "ff80808183cad75001840881f848179f"},
                        {"itemName": "境外生产药品", "itemId": "ff80808183cad7500184088665711800"},
                    ]
                }
            ]
        });
        assert_eq!(
            find_item_id(&catalog, "境外生产药品").as_deref(),
            Some("ff80808183cad7500184088665711800")
        );
        assert!(find_item_id(&catalog, "医疗器械").is_none());
    }

    #[test]
    fn test_find_item_id_ignores_short_ids() {
        let catalog = serde_json::json!({"name": "境内生产药品", "id": "short"});
        assert!(find_item_id(&catalog, "境内生产药品").is_none());
    }

    #[test]
    fn test_data_node_descends_nested_envelopes() {
        let body = serde_json::json!({"data": {"data": {"total": 5, "list": []}}});
        assert_eq!(data_node(&body).get("total").and_then(|v| v.as_u64()), Some(5));

        let flat = serde_json::json!({"total": 7});
        assert_eq!(data_node(&flat).get("total").and_then(|v| v.as_u64()), Some(7));
    }
}
