//! Configuration for regharvest.
//!
//! A `Config` is what the operator writes (file + environment overrides);
//! a `Settings` is the resolved, immutable value constructed once at
//! startup and passed by reference into each component. Nothing below the
//! CLI reads the environment directly.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::harvest::{DatasetQuery, PacingConfig};
use crate::models::{Record, RunConfigSnapshot};

/// Default portal origin.
pub const DEFAULT_BASE_URL: &str = "https://www.nmpa.gov.cn";

/// Default page size requested from the list endpoint.
pub const DEFAULT_PAGE_SIZE: u32 = 20;

/// Default per-segment page budget. A query whose result set needs more
/// pages than this gets partitioned further during discovery.
pub const DEFAULT_MAX_PAGES_PER_SEGMENT: u32 = 500;

/// How a list row and a detail payload map onto output record fields.
///
/// The portal serves positional field names (`f0`, `f1`, ...) whose meaning
/// differs per category, so each dataset carries its own mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMap {
    /// List-row field holding the record identifier.
    pub list_id: String,
    /// Detail field holding the registration code.
    pub code: String,
    pub name_zh: String,
    pub name_en: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_name_zh: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trade_name_en: Option<String>,
}

impl Default for FieldMap {
    fn default() -> Self {
        Self {
            list_id: "f4".to_string(),
            code: "f0".to_string(),
            name_zh: "f1".to_string(),
            name_en: "f2".to_string(),
            trade_name_zh: None,
            trade_name_en: None,
        }
    }
}

fn field_string(detail: &serde_json::Value, field: &str) -> String {
    detail
        .get(field)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

impl FieldMap {
    /// Build an output record from a detail payload. Returns `None` when
    /// the payload carries no registration code.
    pub fn record_from(&self, detail: &serde_json::Value) -> Option<Record> {
        let code = field_string(detail, &self.code);
        if code.is_empty() {
            return None;
        }
        let mut record = Record::new(
            &code,
            &field_string(detail, &self.name_zh),
            &field_string(detail, &self.name_en),
        );
        if let Some(field) = &self.trade_name_zh {
            record.trade_name_zh = field_string(detail, field);
        }
        if let Some(field) = &self.trade_name_en {
            record.trade_name_en = field_string(detail, field);
        }
        Some(record)
    }
}

/// One harvestable dataset: a portal category plus the query and filter
/// that carve this dataset out of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub key: String,
    /// Category label, used to resolve the item id from the portal catalog
    /// when `item_id` is not configured.
    pub label: String,
    #[serde(default)]
    pub item_id: String,
    #[serde(default)]
    pub is_senior: bool,
    /// Base search value; segmentation appends digits to this.
    pub search_value: String,
    /// Records whose code does not start with this prefix are dropped.
    pub code_prefix: String,
    pub output_file: String,
    #[serde(default)]
    pub fields: FieldMap,
}

impl DatasetSpec {
    /// The fixed request parameters for this dataset.
    pub fn query(&self) -> DatasetQuery {
        DatasetQuery {
            item_id: self.item_id.clone(),
            is_senior: self.is_senior,
            id_field: self.fields.list_id.clone(),
        }
    }
}

fn imported_fields() -> FieldMap {
    FieldMap {
        list_id: "f3".to_string(),
        code: "f1".to_string(),
        name_zh: "f14".to_string(),
        name_en: "f15".to_string(),
        trade_name_zh: Some("f16".to_string()),
        trade_name_en: Some("f17".to_string()),
    }
}

/// The portal categories this tool ships with.
pub fn default_datasets() -> Vec<DatasetSpec> {
    const DOMESTIC_ITEM_ID: &str = "ff80808183cad75001840881f848179f";
    const IMPORTED_ITEM_ID: &str = "ff80808183cad7500184088665711800";

    vec![
        DatasetSpec {
            key: "domestic-h".to_string(),
            label: "境内生产药品".to_string(),
            item_id: DOMESTIC_ITEM_ID.to_string(),
            is_senior: false,
            search_value: "国药准字H".to_string(),
            code_prefix: "国药准字H".to_string(),
            output_file: "domestic-h.jsonl".to_string(),
            fields: FieldMap::default(),
        },
        DatasetSpec {
            key: "domestic-s".to_string(),
            label: "境内生产药品".to_string(),
            item_id: DOMESTIC_ITEM_ID.to_string(),
            is_senior: false,
            search_value: "国药准字S".to_string(),
            code_prefix: "国药准字S".to_string(),
            output_file: "domestic-s.jsonl".to_string(),
            fields: FieldMap::default(),
        },
        DatasetSpec {
            key: "imported-h".to_string(),
            label: "境外生产药品".to_string(),
            item_id: IMPORTED_ITEM_ID.to_string(),
            is_senior: false,
            search_value: "国药准字".to_string(),
            code_prefix: "H".to_string(),
            output_file: "imported-h.jsonl".to_string(),
            fields: imported_fields(),
        },
        DatasetSpec {
            key: "imported-s".to_string(),
            label: "境外生产药品".to_string(),
            item_id: IMPORTED_ITEM_ID.to_string(),
            is_senior: false,
            search_value: "国药准字".to_string(),
            code_prefix: "S".to_string(),
            output_file: "imported-s.jsonl".to_string(),
            fields: imported_fields(),
        },
    ]
}

/// Resolved application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Root directory for runs, state and dataset output.
    pub output_root: PathBuf,
    pub base_url: String,
    /// Catalog document for item-id resolution (None disables resolution).
    pub catalog_url: Option<String>,
    pub user_agent: String,
    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,
    pub page_size: u32,
    pub max_pages_per_segment: u32,
    /// How many digits segmentation may append before accepting a segment
    /// regardless of size.
    pub max_segment_depth: u32,
    pub list_retry_attempts: u32,
    pub detail_retry_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Concurrent detail lookups per page.
    pub detail_concurrency: usize,
    /// Emit a progress line every N pages.
    pub page_log_interval: u32,
    /// Proxy URLs to rotate through; "direct" means no proxy.
    pub proxies: Vec<String>,
    pub max_rotations: u32,
    pub pacing: PacingConfig,
    pub datasets: Vec<DatasetSpec>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("outputs"),
            base_url: DEFAULT_BASE_URL.to_string(),
            catalog_url: Some(format!("{DEFAULT_BASE_URL}/datasearch/config/NMPA_DATA.json")),
            user_agent: "regharvest/0.4 (registry research)".to_string(),
            request_timeout_secs: 60,
            page_size: DEFAULT_PAGE_SIZE,
            max_pages_per_segment: DEFAULT_MAX_PAGES_PER_SEGMENT,
            max_segment_depth: 3,
            list_retry_attempts: 5,
            detail_retry_attempts: 3,
            retry_base_delay_ms: 800,
            detail_concurrency: 4,
            page_log_interval: 50,
            proxies: vec!["direct".to_string()],
            max_rotations: 20,
            pacing: PacingConfig::default(),
            datasets: default_datasets(),
        }
    }
}

impl Settings {
    pub fn dataset(&self, key: &str) -> Option<&DatasetSpec> {
        self.datasets.iter().find(|d| d.key == key)
    }

    pub fn dataset_keys(&self) -> Vec<String> {
        self.datasets.iter().map(|d| d.key.clone()).collect()
    }

    /// Capture the parts of the settings a run snapshot records.
    pub fn run_snapshot(&self, selected: &[String]) -> RunConfigSnapshot {
        RunConfigSnapshot {
            datasets: selected.to_vec(),
            page_size: self.page_size,
            max_pages_per_segment: self.max_pages_per_segment,
            detail_concurrency: self.detail_concurrency,
            proxies: self.proxies.clone(),
        }
    }
}

/// Configuration file structure; every field optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub catalog_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_pages_per_segment: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_segment_depth: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_retry_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_retry_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_base_delay_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_log_interval: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub proxies: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_rotations: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pacing: Option<PacingConfig>,
    /// Replaces the built-in dataset catalog when non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datasets: Vec<DatasetSpec>,
}

impl Config {
    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {e}"))?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        match ext {
            "toml" => {
                toml::from_str(&contents).map_err(|e| format!("Failed to parse TOML config: {e}"))
            }
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .map_err(|e| format!("Failed to parse YAML config: {e}")),
            _ => serde_json::from_str(&contents)
                .map_err(|e| format!("Failed to parse JSON config: {e}")),
        }
    }

    /// Look for a config file in `dir`: regharvest.{ext} or config.{ext}.
    pub fn find_in(dir: &Path) -> Option<PathBuf> {
        let extensions = ["json", "toml", "yaml", "yml"];
        let basenames = ["regharvest", "config"];
        for basename in basenames {
            for ext in extensions {
                let path = dir.join(format!("{basename}.{ext}"));
                if path.exists() {
                    return Some(path);
                }
            }
        }
        None
    }

    /// Apply file values over the defaults.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        if let Some(ref output_dir) = self.output_dir {
            settings.output_root = resolve_path(output_dir);
        }
        if let Some(ref base_url) = self.base_url {
            settings.base_url = base_url.trim_end_matches('/').to_string();
        }
        if let Some(ref catalog_url) = self.catalog_url {
            settings.catalog_url = if catalog_url.is_empty() {
                None
            } else {
                Some(catalog_url.clone())
            };
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = user_agent.clone();
        }
        if let Some(timeout) = self.request_timeout_secs {
            settings.request_timeout_secs = timeout;
        }
        if let Some(page_size) = self.page_size {
            settings.page_size = page_size.max(1);
        }
        if let Some(max_pages) = self.max_pages_per_segment {
            settings.max_pages_per_segment = max_pages.max(1);
        }
        if let Some(depth) = self.max_segment_depth {
            settings.max_segment_depth = depth;
        }
        if let Some(attempts) = self.list_retry_attempts {
            settings.list_retry_attempts = attempts.max(1);
        }
        if let Some(attempts) = self.detail_retry_attempts {
            settings.detail_retry_attempts = attempts.max(1);
        }
        if let Some(delay) = self.retry_base_delay_ms {
            settings.retry_base_delay_ms = delay;
        }
        if let Some(concurrency) = self.detail_concurrency {
            settings.detail_concurrency = concurrency.max(1);
        }
        if let Some(interval) = self.page_log_interval {
            settings.page_log_interval = interval.max(1);
        }
        if !self.proxies.is_empty() {
            settings.proxies = self.proxies.clone();
        }
        if let Some(max) = self.max_rotations {
            settings.max_rotations = max;
        }
        if let Some(ref pacing) = self.pacing {
            settings.pacing = pacing.clone();
        }
        if !self.datasets.is_empty() {
            settings.datasets = self.datasets.clone();
        }
    }
}

/// Expand `~` and make the path absolute relative to the current directory.
fn resolve_path(path_str: &str) -> PathBuf {
    let expanded = shellexpand::tilde(path_str);
    PathBuf::from(expanded.as_ref())
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|s| s.parse().ok())
}

/// Apply `REGHARVEST_*` environment overrides on top of file config.
fn apply_env_overrides(settings: &mut Settings) {
    if let Some(dir) = env_string("REGHARVEST_OUTPUT_DIR") {
        settings.output_root = resolve_path(&dir);
    }
    if let Some(url) = env_string("REGHARVEST_BASE_URL") {
        settings.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(url) = env_string("REGHARVEST_CATALOG_URL") {
        settings.catalog_url = Some(url);
    }
    if let Some(ua) = env_string("REGHARVEST_USER_AGENT") {
        settings.user_agent = ua;
    }
    if let Some(timeout) = env_parse("REGHARVEST_TIMEOUT_SECS") {
        settings.request_timeout_secs = timeout;
    }
    if let Some(page_size) = env_parse::<u32>("REGHARVEST_PAGE_SIZE") {
        settings.page_size = page_size.max(1);
    }
    if let Some(max_pages) = env_parse::<u32>("REGHARVEST_MAX_PAGES_PER_SEGMENT") {
        settings.max_pages_per_segment = max_pages.max(1);
    }
    if let Some(depth) = env_parse("REGHARVEST_MAX_SEGMENT_DEPTH") {
        settings.max_segment_depth = depth;
    }
    if let Some(concurrency) = env_parse::<usize>("REGHARVEST_DETAIL_CONCURRENCY") {
        settings.detail_concurrency = concurrency.max(1);
    }
    if let Some(list) = env_string("REGHARVEST_PROXY_LIST") {
        settings.proxies = list
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    } else if let Some(proxy) = env_string("REGHARVEST_PROXY") {
        settings.proxies = vec![proxy];
    }
    if let Some(max) = env_parse("REGHARVEST_MAX_ROTATIONS") {
        settings.max_rotations = max;
    }
}

/// Load settings: defaults, then config file, then environment overrides.
///
/// `config_path` is the explicit `--config` flag; without it the current
/// directory is searched for a regharvest/config file.
pub fn load_settings(config_path: Option<&Path>) -> Settings {
    let mut settings = Settings::default();

    let discovered = config_path.map(PathBuf::from).or_else(|| {
        std::env::current_dir()
            .ok()
            .and_then(|dir| Config::find_in(&dir))
    });

    if let Some(path) = discovered {
        match Config::load_from_path(&path) {
            Ok(config) => {
                tracing::debug!("loaded config from {}", path.display());
                config.apply_to_settings(&mut settings);
            }
            Err(err) => {
                tracing::warn!("ignoring config file {}: {}", path.display(), err);
            }
        }
    }

    apply_env_overrides(&mut settings);
    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_datasets_have_unique_outputs() {
        let datasets = default_datasets();
        let mut outputs: Vec<_> = datasets.iter().map(|d| d.output_file.clone()).collect();
        outputs.sort();
        outputs.dedup();
        assert_eq!(outputs.len(), datasets.len());
    }

    #[test]
    fn test_field_map_normalizes_missing_fields() {
        let fields = FieldMap::default();
        let detail = serde_json::json!({"f0": "国药准字H20065155", "f1": null});
        let record = fields.record_from(&detail).unwrap();
        assert_eq!(record.code, "国药准字H20065155");
        assert_eq!(record.name_zh, "");
        assert_eq!(record.name_en, "");
    }

    #[test]
    fn test_field_map_rejects_missing_code() {
        let fields = FieldMap::default();
        let detail = serde_json::json!({"f1": "名称"});
        assert!(fields.record_from(&detail).is_none());
    }

    #[test]
    fn test_imported_field_map_carries_trade_names() {
        let fields = imported_fields();
        let detail = serde_json::json!({
            "f1": "H20150119",
            "f14": "产品名",
            "f15": "Product",
            "f16": "商品名",
            "f17": "Brand",
        });
        let record = fields.record_from(&detail).unwrap();
        assert_eq!(record.code, "H20150119");
        assert_eq!(record.trade_name_zh, "商品名");
        assert_eq!(record.trade_name_en, "Brand");
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let toml_src = r#"
            page_size = 10
            max_pages_per_segment = 25
            proxies = ["direct", "socks5://127.0.0.1:9050"]
        "#;
        let config: Config = toml::from_str(toml_src).unwrap();
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings);
        assert_eq!(settings.page_size, 10);
        assert_eq!(settings.max_pages_per_segment, 25);
        assert_eq!(settings.proxies.len(), 2);
    }
}
