//! Output record model.

use serde::{Deserialize, Serialize};

/// One harvested registration entry, written as a single JSONL line.
///
/// Records are immutable once written; absent or null source fields are
/// normalized to empty strings so every line carries the full field set
/// expected by downstream consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Registration code, e.g. "国药准字H20065155" or "H20150119".
    pub code: String,
    #[serde(default)]
    pub name_zh: String,
    #[serde(default)]
    pub name_en: String,
    /// Trade names, present for imported registrations.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trade_name_zh: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub trade_name_en: String,
}

impl Record {
    pub fn new(code: &str, name_zh: &str, name_en: &str) -> Self {
        Self {
            code: code.to_string(),
            name_zh: name_zh.to_string(),
            name_en: name_en.to_string(),
            trade_name_zh: String::new(),
            trade_name_en: String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_trade_names_are_omitted_from_output() {
        let record = Record::new("国药准字H20065155", "阿莫西林胶囊", "Amoxicillin Capsules");
        let line = serde_json::to_string(&record).unwrap();
        assert!(!line.contains("trade_name_zh"));

        let mut imported = Record::new("H20150119", "一种药品", "Some Drug");
        imported.trade_name_zh = "商品名".to_string();
        let line = serde_json::to_string(&imported).unwrap();
        assert!(line.contains("trade_name_zh"));
    }
}
