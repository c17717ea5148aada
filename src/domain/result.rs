use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

use crate::error::CoreError;

/// Tracks whether a result has been appended to the external price-history
/// log by the auto-record pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "history_record_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum HistoryRecordStatus {
    None,
    Recorded,
    Duplicate,
    Failed,
}

impl Default for HistoryRecordStatus {
    fn default() -> Self {
        HistoryRecordStatus::None
    }
}

/// A single successful submission; one-to-one with a job.
#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder, sqlx::FromRow)]
#[builder(field_defaults(setter(into)))]
pub struct CrawlResult {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,
    pub job_id: Uuid,
    pub url_hash: String,
    pub price: Decimal,
    pub currency: String,
    #[builder(default)]
    pub title: Option<String>,
    #[builder(default = true)]
    pub in_stock: bool,
    #[builder(default)]
    pub parsed_data: Option<serde_json::Value>,
    #[builder(default)]
    pub raw_html: Option<String>,
    #[builder(default = Utc::now())]
    pub crawled_at: DateTime<Utc>,
    #[builder(default)]
    pub history_record_status: HistoryRecordStatus,
    #[builder(default)]
    pub history_recorded_at: Option<DateTime<Utc>>,
}

/// Max length for bounded free-text fields such as `error_msg`.
pub const MAX_ERROR_MSG_LEN: usize = 1000;

impl CrawlResult {
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.price < Decimal::ZERO {
            return Err(CoreError::Validation("price must be >= 0".into()));
        }
        if !is_valid_currency(&self.currency) {
            return Err(CoreError::Validation(
                "currency must be exactly three uppercase letters".into(),
            ));
        }
        Ok(())
    }

    /// Sources listed under `parsed_data.price_sources`, used by the
    /// auto-record criteria evaluator.
    pub fn price_sources(&self) -> HashSet<String> {
        self.parsed_data
            .as_ref()
            .and_then(|v| v.get("price_sources"))
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Confidence reported by the `html_ml` source, if present.
    pub fn html_ml_confidence(&self) -> Option<f64> {
        self.parsed_data
            .as_ref()
            .and_then(|v| v.pointer("/price_extraction/extract_price_from_html_ml/confidence"))
            .and_then(|v| v.as_f64())
    }
}

pub fn is_valid_currency(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase())
}

/// A single process-wide configuration object controlling whether and how
/// results are auto-recorded into the price-history log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoRecordConfig {
    pub enabled: bool,
    pub allowed_sources: HashSet<String>,
    pub min_confidence: f64,
    pub require_in_stock: bool,
    pub allowed_domains: HashSet<String>,
    pub currency_whitelist: HashSet<String>,
}

impl Default for AutoRecordConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            allowed_sources: HashSet::new(),
            min_confidence: 0.0,
            require_in_stock: false,
            allowed_domains: HashSet::new(),
            currency_whitelist: HashSet::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn currency_validation() {
        assert!(is_valid_currency("VND"));
        assert!(!is_valid_currency("vnd"));
        assert!(!is_valid_currency("VN"));
        assert!(!is_valid_currency("VNDD"));
    }

    #[test]
    fn price_sources_extracted_from_parsed_data() {
        let r = CrawlResult::builder()
            .job_id(Uuid::new_v4())
            .url_hash("a".repeat(64))
            .price(Decimal::new(1290000, 0))
            .currency("VND")
            .parsed_data(Some(serde_json::json!({
                "price_sources": ["html_ml"],
                "price_extraction": {
                    "extract_price_from_html_ml": {"confidence": 0.95}
                }
            })))
            .build();
        assert_eq!(r.price_sources(), HashSet::from(["html_ml".to_string()]));
        assert_eq!(r.html_ml_confidence(), Some(0.95));
    }
}
