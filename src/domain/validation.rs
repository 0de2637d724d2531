//! Validation gate
//!
//! Last check before a canonical record may reach the store. Rejections are
//! recorded with enough of the raw payload to debug later and the pipeline
//! continues; a validation failure is never fatal to a run.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::record::{CanonicalRecord, EntityKind};
use crate::domain::source::Source;

/// Why a record was rejected before upsert.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RejectReason {
    #[error("missing identifier: {0}")]
    MissingIdentifier(String),

    #[error("metric {field} must be non-negative, got {value}")]
    NegativeMetric { field: String, value: f64 },

    #[error("unparseable date in field {field}: {value}")]
    UnparseableDate { field: String, value: String },

    #[error("date in field {field} is too far in the future: {value}")]
    FutureDate { field: String, value: String },
}

/// Metric fields that are semantically non-negative wherever they appear.
const NON_NEGATIVE_METRICS: &[&str] = &[
    "cost",
    "spend",
    "impressions",
    "clicks",
    "conversions",
    "revenue",
    "total_price",
    "sessions",
    "sends",
    "opens",
];

/// Attribute fields holding dates that must parse and stay near the present.
const DATE_FIELDS: &[&str] = &["date", "created_at", "updated_at", "processed_at"];

/// Longest payload excerpt kept on a validation failure row.
const MAX_EXCERPT_LEN: usize = 1_000;

/// Schema and business checks applied between normalization and upsert.
#[derive(Debug, Clone)]
pub struct ValidationGate {
    /// Dates this many days past `today` are rejected as implausible.
    max_future_days: i64,
}

impl Default for ValidationGate {
    fn default() -> Self {
        Self { max_future_days: 2 }
    }
}

impl ValidationGate {
    pub fn new(max_future_days: i64) -> Self {
        Self { max_future_days }
    }

    pub fn validate(&self, record: &CanonicalRecord, today: NaiveDate) -> Result<(), RejectReason> {
        if record.natural_key.parts().is_empty() {
            return Err(RejectReason::MissingIdentifier("natural_key".into()));
        }
        for (idx, part) in record.natural_key.parts().iter().enumerate() {
            if part.trim().is_empty() {
                return Err(RejectReason::MissingIdentifier(format!(
                    "natural_key[{idx}]"
                )));
            }
        }

        let limit = today + chrono::Duration::days(self.max_future_days);
        if let Some(snapshot) = record.snapshot_date {
            if snapshot > limit {
                return Err(RejectReason::FutureDate {
                    field: "snapshot_date".into(),
                    value: snapshot.to_string(),
                });
            }
        }

        if let Some(attributes) = record.attributes.as_object() {
            for field in NON_NEGATIVE_METRICS {
                if let Some(value) = attributes.get(*field).and_then(serde_json::Value::as_f64) {
                    if value < 0.0 {
                        return Err(RejectReason::NegativeMetric {
                            field: (*field).to_string(),
                            value,
                        });
                    }
                }
            }

            for field in DATE_FIELDS {
                let Some(raw) = attributes.get(*field).and_then(serde_json::Value::as_str) else {
                    continue;
                };
                let Some(parsed) = parse_flexible_date(raw) else {
                    return Err(RejectReason::UnparseableDate {
                        field: (*field).to_string(),
                        value: raw.to_string(),
                    });
                };
                if parsed > limit {
                    return Err(RejectReason::FutureDate {
                        field: (*field).to_string(),
                        value: raw.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Parse a date from the formats sources actually send: plain dates,
/// RFC 3339 timestamps, or a timestamp with a date prefix.
pub fn parse_flexible_date(raw: &str) -> Option<NaiveDate> {
    if let Ok(date) = raw.parse::<NaiveDate>() {
        return Some(date);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.date_naive());
    }
    if raw.len() >= 10 {
        if let Ok(date) = raw[..10].parse::<NaiveDate>() {
            return Some(date);
        }
    }
    None
}

/// One rejected record, persisted to the validation failure sink.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub source: Source,
    pub entity: EntityKind,
    /// Best-effort: may be incomplete when the key itself failed to extract.
    pub natural_key: String,
    pub reason: String,
    pub payload_excerpt: String,
    pub occurred_at: DateTime<Utc>,
}

impl ValidationFailure {
    pub fn new(
        source: Source,
        entity: EntityKind,
        natural_key: String,
        reason: String,
        payload: &serde_json::Value,
    ) -> Self {
        let mut excerpt = payload.to_string();
        if excerpt.len() > MAX_EXCERPT_LEN {
            let mut cut = MAX_EXCERPT_LEN;
            while !excerpt.is_char_boundary(cut) {
                cut -= 1;
            }
            excerpt.truncate(cut);
        }
        Self {
            source,
            entity,
            natural_key,
            reason,
            payload_excerpt: excerpt,
            occurred_at: Utc::now(),
        }
    }
}
