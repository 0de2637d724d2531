//! Per-source normalization
//!
//! Maps source-native payloads into canonical records. Each source has its
//! own natural-key recipe; time-series facts fold their report date into the
//! key so one row exists per day.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

use crate::domain::record::{CanonicalRecord, EntityKind, NaturalKey, RawRecord};
use crate::domain::source::Source;
use crate::domain::validation::parse_flexible_date;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("missing identifier: {field}")]
    MissingField { field: &'static str },

    #[error("unparseable date in field {field}")]
    BadDate { field: &'static str },

    #[error("source {src} does not emit {entity} records")]
    UnsupportedEntity { src: Source, entity: EntityKind },
}

/// Stateless mapper from raw connector output to canonical records.
pub struct Normalizer;

impl Normalizer {
    /// Normalize one raw record fetched from `source`.
    ///
    /// `snapshot_hint` carries the accumulation date for snapshot-mode
    /// sources, whose payloads describe current state and have no date of
    /// their own.
    pub fn normalize(
        source: Source,
        raw: &RawRecord,
        fetched_at: DateTime<Utc>,
        snapshot_hint: Option<NaiveDate>,
    ) -> Result<CanonicalRecord, NormalizeError> {
        let payload = &raw.payload;
        let (parts, snapshot_date) = match (source, raw.entity) {
            (Source::Ecommerce, EntityKind::Order)
            | (Source::Ecommerce, EntityKind::Customer)
            | (Source::Ecommerce, EntityKind::Product)
            | (Source::Ecommerce, EntityKind::Refund) => {
                (vec![id_field(payload, "id")?], None)
            }

            (Source::AdPlatform, EntityKind::Campaign) => {
                let date = date_field(payload, "date")?;
                (
                    vec![id_field(payload, "campaign_id")?, date.to_string()],
                    Some(date),
                )
            }
            (Source::AdPlatform, EntityKind::AdGroup) => {
                let date = date_field(payload, "date")?;
                (
                    vec![
                        id_field(payload, "campaign_id")?,
                        id_field(payload, "ad_group_id")?,
                        date.to_string(),
                    ],
                    Some(date),
                )
            }
            (Source::AdPlatform, EntityKind::SearchTerm) => {
                let date = date_field(payload, "date")?;
                (
                    vec![
                        id_field(payload, "campaign_id")?,
                        id_field(payload, "ad_group_id")?,
                        id_field(payload, "search_term")?,
                        date.to_string(),
                    ],
                    Some(date),
                )
            }

            (Source::EmailMarketing, EntityKind::Campaign) => {
                (vec![id_field(payload, "id")?], None)
            }
            (Source::EmailMarketing, EntityKind::FlowMessage) => (
                vec![
                    id_field(payload, "flow_id")?,
                    id_field(payload, "message_id")?,
                ],
                None,
            ),

            // Snapshot accumulation: the fetch date is part of the identity,
            // so re-running the same day replaces and other days accrete.
            (Source::ShoppingFeed, EntityKind::ProductStatus) => {
                let date = snapshot_date_for(payload, snapshot_hint)?;
                (
                    vec![id_field(payload, "product_id")?, date.to_string()],
                    Some(date),
                )
            }
            (Source::ShoppingFeed, EntityKind::Disapproval) => {
                let date = snapshot_date_for(payload, snapshot_hint)?;
                (
                    vec![
                        id_field(payload, "product_id")?,
                        id_field(payload, "issue_code")?,
                        date.to_string(),
                    ],
                    Some(date),
                )
            }
            (Source::ShoppingFeed, EntityKind::AccountStatus) => {
                let date = snapshot_date_for(payload, snapshot_hint)?;
                (
                    vec![id_field(payload, "account_id")?, date.to_string()],
                    Some(date),
                )
            }

            (Source::SearchConsole, EntityKind::SearchQuery) => {
                let date = date_field(payload, "date")?;
                (
                    vec![date.to_string(), id_field(payload, "query")?],
                    Some(date),
                )
            }
            (Source::SearchConsole, EntityKind::SearchPage) => {
                let date = date_field(payload, "date")?;
                (
                    vec![date.to_string(), id_field(payload, "page")?],
                    Some(date),
                )
            }

            (Source::WebAnalytics, EntityKind::DailyEcommerce) => {
                let date = date_field(payload, "date")?;
                (vec![date.to_string()], Some(date))
            }

            (source, entity) => {
                return Err(NormalizeError::UnsupportedEntity { src: source, entity });
            }
        };

        Ok(CanonicalRecord {
            source,
            entity: raw.entity,
            natural_key: NaturalKey::new(parts),
            snapshot_date,
            attributes: payload.clone(),
            fetched_at,
        })
    }

    /// Best-effort key for the failure sink when normalization itself failed.
    pub fn best_effort_key(payload: &serde_json::Value) -> String {
        for field in ["id", "campaign_id", "product_id", "query", "page", "date"] {
            if let Some(value) = scalar_to_string(payload.get(field)) {
                return value;
            }
        }
        String::new()
    }
}

/// Identifier fields may arrive as strings or bare JSON numbers.
fn id_field(
    payload: &serde_json::Value,
    field: &'static str,
) -> Result<String, NormalizeError> {
    scalar_to_string(payload.get(field))
        .filter(|s| !s.trim().is_empty())
        .ok_or(NormalizeError::MissingField { field })
}

fn scalar_to_string(value: Option<&serde_json::Value>) -> Option<String> {
    match value {
        Some(serde_json::Value::String(s)) => Some(s.clone()),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn date_field(
    payload: &serde_json::Value,
    field: &'static str,
) -> Result<NaiveDate, NormalizeError> {
    let raw = payload
        .get(field)
        .and_then(serde_json::Value::as_str)
        .ok_or(NormalizeError::MissingField { field })?;
    parse_flexible_date(raw).ok_or(NormalizeError::BadDate { field })
}

fn snapshot_date_for(
    payload: &serde_json::Value,
    hint: Option<NaiveDate>,
) -> Result<NaiveDate, NormalizeError> {
    if let Some(date) = hint {
        return Ok(date);
    }
    date_field(payload, "date")
}
