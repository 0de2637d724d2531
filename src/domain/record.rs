//! Canonical record model
//!
//! Connectors emit source-native JSON documents; normalization turns them
//! into canonical records carrying a stable natural key. The attribute
//! document keeps whatever the source reported at fetch time and is replaced
//! wholesale by a later upsert for the same key.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::source::Source;

/// Kinds of canonical entities the engine persists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Order,
    Customer,
    Product,
    Refund,
    Campaign,
    AdGroup,
    SearchTerm,
    FlowMessage,
    ProductStatus,
    Disapproval,
    AccountStatus,
    DailyEcommerce,
    SearchQuery,
    SearchPage,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Order => "order",
            EntityKind::Customer => "customer",
            EntityKind::Product => "product",
            EntityKind::Refund => "refund",
            EntityKind::Campaign => "campaign",
            EntityKind::AdGroup => "ad_group",
            EntityKind::SearchTerm => "search_term",
            EntityKind::FlowMessage => "flow_message",
            EntityKind::ProductStatus => "product_status",
            EntityKind::Disapproval => "disapproval",
            EntityKind::AccountStatus => "account_status",
            EntityKind::DailyEcommerce => "daily_ecommerce",
            EntityKind::SearchQuery => "search_query",
            EntityKind::SearchPage => "search_page",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "order" => Ok(EntityKind::Order),
            "customer" => Ok(EntityKind::Customer),
            "product" => Ok(EntityKind::Product),
            "refund" => Ok(EntityKind::Refund),
            "campaign" => Ok(EntityKind::Campaign),
            "ad_group" => Ok(EntityKind::AdGroup),
            "search_term" => Ok(EntityKind::SearchTerm),
            "flow_message" => Ok(EntityKind::FlowMessage),
            "product_status" => Ok(EntityKind::ProductStatus),
            "disapproval" => Ok(EntityKind::Disapproval),
            "account_status" => Ok(EntityKind::AccountStatus),
            "daily_ecommerce" => Ok(EntityKind::DailyEcommerce),
            "search_query" => Ok(EntityKind::SearchQuery),
            "search_page" => Ok(EntityKind::SearchPage),
            other => Err(format!("unknown entity kind: {other}")),
        }
    }
}

/// Entity kinds a given source may emit.
pub fn entities_for(source: Source) -> &'static [EntityKind] {
    match source {
        Source::Ecommerce => &[
            EntityKind::Order,
            EntityKind::Customer,
            EntityKind::Product,
            EntityKind::Refund,
        ],
        Source::AdPlatform => &[
            EntityKind::Campaign,
            EntityKind::AdGroup,
            EntityKind::SearchTerm,
        ],
        Source::EmailMarketing => &[EntityKind::Campaign, EntityKind::FlowMessage],
        Source::ShoppingFeed => &[
            EntityKind::ProductStatus,
            EntityKind::Disapproval,
            EntityKind::AccountStatus,
        ],
        Source::SearchConsole => &[EntityKind::SearchQuery, EntityKind::SearchPage],
        Source::WebAnalytics => &[EntityKind::DailyEcommerce],
    }
}

/// Stable external identifier tuple defining upsert identity.
///
/// For time-series facts the snapshot date is one of the parts, so a metric
/// row for a different day is a different record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NaturalKey(Vec<String>);

impl NaturalKey {
    pub fn new(parts: Vec<String>) -> Self {
        Self(parts)
    }

    pub fn parts(&self) -> &[String] {
        &self.0
    }

    /// Storage form used as the upsert conflict key.
    pub fn as_storage_key(&self) -> String {
        self.0.join("|")
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_storage_key())
    }
}

/// A record exactly as a connector returned it, tagged with its entity kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawRecord {
    pub entity: EntityKind,
    pub payload: serde_json::Value,
}

impl RawRecord {
    pub fn new(entity: EntityKind, payload: serde_json::Value) -> Self {
        Self { entity, payload }
    }
}

/// The canonical, store-ready shape of one entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub source: Source,
    pub entity: EntityKind,
    pub natural_key: NaturalKey,
    /// Set for time-series facts and accumulated snapshots; `None` for
    /// mutable entities keyed by external id alone.
    pub snapshot_date: Option<NaiveDate>,
    /// The source-reported attribute document at fetch time.
    pub attributes: serde_json::Value,
    pub fetched_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_kind_round_trip() {
        for source in Source::ALL {
            for entity in entities_for(source) {
                let parsed: EntityKind = entity.as_str().parse().unwrap();
                assert_eq!(parsed, *entity);
            }
        }
    }

    #[test]
    fn natural_key_storage_form_joins_parts() {
        let key = NaturalKey::new(vec!["2025-01-03".into(), "waterfall taps".into()]);
        assert_eq!(key.as_storage_key(), "2025-01-03|waterfall taps");
        assert_eq!(key.parts().len(), 2);
    }

    #[test]
    fn every_source_emits_at_least_one_entity() {
        for source in Source::ALL {
            assert!(!entities_for(source).is_empty());
        }
    }
}
