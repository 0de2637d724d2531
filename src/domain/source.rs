//! Source identities and per-source sync profiles
//!
//! Each external API differs by an order of magnitude in history depth,
//! per-call window limits and rate limits, so tuning lives in an explicit
//! per-source profile instead of scattered constants.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Identity of an external data source.
///
/// Immutable: a source determines which connector and normalizer apply and
/// which entity kinds it may emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Storefront orders, customers, products and refunds
    Ecommerce,
    /// Paid advertising campaigns, ad groups and search terms
    AdPlatform,
    /// Email marketing campaigns and flow messages
    EmailMarketing,
    /// Shopping feed product/account statuses (current snapshot only)
    ShoppingFeed,
    /// Organic search queries and pages
    SearchConsole,
    /// Site analytics daily e-commerce totals
    WebAnalytics,
}

impl Source {
    /// All sources, in the order they are reported.
    pub const ALL: [Source; 6] = [
        Source::Ecommerce,
        Source::AdPlatform,
        Source::EmailMarketing,
        Source::ShoppingFeed,
        Source::SearchConsole,
        Source::WebAnalytics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Ecommerce => "ecommerce",
            Source::AdPlatform => "ad_platform",
            Source::EmailMarketing => "email_marketing",
            Source::ShoppingFeed => "shopping_feed",
            Source::SearchConsole => "search_console",
            Source::WebAnalytics => "web_analytics",
        }
    }

    /// Coarse category used by the per-source freshness table.
    pub fn category(&self) -> &'static str {
        match self {
            Source::Ecommerce => "ecommerce",
            Source::AdPlatform => "advertising",
            Source::EmailMarketing => "email",
            Source::ShoppingFeed => "feed",
            Source::SearchConsole => "seo",
            Source::WebAnalytics => "analytics",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ecommerce" => Ok(Source::Ecommerce),
            "ad_platform" => Ok(Source::AdPlatform),
            "email_marketing" => Ok(Source::EmailMarketing),
            "shopping_feed" => Ok(Source::ShoppingFeed),
            "search_console" => Ok(Source::SearchConsole),
            "web_analytics" => Ok(Source::WebAnalytics),
            other => Err(format!("unknown source: {other}")),
        }
    }
}

/// How a planned window sequence is traversed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraversalOrder {
    /// Historical backfills: a contiguous synced prefix survives interruption
    /// and resuming from the last good window stays well-defined.
    OldestFirst,
    /// Ad-hoc and daily syncs: fresh data lands first, so an interrupted run
    /// leaves the least staleness.
    NewestFirst,
}

/// How a source is synchronized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Bounded date windows over a historical query API.
    Windowed,
    /// The API exposes current state only; history is accumulated from a
    /// daily idempotent snapshot insert.
    SnapshotAccumulate,
}

/// Tuning knobs for one source.
///
/// Serialized forms use plain integers (milliseconds / seconds / days) so the
/// profile can live in the config file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceProfile {
    /// Largest `[start, end)` span a single connector call may cover, in days.
    pub max_window_days: u32,
    /// Delay between consecutive windows of one source.
    pub pacing_delay_ms: u64,
    /// Documented history depth of the API, if it has one.
    pub max_history_days: Option<u32>,
    /// Days the API lags behind real time; recent days inside the lag are
    /// not requested.
    pub freshness_lag_days: u32,
    /// Per-call timeout.
    pub request_timeout_seconds: u64,
    /// Request quota enforced on top of window pacing.
    pub max_requests_per_second: u32,
    pub mode: SyncMode,
}

impl SourceProfile {
    /// Built-in defaults tuned to each API's published limits.
    pub fn for_source(source: Source) -> Self {
        match source {
            // Full-history API with no meaningful per-call cap: one 365-day
            // window per year of backfill.
            Source::Ecommerce => Self {
                max_window_days: 365,
                pacing_delay_ms: 500,
                max_history_days: None,
                freshness_lag_days: 0,
                request_timeout_seconds: 60,
                max_requests_per_second: 2,
                mode: SyncMode::Windowed,
            },
            Source::AdPlatform => Self {
                max_window_days: 30,
                pacing_delay_ms: 1_000,
                max_history_days: Some(1_095),
                freshness_lag_days: 0,
                request_timeout_seconds: 60,
                max_requests_per_second: 5,
                mode: SyncMode::Windowed,
            },
            Source::EmailMarketing => Self {
                max_window_days: 30,
                pacing_delay_ms: 1_000,
                max_history_days: Some(730),
                freshness_lag_days: 0,
                request_timeout_seconds: 60,
                max_requests_per_second: 3,
                mode: SyncMode::Windowed,
            },
            // Current snapshot only; no window concept at all.
            Source::ShoppingFeed => Self {
                max_window_days: 1,
                pacing_delay_ms: 1_000,
                max_history_days: None,
                freshness_lag_days: 0,
                request_timeout_seconds: 60,
                max_requests_per_second: 2,
                mode: SyncMode::SnapshotAccumulate,
            },
            // 16 months of history, served with a 2-3 day reporting delay.
            Source::SearchConsole => Self {
                max_window_days: 14,
                pacing_delay_ms: 2_000,
                max_history_days: Some(480),
                freshness_lag_days: 3,
                request_timeout_seconds: 60,
                max_requests_per_second: 5,
                mode: SyncMode::Windowed,
            },
            Source::WebAnalytics => Self {
                max_window_days: 30,
                pacing_delay_ms: 1_000,
                max_history_days: Some(420),
                freshness_lag_days: 1,
                request_timeout_seconds: 60,
                max_requests_per_second: 5,
                mode: SyncMode::Windowed,
            },
        }
    }

    pub fn pacing_delay(&self) -> Duration {
        Duration::from_millis(self.pacing_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_string_round_trip() {
        for source in Source::ALL {
            let parsed: Source = source.as_str().parse().unwrap();
            assert_eq!(parsed, source);
        }
    }

    #[test]
    fn unknown_source_is_rejected() {
        assert!("fax_machine".parse::<Source>().is_err());
    }

    #[test]
    fn profiles_reflect_api_limits() {
        let gsc = SourceProfile::for_source(Source::SearchConsole);
        assert_eq!(gsc.max_window_days, 14);
        assert_eq!(gsc.max_history_days, Some(480));
        assert_eq!(gsc.freshness_lag_days, 3);

        let shop = SourceProfile::for_source(Source::Ecommerce);
        assert_eq!(shop.max_window_days, 365);
        assert_eq!(shop.max_history_days, None);

        let feed = SourceProfile::for_source(Source::ShoppingFeed);
        assert_eq!(feed.mode, SyncMode::SnapshotAccumulate);
    }

    #[test]
    fn pacing_and_timeout_conversions() {
        let profile = SourceProfile::for_source(Source::SearchConsole);
        assert_eq!(profile.pacing_delay(), Duration::from_secs(2));
        assert_eq!(profile.request_timeout(), Duration::from_secs(60));
    }
}
