//! Connector contract
//!
//! A connector adapts one external API to a uniform fetch interface. The
//! engine treats connectors as opaque capabilities: it never sees transport
//! details, only source-native records or one of three failure signals.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::record::RawRecord;
use crate::domain::source::Source;
use crate::domain::window::SyncWindow;

/// Failure signals a connector may raise.
///
/// Rate limiting is the only signal with engine-level retry semantics; the
/// other variants all become the window's failure. Display forms start with
/// a stable taxonomy label so run summaries stay grep-able.
#[derive(Debug, Error, Clone)]
pub enum ConnectorError {
    /// The source API is throttling; retry after pacing (optionally hinted).
    #[error("rate_limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Network failure, 5xx, malformed response or anything else transient.
    #[error("transient_error{}", fmt_detail(.0))]
    Transient(String),

    /// Credentials rejected. Likely affects every window of the source, but
    /// windows are still attempted uniformly.
    #[error("auth_error{}", fmt_detail(.0))]
    Auth(String),
}

fn fmt_detail(detail: &str) -> String {
    if detail.is_empty() {
        String::new()
    } else {
        format!(": {detail}")
    }
}

impl ConnectorError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, ConnectorError::RateLimited { .. })
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, ConnectorError::Auth(_))
    }
}

/// Uniform fetch capability over one external API.
#[async_trait]
pub trait Connector: Send + Sync {
    fn source(&self) -> Source;

    /// Fetch all records the source reports for the half-open window.
    async fn fetch(&self, window: &SyncWindow) -> Result<Vec<RawRecord>, ConnectorError>;

    /// Fetch the source's current state. Only meaningful for
    /// snapshot-accumulate sources; the default refuses.
    async fn fetch_snapshot(&self) -> Result<Vec<RawRecord>, ConnectorError> {
        Err(ConnectorError::Transient(format!(
            "source {} does not support snapshot fetches",
            self.source()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_labels_are_stable() {
        let rate = ConnectorError::RateLimited { retry_after: None };
        assert_eq!(rate.to_string(), "rate_limited");

        let transient = ConnectorError::Transient(String::new());
        assert_eq!(transient.to_string(), "transient_error");

        let transient = ConnectorError::Transient("connection reset".into());
        assert_eq!(transient.to_string(), "transient_error: connection reset");

        let auth = ConnectorError::Auth("token expired".into());
        assert_eq!(auth.to_string(), "auth_error: token expired");
    }

    #[test]
    fn classification_helpers() {
        assert!(
            ConnectorError::RateLimited {
                retry_after: Some(Duration::from_secs(30))
            }
            .is_rate_limited()
        );
        assert!(ConnectorError::Auth("nope".into()).is_auth());
        assert!(!ConnectorError::Transient("x".into()).is_rate_limited());
    }
}
