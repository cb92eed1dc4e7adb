// src/fetchable.rs

//! # Fetchable
//!
//! The single capability every upstream data-source client implements. The
//! aggregator and the fallback engine only ever see `Fetchable` trait objects,
//! so a circuit breaker can front any client without knowing its payload type.
//!
//! Error classification matters more than the error message here: `Timeout`,
//! `Unavailable` and `BadData` count toward tripping the client's breaker,
//! `Cancelled` is neutral.

use crate::context::{ContextError, RequestContext};
use crate::types::Route;
use async_trait::async_trait;
use std::time::Duration;

/// Typed failure of one upstream fetch.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("bad payload: {0}")]
    BadData(String),

    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether this failure counts toward the protecting breaker's
    /// consecutive-failure threshold.
    pub fn counts_for_breaker(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }

    /// Metric label for the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Unavailable(_) => "unavailable",
            Self::BadData(_) => "bad_data",
            Self::Cancelled => "cancelled",
        }
    }
}

impl From<ContextError> for FetchError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::DeadlineExceeded => Self::Timeout(Duration::ZERO),
            ContextError::Cancelled => Self::Cancelled,
        }
    }
}

/// A bounded-latency fetcher for one upstream signal type.
///
/// Implementations must honor the context: return promptly once the deadline
/// passes or the request is cancelled. Callers must not assume freshness;
/// every payload carries its own timestamp where the upstream provides one.
#[async_trait]
pub trait Fetchable: Send + Sync {
    type Output: Clone + Send + Sync + 'static;

    /// Stable identifier used for breaker naming, metrics and logs.
    fn name(&self) -> &'static str;

    async fn fetch(&self, route: &Route, ctx: &RequestContext) -> Result<Self::Output, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_breaker_neutral() {
        assert!(!FetchError::Cancelled.counts_for_breaker());
        assert!(FetchError::Timeout(Duration::from_millis(800)).counts_for_breaker());
        assert!(FetchError::Unavailable("503".into()).counts_for_breaker());
        assert!(FetchError::BadData("truncated json".into()).counts_for_breaker());
    }
}
