// src/errors.rs

use crate::types::Route;
use std::time::Duration;

/// One field that failed request validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Client-visible outcome when a quote cannot be produced.
///
/// `Validation` and `UnknownRoute` are caller mistakes and never trigger
/// fallback. `RateLimited` carries the retry hint. `ServiceUnavailable` is
/// only reachable when the emergency fallback strategy is disabled.
#[derive(Debug, thiserror::Error)]
pub enum PricingError {
    #[error("request validation failed: {}", format_fields(.0))]
    Validation(Vec<FieldError>),

    #[error("unknown route {0}")]
    UnknownRoute(Route),

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("pricing service unavailable")]
    ServiceUnavailable,

    #[error("request cancelled")]
    Cancelled,
}

fn format_fields(fields: &[FieldError]) -> String {
    fields
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl PricingError {
    /// Metric label for the error class.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::UnknownRoute(_) => "unknown_route",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServiceUnavailable => "service_unavailable",
            Self::Cancelled => "cancelled",
        }
    }
}
