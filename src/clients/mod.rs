// src/clients/mod.rs

//! # Data-Source Clients
//!
//! Typed, bounded-latency fetchers for the upstream pricing signals. Each
//! client implements [`Fetchable`](crate::fetchable::Fetchable) for exactly
//! one payload type and classifies every failure as `Timeout`, `Unavailable`,
//! `BadData` or `Cancelled` so the fronting circuit breaker can count it
//! correctly.
//!
//! The shared [`HttpFetcher`] owns the reqwest client and applies the
//! per-call deadline: the effective timeout of one fetch is the minimum of
//! the configured client timeout and the remaining request budget.

/// Competitor fare scraper client.
pub mod competitor;
/// Live event calendar client.
pub mod events;
/// Demand forecasting service client.
pub mod forecast;
/// Fuel price index client.
pub mod fuel;
/// Historical fare statistics client.
pub mod historical;
/// Own-market statistics client.
pub mod market;
/// Weather impact service client.
pub mod weather;

use crate::context::RequestContext;
use crate::fetchable::FetchError;
use crate::settings::ClientEndpoint;
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use std::time::Duration;
use url::Url;

/// Shared HTTP plumbing for the JSON data-source clients.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base: Url,
    timeout: Duration,
    api_key: Option<String>,
}

impl HttpFetcher {
    pub fn new(endpoint: &ClientEndpoint, api_key: Option<String>) -> Result<Self> {
        let base = Url::parse(&endpoint.url)
            .with_context(|| format!("invalid client base url {}", endpoint.url))?;
        let client = reqwest::Client::builder()
            .timeout(endpoint.timeout())
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base,
            timeout: endpoint.timeout(),
            api_key,
        })
    }

    /// GET `path` relative to the base URL and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        ctx: &RequestContext,
    ) -> Result<T, FetchError> {
        let url = self
            .base
            .join(path)
            .map_err(|e| FetchError::BadData(format!("bad request path {path}: {e}")))?;

        let budget = self.timeout.min(ctx.remaining());
        if budget.is_zero() {
            return Err(FetchError::Timeout(self.timeout));
        }

        let mut request = self.client.get(url).timeout(budget);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = ctx
            .run(request.send())
            .await
            .map_err(FetchError::from)?
            .map_err(|e| classify_reqwest_error(e, self.timeout))?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(FetchError::Unavailable(format!("upstream returned {status}")));
        }
        if !status.is_success() {
            return Err(FetchError::BadData(format!("upstream returned {status}")));
        }

        ctx.run(response.json::<T>())
            .await
            .map_err(FetchError::from)?
            .map_err(|e| FetchError::BadData(format!("undecodable payload: {e}")))
    }
}

fn classify_reqwest_error(err: reqwest::Error, timeout: Duration) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(timeout)
    } else if err.is_connect() || err.is_request() {
        FetchError::Unavailable(err.to_string())
    } else if err.is_decode() || err.is_body() {
        FetchError::BadData(err.to_string())
    } else {
        FetchError::Unavailable(err.to_string())
    }
}

/// Reject signals the upstream should never produce; a payload outside its
/// documented range counts as `BadData` for the breaker.
fn ensure_in_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<f64, FetchError> {
    if !value.is_finite() || value < min || value > max {
        return Err(FetchError::BadData(format!(
            "{field} out of range: {value} not in [{min}, {max}]"
        )));
    }
    Ok(value)
}

fn ensure_positive(field: &'static str, value: f64) -> Result<f64, FetchError> {
    if !value.is_finite() || value <= 0.0 {
        return Err(FetchError::BadData(format!("{field} must be positive, got {value}")));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_checks_reject_nan_and_out_of_band() {
        assert!(ensure_in_range("demand_index", 0.5, 0.0, 1.0).is_ok());
        assert!(ensure_in_range("demand_index", -0.1, 0.0, 1.0).is_err());
        assert!(ensure_in_range("demand_index", f64::NAN, 0.0, 1.0).is_err());
        assert!(ensure_positive("average_fare", 300.0).is_ok());
        assert!(ensure_positive("average_fare", 0.0).is_err());
    }
}
