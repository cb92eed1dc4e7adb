// src/clients/historical.rs

use super::{ensure_positive, HttpFetcher};
use crate::context::RequestContext;
use crate::fetchable::{FetchError, Fetchable};
use crate::settings::ClientEndpoint;
use crate::types::Route;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Rolling mean fare for a route over a trailing window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoricalAverage {
    pub mean_fare: f64,
    /// Months covered by the rolling window.
    pub months: u32,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct HistoricalPayload {
    mean_fare: f64,
    months: u32,
    as_of: DateTime<Utc>,
}

/// Client for the historical fare statistics service. Only consumed by the
/// fallback engine, never by the live aggregation path.
pub struct HistoricalClient {
    http: HttpFetcher,
}

impl HistoricalClient {
    pub fn new(endpoint: &ClientEndpoint, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(endpoint, api_key)?,
        })
    }
}

#[async_trait]
impl Fetchable for HistoricalClient {
    type Output = HistoricalAverage;

    fn name(&self) -> &'static str {
        "historical"
    }

    async fn fetch(
        &self,
        route: &Route,
        ctx: &RequestContext,
    ) -> Result<HistoricalAverage, FetchError> {
        let payload: HistoricalPayload = self
            .http
            .get_json(&format!("v1/history/{route}/average?months=12"), ctx)
            .await?;
        if payload.months == 0 {
            return Err(FetchError::BadData("historical window covers zero months".into()));
        }
        Ok(HistoricalAverage {
            mean_fare: ensure_positive("mean_fare", payload.mean_fare)?,
            months: payload.months,
            as_of: payload.as_of,
        })
    }
}
