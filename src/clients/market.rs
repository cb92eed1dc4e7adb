// src/clients/market.rs

use super::{ensure_in_range, ensure_positive, HttpFetcher};
use crate::context::RequestContext;
use crate::fetchable::{FetchError, Fetchable};
use crate::settings::ClientEndpoint;
use crate::types::Route;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Own-market statistics for one route.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketStats {
    pub average_fare: f64,
    pub booking_velocity: f64,
    /// Seats sold over seats offered, in [0, 1].
    pub load_factor: f64,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct MarketPayload {
    average_fare: f64,
    booking_velocity: f64,
    load_factor: f64,
    as_of: DateTime<Utc>,
}

/// Client for the internal market statistics service.
pub struct MarketClient {
    http: HttpFetcher,
}

impl MarketClient {
    pub fn new(endpoint: &ClientEndpoint, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(endpoint, api_key)?,
        })
    }
}

#[async_trait]
impl Fetchable for MarketClient {
    type Output = MarketStats;

    fn name(&self) -> &'static str {
        "market"
    }

    async fn fetch(&self, route: &Route, ctx: &RequestContext) -> Result<MarketStats, FetchError> {
        let payload: MarketPayload = self
            .http
            .get_json(&format!("v1/market/{route}"), ctx)
            .await?;
        Ok(MarketStats {
            average_fare: ensure_positive("average_fare", payload.average_fare)?,
            booking_velocity: ensure_in_range("booking_velocity", payload.booking_velocity, 0.0, f64::MAX)?,
            load_factor: ensure_in_range("load_factor", payload.load_factor, 0.0, 1.0)?,
            as_of: payload.as_of,
        })
    }
}
