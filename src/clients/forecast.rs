// src/clients/forecast.rs

use super::{ensure_in_range, HttpFetcher};
use crate::context::RequestContext;
use crate::fetchable::{FetchError, Fetchable};
use crate::settings::ClientEndpoint;
use crate::types::Route;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Output of the demand forecasting service for one route.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemandForecast {
    /// Demand index in [0, 1].
    pub demand_index: f64,
    /// Model-derived seasonal factor for the departure window.
    pub seasonal_factor: f64,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct ForecastPayload {
    demand_index: f64,
    seasonal_factor: f64,
    as_of: DateTime<Utc>,
}

/// Client for the demand forecasting service.
pub struct ForecastClient {
    http: HttpFetcher,
}

impl ForecastClient {
    pub fn new(endpoint: &ClientEndpoint, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(endpoint, api_key)?,
        })
    }
}

#[async_trait]
impl Fetchable for ForecastClient {
    type Output = DemandForecast;

    fn name(&self) -> &'static str {
        "forecast"
    }

    async fn fetch(
        &self,
        route: &Route,
        ctx: &RequestContext,
    ) -> Result<DemandForecast, FetchError> {
        let payload: ForecastPayload = self
            .http
            .get_json(&format!("v1/forecast/{route}"), ctx)
            .await?;
        if !payload.seasonal_factor.is_finite() {
            return Err(FetchError::BadData(format!(
                "seasonal factor is not finite: {}",
                payload.seasonal_factor
            )));
        }
        Ok(DemandForecast {
            demand_index: ensure_in_range("demand_index", payload.demand_index, 0.0, 1.0)?,
            seasonal_factor: payload.seasonal_factor,
            as_of: payload.as_of,
        })
    }
}
