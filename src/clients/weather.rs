// src/clients/weather.rs

use super::{ensure_in_range, HttpFetcher};
use crate::context::RequestContext;
use crate::fetchable::{FetchError, Fetchable};
use crate::settings::ClientEndpoint;
use crate::types::Route;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Disruption likelihood for a route, in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeatherImpact {
    pub impact: f64,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct WeatherPayload {
    impact: f64,
    as_of: DateTime<Utc>,
}

/// Client for the weather impact service.
pub struct WeatherClient {
    http: HttpFetcher,
}

impl WeatherClient {
    pub fn new(endpoint: &ClientEndpoint, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(endpoint, api_key)?,
        })
    }
}

#[async_trait]
impl Fetchable for WeatherClient {
    type Output = WeatherImpact;

    fn name(&self) -> &'static str {
        "weather"
    }

    async fn fetch(&self, route: &Route, ctx: &RequestContext) -> Result<WeatherImpact, FetchError> {
        let payload: WeatherPayload = self
            .http
            .get_json(&format!("v1/weather/impact/{route}"), ctx)
            .await?;
        Ok(WeatherImpact {
            impact: ensure_in_range("weather_impact", payload.impact, 0.0, 1.0)?,
            as_of: payload.as_of,
        })
    }
}
