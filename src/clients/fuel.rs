// src/clients/fuel.rs

use super::{ensure_positive, HttpFetcher};
use crate::context::RequestContext;
use crate::fetchable::{FetchError, Fetchable};
use crate::settings::ClientEndpoint;
use crate::types::Route;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Jet fuel price in canonical units. Route-independent; the route parameter
/// of the fetch contract is ignored.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuelPrice {
    pub price: f64,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct FuelPayload {
    price: f64,
    as_of: DateTime<Utc>,
}

/// Client for the fuel price index.
pub struct FuelClient {
    http: HttpFetcher,
}

impl FuelClient {
    pub fn new(endpoint: &ClientEndpoint, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(endpoint, api_key)?,
        })
    }
}

#[async_trait]
impl Fetchable for FuelClient {
    type Output = FuelPrice;

    fn name(&self) -> &'static str {
        "fuel"
    }

    async fn fetch(&self, _route: &Route, ctx: &RequestContext) -> Result<FuelPrice, FetchError> {
        let payload: FuelPayload = self.http.get_json("v1/fuel/current", ctx).await?;
        Ok(FuelPrice {
            price: ensure_positive("fuel_price", payload.price)?,
            as_of: payload.as_of,
        })
    }
}
