// src/clients/competitor.rs

use super::HttpFetcher;
use crate::context::RequestContext;
use crate::fetchable::{FetchError, Fetchable};
use crate::settings::ClientEndpoint;
use crate::types::Route;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Deserialize;

/// Competitor fares for one route, keyed by carrier code.
#[derive(Debug, Clone, PartialEq)]
pub struct CompetitorFares {
    pub fares: IndexMap<String, f64>,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CompetitorPayload {
    fares: IndexMap<String, f64>,
    as_of: DateTime<Utc>,
}

/// Client for the competitor fare aggregation service.
pub struct CompetitorClient {
    http: HttpFetcher,
}

impl CompetitorClient {
    pub fn new(endpoint: &ClientEndpoint, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(endpoint, api_key)?,
        })
    }
}

#[async_trait]
impl Fetchable for CompetitorClient {
    type Output = CompetitorFares;

    fn name(&self) -> &'static str {
        "competitor"
    }

    async fn fetch(
        &self,
        route: &Route,
        ctx: &RequestContext,
    ) -> Result<CompetitorFares, FetchError> {
        let payload: CompetitorPayload = self
            .http
            .get_json(&format!("v1/competitors/{route}"), ctx)
            .await?;
        for (carrier, fare) in &payload.fares {
            if !fare.is_finite() || *fare <= 0.0 {
                return Err(FetchError::BadData(format!(
                    "competitor fare for {carrier} is not a positive number: {fare}"
                )));
            }
        }
        Ok(CompetitorFares {
            fares: payload.fares,
            as_of: payload.as_of,
        })
    }
}
