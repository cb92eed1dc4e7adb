// src/clients/events.rs

use super::HttpFetcher;
use crate::context::RequestContext;
use crate::fetchable::{FetchError, Fetchable};
use crate::settings::ClientEndpoint;
use crate::types::Route;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Demand uplift from events near the destination. The multiplier is 1.0 when
/// nothing noteworthy is happening and only ever grows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventSignal {
    pub multiplier: f64,
    pub as_of: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct EventsPayload {
    multiplier: f64,
    as_of: DateTime<Utc>,
}

/// Client for the events calendar service.
pub struct EventsClient {
    http: HttpFetcher,
}

impl EventsClient {
    pub fn new(endpoint: &ClientEndpoint, api_key: Option<String>) -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(endpoint, api_key)?,
        })
    }
}

#[async_trait]
impl Fetchable for EventsClient {
    type Output = EventSignal;

    fn name(&self) -> &'static str {
        "events"
    }

    async fn fetch(&self, route: &Route, ctx: &RequestContext) -> Result<EventSignal, FetchError> {
        let payload: EventsPayload = self
            .http
            .get_json(&format!("v1/events/{route}"), ctx)
            .await?;
        if !payload.multiplier.is_finite() || payload.multiplier < 1.0 {
            return Err(FetchError::BadData(format!(
                "event multiplier must be >= 1.0, got {}",
                payload.multiplier
            )));
        }
        Ok(EventSignal {
            multiplier: payload.multiplier,
            as_of: payload.as_of,
        })
    }
}
