//! # Pricing Orchestrator
//!
//! The request handler behind the single `quote` operation. One call walks
//! the per-request state machine:
//!
//! ```text
//! RECEIVED -> RATE_CHECK -> VALIDATED -> CACHE_LOOKUP
//!   hit  -> FINALIZED (cache_hit)
//!   miss -> SNAPSHOT -> CALCULATE -> BOUNDS -> CACHE_STORE -> FINALIZED
//!           (degraded snapshot or compute failure) -> FALLBACK -> FINALIZED
//! ```
//!
//! Validation failures and unknown routes surface immediately and never fall
//! back. A degraded snapshot still runs the calculator unless every field is
//! missing; only a fully-missing snapshot or a compute failure hands the
//! request to the fallback engine. The orchestrator never retries a primary
//! failure; the next attempt is always the fallback.

use crate::aggregator::MarketAggregator;
use crate::bounds;
use crate::calculator;
use crate::context::RequestContext;
use crate::errors::PricingError;
use crate::fallback::FallbackEngine;
use crate::metrics;
use crate::rate_limit::QuoteRateLimiter;
use crate::reference_price::ReferencePriceBook;
use crate::response_cache::{QuoteCache, QuoteKey};
use crate::route_store::RouteConfigStore;
use crate::types::{
    DemandIndicator, MarketSnapshot, PriceTrend, PricingRequest, PricingResponse,
    RouteConfiguration,
};
use crate::validation::RequestValidator;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info_span, warn, Instrument};

/// Orchestrator timing knobs, distilled from the server settings section.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Soft deadline for the snapshot phase; past it, fallback beats waiting.
    pub soft_deadline: Duration,
    /// Budget reserved for bounds, cache store and response assembly.
    pub finalize_reserve: Duration,
    /// Deadline for the detached cache store after cancellation.
    pub store_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            soft_deadline: Duration::from_millis(2_500),
            finalize_reserve: Duration::from_millis(300),
            store_timeout: Duration::from_millis(50),
        }
    }
}

/// Coordinates rate limiting, validation, caching, aggregation, calculation,
/// post-processing and fallback for quote requests. All collaborators are
/// injected at construction; nothing on the request path reaches for process
/// globals.
pub struct PricingOrchestrator {
    validator: RequestValidator,
    routes: Arc<RouteConfigStore>,
    aggregator: Arc<MarketAggregator>,
    cache: Arc<QuoteCache>,
    fallback: Arc<FallbackEngine>,
    limiter: Arc<QuoteRateLimiter>,
    reference: Arc<ReferencePriceBook>,
    config: OrchestratorConfig,
}

impl PricingOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        validator: RequestValidator,
        routes: Arc<RouteConfigStore>,
        aggregator: Arc<MarketAggregator>,
        cache: Arc<QuoteCache>,
        fallback: Arc<FallbackEngine>,
        limiter: Arc<QuoteRateLimiter>,
        reference: Arc<ReferencePriceBook>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            validator,
            routes,
            aggregator,
            cache,
            fallback,
            limiter,
            reference,
            config,
        }
    }

    /// Produce a quote for `request`, attributed to `identity` for admission
    /// control. The context carries the request deadline and cancellation.
    pub async fn quote(
        &self,
        request: PricingRequest,
        identity: &str,
        ctx: &RequestContext,
    ) -> Result<PricingResponse, PricingError> {
        let started = Instant::now();
        let span = info_span!(
            "quote",
            route = %request.route,
            request_id = %request.request_id
        );
        let result = self
            .quote_inner(&request, identity, ctx, started)
            .instrument(span)
            .await;

        metrics::record_request_duration(started.elapsed());
        match &result {
            Ok(_) => metrics::increment_quote_request("ok"),
            Err(err) => metrics::increment_quote_request(err.kind()),
        }
        result
    }

    async fn quote_inner(
        &self,
        request: &PricingRequest,
        identity: &str,
        ctx: &RequestContext,
        started: Instant,
    ) -> Result<PricingResponse, PricingError> {
        // RATE_CHECK: denied requests do no work at all.
        if let Err(retry_after) = self.limiter.check(identity) {
            debug!("rate limited identity {identity}, retry after {retry_after:?}");
            return Err(PricingError::RateLimited { retry_after });
        }

        // VALIDATED: field problems and unknown routes surface immediately.
        let now = Utc::now();
        let route_config = self.validator.validate(request, &self.routes, now)?;

        if ctx.is_cancelled() {
            return Err(PricingError::Cancelled);
        }

        // CACHE_LOOKUP: a live entry short-circuits the whole pipeline.
        let key = QuoteKey::from_request(request, now);
        if let Some(mut cached) = self.cache.get(&key, now).await {
            cached.cache_hit = true;
            debug!("cache hit for {}", request.route);
            return Ok(cached);
        }

        if ctx.is_cancelled() {
            return Err(PricingError::Cancelled);
        }

        // SNAPSHOT: bounded by the soft deadline and the finalize reserve.
        let snapshot_budget = self
            .config
            .soft_deadline
            .min(ctx.remaining().saturating_sub(self.config.finalize_reserve));
        let snapshot = self
            .aggregator
            .snapshot(&request.route, &ctx.child(snapshot_budget))
            .await;

        if ctx.is_cancelled() {
            return Err(PricingError::Cancelled);
        }

        // CALCULATE + BOUNDS, with the fallback edge on any failure.
        match self.primary_quote(request, &route_config, &snapshot, started) {
            Some(response) => {
                if ctx.is_cancelled() {
                    // Best effort on a detached task; the caller is gone but
                    // the next identical request can still hit the cache.
                    self.spawn_detached_store(key, response);
                    return Err(PricingError::Cancelled);
                }
                let validity = Duration::from_secs(response.validity_seconds);
                self.cache.set(&key, &response, validity, now).await;
                self.reference.observe(&request.route, response.breakdown.final_total);
                Ok(response)
            }
            None => {
                let response = self.fallback.calculate(request, &route_config, ctx).await?;
                Ok(self.with_trend(response))
            }
        }
    }

    /// The pure compute leg: calculator then bounds then response assembly.
    /// `None` means the snapshot was unusable or an invariant broke, and the
    /// fallback engine owns the request from here.
    fn primary_quote(
        &self,
        request: &PricingRequest,
        route_config: &RouteConfiguration,
        snapshot: &MarketSnapshot,
        started: Instant,
    ) -> Option<PricingResponse> {
        if snapshot.fully_missing() {
            debug!("snapshot fully missing for {}, falling back", request.route);
            return None;
        }

        let now = Utc::now();
        let mut breakdown = match calculator::price(request, route_config, snapshot, now) {
            Ok(breakdown) => breakdown,
            Err(err) => {
                warn!("calculator failure for {}: {err}", request.route);
                metrics::increment_correctness_alert("calculator");
                return None;
            }
        };
        if let Err(err) = bounds::apply(&mut breakdown, route_config, &request.currency) {
            warn!("bounds failure for {}: {err}", request.route);
            metrics::increment_correctness_alert("bounds");
            return None;
        }

        let indicator = DemandIndicator::from_index(snapshot.demand_index.value_copied());
        let validity = bounds::validity_for(indicator);
        let trend = PriceTrend::versus_reference(
            breakdown.final_total,
            self.reference.get(&request.route),
        );

        Some(PricingResponse {
            request_id: request.request_id,
            route: request.route.clone(),
            currency: request.currency.clone(),
            dynamic_adjustments: breakdown.adjustments.named(),
            competitor_prices: snapshot
                .competitor_fares
                .value()
                .cloned()
                .unwrap_or_default(),
            demand_indicator: indicator,
            price_trend: trend,
            validity_seconds: validity.as_secs(),
            recommended_price: breakdown.final_total,
            cache_hit: false,
            fallback_used: false,
            fallback_layer: None,
            fallback_markup: None,
            quoted_at: now,
            expires_at: now
                + chrono::Duration::from_std(validity).unwrap_or_else(|_| chrono::Duration::zero()),
            processing_time_ms: started.elapsed().as_millis() as u64,
            breakdown,
        })
    }

    /// Re-derive the price trend for a fallback response against the rolling
    /// reference; the engine itself has no view of the reference book.
    fn with_trend(&self, mut response: PricingResponse) -> PricingResponse {
        response.price_trend = PriceTrend::versus_reference(
            response.breakdown.final_total,
            self.reference.get(&response.route),
        );
        response
    }

    fn spawn_detached_store(&self, key: QuoteKey, response: PricingResponse) {
        let cache = Arc::clone(&self.cache);
        let store_timeout = self.config.store_timeout;
        tokio::spawn(async move {
            let detached = RequestContext::detached(store_timeout);
            let validity = Duration::from_secs(response.validity_seconds);
            let _ = detached
                .run(cache.set(&key, &response, validity, Utc::now()))
                .await;
        });
    }

    /// Breaker states of every upstream client, for health endpoints.
    pub fn upstream_health(&self) -> Vec<crate::aggregator::ClientHealth> {
        self.aggregator.health()
    }
}
