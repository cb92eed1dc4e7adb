// src/fallback.rs

//! # Fallback Engine
//!
//! Ordered degradation strategies for when the primary pricing path cannot
//! produce a quote: historical average, competitor-based, regional pricing,
//! static matrix, and finally the emergency table, which is pure configuration
//! and never fails. Each strategy gets its own deadline; a strategy that
//! errors or times out simply hands over to the next one.
//!
//! Every fallback quote is pushed through the same bounds filter as a primary
//! quote, so the shape and the invariants of the response are identical, just
//! computed from coarser data. The chosen layer and, for the historical
//! strategy, the applied markup factor are recorded on the response.

use crate::bounds;
use crate::breaker::{BreakerConfig, Guarded};
use crate::calculator;
use crate::clients::competitor::CompetitorFares;
use crate::clients::historical::HistoricalAverage;
use crate::context::{ContextError, RequestContext};
use crate::errors::PricingError;
use crate::fetchable::Fetchable;
use crate::metrics;
use crate::types::{
    DemandIndicator, FallbackLayer, FareAdjustments, FareDiscounts, PriceBreakdown,
    PricingRequest, PricingResponse, PriceTrend, RouteCategory, RouteConfiguration,
};
use chrono::Utc;
use indexmap::IndexMap;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Fallback tunables plus the configured pricing tables for layers 3-5.
#[derive(Debug, Clone)]
pub struct FallbackConfig {
    pub historical_deadline: Duration,
    pub competitor_deadline: Duration,
    pub regional_deadline: Duration,
    pub static_deadline: Duration,
    pub emergency_deadline: Duration,
    /// Markup over the historical mean; recorded on the response.
    pub historical_markup: f64,
    pub competitor_adjustment_factor: f64,
    pub static_markup: f64,
    /// Floor for the validity of any fallback response.
    pub min_validity: Duration,
    /// Region base prices keyed by market segment.
    pub regional_base_prices: HashMap<String, f64>,
    /// Static route x class fare matrix.
    pub static_fares: HashMap<String, HashMap<String, f64>>,
    pub emergency_enabled: bool,
    pub emergency_base_prices: HashMap<RouteCategory, f64>,
    pub emergency_class_multipliers: HashMap<String, f64>,
}

impl From<&crate::settings::Fallback> for FallbackConfig {
    fn from(s: &crate::settings::Fallback) -> Self {
        // The config loader is case-insensitive and lowercases table keys;
        // route strings and class codes are uppercase everywhere else, so
        // normalize here once instead of at every lookup.
        let static_fares = s
            .static_fares
            .iter()
            .map(|(route, classes)| {
                (
                    route.to_ascii_uppercase(),
                    classes
                        .iter()
                        .map(|(class, fare)| (class.to_ascii_uppercase(), *fare))
                        .collect(),
                )
            })
            .collect();
        let emergency_class_multipliers = s
            .emergency
            .class_multipliers
            .iter()
            .map(|(class, multiplier)| (class.to_ascii_uppercase(), *multiplier))
            .collect();
        Self {
            historical_deadline: Duration::from_millis(s.historical_deadline_ms),
            competitor_deadline: Duration::from_millis(s.competitor_deadline_ms),
            regional_deadline: Duration::from_millis(s.regional_deadline_ms),
            static_deadline: Duration::from_millis(s.static_deadline_ms),
            emergency_deadline: Duration::from_millis(s.emergency_deadline_ms),
            historical_markup: s.historical_markup,
            competitor_adjustment_factor: s.competitor_adjustment_factor,
            static_markup: s.static_markup,
            min_validity: Duration::from_secs(s.min_validity_seconds),
            regional_base_prices: s.regional_base_prices.clone(),
            static_fares,
            emergency_enabled: s.emergency.enabled,
            emergency_base_prices: s.emergency.base_prices.clone(),
            emergency_class_multipliers,
        }
    }
}

impl Default for FallbackConfig {
    fn default() -> Self {
        (&crate::settings::Fallback::default()).into()
    }
}

/// One strategy's raw pricing decision before bounds and response assembly.
struct StrategyQuote {
    breakdown: PriceBreakdown,
    markup: Option<f64>,
    competitor_prices: IndexMap<String, f64>,
}

/// Ordered fallback strategies behind one `calculate` contract.
pub struct FallbackEngine {
    historical: Guarded<HistoricalAverage>,
    competitor: Guarded<CompetitorFares>,
    config: FallbackConfig,
}

impl FallbackEngine {
    pub fn new(
        historical: Arc<dyn Fetchable<Output = HistoricalAverage>>,
        competitor: Arc<dyn Fetchable<Output = CompetitorFares>>,
        breaker_config: BreakerConfig,
        config: FallbackConfig,
    ) -> Self {
        Self {
            historical: Guarded::new(historical, breaker_config.clone()),
            competitor: Guarded::new(competitor, breaker_config),
            config,
        }
    }

    /// Produce a quote by walking the strategy ladder. Succeeds as long as the
    /// emergency strategy is enabled; cancellation is checked before every
    /// strategy transition and aborts the whole ladder.
    pub async fn calculate(
        &self,
        request: &PricingRequest,
        route_config: &RouteConfiguration,
        ctx: &RequestContext,
    ) -> Result<PricingResponse, PricingError> {
        let started = Instant::now();
        let layers: [(FallbackLayer, Duration); 5] = [
            (FallbackLayer::HistoricalAverage, self.config.historical_deadline),
            (FallbackLayer::CompetitorBased, self.config.competitor_deadline),
            (FallbackLayer::RegionalPricing, self.config.regional_deadline),
            (FallbackLayer::StaticMatrix, self.config.static_deadline),
            (FallbackLayer::Emergency, self.config.emergency_deadline),
        ];

        for (layer, deadline) in layers {
            if ctx.is_cancelled() {
                return Err(PricingError::Cancelled);
            }
            let layer_started = Instant::now();
            let layer_ctx = ctx.child(deadline);
            let outcome = layer_ctx
                .run(self.run_layer(layer, request, route_config, &layer_ctx))
                .await;
            metrics::record_strategy_duration(layer.as_str(), layer_started.elapsed());

            match outcome {
                Ok(Ok(Some(quote))) => {
                    match self.assemble(request, route_config, quote, layer, started) {
                        Some(response) => {
                            metrics::increment_fallback_used(layer.as_str());
                            info!(
                                "fallback layer {} priced {} in {:?}",
                                layer.as_str(),
                                request.route,
                                layer_started.elapsed()
                            );
                            return Ok(response);
                        }
                        // A strategy that produced unboundable numbers counts
                        // as failed; hand over to the next layer.
                        None => continue,
                    }
                }
                Ok(Ok(None)) => continue,
                Ok(Err(err)) => {
                    warn!(
                        "fallback layer {} failed for {}: {err}",
                        layer.as_str(),
                        request.route
                    );
                    continue;
                }
                Err(ContextError::Cancelled) => return Err(PricingError::Cancelled),
                Err(ContextError::DeadlineExceeded) => {
                    warn!(
                        "fallback layer {} exceeded its {:?} deadline for {}",
                        layer.as_str(),
                        deadline,
                        request.route
                    );
                    continue;
                }
            }
        }

        Err(PricingError::ServiceUnavailable)
    }

    /// Dispatch one layer. `Ok(None)` means the layer is disabled or has no
    /// data for this route and the ladder should move on.
    async fn run_layer(
        &self,
        layer: FallbackLayer,
        request: &PricingRequest,
        route_config: &RouteConfiguration,
        ctx: &RequestContext,
    ) -> anyhow::Result<Option<StrategyQuote>> {
        match layer {
            FallbackLayer::HistoricalAverage => self.historical_quote(request, ctx).await,
            FallbackLayer::CompetitorBased => self.competitor_quote(request, ctx).await,
            FallbackLayer::RegionalPricing => Ok(self.regional_quote(request, route_config)),
            FallbackLayer::StaticMatrix => Ok(self.static_quote(request)),
            FallbackLayer::Emergency => Ok(self.emergency_quote(request, route_config)),
        }
    }

    /// Layer 1: 12-month rolling mean with the configured markup; only the
    /// static traveller discounts (advance, loyalty, group) apply.
    async fn historical_quote(
        &self,
        request: &PricingRequest,
        ctx: &RequestContext,
    ) -> anyhow::Result<Option<StrategyQuote>> {
        let average = self.historical.fetch(&request.route, ctx).await?;
        let base = average.mean_fare * self.config.historical_markup;
        let discounts = FareDiscounts {
            loyalty: calculator::loyalty_discount(request.loyalty_tier, base),
            corporate: 0.0,
            geo: 0.0,
            advance: calculator::advance_discount(
                request.advance_days_or_derived(Utc::now()),
                base,
            ),
            group: calculator::group_discount(request.group_size, base),
        };
        Ok(Some(StrategyQuote {
            breakdown: raw_breakdown(base, FareAdjustments::default(), discounts),
            markup: Some(self.config.historical_markup),
            competitor_prices: IndexMap::new(),
        }))
    }

    /// Layer 2: competitor mean times (1 + adjustment factor).
    async fn competitor_quote(
        &self,
        request: &PricingRequest,
        ctx: &RequestContext,
    ) -> anyhow::Result<Option<StrategyQuote>> {
        let fares = self.competitor.fetch(&request.route, ctx).await?;
        if fares.fares.is_empty() {
            return Ok(None);
        }
        let mean = fares.fares.values().sum::<f64>() / fares.fares.len() as f64;
        let base = mean * (1.0 + self.config.competitor_adjustment_factor);
        Ok(Some(StrategyQuote {
            breakdown: raw_breakdown(base, FareAdjustments::default(), FareDiscounts::default()),
            markup: None,
            competitor_prices: fares.fares,
        }))
    }

    /// Layer 3: region base price (keyed by market segment) plus the route's
    /// class adjustment.
    fn regional_quote(
        &self,
        request: &PricingRequest,
        route_config: &RouteConfiguration,
    ) -> Option<StrategyQuote> {
        let base = *self
            .config
            .regional_base_prices
            .get(&route_config.market_segment)?;
        let adjustments = FareAdjustments {
            class: calculator::class_adjustment(route_config, &request.booking_class, base),
            ..Default::default()
        };
        Some(StrategyQuote {
            breakdown: raw_breakdown(base, adjustments, FareDiscounts::default()),
            markup: None,
            competitor_prices: IndexMap::new(),
        })
    }

    /// Layer 4: static route x class fare times the configured markup.
    fn static_quote(&self, request: &PricingRequest) -> Option<StrategyQuote> {
        let base = *self
            .config
            .static_fares
            .get(&request.route.to_string())?
            .get(&request.booking_class)?
            * self.config.static_markup;
        Some(StrategyQuote {
            breakdown: raw_breakdown(base, FareAdjustments::default(), FareDiscounts::default()),
            markup: None,
            competitor_prices: IndexMap::new(),
        })
    }

    /// Layer 5: deterministic function of route category and class. Every
    /// lookup has a hardcoded default, so this cannot fail while enabled.
    fn emergency_quote(
        &self,
        request: &PricingRequest,
        route_config: &RouteConfiguration,
    ) -> Option<StrategyQuote> {
        if !self.config.emergency_enabled {
            return None;
        }
        let base = self
            .config
            .emergency_base_prices
            .get(&route_config.category)
            .copied()
            .unwrap_or(match route_config.category {
                RouteCategory::Regional => 200.0,
                RouteCategory::LongHaul => 500.0,
                RouteCategory::International => 800.0,
            });
        let multiplier = self
            .config
            .emergency_class_multipliers
            .get(&request.booking_class)
            .copied()
            .unwrap_or(1.0);
        let adjustments = FareAdjustments {
            class: (multiplier - 1.0) * base,
            ..Default::default()
        };
        Some(StrategyQuote {
            breakdown: raw_breakdown(base, adjustments, FareDiscounts::default()),
            markup: None,
            competitor_prices: IndexMap::new(),
        })
    }

    fn assemble(
        &self,
        request: &PricingRequest,
        route_config: &RouteConfiguration,
        mut quote: StrategyQuote,
        layer: FallbackLayer,
        started: Instant,
    ) -> Option<PricingResponse> {
        if let Err(err) = bounds::apply(&mut quote.breakdown, route_config, &request.currency) {
            warn!(
                "fallback layer {} produced an unboundable quote for {}: {err}",
                layer.as_str(),
                request.route
            );
            return None;
        }

        // No live demand signal on this path, so the indicator lands in the
        // lowest band and the validity floor keeps the quote honored for at
        // least five minutes.
        let indicator = DemandIndicator::from_index(None);
        let validity = bounds::validity_for(indicator).max(self.config.min_validity);
        let quoted_at = Utc::now();
        let final_total = quote.breakdown.final_total;

        Some(PricingResponse {
            request_id: request.request_id,
            route: request.route.clone(),
            currency: request.currency.clone(),
            dynamic_adjustments: quote.breakdown.adjustments.named(),
            competitor_prices: quote.competitor_prices,
            demand_indicator: indicator,
            price_trend: PriceTrend::Stable,
            validity_seconds: validity.as_secs(),
            recommended_price: final_total,
            cache_hit: false,
            fallback_used: true,
            fallback_layer: Some(layer),
            fallback_markup: quote.markup,
            quoted_at,
            expires_at: quoted_at
                + chrono::Duration::from_std(validity).unwrap_or_else(|_| chrono::Duration::zero()),
            processing_time_ms: started.elapsed().as_millis() as u64,
            breakdown: quote.breakdown,
        })
    }
}

fn raw_breakdown(
    base: f64,
    adjustments: FareAdjustments,
    discounts: FareDiscounts,
) -> PriceBreakdown {
    let total_adjustments = adjustments.total();
    let total_discounts = discounts.total();
    let subtotal = base + total_adjustments - total_discounts;
    PriceBreakdown {
        base_fare: base,
        adjustments,
        discounts,
        total_adjustments,
        total_discounts,
        bounds_adjustment: 0.0,
        subtotal,
        taxes: IndexMap::new(),
        fees: IndexMap::new(),
        total_taxes: 0.0,
        total_fees: 0.0,
        final_total: subtotal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetchable::FetchError;
    use crate::types::{
        BookingChannel, CustomerSegment, DeviceType, LoyaltyTier, PaymentMethod, Route,
        TravelPurpose,
    };
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use uuid::Uuid;

    struct DownHistorical;
    struct DownCompetitor;

    #[async_trait]
    impl Fetchable for DownHistorical {
        type Output = HistoricalAverage;

        fn name(&self) -> &'static str {
            "historical"
        }

        async fn fetch(
            &self,
            _route: &Route,
            _ctx: &RequestContext,
        ) -> Result<HistoricalAverage, FetchError> {
            Err(FetchError::Unavailable("down".into()))
        }
    }

    #[async_trait]
    impl Fetchable for DownCompetitor {
        type Output = CompetitorFares;

        fn name(&self) -> &'static str {
            "competitor"
        }

        async fn fetch(
            &self,
            _route: &Route,
            _ctx: &RequestContext,
        ) -> Result<CompetitorFares, FetchError> {
            Err(FetchError::Unavailable("down".into()))
        }
    }

    struct LiveHistorical(f64);

    #[async_trait]
    impl Fetchable for LiveHistorical {
        type Output = HistoricalAverage;

        fn name(&self) -> &'static str {
            "historical"
        }

        async fn fetch(
            &self,
            _route: &Route,
            _ctx: &RequestContext,
        ) -> Result<HistoricalAverage, FetchError> {
            Ok(HistoricalAverage {
                mean_fare: self.0,
                months: 12,
                as_of: Utc::now(),
            })
        }
    }

    fn route_config() -> RouteConfiguration {
        RouteConfiguration {
            route: "LAX-JFK".parse().unwrap(),
            base_fare: 300.0,
            currency: "USD".to_string(),
            market_segment: "domestic_us".to_string(),
            category: RouteCategory::LongHaul,
            competitor_routes: vec![],
            seasonality: IndexMap::new(),
            demand_elasticity: 1.0,
            fuel_sensitivity: 0.5,
            max_variance: 0.3,
            min_margin: 0.1,
            class_multipliers: IndexMap::new(),
            tax_rates: IndexMap::new(),
            fees: IndexMap::new(),
            updated_at: Utc::now(),
        }
    }

    fn request() -> PricingRequest {
        let now = Utc::now();
        PricingRequest {
            request_id: Uuid::new_v4(),
            route: "LAX-JFK".parse().unwrap(),
            departure: now + ChronoDuration::days(45),
            arrival: now + ChronoDuration::days(45) + ChronoDuration::hours(6),
            booking_class: "Y".to_string(),
            segment: CustomerSegment::Leisure,
            channel: BookingChannel::Direct,
            corporate_contract: None,
            loyalty_tier: LoyaltyTier::Silver,
            country: "US".to_string(),
            device: DeviceType::Desktop,
            advance_days: Some(45),
            purpose: TravelPurpose::Leisure,
            group_size: 1,
            payment: PaymentMethod::CreditCard,
            currency: "USD".to_string(),
        }
    }

    fn engine(
        historical: Arc<dyn Fetchable<Output = HistoricalAverage>>,
        config: FallbackConfig,
    ) -> FallbackEngine {
        FallbackEngine::new(
            historical,
            Arc::new(DownCompetitor),
            BreakerConfig::default(),
            config,
        )
    }

    #[tokio::test]
    async fn historical_layer_wins_when_available() {
        let engine = engine(Arc::new(LiveHistorical(320.0)), FallbackConfig::default());
        let (ctx, _handle) = RequestContext::with_timeout(std::time::Duration::from_secs(10));
        let response = engine
            .calculate(&request(), &route_config(), &ctx)
            .await
            .unwrap();

        assert!(response.fallback_used);
        assert_eq!(response.fallback_layer, Some(FallbackLayer::HistoricalAverage));
        assert_eq!(response.fallback_markup, Some(1.0));
        assert!(response.validity_seconds >= 300);
        // Advance (10%) and loyalty (5%) discounts apply to the 320 base,
        // then the margin floor raises the subtotal back to base*1.1.
        assert!((response.breakdown.base_fare - 320.0).abs() < 1e-9);
        assert!((response.breakdown.subtotal - 352.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn ladder_descends_to_emergency_when_everything_is_down() {
        let mut config = FallbackConfig::default();
        config.regional_base_prices.clear();
        config.static_fares.clear();
        let engine = engine(Arc::new(DownHistorical), config);
        let (ctx, _handle) = RequestContext::with_timeout(std::time::Duration::from_secs(10));
        let response = engine
            .calculate(&request(), &route_config(), &ctx)
            .await
            .unwrap();

        assert_eq!(response.fallback_layer, Some(FallbackLayer::Emergency));
        // Long-haul emergency base of 500 survives the bounds filter.
        assert!((response.breakdown.base_fare - 500.0).abs() < 1e-9);
        assert!((response.breakdown.subtotal - 550.0).abs() < 1e-9, "margin floor");
        assert!(response.validity_seconds >= 300);
    }

    #[tokio::test]
    async fn regional_layer_uses_market_segment_table() {
        let mut config = FallbackConfig::default();
        config
            .regional_base_prices
            .insert("domestic_us".to_string(), 280.0);
        let engine = engine(Arc::new(DownHistorical), config);
        let (ctx, _handle) = RequestContext::with_timeout(std::time::Duration::from_secs(10));
        let response = engine
            .calculate(&request(), &route_config(), &ctx)
            .await
            .unwrap();

        assert_eq!(response.fallback_layer, Some(FallbackLayer::RegionalPricing));
        assert!((response.breakdown.base_fare - 280.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn disabled_emergency_surfaces_service_unavailable() {
        let mut config = FallbackConfig::default();
        config.regional_base_prices.clear();
        config.static_fares.clear();
        config.emergency_enabled = false;
        let engine = engine(Arc::new(DownHistorical), config);
        let (ctx, _handle) = RequestContext::with_timeout(std::time::Duration::from_secs(10));
        assert!(matches!(
            engine.calculate(&request(), &route_config(), &ctx).await,
            Err(PricingError::ServiceUnavailable)
        ));
    }

    #[tokio::test]
    async fn cancellation_aborts_the_ladder() {
        let engine = engine(Arc::new(DownHistorical), FallbackConfig::default());
        let (ctx, handle) = RequestContext::with_timeout(std::time::Duration::from_secs(10));
        handle.cancel();
        assert!(matches!(
            engine.calculate(&request(), &route_config(), &ctx).await,
            Err(PricingError::Cancelled)
        ));
    }
}
