//! End-to-end tests of the quote pipeline against scripted upstreams:
//! the happy path with exact breakdown figures, total upstream loss with
//! fallback, rate limiting, unknown routes, cache hits and cancellation.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use indexmap::IndexMap;
use skyfare_pricing::aggregator::{AggregatorClients, AggregatorConfig, MarketAggregator};
use skyfare_pricing::breaker::BreakerState;
use skyfare_pricing::clients::competitor::CompetitorFares;
use skyfare_pricing::clients::events::EventSignal;
use skyfare_pricing::clients::forecast::DemandForecast;
use skyfare_pricing::clients::fuel::FuelPrice;
use skyfare_pricing::clients::historical::HistoricalAverage;
use skyfare_pricing::clients::market::MarketStats;
use skyfare_pricing::clients::weather::WeatherImpact;
use skyfare_pricing::context::RequestContext;
use skyfare_pricing::errors::PricingError;
use skyfare_pricing::fallback::{FallbackConfig, FallbackEngine};
use skyfare_pricing::fetchable::{FetchError, Fetchable};
use skyfare_pricing::orchestrator::{OrchestratorConfig, PricingOrchestrator};
use skyfare_pricing::rate_limit::{QuoteRateLimiter, RateLimitConfig};
use skyfare_pricing::reference_price::ReferencePriceBook;
use skyfare_pricing::response_cache::QuoteCache;
use skyfare_pricing::route_store::RouteConfigStore;
use skyfare_pricing::settings::Breaker;
use skyfare_pricing::types::{
    BookingChannel, CustomerSegment, DeviceType, FallbackLayer, LoyaltyTier, PaymentMethod,
    PricingRequest, PricingResponse, Route, RouteCategory, RouteConfiguration, Season,
    TravelPurpose,
};
use skyfare_pricing::validation::RequestValidator;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const EPS: f64 = 1e-9;

/// Upstream stand-in with a settable outcome, an optional response delay and
/// a call counter.
struct Scripted<T: Clone + Send + Sync> {
    name: &'static str,
    result: Mutex<Result<T, FetchError>>,
    delay: Mutex<Duration>,
    calls: AtomicUsize,
}

impl<T: Clone + Send + Sync> Scripted<T> {
    fn new(name: &'static str, value: T) -> Arc<Self> {
        Arc::new(Self {
            name,
            result: Mutex::new(Ok(value)),
            delay: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        })
    }

    fn set_result(&self, result: Result<T, FetchError>) {
        *self.result.lock().unwrap() = result;
    }

    fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Fetchable for Scripted<T> {
    type Output = T;

    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(&self, _route: &Route, ctx: &RequestContext) -> Result<T, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            ctx.run(tokio::time::sleep(delay))
                .await
                .map_err(FetchError::from)?;
        }
        self.result.lock().unwrap().clone()
    }
}

struct Mocks {
    market: Arc<Scripted<MarketStats>>,
    competitor: Arc<Scripted<CompetitorFares>>,
    fuel: Arc<Scripted<FuelPrice>>,
    weather: Arc<Scripted<WeatherImpact>>,
    events: Arc<Scripted<EventSignal>>,
    forecast: Arc<Scripted<DemandForecast>>,
    historical: Arc<Scripted<HistoricalAverage>>,
}

impl Mocks {
    /// Scenario-1 market conditions: demand 0.7, fuel 82, weather 0.5,
    /// competitor mean 250, no events.
    fn scenario_one() -> Self {
        let as_of = Utc::now();
        Self {
            market: Scripted::new(
                "market",
                MarketStats {
                    average_fare: 310.0,
                    booking_velocity: 14.0,
                    load_factor: 0.8,
                    as_of,
                },
            ),
            competitor: Scripted::new(
                "competitor",
                CompetitorFares {
                    fares: IndexMap::from([
                        ("UA".to_string(), 250.0),
                        ("DL".to_string(), 250.0),
                    ]),
                    as_of,
                },
            ),
            fuel: Scripted::new("fuel", FuelPrice { price: 82.0, as_of }),
            weather: Scripted::new("weather", WeatherImpact { impact: 0.5, as_of }),
            events: Scripted::new(
                "events",
                EventSignal {
                    multiplier: 1.0,
                    as_of,
                },
            ),
            forecast: Scripted::new(
                "forecast",
                DemandForecast {
                    demand_index: 0.7,
                    seasonal_factor: 0.05,
                    as_of,
                },
            ),
            historical: Scripted::new(
                "historical",
                HistoricalAverage {
                    mean_fare: 330.0,
                    months: 12,
                    as_of,
                },
            ),
        }
    }

    fn take_all_live_down(&self) {
        let down = || FetchError::Unavailable("upstream down".into());
        self.market.set_result(Err(down()));
        self.competitor.set_result(Err(down()));
        self.fuel.set_result(Err(down()));
        self.weather.set_result(Err(down()));
        self.events.set_result(Err(down()));
        self.forecast.set_result(Err(down()));
    }

    fn live_calls(&self) -> usize {
        self.market.calls()
            + self.competitor.calls()
            + self.fuel.calls()
            + self.weather.calls()
            + self.events.calls()
            + self.forecast.calls()
    }
}

struct Harness {
    orchestrator: PricingOrchestrator,
    aggregator: Arc<MarketAggregator>,
    cache: Arc<QuoteCache>,
    mocks: Arc<Mocks>,
}

fn route_config(route: &Route) -> RouteConfiguration {
    // Every season carries the same factor so the expected +15 seasonal
    // adjustment holds no matter when the suite runs.
    let seasonality = IndexMap::from([
        (Season::Winter, 0.05),
        (Season::Spring, 0.05),
        (Season::Summer, 0.05),
        (Season::Autumn, 0.05),
    ]);
    RouteConfiguration {
        route: route.clone(),
        base_fare: 300.0,
        currency: "USD".to_string(),
        market_segment: "transcon_us".to_string(),
        category: RouteCategory::LongHaul,
        competitor_routes: vec!["UA:LAX-JFK".to_string(), "DL:LAX-JFK".to_string()],
        seasonality,
        demand_elasticity: 1.0,
        fuel_sensitivity: 0.5,
        max_variance: 0.3,
        min_margin: 0.1,
        class_multipliers: IndexMap::from([("Y".to_string(), 1.0), ("J".to_string(), 2.2)]),
        tax_rates: IndexMap::from([("US_TRANSPORT".to_string(), 0.075)]),
        fees: IndexMap::from([("SECURITY".to_string(), 5.6)]),
        updated_at: Utc::now(),
    }
}

fn harness_with(mocks: Mocks, burst: u32) -> Harness {
    let mocks = Arc::new(mocks);
    let route: Route = "LAX-JFK".parse().unwrap();
    let routes = Arc::new(RouteConfigStore::from_map(HashMap::from([(
        route.clone(),
        Arc::new(route_config(&route)),
    )])));

    let aggregator = Arc::new(MarketAggregator::new(
        AggregatorClients {
            market: mocks.market.clone(),
            competitor: mocks.competitor.clone(),
            fuel: mocks.fuel.clone(),
            weather: mocks.weather.clone(),
            events: mocks.events.clone(),
            forecast: mocks.forecast.clone(),
        },
        Breaker::default().to_config(),
        AggregatorConfig::default(),
    ));

    let mut fallback_config = FallbackConfig::default();
    fallback_config
        .regional_base_prices
        .insert("transcon_us".to_string(), 320.0);
    let fallback = Arc::new(FallbackEngine::new(
        mocks.historical.clone(),
        mocks.competitor.clone(),
        Breaker::default().to_config(),
        fallback_config,
    ));

    let cache = Arc::new(QuoteCache::new(256, 2));

    let orchestrator = PricingOrchestrator::new(
        RequestValidator::new(9, ["USD".to_string(), "EUR".to_string()]),
        routes,
        aggregator.clone(),
        cache.clone(),
        fallback,
        Arc::new(QuoteRateLimiter::new(&RateLimitConfig {
            window: Duration::from_secs(60),
            burst,
        })),
        Arc::new(ReferencePriceBook::default()),
        OrchestratorConfig::default(),
    );

    Harness {
        orchestrator,
        aggregator,
        cache,
        mocks,
    }
}

fn harness() -> Harness {
    harness_with(Mocks::scenario_one(), 100)
}

fn request(now: DateTime<Utc>) -> PricingRequest {
    PricingRequest {
        request_id: Uuid::new_v4(),
        route: "LAX-JFK".parse().unwrap(),
        departure: now + ChronoDuration::days(45),
        arrival: now + ChronoDuration::days(45) + ChronoDuration::hours(6),
        booking_class: "Y".to_string(),
        segment: CustomerSegment::Leisure,
        channel: BookingChannel::Ota,
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

fn ctx() -> (RequestContext, skyfare_pricing::context::CancelHandle) {
    RequestContext::with_timeout(Duration::from_secs(30))
}

/// The universal response invariants: bounds, margin floor and the exact sum
/// identity, fallback or not.
fn assert_invariants(response: &PricingResponse, config: &RouteConfiguration) {
    let b = &response.breakdown;
    let base = b.base_fare;
    assert!(
        b.subtotal - base * (1.0 + config.min_margin) >= -0.01,
        "margin floor violated: subtotal {} base {base}",
        b.subtotal
    );
    assert!(
        (b.subtotal - base).abs() <= base * config.max_variance + 0.01,
        "variance bound violated: subtotal {} base {base}",
        b.subtotal
    );
    assert!(
        (b.final_total - (b.subtotal + b.total_taxes + b.total_fees)).abs() < EPS,
        "final total must be subtotal plus taxes plus fees"
    );
    let identity = base + b.total_adjustments - b.total_discounts + b.bounds_adjustment;
    assert!(
        (b.subtotal - identity).abs() < EPS,
        "sum identity violated: subtotal {} identity {identity}",
        b.subtotal
    );
}

#[tokio::test]
async fn happy_path_economy_breakdown_is_exact() {
    let h = harness();
    let now = Utc::now();
    let (ctx, _cancel) = ctx();

    let response = h
        .orchestrator
        .quote(request(now), "client-a", &ctx)
        .await
        .unwrap();

    let b = &response.breakdown;
    assert!((b.adjustments.demand - 45.0).abs() < EPS);
    assert!((b.adjustments.seasonal - 15.0).abs() < EPS);
    assert!((b.adjustments.competitor + 15.0).abs() < EPS);
    assert!((b.adjustments.fuel - 1.0).abs() < EPS);
    assert_eq!(b.adjustments.event, 0.0);
    assert_eq!(b.adjustments.weather, 0.0);
    assert_eq!(b.adjustments.channel, 0.0);
    assert_eq!(b.adjustments.class, 0.0);
    assert!((b.discounts.loyalty - 15.0).abs() < EPS);
    assert!((b.discounts.advance - 30.0).abs() < EPS);
    assert_eq!(b.discounts.corporate, 0.0);
    assert_eq!(b.discounts.geo, 0.0);
    assert_eq!(b.discounts.group, 0.0);

    // Raw subtotal 301 sits below the 330 margin floor; the filter raises it
    // and records the correction.
    assert!((b.subtotal - 330.0).abs() < EPS);
    assert!((b.bounds_adjustment - 29.0).abs() < EPS);
    assert!((b.taxes["US_TRANSPORT"] - 24.75).abs() < EPS);
    assert!((b.fees["SECURITY"] - 5.6).abs() < EPS);
    assert!((b.final_total - 360.35).abs() < EPS);

    assert_eq!(response.demand_indicator.as_str(), "MEDIUM");
    assert_eq!(response.validity_seconds, 15 * 60);
    assert!(!response.cache_hit);
    assert!(!response.fallback_used);
    assert_eq!(response.fallback_layer, None);
    assert_invariants(&response, &route_config(&response.route));
}

#[tokio::test]
async fn all_upstreams_down_falls_back_to_historical() {
    let h = harness();
    h.mocks.take_all_live_down();
    let now = Utc::now();
    let (ctx, _cancel) = ctx();

    let response = h
        .orchestrator
        .quote(request(now), "client-b", &ctx)
        .await
        .unwrap();

    assert!(response.fallback_used);
    assert_eq!(response.fallback_layer, Some(FallbackLayer::HistoricalAverage));
    assert_eq!(response.fallback_markup, Some(1.0));
    assert!(response.validity_seconds >= 300);

    // Price stays within 15% of the primary-path answer for the same request.
    let primary_total = 360.35;
    let delta = (response.breakdown.final_total - primary_total).abs() / primary_total;
    assert!(
        delta <= 0.15,
        "fallback drifted {:.1}% from the primary price",
        delta * 100.0
    );
    assert_invariants(&response, &route_config(&response.route));
}

#[tokio::test]
async fn rate_limited_identity_gets_retry_hint_and_no_work_is_done() {
    let h = harness_with(Mocks::scenario_one(), 2);
    let now = Utc::now();
    let (ctx, _cancel) = ctx();

    for _ in 0..2 {
        h.orchestrator
            .quote(request(now), "hot-client", &ctx)
            .await
            .unwrap();
    }

    let calls_before = h.mocks.live_calls();
    let err = h
        .orchestrator
        .quote(request(now), "hot-client", &ctx)
        .await
        .unwrap_err();

    match err {
        PricingError::RateLimited { retry_after } => {
            assert!(retry_after > Duration::ZERO);
            assert!(retry_after <= Duration::from_secs(60));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }
    assert_eq!(h.mocks.live_calls(), calls_before, "denied requests do no work");
    for health in h.aggregator.health() {
        assert_eq!(health.breaker, BreakerState::Closed, "breakers untouched");
    }

    // A different identity is unaffected.
    assert!(h
        .orchestrator
        .quote(request(now), "cold-client", &ctx)
        .await
        .is_ok());
}

#[tokio::test]
async fn unknown_route_fails_fast_without_fallback_or_caching() {
    let h = harness();
    let now = Utc::now();
    let (ctx, _cancel) = ctx();

    let mut req = request(now);
    req.route = "SFO-ORD".parse().unwrap();
    let err = h.orchestrator.quote(req, "client-c", &ctx).await.unwrap_err();

    assert!(matches!(err, PricingError::UnknownRoute(_)));
    assert!(h.cache.is_empty(), "nothing cached");
    assert_eq!(h.mocks.historical.calls(), 0, "no fallback attempted");
    assert_eq!(h.mocks.live_calls(), 0, "no upstream fetches issued");
}

#[tokio::test]
async fn repeat_quote_inside_validity_is_a_cache_hit() {
    let h = harness();
    let now = Utc::now();
    let (ctx, _cancel) = ctx();

    let first = h
        .orchestrator
        .quote(request(now), "client-d", &ctx)
        .await
        .unwrap();
    let calls_after_first = h.mocks.live_calls();

    let second = h
        .orchestrator
        .quote(request(now), "client-d", &ctx)
        .await
        .unwrap();

    assert!(second.cache_hit);
    assert_eq!(
        h.mocks.live_calls(),
        calls_after_first,
        "no upstream fetches on a cache hit"
    );
    assert_eq!(first.breakdown, second.breakdown);
    // Byte-identical breakdowns, not merely approximately equal ones.
    assert_eq!(
        bincode::serialize(&first.breakdown).unwrap(),
        bincode::serialize(&second.breakdown).unwrap()
    );
    assert_eq!(first.request_id, second.request_id, "cached response is returned whole");
}

#[tokio::test(start_paused = true)]
async fn cancellation_mid_snapshot_aborts_promptly_without_side_effects() {
    let Harness {
        orchestrator,
        aggregator,
        cache,
        mocks,
    } = harness();
    // The competitor upstream hangs well past the point of cancellation.
    mocks.competitor.set_delay(Duration::from_secs(10));
    let now = Utc::now();
    let (ctx, cancel) = RequestContext::with_timeout(Duration::from_secs(30));

    let orchestrator_ctx = ctx.clone();
    let task = tokio::spawn(async move {
        orchestrator
            .quote(request(now), "client-e", &orchestrator_ctx)
            .await
    });

    // Let the snapshot fan-out start, then cancel 200ms in.
    tokio::time::sleep(Duration::from_millis(200)).await;
    let calls_at_cancel = mocks.live_calls();
    cancel.cancel();

    let result = task.await.unwrap();
    assert!(matches!(result, Err(PricingError::Cancelled)));
    assert_eq!(
        mocks.live_calls(),
        calls_at_cancel,
        "no new upstream fetches after cancellation"
    );
    assert!(cache.is_empty(), "no cache write for a cancelled request");
    for health in aggregator.health() {
        assert_eq!(health.breaker, BreakerState::Closed, "cancellation is breaker-neutral");
    }
}

#[tokio::test]
async fn degraded_snapshot_still_prices_without_fallback() {
    let h = harness();
    // Only the forecast survives; everything else is down.
    let down = || FetchError::Unavailable("down".into());
    h.mocks.market.set_result(Err(down()));
    h.mocks.competitor.set_result(Err(down()));
    h.mocks.fuel.set_result(Err(down()));
    h.mocks.weather.set_result(Err(down()));
    h.mocks.events.set_result(Err(down()));

    let now = Utc::now();
    let (ctx, _cancel) = ctx();
    let response = h
        .orchestrator
        .quote(request(now), "client-f", &ctx)
        .await
        .unwrap();

    assert!(!response.fallback_used, "partial snapshots stay on the primary path");
    // Missing signals contribute nothing: demand +45 and seasonal +15 remain,
    // competitor and fuel drop out.
    assert_eq!(response.breakdown.adjustments.competitor, 0.0);
    assert_eq!(response.breakdown.adjustments.fuel, 0.0);
    assert!((response.breakdown.adjustments.demand - 45.0).abs() < EPS);
    assert_invariants(&response, &route_config(&response.route));
}

#[tokio::test]
async fn responses_expire_and_reprice_after_validity() {
    let h = harness();
    let now = Utc::now();
    let (ctx, _cancel) = ctx();

    let first = h
        .orchestrator
        .quote(request(now), "client-g", &ctx)
        .await
        .unwrap();
    assert!(first.expires_at > first.quoted_at);
    let horizon = first.expires_at - first.quoted_at;
    assert_eq!(horizon.num_seconds(), first.validity_seconds as i64);
}
