// src/aggregator.rs

//! # Market Aggregator
//!
//! Fans out all data-source fetches for one route concurrently under a single
//! shared budget and merges whatever arrives into a [`MarketSnapshot`].
//!
//! The contract is that `snapshot` always returns: individual upstream
//! failures degrade the affected fields to STALE (served from the per-route
//! last-good cache) or MISSING, never the whole call. A snapshot with every
//! field missing is the orchestrator's signal to fall back.

use crate::breaker::{BreakerConfig, BreakerState, Guarded};
use crate::clients::competitor::CompetitorFares;
use crate::clients::events::EventSignal;
use crate::clients::forecast::DemandForecast;
use crate::clients::fuel::FuelPrice;
use crate::clients::market::MarketStats;
use crate::clients::weather::WeatherImpact;
use crate::context::RequestContext;
use crate::fetchable::{FetchError, Fetchable};
use crate::metrics;
use crate::types::{MarketSnapshot, Route, Signal};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::debug;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Aggregation tunables.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Shared deadline for the whole fan-out.
    pub budget: Duration,
    /// Age past which a last-good value stops being served as STALE.
    pub stale_after: Duration,
    /// Bound on concurrent upstream calls across all in-flight snapshots.
    pub max_concurrent_fetches: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            budget: Duration::from_millis(1_200),
            stale_after: Duration::from_secs(900),
            max_concurrent_fetches: 24,
        }
    }
}

/// The six live upstream clients, injected so tests and the demo binary can
/// swap in their own implementations.
pub struct AggregatorClients {
    pub market: Arc<dyn Fetchable<Output = MarketStats>>,
    pub competitor: Arc<dyn Fetchable<Output = CompetitorFares>>,
    pub fuel: Arc<dyn Fetchable<Output = FuelPrice>>,
    pub weather: Arc<dyn Fetchable<Output = WeatherImpact>>,
    pub events: Arc<dyn Fetchable<Output = EventSignal>>,
    pub forecast: Arc<dyn Fetchable<Output = DemandForecast>>,
}

#[derive(Clone, Default)]
struct LastGood {
    market: Option<(MarketStats, Instant)>,
    competitor: Option<(CompetitorFares, Instant)>,
    fuel: Option<(FuelPrice, Instant)>,
    weather: Option<(WeatherImpact, Instant)>,
    events: Option<(EventSignal, Instant)>,
    forecast: Option<(DemandForecast, Instant)>,
}

/// Breaker state of one upstream client, for operational introspection.
#[derive(Debug, Clone)]
pub struct ClientHealth {
    pub client: &'static str,
    pub breaker: BreakerState,
}

/// Merges concurrent client fetches into per-request market snapshots.
pub struct MarketAggregator {
    market: Guarded<MarketStats>,
    competitor: Guarded<CompetitorFares>,
    fuel: Guarded<FuelPrice>,
    weather: Guarded<WeatherImpact>,
    events: Guarded<EventSignal>,
    forecast: Guarded<DemandForecast>,
    last_good: DashMap<Route, LastGood>,
    fan_out: Arc<Semaphore>,
    config: AggregatorConfig,
}

/// Outcome of one client fetch after last-good reconciliation.
enum Resolved<T> {
    Fresh(T),
    Stale(T, DateTime<Utc>),
    Missing,
}

impl MarketAggregator {
    pub fn new(
        clients: AggregatorClients,
        breaker_config: BreakerConfig,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            market: Guarded::new(clients.market, breaker_config.clone()),
            competitor: Guarded::new(clients.competitor, breaker_config.clone()),
            fuel: Guarded::new(clients.fuel, breaker_config.clone()),
            weather: Guarded::new(clients.weather, breaker_config.clone()),
            events: Guarded::new(clients.events, breaker_config.clone()),
            forecast: Guarded::new(clients.forecast, breaker_config),
            last_good: DashMap::new(),
            fan_out: Arc::new(Semaphore::new(config.max_concurrent_fetches.max(1))),
            config,
        }
    }

    /// Assemble a snapshot for `route`. Always returns; the caller decides
    /// what a fully-missing snapshot means.
    pub async fn snapshot(&self, route: &Route, ctx: &RequestContext) -> MarketSnapshot {
        let started = Instant::now();
        let budget = self.config.budget.min(ctx.remaining());
        let fan_ctx = ctx.child(budget);

        let (market, competitor, fuel, weather, events, forecast) = tokio::join!(
            self.fetch_one(&self.market, route, &fan_ctx),
            self.fetch_one(&self.competitor, route, &fan_ctx),
            self.fetch_one(&self.fuel, route, &fan_ctx),
            self.fetch_one(&self.weather, route, &fan_ctx),
            self.fetch_one(&self.events, route, &fan_ctx),
            self.fetch_one(&self.forecast, route, &fan_ctx),
        );

        {
            // Reconcile each result against the last-good entry for the route.
            let mut entry = self.last_good.entry(route.clone()).or_default();
            let market = reconcile(market, &mut entry.market, self.config.stale_after);
            let competitor = reconcile(competitor, &mut entry.competitor, self.config.stale_after);
            let fuel = reconcile(fuel, &mut entry.fuel, self.config.stale_after);
            let weather = reconcile(weather, &mut entry.weather, self.config.stale_after);
            let events = reconcile(events, &mut entry.events, self.config.stale_after);
            let forecast = reconcile(forecast, &mut entry.forecast, self.config.stale_after);
            drop(entry);

            let now = Utc::now();
            let snapshot = MarketSnapshot {
                route: route.clone(),
                average_fare: field(&market, "average_fare", now, |m| m.average_fare, |m| m.as_of),
                booking_velocity: field(&market, "booking_velocity", now, |m| m.booking_velocity, |m| m.as_of),
                load_factor: field(&market, "load_factor", now, |m| m.load_factor, |m| m.as_of),
                competitor_fares: field(&competitor, "competitor_fares", now, |c| c.fares.clone(), |c| c.as_of),
                fuel_price: field(&fuel, "fuel_price", now, |f| f.price, |f| f.as_of),
                weather_impact: field(&weather, "weather_impact", now, |w| w.impact, |w| w.as_of),
                event_multiplier: field(&events, "event_multiplier", now, |e| e.multiplier, |e| e.as_of),
                demand_index: field(&forecast, "demand_index", now, |f| f.demand_index, |f| f.as_of),
                seasonal_factor: field(&forecast, "seasonal_factor", now, |f| f.seasonal_factor, |f| f.as_of),
                collected_at: now,
            };

            metrics::record_snapshot_duration(started.elapsed());
            if snapshot.fully_missing() {
                debug!("snapshot for {route} is fully missing");
            }
            snapshot
        }
    }

    async fn fetch_one<T: Clone + Send + Sync + 'static>(
        &self,
        guarded: &Guarded<T>,
        route: &Route,
        ctx: &RequestContext,
    ) -> Result<T, FetchError> {
        if ctx.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let permit = match self.fan_out.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return Err(FetchError::Unavailable("aggregator shut down".into())),
        };
        let result = guarded.fetch(route, ctx).await;
        drop(permit);
        if let Err(err) = &result {
            debug!("fetch {} for {route} failed: {err}", guarded.name());
        }
        result
    }

    /// Per-client breaker states.
    pub fn health(&self) -> Vec<ClientHealth> {
        [
            (self.market.name(), self.market.breaker().state()),
            (self.competitor.name(), self.competitor.breaker().state()),
            (self.fuel.name(), self.fuel.breaker().state()),
            (self.weather.name(), self.weather.breaker().state()),
            (self.events.name(), self.events.breaker().state()),
            (self.forecast.name(), self.forecast.breaker().state()),
        ]
        .into_iter()
        .map(|(client, breaker)| ClientHealth { client, breaker })
        .collect()
    }
}

/// Fold a fetch outcome into the last-good slot: successes refresh it,
/// failures fall back to a sufficiently recent previous value.
fn reconcile<T: Clone>(
    result: Result<T, FetchError>,
    slot: &mut Option<(T, Instant)>,
    stale_after: Duration,
) -> Resolved<T> {
    match result {
        Ok(value) => {
            *slot = Some((value.clone(), Instant::now()));
            Resolved::Fresh(value)
        }
        Err(_) => match slot {
            Some((value, fetched_at)) if fetched_at.elapsed() <= stale_after => {
                let age = chrono::Duration::from_std(fetched_at.elapsed())
                    .unwrap_or_else(|_| chrono::Duration::zero());
                Resolved::Stale(value.clone(), Utc::now() - age)
            }
            _ => Resolved::Missing,
        },
    }
}

/// Project one snapshot field out of a resolved client payload.
fn field<T, V>(
    resolved: &Resolved<T>,
    name: &'static str,
    now: DateTime<Utc>,
    project: impl Fn(&T) -> V,
    as_of: impl Fn(&T) -> DateTime<Utc>,
) -> Signal<V> {
    match resolved {
        Resolved::Fresh(value) => {
            metrics::increment_snapshot_field(name, "fresh");
            let stamp = as_of(value);
            let stamp = if stamp > now { now } else { stamp };
            Signal::fresh(project(value), stamp)
        }
        Resolved::Stale(value, served_as_of) => {
            metrics::increment_snapshot_field(name, "stale");
            Signal::stale(project(value), *served_as_of)
        }
        Resolved::Missing => {
            metrics::increment_snapshot_field(name, "missing");
            Signal::Missing
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct ScriptedForecast {
        fail: AtomicBool,
    }

    #[async_trait]
    impl Fetchable for ScriptedForecast {
        type Output = DemandForecast;

        fn name(&self) -> &'static str {
            "forecast"
        }

        async fn fetch(
            &self,
            _route: &Route,
            _ctx: &RequestContext,
        ) -> Result<DemandForecast, FetchError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(FetchError::Unavailable("down".into()))
            } else {
                Ok(DemandForecast {
                    demand_index: 0.7,
                    seasonal_factor: 0.05,
                    as_of: Utc::now(),
                })
            }
        }
    }

    struct DownMarket;
    struct DownCompetitor;
    struct DownFuel;
    struct DownWeather;
    struct DownEvents;

    macro_rules! down_client {
        ($name:ident, $out:ty, $label:literal) => {
            #[async_trait]
            impl Fetchable for $name {
                type Output = $out;

                fn name(&self) -> &'static str {
                    $label
                }

                async fn fetch(
                    &self,
                    _route: &Route,
                    _ctx: &RequestContext,
                ) -> Result<$out, FetchError> {
                    Err(FetchError::Unavailable("down".into()))
                }
            }
        };
    }

    down_client!(DownMarket, MarketStats, "market");
    down_client!(DownCompetitor, CompetitorFares, "competitor");
    down_client!(DownFuel, FuelPrice, "fuel");
    down_client!(DownWeather, WeatherImpact, "weather");
    down_client!(DownEvents, EventSignal, "events");

    fn aggregator(forecast: Arc<ScriptedForecast>) -> MarketAggregator {
        MarketAggregator::new(
            AggregatorClients {
                market: Arc::new(DownMarket),
                competitor: Arc::new(DownCompetitor),
                fuel: Arc::new(DownFuel),
                weather: Arc::new(DownWeather),
                events: Arc::new(DownEvents),
                forecast,
            },
            BreakerConfig::default(),
            AggregatorConfig {
                budget: Duration::from_millis(500),
                stale_after: Duration::from_secs(900),
                max_concurrent_fetches: 6,
            },
        )
    }

    #[tokio::test]
    async fn partial_failure_yields_partial_snapshot() {
        let forecast = Arc::new(ScriptedForecast {
            fail: AtomicBool::new(false),
        });
        let aggregator = aggregator(forecast);
        let route: Route = "LAX-JFK".parse().unwrap();
        let (ctx, _handle) = RequestContext::with_timeout(Duration::from_secs(5));

        let snap = aggregator.snapshot(&route, &ctx).await;
        assert!(!snap.fully_missing());
        assert_eq!(snap.demand_index.value_copied(), Some(0.7));
        assert!(snap.average_fare.is_missing());
        assert!(snap.competitor_fares.is_missing());
    }

    #[tokio::test]
    async fn failed_field_served_stale_from_last_good() {
        let forecast = Arc::new(ScriptedForecast {
            fail: AtomicBool::new(false),
        });
        let aggregator = aggregator(forecast.clone());
        let route: Route = "LAX-JFK".parse().unwrap();
        let (ctx, _handle) = RequestContext::with_timeout(Duration::from_secs(5));

        let first = aggregator.snapshot(&route, &ctx).await;
        assert!(matches!(first.demand_index, Signal::Fresh { .. }));

        forecast.fail.store(true, Ordering::SeqCst);
        let second = aggregator.snapshot(&route, &ctx).await;
        assert!(second.demand_index.is_stale());
        assert_eq!(second.demand_index.value_copied(), Some(0.7));
    }

    #[tokio::test]
    async fn everything_down_yields_fully_missing() {
        let forecast = Arc::new(ScriptedForecast {
            fail: AtomicBool::new(true),
        });
        let aggregator = aggregator(forecast);
        let route: Route = "SFO-ORD".parse().unwrap();
        let (ctx, _handle) = RequestContext::with_timeout(Duration::from_secs(5));

        let snap = aggregator.snapshot(&route, &ctx).await;
        assert!(snap.fully_missing());
    }
}
