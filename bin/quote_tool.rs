//! # Quote Tool
//!
//! Wires the full pricing pipeline against in-process demo upstreams and
//! prints one quote. Doubles as executable documentation for constructing
//! and injecting the components.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin quote_tool -- --route LAX-JFK --class Y --advance-days 45
//! # Exercise the fallback ladder:
//! cargo run --bin quote_tool -- --route LAX-JFK --degraded
//! ```

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use clap::Parser;
use colored::Colorize;
use indexmap::IndexMap;
use rand::Rng;
use skyfare_pricing::aggregator::{AggregatorClients, AggregatorConfig, MarketAggregator};
use skyfare_pricing::clients::competitor::CompetitorFares;
use skyfare_pricing::clients::events::EventSignal;
use skyfare_pricing::clients::forecast::DemandForecast;
use skyfare_pricing::clients::fuel::FuelPrice;
use skyfare_pricing::clients::historical::HistoricalAverage;
use skyfare_pricing::clients::market::MarketStats;
use skyfare_pricing::clients::weather::WeatherImpact;
use skyfare_pricing::context::RequestContext;
use skyfare_pricing::fallback::{FallbackConfig, FallbackEngine};
use skyfare_pricing::fetchable::{FetchError, Fetchable};
use skyfare_pricing::metrics;
use skyfare_pricing::orchestrator::{OrchestratorConfig, PricingOrchestrator};
use skyfare_pricing::rate_limit::QuoteRateLimiter;
use skyfare_pricing::reference_price::ReferencePriceBook;
use skyfare_pricing::response_cache::QuoteCache;
use skyfare_pricing::route_store::{RouteConfigStore, TomlRouteSource};
use skyfare_pricing::settings::Settings;
use skyfare_pricing::types::{
    BookingChannel, CustomerSegment, DeviceType, LoyaltyTier, PaymentMethod, PricingRequest,
    Route, TravelPurpose,
};
use skyfare_pricing::validation::RequestValidator;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "quote_tool", about = "Price one itinerary through the full pipeline")]
struct Args {
    /// Route in IATA form, e.g. LAX-JFK
    #[arg(long, default_value = "LAX-JFK")]
    route: String,

    /// Booking class code
    #[arg(long, default_value = "Y")]
    class: String,

    /// Quote currency
    #[arg(long, default_value = "USD")]
    currency: String,

    /// Loyalty tier: none, silver, gold, platinum, diamond
    #[arg(long, default_value = "silver")]
    loyalty: String,

    /// Travellers on the booking
    #[arg(long, default_value_t = 1)]
    group: u32,

    /// Days between booking and departure
    #[arg(long, default_value_t = 45)]
    advance_days: u32,

    /// Simulate every live upstream being down to exercise the fallback ladder
    #[arg(long, default_value_t = false)]
    degraded: bool,
}

/// Demo upstream producing plausible jittered signals, or hard failures when
/// the tool runs in degraded mode.
struct DemoUpstream {
    degraded: bool,
}

impl DemoUpstream {
    fn check(&self) -> Result<(), FetchError> {
        if self.degraded {
            Err(FetchError::Unavailable("demo upstream disabled".into()))
        } else {
            Ok(())
        }
    }
}

macro_rules! demo_client {
    ($name:ident, $label:literal, $out:ty, $body:expr) => {
        struct $name(Arc<DemoUpstream>);

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
                self.0.check()?;
                let mut rng = rand::thread_rng();
                let value = ($body)(&mut rng);
                Ok(value)
            }
        }
    };
}

demo_client!(DemoMarket, "market", MarketStats, |rng: &mut rand::rngs::ThreadRng| {
    MarketStats {
        average_fare: 310.0 + rng.gen_range(-20.0..20.0),
        booking_velocity: rng.gen_range(5.0..25.0),
        load_factor: rng.gen_range(0.6..0.9),
        as_of: Utc::now(),
    }
});

demo_client!(DemoCompetitor, "competitor", CompetitorFares, |rng: &mut rand::rngs::ThreadRng| {
    let mut fares = IndexMap::new();
    fares.insert("UA".to_string(), 315.0 + rng.gen_range(-25.0..25.0));
    fares.insert("DL".to_string(), 305.0 + rng.gen_range(-25.0..25.0));
    fares.insert("B6".to_string(), 295.0 + rng.gen_range(-25.0..25.0));
    CompetitorFares {
        fares,
        as_of: Utc::now(),
    }
});

demo_client!(DemoFuel, "fuel", FuelPrice, |rng: &mut rand::rngs::ThreadRng| {
    FuelPrice {
        price: 80.0 + rng.gen_range(-6.0..6.0),
        as_of: Utc::now(),
    }
});

demo_client!(DemoWeather, "weather", WeatherImpact, |rng: &mut rand::rngs::ThreadRng| {
    WeatherImpact {
        impact: rng.gen_range(0.2..0.8),
        as_of: Utc::now(),
    }
});

demo_client!(DemoEvents, "events", EventSignal, |rng: &mut rand::rngs::ThreadRng| {
    EventSignal {
        multiplier: 1.0 + rng.gen_range(0.0..0.3),
        as_of: Utc::now(),
    }
});

demo_client!(DemoForecast, "forecast", DemandForecast, |rng: &mut rand::rngs::ThreadRng| {
    DemandForecast {
        demand_index: rng.gen_range(0.3..0.9),
        seasonal_factor: 0.05,
        as_of: Utc::now(),
    }
});

demo_client!(DemoHistorical, "historical", HistoricalAverage, |rng: &mut rand::rngs::ThreadRng| {
    HistoricalAverage {
        mean_fare: 325.0 + rng.gen_range(-10.0..10.0),
        months: 12,
        as_of: Utc::now(),
    }
});

fn parse_loyalty(raw: &str) -> LoyaltyTier {
    match raw.to_ascii_lowercase().as_str() {
        "silver" => LoyaltyTier::Silver,
        "gold" => LoyaltyTier::Gold,
        "platinum" => LoyaltyTier::Platinum,
        "diamond" => LoyaltyTier::Diamond,
        _ => LoyaltyTier::None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let settings = Settings::new()?;
    metrics::describe_metrics();

    #[cfg(feature = "observability")]
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install()
        .expect("failed to install Prometheus exporter");

    let routes = Arc::new(RouteConfigStore::from_source(&TomlRouteSource::new(
        &settings.routes.file,
    ))?);
    println!("{} {} routes loaded", "✔".green(), routes.len());

    // The demo upstreams stand in for the live services; the --degraded flag
    // turns them all off so the fallback ladder runs. The historical upstream
    // stays up either way, mirroring an archive service that outlives the
    // real-time feeds.
    let live = Arc::new(DemoUpstream {
        degraded: args.degraded,
    });
    let archive = Arc::new(DemoUpstream { degraded: false });

    let aggregator = Arc::new(MarketAggregator::new(
        AggregatorClients {
            market: Arc::new(DemoMarket(live.clone())),
            competitor: Arc::new(DemoCompetitor(live.clone())),
            fuel: Arc::new(DemoFuel(live.clone())),
            weather: Arc::new(DemoWeather(live.clone())),
            events: Arc::new(DemoEvents(live.clone())),
            forecast: Arc::new(DemoForecast(live.clone())),
        },
        settings.breaker.to_config(),
        AggregatorConfig {
            budget: Duration::from_millis(settings.aggregator.budget_ms),
            stale_after: Duration::from_secs(settings.aggregator.stale_after_seconds),
            max_concurrent_fetches: settings.aggregator.max_concurrent_fetches,
        },
    ));

    let fallback = Arc::new(FallbackEngine::new(
        Arc::new(DemoHistorical(archive)),
        Arc::new(DemoCompetitor(live.clone())),
        settings.breaker.to_config(),
        FallbackConfig::from(&settings.fallback),
    ));

    let cache = Arc::new(QuoteCache::new(
        settings.cache.local_capacity,
        settings.cache.local_shards,
    ));

    let orchestrator = PricingOrchestrator::new(
        RequestValidator::new(
            settings.server.max_group_size,
            settings.routes.supported_currencies.clone(),
        ),
        routes,
        aggregator,
        cache,
        fallback,
        Arc::new(QuoteRateLimiter::new(&settings.rate_limit.to_config())),
        Arc::new(ReferencePriceBook::default()),
        OrchestratorConfig {
            soft_deadline: settings.soft_deadline(),
            finalize_reserve: settings.finalize_reserve(),
            store_timeout: Duration::from_millis(settings.cache.store_timeout_ms),
        },
    );

    let now = Utc::now();
    let request = PricingRequest {
        request_id: Uuid::new_v4(),
        route: args.route.parse()?,
        departure: now + ChronoDuration::days(i64::from(args.advance_days)),
        arrival: now + ChronoDuration::days(i64::from(args.advance_days)) + ChronoDuration::hours(6),
        booking_class: args.class.clone(),
        segment: CustomerSegment::Leisure,
        channel: BookingChannel::Direct,
        corporate_contract: None,
        loyalty_tier: parse_loyalty(&args.loyalty),
        country: "US".to_string(),
        device: DeviceType::Desktop,
        advance_days: Some(args.advance_days),
        purpose: TravelPurpose::Leisure,
        group_size: args.group,
        payment: PaymentMethod::CreditCard,
        currency: args.currency.clone(),
    };

    let (ctx, _cancel) = RequestContext::with_timeout(settings.request_deadline());
    let response = orchestrator.quote(request, "quote-tool", &ctx).await?;

    let header = if response.fallback_used {
        format!(
            "quote via fallback layer {}",
            response
                .fallback_layer
                .map(|l| l.as_str())
                .unwrap_or("unknown")
        )
        .yellow()
    } else {
        "quote via primary engine".green()
    };
    println!("\n{header}");
    println!(
        "{} {} {:.2} {} (valid {}s, demand {}, trend {:?})",
        response.route.to_string().bold(),
        "→".dimmed(),
        response.breakdown.final_total,
        response.currency,
        response.validity_seconds,
        response.demand_indicator.as_str(),
        response.price_trend,
    );
    println!("\n{}", serde_json::to_string_pretty(&response)?);

    Ok(())
}
