use crate::breaker::BreakerConfig;
use crate::rate_limit::RateLimitConfig;
use crate::types::RouteCategory;
use config::{Config, ConfigError, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Server {
    /// Hard ceiling for one quote request.
    #[serde(default = "default_request_deadline_ms")]
    pub request_deadline_ms: u64,
    /// Soft deadline after which fallback is preferred over waiting.
    #[serde(default = "default_soft_deadline_ms")]
    pub soft_deadline_ms: u64,
    /// Budget reserved for bounds, cache store and response assembly.
    #[serde(default = "default_finalize_reserve_ms")]
    pub finalize_reserve_ms: u64,
    #[serde(default = "default_max_group_size")]
    pub max_group_size: u32,
}

fn default_request_deadline_ms() -> u64 {
    30_000
}
fn default_soft_deadline_ms() -> u64 {
    2_500
}
fn default_finalize_reserve_ms() -> u64 {
    300
}
fn default_max_group_size() -> u32 {
    9
}

impl Default for Server {
    fn default() -> Self {
        Self {
            request_deadline_ms: default_request_deadline_ms(),
            soft_deadline_ms: default_soft_deadline_ms(),
            finalize_reserve_ms: default_finalize_reserve_ms(),
            max_group_size: default_max_group_size(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimit {
    #[serde(default = "default_rate_window_seconds")]
    pub window_seconds: u64,
    #[serde(default = "default_rate_burst")]
    pub burst: u32,
}

fn default_rate_window_seconds() -> u64 {
    60
}
fn default_rate_burst() -> u32 {
    120
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            window_seconds: default_rate_window_seconds(),
            burst: default_rate_burst(),
        }
    }
}

impl RateLimit {
    pub fn to_config(&self) -> RateLimitConfig {
        RateLimitConfig {
            window: Duration::from_secs(self.window_seconds),
            burst: self.burst,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Breaker {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,
    #[serde(default = "default_half_open_probes")]
    pub half_open_probes: u32,
}

fn default_failure_threshold() -> u32 {
    3
}
fn default_cooldown_seconds() -> u64 {
    30
}
fn default_half_open_probes() -> u32 {
    1
}

impl Default for Breaker {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_seconds: default_cooldown_seconds(),
            half_open_probes: default_half_open_probes(),
        }
    }
}

impl Breaker {
    pub fn to_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown: Duration::from_secs(self.cooldown_seconds),
            half_open_probes: self.half_open_probes,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Cache {
    /// Entries held by the local LRU tier across all shards.
    #[serde(default = "default_local_capacity")]
    pub local_capacity: usize,
    /// Shard count for the local tier; 0 means one shard per CPU.
    #[serde(default)]
    pub local_shards: usize,
    /// Deadline for the detached best-effort store after cancellation.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    #[serde(default)]
    pub redis: RedisCache,
}

fn default_local_capacity() -> usize {
    2_048
}
fn default_store_timeout_ms() -> u64 {
    50
}

impl Default for Cache {
    fn default() -> Self {
        Self {
            local_capacity: default_local_capacity(),
            local_shards: 0,
            store_timeout_ms: default_store_timeout_ms(),
            redis: RedisCache::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RedisCache {
    #[serde(default = "default_false")]
    pub enabled: bool,
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Remote get/set budget; remote slowness must never stall a quote.
    #[serde(default = "default_redis_op_timeout_ms")]
    pub op_timeout_ms: u64,
}

fn default_false() -> bool {
    false
}
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_redis_op_timeout_ms() -> u64 {
    150
}

impl Default for RedisCache {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_redis_url(),
            op_timeout_ms: default_redis_op_timeout_ms(),
        }
    }
}

/// One upstream data-source endpoint with its per-call deadline.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientEndpoint {
    pub url: String,
    pub timeout_ms: u64,
}

impl ClientEndpoint {
    fn new(url: &str, timeout_ms: u64) -> Self {
        Self {
            url: url.to_string(),
            timeout_ms,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Clients {
    #[serde(default = "default_market_endpoint")]
    pub market: ClientEndpoint,
    #[serde(default = "default_competitor_endpoint")]
    pub competitor: ClientEndpoint,
    #[serde(default = "default_fuel_endpoint")]
    pub fuel: ClientEndpoint,
    #[serde(default = "default_weather_endpoint")]
    pub weather: ClientEndpoint,
    #[serde(default = "default_events_endpoint")]
    pub events: ClientEndpoint,
    #[serde(default = "default_forecast_endpoint")]
    pub forecast: ClientEndpoint,
    #[serde(default = "default_historical_endpoint")]
    pub historical: ClientEndpoint,
    /// Shared upstream API key, sent as a bearer token when present.
    #[serde(default)]
    pub api_key: Option<String>,
}

fn default_market_endpoint() -> ClientEndpoint {
    ClientEndpoint::new("http://localhost:7101", 800)
}
fn default_competitor_endpoint() -> ClientEndpoint {
    ClientEndpoint::new("http://localhost:7102", 600)
}
fn default_fuel_endpoint() -> ClientEndpoint {
    ClientEndpoint::new("http://localhost:7103", 500)
}
fn default_weather_endpoint() -> ClientEndpoint {
    ClientEndpoint::new("http://localhost:7104", 400)
}
fn default_events_endpoint() -> ClientEndpoint {
    ClientEndpoint::new("http://localhost:7105", 400)
}
fn default_forecast_endpoint() -> ClientEndpoint {
    ClientEndpoint::new("http://localhost:7106", 600)
}
fn default_historical_endpoint() -> ClientEndpoint {
    ClientEndpoint::new("http://localhost:7107", 1_500)
}

impl Default for Clients {
    fn default() -> Self {
        Self {
            market: default_market_endpoint(),
            competitor: default_competitor_endpoint(),
            fuel: default_fuel_endpoint(),
            weather: default_weather_endpoint(),
            events: default_events_endpoint(),
            forecast: default_forecast_endpoint(),
            historical: default_historical_endpoint(),
            api_key: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Aggregator {
    /// Shared budget for the whole snapshot fan-out.
    #[serde(default = "default_aggregator_budget_ms")]
    pub budget_ms: u64,
    /// How long a last-good value may be served as STALE before it expires
    /// to MISSING.
    #[serde(default = "default_stale_after_seconds")]
    pub stale_after_seconds: u64,
    /// Bound on concurrent upstream calls across all in-flight snapshots.
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
}

fn default_aggregator_budget_ms() -> u64 {
    1_200
}
fn default_stale_after_seconds() -> u64 {
    900
}
fn default_max_concurrent_fetches() -> usize {
    24
}

impl Default for Aggregator {
    fn default() -> Self {
        Self {
            budget_ms: default_aggregator_budget_ms(),
            stale_after_seconds: default_stale_after_seconds(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Emergency {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Base price per route category; lookups never fail because every
    /// category has an entry here or in the built-in defaults.
    #[serde(default = "default_emergency_base_prices")]
    pub base_prices: HashMap<RouteCategory, f64>,
    #[serde(default = "default_emergency_class_multipliers")]
    pub class_multipliers: HashMap<String, f64>,
}

fn default_true() -> bool {
    true
}

fn default_emergency_base_prices() -> HashMap<RouteCategory, f64> {
    HashMap::from([
        (RouteCategory::Regional, 200.0),
        (RouteCategory::LongHaul, 500.0),
        (RouteCategory::International, 800.0),
    ])
}

fn default_emergency_class_multipliers() -> HashMap<String, f64> {
    HashMap::from([
        ("Y".to_string(), 1.0),
        ("W".to_string(), 1.5),
        ("J".to_string(), 2.5),
        ("F".to_string(), 3.0),
    ])
}

impl Default for Emergency {
    fn default() -> Self {
        Self {
            enabled: true,
            base_prices: default_emergency_base_prices(),
            class_multipliers: default_emergency_class_multipliers(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Fallback {
    #[serde(default = "default_historical_deadline_ms")]
    pub historical_deadline_ms: u64,
    #[serde(default = "default_competitor_deadline_ms")]
    pub competitor_deadline_ms: u64,
    #[serde(default = "default_regional_deadline_ms")]
    pub regional_deadline_ms: u64,
    #[serde(default = "default_static_deadline_ms")]
    pub static_deadline_ms: u64,
    #[serde(default = "default_emergency_deadline_ms")]
    pub emergency_deadline_ms: u64,
    /// Markup applied on top of the historical 12-month mean; recorded on the
    /// response.
    #[serde(default = "default_historical_markup")]
    pub historical_markup: f64,
    /// Fraction added on top of the competitor mean by the competitor layer.
    #[serde(default = "default_competitor_adjustment_factor")]
    pub competitor_adjustment_factor: f64,
    #[serde(default = "default_static_markup")]
    pub static_markup: f64,
    /// Floor for the validity of any fallback-produced response.
    #[serde(default = "default_min_validity_seconds")]
    pub min_validity_seconds: u64,
    /// Region base prices keyed by market segment.
    #[serde(default)]
    pub regional_base_prices: HashMap<String, f64>,
    /// Static route x class fare matrix, keyed by "ORG-DST" then class.
    #[serde(default)]
    pub static_fares: HashMap<String, HashMap<String, f64>>,
    #[serde(default)]
    pub emergency: Emergency,
}

fn default_historical_deadline_ms() -> u64 {
    3_000
}
fn default_competitor_deadline_ms() -> u64 {
    2_000
}
fn default_regional_deadline_ms() -> u64 {
    1_000
}
fn default_static_deadline_ms() -> u64 {
    500
}
fn default_emergency_deadline_ms() -> u64 {
    100
}
fn default_historical_markup() -> f64 {
    1.0
}
fn default_competitor_adjustment_factor() -> f64 {
    0.02
}
fn default_static_markup() -> f64 {
    1.10
}
fn default_min_validity_seconds() -> u64 {
    300
}

impl Default for Fallback {
    fn default() -> Self {
        Self {
            historical_deadline_ms: default_historical_deadline_ms(),
            competitor_deadline_ms: default_competitor_deadline_ms(),
            regional_deadline_ms: default_regional_deadline_ms(),
            static_deadline_ms: default_static_deadline_ms(),
            emergency_deadline_ms: default_emergency_deadline_ms(),
            historical_markup: default_historical_markup(),
            competitor_adjustment_factor: default_competitor_adjustment_factor(),
            static_markup: default_static_markup(),
            min_validity_seconds: default_min_validity_seconds(),
            regional_base_prices: HashMap::new(),
            static_fares: HashMap::new(),
            emergency: Emergency::default(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Routes {
    /// TOML file holding the route configuration map.
    #[serde(default = "default_routes_file")]
    pub file: String,
    #[serde(default = "default_supported_currencies")]
    pub supported_currencies: Vec<String>,
}

fn default_routes_file() -> String {
    "routes.toml".to_string()
}

fn default_supported_currencies() -> Vec<String> {
    ["USD", "EUR", "GBP", "JPY", "AUD", "CAD", "INR", "BRL", "MXN"]
        .iter()
        .map(ToString::to_string)
        .collect()
}

impl Default for Routes {
    fn default() -> Self {
        Self {
            file: default_routes_file(),
            supported_currencies: default_supported_currencies(),
        }
    }
}

/// Root configuration document. One structured file plus environment-variable
/// overrides for deployment-scoped keys.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub rate_limit: RateLimit,
    #[serde(default)]
    pub breaker: Breaker,
    #[serde(default)]
    pub cache: Cache,
    #[serde(default)]
    pub clients: Clients,
    #[serde(default)]
    pub aggregator: Aggregator,
    #[serde(default)]
    pub fallback: Fallback,
    #[serde(default)]
    pub routes: Routes,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name("Config.toml").required(false))
            .build()?;

        let mut settings: Self = s.try_deserialize()?;

        // Environment variable overrides for deployment-scoped keys.
        if let Ok(url) = env::var("PRICING_REDIS_URL") {
            if !url.trim().is_empty() {
                settings.cache.redis.url = url.trim().to_string();
                settings.cache.redis.enabled = true;
            }
        }
        if let Ok(file) = env::var("PRICING_ROUTES_FILE") {
            if !file.trim().is_empty() {
                settings.routes.file = file.trim().to_string();
            }
        }
        if let Ok(key) = env::var("PRICING_API_KEY") {
            if !key.trim().is_empty() {
                settings.clients.api_key = Some(key.trim().to_string());
            }
        }
        for (var, endpoint) in [
            ("PRICING_CLIENT_MARKET_URL", &mut settings.clients.market),
            ("PRICING_CLIENT_COMPETITOR_URL", &mut settings.clients.competitor),
            ("PRICING_CLIENT_FUEL_URL", &mut settings.clients.fuel),
            ("PRICING_CLIENT_WEATHER_URL", &mut settings.clients.weather),
            ("PRICING_CLIENT_EVENTS_URL", &mut settings.clients.events),
            ("PRICING_CLIENT_FORECAST_URL", &mut settings.clients.forecast),
            ("PRICING_CLIENT_HISTORICAL_URL", &mut settings.clients.historical),
        ] {
            if let Ok(url) = env::var(var) {
                if !url.trim().is_empty() {
                    endpoint.url = url.trim().to_string();
                }
            }
        }

        Ok(settings)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.server.request_deadline_ms)
    }

    pub fn soft_deadline(&self) -> Duration {
        Duration::from_millis(self.server.soft_deadline_ms)
    }

    pub fn finalize_reserve(&self) -> Duration {
        Duration::from_millis(self.server.finalize_reserve_ms)
    }
}
