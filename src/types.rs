// src/types.rs

use chrono::{DateTime, Datelike, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// An origin-destination pair in IATA form, e.g. `LAX-JFK`.
///
/// Routes are directional: `LAX-JFK` and `JFK-LAX` are distinct routes with
/// independent configuration and market state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Route {
    origin: String,
    destination: String,
}

impl Route {
    /// Build a route from two IATA airport codes (three uppercase letters each).
    pub fn new(origin: &str, destination: &str) -> Result<Self, RouteParseError> {
        if !is_iata_code(origin) {
            return Err(RouteParseError::BadCode(origin.to_string()));
        }
        if !is_iata_code(destination) {
            return Err(RouteParseError::BadCode(destination.to_string()));
        }
        if origin == destination {
            return Err(RouteParseError::SameEndpoints);
        }
        Ok(Self {
            origin: origin.to_string(),
            destination: destination.to_string(),
        })
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }
}

fn is_iata_code(code: &str) -> bool {
    code.len() == 3 && code.bytes().all(|b| b.is_ascii_uppercase())
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum RouteParseError {
    #[error("invalid IATA code: {0:?}")]
    BadCode(String),
    #[error("route must be of the form XXX-YYY")]
    BadFormat,
    #[error("origin and destination must differ")]
    SameEndpoints,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.origin, self.destination)
    }
}

impl FromStr for Route {
    type Err = RouteParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (origin, destination) = s.split_once('-').ok_or(RouteParseError::BadFormat)?;
        Route::new(origin, destination)
    }
}

impl TryFrom<String> for Route {
    type Error = RouteParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Route> for String {
    fn from(r: Route) -> Self {
        r.to_string()
    }
}

/// Customer segment attached to the request by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CustomerSegment {
    Leisure,
    Business,
    Corporate,
    Government,
}

impl CustomerSegment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Leisure => "leisure",
            Self::Business => "business",
            Self::Corporate => "corporate",
            Self::Government => "government",
        }
    }
}

/// Sales channel the quote request arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingChannel {
    Direct,
    Mobile,
    CallCenter,
    Gds,
    Ota,
}

impl BookingChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Mobile => "mobile",
            Self::CallCenter => "call_center",
            Self::Gds => "gds",
            Self::Ota => "ota",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TravelPurpose {
    Leisure,
    Business,
    Medical,
    Education,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CreditCard,
    DebitCard,
    Wallet,
    BankTransfer,
    Miles,
}

/// Loyalty program tier. `None` means the traveller is not enrolled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoyaltyTier {
    None,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

impl LoyaltyTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Silver => "silver",
            Self::Gold => "gold",
            Self::Platinum => "platinum",
            Self::Diamond => "diamond",
        }
    }
}

/// Northern-hemisphere meteorological season derived from the departure month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Autumn,
}

impl Season {
    /// Mar-May spring, Jun-Aug summer, Sep-Nov autumn, else winter.
    pub fn from_departure(departure: DateTime<Utc>) -> Self {
        match departure.month() {
            3..=5 => Self::Spring,
            6..=8 => Self::Summer,
            9..=11 => Self::Autumn,
            _ => Self::Winter,
        }
    }
}

/// Coarse route category used by the emergency pricing table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteCategory {
    Regional,
    LongHaul,
    International,
}

impl RouteCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regional => "regional",
            Self::LongHaul => "long_haul",
            Self::International => "international",
        }
    }
}

/// One quote request. Immutable once constructed; field invariants are checked
/// by the validation layer, not by this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingRequest {
    pub request_id: Uuid,
    pub route: Route,
    pub departure: DateTime<Utc>,
    pub arrival: DateTime<Utc>,
    pub booking_class: String,
    pub segment: CustomerSegment,
    pub channel: BookingChannel,
    #[serde(default)]
    pub corporate_contract: Option<String>,
    #[serde(default = "default_loyalty_tier")]
    pub loyalty_tier: LoyaltyTier,
    /// ISO 3166-1 alpha-2 country the request originates from.
    pub country: String,
    pub device: DeviceType,
    /// Days between booking and departure. Derived from `departure` when absent.
    #[serde(default)]
    pub advance_days: Option<u32>,
    pub purpose: TravelPurpose,
    pub group_size: u32,
    pub payment: PaymentMethod,
    /// ISO 4217 quote currency.
    pub currency: String,
}

fn default_loyalty_tier() -> LoyaltyTier {
    LoyaltyTier::None
}

impl PricingRequest {
    /// Advance-booking days: the explicit value when provided, otherwise the
    /// whole days between `now` and departure (never negative).
    pub fn advance_days_or_derived(&self, now: DateTime<Utc>) -> u32 {
        match self.advance_days {
            Some(days) => days,
            None => {
                let delta = self.departure.signed_duration_since(now).num_days();
                delta.max(0) as u32
            }
        }
    }
}

/// Static per-route pricing configuration, owned by the route config store and
/// shared read-only across requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfiguration {
    pub route: Route,
    /// Starting fare in the canonical currency before any dynamic adjustment.
    pub base_fare: f64,
    pub currency: String,
    pub market_segment: String,
    pub category: RouteCategory,
    #[serde(default)]
    pub competitor_routes: Vec<String>,
    #[serde(default)]
    pub seasonality: IndexMap<Season, f64>,
    pub demand_elasticity: f64,
    pub fuel_sensitivity: f64,
    /// Maximum fraction the subtotal may drift from the base fare.
    pub max_variance: f64,
    /// Minimum profit margin fraction over the base fare.
    pub min_margin: f64,
    #[serde(default)]
    pub class_multipliers: IndexMap<String, f64>,
    #[serde(default)]
    pub tax_rates: IndexMap<String, f64>,
    #[serde(default)]
    pub fees: IndexMap<String, f64>,
    pub updated_at: DateTime<Utc>,
}

impl RouteConfiguration {
    /// Configured class multiplier, 1.0 for unknown classes.
    pub fn class_multiplier(&self, class: &str) -> f64 {
        self.class_multipliers.get(class).copied().unwrap_or(1.0)
    }

    pub fn seasonal_factor(&self, season: Season) -> Option<f64> {
        self.seasonality.get(&season).copied()
    }
}

/// Freshness-tagged upstream signal.
///
/// Downstream code must be explicit about the `Missing` case; stale values are
/// usable but were served from the aggregator's last-good cache.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal<T> {
    Fresh { value: T, as_of: DateTime<Utc> },
    Stale { value: T, as_of: DateTime<Utc> },
    Missing,
}

impl<T> Signal<T> {
    pub fn fresh(value: T, as_of: DateTime<Utc>) -> Self {
        Self::Fresh { value, as_of }
    }

    pub fn stale(value: T, as_of: DateTime<Utc>) -> Self {
        Self::Stale { value, as_of }
    }

    /// The carried value, fresh or stale.
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Fresh { value, .. } | Self::Stale { value, .. } => Some(value),
            Self::Missing => None,
        }
    }

    pub fn as_of(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Fresh { as_of, .. } | Self::Stale { as_of, .. } => Some(*as_of),
            Self::Missing => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing)
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale { .. })
    }
}

impl<T: Copy> Signal<T> {
    pub fn value_copied(&self) -> Option<T> {
        self.value().copied()
    }
}

/// Per-route bundle of upstream signals assembled for one request.
///
/// Every field carries its own freshness; a snapshot with every field missing
/// is still a valid value and signals the orchestrator to fall back.
#[derive(Debug, Clone)]
pub struct MarketSnapshot {
    pub route: Route,
    pub average_fare: Signal<f64>,
    /// Demand index in [0, 1].
    pub demand_index: Signal<f64>,
    pub competitor_fares: Signal<IndexMap<String, f64>>,
    /// Fuel price in canonical units.
    pub fuel_price: Signal<f64>,
    /// Weather impact in [0, 1].
    pub weather_impact: Signal<f64>,
    /// Event multiplier, >= 1.0.
    pub event_multiplier: Signal<f64>,
    pub seasonal_factor: Signal<f64>,
    pub booking_velocity: Signal<f64>,
    /// Load factor in [0, 1].
    pub load_factor: Signal<f64>,
    pub collected_at: DateTime<Utc>,
}

impl MarketSnapshot {
    /// A snapshot with every field missing.
    pub fn missing(route: Route, collected_at: DateTime<Utc>) -> Self {
        Self {
            route,
            average_fare: Signal::Missing,
            demand_index: Signal::Missing,
            competitor_fares: Signal::Missing,
            fuel_price: Signal::Missing,
            weather_impact: Signal::Missing,
            event_multiplier: Signal::Missing,
            seasonal_factor: Signal::Missing,
            booking_velocity: Signal::Missing,
            load_factor: Signal::Missing,
            collected_at,
        }
    }

    pub fn fully_missing(&self) -> bool {
        self.average_fare.is_missing()
            && self.demand_index.is_missing()
            && self.competitor_fares.is_missing()
            && self.fuel_price.is_missing()
            && self.weather_impact.is_missing()
            && self.event_multiplier.is_missing()
            && self.seasonal_factor.is_missing()
            && self.booking_velocity.is_missing()
            && self.load_factor.is_missing()
    }

    /// Mean of the competitor fares, if any were collected.
    pub fn competitor_mean(&self) -> Option<f64> {
        let fares = self.competitor_fares.value()?;
        if fares.is_empty() {
            return None;
        }
        Some(fares.values().sum::<f64>() / fares.len() as f64)
    }
}

/// Named additive adjustments, one slot per pricing rule. Closed record so the
/// sum invariant is checkable at compile time rather than over an open map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FareAdjustments {
    pub demand: f64,
    pub seasonal: f64,
    pub competitor: f64,
    pub fuel: f64,
    pub event: f64,
    pub weather: f64,
    pub channel: f64,
    pub class: f64,
}

impl FareAdjustments {
    pub fn total(&self) -> f64 {
        self.demand
            + self.seasonal
            + self.competitor
            + self.fuel
            + self.event
            + self.weather
            + self.channel
            + self.class
    }

    pub fn named(&self) -> IndexMap<String, f64> {
        let mut map = IndexMap::with_capacity(8);
        map.insert("demand".to_string(), self.demand);
        map.insert("seasonal".to_string(), self.seasonal);
        map.insert("competitor".to_string(), self.competitor);
        map.insert("fuel".to_string(), self.fuel);
        map.insert("event".to_string(), self.event);
        map.insert("weather".to_string(), self.weather);
        map.insert("channel".to_string(), self.channel);
        map.insert("class".to_string(), self.class);
        map
    }
}

/// Named discounts; always non-negative amounts subtracted from the fare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FareDiscounts {
    pub loyalty: f64,
    pub corporate: f64,
    pub geo: f64,
    pub advance: f64,
    pub group: f64,
}

impl FareDiscounts {
    pub fn total(&self) -> f64 {
        self.loyalty + self.corporate + self.geo + self.advance + self.group
    }
}

/// Audit-grade decomposition of a quoted fare.
///
/// Invariant: `subtotal = base_fare + adjustments.total() - discounts.total()
/// + bounds_adjustment`, where `bounds_adjustment` is the explicit correction
/// applied by the bounds filter when the variance clamp or margin floor binds
/// (0.0 otherwise). `final_total = subtotal + total_taxes + total_fees`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub base_fare: f64,
    pub adjustments: FareAdjustments,
    pub discounts: FareDiscounts,
    pub total_adjustments: f64,
    pub total_discounts: f64,
    /// Correction recorded when the variance clamp or margin floor binds.
    pub bounds_adjustment: f64,
    pub subtotal: f64,
    pub taxes: IndexMap<String, f64>,
    pub fees: IndexMap<String, f64>,
    pub total_taxes: f64,
    pub total_fees: f64,
    pub final_total: f64,
}

/// Demand level derived from the snapshot's demand index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DemandIndicator {
    VeryLow,
    Low,
    Medium,
    High,
}

impl DemandIndicator {
    /// >0.8 HIGH, >0.6 MEDIUM, >0.3 LOW, else VERY_LOW. A missing index lands
    /// in the `else` branch.
    pub fn from_index(index: Option<f64>) -> Self {
        match index {
            Some(d) if d > 0.8 => Self::High,
            Some(d) if d > 0.6 => Self::Medium,
            Some(d) if d > 0.3 => Self::Low,
            _ => Self::VeryLow,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::VeryLow => "VERY_LOW",
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

/// Direction of the quoted price relative to the rolling reference price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PriceTrend {
    Rising,
    Stable,
    Falling,
}

impl PriceTrend {
    /// >+5% RISING, <-5% FALLING, else STABLE. No reference means STABLE.
    pub fn versus_reference(final_total: f64, reference: Option<f64>) -> Self {
        let Some(reference) = reference else {
            return Self::Stable;
        };
        if reference <= 0.0 {
            return Self::Stable;
        }
        let change = (final_total - reference) / reference;
        if change > 0.05 {
            Self::Rising
        } else if change < -0.05 {
            Self::Falling
        } else {
            Self::Stable
        }
    }
}

/// Which fallback strategy produced a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackLayer {
    HistoricalAverage,
    CompetitorBased,
    RegionalPricing,
    StaticMatrix,
    Emergency,
}

impl FallbackLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HistoricalAverage => "historical_average",
            Self::CompetitorBased => "competitor_based",
            Self::RegionalPricing => "regional_pricing",
            Self::StaticMatrix => "static_matrix",
            Self::Emergency => "emergency",
        }
    }
}

/// The finished quote. Immutable after construction; the cache stores
/// serialized copies of this value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingResponse {
    pub request_id: Uuid,
    pub route: Route,
    pub currency: String,
    pub breakdown: PriceBreakdown,
    /// Named view of the dynamic adjustments, mirroring `breakdown.adjustments`.
    pub dynamic_adjustments: IndexMap<String, f64>,
    pub competitor_prices: IndexMap<String, f64>,
    pub demand_indicator: DemandIndicator,
    pub price_trend: PriceTrend,
    /// How long the quote is honored, in seconds.
    pub validity_seconds: u64,
    pub recommended_price: f64,
    pub cache_hit: bool,
    pub fallback_used: bool,
    pub fallback_layer: Option<FallbackLayer>,
    /// Markup factor applied by the historical fallback, when that layer ran.
    pub fallback_markup: Option<f64>,
    pub quoted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub processing_time_ms: u64,
}

/// Minor-unit exponent for a currency (half-even rounding happens at this
/// precision). Covers the zero- and three-decimal ISO 4217 currencies the
/// platform sells in; everything else uses two decimals.
pub fn currency_minor_units(currency: &str) -> u32 {
    match currency {
        "JPY" | "KRW" | "VND" | "CLP" | "ISK" => 0,
        "BHD" | "KWD" | "OMR" | "JOD" | "TND" => 3,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn route_parses_and_displays() {
        let route: Route = "LAX-JFK".parse().unwrap();
        assert_eq!(route.origin(), "LAX");
        assert_eq!(route.destination(), "JFK");
        assert_eq!(route.to_string(), "LAX-JFK");
    }

    #[test]
    fn route_rejects_bad_codes() {
        assert!("lax-JFK".parse::<Route>().is_err());
        assert!("LAXX-JFK".parse::<Route>().is_err());
        assert!("LAX".parse::<Route>().is_err());
        assert!("LAX-LAX".parse::<Route>().is_err());
    }

    #[test]
    fn season_from_month() {
        let at = |m| Utc.with_ymd_and_hms(2026, m, 15, 12, 0, 0).unwrap();
        assert_eq!(Season::from_departure(at(1)), Season::Winter);
        assert_eq!(Season::from_departure(at(4)), Season::Spring);
        assert_eq!(Season::from_departure(at(7)), Season::Summer);
        assert_eq!(Season::from_departure(at(10)), Season::Autumn);
        assert_eq!(Season::from_departure(at(12)), Season::Winter);
    }

    #[test]
    fn demand_indicator_thresholds() {
        assert_eq!(DemandIndicator::from_index(Some(0.9)), DemandIndicator::High);
        assert_eq!(DemandIndicator::from_index(Some(0.8)), DemandIndicator::Medium);
        assert_eq!(DemandIndicator::from_index(Some(0.7)), DemandIndicator::Medium);
        assert_eq!(DemandIndicator::from_index(Some(0.5)), DemandIndicator::Low);
        assert_eq!(DemandIndicator::from_index(Some(0.1)), DemandIndicator::VeryLow);
        assert_eq!(DemandIndicator::from_index(None), DemandIndicator::VeryLow);
    }

    #[test]
    fn price_trend_bands() {
        assert_eq!(PriceTrend::versus_reference(106.0, Some(100.0)), PriceTrend::Rising);
        assert_eq!(PriceTrend::versus_reference(94.0, Some(100.0)), PriceTrend::Falling);
        assert_eq!(PriceTrend::versus_reference(103.0, Some(100.0)), PriceTrend::Stable);
        assert_eq!(PriceTrend::versus_reference(103.0, None), PriceTrend::Stable);
    }

    #[test]
    fn fully_missing_snapshot() {
        let snap = MarketSnapshot::missing("LAX-JFK".parse().unwrap(), Utc::now());
        assert!(snap.fully_missing());
        assert!(snap.competitor_mean().is_none());
    }

    #[test]
    fn adjustment_totals_match_named_view() {
        let adj = FareAdjustments {
            demand: 45.0,
            seasonal: 15.0,
            competitor: -15.0,
            fuel: 1.0,
            ..Default::default()
        };
        assert!((adj.total() - 46.0).abs() < 1e-9);
        assert_eq!(adj.named().values().sum::<f64>(), adj.total());
    }

    #[test]
    fn advance_days_derived_from_departure() {
        let now = Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap();
        let req_departure = Utc.with_ymd_and_hms(2026, 8, 15, 0, 0, 0).unwrap();
        let req = sample_request(req_departure);
        assert_eq!(req.advance_days_or_derived(now), 45);

        let mut explicit = sample_request(req_departure);
        explicit.advance_days = Some(10);
        assert_eq!(explicit.advance_days_or_derived(now), 10);
    }

    fn sample_request(departure: DateTime<Utc>) -> PricingRequest {
        PricingRequest {
            request_id: Uuid::new_v4(),
            route: "LAX-JFK".parse().unwrap(),
            departure,
            arrival: departure + chrono::Duration::hours(6),
            booking_class: "Y".to_string(),
            segment: CustomerSegment::Leisure,
            channel: BookingChannel::Direct,
            corporate_contract: None,
            loyalty_tier: LoyaltyTier::Silver,
            country: "US".to_string(),
            device: DeviceType::Desktop,
            advance_days: None,
            purpose: TravelPurpose::Leisure,
            group_size: 1,
            payment: PaymentMethod::CreditCard,
            currency: "USD".to_string(),
        }
    }
}
