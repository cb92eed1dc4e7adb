// src/calculator.rs

//! # Pricing Calculator
//!
//! Pure and deterministic given its inputs: `(request, route config, market
//! snapshot, now) -> PriceBreakdown`. Never suspends, never touches shared
//! state. Missing snapshot signals contribute nothing; the calculator still
//! runs on a fully degraded snapshot and yields the base fare with static
//! adjustments only.
//!
//! Every rule below returns an amount in the route's currency with the sign
//! already applied; discounts are non-negative amounts that are subtracted.

use crate::types::{
    BookingChannel, FareAdjustments, FareDiscounts, LoyaltyTier, MarketSnapshot, PriceBreakdown,
    PricingRequest, RouteConfiguration, Season,
};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;

/// Baseline fuel price in canonical units; only the excursion from this level
/// moves fares.
pub const FUEL_PRICE_BASELINE: f64 = 80.0;

/// Fatal calculator failure. These indicate corrupt inputs or broken
/// arithmetic, not market conditions, so the orchestrator records a
/// correctness alert and falls back.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CalcError {
    #[error("{component} is not finite: {value}")]
    NonFinite { component: &'static str, value: f64 },

    #[error("base fare must be positive, got {0}")]
    NonPositiveBase(f64),
}

/// Compute the full additive breakdown for one request.
///
/// Taxes and fees are left empty here; the bounds filter owns the post-
/// processing layer. `now` is a parameter so the function stays deterministic
/// under test.
pub fn price(
    request: &PricingRequest,
    config: &RouteConfiguration,
    snapshot: &MarketSnapshot,
    now: DateTime<Utc>,
) -> Result<PriceBreakdown, CalcError> {
    let base = config.base_fare;
    if !base.is_finite() {
        return Err(CalcError::NonFinite {
            component: "base_fare",
            value: base,
        });
    }
    if base <= 0.0 {
        return Err(CalcError::NonPositiveBase(base));
    }

    let adjustments = FareAdjustments {
        demand: demand_adjustment(
            snapshot.demand_index.value_copied(),
            config.demand_elasticity,
            base,
        ),
        seasonal: seasonal_adjustment(config, request.departure),
        competitor: competitor_adjustment(snapshot.competitor_mean(), base),
        fuel: fuel_adjustment(
            snapshot.fuel_price.value_copied(),
            config.fuel_sensitivity,
            base,
        ),
        event: event_adjustment(snapshot.event_multiplier.value_copied(), base),
        weather: weather_adjustment(snapshot.weather_impact.value_copied(), base),
        channel: channel_adjustment(request.channel, base),
        class: class_adjustment(config, &request.booking_class, base),
    };

    let discounts = FareDiscounts {
        loyalty: loyalty_discount(request.loyalty_tier, base),
        corporate: corporate_discount(request.corporate_contract.as_deref(), base),
        geo: geo_discount(&request.country, base),
        advance: advance_discount(request.advance_days_or_derived(now), base),
        group: group_discount(request.group_size, base),
    };

    let total_adjustments = adjustments.total();
    let total_discounts = discounts.total();
    let subtotal = base + total_adjustments - total_discounts;

    for (component, value) in [
        ("total_adjustments", total_adjustments),
        ("total_discounts", total_discounts),
        ("subtotal", subtotal),
    ] {
        if !value.is_finite() {
            return Err(CalcError::NonFinite { component, value });
        }
    }

    Ok(PriceBreakdown {
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
    })
}

/// Demand: d > 0.8 -> +0.30*e*base; d > 0.6 -> +0.15*e*base;
/// d < 0.3 -> -0.10*e*base; else 0. Missing demand contributes nothing.
pub fn demand_adjustment(demand_index: Option<f64>, elasticity: f64, base: f64) -> f64 {
    match demand_index {
        Some(d) if d > 0.8 => 0.30 * elasticity * base,
        Some(d) if d > 0.6 => 0.15 * elasticity * base,
        Some(d) if d < 0.3 => -0.10 * elasticity * base,
        _ => 0.0,
    }
}

/// Seasonal: the configured factor for the departure season times base, 0 when
/// the route has no factor for that season.
pub fn seasonal_adjustment(config: &RouteConfiguration, departure: DateTime<Utc>) -> f64 {
    let season = Season::from_departure(departure);
    config
        .seasonal_factor(season)
        .map(|factor| factor * config.base_fare)
        .unwrap_or(0.0)
}

/// Competitor: mean above base*1.10 -> +0.05*base; below base*0.90 ->
/// -0.05*base; else 0. No competitor data contributes nothing.
pub fn competitor_adjustment(competitor_mean: Option<f64>, base: f64) -> f64 {
    match competitor_mean {
        Some(mean) if mean > base * 1.10 => 0.05 * base,
        Some(mean) if mean < base * 0.90 => -0.05 * base,
        _ => 0.0,
    }
}

/// Fuel: (price - baseline) * sensitivity, clamped to +/-0.15*base.
pub fn fuel_adjustment(fuel_price: Option<f64>, sensitivity: f64, base: f64) -> f64 {
    let Some(price) = fuel_price else {
        return 0.0;
    };
    let raw = (price - FUEL_PRICE_BASELINE) * sensitivity;
    let cap = 0.15 * base;
    raw.clamp(-cap, cap)
}

/// Event: multiplier above 1 adds 0.20*(multiplier-1)*base, capped at
/// +0.25*base.
pub fn event_adjustment(event_multiplier: Option<f64>, base: f64) -> f64 {
    match event_multiplier {
        Some(multiplier) if multiplier > 1.0 => {
            (0.20 * (multiplier - 1.0) * base).min(0.25 * base)
        }
        _ => 0.0,
    }
}

/// Weather: impact above 0.8 -> +0.10*base; below 0.2 -> -0.05*base; else 0.
pub fn weather_adjustment(weather_impact: Option<f64>, base: f64) -> f64 {
    match weather_impact {
        Some(impact) if impact > 0.8 => 0.10 * base,
        Some(impact) if impact < 0.2 => -0.05 * base,
        _ => 0.0,
    }
}

/// Channel: direct -0.05, mobile -0.03, call_center +0.02, gds +0.04 (of
/// base); anything else is neutral.
pub fn channel_adjustment(channel: BookingChannel, base: f64) -> f64 {
    match channel {
        BookingChannel::Direct => -0.05 * base,
        BookingChannel::Mobile => -0.03 * base,
        BookingChannel::CallCenter => 0.02 * base,
        BookingChannel::Gds => 0.04 * base,
        BookingChannel::Ota => 0.0,
    }
}

/// Class: the recorded adjustment is `(multiplier - 1) * base`; unknown
/// classes multiply by 1.0 and contribute nothing.
pub fn class_adjustment(config: &RouteConfiguration, booking_class: &str, base: f64) -> f64 {
    (config.class_multiplier(booking_class) - 1.0) * base
}

/// Loyalty: Diamond 0.15, Platinum 0.12, Gold 0.08, Silver 0.05 of base.
pub fn loyalty_discount(tier: LoyaltyTier, base: f64) -> f64 {
    let fraction = match tier {
        LoyaltyTier::Diamond => 0.15,
        LoyaltyTier::Platinum => 0.12,
        LoyaltyTier::Gold => 0.08,
        LoyaltyTier::Silver => 0.05,
        LoyaltyTier::None => 0.0,
    };
    fraction * base
}

/// Corporate: any non-empty contract id earns 0.12*base. Contract validity is
/// trusted to the caller.
pub fn corporate_discount(contract: Option<&str>, base: f64) -> f64 {
    match contract {
        Some(id) if !id.trim().is_empty() => 0.12 * base,
        _ => 0.0,
    }
}

/// Geo: IN 0.15, BR 0.12, MX 0.10 of base.
pub fn geo_discount(country: &str, base: f64) -> f64 {
    let fraction = match country {
        "IN" => 0.15,
        "BR" => 0.12,
        "MX" => 0.10,
        _ => 0.0,
    };
    fraction * base
}

/// Advance booking: >60 days 0.15, >30 0.10, >14 0.05 of base.
pub fn advance_discount(advance_days: u32, base: f64) -> f64 {
    let fraction = if advance_days > 60 {
        0.15
    } else if advance_days > 30 {
        0.10
    } else if advance_days > 14 {
        0.05
    } else {
        0.0
    };
    fraction * base
}

/// Group: 10+ travellers 0.15, 5+ 0.08 of base.
pub fn group_discount(group_size: u32, base: f64) -> f64 {
    let fraction = if group_size >= 10 {
        0.15
    } else if group_size >= 5 {
        0.08
    } else {
        0.0
    };
    fraction * base
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        CustomerSegment, DeviceType, PaymentMethod, RouteCategory, Signal, TravelPurpose,
    };
    use chrono::TimeZone;
    use itertools::iproduct;
    use uuid::Uuid;

    const EPS: f64 = 1e-9;

    fn config() -> RouteConfiguration {
        RouteConfiguration {
            route: "LAX-JFK".parse().unwrap(),
            base_fare: 300.0,
            currency: "USD".to_string(),
            market_segment: "domestic_us".to_string(),
            category: RouteCategory::LongHaul,
            competitor_routes: vec![],
            seasonality: IndexMap::from([(Season::Summer, 0.05)]),
            demand_elasticity: 1.0,
            fuel_sensitivity: 0.5,
            max_variance: 0.3,
            min_margin: 0.1,
            class_multipliers: IndexMap::from([("Y".to_string(), 1.0), ("J".to_string(), 2.2)]),
            tax_rates: IndexMap::new(),
            fees: IndexMap::new(),
            updated_at: Utc::now(),
        }
    }

    fn request() -> PricingRequest {
        PricingRequest {
            request_id: Uuid::new_v4(),
            route: "LAX-JFK".parse().unwrap(),
            departure: Utc.with_ymd_and_hms(2026, 8, 15, 14, 0, 0).unwrap(),
            arrival: Utc.with_ymd_and_hms(2026, 8, 15, 22, 0, 0).unwrap(),
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

    fn snapshot() -> MarketSnapshot {
        let now = Utc::now();
        MarketSnapshot {
            route: "LAX-JFK".parse().unwrap(),
            average_fare: Signal::fresh(310.0, now),
            demand_index: Signal::fresh(0.7, now),
            competitor_fares: Signal::fresh(
                IndexMap::from([("UA".to_string(), 250.0), ("DL".to_string(), 250.0)]),
                now,
            ),
            fuel_price: Signal::fresh(82.0, now),
            weather_impact: Signal::fresh(0.5, now),
            event_multiplier: Signal::fresh(1.0, now),
            seasonal_factor: Signal::fresh(0.05, now),
            booking_velocity: Signal::fresh(12.0, now),
            load_factor: Signal::fresh(0.8, now),
            collected_at: now,
        }
    }

    #[test]
    fn demand_bands() {
        assert!((demand_adjustment(Some(0.9), 1.0, 300.0) - 90.0).abs() < EPS);
        assert!((demand_adjustment(Some(0.7), 1.0, 300.0) - 45.0).abs() < EPS);
        assert!((demand_adjustment(Some(0.5), 1.0, 300.0) - 0.0).abs() < EPS);
        assert!((demand_adjustment(Some(0.2), 1.0, 300.0) + 30.0).abs() < EPS);
        assert_eq!(demand_adjustment(None, 1.0, 300.0), 0.0);
        // Elasticity scales every band.
        assert!((demand_adjustment(Some(0.9), 0.5, 300.0) - 45.0).abs() < EPS);
    }

    #[test]
    fn competitor_bands() {
        assert!((competitor_adjustment(Some(335.0), 300.0) - 15.0).abs() < EPS);
        assert!((competitor_adjustment(Some(250.0), 300.0) + 15.0).abs() < EPS);
        assert_eq!(competitor_adjustment(Some(300.0), 300.0), 0.0);
        // The band edges themselves are neutral.
        assert_eq!(competitor_adjustment(Some(330.0), 300.0), 0.0);
        assert_eq!(competitor_adjustment(Some(270.0), 300.0), 0.0);
        assert_eq!(competitor_adjustment(None, 300.0), 0.0);
    }

    #[test]
    fn fuel_is_clamped() {
        assert!((fuel_adjustment(Some(82.0), 0.5, 300.0) - 1.0).abs() < EPS);
        assert!((fuel_adjustment(Some(300.0), 1.0, 300.0) - 45.0).abs() < EPS);
        assert!((fuel_adjustment(Some(0.0), 1.0, 300.0) + 45.0).abs() < EPS);
        assert_eq!(fuel_adjustment(None, 0.5, 300.0), 0.0);
    }

    #[test]
    fn event_is_capped() {
        assert_eq!(event_adjustment(Some(1.0), 300.0), 0.0);
        assert!((event_adjustment(Some(1.5), 300.0) - 30.0).abs() < EPS);
        assert!((event_adjustment(Some(4.0), 300.0) - 75.0).abs() < EPS, "cap at 0.25*base");
        assert_eq!(event_adjustment(None, 300.0), 0.0);
    }

    #[test]
    fn weather_bands() {
        assert!((weather_adjustment(Some(0.9), 300.0) - 30.0).abs() < EPS);
        assert!((weather_adjustment(Some(0.1), 300.0) + 15.0).abs() < EPS);
        assert_eq!(weather_adjustment(Some(0.5), 300.0), 0.0);
        assert_eq!(weather_adjustment(None, 300.0), 0.0);
    }

    #[test]
    fn channel_table() {
        assert!((channel_adjustment(BookingChannel::Direct, 300.0) + 15.0).abs() < EPS);
        assert!((channel_adjustment(BookingChannel::Mobile, 300.0) + 9.0).abs() < EPS);
        assert!((channel_adjustment(BookingChannel::CallCenter, 300.0) - 6.0).abs() < EPS);
        assert!((channel_adjustment(BookingChannel::Gds, 300.0) - 12.0).abs() < EPS);
        assert_eq!(channel_adjustment(BookingChannel::Ota, 300.0), 0.0);
    }

    #[test]
    fn class_adjustment_uses_multiplier() {
        let config = config();
        assert_eq!(class_adjustment(&config, "Y", 300.0), 0.0);
        assert!((class_adjustment(&config, "J", 300.0) - 360.0).abs() < EPS);
        assert_eq!(class_adjustment(&config, "Q", 300.0), 0.0, "unknown class");
    }

    #[test]
    fn discount_tables() {
        assert!((loyalty_discount(LoyaltyTier::Diamond, 300.0) - 45.0).abs() < EPS);
        assert!((loyalty_discount(LoyaltyTier::Silver, 300.0) - 15.0).abs() < EPS);
        assert_eq!(loyalty_discount(LoyaltyTier::None, 300.0), 0.0);

        assert!((corporate_discount(Some("ACME-2026"), 300.0) - 36.0).abs() < EPS);
        assert_eq!(corporate_discount(Some("   "), 300.0), 0.0);
        assert_eq!(corporate_discount(None, 300.0), 0.0);

        assert!((geo_discount("IN", 300.0) - 45.0).abs() < EPS);
        assert!((geo_discount("BR", 300.0) - 36.0).abs() < EPS);
        assert!((geo_discount("MX", 300.0) - 30.0).abs() < EPS);
        assert_eq!(geo_discount("US", 300.0), 0.0);

        assert!((advance_discount(61, 300.0) - 45.0).abs() < EPS);
        assert!((advance_discount(45, 300.0) - 30.0).abs() < EPS);
        assert!((advance_discount(15, 300.0) - 15.0).abs() < EPS);
        assert_eq!(advance_discount(14, 300.0), 0.0);

        assert!((group_discount(10, 300.0) - 45.0).abs() < EPS);
        assert!((group_discount(5, 300.0) - 24.0).abs() < EPS);
        assert_eq!(group_discount(4, 300.0), 0.0);
    }

    #[test]
    fn breakdown_sums_exactly() {
        let breakdown = price(&request(), &config(), &snapshot(), Utc::now()).unwrap();
        // demand +45, seasonal +15, competitor -15 (mean 250), fuel +1.
        assert!((breakdown.adjustments.demand - 45.0).abs() < EPS);
        assert!((breakdown.adjustments.seasonal - 15.0).abs() < EPS);
        assert!((breakdown.adjustments.competitor + 15.0).abs() < EPS);
        assert!((breakdown.adjustments.fuel - 1.0).abs() < EPS);
        // loyalty -15, advance -30.
        assert!((breakdown.discounts.loyalty - 15.0).abs() < EPS);
        assert!((breakdown.discounts.advance - 30.0).abs() < EPS);
        assert!((breakdown.subtotal - 301.0).abs() < EPS);
        assert!(
            (breakdown.subtotal
                - (breakdown.base_fare + breakdown.total_adjustments
                    - breakdown.total_discounts))
                .abs()
                < EPS
        );
    }

    #[test]
    fn fully_missing_snapshot_still_prices() {
        let snap = MarketSnapshot::missing("LAX-JFK".parse().unwrap(), Utc::now());
        let breakdown = price(&request(), &config(), &snap, Utc::now()).unwrap();
        assert_eq!(breakdown.adjustments.demand, 0.0);
        assert_eq!(breakdown.adjustments.competitor, 0.0);
        assert_eq!(breakdown.adjustments.fuel, 0.0);
        // Static contributions survive: seasonal, discounts.
        assert!((breakdown.adjustments.seasonal - 15.0).abs() < EPS);
        assert!((breakdown.subtotal - (300.0 + 15.0 - 45.0)).abs() < EPS);
    }

    #[test]
    fn sum_identity_holds_across_input_grid() {
        let config = config();
        let now = Utc::now();
        for (demand, group, tier) in iproduct!(
            [None, Some(0.1), Some(0.5), Some(0.7), Some(0.95)],
            [1u32, 5, 10],
            [LoyaltyTier::None, LoyaltyTier::Gold, LoyaltyTier::Diamond]
        ) {
            let mut snap = snapshot();
            snap.demand_index = match demand {
                Some(d) => Signal::fresh(d, now),
                None => Signal::Missing,
            };
            let mut req = request();
            req.group_size = group;
            req.loyalty_tier = tier;
            let breakdown = price(&req, &config, &snap, now).unwrap();
            let identity = breakdown.base_fare + breakdown.total_adjustments
                - breakdown.total_discounts
                + breakdown.bounds_adjustment;
            assert!((breakdown.subtotal - identity).abs() < EPS);
        }
    }

    #[test]
    fn bad_base_fare_is_fatal() {
        let mut config = config();
        config.base_fare = 0.0;
        assert!(matches!(
            price(&request(), &config, &snapshot(), Utc::now()),
            Err(CalcError::NonPositiveBase(_))
        ));
        config.base_fare = f64::NAN;
        assert!(matches!(
            price(&request(), &config, &snapshot(), Utc::now()),
            Err(CalcError::NonFinite { .. })
        ));
    }
}
