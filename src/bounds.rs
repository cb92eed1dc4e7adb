// src/bounds.rs

//! # Bounds & Compliance Filter
//!
//! Post-processes a raw breakdown: clamps the subtotal into the configured
//! variance band, raises it to the margin floor, applies the tax and fee
//! layer, and rounds everything to the currency's minor unit (half-to-even).
//!
//! The clamp/floor/rounding correction is recorded in the breakdown's
//! `bounds_adjustment` field, so the sum identity
//! `subtotal = base + adjustments - discounts + bounds_adjustment`
//! holds exactly after post-processing. Applying the filter twice is a
//! fixed point.

use crate::calculator::CalcError;
use crate::types::{currency_minor_units, DemandIndicator, PriceBreakdown, RouteConfiguration};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::time::Duration;

/// Clamp, floor, tax, fee and round `breakdown` in place.
pub fn apply(
    breakdown: &mut PriceBreakdown,
    config: &RouteConfiguration,
    currency: &str,
) -> Result<(), CalcError> {
    let base = breakdown.base_fare;
    let minor_units = currency_minor_units(currency);

    // Recompute the raw subtotal from the named components so repeated
    // application converges instead of compounding corrections.
    let raw = base + breakdown.total_adjustments - breakdown.total_discounts;
    if !raw.is_finite() {
        return Err(CalcError::NonFinite {
            component: "subtotal",
            value: raw,
        });
    }

    let lower = base * (1.0 - config.max_variance);
    let upper = base * (1.0 + config.max_variance);
    let floor = base * (1.0 + config.min_margin);
    let bounded = raw.clamp(lower, upper).max(floor);

    let subtotal = round_minor(bounded, minor_units)?;
    breakdown.bounds_adjustment = subtotal - raw;
    breakdown.subtotal = subtotal;

    breakdown.taxes = config
        .tax_rates
        .iter()
        .map(|(code, rate)| Ok((code.clone(), round_minor(subtotal * rate, minor_units)?)))
        .collect::<Result<_, CalcError>>()?;
    breakdown.fees = config
        .fees
        .iter()
        .map(|(code, amount)| Ok((code.clone(), round_minor(*amount, minor_units)?)))
        .collect::<Result<_, CalcError>>()?;

    breakdown.total_taxes = breakdown.taxes.values().sum();
    breakdown.total_fees = breakdown.fees.values().sum();
    breakdown.final_total = subtotal + breakdown.total_taxes + breakdown.total_fees;

    if !breakdown.final_total.is_finite() || breakdown.final_total < 0.0 {
        return Err(CalcError::NonFinite {
            component: "final_total",
            value: breakdown.final_total,
        });
    }
    Ok(())
}

/// Round to the currency's minor unit, ties to even.
fn round_minor(value: f64, minor_units: u32) -> Result<f64, CalcError> {
    let decimal = Decimal::try_from(value).map_err(|_| CalcError::NonFinite {
        component: "rounding",
        value,
    })?;
    decimal
        .round_dp_with_strategy(minor_units, RoundingStrategy::MidpointNearestEven)
        .to_f64()
        .ok_or(CalcError::NonFinite {
            component: "rounding",
            value,
        })
}

/// Validity horizon for a quote, derived from the demand indicator: hot
/// markets expire quickly, dead markets are honored for an hour.
pub fn validity_for(indicator: DemandIndicator) -> Duration {
    match indicator {
        DemandIndicator::High => Duration::from_secs(5 * 60),
        DemandIndicator::Medium => Duration::from_secs(15 * 60),
        DemandIndicator::Low => Duration::from_secs(30 * 60),
        DemandIndicator::VeryLow => Duration::from_secs(60 * 60),
    }
}
