// src/reference_price.rs
// Rolling per-route reference price feeding the RISING/STABLE/FALLING
// indicator. An exponentially weighted mean keeps the reference smooth enough
// that a single spiky quote does not flip the trend.

use crate::types::Route;
use dashmap::DashMap;

pub struct ReferencePriceBook {
    prices: DashMap<Route, f64>,
    alpha: f64,
}

impl ReferencePriceBook {
    pub fn new(alpha: f64) -> Self {
        Self {
            prices: DashMap::new(),
            alpha: alpha.clamp(0.0, 1.0),
        }
    }

    pub fn get(&self, route: &Route) -> Option<f64> {
        self.prices.get(route).map(|entry| *entry.value())
    }

    /// Fold one finalized quote into the rolling reference.
    pub fn observe(&self, route: &Route, final_total: f64) {
        if !final_total.is_finite() || final_total <= 0.0 {
            return;
        }
        self.prices
            .entry(route.clone())
            .and_modify(|reference| {
                *reference = self.alpha * final_total + (1.0 - self.alpha) * *reference;
            })
            .or_insert(final_total);
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

impl Default for ReferencePriceBook {
    fn default() -> Self {
        Self::new(0.2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_observation_seeds_the_reference() {
        let book = ReferencePriceBook::default();
        let route: Route = "LAX-JFK".parse().unwrap();
        assert!(book.get(&route).is_none());
        book.observe(&route, 350.0);
        assert_eq!(book.get(&route), Some(350.0));
    }

    #[test]
    fn reference_moves_slowly_toward_new_prices() {
        let book = ReferencePriceBook::new(0.2);
        let route: Route = "LAX-JFK".parse().unwrap();
        book.observe(&route, 300.0);
        book.observe(&route, 400.0);
        let reference = book.get(&route).unwrap();
        assert!((reference - 320.0).abs() < 1e-9);
    }

    #[test]
    fn garbage_observations_are_ignored() {
        let book = ReferencePriceBook::default();
        let route: Route = "LAX-JFK".parse().unwrap();
        book.observe(&route, f64::NAN);
        book.observe(&route, -10.0);
        assert!(book.get(&route).is_none());
    }
}
