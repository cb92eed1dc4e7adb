// src/route_store.rs
// Read-mostly route configuration map. Readers are lock-free; reloads build a
// whole new map off to the side and swap it in atomically, so a request never
// observes a partially loaded catalog.

use crate::types::{Route, RouteCategory, RouteConfiguration, Season};
use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::info;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

type RouteMap = HashMap<Route, Arc<RouteConfiguration>>;

/// Source of the full route configuration map. Invoked at startup and on
/// reload; a failed load must leave the previous snapshot untouched.
pub trait RouteConfigSource: Send + Sync {
    fn load_all(&self) -> Result<RouteMap>;
}

/// In-memory, atomically replaceable map of route -> configuration.
pub struct RouteConfigStore {
    snapshot: ArcSwap<RouteMap>,
}

impl RouteConfigStore {
    pub fn empty() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    pub fn from_map(map: RouteMap) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(map),
        }
    }

    pub fn from_source(source: &dyn RouteConfigSource) -> Result<Self> {
        let store = Self::empty();
        store.reload(source)?;
        Ok(store)
    }

    /// Replace the whole snapshot from `source`. On error the previous
    /// snapshot stays visible.
    pub fn reload(&self, source: &dyn RouteConfigSource) -> Result<usize> {
        let map = source.load_all()?;
        let count = map.len();
        self.snapshot.store(Arc::new(map));
        info!("route configuration reloaded, {count} routes");
        Ok(count)
    }

    /// Lock-free lookup; `None` means the route is not in the whitelist.
    pub fn get(&self, route: &Route) -> Option<Arc<RouteConfiguration>> {
        self.snapshot.load().get(route).cloned()
    }

    pub fn contains(&self, route: &Route) -> bool {
        self.snapshot.load().contains_key(route)
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }
}

/// One route record as written in the routes file. The route itself is the
/// map key, so the record omits it.
#[derive(Debug, Deserialize)]
struct RouteRecord {
    base_fare: f64,
    currency: String,
    market_segment: String,
    category: RouteCategory,
    #[serde(default)]
    competitor_routes: Vec<String>,
    #[serde(default)]
    seasonality: IndexMap<Season, f64>,
    demand_elasticity: f64,
    fuel_sensitivity: f64,
    max_variance: f64,
    min_margin: f64,
    #[serde(default)]
    class_multipliers: IndexMap<String, f64>,
    #[serde(default)]
    tax_rates: IndexMap<String, f64>,
    #[serde(default)]
    fees: IndexMap<String, f64>,
    #[serde(default)]
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RoutesFile {
    #[serde(default)]
    routes: HashMap<String, RouteRecord>,
}

/// Route catalog stored as a TOML document, one table per route.
pub struct TomlRouteSource {
    path: PathBuf,
}

impl TomlRouteSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl RouteConfigSource for TomlRouteSource {
    fn load_all(&self) -> Result<RouteMap> {
        let raw = std::fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read routes file {}", self.path.display()))?;
        let file: RoutesFile = toml::from_str(&raw)
            .with_context(|| format!("failed to parse routes file {}", self.path.display()))?;

        let mut map = HashMap::with_capacity(file.routes.len());
        for (key, record) in file.routes {
            let route: Route = key
                .parse()
                .with_context(|| format!("bad route key {key:?} in routes file"))?;
            let config = RouteConfiguration {
                route: route.clone(),
                base_fare: record.base_fare,
                currency: record.currency,
                market_segment: record.market_segment,
                category: record.category,
                competitor_routes: record.competitor_routes,
                seasonality: record.seasonality,
                demand_elasticity: record.demand_elasticity,
                fuel_sensitivity: record.fuel_sensitivity,
                max_variance: record.max_variance,
                min_margin: record.min_margin,
                class_multipliers: record.class_multipliers,
                tax_rates: record.tax_rates,
                fees: record.fees,
                updated_at: record.updated_at.unwrap_or_else(Utc::now),
            };
            map.insert(route, Arc::new(config));
        }
        Ok(map)
    }
}
