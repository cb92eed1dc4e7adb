//! # Skyfare Pricing SDK
//!
//! A high-performance Rust library for real-time dynamic airfare pricing.
//! This crate implements the pricing core of a revenue-management platform:
//! a request-scoped pipeline that turns an itinerary query plus customer
//! context into a final fare, its audit-grade breakdown and a validity
//! horizon, while guaranteeing an answer even when every upstream data source
//! is down.
//!
//! ## Overview
//!
//! The core separates the infrastructure layer (aggregation, caching,
//! admission control) from the pricing rules. It focuses on:
//!
//! - **Aggregation**: Parallel multi-source market snapshots with per-field
//!   freshness and circuit breakers per upstream client
//! - **Calculation**: A pure rule engine of named additive adjustments and
//!   discounts over a per-route base fare
//! - **Compliance**: Variance clamps, margin floors, tax/fee layering and
//!   per-currency rounding
//! - **Resilience**: A five-layer fallback ladder ending in an emergency
//!   table that never fails
//!
//! ## Architecture
//!
//! A request enters the [`orchestrator::PricingOrchestrator`], which consults
//! the [`response_cache`], then asks the [`aggregator`] for a snapshot and the
//! [`calculator`] for a breakdown; [`bounds`] finalizes; the cache stores. If
//! the snapshot is fully degraded or compute fails, the [`fallback`] engine
//! walks its strategies in order.

// Core Types
/// Request deadline and cancellation propagation
pub mod context;
/// Client-visible error surface
pub mod errors;
/// The single upstream-fetch capability and its typed error
pub mod fetchable;
/// Domain model: requests, snapshots, breakdowns, responses
pub mod types;

// Data Plane
/// Market snapshot fan-out and merge
pub mod aggregator;
/// Typed upstream data-source clients
pub mod clients;
/// Atomic snapshot store for per-route configuration
pub mod route_store;

// Pricing Plane
/// Variance clamp, margin floor, taxes, fees, rounding, validity
pub mod bounds;
/// Pure pricing rule engine
pub mod calculator;
/// Rolling per-route reference prices for the trend indicator
pub mod reference_price;

// Resilience
/// Circuit breaker primitive and the guarded-client wrapper
pub mod breaker;
/// Ordered degradation strategies
pub mod fallback;
/// Keyed admission control
pub mod rate_limit;

// Request Handling
/// The quote request state machine
pub mod orchestrator;
/// Per-field request validation
pub mod validation;

// Infrastructure
/// Metrics and observability
pub mod metrics;
/// Redis remote cache tier (optional, feature-gated)
pub mod redis_store;
/// Two-tier response cache with volatility-derived TTLs
pub mod response_cache;
/// Configuration management
pub mod settings;

// Re-exports for convenience
pub use aggregator::MarketAggregator;
pub use context::RequestContext;
pub use errors::PricingError;
pub use fallback::FallbackEngine;
pub use fetchable::Fetchable;
pub use orchestrator::PricingOrchestrator;
pub use response_cache::QuoteCache;
pub use route_store::RouteConfigStore;
pub use settings::Settings;
pub use types::{PricingRequest, PricingResponse};
