// src/breaker.rs

use crate::context::RequestContext;
use crate::fetchable::{FetchError, Fetchable};
use crate::metrics;
use crate::types::Route;
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half_open",
        }
    }
}

/// Circuit breaker tunables.
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// How long an OPEN breaker rejects calls before probing.
    pub cooldown: Duration,
    /// Concurrent probe calls allowed while HALF_OPEN.
    pub half_open_probes: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
            half_open_probes: 1,
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    probes_in_flight: u32,
}

/// Per-client circuit breaker.
///
/// While OPEN every acquire short-circuits, so no fetch is issued to the
/// protected client. After the cooldown one probe (configurable) is let
/// through HALF_OPEN; its outcome decides between CLOSED and a fresh OPEN
/// period. Transitions are atomic under a single mutex and emit metrics.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    name: &'static str,
    config: BreakerConfig,
    inner: Arc<Mutex<BreakerInner>>,
}

/// Token proving the breaker admitted a call. Must be settled with
/// [`CircuitBreaker::on_success`] or [`CircuitBreaker::on_outcome`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerPermit {
    probe: bool,
}

impl CircuitBreaker {
    pub fn new(name: &'static str, config: BreakerConfig) -> Self {
        Self {
            name,
            config,
            inner: Arc::new(Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probes_in_flight: 0,
            })),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> BreakerState {
        self.inner.lock().expect("breaker mutex poisoned").state
    }

    /// Ask to issue one call. `None` means the breaker is OPEN (or its
    /// HALF_OPEN probe budget is spent) and the call must be short-circuited.
    pub fn try_acquire(&self) -> Option<BreakerPermit> {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            BreakerState::Closed => Some(BreakerPermit { probe: false }),
            BreakerState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed < self.config.cooldown {
                    return None;
                }
                self.transition(&mut inner, BreakerState::HalfOpen);
                inner.probes_in_flight = 1;
                Some(BreakerPermit { probe: true })
            }
            BreakerState::HalfOpen => {
                if inner.probes_in_flight >= self.config.half_open_probes {
                    return None;
                }
                inner.probes_in_flight += 1;
                Some(BreakerPermit { probe: true })
            }
        }
    }

    /// Settle a permit from an error outcome. Neutral errors (cancellation)
    /// release the permit without counting either way.
    pub fn on_outcome(&self, permit: BreakerPermit, error: Option<&FetchError>) {
        match error {
            None => self.on_success(permit),
            Some(err) if err.counts_for_breaker() => self.on_failure(permit),
            Some(_) => self.on_neutral(permit),
        }
    }

    pub fn on_success(&self, permit: BreakerPermit) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        inner.consecutive_failures = 0;
        if permit.probe {
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
        }
        if inner.state != BreakerState::Closed {
            inner.opened_at = None;
            inner.probes_in_flight = 0;
            self.transition(&mut inner, BreakerState::Closed);
        }
    }

    pub fn on_failure(&self, permit: BreakerPermit) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        if permit.probe {
            inner.probes_in_flight = 0;
            inner.opened_at = Some(Instant::now());
            self.transition(&mut inner, BreakerState::Open);
            return;
        }
        inner.consecutive_failures += 1;
        if inner.state == BreakerState::Closed
            && inner.consecutive_failures >= self.config.failure_threshold
        {
            inner.opened_at = Some(Instant::now());
            self.transition(&mut inner, BreakerState::Open);
        }
    }

    fn on_neutral(&self, permit: BreakerPermit) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        if permit.probe {
            // A cancelled probe proves nothing; fall back to OPEN and let the
            // next cooldown expiry probe again.
            inner.probes_in_flight = inner.probes_in_flight.saturating_sub(1);
            if inner.state == BreakerState::HalfOpen && inner.probes_in_flight == 0 {
                self.transition(&mut inner, BreakerState::Open);
            }
        }
    }

    fn transition(&self, inner: &mut BreakerInner, to: BreakerState) {
        if inner.state == to {
            return;
        }
        match to {
            BreakerState::Open => warn!(
                "breaker {} opened after {} consecutive failures",
                self.name, inner.consecutive_failures
            ),
            BreakerState::HalfOpen => debug!("breaker {} half-open, probing", self.name),
            BreakerState::Closed => debug!("breaker {} closed", self.name),
        }
        metrics::increment_breaker_transition(self.name, inner.state.as_str(), to.as_str());
        metrics::set_breaker_state(self.name, to as u8 as f64);
        inner.state = to;
    }
}

/// A `Fetchable` fronted by a circuit breaker.
///
/// This is the only shape the aggregator and the fallback engine consume:
/// the raw clients never appear on the request path unguarded.
pub struct Guarded<T: Clone + Send + Sync + 'static> {
    client: Arc<dyn Fetchable<Output = T>>,
    breaker: CircuitBreaker,
}

impl<T: Clone + Send + Sync + 'static> Guarded<T> {
    pub fn new(client: Arc<dyn Fetchable<Output = T>>, config: BreakerConfig) -> Self {
        let breaker = CircuitBreaker::new(client.name(), config);
        Self { client, breaker }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

#[async_trait]
impl<T: Clone + Send + Sync + 'static> Fetchable for Guarded<T> {
    type Output = T;

    fn name(&self) -> &'static str {
        self.client.name()
    }

    async fn fetch(&self, route: &Route, ctx: &RequestContext) -> Result<T, FetchError> {
        let Some(permit) = self.breaker.try_acquire() else {
            metrics::increment_breaker_short_circuit(self.breaker.name());
            return Err(FetchError::Unavailable(format!(
                "circuit open for {}",
                self.breaker.name()
            )));
        };
        let result = self.client.fetch(route, ctx).await;
        self.breaker.on_outcome(permit, result.as_ref().err());
        result
    }
}
