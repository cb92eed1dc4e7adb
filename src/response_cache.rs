// src/response_cache.rs

//! # Response Cache
//!
//! Two-tier cache for finished quotes: a sharded in-process LRU in front of an
//! optional remote distributed store. Values are bincode-serialized envelopes
//! carrying their own expiry timestamp, so both tiers evict lazily on read and
//! a slow clock on the remote side can never resurrect an expired quote.
//!
//! Caching is strictly best-effort: every failure is logged and swallowed,
//! a broken cache degrades to recomputation, never to a failed request.

use crate::metrics;
use crate::types::{PricingRequest, PricingResponse};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, warn};
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

/// Canonical tuple of request fields that makes two quotes interchangeable.
/// Day-granular departure and bucketed advance days keep the key space small
/// without ever conflating fares that price differently.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QuoteKey {
    route: String,
    booking_class: String,
    segment: &'static str,
    channel: &'static str,
    departure_date: NaiveDate,
    advance_bucket: &'static str,
    group_size: u32,
    currency: String,
    loyalty: &'static str,
    corporate: Option<String>,
    country: String,
}

/// Advance-days bucket aligned with the discount tiers, so every fare inside
/// one bucket prices identically along that axis.
pub fn advance_bucket(days: u32) -> &'static str {
    if days > 60 {
        "61plus"
    } else if days > 30 {
        "31-60"
    } else if days > 14 {
        "15-30"
    } else if days > 7 {
        "8-14"
    } else {
        "0-7"
    }
}

impl QuoteKey {
    pub fn from_request(request: &PricingRequest, now: DateTime<Utc>) -> Self {
        Self {
            route: request.route.to_string(),
            booking_class: request.booking_class.clone(),
            segment: request.segment.as_str(),
            channel: request.channel.as_str(),
            departure_date: request.departure.date_naive(),
            advance_bucket: advance_bucket(request.advance_days_or_derived(now)),
            group_size: request.group_size,
            currency: request.currency.clone(),
            loyalty: request.loyalty_tier.as_str(),
            corporate: request.corporate_contract.clone(),
            country: request.country.clone(),
        }
    }

    /// Stable string form used as the storage key in both tiers.
    pub fn fingerprint(&self) -> String {
        format!(
            "quote:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}:{}",
            self.route,
            self.booking_class,
            self.segment,
            self.channel,
            self.departure_date,
            self.advance_bucket,
            self.group_size,
            self.currency,
            self.loyalty,
            self.corporate.as_deref().unwrap_or("-"),
            self.country,
        )
    }
}

/// Remote distributed tier. `get` distinguishes not-found (`Ok(None)`) from
/// transient errors; transient errors are logged by the caller and ignored.
#[async_trait]
pub trait RemoteQuoteStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, bytes: &[u8], ttl: Duration) -> Result<()>;
}

/// Wire envelope stored in both tiers.
#[derive(Debug, Serialize, Deserialize)]
struct CachedQuote {
    expires_at_unix_ms: i64,
    response: PricingResponse,
}

/// Two-tier quote cache. Get order is local then remote; set writes both.
pub struct QuoteCache {
    shards: Vec<Mutex<LruCache<String, Vec<u8>>>>,
    remote: Option<Arc<dyn RemoteQuoteStore>>,
    remote_op_timeout: Duration,
}

impl QuoteCache {
    /// `shards = 0` sizes the shard count to the available parallelism.
    pub fn new(capacity: usize, shards: usize) -> Self {
        let shards = if shards == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            shards
        };
        let per_shard = NonZeroUsize::new((capacity / shards).max(1))
            .expect("per-shard capacity is at least one");
        Self {
            shards: (0..shards)
                .map(|_| Mutex::new(LruCache::new(per_shard)))
                .collect(),
            remote: None,
            remote_op_timeout: Duration::from_millis(150),
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteQuoteStore>, op_timeout: Duration) -> Self {
        self.remote = Some(remote);
        self.remote_op_timeout = op_timeout;
        self
    }

    fn shard(&self, fingerprint: &str) -> &Mutex<LruCache<String, Vec<u8>>> {
        let mut hasher = DefaultHasher::new();
        fingerprint.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % self.shards.len()]
    }

    /// Look up a quote. Expired entries are evicted on read; remote hits are
    /// promoted into the local tier.
    pub async fn get(&self, key: &QuoteKey, now: DateTime<Utc>) -> Option<PricingResponse> {
        let fingerprint = key.fingerprint();

        let local = {
            let mut shard = self.shard(&fingerprint).lock().expect("cache shard poisoned");
            let decoded = shard.get(&fingerprint).map(|bytes| decode(bytes, now));
            match decoded {
                Some(Decoded::Live(response)) => Some(response),
                Some(Decoded::Expired) | Some(Decoded::Corrupt) => {
                    shard.pop(&fingerprint);
                    None
                }
                None => None,
            }
        };
        if let Some(response) = local {
            metrics::increment_cache_hit("local");
            return Some(response);
        }

        if let Some(remote) = &self.remote {
            match tokio::time::timeout(self.remote_op_timeout, remote.get(&fingerprint)).await {
                Ok(Ok(Some(bytes))) => match decode(&bytes, now) {
                    Decoded::Live(response) => {
                        metrics::increment_cache_hit("remote");
                        let mut shard =
                            self.shard(&fingerprint).lock().expect("cache shard poisoned");
                        shard.put(fingerprint, bytes);
                        return Some(response);
                    }
                    Decoded::Expired => {}
                    Decoded::Corrupt => warn!("corrupt remote cache entry for {fingerprint}"),
                },
                Ok(Ok(None)) => {}
                Ok(Err(err)) => debug!("remote cache get failed for {fingerprint}: {err:#}"),
                Err(_) => debug!("remote cache get timed out for {fingerprint}"),
            }
        }

        metrics::increment_cache_miss();
        None
    }

    /// Store a quote in both tiers with `ttl`. Last writer wins; failures are
    /// swallowed.
    pub async fn set(
        &self,
        key: &QuoteKey,
        response: &PricingResponse,
        ttl: Duration,
        now: DateTime<Utc>,
    ) {
        let fingerprint = key.fingerprint();
        let envelope = CachedQuote {
            expires_at_unix_ms: (now + chrono::Duration::from_std(ttl).unwrap_or_default())
                .timestamp_millis(),
            response: response.clone(),
        };
        let bytes = match bincode::serialize(&envelope) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!("failed to serialize quote for cache: {err}");
                return;
            }
        };

        {
            let mut shard = self.shard(&fingerprint).lock().expect("cache shard poisoned");
            shard.put(fingerprint.clone(), bytes.clone());
        }
        metrics::set_local_cache_entries(self.len() as f64);

        if let Some(remote) = &self.remote {
            match tokio::time::timeout(self.remote_op_timeout, remote.set(&fingerprint, &bytes, ttl))
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(err)) => debug!("remote cache set failed for {fingerprint}: {err:#}"),
                Err(_) => debug!("remote cache set timed out for {fingerprint}"),
            }
        }
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.lock().expect("cache shard poisoned").len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

enum Decoded {
    Live(PricingResponse),
    Expired,
    Corrupt,
}

fn decode(bytes: &[u8], now: DateTime<Utc>) -> Decoded {
    match bincode::deserialize::<CachedQuote>(bytes) {
        Ok(envelope) if envelope.expires_at_unix_ms > now.timestamp_millis() => {
            Decoded::Live(envelope.response)
        }
        Ok(_) => Decoded::Expired,
        Err(_) => Decoded::Corrupt,
    }
}
