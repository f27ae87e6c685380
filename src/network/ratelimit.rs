use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core::{Error, Result};

/// Something a gateway consumes that may be limited
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    /// A connection attempt by the named gateway
    Accept(String),
    /// One upstream message from the named gateway
    GatewayUp(String),
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Accept(gateway_id) => write!(f, "accept:{}", gateway_id),
            Resource::GatewayUp(gateway_id) => write!(f, "gateway-up:{}", gateway_id),
        }
    }
}

/// Admission control for gateway traffic
pub trait RateLimiter: Send + Sync {
    /// Consumes one unit of the resource, failing with [`Error::RateLimited`]
    /// when none is available
    fn require(&self, resource: &Resource) -> Result<()>;
}

/// Rate limiter that admits everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopRateLimiter;

impl RateLimiter for NoopRateLimiter {
    fn require(&self, _resource: &Resource) -> Result<()> {
        Ok(())
    }
}

/// Token bucket settings, applied to every resource separately
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    /// Burst size
    pub capacity: u32,
    /// Tokens added per second
    pub refill_per_sec: f64,
}

impl Default for TokenBucketConfig {
    fn default() -> Self {
        TokenBucketConfig {
            capacity: 10,
            refill_per_sec: 1.0,
        }
    }
}

/// How often idle buckets are swept from the table
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    updated: Instant,
}

impl Bucket {
    fn refilled(&self, now: Instant, config: &TokenBucketConfig) -> f64 {
        let elapsed = now.duration_since(self.updated).as_secs_f64();
        (self.tokens + elapsed * config.refill_per_sec).min(config.capacity as f64)
    }
}

#[derive(Debug)]
struct Buckets {
    entries: HashMap<Resource, Bucket>,
    last_sweep: Instant,
}

/// One token bucket per resource
///
/// A bucket that has refilled to capacity behaves exactly like a missing
/// one, so such buckets are dropped periodically to keep the table bounded
/// by the resources active within a refill period.
#[derive(Debug)]
pub struct TokenBucketLimiter {
    config: TokenBucketConfig,
    buckets: Mutex<Buckets>,
}

impl Default for TokenBucketLimiter {
    fn default() -> Self {
        TokenBucketLimiter::new(TokenBucketConfig::default())
    }
}

impl TokenBucketLimiter {
    pub fn new(config: TokenBucketConfig) -> Self {
        TokenBucketLimiter {
            config,
            buckets: Mutex::new(Buckets {
                entries: HashMap::new(),
                last_sweep: Instant::now(),
            }),
        }
    }

    fn buckets(&self) -> MutexGuard<'_, Buckets> {
        self.buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Drops buckets that have refilled to capacity
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut buckets = self.buckets();
        self.sweep(&mut buckets, now);
    }

    /// Number of resources currently tracked
    pub fn tracked(&self) -> usize {
        self.buckets().entries.len()
    }

    fn sweep(&self, buckets: &mut Buckets, now: Instant) {
        let capacity = self.config.capacity as f64;
        let before = buckets.entries.len();
        buckets
            .entries
            .retain(|_, bucket| bucket.refilled(now, &self.config) < capacity);
        buckets.last_sweep = now;

        let evicted = before - buckets.entries.len();
        if evicted > 0 {
            debug!(evicted, remaining = buckets.entries.len(), "Rate limiter cleanup");
        }
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn require(&self, resource: &Resource) -> Result<()> {
        let now = Instant::now();
        let mut buckets = self.buckets();
        if now.duration_since(buckets.last_sweep) >= SWEEP_INTERVAL {
            self.sweep(&mut buckets, now);
        }

        let bucket = buckets.entries.entry(resource.clone()).or_insert(Bucket {
            tokens: self.config.capacity as f64,
            updated: now,
        });
        bucket.tokens = bucket.refilled(now, &self.config);
        bucket.updated = now;

        if bucket.tokens < 1.0 {
            warn!(resource = %resource, "Rate limit exceeded");
            return Err(Error::RateLimited(resource.to_string()));
        }
        bucket.tokens -= 1.0;
        Ok(())
    }
}
