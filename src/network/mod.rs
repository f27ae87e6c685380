//! Gateway connections
//!
//! [`GatewayServer`] admits gateways and hands out a [`Connection`] handle
//! for the network server plus a [`Session`] for the task that drives the
//! gateway. [`ProtocolBridge`] is that task: it runs the event loop of one
//! gateway over a framed transport.

mod bridge;
mod connection;
mod outbound;
mod ratelimit;

pub use self::bridge::ProtocolBridge;
pub use self::connection::{Connection, ScheduledDownlink, Session, UplinkStream};
pub use self::ratelimit::{NoopRateLimiter, RateLimiter, Resource, TokenBucketConfig, TokenBucketLimiter};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info, warn};

use crate::band::BandRegistry;
use crate::core::{Error, GatewayIdentity, Result, ServerConfig, SessionId};

type ActiveSessions = Arc<Mutex<HashMap<String, SessionId>>>;

/// Admits gateways and tracks their live sessions
#[derive(Clone)]
pub struct GatewayServer {
    config: Arc<ServerConfig>,
    registry: &'static BandRegistry,
    rate_limiter: Arc<dyn RateLimiter>,
    active: ActiveSessions,
    next_session: Arc<AtomicU8>,
}

impl GatewayServer {
    /// Creates a server without rate limiting
    pub fn new(config: ServerConfig) -> Self {
        Self::with_rate_limiter(config, Arc::new(NoopRateLimiter))
    }

    pub fn with_rate_limiter(config: ServerConfig, rate_limiter: Arc<dyn RateLimiter>) -> Self {
        GatewayServer {
            config: Arc::new(config),
            registry: BandRegistry::global(),
            rate_limiter,
            active: Arc::new(Mutex::new(HashMap::new())),
            next_session: Arc::new(AtomicU8::new(rand::random())),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &dyn RateLimiter {
        self.rate_limiter.as_ref()
    }

    /// Returns whether the gateway has a live session
    pub fn is_connected(&self, gateway_id: &str) -> bool {
        lock(&self.active).contains_key(gateway_id)
    }

    /// Opens a session for a gateway
    ///
    /// Fails with [`Error::AuthenticationRequired`] when the gateway presents
    /// no token and unauthenticated access is disabled, with
    /// [`Error::BandNotFound`] when its frequency plan is unknown, and with
    /// [`Error::AlreadyConnected`] while it has another live session.
    pub fn connect(&self, identity: GatewayIdentity) -> Result<(Connection, Session)> {
        if identity.auth_token.is_none() && !self.config.allow_unauthenticated {
            warn!(gateway_id = %identity.gateway_id, "Unauthenticated gateway rejected");
            return Err(Error::AuthenticationRequired(identity.gateway_id));
        }

        let band = match identity.phy_version {
            Some(version) => self.registry.get(&identity.band_id, version)?,
            None => self.registry.get_latest(&identity.band_id)?,
        };

        let session_id = {
            let mut active = lock(&self.active);
            if active.contains_key(&identity.gateway_id) {
                return Err(Error::AlreadyConnected(identity.gateway_id));
            }
            let session_id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
            active.insert(identity.gateway_id.clone(), session_id);
            session_id
        };

        info!(
            gateway_id = %identity.gateway_id,
            session_id = %session_id,
            band = band.id,
            version = %band.version,
            "Gateway connected"
        );
        let registration = Registration {
            active: self.active.clone(),
            gateway_id: identity.gateway_id.clone(),
            session_id,
        };
        Ok(Session::open(&identity, session_id, band, &self.config, registration))
    }
}

fn lock(active: &ActiveSessions) -> std::sync::MutexGuard<'_, HashMap<String, SessionId>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Entry in the live session table, removed when the session is dropped
#[derive(Debug)]
pub(crate) struct Registration {
    active: ActiveSessions,
    gateway_id: String,
    session_id: SessionId,
}

impl Drop for Registration {
    fn drop(&mut self) {
        let mut active = lock(&self.active);
        if active.get(&self.gateway_id) == Some(&self.session_id) {
            active.remove(&self.gateway_id);
            debug!(gateway_id = %self.gateway_id, session_id = %self.session_id, "Session unregistered");
        }
    }
}
