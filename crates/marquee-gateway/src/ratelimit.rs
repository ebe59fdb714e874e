//! Per-client fixed-window rate limiting.
//!
//! Each client key maps to `{window_start, count}`. A request in a fresh
//! window resets the count; otherwise it is admitted while `count < limit`.
//! Denied requests do not increment. Bursts at a window boundary are bounded
//! by twice the limit over twice the window.
//!
//! Idle client state is evicted by a periodic sweep every two windows.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::{
    extract::{ConnectInfo, FromRequestParts, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use marquee_core::{RateLimitConfig, RateLimitPolicy};
use tokio::time::Instant;

use crate::auth::{AuthError, AuthService, Identity, gate};
use crate::tasks::BackgroundTasks;

/// Bucket identity for rate-limit state.
///
/// Authenticated users are keyed by ID so clients behind one NAT are counted
/// separately and one user cannot escape the cap by changing address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKey {
    /// Authenticated user ID.
    User(u64),
    /// Source address.
    Ip(IpAddr),
    /// No identity and no peer address available.
    Unknown,
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::User(id) => write!(f, "user:{id}"),
            Self::Ip(ip) => write!(f, "ip:{ip}"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ClientWindow {
    window_start: Instant,
    count: u32,
    last_seen: Instant,
}

/// Fixed-window request counter shared by all requests of one policy.
#[derive(Debug)]
pub struct RateLimiter {
    name: &'static str,
    limit: u32,
    window: Duration,
    clients: Mutex<HashMap<ClientKey, ClientWindow>>,
}

impl RateLimiter {
    /// Create a limiter admitting `limit` requests per `window` per client.
    #[must_use]
    pub fn new(name: &'static str, limit: u32, window: Duration) -> Self {
        Self {
            name,
            limit,
            window,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Create a limiter from a configured policy.
    #[must_use]
    pub fn from_policy(name: &'static str, policy: &RateLimitPolicy) -> Self {
        Self::new(name, policy.requests, policy.window())
    }

    /// Policy name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Requests admitted per window.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Window length.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Interval between eviction sweeps, also the idle age that gets evicted.
    #[must_use]
    pub fn sweep_interval(&self) -> Duration {
        self.window.saturating_mul(2)
    }

    /// Record a request and report whether it is admitted.
    pub fn allow(&self, key: ClientKey) -> bool {
        self.check(key).is_ok()
    }

    /// Record a request. On denial returns the time until the window resets.
    ///
    /// # Errors
    ///
    /// Returns the retry delay when the client is over its limit.
    pub fn check(&self, key: ClientKey) -> Result<(), Duration> {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: ClientKey, now: Instant) -> Result<(), Duration> {
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);

        let entry = clients.entry(key).or_insert(ClientWindow {
            window_start: now,
            count: 0,
            last_seen: now,
        });
        entry.last_seen = now;

        if now.duration_since(entry.window_start) >= self.window {
            entry.window_start = now;
            entry.count = 0;
        }

        if entry.count >= self.limit {
            return Err(self.window.saturating_sub(now.duration_since(entry.window_start)));
        }

        entry.count += 1;
        Ok(())
    }

    /// Drop state for clients idle longer than the sweep interval.
    ///
    /// Returns the number of entries removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    fn sweep_at(&self, now: Instant) -> usize {
        let max_idle = self.sweep_interval();
        let mut clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);

        let before = clients.len();
        clients.retain(|_, w| now.duration_since(w.last_seen) <= max_idle);
        before - clients.len()
    }

    /// Number of clients with live state.
    #[must_use]
    pub fn tracked_clients(&self) -> usize {
        self.clients
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Named rate-limit policies for route groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatePolicy {
    /// Login, registration, refresh and logout.
    Auth,
    /// Search endpoints.
    Search,
    /// General API traffic.
    Api,
}

impl RatePolicy {
    /// All policies.
    pub const ALL: [Self; 3] = [Self::Auth, Self::Search, Self::Api];

    /// Policy name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Search => "search",
            Self::Api => "api",
        }
    }
}

/// One limiter per policy.
#[derive(Debug, Clone)]
pub struct RateLimiters {
    auth: Arc<RateLimiter>,
    search: Arc<RateLimiter>,
    api: Arc<RateLimiter>,
}

impl RateLimiters {
    /// Build limiters from configuration.
    #[must_use]
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            auth: Arc::new(RateLimiter::from_policy(RatePolicy::Auth.name(), &config.auth)),
            search: Arc::new(RateLimiter::from_policy(
                RatePolicy::Search.name(),
                &config.search,
            )),
            api: Arc::new(RateLimiter::from_policy(RatePolicy::Api.name(), &config.api)),
        }
    }

    /// Limiter for a policy.
    #[must_use]
    pub fn get(&self, policy: RatePolicy) -> &Arc<RateLimiter> {
        match policy {
            RatePolicy::Auth => &self.auth,
            RatePolicy::Search => &self.search,
            RatePolicy::Api => &self.api,
        }
    }

    /// Middleware state for a policy, for use with [`rate_limit`].
    #[must_use]
    pub fn layer_state(&self, policy: RatePolicy, auth: Arc<AuthService>) -> RateLimitState {
        RateLimitState {
            limiter: Arc::clone(self.get(policy)),
            auth,
        }
    }

    /// Start one eviction sweep per limiter.
    pub fn spawn_sweepers(&self, tasks: &BackgroundTasks) {
        for policy in RatePolicy::ALL {
            let limiter = Arc::clone(self.get(policy));
            let period = limiter.sweep_interval();

            tasks.spawn_periodic("rate-limit-sweep", period, move || {
                let limiter = Arc::clone(&limiter);
                async move {
                    let removed = limiter.sweep();
                    if removed > 0 {
                        tracing::debug!(policy = limiter.name(), removed, "Evicted idle rate-limit state");
                    }
                }
            });
        }
    }
}

/// State carried by the [`rate_limit`] middleware.
#[derive(Debug, Clone)]
pub struct RateLimitState {
    limiter: Arc<RateLimiter>,
    auth: Arc<AuthService>,
}

impl RateLimitState {
    /// State for a standalone limiter.
    #[must_use]
    pub const fn new(limiter: Arc<RateLimiter>, auth: Arc<AuthService>) -> Self {
        Self { limiter, auth }
    }
}

/// Derive the client key: identity, then a valid bearer token, then peer IP.
pub async fn client_key(parts: &mut Parts, auth: &AuthService) -> ClientKey {
    if let Some(identity) = parts.extensions.get::<Identity>() {
        return ClientKey::User(identity.user_id);
    }

    if let Some(identity) = gate::extract_token(parts).and_then(|t| auth.validate_token(&t).ok()) {
        return ClientKey::User(identity.user_id);
    }

    match ConnectInfo::<SocketAddr>::from_request_parts(parts, &()).await {
        Ok(ConnectInfo(addr)) => ClientKey::Ip(addr.ip()),
        Err(_) => ClientKey::Unknown,
    }
}

/// Throttle a route group with the limiter in `state`.
///
/// # Errors
///
/// `RateLimited` (429) when the client is over its limit.
pub async fn rate_limit(
    State(state): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, AuthError> {
    let (mut parts, body) = request.into_parts();
    let key = client_key(&mut parts, &state.auth).await;

    if let Err(retry_after) = state.limiter.check(key) {
        tracing::warn!(
            policy = state.limiter.name(),
            client = %key,
            "Rate limit exceeded"
        );
        return Err(AuthError::RateLimited { retry_after });
    }

    Ok(next.run(Request::from_parts(parts, body)).await)
}
