//! Rate limiting and request logging middleware.

use crate::error::ServiceError;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    DefaultKeyedRateLimiter, Quota, RateLimiter,
};
use std::{num::NonZeroU32, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// Global rate limiter (not keyed by client).
pub type GlobalLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate limiter keyed by registration id.
pub type RegistrationLimiter = DefaultKeyedRateLimiter<Uuid>;

const FALLBACK_PER_MINUTE: NonZeroU32 = match NonZeroU32::new(60) {
    Some(n) => n,
    None => unreachable!(),
};

const REGISTRATIONS_PREFIX: &str = "/v1/registrations/";

/// Rate limiter state shared across requests.
#[derive(Clone)]
pub struct RateLimitState {
    pub global: Arc<GlobalLimiter>,
    pub per_registration: Arc<RegistrationLimiter>,
}

impl RateLimitState {
    /// A limiter allowing `global_per_minute` across all clients and
    /// `per_registration_per_minute` against any single registration.
    /// Zero falls back to the default of 60.
    pub fn new(global_per_minute: u32, per_registration_per_minute: u32) -> Self {
        Self {
            global: Arc::new(RateLimiter::direct(per_minute(global_per_minute))),
            per_registration: Arc::new(RateLimiter::keyed(per_minute(
                per_registration_per_minute,
            ))),
        }
    }

    /// Create a permissive rate limiter for testing.
    pub fn permissive() -> Self {
        Self::new(10_000, 10_000)
    }

    /// Periodically forget registrations whose quota has fully replenished.
    pub fn spawn_pruning(&self, interval: Duration) -> JoinHandle<()> {
        let limiter = self.per_registration.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                limiter.retain_recent();
                debug!(tracked = limiter.len(), "Pruned per-registration rate limits");
            }
        })
    }
}

fn per_minute(requests: u32) -> Quota {
    Quota::per_minute(NonZeroU32::new(requests).unwrap_or(FALLBACK_PER_MINUTE))
}

/// Registration id addressed by a `/v1/registrations/:id/...` path.
fn registration_id(path: &str) -> Option<Uuid> {
    let rest = path.strip_prefix(REGISTRATIONS_PREFIX)?;
    let id = rest.split('/').next()?;
    Uuid::parse_str(id).ok()
}

/// Returns 429 Too Many Requests once the global quota, or the quota of
/// the addressed registration, is exhausted.
pub async fn rate_limit_middleware(
    State(rate_limit): State<RateLimitState>,
    request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    if rate_limit.global.check().is_err() {
        warn!(uri = %request.uri(), "Global rate limit exceeded");
        return Err(ServiceError::RateLimitExceeded);
    }

    if let Some(id) = registration_id(request.uri().path()) {
        if rate_limit.per_registration.check_key(&id).is_err() {
            warn!(registration_id = %id, uri = %request.uri(), "Registration rate limit exceeded");
            return Err(ServiceError::RateLimitExceeded);
        }
    }

    Ok(next.run(request).await)
}

/// Logging middleware for requests.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    let duration = start.elapsed();
    let status = response.status();

    if status.is_server_error() {
        warn!(%method, %uri, %status, ?duration, "Request failed");
    } else {
        debug!(%method, %uri, %status, ?duration, "Request completed");
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_exhaustion() {
        let state = RateLimitState::new(1, 1);

        assert!(state.global.check().is_ok());
        assert!(state.global.check().is_err());
    }

    #[test]
    fn test_zero_falls_back_to_default() {
        let state = RateLimitState::new(0, 0);
        for _ in 0..60 {
            assert!(state.global.check().is_ok());
        }
        assert!(state.global.check().is_err());
    }

    #[test]
    fn test_registration_quotas_are_independent() {
        let state = RateLimitState::new(100, 2);
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());

        assert!(state.per_registration.check_key(&first).is_ok());
        assert!(state.per_registration.check_key(&first).is_ok());
        assert!(state.per_registration.check_key(&first).is_err());
        assert!(state.per_registration.check_key(&second).is_ok());
    }

    #[test]
    fn test_registration_id_from_path() {
        let id = Uuid::new_v4();

        assert_eq!(
            registration_id(&format!("/v1/registrations/{}/phone/code", id)),
            Some(id)
        );
        assert_eq!(registration_id(&format!("/v1/registrations/{}", id)), Some(id));
        assert_eq!(registration_id("/v1/registrations"), None);
        assert_eq!(registration_id("/v1/registrations/not-a-uuid/submit"), None);
        assert_eq!(registration_id("/health"), None);
    }
}
