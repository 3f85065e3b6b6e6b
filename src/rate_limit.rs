/// Rate Limiting System
use crate::{
    config::{RateLimitConfig, RegistrationConfig},
    error::{EstateError, EstateResult},
};
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use governor::{
    clock::{Clock, DefaultClock, QuantaInstant},
    state::{InMemoryState, NotKeyed},
    DefaultKeyedRateLimiter, NotUntil, Quota, RateLimiter as GovernorLimiter,
};
use std::{num::NonZeroU32, sync::Arc};

type DirectLimiter = GovernorLimiter<NotKeyed, InMemoryState, DefaultClock>;

fn non_zero(n: u32) -> NonZeroU32 {
    NonZeroU32::new(n).unwrap_or(NonZeroU32::MIN)
}

/// Rate limiter manager
#[derive(Clone)]
pub struct RateLimiter {
    enabled: bool,
    authenticated: Arc<DirectLimiter>,
    unauthenticated: Arc<DirectLimiter>,
    /// OTP requests per e-mail address
    otp_requests: Arc<DefaultKeyedRateLimiter<String>>,
    clock: DefaultClock,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig, registration: &RegistrationConfig) -> Self {
        let auth_quota = Quota::per_second(non_zero(config.authenticated_rps))
            .allow_burst(non_zero(config.burst_size));

        let unauth_quota = Quota::per_second(non_zero(config.unauthenticated_rps))
            .allow_burst(non_zero(config.burst_size / 5));

        let otp_quota = Quota::per_hour(non_zero(registration.otp_requests_per_hour));

        Self {
            enabled: config.enabled,
            authenticated: Arc::new(GovernorLimiter::direct(auth_quota)),
            unauthenticated: Arc::new(GovernorLimiter::direct(unauth_quota)),
            otp_requests: Arc::new(GovernorLimiter::keyed(otp_quota)),
            clock: DefaultClock::default(),
        }
    }

    fn exceeded(&self, not_until: NotUntil<QuantaInstant>) -> EstateError {
        EstateError::RateLimitExceeded {
            retry_after: not_until.wait_time_from(self.clock.now()),
        }
    }

    /// Check rate limit for authenticated user
    pub fn check_authenticated(&self) -> EstateResult<()> {
        self.authenticated.check().map_err(|e| self.exceeded(e))
    }

    /// Check rate limit for unauthenticated user
    pub fn check_unauthenticated(&self) -> EstateResult<()> {
        self.unauthenticated.check().map_err(|e| self.exceeded(e))
    }

    /// Check the per-address OTP budget. Applies even when request limiting
    /// is switched off.
    pub fn check_otp_request(&self, email: &str) -> EstateResult<()> {
        self.otp_requests
            .check_key(&email.to_lowercase())
            .map_err(|e| self.exceeded(e))
    }

    /// Drop idle per-address state
    pub fn retain_recent(&self) {
        self.otp_requests.retain_recent();
    }
}

/// Rate limiting middleware
pub async fn rate_limit_middleware(
    State(ctx): State<crate::context::AppContext>,
    request: Request,
    next: Next,
) -> Result<Response, EstateError> {
    if !ctx.rate_limiter.enabled {
        return Ok(next.run(request).await);
    }

    let has_auth_header = request.headers().get("authorization").is_some();

    if has_auth_header {
        ctx.rate_limiter.check_authenticated()?;
    } else {
        ctx.rate_limiter.check_unauthenticated()?;
    }

    Ok(next.run(request).await)
}
