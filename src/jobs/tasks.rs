/// Background task implementations
use crate::{context::AppContext, error::EstateResult};
use chrono::Duration;

/// Pending checkouts older than this are given up on
const PAYMENT_ABANDON_HOURS: i64 = 24;

/// Rows touched by one subscription sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_subscriptions: u64,
    pub standings_changed: u64,
    pub abandoned_payments: u64,
}

/// Remove expired sessions and spent or expired OTPs
pub async fn cleanup_expired_credentials(ctx: &AppContext) -> EstateResult<u64> {
    let sessions = ctx.account_manager.cleanup_expired_sessions().await?;
    let otps = ctx.otp_manager.cleanup_expired().await?;
    ctx.rate_limiter.retain_recent();

    Ok(sessions + otps)
}

/// Expire subscription windows, recompute standings and abandon stale checkouts
pub async fn sweep_subscriptions(ctx: &AppContext) -> EstateResult<SweepReport> {
    let payments = &ctx.payment_manager;

    Ok(SweepReport {
        expired_subscriptions: payments.expire_subscriptions().await?,
        standings_changed: payments.refresh_standings().await?,
        abandoned_payments: payments
            .abandon_stale_payments(Duration::hours(PAYMENT_ABANDON_HOURS))
            .await?,
    })
}

/// Health check - verify the database answers
pub async fn health_check(ctx: &AppContext) -> EstateResult<()> {
    sqlx::query("SELECT 1").fetch_one(&ctx.db).await?;
    Ok(())
}
