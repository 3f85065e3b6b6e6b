use crate::metrics;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{interval, Duration};
use tracing::{error, info};

pub mod tasks;

/// Job scheduler for background tasks
pub struct JobScheduler {
    context: Arc<crate::context::AppContext>,
    started: Instant,
}

impl JobScheduler {
    pub fn new(context: Arc<crate::context::AppContext>) -> Self {
        Self {
            context,
            started: Instant::now(),
        }
    }

    /// Start all background jobs
    pub fn start(self: Arc<Self>) {
        info!("Starting background job scheduler");

        tokio::spawn(Self::credential_cleanup_job(Arc::clone(&self)));
        tokio::spawn(Self::subscription_sweep_job(Arc::clone(&self)));
        tokio::spawn(Self::health_check_job(Arc::clone(&self)));

        info!("Background jobs started");
    }

    /// Cleanup expired sessions and OTPs (runs every hour)
    async fn credential_cleanup_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(3600));

        loop {
            interval.tick().await;
            let start = Instant::now();

            let result = tasks::cleanup_expired_credentials(&scheduler.context).await;
            metrics::record_background_job(
                "credential_cleanup",
                result.is_ok(),
                start.elapsed().as_secs_f64(),
            );

            match result {
                Ok(count) if count > 0 => info!(count, "Cleaned up expired sessions and OTPs"),
                Ok(_) => {}
                Err(e) => error!("Failed to cleanup expired credentials: {}", e),
            }
        }
    }

    /// Expire subscriptions and refresh payment standings (runs every 15 minutes)
    async fn subscription_sweep_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(900));

        loop {
            interval.tick().await;
            let start = Instant::now();

            let result = tasks::sweep_subscriptions(&scheduler.context).await;
            metrics::record_background_job(
                "subscription_sweep",
                result.is_ok(),
                start.elapsed().as_secs_f64(),
            );

            match result {
                Ok(report) => info!(
                    expired = report.expired_subscriptions,
                    standings_changed = report.standings_changed,
                    abandoned = report.abandoned_payments,
                    "Subscription sweep finished"
                ),
                Err(e) => error!("Subscription sweep failed: {}", e),
            }
        }
    }

    /// Health check job (runs every 5 minutes)
    async fn health_check_job(scheduler: Arc<Self>) {
        let mut interval = interval(Duration::from_secs(300));

        loop {
            interval.tick().await;
            metrics::UPTIME_SECONDS.set(scheduler.started.elapsed().as_secs_f64());

            if let Err(e) = tasks::health_check(&scheduler.context).await {
                error!("Health check failed: {}", e);
            }
        }
    }
}
