/// Application context and dependency injection
use crate::{
    account::{AccountManager, OtpManager},
    config::ServerConfig,
    db,
    error::{EstateError, EstateResult},
    mailer::Mailer,
    payments::{FlutterwaveGateway, PaymentGateway, PaymentManager},
    rate_limit::RateLimiter,
    visitor::VisitorTokenManager,
};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application context holding all shared services
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub db: SqlitePool,
    pub account_manager: Arc<AccountManager>,
    pub otp_manager: Arc<OtpManager>,
    pub visitor_manager: Arc<VisitorTokenManager>,
    pub payment_manager: Arc<PaymentManager>,
    pub rate_limiter: Arc<RateLimiter>,
    pub mailer: Arc<Mailer>,
}

impl AppContext {
    /// Create a new application context from configuration
    pub async fn new(config: ServerConfig) -> EstateResult<Self> {
        config.validate()?;

        Self::ensure_directories(&config).await?;

        let db = db::create_pool(&config.storage.database, db::DatabaseOptions::default()).await?;
        db::run_migrations(&db).await?;
        db::test_connection(&db).await?;

        let gateway = match config.payments.gateway.clone() {
            Some(gateway_config) => {
                tracing::info!(base_url = %gateway_config.base_url, "Payment gateway enabled");
                Some(Arc::new(FlutterwaveGateway::new(gateway_config)?) as Arc<dyn PaymentGateway>)
            }
            None => {
                tracing::warn!("No payment gateway configured; payments cannot be verified");
                None
            }
        };

        Self::assemble(config, db, gateway)
    }

    /// Wire the managers together over an open pool
    fn assemble(
        config: ServerConfig,
        db: SqlitePool,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> EstateResult<Self> {
        let config = Arc::new(config);

        let mailer = Arc::new(Mailer::new(
            config.email.clone(),
            config.service.estate_name.clone(),
        )?);
        if !mailer.is_configured() {
            tracing::warn!("Email not configured; OTPs and visit notices will only be logged");
        }

        let account_manager = Arc::new(AccountManager::new(db.clone(), config.clone()));
        let otp_manager = Arc::new(OtpManager::new(db.clone(), config.registration.clone()));
        let payment_manager = Arc::new(PaymentManager::new(
            db.clone(),
            config.payments.clone(),
            gateway,
        ));
        let visitor_manager = Arc::new(VisitorTokenManager::new(
            db.clone(),
            payment_manager.clone(),
            mailer.clone(),
        ));
        let rate_limiter = Arc::new(RateLimiter::new(&config.rate_limit, &config.registration));

        Ok(Self {
            config,
            db,
            account_manager,
            otp_manager,
            visitor_manager,
            payment_manager,
            rate_limiter,
            mailer,
        })
    }

    /// Ensure required directories exist
    async fn ensure_directories(config: &ServerConfig) -> EstateResult<()> {
        let dir = &config.storage.data_directory;
        if !dir.exists() {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                EstateError::Internal(format!("Failed to create directory {:?}: {}", dir, e))
            })?;
        }

        Ok(())
    }

    /// In-memory context for router tests
    #[cfg(test)]
    pub(crate) async fn for_tests(
        config: ServerConfig,
        gateway: Option<Arc<dyn PaymentGateway>>,
    ) -> Self {
        let db = db::test_pool().await;
        Self::assemble(config, db, gateway).unwrap()
    }
}
