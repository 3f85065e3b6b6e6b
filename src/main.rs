/// Estate Gate - residential estate access control
///
/// Residents and landlords issue visitor tokens, guards verify them at the
/// gate and record check-in and check-out, and issuing is gated by a paid
/// subscription settled through Flutterwave.

mod account;
mod api;
mod auth;
mod config;
mod context;
mod db;
mod error;
mod jobs;
mod mailer;
mod metrics;
mod payments;
mod rate_limit;
mod server;
mod visitor;

use config::{LoggingConfig, ServerConfig};
use context::AppContext;
use error::EstateResult;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> EstateResult<()> {
    // Load configuration first so logging honours it
    let config = ServerConfig::from_env()?;

    init_tracing(&config.logging);

    print_banner(&config.service.estate_name);

    // Create application context
    let ctx = Arc::new(AppContext::new(config).await?);

    // Start background jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    // Start server
    server::serve((*ctx).clone()).await?;

    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("estate_gate={},tower_http=debug", logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn print_banner(estate_name: &str) {
    println!(
        r#"
    ______     __        __          ______      __
   / ____/____/ /_____ _/ /____     / ____/___ _/ /____
  / __/ / ___/ __/ __ `/ __/ _ \   / / __/ __ `/ __/ _ \
 / /___(__  ) /_/ /_/ / /_/  __/  / /_/ / /_/ / /_/  __/
/_____/____/\__/\__,_/\__/\___/   \____/\__,_/\__/\___/

        {} access control v{}
        "#,
        estate_name,
        env!("CARGO_PKG_VERSION")
    );
}
