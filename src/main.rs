use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

pub mod config;
pub mod fetch;
pub mod mimir;
pub mod resolve;
pub mod warm;

use config::app_config::{load_config, setup_resolver, setup_tls_connector};
use warm::Trigger;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let app = match load_config() {
        Ok(app) => app,
        Err(err) => {
            error!(error = %err, "configuration is invalid, refusing to start");
            std::process::exit(2);
        }
    };

    let resolver = match setup_resolver(&app.dns_hosts) {
        Ok(resolver) => resolver,
        Err(err) => {
            error!(error = %err, "DNS resolver setup failed, refusing to start");
            std::process::exit(2);
        }
    };

    let connector = setup_tls_connector().expect("Failed to build TLS connector");

    info!(
        interval_seconds = app.config.interval_seconds,
        distribution_id = %app.config.distribution_id,
        pops = %app.config.pops,
        "starting prewarm scheduler"
    );

    loop {
        let trigger = Trigger::default();
        if let Err(err) = warm::run(&app, &resolver, &connector, &trigger).await {
            // A failed run never stops the schedule; the next tick retries
            // from a clean slate, resolution map included.
            error!(error = %err, "prewarm run failed");
        }
        sleep(Duration::from_secs(app.config.interval_seconds)).await;
    }
}
