//! Quickstart - runs the driver walkthrough against `MONGODB_URI`.

use std::process::ExitCode;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mongo_change_feed::{quickstart, QuickstartConfig};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mongo_change_feed=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = QuickstartConfig::from_env();
    tracing::info!(
        database = %config.database,
        collection = %config.collection,
        "starting quickstart"
    );

    match quickstart::run(&config).await {
        Ok(()) => {
            tracing::info!("quickstart complete");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "quickstart failed");
            ExitCode::FAILURE
        }
    }
}
