use std::process;

use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;
use vitrine::{Storefront, config, error::AppError, infra::telemetry};

mod commands;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, status = ?error.status_code(), "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_writer(std::io::stderr)
        .with_max_level(Level::ERROR)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    telemetry::init(&settings.logging)?;
    info!(
        target = "vitrine::startup",
        base_url = %settings.api.base_url,
        stale_time_ms = settings.cache.stale_time_ms,
        "starting"
    );

    let storefront = Storefront::start(&settings.api, settings.cache.clone()).await?;
    let result = commands::dispatch(&storefront, &cli_args).await;
    storefront.dispose();
    result
}
