use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr; stdout is reserved for command output.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register descriptions for every metric the query cache and session emit.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "vitrine_query_hit_total",
            Unit::Count,
            "Reads served from a fresh cache entry."
        );
        describe_counter!(
            "vitrine_query_miss_total",
            Unit::Count,
            "Reads that found no fresh entry and started or joined a fetch."
        );
        describe_counter!(
            "vitrine_query_dedup_total",
            Unit::Count,
            "Reads that joined a fetch already in flight for the same key."
        );
        describe_counter!(
            "vitrine_query_evict_total",
            Unit::Count,
            "Cache entries evicted due to capacity."
        );
        describe_histogram!(
            "vitrine_query_fetch_ms",
            Unit::Milliseconds,
            "Fetcher latency in milliseconds, retries included."
        );
        describe_counter!(
            "vitrine_session_refresh_total",
            Unit::Count,
            "Access token refresh outcomes, labelled by result."
        );
    });
}
