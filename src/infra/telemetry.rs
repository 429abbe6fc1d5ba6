use std::sync::Once;

use metrics::{Unit, describe_counter};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    registry::LookupSpan,
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install the global tracing subscriber described by `logging`. Fails if one
/// is already installed.
///
/// Events go to stderr; stdout carries command output only.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(ErrorLayer::default())
        .with(event_layer(logging.format))
        .try_init()
        .map_err(|err| InfraError::telemetry(format!("subscriber already installed: {err}")))
}

fn event_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'span> LookupSpan<'span>,
{
    match format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed(),
    }
}

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "chorus_query_cache_hit_total",
            Unit::Count,
            "Reads served from a fresh query cache entry, labelled by slot."
        );
        describe_counter!(
            "chorus_query_cache_miss_total",
            Unit::Count,
            "Reads that had to fetch from the backend, labelled by slot."
        );
        describe_counter!(
            "chorus_query_cache_evict_total",
            Unit::Count,
            "Entries evicted because a slot reached its capacity."
        );
        describe_counter!(
            "chorus_query_cache_invalidated_total",
            Unit::Count,
            "Entries marked stale by invalidation."
        );
        describe_counter!(
            "chorus_query_cache_reset_total",
            Unit::Count,
            "Global query cache resets."
        );
        describe_counter!(
            "chorus_backend_request_total",
            Unit::Count,
            "Requests sent to the hosted backend, labelled by table and outcome."
        );
    });
}
