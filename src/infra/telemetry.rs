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
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "tessera_cache_hit_total",
            Unit::Count,
            "Read-through cache hits, labelled by freshness (fresh|stale)."
        );
        describe_counter!(
            "tessera_cache_miss_total",
            Unit::Count,
            "Read-through cache misses that invoked the resolver."
        );
        describe_counter!(
            "tessera_cache_store_error_total",
            Unit::Count,
            "Cache store failures absorbed at the cache boundary, labelled by operation."
        );
        describe_counter!(
            "tessera_cache_revalidate_total",
            Unit::Count,
            "Background revalidations, labelled by outcome (ok|error|revoked)."
        );
        describe_counter!(
            "tessera_http_responses_total",
            Unit::Count,
            "HTTP responses served, labelled by status class."
        );
        describe_histogram!(
            "tessera_http_request_ms",
            Unit::Milliseconds,
            "End-to-end HTTP request latency in milliseconds."
        );
        describe_counter!(
            "tessera_upstream_retry_total",
            Unit::Count,
            "Upstream requests retried after a transient failure."
        );
        describe_histogram!(
            "tessera_upstream_request_ms",
            Unit::Milliseconds,
            "Upstream request latency per attempt in milliseconds."
        );
    });
}
