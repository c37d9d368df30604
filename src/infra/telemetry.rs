use std::sync::Once;

use metrics::{Unit, describe_counter};
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
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "notes_cache_query_hit_total",
            Unit::Count,
            "Total number of query cache reads that found an existing record."
        );
        describe_counter!(
            "notes_cache_query_miss_total",
            Unit::Count,
            "Total number of query cache reads that triggered the executor."
        );
        describe_counter!(
            "notes_cache_record_resolved_total",
            Unit::Count,
            "Total number of computation records that settled with a value."
        );
        describe_counter!(
            "notes_cache_record_rejected_total",
            Unit::Count,
            "Total number of computation records that settled with an error."
        );
        describe_counter!(
            "notes_cache_domain_begin_total",
            Unit::Count,
            "Total number of query cache domains started."
        );
    });
}
