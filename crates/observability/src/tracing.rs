//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    // Store operations carry their context as span fields (stream identity,
    // batch size, committed counts, blob digests and sizes); default the
    // backends to debug so those spans show up without extra configuration.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,calista_infra=debug,calista_blobstore=debug")
    });

    // JSON lines with the active span and its ancestry attached, so events
    // logged inside an append, read, or blob ingest keep their stream and
    // digest fields. Span-close events double as per-operation timings.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .try_init();
}
