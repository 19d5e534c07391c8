//! Shared contract modules and process setup for the Lambda binaries.

pub use rag_stack_core::{delay, invocation_logging, lifecycle, vector_index};

use tracing_subscriber::EnvFilter;

/// JSON logs without timestamps; CloudWatch stamps every line already.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_target(false)
        .with_current_span(false)
        .without_time()
        .try_init();
}
