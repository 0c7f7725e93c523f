//! Logging setup on top of `tracing-subscriber`, emitting compact text or JSON lines.

use tracing_subscriber::EnvFilter;

use crate::common::error::{EvalError, EvalResult};

/// Install the global subscriber. `RUST_LOG` wins over `fallback_level`.
pub fn init_logging(fallback_level: &str, json: bool) -> EvalResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback_level))
        .map_err(|err| EvalError::config(format!("invalid log level '{fallback_level}': {err}")))?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let installed = if json {
        builder.json().flatten_event(true).try_init()
    } else {
        builder.compact().try_init()
    };

    installed.map_err(|err| EvalError::internal(format!("failed to initialize logging: {err}")))
}
