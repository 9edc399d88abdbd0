//! Structured logging setup for applications embedding this crate.
//!
//! The crate's own code only ever calls the `tracing` macros; it never
//! installs a subscriber itself (a library must not dictate how its host
//! process logs). This module is the one piece of ambient stack that *is*
//! public API: it packages the subscriber wiring the donor's `main.rs`
//! hand-rolled (`EnvFilter` over a log file with a stderr fallback) as a
//! reusable initializer, so a host application gets the donor's logging
//! behavior without re-deriving it.

use std::fs::OpenOptions;
use std::path::Path;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a global `tracing` subscriber. `RUST_LOG` overrides the default
/// filter (`info`, with this crate's own targets at `debug`). If `log_path`
/// is given and the file can be opened for writing, logs go there;
/// otherwise they go to stderr.
///
/// Must be called at most once per process; a second call is a no-op
/// (mirrors `tracing_subscriber`'s own `set_global_default` semantics,
/// which errors rather than panics on a double-init).
pub fn init(log_path: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mailsync_core=debug"));

    let log_file = log_path.and_then(|path| {
        OpenOptions::new().create(true).write(true).truncate(true).open(path).ok()
    });

    let registry = tracing_subscriber::registry().with(filter);
    let result = if let Some(file) = log_file {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::sync::Mutex::new(file)).with_ansi(false))
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)).try_init()
    };

    if let Err(error) = result {
        tracing::debug!(%error, "tracing subscriber already installed, skipping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_does_not_panic_without_a_log_path() {
        init(None);
    }

    #[test]
    fn init_is_idempotent() {
        init(None);
        init(None);
    }
}
