// Tracing initialization.
//
// Grounded on `main.rs`'s `tracing_subscriber::fmt` setup (an `EnvFilter`
// seeded from a computed default directive).

use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber at the given default level.
///
/// `RUST_LOG` still overrides this when present, via `from_env_lossy`.
pub fn init(level: tracing::Level) {
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .init();
}
