//! Tracing setup for applications embedding the client

/// Install a `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Loads `.env` first so `RUST_LOG` can live there. Calling it twice is
/// harmless; the second install is ignored.
pub fn init() {
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .try_init();

    tracing::debug!("[STARTUP] Tracing initialized with filter {}", env_filter);
}
