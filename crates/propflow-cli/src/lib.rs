//! Propflow operator CLI: drives the migration control API over HTTP.

pub mod client;

pub use client::{ApiClient, RunStatus};

/// Share of the queue that reached a final status, in percent.
pub fn percent_done(status: &RunStatus) -> f64 {
    if status.total_photos <= 0 {
        return 0.0;
    }
    let done = status.processed_photos + status.error_photos;
    (done as f64 / status.total_photos as f64) * 100.0
}

/// One-line progress summary.
pub fn format_status(status: &RunStatus) -> String {
    let mut line = format!(
        "{:<9} {:>5.1}%  processed {}/{}  pending {}  processing {}  errors {}",
        status.status,
        percent_done(status),
        status.processed_photos,
        status.total_photos,
        status.pending_photos,
        status.processing_photos,
        status.error_photos,
    );
    if let Some(err) = &status.last_error {
        line.push_str(&format!("  last error: {}", err));
    }
    line
}

/// Initialize tracing for the CLI. Quiet unless RUST_LOG asks otherwise.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "propflow=warn".into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
