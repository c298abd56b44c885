//! Log output for the service.
//!
//! `RUST_LOG` selects what is logged. Request spans come from the tower-http
//! trace layer, so its target is enabled by default alongside this crate.

use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "info,opennote=info,tower_http=info";

pub fn init_tracing() {
    let requested = std::env::var("RUST_LOG").ok();
    let (filter, rejected) = filter_from(requested.as_deref());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_level(true)
        .compact()
        .finish();

    // Tests and embedders may have installed one already; the first one stays.
    if tracing::subscriber::set_global_default(subscriber).is_ok() {
        if let Some(raw) = rejected {
            tracing::warn!("Ignoring unparsable RUST_LOG {:?}, using {}", raw, DEFAULT_FILTER);
        }
    }
}

/// Builds the filter from `RUST_LOG`. An unparsable value falls back to the
/// default and is handed back so it can be reported once logging is up.
fn filter_from(requested: Option<&str>) -> (EnvFilter, Option<String>) {
    match requested.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => (EnvFilter::new(DEFAULT_FILTER), None),
        Some(raw) => match EnvFilter::try_new(raw) {
            Ok(filter) => (filter, None),
            Err(_) => (EnvFilter::new(DEFAULT_FILTER), Some(raw.to_string())),
        },
    }
}
