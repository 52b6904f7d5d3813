//! vitals-capture - facial video in, vital-sign estimates out.
//!
//! This is the main library crate. It provides the capture session
//! controller and the clients for the prediction backend.

pub mod capture;
pub mod config;
pub mod history;
pub mod recorder;
pub mod upload;
pub mod utils;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default log filter when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "vitals_capture=debug,reqwest=info";

/// Initialize tracing/logging
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();

    tracing::info!("Starting vitals-capture v{}", env!("CARGO_PKG_VERSION"));
}
