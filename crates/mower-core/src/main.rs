//! `mower` – autonomous mower controller daemon.
//!
//! Responsibilities of this shell: resolve configuration from the
//! environment, initialize structured logging, install the SIGINT/SIGTERM
//! handler and the panic hook (both of which park the blade and request a
//! cooperative shutdown), then hand control to the
//! [`ResourceManager`][mower_core::ResourceManager].

use tracing::{error, info};

use mower_core::{ResourceManager, RuntimeConfig};

fn main() {
    init_logging();

    let mut config = RuntimeConfig::from_env();
    config.force_cleanup = std::env::args().any(|arg| arg == "--force-cleanup");

    let mut manager = ResourceManager::from_config(config);
    let shutdown = manager.shutdown_flag();

    // SIGINT/SIGTERM request a cooperative shutdown; every worker observes
    // the flag at its next suspension point.
    let signal_flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("termination signal received");
        signal_flag.trigger();
    }) {
        error!(error = %e, "could not install signal handler");
    }

    if let Err(e) = manager.start() {
        error!(error = %e, "startup failed");
        manager.stop();
        std::process::exit(1);
    }

    // The panic hook disables the blade before the process dies: a panic
    // on any thread must never leave the blade spinning.
    let panic_flag = shutdown.clone();
    let panic_blade = manager.registry().blade();
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        error!(%panic_info, "panic; disabling blade and shutting down");
        if let Some(blade) = &panic_blade {
            let _ = blade.disable();
        }
        panic_flag.trigger();
        default_hook(panic_info);
    }));

    manager.run();
    manager.stop();
}

/// Structured logging in the selected format.
///
/// The filter comes from `RUST_LOG` when set, else `LOG_LEVEL`, else
/// `info`.  `MOWER_LOG_FORMAT=json` switches to newline-delimited JSON for
/// log aggregators.
fn init_logging() {
    let fallback = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&fallback));

    if std::env::var("MOWER_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .compact()
            .init();
    }
}
