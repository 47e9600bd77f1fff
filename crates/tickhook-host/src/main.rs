//! Simulated host for the tickhook facility.
//!
//! Stands in for the opaque program whose tick is intercepted: it lays out
//! a code image containing a tick routine, lets the hook find and redirect
//! that routine, then runs the routine on a fixed interval so the BEFORE
//! and AFTER notifications flow to the registered listeners.
//!
//! # Startup Sequence
//!
//! 1. Load configuration (first CLI argument, `TICKHOOK_CONFIG`, or
//!    `tickhook-config.yaml`)
//! 2. Initialize structured logging (tracing)
//! 3. Build the synthetic code image and the host around it
//! 4. Build the signature resolver over the image
//! 5. Register the log and stats listeners on the event bus
//! 6. Activate the tick hook
//! 7. Run the tick loop until `max_ticks` or Ctrl-C
//! 8. Log the summary

mod error;
mod host;
mod listeners;

use std::path::{Path, PathBuf};
use std::rc::Rc;

use tickhook_core::clock::SteadyClock;
use tickhook_core::config::{LogFormat, LoggingConfig, TickHookConfig};
use tickhook_core::dispatch::TickDispatcher;
use tickhook_core::hook::TickHook;
use tickhook_core::signature::SignatureResolver;
use tickhook_events::EventBus;
use tickhook_types::TickEvent;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::HostError;
use crate::host::SimulatedHost;
use crate::listeners::{StatsListener, TickStats};

/// Config file used when neither a CLI argument nor `TICKHOOK_CONFIG`
/// names one.
const DEFAULT_CONFIG_FILE: &str = "tickhook-config.yaml";

/// Environment variable naming the config file.
const ENV_CONFIG: &str = "TICKHOOK_CONFIG";

/// Application entry point for the simulated host.
///
/// # Errors
///
/// Returns an error if configuration, image layout, or hook activation
/// fails.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration. Logging depends on it, so whether the file
    //    was found is reported once the subscriber is up.
    let config_path = config_path();
    let (config, found) = load_config(&config_path)?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!("tickhook-host starting");
    if found {
        info!(path = %config_path.display(), "Configuration loaded");
    } else {
        warn!(path = %config_path.display(), "Config file not found, using defaults");
    }

    // 3. Build the host.
    let image = host::build_image(&config.host)?;
    let mut host = SimulatedHost::new(&config.host)?;
    info!(
        base = %image.base(),
        size = image.len(),
        routine_offset = config.host.routine_offset,
        "Host image laid out"
    );

    // 4. Build the resolver.
    let resolver =
        SignatureResolver::from_config(image, &config.signatures).map_err(HostError::from)?;
    info!(
        host_version = resolver.host_version(),
        signatures = resolver.len(),
        "Signature resolver ready"
    );

    // 5. Register listeners.
    let bus = Rc::new(EventBus::<TickEvent>::new());
    let stats = Rc::new(TickStats::default());
    bus.subscribe(listeners::log_event);
    bus.subscribe(StatsListener(Rc::clone(&stats)));

    // 6. Activate the hook.
    let dispatcher = TickDispatcher::new(Rc::new(SteadyClock::new()), host.counter(), bus);
    let mut hook = TickHook::new(config.tick.clone(), dispatcher);
    hook.activate(&resolver, host.redirects_mut())
        .map_err(HostError::from)?;

    // 7. Run the tick loop.
    info!(
        tick_interval_ms = config.host.tick_interval_ms,
        max_ticks = config.host.max_ticks,
        "Entering tick loop"
    );
    let interrupted = tokio::select! {
        _ = host.run(&config.host) => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        warn!("Interrupted, stopping tick loop");
    }

    // 8. Log results.
    info!(
        steps = host.steps(),
        before = stats.before_count(),
        after = stats.after_count(),
        mean_delta_ms = ?stats.mean_delta_ms(),
        max_delta_ms = stats.max_delta_ms(),
        out_of_order = stats.out_of_order_count(),
        hook_active = hook.is_active(),
        "tickhook-host shutdown complete"
    );

    Ok(())
}

/// Pick the config file: first CLI argument, then `TICKHOOK_CONFIG`, then
/// `tickhook-config.yaml` in the working directory.
fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var(ENV_CONFIG).ok())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE), PathBuf::from)
}

/// Load configuration from `path`, falling back to defaults (with
/// environment overrides) when the file does not exist. The flag reports
/// whether the file was found.
fn load_config(path: &Path) -> Result<(TickHookConfig, bool), HostError> {
    if path.exists() {
        return Ok((TickHookConfig::from_file(path)?, true));
    }
    let mut config = TickHookConfig::default();
    config.apply_env_overrides()?;
    config.validate()?;
    Ok((config, false))
}

/// Install the global tracing subscriber. `RUST_LOG` wins over the
/// configured level.
fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Pretty => builder.init(),
    }
}
