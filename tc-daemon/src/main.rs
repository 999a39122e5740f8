//! tunectl daemon (tunectld)
//!
//! Privileged service that owns the fans and GPUs. Clients talk to it over a
//! Unix domain socket, one JSON message per line.
//!
//! # Lifecycle
//! 1. Parse arguments, initialize logging, load configuration
//! 2. Discover hwmon fans and wire up the mode controller and tuning service
//! 3. Serve the socket until SIGINT/SIGTERM
//! 4. Stop every curve loop (releasing those fans if configured) and remove
//!    the socket

mod server;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use tc_core::constants::paths;
use tc_core::{
    discover_fans, DaemonConfig, FanActuator, JsonProfileStore, ModeController, SettingsApplier,
    SystemTemperature, TemperatureSource, TuningService,
};
use tc_gpu::SystemGpus;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::server::DaemonState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Command line options
#[derive(Debug, Default)]
struct Options {
    config_path: Option<PathBuf>,
    socket_path: Option<PathBuf>,
}

enum Command {
    Run(Options),
    Help,
    Version,
}

fn parse_args(args: &[String]) -> anyhow::Result<Command> {
    let mut options = Options::default();
    let mut iter = args.iter().skip(1);

    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-v" | "--version" => return Ok(Command::Version),
            "-c" | "--config" => {
                let Some(path) = iter.next() else {
                    bail!("--config requires a path argument");
                };
                options.config_path = Some(PathBuf::from(path));
            }
            "-s" | "--socket" => {
                let Some(path) = iter.next() else {
                    bail!("--socket requires a path argument");
                };
                options.socket_path = Some(PathBuf::from(path));
            }
            other => bail!("Unknown argument: {}", other),
        }
    }

    Ok(Command::Run(options))
}

fn print_help() {
    eprintln!("tunectld {} - fan curve and GPU overclock daemon", VERSION);
    eprintln!();
    eprintln!("USAGE:");
    eprintln!("    tunectld [OPTIONS]");
    eprintln!();
    eprintln!("OPTIONS:");
    eprintln!("    -c, --config PATH   Config file (default {})", paths::CONFIG_FILE);
    eprintln!("    -s, --socket PATH   Socket path (overrides the config file)");
    eprintln!("    -v, --version       Print version");
    eprintln!("    -h, --help          Print this help");
    eprintln!();
    eprintln!("ENVIRONMENT:");
    eprintln!("    TUNECTL_LOG         Log filter (trace, debug, info, warn, error)");
}

/// Journald when the journal socket exists, stdout otherwise.
///
/// Returns whether journald is in use.
fn init_logging(log_level: &str) -> bool {
    if Path::new(paths::JOURNALD_SOCKET).exists() {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(log_level))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(log_level)
        .init();
    false
}

fn check_privileges() {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        warn!("Running as euid={}; hardware writes will likely be refused", euid);
    }
}

fn validate_socket_path(path: &Path) -> anyhow::Result<()> {
    if !path.is_absolute() {
        bail!("socket path must be absolute: {}", path.display());
    }
    let Some(parent) = path.parent() else {
        bail!("socket path has no parent directory: {}", path.display());
    };
    if !parent.is_dir() {
        bail!("socket directory does not exist: {}", parent.display());
    }
    Ok(())
}

fn build_state(config: &DaemonConfig) -> DaemonState {
    let fans: Vec<Arc<dyn FanActuator>> = discover_fans(&config.hwmon_base)
        .into_iter()
        .map(|fan| Arc::new(fan) as Arc<dyn FanActuator>)
        .collect();

    let temperature: Arc<dyn TemperatureSource> =
        if config.hwmon_base == Path::new(paths::HWMON_BASE) {
            Arc::new(SystemTemperature::new())
        } else {
            Arc::new(SystemTemperature::with_hwmon_base(&config.hwmon_base))
        };

    let modes = ModeController::new(fans, temperature)
        .with_interval(config.curve_interval())
        .with_release_on_shutdown(config.release_fans_on_shutdown);

    let tuning = TuningService::new(
        SettingsApplier::new(Arc::new(SystemGpus::new())),
        Arc::new(JsonProfileStore::new(&config.profiles_dir)),
    )
    .with_default_device(config.default_device_id);

    info!(
        fans = modes.fan_count(),
        profiles = %config.profiles_dir.display(),
        "Control plane ready"
    );
    DaemonState::new(modes, tuning)
}

async fn run(options: Options) -> anyhow::Result<()> {
    let config_path = options
        .config_path
        .unwrap_or_else(|| PathBuf::from(paths::CONFIG_FILE));
    let mut config = DaemonConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    if let Some(socket_path) = options.socket_path {
        config.socket_path = socket_path;
    }
    validate_socket_path(&config.socket_path)?;
    check_privileges();

    let state = Arc::new(build_state(&config));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let shutdown_tx = Arc::new(shutdown_tx);
    let handler_tx = Arc::clone(&shutdown_tx);
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: Received SIGINT/SIGTERM - initiating shutdown");
        let _ = handler_tx.send(true);
    }) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not work cleanly.", e);
    }

    info!("STARTUP: Socket path: {}", config.socket_path.display());
    let result = server::run_server(&config.socket_path, Arc::clone(&state), shutdown_rx).await;

    state.modes.shutdown().await;
    drop(shutdown_tx);
    info!("SHUTDOWN: tunectld stopped");
    result
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let options = match parse_args(&args) {
        Ok(Command::Run(options)) => options,
        Ok(Command::Help) => {
            print_help();
            return;
        }
        Ok(Command::Version) => {
            println!("tunectld {}", VERSION);
            return;
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            print_help();
            std::process::exit(2);
        }
    };

    let log_level = std::env::var("TUNECTL_LOG").unwrap_or_else(|_| "info".to_string());
    let use_journald = init_logging(&log_level);
    info!("STARTUP: tunectld {} starting", VERSION);
    info!("STARTUP: Logging to {}", if use_journald { "systemd journal" } else { "stdout" });

    if let Err(e) = run(options).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
