//! Motherboard orchestrator binary.
//!
//! Loads a config file, wires up the devices it names, and runs the tick
//! loop until a device faults, panics, or the process is asked to stop.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use motherboard_core::{
    BasicAddressSpace, FileLogSink, LogSink, Motherboard, RoleConfig, TopologyConfig,
};

// ---------------------------------------------------------------------------
// CLI argument parsing
// ---------------------------------------------------------------------------

struct CliArgs {
    config_path: PathBuf,
    data_dir: Option<PathBuf>,
    resume: bool,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        config_path: PathBuf::from("config.toml"),
        data_dir: None,
        resume: false,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--continue" => {
                cli.resume = true;
            }
            "--config" => {
                i += 1;
                if let Some(path) = args.get(i) {
                    cli.config_path = PathBuf::from(path);
                }
            }
            "--data-dir" => {
                i += 1;
                if let Some(path) = args.get(i) {
                    cli.data_dir = Some(PathBuf::from(path));
                }
            }
            "--help" | "-h" => {
                eprintln!("Usage: motherboard-runner [OPTIONS]");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --continue           Restore saved state before the first tick");
                eprintln!("  --config <path>      Config file to load [default: config.toml]");
                eprintln!("  --data-dir <path>    Snapshot directory [default: data/]");
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                std::process::exit(2);
            }
        }
        i += 1;
    }

    cli
}

// ---------------------------------------------------------------------------
// Device construction
// ---------------------------------------------------------------------------

/// Builds and registers every device named in `config`, in a
/// deterministic (sorted) order. `address_space`-role devices with no
/// bulk storage of their own get a ready-made `BasicAddressSpace`.
/// `device`-role entries are only constructible when the `dynamic`
/// feature is enabled and the entry names a `library` path; the concrete
/// chip emulations this crate dispatches to are out of its scope.
/// `processor`-role entries have no generic construction path at all,
/// since driving a CPU core is likewise out of scope; they're logged and
/// skipped.
fn build_devices(config: &TopologyConfig, mb: &mut Motherboard) {
    let mut names: Vec<&String> = config.devices.keys().collect();
    names.sort();

    for name in names {
        let entry = &config.devices[name];
        match entry.role {
            RoleConfig::AddressSpace => {
                mb.register_device(
                    name.clone(),
                    std::rc::Rc::new(std::cell::RefCell::new(BasicAddressSpace::new(name.clone()))),
                );
            }
            RoleConfig::Device => {
                build_dynamic_device(name, entry, mb);
            }
            RoleConfig::Processor => {
                log::warn!(
                    "device '{name}' is role=processor; this runner has no built-in processor \
                     implementation, skipping"
                );
            }
        }
    }
}

#[cfg(feature = "dynamic")]
fn build_dynamic_device(name: &str, entry: &motherboard_core::DeviceConfig, mb: &mut Motherboard) {
    let Some(library) = entry.params.get("library").and_then(|v| v.as_str()) else {
        log::warn!("device '{name}' has no 'library' param, skipping");
        return;
    };
    match motherboard_core::DynamicDevice::load(name, library) {
        Ok(device) => mb.register_device(name, std::rc::Rc::new(std::cell::RefCell::new(device))),
        Err(e) => log::error!("failed to load device '{name}' from {library}: {e}"),
    }
}

#[cfg(not(feature = "dynamic"))]
fn build_dynamic_device(name: &str, _entry: &motherboard_core::DeviceConfig, _mb: &mut Motherboard) {
    log::warn!(
        "device '{name}' is role=device but this build has no static implementation for it \
         and the 'dynamic' feature is disabled; skipping"
    );
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn timestamp_now() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    format!("epoch_{secs}")
}

/// Loads the config, builds and wires every device it names, and brings
/// every device up through reset (and, on `--continue`, restore). Any
/// failure here is a startup/config error.
fn setup(cli: &CliArgs) -> Result<Motherboard> {
    let config = TopologyConfig::load(&cli.config_path)
        .with_context(|| format!("loading config from {}", cli.config_path.display()))?;

    let data_dir = cli.data_dir.clone().unwrap_or_else(|| config.data_dir());
    let log_sink: LogSink = FileLogSink::new("logs");

    let mut mb = Motherboard::new(&data_dir);
    mb.set_log_sink(log_sink);
    build_devices(&config, &mut mb);
    mb.apply_topology(&config)
        .with_context(|| format!("applying topology from {}", cli.config_path.display()))?;

    mb.reset();
    if cli.resume {
        mb.restore_all().context("restoring saved state (--continue)")?;
    }

    Ok(mb)
}

/// Runs the tick loop until a device faults or panics. Any failure here
/// is a runtime error, distinct from a startup/config failure.
fn drive(mut mb: Motherboard) -> Result<()> {
    loop {
        match mb.tick(timestamp_now) {
            motherboard_core::TickResult::Ok => {}
            motherboard_core::TickResult::Fault { device, tick, code } => {
                anyhow::bail!("device '{device}' faulted at tick {tick} with code {code}");
            }
            motherboard_core::TickResult::Exception { device, tick } => {
                anyhow::bail!("device '{device}' panicked at tick {tick}");
            }
        }
    }
}

fn main() -> ExitCode {
    env_logger_init();
    let cli = parse_args();

    let mb = match setup(&cli) {
        Ok(mb) => mb,
        Err(e) => {
            log::error!("{e:#}");
            return ExitCode::from(2);
        }
    };

    match drive(mb) {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

/// Minimal `env_logger`-free logger setup: the teacher workspace doesn't
/// depend on `env_logger`, just `log`, so the binary installs the
/// simplest possible stderr logger rather than pulling in a new crate
/// for this alone.
fn env_logger_init() {
    struct StderrLogger;
    impl log::Log for StderrLogger {
        fn enabled(&self, _metadata: &log::Metadata) -> bool {
            true
        }
        fn log(&self, record: &log::Record) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
        fn flush(&self) {}
    }
    static LOGGER: StderrLogger = StderrLogger;
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(log::LevelFilter::Info);
}
