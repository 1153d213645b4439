//! rfidlab - RFID Reader Experiment Controller
//!
//! Runs unattended on the lab host: waits for the start tag, records every
//! reader's scans until the stop tag, exports them, and drives the reader
//! LEDs along the way.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rfidlab::config::Config;
use rfidlab::debounce::Debouncer;
use rfidlab::experiment::{ExperimentController, ExperimentSettings};
use rfidlab::export::CsvExporter;
use rfidlab::input::evdev::EvdevBackend;
use rfidlab::input::scripted::{ScriptedBackend, ScriptedDevice};
use rfidlab::input::{DeviceSelector, InputBackend};
use rfidlab::multiplexer::DeviceMultiplexer;
use rfidlab::output::null::NullActuator;
use rfidlab::output::{Actuator, OutputLevel};
use rfidlab::pipeline::ScanPipeline;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rfidlab", version, about = "Multi-reader RFID experiment controller")]
struct Cli {
    /// Config file (default: ~/.config/rfidlab/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the experiment loop until interrupted
    Run {
        /// Read "<reader address> <code>" lines from stdin instead of devices
        #[arg(long)]
        simulate: bool,
    },
    /// List reader devices
    Devices {
        /// List every input device, not only readers
        #[arg(long)]
        all: bool,
    },
}

fn config_path(cli: &Cli) -> Result<PathBuf> {
    match &cli.config {
        Some(path) => Ok(path.clone()),
        None => Config::default_path(),
    }
}

fn init_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Devices { all: true } => {
            init_logging(false);
            print_devices(&EvdevBackend::new(), None)
        }
        Command::Devices { all: false } => {
            let path = config_path(&cli)?;
            let config = Config::load(&path)?;
            init_logging(config.debug);
            info!("Loaded configuration from {:?}", path);
            print_devices(&EvdevBackend::new(), Some(&config.reader_device_name))
        }
        Command::Run { simulate } => {
            let path = config_path(&cli)?;
            let config = Arc::new(Config::load(&path)?);
            init_logging(config.debug);
            info!("Loaded configuration from {:?}", path);
            run(config, simulate).await
        }
    }
}

fn print_devices(backend: &dyn InputBackend, name: Option<&str>) -> Result<()> {
    let devices = backend.list_available()?;
    let selector = name.map(|n| DeviceSelector::Name(n.to_string()));

    let mut shown = 0;
    for device in devices.iter().filter(|d| selector.as_ref().is_none_or(|s| s.matches(d))) {
        println!("{device}");
        shown += 1;
    }

    if shown == 0 {
        match name {
            Some(n) => println!("No devices named '{n}' (try --all)"),
            None => println!("No input devices found (check permissions on /dev/input?)"),
        }
    }
    Ok(())
}

async fn run(config: Arc<Config>, simulate: bool) -> Result<()> {
    info!("rfidlab starting...");
    info!("  Condition: {}", config.condition_to_run);
    info!("  Readers: {:?}", config.readers_addresses);
    info!("  LEDs: {:?}", config.readers_leds_addresses);
    info!("  Debounce: {}s, light: {}s", config.debounce_seconds, config.light_on_seconds);

    let shutdown = CancellationToken::new();
    let token = shutdown.clone();
    ctrlc::set_handler(move || token.cancel()).context("Failed to install signal handler")?;

    let backend: Arc<dyn InputBackend> = if simulate {
        let mut backend = ScriptedBackend::new();
        let readers: Vec<ScriptedDevice> = config
            .readers_addresses
            .iter()
            .map(|addr| backend.add_device(&config.reader_device_name, addr))
            .collect();
        // Plain thread: a pending stdin read must not hold up runtime shutdown
        std::thread::spawn(move || feed_from_stdin(readers));
        Arc::new(backend)
    } else {
        Arc::new(EvdevBackend::new())
    };

    let mut mux = DeviceMultiplexer::new(backend);
    let active = mux
        .register_devices(&DeviceSelector::Name(config.reader_device_name.clone()))
        .context("No readers to listen to")?;
    for addr in &config.readers_addresses {
        if !active.iter().any(|d| d.address == *addr) {
            warn!("Configured reader {} is not connected", addr);
        }
    }

    let actuator = open_actuator(&config, simulate)?;
    let settings = ExperimentSettings::from_config(&config)?;
    let controller = ExperimentController::new(
        settings,
        actuator,
        Box::new(CsvExporter::new(config.export_directory.clone())),
    );
    let debouncer = Debouncer::new(config.debounce_window()?)?;
    let mut pipeline = ScanPipeline::new(debouncer, controller);

    info!("Waiting for start code...");
    mux.start(&mut pipeline, &shutdown).await;

    pipeline.controller().set_all(OutputLevel::Low);
    info!("rfidlab shutting down");
    Ok(())
}

#[cfg(feature = "gpio")]
fn open_actuator(config: &Config, simulate: bool) -> Result<Arc<dyn Actuator>> {
    use rfidlab::output::gpio::GpioActuator;

    if simulate {
        return Ok(Arc::new(NullActuator::new()));
    }
    let gpio = GpioActuator::open(&config.readers_leds_addresses).context("Failed to set up LED outputs")?;
    Ok(Arc::new(gpio))
}

#[cfg(not(feature = "gpio"))]
fn open_actuator(_config: &Config, simulate: bool) -> Result<Arc<dyn Actuator>> {
    if !simulate {
        warn!("Built without GPIO support; LED changes are only logged");
    }
    Ok(Arc::new(NullActuator::new()))
}

/// Simulation input: each stdin line "<address> <code>" is typed on that reader
fn feed_from_stdin(readers: Vec<ScriptedDevice>) {
    for line in std::io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("stdin read failed: {}", e);
                break;
            }
        };

        let Some((addr, code)) = line.trim().split_once(char::is_whitespace) else {
            if !line.trim().is_empty() {
                warn!("Expected '<address> <code>', got {:?}", line);
            }
            continue;
        };

        match readers.iter().find(|r| r.address() == addr) {
            Some(reader) => reader.type_code(code.trim()),
            None => warn!("No simulated reader at {}", addr),
        }
    }

    info!("End of simulated input");
    // Dropping the handles disconnects the simulated readers
}
