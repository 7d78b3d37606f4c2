// ecologger - Command line entry point

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use ecologger::bridge::Bridge;
use ecologger::cancel::CancelToken;
use ecologger::clock::{ClockSync, SystemClock};
use ecologger::config::LoggerConfig;
use ecologger::event::{PowerState, Reading, TransmitterKind};
use ecologger::link::SerialLink;
use ecologger::manager::Manager;
use ecologger::protocol::Driver;
use ecologger::sink::{edit_sink, resolve_data_dir, FileSink};
use ecologger::storage::RegistryStore;
use std::fs::OpenOptions;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "ecologger")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Log power readings from EcoManager transmitters through a serial bridge")]
struct Cli {
    /// Serial device of the bridge
    #[arg(short, long)]
    port: Option<String>,

    /// Log level or filter directive (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log: String,

    /// Append diagnostics to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Registry database directory
    #[arg(long)]
    registry: Option<PathBuf>,

    /// Directory for sample files (default: a new numbered directory under $DATA_DIR)
    #[arg(long)]
    data_directory: Option<PathBuf>,

    /// Never switch a repowered TRX back to its previous state
    #[arg(long)]
    do_not_switch: bool,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Log readings until interrupted
    Log,
    /// Show registered transmitters
    List,
    /// Listen for a new transmitter and pair with it
    Pair {
        /// Seconds to listen
        #[arg(long)]
        window: Option<u64>,
        /// Accept the first candidate without asking
        #[arg(long)]
        yes: bool,
    },
    /// Register a transmitter by hand
    Add {
        #[arg(long)]
        id: u32,
        #[arg(long, value_enum)]
        kind: KindArg,
        /// Sensor ports (TX only), e.g. 1,2,3
        #[arg(long, value_delimiter = ',')]
        ports: Vec<u8>,
    },
    /// Forget a transmitter
    Delete {
        #[arg(long)]
        id: u32,
    },
    /// Name a sensor
    Rename {
        #[arg(long)]
        id: u32,
        #[arg(long)]
        port: u8,
        #[arg(long)]
        name: String,
    },
    /// Move a sensor to another log channel (0 disables logging)
    Channel {
        #[arg(long)]
        id: u32,
        #[arg(long)]
        port: u8,
        #[arg(long)]
        channel: u32,
    },
    /// Mark a sensor as whole-house or appliance
    Aggregate {
        #[arg(long)]
        id: u32,
        #[arg(long)]
        port: u8,
        #[arg(long, action = clap::ArgAction::Set)]
        value: bool,
    },
    /// Switch a TRX on or off
    Switch {
        #[arg(long)]
        id: u32,
        #[arg(long, value_enum)]
        state: StateArg,
    },
    /// Choose which transmitters the bridge reports
    ReceiveMode {
        #[arg(value_enum)]
        mode: ModeArg,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Tx,
    Trx,
}

impl From<KindArg> for TransmitterKind {
    fn from(arg: KindArg) -> Self {
        match arg {
            KindArg::Tx => TransmitterKind::Tx,
            KindArg::Trx => TransmitterKind::Trx,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StateArg {
    On,
    Off,
}

impl From<StateArg> for PowerState {
    fn from(arg: StateArg) -> Self {
        match arg {
            StateArg::On => PowerState::On,
            StateArg::Off => PowerState::Off,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    /// Only registered transmitters
    Known,
    /// Everything in range
    All,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli)?;

    let config = build_config(&cli)?;
    config.validate().context("Invalid configuration")?;

    let store = RegistryStore::open(&config.registry_dir).with_context(|| {
        format!("Failed to open registry at {}", config.registry_dir.display())
    })?;

    if let Cmd::List = cli.command {
        let registry = store.load_registry().context("Failed to load registry")?;
        let stats = store.stats().context("Failed to read registry statistics")?;
        info!(
            transmitters = stats.transmitter_count,
            disk_bytes = stats.disk_size_bytes,
            "Registry loaded"
        );
        println!("{}", registry.summary());
        return Ok(());
    }

    let sink = open_sink(&cli.command, &config)?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        info!("Interrupt received, stopping");
        handler_token.cancel();
    })
    .context("Failed to install interrupt handler")?;

    let link = SerialLink::open(config.link.clone())
        .with_context(|| format!("Failed to open bridge on {}", config.link.port))?;
    let driver = Driver::new(link, config.driver.clone(), cancel);
    let clock = ClockSync::new(config.clock.clone(), Box::new(SystemClock));
    let bridge = Bridge::connect(driver, clock, config.bridge.clone())
        .context("Failed to initialise bridge")?;

    let mut manager = Manager::new(
        bridge,
        store,
        sink,
        config.policy.clone(),
        config.manager.clone(),
    )?;
    manager.start().context("Failed to configure bridge")?;

    let logging = matches!(cli.command, Cmd::Log);
    match cli.command {
        Cmd::List => {}
        Cmd::Log => manager.run()?,
        Cmd::Pair { window: _, yes } => {
            let paired = manager.listen_for_new_transmitter(|reading| yes || confirm(reading))?;
            match paired {
                Some(id) => println!("Paired with {}", id),
                None => println!("No transmitter paired"),
            }
        }
        Cmd::Add { id, kind, ports } => manager.add_transmitter(id, kind.into(), &ports)?,
        Cmd::Delete { id } => manager.delete_transmitter(id)?,
        Cmd::Rename { id, port, name } => manager.rename_sensor(id, port, &name)?,
        Cmd::Channel { id, port, channel } => manager.set_log_channel(id, port, channel)?,
        Cmd::Aggregate { id, port, value } => manager.set_aggregate(id, port, value)?,
        Cmd::Switch { id, state } => manager.switch(id, state.into())?,
        Cmd::ReceiveMode { mode } => manager.set_receive_mode(matches!(mode, ModeArg::Known))?,
    }

    if !logging {
        println!("{}", manager.list());
    }
    Ok(())
}

/// Logging gets a fresh numbered data directory; edits only touch the
/// labels file of an explicitly named one
fn open_sink(command: &Cmd, config: &LoggerConfig) -> Result<Option<FileSink>> {
    if !matches!(command, Cmd::Log) {
        return edit_sink(config.data_directory.as_deref()).context("Failed to open data directory");
    }

    let base = std::env::var_os("DATA_DIR").map(PathBuf::from);
    let data_dir = resolve_data_dir(config.data_directory.as_deref(), base.as_deref())
        .context("Failed to resolve data directory")?;
    let sink = FileSink::new(&data_dir)
        .with_context(|| format!("Failed to open data directory {}", data_dir.display()))?;
    info!(dir = %data_dir.display(), "Writing samples");
    Ok(Some(sink))
}

fn init_tracing(cli: &Cli) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log))
        .with_context(|| format!("Invalid log filter '{}'", cli.log))?;

    match &cli.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(io::stderr)
            .init(),
    }
    Ok(())
}

fn build_config(cli: &Cli) -> Result<LoggerConfig> {
    let mut config = match &cli.config {
        Some(path) => LoggerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => LoggerConfig::default(),
    };

    if let Some(port) = &cli.port {
        config.link.port = port.clone();
    }
    if let Some(dir) = &cli.registry {
        config.registry_dir = dir.clone();
    }
    if let Some(dir) = &cli.data_directory {
        config.data_directory = Some(dir.clone());
    }
    if cli.do_not_switch {
        config.policy.switch_on_repower = false;
    }
    if let Cmd::Pair {
        window: Some(secs), ..
    } = cli.command
    {
        if secs == 0 {
            bail!("--window must be at least one second");
        }
        config.manager.listen_window_secs = secs;
    }
    Ok(config)
}

/// Ask on the terminal whether to pair with a candidate
fn confirm(reading: &Reading) -> bool {
    print!(
        "Pair with {} {} (sensors {:?})? [y/N] ",
        reading.source_kind, reading.source_id, reading.sensor_values
    );
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => matches!(answer.trim(), "y" | "Y" | "yes"),
        Err(e) => {
            error!(error = %e, "Could not read answer");
            false
        }
    }
}
