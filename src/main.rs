//! Soilprobe - soil sensor polling client
//!
//! Polls a 7-in-1 soil sensor over RS-485 (Modbus RTU) on a timer or on
//! demand, printing and logging each reading.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use soilprobe_core::cli::exit_codes;
use soilprobe_core::config::{self, AppConfig, ConfigSource, LoggingConfig, PollMode};
use soilprobe_core::core::protocol::format_frame;
use soilprobe_core::core::transport::{serial, TransportSession};
use soilprobe_core::{
    build_request, decode_value, validate_response, ConsoleSink, CrcPolicy, FileSink,
    IntervalTrigger, LineTrigger, LogFormat, ParameterRegistry, PollController, ReadingSink,
    RegistryVariant, TriggerMode, TriggerSource,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Reading log format
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text blocks
    Text,
    /// One JSON object per cycle
    Json,
    /// One CSV row per reading
    Csv,
}

impl From<OutputFormat> for LogFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Text => LogFormat::Text,
            OutputFormat::Json => LogFormat::Json,
            OutputFormat::Csv => LogFormat::Csv,
        }
    }
}

/// Soilprobe CLI
#[derive(Parser, Debug)]
#[command(
    name = "soilprobe",
    version,
    about = "Modbus RTU polling client for 7-in-1 soil sensors",
    long_about = None
)]
struct Cli {
    /// Config file (defaults to the per-user config directory)
    #[arg(short, long, global = true, env = "SOILPROBE_CONFIG")]
    config: Option<PathBuf>,

    /// More diagnostics (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Warnings and errors only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Poll the sensor until stopped
    Poll {
        /// Serial port name (e.g., COM3, /dev/ttyUSB0)
        #[arg(short, long, env = "SOILPROBE_PORT")]
        port: Option<String>,

        /// Baud rate
        #[arg(short, long)]
        baud: Option<u32>,

        /// Seconds between cycles
        #[arg(short, long, conflicts_with = "interactive")]
        interval: Option<u64>,

        /// Poll once per ENTER instead of on a timer
        #[arg(long)]
        interactive: bool,

        /// Skip pH (six-parameter sensor)
        #[arg(long)]
        reduced: bool,

        /// Append readings to this file
        #[arg(short, long)]
        log: Option<PathBuf>,

        /// Log file format (guessed from the extension if omitted)
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,

        /// Accept responses with a bad CRC
        #[arg(long)]
        no_crc_check: bool,

        /// Stop after N cycles
        #[arg(short = 'n', long)]
        cycles: Option<u64>,

        /// Do not print readings to the console
        #[arg(long)]
        no_console: bool,
    },

    /// List available serial ports
    ListPorts,

    /// Print the request frame for every parameter
    Frames {
        /// Skip pH (six-parameter sensor)
        #[arg(long)]
        reduced: bool,
    },

    /// Validate and decode a captured response frame
    Decode {
        /// Response bytes in hex, spaces allowed (e.g. "01 03 02 00 7B F8 67")
        #[arg(required = true, num_args = 1..)]
        hex: Vec<String>,

        /// Register the frame answers, for scaling (decimal or 0x-prefixed)
        #[arg(short, long, value_parser = parse_register)]
        register: Option<u8>,

        /// Accept a bad CRC
        #[arg(long)]
        no_crc_check: bool,
    },

    /// Print the effective configuration as TOML
    ShowConfig,

    /// Print the exit code table
    ExitCodes,
}

fn parse_register(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid register {s:?}: {e}"))
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    exit_codes::finish(run(&cli))
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let source = ConfigSource::resolve(cli.config.as_deref());
    let loaded = AppConfig::load_from(&source);

    let defaults = LoggingConfig::default();
    let logging = loaded.as_ref().map_or(&defaults, |config| &config.logging);
    let _guard = init_logging(cli, logging);

    match &loaded {
        Ok(_) => tracing::debug!(source = %source, "Loaded config"),
        Err(e) => tracing::debug!(source = %source, error = %e, "Config unusable"),
    }

    let mut config = match &cli.command {
        Commands::ListPorts => return list_ports(cli),
        Commands::ExitCodes => {
            exit_codes::print_exit_codes();
            return Ok(());
        }
        _ => loaded?,
    };
    apply_poll_overrides(&mut config, &cli.command);
    if validates_config(&cli.command) {
        config.validate()?;
    }

    match &cli.command {
        Commands::Poll { .. } => poll(&config),
        Commands::Frames { reduced } => {
            print_frames(&registry_for(&config, *reduced)?);
            Ok(())
        }
        Commands::Decode {
            hex,
            register,
            no_crc_check,
        } => decode(&config, &hex.concat(), *register, *no_crc_check),
        Commands::ShowConfig => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
        Commands::ListPorts | Commands::ExitCodes => Ok(()),
    }
}

/// Commands that talk to, or describe traffic for, a sensor
fn validates_config(command: &Commands) -> bool {
    matches!(
        command,
        Commands::Poll { .. } | Commands::Frames { .. } | Commands::Decode { .. }
    )
}

/// Fold `poll` flags into the loaded config
fn apply_poll_overrides(config: &mut AppConfig, command: &Commands) {
    let Commands::Poll {
        port,
        baud,
        interval,
        interactive,
        reduced,
        log,
        format,
        no_crc_check,
        cycles,
        no_console,
    } = command
    else {
        return;
    };

    if let Some(port) = port {
        config.serial.port.clone_from(port);
    }
    if let Some(baud) = baud {
        config.serial.baud_rate = *baud;
    }
    if let Some(interval) = interval {
        config.poll.mode = PollMode::Timer;
        config.poll.interval_secs = *interval;
    }
    if *interactive {
        config.poll.mode = PollMode::Interactive;
    }
    if *reduced {
        config.registry.variant = RegistryVariant::Reduced;
        config.registry.parameters.clear();
    }
    if let Some(log) = log {
        config.output.file = Some(log.clone());
        if format.is_none() {
            if let Some(guessed) = LogFormat::from_path(log) {
                config.output.format = guessed;
            }
        }
    }
    if let Some(format) = format {
        config.output.format = (*format).into();
    }
    if *no_crc_check {
        config.poll.crc = CrcPolicy::Ignore;
    }
    if cycles.is_some() {
        config.poll.max_cycles = *cycles;
    }
    if *no_console {
        config.output.console = false;
    }
}

fn init_logging(cli: &Cli, logging: &LoggingConfig) -> Option<WorkerGuard> {
    let level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => logging.level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = |level: &str| {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    };

    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter(level));

    let log_dir = logging.file_directory();
    let appender = log_dir.as_ref().map(|dir| {
        RollingFileAppender::builder()
            .rotation(Rotation::DAILY)
            .filename_prefix("soilprobe")
            .filename_suffix("log")
            .build(dir)
    });

    let (file, guard, appender_error) = match appender {
        Some(Ok(appender)) => {
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_filter(filter(level));
            (Some(layer), Some(guard), None)
        }
        Some(Err(e)) => (None, None, Some(e)),
        None => (None, None, None),
    };

    // A second init (tests, embedding) is harmless
    let _ = tracing_subscriber::registry()
        .with(console)
        .with(file)
        .try_init();

    if let Some(e) = appender_error {
        tracing::warn!(error = %e, "Diagnostic log files disabled");
    }
    tracing::debug!(
        config_dir = ?config::config_dir(),
        log_dir = ?log_dir,
        "Starting {} v{}",
        soilprobe_core::NAME,
        soilprobe_core::VERSION
    );

    guard
}

fn registry_for(config: &AppConfig, reduced: bool) -> anyhow::Result<ParameterRegistry> {
    if reduced {
        Ok(ParameterRegistry::reduced())
    } else {
        Ok(config.registry.build()?)
    }
}

fn poll(config: &AppConfig) -> anyhow::Result<()> {
    let registry = config.registry.build()?;
    let session = serial::open(&config.serial, config.poll.turnaround())
        .context("Opening sensor link")?;

    let mut sinks: Vec<Box<dyn ReadingSink>> = Vec::new();
    if config.output.console {
        sinks.push(Box::new(ConsoleSink::stdout()));
    }
    if let Some(path) = &config.output.file {
        let sink = FileSink::open(path, config.output.format)
            .with_context(|| format!("Opening log file {}", path.display()))?;
        tracing::info!(
            path = %sink.path().display(),
            format = sink.format().name(),
            "Logging readings"
        );
        sinks.push(Box::new(sink));
    }

    let mut trigger: Box<dyn TriggerSource> = match config.poll.trigger_mode() {
        TriggerMode::Timer(interval) => {
            let (stop_tx, stop_rx) = crossbeam_channel::bounded(1);
            ctrlc::set_handler(move || {
                let _ = stop_tx.try_send(());
            })
            .context("Installing Ctrl+C handler")?;
            tracing::info!("Polling every {}s, press Ctrl+C to stop", interval.as_secs());
            Box::new(
                IntervalTrigger::new(interval)
                    .with_stop_signal(stop_rx)
                    .with_max_cycles(config.poll.max_cycles),
            )
        }
        TriggerMode::Interactive => Box::new(LineTrigger::stdin()),
    };

    let mut controller =
        PollController::new(session, registry, sinks).with_crc_policy(config.poll.crc);
    tracing::debug!(
        parameters = controller.registry().len(),
        crc = ?config.poll.crc,
        "Controller ready"
    );
    let cycles = controller.run_forever(trigger.as_mut());

    log_summary(controller.transport(), cycles);
    Ok(())
}

fn log_summary<C>(session: &TransportSession<C>, cycles: u64) {
    let stats = session.stats();
    tracing::info!(
        cycles,
        frames_sent = stats.frames_sent,
        frames_received = stats.frames_received,
        bytes_sent = stats.bytes_sent,
        bytes_received = stats.bytes_received,
        bytes_discarded = stats.bytes_discarded,
        errors = stats.errors,
        "Session closed"
    );
}

fn list_ports(cli: &Cli) -> anyhow::Result<()> {
    let ports = serial::list_ports()?;

    if ports.is_empty() {
        if !cli.quiet {
            println!("No serial ports found.");
        }
        return Ok(());
    }

    for port in &ports {
        match &port.port_type {
            serialport::SerialPortType::UsbPort(usb) => println!(
                "{}  [USB {:04x}:{:04x}{}]",
                port.port_name,
                usb.vid,
                usb.pid,
                usb.product
                    .as_deref()
                    .map(|p| format!(" {p}"))
                    .unwrap_or_default()
            ),
            other => println!("{}  [{:?}]", port.port_name, other),
        }
    }

    Ok(())
}

fn print_frames(registry: &ParameterRegistry) {
    for parameter in registry {
        let frame = build_request(parameter.register_address);
        println!(
            "{:<12} {}  {}",
            parameter.label,
            hex::encode_upper(frame.as_bytes()),
            format_frame(frame.as_bytes())
        );
    }
}

fn decode(
    config: &AppConfig,
    hex_input: &str,
    register: Option<u8>,
    no_crc_check: bool,
) -> anyhow::Result<()> {
    let cleaned: String = hex_input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    let bytes = hex::decode(&cleaned).context("Parsing response hex")?;

    let policy = if no_crc_check {
        CrcPolicy::Ignore
    } else {
        config.poll.crc
    };
    let frame = validate_response(&bytes, policy)?;
    println!("Slave:      0x{:02X}", frame.slave_id());
    println!("Function:   0x{:02X}", frame.function());
    println!("Byte count: {}", frame.byte_count());
    println!(
        "CRC:        0x{:04X}{}",
        frame.crc(),
        if policy == CrcPolicy::Ignore { " (not checked)" } else { "" }
    );
    println!("Raw value:  {}", frame.raw_value());

    if let Some(register) = register {
        let registry = config.registry.build()?;
        let parameter = registry
            .find(register)
            .with_context(|| format!("No parameter at register 0x{register:02X}"))?;
        println!(
            "{}: {} {}",
            parameter.label,
            decode_value(parameter, &frame),
            parameter.unit
        );
    }

    Ok(())
}
