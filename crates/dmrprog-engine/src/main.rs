//! `dmrprog`: read and write AnyTone DMR radio codeplugs.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::{ArgAction, Parser, Subcommand};
use dmrprog_codeplug::{csv, Codeplug, CodeplugError, MemoryMap};
use dmrprog_engine::{
    BulkTransfer, EngineConfig, EngineError, EngineHandle, EngineResult, PortSelector,
    ProtocolEngine, RecordCollector, SerialPortTransport, SimulatedRadio,
};
use thiserror::Error;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// dmrprog - AnyTone DMR radio programmer
#[derive(Parser, Debug)]
#[command(name = "dmrprog", author, version, about = "Read and write AnyTone DMR radio codeplugs")]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port: device path, USB `vid:pid` in hex, or `index:N`
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Engine configuration file (YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Talk to an in-memory radio instead of a serial port
    #[arg(long, global = true)]
    simulate: bool,

    /// Write results as JSON instead of CSV
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Identify the radio
    Handshake,

    /// Read every channel
    ReadChannels {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write channels from a CSV file
    WriteChannels {
        /// Channel CSV, first row is channel 1
        file: PathBuf,
    },

    /// Read every zone
    ReadZones {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Write zones from a CSV file
    WriteZones {
        /// Zone CSV
        file: PathBuf,

        /// Zone CSV as last read from the radio; only changed zones are written
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Erase one flash block
    Erase {
        /// Block address in hex
        #[arg(value_parser = parse_address)]
        address: u32,
    },

    /// List serial ports
    ListPorts,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Codeplug(#[from] CodeplugError),

    #[error("{}: {source}", .path.display())]
    File { path: PathBuf, source: io::Error },

    #[error("output: {0}")]
    Output(#[from] io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

fn parse_address(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid address '{}': {}", s, e))
}

fn init_logging(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        1 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    if let Command::ListPorts = cli.command {
        return list_ports(cli.json);
    }

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(port) = &cli.port {
        config.serial.port = port.clone();
    }
    let timeout = config.drain_timeout();

    let engine = ProtocolEngine::start(config.clone())?;
    let handle = engine.handle();
    let on_interrupt = handle.clone();
    if let Err(e) = ctrlc::set_handler(move || on_interrupt.cancel()) {
        warn!("cannot install Ctrl-C handler: {}", e);
    }

    attach(&handle, &config, cli.simulate)?;
    handle.handshake()?;

    let outcome = if let Command::Handshake = cli.command {
        report_handshake(&config, cli.simulate, cli.json)
    } else {
        handle.enter_program_mode()?;
        let transfer = BulkTransfer::new(handle.clone(), MemoryMap::default());
        execute(&cli.command, &transfer, cli.json, timeout)
    };

    let finished = engine.finish(timeout);
    outcome?;
    finished?;
    Ok(())
}

fn attach(handle: &EngineHandle, config: &EngineConfig, simulate: bool) -> Result<(), CliError> {
    if simulate {
        info!("using simulated radio");
        handle.attach(SimulatedRadio::new(handle.inbound_sender()))?;
        return Ok(());
    }
    let selector: PortSelector = config.serial.port.parse().map_err(EngineError::from)?;
    let transport =
        SerialPortTransport::open(&selector, config.serial.baud_rate, handle.inbound_sender())
            .map_err(EngineError::from)?;
    handle.attach(transport)?;
    Ok(())
}

fn execute(
    command: &Command,
    transfer: &BulkTransfer,
    json: bool,
    timeout: Duration,
) -> Result<(), CliError> {
    match command {
        Command::ReadChannels { output } => {
            let codeplug = read_with_progress(transfer, BulkTransfer::read_all_channels, timeout)?;
            transfer.engine().exit_program_mode()?;

            let used = codeplug
                .used_channels()
                .last()
                .map(|(n, _)| n as usize)
                .unwrap_or(0);
            info!("{} channels in use", codeplug.used_channels().count());
            let channels = &codeplug.channels[..used];
            let mut out = open_output(output.as_deref())?;
            if json {
                serde_json::to_writer_pretty(&mut out, channels)?;
                writeln!(out)?;
            } else {
                csv::write_channels(&mut out, channels)?;
            }
            out.flush()?;
        }
        Command::WriteChannels { file } => {
            let channels = csv::read_channels(open_input(file)?)?;
            info!("writing {} channels", channels.len());
            transfer.write_all_channels(&channels)?;
            info!("channels written");
        }
        Command::ReadZones { output } => {
            let codeplug = read_with_progress(transfer, BulkTransfer::read_all_zones, timeout)?;
            transfer.engine().exit_program_mode()?;

            let used = codeplug
                .used_zones()
                .last()
                .map(|(n, _)| n as usize)
                .unwrap_or(0);
            let zones = &codeplug.zones[..used.min(codeplug.zones.len())];
            let mut out = open_output(output.as_deref())?;
            if json {
                serde_json::to_writer_pretty(&mut out, zones)?;
                writeln!(out)?;
            } else {
                csv::write_zones(&mut out, zones)?;
            }
            out.flush()?;
        }
        Command::WriteZones { file, snapshot } => {
            let max_channels = transfer.map().total_channels();
            let zones = csv::read_zones(open_input(file)?, max_channels)?;
            let snapshot = match snapshot {
                Some(path) => Some(csv::read_zones(open_input(path)?, max_channels)?),
                None => None,
            };
            info!("writing {} zones", zones.len());
            transfer.write_all_zones(&zones, snapshot.as_deref())?;
        }
        Command::Erase { address } => {
            if transfer.engine().erase_block(*address)? {
                println!("erased block at 0x{:08X}", address);
            } else {
                warn!("erase at 0x{:08X} not acknowledged", address);
            }
        }
        Command::Handshake | Command::ListPorts => {}
    }
    Ok(())
}

/// Queue a bulk read and collect its records, logging progress.
fn read_with_progress<F>(transfer: &BulkTransfer, queue: F, timeout: Duration) -> Result<Codeplug, CliError>
where
    F: FnOnce(&BulkTransfer) -> EngineResult<usize>,
{
    let events = transfer.engine().subscribe();
    let expected = queue(transfer)?;
    let codeplug = RecordCollector::new(events).collect_with(
        expected,
        Instant::now() + timeout,
        |n, total| {
            if n % 100 == 0 || n == total {
                info!("{}/{} records", n, total);
            }
        },
    )?;
    Ok(codeplug)
}

fn report_handshake(config: &EngineConfig, simulate: bool, json: bool) -> Result<(), CliError> {
    let port = if simulate {
        "simulated".to_string()
    } else {
        config.serial.port.clone()
    };
    if json {
        println!("{}", serde_json::json!({ "identified": true, "port": port }));
    } else {
        println!("radio identified on {}", if port.is_empty() { "first port" } else { &port });
    }
    Ok(())
}

fn list_ports(json: bool) -> Result<(), CliError> {
    let ports = serialport::available_ports()
        .map_err(|e| EngineError::from(dmrprog_engine::TransportError::NotFound(e.to_string())))?;
    if json {
        let names: Vec<&str> = ports.iter().map(|p| p.port_name.as_str()).collect();
        println!("{}", serde_json::to_string_pretty(&names)?);
        return Ok(());
    }
    for (i, port) in ports.iter().enumerate() {
        match &port.port_type {
            serialport::SerialPortType::UsbPort(usb) => println!(
                "index:{}  {}  {:04x}:{:04x}  {}",
                i,
                port.port_name,
                usb.vid,
                usb.pid,
                usb.product.as_deref().unwrap_or("")
            ),
            _ => println!("index:{}  {}", i, port.port_name),
        }
    }
    Ok(())
}

fn open_input(path: &Path) -> Result<BufReader<File>, CliError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| CliError::File {
            path: path.to_path_buf(),
            source,
        })
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>, CliError> {
    match path {
        Some(path) => {
            let file = File::create(path).map_err(|source| CliError::File {
                path: path.to_path_buf(),
                source,
            })?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(io::stdout().lock())),
    }
}
