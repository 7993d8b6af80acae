//! ftdi-servod
//!
//! Opens the configured ports of an FTDI bridge and serves GPIO and I2C
//! requests from TCP clients. UART ports are bridged to ptys.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use ftdi_servod::config::{InterfaceConfig, ServerConfig};
use ftdi_servod::device::{self, FtdiPort};
use ftdi_servod::logging::setup_logging;
use ftdi_servod::{board, i2c, Channel, CommandServer, Dispatcher, Registry};
use log::{error, info};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ftdi-servod")]
#[command(
    author,
    version,
    about = "Multiplex GPIO, I2C and UART ports of an FTDI bridge over TCP"
)]
#[command(long_about = "
Opens each configured port of an FTDI multi-port bridge as a GPIO, I2C or
UART channel, bridges UARTs to pseudo-terminals, and answers requests on a
line-based TCP protocol.

EXAMPLES:
    # Run with default layout (1=gpio, 2=i2c, 3=uart, 4=gpio) on port 9999
    ftdi-servod

    # Talk to a different board
    ftdi-servod --vendor-id 0x18d1 --product-id 0x5001

    # Serve a single GPIO port with the legacy '<dir>,<val>' protocol
    ftdi-servod --legacy

CONFIGURATION:
    The daemon looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/ftdi-servod/servod.toml
    3. /etc/ftdi-servod/servod.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List matching devices and exit
    #[arg(long)]
    list_devices: bool,

    /// TCP port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// USB vendor ID (hex with 0x, or decimal)
    #[arg(short = 'v', long, value_parser = parse_id)]
    vendor_id: Option<u16>,

    /// USB product ID (hex with 0x, or decimal)
    #[arg(short = 'P', long, value_parser = parse_id)]
    product_id: Option<u16>,

    /// Speak the legacy '<dir>,<val>' protocol
    #[arg(long)]
    legacy: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn parse_id(s: &str) -> std::result::Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid USB id '{}': {}", s, e))
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = ServerConfig::default();
        let path = ServerConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    // an existing file that fails to load is fatal; defaults only stand in
    // for a missing one
    let mut config = match args.config {
        Some(ref path) => ServerConfig::load(Some(path.clone())),
        None => ServerConfig::load_or_default(),
    }
    .context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(vid) = args.vendor_id {
        config.device.vendor_id = vid;
    }
    if let Some(pid) = args.product_id {
        config.device.product_id = pid;
    }
    if args.legacy {
        config.server.legacy = true;
    }
    if let Some(level) = args.log_level {
        config.server.log_level = level;
    }
    config.validate().context("Invalid configuration")?;

    setup_logging(&config.server.log_level).context("Failed to setup logging")?;
    info!("ftdi-servod v{}", env!("CARGO_PKG_VERSION"));

    if args.list_devices {
        return list_devices(&config);
    }

    if let Err(e) = run(&config) {
        error!("{:#}", e);
        return Err(e);
    }
    Ok(())
}

fn list_devices(config: &ServerConfig) -> Result<()> {
    let devices = device::device_find_all(config.device.vendor_id, config.device.product_id)
        .context("Failed to enumerate USB devices")?;
    if devices.is_empty() {
        println!(
            "No devices found with VID 0x{:04x} PID 0x{:04x}",
            config.device.vendor_id, config.device.product_id
        );
    }
    for dev in devices {
        println!(
            "{:04x}:{:04x} {} (bus {} address {}, {} ports)",
            dev.vid,
            dev.pid,
            dev.chip,
            dev.bus,
            dev.address,
            dev.chip.interface_count()
        );
    }
    Ok(())
}

fn run(config: &ServerConfig) -> Result<()> {
    let vid = config.device.vendor_id;
    let pid = config.device.product_id;
    let mut channels = board::open_channels(config, |interface, entry| {
        let mut port = FtdiPort::open(vid, pid, interface)?;
        if matches!(entry, InterfaceConfig::I2c { .. }) {
            port.set_read_timeout(i2c::read_timeout());
        }
        Ok(port)
    })
    .context("Failed to open interfaces")?;
    if channels.is_empty() {
        return Err(anyhow!("No interfaces configured"));
    }

    let registry = Registry::new(&mut channels);
    for (number, channel) in registry.iter() {
        info!("Interface {} serves {}", number, channel.kind());
        if let Channel::Uart(bridge) = channel {
            if let Some(path) = bridge.pty_path() {
                println!("ftdi uart connected to pty at {}", path);
            }
        }
    }

    let dispatcher = Dispatcher::new(registry, board::dispatch_settings(config));
    let mut server = CommandServer::bind(config.listen_addr()?, dispatcher)
        .with_context(|| format!("Failed to listen on port {}", config.server.port))?;
    info!(
        "Accepting connections at {}",
        server.local_addr().context("Failed to read listening address")?
    );
    server.run().context("Command server failed")?;
    Ok(())
}
