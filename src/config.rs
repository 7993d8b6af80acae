//! Daemon configuration management

use crate::consts::{self, i2c, server, uart};
use crate::error::{Error, Result};
use crate::transport::{DataBits, Interface, LineConfig, Parity, StopBits};
use crate::uart::UartConfig;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub device: DeviceSettings,
    /// Channel layout, one entry per used port
    #[serde(default = "ServerConfig::default_interfaces")]
    pub interfaces: Vec<InterfaceConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "ServerSettings::default_port")]
    pub port: u16,
    /// Address to listen on (default: all interfaces)
    #[serde(default)]
    pub bind_addr: Option<String>,
    #[serde(default = "ServerSettings::default_log_level")]
    pub log_level: String,
    /// Speak the bare `<dir>,<val>` protocol
    #[serde(default)]
    pub legacy: bool,
    #[serde(default = "ServerSettings::default_legacy_interface")]
    pub legacy_interface: usize,
    /// Port serving `i,` requests
    #[serde(default = "ServerSettings::default_i2c_interface")]
    pub i2c_interface: usize,
}

impl ServerSettings {
    fn default_port() -> u16 {
        server::DEFAULT_PORT
    }

    fn default_log_level() -> String {
        "info".to_string()
    }

    fn default_legacy_interface() -> usize {
        1
    }

    fn default_i2c_interface() -> usize {
        2
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: Self::default_port(),
            bind_addr: None,
            log_level: Self::default_log_level(),
            legacy: false,
            legacy_interface: Self::default_legacy_interface(),
            i2c_interface: Self::default_i2c_interface(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(default = "DeviceSettings::default_vendor_id")]
    pub vendor_id: u16,
    #[serde(default = "DeviceSettings::default_product_id")]
    pub product_id: u16,
    /// USB latency timer in milliseconds
    #[serde(default = "DeviceSettings::default_latency_ms")]
    pub latency_ms: u8,
}

impl DeviceSettings {
    fn default_vendor_id() -> u16 {
        consts::FTDI_VID
    }

    fn default_product_id() -> u16 {
        consts::FT4232H_PID
    }

    fn default_latency_ms() -> u8 {
        consts::USB_LATENCY_TIMER_MS
    }
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            vendor_id: Self::default_vendor_id(),
            product_id: Self::default_product_id(),
            latency_ms: Self::default_latency_ms(),
        }
    }
}

/// What to run on one port.
///
/// # Example Configuration
/// ```toml
/// [[interfaces]]
/// kind = "gpio"
/// port = 1
///
/// [[interfaces]]
/// kind = "uart"
/// port = 3
/// baudrate = 115200
/// parity = "none"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InterfaceConfig {
    Gpio {
        port: usize,
        /// Initial directions, applied after open
        #[serde(default)]
        direction: Option<u8>,
        /// Initial levels, applied after open
        #[serde(default)]
        value: Option<u8>,
    },
    I2c {
        port: usize,
        #[serde(default = "default_clock_hz")]
        clock_hz: u32,
    },
    Uart {
        port: usize,
        #[serde(default = "default_baudrate")]
        baudrate: u32,
        #[serde(default = "default_bits")]
        bits: u8,
        #[serde(default = "default_parity")]
        parity: String,
        #[serde(default = "default_stop_bits")]
        stop_bits: f32,
        /// Pause inside each pump step, in microseconds
        #[serde(default = "default_poll_interval_us")]
        poll_interval_us: u64,
        /// Initial CBUS directions (FT232R only)
        #[serde(default)]
        cbus_direction: Option<u8>,
        /// Initial CBUS levels (FT232R only)
        #[serde(default)]
        cbus_value: Option<u8>,
    },
}

fn default_clock_hz() -> u32 {
    i2c::DEFAULT_CLOCK_HZ
}

fn default_baudrate() -> u32 {
    uart::DEFAULT_BAUDRATE
}

fn default_bits() -> u8 {
    8
}

fn default_parity() -> String {
    "none".to_string()
}

fn default_stop_bits() -> f32 {
    1.0
}

fn default_poll_interval_us() -> u64 {
    uart::POLL_INTERVAL_US
}

impl InterfaceConfig {
    pub fn port(&self) -> usize {
        match self {
            InterfaceConfig::Gpio { port, .. }
            | InterfaceConfig::I2c { port, .. }
            | InterfaceConfig::Uart { port, .. } => *port,
        }
    }

    pub fn interface(&self) -> Result<Interface> {
        Interface::from_port(self.port())
            .ok_or_else(|| config_error(format!("Invalid port {}, must be 1-4", self.port())))
    }

    /// Line and CBUS settings of a UART entry.
    pub fn uart_config(&self) -> Result<Option<(UartConfig, Duration)>> {
        let InterfaceConfig::Uart {
            baudrate,
            bits,
            parity,
            stop_bits,
            poll_interval_us,
            cbus_direction,
            cbus_value,
            ..
        } = self
        else {
            return Ok(None);
        };
        if *baudrate == 0 {
            return Err(config_error("UART baud rate must be non-zero"));
        }
        let line = LineConfig {
            baudrate: *baudrate,
            bits: DataBits::try_from(*bits)?,
            parity: parity.parse::<Parity>()?,
            stop_bits: StopBits::try_from(*stop_bits)?,
        };
        let config = UartConfig {
            line,
            cbus_direction: cbus_direction.unwrap_or(0),
            cbus_value: cbus_value.unwrap_or(0),
        };
        Ok(Some((config, Duration::from_micros(*poll_interval_us))))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            device: DeviceSettings::default(),
            interfaces: Self::default_interfaces(),
        }
    }
}

impl ServerConfig {
    /// The servo board layout: GPIO, I2C, UART, GPIO.
    fn default_interfaces() -> Vec<InterfaceConfig> {
        vec![
            InterfaceConfig::Gpio {
                port: 1,
                direction: None,
                value: None,
            },
            InterfaceConfig::I2c {
                port: 2,
                clock_hz: default_clock_hz(),
            },
            InterfaceConfig::Uart {
                port: 3,
                baudrate: default_baudrate(),
                bits: default_bits(),
                parity: default_parity(),
                stop_bits: default_stop_bits(),
                poll_interval_us: default_poll_interval_us(),
                cbus_direction: None,
                cbus_value: None,
            },
            InterfaceConfig::Gpio {
                port: 4,
                direction: None,
                value: None,
            },
        ]
    }

    /// Load configuration from `path`, or from the first existing standard
    /// location
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => Self::candidate_paths()
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| config_error("No configuration file found"))?,
        };
        Self::load_file(&config_path)
    }

    /// Load from the standard locations, falling back to defaults only when
    /// none of them holds a file
    pub fn load_or_default() -> Result<Self> {
        Self::load_first_or_default(&Self::candidate_paths())
    }

    /// Load the first of `candidates` that exists.
    ///
    /// A file that exists but cannot be read, parsed or validated is an
    /// error; defaults are used only when no candidate exists.
    pub fn load_first_or_default(candidates: &[PathBuf]) -> Result<Self> {
        match candidates.iter().find(|p| p.exists()) {
            Some(path) => Self::load_file(path),
            None => {
                debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Standard configuration locations, in lookup order
    pub fn candidate_paths() -> Vec<PathBuf> {
        vec![
            Self::default_path(),
            PathBuf::from("/etc/ftdi-servod/servod.toml"),
        ]
    }

    fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            config_error(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: ServerConfig = toml::from_str(&content).map_err(|e| {
            config_error(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })?;

        config.validate()?;

        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| config_error(format!("Failed to serialize configuration: {}", e)))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                config_error(format!(
                    "Failed to create config directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        fs::write(path, content).map_err(|e| {
            config_error(format!(
                "Failed to write config file {}: {}",
                path.display(),
                e
            ))
        })?;

        info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("ftdi-servod").join("servod.toml")
        } else {
            PathBuf::from(".config/ftdi-servod/servod.toml")
        }
    }

    /// Address the command server binds to
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = match &self.server.bind_addr {
            Some(addr) => addr
                .parse()
                .map_err(|e| config_error(format!("Invalid bind address '{}': {}", addr, e)))?,
            None => IpAddr::from([0, 0, 0, 0]),
        };
        Ok(SocketAddr::new(ip, self.server.port))
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["off", "trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(config_error(format!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            )));
        }
        if self.device.latency_ms == 0 {
            return Err(config_error("Latency timer must be 1-255 ms"));
        }
        self.listen_addr()?;

        let mut seen = HashSet::new();
        for entry in &self.interfaces {
            entry.interface()?;
            if !seen.insert(entry.port()) {
                return Err(config_error(format!(
                    "Port {} configured more than once",
                    entry.port()
                )));
            }
            if let InterfaceConfig::I2c { clock_hz, .. } = entry {
                if !(consts::clock::MIN_HZ..=consts::clock::MAX_HZ).contains(clock_hz) {
                    return Err(config_error(format!(
                        "I2C clock {} Hz out of range",
                        clock_hz
                    )));
                }
            }
            entry.uart_config()?;
        }
        // the registry addresses channels by position
        let mut ports: Vec<usize> = seen.into_iter().collect();
        ports.sort_unstable();
        if ports.iter().enumerate().any(|(i, &port)| port != i + 1) {
            return Err(config_error(format!(
                "Configured ports {:?} must be numbered 1..{} without gaps",
                ports,
                ports.len()
            )));
        }

        let kind_at = |port: usize| self.interfaces.iter().find(|e| e.port() == port);
        let has_i2c = self
            .interfaces
            .iter()
            .any(|e| matches!(e, InterfaceConfig::I2c { .. }));
        if has_i2c
            && !matches!(
                kind_at(self.server.i2c_interface),
                Some(InterfaceConfig::I2c { .. })
            )
        {
            return Err(config_error(format!(
                "i2c_interface {} is not an i2c port",
                self.server.i2c_interface
            )));
        }
        if self.server.legacy
            && !matches!(
                kind_at(self.server.legacy_interface),
                Some(InterfaceConfig::Gpio { .. })
            )
        {
            return Err(config_error(format!(
                "legacy_interface {} is not a gpio port",
                self.server.legacy_interface
            )));
        }
        Ok(())
    }
}

fn config_error(msg: impl Into<String>) -> Error {
    Error::Config(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout() {
        let config = ServerConfig::default();
        assert_eq!(config.server.port, 9999);
        assert_eq!(config.server.i2c_interface, 2);
        assert_eq!(config.device.vendor_id, 0x0403);
        assert_eq!(config.device.product_id, 0x6011);
        let ports: Vec<usize> = config.interfaces.iter().map(|i| i.port()).collect();
        assert_eq!(ports, vec![1, 2, 3, 4]);
        assert!(matches!(config.interfaces[1], InterfaceConfig::I2c { .. }));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_minimal() {
        let config: ServerConfig = toml::from_str(
            r#"
            [server]
            port = 10000

            [device]

            [[interfaces]]
            kind = "i2c"
            port = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 10000);
        assert_eq!(config.server.log_level, "info");
        assert_eq!(config.device.latency_ms, 16);
        assert_eq!(
            config.interfaces,
            vec![InterfaceConfig::I2c {
                port: 1,
                clock_hz: 100_000
            }]
        );
    }

    #[test]
    fn test_validate_rejects() {
        let mut config = ServerConfig::default();
        config.server.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.interfaces.push(InterfaceConfig::Gpio {
            port: 1,
            direction: None,
            value: None,
        });
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.interfaces = vec![InterfaceConfig::Gpio {
            port: 5,
            direction: None,
            value: None,
        }];
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.interfaces = vec![InterfaceConfig::Uart {
            port: 3,
            baudrate: 9600,
            bits: 9,
            parity: "none".into(),
            stop_bits: 1.0,
            poll_interval_us: 100,
            cbus_direction: None,
            cbus_value: None,
        }];
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.server.bind_addr = Some("not-an-ip".into());
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.interfaces.remove(2);
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.server.i2c_interface = 1;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.server.legacy = true;
        config.server.legacy_interface = 3;
        assert!(config.validate().is_err());
        config.server.legacy_interface = 4;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_uart_config_conversion() {
        let entry = InterfaceConfig::Uart {
            port: 3,
            baudrate: 9600,
            bits: 7,
            parity: "even".into(),
            stop_bits: 2.0,
            poll_interval_us: 1000,
            cbus_direction: Some(0x0C),
            cbus_value: Some(0x04),
        };
        let (config, poll) = entry.uart_config().unwrap().unwrap();
        assert_eq!(config.line.baudrate, 9600);
        assert_eq!(config.line.bits, DataBits::Seven);
        assert_eq!(config.line.parity, Parity::Even);
        assert_eq!(config.line.stop_bits, StopBits::Two);
        assert_eq!(config.cbus_direction, 0x0C);
        assert_eq!(config.cbus_value, 0x04);
        assert_eq!(poll, Duration::from_millis(1));
    }
}
