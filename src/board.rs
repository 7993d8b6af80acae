//! Opens the configured channels, in port order.

use crate::config::{InterfaceConfig, ServerConfig};
use crate::error::{Error, Result};
use crate::gpio::{GpioChannel, GpioState};
use crate::i2c::I2cChannel;
use crate::registry::Channel;
use crate::server::DispatchSettings;
use crate::transport::{Interface, Transport};
use crate::uart::UartBridge;
use log::{error, info, warn};

/// Opens one channel per configured port and starts the UART pumps.
///
/// `open` supplies the transport for each interface. On failure the
/// channels opened so far are closed again.
pub fn open_channels<T, F>(config: &ServerConfig, mut open: F) -> Result<Vec<Channel<T>>>
where
    T: Transport,
    F: FnMut(Interface, &InterfaceConfig) -> Result<T>,
{
    let mut entries: Vec<&InterfaceConfig> = config.interfaces.iter().collect();
    entries.sort_by_key(|e| e.port());

    let mut channels = Vec::with_capacity(entries.len());
    for entry in entries {
        match open_channel(config, entry, &mut open) {
            Ok(channel) => channels.push(channel),
            Err(e) => {
                for channel in channels.iter_mut() {
                    if let Err(close_err) = channel.close() {
                        warn!("Closing channel after failed startup: {}", close_err);
                    }
                }
                error!("Failed to open interface {}: {}", entry.port(), e);
                return Err(e);
            }
        }
    }
    Ok(channels)
}

fn open_channel<T, F>(
    config: &ServerConfig,
    entry: &InterfaceConfig,
    open: &mut F,
) -> Result<Channel<T>>
where
    T: Transport,
    F: FnMut(Interface, &InterfaceConfig) -> Result<T>,
{
    let interface = entry.interface()?;
    let transport = open(interface, entry)?;
    let latency = config.device.latency_ms;

    let channel = match entry {
        InterfaceConfig::Gpio {
            direction, value, ..
        } => {
            let mut gpio = GpioChannel::new(transport);
            gpio.open(latency)?;
            if direction.is_some() || value.is_some() {
                let state = GpioState::new(
                    direction.unwrap_or(0),
                    value.unwrap_or(0),
                    gpio.mask(),
                );
                gpio.write_read(Some(&state), false)?;
            }
            info!("Interface {} ({}): gpio", entry.port(), interface);
            Channel::Gpio(gpio)
        }
        InterfaceConfig::I2c { clock_hz, .. } => {
            let mut i2c = I2cChannel::new(transport);
            i2c.open(latency, *clock_hz)?;
            info!(
                "Interface {} ({}): i2c at {} Hz",
                entry.port(),
                interface,
                clock_hz
            );
            Channel::I2c(i2c)
        }
        InterfaceConfig::Uart { .. } => {
            let (uart_config, poll_interval) = entry
                .uart_config()?
                .ok_or_else(|| Error::Config("not a uart entry".to_string()))?;
            let bridge = UartBridge::new(transport);
            bridge.open(&uart_config)?;
            bridge.run(poll_interval)?;
            if let Some(path) = bridge.pty_path() {
                info!(
                    "Interface {} ({}): uart bridged to {}",
                    entry.port(),
                    interface,
                    path
                );
            }
            Channel::Uart(bridge)
        }
    };
    Ok(channel)
}

/// Request routing derived from the server settings.
pub fn dispatch_settings(config: &ServerConfig) -> DispatchSettings {
    DispatchSettings {
        i2c_interface: config.server.i2c_interface,
        legacy_interface: config
            .server
            .legacy
            .then_some(config.server.legacy_interface),
    }
}
