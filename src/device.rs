//! FTDI device discovery and the libusb-backed [`Transport`].

use crate::consts::sio;
use crate::error::{Error, Result};
use crate::transport::{BitMode, ChipType, Interface, LineConfig, Transport};
use log::{debug, trace, warn};
use rusb::{Device, DeviceHandle, Direction, GlobalContext, Recipient, RequestType};
use std::fmt;
use std::time::Duration;

/// Default USB timeout for control and bulk transfers.
const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);
/// Bytes requested from the bulk endpoint per read.
const READ_CHUNK_SIZE: usize = 4096;
/// Modem status bytes prefixed to every packet the chip sends.
const MODEM_STATUS_LEN: usize = 2;

const H_CLK: u32 = 120_000_000;
const C_CLK: u32 = 48_000_000;

/// Information about a discovered FTDI device.
#[derive(Debug, Clone)]
pub struct FtdiDeviceInfo {
    pub vid: u16,
    pub pid: u16,
    pub bus: u8,
    pub address: u8,
    pub chip: ChipType,
}

/// Finds all devices matching `vid`/`pid`, in bus order.
pub fn device_find_all(vid: u16, pid: u16) -> Result<Vec<FtdiDeviceInfo>> {
    let mut found = Vec::new();
    for device in rusb::devices()?.iter() {
        let desc = match device.device_descriptor() {
            Ok(desc) => desc,
            Err(e) => {
                trace!("Skipping device without descriptor: {}", e);
                continue;
            }
        };
        if desc.vendor_id() != vid || desc.product_id() != pid {
            continue;
        }
        let chip = chip_type(&desc);
        debug!(
            "Found {} ({:04x}:{:04x}) at bus {} address {}",
            chip,
            vid,
            pid,
            device.bus_number(),
            device.address()
        );
        found.push(FtdiDeviceInfo {
            vid,
            pid,
            bus: device.bus_number(),
            address: device.address(),
            chip,
        });
    }
    Ok(found)
}

fn chip_type(desc: &rusb::DeviceDescriptor) -> ChipType {
    let version = desc.device_version();
    let bcd = ((version.major() as u16) << 8)
        | ((version.minor() as u16) << 4)
        | version.sub_minor() as u16;
    ChipType::from_bcd_device(bcd, desc.serial_number_string_index())
}

fn find_device(vid: u16, pid: u16) -> Result<Device<GlobalContext>> {
    rusb::devices()?
        .iter()
        .find(|device| {
            device
                .device_descriptor()
                .map(|d| d.vendor_id() == vid && d.product_id() == pid)
                .unwrap_or(false)
        })
        .ok_or(Error::DeviceNotFound { vid, pid })
}

/// One claimed port of an FTDI chip.
pub struct FtdiPort {
    handle: DeviceHandle<GlobalContext>,
    chip: ChipType,
    interface: Interface,
    max_packet_size: usize,
    bitmode: BitMode,
    read_timeout: Duration,
    write_timeout: Duration,
    // payload left over from the last bulk read
    read_buffer: Vec<u8>,
    read_offset: usize,
    claimed: bool,
}

impl fmt::Debug for FtdiPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FtdiPort")
            .field("chip", &self.chip)
            .field("interface", &self.interface)
            .field("max_packet_size", &self.max_packet_size)
            .field("bitmode", &self.bitmode)
            .field("claimed", &self.claimed)
            .finish()
    }
}

impl FtdiPort {
    /// Opens the first device matching `vid`/`pid` and claims `interface`.
    pub fn open(vid: u16, pid: u16, interface: Interface) -> Result<Self> {
        let device = find_device(vid, pid)?;
        let desc = device.device_descriptor()?;
        let chip = chip_type(&desc);
        if interface.number() >= chip.interface_count() {
            return Err(Error::UnsupportedInterface {
                interface: interface.letter(),
                chip: chip.to_string(),
            });
        }

        let handle = device.open()?;
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable: {}", e);
        }
        handle.claim_interface(interface.number())?;

        let max_packet_size = packet_size(&device, interface, chip);
        debug!(
            "Opened {} interface {} (max packet {})",
            chip, interface, max_packet_size
        );
        let port = FtdiPort {
            handle,
            chip,
            interface,
            max_packet_size,
            bitmode: BitMode::Reset,
            read_timeout: DEFAULT_TIMEOUT,
            write_timeout: DEFAULT_TIMEOUT,
            read_buffer: Vec::new(),
            read_offset: 0,
            claimed: true,
        };
        port.control_out(sio::RESET_REQUEST, sio::RESET_SIO)?;
        Ok(port)
    }

    pub fn set_read_timeout(&mut self, timeout: Duration) {
        self.read_timeout = timeout;
    }

    pub fn set_write_timeout(&mut self, timeout: Duration) {
        self.write_timeout = timeout;
    }

    fn check_open(&self) -> Result<()> {
        if self.claimed {
            Ok(())
        } else {
            Err(Error::NotOpen)
        }
    }

    fn control_out(&self, request: u8, value: u16) -> Result<()> {
        self.control_out_indexed(request, value, self.interface.sio_index())
    }

    fn control_out_indexed(&self, request: u8, value: u16, index: u16) -> Result<()> {
        self.check_open()?;
        let request_type = rusb::request_type(Direction::Out, RequestType::Vendor, Recipient::Device);
        trace!(
            "SIO out req=0x{:02x} value=0x{:04x} index=0x{:04x}",
            request,
            value,
            index
        );
        self.handle
            .write_control(request_type, request, value, index, &[], self.write_timeout)?;
        Ok(())
    }

    fn control_in(&self, request: u8, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        let request_type = rusb::request_type(Direction::In, RequestType::Vendor, Recipient::Device);
        let n = self.handle.read_control(
            request_type,
            request,
            0,
            self.interface.sio_index(),
            buf,
            self.read_timeout,
        )?;
        Ok(n)
    }

    fn buffered(&self) -> &[u8] {
        &self.read_buffer[self.read_offset..]
    }
}

fn packet_size(device: &Device<GlobalContext>, interface: Interface, chip: ChipType) -> usize {
    let fallback = if chip.is_high_speed() { 512 } else { 64 };
    let Ok(config) = device.active_config_descriptor() else {
        return fallback;
    };
    config
        .interfaces()
        .filter(|i| i.number() == interface.number())
        .flat_map(|i| i.descriptors().collect::<Vec<_>>())
        .flat_map(|alt| {
            alt.endpoint_descriptors()
                .map(|ep| ep.max_packet_size() as usize)
                .collect::<Vec<_>>()
        })
        .next()
        .unwrap_or(fallback)
}

/// Removes the modem status bytes leading each `packet_size` packet.
pub(crate) fn strip_modem_status(raw: &[u8], packet_size: usize) -> Vec<u8> {
    raw.chunks(packet_size)
        .filter(|packet| packet.len() > MODEM_STATUS_LEN)
        .flat_map(|packet| packet[MODEM_STATUS_LEN..].iter().copied())
        .collect()
}

/// Encodes a baud rate into the `(value, index)` pair of `SET_BAUDRATE`,
/// returning the rate the chip will actually produce.
pub(crate) fn encode_baudrate(baudrate: u32, chip: ChipType, sio_index: u16) -> Option<(u32, u16, u16)> {
    if baudrate == 0 {
        return None;
    }
    let (actual, encoded) = if chip.is_high_speed() && baudrate.saturating_mul(10) > H_CLK / 0x3FFF {
        let (actual, encoded) = to_clkbits(baudrate, H_CLK, 10);
        // use the 120 MHz clock
        (actual, encoded | 0x20000)
    } else {
        to_clkbits(baudrate, C_CLK, 16)
    };
    let value = (encoded & 0xFFFF) as u16;
    // multi-port and H-series chips carry the port number in the low byte
    let index = if chip.interface_count() > 1 || chip.is_high_speed() {
        (((encoded >> 8) & 0xFF00) as u16) | sio_index
    } else {
        (encoded >> 16) as u16
    };
    Some((actual, value, index))
}

fn to_clkbits(baudrate: u32, clk: u32, clk_div: u32) -> (u32, u32) {
    const FRAC_CODE: [u32; 8] = [0, 3, 2, 4, 1, 5, 6, 7];
    if baudrate >= clk / clk_div {
        return (clk / clk_div, 0);
    }
    if baudrate >= clk / (clk_div + clk_div / 2) {
        return (clk / (clk_div + clk_div / 2), 1);
    }
    if baudrate >= clk / (2 * clk_div) {
        return (clk / (2 * clk_div), 2);
    }
    // eighths of the divisor, rounded
    let divisor = clk * 16 / clk_div / baudrate;
    let mut best = if divisor & 1 != 0 {
        divisor / 2 + 1
    } else {
        divisor / 2
    };
    if best > 0x20000 {
        best = 0x1FFFF;
    }
    let mut actual = clk * 16 / clk_div / best;
    actual = if actual & 1 != 0 { actual / 2 + 1 } else { actual / 2 };
    (actual, (best >> 3) | (FRAC_CODE[(best & 0x7) as usize] << 14))
}

impl Transport for FtdiPort {
    fn chip(&self) -> ChipType {
        self.chip
    }

    fn interface(&self) -> Interface {
        self.interface
    }

    fn write_data(&mut self, data: &[u8]) -> Result<usize> {
        self.check_open()?;
        let mut offset = 0;
        while offset < data.len() {
            let end = (offset + self.max_packet_size).min(data.len());
            let n = self.handle.write_bulk(
                self.interface.out_endpoint(),
                &data[offset..end],
                self.write_timeout,
            )?;
            let short = n < end - offset;
            offset += n;
            if short {
                break;
            }
        }
        Ok(offset)
    }

    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.check_open()?;
        if self.buffered().is_empty() {
            let mut raw = vec![0u8; READ_CHUNK_SIZE];
            let n = match self.handle.read_bulk(
                self.interface.in_endpoint(),
                &mut raw,
                self.read_timeout,
            ) {
                Ok(n) => n,
                Err(rusb::Error::Timeout) => return Ok(0),
                Err(e) => return Err(e.into()),
            };
            self.read_buffer = strip_modem_status(&raw[..n], self.max_packet_size);
            self.read_offset = 0;
        }
        let available = self.buffered();
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.read_offset += n;
        Ok(n)
    }

    fn set_bitmode(&mut self, mask: u8, mode: BitMode) -> Result<()> {
        let value = (mask as u16) | ((mode as u16) << 8);
        self.control_out(sio::SET_BITMODE_REQUEST, value)?;
        self.bitmode = mode;
        Ok(())
    }

    fn read_pins(&mut self) -> Result<u8> {
        let mut pins = [0u8; 1];
        let n = self.control_in(sio::READ_PINS_REQUEST, &mut pins)?;
        if n != 1 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "short pin state read",
            )));
        }
        Ok(pins[0])
    }

    fn set_latency_timer(&mut self, ms: u8) -> Result<()> {
        if ms == 0 {
            return Err(Error::Config("latency timer must be 1-255 ms".to_string()));
        }
        self.control_out(sio::SET_LATENCY_TIMER_REQUEST, ms as u16)
    }

    fn latency_timer(&mut self) -> Result<u8> {
        let mut latency = [0u8; 1];
        self.control_in(sio::GET_LATENCY_TIMER_REQUEST, &mut latency)?;
        Ok(latency[0])
    }

    fn set_baudrate(&mut self, baudrate: u32) -> Result<()> {
        // bit-bang modes clock the pins at 4x the programmed rate
        let requested = if self.bitmode.is_bitbang() {
            baudrate.saturating_mul(4)
        } else {
            baudrate
        };
        let (actual, value, index) = encode_baudrate(requested, self.chip, self.interface.sio_index())
            .ok_or_else(|| Error::Config(format!("invalid baud rate {}", baudrate)))?;
        // more than 5% off is not a usable serial line
        let off = if actual > requested {
            actual - requested
        } else {
            requested - actual
        };
        if off as u64 * 20 > requested as u64 {
            return Err(Error::UnsupportedFeature(format!(
                "baud rate {} not achievable on {} (closest {})",
                baudrate, self.chip, actual
            )));
        }
        debug!(
            "Baud rate {} on interface {}: value=0x{:04x} index=0x{:04x}",
            baudrate, self.interface, value, index
        );
        self.control_out_indexed(sio::SET_BAUDRATE_REQUEST, value, index)
    }

    fn set_line_property(&mut self, line: &LineConfig) -> Result<()> {
        self.control_out(sio::SET_DATA_REQUEST, line.sio_value())
    }

    fn purge_buffers(&mut self) -> Result<()> {
        self.control_out(sio::RESET_REQUEST, sio::RESET_PURGE_RX)?;
        self.read_buffer.clear();
        self.read_offset = 0;
        self.control_out(sio::RESET_REQUEST, sio::RESET_PURGE_TX)
    }

    fn purge_tx_buffer(&mut self) -> Result<()> {
        self.control_out(sio::RESET_REQUEST, sio::RESET_PURGE_TX)
    }

    fn close(&mut self) -> Result<()> {
        if !self.claimed {
            return Ok(());
        }
        self.claimed = false;
        self.handle.release_interface(self.interface.number())?;
        debug!("Released {} interface {}", self.chip, self.interface);
        Ok(())
    }
}

impl Drop for FtdiPort {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("Releasing interface {}: {}", self.interface, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_modem_status() {
        let mut raw = vec![0x31, 0x60];
        raw.extend(1..=62u8);
        raw.extend([0x31, 0x60, 0xAA, 0xBB]);
        let data = strip_modem_status(&raw, 64);
        assert_eq!(data.len(), 64);
        assert_eq!(data[0], 1);
        assert_eq!(data[61], 62);
        assert_eq!(&data[62..], &[0xAA, 0xBB]);

        // status-only packets carry no payload
        assert!(strip_modem_status(&[0x31, 0x60], 64).is_empty());
    }

    #[test]
    fn test_encode_baudrate_bm() {
        let (actual, value, index) = encode_baudrate(9600, ChipType::Bm, 1).unwrap();
        assert_eq!(actual, 9600);
        assert_eq!(value, 0x4138);
        assert_eq!(index, 0);
    }

    #[test]
    fn test_encode_baudrate_high_speed() {
        let (actual, value, index) = encode_baudrate(115_200, ChipType::Ft4232H, 3).unwrap();
        assert!((actual as i64 - 115_200).abs() * 100 < 115_200 * 3);
        assert_eq!(index & 0x00FF, 3);
        assert_ne!(value, 0);
        assert!(encode_baudrate(0, ChipType::Ft4232H, 1).is_none());
    }
}
