//! The byte-level transport seam between channels and an FTDI port.
//!
//! Every channel talks to the hardware through [`Transport`]. The USB
//! implementation lives in [`crate::device`]; tests use [`crate::mock`].

use crate::consts::{self, gpio};
use crate::error::{Error, Result};
use log::{debug, warn};
use std::fmt;
use std::str::FromStr;

/// FTDI chip models, detected from the device's `bcdDevice`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChipType {
    Am,
    Bm,
    Ft2232C,
    Ft232R,
    Ft2232H,
    Ft4232H,
    Ft232H,
}

impl ChipType {
    /// Maps a `bcdDevice` release number to a chip model.
    pub fn from_bcd_device(bcd: u16, serial_index: Option<u8>) -> Self {
        match bcd {
            0x0400 => ChipType::Bm,
            // 0x200 with a serial string index is a BM with broken EEPROM
            0x0200 if serial_index.is_none() => ChipType::Am,
            0x0200 => ChipType::Bm,
            0x0500 => ChipType::Ft2232C,
            0x0600 => ChipType::Ft232R,
            0x0700 => ChipType::Ft2232H,
            0x0800 => ChipType::Ft4232H,
            0x0900 => ChipType::Ft232H,
            _ => ChipType::Bm,
        }
    }

    /// Number of independent ports on the chip.
    pub fn interface_count(self) -> u8 {
        match self {
            ChipType::Ft2232C | ChipType::Ft2232H => 2,
            ChipType::Ft4232H => 4,
            _ => 1,
        }
    }

    /// Whether `interface` has an MPSSE engine on this chip.
    pub fn is_mpsse(self, interface: Interface) -> bool {
        match self {
            ChipType::Ft2232C => interface == Interface::A,
            ChipType::Ft2232H | ChipType::Ft4232H => {
                matches!(interface, Interface::A | Interface::B)
            }
            ChipType::Ft232H => interface == Interface::A,
            _ => false,
        }
    }

    /// H series chips run the 60 MHz MPSSE master clock and 512 byte packets.
    pub fn is_high_speed(self) -> bool {
        matches!(
            self,
            ChipType::Ft2232H | ChipType::Ft4232H | ChipType::Ft232H
        )
    }

    /// Devices whose only GPIOs are the four CBUS pins.
    pub fn is_narrow_gpio(self) -> bool {
        self == ChipType::Ft232R
    }

    /// Pins a GPIO channel may drive on this chip.
    pub fn default_gpio_mask(self) -> u8 {
        if self.is_narrow_gpio() {
            gpio::NARROW_MASK
        } else {
            gpio::WIDE_MASK
        }
    }
}

impl fmt::Display for ChipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChipType::Am => "FT8U232AM",
            ChipType::Bm => "FT232BM",
            ChipType::Ft2232C => "FT2232C",
            ChipType::Ft232R => "FT232R",
            ChipType::Ft2232H => "FT2232H",
            ChipType::Ft4232H => "FT4232H",
            ChipType::Ft232H => "FT232H",
        };
        f.write_str(name)
    }
}

/// One port of a multi-port chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    A,
    B,
    C,
    D,
}

impl Interface {
    /// Interface selected by a 1-based port number.
    pub fn from_port(port: usize) -> Option<Self> {
        match port {
            1 => Some(Interface::A),
            2 => Some(Interface::B),
            3 => Some(Interface::C),
            4 => Some(Interface::D),
            _ => None,
        }
    }

    /// The 1-based port number.
    pub fn port(self) -> usize {
        self.number() as usize + 1
    }

    /// USB interface number to claim.
    pub fn number(self) -> u8 {
        match self {
            Interface::A => 0,
            Interface::B => 1,
            Interface::C => 2,
            Interface::D => 3,
        }
    }

    /// `wIndex` used by SIO control requests.
    pub fn sio_index(self) -> u16 {
        self.number() as u16 + 1
    }

    pub fn in_endpoint(self) -> u8 {
        match self {
            Interface::A => 0x81,
            Interface::B => 0x83,
            Interface::C => 0x85,
            Interface::D => 0x87,
        }
    }

    pub fn out_endpoint(self) -> u8 {
        match self {
            Interface::A => 0x02,
            Interface::B => 0x04,
            Interface::C => 0x06,
            Interface::D => 0x08,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Interface::A => 'A',
            Interface::B => 'B',
            Interface::C => 'C',
            Interface::D => 'D',
        }
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl FromStr for Interface {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" | "1" => Ok(Interface::A),
            "B" | "2" => Ok(Interface::B),
            "C" | "3" => Ok(Interface::C),
            "D" | "4" => Ok(Interface::D),
            other => Err(Error::Config(format!("unknown interface '{}'", other))),
        }
    }
}

/// Pin operating modes accepted by `SET_BITMODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BitMode {
    Reset = 0x00,
    BitBang = 0x01,
    Mpsse = 0x02,
    SyncBitBang = 0x04,
    Mcu = 0x08,
    Opto = 0x10,
    Cbus = 0x20,
    SyncFifo = 0x40,
}

impl BitMode {
    /// Whether the baud rate register clocks the pins directly in this mode.
    pub fn is_bitbang(self) -> bool {
        matches!(self, BitMode::BitBang | BitMode::SyncBitBang)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataBits {
    Seven = 7,
    Eight = 8,
}

impl TryFrom<u8> for DataBits {
    type Error = Error;

    fn try_from(bits: u8) -> Result<Self> {
        match bits {
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(Error::Config(format!("unsupported data bits {}", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopBits {
    One = 0,
    OnePointFive = 1,
    Two = 2,
}

impl TryFrom<f32> for StopBits {
    type Error = Error;

    fn try_from(bits: f32) -> Result<Self> {
        if bits == 1.0 {
            Ok(StopBits::One)
        } else if bits == 1.5 {
            Ok(StopBits::OnePointFive)
        } else if bits == 2.0 {
            Ok(StopBits::Two)
        } else {
            Err(Error::Config(format!("unsupported stop bits {}", bits)))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parity {
    None = 0,
    Odd = 1,
    Even = 2,
    Mark = 3,
    Space = 4,
}

impl FromStr for Parity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" | "n" => Ok(Parity::None),
            "odd" | "o" => Ok(Parity::Odd),
            "even" | "e" => Ok(Parity::Even),
            "mark" | "m" => Ok(Parity::Mark),
            "space" | "s" => Ok(Parity::Space),
            other => Err(Error::Config(format!("unknown parity '{}'", other))),
        }
    }
}

/// Serial line settings of a UART port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LineConfig {
    pub baudrate: u32,
    pub bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl LineConfig {
    /// `wValue` of the `SET_DATA` request.
    pub fn sio_value(&self) -> u16 {
        (self.bits as u16) | ((self.parity as u16) << 8) | ((self.stop_bits as u16) << 11)
    }
}

impl Default for LineConfig {
    fn default() -> Self {
        LineConfig {
            baudrate: consts::uart::DEFAULT_BAUDRATE,
            bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

/// Byte-level access to one port of an FTDI chip.
///
/// Methods mirror the vendor requests of the chip. `read_data` returns the
/// payload with modem status bytes already stripped, and returns `Ok(0)`
/// when nothing arrived before the port's read timeout.
pub trait Transport: Send + 'static {
    fn chip(&self) -> ChipType;
    fn interface(&self) -> Interface;

    /// Submits bytes to the port, returning how many were accepted.
    fn write_data(&mut self, data: &[u8]) -> Result<usize>;
    /// Reads available bytes into `buf`.
    fn read_data(&mut self, buf: &mut [u8]) -> Result<usize>;

    fn set_bitmode(&mut self, mask: u8, mode: BitMode) -> Result<()>;
    /// Instantaneous pin levels.
    fn read_pins(&mut self) -> Result<u8>;
    fn set_latency_timer(&mut self, ms: u8) -> Result<()>;
    fn latency_timer(&mut self) -> Result<u8>;
    fn set_baudrate(&mut self, baudrate: u32) -> Result<()>;
    fn set_line_property(&mut self, line: &LineConfig) -> Result<()>;
    /// Drops pending data in both directions.
    fn purge_buffers(&mut self) -> Result<()>;
    /// Drops pending data queued towards the chip.
    fn purge_tx_buffer(&mut self) -> Result<()>;
    /// Releases the port. Later calls fail.
    fn close(&mut self) -> Result<()>;
}

/// Prepares a port for bit-bang or MPSSE use.
///
/// Programs the latency timer (warning if the chip reports a different
/// value), resets the bit mode, enters `mode` with `direction` as the
/// output mask and purges both buffers.
pub fn configure_port<T: Transport + ?Sized>(
    transport: &mut T,
    latency_ms: u8,
    direction: u8,
    mode: BitMode,
) -> Result<()> {
    debug!(
        "Configuring interface {} for {:?} (dir=0x{:02x}, latency={}ms)",
        transport.interface(),
        mode,
        direction,
        latency_ms
    );
    transport.set_latency_timer(latency_ms)?;
    let actual = transport.latency_timer()?;
    if actual != latency_ms {
        warn!(
            "Latency timer on interface {} reads back {}ms (requested {}ms)",
            transport.interface(),
            actual,
            latency_ms
        );
    }
    transport.set_bitmode(0, BitMode::Reset)?;
    transport.set_bitmode(direction, mode)?;
    transport.purge_buffers()?;
    Ok(())
}
