//! # ftdi-servod
//!
//! A daemon and library that multiplex the ports of an FTDI multi-port
//! USB bridge (FT4232H, FT2232C/D/H, FT232R) between GPIO, I²C and UART
//! roles, and expose them to network clients through a small line-based
//! TCP protocol.
//!
//! This crate uses `rusb` for USB access and `nix` for pseudo-terminals
//! and readiness polling.
//!
//! ## Features
//!
//! *   Device discovery (`device::device_find_all`) and per-port opening (`FtdiPort::open`).
//! *   GPIO control with masked, partial-register updates (`GpioChannel`, `GpioState`).
//!     *   Bit-bang ports drive all eight pins.
//!     *   FT232R devices expose their four CBUS pins.
//!     *   Spare pins of I²C ports stay usable as GPIO.
//! *   I²C master built from MPSSE command batches (`I2cChannel`):
//!     *   Clock setting from 100 Hz to 30 MHz (`set_clock`).
//!     *   Combined write/read transactions with automatic restart on NACK (`write_read`).
//! *   UART bridged to a pseudo-terminal (`UartBridge`), pumped by a background thread.
//! *   Interface registry addressed by 1-based port number (`Registry`).
//! *   Single-threaded, `poll(2)`-driven command server (`CommandServer`).
//!
//! ## Wire Protocol
//!
//! One request per line, replies terminated by `A:` or an `E:` line:
//!
//! ```text
//! g,<interface>,<dir>,<val>[,<mask>]     ->  I:0x<pins>\nA:\n
//! i,<slave>,[<wcnt>,<w0>,...,]<rcnt>     ->  I:0x<b0><b1><b2><b3>\n...A:\n
//! ```
//!
//! Legacy mode (`--legacy`) accepts a bare `<dir>,<val>` for one GPIO port.
//!
//! ## Basic Usage
//!
//! ```no_run
//! use ftdi_servod::{
//!     FtdiPort, GpioChannel, GpioState, I2cChannel, Interface, Result,
//! };
//!
//! fn main() -> Result<()> {
//!     let mut gpio = GpioChannel::new(FtdiPort::open(0x0403, 0x6011, Interface::A)?);
//!     gpio.open(16)?;
//!     let pins = gpio.write_read(Some(&GpioState::new(0xFF, 0xAA, 0xFF)), true)?;
//!     println!("pins: {:02x?}", pins);
//!
//!     let mut i2c = I2cChannel::new(FtdiPort::open(0x0403, 0x6011, Interface::B)?);
//!     i2c.open(16, 100_000)?;
//!     i2c.set_slave(0x50);
//!     let mut data = [0u8; 2];
//!     i2c.write_read(&[0x00], &mut data)?;
//!     println!("eeprom: {:02x?}", data);
//!     Ok(())
//! }
//! ```
//!
//! ## Hardware Setup Notes
//!
//! *   **I²C wiring:** SDA must be tied to the port's third pin (SDB) so the
//!     master can sample ACK bits. External pull-ups are required.
//! *   **Linux udev Rules:** Grant user access to the USB device and detach
//!     `ftdi_sio` from the ports the daemon uses:
//!     ```udev
//!     SUBSYSTEM=="usb", ATTRS{idVendor}=="0403", ATTRS{idProduct}=="6011", MODE="0666", GROUP="plugdev"
//!     ```

pub mod board;
pub mod config;
mod consts;
pub mod device;
mod error;
pub mod gpio;
pub mod i2c;
pub mod logging;
pub mod mock;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod transport;
pub mod uart;

pub use config::ServerConfig;
pub use device::FtdiPort;
pub use error::{Error, Result};
pub use gpio::{GpioChannel, GpioState};
pub use i2c::I2cChannel;
pub use protocol::{Request, Response};
pub use registry::{Channel, InterfaceType, Registry};
pub use server::{CommandServer, DispatchSettings, Dispatcher};
pub use transport::{BitMode, ChipType, Interface, LineConfig, Transport};
pub use uart::{UartBridge, UartConfig};
// Re-export only essential public constants
pub use consts::{FT2232_PID, FT232R_PID, FT4232H_PID, FTDI_VID};

/// Publicly accessible pin assignments.
pub mod pins {
    /// Bus pins of an I²C port and the GPIOs left beside them.
    pub mod i2c {
        pub use crate::consts::i2c::{
            GP0_POS, GP1_POS, GP2_POS, GP3_POS, GP4_POS, GPIO_MASK, SCL_POS, SDA_POS, SDB_POS,
        };
    }
    /// Serial pins of a UART port.
    pub mod uart {
        pub use crate::consts::uart::{GPIO_MASK, RX_POS, TX_POS};
    }
}

/// Protocol and transaction limits.
pub mod limits {
    pub use crate::consts::clock::{MAX_HZ as I2C_MAX_CLOCK_HZ, MIN_HZ as I2C_MIN_CLOCK_HZ};
    pub use crate::consts::i2c::{ACK_RETRY_MAX, MAX_TRANSFER as I2C_MAX_TRANSFER};
    pub use crate::consts::server::{DEFAULT_PORT, MAX_LINE};
}
