//! GPIO multiplexing over bit-bang, MPSSE and CBUS ports.
//!
//! A [`GpioPort`] owns a transport plus the shadow copy of the pins it
//! drives. The I2C master and the UART bridge embed one so that GPIO
//! requests can reach the spare pins of their ports.

use crate::consts::mpsse;
use crate::error::{self, Error, Result};
use crate::registry::InterfaceType;
use crate::transport::{configure_port, BitMode, Transport};
use log::{debug, trace};

/// Direction, value and availability of the eight pins of a port.
///
/// A set `direction` bit makes the pin an output. `mask` lists the pins a
/// request may touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GpioState {
    pub direction: u8,
    pub value: u8,
    pub mask: u8,
}

impl GpioState {
    pub fn new(direction: u8, value: u8, mask: u8) -> Self {
        GpioState {
            direction,
            value,
            mask,
        }
    }

    /// Whether every bit of `mask` is available in this state.
    pub fn permits(&self, mask: u8) -> bool {
        mask & !self.mask == 0
    }

    /// Applies the masked bits of `new`, reporting which fields changed.
    pub(crate) fn merge(&mut self, new: &GpioState) -> (bool, bool) {
        let direction = (self.direction & !new.mask) | (new.direction & new.mask);
        let value = (self.value & !new.mask) | (new.value & new.mask);
        let changed = (direction != self.direction, value != self.value);
        self.direction = direction;
        self.value = value;
        changed
    }

    /// CBUS bit-mode argument: directions in the high nibble, levels low.
    pub fn cbus_byte(&self) -> u8 {
        ((self.direction & 0x0F) << 4) | (self.value & 0x0F)
    }
}

/// A transport together with the shadow GPIO state of its port.
#[derive(Debug)]
pub struct GpioPort<T: Transport> {
    pub(crate) transport: T,
    pub(crate) state: GpioState,
    kind: InterfaceType,
}

impl<T: Transport> GpioPort<T> {
    pub fn new(transport: T, kind: InterfaceType, mask: u8) -> Self {
        GpioPort {
            transport,
            state: GpioState::new(0, 0, mask),
            kind,
        }
    }

    pub fn kind(&self) -> InterfaceType {
        self.kind
    }

    pub fn state(&self) -> GpioState {
        self.state
    }

    /// Pins available to GPIO requests.
    pub fn mask(&self) -> u8 {
        self.state.mask
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Optionally applies `new`, then optionally samples the pins.
    ///
    /// Only the bits in `new.mask` are changed and the mask must be a subset
    /// of the port's available pins. A rejected mask leaves the port
    /// untouched. Returns the pin levels when `read` is set.
    pub fn write_read(&mut self, new: Option<&GpioState>, read: bool) -> Result<Option<u8>> {
        let narrow = self.transport.chip().is_narrow_gpio();

        if let Some(new) = new {
            if !self.state.permits(new.mask) {
                return Err(Error::GpioMask {
                    requested: new.mask,
                    allowed: self.state.mask,
                });
            }
            if !narrow && self.kind == InterfaceType::Uart {
                return Err(error::unsupported_uart_gpio());
            }

            let (direction_changed, value_changed) = self.state.merge(new);
            trace!(
                "GPIO {} state now dir=0x{:02x} val=0x{:02x}",
                self.transport.interface(),
                self.state.direction,
                self.state.value
            );

            if narrow {
                if direction_changed || value_changed {
                    self.transport
                        .set_bitmode(self.state.cbus_byte(), BitMode::Cbus)?;
                }
            } else {
                if self.kind == InterfaceType::Gpio && direction_changed {
                    self.transport
                        .set_bitmode(self.state.direction, BitMode::BitBang)?;
                }
                if direction_changed || value_changed {
                    self.write_pins()?;
                }
            }
        }

        if !read {
            return Ok(None);
        }
        let mut pins = self.transport.read_pins()?;
        if narrow {
            pins &= 0x0F;
        }
        Ok(Some(pins))
    }

    fn write_pins(&mut self) -> Result<()> {
        let cmd = [mpsse::SET_BITS_LOW, self.state.value, self.state.direction];
        let bytes: &[u8] = if self.kind == InterfaceType::Gpio {
            &cmd[1..2]
        } else {
            &cmd
        };
        let written = self.transport.write_data(bytes)?;
        if written != bytes.len() {
            return Err(Error::ShortWrite {
                expected: bytes.len(),
                actual: written,
            });
        }
        Ok(())
    }
}

/// A port dedicated to GPIO.
#[derive(Debug)]
pub struct GpioChannel<T: Transport> {
    port: GpioPort<T>,
}

impl<T: Transport> GpioChannel<T> {
    pub fn new(transport: T) -> Self {
        let mask = transport.chip().default_gpio_mask();
        GpioChannel {
            port: GpioPort::new(transport, InterfaceType::Gpio, mask),
        }
    }

    /// Enters bit-bang mode with every pin as an input.
    ///
    /// Narrow devices stay in their current mode until the first write.
    pub fn open(&mut self, latency_ms: u8) -> Result<()> {
        let chip = self.port.transport.chip();
        debug!(
            "Opening GPIO channel on {} interface {}",
            chip,
            self.port.transport.interface()
        );
        if chip.is_narrow_gpio() {
            return Ok(());
        }
        configure_port(&mut self.port.transport, latency_ms, 0, BitMode::BitBang)
    }

    pub fn write_read(&mut self, new: Option<&GpioState>, read: bool) -> Result<Option<u8>> {
        self.port.write_read(new, read)
    }

    pub fn state(&self) -> GpioState {
        self.port.state()
    }

    pub fn mask(&self) -> u8 {
        self.port.mask()
    }

    pub fn port(&self) -> &GpioPort<T> {
        &self.port
    }

    /// Leaves bit-bang mode and releases the port.
    pub fn close(&mut self) -> Result<()> {
        if !self.port.transport.chip().is_narrow_gpio() {
            self.port.transport.set_bitmode(0, BitMode::Reset)?;
        }
        self.port.transport.close()
    }
}
