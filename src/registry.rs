//! Channel table addressed by 1-based interface number.

use crate::error::{Error, Result};
use crate::gpio::{GpioChannel, GpioState};
use crate::i2c::I2cChannel;
use crate::transport::Transport;
use crate::uart::UartBridge;
use log::trace;
use std::fmt;

/// What a port is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceType {
    /// Matches any channel during lookup.
    Any,
    Gpio,
    I2c,
    Jtag,
    Spi,
    Uart,
}

impl fmt::Display for InterfaceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InterfaceType::Any => "any",
            InterfaceType::Gpio => "gpio",
            InterfaceType::I2c => "i2c",
            InterfaceType::Jtag => "jtag",
            InterfaceType::Spi => "spi",
            InterfaceType::Uart => "uart",
        };
        f.write_str(name)
    }
}

/// An opened port in one of its supported roles.
#[derive(Debug)]
pub enum Channel<T: Transport> {
    Gpio(GpioChannel<T>),
    I2c(I2cChannel<T>),
    Uart(UartBridge<T>),
}

impl<T: Transport> Channel<T> {
    pub fn kind(&self) -> InterfaceType {
        match self {
            Channel::Gpio(_) => InterfaceType::Gpio,
            Channel::I2c(_) => InterfaceType::I2c,
            Channel::Uart(_) => InterfaceType::Uart,
        }
    }

    /// Pins GPIO requests may touch on this channel.
    pub fn gpio_mask(&self) -> u8 {
        match self {
            Channel::Gpio(ch) => ch.mask(),
            Channel::I2c(ch) => ch.port().mask(),
            Channel::Uart(ch) => ch.mask(),
        }
    }

    /// Routes a GPIO request to whichever channel owns the port.
    pub fn gpio_write_read(&mut self, new: Option<&GpioState>, read: bool) -> Result<Option<u8>> {
        match self {
            Channel::Gpio(ch) => ch.write_read(new, read),
            Channel::I2c(ch) => ch.gpio_write_read(new, read),
            Channel::Uart(ch) => ch.gpio_write_read(new, read),
        }
    }

    /// Releases the underlying port.
    pub fn close(&mut self) -> Result<()> {
        match self {
            Channel::Gpio(ch) => ch.close(),
            Channel::I2c(ch) => ch.close(),
            Channel::Uart(ch) => ch.close(),
        }
    }
}

/// Borrowed view over the opened channels, in interface order.
pub struct Registry<'a, T: Transport> {
    channels: &'a mut [Channel<T>],
}

impl<'a, T: Transport> Registry<'a, T> {
    pub fn new(channels: &'a mut [Channel<T>]) -> Self {
        Registry { channels }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Channels paired with their 1-based interface numbers.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Channel<T>)> + '_ {
        self.channels.iter().enumerate().map(|(i, ch)| (i + 1, ch))
    }

    /// The channel at 1-based `interface`, if its kind matches `expected`.
    ///
    /// `InterfaceType::Any` matches every channel. Out-of-range numbers
    /// (including 0) find nothing.
    pub fn lookup(&mut self, interface: usize, expected: InterfaceType) -> Option<&mut Channel<T>> {
        let index = interface.checked_sub(1)?;
        let channel = self.channels.get_mut(index)?;
        if expected != InterfaceType::Any && channel.kind() != expected {
            trace!(
                "Interface {} is {}, not {}",
                interface,
                channel.kind(),
                expected
            );
            return None;
        }
        Some(channel)
    }

    /// The I2C master at `interface`, if there is one.
    pub fn lookup_i2c(&mut self, interface: usize) -> Option<&mut I2cChannel<T>> {
        match self.lookup(interface, InterfaceType::I2c)? {
            Channel::I2c(ch) => Some(ch),
            _ => None,
        }
    }

    /// Closes every channel, returning the first failure.
    pub fn close_all(&mut self) -> Result<()> {
        let mut first: Option<Error> = None;
        for channel in self.channels.iter_mut() {
            if let Err(e) = channel.close() {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockTransport;
    use crate::transport::{ChipType, Interface};

    fn channels() -> Vec<Channel<MockTransport>> {
        vec![
            Channel::Gpio(GpioChannel::new(MockTransport::new(
                ChipType::Ft4232H,
                Interface::A,
            ))),
            Channel::I2c(I2cChannel::new(MockTransport::new(
                ChipType::Ft4232H,
                Interface::B,
            ))),
        ]
    }

    #[test]
    fn test_lookup_bounds() {
        let mut chans = channels();
        let mut registry = Registry::new(&mut chans);
        assert!(registry.lookup(0, InterfaceType::Any).is_none());
        assert!(registry.lookup(3, InterfaceType::Any).is_none());
        assert!(registry.lookup(usize::MAX, InterfaceType::Any).is_none());
        assert!(registry.lookup(1, InterfaceType::Any).is_some());
        assert!(registry.lookup(2, InterfaceType::Any).is_some());
    }

    #[test]
    fn test_lookup_kind() {
        let mut chans = channels();
        let mut registry = Registry::new(&mut chans);
        assert!(registry.lookup(1, InterfaceType::Gpio).is_some());
        assert!(registry.lookup(1, InterfaceType::I2c).is_none());
        assert!(registry.lookup(2, InterfaceType::Uart).is_none());
        assert!(registry.lookup_i2c(2).is_some());
        assert!(registry.lookup_i2c(1).is_none());
    }

    #[test]
    fn test_iter_numbers_from_one() {
        let mut chans = channels();
        let registry = Registry::new(&mut chans);
        let kinds: Vec<(usize, InterfaceType)> =
            registry.iter().map(|(n, ch)| (n, ch.kind())).collect();
        assert_eq!(
            kinds,
            vec![(1, InterfaceType::Gpio), (2, InterfaceType::I2c)]
        );
    }
}
