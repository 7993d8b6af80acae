//! I2C master built from MPSSE command batches.
//!
//! Each transaction is assembled as a sequence of pin-drive and clocking
//! commands, flushed to the chip, and answered with ACK bits or data.
//! A NACK or a short answer restarts the whole transaction.

use crate::consts::{self, clock, i2c, mpsse};
use crate::error::{Error, Result};
use crate::gpio::{GpioPort, GpioState};
use crate::registry::InterfaceType;
use crate::transport::{configure_port, BitMode, Transport};
use log::{debug, error, trace, warn};

const SCL: u8 = i2c::SCL_POS;
const SDA: u8 = i2c::SDA_POS;

/// Growable batch of MPSSE commands awaiting a flush.
#[derive(Debug)]
pub(crate) struct CommandBuffer {
    buf: Vec<u8>,
}

impl CommandBuffer {
    fn new() -> Self {
        CommandBuffer {
            buf: Vec::with_capacity(i2c::CMD_BUF_SIZE),
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn clear(&mut self) {
        self.buf.clear();
    }

    fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

/// `TCK_DIVISOR` value yielding `rate` from a divisor `base`.
///
/// Clamps to 16 bits. Returns 0 when the rate exceeds the base, which the
/// caller treats as unreachable.
pub fn clock_divisor(base: u32, rate: u32) -> u16 {
    if rate == 0 || rate > base {
        return 0;
    }
    (base / rate - 1).min(0xFFFF) as u16
}

/// An I2C master on an MPSSE port.
///
/// The spare pins (GP0..GP4) of the port stay available to GPIO requests;
/// every pin-drive command carries the current GPIO levels along.
#[derive(Debug)]
pub struct I2cChannel<T: Transport> {
    port: GpioPort<T>,
    slave: u8,
    cmds: CommandBuffer,
    total_retries: u64,
    retry_max: u32,
}

impl<T: Transport> I2cChannel<T> {
    pub fn new(transport: T) -> Self {
        I2cChannel {
            port: GpioPort::new(transport, InterfaceType::I2c, i2c::GPIO_MASK),
            slave: 0,
            cmds: CommandBuffer::new(),
            total_retries: 0,
            retry_max: i2c::ACK_RETRY_MAX,
        }
    }

    /// Puts the port into MPSSE mode and programs the bus clock.
    pub fn open(&mut self, latency_ms: u8, clock_hz: u32) -> Result<()> {
        let transport = &mut self.port.transport;
        let chip = transport.chip();
        let interface = transport.interface();
        if !chip.is_mpsse(interface) {
            return Err(Error::NotMpsse(interface.letter()));
        }
        debug!("Opening I2C channel on {} interface {}", chip, interface);
        configure_port(transport, latency_ms, SCL | SDA, BitMode::Mpsse)?;
        self.set_clock(clock_hz)
    }

    /// Programs the bus clock.
    ///
    /// Always enables three-phase clocking. Frequencies outside the
    /// supported range, or ones that cannot be divided down to, are rejected
    /// without writing a divisor.
    pub fn set_clock(&mut self, hz: u32) -> Result<()> {
        self.write_exact(&[mpsse::EN_3_PHASE])?;
        if !(clock::MIN_HZ..=clock::MAX_HZ).contains(&hz) {
            return Err(Error::InvalidClock(hz));
        }
        // three-phase clocking stretches each bit to 1.5 periods
        let rate = ((hz as u64 * 3 + 1) / 2) as u32;
        let base = if self.port.transport.chip().is_high_speed() {
            if rate > clock::MAX_HZ_DIV5 {
                self.write_exact(&[mpsse::DIS_DIV_5])?;
                clock::BASE_HZ
            } else {
                self.write_exact(&[mpsse::EN_DIV_5])?;
                clock::BASE_DIV5_HZ
            }
        } else {
            clock::BASE_DIV5_HZ
        };
        let divisor = clock_divisor(base, rate);
        if divisor == 0 {
            return Err(Error::InvalidClock(hz));
        }
        debug!("I2C clock {} Hz: divisor 0x{:04x} (base {})", hz, divisor, base);
        let [lo, hi] = divisor.to_le_bytes();
        self.write_exact(&[mpsse::TCK_DIVISOR, lo, hi])
    }

    /// Sets the 7-bit address used by subsequent transactions.
    pub fn set_slave(&mut self, slave: u8) {
        self.slave = slave & 0x7F;
    }

    pub fn slave(&self) -> u8 {
        self.slave
    }

    /// Transactions restarted since the channel was created.
    pub fn total_retries(&self) -> u64 {
        self.total_retries
    }

    /// Caps the attempts per transaction, the first one included.
    pub fn set_retry_max(&mut self, retry_max: u32) {
        self.retry_max = retry_max;
    }

    pub fn port(&self) -> &GpioPort<T> {
        &self.port
    }

    pub fn gpio_write_read(&mut self, new: Option<&GpioState>, read: bool) -> Result<Option<u8>> {
        self.port.write_read(new, read)
    }

    /// Writes `wbuf` and then reads `rbuf.len()` bytes from the current slave.
    ///
    /// The write phase ends with a stop bit; the read phase begins with a
    /// fresh start bit. Either phase is skipped when its buffer is empty.
    /// A NACK or short read purges the chip and restarts the transaction
    /// until the attempt ceiling is reached.
    pub fn write_read(&mut self, wbuf: &[u8], rbuf: &mut [u8]) -> Result<()> {
        for len in [wbuf.len(), rbuf.len()] {
            if len > i2c::MAX_TRANSFER {
                return Err(Error::OperationTooLarge {
                    max: i2c::MAX_TRANSFER,
                    actual: len,
                });
            }
        }
        if wbuf.is_empty() && rbuf.is_empty() {
            return Ok(());
        }

        let mut retries = 0;
        let result = loop {
            if retries > 0 {
                self.cmds.clear();
                self.port.transport.purge_buffers()?;
            }
            match self.transaction(wbuf, rbuf) {
                Err(e) if e.is_retryable() && retries + 1 < self.retry_max => {
                    retries += 1;
                    debug!(
                        "I2C slave 0x{:02x}: {} (attempt {}/{})",
                        self.slave,
                        e,
                        retries + 1,
                        self.retry_max
                    );
                }
                other => break other,
            }
        };
        self.cmds.clear();
        self.total_retries += retries as u64;

        // the chip misbehaves on the next transaction unless this is purged
        if let Err(e) = self.port.transport.purge_tx_buffer() {
            warn!("Failed to purge TX buffer after I2C transaction: {}", e);
        }
        if let Err(e) = &result {
            error!("I2C slave 0x{:02x} failed write/read: {}", self.slave, e);
        }
        result
    }

    /// Clocks a bare start condition onto the bus.
    ///
    /// Used to recover a bus left mid-transaction; no slave is addressed.
    pub fn reset(&mut self) -> Result<()> {
        self.cmds.clear();
        self.start_bit();
        debug!("I2C bus reset");
        self.flush()
    }

    /// Releases the port.
    pub fn close(&mut self) -> Result<()> {
        self.port.transport.set_bitmode(0, BitMode::Reset)?;
        self.port.transport.close()
    }

    fn transaction(&mut self, wbuf: &[u8], rbuf: &mut [u8]) -> Result<()> {
        if !wbuf.is_empty() {
            self.start_bit();
            self.send_slave(false)?;
            for &byte in wbuf {
                self.send_byte(byte)?;
            }
            self.stop_bit();
            self.flush()?;
        }
        if !rbuf.is_empty() {
            self.start_bit();
            self.send_slave(true)?;
            self.read_bytes(rbuf)?;
        }
        Ok(())
    }

    fn cfg_io(&mut self, value: u8, direction: u8) {
        let gpio = self.port.state;
        self.cmds.push(&[
            mpsse::SET_BITS_LOW,
            value | gpio.value,
            direction | gpio.direction,
        ]);
    }

    // SDA falls while SCL is high
    fn start_bit(&mut self) {
        debug_assert!(self.cmds.is_empty(), "start bit must begin a batch");
        for _ in 0..4 {
            self.cfg_io(0, 0);
        }
        for _ in 0..4 {
            self.cfg_io(0, SDA);
        }
        self.cfg_io(0, SCL | SDA);
    }

    // SDA rises while SCL is high
    fn stop_bit(&mut self) {
        for _ in 0..4 {
            self.cfg_io(0, SDA);
        }
        for _ in 0..4 {
            self.cfg_io(0, 0);
        }
        self.cfg_io(0, 0);
    }

    fn send_slave(&mut self, read: bool) -> Result<()> {
        self.send_byte((self.slave << 1) | read as u8)
    }

    /// Clocks out one byte and samples the ACK bit.
    fn send_byte(&mut self, byte: u8) -> Result<()> {
        self.cmds.push(&[mpsse::MFE_CLK_BIT_OUT, 0x07, byte]);
        // release SDA for the slave to drive
        self.cfg_io(0, SCL);
        self.cmds
            .push(&[mpsse::LRE_CLK_BIT_IN, 0x00, mpsse::SEND_IMMEDIATE]);
        self.flush()?;

        let mut ack = [0u8; 1];
        self.read_response(&mut ack)?;
        if ack[0] & 0x80 != 0 {
            trace!("I2C slave 0x{:02x} NACKed byte 0x{:02x}", self.slave, byte);
            return Err(Error::I2cNack { slave: self.slave });
        }
        // hold SCL low with SDA high until the next command
        self.cfg_io(SDA, SCL | SDA);
        Ok(())
    }

    fn read_bytes(&mut self, rbuf: &mut [u8]) -> Result<()> {
        let last = rbuf.len() - 1;
        for i in 0..rbuf.len() {
            self.cfg_io(0, SCL);
            self.cmds.push(&[mpsse::MRE_CLK_BYTE_IN, 0x00, 0x00]);
            if i == last {
                self.cfg_io(0, SCL);
                self.cmds.push(&[mpsse::MFE_CLK_BIT_OUT, 0x00, 0xFF]);
            } else {
                self.cfg_io(0, SCL | SDA);
                self.cmds.push(&[mpsse::MFE_CLK_BIT_OUT, 0x00, 0x00]);
            }
        }
        self.cmds.push(&[mpsse::SEND_IMMEDIATE]);
        self.flush()?;
        self.read_response(rbuf)
    }

    fn flush(&mut self) -> Result<()> {
        if self.cmds.is_empty() {
            return Ok(());
        }
        let expected = self.cmds.as_slice().len();
        trace!("I2C flush {} bytes: {:02x?}", expected, self.cmds.as_slice());
        let written = self.port.transport.write_data(self.cmds.as_slice())?;
        self.cmds.clear();
        if written != expected {
            return Err(Error::ShortWrite {
                expected,
                actual: written,
            });
        }
        Ok(())
    }

    fn write_exact(&mut self, bytes: &[u8]) -> Result<()> {
        let written = self.port.transport.write_data(bytes)?;
        if written != bytes.len() {
            return Err(Error::ShortWrite {
                expected: bytes.len(),
                actual: written,
            });
        }
        Ok(())
    }

    fn read_response(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut got = 0;
        for _ in 0..i2c::READ_ATTEMPTS {
            if got == buf.len() {
                break;
            }
            got += self.port.transport.read_data(&mut buf[got..])?;
        }
        if got != buf.len() {
            return Err(Error::I2cShortRead {
                expected: buf.len(),
                actual: got,
            });
        }
        Ok(())
    }
}

/// USB read timeout applied to I2C ports.
pub fn read_timeout() -> std::time::Duration {
    std::time::Duration::from_millis(consts::i2c::READ_TIMEOUT_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_divisor() {
        // 100 kHz with three-phase clocking: 150 kHz from a 6 MHz base
        assert_eq!(clock_divisor(6_000_000, 150_000), 39);
        assert_eq!(clock_divisor(6_000_000, 6_000_000), 0);
        assert_eq!(clock_divisor(6_000_000, 9_000_000), 0);
        assert_eq!(clock_divisor(30_000_000, 150), 0xFFFF);
        assert_eq!(clock_divisor(6_000_000, 0), 0);
    }

    #[test]
    fn test_command_buffer() {
        let mut cmds = CommandBuffer::new();
        assert!(cmds.is_empty());
        cmds.push(&[1, 2, 3]);
        cmds.push(&[4]);
        assert_eq!(cmds.as_slice(), &[1, 2, 3, 4]);
        cmds.clear();
        assert!(cmds.is_empty());
    }
}
