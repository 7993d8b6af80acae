use thiserror::Error;

/// Errors that can occur when driving FTDI channels.
///
/// This enum covers USB transport failures, I2C bus conditions, GPIO mask
/// violations, pty setup problems, and malformed client requests.
#[derive(Error, Debug)]
pub enum Error {
    /// Error from the underlying libusb layer.
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
    /// General I/O error (sockets, pty reads/writes, config files).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Error from a POSIX call (pty allocation, termios, poll).
    #[error("System call failed: {0}")]
    Nix(#[from] nix::Error),
    /// No FTDI device was found with the specified vendor/product ID.
    #[error("Device not found with VID 0x{vid:04x} PID 0x{pid:04x}")]
    DeviceNotFound {
        /// The vendor ID that was searched for.
        vid: u16,
        /// The product ID that was searched for.
        pid: u16,
    },
    /// The requested port does not exist on this chip.
    #[error("Interface {interface} not available on {chip}")]
    UnsupportedInterface {
        /// The requested interface letter.
        interface: char,
        /// The detected chip model.
        chip: String,
    },
    /// The port has no MPSSE engine, so it cannot run the I2C master.
    #[error("Interface {0} has no MPSSE engine")]
    NotMpsse(char),
    /// The chip accepted fewer bytes than were submitted.
    #[error("Short write to device (expected {expected}, wrote {actual})")]
    ShortWrite {
        /// Bytes submitted.
        expected: usize,
        /// Bytes accepted.
        actual: usize,
    },
    /// I2C slave device responded with NACK (not acknowledged).
    #[error("I2C slave 0x{slave:02x} did not acknowledge (NACK)")]
    I2cNack {
        /// The 7-bit slave address that sent the NACK.
        slave: u8,
    },
    /// Fewer response bytes arrived than the MPSSE program asked for.
    #[error("Short I2C read (expected {expected} bytes, got {actual})")]
    I2cShortRead {
        /// Bytes requested.
        expected: usize,
        /// Bytes received before giving up.
        actual: usize,
    },
    /// Requested bus clock is out of range or yields a zero divisor.
    #[error("Invalid I2C clock {0} Hz")]
    InvalidClock(u32),
    /// Requested operation exceeds device or protocol limits.
    #[error("Requested operation size is too large (max {max}, got {actual})")]
    OperationTooLarge {
        /// Maximum allowed size for this operation.
        max: usize,
        /// Actual size requested.
        actual: usize,
    },
    /// A GPIO request touched pins outside the channel's available mask.
    #[error("Illegal GPIO mask 0x{requested:02x} (bits available are 0x{allowed:02x})")]
    GpioMask {
        /// The mask supplied by the caller.
        requested: u8,
        /// The pins the channel exposes.
        allowed: u8,
    },
    /// Feature is not supported by this chip or channel.
    #[error("Feature not supported: {0}")]
    UnsupportedFeature(String),
    /// The channel has not been opened, or has already been closed.
    #[error("Channel is not open")]
    NotOpen,
    /// A client request could not be parsed.
    #[error("Protocol error: {0}")]
    Protocol(String),
    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether an I2C transaction failing with this error should be
    /// restarted from the beginning.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::I2cNack { .. } | Error::I2cShortRead { .. })
    }
}

/// Result type alias for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

pub(crate) fn unsupported_uart_gpio() -> Error {
    Error::UnsupportedFeature(
        "GPIO on UART interfaces is only available on CBUS (FT232R) devices".to_string(),
    )
}
