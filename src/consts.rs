//! Internal constants, USB requests, MPSSE opcodes and pin assignments.

// Default Vendor/Product IDs
/// FTDI vendor ID.
pub const FTDI_VID: u16 = 0x0403;
/// Product ID of the FT4232H quad-port bridge (the servo board default).
pub const FT4232H_PID: u16 = 0x6011;
/// Product ID shared by FT2232C/D/H dual-port bridges.
pub const FT2232_PID: u16 = 0x6010;
/// Product ID of the FT232R single-port bridge (CBUS GPIOs).
pub const FT232R_PID: u16 = 0x6001;

/// Latency timer programmed into every configured port, in milliseconds.
pub const USB_LATENCY_TIMER_MS: u8 = 16;

// --- SIO vendor requests (Control Transfer) ---
pub mod sio {
    pub const RESET_REQUEST: u8 = 0x00;
    pub const SET_BAUDRATE_REQUEST: u8 = 0x03;
    pub const SET_DATA_REQUEST: u8 = 0x04;
    pub const SET_LATENCY_TIMER_REQUEST: u8 = 0x09;
    pub const GET_LATENCY_TIMER_REQUEST: u8 = 0x0A;
    pub const SET_BITMODE_REQUEST: u8 = 0x0B;
    pub const READ_PINS_REQUEST: u8 = 0x0C;

    // Values for RESET_REQUEST
    pub const RESET_SIO: u16 = 0;
    pub const RESET_PURGE_RX: u16 = 1;
    pub const RESET_PURGE_TX: u16 = 2;
}

// --- MPSSE command opcodes ---
pub mod mpsse {
    // M(F|R)E == MSB Falling|Rising Edge, L(F|R)E == LSB Falling|Rising Edge
    pub const MFE_CLK_BIT_OUT: u8 = 0x13;
    pub const MRE_CLK_BYTE_IN: u8 = 0x20;
    pub const LRE_CLK_BIT_IN: u8 = 0x2A;

    /// Drive the low byte: followed by value and direction bytes.
    pub const SET_BITS_LOW: u8 = 0x80;
    /// Clock divisor: followed by the 16-bit divisor, little-endian.
    pub const TCK_DIVISOR: u8 = 0x86;
    /// Flush the chip's receive queue back to the host immediately.
    pub const SEND_IMMEDIATE: u8 = 0x87;
    /// Disable the divide-by-5 prescaler (60 MHz master clock).
    pub const DIS_DIV_5: u8 = 0x8A;
    /// Enable the divide-by-5 prescaler (12 MHz master clock).
    pub const EN_DIV_5: u8 = 0x8B;
    /// Three-phase data clocking, required for I2C.
    pub const EN_3_PHASE: u8 = 0x8C;
}

// --- MPSSE clock limits ---
pub mod clock {
    /// Maximum bus clock for high speed (H series) devices.
    pub const MAX_HZ: u32 = 30_000_000;
    /// Maximum bus clock with the divide-by-5 prescaler engaged.
    pub const MAX_HZ_DIV5: u32 = 6_000_000;
    /// Minimum bus clock for any device.
    pub const MIN_HZ: u32 = 100;
    /// Divisor base with the prescaler engaged (12 MHz / 2).
    pub const BASE_DIV5_HZ: u32 = 6_000_000;
    /// Divisor base with the prescaler disabled (60 MHz / 2).
    pub const BASE_HZ: u32 = 30_000_000;
}

// --- I2C related constants ---
pub mod i2c {
    // bit positions of the bus signals in the low byte
    pub const SCL_POS: u8 = 0x01;
    pub const SDA_POS: u8 = 0x02;
    // 0x04 has to be tied to SDA for I/O capabilities
    pub const SDB_POS: u8 = 0x04;

    pub const GP0_POS: u8 = 0x08;
    pub const GP1_POS: u8 = 0x10;
    pub const GP2_POS: u8 = 0x20;
    pub const GP3_POS: u8 = 0x40;
    pub const GP4_POS: u8 = 0x80;

    /// Pins left to the GPIO layer once the bus claims SCL/SDA/SDB.
    pub const GPIO_MASK: u8 = !(SCL_POS | SDA_POS | SDB_POS);

    /// Initial size of the command batch buffer.
    pub const CMD_BUF_SIZE: usize = 1 << 8;
    /// Largest read or write payload accepted per transaction.
    pub const MAX_TRANSFER: usize = 128;
    /// Attempts at a whole transaction, the first included, before an ACK or
    /// short-read failure is reported.
    pub const ACK_RETRY_MAX: u32 = 3;
    /// Bulk reads issued while collecting one response.
    pub const READ_ATTEMPTS: u32 = 8;
    /// Bus clock programmed at startup.
    pub const DEFAULT_CLOCK_HZ: u32 = 100_000;
    /// USB read timeout for I2C ports, in milliseconds.
    pub const READ_TIMEOUT_MS: u64 = 10_000;
}

// --- UART related constants ---
pub mod uart {
    pub const TX_POS: u8 = 0x01;
    pub const RX_POS: u8 = 0x02;
    // TODO: expose CTS/RTS/DTR/DSR once out-of-band signals are plumbed through
    pub const GPIO_MASK: u8 = !(TX_POS | RX_POS);

    /// Bytes shuttled per pump step in each direction.
    pub const BUF_SIZE: usize = 128;
    /// Default pause between the two halves of a pump step, in microseconds.
    pub const POLL_INTERVAL_US: u64 = 5_000;
    pub const DEFAULT_BAUDRATE: u32 = 115_200;
}

// --- GPIO related constants ---
pub mod gpio {
    /// All eight pins of a wide bit-bang port.
    pub const WIDE_MASK: u8 = 0xFF;
    /// The four CBUS pins of a narrow (FT232R) device.
    pub const NARROW_MASK: u8 = 0x0F;
}

// --- Command server ---
pub mod server {
    pub const DEFAULT_PORT: u16 = 9999;
    /// Longest request line accepted from a client.
    pub const MAX_LINE: usize = 512;
    /// Read bytes printed per `I:` line in I2C replies.
    pub const BYTES_PER_REPLY_LINE: usize = 4;
}
