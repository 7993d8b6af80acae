//! Parsing and formatting of the line-based control protocol.
//!
//! Requests are comma separated: `g,<iface>,<dir>,<val>[,<mask>]` drives
//! GPIOs and `i,<slave>,[<wcnt>,<w0>,...,]<rcnt>` runs an I2C transaction.
//! Legacy clients send a bare `<dir>,<val>`. Numbers may be decimal, hex
//! (`0x`) or octal (leading `0`). Replies use `I:` for data, `A:` to
//! acknowledge and `E:` for errors.

use crate::consts::server;
use crate::error::{Error, Result};
use crate::gpio::GpioState;
use std::fmt::{self, Write};

/// A decoded client request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Gpio {
        interface: usize,
        state: GpioState,
    },
    I2c {
        slave: u8,
        write: Vec<u8>,
        read_count: usize,
    },
    /// Legacy request; the mask comes from the targeted channel.
    Legacy {
        direction: u8,
        value: u8,
    },
}

/// A reply to send back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Pin levels read back after a GPIO request.
    Gpio(u8),
    /// Bytes read by an I2C transaction (possibly none).
    I2c(Vec<u8>),
    Error(String),
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Gpio(value) => write!(f, "I:0x{:02x}\nA:\n", value),
            Response::I2c(bytes) if bytes.is_empty() => f.write_str("A:\n"),
            Response::I2c(bytes) => {
                f.write_str("I:0x")?;
                for (i, b) in bytes.iter().enumerate() {
                    if i > 0 && i % server::BYTES_PER_REPLY_LINE == 0 {
                        f.write_str("\nI:0x")?;
                    }
                    write!(f, "{:02x}", b)?;
                }
                f.write_str("\nA:\n")
            }
            Response::Error(msg) => {
                f.write_str("E:")?;
                f.write_str(msg)?;
                if !msg.ends_with('\n') {
                    f.write_char('\n')?;
                }
                Ok(())
            }
        }
    }
}

pub const GPIO_USAGE: &str = "g,<interface>,<dir>,<val>[,<mask>]";
pub const I2C_USAGE: &str = "i,<slv>,[<wcnt>,<w0>,...,<wN>,]<rcnt>";
pub const LEGACY_USAGE: &str = "<dir>,<val>";

/// Parses an unsigned number the way `strtoul` does with base 0.
pub fn parse_number(field: &str) -> Option<u32> {
    let field = field.trim();
    let (digits, radix) = if let Some(hex) = field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
    {
        (hex, 16)
    } else if field.len() > 1 && field.starts_with('0') {
        (&field[1..], 8)
    } else {
        (field, 10)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    u32::from_str_radix(digits, radix).ok()
}

fn parse_byte(field: &str, what: &str) -> Result<u8> {
    let value = parse_number(field)
        .ok_or_else(|| Error::Protocol(format!("invalid {} '{}'", what, field.trim())))?;
    u8::try_from(value)
        .map_err(|_| Error::Protocol(format!("{} 0x{:x} exceeds 0xff", what, value)))
}

/// Decodes one request line (without its terminator).
pub fn parse_request(line: &str, legacy: bool) -> Result<Request> {
    let line = line.trim_end_matches(['\r', '\n']);
    if legacy {
        return parse_legacy(line);
    }
    let mut fields = line.split(',');
    match fields.next().map(str::trim) {
        Some("g") => parse_gpio(fields),
        Some("i") => parse_i2c(fields),
        _ => Err(Error::Protocol(format!(
            "unknown request, expected {} or {}",
            GPIO_USAGE, I2C_USAGE
        ))),
    }
}

fn parse_gpio<'a>(fields: impl Iterator<Item = &'a str>) -> Result<Request> {
    let fields: Vec<&str> = fields.collect();
    if !(3..=4).contains(&fields.len()) {
        return Err(Error::Protocol(format!("expected {}", GPIO_USAGE)));
    }
    let interface = parse_byte(fields[0], "interface")?;
    if interface == 0 {
        return Err(Error::Protocol("interface must be non-zero".to_string()));
    }
    let direction = parse_byte(fields[1], "direction")?;
    let value = parse_byte(fields[2], "value")?;
    let mask = match fields.get(3) {
        Some(field) => parse_byte(field, "mask")?,
        None => 0xFF,
    };
    Ok(Request::Gpio {
        interface: interface as usize,
        state: GpioState::new(direction, value, mask),
    })
}

fn parse_i2c<'a>(fields: impl Iterator<Item = &'a str>) -> Result<Request> {
    let args = fields
        .map(|f| parse_byte(f, "i2c argument"))
        .collect::<Result<Vec<u8>>>()?;
    if args.len() < 2 {
        return Err(Error::Protocol(format!("expected {}", I2C_USAGE)));
    }
    let slave = args[0];
    if slave > 0x7F {
        return Err(Error::Protocol(format!("slave 0x{:02x} is not 7-bit", slave)));
    }
    if args.len() == 2 {
        return Ok(Request::I2c {
            slave,
            write: Vec::new(),
            read_count: args[1] as usize,
        });
    }
    let wcnt = args[1] as usize;
    let read_count = match args.len().checked_sub(wcnt + 2) {
        // write only
        Some(0) => 0,
        Some(1) => args[args.len() - 1] as usize,
        _ => {
            return Err(Error::Protocol(format!(
                "write count {} does not match {} bytes supplied, expected {}",
                wcnt,
                args.len() - 2,
                I2C_USAGE
            )))
        }
    };
    Ok(Request::I2c {
        slave,
        write: args[2..2 + wcnt].to_vec(),
        read_count,
    })
}

fn parse_legacy(line: &str) -> Result<Request> {
    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() != 2 {
        return Err(Error::Protocol(format!("expected {}", LEGACY_USAGE)));
    }
    Ok(Request::Legacy {
        direction: parse_byte(fields[0], "direction")?,
        value: parse_byte(fields[1], "value")?,
    })
}

/// Reply sent when a request line cannot be decoded.
pub fn parse_error_reply(err: &Error, legacy: bool) -> Response {
    let usage = if legacy {
        LEGACY_USAGE.to_string()
    } else {
        format!("{}\n\t{}", GPIO_USAGE, I2C_USAGE)
    };
    let detail = match err {
        Error::Protocol(msg) => msg.clone(),
        other => other.to_string(),
    };
    Response::Error(format!(
        "parsing client request ({}).  Should be\n\t{}",
        detail, usage
    ))
}
