//! Bridges a UART port to a pseudo-terminal.
//!
//! Clients open the slave side of the pty; a pump thread shuttles bytes
//! between the pty master and the port. All state sits behind one mutex
//! so the command server can still reach the port's GPIOs (on CBUS
//! devices) while the pump runs.

use crate::consts::uart;
use crate::error::{Error, Result};
use crate::gpio::{GpioPort, GpioState};
use crate::registry::InterfaceType;
use crate::transport::{BitMode, LineConfig, Transport};
use log::{debug, error, info, trace, warn};
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::pty::{grantpt, posix_openpt, ptsname_r, unlockpt, PtyMaster};
use nix::sys::termios::{cfmakeraw, tcgetattr, tcsetattr, SetArg};
use parking_lot::Mutex;
use std::fs;
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::fs::PermissionsExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Settings applied when a bridge is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UartConfig {
    pub line: LineConfig,
    /// Initial CBUS directions, only used on narrow devices.
    pub cbus_direction: u8,
    /// Initial CBUS levels, only used on narrow devices.
    pub cbus_value: u8,
}

impl Default for UartConfig {
    fn default() -> Self {
        UartConfig {
            line: LineConfig::default(),
            cbus_direction: 0,
            cbus_value: 0,
        }
    }
}

#[derive(Debug)]
struct BridgeInner<T: Transport> {
    port: GpioPort<T>,
    pty: Option<PtyMaster>,
    pty_path: Option<String>,
    line: Option<LineConfig>,
    poll_interval: Duration,
    buf: [u8; uart::BUF_SIZE],
}

/// A UART port exposed through a pty.
#[derive(Debug)]
pub struct UartBridge<T: Transport> {
    inner: Arc<Mutex<BridgeInner<T>>>,
    stop: Arc<AtomicBool>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> UartBridge<T> {
    pub fn new(transport: T) -> Self {
        let mask = if transport.chip().is_narrow_gpio() {
            transport.chip().default_gpio_mask()
        } else {
            uart::GPIO_MASK
        };
        UartBridge {
            inner: Arc::new(Mutex::new(BridgeInner {
                port: GpioPort::new(transport, InterfaceType::Uart, mask),
                pty: None,
                pty_path: None,
                line: None,
                poll_interval: Duration::from_micros(uart::POLL_INTERVAL_US),
                buf: [0; uart::BUF_SIZE],
            })),
            stop: Arc::new(AtomicBool::new(false)),
            pump: Mutex::new(None),
        }
    }

    /// Configures the port for serial use and allocates the pty.
    pub fn open(&self, config: &UartConfig) -> Result<()> {
        let mut inner = self.inner.lock();
        let chip = inner.port.transport.chip();
        if chip.is_narrow_gpio() {
            inner.port.state.direction = config.cbus_direction;
            inner.port.state.value = config.cbus_value;
            let cbus = inner.port.state.cbus_byte();
            inner.port.transport.set_bitmode(cbus, BitMode::Cbus)?;
        } else {
            inner.port.transport.set_bitmode(uart::TX_POS, BitMode::Reset)?;
        }
        inner.apply_line(&config.line)?;

        let (pty, path) = open_pty()?;
        info!(
            "UART on interface {} bridged to pty {}",
            inner.port.transport.interface(),
            path
        );
        inner.pty = Some(pty);
        inner.pty_path = Some(path);
        drop(inner);
        thread::sleep(Duration::from_micros(1));
        Ok(())
    }

    /// Applies the line settings that differ from the current ones.
    pub fn set_line(&self, line: &LineConfig) -> Result<()> {
        let result = self.inner.lock().apply_line(line);
        thread::sleep(Duration::from_micros(1));
        result
    }

    pub fn line(&self) -> Option<LineConfig> {
        self.inner.lock().line
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().pty.is_some()
    }

    /// Whether the pump thread is alive.
    pub fn is_running(&self) -> bool {
        self.pump
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Filesystem path of the pty slave clients should open.
    pub fn pty_path(&self) -> Option<String> {
        self.inner.lock().pty_path.clone()
    }

    pub fn mask(&self) -> u8 {
        self.inner.lock().port.mask()
    }

    /// Moves one chunk each way between the pty and the port.
    ///
    /// Pty-side trouble is logged and skipped; transport failures are
    /// returned.
    pub fn write_read(&self) -> Result<()> {
        let result = self.inner.lock().pump_step();
        thread::sleep(Duration::from_micros(1));
        result
    }

    /// Starts the pump thread.
    ///
    /// Does nothing while a pump is alive. A pump that exited on a transport
    /// error is reaped and replaced.
    pub fn run(&self, poll_interval: Duration) -> Result<()> {
        let mut pump = self.pump.lock();
        if pump.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Ok(());
        }
        if let Some(finished) = pump.take() {
            if finished.join().is_err() {
                warn!("UART pump thread panicked");
            }
        }
        {
            let mut inner = self.inner.lock();
            if inner.pty.is_none() {
                return Err(Error::NotOpen);
            }
            inner.poll_interval = poll_interval;
        }

        self.stop.store(false, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        let stop = Arc::clone(&self.stop);
        let handle = thread::Builder::new()
            .name("uart-pump".to_string())
            .spawn(move || {
                debug!("UART pump started");
                while !stop.load(Ordering::SeqCst) {
                    let result = inner.lock().pump_step();
                    match result {
                        Ok(()) => thread::sleep(Duration::from_micros(1)),
                        Err(Error::NotOpen) => break,
                        Err(e) => {
                            error!("UART pump stopped: {}", e);
                            break;
                        }
                    }
                }
                debug!("UART pump exited");
            })?;
        *pump = Some(handle);
        Ok(())
    }

    /// Signals the pump thread and waits for it to finish.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.pump.lock().take() {
            if handle.join().is_err() {
                warn!("UART pump thread panicked");
            }
        }
    }

    /// Optionally applies `new`, then optionally samples the pins.
    ///
    /// Only CBUS devices expose GPIOs on a UART port.
    pub fn gpio_write_read(&self, new: Option<&GpioState>, read: bool) -> Result<Option<u8>> {
        let result = self.inner.lock().port.write_read(new, read);
        thread::sleep(Duration::from_micros(1));
        result
    }

    /// Stops the pump, closes the pty and releases the port.
    pub fn close(&self) -> Result<()> {
        self.stop();
        let mut inner = self.inner.lock();
        inner.pty = None;
        inner.pty_path = None;
        inner.port.transport.close()
    }
}

impl<T: Transport> BridgeInner<T> {
    fn apply_line(&mut self, new: &LineConfig) -> Result<()> {
        let current = self.line;
        let framing_differs = current.map_or(true, |c| {
            c.bits != new.bits || c.parity != new.parity || c.stop_bits != new.stop_bits
        });
        if framing_differs {
            self.port.transport.set_line_property(new)?;
        }
        if current.map_or(true, |c| c.baudrate != new.baudrate) {
            self.port.transport.set_baudrate(new.baudrate)?;
        }
        debug!(
            "UART {} line set to {} baud, {:?}/{:?}/{:?}",
            self.port.transport.interface(),
            new.baudrate,
            new.bits,
            new.parity,
            new.stop_bits
        );
        self.line = Some(*new);
        Ok(())
    }

    fn pump_step(&mut self) -> Result<()> {
        let BridgeInner {
            port,
            pty,
            poll_interval,
            buf,
            ..
        } = self;
        let pty = pty.as_mut().ok_or(Error::NotOpen)?;

        match pty.read(&mut buf[..]) {
            Ok(0) => {}
            Ok(n) => {
                trace!("UART pty -> device {} bytes", n);
                let written = port.transport.write_data(&buf[..n])?;
                if written != n {
                    warn!("UART device accepted {} of {} bytes", written, n);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            // EIO until a client opens the slave side
            Err(e) => trace!("UART pty read: {}", e),
        }

        thread::sleep((*poll_interval).max(Duration::from_micros(1)));

        let n = port.transport.read_data(&mut buf[..])?;
        if n > 0 {
            trace!("UART device -> pty {} bytes", n);
            write_nonblocking(pty, &buf[..n]);
        }
        Ok(())
    }
}

fn write_nonblocking(pty: &mut PtyMaster, data: &[u8]) {
    let mut offset = 0;
    while offset < data.len() {
        match pty.write(&data[offset..]) {
            Ok(0) => break,
            Ok(n) => offset += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                debug!("UART pty full, dropped {} bytes", data.len() - offset);
                break;
            }
            Err(e) => {
                warn!("UART pty write: {}", e);
                break;
            }
        }
    }
}

/// Allocates a raw, non-blocking pty master and makes its slave world
/// accessible.
fn open_pty() -> Result<(PtyMaster, String)> {
    let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY)?;
    grantpt(&master)?;
    unlockpt(&master)?;
    fcntl(master.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;
    let path = ptsname_r(&master)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o666))?;

    let mut attrs = tcgetattr(&master)?;
    cfmakeraw(&mut attrs);
    tcsetattr(&master, SetArg::TCSANOW, &attrs)?;
    Ok((master, path))
}

impl<T: Transport> Drop for UartBridge<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
