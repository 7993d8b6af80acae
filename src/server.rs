//! Single-threaded TCP command server.
//!
//! One `poll(2)` loop watches the listening socket and every client.
//! Requests are handled to completion, in readiness order, before the next
//! wait, so channels never see concurrent commands from the server.

use crate::consts::server::MAX_LINE;
use crate::error::{Error, Result};
use crate::gpio::GpioState;
use crate::protocol::{self, Request, Response};
use crate::registry::{InterfaceType, Registry};
use crate::transport::Transport;
use log::{debug, info, trace, warn};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::AsFd;
use std::time::Duration;

/// Where requests are routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Interface serving `i,` requests.
    pub i2c_interface: usize,
    /// Interface served in legacy mode; `None` speaks the full protocol.
    pub legacy_interface: Option<usize>,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        DispatchSettings {
            i2c_interface: 2,
            legacy_interface: None,
        }
    }
}

/// Routes decoded requests to the registered channels.
pub struct Dispatcher<'a, T: Transport> {
    registry: Registry<'a, T>,
    settings: DispatchSettings,
}

impl<'a, T: Transport> Dispatcher<'a, T> {
    pub fn new(registry: Registry<'a, T>, settings: DispatchSettings) -> Self {
        Dispatcher { registry, settings }
    }

    pub fn registry(&mut self) -> &mut Registry<'a, T> {
        &mut self.registry
    }

    /// Handles one request line, returning the reply to send.
    pub fn handle_line(&mut self, line: &str) -> Response {
        let legacy = self.settings.legacy_interface.is_some();
        match protocol::parse_request(line, legacy) {
            Ok(request) => self.dispatch(request),
            Err(e) => {
                debug!("Bad request {:?}: {}", line, e);
                protocol::parse_error_reply(&e, legacy)
            }
        }
    }

    pub fn dispatch(&mut self, request: Request) -> Response {
        match request {
            Request::Gpio { interface, state } => {
                self.gpio(interface, InterfaceType::Any, Some(state))
            }
            Request::Legacy { direction, value } => {
                let interface = self.settings.legacy_interface.unwrap_or(1);
                // legacy requests always cover the channel's whole mask
                let Some(mask) = self
                    .registry
                    .lookup(interface, InterfaceType::Gpio)
                    .map(|ch| ch.gpio_mask())
                else {
                    return Response::Error(format!("No gpio at interface {}", interface));
                };
                let state = GpioState::new(direction, value, mask);
                self.gpio(interface, InterfaceType::Gpio, Some(state))
            }
            Request::I2c {
                slave,
                write,
                read_count,
            } => self.i2c(slave, &write, read_count),
        }
    }

    fn gpio(
        &mut self,
        interface: usize,
        expected: InterfaceType,
        state: Option<GpioState>,
    ) -> Response {
        let Some(channel) = self.registry.lookup(interface, expected) else {
            return Response::Error(format!("No gpio at interface {}", interface));
        };
        match channel.gpio_write_read(state.as_ref(), true) {
            Ok(value) => Response::Gpio(value.unwrap_or(0)),
            Err(Error::GpioMask { allowed, .. }) => Response::Error(format!(
                "Illegal gpio mask.  Bits avail are 0x{:02x}",
                allowed
            )),
            Err(e) => {
                warn!("GPIO request on interface {} failed: {}", interface, e);
                Response::Error("writing/reading gpio".to_string())
            }
        }
    }

    fn i2c(&mut self, slave: u8, write: &[u8], read_count: usize) -> Response {
        let interface = self.settings.i2c_interface;
        let Some(channel) = self.registry.lookup_i2c(interface) else {
            return Response::Error(format!("No i2c at interface {}", interface));
        };
        channel.set_slave(slave);
        let mut rbuf = vec![0u8; read_count];
        match channel.write_read(write, &mut rbuf) {
            Ok(()) => Response::I2c(rbuf),
            Err(e) => {
                debug!("I2C request to 0x{:02x} failed: {}", slave, e);
                Response::Error("writing/reading i2c".to_string())
            }
        }
    }
}

/// Outcome of servicing a readable client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClientState {
    Open,
    Closed,
}

#[derive(Debug)]
struct Client {
    stream: TcpStream,
    peer: SocketAddr,
    pending: Vec<u8>,
    /// Set after an overlong request; input is dropped up to its newline.
    discarding: bool,
}

impl Client {
    fn service<T: Transport>(&mut self, dispatcher: &mut Dispatcher<'_, T>) -> ClientState {
        let mut buf = [0u8; MAX_LINE];
        let n = match self.stream.read(&mut buf) {
            Ok(0) => {
                info!("Client {} hung up", self.peer);
                return ClientState::Closed;
            }
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                return ClientState::Open
            }
            Err(e) => {
                warn!("Reading from client {}: {}", self.peer, e);
                return ClientState::Closed;
            }
        };
        self.pending.extend_from_slice(&buf[..n]);

        if self.discarding {
            match self.pending.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    self.pending.drain(..=pos);
                    self.discarding = false;
                }
                None => {
                    self.pending.clear();
                    return ClientState::Open;
                }
            }
        }
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            trace!("Client {} request {:?}", self.peer, line);
            let reply = dispatcher.handle_line(&line);
            if let Err(e) = self.stream.write_all(reply.to_string().as_bytes()) {
                warn!("Writing to client {}: {}", self.peer, e);
                return ClientState::Closed;
            }
        }
        if self.pending.len() >= MAX_LINE {
            debug!("Client {} request overflow, dropping the line", self.peer);
            self.pending.clear();
            self.discarding = true;
            let reply = Response::Error(format!("request longer than {} bytes", MAX_LINE));
            if self.stream.write_all(reply.to_string().as_bytes()).is_err() {
                return ClientState::Closed;
            }
        }
        ClientState::Open
    }
}

/// The command server: a listener, its clients and the dispatcher.
pub struct CommandServer<'a, T: Transport> {
    listener: TcpListener,
    clients: Vec<Client>,
    dispatcher: Dispatcher<'a, T>,
}

impl<'a, T: Transport> CommandServer<'a, T> {
    /// Binds the listening socket. The address may be reused right away.
    pub fn bind(addr: SocketAddr, dispatcher: Dispatcher<'a, T>) -> Result<Self> {
        let listener = TcpListener::bind(addr)?;
        info!("Listening for clients on {}", listener.local_addr()?);
        Ok(CommandServer {
            listener,
            clients: Vec::new(),
            dispatcher,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn dispatcher(&mut self) -> &mut Dispatcher<'a, T> {
        &mut self.dispatcher
    }

    /// Serves clients forever.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.poll_once(None)?;
        }
    }

    /// Waits for readiness once and services everything that became ready.
    ///
    /// Returns the number of ready descriptors; an interrupted wait counts
    /// as zero.
    pub fn poll_once(&mut self, timeout: Option<Duration>) -> Result<usize> {
        let timeout = match timeout {
            None => PollTimeout::NONE,
            Some(t) => PollTimeout::from(u16::try_from(t.as_millis()).unwrap_or(u16::MAX)),
        };
        let ready: Vec<bool> = {
            let mut fds = Vec::with_capacity(self.clients.len() + 1);
            fds.push(PollFd::new(self.listener.as_fd(), PollFlags::POLLIN));
            for client in &self.clients {
                fds.push(PollFd::new(client.stream.as_fd(), PollFlags::POLLIN));
            }
            match poll(&mut fds, timeout) {
                Ok(_) => {}
                Err(Errno::EINTR) => return Ok(0),
                Err(e) => return Err(e.into()),
            }
            let wanted = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
            fds.iter()
                .map(|fd| fd.revents().is_some_and(|r| r.intersects(wanted)))
                .collect()
        };

        let mut count = 0;
        let mut states = vec![ClientState::Open; self.clients.len()];
        for (i, client) in self.clients.iter_mut().enumerate() {
            if ready[i + 1] {
                count += 1;
                states[i] = client.service(&mut self.dispatcher);
            }
        }
        let mut states = states.into_iter();
        self.clients
            .retain(|_| states.next() != Some(ClientState::Closed));

        if ready[0] {
            count += 1;
            self.accept();
        }
        Ok(count)
    }

    fn accept(&mut self) {
        match self.listener.accept() {
            Ok((stream, peer)) => {
                info!("Accepted client {}", peer);
                self.clients.push(Client {
                    stream,
                    peer,
                    pending: Vec::new(),
                    discarding: false,
                });
            }
            Err(e) => warn!("Accepting client: {}", e),
        }
    }
}
