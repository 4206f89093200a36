//! Byte transports and marker-driven reads over them.

use ioc_core::Placement;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::backoff::{retry_with_backoff, Backoff};
use crate::error::ProcServError;

/// Ordered, reliable byte stream to a procServ-like peer.
pub trait Transport: Read + Write + Send + Sized {
    fn connect(addr: SocketAddr, timeout: Duration) -> io::Result<Self>;

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;

    /// Release the connection. Must be safe to call more than once.
    fn terminate(&mut self);
}

impl Transport for TcpStream {
    fn connect(addr: SocketAddr, timeout: Duration) -> io::Result<Self> {
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        TcpStream::set_read_timeout(self, timeout)
    }

    fn terminate(&mut self) {
        let _ = self.shutdown(Shutdown::Both);
    }
}

const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);
const CHUNK: usize = 1024;

pub fn resolve(endpoint: &Placement) -> Result<Vec<SocketAddr>, ProcServError> {
    let resolved = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .map(|addrs| addrs.collect::<Vec<_>>());
    match resolved {
        Ok(addrs) if !addrs.is_empty() => Ok(addrs),
        Ok(_) => Err(ProcServError::Resolve {
            endpoint: endpoint.clone(),
            source: io::Error::new(ErrorKind::NotFound, "no addresses"),
        }),
        Err(source) => Err(ProcServError::Resolve {
            endpoint: endpoint.clone(),
            source,
        }),
    }
}

/// One pass over every resolved address.
pub fn connect_once<T: Transport>(addrs: &[SocketAddr], timeout: Duration) -> io::Result<T> {
    let mut last = io::Error::new(ErrorKind::NotFound, "no addresses");
    for addr in addrs {
        match T::connect(*addr, timeout) {
            Ok(transport) => return Ok(transport),
            Err(err) => last = err,
        }
    }
    Err(last)
}

/// Connect, retrying with backoff until `timeout`.
pub fn connect_with_retry<T: Transport>(
    endpoint: &Placement,
    timeout: Duration,
    backoff: Backoff,
) -> Result<T, ProcServError> {
    let addrs = resolve(endpoint)?;
    let attempt_timeout = timeout.clamp(MIN_READ_TIMEOUT, Duration::from_secs(1));
    retry_with_backoff(timeout, backoff, || connect_once::<T>(&addrs, attempt_timeout)).map_err(
        |exhausted| ProcServError::Connect {
            endpoint: endpoint.clone(),
            attempts: exhausted.attempts,
            source: exhausted.last,
        },
    )
}

/// Whether anything currently accepts connections at `endpoint`.
pub fn accepts_connections<T: Transport>(addrs: &[SocketAddr], timeout: Duration) -> bool {
    match connect_once::<T>(addrs, timeout) {
        Ok(mut probe) => {
            probe.terminate();
            true
        }
        Err(_) => false,
    }
}

pub(crate) enum Wait {
    Found(String),
    TimedOut,
    Closed,
}

/// A transport plus the text received but not yet consumed.
pub(crate) struct Wire<T: Transport> {
    transport: T,
    pending: String,
    terminated: bool,
}

impl<T: Transport> Wire<T> {
    pub(crate) fn new(transport: T) -> Self {
        Self {
            transport,
            pending: String::new(),
            terminated: false,
        }
    }

    pub(crate) fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        debug!(bytes = ?bytes, "send");
        self.transport.write_all(bytes)?;
        self.transport.flush()
    }

    /// Read until one of `markers` shows up, returning everything up to and
    /// including it. With no markers, only the peer closing ends the wait.
    pub(crate) fn read_until(&mut self, markers: &[&str], timeout: Duration) -> io::Result<Wait> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; CHUNK];
        loop {
            let hit = markers
                .iter()
                .filter_map(|marker| self.pending.find(marker).map(|at| at + marker.len()))
                .min();
            if let Some(end) = hit {
                return Ok(Wait::Found(self.pending.drain(..end).collect()));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Wait::TimedOut);
            }
            self.transport
                .set_read_timeout(Some((deadline - now).max(MIN_READ_TIMEOUT)))?;

            match self.transport.read(&mut chunk) {
                Ok(0) => return Ok(Wait::Closed),
                Ok(read) => {
                    let text = String::from_utf8_lossy(&chunk[..read]);
                    debug!(text = %text.escape_debug(), "recv");
                    self.pending.push_str(&text);
                }
                Err(err)
                    if matches!(
                        err.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) => {}
                Err(err) if err.kind() == ErrorKind::ConnectionReset => return Ok(Wait::Closed),
                Err(err) => return Err(err),
            }
        }
    }

    pub(crate) fn terminate(&mut self) {
        if !self.terminated {
            self.transport.terminate();
            self.terminated = true;
        }
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl<T: Transport> Drop for Wire<T> {
    fn drop(&mut self) {
        self.terminate();
    }
}
