//! TCP stream layer
//!
//! Listener polled in non-blocking mode so `close()` from another thread
//! ends a pending `accept()`.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use super::{advertised, is_timeout, resolve, resolve_advertise, Conn, StreamLayer};
use crate::error::{ReplikvError, Result};

/// How often a blocked `accept()` rechecks for shutdown
const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);

pub struct TcpStreamLayer {
    listener: TcpListener,
    advertise: SocketAddr,
    closed: AtomicBool,
}

impl TcpStreamLayer {
    /// Listen on `bind_addr`, advertising `advertise_addr` if given
    pub fn bind(bind_addr: &str, advertise_addr: Option<&str>) -> Result<Self> {
        let bind = resolve(bind_addr)?;
        let explicit = advertise_addr
            .map(|a| resolve_advertise(a, bind))
            .transpose()?;

        let listener = TcpListener::bind(bind)?;
        listener.set_nonblocking(true)?;
        let advertise = advertised(explicit, listener.local_addr()?)?;

        Ok(Self {
            listener,
            advertise,
            closed: AtomicBool::new(false),
        })
    }

    /// Address the listener actually bound to
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Connect to `address` within `timeout`
pub fn dial(address: &str, timeout: Duration) -> Result<Box<dyn Conn>> {
    let target = resolve(address)?;
    let stream = TcpStream::connect_timeout(&target, timeout)?;
    tracing::debug!(peer = %target, "dialed");
    Ok(Box::new(TcpConn::new(stream)?))
}

impl StreamLayer for TcpStreamLayer {
    fn dial(&self, address: &str, timeout: Duration) -> Result<Box<dyn Conn>> {
        dial(address, timeout)
    }

    fn accept(&self) -> Result<Box<dyn Conn>> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(ReplikvError::TransportClosed);
            }
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    stream.set_nonblocking(false)?;
                    tracing::debug!(peer = %peer, "accepted");
                    return Ok(Box::new(TcpConn::new(stream)?));
                }
                Err(e) if is_timeout(&e) => thread::sleep(ACCEPT_POLL_INTERVAL),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            tracing::info!(addr = %self.advertise, "tcp transport closed");
        }
        Ok(())
    }

    fn addr(&self) -> SocketAddr {
        self.advertise
    }
}

/// One TCP connection
struct TcpConn {
    stream: TcpStream,
    peer: SocketAddr,
    local: SocketAddr,
}

impl TcpConn {
    fn new(stream: TcpStream) -> Result<Self> {
        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;
        Ok(Self {
            peer: stream.peer_addr()?,
            local: stream.local_addr()?,
            stream,
        })
    }
}

impl Read for TcpConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl Conn for TcpConn {
    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }
}
