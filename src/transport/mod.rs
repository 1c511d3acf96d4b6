//! Transport Module
//!
//! The raw stream layer the consensus engine's networking sits on.
//!
//! ## Primitives
//! - `dial(address, timeout)`: outbound connection to a peer
//! - `accept()`: block until a peer connects or the layer is closed
//! - `close()`: stop listening; a pending `accept()` returns `TransportClosed`
//! - `addr()`: the address peers should use to reach this node
//!
//! ## Kinds
//! ```text
//!   Config.transport ──► bind() ──┬── tcp ──► TcpStreamLayer (listener + streams)
//!                                 └── udp ──► UdpStreamLayer (one socket, demux by peer)
//! ```
//!
//! Connection pooling and per-call deadlines belong to the engine's
//! wrapper above this layer.

mod tcp;
mod udp;

use std::io::{self, Read, Write};
use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use crate::config::{Config, TransportKind};
use crate::error::{ReplikvError, Result};

pub use tcp::TcpStreamLayer;
pub use udp::{UdpStreamLayer, MAX_DATAGRAM_PAYLOAD};

/// A bidirectional byte stream to one peer
pub trait Conn: Read + Write + Send {
    fn peer_addr(&self) -> SocketAddr;

    fn local_addr(&self) -> SocketAddr;

    /// `None` blocks reads indefinitely
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()>;
}

/// Listener plus dialer, as required by the engine's network layer
pub trait StreamLayer: Send + Sync {
    fn dial(&self, address: &str, timeout: Duration) -> Result<Box<dyn Conn>>;

    fn accept(&self) -> Result<Box<dyn Conn>>;

    fn close(&self) -> Result<()>;

    /// Advertised address: the configured advertise address, else the bound one
    fn addr(&self) -> SocketAddr;
}

/// Build the stream layer selected by `config.transport`
///
/// Fails fast on an address peers could not use; the node treats every
/// error here as fatal.
pub fn bind(config: &Config) -> Result<Box<dyn StreamLayer>> {
    let layer: Box<dyn StreamLayer> = match config.transport {
        TransportKind::Tcp => Box::new(TcpStreamLayer::bind(
            &config.bind_addr,
            config.advertise_addr.as_deref(),
        )?),
        TransportKind::Udp => Box::new(UdpStreamLayer::bind(config)?),
    };

    tracing::info!(
        kind = %config.transport,
        addr = %layer.addr(),
        "transport listening"
    );
    Ok(layer)
}

/// Dial `address` without a local listener, over the given kind
pub fn dial(kind: TransportKind, address: &str, timeout: Duration) -> Result<Box<dyn Conn>> {
    match kind {
        TransportKind::Tcp => tcp::dial(address, timeout),
        TransportKind::Udp => udp::dial(address, timeout),
    }
}

/// Resolve `host:port` to its first socket address
pub fn resolve(address: &str) -> Result<SocketAddr> {
    address
        .to_socket_addrs()
        .map_err(|e| ReplikvError::AddressResolution(format!("{}: {}", address, e)))?
        .next()
        .ok_or_else(|| ReplikvError::AddressResolution(format!("{}: no addresses", address)))
}

/// Resolve and check an explicit advertise address against the bind address
///
/// Runs before any socket is bound.
pub(crate) fn resolve_advertise(advertise: &str, bind: SocketAddr) -> Result<SocketAddr> {
    let advertise = resolve(advertise)?;
    check_advertisable(advertise, bind)?;
    Ok(advertise)
}

/// Address to advertise once bound: the explicit one, else the bound address
pub(crate) fn advertised(explicit: Option<SocketAddr>, local: SocketAddr) -> Result<SocketAddr> {
    match explicit {
        Some(advertise) => Ok(advertise),
        None => {
            check_advertisable(local, local)?;
            Ok(local)
        }
    }
}

/// Peers must be able to reach `advertise`, over the family we listen on
pub(crate) fn check_advertisable(advertise: SocketAddr, bind: SocketAddr) -> Result<()> {
    if advertise.ip().is_unspecified() {
        return Err(ReplikvError::NotAdvertisable(advertise));
    }
    if advertise.is_ipv4() != bind.is_ipv4() {
        return Err(ReplikvError::AddressFamily {
            expected: family(bind),
            actual: advertise,
        });
    }
    Ok(())
}

fn family(addr: SocketAddr) -> &'static str {
    if addr.is_ipv4() {
        "IPv4"
    } else {
        "IPv6"
    }
}

/// Read timeouts surface as either kind depending on the platform
pub fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}
