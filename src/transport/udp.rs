//! UDP stream layer
//!
//! One socket listens for every peer. A demux thread reads datagrams and
//! routes them by source address:
//!
//! ```text
//!                       ┌── peer A ──► [queue] ──► UdpConn (accepted)
//!  socket ──► demux ────┼── peer B ──► [queue] ──► UdpConn (accepted)
//!                       └── new peer ──► accept queue ──► accept()
//! ```
//!
//! Accepted connections reply through the shared socket with `send_to`.
//! Dialed connections own a connected socket of their own. Writes go out as
//! datagrams of at most `MAX_DATAGRAM_PAYLOAD` bytes; delivery is whatever
//! the network gives, the engine's RPC layer handles loss.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;

use super::{advertised, is_timeout, resolve, resolve_advertise, Conn, StreamLayer};
use crate::config::Config;
use crate::error::{ReplikvError, Result};
use crate::pool::ElasticBytePool;

/// Largest write sent as a single datagram
pub const MAX_DATAGRAM_PAYLOAD: usize = 8 * 1024;

/// Receive buffer; anything the network can hand us fits
const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Datagrams queued per accepted peer before new ones are dropped
const PEER_QUEUE_DEPTH: usize = 256;

/// Peers waiting for `accept()` before new ones are dropped
const ACCEPT_BACKLOG: usize = 64;

/// How often the demux thread rechecks for shutdown
const DEMUX_POLL_INTERVAL: Duration = Duration::from_millis(100);

struct PeerEntry {
    id: u64,
    tx: Sender<Vec<u8>>,
}

/// State shared by the layer, its demux thread and accepted connections
struct Shared {
    socket: UdpSocket,
    local: SocketAddr,
    peers: Mutex<HashMap<SocketAddr, PeerEntry>>,
    datagrams: ElasticBytePool,
    next_peer_id: AtomicU64,
    closed: AtomicBool,
}

pub struct UdpStreamLayer {
    shared: Arc<Shared>,
    advertise: SocketAddr,
    incoming: Receiver<UdpConn>,
    /// Dropped by `close()` to wake a blocked `accept()`
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    demux: Mutex<Option<JoinHandle<()>>>,
}

impl UdpStreamLayer {
    /// Bind the shared socket and start the demux thread
    ///
    /// Addresses come from `bind_addr`/`advertise_addr`; the datagram buffer
    /// pool is sized from the pool settings.
    pub fn bind(config: &Config) -> Result<Self> {
        let bind = resolve(&config.bind_addr)?;
        let explicit = config
            .advertise_addr
            .as_deref()
            .map(|a| resolve_advertise(a, bind))
            .transpose()?;

        let socket = UdpSocket::bind(bind)?;
        let local = socket.local_addr()?;
        let advertise = advertised(explicit, local)?;
        socket.set_read_timeout(Some(DEMUX_POLL_INTERVAL))?;

        let shared = Arc::new(Shared {
            socket,
            local,
            peers: Mutex::new(HashMap::new()),
            datagrams: ElasticBytePool::from_config(config),
            next_peer_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });

        let (accept_tx, incoming) = channel::bounded(ACCEPT_BACKLOG);
        let (shutdown_tx, shutdown_rx) = channel::bounded(0);

        let demux = {
            let shared = Arc::clone(&shared);
            thread::Builder::new()
                .name(format!("udp-demux-{}", local.port()))
                .spawn(move || demux_loop(shared, accept_tx))?
        };

        tracing::debug!(local = %local, advertise = %advertise, "udp socket bound");

        Ok(Self {
            shared,
            advertise,
            incoming,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            demux: Mutex::new(Some(demux)),
        })
    }

    /// Address the shared socket actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.shared.local
    }

    /// Peers with an open accepted connection
    pub fn peer_count(&self) -> usize {
        self.shared.peers.lock().len()
    }

    /// Datagram buffers idle in the pool
    pub fn idle_buffers(&self) -> usize {
        self.shared.datagrams.len()
    }
}

/// Open a connected socket to `address`
///
/// Nothing is sent until the first write; `timeout` bounds each write.
pub fn dial(address: &str, timeout: Duration) -> Result<Box<dyn Conn>> {
    let target = resolve(address)?;
    let local: SocketAddr = if target.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };

    let socket = UdpSocket::bind(local)?;
    socket.connect(target)?;
    if !timeout.is_zero() {
        socket.set_write_timeout(Some(timeout))?;
    }
    tracing::debug!(peer = %target, "dialed");

    Ok(Box::new(DialedConn {
        local: socket.local_addr()?,
        socket,
        peer: target,
        recv_buf: vec![0; RECV_BUFFER_SIZE],
        leftover: Vec::new(),
        leftover_pos: 0,
    }))
}

impl StreamLayer for UdpStreamLayer {
    fn dial(&self, address: &str, timeout: Duration) -> Result<Box<dyn Conn>> {
        dial(address, timeout)
    }

    fn accept(&self) -> Result<Box<dyn Conn>> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(ReplikvError::TransportClosed);
        }
        crossbeam::select! {
            recv(self.incoming) -> conn => match conn {
                // select! picks at random when both arms are ready
                Ok(_) if self.shared.closed.load(Ordering::Acquire) => {
                    Err(ReplikvError::TransportClosed)
                }
                Ok(conn) => {
                    tracing::debug!(peer = %conn.peer, "accepted");
                    Ok(Box::new(conn) as Box<dyn Conn>)
                }
                Err(_) => Err(ReplikvError::TransportClosed),
            },
            recv(self.shutdown_rx) -> _ => Err(ReplikvError::TransportClosed),
        }
    }

    fn close(&self) -> Result<()> {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shutdown_tx.lock().take();

        // Dropping the senders ends reads on every accepted connection
        let peers = std::mem::take(&mut *self.shared.peers.lock());
        drop(peers);

        if let Some(handle) = self.demux.lock().take() {
            if handle.join().is_err() {
                tracing::error!(addr = %self.shared.local, "udp demux thread panicked");
            }
        }
        tracing::info!(addr = %self.advertise, "udp transport closed");
        Ok(())
    }

    fn addr(&self) -> SocketAddr {
        self.advertise
    }
}

impl Drop for UdpStreamLayer {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

// =============================================================================
// Demux
// =============================================================================

fn demux_loop(shared: Arc<Shared>, accept_tx: Sender<UdpConn>) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];

    while !shared.closed.load(Ordering::Acquire) {
        match shared.socket.recv_from(&mut buf) {
            Ok((n, from)) => route(&shared, &accept_tx, from, &buf[..n]),
            Err(e) if is_timeout(&e) || e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                // e.g. ICMP port unreachable reported on the next receive
                tracing::warn!(addr = %shared.local, error = %e, "udp receive failed");
            }
        }
    }
    tracing::debug!(addr = %shared.local, "udp demux stopped");
}

fn route(shared: &Arc<Shared>, accept_tx: &Sender<UdpConn>, from: SocketAddr, bytes: &[u8]) {
    if shared.closed.load(Ordering::Acquire) {
        return;
    }
    let mut data = shared.datagrams.get();
    data.extend_from_slice(bytes);

    let conn = {
        let mut peers = shared.peers.lock();
        if let Some(entry) = peers.get(&from) {
            match entry.tx.try_send(data) {
                Ok(()) => return,
                Err(TrySendError::Full(data)) => {
                    tracing::warn!(peer = %from, bytes = data.len(), "peer queue full, datagram dropped");
                    shared.datagrams.put(data);
                    return;
                }
                // Connection dropped without deregistering yet; start over
                Err(TrySendError::Disconnected(returned)) => {
                    peers.remove(&from);
                    data = returned;
                }
            }
        }

        let (tx, rx) = channel::bounded(PEER_QUEUE_DEPTH);
        // Fresh queue with room; cannot fail
        let _ = tx.try_send(data);
        let id = shared.next_peer_id.fetch_add(1, Ordering::Relaxed);
        peers.insert(from, PeerEntry { id, tx });

        UdpConn {
            shared: Arc::clone(shared),
            id,
            peer: from,
            rx,
            read_timeout: None,
            current: None,
            current_pos: 0,
        }
    };

    // Outside the peers lock: a rejected conn deregisters itself on drop
    if let Err(TrySendError::Full(conn) | TrySendError::Disconnected(conn)) =
        accept_tx.try_send(conn)
    {
        tracing::warn!(peer = %conn.peer, "accept backlog full, peer dropped");
    }
}

// =============================================================================
// Connections
// =============================================================================

/// Connection handed out by `accept()`
struct UdpConn {
    shared: Arc<Shared>,
    id: u64,
    peer: SocketAddr,
    rx: Receiver<Vec<u8>>,
    read_timeout: Option<Duration>,
    current: Option<Vec<u8>>,
    current_pos: usize,
}

impl Read for UdpConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if let Some(datagram) = &self.current {
                if self.current_pos < datagram.len() {
                    let n = copy_out(&datagram[self.current_pos..], buf);
                    self.current_pos += n;
                    return Ok(n);
                }
                if let Some(drained) = self.current.take() {
                    self.shared.datagrams.put(drained);
                }
            }

            let next = match self.read_timeout {
                Some(timeout) => self.rx.recv_timeout(timeout),
                None => self.rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };
            match next {
                Ok(datagram) => {
                    self.current = Some(datagram);
                    self.current_pos = 0;
                }
                Err(RecvTimeoutError::Timeout) => {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "udp read timed out"))
                }
                // Layer closed: end of stream
                Err(RecvTimeoutError::Disconnected) => return Ok(0),
            }
        }
    }
}

impl Write for UdpConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "udp transport closed"));
        }
        let n = buf.len().min(MAX_DATAGRAM_PAYLOAD);
        self.shared.socket.send_to(&buf[..n], self.peer)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Conn for UdpConn {
    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn local_addr(&self) -> SocketAddr {
        self.shared.local
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.read_timeout = timeout;
        Ok(())
    }
}

impl Drop for UdpConn {
    fn drop(&mut self) {
        let mut peers = self.shared.peers.lock();
        if peers.get(&self.peer).map(|entry| entry.id) == Some(self.id) {
            peers.remove(&self.peer);
        }
        drop(peers);

        if let Some(datagram) = self.current.take() {
            self.shared.datagrams.put(datagram);
        }
    }
}

/// Connection returned by `dial()`, on its own connected socket
struct DialedConn {
    socket: UdpSocket,
    peer: SocketAddr,
    local: SocketAddr,
    recv_buf: Vec<u8>,
    /// Tail of a datagram larger than the caller's buffer
    leftover: Vec<u8>,
    leftover_pos: usize,
}

impl Read for DialedConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.leftover_pos < self.leftover.len() {
            let n = copy_out(&self.leftover[self.leftover_pos..], buf);
            self.leftover_pos += n;
            return Ok(n);
        }

        let received = self.socket.recv(&mut self.recv_buf)?;
        let n = copy_out(&self.recv_buf[..received], buf);
        self.leftover.clear();
        self.leftover.extend_from_slice(&self.recv_buf[n..received]);
        self.leftover_pos = 0;
        Ok(n)
    }
}

impl Write for DialedConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = buf.len().min(MAX_DATAGRAM_PAYLOAD);
        self.socket.send(&buf[..n])
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Conn for DialedConn {
    fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn local_addr(&self) -> SocketAddr {
        self.local
    }

    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        self.socket.set_read_timeout(timeout)
    }
}

fn copy_out(src: &[u8], dst: &mut [u8]) -> usize {
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    n
}
