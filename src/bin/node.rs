//! replikv Node Binary
//!
//! Runs a single node that acts as its own leader: requests are committed in
//! arrival order and applied one at a time.

use std::fs::File;
use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use clap::Parser;
use parking_lot::Mutex;
use replikv::protocol::{read_request, write_response, Request, Response};
use replikv::transport::{self, is_timeout};
use replikv::{
    Config, Conn, FileSnapshotSink, FsmSnapshot, KvStateMachine, LogEntry, ReplikvError,
    StateMachine, StreamLayer, TransportKind,
};
use serde_json::json;
use tracing_subscriber::{fmt, EnvFilter};

/// Term used for every entry; a lone node never holds an election
const TERM: u64 = 1;

/// replikv Node
#[derive(Parser, Debug)]
#[command(name = "replikv-node")]
#[command(about = "Replicated key-value node")]
#[command(version)]
struct Args {
    /// Data directory
    #[arg(short, long, default_value = "./replikv_data")]
    data_dir: PathBuf,

    /// Node identity
    #[arg(short, long, default_value = "node-1")]
    node_id: String,

    /// Listen address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:7000")]
    bind: String,

    /// Address peers should use, if not the bound one
    #[arg(short, long)]
    advertise: Option<String>,

    /// Stream layer: tcp or udp
    #[arg(short, long, default_value = "tcp")]
    transport: String,

    /// Compress stored values and snapshots
    #[arg(short, long)]
    compress: bool,

    /// Snapshot file to restore before serving
    #[arg(short, long)]
    restore: Option<PathBuf>,
}

/// The node's state: the state machine plus the local commit index
struct Node {
    fsm: KvStateMachine,
    /// Last applied index; held for the whole apply
    applied: Mutex<u64>,
    config: Config,
}

impl Node {
    fn commit(&self, data: Vec<u8>) -> Response {
        let mut applied = self.applied.lock();
        *applied += 1;
        let entry = LogEntry::command(*applied, TERM, data);
        Response::from_apply(self.fsm.apply(&entry))
    }

    fn snapshot(&self) -> replikv::Result<Response> {
        // Applies wait until the persist ends, so the contents stop at `index`
        let applied = self.applied.lock();
        let index = *applied;
        let mut snapshot = self.fsm.snapshot()?;

        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let id = format!("{}-{}-{}", TERM, index, millis);
        let mut sink = FileSnapshotSink::create(&self.config.snapshot_dir(), id.as_str())?;

        let persisted = snapshot.persist(&mut sink);
        snapshot.release();
        drop(applied);
        persisted?;

        Ok(Response::ok(json!({
            "id": id,
            "index": index,
            "path": sink.path().display().to_string(),
        })))
    }

    fn execute(&self, request: Request) -> Response {
        match request {
            Request::Command(data) => self.commit(data),
            Request::Snapshot => self
                .snapshot()
                .unwrap_or_else(|e| Response::error(&e.to_string())),
            Request::Ping => Response::ok(json!("PONG")),
        }
    }
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,replikv=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("replikv node v{}", replikv::VERSION);

    let transport_kind: TransportKind = match args.transport.parse() {
        Ok(kind) => kind,
        Err(e) => fatal("Unsupported transport", e),
    };

    let mut builder = Config::builder()
        .data_dir(&args.data_dir)
        .node_id(&args.node_id)
        .bind_addr(&args.bind)
        .transport(transport_kind)
        .use_compression(args.compress);
    if let Some(advertise) = &args.advertise {
        builder = builder.advertise_addr(advertise);
    }
    let config = builder.build();

    if let Err(e) = config.validate() {
        fatal("Invalid configuration", e);
    }

    let fsm = match KvStateMachine::open(&config) {
        Ok(fsm) => fsm,
        Err(e) => fatal("Failed to open state machine", e),
    };

    if let Some(path) = &args.restore {
        let restored = File::open(path)
            .map_err(ReplikvError::from)
            .and_then(|file| fsm.restore(Box::new(BufReader::new(file))));
        if let Err(e) = restored {
            fatal("Failed to restore snapshot", e);
        }
        tracing::info!("Restored from {}", path.display());
    }

    let layer: Arc<dyn StreamLayer> = match transport::bind(&config) {
        Ok(layer) => Arc::from(layer),
        Err(e) => fatal("Failed to start transport", e),
    };

    tracing::info!(
        "Node {} serving on {} ({})",
        config.node_id,
        layer.addr(),
        config.transport
    );

    let node = Arc::new(Node {
        fsm,
        applied: Mutex::new(0),
        config,
    });

    loop {
        let conn = match layer.accept() {
            Ok(conn) => conn,
            Err(ReplikvError::TransportClosed) => break,
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                continue;
            }
        };

        let node = Arc::clone(&node);
        thread::spawn(move || {
            let peer = conn.peer_addr();
            if let Err(e) = serve(&node, conn) {
                tracing::warn!("Connection {} ended with error: {}", peer, e);
            }
        });
    }

    tracing::info!("Node stopped");
}

/// Answer requests on one connection until the peer goes away
fn serve(node: &Node, mut conn: Box<dyn Conn>) -> replikv::Result<()> {
    let peer = conn.peer_addr();
    conn.set_read_timeout(Some(node.config.io_timeout))?;
    tracing::debug!("Connection established from {}", peer);

    loop {
        let request = match read_request(&mut conn) {
            Ok(request) => request,
            Err(ReplikvError::Io(ref e)) if is_disconnect(e) || is_timeout(e) => {
                tracing::debug!("Client {} disconnected", peer);
                return Ok(());
            }
            Err(e) => {
                let _ = write_response(&mut conn, &Response::error(&e.to_string()));
                return Err(e);
            }
        };

        tracing::trace!("Received request from {}: {:?}", peer, request.request_type());
        let response = node.execute(request);
        write_response(&mut conn, &response)?;
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

fn fatal(context: &str, e: ReplikvError) -> ! {
    tracing::error!("{}: {}", context, e);
    std::process::exit(1);
}
