//! # replikv
//!
//! One node of a replicated key-value store driven by an external consensus
//! engine:
//! - A state machine applying committed commands to an embedded
//!   transactional store
//! - Point-in-time snapshots, optionally through a concurrent zstd pipeline
//! - A stream layer (TCP, or UDP demultiplexed by peer) for the engine's RPCs
//! - Bounded and elastic buffer pools keeping the hot paths allocation-light
//!
//! ## Architecture Overview
//!
//! ```text
//!            Consensus Engine (external)
//!   ┌──────────────┬──────────────┬───────────────┐
//!   │ apply(entry) │ snapshot()   │ dial / accept │
//!   ▼              ▼              ▼               │
//! ┌──────────────────────┐  ┌──────────────┐  ┌───┴──────────┐
//! │    KvStateMachine    │  │StoreSnapshot │  │ StreamLayer  │
//! │  (SET / GET / DEL)   │  │  persist()   │  │  tcp | udp   │
//! └──────────┬───────────┘  └──────┬───────┘  └──────────────┘
//!            │                     │ read view
//!            ▼                     ▼
//!   ┌──────────────────────────────────────┐      ┌────────────┐
//!   │         KvStore (redb, 1 bucket)     │      │   Pools    │
//!   └──────────────────────────────────────┘      │ bounded /  │
//!                                                 │ elastic    │
//!                      dump ══► zstd ══► sink     └────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod fsm;
pub mod pool;
pub mod protocol;
pub mod snapshot;
pub mod store;
pub mod transport;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, TransportKind};
pub use error::{ReplikvError, Result};
pub use fsm::{
    ApplyResult, CommandPayload, FsmSnapshot, KvStateMachine, LogEntry, LogType, Operation,
    StateMachine,
};
pub use snapshot::{FileSnapshotSink, SnapshotSink, StoreSnapshot};
pub use store::KvStore;
pub use transport::{Conn, StreamLayer};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of replikv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
