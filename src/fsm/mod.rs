//! FSM Module
//!
//! The replicated state machine the consensus engine drives.
//!
//! ## Contract
//! - The engine delivers committed entries to `apply` one at a time
//! - `snapshot` may be called, and its `persist` run, while `apply` continues
//! - `restore` replaces all state before the node serves further entries
//!
//! ## Apply Flow
//! ```text
//!  LogEntry ──► decode CommandPayload ──► SET / GET / DELETE ──► KvStore
//!                     │                                           │
//!                     └── malformed → ApplyResult{error}          │
//!                                                                 ▼
//!                                                   ApplyResult{error, data}
//! ```

mod command;
mod machine;

use std::fmt;
use std::io::Read;
use std::str::FromStr;

use serde_json::{Map, Value};

use crate::error::{ReplikvError, Result};
use crate::snapshot::SnapshotSink;

pub use command::{CommandPayload, Operation};
pub use machine::KvStateMachine;

/// Kind of a committed log entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogType {
    /// Application command, handed to the state machine
    Command,
    /// Leader no-op written at the start of a term
    Noop,
    /// Barrier used by the engine to wait for applies
    Barrier,
    /// Cluster membership change
    Configuration,
}

impl LogType {
    const NAMES: [(LogType, &'static str); 4] = [
        (LogType::Command, "command"),
        (LogType::Noop, "noop"),
        (LogType::Barrier, "barrier"),
        (LogType::Configuration, "configuration"),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogType::Command => "command",
            LogType::Noop => "noop",
            LogType::Barrier => "barrier",
            LogType::Configuration => "configuration",
        }
    }
}

impl FromStr for LogType {
    type Err = ReplikvError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::NAMES
            .iter()
            .find(|(_, name)| *name == wanted)
            .map(|(kind, _)| *kind)
            .ok_or_else(|| ReplikvError::invalid_value("log type", s))
    }
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed entry as delivered by the consensus engine
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub index: u64,
    pub term: u64,
    pub kind: LogType,
    pub data: Vec<u8>,
}

impl LogEntry {
    /// A command entry carrying `data`
    pub fn command(index: u64, term: u64, data: Vec<u8>) -> Self {
        Self {
            index,
            term,
            kind: LogType::Command,
            data,
        }
    }
}

/// Outcome of applying one command, returned to whoever awaits the commit
#[derive(Debug)]
pub struct ApplyResult {
    pub error: Option<ReplikvError>,
    pub data: Value,
}

impl ApplyResult {
    pub fn ok(data: Value) -> Self {
        Self { error: None, data }
    }

    pub fn failed(error: ReplikvError, data: Value) -> Self {
        Self {
            error: Some(error),
            data,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of a GET on a key that holds nothing
pub fn empty_mapping() -> Value {
    Value::Object(Map::new())
}

/// Hooks the consensus engine calls on the node's state
pub trait StateMachine: Send + Sync {
    type Snapshot: FsmSnapshot;

    /// Apply one committed entry
    ///
    /// Returns `None` for entries that produce no result: non-command
    /// entries and commands with an unrecognized operation.
    fn apply(&self, entry: &LogEntry) -> Option<ApplyResult>;

    /// Capture a handle that can persist the current state
    fn snapshot(&self) -> Result<Self::Snapshot>;

    /// Replace all state with the contents of a persisted snapshot
    fn restore(&self, source: Box<dyn Read + Send>) -> Result<()>;
}

/// A snapshot handle produced by `StateMachine::snapshot`
pub trait FsmSnapshot: Send {
    /// Write the snapshot to `sink`, then commit or cancel it
    fn persist(&self, sink: &mut dyn SnapshotSink) -> Result<()>;

    /// Called once the engine no longer needs this snapshot
    fn release(&mut self);
}
