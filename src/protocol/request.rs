//! Request definitions
//!
//! What a client can ask the node to do.

use crate::error::Result;
use crate::fsm::CommandPayload;

/// Request types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestType {
    Command = 0x01,
    Snapshot = 0x02,
    Ping = 0x03,
}

impl RequestType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(RequestType::Command),
            0x02 => Some(RequestType::Snapshot),
            0x03 => Some(RequestType::Ping),
            _ => None,
        }
    }
}

/// A parsed request
#[derive(Debug, Clone)]
pub enum Request {
    /// Entry data for the log, applied once committed
    ///
    /// Carried as raw bytes; decoding is the state machine's job.
    Command(Vec<u8>),

    /// Persist a snapshot of the current state
    Snapshot,

    /// Health check
    Ping,
}

impl Request {
    /// Encode `payload` as a command request
    pub fn command(payload: &CommandPayload) -> Result<Self> {
        Ok(Request::Command(payload.encode()?))
    }

    pub fn request_type(&self) -> RequestType {
        match self {
            Request::Command(_) => RequestType::Command,
            Request::Snapshot => RequestType::Snapshot,
            Request::Ping => RequestType::Ping,
        }
    }
}
