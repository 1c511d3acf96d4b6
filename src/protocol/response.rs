//! Response definitions
//!
//! Represents responses to clients.

use serde_json::Value;

use crate::fsm::ApplyResult;

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    /// Committed, but produced no result (unrecognized operation)
    Ignored = 0x01,
    Error = 0x02,
}

impl Status {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Status::Ok),
            0x01 => Some(Status::Ignored),
            0x02 => Some(Status::Error),
            _ => None,
        }
    }
}

/// A response to send to client
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: Status,

    /// Result data for OK, error message (as a string) for ERROR
    pub payload: Value,
}

impl Response {
    pub fn ok(payload: Value) -> Self {
        Self {
            status: Status::Ok,
            payload,
        }
    }

    pub fn ignored() -> Self {
        Self {
            status: Status::Ignored,
            payload: Value::Null,
        }
    }

    pub fn error(message: &str) -> Self {
        Self {
            status: Status::Error,
            payload: Value::String(message.to_string()),
        }
    }

    /// Map the state machine's answer for one entry
    pub fn from_apply(result: Option<ApplyResult>) -> Self {
        match result {
            Some(ApplyResult { error: None, data }) => Response::ok(data),
            Some(ApplyResult {
                error: Some(e), ..
            }) => Response::error(&e.to_string()),
            None => Response::ignored(),
        }
    }
}
