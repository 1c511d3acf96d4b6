//! Command definitions
//!
//! The payload carried by command-type log entries.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ReplikvError, Result};

/// Store operations a command can request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Set,
    Get,
    Delete,
}

impl Operation {
    const NAMES: [(Operation, &'static str); 3] = [
        (Operation::Set, "SET"),
        (Operation::Get, "GET"),
        (Operation::Delete, "DELETE"),
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Set => "SET",
            Operation::Get => "GET",
            Operation::Delete => "DELETE",
        }
    }
}

impl FromStr for Operation {
    type Err = ReplikvError;

    /// Trimmed, case-insensitive lookup
    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::NAMES
            .iter()
            .find(|(_, name)| *name == wanted)
            .map(|(op, _)| *op)
            .ok_or_else(|| ReplikvError::invalid_value("operation", s))
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded command
///
/// `operation` stays a string until dispatch: an unknown operation is a
/// skipped command, not a malformed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    #[serde(rename = "Operation", alias = "operation", default)]
    pub operation: String,

    #[serde(rename = "Key", alias = "key", default)]
    pub key: String,

    #[serde(rename = "Value", alias = "value", default)]
    pub value: Value,
}

impl CommandPayload {
    pub fn new(operation: Operation, key: impl Into<String>, value: Value) -> Self {
        Self {
            operation: operation.as_str().to_string(),
            key: key.into(),
            value,
        }
    }

    pub fn set(key: impl Into<String>, value: Value) -> Self {
        Self::new(Operation::Set, key, value)
    }

    pub fn get(key: impl Into<String>) -> Self {
        Self::new(Operation::Get, key, Value::Null)
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self::new(Operation::Delete, key, Value::Null)
    }

    /// Encode as log entry data
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode log entry data
    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }

    /// Normalized operation
    pub fn operation(&self) -> Result<Operation> {
        self.operation.parse()
    }
}
