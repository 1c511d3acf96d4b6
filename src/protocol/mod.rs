//! Protocol Module
//!
//! Client protocol spoken by the node binary over its stream layer.
//!
//! ## Request Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Type (1) │ Len (4)  │         Payload             │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Request Types
//! - 0x01: COMMAND  - Payload: JSON command payload (becomes log entry data)
//! - 0x02: SNAPSHOT - Payload: empty
//! - 0x03: PING     - Payload: empty
//!
//! ## Response Format
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │Status(1) │ Len (4)  │      Payload (JSON)         │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Status Codes
//! - 0x00: OK
//! - 0x01: IGNORED (entry produced no result)
//! - 0x02: ERROR   (payload is the message)

mod codec;
mod request;
mod response;

pub use codec::{
    decode_request, decode_response, encode_request, encode_response, read_request,
    read_response, write_request, write_response, HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
pub use request::{Request, RequestType};
pub use response::{Response, Status};
