//! Request message payload layout and the global/request status codes.
//!
//! `request_id:u64 LE | body`. The first body a client ever sends for a
//! new id is `command.code:u16 LE | command.version:u8 | request_init`.

use roc_core::error::{EngineError, Result};
use std::fmt;

/// Opaque 64-bit handle allocated by the client, stable for the
/// request's lifetime. A newtype (rather than a bare `u64`) the way
/// `spark_core::kernel::ids::RequestId` wraps its own identifier, even
/// though here the wire representation is a plain integer rather than a
/// string.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

const REQUEST_ID_LEN: usize = 8;
const COMMAND_LEN: usize = 3;

/// Splits the leading 8-byte request id off a request-message payload.
pub fn split_request_id(payload: &[u8]) -> Result<(RequestId, &[u8])> {
    if payload.len() < REQUEST_ID_LEN {
        return Err(EngineError::protocol(
            "message.short_request_id",
            "request payload shorter than the 8-byte request id prefix",
        ));
    }
    let (id_bytes, rest) = payload.split_at(REQUEST_ID_LEN);
    let mut buf = [0u8; REQUEST_ID_LEN];
    buf.copy_from_slice(id_bytes);
    Ok((RequestId(u64::from_le_bytes(buf)), rest))
}

/// A request type selector: the `(code, version)` pair a handler is
/// registered against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Command {
    pub code: u16,
    pub version: u8,
}

/// Splits the leading `command.code:u16 LE | command.version:u8` off the
/// first body of a new request. Per spec.md §4.6 policy step 1, a short
/// payload here is a fatal protocol error (not just for this request).
pub fn split_command(body: &[u8]) -> Result<(Command, &[u8])> {
    if body.len() < COMMAND_LEN {
        return Err(EngineError::protocol(
            "message.short_command",
            "initial request payload shorter than the command header",
        ));
    }
    let code = u16::from_le_bytes([body[0], body[1]]);
    let version = body[2];
    Ok((Command { code, version }, &body[COMMAND_LEN..]))
}

/// Node's reply to the opening command on a request id.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestStatus {
    Supported = 0,
    VersionNotSupported = 1,
    NotSupported = 2,
}

impl RequestStatus {
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}

/// Connection-wide status codes (spec.md §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum GlobalStatus {
    Ok = 0,
    ProtocolError = 1,
    AuthRejected = 2,
    TooManyRequests = 3,
}

impl GlobalStatus {
    pub fn to_byte(self) -> u8 {
        self as u8
    }
}
