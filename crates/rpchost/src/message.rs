// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Messages and wire framing.
//!
//! Simple length-prefixed JSON protocol shared by listeners and clients.
//!
//! Wire format:
//! ```text
//! +----------------+-------------------+
//! | Length (4B BE) | JSON frame        |
//! +----------------+-------------------+
//! ```

use crate::contract::Fault;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Write};

/// A request or reply crossing an endpoint boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub action: String,
    /// Target address of a request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fault: Option<Fault>,
}

impl Message {
    pub fn new(action: impl Into<String>, body: Value) -> Self {
        Self {
            action: action.into(),
            to: None,
            headers: BTreeMap::new(),
            body,
            fault: None,
        }
    }

    /// Reply carrying a fault instead of a body.
    pub fn fault(action: impl Into<String>, fault: Fault) -> Self {
        Self {
            fault: Some(fault),
            ..Self::new(action, Value::Null)
        }
    }

    pub fn with_to(mut self, to: impl Into<String>) -> Self {
        self.to = Some(to.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn is_fault(&self) -> bool {
        self.fault.is_some()
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "<message {}>", self.action),
        }
    }
}

/// User-name credentials attached to a request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserNameToken {
    pub user_name: String,
    pub password: String,
}

/// Protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    #[serde(rename = "request")]
    Request {
        message: Message,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        credentials: Option<UserNameToken>,
    },

    #[serde(rename = "reply")]
    Reply { message: Message },
}

/// Length prefix size.
const HEADER_LEN: usize = 4;

fn check_len(len: usize, max_message_size: usize) -> Result<()> {
    if len == 0 {
        return Err(Error::Protocol("Empty message".into()));
    }
    if len > max_message_size {
        return Err(Error::Protocol(format!(
            "Message too large: {} > {}",
            len, max_message_size
        )));
    }
    Ok(())
}

fn parse_payload(payload: &[u8]) -> Result<Frame> {
    serde_json::from_slice(payload).map_err(|e| Error::Protocol(format!("Invalid JSON: {}", e)))
}

/// Read one frame.
///
/// Returns `Ok(None)` if the peer closed the connection before a new frame.
pub fn read_frame<R: Read>(reader: &mut R, max_message_size: usize) -> Result<Option<Frame>> {
    // Length prefix (4 bytes, big-endian)
    let mut len_buf = [0u8; HEADER_LEN];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    check_len(len, max_message_size)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    parse_payload(&payload).map(Some)
}

/// Length-prefixed bytes of one frame.
pub fn encode_frame(frame: &Frame, max_message_size: usize) -> Result<Vec<u8>> {
    let json = serde_json::to_vec(frame)?;
    if json.len() > max_message_size {
        return Err(Error::Protocol(format!(
            "Message too large: {} > {}",
            json.len(),
            max_message_size
        )));
    }

    let len = u32::try_from(json.len())
        .map_err(|_| Error::Protocol(format!("Message too large: {}", json.len())))?;
    let mut buf = Vec::with_capacity(HEADER_LEN + json.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&json);
    Ok(buf)
}

/// Write one frame and flush.
pub fn write_frame<W: Write>(writer: &mut W, frame: &Frame, max_message_size: usize) -> Result<()> {
    let buf = encode_frame(frame, max_message_size)?;
    writer.write_all(&buf)?;
    writer.flush()?;
    Ok(())
}

/// Frame decoder for nonblocking streams.
///
/// Bytes are fed as they arrive; complete frames are taken out one at a
/// time. A length prefix above the limit is rejected as soon as it is seen.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_message_size: usize,
}

impl FrameDecoder {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_message_size,
        }
    }

    pub fn set_max_message_size(&mut self, max_message_size: usize) {
        self.max_message_size = max_message_size;
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn has_buffered_data(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Whether `decode` yields a frame or an error without more bytes.
    pub fn is_ready(&self) -> bool {
        match self.frame_len() {
            Some(len) => {
                check_len(len, self.max_message_size).is_err()
                    || self.buf.len() >= HEADER_LEN + len
            }
            None => false,
        }
    }

    /// Next complete frame, `Ok(None)` while more bytes are needed.
    pub fn decode(&mut self) -> Result<Option<Frame>> {
        let Some(len) = self.frame_len() else {
            return Ok(None);
        };
        check_len(len, self.max_message_size)?;
        if self.buf.len() < HEADER_LEN + len {
            return Ok(None);
        }

        let frame = parse_payload(&self.buf[HEADER_LEN..HEADER_LEN + len]);
        self.buf.drain(..HEADER_LEN + len);
        frame.map(Some)
    }

    fn frame_len(&self) -> Option<usize> {
        let header: [u8; HEADER_LEN] = self.buf.get(..HEADER_LEN)?.try_into().ok()?;
        Some(u32::from_be_bytes(header) as usize)
    }
}
