//! Wire protocol: opcodes, control messages and the frame codec.

mod codec;

pub use codec::{decode_control, encode_control, ControlDecoder, Decoded};

use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Largest control message a peer may send (16 MiB). Payload is not a control message.
pub const MAX_CONTROL_LEN: usize = 16 * 1024 * 1024;

/// Maximum entries in a LIST_RESULT.
pub const MAX_LIST_ENTRIES: usize = 100_000;

/// Opcode bytes. Requests have the high bit clear, responses have it set.
pub mod opcode {
    pub const LIST: u8 = 0x01;
    pub const INFO: u8 = 0x02;
    pub const GET: u8 = 0x03;
    pub const PUT: u8 = 0x04;
    pub const PING: u8 = 0x05;
    pub const QUIT: u8 = 0x06;

    pub const LIST_RESULT: u8 = 0x81;
    pub const INFO_RESULT: u8 = 0x82;
    pub const READY: u8 = 0x83;
    pub const ACK: u8 = 0x84;
    pub const ERROR: u8 = 0x85;
    pub const PONG: u8 = 0x86;
    pub const BYE: u8 = 0x87;
}

/// One directory entry as reported by LIST.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
    /// Seconds since the Unix epoch
    pub modified: u64,
}

impl FileEntry {
    /// `None` when the peer-supplied timestamp does not fit a `SystemTime`.
    pub fn modified_at(&self) -> Option<SystemTime> {
        UNIX_EPOCH.checked_add(Duration::from_secs(self.modified))
    }
}

/// Converts a filesystem timestamp to whole seconds since the epoch, clamping pre-epoch times to 0.
pub fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Control messages exchanged before (and after) any payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    // Requests
    List,
    GetInfo { name: String },
    Get { name: String },
    Put { name: String, size: u64 },
    Ping,
    Quit,

    // Responses
    FileList { entries: Vec<FileEntry> },
    FileInfo { size: u64, modified: u64 },
    Ready,
    Ack { received: u64 },
    Error { reason: String },
    Pong,
    Bye,
}

impl ControlMessage {
    pub fn opcode(&self) -> u8 {
        match self {
            ControlMessage::List => opcode::LIST,
            ControlMessage::GetInfo { .. } => opcode::INFO,
            ControlMessage::Get { .. } => opcode::GET,
            ControlMessage::Put { .. } => opcode::PUT,
            ControlMessage::Ping => opcode::PING,
            ControlMessage::Quit => opcode::QUIT,
            ControlMessage::FileList { .. } => opcode::LIST_RESULT,
            ControlMessage::FileInfo { .. } => opcode::INFO_RESULT,
            ControlMessage::Ready => opcode::READY,
            ControlMessage::Ack { .. } => opcode::ACK,
            ControlMessage::Error { .. } => opcode::ERROR,
            ControlMessage::Pong => opcode::PONG,
            ControlMessage::Bye => opcode::BYE,
        }
    }

    pub fn is_request(&self) -> bool {
        self.opcode() & 0x80 == 0
    }

    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::List => "LIST",
            ControlMessage::GetInfo { .. } => "INFO",
            ControlMessage::Get { .. } => "GET",
            ControlMessage::Put { .. } => "PUT",
            ControlMessage::Ping => "PING",
            ControlMessage::Quit => "QUIT",
            ControlMessage::FileList { .. } => "LIST_RESULT",
            ControlMessage::FileInfo { .. } => "INFO_RESULT",
            ControlMessage::Ready => "READY",
            ControlMessage::Ack { .. } => "ACK",
            ControlMessage::Error { .. } => "ERROR",
            ControlMessage::Pong => "PONG",
            ControlMessage::Bye => "BYE",
        }
    }

    pub fn error(reason: impl Into<String>) -> Self {
        ControlMessage::Error {
            reason: reason.into(),
        }
    }

    /// Serialize message to bytes
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        encode_control(self)
    }
}
