//! Client sync frame codec.
//!
//! Every frame starts with a varint message kind. Sync frames carry a sub
//! kind and a length-prefixed payload, presence frames a length-prefixed
//! presence update, and the write acknowledgement carries nothing.

use yrs::encoding::read::{Cursor, Read};
use yrs::encoding::write::Write;

use crate::error::ProtocolError;

pub const MESSAGE_SYNC: u32 = 0;
pub const MESSAGE_PRESENCE: u32 = 1;
pub const MESSAGE_SYNC_DONE: u32 = 3;

const SYNC_STEP1: u32 = 0;
const SYNC_STEP2: u32 = 1;
const SYNC_UPDATE: u32 = 2;

/// Sub-messages of the replicated document handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// Encoded state vector of the sender.
    Step1(Vec<u8>),
    /// Update with everything the receiver's state vector was missing.
    Step2(Vec<u8>),
    /// Incremental update.
    Update(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Sync(SyncMessage),
    Presence(Vec<u8>),
    /// Acknowledges that a client's write was applied.
    SyncDone,
    /// A message kind this server does not handle.
    Unknown(u32),
}

impl Frame {
    pub fn decode(bytes: &[u8]) -> Result<Self, ProtocolError> {
        if bytes.is_empty() {
            return Err(ProtocolError::Empty);
        }
        let mut cursor = Cursor::new(bytes);
        let kind: u32 = cursor.read_var().map_err(malformed)?;
        match kind {
            MESSAGE_SYNC => {
                let sub: u32 = cursor.read_var().map_err(malformed)?;
                let payload = cursor.read_buf().map_err(malformed)?.to_vec();
                match sub {
                    SYNC_STEP1 => Ok(Frame::Sync(SyncMessage::Step1(payload))),
                    SYNC_STEP2 => Ok(Frame::Sync(SyncMessage::Step2(payload))),
                    SYNC_UPDATE => Ok(Frame::Sync(SyncMessage::Update(payload))),
                    other => Err(ProtocolError::Malformed(format!(
                        "unknown sync message {}",
                        other
                    ))),
                }
            }
            MESSAGE_PRESENCE => {
                let payload = cursor.read_buf().map_err(malformed)?.to_vec();
                Ok(Frame::Presence(payload))
            }
            MESSAGE_SYNC_DONE => Ok(Frame::SyncDone),
            other => Ok(Frame::Unknown(other)),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Frame::Sync(message) => {
                buf.write_var(MESSAGE_SYNC);
                let (sub, payload) = match message {
                    SyncMessage::Step1(payload) => (SYNC_STEP1, payload),
                    SyncMessage::Step2(payload) => (SYNC_STEP2, payload),
                    SyncMessage::Update(payload) => (SYNC_UPDATE, payload),
                };
                buf.write_var(sub);
                buf.write_buf(payload);
            }
            Frame::Presence(payload) => {
                buf.write_var(MESSAGE_PRESENCE);
                buf.write_buf(payload);
            }
            Frame::SyncDone => buf.write_var(MESSAGE_SYNC_DONE),
            Frame::Unknown(kind) => buf.write_var(*kind),
        }
        buf
    }
}

fn malformed(err: yrs::encoding::read::Error) -> ProtocolError {
    ProtocolError::Malformed(err.to_string())
}
