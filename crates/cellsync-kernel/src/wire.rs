//! Kernel wire codec.
//!
//! A message travels as `[identities.., "<IDS|MSG>", signature, header,
//! parent_header, metadata, content, buffers..]`. The signature is the hex
//! HMAC-SHA256 of the four JSON frames under the shared key; with an empty
//! key messages are neither signed nor verified.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::Sha256;

use crate::error::WireError;

type HmacSha256 = Hmac<Sha256>;

pub const DELIMITER: &[u8] = b"<IDS|MSG>";
pub const PROTOCOL_VERSION: &str = "5.3";

/// Frames that must follow the delimiter: signature plus four JSON frames.
const MIN_PAYLOAD_FRAMES: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub msg_id: String,
    pub msg_type: String,
    #[serde(default)]
    pub session: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub date: String,
    #[serde(default)]
    pub version: String,
}

/// A decoded kernel message.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelMessage {
    /// Routing frames before the delimiter. On the broadcast channel the
    /// first one is the topic.
    pub identities: Vec<Bytes>,
    pub header: Header,
    pub parent_header: Value,
    pub metadata: Value,
    pub content: Value,
    pub buffers: Vec<Bytes>,
}

impl KernelMessage {
    pub fn msg_type(&self) -> &str {
        &self.header.msg_type
    }

    /// Id of the request this message answers.
    pub fn parent_msg_id(&self) -> Option<&str> {
        self.parent_header.get("msg_id").and_then(Value::as_str)
    }

    pub fn topic(&self) -> String {
        self.identities
            .first()
            .map(|topic| String::from_utf8_lossy(topic).into_owned())
            .unwrap_or_default()
    }
}

/// Signs, encodes and decodes kernel messages for one client session.
#[derive(Clone)]
pub struct WireCodec {
    key: Arc<[u8]>,
    session: String,
    username: String,
}

impl WireCodec {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self {
            key: Arc::from(key.as_ref()),
            session: uuid::Uuid::new_v4().to_string(),
            username: "cellsync".to_string(),
        }
    }

    pub fn is_signing(&self) -> bool {
        !self.key.is_empty()
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    fn mac(&self) -> Option<HmacSha256> {
        if self.key.is_empty() {
            return None;
        }
        HmacSha256::new_from_slice(&self.key).ok()
    }

    /// Hex signature over the given frames; empty when signing is disabled.
    pub fn sign(&self, frames: &[&[u8]]) -> String {
        match self.mac() {
            Some(mut mac) => {
                for frame in frames {
                    mac.update(frame);
                }
                hex::encode(mac.finalize().into_bytes())
            }
            None => String::new(),
        }
    }

    pub fn encode(&self, message: &KernelMessage) -> Result<Vec<Bytes>, WireError> {
        let header = serde_json::to_vec(&message.header)?;
        let parent_header = serde_json::to_vec(&message.parent_header)?;
        let metadata = serde_json::to_vec(&message.metadata)?;
        let content = serde_json::to_vec(&message.content)?;
        let signature = self.sign(&[&header, &parent_header, &metadata, &content]);

        let mut frames = message.identities.clone();
        frames.push(Bytes::from_static(DELIMITER));
        frames.push(Bytes::from(signature));
        frames.push(Bytes::from(header));
        frames.push(Bytes::from(parent_header));
        frames.push(Bytes::from(metadata));
        frames.push(Bytes::from(content));
        frames.extend(message.buffers.iter().cloned());
        Ok(frames)
    }

    pub fn decode(&self, frames: &[Bytes]) -> Result<KernelMessage, WireError> {
        let split = frames
            .iter()
            .position(|frame| frame.as_ref() == DELIMITER)
            .ok_or(WireError::MissingDelimiter)?;
        let payload = &frames[split + 1..];
        if payload.len() < MIN_PAYLOAD_FRAMES {
            return Err(WireError::ShortMessage(payload.len()));
        }

        if let Some(mut mac) = self.mac() {
            let signature = hex::decode(&payload[0]).map_err(|_| WireError::BadSignature)?;
            for frame in &payload[1..MIN_PAYLOAD_FRAMES] {
                mac.update(frame);
            }
            mac.verify_slice(&signature)
                .map_err(|_| WireError::BadSignature)?;
        }

        Ok(KernelMessage {
            identities: frames[..split].to_vec(),
            header: serde_json::from_slice(&payload[1])?,
            parent_header: serde_json::from_slice(&payload[2])?,
            metadata: serde_json::from_slice(&payload[3])?,
            content: serde_json::from_slice(&payload[4])?,
            buffers: payload[MIN_PAYLOAD_FRAMES..].to_vec(),
        })
    }

    /// A new request originating from this session.
    pub fn request(&self, msg_type: &str, msg_id: &str, content: Value) -> KernelMessage {
        KernelMessage {
            identities: Vec::new(),
            header: Header {
                msg_id: msg_id.to_string(),
                msg_type: msg_type.to_string(),
                session: self.session.clone(),
                username: self.username.clone(),
                date: Utc::now().to_rfc3339(),
                version: PROTOCOL_VERSION.to_string(),
            },
            parent_header: json!({}),
            metadata: json!({}),
            content,
            buffers: Vec::new(),
        }
    }

    /// Execute `code`, using the request id as message id so replies can be
    /// matched back to the result entry.
    pub fn execute_request(&self, code: &str, request_id: &str) -> KernelMessage {
        self.request(
            "execute_request",
            request_id,
            json!({
                "code": code,
                "silent": false,
                "store_history": true,
                "user_expressions": {},
                "allow_stdin": false,
                "stop_on_error": true,
            }),
        )
    }

    pub fn kernel_info_request(&self) -> KernelMessage {
        self.request("kernel_info_request", &uuid::Uuid::new_v4().to_string(), json!({}))
    }

    pub fn interrupt_request(&self) -> KernelMessage {
        self.request("interrupt_request", &uuid::Uuid::new_v4().to_string(), json!({}))
    }
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
