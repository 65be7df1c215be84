//! Update messages and their transport encoding.
//!
//! An [`Update`] travels as a token: JSON text, UTF-8 bytes, then standard
//! base64. The token is what goes into the `payload` field of a
//! [`SessionPayload`] and into the `data` field of a push event.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Deserialize, Serialize};

use crate::error::{CollabError, CollabResult};
use crate::ids::SessionId;

/// Messages exchanged between participants of a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Update {
    /// A participant entered the room.
    #[serde(rename = "JOIN")]
    Join { name: Option<String> },
    /// Reserved.
    #[serde(rename = "INIT")]
    Init,
    /// Reserved for drawing deltas.
    #[serde(rename = "UPDATE")]
    UpdateEvent,
}

impl Update {
    /// Short tag used in log output.
    pub fn kind(&self) -> &'static str {
        match self {
            Update::Join { .. } => "join",
            Update::Init => "init",
            Update::UpdateEvent => "update",
        }
    }
}

/// Request body for join and broadcast requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPayload {
    /// Sender session, so receivers can attribute authorship.
    pub id: SessionId,
    /// Encoded [`Update`].
    pub payload: String,
}

impl SessionPayload {
    pub fn new(id: SessionId, update: &Update) -> CollabResult<Self> {
        Ok(Self {
            id,
            payload: encode(update)?,
        })
    }
}

/// Encode an update into a transport-safe token.
// TODO: encrypt the payload once room keys are exchanged on join.
pub fn encode(update: &Update) -> CollabResult<String> {
    let json = serde_json::to_string(update)
        .map_err(|e| CollabError::MalformedPayload(e.to_string()))?;
    Ok(STANDARD.encode(json.as_bytes()))
}

/// Decode a token produced by [`encode`].
pub fn decode(token: &str) -> CollabResult<Update> {
    let bytes = STANDARD
        .decode(token.trim())
        .map_err(|e| CollabError::MalformedPayload(format!("base64: {}", e)))?;
    let json = String::from_utf8(bytes)
        .map_err(|e| CollabError::MalformedPayload(format!("utf-8: {}", e)))?;
    serde_json::from_str(&json).map_err(|e| CollabError::MalformedPayload(format!("json: {}", e)))
}
