//! WebSocket Protocol Types
//!
//! Envelopes exchanged with front-end clients. Every inbound envelope is
//! answered by exactly one [`ServerMessage`] on the same connection;
//! [`Notification`]s are pushed to every connection when a write commits.

use backend_link::Role;
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::BridgeError;

/// `strftime` format of broadcast timestamps (UTC, second precision)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Raw inbound envelope, before role/control validation.
///
/// Must be a JSON object. Unknown fields are ignored, and a known field
/// holding anything but a string reads as absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundEnvelope {
    #[serde(default, deserialize_with = "string_or_none")]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "string_or_none")]
    pub control: Option<String>,
    #[serde(default, deserialize_with = "string_or_none")]
    pub message: Option<String>,
}

fn string_or_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(Some(s)),
        _ => Ok(None),
    }
}

/// What a validated envelope asks the bridge to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Reader query over a one-shot backend link
    Read,
    /// Acquire a writer lease
    StartLease,
    /// Release the writer lease
    StopLease,
    /// Forward a message over the held lease
    Write { message: String },
}

impl Request {
    pub fn role(&self) -> Role {
        match self {
            Request::Read => Role::Reader,
            _ => Role::Writer,
        }
    }
}

impl InboundEnvelope {
    pub fn decode(text: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(text).map_err(|_| BridgeError::InvalidJson)
    }

    /// Validate role and pick the action.
    ///
    /// `control` wins over `message`. A control value other than
    /// `start`/`stop` is ignored, and an empty message counts as absent.
    pub fn into_request(self) -> Result<Request, BridgeError> {
        let role: Role = self
            .role
            .as_deref()
            .and_then(|r| r.parse().ok())
            .ok_or(BridgeError::InvalidRole)?;

        if role == Role::Reader {
            return Ok(Request::Read);
        }

        match self.control.as_deref() {
            Some("start") => return Ok(Request::StartLease),
            Some("stop") => return Ok(Request::StopLease),
            _ => {}
        }

        match self.message {
            Some(message) if !message.is_empty() => Ok(Request::Write { message }),
            _ => Err(BridgeError::EmptyRequest),
        }
    }
}

/// Decode a text frame straight into a [`Request`]
pub fn parse_request(text: &str) -> Result<Request, BridgeError> {
    InboundEnvelope::decode(text)?.into_request()
}

/// Reply envelope sent to the client that made the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ServerMessage {
    Ok {
        role: Role,
        /// Reader dump
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
        /// Backend reply to a writer command
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply: Option<String>,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn data(text: String) -> Self {
        Self::Ok {
            role: Role::Reader,
            data: Some(text),
            reply: None,
        }
    }

    pub fn reply(text: String) -> Self {
        Self::Ok {
            role: Role::Writer,
            data: None,
            reply: Some(text),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl From<BridgeError> for ServerMessage {
    fn from(err: BridgeError) -> Self {
        Self::error(err.to_string())
    }
}

/// Unsolicited frames pushed to every connected client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Notification {
    Broadcast { payload: CommitNotice },
}

/// A write the backend acknowledged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitNotice {
    pub message: String,
    pub timestamp: String,
}

impl CommitNotice {
    /// Stamp a committed message with the current UTC time.
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            timestamp: Utc::now().format(TIMESTAMP_FORMAT).to_string(),
        }
    }
}
