//! Typed events carried by the email analysis stream.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::SseFrame;
use crate::domain::Email;

/// Errors decoding a frame into a [`StreamEvent`].
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed {event} payload: {source}")]
    Malformed {
        event: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown event type: {0}")]
    Unknown(String),
}

/// Payload of a `cached` event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CachedPayload {
    /// Previously analyzed records.
    #[serde(default)]
    pub emails: Vec<Email>,
    /// Whether earlier cached deliveries should be discarded first.
    #[serde(default)]
    pub replace_previous: bool,
    /// How many records the server filtered out before sending.
    #[serde(default)]
    pub filtered_count: Option<usize>,
}

/// Terminal summary from a `stats` or `complete` event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    /// Records analyzed during this session.
    #[serde(default)]
    pub processed: usize,
    /// Records served from the server-side cache.
    #[serde(default)]
    pub cached: usize,
    /// Total records considered.
    #[serde(default)]
    pub total: usize,
}

#[derive(Debug, Default, Deserialize)]
struct MessagePayload {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BatchPayload {
    #[serde(default)]
    emails: Vec<Email>,
}

/// One decoded stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Stream established.
    Connected,
    /// Human-readable progress string.
    Status { message: String },
    /// Previously cached, already analyzed records.
    Cached(CachedPayload),
    /// One freshly analyzed record.
    Email(Box<Email>),
    /// Several freshly analyzed records.
    Batch { emails: Vec<Email> },
    /// Terminal summary.
    Stats(StreamStats),
    /// Graceful server-initiated termination.
    Close { message: Option<String> },
    /// Server-reported failure.
    Error { message: Option<String> },
}

impl StreamEvent {
    /// Decodes a frame by its event name.
    pub fn from_frame(frame: &SseFrame) -> Result<Self, DecodeError> {
        let name = frame.event_name();
        match name {
            "connected" => Ok(Self::Connected),
            "status" => {
                let payload: MessagePayload = decode(name, &frame.data)?;
                Ok(Self::Status {
                    message: payload.message.unwrap_or_default(),
                })
            }
            "cached" => Ok(Self::Cached(decode(name, &frame.data)?)),
            "email" => Ok(Self::Email(Box::new(decode(name, &frame.data)?))),
            "batch" => {
                let payload: BatchPayload = decode(name, &frame.data)?;
                Ok(Self::Batch {
                    emails: payload.emails,
                })
            }
            "stats" | "complete" => Ok(Self::Stats(decode_optional(name, &frame.data)?)),
            "close" => {
                let payload: MessagePayload = decode_optional(name, &frame.data)?;
                Ok(Self::Close {
                    message: payload.message,
                })
            }
            // A broken error payload is still an error.
            "error" => Ok(Self::Error {
                message: decode_optional::<MessagePayload>(name, &frame.data)
                    .ok()
                    .and_then(|p| p.message),
            }),
            other => Err(DecodeError::Unknown(other.to_string())),
        }
    }

    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Status { .. } => "status",
            Self::Cached(_) => "cached",
            Self::Email(_) => "email",
            Self::Batch { .. } => "batch",
            Self::Stats(_) => "stats",
            Self::Close { .. } => "close",
            Self::Error { .. } => "error",
        }
    }
}

fn decode<T: DeserializeOwned>(event: &str, data: &str) -> Result<T, DecodeError> {
    serde_json::from_str(data).map_err(|source| DecodeError::Malformed {
        event: event.to_string(),
        source,
    })
}

/// Like [`decode`], but an empty payload yields the default value.
fn decode_optional<T: DeserializeOwned + Default>(
    event: &str,
    data: &str,
) -> Result<T, DecodeError> {
    if data.trim().is_empty() {
        Ok(T::default())
    } else {
        decode(event, data)
    }
}
