//! Server-Sent Events support for the email analysis stream.
//!
//! - [`SseStream`] frames raw response bytes into [`SseFrame`]s
//! - [`StreamEvent`] decodes frames into the typed events the stream carries

mod codec;
mod events;

pub use codec::{SseError, SseFrame, SseStream};
pub use events::{CachedPayload, DecodeError, StreamEvent, StreamStats};
