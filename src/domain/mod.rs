//! Domain layer types for mailstream.
//!
//! This module contains the email record delivered by the analysis stream
//! and the identifier and address types used throughout the crate.

mod email;
mod types;

pub use email::{looks_like_html, parse_timestamp, ActionItem, Address, Email, PriorityLevel};
pub use types::EmailId;
