//! Backend-facing providers.
//!
//! This module contains the two ways the client talks to the backend:
//!
//! - [`sse`] - the Server-Sent Events email stream
//! - [`api`] - REST calls for settings and sending mail

pub mod api;
pub mod sse;

pub use api::{
    ApiError, ApiResult, ComposeForm, CustomCategory, HttpMailApi, MailApi, RemoteSettings,
    SendResponse,
};
