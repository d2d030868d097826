//! mailstream - streaming client for an AI-analyzed inbox
//!
//! This crate consumes the backend's Server-Sent Events stream of analyzed
//! emails, keeps a bounded in-memory cache, derives a filtered and sorted
//! list view, and renders selected bodies through an isolated HTML-to-text
//! boundary.

pub mod app;
pub mod config;
pub mod domain;
pub mod providers;
pub mod services;
pub mod ui;

pub use app::{Command, PageController, PageState};
pub use config::Settings;
