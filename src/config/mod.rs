//! Configuration and settings management.
//!
//! This module provides application settings types and persistence.
//! Settings are stored in the user's config directory as JSON.

mod settings;

pub use settings::{
    CacheSettings, ConfigError, ConfigResult, DetailSettings, PrivacySettings, RenderSettings,
    ServerSettings, Settings, StreamSettings, ENV_MAX_EMAILS, ENV_SERVER_URL,
};
