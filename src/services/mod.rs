//! Services layer.
//!
//! Services sit between the page controller and the providers:
//!
//! ```text
//! Application Layer (PageController, commands)
//!          |
//!          v
//!    Services Layer  <-- You are here
//!          |
//!          v
//! Providers (SSE stream, REST API)
//! ```
//!
//! # Services Overview
//!
//! - [`ConnectionManager`]: the single active stream connection and its retry policy
//! - [`EmailStore`]: bounded, merge-aware cache of email records
//! - [`compute_visible`] and [`Debouncer`]: the list view and paint coalescing
//! - [`DetailLoader`]: the selected email, rendered through [`render_isolated`]
//! - [`NotificationService`]: toasts and the connection banner

mod detail;
mod notification_service;
mod render;
mod store;
mod transport;

pub use detail::{
    action_items_by_due_date, render_isolated, strip_active_content, strip_control_chars,
    DetailError, DetailLoader, DetailResult, DetailView, RenderedBody,
};
pub use notification_service::{
    Notification, NotificationCategory, NotificationError, NotificationResult,
    NotificationService, NotificationSettings, Severity,
};
pub use render::{
    compare_for_display, compute_visible, ActionFilter, CategoryFilter, Debouncer, Filters,
    ListEntry, PriorityFilter,
};
pub use store::{EmailStore, MergeOutcome};
pub use transport::{
    ConnectionManager, ConnectionState, EventStream, HttpConnector, ReconnectPolicy,
    StreamConnector, Termination, TransportError, TransportEvent, TransportResult,
};
