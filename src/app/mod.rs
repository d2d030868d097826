//! Page state and control flow.
//!
//! - [`PageState`]: everything the page shows, owned by the controller
//! - [`PageController`]: the single task that applies stream events and commands
//! - [`Command`]: what callers can ask the controller to do

pub mod commands;
pub mod controller;
pub mod state;

pub use commands::{Command, CommandError, FilterChange};
pub use controller::PageController;
pub use state::PageState;
