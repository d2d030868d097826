//! Terminal user interface.
//!
//! - `painter`: the [`ListPainter`] trait and a plain-text [`TerminalPainter`]

pub mod painter;

pub use painter::{ListPainter, PageView, TerminalPainter};
