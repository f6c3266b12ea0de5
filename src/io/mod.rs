//! Typed payloads carried over the app-server connection.
//!
//! - [`ThreadItem`] and its per-kind structs describe turn activity
//! - [`ThreadConfig`], [`TurnOverrides`] and [`Setting`] describe thread
//!   and turn settings
//! - [`ConversationStep`] and [`ChatResult`] are what turn streams yield

mod items;
mod options;
mod steps;

pub use items::*;
pub use options::*;
pub use steps::*;
