#![deny(unsafe_code)]

//! Terminal front end for the KTR chat client.
//!
//! The controller in `ktr-chat` owns every rule; this crate only parses commands,
//! prints sessions and streams replies as they grow.

pub mod command;
pub mod render;
pub mod repl;
pub mod terminal;

pub use repl::{ChatRepl, ReplError};
