//! Removal engine implementations
//!
//! - Command engine (delegates to an external remover process)
//! - Scripted engine (replays a fixed script; tests and `--simulate`)

pub mod command;
pub mod scripted;

pub use self::command::CommandEngine;
pub use self::scripted::{EngineCall, ScriptedEngine};
