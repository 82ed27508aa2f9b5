//! Warden - supervisor for long-lived CLI assistant subprocesses
//!
//! Warden manages a fixed set of named worker instances, each wrapping a
//! CLI subprocess spoken to over stdio: validated spawns, crash detection
//! with bounded exponential-backoff restarts, lazy spawn-on-send, and a
//! typed event bus for lifecycle and output events.

pub mod bus;
pub mod config;
pub mod discovery;
pub mod error;
pub mod instance;
pub mod locks;
pub mod policy;
pub mod supervisor;
pub mod validate;

pub use error::{Result, WardenError};
