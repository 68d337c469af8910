//! Core domain + application logic for the Telegram keyword monitor.
//!
//! This crate is intentionally framework-agnostic. Telegram, the backend HTTP API
//! and the log store live behind ports (traits) implemented in adapter crates.

pub mod backend;
pub mod classifier;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod errors;
pub mod formatting;
pub mod identity;
pub mod logging;
pub mod messaging;
pub mod monitor;
pub mod retry;
pub mod rules;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
