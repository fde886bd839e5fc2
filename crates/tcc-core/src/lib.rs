//! Core domain + application logic for the Telegram channel cloner.
//!
//! This crate is framework-agnostic. The MTProto user-account client and the
//! Bot API front-end live behind ports (traits) implemented in adapter crates.

pub mod auth;
pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod formatting;
pub mod link;
pub mod logging;
pub mod messaging;
pub mod pool;
pub mod ports;
pub mod registry;
pub mod report;
pub mod security;
pub mod slots;
pub mod store;

#[cfg(test)]
mod testing;

pub use errors::{Error, Result};
