//! Dashboard and control client for the SCASH miner manager.
//!
//! The manager backend supervises the miner process and exposes a small
//! JSON API. This crate polls that API, reconciles what it reports into
//! display state, and sends control commands (setup, start, stop, reset).
//! Deciding *what* to show is kept pure and separate from the terminal
//! renderer that draws it.

pub mod api_client;
pub mod commands;
pub mod config;
pub mod error;
pub mod render;
pub mod session;
pub mod setup;
pub mod sync;
pub mod tracing;
pub mod view;

#[cfg(test)]
pub(crate) mod test_support;
