#![deny(clippy::all)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! Network diagnostics server.
//!
//! Clients open a WebSocket, send `command` frames naming a diagnostic tool
//! (`ping`, `traceroute`, `nslookup`) and receive the tool's output as it is
//! produced. Every connection owns its own set of running processes; a
//! `cancel` frame or a dropped connection kills them.

pub mod app;
pub mod common;
pub mod domain;
pub mod infra;
pub mod usecases;

pub use app::Application;

#[cfg(test)]
pub(crate) mod test_support;
