//! # btrpa-server
//!
//! Host process library for btrpa.
//!
//! This library provides the API handlers, startup wiring, logging setup
//! and state management used by the `btrpa-server` binary.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod host;
pub mod logging;
pub mod state;
