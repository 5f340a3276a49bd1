//! `Taskdeck` list server library.
//!
//! Exposes the reference list server for use in tests and embedding. The
//! server keeps one revisioned task list in memory and serves it over the
//! HTTP list API.

pub mod config;
pub mod server;
pub mod store;
