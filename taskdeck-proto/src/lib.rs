//! Shared data model and encodings for Taskdeck.
//!
//! - [`task`]: the task record and its sync equality.
//! - [`wire`]: JSON shapes exchanged with the task server.
//! - [`codec`]: local file formats (JSON and tabular).

pub mod codec;
pub mod task;
pub mod wire;
