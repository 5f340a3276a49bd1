//! `Taskdeck`: offline-first task list client library.
//!
//! Local changes land in a [`store::LocalStore`] first and are forwarded to
//! a [`remote::RemoteTaskService`] by the [`sync::SyncEngine`], which keeps
//! the two in agreement through revisions and full-list reconciliation.

pub mod config;
pub mod remote;
pub mod store;
pub mod sync;
