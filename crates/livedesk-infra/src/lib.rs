//! Infrastructure layer for Livedesk.
//!
//! Contains implementations of the ports defined in `livedesk-core`: the
//! SQLite session store and user directory, plus config loading and data
//! directory resolution.

pub mod config;
pub mod filesystem;
pub mod sqlite;
