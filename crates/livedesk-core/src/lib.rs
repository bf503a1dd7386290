//! Live chat coordination and repository trait definitions for Livedesk.
//!
//! This crate defines the "ports" (repository and directory traits) that the
//! infrastructure layer implements. It depends only on `livedesk-types` --
//! never on `livedesk-infra` or any database/IO crate.

pub mod chat;
pub mod coordinator;
pub mod directory;
pub mod event;
pub mod presence;
