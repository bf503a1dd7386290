//! Shared domain types for Livedesk.
//!
//! This crate contains the core domain types of the live chat coordinator:
//! sessions and transcripts, connection identities, channel events, errors,
//! and configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod chat;
pub mod config;
pub mod error;
pub mod event;
pub mod identity;
