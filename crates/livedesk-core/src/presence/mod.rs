//! Process-local presence bookkeeping.
//!
//! Tracks which connections are live, what role they play, and which session
//! (if any) they belong to. Nothing here is persisted.

pub mod registry;

pub use registry::{PresenceEntry, PresenceRegistry};
