//! Live chat sessions: the store port, the per-session state machine, and an
//! in-memory store.
//!
//! This module defines the `ChatRepository` trait that the infrastructure
//! layer implements for session and transcript persistence.

pub mod memory;
pub mod repository;
pub mod session;

pub use memory::InMemoryChatRepository;
pub use repository::ChatRepository;
pub use session::{LiveSession, TransitionError};
