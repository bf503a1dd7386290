//! Event fan-out for the live chat channel.
//!
//! Provides an `EventRouter` that delivers `ServerEvent`s to single
//! connections, to session topics, and to the agent broadcast group.

pub mod router;

pub use router::{EventRouter, Target};
