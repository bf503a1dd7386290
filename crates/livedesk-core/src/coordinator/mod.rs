//! Session coordination: the live chat state machine and the task that owns it.

pub mod actor;
pub mod service;

pub use actor::{spawn_coordinator, CoordinatorCommand, CoordinatorHandle};
pub use service::{RecoveryReport, SessionCoordinator};
