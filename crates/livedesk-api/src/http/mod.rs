//! HTTP layer for Livedesk.
//!
//! Axum router with the live chat WebSocket at `/ws/chat`, read-only session
//! history under `/api/v1/`, envelope responses, and CORS support.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;
