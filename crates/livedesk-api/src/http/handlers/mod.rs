//! HTTP request handlers for the REST API and the live chat socket.

pub mod health;
pub mod session;
pub mod ws;
