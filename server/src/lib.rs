//! # server
//!
//! Broadcast chat server: a hub that fans each accepted chat message out to
//! every connected websocket session, plus the Axum routing around it.

pub mod config;
pub mod hub;
pub mod routes;
pub mod session;
pub mod state;
