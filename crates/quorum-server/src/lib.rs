//! # quorum-server
//!
//! The HTTP surface over the engine:
//!
//! - `POST /v1/execute` — buffered JSON or NDJSON streaming per the
//!   request's `constraints.stream`
//! - `GET /health` — component health
//! - `GET /metrics` — Prometheus text format
//!
//! Error responses use the typed envelope
//! `{"error":{kind,message,retryable}}` with the engine's status mapping.
//!
//! ## Crate Position
//!
//! Depends on: quorum-core, quorum-providers, quorum-router, quorum-engine.
//! Depended on by: quorumd.

#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod health;
pub mod routes;
pub mod server;

pub use config::ServerConfig;
pub use server::{AppState, QuorumServer};
