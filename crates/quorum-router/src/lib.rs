//! # quorum-router
//!
//! The front edge of the routing decision: normalize a raw request into a
//! persona-enriched one, score it, and produce the full
//! [`quorum_core::route::RouteDecision`] the engine executes.
//!
//! - **Persona validator**: [`persona::validate`] — verb mapping, keyword
//!   scoring, idempotent prompt enhancement
//! - **Complexity scoring**: [`complexity::score`] — stable buckets from
//!   prompt shape, keywords, and attachments
//! - **Context detection**: [`context::detect`] — keyword groups with
//!   architecture/security tie-breaks
//! - **Router**: [`router::Router`] — strategy table, candidate selection
//!   with diversification, budget derivation
//!
//! Everything here is pure and deterministic: the same input yields the
//! same decision for a fixed manifest and configuration.
//!
//! ## Crate Position
//!
//! Depends on: quorum-core, quorum-providers. Depended on by:
//! quorum-engine, quorum-server.

#![deny(unsafe_code)]

pub mod complexity;
pub mod context;
pub mod keywords;
pub mod persona;
pub mod router;

pub use persona::{PersonaResolution, validate};
pub use router::{Router, RouterConfig, RouterError};
