//! # quorum-engine
//!
//! The execution core: runs a routed request to exactly one outcome.
//!
//! - **Compose**: [`compose::compose`] — pure prompt assembly from persona,
//!   role, task template, and user content with deterministic file
//!   truncation
//! - **Branch executor**: [`branch::run_branch`] — one candidate to a
//!   terminal [`quorum_core::branch::BranchExecution`], retries inside
//! - **Scoring**: [`scoring`] — the pure best-of-n scoring function and
//!   tie-breaks
//! - **Quantum executor**: [`quantum::QuantumExecutor`] — speculative
//!   fan-out with collapse rules and loser cancellation
//! - **Coordinator**: [`coordinator::Coordinator`] — single / sequential /
//!   parallel / quantum / hybrid strategy composition
//! - **Pipeline**: [`pipeline::RequestPipeline`] — intake → persona →
//!   route → orchestrate → respond, exactly once
//!
//! ## Crate Position
//!
//! Aggregation layer. Depends on: quorum-core, quorum-providers,
//! quorum-router. Depended on by: quorum-server.

#![deny(unsafe_code)]

pub mod branch;
pub mod compose;
pub mod config;
pub mod coordinator;
pub mod pipeline;
pub mod quantum;
pub mod scoring;
pub mod sink;

pub use config::EngineConfig;
pub use coordinator::Coordinator;
pub use pipeline::RequestPipeline;
pub use quantum::QuantumExecutor;
pub use sink::{ChannelSink, CollectingSink, EventSink, NullSink};
