//! # quorum-core
//!
//! Foundation types for the Quorum orchestration engine.
//!
//! This crate provides the shared vocabulary that all other Quorum crates
//! depend on:
//!
//! - **Branded IDs**: [`ids::RequestId`], [`ids::BranchId`] as newtypes
//! - **Requests**: [`request::Request`] (immutable after intake) and
//!   [`request::NormalizedRequest`] (persona-enriched)
//! - **Route plans**: [`route::RouteDecision`], [`route::CandidateTuple`],
//!   [`route::Budget`]
//! - **Branches**: [`branch::BranchExecution`] state machine and the
//!   exactly-once [`branch::OrchestrationResult`]
//! - **Errors**: the closed [`errors::ErrorKind`] taxonomy and
//!   [`errors::EngineError`] via `thiserror`
//! - **Events**: [`events::ExecuteEvent`] for the streaming wire surface
//! - **Retry**: [`retry::RetryConfig`] and backoff calculation
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other quorum crates.

#![deny(unsafe_code)]

pub mod branch;
pub mod errors;
pub mod events;
pub mod ids;
pub mod request;
pub mod retry;
pub mod route;
