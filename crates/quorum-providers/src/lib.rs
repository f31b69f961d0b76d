//! # quorum-providers
//!
//! The provider layer: a uniform [`adapter::ProviderAdapter`] contract over
//! upstream model APIs, concrete HTTP adapters, and the process-wide
//! [`registry::ProviderRegistry`] backed by the canonical
//! [`manifest::ModelManifest`].
//!
//! - **Adapter contract**: [`adapter::ProviderAdapter`] with streaming
//!   generation, token counting, and classified errors
//! - **Adapters**: [`anthropic::AnthropicAdapter`] (`/v1/messages`, SSE) and
//!   [`openai::OpenAiAdapter`] (`/v1/chat/completions`, SSE)
//! - **Manifest**: canonical `(provider, model)` catalog with aliases,
//!   context windows, pricing, and capabilities
//! - **Registry**: resolve/canonicalize/list plus per-provider concurrency
//!   permits
//!
//! ## Crate Position
//!
//! Depends on: quorum-core. Depended on by: quorum-router, quorum-engine,
//! quorum-server.

#![deny(unsafe_code)]

pub mod adapter;
pub mod anthropic;
pub mod error;
pub mod manifest;
pub mod openai;
pub mod registry;
pub mod stats;
pub mod tokens;

pub use adapter::{DeltaSink, GenerateCall, Generation, ProviderAdapter, ProviderEvent};
pub use error::{ProviderError, ProviderResult};
pub use manifest::{ModelEntry, ModelManifest, ModelPricing};
pub use registry::ProviderRegistry;
