//! The process-wide provider registry.
//!
//! Built once at startup from the model manifest plus one adapter per
//! configured provider. Read-only afterwards: concurrent lookups share the
//! same `Arc`ed adapters. The only runtime state is the per-provider
//! concurrency semaphore and the adapters' own counters.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info};

use crate::adapter::ProviderAdapter;
use crate::error::{ProviderError, ProviderResult};
use crate::manifest::{ModelEntry, ModelManifest};

/// Default concurrent upstream calls per provider.
pub const DEFAULT_PROVIDER_CONCURRENCY: usize = 4;

/// Catalog of adapters plus the canonical model manifest.
pub struct ProviderRegistry {
    manifest: Arc<ModelManifest>,
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    semaphores: HashMap<String, Arc<Semaphore>>,
}

/// Builder collecting adapters before the registry is frozen.
pub struct ProviderRegistryBuilder {
    manifest: Arc<ModelManifest>,
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    concurrency: usize,
}

impl ProviderRegistryBuilder {
    /// Register an adapter under its own `provider_id`.
    #[must_use]
    pub fn adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        let _ = self
            .adapters
            .insert(adapter.provider_id().to_string(), adapter);
        self
    }

    /// Override the per-provider concurrency cap.
    #[must_use]
    pub fn concurrency(mut self, permits: usize) -> Self {
        self.concurrency = permits.max(1);
        self
    }

    /// Freeze into an immutable registry.
    #[must_use]
    pub fn build(self) -> ProviderRegistry {
        let semaphores = self
            .adapters
            .keys()
            .map(|id| (id.clone(), Arc::new(Semaphore::new(self.concurrency))))
            .collect();
        info!(
            providers = self.adapters.len(),
            models = self.manifest.entries.len(),
            concurrency = self.concurrency,
            "provider registry initialized"
        );
        ProviderRegistry {
            manifest: self.manifest,
            adapters: self.adapters,
            semaphores,
        }
    }
}

impl ProviderRegistry {
    /// Start building a registry over a manifest.
    #[must_use]
    pub fn builder(manifest: Arc<ModelManifest>) -> ProviderRegistryBuilder {
        ProviderRegistryBuilder {
            manifest,
            adapters: HashMap::new(),
            concurrency: DEFAULT_PROVIDER_CONCURRENCY,
        }
    }

    /// The manifest this registry validates against.
    #[must_use]
    pub fn manifest(&self) -> &Arc<ModelManifest> {
        &self.manifest
    }

    /// Resolve `(provider_id, model_id)` to an adapter and the canonical
    /// model ID. Aliases auto-correct; anything unmappable is
    /// `INVALID_MODEL`.
    pub fn resolve(
        &self,
        provider_id: &str,
        model_id: &str,
    ) -> ProviderResult<(Arc<dyn ProviderAdapter>, String)> {
        let entry = self.manifest.resolve(provider_id, model_id)?;
        let adapter = self.adapters.get(provider_id).ok_or_else(|| {
            ProviderError::InvalidModel {
                model_id: format!("{provider_id}/{model_id} (provider not configured)"),
            }
        })?;
        if entry.model_id != model_id {
            debug!(
                requested = model_id,
                canonical = %entry.model_id,
                "auto-corrected legacy model id"
            );
        }
        Ok((Arc::clone(adapter), entry.model_id.clone()))
    }

    /// Deterministic alias repair. `None` when unmappable.
    #[must_use]
    pub fn canonicalize(&self, model_id: &str) -> Option<&str> {
        self.manifest.canonicalize(model_id)
    }

    /// `(provider, model)` pairs capable of every tag, restricted to
    /// providers that actually have an adapter configured. Manifest order.
    #[must_use]
    pub fn list_capable(&self, tags: &[&str]) -> Vec<&ModelEntry> {
        self.manifest
            .list_capable(tags)
            .into_iter()
            .filter(|e| self.adapters.contains_key(&e.provider_id))
            .collect()
    }

    /// Acquire a concurrency permit for a provider. Suspends when the
    /// provider is at its cap.
    pub async fn acquire(&self, provider_id: &str) -> ProviderResult<OwnedSemaphorePermit> {
        let semaphore = self.semaphores.get(provider_id).ok_or_else(|| {
            ProviderError::InvalidModel {
                model_id: format!("{provider_id} (provider not configured)"),
            }
        })?;
        Arc::clone(semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ProviderError::Cancelled)
    }

    /// Configured provider IDs.
    #[must_use]
    pub fn provider_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.adapters.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Whether the registry has at least one usable provider.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        !self.adapters.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{GenerateCall, ProviderEventStream};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct StubAdapter {
        id: &'static str,
    }

    #[async_trait]
    impl ProviderAdapter for StubAdapter {
        fn provider_id(&self) -> &str {
            self.id
        }

        fn count_tokens(&self, text: &str, _model_id: &str) -> u64 {
            text.len() as u64 / 4
        }

        fn cost_usd(&self, _model_id: &str, _tokens_in: u64, _tokens_out: u64) -> f64 {
            0.0
        }

        async fn open_stream(&self, _call: &GenerateCall) -> ProviderResult<ProviderEventStream> {
            let events: Vec<ProviderResult<crate::adapter::ProviderEvent>> = Vec::new();
            Ok(Box::pin(tokio_stream::iter(events)))
        }
    }

    fn registry() -> ProviderRegistry {
        ProviderRegistry::builder(Arc::new(ModelManifest::builtin()))
            .adapter(Arc::new(StubAdapter { id: "anthropic" }))
            .adapter(Arc::new(StubAdapter { id: "openai" }))
            .concurrency(2)
            .build()
    }

    // ── Resolution ──────────────────────────────────────────────────────

    #[test]
    fn resolve_canonical_model() {
        let reg = registry();
        let (adapter, canonical) = reg.resolve("anthropic", "claude-sonnet-4-5").unwrap();
        assert_eq!(adapter.provider_id(), "anthropic");
        assert_eq!(canonical, "claude-sonnet-4-5");
    }

    #[test]
    fn resolve_auto_corrects_alias() {
        let reg = registry();
        let (_, canonical) = reg.resolve("openai", "gpt-4o").unwrap();
        assert_eq!(canonical, "gpt-5.2");
    }

    #[test]
    fn resolve_unknown_model_fails() {
        let reg = registry();
        let err = reg.resolve("anthropic", "claude-bananas").unwrap_err();
        assert_eq!(err.kind(), quorum_core::errors::ErrorKind::InvalidModel);
    }

    #[test]
    fn resolve_unconfigured_provider_fails() {
        let reg = ProviderRegistry::builder(Arc::new(ModelManifest::builtin()))
            .adapter(Arc::new(StubAdapter { id: "openai" }))
            .build();
        let err = reg.resolve("anthropic", "claude-sonnet-4-5").unwrap_err();
        assert_eq!(err.kind(), quorum_core::errors::ErrorKind::InvalidModel);
    }

    // ── Capability listing ──────────────────────────────────────────────

    #[test]
    fn list_capable_filters_unconfigured_providers() {
        let reg = ProviderRegistry::builder(Arc::new(ModelManifest::builtin()))
            .adapter(Arc::new(StubAdapter { id: "anthropic" }))
            .build();
        for entry in reg.list_capable(&["code_generation"]) {
            assert_eq!(entry.provider_id, "anthropic");
        }
    }

    // ── Concurrency permits ─────────────────────────────────────────────

    #[tokio::test]
    async fn permits_cap_concurrency() {
        let reg = registry(); // concurrency = 2
        let p1 = reg.acquire("anthropic").await.unwrap();
        let _p2 = reg.acquire("anthropic").await.unwrap();

        // Third acquire must block until a permit is dropped.
        let third = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            reg.acquire("anthropic"),
        )
        .await;
        assert!(third.is_err(), "third permit should not be available");

        drop(p1);
        let p3 = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            reg.acquire("anthropic"),
        )
        .await;
        assert!(p3.is_ok());
    }

    #[tokio::test]
    async fn permits_are_per_provider() {
        let reg = registry();
        let _a1 = reg.acquire("anthropic").await.unwrap();
        let _a2 = reg.acquire("anthropic").await.unwrap();
        // anthropic is saturated; openai still has permits.
        let p = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            reg.acquire("openai"),
        )
        .await;
        assert!(p.is_ok());
    }

    #[tokio::test]
    async fn acquire_unknown_provider_fails() {
        let reg = registry();
        let err = reg.acquire("acme").await.unwrap_err();
        assert_eq!(err.kind(), quorum_core::errors::ErrorKind::InvalidModel);
    }

    #[test]
    fn health_requires_an_adapter() {
        assert!(registry().is_healthy());
        let empty = ProviderRegistry::builder(Arc::new(ModelManifest::builtin())).build();
        assert!(!empty.is_healthy());
    }
}
