//! The canonical model manifest.
//!
//! A versioned, read-only catalog of `(provider, model)` pairs with
//! aliases, context windows, pricing, and capability tags. Loaded once at
//! startup — from disk when `--manifest` is given, otherwise from the
//! compiled-in default. Unknown model IDs are either auto-corrected through
//! the alias table or rejected.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ProviderError, ProviderResult};

/// Per-1k-token pricing for one model.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// USD per 1000 prompt tokens.
    pub input_per_1k_usd: f64,
    /// USD per 1000 completion tokens.
    pub output_per_1k_usd: f64,
}

/// One manifest entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelEntry {
    /// Owning provider.
    pub provider_id: String,
    /// Canonical model ID.
    pub model_id: String,
    /// Legacy IDs that canonicalize to this entry.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Context window in tokens.
    pub context_window: u64,
    /// Output ceiling in tokens.
    pub max_output_tokens: u64,
    /// Pricing.
    pub pricing: ModelPricing,
    /// Capability tags ("code_generation", "architecture", …).
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl ModelEntry {
    /// Whether this model advertises a capability tag.
    #[must_use]
    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.iter().any(|c| c == tag)
    }
}

/// The whole catalog. Immutable after load.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelManifest {
    /// Manifest schema version.
    pub version: u32,
    /// Entries in declaration order (ordering matters for candidate fill).
    pub entries: Vec<ModelEntry>,
    /// Alias → canonical index, built after load.
    #[serde(skip)]
    alias_index: HashMap<String, usize>,
    /// Canonical ID → index, built after load.
    #[serde(skip)]
    canonical_index: HashMap<String, usize>,
}

impl ModelManifest {
    /// Parse a manifest from JSON and build lookup indexes.
    pub fn from_json(json: &str) -> ProviderResult<Self> {
        let mut manifest: ModelManifest = serde_json::from_str(json)?;
        manifest.build_indexes();
        Ok(manifest)
    }

    /// Load a manifest from a file path.
    pub fn from_file(path: &Path) -> ProviderResult<Self> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ProviderError::Unknown(format!("manifest read failed: {e}")))?;
        Self::from_json(&json)
    }

    /// The compiled-in default catalog.
    #[must_use]
    pub fn builtin() -> Self {
        Self::from_json(include_str!("default_manifest.json"))
            .expect("builtin manifest is valid")
    }

    fn build_indexes(&mut self) {
        for (idx, entry) in self.entries.iter().enumerate() {
            let _ = self
                .canonical_index
                .insert(entry.model_id.clone(), idx);
            for alias in &entry.aliases {
                let _ = self.alias_index.insert(alias.clone(), idx);
            }
        }
    }

    /// Deterministically map a model ID to its canonical form.
    ///
    /// Canonical IDs map to themselves; known aliases map to their entry;
    /// anything else is `None`.
    #[must_use]
    pub fn canonicalize(&self, model_id: &str) -> Option<&str> {
        self.find(model_id).map(|e| e.model_id.as_str())
    }

    /// Look up an entry by canonical ID or alias.
    #[must_use]
    pub fn find(&self, model_id: &str) -> Option<&ModelEntry> {
        self.canonical_index
            .get(model_id)
            .or_else(|| self.alias_index.get(model_id))
            .map(|&idx| &self.entries[idx])
    }

    /// Look up an entry, requiring it to belong to `provider_id`.
    pub fn resolve(&self, provider_id: &str, model_id: &str) -> ProviderResult<&ModelEntry> {
        match self.find(model_id) {
            Some(entry) if entry.provider_id == provider_id => Ok(entry),
            _ => Err(ProviderError::InvalidModel {
                model_id: format!("{provider_id}/{model_id}"),
            }),
        }
    }

    /// Models advertising every one of `tags`, in manifest order.
    #[must_use]
    pub fn list_capable(&self, tags: &[&str]) -> Vec<&ModelEntry> {
        self.entries
            .iter()
            .filter(|e| tags.iter().all(|t| e.has_capability(t)))
            .collect()
    }

    /// Distinct provider IDs, in first-appearance order.
    #[must_use]
    pub fn provider_ids(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for entry in &self.entries {
            if !seen.contains(&entry.provider_id.as_str()) {
                seen.push(entry.provider_id.as_str());
            }
        }
        seen
    }

    /// Predicted cost in USD for a call. Pure.
    #[must_use]
    pub fn estimate_cost(&self, model_id: &str, tokens_in: u64, tokens_out: u64) -> Option<f64> {
        let entry = self.find(model_id)?;
        let input = (tokens_in as f64 / 1000.0) * entry.pricing.input_per_1k_usd;
        let output = (tokens_out as f64 / 1000.0) * entry.pricing.output_per_1k_usd;
        Some(input + output)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn manifest() -> ModelManifest {
        ModelManifest::builtin()
    }

    // ── Builtin catalog ─────────────────────────────────────────────────

    #[test]
    fn builtin_parses_and_is_nonempty() {
        let m = manifest();
        assert!(m.version >= 1);
        assert!(m.entries.len() >= 4);
    }

    #[test]
    fn builtin_has_both_providers() {
        let m = manifest();
        let providers = m.provider_ids();
        assert!(providers.contains(&"anthropic"));
        assert!(providers.contains(&"openai"));
    }

    #[test]
    fn builtin_pricing_is_positive() {
        for entry in &manifest().entries {
            assert!(entry.pricing.input_per_1k_usd > 0.0, "{}", entry.model_id);
            assert!(entry.pricing.output_per_1k_usd > 0.0, "{}", entry.model_id);
            assert!(entry.context_window > 0);
            assert!(entry.max_output_tokens > 0);
        }
    }

    // ── Canonicalization ────────────────────────────────────────────────

    #[test]
    fn canonical_id_maps_to_itself() {
        let m = manifest();
        assert_eq!(
            m.canonicalize("claude-sonnet-4-5"),
            Some("claude-sonnet-4-5")
        );
    }

    #[test]
    fn legacy_alias_auto_corrects() {
        let m = manifest();
        assert_eq!(
            m.canonicalize("claude-3-5-sonnet"),
            Some("claude-sonnet-4-5")
        );
        assert_eq!(m.canonicalize("gpt-4o"), Some("gpt-5.2"));
    }

    #[test]
    fn unknown_model_not_canonicalized() {
        assert_eq!(manifest().canonicalize("llama-story-teller"), None);
    }

    #[test]
    fn canonicalize_is_deterministic() {
        let m = manifest();
        for _ in 0..3 {
            assert_eq!(
                m.canonicalize("claude-3-5-sonnet"),
                Some("claude-sonnet-4-5")
            );
        }
    }

    // ── Resolution ──────────────────────────────────────────────────────

    #[test]
    fn resolve_checks_provider_ownership() {
        let m = manifest();
        assert!(m.resolve("anthropic", "claude-sonnet-4-5").is_ok());
        let err = m.resolve("openai", "claude-sonnet-4-5").unwrap_err();
        assert_eq!(err.kind(), quorum_core::errors::ErrorKind::InvalidModel);
    }

    #[test]
    fn resolve_accepts_alias() {
        let m = manifest();
        let entry = m.resolve("anthropic", "claude-3-5-sonnet").unwrap();
        assert_eq!(entry.model_id, "claude-sonnet-4-5");
    }

    // ── Capability listing ──────────────────────────────────────────────

    #[test]
    fn list_capable_filters_by_all_tags() {
        let m = manifest();
        let capable = m.list_capable(&["code_generation"]);
        assert!(!capable.is_empty());
        for entry in capable {
            assert!(entry.has_capability("code_generation"));
        }
    }

    #[test]
    fn list_capable_preserves_manifest_order() {
        let m = manifest();
        let capable = m.list_capable(&[]);
        let ids: Vec<_> = capable.iter().map(|e| e.model_id.as_str()).collect();
        let all: Vec<_> = m.entries.iter().map(|e| e.model_id.as_str()).collect();
        assert_eq!(ids, all);
    }

    // ── Cost estimation ─────────────────────────────────────────────────

    #[test]
    fn estimate_cost_uses_per_1k_pricing() {
        let m = manifest();
        let entry = m.find("claude-sonnet-4-5").unwrap();
        let cost = m.estimate_cost("claude-sonnet-4-5", 1000, 1000).unwrap();
        let expected = entry.pricing.input_per_1k_usd + entry.pricing.output_per_1k_usd;
        assert!((cost - expected).abs() < 1e-12);
    }

    #[test]
    fn estimate_cost_unknown_model_is_none() {
        assert!(manifest().estimate_cost("nope", 1000, 1000).is_none());
    }

    // ── File loading ────────────────────────────────────────────────────

    #[test]
    fn from_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.json");
        std::fs::write(&path, include_str!("default_manifest.json")).unwrap();
        let m = ModelManifest::from_file(&path).unwrap();
        assert_eq!(m.entries.len(), ModelManifest::builtin().entries.len());
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(ModelManifest::from_json("{\"version\":").is_err());
    }
}
