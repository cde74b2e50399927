//! Capability registry: provider identity to capabilities

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use super::capability::{CapabilityDefinition, Category};
use super::provider::Provider;
use crate::{Error, Result};

/// A capability together with the provider that implements it
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredCapability {
    pub provider_id: String,
    #[serde(flatten)]
    pub capability: CapabilityDefinition,
}

/// In-memory catalog of statically registered providers
#[derive(Debug, Default)]
pub struct CapabilityRegistry {
    providers: RwLock<BTreeMap<String, Arc<Provider>>>,
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its identity
    ///
    /// Several providers may share a category; identities must be unique.
    ///
    /// # Errors
    ///
    /// Returns `Error::Duplicate` if the identity is taken
    pub fn register(&self, provider: Provider) -> Result<Arc<Provider>> {
        let mut providers = self.providers.write();
        if providers.contains_key(&provider.id) {
            return Err(Error::Duplicate(provider.id));
        }

        tracing::info!(
            provider_id = %provider.id,
            capabilities = provider.capabilities.len(),
            self_hosted = provider.is_self_hosted(),
            "registered provider"
        );

        let provider = Arc::new(provider);
        providers.insert(provider.id.clone(), Arc::clone(&provider));
        Ok(provider)
    }

    /// Get a provider by identity
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown identity
    pub fn get(&self, id: &str) -> Result<Arc<Provider>> {
        self.providers
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.providers.read().contains_key(id)
    }

    /// All capabilities across providers, ordered by provider identity
    #[must_use]
    pub fn list_capabilities(&self) -> Vec<RegisteredCapability> {
        self.providers
            .read()
            .values()
            .flat_map(|p| {
                p.capabilities.iter().map(|c| RegisteredCapability {
                    provider_id: p.id.clone(),
                    capability: c.clone(),
                })
            })
            .collect()
    }

    /// All providers keyed by identity
    #[must_use]
    pub fn get_all_providers(&self) -> BTreeMap<String, Arc<Provider>> {
        self.providers.read().clone()
    }

    /// Providers with at least one capability in the category
    #[must_use]
    pub fn providers_by_category(&self, category: &Category) -> Vec<Arc<Provider>> {
        self.providers
            .read()
            .values()
            .filter(|p| p.has_category(category))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.providers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.providers.read().is_empty()
    }
}
