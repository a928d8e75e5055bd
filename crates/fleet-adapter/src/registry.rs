//! Startup-resolved adapter registry
//!
//! All provider adapters are constructed once and looked up by provider id;
//! no dispatch site ever branches on provider identity.

use crate::adapter::{HostedProviderAdapter, ProviderAdapter};
use crate::definitions::{
    builtin_definitions, builtin_runtime_templates, ProviderInfo, RuntimeTemplate,
};
use crate::transport::{ProviderTransport, SimulatedTransport};

use fleet_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Registry mapping `provider_id -> Arc<dyn ProviderAdapter>`
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    templates: Vec<RuntimeTemplate>,
}

impl AdapterRegistry {
    /// Build the registry over the built-in provider catalog with the
    /// simulated local-mode transport
    pub fn new() -> Self {
        Self::with_transport(Arc::new(SimulatedTransport))
    }

    /// Build the registry with a custom transport (remote mode, tests)
    pub fn with_transport(transport: Arc<dyn ProviderTransport>) -> Self {
        let templates = builtin_runtime_templates();
        let mut adapters: HashMap<String, Arc<dyn ProviderAdapter>> = HashMap::new();
        for definition in builtin_definitions() {
            let id = definition.id.clone();
            let adapter = HostedProviderAdapter::new(
                definition,
                templates.clone(),
                Arc::clone(&transport),
            );
            adapters.insert(id, Arc::new(adapter));
        }
        Self { adapters, templates }
    }

    /// Look up an adapter by provider id
    pub fn get(&self, provider_id: &str) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(provider_id).cloned()
    }

    /// Look up an adapter, failing with a NotFound error
    pub fn require(&self, provider_id: &str) -> Result<Arc<dyn ProviderAdapter>> {
        self.get(provider_id)
            .ok_or_else(|| Error::not_found(format!("unknown provider: {}", provider_id)))
    }

    pub fn has_provider(&self, provider_id: &str) -> bool {
        self.adapters.contains_key(provider_id)
    }

    /// Public catalog of all registered providers
    pub fn list_providers(&self) -> Vec<ProviderInfo> {
        let mut infos: Vec<ProviderInfo> =
            self.adapters.values().map(|a| a.provider_info()).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// Runtime template catalog
    pub fn runtime_templates(&self) -> &[RuntimeTemplate] {
        &self.templates
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolves_all_builtin_providers() {
        let registry = AdapterRegistry::new();
        for id in [
            "kaggle",
            "colab",
            "aws",
            "azure",
            "gcp",
            "runpod",
            "lambdalabs",
            "vastai",
            "selfhosted",
        ] {
            assert!(registry.has_provider(id), "missing adapter for {}", id);
            assert!(registry.get(id).is_some());
        }
        assert!(!registry.has_provider("nonexistent"));
        assert!(registry.require("nonexistent").is_err());
    }

    #[test]
    fn test_list_providers_sorted_and_complete() {
        let registry = AdapterRegistry::new();
        let providers = registry.list_providers();
        assert_eq!(providers.len(), 9);
        let ids: Vec<&str> = providers.iter().map(|p| p.id.as_str()).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_adapter_advertises_catalogs() {
        let registry = AdapterRegistry::new();
        let aws = registry.get("aws").unwrap();
        assert!(aws.list_regions().contains(&"us-east-1".to_string()));
        assert!(aws.list_gpu_types().contains(&"H100".to_string()));
        assert_eq!(registry.runtime_templates().len(), 4);
    }
}
