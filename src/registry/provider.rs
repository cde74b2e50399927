//! Providers: named sources of one or more capabilities

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Map, Value};

use super::capability::{CapabilityDefinition, Category};
use super::schema::{DecodedConfig, Schema, SchemaField};
use crate::config::ProviderConfig;
use crate::rpc::{PluginMetadata, PluginService, StaticPluginService};
use crate::{Error, Result};

/// A statically registered provider
///
/// Built once at boot through [`ProviderBuilder`], which validates the
/// capability schemas and decodes the provider's configuration.
#[derive(Clone)]
pub struct Provider {
    pub id: String,
    pub name: String,
    pub description: String,
    pub version: String,
    pub capabilities: Vec<CapabilityDefinition>,
    config: DecodedConfig,
    service: Option<Arc<dyn PluginService>>,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("version", &self.version)
            .field("capabilities", &self.capability_ids())
            .field("config", &self.config)
            .field("self_hosted", &self.is_self_hosted())
            .finish()
    }
}

impl Provider {
    /// Start building a provider
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> ProviderBuilder {
        ProviderBuilder {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            capabilities: Vec::new(),
            raw_config: Map::new(),
            service: None,
            self_hosted: false,
        }
    }

    /// Build a provider from its configuration entry
    ///
    /// # Errors
    ///
    /// Returns error if a schema is malformed or the config fails to decode
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let mut builder = Self::builder(&config.id, &config.name)
            .description(config.description.clone().unwrap_or_default())
            .config(config.config.clone());
        if let Some(version) = &config.version {
            builder = builder.version(version);
        }
        for capability in &config.capabilities {
            builder = builder.capability(capability.clone());
        }
        if config.self_hosted {
            builder = builder.self_hosted();
        }
        builder.build()
    }

    /// Decoded, typed configuration
    #[must_use]
    pub const fn config(&self) -> &DecodedConfig {
        &self.config
    }

    /// Self-hosted RPC entry point, if any
    #[must_use]
    pub fn service(&self) -> Option<Arc<dyn PluginService>> {
        self.service.clone()
    }

    #[must_use]
    pub const fn is_self_hosted(&self) -> bool {
        self.service.is_some()
    }

    #[must_use]
    pub fn capability_ids(&self) -> Vec<String> {
        self.capabilities.iter().map(|c| c.id.clone()).collect()
    }

    /// Distinct categories across all capabilities
    #[must_use]
    pub fn categories(&self) -> Vec<Category> {
        self.capabilities
            .iter()
            .map(|c| c.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    #[must_use]
    pub fn has_category(&self, category: &Category) -> bool {
        self.capabilities.iter().any(|c| &c.category == category)
    }

    /// Metadata this provider advertises over RPC
    #[must_use]
    pub fn metadata(&self) -> PluginMetadata {
        metadata_for(
            &self.id,
            &self.name,
            &self.description,
            &self.version,
            &self.capabilities,
        )
    }
}

fn metadata_for(
    id: &str,
    name: &str,
    description: &str,
    version: &str,
    capabilities: &[CapabilityDefinition],
) -> PluginMetadata {
    PluginMetadata {
        id: id.to_string(),
        name: name.to_string(),
        plugin_type: capabilities
            .first()
            .map_or_else(|| Category::Utility.to_string(), |c| c.category.to_string()),
        description: description.to_string(),
        version: version.to_string(),
        capabilities: capabilities.iter().map(|c| c.id.clone()).collect(),
    }
}

/// Builder for [`Provider`]
pub struct ProviderBuilder {
    id: String,
    name: String,
    description: String,
    version: String,
    capabilities: Vec<CapabilityDefinition>,
    raw_config: Map<String, Value>,
    service: Option<Arc<dyn PluginService>>,
    self_hosted: bool,
}

impl ProviderBuilder {
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    #[must_use]
    pub fn capability(mut self, capability: CapabilityDefinition) -> Self {
        self.capabilities.push(capability);
        self
    }

    /// Raw configuration, decoded against the capabilities' config schemas
    #[must_use]
    pub fn config(mut self, raw: Map<String, Value>) -> Self {
        self.raw_config = raw;
        self
    }

    /// Use a custom RPC entry point
    #[must_use]
    pub fn service(mut self, service: Arc<dyn PluginService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Serve the provider's own definition from a built-in RPC server
    #[must_use]
    pub const fn self_hosted(mut self) -> Self {
        self.self_hosted = true;
        self
    }

    /// Merge every capability's config schema into one
    fn merged_config_schema(&self) -> Result<Schema> {
        let mut fields: Vec<SchemaField> = Vec::new();
        for capability in &self.capabilities {
            for field in &capability.config_schema.fields {
                match fields.iter_mut().find(|f| f.name == field.name) {
                    Some(existing) if existing.kind != field.kind => {
                        return Err(Error::Schema(format!(
                            "provider '{}': config field '{}' declared with conflicting kinds",
                            self.id, field.name
                        )));
                    }
                    Some(existing) => existing.required |= field.required,
                    None => fields.push(field.clone()),
                }
            }
        }
        Ok(Schema::new(fields))
    }

    /// Validate and decode
    ///
    /// # Errors
    ///
    /// Returns error if the identity is empty, capabilities are malformed or
    /// duplicated, or the configuration does not match the schema
    pub fn build(self) -> Result<Provider> {
        if self.id.trim().is_empty() {
            return Err(Error::Schema("provider with empty id".to_string()));
        }

        let mut seen = BTreeSet::new();
        for capability in &self.capabilities {
            capability.validate()?;
            if !seen.insert(capability.id.as_str()) {
                return Err(Error::Schema(format!(
                    "provider '{}' declares capability '{}' twice",
                    self.id, capability.id
                )));
            }
        }

        let config = self
            .merged_config_schema()?
            .decode(&self.raw_config)
            .map_err(|source| Error::Decode {
                provider: self.id.clone(),
                source,
            })?;

        let service = match (self.service, self.self_hosted) {
            (Some(service), _) => Some(service),
            (None, true) => {
                let metadata = metadata_for(
                    &self.id,
                    &self.name,
                    &self.description,
                    &self.version,
                    &self.capabilities,
                );
                Some(Arc::new(StaticPluginService::new(metadata)) as Arc<dyn PluginService>)
            }
            (None, false) => None,
        };

        Ok(Provider {
            id: self.id,
            name: self.name,
            description: self.description,
            version: self.version,
            capabilities: self.capabilities,
            config,
            service,
        })
    }
}
