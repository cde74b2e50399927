//! Capability registry
//!
//! Static catalog of providers and the capabilities they advertise. Every
//! provider is validated and its configuration decoded once, at boot.

pub mod capability;
pub mod catalog;
pub mod provider;
pub mod schema;

pub use capability::{CapabilityDefinition, Category};
pub use catalog::{CapabilityRegistry, RegisteredCapability};
pub use provider::{Provider, ProviderBuilder};
pub use schema::{
    ConfigValue, DecodeError, DecodeReason, DecodedConfig, FieldKind, Schema, SchemaField,
};
