//! Engine-wide configuration shared by every chain and node context.

use crate::components::ComponentRegistry;
use crate::dsl::{DslParser, JsonParser};
use std::sync::Arc;

/// Free-form configuration block attached to chains and nodes in the DSL.
pub type Configuration = serde_json::Map<String, serde_json::Value>;

/// Shared engine configuration: component registry, DSL parser and the
/// optional key used to decrypt chain secrets.
///
/// Cheap to clone; every chain, node and flow context carries one.
#[derive(Clone)]
pub struct EngineConfig {
    pub registry: Arc<ComponentRegistry>,
    pub parser: Arc<dyn DslParser>,
    pub secret_key: Option<String>,
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_secret_key(mut self, key: impl Into<String>) -> Self {
        self.secret_key = Some(key.into());
        self
    }

    pub fn with_registry(mut self, registry: Arc<ComponentRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_parser(mut self, parser: Arc<dyn DslParser>) -> Self {
        self.parser = parser;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            registry: Arc::new(ComponentRegistry::with_builtins()),
            parser: Arc::new(JsonParser),
            secret_key: None,
        }
    }
}
