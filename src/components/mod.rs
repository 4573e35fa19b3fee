//! Message-processing components and their registry.
//!
//! A component is the behavior behind a node: it receives a message and
//! decides which relation label to forward it on, if any. Components are
//! registered as prototypes; each node gets its own instance, created
//! and initialized from the node's configuration at chain build time.

pub mod builtin;

use crate::config::{Configuration, EngineConfig};
use crate::error::ChainError;
use crate::flow::FlowContext;
use crate::message::Message;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

pub use builtin::{LogComponent, MetadataTransform, MsgTypeFilter, NullComponent};

/// Outcome of a component handling a message.
#[derive(Debug)]
pub enum Handled {
    /// Forward the message to the successors of the given relation label.
    Forward(Message, String),
    /// The message does not leave this node.
    Consumed,
}

/// A message-processing behavior instantiable from a node definition.
#[async_trait]
pub trait Component: Send + Sync + std::fmt::Debug {
    /// Registry key, e.g. `"msgTypeFilter"`.
    fn type_name(&self) -> &str;

    /// Fresh, unconfigured instance of this component type.
    fn create(&self) -> Box<dyn Component>;

    /// Applies node configuration. Runs once before the node goes live.
    fn init(&mut self, _config: &EngineConfig, _settings: &Configuration) -> Result<()> {
        Ok(())
    }

    async fn handle(&self, ctx: &FlowContext, msg: Message) -> Result<Handled>;

    /// Releases held resources. The node will not be invoked again.
    fn destroy(&self) {}
}

/// Prototype registry mapping component type names to factories.
#[derive(Default)]
pub struct ComponentRegistry {
    prototypes: RwLock<HashMap<String, Box<dyn Component>>>,
}

impl ComponentRegistry {
    /// An empty registry. Most callers want [`with_builtins`](Self::with_builtins).
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let registry = Self::default();
        registry.register(Box::new(LogComponent::default()));
        registry.register(Box::new(MetadataTransform::default()));
        registry.register(Box::new(MsgTypeFilter::default()));
        registry
    }

    pub fn register(&self, prototype: Box<dyn Component>) {
        let mut prototypes = self.prototypes.write().unwrap_or_else(|e| e.into_inner());
        prototypes.insert(prototype.type_name().to_string(), prototype);
    }

    pub fn unregister(&self, type_name: &str) -> bool {
        let mut prototypes = self.prototypes.write().unwrap_or_else(|e| e.into_inner());
        prototypes.remove(type_name).is_some()
    }

    /// Instantiates a component of the given type.
    pub fn create(&self, type_name: &str) -> Result<Box<dyn Component>, ChainError> {
        let prototypes = self.prototypes.read().unwrap_or_else(|e| e.into_inner());
        prototypes
            .get(type_name)
            .map(|p| p.create())
            .ok_or_else(|| ChainError::UnknownComponent(type_name.to_string()))
    }

    pub fn type_names(&self) -> Vec<String> {
        let prototypes = self.prototypes.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = prototypes.keys().cloned().collect();
        names.sort();
        names
    }
}
