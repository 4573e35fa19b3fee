//! Per-node runtime contexts and the capability set they share with
//! whole chains.

use crate::components::{Component, Handled, NullComponent};
use crate::config::{Configuration, EngineConfig};
use crate::dsl::{expand_vars, NodeDefinition};
use crate::flow::FlowContext;
use crate::message::Message;
use crate::types::NodeId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// The capability set every routable graph member implements.
///
/// Both [`NodeContext`] and [`ChainContext`](crate::chain::ChainContext)
/// satisfy it, which is what lets a sub-chain reference appear as an
/// ordinary successor.
#[async_trait]
pub trait ChainNode: Send + Sync {
    fn component_type(&self) -> String;

    fn node_id(&self) -> NodeId;

    fn is_debug(&self) -> bool;

    /// Processes one message and routes any follow-up through `ctx`.
    async fn on_message(&self, ctx: &FlowContext, msg: Message) -> Result<()>;

    /// Re-initializes from a configuration block.
    fn init(&self, config: &EngineConfig, settings: &Configuration) -> Result<()>;

    /// Replaces this member's definition in place from DSL bytes.
    fn reload_self(&self, dsl: &[u8]) -> Result<()>;

    /// A fresh, independently-owned instance built from the same definition.
    fn new_instance(&self) -> Result<Arc<dyn ChainNode>>;

    fn destroy(&self);

    /// Re-encodes the current definition.
    fn dsl(&self) -> Result<Vec<u8>>;
}

/// Runtime state of a single configured node.
///
/// The live component sits behind a lock so [`reload_self`](ChainNode::reload_self)
/// can swap it while messages are in flight; node identity (the `Arc`
/// handed out to routing) never changes across a reload, which is what
/// keeps the chain-level successor cache valid.
pub struct NodeContext {
    config: EngineConfig,
    inner: RwLock<NodeInner>,
}

impl std::fmt::Debug for NodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeContext").finish_non_exhaustive()
    }
}

struct NodeInner {
    id: NodeId,
    definition: NodeDefinition,
    /// Chain vars snapshot taken at build time, reused on reload.
    vars: HashMap<String, String>,
    component: Arc<dyn Component>,
}

impl NodeContext {
    /// Builds the node: instantiate the component from the registry,
    /// expand `${vars.*}` references in its configuration against the
    /// chain vars, then run component init.
    pub fn build(
        config: &EngineConfig,
        vars: &HashMap<String, String>,
        definition: NodeDefinition,
    ) -> Result<Self> {
        let component = Self::make_component(config, vars, &definition)?;
        Ok(Self {
            config: config.clone(),
            inner: RwLock::new(NodeInner {
                id: NodeId::node(&definition.id),
                definition,
                vars: vars.clone(),
                component,
            }),
        })
    }

    /// The node synthesized into a chain that defined no nodes.
    pub(crate) fn empty(config: &EngineConfig) -> Self {
        Self {
            config: config.clone(),
            inner: RwLock::new(NodeInner {
                id: NodeId::node(""),
                definition: NodeDefinition::default(),
                vars: HashMap::new(),
                component: Arc::new(NullComponent),
            }),
        }
    }

    pub fn definition(&self) -> NodeDefinition {
        self.read_inner().definition.clone()
    }

    fn make_component(
        config: &EngineConfig,
        vars: &HashMap<String, String>,
        definition: &NodeDefinition,
    ) -> Result<Arc<dyn Component>> {
        let mut component = config.registry.create(&definition.component)?;
        let settings = expand_vars(&definition.configuration, vars);
        component
            .init(config, &settings)
            .with_context(|| format!("init of node '{}' failed", definition.id))?;
        Ok(Arc::from(component))
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, NodeInner> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, NodeInner> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ChainNode for NodeContext {
    fn component_type(&self) -> String {
        self.read_inner().component.type_name().to_string()
    }

    fn node_id(&self) -> NodeId {
        self.read_inner().id.clone()
    }

    fn is_debug(&self) -> bool {
        self.read_inner().definition.debug
    }

    async fn on_message(&self, ctx: &FlowContext, msg: Message) -> Result<()> {
        let (component, id, node_debug) = {
            let inner = self.read_inner();
            (
                inner.component.clone(),
                inner.id.clone(),
                inner.definition.debug,
            )
        };
        if node_debug || ctx.is_debug() {
            debug!(node = %id.id, msg_id = %msg.id, msg_type = %msg.msg_type, "message entered node");
        }
        match component.handle(ctx, msg).await? {
            Handled::Forward(msg, label) => ctx.tell_next(&id, msg, &label).await,
            Handled::Consumed => Ok(()),
        }
    }

    fn init(&self, config: &EngineConfig, settings: &Configuration) -> Result<()> {
        let type_name = self.read_inner().definition.component.clone();
        let mut component = config.registry.create(&type_name)?;
        component.init(config, settings)?;
        self.write_inner().component = Arc::from(component);
        Ok(())
    }

    fn reload_self(&self, dsl: &[u8]) -> Result<()> {
        let definition = self.config.parser.decode_node(dsl)?;
        let vars = self.read_inner().vars.clone();
        let component = Self::make_component(&self.config, &vars, &definition)?;

        let old = {
            let mut inner = self.write_inner();
            if !definition.id.is_empty() {
                inner.id = NodeId::node(&definition.id);
            }
            inner.definition = definition;
            std::mem::replace(&mut inner.component, component)
        };
        old.destroy();
        Ok(())
    }

    fn new_instance(&self) -> Result<Arc<dyn ChainNode>> {
        let (definition, vars) = {
            let inner = self.read_inner();
            (inner.definition.clone(), inner.vars.clone())
        };
        Ok(Arc::new(Self::build(&self.config, &vars, definition)?))
    }

    fn destroy(&self) {
        let component = self.read_inner().component.clone();
        component.destroy();
    }

    fn dsl(&self) -> Result<Vec<u8>> {
        let definition = self.definition();
        self.config.parser.encode_node(&definition)
    }
}
