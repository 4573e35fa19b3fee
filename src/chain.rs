//! The rule-chain runtime context.
//!
//! [`ChainContext`] materializes a [`ChainDefinition`] into a directed
//! multigraph of node contexts and serves as the topology + lifecycle
//! service for the dispatcher: successor resolution with a memoizing
//! cache, hot reload of the whole chain or a single node, aspect hook
//! coordination, and sub-chain resolution through an external pool. It
//! never executes nodes itself.

use crate::aspect::{AspectBindings, AspectList};
use crate::config::{Configuration, EngineConfig};
use crate::dsl::{to_string_map, ChainDefinition, SECRETS, SELF_DEFINITION, VARS};
use crate::error::ChainError;
use crate::flow::FlowContext;
use crate::message::Message;
use crate::node::{ChainNode, NodeContext};
use crate::pool::{default_pool, ChainPool};
use crate::secret;
use crate::types::{ComponentKind, NodeId, Relation, RelationKey};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tracing::debug;

/// Component type reported by a chain acting as a node.
pub const CHAIN_NODE_TYPE: &str = "ruleChain";

/// Everything hot reload swaps atomically, behind the context's single
/// readers/writer lock.
#[derive(Clone)]
struct ChainState {
    id: NodeId,
    config: EngineConfig,
    initialized: bool,
    definition: ChainDefinition,
    /// Insertion order of local nodes; backs index-based lookup.
    node_order: Vec<NodeId>,
    nodes: HashMap<NodeId, Arc<NodeContext>>,
    /// Outbound edges keyed by source, in definition order. Edges to
    /// chain-kind targets live here too.
    routes: HashMap<NodeId, Vec<Relation>>,
    /// Memoized successor lists, including resolved sub-chain contexts.
    cache: HashMap<RelationKey, Vec<Arc<dyn ChainNode>>>,
    vars: HashMap<String, String>,
    secrets: HashMap<String, String>,
    aspects: AspectList,
    bindings: AspectBindings,
    pool: Option<Arc<ChainPool>>,
    /// The initial execution state handed to the dispatcher.
    root: FlowContext,
    is_empty: bool,
}

/// Runtime context of one rule chain. See the module docs.
///
/// All read paths take the shared lock; `copy_from` (the reload swap),
/// cache insertion and destruction take it exclusively. Successor lists
/// observed by any thread always correspond to a coherent past snapshot.
pub struct ChainContext {
    self_ref: Weak<ChainContext>,
    state: RwLock<ChainState>,
}

impl std::fmt::Debug for ChainContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainContext").finish_non_exhaustive()
    }
}

impl ChainContext {
    /// Materializes a definition into a live chain.
    ///
    /// Node-context construction failure aborts the build; malformed
    /// `vars`/`secrets` configuration is coerced best-effort and never
    /// fatal. A chain without a usable first node gets a synthesized
    /// empty node so the dispatcher always has a starting point.
    pub fn build(
        config: EngineConfig,
        aspects: AspectList,
        mut definition: ChainDefinition,
    ) -> Result<Arc<Self>> {
        let id = NodeId::chain(&definition.chain.id);

        let vars = definition
            .chain
            .configuration
            .get(VARS)
            .map(to_string_map)
            .unwrap_or_default();
        let raw_secrets = definition
            .chain
            .configuration
            .get(SECRETS)
            .map(to_string_map)
            .unwrap_or_default();
        let secrets = secret::decrypt_all(raw_secrets, config.secret_key.as_deref());

        let mut node_order = Vec::with_capacity(definition.graph.nodes.len());
        let mut built = Vec::with_capacity(definition.graph.nodes.len());
        for (index, node_def) in definition.graph.nodes.iter_mut().enumerate() {
            if node_def.id.is_empty() {
                node_def.id = format!("node{index}");
            }
            let node_id = NodeId::node(&node_def.id);
            let node = NodeContext::build(&config, &vars, node_def.clone()).map_err(|source| {
                ChainError::NodeBuild {
                    id: node_def.id.clone(),
                    source,
                }
            })?;
            node_order.push(node_id.clone());
            built.push((node_id, Arc::new(node)));
        }

        let mut routes: HashMap<NodeId, Vec<Relation>> = HashMap::new();
        for conn in &definition.graph.connections {
            let relation = Relation {
                from: NodeId::node(&conn.from),
                to: NodeId::node(&conn.to),
                label: conn.label.clone(),
            };
            routes.entry(relation.from.clone()).or_default().push(relation);
        }
        for conn in &definition.graph.chain_connections {
            let relation = Relation {
                from: NodeId::node(&conn.from),
                to: NodeId::chain(&conn.to),
                label: conn.label.clone(),
            };
            routes.entry(relation.from.clone()).or_default().push(relation);
        }

        let bindings = AspectBindings::from_aspects(&aspects);

        let chain = Arc::new_cyclic(|weak: &Weak<ChainContext>| {
            // Later definitions win on duplicate ids; node_order keeps
            // every slot so index lookup stays aligned with the DSL.
            let nodes: HashMap<NodeId, Arc<NodeContext>> = built.into_iter().collect();
            let (entry, is_empty): (Arc<dyn ChainNode>, bool) = match node_order
                .get(definition.graph.first_node_index)
                .and_then(|first| nodes.get(first).cloned())
            {
                Some(first) => (first as Arc<dyn ChainNode>, false),
                None => (Arc::new(NodeContext::empty(&config)) as Arc<dyn ChainNode>, true),
            };
            let root = FlowContext::new(config.clone(), weak.clone(), entry);

            ChainContext {
                self_ref: weak.clone(),
                state: RwLock::new(ChainState {
                    id,
                    config,
                    initialized: true,
                    definition,
                    node_order,
                    nodes,
                    routes,
                    cache: HashMap::new(),
                    vars,
                    secrets,
                    aspects,
                    bindings,
                    pool: None,
                    root,
                    is_empty,
                }),
            }
        });
        Ok(chain)
    }

    fn read_state(&self) -> RwLockReadGuard<'_, ChainState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, ChainState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn id(&self) -> NodeId {
        self.read_state().id.clone()
    }

    pub fn config(&self) -> EngineConfig {
        self.read_state().config.clone()
    }

    pub fn is_initialized(&self) -> bool {
        self.read_state().initialized
    }

    /// True iff the definition declared zero usable entry nodes.
    pub fn is_empty(&self) -> bool {
        self.read_state().is_empty
    }

    pub fn is_debug(&self) -> bool {
        self.read_state().definition.chain.debug
    }

    pub fn definition(&self) -> ChainDefinition {
        self.read_state().definition.clone()
    }

    /// Re-encodes the current definition through the configured parser.
    pub fn dsl(&self) -> Result<Vec<u8>> {
        let (config, definition) = {
            let state = self.read_state();
            (state.config.clone(), state.definition.clone())
        };
        config.parser.encode_chain(&definition)
    }

    /// Plaintext chain variables.
    pub fn vars(&self) -> HashMap<String, String> {
        self.read_state().vars.clone()
    }

    /// Decrypted secrets; entries that failed decryption hold the
    /// original ciphertext.
    pub fn secrets(&self) -> HashMap<String, String> {
        self.read_state().secrets.clone()
    }

    pub fn set_pool(&self, pool: Arc<ChainPool>) {
        self.write_state().pool = Some(pool);
    }

    /// The installed sub-chain pool, falling back to the process-wide
    /// default.
    pub fn pool(&self) -> Arc<ChainPool> {
        self.read_state().pool.clone().unwrap_or_else(default_pool)
    }

    pub fn set_aspects(&self, aspects: AspectList) {
        let bindings = AspectBindings::from_aspects(&aspects);
        let mut state = self.write_state();
        state.aspects = aspects;
        state.bindings = bindings;
    }

    /// The root execution seed: points at the first node, or at the
    /// synthesized empty node of a node-less chain.
    pub fn root_flow(&self) -> FlowContext {
        self.read_state().root.clone()
    }

    /// Looks up a graph member. Chain-kind ids resolve through the
    /// sub-chain pool; node-kind ids through the local node map.
    pub fn node_by_id(&self, id: &NodeId) -> Option<Arc<dyn ChainNode>> {
        match id.kind {
            ComponentKind::Chain => {
                let engine = self.pool().get(&id.id)?;
                engine.root_chain().map(|chain| chain as Arc<dyn ChainNode>)
            }
            ComponentKind::Node => {
                let state = self.read_state();
                state
                    .nodes
                    .get(id)
                    .cloned()
                    .map(|node| node as Arc<dyn ChainNode>)
            }
        }
    }

    pub fn node_by_index(&self, index: usize) -> Option<Arc<dyn ChainNode>> {
        let id = { self.read_state().node_order.get(index).cloned() }?;
        self.node_by_id(&id)
    }

    /// The node messages enter the chain through. Falls back to the
    /// synthesized empty node when `first_node_index` resolves nowhere.
    pub fn first_node(&self) -> Option<Arc<dyn ChainNode>> {
        let (index, fallback) = {
            let state = self.read_state();
            (state.definition.graph.first_node_index, state.root.entry())
        };
        self.node_by_index(index).or(Some(fallback))
    }

    /// Outbound relations of a node, in definition order.
    pub fn routes_of(&self, id: &NodeId) -> Option<Vec<Relation>> {
        self.read_state().routes.get(id).cloned()
    }

    /// Resolves the successors of `(from, label)`.
    ///
    /// Returns the ordered successor list and whether any successor was
    /// found. Relations to unknown nodes or unresolvable sub-chains are
    /// dropped silently. Results are cached, empty ones included;
    /// a racing double resolution is tolerated because resolution is
    /// deterministic.
    pub fn next_nodes(&self, from: &NodeId, label: &str) -> (Vec<Arc<dyn ChainNode>>, bool) {
        enum Target {
            Local(Option<Arc<dyn ChainNode>>),
            Sub(String),
        }

        let key = RelationKey::new(from.clone(), label);
        {
            let state = self.read_state();
            if let Some(cached) = state.cache.get(&key) {
                return (cached.clone(), !cached.is_empty());
            }
        }

        let (targets, pool) = {
            let state = self.read_state();
            let targets: Vec<Target> = state
                .routes
                .get(from)
                .map(|relations| {
                    relations
                        .iter()
                        .filter(|r| r.label == label)
                        .map(|r| match r.to.kind {
                            ComponentKind::Node => Target::Local(
                                state.nodes.get(&r.to).cloned().map(|n| n as Arc<dyn ChainNode>),
                            ),
                            ComponentKind::Chain => Target::Sub(r.to.id.clone()),
                        })
                        .collect()
                })
                .unwrap_or_default();
            (targets, state.pool.clone())
        };
        let pool = pool.unwrap_or_else(default_pool);

        let mut resolved: Vec<Arc<dyn ChainNode>> = Vec::new();
        let mut found = false;
        for target in targets {
            let next = match target {
                Target::Local(node) => node,
                Target::Sub(chain_id) => pool
                    .get(&chain_id)
                    .and_then(|engine| engine.root_chain())
                    .map(|chain| chain as Arc<dyn ChainNode>),
            };
            if let Some(next) = next {
                resolved.push(next);
                found = true;
            }
        }

        let mut state = self.write_state();
        state.cache.insert(key, resolved.clone());
        (resolved, found)
    }

    /// Replaces the whole chain from definition bytes.
    ///
    /// On a successful decode the current instance is destroyed and
    /// every field is swapped from the fresh build, clearing the cache.
    /// Reload hooks run in either outcome with the decode error passed
    /// in; a hook error short-circuits and supersedes it.
    pub fn reload_self(&self, dsl: &[u8]) -> Result<()> {
        let (config, aspects) = {
            let state = self.read_state();
            (state.config.clone(), state.aspects.clone())
        };
        let err = match config.parser.decode_chain(&config, &aspects, dsl) {
            Ok(fresh) => {
                self.destroy();
                self.copy_from(&fresh);
                debug!(chain = %self.id().id, "chain definition reloaded");
                None
            }
            Err(e) => Some(e),
        };

        let reload_hooks = { self.read_state().bindings.reload.clone() };
        for aspect in &reload_hooks {
            if let Some(hook) = aspect.as_reload() {
                hook.on_reload(self, self, err.as_ref())?;
            }
        }
        match err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Reloads a single node in place. Unknown ids are a no-op.
    ///
    /// The successor cache is left alone: node identity is preserved by
    /// the in-place component swap, so cached lists stay valid.
    pub fn reload_child(&self, id: &NodeId, dsl: &[u8]) -> Result<()> {
        let Some(node) = self.node_by_id(id) else {
            return Ok(());
        };
        let err = node.reload_self(dsl).err();

        let reload_hooks = { self.read_state().bindings.reload.clone() };
        for aspect in &reload_hooks {
            if let Some(hook) = aspect.as_reload() {
                hook.on_reload(self, node.as_ref(), err.as_ref())?;
            }
        }
        match err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Destroys every owned node, then runs destroy hooks. One-shot;
    /// callers serialize destruction.
    pub fn destroy(&self) {
        let (nodes, destroy_hooks) = {
            let state = self.read_state();
            (
                state.nodes.values().cloned().collect::<Vec<_>>(),
                state.bindings.destroy.clone(),
            )
        };
        for node in &nodes {
            node.destroy();
        }
        for aspect in &destroy_hooks {
            if let Some(hook) = aspect.as_destroy() {
                hook.on_destroy(self);
            }
        }
    }

    /// The atomic swap behind hot reload: adopt every field of `other`
    /// under the exclusive lock, resetting the cache. Afterwards this
    /// context is indistinguishable from a freshly built one.
    fn copy_from(&self, other: &ChainContext) {
        let mut incoming = other.read_state().clone();
        incoming.cache = HashMap::new();
        incoming.root = incoming.root.rebind(self.self_ref.clone());
        let mut state = self.write_state();
        *state = incoming;
    }
}

#[async_trait]
impl ChainNode for ChainContext {
    fn component_type(&self) -> String {
        CHAIN_NODE_TYPE.to_string()
    }

    fn node_id(&self) -> NodeId {
        self.id()
    }

    fn is_debug(&self) -> bool {
        ChainContext::is_debug(self)
    }

    /// A chain used as a successor re-enters the dispatcher by id.
    async fn on_message(&self, ctx: &FlowContext, msg: Message) -> Result<()> {
        let chain_id = { self.read_state().id.id.clone() };
        ctx.tell_flow(&chain_id, msg).await
    }

    /// Rebuilds in place from a `selfDefinition` configuration entry,
    /// when present and convertible. Anything else is a no-op.
    fn init(&self, _config: &EngineConfig, settings: &Configuration) -> Result<()> {
        let Some(raw) = settings.get(SELF_DEFINITION) else {
            return Ok(());
        };
        let Ok(definition) = serde_json::from_value::<ChainDefinition>(raw.clone()) else {
            return Ok(());
        };
        let (config, aspects) = {
            let state = self.read_state();
            (state.config.clone(), state.aspects.clone())
        };
        let fresh = ChainContext::build(config, aspects, definition)?;
        self.copy_from(&fresh);
        Ok(())
    }

    fn reload_self(&self, dsl: &[u8]) -> Result<()> {
        ChainContext::reload_self(self, dsl)
    }

    fn new_instance(&self) -> Result<Arc<dyn ChainNode>> {
        Err(ChainError::Unsupported("new_instance").into())
    }

    fn destroy(&self) {
        ChainContext::destroy(self)
    }

    fn dsl(&self) -> Result<Vec<u8>> {
        ChainContext::dsl(self)
    }
}
