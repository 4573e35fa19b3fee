//! Execution state: the dispatcher side of a running message.
//!
//! A [`FlowContext`] is what components and node contexts route
//! through. The root instance of a chain is built once at chain build
//! time (the execution seed); it holds only a weak reference to its
//! chain, so the pool stays the single owner of every chain.

use crate::chain::ChainContext;
use crate::config::EngineConfig;
use crate::error::ChainError;
use crate::message::Message;
use crate::node::ChainNode;
use crate::pool::default_pool;
use crate::types::NodeId;
use anyhow::Result;
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

/// Execution state over one chain: the entry node plus the routing
/// operations components use to move a message onward.
#[derive(Clone)]
pub struct FlowContext {
    config: EngineConfig,
    chain: Weak<ChainContext>,
    entry: Arc<dyn ChainNode>,
}

impl FlowContext {
    pub(crate) fn new(
        config: EngineConfig,
        chain: Weak<ChainContext>,
        entry: Arc<dyn ChainNode>,
    ) -> Self {
        Self {
            config,
            chain,
            entry,
        }
    }

    /// The same state re-pointed at another chain allocation; used by
    /// the reload swap so the seed follows the surviving context.
    pub(crate) fn rebind(&self, chain: Weak<ChainContext>) -> Self {
        Self {
            config: self.config.clone(),
            chain,
            entry: self.entry.clone(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The node this state starts message delivery at.
    pub fn entry(&self) -> Arc<dyn ChainNode> {
        self.entry.clone()
    }

    pub fn chain(&self) -> Option<Arc<ChainContext>> {
        self.chain.upgrade()
    }

    pub fn is_debug(&self) -> bool {
        self.chain().map(|chain| chain.is_debug()).unwrap_or(false)
    }

    /// Delivers a message to the entry node and lets it flow.
    pub async fn run(&self, msg: Message) -> Result<()> {
        self.entry.on_message(self, msg).await
    }

    /// Routes a message from `from` to every successor of `label`, in
    /// definition order. A label with no successors ends the flow.
    pub async fn tell_next(&self, from: &NodeId, msg: Message, label: &str) -> Result<()> {
        let Some(chain) = self.chain() else {
            warn!(node = %from.id, "owning chain was dropped; message ends here");
            return Ok(());
        };
        let (successors, found) = chain.next_nodes(from, label);
        if !found {
            trace!(node = %from.id, label, "no successors; flow ends");
            return Ok(());
        }
        for next in successors {
            next.on_message(self, msg.clone()).await?;
        }
        Ok(())
    }

    /// Enters another chain by id through the sub-chain pool.
    pub async fn tell_flow(&self, chain_id: &str, msg: Message) -> Result<()> {
        let pool = self
            .chain()
            .map(|chain| chain.pool())
            .unwrap_or_else(default_pool);
        let engine = pool
            .get(chain_id)
            .ok_or_else(|| ChainError::UnknownChain(chain_id.to_string()))?;
        engine.process(msg).await
    }
}
