//! Engines and the sub-chain pool.
//!
//! An [`Engine`] wraps one root chain and is the unit the pool hands
//! out. The pool owns every registered chain; chains themselves hold
//! only ids of other chains plus a reference back to the pool, which is
//! what keeps cross-chain cycles from becoming ownership cycles.

use crate::aspect::AspectList;
use crate::chain::ChainContext;
use crate::config::EngineConfig;
use crate::dsl::ChainDefinition;
use crate::message::Message;
use anyhow::Result;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// One runnable rule chain.
pub struct Engine {
    id: String,
    chain: Arc<ChainContext>,
}

impl Engine {
    pub fn new(
        id: impl Into<String>,
        config: EngineConfig,
        aspects: AspectList,
        definition: ChainDefinition,
    ) -> Result<Arc<Self>> {
        let chain = ChainContext::build(config, aspects, definition)?;
        Ok(Arc::new(Self {
            id: id.into(),
            chain,
        }))
    }

    /// Builds an engine straight from definition bytes.
    pub fn from_dsl(
        id: impl Into<String>,
        config: EngineConfig,
        aspects: AspectList,
        dsl: &[u8],
    ) -> Result<Arc<Self>> {
        let parser = config.parser.clone();
        let chain = parser.decode_chain(&config, &aspects, dsl)?;
        Ok(Arc::new(Self {
            id: id.into(),
            chain,
        }))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn root_chain(&self) -> Option<Arc<ChainContext>> {
        Some(self.chain.clone())
    }

    /// Hot-reloads the root chain from new definition bytes.
    pub fn reload(&self, dsl: &[u8]) -> Result<()> {
        self.chain.reload_self(dsl)
    }

    /// Runs one message through the chain, starting at its first node.
    pub async fn process(&self, msg: Message) -> Result<()> {
        self.chain.root_flow().run(msg).await
    }

    pub fn destroy(&self) {
        self.chain.destroy();
    }
}

/// Shared registry of engines, addressable by chain id.
#[derive(Default)]
pub struct ChainPool {
    engines: RwLock<HashMap<String, Arc<Engine>>>,
}

impl ChainPool {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, id: &str) -> Option<Arc<Engine>> {
        let engines = self.engines.read().unwrap_or_else(|e| e.into_inner());
        engines.get(id).cloned()
    }

    /// Registers an engine and wires its root chain back to this pool so
    /// sub-chain references resolve against it.
    pub fn register(self: &Arc<Self>, engine: Arc<Engine>) {
        if let Some(chain) = engine.root_chain() {
            chain.set_pool(self.clone());
        }
        let mut engines = self.engines.write().unwrap_or_else(|e| e.into_inner());
        engines.insert(engine.id().to_string(), engine);
    }

    /// Builds an engine from definition bytes and registers it.
    pub fn load(
        self: &Arc<Self>,
        id: impl Into<String>,
        config: EngineConfig,
        aspects: AspectList,
        dsl: &[u8],
    ) -> Result<Arc<Engine>> {
        let engine = Engine::from_dsl(id, config, aspects, dsl)?;
        self.register(engine.clone());
        info!(chain = engine.id(), "chain loaded into pool");
        Ok(engine)
    }

    /// Removes and destroys an engine. Returns whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        let engine = {
            let mut engines = self.engines.write().unwrap_or_else(|e| e.into_inner());
            engines.remove(id)
        };
        match engine {
            Some(engine) => {
                engine.destroy();
                true
            }
            None => false,
        }
    }

    pub fn ids(&self) -> Vec<String> {
        let engines = self.engines.read().unwrap_or_else(|e| e.into_inner());
        let mut ids: Vec<String> = engines.keys().cloned().collect();
        ids.sort();
        ids
    }
}

lazy_static! {
    static ref DEFAULT_POOL: Arc<ChainPool> = ChainPool::new();
}

/// The process-wide pool chains fall back to when none is installed.
pub fn default_pool() -> Arc<ChainPool> {
    DEFAULT_POOL.clone()
}
