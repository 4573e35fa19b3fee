//! Cross-cutting aspect hooks invoked on chain lifecycle events.
//!
//! An aspect advertises the hook points it participates in through the
//! `as_reload` / `as_destroy` accessors; [`AspectBindings`] filters an
//! aspect set into per-hook lists once, at chain build time.

use crate::chain::ChainContext;
use crate::node::ChainNode;
use anyhow::Result;
use std::sync::Arc;

/// A cross-cutting hook participating in engine lifecycle events.
///
/// Implementors opt into hook points by overriding the matching
/// accessor to return `Some(self)`.
pub trait Aspect: Send + Sync {
    fn as_reload(&self) -> Option<&dyn ReloadAspect> {
        None
    }

    fn as_destroy(&self) -> Option<&dyn DestroyAspect> {
        None
    }
}

/// Observes whole-chain and single-node reloads.
///
/// Runs whether or not decoding succeeded; `outcome` carries the decode
/// error when it failed. Returning an error short-circuits the
/// remaining hooks and supersedes the decode error.
pub trait ReloadAspect: Send + Sync {
    fn on_reload(
        &self,
        chain: &ChainContext,
        node: &dyn ChainNode,
        outcome: Option<&anyhow::Error>,
    ) -> Result<()>;
}

/// Observes chain destruction, after all owned nodes were destroyed.
pub trait DestroyAspect: Send + Sync {
    fn on_destroy(&self, chain: &ChainContext);
}

/// The aspect set installed on a chain.
pub type AspectList = Vec<Arc<dyn Aspect>>;

/// Reload and destroy hook lists derived from an aspect set.
#[derive(Clone, Default)]
pub struct AspectBindings {
    pub(crate) reload: Vec<Arc<dyn Aspect>>,
    pub(crate) destroy: Vec<Arc<dyn Aspect>>,
}

impl AspectBindings {
    pub fn from_aspects(aspects: &AspectList) -> Self {
        Self {
            reload: aspects
                .iter()
                .filter(|a| a.as_reload().is_some())
                .cloned()
                .collect(),
            destroy: aspects
                .iter()
                .filter(|a| a.as_destroy().is_some())
                .cloned()
                .collect(),
        }
    }
}
