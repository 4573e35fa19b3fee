//! # chainflow - Rule Chain Execution Engine
//!
//! chainflow routes messages through declarative graphs of processing
//! nodes ("rule chains"). A chain definition names its nodes, the
//! component behind each node, and the labeled relations between them;
//! the engine materializes that into a runtime context, resolves
//! successors per relation label, and supports hot reload of a whole
//! chain or a single node while messages are in flight.
//!
//! ## Quick Start
//!
//! ```no_run
//! use chainflow::{ChainPool, DataFormat, EngineConfig, Message};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let dsl = br#"{
//!   "chain": {"id": "telemetry"},
//!   "graph": {
//!     "nodes": [
//!       {"id": "route", "type": "msgTypeFilter", "configuration": {"types": ["TELEMETRY"]}},
//!       {"id": "audit", "type": "log"}
//!     ],
//!     "connections": [{"from": "route", "to": "audit", "label": "True"}]
//!   }
//! }"#;
//!
//! let pool = ChainPool::new();
//! let engine = pool.load("telemetry", EngineConfig::new(), Vec::new(), dsl)?;
//! engine
//!     .process(Message::new("TELEMETRY", DataFormat::Json, r#"{"temp": 21}"#))
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Declarative graphs**: JSON chain definitions, labeled multigraph
//!   relations, sub-chain composition through a shared pool
//! - **Hot reload**: atomic whole-chain swap or in-place node reload,
//!   observed by aspect hooks
//! - **Pluggable components**: register your own [`Component`]
//!   implementations next to the built-ins
//! - **Config hygiene**: chain-level vars with `${vars.*}` expansion and
//!   AES-GCM encrypted secrets

pub mod aspect;
pub mod chain;
pub mod components;
pub mod config;
pub mod dsl;
pub mod error;
pub mod flow;
pub mod message;
pub mod node;
pub mod pool;
pub mod secret;
pub mod types;

pub use aspect::{Aspect, AspectBindings, AspectList, DestroyAspect, ReloadAspect};
pub use chain::{ChainContext, CHAIN_NODE_TYPE};
pub use components::{Component, ComponentRegistry, Handled};
pub use config::{Configuration, EngineConfig};
pub use dsl::{
    ChainDefinition, ChainGraph, ChainInfo, Connection, DslParser, JsonParser, NodeDefinition,
};
pub use error::ChainError;
pub use flow::FlowContext;
pub use message::{DataFormat, Message};
pub use node::{ChainNode, NodeContext};
pub use pool::{default_pool, ChainPool, Engine};
pub use types::{ComponentKind, NodeId, Relation, RelationKey};
