//! Declarative chain definitions and the DSL parser.
//!
//! A chain is described as a JSON document: chain-level info and
//! configuration, the node list, and the labeled connections between
//! nodes and to other chains. [`JsonParser`] is the shipped
//! implementation of [`DslParser`]; alternative encodings can be plugged
//! through [`EngineConfig`](crate::config::EngineConfig).

use crate::aspect::AspectList;
use crate::chain::ChainContext;
use crate::config::{Configuration, EngineConfig};
use crate::error::ChainError;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Configuration entry holding plaintext chain variables.
pub const VARS: &str = "vars";
/// Configuration entry holding encrypted chain secrets.
pub const SECRETS: &str = "secrets";
/// Configuration entry carrying a full definition for in-place re-init.
pub const SELF_DEFINITION: &str = "selfDefinition";

const VAR_OPEN: &str = "${vars.";

/// In-memory view of a declarative rule chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainDefinition {
    #[serde(default)]
    pub chain: ChainInfo,
    #[serde(default)]
    pub graph: ChainGraph,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub root: bool,
    #[serde(default)]
    pub configuration: Configuration,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainGraph {
    /// Index into `nodes` of the node that receives incoming messages.
    #[serde(default)]
    pub first_node_index: usize,
    #[serde(default)]
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub connections: Vec<Connection>,
    /// Connections whose target is another chain, not a local node.
    #[serde(default)]
    pub chain_connections: Vec<Connection>,
}

/// A single node of the chain: which component to instantiate and how.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDefinition {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default)]
    pub component: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub configuration: Configuration,
}

impl NodeDefinition {
    pub fn new(id: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            component: component.into(),
            ..Self::default()
        }
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.configuration.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub label: String,
}

impl ChainDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            chain: ChainInfo {
                id: id.into(),
                ..ChainInfo::default()
            },
            graph: ChainGraph::default(),
        }
    }

    pub fn with_node(mut self, node: NodeDefinition) -> Self {
        self.graph.nodes.push(node);
        self
    }

    pub fn with_connection(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        self.graph.connections.push(Connection {
            from: from.into(),
            to: to.into(),
            label: label.into(),
        });
        self
    }

    pub fn with_chain_connection(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        self.graph.chain_connections.push(Connection {
            from: from.into(),
            to: to.into(),
            label: label.into(),
        });
        self
    }
}

/// Decodes definition bytes into a live chain and re-encodes definitions
/// back to bytes.
pub trait DslParser: Send + Sync {
    fn decode_chain(
        &self,
        config: &EngineConfig,
        aspects: &AspectList,
        dsl: &[u8],
    ) -> Result<Arc<ChainContext>>;

    fn decode_node(&self, dsl: &[u8]) -> Result<NodeDefinition>;

    fn encode_chain(&self, definition: &ChainDefinition) -> Result<Vec<u8>>;

    fn encode_node(&self, definition: &NodeDefinition) -> Result<Vec<u8>>;
}

/// The JSON encoding of the chain DSL.
pub struct JsonParser;

impl DslParser for JsonParser {
    fn decode_chain(
        &self,
        config: &EngineConfig,
        aspects: &AspectList,
        dsl: &[u8],
    ) -> Result<Arc<ChainContext>> {
        let definition: ChainDefinition =
            serde_json::from_slice(dsl).map_err(|e| ChainError::InvalidDefinition(e.to_string()))?;
        ChainContext::build(config.clone(), aspects.clone(), definition)
    }

    fn decode_node(&self, dsl: &[u8]) -> Result<NodeDefinition> {
        Ok(serde_json::from_slice(dsl)
            .map_err(|e| ChainError::InvalidDefinition(e.to_string()))?)
    }

    fn encode_chain(&self, definition: &ChainDefinition) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(definition)?)
    }

    fn encode_node(&self, definition: &NodeDefinition) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(definition)?)
    }
}

/// Best-effort coercion of a configuration value into a string map.
///
/// Object values coerce entry-wise, with non-string values rendered as
/// JSON; anything else yields an empty map. Malformed entries never fail
/// a chain build.
pub fn to_string_map(value: &Value) -> HashMap<String, String> {
    match value {
        Value::Object(entries) => entries
            .iter()
            .map(|(key, v)| {
                let coerced = match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), coerced)
            })
            .collect(),
        _ => HashMap::new(),
    }
}

/// Expands `${vars.name}` references inside string configuration values.
/// Unknown references are left in place.
pub fn expand_vars(settings: &Configuration, vars: &HashMap<String, String>) -> Configuration {
    settings
        .iter()
        .map(|(key, value)| {
            let expanded = match value {
                Value::String(s) => Value::String(expand_str(s, vars)),
                other => other.clone(),
            };
            (key.clone(), expanded)
        })
        .collect()
}

fn expand_str(input: &str, vars: &HashMap<String, String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(start) = rest.find(VAR_OPEN) {
        out.push_str(&rest[..start]);
        let tail = &rest[start + VAR_OPEN.len()..];
        match tail.find('}') {
            Some(end) => {
                let name = &tail[..end];
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None => out.push_str(&rest[start..start + VAR_OPEN.len() + end + 1]),
                }
                rest = &tail[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Lists the distinct variable names a definition references, sorted.
pub fn referenced_vars(definition: &ChainDefinition) -> Vec<String> {
    let mut names = BTreeSet::new();
    for node in &definition.graph.nodes {
        for value in node.configuration.values() {
            if let Value::String(s) = value {
                collect_refs(s, &mut names);
            }
        }
    }
    names.into_iter().collect()
}

fn collect_refs(input: &str, out: &mut BTreeSet<String>) {
    let mut rest = input;
    while let Some(start) = rest.find(VAR_OPEN) {
        let tail = &rest[start + VAR_OPEN.len()..];
        let Some(end) = tail.find('}') else { break };
        out.insert(tail[..end].to_string());
        rest = &tail[end + 1..];
    }
}
