//! Core identifiers and graph primitives shared across the engine.

use serde::{Deserialize, Serialize};

/// Relation label emitted by components that completed normally.
pub const SUCCESS: &str = "Success";
/// Relation label emitted by components that failed to process a message.
pub const FAILURE: &str = "Failure";
/// Relation label emitted by filter components that matched.
pub const TRUE: &str = "True";
/// Relation label emitted by filter components that did not match.
pub const FALSE: &str = "False";

/// What a [`NodeId`] refers to: a local node, or another chain resolved
/// through the sub-chain pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ComponentKind {
    Node,
    Chain,
}

/// Identity of a node or a sub-chain reference inside a chain graph.
///
/// Equality is structural: two ids are the same when both the string id
/// and the kind match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub id: String,
    pub kind: ComponentKind,
}

impl NodeId {
    pub fn node(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ComponentKind::Node,
        }
    }

    pub fn chain(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: ComponentKind::Chain,
        }
    }
}

/// A labeled edge of the chain multigraph.
///
/// Multiple relations may share `from` and `label`; successors form an
/// ordered multiset in definition order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    pub from: NodeId,
    pub to: NodeId,
    pub label: String,
}

/// Cache key for memoized successor resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationKey {
    pub source: NodeId,
    pub label: String,
}

impl RelationKey {
    pub fn new(source: NodeId, label: impl Into<String>) -> Self {
        Self {
            source,
            label: label.into(),
        }
    }
}
