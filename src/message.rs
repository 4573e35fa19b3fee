//! The message unit routed through a rule chain.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Encoding of a message payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DataFormat {
    #[default]
    Json,
    Text,
    Binary,
}

/// A single event flowing through a chain.
///
/// Components receive an owned `Message`, may rewrite payload and
/// metadata, and hand it back to the dispatcher together with the
/// relation label to route on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Creation time, unix milliseconds.
    pub ts: i64,
    /// Application-level discriminator, e.g. "TELEMETRY".
    pub msg_type: String,
    pub format: DataFormat,
    pub data: String,
    pub metadata: HashMap<String, String>,
}

impl Message {
    pub fn new(msg_type: impl Into<String>, format: DataFormat, data: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            ts: Utc::now().timestamp_millis(),
            msg_type: msg_type.into(),
            format,
            data: data.into(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
