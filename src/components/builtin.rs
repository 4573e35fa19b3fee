//! Built-in components covering the common filter/transform/action shapes.

use super::{Component, Handled};
use crate::config::{Configuration, EngineConfig};
use crate::flow::FlowContext;
use crate::message::Message;
use crate::types::{FALSE, SUCCESS, TRUE};
use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Logs every message it sees, then forwards on `Success`.
///
/// An optional `template` setting is rendered with `${data}` and
/// `${msgType}` placeholders; without one the raw payload is logged.
#[derive(Debug, Default)]
pub struct LogComponent {
    template: Option<String>,
}

#[async_trait]
impl Component for LogComponent {
    fn type_name(&self) -> &str {
        "log"
    }

    fn create(&self) -> Box<dyn Component> {
        Box::new(LogComponent::default())
    }

    fn init(&mut self, _config: &EngineConfig, settings: &Configuration) -> Result<()> {
        self.template = settings
            .get("template")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        Ok(())
    }

    async fn handle(&self, _ctx: &FlowContext, msg: Message) -> Result<Handled> {
        match &self.template {
            Some(template) => {
                let rendered = template
                    .replace("${data}", &msg.data)
                    .replace("${msgType}", &msg.msg_type);
                info!(msg_id = %msg.id, "{rendered}");
            }
            None => info!(msg_id = %msg.id, msg_type = %msg.msg_type, data = %msg.data, "log node"),
        }
        Ok(Handled::Forward(msg, SUCCESS.to_string()))
    }
}

/// Writes configured entries into message metadata, then forwards on
/// `Success`. Settings: `values`, an object of metadata key/value pairs.
#[derive(Debug, Default)]
pub struct MetadataTransform {
    values: Vec<(String, String)>,
}

#[async_trait]
impl Component for MetadataTransform {
    fn type_name(&self) -> &str {
        "metadataTransform"
    }

    fn create(&self) -> Box<dyn Component> {
        Box::new(MetadataTransform::default())
    }

    fn init(&mut self, _config: &EngineConfig, settings: &Configuration) -> Result<()> {
        self.values = settings
            .get("values")
            .map(crate::dsl::to_string_map)
            .unwrap_or_default()
            .into_iter()
            .collect();
        Ok(())
    }

    async fn handle(&self, _ctx: &FlowContext, mut msg: Message) -> Result<Handled> {
        for (key, value) in &self.values {
            msg.metadata.insert(key.clone(), value.clone());
        }
        Ok(Handled::Forward(msg, SUCCESS.to_string()))
    }
}

/// Routes on `True` when the message type is in the configured `types`
/// list, `False` otherwise. An empty list matches everything.
#[derive(Debug, Default)]
pub struct MsgTypeFilter {
    types: Vec<String>,
}

#[async_trait]
impl Component for MsgTypeFilter {
    fn type_name(&self) -> &str {
        "msgTypeFilter"
    }

    fn create(&self) -> Box<dyn Component> {
        Box::new(MsgTypeFilter::default())
    }

    fn init(&mut self, _config: &EngineConfig, settings: &Configuration) -> Result<()> {
        self.types = settings
            .get("types")
            .and_then(|v| v.as_array())
            .map(|types| {
                types
                    .iter()
                    .filter_map(|t| t.as_str())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        Ok(())
    }

    async fn handle(&self, _ctx: &FlowContext, msg: Message) -> Result<Handled> {
        let matched = self.types.is_empty() || self.types.iter().any(|t| t == &msg.msg_type);
        let label = if matched { TRUE } else { FALSE };
        Ok(Handled::Forward(msg, label.to_string()))
    }
}

/// Placeholder behavior for the node synthesized into an empty chain.
/// Consumes everything.
#[derive(Debug, Default)]
pub struct NullComponent;

#[async_trait]
impl Component for NullComponent {
    fn type_name(&self) -> &str {
        ""
    }

    fn create(&self) -> Box<dyn Component> {
        Box::new(NullComponent)
    }

    async fn handle(&self, _ctx: &FlowContext, _msg: Message) -> Result<Handled> {
        Ok(Handled::Consumed)
    }
}
