//! `virtual_switch` – in-memory on/off switches exposed as bus nodes.
//!
//! # Configuration
//!
//! ```toml
//! [[modules]]
//! module = "virtual_switch"
//! [modules.config]
//! switches = ["light", "fan"]   # default: ["switch"]
//! ```
//!
//! Each switch becomes a node with a settable boolean `state` property whose
//! callback is `on_state`. Commands accept `ON`/`OFF`, `true`/`false` and
//! `1`/`0` in any case. Every state change, and every switch on `start`, is
//! published as `<switch>/state` with content `ON` or `OFF`, retained.

use std::collections::BTreeMap;

use async_trait::async_trait;
use busgate_middleware::{InterfaceContext, InterfaceModule, Module, ModuleConfig, PublishQueue};
use busgate_types::{
    DataType, ModuleError, Node, PATH_SEPARATOR, Property, PublishMessage, SubscribeMessage,
    split_path,
};
use tracing::info;

const STATE: &str = "state";
const ON_STATE: &str = "on_state";
const DEFAULT_SWITCH: &str = "switch";

#[derive(Debug, Default)]
pub struct VirtualSwitch {
    id: String,
    switches: BTreeMap<String, bool>,
    publish: Option<PublishQueue>,
}

impl VirtualSwitch {
    /// Current state of `switch`, if it exists.
    pub fn state(&self, switch: &str) -> Option<bool> {
        self.switches.get(switch).copied()
    }

    fn publish_state(&self, switch: &str, on: bool) -> Result<(), ModuleError> {
        let publish = self
            .publish
            .as_ref()
            .ok_or_else(|| ModuleError::failed("virtual switch used before load"))?;
        let path = format!("{switch}{PATH_SEPARATOR}{STATE}");
        publish
            .publish(PublishMessage::new(path, render(on)).retained())
            .map_err(|e| ModuleError::failed(e.to_string()))
    }
}

fn parse_state(payload: &str) -> Option<bool> {
    match payload.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Some(true),
        "off" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn render(on: bool) -> &'static str {
    if on { "ON" } else { "OFF" }
}

fn switch_names(config: &ModuleConfig) -> Result<Vec<String>, ModuleError> {
    let Some(value) = config.get("switches") else {
        return Ok(vec![DEFAULT_SWITCH.to_string()]);
    };
    let list = value
        .as_array()
        .ok_or_else(|| ModuleError::failed("'switches' must be an array of names"))?;
    list.iter()
        .map(|v| match v.as_str() {
            Some(name) if !name.is_empty() && !name.contains(PATH_SEPARATOR) => {
                Ok(name.to_string())
            }
            _ => Err(ModuleError::failed(format!("invalid switch name: {v}"))),
        })
        .collect()
}

#[async_trait]
impl Module for VirtualSwitch {
    async fn start(&mut self) -> Result<(), ModuleError> {
        for (switch, on) in &self.switches {
            self.publish_state(switch, *on)?;
        }
        Ok(())
    }
}

#[async_trait]
impl InterfaceModule for VirtualSwitch {
    async fn load(&mut self, config: &ModuleConfig, ctx: InterfaceContext) -> Result<(), ModuleError> {
        self.switches = switch_names(config)?
            .into_iter()
            .map(|name| (name, false))
            .collect();
        self.id = ctx.id;
        self.publish = Some(ctx.publish);
        info!(module = %self.id, switches = self.switches.len(), "virtual switches loaded");
        Ok(())
    }

    fn nodes(&self) -> Vec<Node> {
        self.switches
            .keys()
            .map(|name| {
                Node::new(name, name).with_property(
                    STATE,
                    Property::new("State", DataType::Boolean)
                        .with_format("ON,OFF")
                        .settable(ON_STATE),
                )
            })
            .collect()
    }

    fn callbacks(&self) -> Vec<&'static str> {
        vec![ON_STATE]
    }

    async fn dispatch(
        &mut self,
        callback: &str,
        message: SubscribeMessage,
    ) -> Result<(), ModuleError> {
        if callback != ON_STATE {
            return Err(ModuleError::UnknownCallback(callback.to_string()));
        }
        let invalid = |details: &str| ModuleError::InvalidPayload {
            path: message.path.clone(),
            details: details.to_string(),
        };
        let switch = split_path(&message.path)
            .map(|(node, _)| node.to_string())
            .ok_or_else(|| invalid("path has no node"))?;
        let on = parse_state(&message.content)
            .ok_or_else(|| invalid("expected ON/OFF, true/false or 1/0"))?;
        let slot = self
            .switches
            .get_mut(&switch)
            .ok_or_else(|| invalid("no such switch"))?;
        *slot = on;
        info!(module = %self.id, switch = %switch, state = render(on), "switch set");
        self.publish_state(&switch, on)
    }
}
