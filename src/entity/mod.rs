//! Entity Projector (`spec.md` §4.3): maps `(message-name, instance)`
//! tuples to configured entities and projects decoded messages into
//! entity state updates.

pub mod project;
pub mod transform;

use std::collections::HashMap;

use serde::Deserialize;

use crate::entity::transform::Expression;
use crate::error::BridgeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Sensor,
    BinarySensor,
    Light,
    Climate,
    Switch,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Sensor => "sensor",
            EntityKind::BinarySensor => "binary_sensor",
            EntityKind::Light => "light",
            EntityKind::Climate => "climate",
            EntityKind::Switch => "switch",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AllowedRange {
    pub min: f64,
    pub max: f64,
}

/// An entity descriptor as loaded from the entity mapping file
/// (`SPEC_FULL.md` §4.8).
#[derive(Debug, Clone, Deserialize)]
pub struct EntityDescriptor {
    pub entity_id: String,
    pub kind: EntityKind,
    pub source_message: String,
    #[serde(default)]
    pub source_instance: Option<u8>,
    pub signal_field: String,
    #[serde(default)]
    pub transform: Option<Expression>,
    pub device_id: String,
    #[serde(default)]
    pub on_label: Option<String>,
    #[serde(default)]
    pub off_label: Option<String>,
    #[serde(default)]
    pub allowed_range: Option<AllowedRange>,
    #[serde(default)]
    pub allowed_values: Option<Vec<String>>,
    #[serde(default)]
    pub supports_brightness: bool,
    /// Climate entities drive up to four channels from distinct signals;
    /// present only for `kind == Climate`.
    #[serde(default)]
    pub climate_signals: Option<ClimateSignals>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClimateSignals {
    #[serde(default)]
    pub mode_field: Option<String>,
    #[serde(default)]
    pub current_temperature_field: Option<String>,
    #[serde(default)]
    pub setpoint_temperature_field: Option<String>,
    #[serde(default)]
    pub fan_mode_field: Option<String>,
}

/// The `(message-name, instance) -> [EntityDescriptor]` index built at
/// load, with constant-time lookups (`spec.md` §3 lookup invariant).
/// `source_instance == None` entries are indexed under every instance
/// already observed for that message name, plus a wildcard bucket
/// consulted when a specific instance has no match.
pub struct EntityIndex {
    exact: HashMap<(String, u8), Vec<EntityDescriptor>>,
    wildcard: HashMap<String, Vec<EntityDescriptor>>,
    by_id: HashMap<String, EntityDescriptor>,
}

#[derive(Debug, thiserror::Error)]
pub enum EntityMapError {
    #[error("duplicate entity_id {0}")]
    DuplicateEntityId(String),
}

impl EntityIndex {
    pub fn build(descriptors: Vec<EntityDescriptor>) -> Result<Self, EntityMapError> {
        let mut exact: HashMap<(String, u8), Vec<EntityDescriptor>> = HashMap::new();
        let mut wildcard: HashMap<String, Vec<EntityDescriptor>> = HashMap::new();
        let mut by_id: HashMap<String, EntityDescriptor> = HashMap::new();

        for descriptor in descriptors {
            if by_id.contains_key(&descriptor.entity_id) {
                return Err(EntityMapError::DuplicateEntityId(descriptor.entity_id));
            }
            by_id.insert(descriptor.entity_id.clone(), descriptor.clone());
            match descriptor.source_instance {
                Some(instance) => {
                    exact
                        .entry((descriptor.source_message.clone(), instance))
                        .or_default()
                        .push(descriptor);
                }
                None => {
                    wildcard
                        .entry(descriptor.source_message.clone())
                        .or_default()
                        .push(descriptor);
                }
            }
        }

        Ok(Self {
            exact,
            wildcard,
            by_id,
        })
    }

    /// All descriptors matching `(message_name, instance)`: exact-instance
    /// matches first, then any-instance (`source_instance: null`) matches.
    pub fn lookup(&self, message_name: &str, instance: u8) -> Vec<&EntityDescriptor> {
        let mut out: Vec<&EntityDescriptor> = Vec::new();
        if let Some(v) = self.exact.get(&(message_name.to_string(), instance)) {
            out.extend(v.iter());
        }
        if let Some(v) = self.wildcard.get(message_name) {
            out.extend(v.iter());
        }
        out
    }

    pub fn by_entity_id(&self, entity_id: &str) -> Option<&EntityDescriptor> {
        self.by_id.get(entity_id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Load the entity mapping file from disk (`SPEC_FULL.md` §4.8) and
    /// build the lookup index.
    pub fn load_file(path: &std::path::Path) -> Result<Self, BridgeError> {
        let contents = std::fs::read_to_string(path)?;
        let descriptors: Vec<EntityDescriptor> =
            serde_json::from_str(&contents).map_err(|e| BridgeError::EntityMap(e.to_string()))?;
        Self::build(descriptors).map_err(|e| BridgeError::EntityMap(e.to_string()))
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &EntityDescriptor> {
        self.by_id.values()
    }
}

/// A published value on one of an entity's channels (`spec.md` §6).
#[derive(Debug, Clone, PartialEq)]
pub enum PublishValue {
    Number(f64),
    Text(String),
    Bool(bool),
}

/// The default (non-climate) channel name, per `spec.md` §6.
pub const DEFAULT_CHANNEL: &str = "state";
/// Second channel used only by dimmable lights (`supports_brightness`);
/// see `SPEC_FULL.md`/DESIGN.md for why this is not folded into a single
/// channel the way other non-climate kinds are.
pub const CHANNEL_BRIGHTNESS: &str = "brightness";
pub const CHANNEL_MODE: &str = "mode";
pub const CHANNEL_CURRENT_TEMPERATURE: &str = "current_temperature";
pub const CHANNEL_SETPOINT_TEMPERATURE: &str = "setpoint_temperature";
pub const CHANNEL_FAN_MODE: &str = "fan_mode";

/// One emitted state update (`spec.md` §3/§6 `EntityStateEvent`).
#[derive(Debug, Clone, PartialEq)]
pub struct EntityStateEvent {
    pub entity_id: String,
    pub kind: EntityKind,
    pub channel: &'static str,
    pub value: PublishValue,
}
