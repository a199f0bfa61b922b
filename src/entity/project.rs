//! Kind-specific projection rules (`spec.md` §4.3).

use tracing::debug;

use crate::decode::{DecodedMessage, Value};
use crate::entity::{
    EntityDescriptor, EntityIndex, EntityKind, EntityStateEvent, PublishValue, CHANNEL_BRIGHTNESS,
    CHANNEL_CURRENT_TEMPERATURE, CHANNEL_FAN_MODE, CHANNEL_MODE, CHANNEL_SETPOINT_TEMPERATURE,
    DEFAULT_CHANNEL,
};

pub struct EntityProjector<'a> {
    index: &'a EntityIndex,
}

impl<'a> EntityProjector<'a> {
    pub fn new(index: &'a EntityIndex) -> Self {
        Self { index }
    }

    /// Translate a decoded message into zero or more entity state updates.
    /// Duplicate suppression is not performed here; that is the
    /// publisher's retention concern (`spec.md` §4.3).
    pub fn project(&self, msg: &DecodedMessage) -> Vec<EntityStateEvent> {
        let mut events = Vec::new();
        for descriptor in self.index.lookup(&msg.dgn_name, msg.instance) {
            project_one(descriptor, msg, &mut events);
        }
        events
    }
}

fn project_one(descriptor: &EntityDescriptor, msg: &DecodedMessage, out: &mut Vec<EntityStateEvent>) {
    match descriptor.kind {
        EntityKind::Sensor => project_sensor(descriptor, msg, out),
        EntityKind::BinarySensor | EntityKind::Switch => project_binary(descriptor, msg, out),
        EntityKind::Light => project_light(descriptor, msg, out),
        EntityKind::Climate => project_climate(descriptor, msg, out),
    }
}

/// The raw decoded value for `descriptor.signal_field`, or the
/// transform's scalar result if a transform is configured.
fn field_value<'m>(descriptor: &EntityDescriptor, msg: &'m DecodedMessage) -> Option<FieldValue<'m>> {
    let raw = msg.signal(&descriptor.signal_field)?;
    if let Some(transform) = &descriptor.transform {
        let scalar = transform.eval(&msg.signals)?;
        return Some(FieldValue::Scalar(scalar));
    }
    Some(FieldValue::Raw(raw))
}

enum FieldValue<'m> {
    Raw(&'m Value),
    Scalar(f64),
}

fn project_sensor(descriptor: &EntityDescriptor, msg: &DecodedMessage, out: &mut Vec<EntityStateEvent>) {
    let Some(field) = field_value(descriptor, msg) else {
        debug!(entity_id = %descriptor.entity_id, "sensor signal absent, skipping");
        return;
    };
    let value = match field {
        FieldValue::Scalar(v) => PublishValue::Number(v),
        FieldValue::Raw(Value::Integer(v)) => PublishValue::Number(*v as f64),
        FieldValue::Raw(Value::Float(v)) => PublishValue::Number(*v),
        FieldValue::Raw(Value::Raw(v)) => PublishValue::Number(*v as f64),
        FieldValue::Raw(Value::Boolean(v)) => PublishValue::Bool(*v),
        FieldValue::Raw(Value::EnumeratedLabel(label)) => PublishValue::Text(label.clone()),
        FieldValue::Raw(Value::UnknownEnumValue(raw)) => PublishValue::Text(format!("unknown:{raw}")),
        FieldValue::Raw(Value::Unavailable) => return,
    };
    out.push(EntityStateEvent {
        entity_id: descriptor.entity_id.clone(),
        kind: descriptor.kind,
        channel: DEFAULT_CHANNEL,
        value,
    });
}

fn is_on(field: &FieldValue, descriptor: &EntityDescriptor) -> Option<bool> {
    match field {
        FieldValue::Scalar(v) => Some(*v != 0.0),
        FieldValue::Raw(Value::Boolean(v)) => Some(*v),
        FieldValue::Raw(Value::Integer(v)) => Some(*v != 0),
        FieldValue::Raw(Value::Float(v)) => Some(*v != 0.0),
        FieldValue::Raw(Value::Raw(v)) => Some(*v != 0),
        FieldValue::Raw(Value::EnumeratedLabel(label)) => {
            if Some(label.as_str()) == descriptor.on_label.as_deref() {
                Some(true)
            } else if Some(label.as_str()) == descriptor.off_label.as_deref() {
                Some(false)
            } else {
                None
            }
        }
        FieldValue::Raw(Value::UnknownEnumValue(_)) | FieldValue::Raw(Value::Unavailable) => None,
    }
}

fn project_binary(descriptor: &EntityDescriptor, msg: &DecodedMessage, out: &mut Vec<EntityStateEvent>) {
    let Some(field) = field_value(descriptor, msg) else {
        return;
    };
    let Some(on) = is_on(&field, descriptor) else {
        debug!(entity_id = %descriptor.entity_id, "binary signal neither on_label nor off_label, emitting nothing");
        return;
    };
    out.push(EntityStateEvent {
        entity_id: descriptor.entity_id.clone(),
        kind: descriptor.kind,
        channel: DEFAULT_CHANNEL,
        value: PublishValue::Bool(on),
    });
}

fn project_light(descriptor: &EntityDescriptor, msg: &DecodedMessage, out: &mut Vec<EntityStateEvent>) {
    let Some(field) = field_value(descriptor, msg) else {
        return;
    };
    let raw_brightness = match &field {
        FieldValue::Scalar(v) => *v,
        FieldValue::Raw(v) => v.as_f64().unwrap_or(0.0),
    };
    out.push(EntityStateEvent {
        entity_id: descriptor.entity_id.clone(),
        kind: descriptor.kind,
        channel: DEFAULT_CHANNEL,
        value: PublishValue::Bool(raw_brightness != 0.0),
    });
    if descriptor.supports_brightness {
        // RV-C reports 0..200; halve with round-to-nearest into 0..100.
        let pct = ((raw_brightness / 2.0) + 0.5).floor().clamp(0.0, 100.0);
        out.push(EntityStateEvent {
            entity_id: descriptor.entity_id.clone(),
            kind: descriptor.kind,
            channel: CHANNEL_BRIGHTNESS,
            value: PublishValue::Number(pct),
        });
    }
}

fn project_climate(descriptor: &EntityDescriptor, msg: &DecodedMessage, out: &mut Vec<EntityStateEvent>) {
    let Some(climate) = &descriptor.climate_signals else {
        debug!(entity_id = %descriptor.entity_id, "climate entity missing climate_signals mapping");
        return;
    };

    if let Some(field) = &climate.mode_field {
        if let Some(value) = msg.signal(field) {
            if let Some(text) = to_text(value) {
                out.push(EntityStateEvent {
                    entity_id: descriptor.entity_id.clone(),
                    kind: descriptor.kind,
                    channel: CHANNEL_MODE,
                    value: PublishValue::Text(text),
                });
            }
        }
    }
    if let Some(field) = &climate.current_temperature_field {
        if let Some(value) = msg.signal(field).and_then(Value::as_f64) {
            out.push(EntityStateEvent {
                entity_id: descriptor.entity_id.clone(),
                kind: descriptor.kind,
                channel: CHANNEL_CURRENT_TEMPERATURE,
                value: PublishValue::Number(value),
            });
        }
    }
    if let Some(field) = &climate.setpoint_temperature_field {
        if let Some(value) = msg.signal(field).and_then(Value::as_f64) {
            out.push(EntityStateEvent {
                entity_id: descriptor.entity_id.clone(),
                kind: descriptor.kind,
                channel: CHANNEL_SETPOINT_TEMPERATURE,
                value: PublishValue::Number(value),
            });
        }
    }
    if let Some(field) = &climate.fan_mode_field {
        if let Some(value) = msg.signal(field) {
            if let Some(text) = to_text(value) {
                out.push(EntityStateEvent {
                    entity_id: descriptor.entity_id.clone(),
                    kind: descriptor.kind,
                    channel: CHANNEL_FAN_MODE,
                    value: PublishValue::Text(text),
                });
            }
        }
    }
}

fn to_text(value: &Value) -> Option<String> {
    match value {
        Value::EnumeratedLabel(label) => Some(label.clone()),
        Value::UnknownEnumValue(raw) => Some(format!("unknown:{raw}")),
        Value::Integer(v) => Some(v.to_string()),
        Value::Float(v) => Some(v.to_string()),
        Value::Boolean(v) => Some(v.to_string()),
        Value::Raw(v) => Some(v.to_string()),
        Value::Unavailable => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{DecodedMessage, Value};
    use crate::entity::ClimateSignals;
    use std::collections::HashMap;
    use std::time::Instant;

    fn msg(dgn_name: &str, instance: u8, signals: Vec<(&str, Value)>) -> DecodedMessage {
        DecodedMessage {
            dgn: 1,
            dgn_name: dgn_name.to_string(),
            instance,
            source_addr: 0,
            signals: signals.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            rx_ts: Instant::now(),
        }
    }

    fn base_descriptor(entity_id: &str, kind: EntityKind, message: &str, field: &str) -> EntityDescriptor {
        EntityDescriptor {
            entity_id: entity_id.to_string(),
            kind,
            source_message: message.to_string(),
            source_instance: Some(0),
            signal_field: field.to_string(),
            transform: None,
            device_id: "dev".to_string(),
            on_label: None,
            off_label: None,
            allowed_range: None,
            allowed_values: None,
            supports_brightness: false,
            climate_signals: None,
        }
    }

    #[test]
    fn sensor_emits_numeric_state() {
        let descriptor = base_descriptor("tank_fresh_0", EntityKind::Sensor, "TANK_STATUS", "relative_level");
        let index = EntityIndex::build(vec![descriptor]).unwrap();
        let projector = EntityProjector::new(&index);
        let m = msg("TANK_STATUS", 0, vec![("relative_level", Value::Float(75.0))]);
        let events = projector.project(&m);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].entity_id, "tank_fresh_0");
        assert_eq!(events[0].value, PublishValue::Number(75.0));
    }

    #[test]
    fn binary_sensor_matches_labels() {
        let mut d = base_descriptor("door_0", EntityKind::BinarySensor, "DOOR_STATUS", "state");
        d.on_label = Some("open".into());
        d.off_label = Some("closed".into());
        let index = EntityIndex::build(vec![d]).unwrap();
        let projector = EntityProjector::new(&index);

        let m_open = msg("DOOR_STATUS", 0, vec![("state", Value::EnumeratedLabel("open".into()))]);
        let events = projector.project(&m_open);
        assert_eq!(events[0].value, PublishValue::Bool(true));

        let m_closed = msg("DOOR_STATUS", 0, vec![("state", Value::EnumeratedLabel("closed".into()))]);
        let events = projector.project(&m_closed);
        assert_eq!(events[0].value, PublishValue::Bool(false));

        let m_other = msg("DOOR_STATUS", 0, vec![("state", Value::EnumeratedLabel("ajar".into()))]);
        assert!(projector.project(&m_other).is_empty());
    }

    #[test]
    fn light_halves_brightness_with_round_to_nearest() {
        let mut d = base_descriptor("light_ceiling", EntityKind::Light, "DC_DIMMER_STATUS", "brightness");
        d.supports_brightness = true;
        let index = EntityIndex::build(vec![d]).unwrap();
        let projector = EntityProjector::new(&index);
        let m = msg("DC_DIMMER_STATUS", 0, vec![("brightness", Value::Integer(101))]);
        let events = projector.project(&m);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].value, PublishValue::Bool(true));
        // 101 / 2 = 50.5 -> rounds to 51
        assert_eq!(events[1].value, PublishValue::Number(51.0));
        assert_eq!(events[1].channel, CHANNEL_BRIGHTNESS);
    }

    #[test]
    fn climate_emits_up_to_four_channels() {
        let mut d = base_descriptor("zone0", EntityKind::Climate, "THERMOSTAT_STATUS", "unused");
        d.climate_signals = Some(ClimateSignals {
            mode_field: Some("mode".into()),
            current_temperature_field: Some("current_temp".into()),
            setpoint_temperature_field: Some("setpoint".into()),
            fan_mode_field: Some("fan".into()),
        });
        let index = EntityIndex::build(vec![d]).unwrap();
        let projector = EntityProjector::new(&index);
        let m = msg(
            "THERMOSTAT_STATUS",
            0,
            vec![
                ("mode", Value::EnumeratedLabel("cool".into())),
                ("current_temp", Value::Float(72.0)),
                ("setpoint", Value::Float(70.0)),
                ("fan", Value::EnumeratedLabel("auto".into())),
            ],
        );
        let events = projector.project(&m);
        assert_eq!(events.len(), 4);
        assert!(events.iter().any(|e| e.channel == CHANNEL_MODE));
        assert!(events.iter().any(|e| e.channel == CHANNEL_CURRENT_TEMPERATURE));
        assert!(events.iter().any(|e| e.channel == CHANNEL_SETPOINT_TEMPERATURE));
        assert!(events.iter().any(|e| e.channel == CHANNEL_FAN_MODE));
    }

    #[test]
    fn wildcard_instance_matches_any() {
        let mut d = base_descriptor("any_tank", EntityKind::Sensor, "TANK_STATUS", "relative_level");
        d.source_instance = None;
        let index = EntityIndex::build(vec![d]).unwrap();
        let projector = EntityProjector::new(&index);
        let m = msg("TANK_STATUS", 7, vec![("relative_level", Value::Float(10.0))]);
        assert_eq!(projector.project(&m).len(), 1);
    }

    #[test]
    fn duplicate_entity_id_rejected() {
        let d1 = base_descriptor("dup", EntityKind::Sensor, "A", "f");
        let d2 = base_descriptor("dup", EntityKind::Sensor, "B", "f");
        assert!(EntityIndex::build(vec![d1, d2]).is_err());
    }
}
