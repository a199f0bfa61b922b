//! End-to-end scenarios S1-S6 and a couple of cross-module invariants.

use rvc_mqtt_bridge::command::codec::encode;
use rvc_mqtt_bridge::command::validate::{PolicyConfig, Validator};
use rvc_mqtt_bridge::command::{Action, CandidateCommand, CommandValue, Family};
use rvc_mqtt_bridge::decode::FrameDecoder;
use rvc_mqtt_bridge::entity::project::EntityProjector;
use rvc_mqtt_bridge::entity::{EntityDescriptor, EntityIndex, EntityKind, PublishValue};
use rvc_mqtt_bridge::error::ValidatorCode;
use rvc_mqtt_bridge::frame::RawFrame;
use rvc_mqtt_bridge::ratelimit::{RateLimitConfig, RateLimiter};
use rvc_mqtt_bridge::registry::SpecRegistry;

const TANK_SPEC: &str = r#"{
    "dgns": [
        {
            "dgn": 131511,
            "name": "TANK_STATUS",
            "signals": [
                {"name": "instance", "byte_offset": 0, "bit_length": 8, "kind": "uint"},
                {"name": "relative_level", "byte_offset": 1, "bit_offset": 0, "bit_length": 2, "kind": "uint", "resolution": 4}
            ]
        }
    ],
    "enums": []
}"#;

#[test]
fn s1_inbound_tank_decode_and_projection() {
    let registry = SpecRegistry::load(TANK_SPEC).unwrap();
    let decoder = FrameDecoder::new(&registry);
    let frame = RawFrame::new(0x19FFB700, vec![0x00, 0x03, 0x04, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    let msg = decoder.decode(&frame).unwrap();

    let descriptor = EntityDescriptor {
        entity_id: "tank_fresh_0".into(),
        kind: EntityKind::Sensor,
        source_message: "TANK_STATUS".into(),
        source_instance: Some(0),
        signal_field: "relative_level".into(),
        transform: None,
        device_id: "dev".into(),
        on_label: None,
        off_label: None,
        allowed_range: None,
        allowed_values: None,
        supports_brightness: false,
        climate_signals: None,
    };
    let index = EntityIndex::build(vec![descriptor]).unwrap();
    let projector = EntityProjector::new(&index);
    let events = projector.project(&msg);

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].entity_id, "tank_fresh_0");
    assert_eq!(events[0].value, PublishValue::Number(75.0));
}

fn light_descriptor() -> EntityDescriptor {
    EntityDescriptor {
        entity_id: "light_ceiling".into(),
        kind: EntityKind::Light,
        source_message: "DC_DIMMER_STATUS".into(),
        source_instance: Some(1),
        signal_field: "brightness".into(),
        transform: None,
        device_id: "dev".into(),
        on_label: None,
        off_label: None,
        allowed_range: None,
        allowed_values: None,
        supports_brightness: true,
        climate_signals: None,
    }
}

#[test]
fn s2_and_s3_light_commands_validate_and_encode() {
    let descriptor = light_descriptor();
    let index = EntityIndex::build(vec![descriptor]).unwrap();
    let policy = PolicyConfig::default();
    let limiter = RateLimiter::new(RateLimitConfig::default());
    let validator = Validator::new(&index, &policy, &limiter);

    let on = CandidateCommand {
        entity_id: "light_ceiling".into(),
        family: Family::Light,
        action: Some(Action::State),
        value: CommandValue::Str("ON".into()),
    };
    let normalized = validator.validate(on).unwrap();
    let descriptor = index.by_entity_id("light_ceiling").unwrap();
    let seq = encode(descriptor, &normalized).unwrap();
    assert_eq!(seq.len(), 3);
    assert!(seq.iter().all(|f| f.arb_id == 0x19FEDB63));
    assert_eq!(seq[0].payload[2], 0xC8);

    let limiter2 = RateLimiter::new(RateLimitConfig::default());
    let validator2 = Validator::new(&index, &policy, &limiter2);
    let brightness = CandidateCommand {
        entity_id: "light_ceiling".into(),
        family: Family::Light,
        action: Some(Action::Brightness),
        value: CommandValue::Int(50),
    };
    let normalized = validator2.validate(brightness).unwrap();
    let seq = encode(descriptor, &normalized).unwrap();
    assert_eq!(seq[0].payload[2], 0x64);
}

#[test]
fn s5_rate_limit_rejects_rapid_repeats() {
    let limiter = RateLimiter::new(RateLimitConfig { global_rate: 10, entity_rate: 2, entity_cooldown_ms: 500 });
    assert!(limiter.admit("light_ceiling").is_ok());
    let err = limiter.admit("light_ceiling").unwrap_err();
    assert!(matches!(err.code, ValidatorCode::E020CooldownNotElapsed | ValidatorCode::E019RateExceeded));
}

#[test]
fn s6_out_of_range_brightness_rejected_with_zero_frames() {
    let descriptor = light_descriptor();
    let index = EntityIndex::build(vec![descriptor]).unwrap();
    let policy = PolicyConfig::default();
    let limiter = RateLimiter::new(RateLimitConfig::default());
    let validator = Validator::new(&index, &policy, &limiter);

    let cmd = CandidateCommand {
        entity_id: "light_ceiling".into(),
        family: Family::Light,
        action: Some(Action::Brightness),
        value: CommandValue::Int(150),
    };
    let err = validator.validate(cmd).unwrap_err();
    assert_eq!(err.code, ValidatorCode::E014AboveMaximum);
}

#[test]
fn rejected_command_never_reaches_the_encoder() {
    // A rejected command has no NormalizedCommand, so there is no way to
    // call `encode` at all; this test documents that invariant at the
    // type level rather than re-deriving it at runtime.
    let descriptor = light_descriptor();
    let index = EntityIndex::build(vec![descriptor]).unwrap();
    let policy = PolicyConfig::default();
    let limiter = RateLimiter::new(RateLimitConfig::default());
    let validator = Validator::new(&index, &policy, &limiter);
    let cmd = CandidateCommand {
        entity_id: "light_ceiling".into(),
        family: Family::Light,
        action: Some(Action::Brightness),
        value: CommandValue::Int(-5),
    };
    assert!(validator.validate(cmd).is_err());
}
