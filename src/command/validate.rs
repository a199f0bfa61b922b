//! Command Validator (`spec.md` §4.4): five ordered stages, first failure
//! short-circuits. Stages 1-4 are pure functions of the input, the entity
//! index, and configuration; stage 5 consults and updates shared rate
//! limiter state and must be serialized by the caller.

use std::collections::HashSet;

use crate::command::{Action, CandidateCommand, CommandValue, Family, NormalizedCommand};
use crate::entity::{EntityIndex, EntityKind};
use crate::error::{ValidatorCode, ValidatorError};
use crate::ratelimit::RateLimiter;

/// Stage-4 policy configuration (`spec.md` §6 configuration surface).
#[derive(Debug, Clone, Default)]
pub struct PolicyConfig {
    pub denylist: HashSet<String>,
    pub allowlist: HashSet<String>,
    pub allowed_families: HashSet<Family>,
}

fn entity_kind_family(kind: EntityKind) -> Option<Family> {
    match kind {
        EntityKind::Light => Some(Family::Light),
        EntityKind::Climate => Some(Family::Climate),
        EntityKind::Switch => Some(Family::Switch),
        EntityKind::Sensor | EntityKind::BinarySensor => None,
    }
}

fn err(code: ValidatorCode, msg: impl Into<String>) -> ValidatorError {
    ValidatorError::new(code, msg)
}

/// Stage 1: resolve an explicit `Action` from the candidate, enforcing
/// "action is present iff the family requires one" (`spec.md` §3).
fn stage1_schema(cmd: &CandidateCommand) -> Result<Action, ValidatorError> {
    match cmd.family {
        Family::Light => match cmd.action {
            Some(a @ (Action::State | Action::Brightness)) => Ok(a),
            _ => Err(err(ValidatorCode::E004MissingAction, "light requires action state or brightness")),
        },
        Family::Climate => match cmd.action {
            Some(a @ (Action::Mode | Action::Temperature | Action::FanMode)) => Ok(a),
            _ => Err(err(
                ValidatorCode::E004MissingAction,
                "climate requires action mode, temperature, or fan_mode",
            )),
        },
        Family::Switch => match cmd.action {
            None | Some(Action::State) => Ok(Action::State),
            Some(_) => Err(err(ValidatorCode::E004MissingAction, "switch has only the state action")),
        },
    }
}

/// Stage 2: resolve the entity and check its kind matches the command's
/// family.
fn stage2_entity<'a>(
    cmd: &CandidateCommand,
    index: &'a EntityIndex,
) -> Result<&'a crate::entity::EntityDescriptor, ValidatorError> {
    let descriptor = index
        .by_entity_id(&cmd.entity_id)
        .ok_or_else(|| err(ValidatorCode::E006UnknownEntity, format!("no such entity: {}", cmd.entity_id)))?;

    match entity_kind_family(descriptor.kind) {
        Some(family) if family == cmd.family => Ok(descriptor),
        _ => Err(err(
            ValidatorCode::E008WrongFamily,
            format!("entity {} is not a {} device", cmd.entity_id, cmd.family.as_str()),
        )),
    }
}

fn case_insensitive_match(value: &str, allowed: &[&str]) -> Option<&'static str> {
    allowed
        .iter()
        .find(|a| a.eq_ignore_ascii_case(value))
        .map(|a| *a)
}

/// Stage 3: type and domain checks per the table in `spec.md` §4.4.
fn stage3_range(family: Family, action: Action, value: &CommandValue) -> Result<CommandValue, ValidatorError> {
    match (family, action) {
        (Family::Light, Action::State) | (Family::Switch, Action::State) => {
            let CommandValue::Str(s) = value else {
                return Err(err(ValidatorCode::E011WrongType, "state must be a string"));
            };
            case_insensitive_match(s, &["ON", "OFF"])
                .map(|m| CommandValue::Str(m.to_string()))
                .ok_or_else(|| err(ValidatorCode::E012NotEnumerated, format!("'{s}' is not ON or OFF")))
        }
        (Family::Light, Action::Brightness) => {
            let n = as_i64(value).ok_or_else(|| err(ValidatorCode::E011WrongType, "brightness must be an integer"))?;
            if n < 0 {
                Err(err(ValidatorCode::E013BelowMinimum, "brightness below 0"))
            } else if n > 100 {
                Err(err(ValidatorCode::E014AboveMaximum, "brightness above 100"))
            } else {
                Ok(CommandValue::Int(n))
            }
        }
        (Family::Climate, Action::Mode) => {
            let CommandValue::Str(s) = value else {
                return Err(err(ValidatorCode::E011WrongType, "mode must be a string"));
            };
            case_insensitive_match(s, &["off", "heat", "cool", "auto"])
                .map(|m| CommandValue::Str(m.to_string()))
                .ok_or_else(|| err(ValidatorCode::E012NotEnumerated, format!("'{s}' is not a climate mode")))
        }
        (Family::Climate, Action::Temperature) => {
            let f = as_f64(value).ok_or_else(|| err(ValidatorCode::E011WrongType, "temperature must be numeric"))?;
            if f < 50.0 {
                Err(err(ValidatorCode::E013BelowMinimum, "temperature below 50F"))
            } else if f > 100.0 {
                Err(err(ValidatorCode::E014AboveMaximum, "temperature above 100F"))
            } else {
                Ok(CommandValue::Float(f))
            }
        }
        (Family::Climate, Action::FanMode) => {
            let CommandValue::Str(s) = value else {
                return Err(err(ValidatorCode::E011WrongType, "fan_mode must be a string"));
            };
            case_insensitive_match(s, &["auto", "low", "high"])
                .map(|m| CommandValue::Str(m.to_string()))
                .ok_or_else(|| err(ValidatorCode::E012NotEnumerated, format!("'{s}' is not a fan mode")))
        }
        _ => Err(err(ValidatorCode::E008WrongFamily, "action not valid for family")),
    }
}

fn as_i64(value: &CommandValue) -> Option<i64> {
    match value {
        CommandValue::Int(v) => Some(*v),
        CommandValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
        _ => None,
    }
}

fn as_f64(value: &CommandValue) -> Option<f64> {
    match value {
        CommandValue::Int(v) => Some(*v as f64),
        CommandValue::Float(v) => Some(*v),
        _ => None,
    }
}

/// Stage 4: denylist / allowlist / allowed-families policy.
fn stage4_policy(cmd: &CandidateCommand, policy: &PolicyConfig) -> Result<(), ValidatorError> {
    if policy.denylist.contains(&cmd.entity_id) {
        return Err(err(ValidatorCode::E015Denylisted, format!("{} is denylisted", cmd.entity_id)));
    }
    if !policy.allowlist.is_empty() && !policy.allowlist.contains(&cmd.entity_id) {
        return Err(err(ValidatorCode::E017NotAllowlisted, format!("{} is not allowlisted", cmd.entity_id)));
    }
    if !policy.allowed_families.is_empty() && !policy.allowed_families.contains(&cmd.family) {
        return Err(err(
            ValidatorCode::E018FamilyNotAllowed,
            format!("family {} is not allowed", cmd.family.as_str()),
        ));
    }
    Ok(())
}

pub struct Validator<'a> {
    index: &'a EntityIndex,
    policy: &'a PolicyConfig,
    rate_limiter: &'a RateLimiter,
}

impl<'a> Validator<'a> {
    pub fn new(index: &'a EntityIndex, policy: &'a PolicyConfig, rate_limiter: &'a RateLimiter) -> Self {
        Self { index, policy, rate_limiter }
    }

    pub fn validate(&self, cmd: CandidateCommand) -> Result<NormalizedCommand, ValidatorError> {
        let action = stage1_schema(&cmd)?;
        stage2_entity(&cmd, self.index)?;
        let value = stage3_range(cmd.family, action, &cmd.value)?;
        stage4_policy(&cmd, self.policy)?;
        self.rate_limiter.admit(&cmd.entity_id)?;

        Ok(NormalizedCommand {
            entity_id: cmd.entity_id,
            family: cmd.family,
            action: Some(action),
            value,
            ts_enqueued: std::time::Instant::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{ClimateSignals, EntityDescriptor};
    use crate::ratelimit::RateLimitConfig;

    fn light_entity(entity_id: &str) -> EntityDescriptor {
        EntityDescriptor {
            entity_id: entity_id.to_string(),
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

    fn build(descriptors: Vec<EntityDescriptor>) -> EntityIndex {
        EntityIndex::build(descriptors).unwrap()
    }

    #[test]
    fn accepts_valid_light_brightness() {
        let index = build(vec![light_entity("light_ceiling")]);
        let policy = PolicyConfig::default();
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let validator = Validator::new(&index, &policy, &limiter);
        let cmd = CandidateCommand {
            entity_id: "light_ceiling".into(),
            family: Family::Light,
            action: Some(Action::Brightness),
            value: CommandValue::Int(50),
        };
        let normalized = validator.validate(cmd).unwrap();
        assert_eq!(normalized.value, CommandValue::Int(50));
    }

    #[test]
    fn rejects_out_of_range_brightness_s6() {
        let index = build(vec![light_entity("light_ceiling")]);
        let policy = PolicyConfig::default();
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let validator = Validator::new(&index, &policy, &limiter);
        let cmd = CandidateCommand {
            entity_id: "light_ceiling".into(),
            family: Family::Light,
            action: Some(Action::Brightness),
            value: CommandValue::Int(150),
        };
        let e = validator.validate(cmd).unwrap_err();
        assert_eq!(e.code, ValidatorCode::E014AboveMaximum);
    }

    #[test]
    fn rejects_unknown_entity() {
        let index = build(vec![]);
        let policy = PolicyConfig::default();
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let validator = Validator::new(&index, &policy, &limiter);
        let cmd = CandidateCommand {
            entity_id: "nope".into(),
            family: Family::Light,
            action: Some(Action::State),
            value: CommandValue::Str("ON".into()),
        };
        let e = validator.validate(cmd).unwrap_err();
        assert_eq!(e.code, ValidatorCode::E006UnknownEntity);
    }

    #[test]
    fn rejects_wrong_family() {
        let index = build(vec![light_entity("light_ceiling")]);
        let policy = PolicyConfig::default();
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let validator = Validator::new(&index, &policy, &limiter);
        let cmd = CandidateCommand {
            entity_id: "light_ceiling".into(),
            family: Family::Switch,
            action: None,
            value: CommandValue::Str("ON".into()),
        };
        let e = validator.validate(cmd).unwrap_err();
        assert_eq!(e.code, ValidatorCode::E008WrongFamily);
    }

    #[test]
    fn stage4_denylist_blocks_command() {
        let index = build(vec![light_entity("light_ceiling")]);
        let mut policy = PolicyConfig::default();
        policy.denylist.insert("light_ceiling".to_string());
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let validator = Validator::new(&index, &policy, &limiter);
        let cmd = CandidateCommand {
            entity_id: "light_ceiling".into(),
            family: Family::Light,
            action: Some(Action::Brightness),
            value: CommandValue::Int(10),
        };
        let e = validator.validate(cmd).unwrap_err();
        assert_eq!(e.code, ValidatorCode::E015Denylisted);
    }

    #[test]
    fn climate_requires_an_action() {
        let descriptor = EntityDescriptor {
            entity_id: "zone0".into(),
            kind: EntityKind::Climate,
            source_message: "THERMOSTAT_STATUS".into(),
            source_instance: Some(0),
            signal_field: "unused".into(),
            transform: None,
            device_id: "dev".into(),
            on_label: None,
            off_label: None,
            allowed_range: None,
            allowed_values: None,
            supports_brightness: false,
            climate_signals: Some(ClimateSignals {
                mode_field: None,
                current_temperature_field: None,
                setpoint_temperature_field: None,
                fan_mode_field: None,
            }),
        };
        let index = build(vec![descriptor]);
        let policy = PolicyConfig::default();
        let limiter = RateLimiter::new(RateLimitConfig::default());
        let validator = Validator::new(&index, &policy, &limiter);
        let cmd = CandidateCommand {
            entity_id: "zone0".into(),
            family: Family::Climate,
            action: None,
            value: CommandValue::Float(72.0),
        };
        let e = validator.validate(cmd).unwrap_err();
        assert_eq!(e.code, ValidatorCode::E004MissingAction);
    }
}
