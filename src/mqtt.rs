//! MQTT broker glue (`spec.md` §6): explicitly out of scope for the
//! core's algorithms ("the MQTT client... mechanical"), but the
//! publisher/subscriber boundary the core's channels attach to.

use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::command::{Action, CandidateCommand, CommandValue, Family};
use crate::entity::{EntityStateEvent, PublishValue};
use crate::error::{ValidatorCode, ValidatorError};

pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
}

/// Publishes `EntityStateEvent`s to `rvc/<entity_id>/<channel>` and
/// receives command messages on `rvc/<entity_id>/set/<family>/<action>`.
pub struct MqttBridge {
    client: AsyncClient,
}

#[derive(Debug, Serialize)]
struct StatePayload<'a> {
    value: &'a PublishValueJson,
}

/// Mirrors `PublishValue` with a serde-friendly shape for the wire.
#[derive(Debug, Serialize)]
#[serde(untagged)]
enum PublishValueJson {
    Number(f64),
    Text(String),
    Bool(bool),
}

impl From<&PublishValue> for PublishValueJson {
    fn from(v: &PublishValue) -> Self {
        match v {
            PublishValue::Number(n) => PublishValueJson::Number(*n),
            PublishValue::Text(s) => PublishValueJson::Text(s.clone()),
            PublishValue::Bool(b) => PublishValueJson::Bool(*b),
        }
    }
}

#[derive(Debug, Deserialize)]
struct CommandPayload {
    value: serde_json::Value,
}

impl MqttBridge {
    pub fn new(config: &MqttConfig) -> (Self, rumqttc::EventLoop) {
        let mut opts = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        opts.set_keep_alive(std::time::Duration::from_secs(30));
        let (client, eventloop) = AsyncClient::new(opts, 64);
        (Self { client }, eventloop)
    }

    pub async fn subscribe_commands(&self) -> Result<(), rumqttc::ClientError> {
        self.client.subscribe("rvc/+/set/#", QoS::AtLeastOnce).await
    }

    pub async fn publish_state(&self, event: &EntityStateEvent) {
        let topic = format!("rvc/{}/{}", event.entity_id, event.channel);
        let payload = StatePayload { value: &PublishValueJson::from(&event.value) };
        match serde_json::to_vec(&payload) {
            Ok(bytes) => {
                if let Err(e) = self.client.publish(&topic, QoS::AtLeastOnce, false, bytes).await {
                    warn!(topic = %topic, error = %e, "failed to publish entity state");
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize entity state"),
        }
    }
}

fn e001(msg: impl Into<String>) -> ValidatorError {
    ValidatorError::new(ValidatorCode::E001MissingField, msg)
}

/// Parse an inbound command topic/payload pair into a `CandidateCommand`.
/// Topic shape: `rvc/<entity_id>/set/<family>[/<action>]`. A malformed
/// topic or payload is a Stage 1 schema failure (`spec.md` §4.4 E001),
/// not a silent drop: the caller forwards the error as a `CommandError`.
pub fn parse_command(topic: &str, payload: &[u8]) -> Result<CandidateCommand, ValidatorError> {
    let mut parts = topic.split('/');
    if parts.next() != Some("rvc") {
        return Err(e001(format!("topic '{topic}' does not start with rvc/")));
    }
    let entity_id = parts.next().ok_or_else(|| e001(format!("topic '{topic}' is missing entity_id")))?.to_string();
    if parts.next() != Some("set") {
        return Err(e001(format!("topic '{topic}' is missing the set segment")));
    }
    let family = match parts.next() {
        Some("light") => Family::Light,
        Some("climate") => Family::Climate,
        Some("switch") => Family::Switch,
        Some(other) => return Err(e001(format!("'{other}' is not a known family"))),
        None => return Err(e001(format!("topic '{topic}' is missing family"))),
    };
    let action = match parts.next() {
        Some("state") => Some(Action::State),
        Some("brightness") => Some(Action::Brightness),
        Some("mode") => Some(Action::Mode),
        Some("temperature") => Some(Action::Temperature),
        Some("fan_mode") => Some(Action::FanMode),
        Some(other) => return Err(e001(format!("'{other}' is not a known action"))),
        None => None,
    };

    let decoded: CommandPayload =
        serde_json::from_slice(payload).map_err(|e| e001(format!("payload is not a valid command body: {e}")))?;
    let value = json_to_command_value(decoded.value)
        .ok_or_else(|| e001("command payload's value field has an unsupported type"))?;

    Ok(CandidateCommand { entity_id, family, action, value })
}

fn json_to_command_value(v: serde_json::Value) -> Option<CommandValue> {
    match v {
        serde_json::Value::Bool(b) => Some(CommandValue::Bool(b)),
        serde_json::Value::String(s) => Some(CommandValue::Str(s)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(CommandValue::Int(i))
            } else {
                n.as_f64().map(CommandValue::Float)
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_light_brightness_command() {
        let cmd = parse_command("rvc/light_ceiling/set/light/brightness", br#"{"value": 50}"#).unwrap();
        assert_eq!(cmd.entity_id, "light_ceiling");
        assert_eq!(cmd.family, Family::Light);
        assert_eq!(cmd.action, Some(Action::Brightness));
        assert_eq!(cmd.value, CommandValue::Int(50));
    }

    #[test]
    fn parses_switch_state_command_without_action_segment() {
        let cmd = parse_command("rvc/switch_pump/set/switch", br#"{"value": "ON"}"#).unwrap();
        assert_eq!(cmd.family, Family::Switch);
        assert_eq!(cmd.action, None);
    }

    #[test]
    fn rejects_malformed_topic() {
        let err = parse_command("not/rvc/topic", br#"{"value": 1}"#).unwrap_err();
        assert_eq!(err.code, ValidatorCode::E001MissingField);
    }
}
