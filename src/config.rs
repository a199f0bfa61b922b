//! Configuration (`SPEC_FULL.md` §4.11): an INI-style file covering the
//! recognized options of `spec.md` §6 plus the transport/broker/audit
//! settings the core's algorithms are agnostic to but the process needs
//! to start.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use ini::Ini;

use crate::command::Family;
use crate::command::validate::PolicyConfig;
use crate::error::BridgeError;
use crate::ratelimit::RateLimitConfig;
use crate::transmit::TransmitConfig;

fn get(ini: &Ini, section: Option<&str>, key: &str) -> Option<String> {
    ini.section(section).and_then(|s| s.get(key)).map(str::to_string)
}

fn get_required(ini: &Ini, section: Option<&str>, key: &str) -> Result<String, BridgeError> {
    get(ini, section, key).ok_or_else(|| BridgeError::Config(format!("missing required key: {key}")))
}

fn get_or<T: std::str::FromStr>(ini: &Ini, section: Option<&str>, key: &str, default: T) -> T {
    get(ini, section, key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn get_list(ini: &Ini, section: Option<&str>, key: &str) -> HashSet<String> {
    get(ini, section, key)
        .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_default()
}

/// Full process configuration, parsed once at startup (`spec.md` §5
/// "process-wide state lifecycle").
pub struct BridgeConfig {
    pub source_address: u8,
    pub transmit: TransmitConfig,
    pub rate_limit: RateLimitConfig,
    pub policy: PolicyConfig,
    pub spec_file: PathBuf,
    pub entity_map_file: PathBuf,
    pub slcan_host: String,
    pub slcan_port: u16,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_client_id: String,
    pub audit_log_path: PathBuf,
    pub audit_log_max_bytes: u64,
}

impl BridgeConfig {
    pub fn from_file(path: &Path) -> Result<Self, BridgeError> {
        let ini = Ini::load_from_file(path).map_err(|e| BridgeError::Config(e.to_string()))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, BridgeError> {
        let allowed_families = get(ini, Some("policy"), "allowed_families")
            .map(|v| {
                v.split(',')
                    .filter_map(|f| match f.trim().to_ascii_lowercase().as_str() {
                        "light" => Some(Family::Light),
                        "climate" => Some(Family::Climate),
                        "switch" => Some(Family::Switch),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            source_address: get_or(ini, None, "source_address", 99u8),
            transmit: TransmitConfig {
                retry_count: get_or(ini, None, "retry_count", 3),
                retry_delay_ms: get_or(ini, None, "retry_delay_ms", 100),
            },
            rate_limit: RateLimitConfig {
                global_rate: get_or(ini, None, "global_rate", 10),
                entity_rate: get_or(ini, None, "entity_rate", 2),
                entity_cooldown_ms: get_or(ini, None, "entity_cooldown_ms", 500),
            },
            policy: PolicyConfig {
                denylist: get_list(ini, Some("policy"), "denylist"),
                allowlist: get_list(ini, Some("policy"), "allowlist"),
                allowed_families,
            },
            spec_file: PathBuf::from(get_required(ini, Some("files"), "spec_file")?),
            entity_map_file: PathBuf::from(get_required(ini, Some("files"), "entity_map_file")?),
            slcan_host: get(ini, Some("transport"), "slcan_host").unwrap_or_else(|| "127.0.0.1".to_string()),
            slcan_port: get_or(ini, Some("transport"), "slcan_port", 5000u16),
            mqtt_host: get(ini, Some("mqtt"), "mqtt_host").unwrap_or_else(|| "127.0.0.1".to_string()),
            mqtt_port: get_or(ini, Some("mqtt"), "mqtt_port", 1883u16),
            mqtt_client_id: get(ini, Some("mqtt"), "mqtt_client_id").unwrap_or_else(|| "rvc-mqtt-bridge".to_string()),
            audit_log_path: PathBuf::from(
                get(ini, Some("audit"), "audit_log_path").unwrap_or_else(|| "rvc-bridge-audit.log".to_string()),
            ),
            audit_log_max_bytes: get_or(ini, Some("audit"), "audit_log_max_bytes", 10_000_000u64),
        })
    }
}
