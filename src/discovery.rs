//! Discovery payload construction (`spec.md` §1, §6): out of scope for
//! the core's algorithms, but a mechanical data-contract builder so the
//! broker-side glue can auto-configure a consumer's UI per entity.

use serde::Serialize;

use crate::entity::{EntityDescriptor, EntityKind};

#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryPayload {
    pub entity_id: String,
    pub device_id: String,
    pub kind: &'static str,
    pub channels: Vec<&'static str>,
    pub supports_brightness: bool,
    pub allowed_values: Option<Vec<String>>,
}

/// Build the discovery payload for one entity descriptor. Channel lists
/// mirror the Entity Projector's publish channels (`spec.md` §4.3/§6) so
/// a consumer never has to guess which topics an entity will populate.
pub fn build_payload(descriptor: &EntityDescriptor) -> DiscoveryPayload {
    let channels = match descriptor.kind {
        EntityKind::Climate => vec!["mode", "current_temperature", "setpoint_temperature", "fan_mode"],
        EntityKind::Light if descriptor.supports_brightness => vec!["state", "brightness"],
        _ => vec!["state"],
    };

    DiscoveryPayload {
        entity_id: descriptor.entity_id.clone(),
        device_id: descriptor.device_id.clone(),
        kind: descriptor.kind.as_str(),
        channels,
        supports_brightness: descriptor.supports_brightness,
        allowed_values: descriptor.allowed_values.clone(),
    }
}
