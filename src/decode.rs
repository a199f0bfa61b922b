//! Frame Decoder (`spec.md` §4.2): resolves a `RawFrame` against the
//! `SpecRegistry` and extracts a typed `DecodedMessage`.
//!
//! The decoder is stateless and reentrant; a malformed frame is dropped
//! with a logged warning and never stalls decoding of subsequent frames
//! (`spec.md` §7).

use std::collections::HashMap;
use std::time::Instant;

use tracing::debug;

use crate::frame::{decompose_arb_id, RawFrame};
use crate::registry::{EnumDef, SignalDef, SignalKind, SpecRegistry};

/// A decoded signal value, tagged per `spec.md` §3.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Boolean(bool),
    EnumeratedLabel(String),
    /// Enum raw value with no matching label; carries the annotation
    /// "unknown" per `spec.md` §4.1.
    UnknownEnumValue(i64),
    Raw(u64),
    /// A reserved "not available" sentinel for the signal's width.
    Unavailable,
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
            Value::Raw(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Integer(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Boolean(v) => *v,
            Value::Raw(v) => *v != 0,
            Value::EnumeratedLabel(_) | Value::UnknownEnumValue(_) | Value::Unavailable => false,
        }
    }
}

/// A decoded message: one DGN's worth of signals from a single frame.
#[derive(Debug, Clone)]
pub struct DecodedMessage {
    pub dgn: u32,
    pub dgn_name: String,
    pub instance: u8,
    pub source_addr: u8,
    pub signals: HashMap<String, Value>,
    pub rx_ts: Instant,
}

impl DecodedMessage {
    pub fn signal(&self, name: &str) -> Option<&Value> {
        self.signals.get(name)
    }
}

/// Per-frame decode outcomes that are not a `DecodedMessage`; logged and
/// dropped, never propagated as a hard error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeWarning {
    UnknownDgn(u32),
    InvalidFrame { reason: String },
}

/// Extract a raw unsigned integer of `bit_length` bits starting at
/// `byte_offset`*8 + `bit_offset`, little-endian byte order, bit 0 = LSB.
fn extract_raw(data: &[u8], byte_offset: u8, bit_offset: u8, bit_length: u8) -> Option<u64> {
    let start_bit = byte_offset as u32 * 8 + bit_offset as u32;
    let end_bit = start_bit + bit_length as u32;
    if (end_bit as usize + 7) / 8 > data.len() {
        return None;
    }
    let mut value: u64 = 0;
    for bit in 0..bit_length as u32 {
        let abs_bit = start_bit + bit;
        let byte = data[(abs_bit / 8) as usize];
        let bit_in_byte = abs_bit % 8;
        let set = (byte >> bit_in_byte) & 1;
        value |= (set as u64) << bit;
    }
    Some(value)
}

fn sign_extend(raw: u64, bit_length: u8) -> i64 {
    if bit_length == 0 || bit_length >= 64 {
        return raw as i64;
    }
    let shift = 64 - bit_length as u32;
    ((raw << shift) as i64) >> shift
}

fn unavailable_sentinel(bit_length: u8) -> Option<u64> {
    match bit_length {
        8 => Some(0xFF),
        16 => Some(0xFFFF),
        32 => Some(0xFFFF_FFFF),
        _ => None,
    }
}

fn decode_signal(signal: &SignalDef, raw: u64, enums: &dyn Fn(&str) -> Option<EnumDef>) -> Value {
    if let Some(sentinel) = unavailable_sentinel(signal.bit_length) {
        if raw == sentinel && signal.kind != SignalKind::Enum {
            return Value::Unavailable;
        }
    }

    match signal.kind {
        SignalKind::Bool => Value::Boolean(raw != 0),
        SignalKind::Raw => Value::Raw(raw),
        SignalKind::Int => {
            let signed = sign_extend(raw, signal.bit_length);
            apply_scale(signal, signed as f64, signed)
        }
        SignalKind::Uint => {
            if let Some(resolution) = signal.resolution {
                Value::Float((raw as f64 / resolution) * 100.0)
            } else {
                apply_scale(signal, raw as f64, raw as i64)
            }
        }
        SignalKind::Enum => {
            let lookup_name = signal.lookup.as_deref().unwrap_or_default();
            match enums(lookup_name) {
                Some(enum_def) => match enum_def.label(raw as i64) {
                    Some(label) => Value::EnumeratedLabel(label.to_string()),
                    None => Value::UnknownEnumValue(raw as i64),
                },
                None => Value::UnknownEnumValue(raw as i64),
            }
        }
    }
}

fn apply_scale(signal: &SignalDef, raw_as_f64: f64, raw_as_i64: i64) -> Value {
    match signal.scale {
        Some(scale) => Value::Float(raw_as_f64 * scale + signal.offset.unwrap_or(0.0)),
        None => Value::Integer(raw_as_i64),
    }
}

/// Stateless decoder: holds only a reference to the immutable registry.
pub struct FrameDecoder<'a> {
    registry: &'a SpecRegistry,
}

impl<'a> FrameDecoder<'a> {
    pub fn new(registry: &'a SpecRegistry) -> Self {
        Self { registry }
    }

    /// Decode one raw frame, returning either a `DecodedMessage` or the
    /// warning that caused it to be dropped.
    pub fn decode(&self, frame: &RawFrame) -> Result<DecodedMessage, DecodeWarning> {
        let fields = decompose_arb_id(frame.arb_id);
        let dgn_def = self.registry.lookup_by_dgn(fields.dgn).ok_or_else(|| {
            debug!(dgn = format!("{:#07x}", fields.dgn), "unknown DGN");
            DecodeWarning::UnknownDgn(fields.dgn)
        })?;

        let mut signals = HashMap::with_capacity(dgn_def.signals.len());
        let mut instance = None;
        for signal in &dgn_def.signals {
            let raw = extract_raw(&frame.data, signal.byte_offset, signal.bit_offset, signal.bit_length)
                .ok_or_else(|| DecodeWarning::InvalidFrame {
                    reason: format!(
                        "frame too short for signal {} (needs byte {})",
                        signal.name, signal.byte_offset
                    ),
                })?;
            let value = decode_signal(signal, raw, &|name| {
                self.registry.lookup_enum(name).cloned()
            });
            if signal.is_instance || (instance.is_none() && signal.name == "instance") {
                instance = Some(raw as u8);
            }
            signals.insert(signal.name.clone(), value);
        }

        // `spec.md` §4.2: instance is byte 0 unless the DGN names a
        // different signal as the instance key; fall back to byte 0 when
        // no signal is explicitly named "instance".
        let instance = instance.unwrap_or_else(|| frame.data.first().copied().unwrap_or(0));

        Ok(DecodedMessage {
            dgn: fields.dgn,
            dgn_name: dgn_def.name.clone(),
            instance,
            source_addr: fields.source_addr,
            signals,
            rx_ts: frame.rx_ts,
        })
    }
}
