//! Spec Registry (`spec.md` §4.1): a loaded, read-only index of RV-C DGN
//! definitions and named enumerations.
//!
//! The registry is immutable once built and requires no locking on the
//! read path (`spec.md` §5). It is keyed by numeric 17-bit DGN; ties in
//! source are rejected at load time rather than silently merged.

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::{BridgeError, SpecLoadError};

/// Declared kind of a signal, as named in the spec document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Uint,
    Int,
    Bool,
    Enum,
    Raw,
}

/// One signal's bit layout and decode rule within a DGN payload.
#[derive(Debug, Clone, Deserialize)]
pub struct SignalDef {
    pub name: String,
    pub byte_offset: u8,
    #[serde(default)]
    pub bit_offset: u8,
    pub bit_length: u8,
    pub kind: SignalKind,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub scale: Option<f64>,
    #[serde(default)]
    pub offset: Option<f64>,
    #[serde(default)]
    pub resolution: Option<f64>,
    #[serde(default)]
    pub lookup: Option<String>,
    /// Marks this signal as the DGN's instance key, overriding the
    /// default of "byte 0" (`spec.md` §3, §4.2).
    #[serde(default)]
    pub is_instance: bool,
}

impl SignalDef {
    /// Highest bit index (0 = LSB of byte 0) this signal occupies.
    fn end_bit(&self) -> u32 {
        self.byte_offset as u32 * 8 + self.bit_offset as u32 + self.bit_length as u32
    }
}

/// A DGN's full definition: its signal layout.
#[derive(Debug, Clone, Deserialize)]
pub struct DgnDef {
    pub dgn: u32,
    pub name: String,
    pub signals: Vec<SignalDef>,
}

/// A named integer-to-label mapping referenced by `SignalDef::lookup`.
#[derive(Debug, Clone, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub values: HashMap<String, String>,
}

impl EnumDef {
    /// Look up the label for a raw integer, accepting the JSON
    /// representation's string-keyed map.
    pub fn label(&self, raw: i64) -> Option<&str> {
        self.values.get(&raw.to_string()).map(String::as_str)
    }
}

#[derive(Debug, Deserialize)]
struct SpecDocument {
    dgns: Vec<DgnDef>,
    #[serde(default)]
    enums: Vec<EnumDef>,
}

/// The loaded, immutable RV-C spec registry.
pub struct SpecRegistry {
    dgns: HashMap<u32, DgnDef>,
    enums: HashMap<String, EnumDef>,
    /// Reverse index built at load time, per the Design Note in `spec.md`
    /// §9: "message-name -> DGN" so mapping files never embed raw DGN
    /// numerics.
    names_to_dgn: HashMap<String, u32>,
}

impl SpecRegistry {
    /// Parse and validate a spec document (see `SPEC_FULL.md` §4.7 for the
    /// JSON shape). Fails closed on any syntactic error, duplicate DGN, or
    /// dangling enum reference.
    pub fn load(contents: &str) -> Result<Self, SpecLoadError> {
        let doc: SpecDocument =
            serde_json::from_str(contents).map_err(|e| SpecLoadError::Syntax(e.to_string()))?;

        let mut enums = HashMap::with_capacity(doc.enums.len());
        for e in doc.enums {
            enums.insert(e.name.clone(), e);
        }

        let mut dgns = HashMap::with_capacity(doc.dgns.len());
        let mut names_to_dgn = HashMap::with_capacity(doc.dgns.len());
        for dgn_def in doc.dgns {
            if dgns.contains_key(&dgn_def.dgn) {
                return Err(SpecLoadError::DuplicateDgn(dgn_def.dgn));
            }
            for signal in &dgn_def.signals {
                if signal.end_bit() > 64 {
                    return Err(SpecLoadError::SignalOverflowsFrame {
                        dgn: dgn_def.dgn,
                        signal: signal.name.clone(),
                        byte_offset: signal.byte_offset,
                        bit_length: signal.bit_length,
                    });
                }
                if signal.kind == SignalKind::Enum {
                    let enum_name = signal.lookup.clone().unwrap_or_default();
                    if !enums.contains_key(&enum_name) {
                        return Err(SpecLoadError::UndefinedEnum {
                            dgn: dgn_def.dgn,
                            signal: signal.name.clone(),
                            enum_name,
                        });
                    }
                }
            }
            names_to_dgn.insert(dgn_def.name.clone(), dgn_def.dgn);
            dgns.insert(dgn_def.dgn, dgn_def);
        }

        Ok(Self {
            dgns,
            enums,
            names_to_dgn,
        })
    }

    pub fn lookup_by_dgn(&self, dgn: u32) -> Option<&DgnDef> {
        self.dgns.get(&dgn)
    }

    pub fn lookup_enum(&self, name: &str) -> Option<&EnumDef> {
        self.enums.get(name)
    }

    /// Resolve a DGN's declared name back to its numeric id, used when
    /// loading the entity mapping file (`spec.md` §9).
    pub fn dgn_by_name(&self, name: &str) -> Option<u32> {
        self.names_to_dgn.get(name).copied()
    }

    pub fn dgn_count(&self) -> usize {
        self.dgns.len()
    }

    /// Load the spec document from disk (`SPEC_FULL.md` §4.7).
    pub fn load_file(path: &std::path::Path) -> Result<Self, BridgeError> {
        let contents = std::fs::read_to_string(path)?;
        Self::load(&contents).map_err(BridgeError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
        "dgns": [
            {
                "dgn": 131511,
                "name": "TANK_STATUS",
                "signals": [
                    {"name": "instance", "byte_offset": 0, "bit_length": 8, "kind": "uint"},
                    {"name": "relative_level", "byte_offset": 1, "bit_offset": 0, "bit_length": 2, "kind": "uint", "resolution": 4},
                    {"name": "tank_kind", "byte_offset": 2, "bit_length": 8, "kind": "enum", "lookup": "TANK_KIND"}
                ]
            }
        ],
        "enums": [
            {"name": "TANK_KIND", "values": {"0": "fresh", "1": "waste"}}
        ]
    }"#;

    #[test]
    fn loads_valid_document() {
        let reg = SpecRegistry::load(DOC).unwrap();
        assert_eq!(reg.dgn_count(), 1);
        let dgn = reg.lookup_by_dgn(131511).unwrap();
        assert_eq!(dgn.name, "TANK_STATUS");
        assert_eq!(reg.dgn_by_name("TANK_STATUS"), Some(131511));
        assert_eq!(reg.lookup_enum("TANK_KIND").unwrap().label(1), Some("waste"));
    }

    #[test]
    fn rejects_duplicate_dgn() {
        let doc = DOC.replacen("131511", "131511", 1); // same doc, duplicated below
        let doubled = doc.replace(
            r#""dgns": ["#,
            r#""dgns": [{"dgn": 131511, "name": "DUP", "signals": []},"#,
        );
        let err = SpecRegistry::load(&doubled).unwrap_err();
        assert_eq!(err, SpecLoadError::DuplicateDgn(131511));
    }

    #[test]
    fn rejects_signal_straddling_byte_eight() {
        let doc = r#"{
            "dgns": [{"dgn": 1, "name": "X", "signals": [
                {"name": "s", "byte_offset": 7, "bit_offset": 4, "bit_length": 8, "kind": "uint"}
            ]}],
            "enums": []
        }"#;
        let err = SpecRegistry::load(doc).unwrap_err();
        assert!(matches!(err, SpecLoadError::SignalOverflowsFrame { .. }));
    }

    #[test]
    fn rejects_undefined_enum() {
        let doc = r#"{
            "dgns": [{"dgn": 1, "name": "X", "signals": [
                {"name": "s", "byte_offset": 0, "bit_length": 8, "kind": "enum", "lookup": "NOPE"}
            ]}],
            "enums": []
        }"#;
        let err = SpecRegistry::load(doc).unwrap_err();
        assert!(matches!(err, SpecLoadError::UndefinedEnum { .. }));
    }
}
