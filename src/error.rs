//! Crate-wide error types.
//!
//! Two families, mirroring `spec.md` §7: fatal startup errors that
//! propagate with `?` up to `main`, and per-command/per-frame error codes
//! that are data returned from pure functions, never unwound as
//! exceptions.

use thiserror::Error;

use crate::command::{Action, CommandValue, Family};

/// Errors that can abort the loading of the RV-C spec registry.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SpecLoadError {
    #[error("failed to parse spec document: {0}")]
    Syntax(String),

    #[error("duplicate DGN {0:#07x} in spec document")]
    DuplicateDgn(u32),

    #[error("signal {signal} in DGN {dgn:#07x} straddles byte 8 (offset {byte_offset}, width {bit_length} bits)")]
    SignalOverflowsFrame {
        dgn: u32,
        signal: String,
        byte_offset: u8,
        bit_length: u8,
    },

    #[error("signal {signal} in DGN {dgn:#07x} references undefined enum {enum_name}")]
    UndefinedEnum {
        dgn: u32,
        signal: String,
        enum_name: String,
    },
}

/// Errors at process startup that are not part of the per-command taxonomy.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to load RV-C spec registry")]
    SpecLoad(#[from] SpecLoadError),

    #[error("failed to load entity mapping file: {0}")]
    EntityMap(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("transport error: {0}")]
    Transport(String),
}

/// The five-stage command validator's error codes (`spec.md` §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidatorCode {
    E001MissingField,
    E004MissingAction,
    E006UnknownEntity,
    E008WrongFamily,
    E011WrongType,
    E012NotEnumerated,
    E013BelowMinimum,
    E014AboveMaximum,
    E015Denylisted,
    E017NotAllowlisted,
    E018FamilyNotAllowed,
    E019RateExceeded,
    E020CooldownNotElapsed,
}

impl ValidatorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ValidatorCode::E001MissingField => "E001",
            ValidatorCode::E004MissingAction => "E004",
            ValidatorCode::E006UnknownEntity => "E006",
            ValidatorCode::E008WrongFamily => "E008",
            ValidatorCode::E011WrongType => "E011",
            ValidatorCode::E012NotEnumerated => "E012",
            ValidatorCode::E013BelowMinimum => "E013",
            ValidatorCode::E014AboveMaximum => "E014",
            ValidatorCode::E015Denylisted => "E015",
            ValidatorCode::E017NotAllowlisted => "E017",
            ValidatorCode::E018FamilyNotAllowed => "E018",
            ValidatorCode::E019RateExceeded => "E019",
            ValidatorCode::E020CooldownNotElapsed => "E020",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatorError {
    pub code: ValidatorCode,
    pub msg: String,
}

impl ValidatorError {
    pub fn new(code: ValidatorCode, msg: impl Into<String>) -> Self {
        Self { code, msg: msg.into() }
    }
}

impl std::fmt::Display for ValidatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.as_str(), self.msg)
    }
}

/// `spec.md` §4.5 encoder error (E100).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderError {
    pub msg: String,
}

impl EncoderError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self { msg: msg.into() }
    }

    pub const CODE: &'static str = "E100";
}

impl std::fmt::Display for EncoderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", Self::CODE, self.msg)
    }
}

/// `spec.md` §4.6/§7 transmitter error (E101).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxError {
    pub frame_index: usize,
    pub underlying: String,
}

impl TxError {
    pub const CODE: &'static str = "E101";
}

impl std::fmt::Display for TxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: frame {} failed: {}",
            Self::CODE,
            self.frame_index,
            self.underlying
        )
    }
}

/// A uniform failure reported on the feedback channel, whichever stage
/// produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    pub entity_id: String,
    pub code: String,
    pub message: String,
}

impl From<(&str, ValidatorError)> for CommandError {
    fn from((entity_id, err): (&str, ValidatorError)) -> Self {
        CommandError {
            entity_id: entity_id.to_string(),
            code: err.code.as_str().to_string(),
            message: err.msg,
        }
    }
}

/// The success-side feedback record (`spec.md` §6 `CommandAck`): emitted
/// exactly once per accepted command, carrying the measured end-to-end
/// transmit latency.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandAck {
    pub entity_id: String,
    pub family: Family,
    pub action: Option<Action>,
    pub value: CommandValue,
    pub latency_ms: u64,
}

/// Uniform feedback-channel item: every command produces exactly one of
/// these (`spec.md` §7 universal invariant).
#[derive(Debug, Clone, PartialEq)]
pub enum CommandFeedback {
    Ack(CommandAck),
    Error(CommandError),
}
