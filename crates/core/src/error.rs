//! Error types for Kestrel.

use crate::types::DataType;
use alloc::string::String;
use thiserror::Error as ThisError;

/// Result type alias for Kestrel operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error kinds raised while building, wiring or evaluating accumulate nodes.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum Error {
    /// A composed function failed during init/accumulate/reverse/result.
    /// `slot` is set once the failure has been attributed to a composition slot.
    #[error("evaluation failed{}: {message}", slot_suffix(.slot))]
    Evaluation {
        slot: Option<usize>,
        message: String,
    },
    /// An entry point that this implementation never supports was invoked.
    #[error("unsupported capability: {operation}")]
    UnsupportedCapability { operation: &'static str },
    /// A function slot was evaluated before anything was wired into it.
    #[error("function slot {slot} has not been wired")]
    Unwired { slot: usize },
    /// A context or token was handed to a function that did not create it.
    #[error("context mismatch: expected {expected}")]
    ContextMismatch { expected: &'static str },
    /// Type mismatch error.
    #[error("type mismatch: expected {expected}, got {got}")]
    TypeMismatch { expected: DataType, got: DataType },
    /// A spec could not be persisted.
    #[error("encode error: {message}")]
    Encode { message: String },
    /// A persisted accumulate could not be decoded.
    #[error("decode error: {message}")]
    Decode { message: String },
}

fn slot_suffix(slot: &Option<usize>) -> String {
    match slot {
        Some(slot) => alloc::format!(" in slot {slot}"),
        None => String::new(),
    }
}

impl Error {
    /// Creates an evaluation failure not yet attributed to a slot.
    pub fn evaluation(message: impl Into<String>) -> Self {
        Error::Evaluation {
            slot: None,
            message: message.into(),
        }
    }

    /// Creates an unsupported capability error.
    pub fn unsupported(operation: &'static str) -> Self {
        Error::UnsupportedCapability { operation }
    }

    /// Creates a type mismatch error.
    pub fn type_mismatch(expected: DataType, got: DataType) -> Self {
        Error::TypeMismatch { expected, got }
    }

    /// Creates an encode error.
    pub fn encode(message: impl Into<String>) -> Self {
        Error::Encode {
            message: message.into(),
        }
    }

    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Error::Decode {
            message: message.into(),
        }
    }

    /// Wraps this error as an evaluation failure raised by `slot`.
    ///
    /// Failures that already name a slot, and programming errors, pass through.
    pub fn in_slot(self, slot: usize) -> Self {
        match self {
            Error::Evaluation { slot: None, message } => Error::Evaluation {
                slot: Some(slot),
                message,
            },
            Error::TypeMismatch { expected, got } => Error::Evaluation {
                slot: Some(slot),
                message: alloc::format!("type mismatch: expected {expected}, got {got}"),
            },
            other => other,
        }
    }

    /// Returns true for errors that signal misuse rather than a runtime condition.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Error::UnsupportedCapability { .. } | Error::ContextMismatch { .. }
        )
    }
}
