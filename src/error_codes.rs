use std::fmt;

use anyhow::Error;
use serde::Serialize;
use serde_json::Value;

use crate::workflow::errors::TransportError;

pub const E_FIGMA_TARGET: &str = "E_FIGMA_TARGET";
pub const E_MISSING_TOKEN: &str = "E_MISSING_TOKEN";
pub const E_TREE_FILE: &str = "E_TREE_FILE";
pub const E_RATE_LIMITED: &str = "E_RATE_LIMITED";
pub const E_FRAME_RENDER: &str = "E_FRAME_RENDER";
pub const E_INTERNAL: &str = "E_INTERNAL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodedErrorKind {
    /// Bad flags, bad input files, missing credentials.
    Usage,
    /// The design-source API refused or failed.
    Upstream,
}

impl CodedErrorKind {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Usage => 2,
            Self::Upstream => 3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    pub kind: CodedErrorKind,
}

impl CodedError {
    pub fn usage(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Usage,
        }
    }

    pub fn upstream(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind: CodedErrorKind::Upstream,
        }
    }

    /// Upstream failure with the rate-limit case split out under its own
    /// code.
    pub fn from_transport(code: &'static str, error: &TransportError) -> Self {
        let code = if error.is_rate_limited() {
            E_RATE_LIMITED
        } else {
            code
        };
        Self::upstream(code, error.to_string())
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code.to_owned(),
                message: self.message.clone(),
                details: self.details.clone(),
            },
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}

/// Envelope for any failure; uncoded errors are reported as `E_INTERNAL`
/// with their full context chain as the message.
pub fn envelope_for(error: &Error) -> ErrorEnvelope {
    match find_coded_error(error) {
        Some(coded) => coded.envelope(),
        None => ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: E_INTERNAL.to_owned(),
                message: format!("{error:#}"),
                details: None,
            },
        },
    }
}
