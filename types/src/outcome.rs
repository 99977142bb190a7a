//! Data exchanged with the collaborators around the engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::LocationId;
use crate::mutation::{Attachment, ValidationMode};

/// Produced by the capture/validation collaborator (QR scan, selfie, geofence…).
///
/// The engine does not care how it was produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    pub passed: bool,
    pub mode: ValidationMode,
    pub location_id: LocationId,
    pub metadata: Value,
    /// The server must have a human review the evidence.
    pub needs_validation: bool,
    pub attachment: Option<Attachment>,
    /// Why validation failed, when it did.
    pub reason: Option<String>,
}

impl ValidationOutcome {
    #[must_use]
    pub fn passed(mode: ValidationMode, location_id: LocationId) -> Self {
        Self {
            passed: true,
            mode,
            location_id,
            metadata: Value::Null,
            needs_validation: false,
            attachment: None,
            reason: None,
        }
    }

    #[must_use]
    pub fn failed(mode: ValidationMode, location_id: LocationId, reason: impl Into<String>) -> Self {
        Self {
            passed: false,
            reason: Some(reason.into()),
            ..Self::passed(mode, location_id)
        }
    }
}

/// Severity of a transient user notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl NotifyLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Success => "success",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for NotifyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
