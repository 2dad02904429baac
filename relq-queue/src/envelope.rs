//! Type-tagged envelope codec.
//!
//! An envelope is the single string stored in the queue: `tag#|payload`.
//! The tag never contains the marker, so the first marker occurrence is
//! always the separator and the payload may contain the marker freely.

use std::fmt::Display;

use crate::error::{QueueError, QueueResult};

/// Separator between type tag and payload.
pub const MARKER: &str = "#|";

/// A decoded envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Type tag used to pick a handler
    pub type_tag: String,
    /// Payload text handed to the handler
    pub payload: String,
}

impl Envelope {
    /// Create an envelope, validating the type tag.
    pub fn new(type_tag: impl Into<String>, payload: impl Display) -> QueueResult<Self> {
        let type_tag = type_tag.into();
        validate_type_tag(&type_tag)?;
        Ok(Self {
            type_tag,
            payload: payload.to_string(),
        })
    }

    /// Split a raw queue value into tag and payload.
    pub fn decode(raw: &str) -> QueueResult<Self> {
        let (type_tag, payload) = raw
            .split_once(MARKER)
            .ok_or_else(|| QueueError::InvalidEnvelope(format!("missing marker in {:?}", raw)))?;

        if type_tag.is_empty() {
            return Err(QueueError::InvalidEnvelope(format!(
                "empty type tag in {:?}",
                raw
            )));
        }

        Ok(Self {
            type_tag: type_tag.to_string(),
            payload: payload.to_string(),
        })
    }

    /// Render as the stored string.
    pub fn encode(&self) -> String {
        self.to_string()
    }
}

impl Display for Envelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.type_tag, MARKER, self.payload)
    }
}

/// Build the stored string for `type_tag` and `payload`.
pub fn encode(type_tag: &str, payload: impl Display) -> QueueResult<String> {
    Envelope::new(type_tag, payload).map(|e| e.encode())
}

/// Whether a raw value carries the envelope marker at all.
pub fn is_envelope(raw: &str) -> bool {
    raw.contains(MARKER)
}

/// Tags must be non-empty and marker-free.
pub fn validate_type_tag(type_tag: &str) -> QueueResult<()> {
    if type_tag.is_empty() || type_tag.contains(MARKER) {
        return Err(QueueError::InvalidTypeTag(type_tag.to_string()));
    }
    Ok(())
}
