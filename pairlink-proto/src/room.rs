//! Room keys as chosen by the peers.
//!
//! A room key is an arbitrary caller-supplied string. The only rule is that it
//! must not be empty once surrounding whitespace is trimmed; keys are stored
//! in trimmed form so `" lobby "` and `"lobby"` address the same room.

use std::fmt;

/// Errors returned when a raw string cannot be used as a room key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomKeyError {
    /// The key is empty or whitespace only.
    #[error("room key is empty")]
    Empty,
}

/// A validated, trimmed room key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomKey(String);

impl RoomKey {
    /// Validates and normalises a raw room key.
    ///
    /// # Errors
    ///
    /// Returns [`RoomKeyError::Empty`] if nothing is left after trimming.
    pub fn parse(raw: &str) -> Result<Self, RoomKeyError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(RoomKeyError::Empty);
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for RoomKey {
    type Error = RoomKeyError;

    fn try_from(raw: &str) -> Result<Self, Self::Error> {
        Self::parse(raw)
    }
}
