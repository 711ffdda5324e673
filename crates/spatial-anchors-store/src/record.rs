//! The persisted `(identifier, name)` pair.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ParseRecordError;

/// Separator between the identifier and the name in the stored string.
pub const RECORD_DELIMITER: &str = ", ";

/// One stored anchor: the tracking runtime's identifier plus a display name.
///
/// Stored as `"<uuid>, <name>"`. Parsing splits on the first delimiter only,
/// so a name that itself contains `", "` still reads back intact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub id: Uuid,
    pub name: String,
}

impl AnchorRecord {
    pub fn new(id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

impl fmt::Display for AnchorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.id, RECORD_DELIMITER, self.name)
    }
}

impl FromStr for AnchorRecord {
    type Err = ParseRecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, name) = s
            .split_once(RECORD_DELIMITER)
            .ok_or(ParseRecordError::MissingDelimiter)?;
        let id = Uuid::parse_str(id).map_err(|source| ParseRecordError::InvalidIdentifier {
            value: id.to_string(),
            source,
        })?;
        Ok(Self::new(id, name))
    }
}
