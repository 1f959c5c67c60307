//! Action kinds carried by change events.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::Error;

/// What happened to an entity within a committed transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Created,
    Updated,
    /// Physically deleted.
    Purged,
    Retired,
    Unretired,
    Voided,
    Unvoided,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Action::Created => "CREATED",
            Action::Updated => "UPDATED",
            Action::Purged => "PURGED",
            Action::Retired => "RETIRED",
            Action::Unretired => "UNRETIRED",
            Action::Voided => "VOIDED",
            Action::Unvoided => "UNVOIDED",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATED" => Ok(Action::Created),
            "UPDATED" => Ok(Action::Updated),
            "PURGED" => Ok(Action::Purged),
            "RETIRED" => Ok(Action::Retired),
            "UNRETIRED" => Ok(Action::Unretired),
            "VOIDED" => Ok(Action::Voided),
            "UNVOIDED" => Ok(Action::Unvoided),
            other => Err(Error::InvalidConfigValue(format!(
                "unknown action '{}'",
                other
            ))),
        }
    }
}
