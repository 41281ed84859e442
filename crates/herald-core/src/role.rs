//! Process role.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which side of the relay this process plays. Fixed at startup.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessRole {
    /// Background worker: only originates events and publishes them.
    Producer,
    /// Terminates client connections, buffers and fans out.
    Front,
}

impl ProcessRole {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Producer => "producer",
            Self::Front => "front",
        }
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a role name is not recognised.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown process role: {0} (expected `producer` or `front`)")]
pub struct ParseRoleError(pub String);

impl FromStr for ProcessRole {
    type Err = ParseRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "producer" => Ok(Self::Producer),
            "front" => Ok(Self::Front),
            _ => Err(ParseRoleError(s.to_owned())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parses_known_roles() {
        assert_eq!("producer".parse(), Ok(ProcessRole::Producer));
        assert_eq!(" Front ".parse(), Ok(ProcessRole::Front));
    }

    #[test]
    fn rejects_unknown_role() {
        assert_matches!("worker".parse::<ProcessRole>(), Err(ParseRoleError(s)) if s == "worker");
    }

    #[test]
    fn serde_lowercase() {
        assert_eq!(serde_json::to_string(&ProcessRole::Front).unwrap(), r#""front""#);
        let back: ProcessRole = serde_json::from_str(r#""producer""#).unwrap();
        assert_eq!(back, ProcessRole::Producer);
    }
}
