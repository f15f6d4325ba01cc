use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Policy applied when a refresh of a stale value fails.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StaleValueBehavior {
    /// Surface the refresh failure to the caller.
    Strict,
    /// Log the failure and keep serving the previous value.
    #[default]
    Allow,
}

impl StaleValueBehavior {
    /// Returns a stable string representation of the policy.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strict => "STRICT",
            Self::Allow => "ALLOW",
        }
    }
}

impl fmt::Display for StaleValueBehavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown [`StaleValueBehavior`].
#[derive(Debug, thiserror::Error)]
#[error("unknown stale value behavior: {0}")]
pub struct ParseStaleValueBehaviorError(String);

impl FromStr for StaleValueBehavior {
    type Err = ParseStaleValueBehaviorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STRICT" => Ok(Self::Strict),
            "ALLOW" => Ok(Self::Allow),
            _ => Err(ParseStaleValueBehaviorError(s.to_owned())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(
            "strict".parse::<StaleValueBehavior>().unwrap(),
            StaleValueBehavior::Strict
        );
        assert_eq!(
            " ALLOW ".parse::<StaleValueBehavior>().unwrap(),
            StaleValueBehavior::Allow
        );
        assert!("lenient".parse::<StaleValueBehavior>().is_err());
    }

    #[test]
    fn serde_uses_upper_case_names() {
        let json = serde_json::to_string(&StaleValueBehavior::Strict).unwrap();
        assert_eq!(json, "\"STRICT\"");
        let back: StaleValueBehavior = serde_json::from_str("\"ALLOW\"").unwrap();
        assert_eq!(back, StaleValueBehavior::Allow);
    }
}
