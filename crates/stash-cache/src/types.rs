//! Cache operation results.

use serde::{Deserialize, Serialize};

/// What a restore attempt ended up doing.
///
/// Restores never fail the build, so errors are reported here as messages for
/// callers that want to surface them without failing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RestoreOutcome {
    /// An archive was downloaded and unpacked.
    Restored {
        key: String,
        /// Whether the fallback key supplied the archive.
        fallback: bool,
    },
    /// Nothing was restored.
    Missed {
        primary: String,
        /// `None` when no fallback attempt was made.
        fallback: Option<String>,
    },
}

impl RestoreOutcome {
    pub fn is_restored(&self) -> bool {
        matches!(self, RestoreOutcome::Restored { .. })
    }

    /// Key of the archive that was restored, if any.
    pub fn restored_key(&self) -> Option<&str> {
        match self {
            RestoreOutcome::Restored { key, .. } => Some(key),
            RestoreOutcome::Missed { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_json_shape() {
        let restored = RestoreOutcome::Restored {
            key: "bucket/o/r/main/archive.tar".to_string(),
            fallback: true,
        };
        let json = serde_json::to_value(&restored).unwrap();
        assert_eq!(json["status"], "restored");
        assert_eq!(json["fallback"], true);

        let missed: RestoreOutcome = serde_json::from_str(
            r#"{"status":"missed","primary":"not found","fallback":null}"#,
        )
        .unwrap();
        assert!(!missed.is_restored());
        assert_eq!(missed.restored_key(), None);
    }
}
