//! Execution labels.
//!
//! Labels are ordered key/value pairs attached to executions. The same key
//! may appear more than once; consumers resolve duplicates by letting later
//! entries win. Keys under the `system.` prefix are reserved for the
//! orchestrator and are the only labels propagated from a parent execution
//! to the subflows it launches.

use serde::{Deserialize, Serialize};

/// Prefix reserved for orchestrator-owned labels.
pub const SYSTEM_PREFIX: &str = "system.";

/// Label carrying the correlation identifier across a parent/child tree.
pub const CORRELATION_ID: &str = "system.correlationId";

/// An ordered key/value label.
///
/// Labels are deliberately a list element, not a map entry: ordered append
/// with possible duplicate keys is part of the propagation contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    /// Label key.
    pub key: String,
    /// Label value.
    pub value: String,
}

impl Label {
    /// Creates a new label.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Creates the correlation-id label.
    #[must_use]
    pub fn correlation_id(value: impl Into<String>) -> Self {
        Self::new(CORRELATION_ID, value)
    }

    /// Returns true if this label lives in the reserved system namespace.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.key.starts_with(SYSTEM_PREFIX)
    }

    /// Returns true if this is the correlation-id label.
    #[must_use]
    pub fn is_correlation_id(&self) -> bool {
        self.key == CORRELATION_ID
    }
}

/// Returns the effective value for `key`, honoring last-wins resolution.
#[must_use]
pub fn find<'a>(labels: &'a [Label], key: &str) -> Option<&'a str> {
    labels
        .iter()
        .rev()
        .find(|l| l.key == key)
        .map(|l| l.value.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prefix_detection() {
        assert!(Label::new("system.correlationId", "x").is_system());
        assert!(Label::new("system.username", "x").is_system());
        assert!(!Label::new("team", "data").is_system());
    }

    #[test]
    fn correlation_id_constructor() {
        let label = Label::correlation_id("01ARZ3NDEKTSV4RRFFQ69G5FAV");
        assert!(label.is_correlation_id());
        assert!(label.is_system());
    }

    #[test]
    fn find_resolves_last_wins() {
        let labels = vec![
            Label::new("env", "dev"),
            Label::new("team", "data"),
            Label::new("env", "prod"),
        ];
        assert_eq!(find(&labels, "env"), Some("prod"));
        assert_eq!(find(&labels, "team"), Some("data"));
        assert_eq!(find(&labels, "missing"), None);
    }
}
