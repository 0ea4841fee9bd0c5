//! Lifecycle status for a tracker entry.
//!
//! The lifecycle is forward-only: `Initiated` → `Under review` → `Approved`.
//! There is no rejection or cancellation state; a review cycle only ever
//! advances. The string forms below are the persisted wire format, so they
//! must never change for existing rows.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of an assessment tracker entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackerStatus {
    /// Trainee has started the assessment; no reviewer involved yet.
    Initiated,
    /// A reviewer has been assigned and the work awaits approval.
    #[serde(rename = "Under review")]
    UnderReview,
    /// The assigned reviewer approved the work (terminal).
    Approved,
}

impl TrackerStatus {
    /// The persisted string form.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initiated => "Initiated",
            Self::UnderReview => "Under review",
            Self::Approved => "Approved",
        }
    }

    /// Parse the persisted string form.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Initiated" => Some(Self::Initiated),
            "Under review" => Some(Self::UnderReview),
            "Approved" => Some(Self::Approved),
            _ => None,
        }
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved)
    }

    /// Returns true if moving to `next` would not regress the lifecycle.
    ///
    /// Lateral moves are permitted (re-assignment overwrites the reviewer on
    /// an entry that is already under review); backward moves never are.
    pub fn can_advance_to(self, next: TrackerStatus) -> bool {
        next.rank() >= self.rank()
    }

    fn rank(self) -> u8 {
        match self {
            Self::Initiated => 0,
            Self::UnderReview => 1,
            Self::Approved => 2,
        }
    }
}

impl fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_roundtrip() {
        for status in [
            TrackerStatus::Initiated,
            TrackerStatus::UnderReview,
            TrackerStatus::Approved,
        ] {
            assert_eq!(TrackerStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TrackerStatus::parse("Rejected"), None);
    }

    #[test]
    fn test_serde_uses_wire_format() {
        let json = serde_json::to_string(&TrackerStatus::UnderReview).unwrap();
        assert_eq!(json, "\"Under review\"");
        let back: TrackerStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, TrackerStatus::UnderReview);
    }

    #[test]
    fn test_forward_only() {
        use TrackerStatus::*;

        assert!(Initiated.can_advance_to(UnderReview));
        assert!(UnderReview.can_advance_to(Approved));
        assert!(Initiated.can_advance_to(Approved));

        // Lateral re-assignment is allowed.
        assert!(UnderReview.can_advance_to(UnderReview));

        // Never backward.
        assert!(!Approved.can_advance_to(UnderReview));
        assert!(!Approved.can_advance_to(Initiated));
        assert!(!UnderReview.can_advance_to(Initiated));
    }

    #[test]
    fn test_terminal() {
        assert!(!TrackerStatus::Initiated.is_terminal());
        assert!(!TrackerStatus::UnderReview.is_terminal());
        assert!(TrackerStatus::Approved.is_terminal());
    }

    fn arb_status() -> impl proptest::strategy::Strategy<Value = TrackerStatus> {
        proptest::prop_oneof![
            proptest::strategy::Just(TrackerStatus::Initiated),
            proptest::strategy::Just(TrackerStatus::UnderReview),
            proptest::strategy::Just(TrackerStatus::Approved),
        ]
    }

    proptest::proptest! {
        /// Two distinct statuses are never mutually reachable: the lifecycle
        /// has no cycles other than the lateral self-move.
        #[test]
        fn advancement_has_no_cycles(a in arb_status(), b in arb_status()) {
            if a != b {
                proptest::prop_assert!(!(a.can_advance_to(b) && b.can_advance_to(a)));
            }
        }
    }
}
