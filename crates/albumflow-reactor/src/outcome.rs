//! Tagged reactor results.

use albumflow_broker::FailureReason;
use std::fmt;

/// What a reactor did with one envelope.
///
/// Workers settle envelopes from the tag alone: the first three variants
/// acknowledge, the failure variants fail the delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactorOutcome {
    /// The action was applied.
    Ok,
    /// Nothing to do (missing record, already recorded).
    NoOp {
        /// Why nothing happened.
        reason: String,
    },
    /// The event cannot be processed; redelivery would not help.
    Dropped {
        /// What was wrong with the event.
        reason: String,
    },
    /// The object failed a content check; drives redelivery and dead-lettering.
    ValidationFailed {
        /// Human-readable check failure.
        reason: String,
    },
    /// A downstream dependency failed.
    DownstreamFailed {
        /// Human-readable dependency failure.
        reason: String,
    },
}

impl ReactorOutcome {
    /// A no-op outcome.
    pub fn no_op(reason: impl Into<String>) -> Self {
        ReactorOutcome::NoOp {
            reason: reason.into(),
        }
    }

    /// A dropped outcome.
    pub fn dropped(reason: impl Into<String>) -> Self {
        ReactorOutcome::Dropped {
            reason: reason.into(),
        }
    }

    /// Returns true if the envelope should be acknowledged.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            ReactorOutcome::Ok | ReactorOutcome::NoOp { .. } | ReactorOutcome::Dropped { .. }
        )
    }

    /// The failure to record when the envelope is failed.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            ReactorOutcome::ValidationFailed { reason } => {
                Some(FailureReason::validation(reason.clone()))
            }
            ReactorOutcome::DownstreamFailed { reason } => {
                Some(FailureReason::downstream(reason.clone()))
            }
            _ => None,
        }
    }
}

impl fmt::Display for ReactorOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReactorOutcome::Ok => write!(f, "ok"),
            ReactorOutcome::NoOp { reason } => write!(f, "no-op: {}", reason),
            ReactorOutcome::Dropped { reason } => write!(f, "dropped: {}", reason),
            ReactorOutcome::ValidationFailed { reason } => {
                write!(f, "validation failed: {}", reason)
            }
            ReactorOutcome::DownstreamFailed { reason } => {
                write!(f, "downstream failed: {}", reason)
            }
        }
    }
}
