use crate::limits::SizeViolation;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// ProcessResult
// ---------------------------------------------------------------------------

/// Answer to a quote, confirm or cancel request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessResult {
    /// Go ahead and apply the region change, then report back via `settle`.
    Allow,
    Deny(DenyReason),
    /// A priced quote is open; the actor must confirm or cancel it.
    AwaitingConfirmation,
}

impl ProcessResult {
    pub fn is_allow(&self) -> bool {
        matches!(self, ProcessResult::Allow)
    }

    pub fn deny_reason(&self) -> Option<&DenyReason> {
        match self {
            ProcessResult::Deny(reason) => Some(reason),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// DenyReason
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    #[error("the economy is not available right now")]
    EconomyUnavailable,

    #[error(
        "insufficient funds: costs {required:.2} ({horizontal_blocks} footprint blocks for \
         {horizontal_cost:.2}, {vertical_blocks} vertical blocks for {vertical_cost:.2}), \
         balance is {balance:.2}"
    )]
    InsufficientFunds {
        required: f64,
        balance: f64,
        horizontal_cost: f64,
        vertical_cost: f64,
        horizontal_blocks: i128,
        vertical_blocks: i128,
    },

    #[error("your selection changed since the quote was made; quote cancelled")]
    SelectionChanged,

    #[error("your selection could not be read; quote cancelled")]
    SelectionLost,

    #[error("there is no pending action to confirm or cancel")]
    NoPendingAction,

    #[error("pending action cancelled")]
    ActionCancelled,

    #[error("the pending action is already confirmed and awaiting settlement")]
    AlreadyConfirmed,

    #[error("region too small: {0}")]
    RegionTooSmall(SizeViolation),
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// Result of reporting the external region change back to the workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Settlement {
    /// Funds withdrawn (zero for a free action).
    Settled { charged: f64 },
    /// No confirmed action was waiting for this actor.
    NothingToSettle,
    /// The external change failed; the quote was dropped without charge.
    Abandoned,
    /// The change was applied but the withdrawal failed. The caller must undo
    /// the change.
    Failed {
        amount: f64,
        balance: f64,
        error: String,
    },
}

impl Settlement {
    /// `false` means the caller must roll back the applied region change.
    pub fn succeeded(&self) -> bool {
        !matches!(self, Settlement::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_failed_settlement_requires_rollback() {
        assert!(Settlement::Settled { charged: 3.0 }.succeeded());
        assert!(Settlement::NothingToSettle.succeeded());
        assert!(Settlement::Abandoned.succeeded());
        assert!(!Settlement::Failed {
            amount: 3.0,
            balance: 1.0,
            error: "frozen".to_string()
        }
        .succeeded());
    }

    #[test]
    fn insufficient_funds_message_lists_breakdown() {
        let reason = DenyReason::InsufficientFunds {
            required: 400.0,
            balance: 12.5,
            horizontal_cost: 200.0,
            vertical_cost: 200.0,
            horizontal_blocks: 100,
            vertical_blocks: 400,
        };
        let text = reason.to_string();
        assert!(text.contains("costs 400.00"));
        assert!(text.contains("100 footprint blocks"));
        assert!(text.contains("balance is 12.50"));
    }

    #[test]
    fn process_result_json_shape() {
        let json = serde_json::to_string(&ProcessResult::Deny(DenyReason::SelectionLost)).unwrap();
        assert_eq!(json, r#"{"deny":"selection_lost"}"#);
        let json = serde_json::to_string(&ProcessResult::Allow).unwrap();
        assert_eq!(json, r#""allow""#);
    }
}
