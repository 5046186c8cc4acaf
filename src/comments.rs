use std::fmt;

/// Reason codes attached to every computed bid change
///
/// A computed change carries zero comments only when no threshold intervened.
/// Comments outside the apply allow-list force a rollback to the old bid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BidChangeComment {
    BudgetNotSet,
    BidNotSet,
    CurrentBidTooHigh,
    CurrentBidTooLow,
    OptimalSpend,
    UnderAutopilotMinBid,
    OverAutopilotMaxBid,
    UnderGoalBid,
    OverAdGroupMaxBid,
    BidConstraintApplied,
    UnderSourceMinBid,
    OverSourceMaxBid,
}

impl BidChangeComment {
    /// Whether a change carrying this comment is safe to apply automatically
    ///
    /// Ordinary clamps are applied; a missing budget or a hard source-type
    /// violation means the computed bid only exists for diagnostics and the
    /// old value must be kept.
    pub fn is_allowed_to_apply(&self) -> bool {
        !matches!(
            self,
            BidChangeComment::BudgetNotSet
                | BidChangeComment::UnderSourceMinBid
                | BidChangeComment::OverSourceMaxBid
        )
    }
}

impl fmt::Display for BidChangeComment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BidChangeComment::BudgetNotSet => "daily budget was not set",
            BidChangeComment::BidNotSet => "bid was not set",
            BidChangeComment::CurrentBidTooHigh => "current bid was above the allowed maximum",
            BidChangeComment::CurrentBidTooLow => "current bid was below the allowed minimum",
            BidChangeComment::OptimalSpend => "spend was within the optimal range",
            BidChangeComment::UnderAutopilotMinBid => "bid was raised to the autopilot minimum",
            BidChangeComment::OverAutopilotMaxBid => "bid was lowered to the autopilot maximum",
            BidChangeComment::UnderGoalBid => "bid was raised to stay near the campaign goal",
            BidChangeComment::OverAdGroupMaxBid => "bid was lowered to the ad group maximum",
            BidChangeComment::BidConstraintApplied => "an externally configured bid constraint was applied",
            BidChangeComment::UnderSourceMinBid => "computed bid was under the media source minimum",
            BidChangeComment::OverSourceMaxBid => "computed bid was over the media source maximum",
        };
        write!(f, "{}", text)
    }
}

/// Reason codes attached to computed budget changes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetChangeComment {
    NoActiveSourcesWithSpend,
    UsedUpBudgetThenUniformlyRedistributed,
    NewBudgetNotEqualDailyBudget,
}

impl fmt::Display for BudgetChangeComment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BudgetChangeComment::NoActiveSourcesWithSpend => {
                "no source had enough spend, budget was spread uniformly"
            }
            BudgetChangeComment::UsedUpBudgetThenUniformlyRedistributed => {
                "remaining budget was redistributed uniformly after sources stopped qualifying"
            }
            BudgetChangeComment::NewBudgetNotEqualDailyBudget => {
                "computed budgets did not add up to the daily budget, all changes were reverted"
            }
        };
        write!(f, "{}", text)
    }
}

/// Join a list of comments into the human-readable audit text
pub fn comments_text<T: fmt::Display>(comments: &[T]) -> String {
    comments
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list() {
        assert!(BidChangeComment::OptimalSpend.is_allowed_to_apply());
        assert!(BidChangeComment::BidNotSet.is_allowed_to_apply());
        assert!(BidChangeComment::OverAdGroupMaxBid.is_allowed_to_apply());
        assert!(!BidChangeComment::BudgetNotSet.is_allowed_to_apply());
        assert!(!BidChangeComment::OverSourceMaxBid.is_allowed_to_apply());
        assert!(!BidChangeComment::UnderSourceMinBid.is_allowed_to_apply());
    }

    #[test]
    fn test_comments_text() {
        let text = comments_text(&[
            BidChangeComment::BidNotSet,
            BidChangeComment::CurrentBidTooLow,
        ]);
        assert_eq!(
            text,
            "bid was not set; current bid was below the allowed minimum"
        );
    }
}
