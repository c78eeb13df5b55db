// Persisted donation and withdrawal records

use serde::{Deserialize, Serialize};
use std::fmt;

/// Internal lifecycle of a donation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DonationStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl DonationStatus {
    /// Whether a row in this state may move to `next`.
    ///
    /// A late settlement may still rescue a failed donation, but nothing moves a
    /// settled donation back to pending, and refunds are final.
    pub fn can_transition_to(self, next: DonationStatus) -> bool {
        use DonationStatus::*;
        match (self, next) {
            (a, b) if a == b => false,
            (Pending, _) => true,
            (Failed, Paid) => true,
            (Paid, Refunded) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DonationStatus::Paid | DonationStatus::Failed | DonationStatus::Refunded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DonationStatus::Pending => "PENDING",
            DonationStatus::Paid => "PAID",
            DonationStatus::Failed => "FAILED",
            DonationStatus::Refunded => "REFUNDED",
        }
    }
}

impl fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
    Completed,
}

impl WithdrawalStatus {
    /// One-way progression: PENDING -> APPROVED -> COMPLETED, with REJECTED
    /// reachable from either non-terminal state.
    pub fn can_transition_to(self, next: WithdrawalStatus) -> bool {
        use WithdrawalStatus::*;
        matches!(
            (self, next),
            (Pending, Approved) | (Pending, Rejected) | (Approved, Completed) | (Approved, Rejected)
        )
    }

    /// Funds held by this withdrawal count against the campaign balance
    pub fn holds_funds(self) -> bool {
        !matches!(self, WithdrawalStatus::Rejected)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "PENDING",
            WithdrawalStatus::Approved => "APPROVED",
            WithdrawalStatus::Rejected => "REJECTED",
            WithdrawalStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Donation {
    pub order_id: String,
    pub campaign_id: String,
    pub donor_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub donor_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub is_anonymous: bool,
    /// Whole rupiah
    pub amount: i64,
    pub status: DonationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snap_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    /// Key of the last gateway update applied to this row
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_notification: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paid_at: Option<i64>,
}

impl Donation {
    pub fn new_pending(
        order_id: String,
        campaign_id: String,
        donor_name: String,
        amount: i64,
        now: i64,
    ) -> Self {
        Self {
            order_id,
            campaign_id,
            donor_name,
            donor_email: None,
            message: None,
            is_anonymous: false,
            amount,
            status: DonationStatus::Pending,
            payment_type: None,
            transaction_id: None,
            snap_token: None,
            redirect_url: None,
            last_notification: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
        }
    }
}

/// Gateway-side details carried along with a status update
#[derive(Debug, Clone, Default)]
pub struct PaymentDetails {
    pub transaction_id: Option<String>,
    pub payment_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: String,
    pub campaign_id: String,
    pub requester_id: String,
    pub amount: i64,
    pub bank_code: String,
    pub account_number: String,
    pub account_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub status: WithdrawalStatus,
    /// Iris payout reference once a payout has been created
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_no: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignSummary {
    pub campaign_id: String,
    /// Sum of PAID donations
    pub collected: i64,
    pub donor_count: u64,
    pub pending_count: u64,
    /// Sum of COMPLETED withdrawals
    pub withdrawn: i64,
    /// Sum of PENDING and APPROVED withdrawals
    pub reserved: i64,
    pub available: i64,
}

/// Result of applying a status to a stored row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange<S> {
    Unchanged,
    Updated { from: S, to: S },
    Ignored { current: S, requested: S },
}

impl<S> StatusChange<S> {
    pub fn is_updated(&self) -> bool {
        matches!(self, StatusChange::Updated { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn donation_transitions() {
        use DonationStatus::*;
        assert!(Pending.can_transition_to(Paid));
        assert!(Pending.can_transition_to(Failed));
        assert!(Failed.can_transition_to(Paid));
        assert!(Paid.can_transition_to(Refunded));
        assert!(!Paid.can_transition_to(Pending));
        assert!(!Paid.can_transition_to(Failed));
        assert!(!Refunded.can_transition_to(Paid));
        assert!(!Paid.can_transition_to(Paid));
    }

    #[test]
    fn withdrawal_progression_is_one_way() {
        use WithdrawalStatus::*;
        assert!(Pending.can_transition_to(Approved));
        assert!(Approved.can_transition_to(Completed));
        assert!(Approved.can_transition_to(Rejected));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(Pending));
    }

    #[test]
    fn status_serializes_upper_case() {
        let json = serde_json::to_string(&DonationStatus::Refunded).unwrap();
        assert_eq!(json, "\"REFUNDED\"");
        let parsed: WithdrawalStatus = serde_json::from_str("\"APPROVED\"").unwrap();
        assert_eq!(parsed, WithdrawalStatus::Approved);
    }
}
