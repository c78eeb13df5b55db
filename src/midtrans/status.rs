// Mapping from gateway transaction states to internal donation/withdrawal states

use crate::ledger::models::{DonationStatus, WithdrawalStatus};

/// Map a Midtrans `transaction_status` (plus `fraud_status` for card captures)
/// to a donation status. Returns `None` for states outside the known set; callers
/// must leave the stored status untouched in that case.
pub fn map_transaction_status(
    transaction_status: &str,
    fraud_status: Option<&str>,
) -> Option<DonationStatus> {
    let status = transaction_status.trim().to_ascii_lowercase();
    let fraud = fraud_status.map(|f| f.trim().to_ascii_lowercase());

    match status.as_str() {
        "settlement" => Some(DonationStatus::Paid),
        "capture" => match fraud.as_deref() {
            Some("challenge") => Some(DonationStatus::Pending),
            Some("deny") => Some(DonationStatus::Failed),
            _ => Some(DonationStatus::Paid),
        },
        "pending" => Some(DonationStatus::Pending),
        "deny" | "cancel" | "expire" | "failure" => Some(DonationStatus::Failed),
        "refund" | "partial_refund" | "chargeback" => Some(DonationStatus::Refunded),
        _ => None,
    }
}

/// Map an Iris payout status to a withdrawal status
pub fn map_payout_status(iris_status: &str) -> Option<WithdrawalStatus> {
    match iris_status.trim().to_ascii_lowercase().as_str() {
        "queued" | "approved" | "processed" => Some(WithdrawalStatus::Approved),
        "completed" => Some(WithdrawalStatus::Completed),
        "failed" | "rejected" => Some(WithdrawalStatus::Rejected),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_table() {
        let cases = [
            ("settlement", None, Some(DonationStatus::Paid)),
            ("capture", None, Some(DonationStatus::Paid)),
            ("capture", Some("accept"), Some(DonationStatus::Paid)),
            ("capture", Some("challenge"), Some(DonationStatus::Pending)),
            ("capture", Some("deny"), Some(DonationStatus::Failed)),
            ("pending", None, Some(DonationStatus::Pending)),
            ("deny", None, Some(DonationStatus::Failed)),
            ("cancel", None, Some(DonationStatus::Failed)),
            ("expire", None, Some(DonationStatus::Failed)),
            ("failure", None, Some(DonationStatus::Failed)),
            ("refund", None, Some(DonationStatus::Refunded)),
            ("partial_refund", None, Some(DonationStatus::Refunded)),
            ("chargeback", None, Some(DonationStatus::Refunded)),
            ("authorize", None, None),
            ("", None, None),
        ];
        for (status, fraud, expected) in cases {
            assert_eq!(
                map_transaction_status(status, fraud),
                expected,
                "status={status} fraud={fraud:?}"
            );
        }
    }

    #[test]
    fn settlement_ignores_fraud_status() {
        assert_eq!(
            map_transaction_status("settlement", Some("challenge")),
            Some(DonationStatus::Paid)
        );
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(
            map_transaction_status(" Capture ", Some("CHALLENGE")),
            Some(DonationStatus::Pending)
        );
    }

    #[test]
    fn payout_table() {
        assert_eq!(map_payout_status("queued"), Some(WithdrawalStatus::Approved));
        assert_eq!(map_payout_status("processed"), Some(WithdrawalStatus::Approved));
        assert_eq!(map_payout_status("completed"), Some(WithdrawalStatus::Completed));
        assert_eq!(map_payout_status("failed"), Some(WithdrawalStatus::Rejected));
        assert_eq!(map_payout_status("rejected"), Some(WithdrawalStatus::Rejected));
        assert_eq!(map_payout_status("mystery"), None);
    }
}
