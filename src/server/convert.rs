// Ledger records and errors as gRPC messages and statuses

use tonic::Status;

use crate::ledger::donation::{DonationError, SyncReport};
use crate::ledger::models::{self, Donation, DonationStatus, Withdrawal, WithdrawalStatus};
use crate::ledger::otp::OtpError;
use crate::ledger::withdrawal::WithdrawalError;
use crate::ledger::LedgerError;
use crate::pb::donation_ledger as pb;

impl From<DonationStatus> for pb::DonationStatus {
    fn from(status: DonationStatus) -> Self {
        match status {
            DonationStatus::Pending => pb::DonationStatus::Pending,
            DonationStatus::Paid => pb::DonationStatus::Paid,
            DonationStatus::Failed => pb::DonationStatus::Failed,
            DonationStatus::Refunded => pb::DonationStatus::Refunded,
        }
    }
}

impl From<WithdrawalStatus> for pb::WithdrawalStatus {
    fn from(status: WithdrawalStatus) -> Self {
        match status {
            WithdrawalStatus::Pending => pb::WithdrawalStatus::Pending,
            WithdrawalStatus::Approved => pb::WithdrawalStatus::Approved,
            WithdrawalStatus::Rejected => pb::WithdrawalStatus::Rejected,
            WithdrawalStatus::Completed => pb::WithdrawalStatus::Completed,
        }
    }
}

/// Optional status filter; UNSPECIFIED means no filter
pub fn withdrawal_status_filter(raw: Option<i32>) -> Result<Option<WithdrawalStatus>, Status> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let status = pb::WithdrawalStatus::try_from(raw)
        .map_err(|_| Status::invalid_argument(format!("unknown withdrawal status {raw}")))?;
    Ok(match status {
        pb::WithdrawalStatus::Unspecified => None,
        pb::WithdrawalStatus::Pending => Some(WithdrawalStatus::Pending),
        pb::WithdrawalStatus::Approved => Some(WithdrawalStatus::Approved),
        pb::WithdrawalStatus::Rejected => Some(WithdrawalStatus::Rejected),
        pb::WithdrawalStatus::Completed => Some(WithdrawalStatus::Completed),
    })
}

impl From<Donation> for pb::Donation {
    fn from(d: Donation) -> Self {
        pb::Donation {
            order_id: d.order_id,
            campaign_id: d.campaign_id,
            donor_name: d.donor_name,
            donor_email: d.donor_email,
            message: d.message,
            is_anonymous: d.is_anonymous,
            amount: d.amount,
            status: pb::DonationStatus::from(d.status) as i32,
            payment_type: d.payment_type,
            transaction_id: d.transaction_id,
            snap_token: d.snap_token,
            redirect_url: d.redirect_url,
            created_at: d.created_at,
            updated_at: d.updated_at,
            paid_at: d.paid_at,
        }
    }
}

impl From<Withdrawal> for pb::Withdrawal {
    fn from(w: Withdrawal) -> Self {
        pb::Withdrawal {
            id: w.id,
            campaign_id: w.campaign_id,
            requester_id: w.requester_id,
            amount: w.amount,
            bank_code: w.bank_code,
            account_number: w.account_number,
            account_name: w.account_name,
            notes: w.notes,
            status: pb::WithdrawalStatus::from(w.status) as i32,
            reference_no: w.reference_no,
            rejection_reason: w.rejection_reason,
            created_at: w.created_at,
            updated_at: w.updated_at,
            completed_at: w.completed_at,
        }
    }
}

impl From<models::CampaignSummary> for pb::CampaignSummary {
    fn from(s: models::CampaignSummary) -> Self {
        pb::CampaignSummary {
            campaign_id: s.campaign_id,
            collected: s.collected,
            donor_count: s.donor_count,
            pending_count: s.pending_count,
            withdrawn: s.withdrawn,
            reserved: s.reserved,
            available: s.available,
        }
    }
}

impl From<SyncReport> for pb::SyncPendingDonationsResponse {
    fn from(r: SyncReport) -> Self {
        pb::SyncPendingDonationsResponse {
            checked: r.checked,
            updated: r.updated,
            expired: r.expired,
            failed_lookups: r.failed_lookups,
        }
    }
}

pub fn withdrawal_response(w: Withdrawal) -> pb::WithdrawalResponse {
    pb::WithdrawalResponse {
        withdrawal: Some(w.into()),
    }
}

pub fn donation_response(d: Donation) -> pb::DonationResponse {
    pb::DonationResponse {
        donation: Some(d.into()),
    }
}

// Centralized mappers from ledger errors -> tonic::Status

pub fn ledger_status(e: LedgerError) -> Status {
    match e {
        LedgerError::DonationNotFound(_) | LedgerError::WithdrawalNotFound(_) => {
            Status::not_found(e.to_string())
        }
        LedgerError::DuplicateDonation(_) => Status::already_exists(e.to_string()),
        LedgerError::InvalidTransition { .. } | LedgerError::InsufficientBalance { .. } => {
            Status::failed_precondition(e.to_string())
        }
        LedgerError::Storage(_) | LedgerError::Serde(_) | LedgerError::Io(_) => {
            Status::internal(format!("ledger: {e}"))
        }
    }
}

pub fn donation_status(e: DonationError) -> Status {
    match e {
        DonationError::MissingField(_) | DonationError::AmountTooSmall { .. } => {
            Status::invalid_argument(e.to_string())
        }
        DonationError::AmountMismatch { .. } => Status::failed_precondition(e.to_string()),
        DonationError::Gateway(e) => e.into(),
        DonationError::Ledger(e) => ledger_status(e),
    }
}

pub fn withdrawal_status(e: WithdrawalError) -> Status {
    match e {
        WithdrawalError::MissingField(_)
        | WithdrawalError::AmountTooSmall { .. }
        | WithdrawalError::InvalidAccountNumber => Status::invalid_argument(e.to_string()),
        WithdrawalError::NoPayoutReference(_) | WithdrawalError::PayoutsDisabled => {
            Status::failed_precondition(e.to_string())
        }
        WithdrawalError::UnknownPayout(_) => Status::not_found(e.to_string()),
        WithdrawalError::Otp(OtpError::Ledger(e)) => ledger_status(e),
        WithdrawalError::Otp(OtpError::TooManyAttempts) => {
            Status::resource_exhausted(OtpError::TooManyAttempts.to_string())
        }
        WithdrawalError::Otp(e) => Status::permission_denied(e.to_string()),
        WithdrawalError::Gateway(e) => e.into(),
        WithdrawalError::Ledger(e) => ledger_status(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tonic::Code;

    #[test]
    fn status_filter() {
        assert_eq!(withdrawal_status_filter(None).unwrap(), None);
        assert_eq!(withdrawal_status_filter(Some(0)).unwrap(), None);
        assert_eq!(
            withdrawal_status_filter(Some(pb::WithdrawalStatus::Completed as i32)).unwrap(),
            Some(WithdrawalStatus::Completed)
        );
        assert_eq!(withdrawal_status_filter(Some(42)).unwrap_err().code(), Code::InvalidArgument);
    }

    #[test]
    fn error_codes() {
        assert_eq!(
            ledger_status(LedgerError::DonationNotFound("DON-1".into())).code(),
            Code::NotFound
        );
        assert_eq!(
            ledger_status(LedgerError::InsufficientBalance { requested: 2, available: 1 }).code(),
            Code::FailedPrecondition
        );
        assert_eq!(
            donation_status(DonationError::AmountTooSmall { amount: 1, min: 10_000 }).code(),
            Code::InvalidArgument
        );
        assert_eq!(
            withdrawal_status(WithdrawalError::Otp(OtpError::Mismatch { remaining: 2 })).code(),
            Code::PermissionDenied
        );
        assert_eq!(
            withdrawal_status(WithdrawalError::Otp(OtpError::TooManyAttempts)).code(),
            Code::ResourceExhausted
        );
    }

    #[test]
    fn donation_message() {
        let mut d = Donation::new_pending("DON-1".into(), "camp-1".into(), "Rudi".into(), 20_000, 5);
        d.status = DonationStatus::Paid;
        d.paid_at = Some(9);
        let msg = pb::Donation::from(d);
        assert_eq!(msg.status, pb::DonationStatus::Paid as i32);
        assert_eq!(msg.paid_at, Some(9));
        assert_eq!(msg.amount, 20_000);
    }
}
