// Withdrawal workflow: OTP-guarded requests, admin review and Iris payouts

use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use super::database::{LedgerDatabase, ListFilter};
use super::models::{Withdrawal, WithdrawalStatus};
use super::otp::{IssuedOtp, OtpError, OtpService};
use super::{unix_now, LedgerError};
use crate::midtrans::errors::MidtransApiError;
use crate::midtrans::status::map_payout_status;
use crate::midtrans::types::IrisPayoutItem;
use crate::midtrans::PayoutGateway;

const PAYOUT_NOTES_LIMIT: usize = 100;

#[derive(Debug, Error)]
pub enum WithdrawalError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("amount {amount} is below the minimum withdrawal of {min}")]
    AmountTooSmall { amount: i64, min: i64 },
    #[error("account number must be 5 to 20 digits")]
    InvalidAccountNumber,
    #[error("withdrawal {0} has no payout reference")]
    NoPayoutReference(String),
    #[error("no withdrawal for payout {0}")]
    UnknownPayout(String),
    #[error("payouts are not configured")]
    PayoutsDisabled,
    #[error(transparent)]
    Otp(#[from] OtpError),
    #[error(transparent)]
    Gateway(#[from] MidtransApiError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Default)]
pub struct WithdrawalRequest {
    pub campaign_id: String,
    pub requester_id: String,
    pub amount: i64,
    pub bank_code: String,
    pub account_number: String,
    pub account_name: String,
    pub notes: Option<String>,
}

impl WithdrawalRequest {
    fn validate(&self, min_amount: i64) -> Result<(), WithdrawalError> {
        if self.campaign_id.trim().is_empty() {
            return Err(WithdrawalError::MissingField("campaign_id"));
        }
        if self.requester_id.trim().is_empty() {
            return Err(WithdrawalError::MissingField("requester_id"));
        }
        if self.bank_code.trim().is_empty() {
            return Err(WithdrawalError::MissingField("bank_code"));
        }
        if self.account_name.trim().is_empty() {
            return Err(WithdrawalError::MissingField("account_name"));
        }
        let account = self.account_number.trim();
        if !(5..=20).contains(&account.len()) || !account.chars().all(|c| c.is_ascii_digit()) {
            return Err(WithdrawalError::InvalidAccountNumber);
        }
        if self.amount < min_amount {
            return Err(WithdrawalError::AmountTooSmall {
                amount: self.amount,
                min: min_amount,
            });
        }
        Ok(())
    }
}

pub struct WithdrawalService {
    db: Arc<LedgerDatabase>,
    otp: OtpService,
    payouts: Option<Arc<dyn PayoutGateway>>,
    min_amount: i64,
    // admin decisions share one lock so none lands while a payout is being created
    review_lock: Mutex<()>,
}

impl WithdrawalService {
    pub fn new(
        db: Arc<LedgerDatabase>,
        otp: OtpService,
        payouts: Option<Arc<dyn PayoutGateway>>,
        min_amount: i64,
    ) -> Self {
        Self {
            db,
            otp,
            payouts,
            min_amount,
            review_lock: Mutex::new(()),
        }
    }

    pub fn issue_otp(&self, campaign_id: &str, requester_id: &str) -> Result<IssuedOtp, WithdrawalError> {
        if campaign_id.trim().is_empty() {
            return Err(WithdrawalError::MissingField("campaign_id"));
        }
        if requester_id.trim().is_empty() {
            return Err(WithdrawalError::MissingField("requester_id"));
        }
        Ok(self.otp.issue(campaign_id, requester_id)?)
    }

    pub fn get(&self, id: &str) -> Result<Withdrawal, WithdrawalError> {
        self.db
            .get_withdrawal(id)?
            .ok_or_else(|| LedgerError::WithdrawalNotFound(id.to_string()).into())
    }

    pub fn list(&self, filter: &ListFilter<WithdrawalStatus>) -> Result<Vec<Withdrawal>, WithdrawalError> {
        Ok(self.db.list_withdrawals(filter)?)
    }

    /// Fundraiser request: validated, OTP-checked and reserved against the
    /// campaign balance as PENDING.
    #[instrument(skip(self, req, otp), fields(campaign_id = %req.campaign_id, amount = req.amount))]
    pub fn request(&self, req: WithdrawalRequest, otp: &str) -> Result<Withdrawal, WithdrawalError> {
        req.validate(self.min_amount)?;

        // cheap balance check before burning the OTP; reserve_withdrawal re-checks atomically
        let summary = self.db.campaign_summary(&req.campaign_id)?;
        if req.amount > summary.available {
            return Err(LedgerError::InsufficientBalance {
                requested: req.amount,
                available: summary.available,
            }
            .into());
        }

        self.otp.verify(&req.campaign_id, &req.requester_id, otp)?;

        let now = unix_now();
        let withdrawal = Withdrawal {
            id: Uuid::new_v4().to_string(),
            campaign_id: req.campaign_id.trim().to_string(),
            requester_id: req.requester_id.trim().to_string(),
            amount: req.amount,
            bank_code: req.bank_code.trim().to_ascii_lowercase(),
            account_number: req.account_number.trim().to_string(),
            account_name: req.account_name.trim().to_string(),
            notes: req.notes.filter(|n| !n.trim().is_empty()),
            status: WithdrawalStatus::Pending,
            reference_no: None,
            rejection_reason: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        };
        self.db.reserve_withdrawal(&withdrawal)?;

        info!(withdrawal_id = %withdrawal.id, amount = withdrawal.amount, "Withdrawal requested");
        Ok(withdrawal)
    }

    /// Admin approval. With payouts configured this creates (and, with an
    /// approver key, approves) the Iris payout before the row moves to APPROVED;
    /// a failed payout creation leaves the row PENDING.
    #[instrument(skip(self))]
    pub async fn approve(&self, id: &str) -> Result<Withdrawal, WithdrawalError> {
        let _guard = self.review_lock.lock().await;

        let withdrawal = self.get(id)?;
        if withdrawal.status != WithdrawalStatus::Pending {
            return Err(LedgerError::InvalidTransition {
                id: id.to_string(),
                from: withdrawal.status,
                to: WithdrawalStatus::Approved,
            }
            .into());
        }

        let reference_no = match &self.payouts {
            Some(payouts) => {
                let notes: String = withdrawal
                    .notes
                    .clone()
                    .unwrap_or_else(|| format!("Pencairan dana kampanye {}", withdrawal.campaign_id))
                    .chars()
                    .take(PAYOUT_NOTES_LIMIT)
                    .collect();
                let item = IrisPayoutItem {
                    beneficiary_name: withdrawal.account_name.clone(),
                    beneficiary_account: withdrawal.account_number.clone(),
                    beneficiary_bank: withdrawal.bank_code.clone(),
                    beneficiary_email: None,
                    amount: format!("{}.00", withdrawal.amount),
                    notes,
                };
                let reference_no = payouts.create_payout(&item).await?;
                info!(withdrawal_id = %id, reference_no = %reference_no, "Payout created");

                if payouts.auto_approve() {
                    // the payout exists either way; an unapproved one waits in the Iris dashboard
                    if let Err(e) = payouts.approve_payout(&reference_no).await {
                        warn!(withdrawal_id = %id, reference_no = %reference_no, error = %e, "Payout approval failed");
                    }
                }
                Some(reference_no)
            }
            None => None,
        };

        let stored = reference_no.clone();
        let updated = self
            .db
            .transition_withdrawal(id, WithdrawalStatus::Approved, unix_now(), |w| {
                w.reference_no = stored;
            })
            .map_err(|e| {
                if let Some(reference_no) = &reference_no {
                    error!(
                        withdrawal_id = %id,
                        reference_no = %reference_no,
                        error = %e,
                        "Payout created but withdrawal could not be marked approved"
                    );
                }
                e
            })?;
        info!(withdrawal_id = %id, "Withdrawal approved");
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn reject(&self, id: &str, reason: &str) -> Result<Withdrawal, WithdrawalError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(WithdrawalError::MissingField("reason"));
        }
        let _guard = self.review_lock.lock().await;
        let updated = self.db.transition_withdrawal(id, WithdrawalStatus::Rejected, unix_now(), |w| {
            w.rejection_reason = Some(reason.to_string());
        })?;
        info!(withdrawal_id = %id, "Withdrawal rejected");
        Ok(updated)
    }

    /// Mark an approved withdrawal as paid out (manual transfers)
    #[instrument(skip(self))]
    pub async fn complete(&self, id: &str) -> Result<Withdrawal, WithdrawalError> {
        let _guard = self.review_lock.lock().await;
        let updated = self
            .db
            .transition_withdrawal(id, WithdrawalStatus::Completed, unix_now(), |_| {})?;
        info!(withdrawal_id = %id, "Withdrawal completed");
        Ok(updated)
    }

    /// Apply an Iris payout status. Returns the updated row, or `None` when the
    /// status is unknown, already applied, or would move the row backwards.
    pub fn apply_payout_status(
        &self,
        reference_no: &str,
        iris_status: &str,
        error_message: Option<&str>,
    ) -> Result<Option<Withdrawal>, WithdrawalError> {
        let withdrawal = self
            .db
            .find_withdrawal_by_reference(reference_no)?
            .ok_or_else(|| WithdrawalError::UnknownPayout(reference_no.to_string()))?;
        self.apply_status_to(&withdrawal, reference_no, iris_status, error_message)
    }

    fn apply_status_to(
        &self,
        withdrawal: &Withdrawal,
        reference_no: &str,
        iris_status: &str,
        error_message: Option<&str>,
    ) -> Result<Option<Withdrawal>, WithdrawalError> {
        let Some(target) = map_payout_status(iris_status) else {
            info!(reference_no = %reference_no, status = %iris_status, "Ignoring unmapped payout status");
            return Ok(None);
        };
        if target == withdrawal.status {
            return Ok(None);
        }
        if !withdrawal.status.can_transition_to(target) {
            warn!(
                withdrawal_id = %withdrawal.id,
                current = %withdrawal.status,
                requested = %target,
                "Ignoring disallowed payout transition"
            );
            return Ok(None);
        }

        let reason = error_message
            .map(str::to_string)
            .unwrap_or_else(|| format!("payout {}", iris_status.trim().to_ascii_lowercase()));
        let updated = match self.db.transition_withdrawal(&withdrawal.id, target, unix_now(), |w| {
            if target == WithdrawalStatus::Rejected {
                w.rejection_reason = Some(reason);
            }
        }) {
            Ok(updated) => updated,
            // a concurrent delivery of the same status got there first
            Err(LedgerError::InvalidTransition { from, .. }) => {
                info!(withdrawal_id = %withdrawal.id, current = %from, "Payout status already applied");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        info!(withdrawal_id = %updated.id, status = %updated.status, "Withdrawal updated from payout status");
        Ok(Some(updated))
    }

    /// Pull the payout status from Iris and apply it
    #[instrument(skip(self))]
    pub async fn refresh_payout(&self, id: &str) -> Result<Withdrawal, WithdrawalError> {
        let payouts = self.payouts.as_ref().ok_or(WithdrawalError::PayoutsDisabled)?;
        let withdrawal = self.get(id)?;
        let reference_no = withdrawal
            .reference_no
            .clone()
            .ok_or_else(|| WithdrawalError::NoPayoutReference(id.to_string()))?;
        let status = payouts.payout_status(&reference_no).await?;
        Ok(self
            .apply_payout_status(&reference_no, &status, None)?
            .unwrap_or(withdrawal))
    }
}
