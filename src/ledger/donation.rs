// Donation lifecycle: checkout creation and reconciliation against Midtrans

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::database::{LedgerDatabase, ListFilter};
use super::donation_state::DonationState;
use super::models::{CampaignSummary, Donation, DonationStatus, PaymentDetails, StatusChange};
use super::{unix_now, LedgerError};
use crate::midtrans::errors::MidtransApiError;
use crate::midtrans::status::map_transaction_status;
use crate::midtrans::types::{
    parse_gross_amount, CustomerDetails, ItemDetail, SnapTransactionRequest, TransactionDetails,
    TransactionNotification,
};
use crate::midtrans::PaymentGateway;

const ANONYMOUS_DONOR: &str = "Orang Baik";
const ITEM_NAME_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum DonationError {
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("amount {amount} is below the minimum donation of {min}")]
    AmountTooSmall { amount: i64, min: i64 },
    #[error("gross amount {received} does not match donation amount {expected}")]
    AmountMismatch { expected: i64, received: String },
    #[error(transparent)]
    Gateway(#[from] MidtransApiError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Default)]
pub struct NewDonation {
    pub campaign_id: String,
    pub campaign_title: String,
    pub donor_name: String,
    pub donor_email: Option<String>,
    pub donor_phone: Option<String>,
    pub message: Option<String>,
    pub is_anonymous: bool,
    pub amount: i64,
}

#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    /// Internal status the gateway state maps to; `None` for unknown gateway states
    pub mapped: Option<DonationStatus>,
    pub change: StatusChange<DonationStatus>,
    pub donation: Donation,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub checked: u32,
    pub updated: u32,
    pub expired: u32,
    pub failed_lookups: u32,
}

pub struct DonationService {
    db: Arc<LedgerDatabase>,
    gateway: Arc<dyn PaymentGateway>,
    state: Arc<DonationState>,
    min_amount: i64,
    expiry: Duration,
}

impl DonationService {
    pub fn new(
        db: Arc<LedgerDatabase>,
        gateway: Arc<dyn PaymentGateway>,
        state: Arc<DonationState>,
        min_amount: i64,
        expiry: Duration,
    ) -> Self {
        Self {
            db,
            gateway,
            state,
            min_amount,
            expiry,
        }
    }

    pub fn state(&self) -> Arc<DonationState> {
        Arc::clone(&self.state)
    }

    pub fn get(&self, order_id: &str) -> Result<Donation, DonationError> {
        self.db
            .get_donation(order_id)?
            .ok_or_else(|| LedgerError::DonationNotFound(order_id.to_string()).into())
    }

    pub fn summary(&self, campaign_id: &str) -> Result<CampaignSummary, DonationError> {
        Ok(self.db.campaign_summary(campaign_id)?)
    }

    /// Open a Snap checkout and record the donation as PENDING
    #[instrument(skip(self, req), fields(campaign_id = %req.campaign_id, amount = req.amount))]
    pub async fn create(&self, req: NewDonation) -> Result<Donation, DonationError> {
        let campaign_id = req.campaign_id.trim();
        if campaign_id.is_empty() {
            return Err(DonationError::MissingField("campaign_id"));
        }
        let donor_name = match req.donor_name.trim() {
            "" if req.is_anonymous => ANONYMOUS_DONOR.to_string(),
            "" => return Err(DonationError::MissingField("donor_name")),
            name => name.to_string(),
        };
        if req.amount < self.min_amount {
            return Err(DonationError::AmountTooSmall {
                amount: req.amount,
                min: self.min_amount,
            });
        }

        let order_id = format!("DON-{}", Uuid::new_v4().simple());
        let title = match req.campaign_title.trim() {
            "" => "Donasi".to_string(),
            t => t.chars().take(ITEM_NAME_LIMIT).collect(),
        };
        let request = SnapTransactionRequest {
            transaction_details: TransactionDetails {
                order_id: order_id.clone(),
                gross_amount: req.amount,
            },
            item_details: vec![ItemDetail {
                id: campaign_id.to_string(),
                price: req.amount,
                quantity: 1,
                name: title,
            }],
            customer_details: Some(CustomerDetails {
                first_name: Some(donor_name.clone()),
                email: req.donor_email.clone(),
                phone: req.donor_phone.clone(),
            }),
        };

        let checkout = self.gateway.create_transaction(&request).await?;

        let mut donation = Donation::new_pending(
            order_id,
            campaign_id.to_string(),
            donor_name,
            req.amount,
            unix_now(),
        );
        donation.donor_email = req.donor_email;
        donation.message = req.message.filter(|m| !m.trim().is_empty());
        donation.is_anonymous = req.is_anonymous;
        donation.snap_token = Some(checkout.token);
        donation.redirect_url = Some(checkout.redirect_url);
        self.db.insert_donation(&donation)?;

        info!(order_id = %donation.order_id, amount = donation.amount, "Donation created");
        Ok(donation)
    }

    /// Apply one gateway transaction state to the stored donation.
    ///
    /// Shared by the HTTP notification handler, single refreshes and bulk sync.
    /// Safe to repeat: the same gateway state is applied at most once and
    /// campaign totals are derived from row states.
    pub async fn reconcile(
        &self,
        tx: &TransactionNotification,
    ) -> Result<ReconcileOutcome, DonationError> {
        let donation = self.get(&tx.order_id)?;

        if !tx.gross_amount.trim().is_empty()
            && parse_gross_amount(&tx.gross_amount) != Some(donation.amount)
        {
            return Err(DonationError::AmountMismatch {
                expected: donation.amount,
                received: tx.gross_amount.clone(),
            });
        }

        let Some(status) = map_transaction_status(&tx.transaction_status, tx.fraud_status.as_deref())
        else {
            info!(
                order_id = %tx.order_id,
                transaction_status = %tx.transaction_status,
                "Ignoring unmapped transaction status"
            );
            return Ok(ReconcileOutcome {
                mapped: None,
                change: StatusChange::Unchanged,
                donation,
            });
        };

        let key = tx.dedup_key();
        let details = PaymentDetails {
            transaction_id: tx.transaction_id.clone(),
            payment_type: tx.payment_type.clone(),
        };
        let (change, donation) =
            self.db
                .apply_donation_status(&tx.order_id, status, Some(&key), &details, unix_now())?;

        if let StatusChange::Updated { from, to } = &change {
            info!(
                order_id = %tx.order_id,
                from = %from,
                to = %to,
                transaction_status = %tx.transaction_status,
                "Donation status updated"
            );
            self.state
                .publish_status(&tx.order_id, *to, tx.status_message.clone(), Some(&key))
                .await;
        }

        Ok(ReconcileOutcome {
            mapped: Some(status),
            change,
            donation,
        })
    }

    /// Pull the current gateway state for one donation and apply it
    #[instrument(skip(self))]
    pub async fn refresh(&self, order_id: &str) -> Result<ReconcileOutcome, DonationError> {
        // fail fast on unknown orders before calling out
        self.get(order_id)?;
        let tx = self.gateway.transaction_status(order_id).await?;
        self.reconcile(&tx).await
    }

    /// Re-check every PENDING donation, optionally for one campaign.
    ///
    /// Orders Midtrans has never seen are failed once they are older than the
    /// configured expiry; a checkout that was never opened stays unknown forever.
    #[instrument(skip(self))]
    pub async fn sync_pending(&self, campaign_id: Option<&str>) -> Result<SyncReport, DonationError> {
        let pending = self.db.list_donations(&ListFilter {
            campaign_id: campaign_id.map(str::to_string),
            status: Some(DonationStatus::Pending),
        })?;

        let mut report = SyncReport::default();
        let now = unix_now();
        for donation in pending {
            report.checked += 1;
            match self.gateway.transaction_status(&donation.order_id).await {
                Ok(tx) => match self.reconcile(&tx).await {
                    Ok(outcome) if outcome.change.is_updated() => report.updated += 1,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(order_id = %donation.order_id, error = %e, "Reconcile failed during sync");
                        report.failed_lookups += 1;
                    }
                },
                Err(MidtransApiError::NotFound(_)) => {
                    let age = now.saturating_sub(donation.created_at);
                    if age > self.expiry.as_secs() as i64 {
                        match self.expire(&donation.order_id, now).await {
                            Ok(true) => report.expired += 1,
                            Ok(false) => {}
                            Err(e) => {
                                warn!(order_id = %donation.order_id, error = %e, "Expiring donation failed during sync");
                                report.failed_lookups += 1;
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(order_id = %donation.order_id, error = %e, "Status lookup failed during sync");
                    report.failed_lookups += 1;
                }
            }
        }

        info!(
            checked = report.checked,
            updated = report.updated,
            expired = report.expired,
            failed_lookups = report.failed_lookups,
            "Pending donation sync finished"
        );
        Ok(report)
    }

    /// Fail a donation Midtrans never saw; true when the row actually moved
    async fn expire(&self, order_id: &str, now: i64) -> Result<bool, DonationError> {
        let (change, _) = self.db.apply_donation_status(
            order_id,
            DonationStatus::Failed,
            Some("local:expired"),
            &PaymentDetails::default(),
            now,
        )?;
        if change.is_updated() {
            info!(order_id = %order_id, "Expired donation unknown to Midtrans");
            self.state
                .publish_status(
                    order_id,
                    DonationStatus::Failed,
                    Some("Checkout expired".to_string()),
                    Some("local:expired"),
                )
                .await;
        }
        Ok(change.is_updated())
    }
}
