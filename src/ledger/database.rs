//! Embedded store for donations, withdrawals and withdrawal OTPs
//!
//! Uses redb; every record is stored as JSON keyed by its natural id.
//! Status changes run inside a single write transaction so concurrent
//! notifications for the same order serialize on the database lock.

use redb::{Database, ReadableTable, TableDefinition};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

use super::models::{
    CampaignSummary, Donation, DonationStatus, PaymentDetails, StatusChange, Withdrawal,
    WithdrawalStatus,
};
use super::otp::OtpRecord;
use super::LedgerError;

/// Key: order id, value: Donation JSON
const DONATIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("donations");
/// Key: withdrawal id, value: Withdrawal JSON
const WITHDRAWALS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("withdrawals");
/// Key: "<campaign_id>/<requester_id>", value: OtpRecord JSON
const OTPS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("withdrawal_otps");

/// Filter for listing rows; `None` fields match everything
#[derive(Debug, Clone)]
pub struct ListFilter<S> {
    pub campaign_id: Option<String>,
    pub status: Option<S>,
}

// derive(Default) would demand S: Default
impl<S> Default for ListFilter<S> {
    fn default() -> Self {
        Self {
            campaign_id: None,
            status: None,
        }
    }
}

/// What to do with a stored OTP after inspecting it
#[derive(Debug)]
pub enum OtpWrite {
    Keep,
    Put(OtpRecord),
    Remove,
}

#[derive(Clone)]
pub struct LedgerDatabase {
    db: Arc<Database>,
}

impl LedgerDatabase {
    /// Create a new database instance or open an existing one
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, LedgerError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(path)?;

        let write_txn = db.begin_write()?;
        {
            let _donations = write_txn.open_table(DONATIONS_TABLE)?;
            let _withdrawals = write_txn.open_table(WITHDRAWALS_TABLE)?;
            let _otps = write_txn.open_table(OTPS_TABLE)?;
        }
        write_txn.commit()?;

        tracing::info!("Ledger database initialized");

        Ok(Self { db: Arc::new(db) })
    }

    pub fn insert_donation(&self, donation: &Donation) -> Result<(), LedgerError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(DONATIONS_TABLE)?;
            if table.get(donation.order_id.as_str())?.is_some() {
                return Err(LedgerError::DuplicateDonation(donation.order_id.clone()));
            }
            let value = serde_json::to_vec(donation)?;
            table.insert(donation.order_id.as_str(), value.as_slice())?;
        }
        write_txn.commit()?;
        debug!(order_id = %donation.order_id, amount = donation.amount, "Inserted donation");
        Ok(())
    }

    pub fn get_donation(&self, order_id: &str) -> Result<Option<Donation>, LedgerError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DONATIONS_TABLE)?;
        let result = table.get(order_id)?;
        match result {
            Some(curr) => Ok(Some(serde_json::from_slice(curr.value())?)),
            None => Ok(None),
        }
    }

    pub fn list_donations(
        &self,
        filter: &ListFilter<DonationStatus>,
    ) -> Result<Vec<Donation>, LedgerError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(DONATIONS_TABLE)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (_key, value) = entry?;
            let donation: Donation = serde_json::from_slice(value.value())?;
            if filter
                .campaign_id
                .as_deref()
                .is_some_and(|c| c != donation.campaign_id)
            {
                continue;
            }
            if filter.status.is_some_and(|s| s != donation.status) {
                continue;
            }
            out.push(donation);
        }
        out.sort_by_key(|d| d.created_at);
        Ok(out)
    }

    /// Apply a gateway-derived status to a donation.
    ///
    /// `notification_key` identifies the gateway update; a key equal to the
    /// last one applied is skipped entirely. Gateway details are recorded even
    /// when the status itself does not move.
    pub fn apply_donation_status(
        &self,
        order_id: &str,
        status: DonationStatus,
        notification_key: Option<&str>,
        details: &PaymentDetails,
        now: i64,
    ) -> Result<(StatusChange<DonationStatus>, Donation), LedgerError> {
        let write_txn = self.db.begin_write()?;
        let outcome = {
            let mut table = write_txn.open_table(DONATIONS_TABLE)?;
            let raw = table.get(order_id)?.map(|v| v.value().to_vec());
            let mut donation: Donation = match raw {
                Some(bytes) => serde_json::from_slice(&bytes)?,
                None => return Err(LedgerError::DonationNotFound(order_id.to_string())),
            };

            if let (Some(key), Some(last)) = (notification_key, donation.last_notification.as_deref()) {
                if key == last {
                    debug!(order_id = %order_id, notification = %key, "Skipping duplicate notification");
                    return Ok((StatusChange::Unchanged, donation));
                }
            }

            let mut dirty = false;
            if let Some(key) = notification_key {
                donation.last_notification = Some(key.to_string());
                dirty = true;
            }
            if details.transaction_id.is_some() && details.transaction_id != donation.transaction_id {
                donation.transaction_id = details.transaction_id.clone();
                dirty = true;
            }
            if details.payment_type.is_some() && details.payment_type != donation.payment_type {
                donation.payment_type = details.payment_type.clone();
                dirty = true;
            }

            let current = donation.status;
            let change = if current == status {
                StatusChange::Unchanged
            } else if current.can_transition_to(status) {
                donation.status = status;
                if status == DonationStatus::Paid && donation.paid_at.is_none() {
                    donation.paid_at = Some(now);
                }
                dirty = true;
                StatusChange::Updated { from: current, to: status }
            } else {
                warn!(
                    order_id = %order_id,
                    current = %current,
                    requested = %status,
                    "Ignoring disallowed donation status transition"
                );
                StatusChange::Ignored { current, requested: status }
            };

            if dirty {
                donation.updated_at = now;
                let value = serde_json::to_vec(&donation)?;
                table.insert(order_id, value.as_slice())?;
            }
            (change, donation)
        };
        write_txn.commit()?;
        Ok(outcome)
    }

    /// Insert a withdrawal after checking it fits the campaign's available balance.
    /// The balance check and insert share one write transaction.
    pub fn reserve_withdrawal(&self, withdrawal: &Withdrawal) -> Result<CampaignSummary, LedgerError> {
        let write_txn = self.db.begin_write()?;
        let summary = {
            let donations = write_txn.open_table(DONATIONS_TABLE)?;
            let mut withdrawals = write_txn.open_table(WITHDRAWALS_TABLE)?;
            let summary = summarize(&withdrawal.campaign_id, &donations, &withdrawals)?;
            if withdrawal.amount > summary.available {
                return Err(LedgerError::InsufficientBalance {
                    requested: withdrawal.amount,
                    available: summary.available,
                });
            }
            let value = serde_json::to_vec(withdrawal)?;
            withdrawals.insert(withdrawal.id.as_str(), value.as_slice())?;
            summary
        };
        write_txn.commit()?;
        debug!(
            withdrawal_id = %withdrawal.id,
            campaign_id = %withdrawal.campaign_id,
            amount = withdrawal.amount,
            "Reserved withdrawal"
        );
        Ok(summary)
    }

    pub fn get_withdrawal(&self, id: &str) -> Result<Option<Withdrawal>, LedgerError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(WITHDRAWALS_TABLE)?;
        let result = table.get(id)?;
        match result {
            Some(curr) => Ok(Some(serde_json::from_slice(curr.value())?)),
            None => Ok(None),
        }
    }

    pub fn find_withdrawal_by_reference(
        &self,
        reference_no: &str,
    ) -> Result<Option<Withdrawal>, LedgerError> {
        Ok(self
            .list_withdrawals(&ListFilter::default())?
            .into_iter()
            .find(|w| w.reference_no.as_deref() == Some(reference_no)))
    }

    pub fn list_withdrawals(
        &self,
        filter: &ListFilter<WithdrawalStatus>,
    ) -> Result<Vec<Withdrawal>, LedgerError> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(WITHDRAWALS_TABLE)?;
        let mut out = Vec::new();
        for entry in table.iter()? {
            let (_key, value) = entry?;
            let withdrawal: Withdrawal = serde_json::from_slice(value.value())?;
            if filter
                .campaign_id
                .as_deref()
                .is_some_and(|c| c != withdrawal.campaign_id)
            {
                continue;
            }
            if filter.status.is_some_and(|s| s != withdrawal.status) {
                continue;
            }
            out.push(withdrawal);
        }
        out.sort_by_key(|w| w.created_at);
        Ok(out)
    }

    /// Move a withdrawal to `to`, letting `mutate` fill in the fields that go
    /// with the new state. Fails without writing when the progression is not allowed.
    pub fn transition_withdrawal<F>(
        &self,
        id: &str,
        to: WithdrawalStatus,
        now: i64,
        mutate: F,
    ) -> Result<Withdrawal, LedgerError>
    where
        F: FnOnce(&mut Withdrawal),
    {
        let write_txn = self.db.begin_write()?;
        let withdrawal = {
            let mut table = write_txn.open_table(WITHDRAWALS_TABLE)?;
            let raw = table.get(id)?.map(|v| v.value().to_vec());
            let mut withdrawal: Withdrawal = match raw {
                Some(bytes) => serde_json::from_slice(&bytes)?,
                None => return Err(LedgerError::WithdrawalNotFound(id.to_string())),
            };
            if !withdrawal.status.can_transition_to(to) {
                return Err(LedgerError::InvalidTransition {
                    id: id.to_string(),
                    from: withdrawal.status,
                    to,
                });
            }
            withdrawal.status = to;
            withdrawal.updated_at = now;
            if to == WithdrawalStatus::Completed {
                withdrawal.completed_at = Some(now);
            }
            mutate(&mut withdrawal);
            let value = serde_json::to_vec(&withdrawal)?;
            table.insert(id, value.as_slice())?;
            withdrawal
        };
        write_txn.commit()?;
        debug!(withdrawal_id = %id, status = %to, "Withdrawal transitioned");
        Ok(withdrawal)
    }

    /// Per-campaign aggregates derived from current row states
    pub fn campaign_summary(&self, campaign_id: &str) -> Result<CampaignSummary, LedgerError> {
        let read_txn = self.db.begin_read()?;
        let donations = read_txn.open_table(DONATIONS_TABLE)?;
        let withdrawals = read_txn.open_table(WITHDRAWALS_TABLE)?;
        summarize(campaign_id, &donations, &withdrawals)
    }

    pub fn put_otp(&self, key: &str, record: &OtpRecord) -> Result<(), LedgerError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(OTPS_TABLE)?;
            let value = serde_json::to_vec(record)?;
            table.insert(key, value.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Read, decide and write back an OTP inside one write transaction, so
    /// concurrent verifications of the same code run one after another.
    pub fn update_otp<F, T>(&self, key: &str, decide: F) -> Result<T, LedgerError>
    where
        F: FnOnce(Option<OtpRecord>) -> (OtpWrite, T),
    {
        let write_txn = self.db.begin_write()?;
        let out = {
            let mut table = write_txn.open_table(OTPS_TABLE)?;
            let current = match table.get(key)? {
                Some(bytes) => Some(serde_json::from_slice::<OtpRecord>(bytes.value())?),
                None => None,
            };
            let (write, out) = decide(current);
            match write {
                OtpWrite::Keep => {}
                OtpWrite::Put(record) => {
                    let value = serde_json::to_vec(&record)?;
                    table.insert(key, value.as_slice())?;
                }
                OtpWrite::Remove => {
                    table.remove(key)?;
                }
            }
            out
        };
        write_txn.commit()?;
        Ok(out)
    }

    #[cfg(test)]
    pub fn remove_donation(&self, order_id: &str) -> Result<(), LedgerError> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(DONATIONS_TABLE)?;
            table.remove(order_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

fn summarize<D, W>(
    campaign_id: &str,
    donations: &D,
    withdrawals: &W,
) -> Result<CampaignSummary, LedgerError>
where
    D: ReadableTable<&'static str, &'static [u8]>,
    W: ReadableTable<&'static str, &'static [u8]>,
{
    let mut summary = CampaignSummary {
        campaign_id: campaign_id.to_string(),
        ..Default::default()
    };

    for entry in donations.iter()? {
        let (_key, value) = entry?;
        let donation: Donation = serde_json::from_slice(value.value())?;
        if donation.campaign_id != campaign_id {
            continue;
        }
        match donation.status {
            DonationStatus::Paid => {
                summary.collected += donation.amount;
                summary.donor_count += 1;
            }
            DonationStatus::Pending => summary.pending_count += 1,
            DonationStatus::Failed | DonationStatus::Refunded => {}
        }
    }

    for entry in withdrawals.iter()? {
        let (_key, value) = entry?;
        let withdrawal: Withdrawal = serde_json::from_slice(value.value())?;
        if withdrawal.campaign_id != campaign_id {
            continue;
        }
        match withdrawal.status {
            WithdrawalStatus::Completed => summary.withdrawn += withdrawal.amount,
            status if status.holds_funds() => summary.reserved += withdrawal.amount,
            _ => {}
        }
    }

    summary.available = summary.collected - summary.withdrawn - summary.reserved;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open() -> (tempfile::TempDir, LedgerDatabase) {
        let dir = tempfile::tempdir().unwrap();
        let db = LedgerDatabase::new(dir.path().join("ledger.redb")).unwrap();
        (dir, db)
    }

    fn donation(order_id: &str, campaign: &str, amount: i64) -> Donation {
        Donation::new_pending(
            order_id.to_string(),
            campaign.to_string(),
            "Hamba Allah".to_string(),
            amount,
            1_700_000_000,
        )
    }

    fn withdrawal(id: &str, campaign: &str, amount: i64) -> Withdrawal {
        Withdrawal {
            id: id.to_string(),
            campaign_id: campaign.to_string(),
            requester_id: "user-1".to_string(),
            amount,
            bank_code: "bca".to_string(),
            account_number: "1234567890".to_string(),
            account_name: "Yayasan Pesona".to_string(),
            notes: None,
            status: WithdrawalStatus::Pending,
            reference_no: None,
            rejection_reason: None,
            created_at: 1_700_000_000,
            updated_at: 1_700_000_000,
            completed_at: None,
        }
    }

    #[test]
    fn duplicate_donation_is_rejected() {
        let (_dir, db) = open();
        db.insert_donation(&donation("DON-1", "c1", 50_000)).unwrap();
        let err = db.insert_donation(&donation("DON-1", "c1", 50_000)).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateDonation(_)));
    }

    #[test]
    fn apply_status_updates_once() {
        let (_dir, db) = open();
        db.insert_donation(&donation("DON-1", "c1", 50_000)).unwrap();
        let details = PaymentDetails {
            transaction_id: Some("tx-1".to_string()),
            payment_type: Some("qris".to_string()),
        };

        let (change, row) = db
            .apply_donation_status("DON-1", DonationStatus::Paid, Some("tx-1:settlement"), &details, 10)
            .unwrap();
        assert_eq!(
            change,
            StatusChange::Updated { from: DonationStatus::Pending, to: DonationStatus::Paid }
        );
        assert_eq!(row.paid_at, Some(10));
        assert_eq!(row.payment_type.as_deref(), Some("qris"));

        // Same notification again: nothing moves, nothing is rewritten
        let (change, row) = db
            .apply_donation_status("DON-1", DonationStatus::Paid, Some("tx-1:settlement"), &details, 20)
            .unwrap();
        assert_eq!(change, StatusChange::Unchanged);
        assert_eq!(row.updated_at, 10);

        let summary = db.campaign_summary("c1").unwrap();
        assert_eq!(summary.collected, 50_000);
        assert_eq!(summary.donor_count, 1);
    }

    #[test]
    fn settled_donation_does_not_regress() {
        let (_dir, db) = open();
        db.insert_donation(&donation("DON-1", "c1", 50_000)).unwrap();
        let details = PaymentDetails::default();
        db.apply_donation_status("DON-1", DonationStatus::Paid, Some("a"), &details, 10)
            .unwrap();
        let (change, row) = db
            .apply_donation_status("DON-1", DonationStatus::Pending, Some("b"), &details, 11)
            .unwrap();
        assert_eq!(
            change,
            StatusChange::Ignored { current: DonationStatus::Paid, requested: DonationStatus::Pending }
        );
        assert_eq!(row.status, DonationStatus::Paid);
    }

    #[test]
    fn missing_donation_is_reported() {
        let (_dir, db) = open();
        let err = db
            .apply_donation_status("nope", DonationStatus::Paid, None, &PaymentDetails::default(), 1)
            .unwrap_err();
        assert!(matches!(err, LedgerError::DonationNotFound(_)));
    }

    #[test]
    fn summary_accounts_for_withdrawals() {
        let (_dir, db) = open();
        for (id, amount) in [("DON-1", 100_000), ("DON-2", 250_000), ("DON-3", 75_000)] {
            db.insert_donation(&donation(id, "c1", amount)).unwrap();
        }
        db.insert_donation(&donation("DON-X", "c2", 999_000)).unwrap();
        let details = PaymentDetails::default();
        db.apply_donation_status("DON-1", DonationStatus::Paid, None, &details, 1).unwrap();
        db.apply_donation_status("DON-2", DonationStatus::Paid, None, &details, 1).unwrap();
        db.apply_donation_status("DON-X", DonationStatus::Paid, None, &details, 1).unwrap();

        db.reserve_withdrawal(&withdrawal("w1", "c1", 100_000)).unwrap();
        db.reserve_withdrawal(&withdrawal("w2", "c1", 50_000)).unwrap();
        db.transition_withdrawal("w1", WithdrawalStatus::Approved, 2, |_| {}).unwrap();
        db.transition_withdrawal("w1", WithdrawalStatus::Completed, 3, |_| {}).unwrap();

        let summary = db.campaign_summary("c1").unwrap();
        assert_eq!(summary.collected, 350_000);
        assert_eq!(summary.donor_count, 2);
        assert_eq!(summary.pending_count, 1);
        assert_eq!(summary.withdrawn, 100_000);
        assert_eq!(summary.reserved, 50_000);
        assert_eq!(summary.available, 200_000);

        let err = db.reserve_withdrawal(&withdrawal("w3", "c1", 200_001)).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance { requested: 200_001, available: 200_000 }
        ));
    }

    #[test]
    fn withdrawal_transitions_are_enforced() {
        let (_dir, db) = open();
        db.insert_donation(&donation("DON-1", "c1", 100_000)).unwrap();
        db.apply_donation_status("DON-1", DonationStatus::Paid, None, &PaymentDetails::default(), 1)
            .unwrap();
        db.reserve_withdrawal(&withdrawal("w1", "c1", 60_000)).unwrap();

        let err = db
            .transition_withdrawal("w1", WithdrawalStatus::Completed, 2, |_| {})
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidTransition { .. }));

        let w = db
            .transition_withdrawal("w1", WithdrawalStatus::Approved, 2, |w| {
                w.reference_no = Some("ref-1".to_string())
            })
            .unwrap();
        assert_eq!(w.status, WithdrawalStatus::Approved);
        let found = db.find_withdrawal_by_reference("ref-1").unwrap().unwrap();
        assert_eq!(found.id, "w1");

        let rejected = db
            .transition_withdrawal("w1", WithdrawalStatus::Rejected, 3, |w| {
                w.rejection_reason = Some("payout failed".to_string())
            })
            .unwrap();
        assert_eq!(rejected.status, WithdrawalStatus::Rejected);
        // rejected funds are released
        assert_eq!(db.campaign_summary("c1").unwrap().available, 100_000);
    }

    #[test]
    fn default_filter_lists_every_withdrawal() {
        let (_dir, db) = open();
        db.insert_donation(&donation("DON-1", "c1", 100_000)).unwrap();
        db.insert_donation(&donation("DON-2", "c2", 100_000)).unwrap();
        for id in ["DON-1", "DON-2"] {
            db.apply_donation_status(id, DonationStatus::Paid, None, &PaymentDetails::default(), 1)
                .unwrap();
        }
        db.reserve_withdrawal(&withdrawal("w1", "c1", 60_000)).unwrap();
        db.reserve_withdrawal(&withdrawal("w2", "c2", 60_000)).unwrap();
        db.transition_withdrawal("w2", WithdrawalStatus::Rejected, 2, |_| {}).unwrap();

        let all = db.list_withdrawals(&ListFilter::default()).unwrap();
        assert_eq!(all.len(), 2);
        assert!(db.find_withdrawal_by_reference("ref-none").unwrap().is_none());
    }

    #[test]
    fn otp_update_applies_decision() {
        let (_dir, db) = open();
        let record = OtpRecord {
            code_hash: "h".to_string(),
            expires_at: 10,
            attempts: 0,
        };
        let seen = db
            .update_otp("c1/u1", |current| (OtpWrite::Put(record.clone()), current.is_some()))
            .unwrap();
        assert!(!seen);

        let stored = db
            .update_otp("c1/u1", |current| (OtpWrite::Remove, current))
            .unwrap();
        assert_eq!(stored, Some(record));
        assert!(db.update_otp("c1/u1", |current| (OtpWrite::Keep, current)).unwrap().is_none());
    }

    #[test]
    fn list_filters_by_campaign_and_status() {
        let (_dir, db) = open();
        db.insert_donation(&donation("DON-1", "c1", 10_000)).unwrap();
        db.insert_donation(&donation("DON-2", "c2", 10_000)).unwrap();
        db.apply_donation_status("DON-2", DonationStatus::Failed, None, &PaymentDetails::default(), 1)
            .unwrap();

        let pending = db
            .list_donations(&ListFilter { campaign_id: None, status: Some(DonationStatus::Pending) })
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].order_id, "DON-1");

        let c2 = db
            .list_donations(&ListFilter { campaign_id: Some("c2".to_string()), status: None })
            .unwrap();
        assert_eq!(c2.len(), 1);
        assert_eq!(c2[0].status, DonationStatus::Failed);
    }
}
