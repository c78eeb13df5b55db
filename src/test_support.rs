// In-memory gateways and fixtures for unit tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::midtrans::errors::MidtransApiError;
use crate::midtrans::types::{
    IrisPayoutItem, SnapTransactionRequest, SnapTransactionResponse, TransactionNotification,
};
use crate::midtrans::{PaymentGateway, PayoutGateway};

pub fn notification(
    order_id: &str,
    transaction_status: &str,
    fraud_status: Option<&str>,
    gross_amount: &str,
) -> TransactionNotification {
    TransactionNotification {
        order_id: order_id.to_string(),
        transaction_status: transaction_status.to_string(),
        status_code: "200".to_string(),
        gross_amount: gross_amount.to_string(),
        fraud_status: fraud_status.map(str::to_string),
        transaction_id: Some(format!("tx-{order_id}")),
        payment_type: Some("bank_transfer".to_string()),
        ..Default::default()
    }
}

/// Snap/Core stand-in: records checkouts, answers status reads from a map and
/// reports unknown orders as not found
#[derive(Default)]
pub struct FakePaymentGateway {
    created: Mutex<Vec<SnapTransactionRequest>>,
    statuses: Mutex<HashMap<String, TransactionNotification>>,
}

impl FakePaymentGateway {
    pub fn created(&self) -> Vec<SnapTransactionRequest> {
        self.created.lock().unwrap().clone()
    }

    pub fn set_status(&self, tx: TransactionNotification) {
        self.statuses.lock().unwrap().insert(tx.order_id.clone(), tx);
    }
}

#[async_trait]
impl PaymentGateway for FakePaymentGateway {
    async fn create_transaction(
        &self,
        request: &SnapTransactionRequest,
    ) -> Result<SnapTransactionResponse, MidtransApiError> {
        self.created.lock().unwrap().push(request.clone());
        let order_id = &request.transaction_details.order_id;
        Ok(SnapTransactionResponse {
            token: format!("snap-{order_id}"),
            redirect_url: format!("https://app.sandbox.midtrans.com/snap/v4/redirection/{order_id}"),
        })
    }

    async fn transaction_status(
        &self,
        order_id: &str,
    ) -> Result<TransactionNotification, MidtransApiError> {
        self.statuses
            .lock()
            .unwrap()
            .get(order_id)
            .cloned()
            .ok_or_else(|| MidtransApiError::NotFound(order_id.to_string()))
    }
}

pub struct FakePayoutGateway {
    auto_approve: bool,
    fail_next_create: AtomicBool,
    create_delay_ms: AtomicU64,
    counter: AtomicU32,
    created: Mutex<Vec<IrisPayoutItem>>,
    approved: Mutex<Vec<String>>,
    statuses: Mutex<HashMap<String, String>>,
}

impl FakePayoutGateway {
    pub fn new(auto_approve: bool) -> Self {
        Self {
            auto_approve,
            fail_next_create: AtomicBool::new(false),
            create_delay_ms: AtomicU64::new(0),
            counter: AtomicU32::new(0),
            created: Mutex::new(Vec::new()),
            approved: Mutex::new(Vec::new()),
            statuses: Mutex::new(HashMap::new()),
        }
    }

    pub fn fail_next_create(&self) {
        self.fail_next_create.store(true, Ordering::SeqCst);
    }

    /// Make every payout creation take this long
    pub fn delay_creates(&self, delay: Duration) {
        self.create_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<IrisPayoutItem> {
        self.created.lock().unwrap().clone()
    }

    pub fn approved(&self) -> Vec<String> {
        self.approved.lock().unwrap().clone()
    }

    pub fn set_status(&self, reference_no: &str, status: &str) {
        self.statuses
            .lock()
            .unwrap()
            .insert(reference_no.to_string(), status.to_string());
    }
}

#[async_trait]
impl PayoutGateway for FakePayoutGateway {
    async fn create_payout(&self, item: &IrisPayoutItem) -> Result<String, MidtransApiError> {
        let delay = self.create_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_next_create.swap(false, Ordering::SeqCst) {
            return Err(MidtransApiError::Api {
                message: Some("Beneficiary bank is unavailable".to_string()),
                status: Some(503),
            });
        }
        self.created.lock().unwrap().push(item.clone());
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let reference = format!("ref-{n}");
        self.set_status(&reference, "queued");
        Ok(reference)
    }

    async fn approve_payout(&self, reference_no: &str) -> Result<(), MidtransApiError> {
        self.approved.lock().unwrap().push(reference_no.to_string());
        Ok(())
    }

    async fn payout_status(&self, reference_no: &str) -> Result<String, MidtransApiError> {
        self.statuses
            .lock()
            .unwrap()
            .get(reference_no)
            .cloned()
            .ok_or_else(|| MidtransApiError::NotFound(reference_no.to_string()))
    }

    fn auto_approve(&self) -> bool {
        self.auto_approve
    }
}
