// Midtrans provider module

pub mod errors;
pub mod iris;
pub mod rest;
pub mod status;
pub mod types;
pub mod webhook;

use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;

use self::errors::MidtransApiError;
use self::iris::IrisClient;
use self::rest::MidtransRestClient;
use self::types::{IrisPayoutItem, SnapTransactionRequest, SnapTransactionResponse, TransactionNotification};
use crate::settings::MidtransSettings;

/// Incoming payments: open a checkout and read back its state
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_transaction(
        &self,
        request: &SnapTransactionRequest,
    ) -> Result<SnapTransactionResponse, MidtransApiError>;

    async fn transaction_status(
        &self,
        order_id: &str,
    ) -> Result<TransactionNotification, MidtransApiError>;
}

/// Outgoing bank transfers for withdrawals
#[async_trait]
pub trait PayoutGateway: Send + Sync {
    /// Create a payout and return its reference number
    async fn create_payout(&self, item: &IrisPayoutItem) -> Result<String, MidtransApiError>;

    async fn approve_payout(&self, reference_no: &str) -> Result<(), MidtransApiError>;

    /// Raw gateway status of a payout
    async fn payout_status(&self, reference_no: &str) -> Result<String, MidtransApiError>;

    /// Whether created payouts should be approved right away
    fn auto_approve(&self) -> bool;
}

#[derive(Clone)]
pub struct MidtransProvider {
    pub(crate) rest: Arc<MidtransRestClient>,
    pub(crate) iris: Option<Arc<IrisClient>>,
}

impl MidtransProvider {
    // Build reqwest client with rustls and timeout from cfg
    pub fn new(cfg: MidtransSettings) -> Result<Self, MidtransApiError> {
        let timeout = std::time::Duration::from_millis(if cfg.timeout_ms > 0 { cfg.timeout_ms } else { 15_000 });
        let http = Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| MidtransApiError::Http(e.to_string()))?;

        let rest = Arc::new(MidtransRestClient::new(
            http.clone(),
            cfg.server_key.clone(),
            cfg.is_production,
        ));

        let iris = if cfg.iris_enabled() {
            Some(Arc::new(
                IrisClient::new(http, cfg.iris_creator_key.clone(), cfg.is_production)
                    .with_approver(cfg.iris_approver_key.clone()),
            ))
        } else {
            None
        };

        Ok(Self { rest, iris })
    }

    pub fn payment_gateway(&self) -> Arc<dyn PaymentGateway> {
        self.rest.clone()
    }

    pub fn payout_gateway(&self) -> Option<Arc<dyn PayoutGateway>> {
        self.iris.clone().map(|c| c as Arc<dyn PayoutGateway>)
    }
}
