// Midtrans Snap / Core API client
// Basic auth with the server key; transient failures retried with jittered backoff.

use async_trait::async_trait;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use reqwest::{Client, StatusCode};
use std::future::Future;
use tracing::{info, instrument, warn};

use crate::midtrans::errors::{is_transient, MidtransApiError, MidtransErrorEnvelope};
use crate::midtrans::types::{SnapTransactionRequest, SnapTransactionResponse, TransactionNotification};
use crate::midtrans::PaymentGateway;

const API_BASE_SANDBOX: &str = "https://api.sandbox.midtrans.com";
const API_BASE_PRODUCTION: &str = "https://api.midtrans.com";
const SNAP_BASE_SANDBOX: &str = "https://app.sandbox.midtrans.com";
const SNAP_BASE_PRODUCTION: &str = "https://app.midtrans.com";

#[derive(Clone)]
pub struct MidtransRestClient {
    pub(crate) http: Client,
    pub(crate) server_key: String,
    pub(crate) api_base: String,
    pub(crate) snap_base: String,
    pub(crate) max_retries: u32,
    pub(crate) base_delay_ms: u64,
    pub(crate) max_delay_ms: u64,
}

impl MidtransRestClient {
    pub fn new(http: Client, server_key: String, is_production: bool) -> Self {
        let (api_base, snap_base) = if is_production {
            (API_BASE_PRODUCTION, SNAP_BASE_PRODUCTION)
        } else {
            (API_BASE_SANDBOX, SNAP_BASE_SANDBOX)
        };
        Self {
            http,
            server_key,
            api_base: api_base.to_string(),
            snap_base: snap_base.to_string(),
            max_retries: 3,
            base_delay_ms: 100,
            max_delay_ms: 2_000,
        }
    }

    fn apply_common_headers(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.basic_auth(&self.server_key, Some(""))
            .header("Accept", "application/json")
    }

    fn map_error(status: StatusCode, body: &str) -> MidtransApiError {
        if let Ok(env) = serde_json::from_str::<MidtransErrorEnvelope>(body) {
            env.to_api_error_with_status(Some(status.as_u16()))
        } else {
            MidtransApiError::Http(format!("status={} body={}", status.as_u16(), body))
        }
    }

    /// Interpret a Core API status body. Core API answers HTTP 200 with a
    /// `status_code` of "404" in the body for unknown orders.
    fn parse_status_body(
        order_id: &str,
        status: StatusCode,
        text: &str,
    ) -> Result<TransactionNotification, MidtransApiError> {
        let value: serde_json::Value =
            serde_json::from_str(text).map_err(|e| MidtransApiError::Decode(e.to_string()))?;
        let body_code = value.get("status_code").and_then(|v| v.as_str()).unwrap_or("");
        if body_code == "404" || status == StatusCode::NOT_FOUND {
            return Err(MidtransApiError::NotFound(order_id.to_string()));
        }
        if status.is_success() && value.get("transaction_status").is_some() {
            return serde_json::from_value(value).map_err(|e| MidtransApiError::Decode(e.to_string()));
        }
        Err(Self::map_error(status, text))
    }

    pub(crate) async fn with_retries<F, Fut, T>(
        &self,
        desc: &str,
        max_retries: u32,
        mut op: F,
    ) -> Result<T, MidtransApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, MidtransApiError>>,
    {
        with_backoff(desc, max_retries, self.base_delay_ms, self.max_delay_ms, &mut op).await
    }

    // POST /snap/v1/transactions
    #[instrument(skip(self, request), fields(method = "POST", path = "/snap/v1/transactions", order_id = %request.transaction_details.order_id))]
    pub async fn create_snap_transaction(
        &self,
        request: &SnapTransactionRequest,
    ) -> Result<SnapTransactionResponse, MidtransApiError> {
        if request.transaction_details.gross_amount <= 0 {
            return Err(MidtransApiError::Precondition("gross_amount must be positive"));
        }

        info!(
            target: "midtrans",
            method = "POST",
            path = "/snap/v1/transactions",
            order_id = %request.transaction_details.order_id,
            gross_amount = request.transaction_details.gross_amount,
            "midtrans request"
        );

        // Snap rejects a reused order_id, so a retried create that actually
        // landed surfaces as a 4xx and is not retried again
        let req_builder = || {
            let url = format!("{}/snap/v1/transactions", self.snap_base);
            let req = self.http.post(url).json(request);
            let req = self.apply_common_headers(req);
            async move {
                let resp = req.send().await.map_err(|e| MidtransApiError::Http(e.to_string()))?;
                let status = resp.status();
                let text = resp.text().await.map_err(|e| MidtransApiError::Decode(e.to_string()))?;
                if status.is_success() {
                    serde_json::from_str::<SnapTransactionResponse>(&text)
                        .map_err(|e| MidtransApiError::Decode(e.to_string()))
                } else {
                    Err(Self::map_error(status, &text))
                }
            }
        };
        self.with_retries("create_snap_transaction", self.max_retries, req_builder)
            .await
    }

    // GET /v2/{order_id}/status
    #[instrument(skip(self), fields(method = "GET", path = "/v2/{order_id}/status", order_id = %order_id))]
    pub async fn transaction_status(
        &self,
        order_id: &str,
    ) -> Result<TransactionNotification, MidtransApiError> {
        info!(
            target: "midtrans",
            method = "GET",
            path = "/v2/{order_id}/status",
            order_id = %order_id,
            "midtrans request"
        );
        // Keep status reads lightweight: single retry only
        let req_builder = || {
            let url = format!("{}/v2/{}/status", self.api_base, order_id);
            let req = self.http.get(url);
            let req = self.apply_common_headers(req);
            async move {
                let resp = req.send().await.map_err(|e| MidtransApiError::Http(e.to_string()))?;
                let status = resp.status();
                let text = resp.text().await.map_err(|e| MidtransApiError::Decode(e.to_string()))?;
                Self::parse_status_body(order_id, status, &text)
            }
        };
        self.with_retries("transaction_status", 1, req_builder).await
    }
}

#[async_trait]
impl PaymentGateway for MidtransRestClient {
    async fn create_transaction(
        &self,
        request: &SnapTransactionRequest,
    ) -> Result<SnapTransactionResponse, MidtransApiError> {
        self.create_snap_transaction(request).await
    }

    async fn transaction_status(
        &self,
        order_id: &str,
    ) -> Result<TransactionNotification, MidtransApiError> {
        MidtransRestClient::transaction_status(self, order_id).await
    }
}

/// Run `op` until it succeeds, fails with a non-transient error, or
/// `max_retries` retries are spent. Delays grow exponentially with full jitter.
pub(crate) async fn with_backoff<F, Fut, T>(
    desc: &str,
    max_retries: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    op: &mut F,
) -> Result<T, MidtransApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MidtransApiError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let http_status = e.http_status();
                if !is_transient(http_status) || attempt >= max_retries {
                    return Err(e);
                }

                let exp = base_delay_ms.saturating_mul(1u64 << attempt.min(20));
                let cap = exp.min(max_delay_ms.max(base_delay_ms));
                let mut rng = SmallRng::from_entropy();
                let delay_ms = if cap > base_delay_ms {
                    rng.gen_range(base_delay_ms..=cap)
                } else {
                    base_delay_ms
                };

                warn!(
                    target: "midtrans",
                    desc = %desc,
                    attempt = attempt + 1,
                    max_retries = max_retries,
                    http_status = ?http_status,
                    next_delay_ms = delay_ms,
                    "retrying transient Midtrans error"
                );

                tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                attempt += 1;
            }
        }
    }
}
