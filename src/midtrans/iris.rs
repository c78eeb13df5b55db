// Midtrans Iris payout client
// Payout creation uses the creator key; approval needs the separate approver key.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{info, instrument};

use crate::midtrans::errors::{MidtransApiError, MidtransErrorEnvelope};
use crate::midtrans::rest::with_backoff;
use crate::midtrans::types::{
    IrisApproveRequest, IrisPayoutDetails, IrisPayoutItem, IrisPayoutRequest, IrisPayoutResponse,
};
use crate::midtrans::PayoutGateway;

const IRIS_BASE_SANDBOX: &str = "https://app.sandbox.midtrans.com/iris";
const IRIS_BASE_PRODUCTION: &str = "https://app.midtrans.com/iris";

#[derive(Clone)]
pub struct IrisClient {
    http: Client,
    creator_key: String,
    approver_key: Option<String>,
    base: String,
    max_retries: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl IrisClient {
    pub fn new(http: Client, creator_key: String, is_production: bool) -> Self {
        Self {
            http,
            creator_key,
            approver_key: None,
            base: if is_production { IRIS_BASE_PRODUCTION } else { IRIS_BASE_SANDBOX }.to_string(),
            max_retries: 2,
            base_delay_ms: 200,
            max_delay_ms: 2_000,
        }
    }

    pub fn with_approver(mut self, key: impl Into<Option<String>>) -> Self {
        self.approver_key = key.into().filter(|k| !k.is_empty());
        self
    }

    fn request(&self, req: reqwest::RequestBuilder, key: &str) -> reqwest::RequestBuilder {
        req.basic_auth(key, Some(""))
            .header("Accept", "application/json")
    }

    fn map_error(status: StatusCode, body: &str) -> MidtransApiError {
        if let Ok(env) = serde_json::from_str::<MidtransErrorEnvelope>(body) {
            MidtransApiError::Api {
                message: env.message(),
                status: Some(status.as_u16()),
            }
        } else {
            MidtransApiError::Http(format!("status={} body={}", status.as_u16(), body))
        }
    }

    // POST /api/v1/payouts
    #[instrument(skip(self, item), fields(method = "POST", path = "/api/v1/payouts", bank = %item.beneficiary_bank))]
    pub async fn create_payout(&self, item: &IrisPayoutItem) -> Result<String, MidtransApiError> {
        info!(
            target: "midtrans",
            method = "POST",
            path = "/api/v1/payouts",
            amount = %item.amount,
            bank = %item.beneficiary_bank,
            "iris request"
        );
        let body = IrisPayoutRequest { payouts: vec![item.clone()] };
        // Iris has no idempotency key: a payout is created at most once, no retries
        let url = format!("{}/api/v1/payouts", self.base);
        let req = self.request(self.http.post(url).json(&body), &self.creator_key);
        let resp = req.send().await.map_err(|e| MidtransApiError::Http(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| MidtransApiError::Decode(e.to_string()))?;
        if !status.is_success() {
            return Err(Self::map_error(status, &text));
        }
        let parsed: IrisPayoutResponse =
            serde_json::from_str(&text).map_err(|e| MidtransApiError::Decode(e.to_string()))?;
        parsed
            .payouts
            .into_iter()
            .next()
            .map(|p| p.reference_no)
            .ok_or_else(|| MidtransApiError::Decode("payout response without reference_no".into()))
    }

    // POST /api/v1/payouts/approve
    #[instrument(skip(self), fields(method = "POST", path = "/api/v1/payouts/approve", reference_no = %reference_no))]
    pub async fn approve_payout(&self, reference_no: &str) -> Result<(), MidtransApiError> {
        let approver = self
            .approver_key
            .as_deref()
            .ok_or(MidtransApiError::Precondition("iris approver key not configured"))?;
        let body = IrisApproveRequest {
            reference_nos: vec![reference_no.to_string()],
            otp: None,
        };
        let mut op = || {
            let url = format!("{}/api/v1/payouts/approve", self.base);
            let req = self.request(self.http.post(url).json(&body), approver);
            async move {
                let resp = req.send().await.map_err(|e| MidtransApiError::Http(e.to_string()))?;
                let status = resp.status();
                if status.is_success() {
                    Ok(())
                } else {
                    let text = resp.text().await.unwrap_or_default();
                    Err(Self::map_error(status, &text))
                }
            }
        };
        with_backoff("approve_payout", self.max_retries, self.base_delay_ms, self.max_delay_ms, &mut op)
            .await
    }

    // GET /api/v1/payouts/{reference_no}
    #[instrument(skip(self), fields(method = "GET", path = "/api/v1/payouts/{reference_no}", reference_no = %reference_no))]
    pub async fn get_payout(&self, reference_no: &str) -> Result<IrisPayoutDetails, MidtransApiError> {
        let mut op = || {
            let url = format!("{}/api/v1/payouts/{}", self.base, reference_no);
            let req = self.request(self.http.get(url), &self.creator_key);
            async move {
                let resp = req.send().await.map_err(|e| MidtransApiError::Http(e.to_string()))?;
                let status = resp.status();
                let text = resp.text().await.map_err(|e| MidtransApiError::Decode(e.to_string()))?;
                if status == StatusCode::NOT_FOUND {
                    return Err(MidtransApiError::NotFound(reference_no.to_string()));
                }
                if status.is_success() {
                    serde_json::from_str::<IrisPayoutDetails>(&text)
                        .map_err(|e| MidtransApiError::Decode(e.to_string()))
                } else {
                    Err(Self::map_error(status, &text))
                }
            }
        };
        with_backoff("get_payout", 1, self.base_delay_ms, self.max_delay_ms, &mut op).await
    }
}

#[async_trait]
impl PayoutGateway for IrisClient {
    async fn create_payout(&self, item: &IrisPayoutItem) -> Result<String, MidtransApiError> {
        IrisClient::create_payout(self, item).await
    }

    async fn approve_payout(&self, reference_no: &str) -> Result<(), MidtransApiError> {
        IrisClient::approve_payout(self, reference_no).await
    }

    async fn payout_status(&self, reference_no: &str) -> Result<String, MidtransApiError> {
        Ok(self.get_payout(reference_no).await?.status)
    }

    fn auto_approve(&self) -> bool {
        self.approver_key.is_some()
    }
}
