// Midtrans-specific error types and mappings

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tonic::Status;

// Midtrans error bodies come in several shapes depending on the product:
// Core API: { status_code, status_message, id }
// Snap:     { error_messages: [..] }
// Iris:     { error_message, errors }
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MidtransErrorEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_messages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<serde_json::Value>,
}

impl MidtransErrorEnvelope {
    pub fn message(&self) -> Option<String> {
        if let Some(m) = &self.status_message {
            return Some(m.clone());
        }
        if !self.error_messages.is_empty() {
            return Some(self.error_messages.join("; "));
        }
        match (&self.error_message, &self.errors) {
            (Some(m), Some(details)) => Some(format!("{m}: {details}")),
            (Some(m), None) => Some(m.clone()),
            (None, Some(details)) => Some(details.to_string()),
            (None, None) => None,
        }
    }

    pub fn to_api_error_with_status(self, status: Option<u16>) -> MidtransApiError {
        // Core API reports the real outcome in the body; the HTTP status may be 200
        let status = self
            .status_code
            .as_deref()
            .and_then(|s| s.parse::<u16>().ok())
            .or(status);
        MidtransApiError::Api {
            message: self.message(),
            status,
        }
    }
}

#[derive(Debug, Error)]
pub enum MidtransApiError {
    #[error("http error: {0}")]
    Http(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("midtrans error: status={status:?} message={message:?}")]
    Api {
        message: Option<String>,
        status: Option<u16>,
    },
    #[error("transaction not found: {0}")]
    NotFound(String),
    #[error("precondition failed: {0}")]
    Precondition(&'static str),
}

impl MidtransApiError {
    pub fn http_status(&self) -> Option<u16> {
        match self {
            MidtransApiError::Api { status, .. } => *status,
            MidtransApiError::Http(_) => Some(503),
            MidtransApiError::NotFound(_) => Some(404),
            _ => None,
        }
    }
}

// Centralized mapper from MidtransApiError -> tonic::Status
pub fn to_tonic_status(e: &MidtransApiError) -> Status {
    match e {
        MidtransApiError::Http(msg) => Status::unavailable(format!("midtrans/http: {msg}")),
        MidtransApiError::Decode(msg) => Status::internal(format!("midtrans/decode: {msg}")),
        MidtransApiError::Api { message, status } => {
            let base = format!("midtrans status={:?} msg={:?}", status, message);
            match status {
                Some(400) | Some(406) | Some(407) => Status::invalid_argument(base),
                Some(401) | Some(402) | Some(403) => Status::permission_denied(base),
                Some(404) => Status::not_found(base),
                Some(409) => Status::already_exists(base),
                Some(429) => Status::resource_exhausted(base),
                Some(s) if (500..600).contains(s) => Status::unavailable(base),
                _ => Status::unknown(base),
            }
        }
        MidtransApiError::NotFound(order_id) => {
            Status::not_found(format!("midtrans has no transaction for {order_id}"))
        }
        MidtransApiError::Precondition(msg) => Status::failed_precondition(msg.to_string()),
    }
}

impl From<MidtransApiError> for Status {
    fn from(e: MidtransApiError) -> Self {
        to_tonic_status(&e)
    }
}

// Helper indicating whether an error is likely transient (transport, 5xx or throttling)
pub fn is_transient(http_status: Option<u16>) -> bool {
    match http_status {
        Some(s) => (500..600).contains(&s) || s == 429,
        None => false,
    }
}

// Webhook-specific errors
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("missing webhook secret")]
    MissingSecret,
    #[error("missing signature")]
    MissingSignature,
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
    #[error("gross amount {received} does not match donation amount {expected}")]
    AmountMismatch { expected: i64, received: String },
    #[error("unknown order: {0}")]
    UnknownOrder(String),
    #[error("unknown payout: {0}")]
    UnknownPayout(String),
    #[error("event processing failed: {0}")]
    ProcessingFailed(String),
}

impl WebhookError {
    /// Map webhook error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            WebhookError::InvalidSignature(_) => 401,
            WebhookError::MissingSignature => 401,
            WebhookError::MissingSecret => 500,
            WebhookError::MalformedPayload(_) => 400,
            WebhookError::AmountMismatch { .. } => 400,
            WebhookError::UnknownOrder(_) => 404,
            WebhookError::UnknownPayout(_) => 404,
            WebhookError::ProcessingFailed(_) => 500,
        }
    }
}
