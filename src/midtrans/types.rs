// Midtrans Snap, Core API and Iris DTOs
use serde::{Deserialize, Serialize};

// Snap transaction creation

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapTransactionRequest {
    pub transaction_details: TransactionDetails,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub item_details: Vec<ItemDetail>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub customer_details: Option<CustomerDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionDetails {
    pub order_id: String,
    /// Whole rupiah; IDR has no minor unit
    pub gross_amount: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemDetail {
    pub id: String,
    pub price: i64,
    pub quantity: u32,
    /// Midtrans truncates at 50 characters
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapTransactionResponse {
    pub token: String,
    pub redirect_url: String,
}

/// Transaction state as delivered by HTTP notifications and by
/// `GET /v2/{order_id}/status`; both share this shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionNotification {
    pub order_id: String,
    pub transaction_status: String,
    #[serde(default)]
    pub status_code: String,
    #[serde(default)]
    pub gross_amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fraud_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settlement_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merchant_id: Option<String>,
}

impl TransactionNotification {
    /// Identifies this particular gateway state for duplicate detection
    pub fn dedup_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.transaction_id.as_deref().unwrap_or(&self.order_id),
            self.transaction_status,
            self.fraud_status.as_deref().unwrap_or("-")
        )
    }
}

/// Parse a Midtrans amount string ("50000.00", "50000") into whole rupiah.
/// Non-zero fractions are rejected since IDR has no minor unit.
pub fn parse_gross_amount(value: &str) -> Option<i64> {
    let value = value.trim();
    let (whole, fraction) = match value.split_once('.') {
        Some((w, f)) => (w, f),
        None => (value, ""),
    };
    if !fraction.chars().all(|c| c == '0') {
        return None;
    }
    if whole.is_empty() || !whole.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    whole.parse().ok()
}

// Iris payouts

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrisPayoutItem {
    pub beneficiary_name: String,
    pub beneficiary_account: String,
    pub beneficiary_bank: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beneficiary_email: Option<String>,
    /// Iris expects a decimal string
    pub amount: String,
    pub notes: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrisPayoutRequest {
    pub payouts: Vec<IrisPayoutItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrisPayoutResponse {
    pub payouts: Vec<IrisPayoutResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrisPayoutResult {
    pub status: String,
    pub reference_no: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrisApproveRequest {
    pub reference_nos: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrisPayoutDetails {
    pub reference_no: String,
    pub status: String,
    pub amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beneficiary_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub beneficiary_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Body of an Iris payout status notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IrisNotification {
    pub reference_no: String,
    pub status: String,
    #[serde(default)]
    pub amount: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}
