// Midtrans payment and Iris payout notifications: signature checks and dispatch

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha512};
use subtle::ConstantTimeEq;
use tracing::{debug, info, instrument, warn};

use crate::ledger::donation::{DonationError, DonationService, ReconcileOutcome};
use crate::ledger::withdrawal::{WithdrawalError, WithdrawalService};
use crate::ledger::LedgerError;
use crate::midtrans::errors::WebhookError;
use crate::midtrans::types::{IrisNotification, TransactionNotification};

type HmacSha512 = Hmac<Sha512>;

/// Payment notification handler - verifies signature and reconciles the donation
#[instrument(skip(payload, server_key, donations))]
pub async fn handle_notification(
    payload: &[u8],
    server_key: &str,
    donations: &DonationService,
) -> Result<ReconcileOutcome, WebhookError> {
    let notification: TransactionNotification = serde_json::from_slice(payload)
        .map_err(|e| WebhookError::MalformedPayload(format!("JSON parse error: {}", e)))?;

    verify_signature(&notification, server_key)?;

    debug!(
        order_id = %notification.order_id,
        transaction_status = %notification.transaction_status,
        fraud_status = ?notification.fraud_status,
        "Processing payment notification"
    );

    let outcome = donations.reconcile(&notification).await.map_err(|e| match e {
        DonationError::Ledger(LedgerError::DonationNotFound(order_id)) => {
            WebhookError::UnknownOrder(order_id)
        }
        DonationError::AmountMismatch { expected, received } => {
            WebhookError::AmountMismatch { expected, received }
        }
        other => WebhookError::ProcessingFailed(other.to_string()),
    })?;

    info!(
        order_id = %notification.order_id,
        mapped = ?outcome.mapped,
        updated = outcome.change.is_updated(),
        "Payment notification handled"
    );
    Ok(outcome)
}

/// `hex(SHA-512(order_id + status_code + gross_amount + server_key))`
pub fn compute_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> String {
    let mut hasher = Sha512::new();
    hasher.update(order_id.as_bytes());
    hasher.update(status_code.as_bytes());
    hasher.update(gross_amount.as_bytes());
    hasher.update(server_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Verify the `signature_key` of a payment notification.
///
/// Midtrans formats `gross_amount` with a `.00` suffix but merchants may sign
/// or echo it without one, so a mismatch is retried once with the suffix toggled.
pub fn verify_signature(
    notification: &TransactionNotification,
    server_key: &str,
) -> Result<(), WebhookError> {
    if server_key.is_empty() {
        return Err(WebhookError::MissingSecret);
    }
    let provided = notification
        .signature_key
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(WebhookError::MissingSignature)?
        .to_ascii_lowercase();

    let gross = notification.gross_amount.trim();
    let candidates = [gross.to_string(), toggle_cents_suffix(gross)];
    let valid = candidates.iter().any(|amount| {
        let expected = compute_signature(
            &notification.order_id,
            &notification.status_code,
            amount,
            server_key,
        );
        bool::from(expected.as_bytes().ct_eq(provided.as_bytes()))
    });

    if !valid {
        warn!(order_id = %notification.order_id, "Payment notification signature mismatch");
        return Err(WebhookError::InvalidSignature(format!(
            "signature mismatch for order {}",
            notification.order_id
        )));
    }

    debug!(order_id = %notification.order_id, "Notification signature verified");
    Ok(())
}

fn toggle_cents_suffix(gross_amount: &str) -> String {
    match gross_amount.strip_suffix(".00") {
        Some(whole) => whole.to_string(),
        None => format!("{gross_amount}.00"),
    }
}

/// Payout notification handler - verifies `Iris-Signature` and moves the withdrawal
#[instrument(skip(payload, headers, merchant_key, withdrawals))]
pub async fn handle_iris_notification(
    payload: &[u8],
    headers: &http::HeaderMap,
    merchant_key: &str,
    withdrawals: &WithdrawalService,
) -> Result<(), WebhookError> {
    verify_iris_signature(payload, headers, merchant_key)?;

    let notification: IrisNotification = serde_json::from_slice(payload)
        .map_err(|e| WebhookError::MalformedPayload(format!("JSON parse error: {}", e)))?;

    debug!(
        reference_no = %notification.reference_no,
        status = %notification.status,
        "Processing payout notification"
    );

    let updated = withdrawals
        .apply_payout_status(
            &notification.reference_no,
            &notification.status,
            notification.error_message.as_deref(),
        )
        .map_err(|e| match e {
            WithdrawalError::UnknownPayout(reference) => WebhookError::UnknownPayout(reference),
            other => WebhookError::ProcessingFailed(other.to_string()),
        })?;

    match updated {
        Some(w) => info!(withdrawal_id = %w.id, status = %w.status, "Payout notification applied"),
        None => debug!(reference_no = %notification.reference_no, "Payout notification caused no change"),
    }
    Ok(())
}

/// `Iris-Signature` is the hex HMAC-SHA512 of the raw body keyed by the merchant key
pub fn verify_iris_signature(
    payload: &[u8],
    headers: &http::HeaderMap,
    merchant_key: &str,
) -> Result<(), WebhookError> {
    if merchant_key.is_empty() {
        return Err(WebhookError::MissingSecret);
    }
    let provided = headers
        .get("iris-signature")
        .ok_or(WebhookError::MissingSignature)?
        .to_str()
        .map_err(|e| WebhookError::InvalidSignature(format!("Invalid header encoding: {}", e)))?
        .trim()
        .to_ascii_lowercase();

    let mut mac = HmacSha512::new_from_slice(merchant_key.as_bytes())
        .map_err(|e| WebhookError::InvalidSignature(format!("HMAC init error: {}", e)))?;
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    if !bool::from(expected.as_bytes().ct_eq(provided.as_bytes())) {
        return Err(WebhookError::InvalidSignature("Iris signature mismatch".to_string()));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) fn iris_signature(payload: &[u8], merchant_key: &str) -> String {
    let mut mac = HmacSha512::new_from_slice(merchant_key.as_bytes()).unwrap();
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::database::LedgerDatabase;
    use crate::ledger::donation_state::DonationState;
    use crate::ledger::models::{Donation, DonationStatus, StatusChange};
    use crate::test_support::{notification, FakePaymentGateway};
    use std::sync::Arc;
    use std::time::Duration;

    const SERVER_KEY: &str = "SB-Mid-server-test";

    fn signed(mut n: TransactionNotification, signed_amount: &str) -> TransactionNotification {
        n.signature_key = Some(compute_signature(&n.order_id, &n.status_code, signed_amount, SERVER_KEY));
        n
    }

    fn donations() -> (tempfile::TempDir, DonationService) {
        let dir = tempfile::tempdir().unwrap();
        let db = Arc::new(LedgerDatabase::new(dir.path().join("ledger.redb")).unwrap());
        db.insert_donation(&Donation::new_pending("DON-1".into(), "camp-1".into(), "Rina".into(), 75_000, 1))
            .unwrap();
        let svc = DonationService::new(
            db,
            Arc::new(FakePaymentGateway::default()),
            Arc::new(DonationState::new()),
            10_000,
            Duration::from_secs(3600),
        );
        (dir, svc)
    }

    #[test]
    fn known_signature_vector() {
        // sha512("DON-1" + "200" + "75000.00" + "SB-Mid-server-test")
        let sig = compute_signature("DON-1", "200", "75000.00", SERVER_KEY);
        let mut hasher = Sha512::new();
        hasher.update(b"DON-120075000.00SB-Mid-server-test");
        assert_eq!(sig, hex::encode(hasher.finalize()));
        assert_eq!(sig.len(), 128);
    }

    #[test]
    fn verify_signature_valid() {
        let n = signed(notification("DON-1", "settlement", None, "75000.00"), "75000.00");
        assert!(verify_signature(&n, SERVER_KEY).is_ok());
    }

    #[test]
    fn verify_signature_tolerates_cents_suffix() {
        // signed without the suffix, delivered with it
        let n = signed(notification("DON-1", "settlement", None, "75000.00"), "75000");
        assert!(verify_signature(&n, SERVER_KEY).is_ok());

        // signed with the suffix, delivered without it
        let n = signed(notification("DON-1", "settlement", None, "75000"), "75000.00");
        assert!(verify_signature(&n, SERVER_KEY).is_ok());
    }

    #[test]
    fn verify_signature_invalid() {
        let n = signed(notification("DON-1", "settlement", None, "75000.00"), "76000.00");
        assert!(matches!(
            verify_signature(&n, SERVER_KEY),
            Err(WebhookError::InvalidSignature(_))
        ));

        let n = signed(notification("DON-1", "settlement", None, "75000.00"), "75000.00");
        assert!(matches!(
            verify_signature(&n, "another-key"),
            Err(WebhookError::InvalidSignature(_))
        ));
    }

    #[test]
    fn verify_signature_missing() {
        let n = notification("DON-1", "settlement", None, "75000.00");
        assert!(matches!(verify_signature(&n, SERVER_KEY), Err(WebhookError::MissingSignature)));
        assert!(matches!(verify_signature(&n, ""), Err(WebhookError::MissingSecret)));
    }

    #[tokio::test]
    async fn handle_notification_is_idempotent() {
        let (_dir, svc) = donations();
        let n = signed(notification("DON-1", "settlement", None, "75000.00"), "75000.00");
        let body = serde_json::to_vec(&n).unwrap();

        let first = handle_notification(&body, SERVER_KEY, &svc).await.unwrap();
        assert!(first.change.is_updated());
        let second = handle_notification(&body, SERVER_KEY, &svc).await.unwrap();
        assert_eq!(second.change, StatusChange::Unchanged);

        let summary = svc.summary("camp-1").unwrap();
        assert_eq!(summary.collected, 75_000);
        assert_eq!(summary.donor_count, 1);
        assert_eq!(svc.get("DON-1").unwrap().status, DonationStatus::Paid);
    }

    #[tokio::test]
    async fn handle_notification_errors() {
        let (_dir, svc) = donations();

        let err = handle_notification(b"not json", SERVER_KEY, &svc).await.unwrap_err();
        assert_eq!(err.status_code(), 400);

        let n = signed(notification("DON-404", "settlement", None, "75000.00"), "75000.00");
        let err = handle_notification(&serde_json::to_vec(&n).unwrap(), SERVER_KEY, &svc)
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::UnknownOrder(_)));

        let n = signed(notification("DON-1", "settlement", None, "1000.00"), "1000.00");
        let err = handle_notification(&serde_json::to_vec(&n).unwrap(), SERVER_KEY, &svc)
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::AmountMismatch { expected: 75_000, .. }));

        let n = notification("DON-1", "settlement", None, "75000.00");
        let err = handle_notification(&serde_json::to_vec(&n).unwrap(), SERVER_KEY, &svc)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 401);
        assert_eq!(svc.get("DON-1").unwrap().status, DonationStatus::Pending);
    }

    #[test]
    fn iris_signature_checks() {
        let body = br#"{"reference_no":"ref-1","status":"completed","amount":"100000.00"}"#;
        let mut headers = http::HeaderMap::new();
        headers.insert("iris-signature", iris_signature(body, "merchant").parse().unwrap());

        assert!(verify_iris_signature(body, &headers, "merchant").is_ok());
        assert!(matches!(
            verify_iris_signature(body, &headers, "other"),
            Err(WebhookError::InvalidSignature(_))
        ));
        assert!(matches!(
            verify_iris_signature(body, &http::HeaderMap::new(), "merchant"),
            Err(WebhookError::MissingSignature)
        ));
        assert!(matches!(
            verify_iris_signature(body, &headers, ""),
            Err(WebhookError::MissingSecret)
        ));
    }
}
