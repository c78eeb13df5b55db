// One-time codes guarding withdrawal requests

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};

use super::database::{LedgerDatabase, OtpWrite};
use super::{unix_now, LedgerError};

const OTP_DIGITS: usize = 6;

/// Stored form of an issued code; the code itself is never persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpRecord {
    pub code_hash: String,
    pub expires_at: i64,
    pub attempts: u32,
}

#[derive(Debug, Clone)]
pub struct IssuedOtp {
    pub code: String,
    pub expires_at: i64,
}

#[derive(Debug, Error)]
pub enum OtpError {
    #[error("no active code; request a new one")]
    NotIssued,
    #[error("code expired")]
    Expired,
    #[error("too many failed attempts; request a new code")]
    TooManyAttempts,
    #[error("invalid code, {remaining} attempt(s) left")]
    Mismatch { remaining: u32 },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub struct OtpService {
    db: Arc<LedgerDatabase>,
    ttl: Duration,
    max_attempts: u32,
}

impl OtpService {
    pub fn new(db: Arc<LedgerDatabase>, ttl: Duration, max_attempts: u32) -> Self {
        Self {
            db,
            ttl,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Issue a fresh code for a requester on a campaign, replacing any earlier one
    pub fn issue(&self, campaign_id: &str, requester_id: &str) -> Result<IssuedOtp, OtpError> {
        self.issue_at(campaign_id, requester_id, unix_now())
    }

    pub fn verify(&self, campaign_id: &str, requester_id: &str, code: &str) -> Result<(), OtpError> {
        self.verify_at(campaign_id, requester_id, code, unix_now())
    }

    fn issue_at(&self, campaign_id: &str, requester_id: &str, now: i64) -> Result<IssuedOtp, OtpError> {
        let key = otp_key(campaign_id, requester_id);
        let code = format!(
            "{:0width$}",
            rand::thread_rng().gen_range(0..10u32.pow(OTP_DIGITS as u32)),
            width = OTP_DIGITS
        );
        let expires_at = now + self.ttl.as_secs() as i64;
        let record = OtpRecord {
            code_hash: hash_code(&key, &code),
            expires_at,
            attempts: 0,
        };
        self.db.put_otp(&key, &record)?;
        debug!(campaign_id = %campaign_id, requester_id = %requester_id, expires_at, "Issued withdrawal OTP");
        Ok(IssuedOtp { code, expires_at })
    }

    fn verify_at(
        &self,
        campaign_id: &str,
        requester_id: &str,
        code: &str,
        now: i64,
    ) -> Result<(), OtpError> {
        let key = otp_key(campaign_id, requester_id);
        let provided = hash_code(&key, code.trim());
        let max_attempts = self.max_attempts;

        let result = self.db.update_otp(&key, |current| {
            let Some(mut record) = current else {
                return (OtpWrite::Keep, Err(OtpError::NotIssued));
            };
            if now > record.expires_at {
                return (OtpWrite::Remove, Err(OtpError::Expired));
            }
            if record.attempts >= max_attempts {
                return (OtpWrite::Keep, Err(OtpError::TooManyAttempts));
            }
            if bool::from(record.code_hash.as_bytes().ct_eq(provided.as_bytes())) {
                // single use
                return (OtpWrite::Remove, Ok(()));
            }
            record.attempts += 1;
            let err = if record.attempts >= max_attempts {
                OtpError::TooManyAttempts
            } else {
                OtpError::Mismatch {
                    remaining: max_attempts - record.attempts,
                }
            };
            (OtpWrite::Put(record), Err(err))
        })?;

        if let Err(OtpError::Mismatch { .. } | OtpError::TooManyAttempts) = &result {
            warn!(
                campaign_id = %campaign_id,
                requester_id = %requester_id,
                "Withdrawal OTP mismatch"
            );
        }
        result
    }
}

fn otp_key(campaign_id: &str, requester_id: &str) -> String {
    format!("{campaign_id}/{requester_id}")
}

fn hash_code(key: &str, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(b":");
    hasher.update(code.as_bytes());
    hex::encode(hasher.finalize())
}
