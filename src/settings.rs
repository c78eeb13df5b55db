use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct MidtransSettings {
    pub server_key: String,
    #[serde(default)]
    pub is_production: bool,
    #[serde(default = "default_midtrans_timeout_ms")]
    pub timeout_ms: u64,
    // Iris payout credentials; an empty creator key disables automatic payouts
    #[serde(default)]
    pub iris_creator_key: String,
    #[serde(default)]
    pub iris_approver_key: String,
    #[serde(default)]
    pub iris_merchant_key: String,
}

impl Default for MidtransSettings {
    fn default() -> Self {
        Self {
            server_key: String::new(),
            is_production: false,
            timeout_ms: default_midtrans_timeout_ms(),
            iris_creator_key: String::new(),
            iris_approver_key: String::new(),
            iris_merchant_key: String::new(),
        }
    }
}

impl MidtransSettings {
    pub fn iris_enabled(&self) -> bool {
        !self.iris_creator_key.is_empty()
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LedgerSettings {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    /// Smallest donation accepted, in rupiah
    #[serde(default = "default_donation_min_amount")]
    pub donation_min_amount: i64,
    #[serde(default = "default_withdrawal_min_amount")]
    pub withdrawal_min_amount: i64,
    /// Pending donations older than this are failed when Midtrans has no record of them
    #[serde(default = "default_donation_expiry", with = "humantime_serde")]
    pub donation_expiry: Duration,
    #[serde(default = "default_otp_ttl", with = "humantime_serde")]
    pub otp_ttl: Duration,
    #[serde(default = "default_otp_max_attempts")]
    pub otp_max_attempts: u32,
    #[serde(default = "default_watch_session_ttl", with = "humantime_serde")]
    pub watch_session_ttl: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            donation_min_amount: default_donation_min_amount(),
            withdrawal_min_amount: default_withdrawal_min_amount(),
            donation_expiry: default_donation_expiry(),
            otp_ttl: default_otp_ttl(),
            otp_max_attempts: default_otp_max_attempts(),
            watch_session_ttl: default_watch_session_ttl(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub midtrans: MidtransSettings,
    #[serde(default)]
    pub ledger: LedgerSettings,
    pub server_port: u16,
    /// Port of the HTTP notification endpoint; defaults to server_port + 1
    #[serde(default)]
    pub webhook_port: Option<u16>,
    // TLS config for gRPC server
    pub tls_enable: bool,
    pub tls_cert_path: String,
    pub tls_key_path: String,
    #[serde(default = "default_keep_alive_interval", with = "humantime_serde")]
    pub keep_alive_interval: Duration,
    #[serde(default = "default_keep_alive_timeout", with = "humantime_serde")]
    pub keep_alive_timeout: Duration,
    #[serde(default = "default_max_connection_age", with = "humantime_serde")]
    pub max_connection_age: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            midtrans: MidtransSettings::default(),
            ledger: LedgerSettings::default(),
            server_port: 50051,
            webhook_port: None,
            tls_enable: false,
            tls_cert_path: "certs/server.crt".to_string(),
            tls_key_path: "certs/server.key".to_string(),
            keep_alive_interval: default_keep_alive_interval(),
            keep_alive_timeout: default_keep_alive_timeout(),
            max_connection_age: default_max_connection_age(),
        }
    }
}

impl Config {
    /// Load from config.toml (if present) and environment variables.
    /// Environment variables override file values.
    /// Supported env keys: MIDTRANS_SERVER_KEY, MIDTRANS_IS_PRODUCTION, MIDTRANS_TIMEOUT_MS,
    /// IRIS_CREATOR_KEY, IRIS_APPROVER_KEY, IRIS_MERCHANT_KEY, DATABASE_PATH,
    /// DONATION_MIN_AMOUNT, WITHDRAWAL_MIN_AMOUNT, DONATION_EXPIRY, OTP_TTL, OTP_MAX_ATTEMPTS,
    /// WATCH_SESSION_TTL, SERVER_PORT, WEBHOOK_PORT, TLS_ENABLE, TLS_CERT_PATH, TLS_KEY_PATH,
    /// KEEP_ALIVE_INTERVAL, KEEP_ALIVE_TIMEOUT, MAX_CONNECTION_AGE
    pub fn load() -> Self {
        // 1) Start with defaults + config.toml only if it exists
        let base: Config = Default::default();
        let mut fig = Figment::from(Serialized::defaults(base));
        if std::path::Path::new("config.toml").exists() {
            fig = fig.merge(Toml::file("config.toml"));
        }
        let mut cfg = Self::extract(fig);

        // 2) Overlay environment variables explicitly
        cfg.apply_env(|key| std::env::var(key).ok());
        cfg
    }

    fn extract(fig: Figment) -> Self {
        fig.extract().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Invalid config.toml; falling back to defaults");
            Config::default()
        })
    }

    pub fn from_env() -> Self {
        Self::load()
    }

    pub fn webhook_port(&self) -> u16 {
        self.webhook_port
            .unwrap_or_else(|| self.server_port.saturating_add(1))
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MIDTRANS_SERVER_KEY") {
            self.midtrans.server_key = v;
        }
        if let Some(v) = lookup("MIDTRANS_IS_PRODUCTION") {
            self.midtrans.is_production = parse_flag(&v);
        }
        if let Some(v) = lookup("MIDTRANS_TIMEOUT_MS") {
            self.midtrans.timeout_ms = v.parse().unwrap_or(self.midtrans.timeout_ms);
        }
        if let Some(v) = lookup("IRIS_CREATOR_KEY") {
            self.midtrans.iris_creator_key = v;
        }
        if let Some(v) = lookup("IRIS_APPROVER_KEY") {
            self.midtrans.iris_approver_key = v;
        }
        if let Some(v) = lookup("IRIS_MERCHANT_KEY") {
            self.midtrans.iris_merchant_key = v;
        }
        if let Some(v) = lookup("DATABASE_PATH") {
            self.ledger.database_path = v;
        }
        if let Some(v) = lookup("DONATION_MIN_AMOUNT") {
            self.ledger.donation_min_amount = v.parse().unwrap_or(self.ledger.donation_min_amount);
        }
        if let Some(v) = lookup("WITHDRAWAL_MIN_AMOUNT") {
            self.ledger.withdrawal_min_amount =
                v.parse().unwrap_or(self.ledger.withdrawal_min_amount);
        }
        if let Some(v) = lookup("DONATION_EXPIRY") {
            self.ledger.donation_expiry = parse_duration_env(&v, self.ledger.donation_expiry);
        }
        if let Some(v) = lookup("OTP_TTL") {
            self.ledger.otp_ttl = parse_duration_env(&v, self.ledger.otp_ttl);
        }
        if let Some(v) = lookup("OTP_MAX_ATTEMPTS") {
            self.ledger.otp_max_attempts = v.parse().unwrap_or(self.ledger.otp_max_attempts);
        }
        if let Some(v) = lookup("WATCH_SESSION_TTL") {
            self.ledger.watch_session_ttl = parse_duration_env(&v, self.ledger.watch_session_ttl);
        }
        if let Some(v) = lookup("SERVER_PORT") {
            self.server_port = v.parse().unwrap_or(self.server_port);
        }
        if let Some(v) = lookup("WEBHOOK_PORT") {
            self.webhook_port = v.parse().ok().or(self.webhook_port);
        }
        if let Some(v) = lookup("TLS_ENABLE") {
            self.tls_enable = parse_flag(&v);
        }
        if let Some(v) = lookup("TLS_CERT_PATH") {
            self.tls_cert_path = v;
        }
        if let Some(v) = lookup("TLS_KEY_PATH") {
            self.tls_key_path = v;
        }
        if let Some(v) = lookup("KEEP_ALIVE_INTERVAL") {
            self.keep_alive_interval = parse_duration_env(&v, self.keep_alive_interval);
        }
        if let Some(v) = lookup("KEEP_ALIVE_TIMEOUT") {
            self.keep_alive_timeout = parse_duration_env(&v, self.keep_alive_timeout);
        }
        if let Some(v) = lookup("MAX_CONNECTION_AGE") {
            self.max_connection_age = parse_duration_env(&v, self.max_connection_age);
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "YES")
}

fn parse_duration_env(value: &str, current: Duration) -> Duration {
    humantime::parse_duration(value).unwrap_or(current)
}

fn default_keep_alive_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_keep_alive_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_max_connection_age() -> Duration {
    Duration::from_secs(1800)
}

fn default_midtrans_timeout_ms() -> u64 {
    15_000
}

fn default_database_path() -> String {
    "data/pesona-payments.redb".to_string()
}

fn default_donation_min_amount() -> i64 {
    10_000
}

fn default_withdrawal_min_amount() -> i64 {
    50_000
}

fn default_donation_expiry() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_otp_ttl() -> Duration {
    Duration::from_secs(300) // 5 minutes
}

fn default_otp_max_attempts() -> u32 {
    5
}

fn default_watch_session_ttl() -> Duration {
    Duration::from_secs(3600)
}
