mod ledger;
mod midtrans;
mod pb;
mod server;
mod settings;
#[cfg(test)]
mod test_support;
mod webhook_server;

use crate::server::DonationLedgerService;
use anyhow::Result;
use std::{fs, net::SocketAddr, path::Path};
use tonic::transport::{Identity, Server, ServerTlsConfig};
use tonic_reflection::server::Builder as ReflectionBuilder;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Load configuration from config.toml and environment
    let cfg = settings::Config::from_env();

    // Midtrans server key is needed for checkouts and notification signatures
    if cfg.midtrans.server_key.is_empty() {
        tracing::error!("MIDTRANS_SERVER_KEY not set; exiting");
        return Ok(());
    }
    tracing::info!(
        production = cfg.midtrans.is_production,
        "Starting Pesona donation ledger"
    );

    let addr: SocketAddr = format!("0.0.0.0:{}", cfg.server_port).parse()?;

    let svc = DonationLedgerService::try_new(cfg.clone()).await?;

    // Notification endpoint for Midtrans and Iris callbacks
    if cfg.midtrans.iris_merchant_key.is_empty() {
        tracing::warn!("IRIS_MERCHANT_KEY not set - payout notifications will be refused");
    }
    let webhook_port = cfg.webhook_port();
    let webhook_state = webhook_server::WebhookState {
        donations: svc.donations(),
        withdrawals: svc.withdrawals(),
        server_key: cfg.midtrans.server_key.clone(),
        iris_merchant_key: cfg.midtrans.iris_merchant_key.clone(),
    };
    tokio::spawn(async move {
        if let Err(e) = webhook_server::run_webhook_server(webhook_port, webhook_state).await {
            tracing::error!("Webhook server failed: {}", e);
        }
    });
    tracing::info!(
        webhook_port = webhook_port,
        "Webhook HTTP server starting on port {}",
        webhook_port
    );

    // Enable gRPC reflection so tools like grpcurl can discover services and methods
    let reflection_svc = ReflectionBuilder::configure()
        .register_encoded_file_descriptor_set(pb::FILE_DESCRIPTOR_SET)
        .build_v1()?; // use v1 to satisfy grpcurl reflection

    // Build server, optionally with TLS
    let mut builder = Server::builder()
        .http2_keepalive_interval(Some(cfg.keep_alive_interval))
        .http2_keepalive_timeout(Some(cfg.keep_alive_timeout))
        .max_connection_age(cfg.max_connection_age);

    if cfg.tls_enable {
        let cert_path = Path::new(&cfg.tls_cert_path);
        let key_path = Path::new(&cfg.tls_key_path);
        let ca_path = {
            let stem = cert_path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("cert");
            cert_path.with_file_name(format!("{stem}.ca.pem"))
        };

        if !cert_path.exists() || !key_path.exists() {
            tracing::warn!(
                cert=%cert_path.display(), key=%key_path.display(),
                "TLS enabled but certificate or key not found; generating CA and server certificate"
            );
            generate_dev_certificates(cert_path, key_path, &ca_path)?;
        }

        // Load server cert + chain (append CA so clients receive the issuer)
        let mut chain_pem = fs::read(cert_path)?;
        if let Ok(ca_pem) = fs::read(&ca_path) {
            chain_pem.extend_from_slice(b"\n");
            chain_pem.extend_from_slice(&ca_pem);
        }

        let key = fs::read(key_path)?;
        let identity = Identity::from_pem(chain_pem, key);
        builder = builder.tls_config(ServerTlsConfig::new().identity(identity))?;
        tracing::info!(
            addr=%addr,
            cert=%cfg.tls_cert_path,
            key=%cfg.tls_key_path,
            ca=%ca_path.display(),
            "Starting TLS-enabled gRPC server (with CA chain)"
        );
    } else {
        tracing::info!(addr=%addr, "Starting plaintext gRPC server");
    }

    builder
        .add_service(reflection_svc)
        .add_service(pb::donation_ledger::donation_ledger_server::DonationLedgerServer::new(svc))
        .serve(addr)
        .await?;

    Ok(())
}

/// Self-signed CA plus a localhost server certificate for development
fn generate_dev_certificates(cert_path: &Path, key_path: &Path, ca_path: &Path) -> Result<()> {
    for path in [cert_path, key_path, ca_path] {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
    }

    let mut ca_params = rcgen::CertificateParams::default();
    ca_params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "Pesona Payments Dev CA");
    ca_params.is_ca = rcgen::IsCa::Ca(rcgen::BasicConstraints::Unconstrained);
    ca_params.key_usages = vec![
        rcgen::KeyUsagePurpose::KeyCertSign,
        rcgen::KeyUsagePurpose::CrlSign,
        rcgen::KeyUsagePurpose::DigitalSignature,
    ];
    let ca_cert = rcgen::Certificate::from_params(ca_params)?;

    let mut server_params =
        rcgen::CertificateParams::new(vec!["localhost".into(), "127.0.0.1".into()]);
    server_params
        .distinguished_name
        .push(rcgen::DnType::CommonName, "localhost");
    server_params
        .extended_key_usages
        .push(rcgen::ExtendedKeyUsagePurpose::ServerAuth);
    let server_cert = rcgen::Certificate::from_params(server_params)?;

    fs::write(cert_path, server_cert.serialize_pem_with_signer(&ca_cert)?)?;
    fs::write(key_path, server_cert.serialize_private_key_pem())?;
    fs::write(ca_path, ca_cert.serialize_pem()?)?;
    Ok(())
}
