// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! TLS 1.3 dial helpers for the two ALPN modes: commissioning (self-signed,
//! SPAKE2+ bootstrap) and operational (mTLS under the dynamically-built
//! Zone CA pool).

pub mod stream;

use std::{sync::Arc, time::Duration};

use rustls::{
    ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme,
    client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier},
};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tracing::warn;

use crate::{
    error::{HarnessError, Result},
    transport::stream::Transport,
};

pub const ALPN_COMMISSIONING: &[u8] = b"mash-commissioning";
pub const ALPN_OPERATIONAL: &[u8] = b"mash-operational";

/// Installs the process-wide default crypto provider (ring). Idempotent:
/// subsequent calls after the first are no-ops.
pub fn ensure_crypto_provider() {
    let _ = rustls::crypto::ring::default_provider().install_default();
}

/// Accepts any server certificate unconditionally. Used for the
/// commissioning ALPN, where trust is established by the SPAKE2+ exchange
/// rather than by certificate validation, and as the explicit, documented
/// fallback for operational TLS when no Zone CA has been configured yet
/// (very-early tests). Never select this path in production: it makes the
/// operational channel vulnerable to on-path tampering before the Zone CA is
/// known.
#[derive(Debug)]
struct AcceptAnyServerCert;

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

/// Client identity material used for operational (mutual-TLS) dials.
#[derive(Debug)]
pub struct ClientIdentity {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
}

impl Clone for ClientIdentity {
    fn clone(&self) -> Self {
        Self { cert_chain: self.cert_chain.clone(), private_key: self.private_key.clone_key() }
    }
}

fn commissioning_client_config() -> Result<Arc<ClientConfig>> {
    ensure_crypto_provider();
    let builder = ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS13]);
    let mut cfg = builder
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth();
    cfg.alpn_protocols = vec![ALPN_COMMISSIONING.to_vec()];
    Ok(Arc::new(cfg))
}

/// Builds the operational `ClientConfig`. When `zone_ca` is `Some`, the
/// server is verified against it and (if `identity` is present) the
/// controller authenticates with its issued certificate. When `zone_ca` is
/// `None`, falls back to unverified TLS (see [`AcceptAnyServerCert`]).
fn operational_client_config(
    zone_ca: Option<Arc<RootCertStore>>,
    identity: Option<ClientIdentity>,
) -> Result<Arc<ClientConfig>> {
    ensure_crypto_provider();
    let builder = ClientConfig::builder_with_protocol_versions(&[&rustls::version::TLS13]);

    let mut cfg = match zone_ca {
        Some(roots) => {
            let verifier_builder = builder.with_root_certificates((*roots).clone());
            match identity {
                Some(id) => verifier_builder
                    .with_client_auth_cert(id.cert_chain, id.private_key)
                    .map_err(|e| {
                        HarnessError::infra(format!("invalid client certificate: {e}"))
                    })?,
                None => verifier_builder.with_no_client_auth(),
            }
        },
        None => {
            warn!(
                "no Zone CA configured yet; dialing operational TLS unverified \
                 (non-production fallback)"
            );
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
                .with_no_client_auth()
        },
    };
    cfg.alpn_protocols = vec![ALPN_OPERATIONAL.to_vec()];
    Ok(Arc::new(cfg))
}

async fn tcp_connect(addr: &str, dial_timeout: Duration) -> Result<TcpStream> {
    let stream = tokio::time::timeout(dial_timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| HarnessError::infra(format!("TCP dial to {addr} timed out")))??;
    stream.set_nodelay(true)?;
    Ok(stream)
}

fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|e| HarnessError::infra(format!("invalid server name {host}: {e}")))
}

/// Dials commissioning-mode TLS: ALPN = "mash-commissioning", self-signed
/// device certificate accepted unconditionally.
pub async fn dial_commissioning(
    addr: &str,
    host: &str,
    dial_timeout: Duration,
) -> Result<Transport> {
    let tcp = tcp_connect(addr, dial_timeout).await?;
    let config = commissioning_client_config()?;
    let connector = TlsConnector::from(config);
    let name = server_name(host)?;
    let tls = tokio::time::timeout(dial_timeout, connector.connect(name, tcp))
        .await
        .map_err(|_| HarnessError::infra("commissioning TLS handshake timed out"))??;
    Ok(Transport::Tls(Box::new(tls)))
}

/// Dials operational-mode TLS: ALPN = "mash-operational", mutual-TLS under
/// the Zone CA pool (or unverified if none is configured yet).
pub async fn dial_operational(
    addr: &str,
    host: &str,
    dial_timeout: Duration,
    zone_ca: Option<Arc<RootCertStore>>,
    identity: Option<ClientIdentity>,
) -> Result<Transport> {
    let tcp = tcp_connect(addr, dial_timeout).await?;
    let config = operational_client_config(zone_ca, identity)?;
    let connector = TlsConnector::from(config);
    let name = server_name(host)?;
    let tls = tokio::time::timeout(dial_timeout, connector.connect(name, tcp))
        .await
        .map_err(|_| HarnessError::infra("operational TLS handshake timed out"))??;
    Ok(Transport::Tls(Box::new(tls)))
}

/// Dials a bare TCP socket without TLS. Used only by the flood-test handle
/// pool (spec.md §5, §9), which is deliberately probing raw-accept behavior.
pub async fn dial_raw(addr: &str, dial_timeout: Duration) -> Result<Transport> {
    Ok(Transport::Raw(tcp_connect(addr, dial_timeout).await?))
}
