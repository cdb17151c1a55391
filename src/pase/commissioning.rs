// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Commissioning orchestration (spec.md §4.3): commissioning TLS dial,
//! SPAKE2+ handshake to completion, then the promotion to operational TLS.
//!
//! States: *Uncommissioned → CommissioningTLSDialed → PASEInFlight →
//! PASEVerified → OperationalTLSDialed → Operational*. Error transitions
//! route back to `Uncommissioned` with a classified error.

use std::sync::Arc;

use rustls::RootCertStore;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    cfg::config::TimeoutConfig,
    error::Result,
    models::pase_wire::encode_pase_request,
    pase::handshake::PaseHandshake,
    session::{ConnectionState, Session},
    state_machine::{
        common::StateMachineCtx,
        pase_states::PaseCtx,
    },
    transport::{self, ClientIdentity},
};

/// The outcome of a successful commission: an operational session plus the
/// derived session key (retained by the suite-session cache for reuse).
pub struct CommissionedDevice {
    pub session: Arc<Session>,
    pub session_key: Vec<u8>,
}

/// Runs commissioning TLS dial + PASE handshake to completion
/// (`PASEVerified`), without yet promoting to operational TLS. Exposed
/// separately from [`commission`] so busy-probe tests can drive the dial
/// and the first request/response without requiring a full commission.
pub async fn dial_and_handshake(
    addr: &str,
    host: &str,
    setup_code: u64,
    client_identity: impl Into<String>,
    timeouts: &TimeoutConfig,
    cancel: &CancellationToken,
) -> Result<(Arc<Session>, Vec<u8>)> {
    let transport =
        transport::dial_commissioning(addr, host, timeouts.commissioning_dial).await?;
    let session = Arc::new(Session::new(transport, ConnectionState::TlsConnected));

    let (handshake, request) = PaseHandshake::start(setup_code, client_identity);
    let payload = encode_pase_request(&request)?;
    session.write_frame(&payload).await?;

    // No separate named duration for the PASE round-trip itself (spec.md
    // §5 only names the dial timeouts); it shares the commissioning dial
    // window, since both bound the same commissioning-TLS-session lifetime.
    let mut pase_ctx = PaseCtx::new(session.clone(), handshake, timeouts.commissioning_dial);
    pase_ctx.execute(cancel).await?;
    session.set_state(ConnectionState::PaseVerified).await;

    let session_key = pase_ctx
        .session_key
        .take()
        .expect("PaseCtx::execute only returns Ok after session_key is set");
    Ok((session, session_key))
}

/// Full commission: dial + handshake, then promote to operational TLS
/// under the supplied Zone CA pool (or unverified, if `zone_ca` is `None`
/// — the explicit, non-production, very-early-tests fallback spec.md
/// §4.3 calls for).
pub async fn commission(
    addr: &str,
    host: &str,
    setup_code: u64,
    client_identity: impl Into<String>,
    zone_ca: Option<Arc<RootCertStore>>,
    identity: Option<ClientIdentity>,
    timeouts: &TimeoutConfig,
    cancel: &CancellationToken,
) -> Result<CommissionedDevice> {
    let (commissioning_session, session_key) =
        dial_and_handshake(addr, host, setup_code, client_identity, timeouts, cancel).await?;
    commissioning_session.close_with_ack(timeouts.close_ack).await;

    let operational_transport = transport::dial_operational(
        addr,
        host,
        timeouts.operational_dial,
        zone_ca,
        identity,
    )
    .await?;
    let operational_session =
        Arc::new(Session::new(operational_transport, ConnectionState::Operational));
    operational_session.mark_operational(true);

    info!(addr, "commissioning complete, operational session established");
    Ok(CommissionedDevice { session: operational_session, session_key })
}
