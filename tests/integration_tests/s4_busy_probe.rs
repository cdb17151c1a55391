// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use ciborium::Value;
use mash_conformance_core::{
    cfg::config::{LimitsConfig, TimeoutConfig},
    pase::busy::probe_busy,
    session::ConnectionState,
    wire::codec::encode_value,
};

use crate::integration_tests::common::mock_pair;

fn encode_busy_error(code: u32, retry_after: u32) -> Vec<u8> {
    let map = vec![
        (Value::Integer(0.into()), Value::Integer(5.into())),
        (Value::Integer(1.into()), Value::Integer((code as i64).into())),
        (Value::Integer(2.into()), Value::Integer((retry_after as i64).into())),
    ];
    encode_value(&Value::Map(map)).expect("encode")
}

#[tokio::test]
async fn device_under_stress_returns_a_classified_busy_response() {
    // A TLS connect that "succeeds" is modeled, as elsewhere in this crate's
    // own tests, by a raw loopback pair standing in for a completed
    // commissioning-TLS handshake: what's under test is the busy-response
    // classification, not `rustls` itself.
    let (session, mut device) = mock_pair(ConnectionState::TlsConnected).await;

    let server = tokio::spawn(async move {
        let _request = device.read_frame().await.expect("device reads PASERequest");
        let error = encode_busy_error(5, 30);
        device.write_frame(&error).await.expect("device writes busy error");
    });

    let request = mash_conformance_core::models::pase_wire::PaseRequest {
        public_value: vec![1, 2, 3],
        client_identity: "ctrl".into(),
    };
    let outcome =
        probe_busy(&session, &request, &TimeoutConfig::default(), &LimitsConfig::default())
            .await
            .expect("probe_busy");

    assert!(session.is_usable().await, "connection_established");
    assert!(outcome.busy_response_received);
    assert_eq!(outcome.busy_retry_after, Some(30));

    server.await.expect("server task");
}
