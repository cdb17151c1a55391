// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use ciborium::Value;
use mash_conformance_core::{
    client::pool::Pool,
    session::ConnectionState,
    wire::codec::{
        Operation, RequestFrame, ResponseFrame, StatusCode, encode_request, encode_response,
    },
};

use crate::integration_tests::common::mock_pair;

#[tokio::test]
async fn simple_read_returns_the_requested_payload() {
    let (session, mut device) = mock_pair(ConnectionState::Operational).await;
    let pool = Pool::new();
    pool.set_main_session(std::sync::Arc::new(session)).await;

    let server = tokio::spawn(async move {
        let raw = device.read_frame().await.expect("device reads request");
        let req = mash_conformance_core::wire::codec::decode_request(&raw).expect("decode");
        assert_eq!(req.message_id, 1);
        assert_eq!(req.endpoint_id, 0);
        assert_eq!(req.feature_id, 0x01);

        let payload = Value::Map(vec![
            (Value::Integer(1.into()), Value::Text("vendor".into())),
            (Value::Integer(2.into()), Value::Text("product".into())),
            (Value::Integer(12.into()), Value::Text("1.0".into())),
        ]);
        let resp = ResponseFrame { message_id: 1, status: StatusCode::SUCCESS, payload: Some(payload) };
        let bytes = encode_response(&resp).expect("encode");
        device.write_frame(&bytes).await.expect("device writes response");
    });

    let message_id = pool.next_message_id();
    let request = RequestFrame {
        message_id,
        operation: Operation::Read,
        endpoint_id: 0,
        feature_id: 0x01,
        payload: None,
    };
    let bytes = encode_request(&request).expect("encode request");
    let resp = pool.send_request(&bytes, message_id, None).await.expect("send_request");

    assert!(resp.status.is_success());
    let payload = resp.payload.expect("payload present");
    let map = payload.as_map().expect("map");
    let vendor = map.iter().find(|(k, _)| k.as_integer() == Some(1.into())).map(|(_, v)| v);
    assert_eq!(vendor.and_then(|v| v.as_text()), Some("vendor"));

    server.await.expect("server task");
}
