// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use ciborium::Value;
use mash_conformance_core::{
    client::pool::Pool,
    session::ConnectionState,
    subscription::{NotificationKind, NotificationOutcome, SubscriptionRegistry},
    wire::codec::{
        Operation, RequestFrame, ResponseFrame, StatusCode, encode_request, encode_response,
        encode_value,
    },
};

use crate::integration_tests::common::mock_pair;

fn notification_frame_bytes(subscription_id: u32, changes: &[(u32, i128)]) -> Vec<u8> {
    let changes_map = changes
        .iter()
        .map(|(k, v)| (Value::Integer((*k as i64).into()), Value::Integer((*v as i64).into())))
        .collect();
    let map = vec![
        (Value::Integer(0.into()), Value::Integer(2.into())),
        (Value::Integer(1.into()), Value::Integer(0.into())),
        (
            Value::Integer(3.into()),
            Value::Map(vec![
                (Value::Integer(1.into()), Value::Integer((subscription_id as i64).into())),
                (Value::Integer(2.into()), Value::Map(changes_map)),
            ]),
        ),
    ];
    encode_value(&Value::Map(map)).expect("encode")
}

#[tokio::test]
async fn interleaved_notification_is_quarantined_then_classified_as_delta() {
    let (session, mut device) = mock_pair(ConnectionState::Operational).await;
    let pool = Pool::new();
    pool.set_main_session(std::sync::Arc::new(session)).await;

    // Wire order per the scenario: a notification arrives first, then the
    // response the caller is actually waiting on.
    let server = tokio::spawn(async move {
        let notification = notification_frame_bytes(5, &[(0x10, 42)]);
        device.write_frame(&notification).await.expect("write notification");

        let raw = device.read_frame().await.expect("device reads request");
        let req = mash_conformance_core::wire::codec::decode_request(&raw).expect("decode");
        assert_eq!(req.message_id, 7);

        let resp = ResponseFrame { message_id: 7, status: StatusCode::SUCCESS, payload: None };
        let bytes = encode_response(&resp).expect("encode");
        device.write_frame(&bytes).await.expect("write response");
    });

    let request = RequestFrame {
        message_id: 7,
        operation: Operation::Read,
        endpoint_id: 0,
        feature_id: 0x01,
        payload: None,
    };
    let bytes = encode_request(&request).expect("encode request");
    let resp = pool.send_request(&bytes, 7, None).await.expect("send_request");
    assert_eq!(resp.message_id, 7);
    assert_eq!(pool.pool_notification_count().await, 1);

    // A subscription must exist with a baseline before classification makes
    // sense; register one with more attributes than the queued notification
    // carries, so the queued frame reads as a delta, not a heartbeat.
    let registry = SubscriptionRegistry::new();
    let priming_bytes = notification_frame_bytes(5, &[(0x10, 0), (0x11, 0)]);
    let priming_resp = mash_conformance_core::wire::codec::decode_response(&priming_bytes)
        .expect("decode priming");
    let subscription_id = registry.register_from_response(&priming_resp).expect("register");
    registry.classify_from_queue(subscription_id, Vec::new()).await.expect("consume priming");

    let queued = pool.pop_pool_notification().await.expect("queued notification");
    let outcome = registry.classify_from_queue(subscription_id, queued).await.expect("classify");
    match outcome {
        NotificationOutcome::Decoded(n) => {
            assert_eq!(n.kind, NotificationKind::Delta);
            assert_eq!(n.changes.get(&0x10), Some(&Value::Integer(42.into())));
        },
        NotificationOutcome::Raw(_) => panic!("expected a decoded notification"),
    }

    server.await.expect("server task");
}
