// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use mash_conformance_core::{
    client::pool::Pool,
    session::ConnectionState,
    wire::codec::{Operation, RequestFrame, ResponseFrame, StatusCode, encode_request, encode_response},
};

use crate::integration_tests::common::mock_pair;

#[tokio::test]
async fn stale_response_is_discarded_and_the_matching_one_is_returned() {
    let (session, mut device) = mock_pair(ConnectionState::Operational).await;
    let pool = Pool::new();
    pool.set_main_session(std::sync::Arc::new(session)).await;

    let server = tokio::spawn(async move {
        let _req = device.read_frame().await.expect("device reads request");

        let stale = encode_response(&ResponseFrame {
            message_id: 3,
            status: StatusCode::SUCCESS,
            payload: None,
        })
        .expect("encode stale");
        device.write_frame(&stale).await.expect("write stale");

        let matching = encode_response(&ResponseFrame {
            message_id: 9,
            status: StatusCode::SUCCESS,
            payload: None,
        })
        .expect("encode matching");
        device.write_frame(&matching).await.expect("write matching");
    });

    let request = RequestFrame {
        message_id: 9,
        operation: Operation::Read,
        endpoint_id: 0,
        feature_id: 0x01,
        payload: None,
    };
    let bytes = encode_request(&request).expect("encode request");
    let resp = pool.send_request(&bytes, 9, None).await.expect("send_request");
    assert_eq!(resp.message_id, 9);

    server.await.expect("server task");
}
