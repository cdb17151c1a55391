// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use ciborium::Value;
use mash_conformance_core::{
    client::pool::Pool,
    pics::{discovery::discover, map::PicsValue},
    session::ConnectionState,
    wire::codec::{ResponseFrame, StatusCode, encode_response},
};

use crate::integration_tests::common::mock_pair;

fn endpoint(id: u8, endpoint_type: u8, label: &str, feature_ids: &[u8]) -> Value {
    Value::Map(vec![
        (Value::Integer(1.into()), Value::Integer((id as i64).into())),
        (Value::Integer(2.into()), Value::Integer((endpoint_type as i64).into())),
        (Value::Integer(3.into()), Value::Text(label.into())),
        (
            Value::Integer(4.into()),
            Value::Array(feature_ids.iter().map(|&f| Value::Integer((f as i64).into())).collect()),
        ),
    ])
}

fn globals_payload(attribute_ids: &[u32], command_ids: &[u32], feature_map: u32) -> Value {
    Value::Map(vec![
        (
            Value::Integer(0xFFFBi64.into()),
            Value::Array(attribute_ids.iter().map(|&a| Value::Integer((a as i64).into())).collect()),
        ),
        (
            Value::Integer(0xFFF9i64.into()),
            Value::Array(command_ids.iter().map(|&c| Value::Integer((c as i64).into())).collect()),
        ),
        (Value::Integer(0xFFFCi64.into()), Value::Integer((feature_map as i64).into())),
    ])
}

#[tokio::test]
async fn discovery_emits_endpoint_and_feature_pics_keys_with_zone_max_three() {
    let (session, mut device) = mock_pair(ConnectionState::Operational).await;
    let pool = Pool::new();
    pool.set_main_session(std::sync::Arc::new(session)).await;

    let server = tokio::spawn(async move {
        // DeviceInfo read.
        let raw = device.read_frame().await.expect("read DeviceInfo request");
        let req = mash_conformance_core::wire::codec::decode_request(&raw).expect("decode");
        assert_eq!(req.feature_id, 0x01);

        let device_info = Value::Map(vec![
            (Value::Integer(1.into()), Value::Text("Acme".into())),
            (Value::Integer(2.into()), Value::Text("Widget".into())),
            (Value::Integer(12.into()), Value::Text("2.1".into())),
            (
                Value::Integer(3.into()),
                Value::Array(vec![
                    endpoint(0, 0x00, "root", &[0x01, 0x02]),
                    endpoint(1, 0x05, "charger", &[0x03]),
                ]),
            ),
            (Value::Integer(4.into()), Value::Array(vec![])),
        ]);
        let resp = ResponseFrame {
            message_id: req.message_id,
            status: StatusCode::SUCCESS,
            payload: Some(device_info),
        };
        device.write_frame(&encode_response(&resp).expect("encode")).await.expect("write");

        // Globals reads: ep0/feat0x01, ep0/feat0x02 (TestControl), ep1/feat0x03.
        for _ in 0..3 {
            let raw = device.read_frame().await.expect("read globals request");
            let req = mash_conformance_core::wire::codec::decode_request(&raw).expect("decode");
            let payload = globals_payload(&[0x01], &[0x02], 0b1);
            let resp = ResponseFrame {
                message_id: req.message_id,
                status: StatusCode::SUCCESS,
                payload: Some(payload),
            };
            device.write_frame(&encode_response(&resp).expect("encode")).await.expect("write");
        }
    });

    let report = discover(&pool).await.expect("discover");
    assert_eq!(report.device_info.vendor, "Acme");

    assert_eq!(report.pics.get("MASH.S.ZONE.MAX"), Some(&PicsValue::Int(3)));
    assert_eq!(
        report.pics.get("MASH.S.E00"),
        Some(&PicsValue::Str("DEVICE_ROOT".to_string()))
    );
    assert_eq!(
        report.pics.get("MASH.S.E01"),
        Some(&PicsValue::Str("EV_CHARGER".to_string()))
    );
    assert_eq!(report.pics.get("MASH.S.E01.ELEC"), Some(&PicsValue::Bool(true)));
    assert_eq!(report.pics.get("MASH.S.ELEC"), Some(&PicsValue::Bool(true)));
    assert_eq!(report.pics.get("MASH.S.E00.TESTCONTROL.A01"), Some(&PicsValue::Bool(true)));
    assert_eq!(report.pics.get("MASH.S.E00.TESTCONTROL.C02.Rsp"), Some(&PicsValue::Bool(true)));
    assert_eq!(report.pics.get("MASH.S.E00.TESTCONTROL.F00"), Some(&PicsValue::Bool(true)));

    server.await.expect("server task");
}
