// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Frame codec: length-prefix + CBOR encode/decode of requests, responses,
//! notifications, and control messages.
//!
//! Top-level CBOR objects use small integer keys (spec.md §6). An explicit
//! `0: frameType` discriminator disambiguates Request/Response/Control at
//! the outer-map level without requiring the peeker to reason about which
//! other keys happen to be present — see DESIGN.md for why spec.md's wire
//! sketch needed this one concretization.

use std::collections::BTreeMap;

use ciborium::Value;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

pub const KEY_FRAME_TYPE: i128 = 0;
pub const KEY_MSG_ID: i128 = 1;
pub const KEY_OP_OR_STATUS: i128 = 2;
pub const KEY_ENDPOINT: i128 = 3;
pub const KEY_FEATURE: i128 = 4;
pub const KEY_PAYLOAD: i128 = 5;
pub const KEY_RESP_PAYLOAD: i128 = 3;
pub const KEY_CONTROL_KIND: i128 = 1;
pub const KEY_CONTROL_BODY: i128 = 2;

const FRAME_TYPE_REQUEST: i128 = 1;
const FRAME_TYPE_RESPONSE: i128 = 2;
const FRAME_TYPE_CONTROL: i128 = 3;

/// Maximum frame payload the framer will allocate for. Guards against a
/// corrupt or hostile length prefix forcing an unbounded allocation.
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

/// Wire operation codes (spec.md §6). Unsubscribe is not a distinct wire
/// value: it rides on `Subscribe`'s op code 4 and is told apart only by its
/// payload shape (an `UnsubscribePayload` carrying a subscriptionID rather
/// than an empty/absent Subscribe payload) — see `RequestPayload` below.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Read = 1,
    Write = 2,
    Invoke = 3,
    Subscribe = 4,
}

impl Operation {
    pub fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            1 => Self::Read,
            2 => Self::Write,
            3 => Self::Invoke,
            4 => Self::Subscribe,
            other => {
                return Err(HarnessError::protocol(format!(
                    "unknown operation code {other}"
                )));
            },
        })
    }
}

/// Status codes. 0 = Success; nonzero statuses carry stringifiable names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const SUCCESS: StatusCode = StatusCode(0);

    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "SUCCESS",
            1 => "INVALID_PARAMETER",
            2 => "NOT_FOUND",
            3 => "BUSY",
            4 => "UNSUPPORTED",
            _ => "UNKNOWN",
        }
    }
}

/// A request payload, keyed by the issuing operation.
#[derive(Debug, Clone)]
pub enum RequestPayload {
    Read { attribute_ids: Vec<u32> },
    Write { attributes: BTreeMap<u32, Value> },
    Invoke { command_id: u32, params: BTreeMap<u32, Value> },
    Subscribe,
    Unsubscribe { subscription_id: u32 },
}

#[derive(Debug, Clone)]
pub struct RequestFrame {
    pub message_id: u32,
    pub operation: Operation,
    pub endpoint_id: u8,
    pub feature_id: u8,
    pub payload: Option<RequestPayload>,
}

#[derive(Debug, Clone)]
pub struct ResponseFrame {
    pub message_id: u32,
    pub status: StatusCode,
    pub payload: Option<Value>,
}

impl ResponseFrame {
    /// A response with messageID = 0 MUST be treated as a notification
    /// regardless of content.
    pub fn is_notification(&self) -> bool {
        self.message_id == 0
    }
}

#[derive(Debug, Clone)]
pub struct NotificationFrame {
    pub subscription_id: u32,
    pub changes: BTreeMap<u32, Value>,
}

impl NotificationFrame {
    pub fn decode_from_response(resp: &ResponseFrame) -> Result<Self> {
        let payload = resp
            .payload
            .as_ref()
            .ok_or_else(|| HarnessError::protocol("notification missing payload"))?;
        let map = as_map(payload)?;
        let subscription_id = get_u32(map, 1)
            .ok_or_else(|| HarnessError::protocol("notification missing subscriptionID"))?;
        let changes_val = map
            .iter()
            .find(|(k, _)| matches_int_key(k, 2))
            .map(|(_, v)| v)
            .ok_or_else(|| HarnessError::protocol("notification missing changes"))?;
        let changes_map = as_map(changes_val)?;
        let mut changes = BTreeMap::new();
        for (k, v) in changes_map {
            if let Some(ik) = as_i128(k) {
                changes.insert(ik as u32, v.clone());
            }
        }
        Ok(Self { subscription_id, changes })
    }
}

#[derive(Debug, Clone)]
pub enum ControlMessage {
    Close,
    Other { kind: String, body: Option<Value> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Request,
    Response,
    Notification,
    Control,
}

pub(crate) fn matches_int_key(k: &Value, want: i128) -> bool {
    as_i128(k) == Some(want)
}

pub(crate) fn as_i128(v: &Value) -> Option<i128> {
    v.as_integer().map(i128::from)
}

pub(crate) fn as_map(v: &Value) -> Result<&Vec<(Value, Value)>> {
    v.as_map()
        .ok_or_else(|| HarnessError::protocol("expected a CBOR map"))
}

pub(crate) fn get_field<'a>(map: &'a [(Value, Value)], key: i128) -> Option<&'a Value> {
    map.iter().find(|(k, _)| matches_int_key(k, key)).map(|(_, v)| v)
}

pub(crate) fn get_u32(map: &[(Value, Value)], key: i128) -> Option<u32> {
    get_field(map, key).and_then(|v| as_i128(v)).map(|i| i as u32)
}

pub(crate) fn get_u8(map: &[(Value, Value)], key: i128) -> Option<u8> {
    get_field(map, key).and_then(|v| as_i128(v)).map(|i| i as u8)
}

pub fn encode_value(value: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out)
        .map_err(|e| HarnessError::protocol(format!("frame encode failed: {e}")))?;
    Ok(out)
}

/// Decode only the outer CBOR map far enough to classify the frame, without
/// fully decoding operation-specific payloads.
pub fn peek_message_type(bytes: &[u8]) -> Result<FrameKind> {
    let value: Value = ciborium::from_reader(bytes)
        .map_err(|e| HarnessError::protocol(format!("frame peek decode failed: {e}")))?;
    let map = as_map(&value)?;
    let frame_type = get_field(map, KEY_FRAME_TYPE)
        .and_then(as_i128)
        .ok_or_else(|| HarnessError::protocol("frame missing frameType discriminator"))?;

    match frame_type {
        FRAME_TYPE_REQUEST => Ok(FrameKind::Request),
        FRAME_TYPE_RESPONSE => {
            let msg_id = get_u32(map, KEY_MSG_ID).unwrap_or(0);
            if msg_id == 0 {
                Ok(FrameKind::Notification)
            } else {
                Ok(FrameKind::Response)
            }
        },
        FRAME_TYPE_CONTROL => Ok(FrameKind::Control),
        other => Err(HarnessError::protocol(format!("unknown frameType {other}"))),
    }
}

pub fn encode_request(req: &RequestFrame) -> Result<Vec<u8>> {
    let mut map: Vec<(Value, Value)> = vec![
        (Value::Integer((KEY_FRAME_TYPE as i64).into()), Value::Integer((FRAME_TYPE_REQUEST as i64).into())),
        (Value::Integer((KEY_MSG_ID as i64).into()), Value::Integer((req.message_id as i64).into())),
        (
            Value::Integer((KEY_OP_OR_STATUS as i64).into()),
            Value::Integer((req.operation as i64).into()),
        ),
        (
            Value::Integer((KEY_ENDPOINT as i64).into()),
            Value::Integer((req.endpoint_id as i64).into()),
        ),
        (
            Value::Integer((KEY_FEATURE as i64).into()),
            Value::Integer((req.feature_id as i64).into()),
        ),
    ];
    if let Some(payload) = &req.payload {
        map.push((Value::Integer((KEY_PAYLOAD as i64).into()), encode_request_payload(payload)));
    }
    encode_value(&Value::Map(map))
}

fn encode_request_payload(payload: &RequestPayload) -> Value {
    match payload {
        RequestPayload::Read { attribute_ids } => Value::Array(
            attribute_ids.iter().map(|id| Value::Integer((*id as i64).into())).collect(),
        ),
        RequestPayload::Write { attributes } => Value::Map(
            attributes
                .iter()
                .map(|(k, v)| (Value::Integer((*k as i64).into()), v.clone()))
                .collect(),
        ),
        RequestPayload::Invoke { command_id, params } => {
            let mut map = vec![(
                Value::Integer(1.into()),
                Value::Integer((*command_id as i64).into()),
            )];
            map.push((
                Value::Integer(2.into()),
                Value::Map(
                    params
                        .iter()
                        .map(|(k, v)| (Value::Integer((*k as i64).into()), v.clone()))
                        .collect(),
                ),
            ));
            Value::Map(map)
        },
        RequestPayload::Subscribe => Value::Map(vec![]),
        RequestPayload::Unsubscribe { subscription_id } => {
            Value::Map(vec![(
                Value::Integer(1.into()),
                Value::Integer((*subscription_id as i64).into()),
            )])
        },
    }
}

pub fn decode_response(bytes: &[u8]) -> Result<ResponseFrame> {
    let value: Value = ciborium::from_reader(bytes)
        .map_err(|e| HarnessError::protocol(format!("response decode failed: {e}")))?;
    let map = as_map(&value)?;
    let message_id = get_u32(map, KEY_MSG_ID)
        .ok_or_else(|| HarnessError::protocol("response missing messageID"))?;
    let status = get_u32(map, KEY_OP_OR_STATUS)
        .ok_or_else(|| HarnessError::protocol("response missing status"))?;
    let payload = get_field(map, KEY_RESP_PAYLOAD).cloned();
    Ok(ResponseFrame { message_id, status: StatusCode(status as u16), payload })
}

pub fn encode_response(resp: &ResponseFrame) -> Result<Vec<u8>> {
    let mut map: Vec<(Value, Value)> = vec![
        (Value::Integer((KEY_FRAME_TYPE as i64).into()), Value::Integer((FRAME_TYPE_RESPONSE as i64).into())),
        (
            Value::Integer((KEY_MSG_ID as i64).into()),
            Value::Integer((resp.message_id as i64).into()),
        ),
        (
            Value::Integer((KEY_OP_OR_STATUS as i64).into()),
            Value::Integer((resp.status.0 as i64).into()),
        ),
    ];
    if let Some(payload) = &resp.payload {
        map.push((Value::Integer((KEY_RESP_PAYLOAD as i64).into()), payload.clone()));
    }
    encode_value(&Value::Map(map))
}

pub fn encode_control(msg: &ControlMessage) -> Result<Vec<u8>> {
    let map = match msg {
        ControlMessage::Close => vec![
            (Value::Integer((KEY_FRAME_TYPE as i64).into()), Value::Integer((FRAME_TYPE_CONTROL as i64).into())),
            (
                Value::Integer((KEY_CONTROL_KIND as i64).into()),
                Value::Text("ControlClose".to_string()),
            ),
        ],
        ControlMessage::Other { kind, body } => {
            let mut map = vec![
                (Value::Integer((KEY_FRAME_TYPE as i64).into()), Value::Integer((FRAME_TYPE_CONTROL as i64).into())),
                (Value::Integer((KEY_CONTROL_KIND as i64).into()), Value::Text(kind.clone())),
            ];
            if let Some(body) = body {
                map.push((Value::Integer((KEY_CONTROL_BODY as i64).into()), body.clone()));
            }
            map
        },
    };
    encode_value(&Value::Map(map))
}

pub fn decode_control(bytes: &[u8]) -> Result<ControlMessage> {
    let value: Value = ciborium::from_reader(bytes)
        .map_err(|e| HarnessError::protocol(format!("control decode failed: {e}")))?;
    let map = as_map(&value)?;
    let kind = get_field(map, KEY_CONTROL_KIND)
        .and_then(|v| v.as_text())
        .ok_or_else(|| HarnessError::protocol("control message missing kind"))?;
    Ok(match kind {
        "ControlClose" => ControlMessage::Close,
        other => ControlMessage::Other {
            kind: other.to_string(),
            body: get_field(map, KEY_CONTROL_BODY).cloned(),
        },
    })
}

pub fn decode_request(bytes: &[u8]) -> Result<RequestFrame> {
    let value: Value = ciborium::from_reader(bytes)
        .map_err(|e| HarnessError::protocol(format!("request decode failed: {e}")))?;
    let map = as_map(&value)?;
    let message_id = get_u32(map, KEY_MSG_ID)
        .ok_or_else(|| HarnessError::protocol("request missing messageID"))?;
    let op_raw = get_u8(map, KEY_OP_OR_STATUS)
        .ok_or_else(|| HarnessError::protocol("request missing operation"))?;
    let operation = Operation::from_u8(op_raw)?;
    let endpoint_id = get_u8(map, KEY_ENDPOINT).unwrap_or(0);
    let feature_id = get_u8(map, KEY_FEATURE).unwrap_or(0);
    let payload = get_field(map, KEY_PAYLOAD)
        .map(|v| decode_request_payload(operation, v))
        .transpose()?;
    Ok(RequestFrame { message_id, operation, endpoint_id, feature_id, payload })
}

fn decode_request_payload(op: Operation, v: &Value) -> Result<RequestPayload> {
    Ok(match op {
        Operation::Read => {
            let arr = v
                .as_array()
                .ok_or_else(|| HarnessError::protocol("Read payload must be an array"))?;
            let attribute_ids =
                arr.iter().filter_map(as_i128).map(|i| i as u32).collect();
            RequestPayload::Read { attribute_ids }
        },
        Operation::Write => {
            let map = as_map(v)?;
            let mut attributes = BTreeMap::new();
            for (k, val) in map {
                if let Some(ik) = as_i128(k) {
                    attributes.insert(ik as u32, val.clone());
                }
            }
            RequestPayload::Write { attributes }
        },
        Operation::Invoke => {
            let map = as_map(v)?;
            let command_id = get_u32(map, 1)
                .ok_or_else(|| HarnessError::protocol("Invoke payload missing commandID"))?;
            let mut params = BTreeMap::new();
            if let Some(pv) = get_field(map, 2) {
                for (k, val) in as_map(pv)? {
                    if let Some(ik) = as_i128(k) {
                        params.insert(ik as u32, val.clone());
                    }
                }
            }
            RequestPayload::Invoke { command_id, params }
        },
        Operation::Subscribe => {
            let map = as_map(v)?;
            match get_u32(map, 1) {
                Some(subscription_id) => RequestPayload::Unsubscribe { subscription_id },
                None => RequestPayload::Subscribe,
            }
        },
    })
}
