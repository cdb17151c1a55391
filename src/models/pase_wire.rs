// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! PASE handshake and commissioning-error wire messages (spec.md §4.3,
//! §6). These are CBOR small-integer-keyed maps, framed by the same
//! length-prefixed [`crate::wire::framer::Framer`] as request/response
//! traffic, but carry their own `kind` discriminator rather than the
//! request/response frameType scheme since they only ever appear during
//! the commissioning-mode phase, before a session has any zone identity.

use ciborium::Value;

use crate::{
    error::{HarnessError, PaseErrorCode, Result},
    wire::codec::{as_i128, as_map, encode_value, get_field, get_u32},
};

const KIND_PASE_REQUEST: i128 = 1;
const KIND_PASE_RESPONSE: i128 = 2;
const KIND_PASE_CONFIRM: i128 = 3;
const KIND_PASE_VERIFY: i128 = 4;
const KIND_COMMISSIONING_ERROR: i128 = 5;

const KEY_KIND: i128 = 0;

#[derive(Debug, Clone)]
pub struct PaseRequest {
    pub public_value: Vec<u8>,
    pub client_identity: String,
}

#[derive(Debug, Clone)]
pub struct PaseResponse {
    pub public_value: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct PaseConfirm {
    pub confirm: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct PaseVerify {
    pub verify: Vec<u8>,
}

/// Wire form of `CommissioningError{errorCode, retryAfter, ...}`
/// (spec.md §6).
#[derive(Debug, Clone)]
pub struct CommissioningError {
    pub code: PaseErrorCode,
    pub retry_after: Option<u32>,
}

impl CommissioningError {
    pub fn into_harness_error(self) -> HarnessError {
        HarnessError::device(self.code, self.retry_after)
    }
}

#[derive(Debug, Clone)]
pub enum PaseMessage {
    Request(PaseRequest),
    Response(PaseResponse),
    Confirm(PaseConfirm),
    Verify(PaseVerify),
    Error(CommissioningError),
}

fn get_bytes(map: &[(Value, Value)], key: i128) -> Option<Vec<u8>> {
    get_field(map, key).and_then(|v| v.as_bytes()).cloned()
}

fn get_text(map: &[(Value, Value)], key: i128) -> Option<String> {
    get_field(map, key).and_then(|v| v.as_text()).map(str::to_string)
}

pub fn encode_pase_request(req: &PaseRequest) -> Result<Vec<u8>> {
    encode_value(&Value::Map(vec![
        (Value::Integer((KEY_KIND as i64).into()), Value::Integer((KIND_PASE_REQUEST as i64).into())),
        (Value::Integer(1.into()), Value::Bytes(req.public_value.clone())),
        (Value::Integer(2.into()), Value::Text(req.client_identity.clone())),
    ]))
}

pub fn encode_pase_confirm(confirm: &PaseConfirm) -> Result<Vec<u8>> {
    encode_value(&Value::Map(vec![
        (Value::Integer((KEY_KIND as i64).into()), Value::Integer((KIND_PASE_CONFIRM as i64).into())),
        (Value::Integer(1.into()), Value::Bytes(confirm.confirm.clone())),
    ]))
}

/// Decodes any of the five PASE/commissioning message kinds, classifying
/// by the `kind` discriminator.
pub fn decode_pase_message(bytes: &[u8]) -> Result<PaseMessage> {
    let value: Value = ciborium::from_reader(bytes)
        .map_err(|e| HarnessError::protocol(format!("PASE message decode failed: {e}")))?;
    let map = as_map(&value)?;
    let kind = get_field(map, KEY_KIND)
        .and_then(as_i128)
        .ok_or_else(|| HarnessError::protocol("PASE message missing kind"))?;

    Ok(match kind {
        KIND_PASE_REQUEST => PaseMessage::Request(PaseRequest {
            public_value: get_bytes(map, 1)
                .ok_or_else(|| HarnessError::protocol("PASERequest missing publicValue"))?,
            client_identity: get_text(map, 2).unwrap_or_default(),
        }),
        KIND_PASE_RESPONSE => PaseMessage::Response(PaseResponse {
            public_value: get_bytes(map, 1)
                .ok_or_else(|| HarnessError::protocol("PASEResponse missing publicValue"))?,
        }),
        KIND_PASE_CONFIRM => PaseMessage::Confirm(PaseConfirm {
            confirm: get_bytes(map, 1)
                .ok_or_else(|| HarnessError::protocol("PASEConfirm missing confirm"))?,
        }),
        KIND_PASE_VERIFY => PaseMessage::Verify(PaseVerify {
            verify: get_bytes(map, 1)
                .ok_or_else(|| HarnessError::protocol("PASEVerify missing verify"))?,
        }),
        KIND_COMMISSIONING_ERROR => PaseMessage::Error(CommissioningError {
            code: get_u32(map, 1).unwrap_or(0).into(),
            retry_after: get_u32(map, 2),
        }),
        other => {
            return Err(HarnessError::protocol(format!("unknown PASE message kind {other}")));
        },
    })
}
