// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Decoded shape of the endpoint-0 `DeviceInfo` (feature 0x01) read that
//! seeds auto-PICS discovery (spec.md §4.5).

use ciborium::Value;

use crate::{
    error::{HarnessError, Result},
    wire::codec::{as_i128, as_map, get_field, get_u8, get_u32},
};

pub const FEATURE_DEVICE_INFO: u8 = 0x01;

#[derive(Debug, Clone)]
pub struct Endpoint {
    pub id: u8,
    pub endpoint_type: u8,
    pub label: String,
    pub feature_ids: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct UseCase {
    pub endpoint_id: u8,
    pub id: u8,
    pub major: u8,
    pub minor: u8,
    pub scenario_bitmap: u32,
}

#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub spec_version: String,
    pub vendor: String,
    pub product: String,
    pub endpoints: Vec<Endpoint>,
    pub use_cases: Vec<UseCase>,
}

fn get_text(map: &[(Value, Value)], key: i128) -> Option<String> {
    get_field(map, key).and_then(|v| v.as_text()).map(str::to_string)
}

fn decode_endpoint(v: &Value) -> Result<Endpoint> {
    let map = as_map(v)?;
    let id = get_u8(map, 1).ok_or_else(|| HarnessError::protocol("endpoint missing id"))?;
    let endpoint_type =
        get_u8(map, 2).ok_or_else(|| HarnessError::protocol("endpoint missing type"))?;
    let label = get_text(map, 3).unwrap_or_default();
    let feature_ids = get_field(map, 4)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(as_i128).map(|i| i as u8).collect())
        .unwrap_or_default();
    Ok(Endpoint { id, endpoint_type, label, feature_ids })
}

fn decode_use_case(v: &Value) -> Result<UseCase> {
    let map = as_map(v)?;
    Ok(UseCase {
        endpoint_id: get_u8(map, 1)
            .ok_or_else(|| HarnessError::protocol("use case missing endpointID"))?,
        id: get_u8(map, 2).ok_or_else(|| HarnessError::protocol("use case missing id"))?,
        major: get_u8(map, 3).unwrap_or(0),
        minor: get_u8(map, 4).unwrap_or(0),
        scenario_bitmap: get_u32(map, 5).unwrap_or(0),
    })
}

/// Decodes the response payload of a Read on endpoint 0, feature
/// `DeviceInfo` (spec.md §4.5).
pub fn decode_device_info(payload: &Value) -> Result<DeviceInfo> {
    let map = as_map(payload)?;
    let spec_version = get_text(map, 12).unwrap_or_default();
    let vendor = get_text(map, 1).unwrap_or_default();
    let product = get_text(map, 2).unwrap_or_default();
    let endpoints = get_field(map, 3)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().map(decode_endpoint).collect::<Result<Vec<_>>>())
        .transpose()?
        .unwrap_or_default();
    let use_cases = get_field(map, 4)
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().map(decode_use_case).collect::<Result<Vec<_>>>())
        .transpose()?
        .unwrap_or_default();
    Ok(DeviceInfo { spec_version, vendor, product, endpoints, use_cases })
}
