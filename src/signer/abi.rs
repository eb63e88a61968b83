// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JSON → Solidity value coercion.
//!
//! Callers submit method arguments as plain JSON; this module converts them
//! to [`DynSolValue`]s matching the declared ABI parameter types:
//!
//! - numeric types accept decimal strings, `0x`-prefixed hex strings, or
//!   JSON numbers (lossy through i64)
//! - tuples accept objects keyed by the component names, recursively
//! - `bytesN` accepts hex, right-padded or truncated to N bytes
//! - `bytes` and `address` accept hex
//! - arrays coerce element-wise

use alloy::dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy::json_abi::Param;
use alloy::primitives::{Address, B256, I256, U256};

use crate::error::ApiError;

/// Coerce a JSON argument to the Solidity type declared by `param`.
pub fn coerce_param(param: &Param, raw: &serde_json::Value) -> Result<DynSolValue, ApiError> {
    let ty = param
        .resolve()
        .map_err(|e| ApiError::bad_request(format!("invalid abi parameter type: {e}")))?;
    coerce_value(&ty, param, raw)
}

fn coerce_value(
    ty: &DynSolType,
    param: &Param,
    raw: &serde_json::Value,
) -> Result<DynSolValue, ApiError> {
    match ty {
        DynSolType::Uint(bits) => Ok(DynSolValue::Uint(parse_uint(raw)?, *bits)),
        DynSolType::Int(bits) => Ok(DynSolValue::Int(parse_int(raw)?, *bits)),
        DynSolType::Address => {
            let s = expect_str(raw)?;
            parse_address(s)
                .map(DynSolValue::Address)
                .ok_or_else(|| ApiError::bad_request(format!("invalid address argument: {s}")))
        }
        DynSolType::FixedBytes(size) => {
            let bytes = decode_hex(expect_str(raw)?)?;
            let mut word = B256::ZERO;
            let n = bytes.len().min(*size);
            word[..n].copy_from_slice(&bytes[..n]);
            Ok(DynSolValue::FixedBytes(word, *size))
        }
        DynSolType::Bytes => Ok(DynSolValue::Bytes(decode_hex(expect_str(raw)?)?)),
        DynSolType::Bool => raw
            .as_bool()
            .map(DynSolValue::Bool)
            .ok_or_else(|| ApiError::bad_request("expected boolean argument")),
        DynSolType::String => Ok(DynSolValue::String(expect_str(raw)?.to_string())),
        DynSolType::Tuple(elems) => {
            let object = raw
                .as_object()
                .ok_or_else(|| ApiError::bad_request("expected object for tuple argument"))?;
            if elems.len() != param.components.len() {
                return Err(ApiError::bad_request("malformed tuple parameter"));
            }
            let mut fields = Vec::with_capacity(elems.len());
            for (elem_ty, component) in elems.iter().zip(&param.components) {
                let field = object.get(&component.name).ok_or_else(|| {
                    ApiError::bad_request(format!("missing tuple field: {}", component.name))
                })?;
                fields.push(coerce_value(elem_ty, component, field)?);
            }
            Ok(DynSolValue::Tuple(fields))
        }
        DynSolType::Array(inner) => Ok(DynSolValue::Array(coerce_elements(inner, param, raw)?)),
        DynSolType::FixedArray(inner, size) => {
            let elements = coerce_elements(inner, param, raw)?;
            if elements.len() != *size {
                return Err(ApiError::bad_request(format!(
                    "expected {size} array elements, got {}",
                    elements.len()
                )));
            }
            Ok(DynSolValue::FixedArray(elements))
        }
        other => Err(ApiError::bad_request(format!(
            "unsupported abi parameter type: {other}"
        ))),
    }
}

fn coerce_elements(
    inner: &DynSolType,
    param: &Param,
    raw: &serde_json::Value,
) -> Result<Vec<DynSolValue>, ApiError> {
    let items = raw
        .as_array()
        .ok_or_else(|| ApiError::bad_request("expected array argument"))?;
    items
        .iter()
        .map(|item| coerce_value(inner, param, item))
        .collect()
}

fn expect_str(raw: &serde_json::Value) -> Result<&str, ApiError> {
    raw.as_str()
        .ok_or_else(|| ApiError::bad_request("expected string argument"))
}

/// Parse an unsigned numeric argument.
fn parse_uint(raw: &serde_json::Value) -> Result<U256, ApiError> {
    match raw {
        serde_json::Value::String(s) => {
            if let Some(hex) = s.strip_prefix("0x") {
                U256::from_str_radix(hex, 16)
            } else {
                U256::from_str_radix(s, 10)
            }
            .map_err(|_| ApiError::bad_request(format!("invalid numeric argument: {s}")))
        }
        serde_json::Value::Number(n) => {
            // Lossy: JSON numbers funnel through i64, matching longstanding
            // client behavior.
            let v = n
                .as_i64()
                .filter(|v| *v >= 0)
                .ok_or_else(|| ApiError::bad_request(format!("invalid numeric argument: {n}")))?;
            Ok(U256::from(v as u64))
        }
        other => Err(ApiError::bad_request(format!(
            "invalid numeric argument: {other}"
        ))),
    }
}

/// Parse a signed numeric argument.
fn parse_int(raw: &serde_json::Value) -> Result<I256, ApiError> {
    match raw {
        serde_json::Value::String(s) => {
            if let Some(hex) = s.strip_prefix("0x") {
                U256::from_str_radix(hex, 16)
                    .map(I256::from_raw)
                    .map_err(|_| ApiError::bad_request(format!("invalid numeric argument: {s}")))
            } else {
                I256::from_dec_str(s)
                    .map_err(|_| ApiError::bad_request(format!("invalid numeric argument: {s}")))
            }
        }
        serde_json::Value::Number(n) => {
            let v = n
                .as_i64()
                .ok_or_else(|| ApiError::bad_request(format!("invalid numeric argument: {n}")))?;
            I256::try_from(v)
                .map_err(|_| ApiError::bad_request(format!("invalid numeric argument: {n}")))
        }
        other => Err(ApiError::bad_request(format!(
            "invalid numeric argument: {other}"
        ))),
    }
}

/// Parse an address from hex, with or without the `0x` prefix.
pub fn parse_address(s: &str) -> Option<Address> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    let bytes = alloy::hex::decode(stripped).ok()?;
    (bytes.len() == 20).then(|| Address::from_slice(&bytes))
}

/// Decode hex with or without the `0x` prefix.
pub fn decode_hex(s: &str) -> Result<Vec<u8>, ApiError> {
    let stripped = s.strip_prefix("0x").unwrap_or(s);
    alloy::hex::decode(stripped)
        .map_err(|_| ApiError::bad_request(format!("invalid hex argument: {s}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn param(ty: &str) -> Param {
        serde_json::from_value(json!({"name": "x", "type": ty})).unwrap()
    }

    #[test]
    fn uint_accepts_all_three_encodings() {
        let p = param("uint256");
        for (raw, expected) in [
            (json!("0x1"), U256::from(1u64)),
            (json!("255"), U256::from(255u64)),
            (json!(42), U256::from(42u64)),
        ] {
            match coerce_param(&p, &raw).unwrap() {
                DynSolValue::Uint(v, 256) => assert_eq!(v, expected),
                other => panic!("unexpected value: {other:?}"),
            }
        }
    }

    #[test]
    fn uint_rejects_negative_and_garbage() {
        let p = param("uint256");
        assert!(coerce_param(&p, &json!(-1)).is_err());
        assert!(coerce_param(&p, &json!("not-a-number")).is_err());
        assert!(coerce_param(&p, &json!(null)).is_err());
    }

    #[test]
    fn int_accepts_negative_numbers() {
        let p = param("int256");
        match coerce_param(&p, &json!("-5")).unwrap() {
            DynSolValue::Int(v, 256) => assert_eq!(v, I256::try_from(-5i64).unwrap()),
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn fixed_bytes_right_pads_and_truncates() {
        let p = param("bytes4");
        match coerce_param(&p, &json!("0xaabb")).unwrap() {
            DynSolValue::FixedBytes(word, 4) => {
                assert_eq!(&word[..4], &[0xaa, 0xbb, 0x00, 0x00]);
            }
            other => panic!("unexpected value: {other:?}"),
        }

        match coerce_param(&p, &json!("0xaabbccddeeff")).unwrap() {
            DynSolValue::FixedBytes(word, 4) => {
                assert_eq!(&word[..4], &[0xaa, 0xbb, 0xcc, 0xdd]);
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn bytes_and_address_decode_hex() {
        let p = param("bytes");
        match coerce_param(&p, &json!("0x010203")).unwrap() {
            DynSolValue::Bytes(b) => assert_eq!(b, vec![1, 2, 3]),
            other => panic!("unexpected value: {other:?}"),
        }

        let p = param("address");
        let addr = "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf";
        match coerce_param(&p, &json!(addr)).unwrap() {
            DynSolValue::Address(a) => assert_eq!(a, addr.parse::<Address>().unwrap()),
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn tuple_coerces_by_component_name() {
        let p: Param = serde_json::from_value(json!({
            "name": "order",
            "type": "tuple",
            "components": [
                {"name": "amount", "type": "uint256"},
                {"name": "recipient", "type": "address"},
            ]
        }))
        .unwrap();

        let raw = json!({
            "amount": "0x10",
            "recipient": "0x7E5F4552091A69125d5DfCb7b8C2659029395Bdf",
        });
        match coerce_param(&p, &raw).unwrap() {
            DynSolValue::Tuple(fields) => {
                assert_eq!(fields.len(), 2);
                assert!(matches!(fields[0], DynSolValue::Uint(v, 256) if v == U256::from(16u64)));
            }
            other => panic!("unexpected value: {other:?}"),
        }

        let missing = json!({"amount": "1"});
        assert!(coerce_param(&p, &missing).is_err());
    }

    #[test]
    fn array_coerces_elementwise() {
        let p = param("uint256[]");
        match coerce_param(&p, &json!(["1", "2", "3"])).unwrap() {
            DynSolValue::Array(items) => assert_eq!(items.len(), 3),
            other => panic!("unexpected value: {other:?}"),
        }
        assert!(coerce_param(&p, &json!("1")).is_err());
    }
}
