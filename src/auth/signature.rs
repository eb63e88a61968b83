// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Vault signature wire codec.
//!
//! A signature is three dot-separated, lowercase, unpadded base32 fields:
//!
//! ```text
//! base32lc(nonce) . base32lc(varint(unix_micros)) . base32lc(digest)
//! ```
//!
//! - `nonce` - 32 random bytes, fresh per signature
//! - `timestamp` - signed (zigzag) varint of microseconds since the Unix
//!   epoch, carried in a fixed 8-byte buffer
//! - `digest` - SHA-256 over `body || nonce || timestamp_bytes || key_bytes`
//!
//! Decoding is case-insensitive and tolerates trailing `=` padding emitted
//! by legacy clients.

use chrono::{DateTime, Duration, Utc};
use data_encoding::BASE32_NOPAD;

use super::error::AuthError;

/// Nonce length in bytes.
pub const NONCE_LEN: usize = 32;

/// Digest length in bytes (SHA-256).
pub const DIGEST_LEN: usize = 32;

/// Fixed timestamp buffer length in bytes.
pub const TIMESTAMP_LEN: usize = 8;

/// Permitted clock skew on either side of the verifier clock.
pub fn max_clock_skew() -> Duration {
    Duration::minutes(2)
}

/// A parsed (or freshly built) vault signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultSignature {
    /// Per-signature random nonce.
    pub nonce: [u8; NONCE_LEN],
    /// Signing instant, microsecond precision.
    pub timestamp: DateTime<Utc>,
    /// SHA-256 digest over the signed tuple.
    pub digest: [u8; DIGEST_LEN],
}

impl VaultSignature {
    /// Parse the dotted base32 triplet.
    pub fn parse(s: &str) -> Result<Self, AuthError> {
        let components: Vec<&str> = s.split('.').collect();
        if components.len() != 3 {
            return Err(AuthError::MalformedSignature(format!(
                "expected 3 components, got {}",
                components.len()
            )));
        }

        let nonce_bytes = decode_base32(components[0])?;
        let ts_bytes = decode_base32(components[1])?;
        let digest_bytes = decode_base32(components[2])?;

        let nonce: [u8; NONCE_LEN] = nonce_bytes
            .try_into()
            .map_err(|_| AuthError::MalformedSignature("bad nonce length".to_string()))?;
        let ts_buf: [u8; TIMESTAMP_LEN] = ts_bytes
            .try_into()
            .map_err(|_| AuthError::MalformedSignature("bad timestamp length".to_string()))?;
        let digest: [u8; DIGEST_LEN] = digest_bytes
            .try_into()
            .map_err(|_| AuthError::MalformedSignature("bad digest length".to_string()))?;

        let (micros, consumed) = read_varint(&ts_buf)
            .ok_or_else(|| AuthError::MalformedSignature("bad timestamp varint".to_string()))?;
        if consumed != TIMESTAMP_LEN {
            return Err(AuthError::MalformedSignature(
                "bad timestamp varint".to_string(),
            ));
        }
        let timestamp = DateTime::from_timestamp_micros(micros)
            .ok_or_else(|| AuthError::MalformedSignature("timestamp out of range".to_string()))?;

        Ok(Self {
            nonce,
            timestamp,
            digest,
        })
    }

    /// Encode as the dotted base32 triplet, lowercase and unpadded.
    pub fn encode(&self) -> String {
        format!(
            "{}.{}.{}",
            encode_base32(&self.nonce),
            encode_base32(&self.timestamp_bytes()),
            encode_base32(&self.digest)
        )
    }

    /// The fixed 8-byte varint buffer carrying the timestamp, as hashed into
    /// the digest tuple.
    pub fn timestamp_bytes(&self) -> [u8; TIMESTAMP_LEN] {
        put_varint(self.timestamp.timestamp_micros())
    }

    /// Enforce the replay window around the verifier clock.
    pub fn check_window(&self, now: DateTime<Utc>) -> Result<(), AuthError> {
        if self.timestamp < now - max_clock_skew() {
            Err(AuthError::Expired)
        } else if self.timestamp > now + max_clock_skew() {
            Err(AuthError::NotYetValid)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Display for VaultSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

/// Lowercase unpadded base32 encoding.
pub fn encode_base32(data: &[u8]) -> String {
    BASE32_NOPAD.encode(data).to_ascii_lowercase()
}

/// Base32 decoding accepting either case and tolerating trailing padding.
pub fn decode_base32(s: &str) -> Result<Vec<u8>, AuthError> {
    let normalized = s.trim_end_matches('=').to_ascii_uppercase();
    BASE32_NOPAD
        .decode(normalized.as_bytes())
        .map_err(|e| AuthError::MalformedSignature(e.to_string()))
}

/// Write a signed value as a zigzag varint into a fixed 8-byte buffer.
///
/// Unused trailing bytes stay zero. Microsecond timestamps for any
/// realistic wall clock occupy exactly eight bytes.
pub fn put_varint(v: i64) -> [u8; TIMESTAMP_LEN] {
    let mut buf = [0u8; TIMESTAMP_LEN];
    let mut ux = ((v << 1) ^ (v >> 63)) as u64;
    let mut i = 0;
    while ux >= 0x80 && i < TIMESTAMP_LEN - 1 {
        buf[i] = (ux as u8) | 0x80;
        ux >>= 7;
        i += 1;
    }
    buf[i] = ux as u8;
    buf
}

/// Read a zigzag varint from a buffer; returns the value and the number of
/// bytes consumed, or `None` if no terminating byte was found.
pub fn read_varint(buf: &[u8]) -> Option<(i64, usize)> {
    let mut ux: u64 = 0;
    let mut shift = 0u32;
    for (i, &b) in buf.iter().enumerate() {
        ux |= u64::from(b & 0x7f) << shift;
        if b & 0x80 == 0 {
            let v = ((ux >> 1) as i64) ^ -((ux & 1) as i64);
            return Some((v, i + 1));
        }
        shift += 7;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_round_trips() {
        for v in [
            0i64,
            1,
            -1,
            63,
            -64,
            1_700_000_000_000_000, // a plausible unix-micro timestamp
            i64::from(i32::MAX),
        ] {
            let buf = put_varint(v);
            let (decoded, _) = read_varint(&buf).unwrap();
            assert_eq!(decoded, v, "value {v}");
        }
    }

    #[test]
    fn timestamp_varint_fills_buffer() {
        // Current-era microsecond timestamps need all eight bytes, which is
        // what the parser requires.
        let buf = put_varint(Utc::now().timestamp_micros());
        let (_, consumed) = read_varint(&buf).unwrap();
        assert_eq!(consumed, TIMESTAMP_LEN);
    }

    #[test]
    fn encode_parse_round_trip() {
        let sig = VaultSignature {
            nonce: [7u8; NONCE_LEN],
            timestamp: DateTime::from_timestamp_micros(1_704_067_200_000_000).unwrap(),
            digest: [9u8; DIGEST_LEN],
        };
        let encoded = sig.encode();
        assert_eq!(encoded.matches('.').count(), 2);
        assert_eq!(encoded, encoded.to_ascii_lowercase());
        assert!(!encoded.contains('='));

        let parsed = VaultSignature::parse(&encoded).unwrap();
        assert_eq!(parsed, sig);
    }

    #[test]
    fn parse_accepts_uppercase_and_padding() {
        let sig = VaultSignature {
            nonce: [1u8; NONCE_LEN],
            timestamp: DateTime::from_timestamp_micros(1_704_067_200_000_000).unwrap(),
            digest: [2u8; DIGEST_LEN],
        };
        let upper = sig.encode().to_ascii_uppercase();
        assert_eq!(VaultSignature::parse(&upper).unwrap(), sig);

        let padded: Vec<String> = sig
            .encode()
            .split('.')
            .map(|c| format!("{c}===="))
            .collect();
        assert_eq!(VaultSignature::parse(&padded.join(".")).unwrap(), sig);
    }

    #[test]
    fn parse_rejects_wrong_component_count() {
        assert!(matches!(
            VaultSignature::parse("only.two"),
            Err(AuthError::MalformedSignature(_))
        ));
        assert!(matches!(
            VaultSignature::parse("a.b.c.d"),
            Err(AuthError::MalformedSignature(_))
        ));
    }

    #[test]
    fn parse_rejects_bad_lengths() {
        let short_nonce = format!(
            "{}.{}.{}",
            encode_base32(&[0u8; 16]),
            encode_base32(&put_varint(1_704_067_200_000_000)),
            encode_base32(&[0u8; DIGEST_LEN]),
        );
        assert!(matches!(
            VaultSignature::parse(&short_nonce),
            Err(AuthError::MalformedSignature(_))
        ));
    }

    #[test]
    fn window_enforced_on_both_sides() {
        let now = Utc::now();
        let sig = |timestamp| VaultSignature {
            nonce: [0u8; NONCE_LEN],
            timestamp,
            digest: [0u8; DIGEST_LEN],
        };

        assert!(sig(now).check_window(now).is_ok());
        assert!(sig(now - Duration::seconds(119)).check_window(now).is_ok());
        assert!(sig(now + Duration::seconds(119)).check_window(now).is_ok());
        assert_eq!(
            sig(now - Duration::minutes(3)).check_window(now),
            Err(AuthError::Expired)
        );
        assert_eq!(
            sig(now + Duration::minutes(3)).check_window(now),
            Err(AuthError::NotYetValid)
        );
    }
}
