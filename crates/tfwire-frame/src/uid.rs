//! Base58 device UIDs.
//!
//! Devices are addressed by a 32-bit UID on the wire and by its base58 text
//! form (e.g. `"XYZ"`, `"6qUNbz"`) everywhere a human sees it.

use crate::error::{FrameError, Result};

/// Base58 alphabet used by brickd (no `0`, `O`, `I`, `l`).
pub const ALPHABET: &[u8; 58] = b"123456789abcdefghijkmnopqrstuvwxyzABCDEFGHJKLMNPQRSTUVWXYZ";

/// UID 0 is the broadcast/daemon address and never names a device.
pub const BROADCAST_UID: u32 = 0;

fn digit(c: u8) -> Option<u64> {
    ALPHABET.iter().position(|&a| a == c).map(|p| p as u64)
}

/// Decode a base58 UID string to its numeric form.
pub fn decode_uid(uid: &str) -> Result<u32> {
    let invalid = |reason| FrameError::InvalidUid {
        uid: uid.to_string(),
        reason,
    };

    if uid.is_empty() {
        return Err(invalid("empty"));
    }

    let mut value: u64 = 0;
    for c in uid.bytes() {
        let d = digit(c).ok_or_else(|| invalid("invalid base58 character"))?;
        value = value
            .checked_mul(58)
            .and_then(|v| v.checked_add(d))
            .filter(|v| *v <= u64::from(u32::MAX))
            .ok_or_else(|| invalid("value exceeds 32 bits"))?;
    }

    if value == u64::from(BROADCAST_UID) {
        return Err(invalid("uid 0 is reserved"));
    }
    Ok(value as u32)
}

/// Encode a numeric UID to base58.
pub fn encode_uid(mut value: u32) -> String {
    if value == 0 {
        return (ALPHABET[0] as char).to_string();
    }

    let mut out = Vec::with_capacity(7);
    while value > 0 {
        out.push(ALPHABET[(value % 58) as usize]);
        value /= 58;
    }
    out.reverse();
    // The alphabet is ASCII.
    out.into_iter().map(char::from).collect()
}

/// Decode a fixed-width, NUL-padded UID field from a payload.
pub fn uid_from_field(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_known_values() {
        assert_eq!(decode_uid("2").unwrap(), 1);
        assert_eq!(decode_uid("21").unwrap(), 58);
        // X=55, Y=56, Z=57
        assert_eq!(decode_uid("XYZ").unwrap(), 55 * 58 * 58 + 56 * 58 + 57);
    }

    #[test]
    fn encode_inverts_decode() {
        for uid in ["XYZ", "6qUNbz", "2", "zzzz", "5VF5vx"] {
            let value = decode_uid(uid).unwrap();
            assert_eq!(encode_uid(value), uid);
        }
        assert_eq!(encode_uid(u32::MAX), "7xwQ9g");
    }

    #[test]
    fn rejects_invalid_input() {
        assert!(matches!(
            decode_uid(""),
            Err(FrameError::InvalidUid { reason: "empty", .. })
        ));
        assert!(decode_uid("0OIl").is_err());
        assert!(decode_uid("abc-def").is_err());
        assert!(decode_uid("1").is_err());
        assert!(matches!(
            decode_uid("zzzzzzzzzz"),
            Err(FrameError::InvalidUid {
                reason: "value exceeds 32 bits",
                ..
            })
        ));
    }

    #[test]
    fn uid_field_strips_padding() {
        assert_eq!(uid_from_field(b"XYZ\0\0\0\0\0"), "XYZ");
        assert_eq!(uid_from_field(b"12345678"), "12345678");
        assert_eq!(uid_from_field(b"\0\0\0"), "");
    }
}
