//! CRC-32 trailers and expiry checks shared by the wire messages.
//!
//! The checksum is the zlib CRC-32 (reflected polynomial `0xEDB88320`),
//! stored big-endian after every other byte of the payload.

use super::error::WireError;

/// Length of the CRC trailer.
pub const CRC_LENGTH: usize = 4;

/// zlib CRC-32 of `bytes`.
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32fast::hash(bytes)
}

/// Append the big-endian CRC-32 of everything already in `buffer`.
pub fn append_crc(buffer: &mut Vec<u8>) {
    let crc = crc32(buffer);
    buffer.extend_from_slice(&crc.to_be_bytes());
}

/// Check the trailer and return the payload in front of it.
pub fn strip_crc(bytes: &[u8]) -> Result<&[u8], WireError> {
    if bytes.len() < CRC_LENGTH {
        return Err(WireError::BadLength {
            expected: CRC_LENGTH,
            got: bytes.len(),
        });
    }
    let (payload, trailer) = bytes.split_at(bytes.len() - CRC_LENGTH);
    let mut stored = [0u8; CRC_LENGTH];
    stored.copy_from_slice(trailer);
    if crc32(payload) != u32::from_be_bytes(stored) {
        return Err(WireError::ChecksumMismatch);
    }
    Ok(payload)
}

/// `now >= timestamp + ttl`, in seconds.
pub fn is_expired(timestamp: u64, ttl_secs: u64, now: u64) -> bool {
    now >= timestamp.saturating_add(ttl_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zlib_check_value() {
        // Standard CRC-32 check value.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn trailer_roundtrip() {
        let mut buf = b"voucher".to_vec();
        append_crc(&mut buf);
        assert_eq!(buf.len(), 7 + CRC_LENGTH);
        assert_eq!(&buf[7..], &crc32(b"voucher").to_be_bytes());
        assert_eq!(strip_crc(&buf).unwrap(), b"voucher");
    }

    #[test]
    fn corrupted_trailer_or_payload_rejected() {
        let mut buf = b"voucher".to_vec();
        append_crc(&mut buf);

        let mut bad = buf.clone();
        bad[0] ^= 0x01;
        assert_eq!(strip_crc(&bad), Err(WireError::ChecksumMismatch));

        let mut bad = buf;
        let last = bad.len() - 1;
        bad[last] ^= 0x01;
        assert_eq!(strip_crc(&bad), Err(WireError::ChecksumMismatch));

        assert!(matches!(strip_crc(&[1, 2]), Err(WireError::BadLength { .. })));
    }

    #[test]
    fn expiry_boundary_is_inclusive() {
        assert!(!is_expired(1_000, 120, 1_119));
        assert!(is_expired(1_000, 120, 1_120));
        assert!(is_expired(1_000, 0, 1_000));
        assert!(!is_expired(u64::MAX - 1, 10, 0));
    }
}
