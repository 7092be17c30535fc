//! Follower stream authentication.
//!
//! A follower opening `GET /ws/fanout` proves it holds one of its registered
//! shared secrets by sending two headers:
//!
//! ```text
//! Mtrelay-Follower: {follower_pubkey}
//! Mtrelay-Signature: {unix_timestamp}.{base64_signature}
//! ```
//!
//! where the signature is `HMAC-SHA256("{follower_pubkey}.{timestamp}", shared_secret)`.
//!
//! Control operations that mutate settlement or the source pool use a
//! plaintext token in [`CONTROL_TOKEN_HEADER`] instead.

/// Header naming the follower whose stream is requested.
pub const FOLLOWER_HEADER: &str = "Mtrelay-Follower";

/// Header carrying the follower HMAC signature.
pub const SIGNATURE_HEADER: &str = "Mtrelay-Signature";

/// Header for control token authentication (plaintext token).
pub const CONTROL_TOKEN_HEADER: &str = "X-Settlement-Token";

/// Maximum allowed clock distance of a signature (in seconds).
pub const MAX_SIGNATURE_AGE: i64 = 5 * 60;

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("invalid header format")]
    InvalidFormat,
    #[error("invalid base64 encoding")]
    InvalidBase64,
    #[error("invalid signature")]
    SignatureMismatch,
    #[error("signature expired")]
    Expired,
}

impl From<ring::error::Unspecified> for SignatureError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::SignatureMismatch
    }
}

// ---------------------------------------------------------------------------
// Header parsing / formatting
// ---------------------------------------------------------------------------

/// Parse a `{timestamp}.{base64}` header value into
/// `(timestamp, raw_signature_bytes)`.
pub fn parse_signature_header(value: &str) -> Result<(i64, Box<[u8]>), SignatureError> {
    let (timestamp, signature) = value.split_once('.').ok_or(SignatureError::InvalidFormat)?;
    let timestamp: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::InvalidFormat)?;
    let signature_bytes = fast32::base64::RFC4648_NOPAD
        .decode_str(signature)
        .map_err(|_| SignatureError::InvalidBase64)?
        .into_boxed_slice();
    Ok((timestamp, signature_bytes))
}

pub fn format_signature_header(timestamp: i64, signature: &[u8]) -> String {
    format!(
        "{}.{}",
        timestamp,
        fast32::base64::RFC4648_NOPAD.encode(signature)
    )
}

// ---------------------------------------------------------------------------
// Timestamp validation
// ---------------------------------------------------------------------------

/// Check that a signature timestamp is within [`MAX_SIGNATURE_AGE`] of now,
/// in either direction.
pub fn check_timestamp(timestamp: i64) -> Result<(), SignatureError> {
    let now = time::OffsetDateTime::now_utc().unix_timestamp();
    if now.abs_diff(timestamp) > MAX_SIGNATURE_AGE.unsigned_abs() {
        return Err(SignatureError::Expired);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Follower signing
// ---------------------------------------------------------------------------

fn follower_key(secret: &[u8]) -> ring::hmac::Key {
    ring::hmac::Key::new(ring::hmac::HMAC_SHA256, secret)
}

/// Sign `follower` at an explicit timestamp and return the header value.
pub fn sign_follower_at(follower: &str, timestamp: i64, secret: &[u8]) -> String {
    let data = format!("{follower}.{timestamp}");
    let sig = ring::hmac::sign(&follower_key(secret), data.as_bytes());
    format_signature_header(timestamp, sig.as_ref())
}

/// Sign `follower` with the current time and return the header value.
pub fn sign_follower(follower: &str, secret: &[u8]) -> String {
    let timestamp = time::OffsetDateTime::now_utc().unix_timestamp();
    sign_follower_at(follower, timestamp, secret)
}

/// Verify a follower signature against one candidate secret.
pub fn verify_follower(
    follower: &str,
    timestamp: i64,
    signature: &[u8],
    secret: &[u8],
) -> Result<(), SignatureError> {
    let data = format!("{follower}.{timestamp}");
    ring::hmac::verify(&follower_key(secret), data.as_bytes(), signature)?;
    check_timestamp(timestamp)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_verify() {
        let header = sign_follower("follower-1", b"secret");
        let (ts, sig) = parse_signature_header(&header).unwrap();
        verify_follower("follower-1", ts, &sig, b"secret").unwrap();
    }

    #[test]
    fn test_wrong_secret_or_follower() {
        let header = sign_follower("follower-1", b"secret");
        let (ts, sig) = parse_signature_header(&header).unwrap();
        assert!(matches!(
            verify_follower("follower-1", ts, &sig, b"other"),
            Err(SignatureError::SignatureMismatch)
        ));
        assert!(matches!(
            verify_follower("follower-2", ts, &sig, b"secret"),
            Err(SignatureError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_expired_signature() {
        let old = time::OffsetDateTime::now_utc().unix_timestamp() - MAX_SIGNATURE_AGE - 10;
        let header = sign_follower_at("follower-1", old, b"secret");
        let (ts, sig) = parse_signature_header(&header).unwrap();
        assert!(matches!(
            verify_follower("follower-1", ts, &sig, b"secret"),
            Err(SignatureError::Expired)
        ));
    }

    #[test]
    fn test_extreme_timestamps_expire() {
        for timestamp in [i64::MIN, i64::MAX] {
            assert!(matches!(
                check_timestamp(timestamp),
                Err(SignatureError::Expired)
            ));
            let header = sign_follower_at("follower-1", timestamp, b"secret");
            let (ts, sig) = parse_signature_header(&header).unwrap();
            assert!(matches!(
                verify_follower("follower-1", ts, &sig, b"secret"),
                Err(SignatureError::Expired)
            ));
        }
    }

    #[test]
    fn test_malformed_headers() {
        assert!(matches!(
            parse_signature_header("no-dot"),
            Err(SignatureError::InvalidFormat)
        ));
        assert!(matches!(
            parse_signature_header("abc.AAAA"),
            Err(SignatureError::InvalidFormat)
        ));
        assert!(matches!(
            parse_signature_header("123.!!!"),
            Err(SignatureError::InvalidBase64)
        ));
    }
}
