//! Per-follower payload encryption.
//!
//! The default sealer uses ChaCha20-Poly1305 with the key
//! `SHA-256(shared_secret)` and a random 96-bit nonce. The sealed form is
//! `base64(nonce || ciphertext || tag)` without padding.

use ring::aead::{Aad, CHACHA20_POLY1305, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::rand::{SecureRandom, SystemRandom};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SealError {
    #[error("encryption failed")]
    Crypto,
    #[error("sealed payload is malformed")]
    Malformed,
}

impl From<ring::error::Unspecified> for SealError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::Crypto
    }
}

/// Turns a plaintext payload into a form only the holder of
/// `shared_secret` can read.
pub trait PayloadSealer: Send + Sync {
    fn seal(&self, shared_secret: &str, plaintext: &[u8]) -> Result<String, SealError>;
}

pub struct ChaChaSealer {
    rng: SystemRandom,
}

impl ChaChaSealer {
    pub fn new() -> Self {
        Self {
            rng: SystemRandom::new(),
        }
    }

    fn key(shared_secret: &str) -> Result<LessSafeKey, SealError> {
        let digest = ring::digest::digest(&ring::digest::SHA256, shared_secret.as_bytes());
        let unbound = UnboundKey::new(&CHACHA20_POLY1305, digest.as_ref())?;
        Ok(LessSafeKey::new(unbound))
    }

    /// Reverse of [`PayloadSealer::seal`].
    pub fn open(shared_secret: &str, sealed: &str) -> Result<Vec<u8>, SealError> {
        let raw = fast32::base64::RFC4648_NOPAD
            .decode_str(sealed)
            .map_err(|_| SealError::Malformed)?;
        if raw.len() < NONCE_LEN {
            return Err(SealError::Malformed);
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce = Nonce::try_assume_unique_for_key(nonce)?;
        let mut in_out = ciphertext.to_vec();
        let plaintext = Self::key(shared_secret)?.open_in_place(nonce, Aad::empty(), &mut in_out)?;
        Ok(plaintext.to_vec())
    }
}

impl Default for ChaChaSealer {
    fn default() -> Self {
        Self::new()
    }
}

impl PayloadSealer for ChaChaSealer {
    fn seal(&self, shared_secret: &str, plaintext: &[u8]) -> Result<String, SealError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        self.rng.fill(&mut nonce_bytes)?;
        let mut in_out = plaintext.to_vec();
        Self::key(shared_secret)?.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce_bytes),
            Aad::empty(),
            &mut in_out,
        )?;

        let mut sealed = Vec::with_capacity(NONCE_LEN + in_out.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&in_out);
        Ok(fast32::base64::RFC4648_NOPAD.encode(&sealed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_matching_secret_opens() {
        let sealer = ChaChaSealer::new();
        let sealed = sealer.seal("secret-a", b"signal").unwrap();
        assert_eq!(ChaChaSealer::open("secret-a", &sealed).unwrap(), b"signal");
        assert!(ChaChaSealer::open("secret-b", &sealed).is_err());
    }

    #[test]
    fn test_nonce_is_fresh_per_seal() {
        let sealer = ChaChaSealer::new();
        let a = sealer.seal("s", b"same").unwrap();
        let b = sealer.seal("s", b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(
            ChaChaSealer::open("s", "AAAA"),
            Err(SealError::Malformed)
        ));
        assert!(matches!(
            ChaChaSealer::open("s", "!!"),
            Err(SealError::Malformed)
        ));
    }
}
