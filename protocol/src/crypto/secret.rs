//! # Ephemeral Secret Keys
//!
//! A voucher's private key exists in exactly one place and for exactly as
//! long as one signature takes: it is rebuilt from two shares, handed to
//! the signing engine, and wiped when the owning [`SecretKey`] goes out of
//! scope. Dropping wipes, so success, `?` early returns and unwinding
//! panics all leave zeroes behind.
//!
//! `SecretKey` is deliberately not `Clone` and not `Copy`, has no serde
//! impls, and prints as `<redacted>`. If you need the key somewhere else,
//! pass a reference.

use std::fmt;

use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::SECRET_LENGTH;

/// A 32-byte private scalar that zeroes itself on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: [u8; SECRET_LENGTH],
}

impl SecretKey {
    /// Move key material out of `source` into a new owner, wiping `source`.
    ///
    /// Arrays are `Copy`, so a plain constructor would leave the caller
    /// with a second live copy. Taking `&mut` lets us zero it.
    pub fn take(source: &mut [u8; SECRET_LENGTH]) -> Self {
        let key = Self { bytes: *source };
        source.zeroize();
        key
    }

    /// Fresh random bytes from the OS RNG. Not necessarily a valid scalar;
    /// issuance normalizes it.
    pub fn random() -> Self {
        let mut bytes = [0u8; SECRET_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self::take(&mut bytes)
    }

    /// Borrow the raw bytes. Keep the borrow short.
    pub fn expose(&self) -> &[u8; SECRET_LENGTH] {
        &self.bytes
    }

    /// Mutable access for in-place normalization.
    pub(crate) fn expose_mut(&mut self) -> &mut [u8; SECRET_LENGTH] {
        &mut self.bytes
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_wipes_the_source() {
        let mut raw = [7u8; SECRET_LENGTH];
        let key = SecretKey::take(&mut raw);
        assert_eq!(raw, [0u8; SECRET_LENGTH]);
        assert_eq!(key.expose(), &[7u8; SECRET_LENGTH]);
    }

    #[test]
    fn explicit_zeroize_clears_bytes() {
        let mut key = SecretKey::take(&mut [9u8; SECRET_LENGTH]);
        key.zeroize();
        assert_eq!(key.expose(), &[0u8; SECRET_LENGTH]);
    }

    #[test]
    fn debug_never_prints_key_material() {
        let key = SecretKey::take(&mut [0xAB; SECRET_LENGTH]);
        let printed = format!("{key:?}");
        assert!(!printed.contains("ab"));
        assert!(!printed.contains("171"));
        assert!(printed.contains("redacted"));
    }

    #[test]
    fn random_keys_differ() {
        let a = SecretKey::random();
        let b = SecretKey::random();
        assert_ne!(a.expose(), b.expose());
    }
}
