//! # Cryptographic Primitives for Bon
//!
//! Everything that touches key material lives under this module:
//!
//! - **secp256k1 Schnorr** for voucher signatures ([`schnorr`]).
//! - **2-of-3 sharing over GF(2^8)** for splitting voucher keys ([`sharing`]).
//! - **AES-256-GCM** for sealing shares and circulation records ([`encryption`]).
//! - **SHA-256 / HMAC-SHA256** for ids, nonces and key derivation ([`hash`]).
//!
//! Reconstructed keys only ever exist inside a [`secret::SecretKey`], which
//! wipes itself on drop.
//!
//! ## A note on "rolling your own crypto"
//!
//! The curve arithmetic and the cipher come from audited RustCrypto crates.
//! The only field arithmetic written here is the GF(2^8) line interpolation
//! in [`sharing`], and it is tested exhaustively.

pub mod codec;
pub mod encryption;
pub mod hash;
pub mod schnorr;
pub mod secret;
pub mod sharing;

use thiserror::Error;

pub use codec::CodecError;
pub use encryption::{decrypt_share, encrypt_share, SealedShare};
pub use hash::{hmac_sha256, sha256};
pub use schnorr::{sign, verify, PublicKey, Signature};
pub use secret::SecretKey;
pub use sharing::{combine, split, Share, ShareError, ShareRole};

/// Errors from signing, verification and authenticated encryption.
///
/// Kept vague on purpose. Whether a tag failed because of a wrong key or a
/// flipped bit is nobody's business but ours.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("encryption failed")]
    EncryptFailed,

    #[error("signature invalid")]
    SignatureInvalid,

    #[error("invalid private key")]
    InvalidPrivateKey,

    #[error("invalid public key")]
    InvalidPublicKey,

    #[error("nonce derivation produced zero")]
    DegenerateNonce,

    #[error("malformed encoding: {0}")]
    Encoding(#[from] CodecError),
}
