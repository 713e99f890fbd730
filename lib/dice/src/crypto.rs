// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `CryptoPrimitives` collaborator: hash, derive, sign, verify. Grounded
//! directly on `stage0::attest::validate_image`, which already does
//! `sha2::Sha256::digest` plus a `p256::ecdsa` verify against a SEC1 public
//! key read out of the image header.

use p256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use p256::ecdsa::{Signature as P256Signature, SigningKey, VerifyingKey};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use sha2::{Digest, Sha256};

pub const COORD_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    /// A 32-byte seed did not reduce to a valid, nonzero scalar. One in
    /// 2^128-ish odds against the P-256 order; in practice this only fires
    /// against adversarial or all-zero input.
    InvalidSeed,
    InvalidPublicKey,
    InvalidSignature,
    VerifyFailed,
}

/// A raw, fixed-width ECDSA signature: `r` and `s`, each left-padded to
/// [`COORD_LEN`] bytes, no ASN.1.
#[derive(Clone, Copy)]
pub struct Signature {
    pub r: [u8; COORD_LEN],
    pub s: [u8; COORD_LEN],
}

pub fn hash(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Derives an ECDSA keypair deterministically from a 32-byte seed (an OKM
/// produced by [`crate::DerivedKey`]). The seed is used directly as the
/// signing scalar, matching the upstream pattern of feeding OKM bytes
/// straight into a keypair constructor (there, `salty::Keypair::from`).
pub fn derive_keypair(
    seed: &[u8; 32],
) -> Result<(SigningKey, VerifyingKey), CryptoError> {
    let signing_key =
        SigningKey::from_bytes(seed.into()).map_err(|_| CryptoError::InvalidSeed)?;
    let verifying_key = *signing_key.verifying_key();
    Ok((signing_key, verifying_key))
}

pub fn sign(signing_key: &SigningKey, digest: &[u8; 32]) -> Signature {
    let sig: P256Signature = signing_key.sign_prehash(digest).expect(
        "signing a fixed-length prehash cannot fail for a valid signing key",
    );
    let bytes = sig.to_bytes();
    let mut r = [0u8; COORD_LEN];
    let mut s = [0u8; COORD_LEN];
    r.copy_from_slice(&bytes[..COORD_LEN]);
    s.copy_from_slice(&bytes[COORD_LEN..]);
    Signature { r, s }
}

/// Verifies a raw `(r, s)` signature over `digest` against a SEC1-encoded
/// (compressed or uncompressed) public key.
pub fn verify(
    pubkey_sec1: &[u8],
    digest: &[u8; 32],
    signature: &Signature,
) -> Result<(), CryptoError> {
    let verifying_key = VerifyingKey::from_sec1_bytes(pubkey_sec1)
        .map_err(|_| CryptoError::InvalidPublicKey)?;
    let sig = P256Signature::from_scalars(signature.r, signature.s)
        .map_err(|_| CryptoError::InvalidSignature)?;
    verifying_key
        .verify_prehash(digest, &sig)
        .map_err(|_| CryptoError::VerifyFailed)
}

/// Exports the uncompressed SEC1 point `0x04 || X || Y` (65 bytes for
/// P-256).
pub fn export_public_key(verifying_key: &VerifyingKey) -> [u8; 65] {
    let point = verifying_key.to_encoded_point(false);
    let mut out = [0u8; 65];
    out.copy_from_slice(point.as_bytes());
    out
}

/// Forces a serial-number-shaped byte buffer to be positive and nonzero per
/// RFC 5280 §4.1.2.2, the way the upstream DICE TODO (never implemented
/// there) describes: clamp the leading byte into `[0x01, 0x7F]`.
pub fn force_positive_nonzero(bytes: &mut [u8]) {
    if let Some(first) = bytes.first_mut() {
        *first &= 0x7F;
        if *first == 0 {
            *first = 0x01;
        }
    }
}
