// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Compound device identity derivation and the ECDSA primitives it's built
//! from.
//!
//! The shape of this crate follows the upstream DICE implementation's `Cdi`
//! / `CdiL1` / per-purpose OKM types almost exactly; the one deliberate
//! departure is the signing backend. The upstream crate derives Ed25519
//! keys (`salty` + `sha3`) from its OKM, but this lineage's certificate
//! chain is specified as ECDSA over a NIST curve, so key derivation and
//! signing here go through `p256`/`ecdsa`/`sha2`/`hkdf` instead -- which is
//! the same stack the upstream `stage0::attest` module already uses for
//! image-signature verification. See `DESIGN.md` for the full rationale.

#![cfg_attr(not(test), no_std)]

mod crypto;

pub use crypto::{
    derive_keypair, export_public_key, force_positive_nonzero, hash, sign,
    verify, CryptoError, Signature,
};

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const SEED_LENGTH: usize = 32;

pub trait SeedBuf {
    fn as_bytes(&self) -> &[u8; SEED_LENGTH];
}

/// The compound device identifier: the device's immutable per-unit secret.
/// Callers obtain the bytes from whatever hardware root of trust the
/// platform provides (an RNG-seeded value at first-boot provisioning, or a
/// latched hardware register) and hand them to [`Cdi::new`]; this type's
/// only job from that point on is to zeroize on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct Cdi([u8; SEED_LENGTH]);

impl Cdi {
    pub fn new(bytes: [u8; SEED_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl SeedBuf for Cdi {
    fn as_bytes(&self) -> &[u8; SEED_LENGTH] {
        &self.0
    }
}

/// The compound identifier for layer-1 (agent) software: `HMAC-SHA256(key =
/// CDI, msg = fwid)`, where `fwid` is the measured agent digest. Matches
/// the upstream `CdiL1::new`, with SHA-256 standing in for SHA3-256.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct CdiL1([u8; SEED_LENGTH]);

impl SeedBuf for CdiL1 {
    fn as_bytes(&self) -> &[u8; SEED_LENGTH] {
        &self.0
    }
}

impl CdiL1 {
    pub fn new(cdi: &Cdi, fwid: &[u8; SEED_LENGTH]) -> Self {
        let mut mac = Hmac::<Sha256>::new_from_slice(cdi.as_bytes())
            .expect("HMAC accepts any key length");
        mac.update(fwid);
        let result = mac.finalize();
        CdiL1(result.into_bytes().into())
    }
}

/// Output keying material derived from a layer's CDI via HKDF-expand (no
/// extract: the seed is already uniformly random, per RFC 5869 §3.3). This
/// is the one primitive behind every named key in the lineage -- the
/// compound (alias) signing key is its sole consumer here, but the same
/// derivation backs sibling key classes (`SpMeasureOkm`, `TrustQuorumDheOkm`,
/// `RngSeed`) this crate doesn't issue.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; SEED_LENGTH]);

impl SeedBuf for DerivedKey {
    fn as_bytes(&self) -> &[u8; SEED_LENGTH] {
        &self.0
    }
}

impl DerivedKey {
    pub fn from_cdi<S: SeedBuf>(cdi: &S, label: &[u8]) -> Self {
        let hk = Hkdf::<Sha256>::from_prk(cdi.as_bytes())
            .expect("seed length matches Sha256 output size");
        let mut okm = [0u8; SEED_LENGTH];
        hk.expand(label, &mut okm).expect("okm fits one HMAC block");
        Self(okm)
    }

    pub fn alias(cdi_l1: &CdiL1) -> Self {
        Self::from_cdi(cdi_l1, b"attestation")
    }
}

/// Derives a certificate serial number from the subject's public key via
/// `HKDF-Expand(pubkey, "Serial")`. Two certs issued over the same key
/// always get the same serial, and distinct keys get distinct serials
/// with overwhelming probability -- no counter state to persist. RFC 5280
/// §4.1.2.2 requires a positive, non-zero integer; `force_positive_nonzero`
/// enforces that shape on the derived bytes.
pub fn derive_serial(pubkey: &[u8]) -> [u8; 16] {
    let hk = Hkdf::<Sha256>::new(None, pubkey);
    let mut serial = [0u8; 16];
    hk.expand(b"Serial", &mut serial)
        .expect("16-byte okm fits one HMAC block");
    force_positive_nonzero(&mut serial);
    serial
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cdi_l1_is_deterministic() {
        let cdi = Cdi::new([7u8; SEED_LENGTH]);
        let fwid = [9u8; SEED_LENGTH];
        let a = CdiL1::new(&cdi, &fwid);
        let b = CdiL1::new(&cdi, &fwid);
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn cdi_l1_changes_with_fwid() {
        let cdi = Cdi::new([7u8; SEED_LENGTH]);
        let a = CdiL1::new(&cdi, &[1u8; SEED_LENGTH]);
        let b = CdiL1::new(&cdi, &[2u8; SEED_LENGTH]);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn derived_keys_for_distinct_labels_differ() {
        let cdi_l1 = CdiL1::new(&Cdi::new([1u8; SEED_LENGTH]), &[2u8; SEED_LENGTH]);
        let alias = DerivedKey::alias(&cdi_l1);
        let other = DerivedKey::from_cdi(&cdi_l1, b"sp-measure");
        assert_ne!(alias.as_bytes(), other.as_bytes());
    }

    #[test]
    fn serial_is_deterministic_and_nonzero() {
        let pubkey = [4u8; 65];
        let a = derive_serial(&pubkey);
        let b = derive_serial(&pubkey);
        assert_eq!(a, b);
        assert_ne!(a, [0u8; 16]);
        // RFC 5280 positive-integer encoding: high bit of the leading byte
        // clear.
        assert_eq!(a[0] & 0x80, 0);
    }

    #[test]
    fn serial_differs_across_keys() {
        let a = derive_serial(&[1u8; 65]);
        let b = derive_serial(&[2u8; 65]);
        assert_ne!(a, b);
    }
}
