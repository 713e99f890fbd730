// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Builds the TBS (to-be-signed) structures for Root, Device, and Alias
//! certificates and the one CSR this lineage issues, then wraps a TBS plus
//! an ECDSA signature into the final DER certificate.
//!
//! This crate only ever emits the small, fixed subject/issuer/extension
//! shapes the boot identity chain needs; it is not a general X.509 library.

#![cfg_attr(not(test), no_std)]

pub mod oid;

use dice_der::{DerBuilder, TAG_SEQUENCE, TAG_SET};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Der(dice_der::Error),
    InvalidValue,
}

impl From<dice_der::Error> for Error {
    fn from(e: dice_der::Error) -> Self {
        Error::Der(e)
    }
}

/// The curve a build is configured for. Exactly one of the three is selected
/// by a Cargo feature on the `dice` crate; this crate just needs to know the
/// OID and the coordinate width to size serial-number-independent fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Curve {
    pub oid: &'static [u32],
    pub coord_len: usize,
    pub sig_alg_oid: &'static [u32],
}

pub const P256: Curve = Curve {
    oid: oid::PRIME256V1,
    coord_len: 32,
    sig_alg_oid: oid::ECDSA_WITH_SHA256,
};
pub const P384: Curve = Curve {
    oid: oid::SECP384R1,
    coord_len: 48,
    sig_alg_oid: oid::ECDSA_WITH_SHA384,
};
pub const P521: Curve = Curve {
    oid: oid::SECP521R1,
    coord_len: 66,
    sig_alg_oid: oid::ECDSA_WITH_SHA512,
};

/// UTCTime in the ASN.1-required `YYMMDDHHMMSSZ` form. Callers compute this
/// from whatever time source is available (often a fixed "epoch" value on a
/// device with no RTC; see the loader's handling of `notBefore`).
pub type UtcTime = [u8; 13];

/// ECDSA signature as raw, fixed-width big-endian coordinates (not ASN.1).
pub struct RawSignature<'a> {
    pub r: &'a [u8],
    pub s: &'a [u8],
}

/// An uncompressed SEC1 public key point, `0x04 || X || Y`.
pub type Sec1Point<'a> = &'a [u8];

fn add_name(b: &mut DerBuilder<'_>, cn: &str) -> Result<(), Error> {
    b.start()?; // Name ::= SEQUENCE OF RDN
    b.start()?; // RDN ::= SET OF AttributeTypeAndValue
    b.start()?; // AttributeTypeAndValue ::= SEQUENCE
    b.add_oid(oid::COMMON_NAME)?;
    b.add_utf8_string(cn)?;
    b.end(TAG_SEQUENCE)?;
    b.end(TAG_SET)?;
    b.end(TAG_SEQUENCE)?;
    Ok(())
}

fn add_validity(
    b: &mut DerBuilder<'_>,
    not_before: &UtcTime,
    not_after: &UtcTime,
) -> Result<(), Error> {
    b.start()?;
    b.add_utc_time(not_before)?;
    b.add_utc_time(not_after)?;
    b.end(TAG_SEQUENCE)?;
    Ok(())
}

fn add_spki(
    b: &mut DerBuilder<'_>,
    curve: &Curve,
    pubkey: Sec1Point<'_>,
) -> Result<(), Error> {
    b.start()?; // SubjectPublicKeyInfo
    b.start()?; // AlgorithmIdentifier
    b.add_oid(oid::ID_EC_PUBLIC_KEY)?;
    b.add_oid(curve.oid)?;
    b.end(TAG_SEQUENCE)?;
    b.add_bit_string(pubkey)?;
    b.end(TAG_SEQUENCE)?;
    Ok(())
}

/// `BIT STRING` encoding a KeyUsage bitmask. `bits` lists the set bit
/// indices (0 = digitalSignature, 5 = keyCertSign, per RFC 5280 §4.2.1.3);
/// trailing unused bits in the last octet are computed from the highest bit
/// set.
fn key_usage_byte(bits: &[u8]) -> (u8, u8) {
    let mut byte = 0u8;
    let mut highest = 0u8;
    for &bit in bits {
        byte |= 0x80u8 >> bit;
        if bit > highest {
            highest = bit;
        }
    }
    let unused = 7 - highest;
    (byte, unused)
}

fn add_extension_raw(
    b: &mut DerBuilder<'_>,
    extn_oid: &[u32],
    critical: bool,
    value: impl FnOnce(&mut DerBuilder<'_>) -> Result<(), Error>,
) -> Result<(), Error> {
    b.start()?; // Extension ::= SEQUENCE
    b.add_oid(extn_oid)?;
    if critical {
        b.add_boolean(true)?;
    }
    b.start()?; // extnValue ::= OCTET STRING containing DER
    value(b)?;
    b.end(dice_der::TAG_OCTET_STRING)?;
    b.end(TAG_SEQUENCE)?;
    Ok(())
}

fn add_basic_constraints(
    b: &mut DerBuilder<'_>,
    path_len: Option<u32>,
) -> Result<(), Error> {
    add_extension_raw(b, oid::BASIC_CONSTRAINTS, true, |b| {
        b.start()?;
        b.add_boolean(true)?;
        if let Some(len) = path_len {
            b.add_u32(len)?;
        }
        b.end(TAG_SEQUENCE)?;
        Ok(())
    })
}

fn add_key_usage(b: &mut DerBuilder<'_>, bits: &[u8]) -> Result<(), Error> {
    let (byte, unused) = key_usage_byte(bits);
    add_extension_raw(b, oid::KEY_USAGE, true, |b| {
        b.add_bit_string_with_unused(unused, &[byte])?;
        Ok(())
    })
}

fn add_ext_key_usage_client_auth(b: &mut DerBuilder<'_>) -> Result<(), Error> {
    add_extension_raw(b, oid::EXT_KEY_USAGE, false, |b| {
        b.start()?;
        b.add_oid(oid::CLIENT_AUTH)?;
        b.end(TAG_SEQUENCE)?;
        Ok(())
    })
}

fn add_authority_key_identifier(
    b: &mut DerBuilder<'_>,
    key_id: &[u8],
) -> Result<(), Error> {
    add_extension_raw(b, oid::AUTHORITY_KEY_IDENTIFIER, false, |b| {
        b.start()?;
        b.add_context_primitive(0, key_id)?;
        b.end(TAG_SEQUENCE)?;
        Ok(())
    })
}

/// The custom riot extension carried on Alias certificates: binds the
/// device-ID key and a SHA-256 firmware measurement (`fwid`) to the alias
/// key the enclosing certificate certifies.
fn add_riot_extension(
    b: &mut DerBuilder<'_>,
    curve: &Curve,
    deviceid_pub: Sec1Point<'_>,
    fwid: &[u8; 32],
) -> Result<(), Error> {
    add_extension_raw(b, oid::RIOT, false, |b| {
        b.start()?; // RiotExtension ::= SEQUENCE
        b.add_u32(1)?; // version
        b.start()?; // DeviceIdPub ::= SEQUENCE
        b.start()?; // AlgorithmIdentifier
        b.add_oid(oid::ID_EC_PUBLIC_KEY)?;
        b.add_oid(curve.oid)?;
        b.end(TAG_SEQUENCE)?;
        b.add_bit_string(deviceid_pub)?;
        b.end(TAG_SEQUENCE)?;
        b.start()?; // Fwid ::= SEQUENCE
        b.add_oid(oid::SHA256)?;
        b.add_octet_string(fwid)?;
        b.end(TAG_SEQUENCE)?;
        b.end(TAG_SEQUENCE)?;
        Ok(())
    })
}

/// Builds a Root certificate TBS: self-issued, `cA=true, pathLen=2`.
pub fn build_root_tbs(
    out: &mut [u8],
    curve: &Curve,
    serial: &[u8],
    cn: &str,
    not_before: &UtcTime,
    not_after: &UtcTime,
    pubkey: Sec1Point<'_>,
) -> Result<usize, Error> {
    let mut b = DerBuilder::new(out);
    b.start()?; // TBSCertificate
    b.start()?; // version [0] EXPLICIT INTEGER v3
    b.add_u32(2)?;
    b.end(dice_der::explicit_tag(0))?;
    b.add_integer_bytes(serial)?;
    b.start()?;
    b.add_oid(curve.sig_alg_oid)?;
    b.end(TAG_SEQUENCE)?;
    add_name(&mut b, cn)?; // issuer == subject
    add_validity(&mut b, not_before, not_after)?;
    add_name(&mut b, cn)?;
    add_spki(&mut b, curve, pubkey)?;
    b.start()?; // extensions [3] EXPLICIT
    b.start()?;
    add_basic_constraints(&mut b, Some(2))?;
    add_key_usage(&mut b, &[0, 5])?; // digitalSignature, keyCertSign
    b.end(TAG_SEQUENCE)?;
    b.end(dice_der::explicit_tag(3))?;
    b.end(TAG_SEQUENCE)?;
    dice_der::finish(&b)?;
    Ok(b.len())
}

/// Builds a Device certificate TBS, signed by the Root (or self-signed if
/// `root_key_id` is `None`): `cA=true, pathLen=1`.
pub fn build_device_tbs(
    out: &mut [u8],
    curve: &Curve,
    serial: &[u8],
    issuer_cn: &str,
    subject_cn: &str,
    not_before: &UtcTime,
    not_after: &UtcTime,
    pubkey: Sec1Point<'_>,
    root_key_id: Option<&[u8]>,
) -> Result<usize, Error> {
    let mut b = DerBuilder::new(out);
    b.start()?;
    b.start()?;
    b.add_u32(2)?;
    b.end(dice_der::explicit_tag(0))?;
    b.add_integer_bytes(serial)?;
    b.start()?;
    b.add_oid(curve.sig_alg_oid)?;
    b.end(TAG_SEQUENCE)?;
    add_name(&mut b, issuer_cn)?;
    add_validity(&mut b, not_before, not_after)?;
    add_name(&mut b, subject_cn)?;
    add_spki(&mut b, curve, pubkey)?;
    b.start()?;
    b.start()?;
    add_basic_constraints(&mut b, Some(1))?;
    add_key_usage(&mut b, &[0, 5])?;
    add_ext_key_usage_client_auth(&mut b)?;
    if let Some(key_id) = root_key_id {
        add_authority_key_identifier(&mut b, key_id)?;
    }
    b.end(TAG_SEQUENCE)?;
    b.end(dice_der::explicit_tag(3))?;
    b.end(TAG_SEQUENCE)?;
    dice_der::finish(&b)?;
    Ok(b.len())
}

/// Builds an Alias certificate TBS: subject key is the compound key, issuer
/// is the device key, and the riot extension binds in the firmware
/// measurement.
#[allow(clippy::too_many_arguments)]
pub fn build_alias_tbs(
    out: &mut [u8],
    curve: &Curve,
    serial: &[u8],
    issuer_cn: &str,
    subject_cn: &str,
    not_before: &UtcTime,
    not_after: &UtcTime,
    compound_pubkey: Sec1Point<'_>,
    deviceid_pubkey: Sec1Point<'_>,
    fwid: &[u8; 32],
) -> Result<usize, Error> {
    let mut b = DerBuilder::new(out);
    b.start()?;
    b.start()?;
    b.add_u32(2)?;
    b.end(dice_der::explicit_tag(0))?;
    b.add_integer_bytes(serial)?;
    b.start()?;
    b.add_oid(curve.sig_alg_oid)?;
    b.end(TAG_SEQUENCE)?;
    add_name(&mut b, issuer_cn)?;
    add_validity(&mut b, not_before, not_after)?;
    add_name(&mut b, subject_cn)?;
    add_spki(&mut b, curve, compound_pubkey)?;
    b.start()?;
    b.start()?;
    add_key_usage(&mut b, &[0])?; // digitalSignature only, no keyCertSign
    add_ext_key_usage_client_auth(&mut b)?;
    add_riot_extension(&mut b, curve, deviceid_pubkey, fwid)?;
    b.end(TAG_SEQUENCE)?;
    b.end(dice_der::explicit_tag(3))?;
    b.end(TAG_SEQUENCE)?;
    dice_der::finish(&b)?;
    Ok(b.len())
}

/// Builds a PKCS#10 CertificationRequestInfo (the part a CSR signs over):
/// version 0, subject, SubjectPublicKeyInfo, and an empty `[0]` attributes
/// set.
pub fn build_csr_tbs(
    out: &mut [u8],
    curve: &Curve,
    subject_cn: &str,
    pubkey: Sec1Point<'_>,
) -> Result<usize, Error> {
    let mut b = DerBuilder::new(out);
    b.start()?;
    b.add_u32(0)?;
    add_name(&mut b, subject_cn)?;
    add_spki(&mut b, curve, pubkey)?;
    b.start()?;
    b.end(dice_der::explicit_tag(0))?;
    b.end(TAG_SEQUENCE)?;
    dice_der::finish(&b)?;
    Ok(b.len())
}

/// Wraps a TBS structure and its ECDSA signature into the outer
/// `Certificate ::= SEQUENCE { tbs, AlgorithmIdentifier, BIT STRING sig }`
/// (the same shape serves a CSR: `CertificationRequest`).
pub fn wrap_signed(
    out: &mut [u8],
    curve: &Curve,
    tbs_der: &[u8],
    signature: &RawSignature<'_>,
) -> Result<usize, Error> {
    let mut b = DerBuilder::new(out);
    b.start()?; // Certificate ::= SEQUENCE
    b.add_raw(tbs_der)?;
    b.start()?; // signatureAlgorithm
    b.add_oid(curve.sig_alg_oid)?;
    b.end(TAG_SEQUENCE)?;
    b.start()?; // signatureValue ::= BIT STRING containing SEQUENCE{r, s}
    b.start()?;
    b.add_integer_bytes(signature.r)?;
    b.add_integer_bytes(signature.s)?;
    b.end(TAG_SEQUENCE)?;
    b.end_bit_string()?;
    b.end(TAG_SEQUENCE)?;
    dice_der::finish(&b)?;
    Ok(b.len())
}
