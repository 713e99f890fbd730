// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A small stack-based streaming DER encoder and PEM wrapper.
//!
//! This is not a general-purpose ASN.1 library: it knows exactly the set of
//! primitives and the one backpatching trick (see [`DerBuilder::end`]) needed
//! to build the handful of TBS structures `dice-x509` assembles. Nesting depth
//! is bounded so the encoder never allocates.

#![cfg_attr(not(test), no_std)]

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use heapless::Vec as HVec;

/// Maximum nesting depth of SEQUENCE/SET/EXPLICIT/OCTET STRING/BIT STRING
/// frames. The deepest structure we build (an Alias cert's riot extension)
/// nests about six levels; eight leaves headroom without costing stack space
/// we don't have.
pub const MAX_NESTING: usize = 8;

pub const TAG_BOOLEAN: u8 = 0x01;
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_BIT_STRING: u8 = 0x03;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_NULL: u8 = 0x05;
pub const TAG_OID: u8 = 0x06;
pub const TAG_UTF8_STRING: u8 = 0x0C;
pub const TAG_PRINTABLE_STRING: u8 = 0x13;
pub const TAG_UTC_TIME: u8 = 0x17;
pub const TAG_SEQUENCE: u8 = 0x30;
pub const TAG_SET: u8 = 0x31;

/// `tag | CONTEXT | CONSTRUCTED` for an explicit `[n]` wrapper.
pub const fn explicit_tag(n: u8) -> u8 {
    0xA0 | n
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The output buffer is too small to hold the next write.
    Overflow,
    /// `end()` was called with no matching `start_*()`.
    EmptyNesting,
    /// `start_*()` was called at the configured maximum nesting depth.
    NestingTooDeep,
    /// A value passed to an encoder does not fit the primitive's constraints
    /// (e.g. an OID with fewer than two arcs).
    InvalidValue,
    /// The builder still has open frames; the structure is incomplete.
    UnbalancedNesting,
}

/// A streaming DER encoder over a fixed, caller-owned buffer.
///
/// Content is appended as it is produced. Constructed types (SEQUENCE, SET,
/// `[n]` EXPLICIT, enveloping OCTET STRING / BIT STRING) are opened with a
/// `start_*` call and closed with [`end`](Self::end) or
/// [`end_bit_string`](Self::end_bit_string); the closing call measures what
/// was written since the matching start, computes the DER length encoding,
/// and shifts the content right to make room for the tag+length header.
pub struct DerBuilder<'a> {
    buf: &'a mut [u8],
    len: usize,
    /// Offset at which each open frame's content begins.
    starts: HVec<usize, MAX_NESTING>,
}

impl<'a> DerBuilder<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self {
            buf,
            len: 0,
            starts: HVec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    pub fn nesting_depth(&self) -> usize {
        self.starts.len()
    }

    fn push_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        let end = self.len.checked_add(bytes.len()).ok_or(Error::Overflow)?;
        let dst = self.buf.get_mut(self.len..end).ok_or(Error::Overflow)?;
        dst.copy_from_slice(bytes);
        self.len = end;
        Ok(())
    }

    /// Opens a constructed frame. Content written after this call, up to the
    /// matching [`end`](Self::end), becomes the frame's payload.
    pub fn start(&mut self) -> Result<(), Error> {
        self.starts
            .push(self.len)
            .map_err(|_| Error::NestingTooDeep)
    }

    /// Closes the innermost open frame, writing `tag` and the DER length of
    /// everything appended since the matching [`start`](Self::start).
    pub fn end(&mut self, tag: u8) -> Result<(), Error> {
        let start = self.starts.pop().ok_or(Error::EmptyNesting)?;
        self.wrap(start, tag, 0, &[])
    }

    /// Closes the innermost open frame as a primitive BIT STRING, inserting
    /// the mandatory "0 unused bits" byte ahead of the content that was
    /// written since the matching [`start`](Self::start).
    pub fn end_bit_string(&mut self) -> Result<(), Error> {
        let start = self.starts.pop().ok_or(Error::EmptyNesting)?;
        self.wrap(start, TAG_BIT_STRING, 1, &[0])
    }

    /// Shared implementation of `end`/`end_bit_string`: shifts the bytes
    /// written since `start` to the right to make room for `tag`, the DER
    /// length of `(content_len_adjust + bytes-since-start)`, and `prefix`.
    fn wrap(
        &mut self,
        start: usize,
        tag: u8,
        prefix_len: usize,
        prefix: &[u8],
    ) -> Result<(), Error> {
        let content_len = (self.len - start) + prefix_len;
        let mut len_bytes = [0u8; 5];
        let len_width = encode_length(content_len, &mut len_bytes);
        let header_len = 1 + len_width + prefix_len;

        let new_len = self.len.checked_add(header_len).ok_or(Error::Overflow)?;
        if new_len > self.buf.len() {
            return Err(Error::Overflow);
        }

        self.buf.copy_within(start..self.len, start + header_len);
        self.buf[start] = tag;
        self.buf[start + 1..start + 1 + len_width]
            .copy_from_slice(&len_bytes[..len_width]);
        self.buf[start + 1 + len_width..start + header_len]
            .copy_from_slice(prefix);
        self.len = new_len;
        Ok(())
    }

    /// Appends a complete TLV for an already-DER-encoded primitive: `tag`,
    /// its length, then `value` verbatim. Used by every fixed-size leaf
    /// encoder below.
    fn leaf(&mut self, tag: u8, value: &[u8]) -> Result<(), Error> {
        let mut len_bytes = [0u8; 5];
        let len_width = encode_length(value.len(), &mut len_bytes);
        self.push_raw(&[tag])?;
        self.push_raw(&len_bytes[..len_width])?;
        self.push_raw(value)
    }

    pub fn add_boolean(&mut self, value: bool) -> Result<(), Error> {
        self.leaf(TAG_BOOLEAN, &[if value { 0xff } else { 0x00 }])
    }

    pub fn add_null(&mut self) -> Result<(), Error> {
        self.leaf(TAG_NULL, &[])
    }

    /// Encodes a signed integer from its minimal big-endian representation:
    /// strips redundant leading `0x00`/`0xff` bytes, then prepends a single
    /// `0x00` if the MSB would otherwise be mistaken for a sign bit.
    pub fn add_integer_bytes(&mut self, be: &[u8]) -> Result<(), Error> {
        let mut bytes = be;
        while bytes.len() > 1 && bytes[0] == 0 && bytes[1] & 0x80 == 0 {
            bytes = &bytes[1..];
        }
        if bytes.is_empty() {
            return self.leaf(TAG_INTEGER, &[0]);
        }
        if bytes[0] & 0x80 != 0 {
            let mut tmp = [0u8; 66];
            if bytes.len() + 1 > tmp.len() {
                return Err(Error::Overflow);
            }
            tmp[0] = 0;
            tmp[1..1 + bytes.len()].copy_from_slice(bytes);
            return self.leaf(TAG_INTEGER, &tmp[..1 + bytes.len()]);
        }
        self.leaf(TAG_INTEGER, bytes)
    }

    pub fn add_u32(&mut self, value: u32) -> Result<(), Error> {
        self.add_integer_bytes(&value.to_be_bytes())
    }

    /// Encodes an OBJECT IDENTIFIER from its arc list (e.g. `[1, 2, 840,
    /// 10045, 2, 1]` for `id-ecPublicKey`). The first two arcs are combined
    /// per X.690 §8.19.4; later arcs use base-128 continuation encoding.
    pub fn add_oid(&mut self, arcs: &[u32]) -> Result<(), Error> {
        if arcs.len() < 2 {
            return Err(Error::InvalidValue);
        }
        let mut tmp = [0u8; 32];
        let mut n = 0usize;
        let first = arcs[0] * 40 + arcs[1];
        n += encode_base128(first, &mut tmp[n..]).ok_or(Error::Overflow)?;
        for &arc in &arcs[2..] {
            n += encode_base128(arc, &mut tmp[n..]).ok_or(Error::Overflow)?;
        }
        self.leaf(TAG_OID, &tmp[..n])
    }

    pub fn add_utf8_string(&mut self, s: &str) -> Result<(), Error> {
        self.leaf(TAG_UTF8_STRING, s.as_bytes())
    }

    pub fn add_printable_string(&mut self, s: &str) -> Result<(), Error> {
        self.leaf(TAG_PRINTABLE_STRING, s.as_bytes())
    }

    /// `time` must already be formatted as `YYMMDDHHMMSSZ` (13 ASCII bytes).
    pub fn add_utc_time(&mut self, time: &[u8; 13]) -> Result<(), Error> {
        self.leaf(TAG_UTC_TIME, time)
    }

    pub fn add_octet_string(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.leaf(TAG_OCTET_STRING, bytes)
    }

    /// Primitive BIT STRING holding a raw byte string with no unused bits
    /// (e.g. an uncompressed SEC1 EC point). Use [`start`]/[`end_bit_string`]
    /// instead when the content is itself nested DER.
    pub fn add_bit_string(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.add_bit_string_with_unused(0, bytes)
    }

    /// Primitive BIT STRING with an explicit unused-bits count in the last
    /// content octet (e.g. a KeyUsage mask that doesn't fill a whole byte).
    pub fn add_bit_string_with_unused(
        &mut self,
        unused: u8,
        bytes: &[u8],
    ) -> Result<(), Error> {
        let mut len_bytes = [0u8; 5];
        let len_width = encode_length(bytes.len() + 1, &mut len_bytes);
        self.push_raw(&[TAG_BIT_STRING])?;
        self.push_raw(&len_bytes[..len_width])?;
        self.push_raw(&[unused])?;
        self.push_raw(bytes)
    }

    /// A primitive value tagged `[n]` IMPLICIT (context-specific class, not
    /// constructed) carrying `bytes` verbatim, e.g. `[0] IMPLICIT OCTET
    /// STRING` in AuthorityKeyIdentifier.
    pub fn add_context_primitive(
        &mut self,
        n: u8,
        bytes: &[u8],
    ) -> Result<(), Error> {
        self.leaf(0x80 | n, bytes)
    }

    /// Appends already-DER-encoded bytes verbatim, with no tag/length
    /// wrapper of their own. Used to splice a previously built TBS structure
    /// into an enclosing `Certificate` SEQUENCE.
    pub fn add_raw(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.push_raw(bytes)
    }
}

fn encode_length(len: usize, out: &mut [u8; 5]) -> usize {
    if len < 0x80 {
        out[0] = len as u8;
        1
    } else {
        let be = (len as u32).to_be_bytes();
        let first_nonzero = be.iter().position(|&b| b != 0).unwrap_or(3);
        let width = 4 - first_nonzero;
        out[0] = 0x80 | width as u8;
        out[1..1 + width].copy_from_slice(&be[first_nonzero..]);
        1 + width
    }
}

/// Base-128 (7 bits/byte, MSB continuation) encoding of a single OID arc.
fn encode_base128(mut value: u32, out: &mut [u8]) -> Option<usize> {
    let mut tmp = [0u8; 5];
    let mut n = 0;
    tmp[n] = (value & 0x7f) as u8;
    n += 1;
    value >>= 7;
    while value != 0 {
        tmp[n] = ((value & 0x7f) as u8) | 0x80;
        n += 1;
        value >>= 7;
    }
    if n > out.len() {
        return None;
    }
    for i in 0..n {
        out[i] = tmp[n - 1 - i];
    }
    Some(n)
}

/// Verifies the builder has no unclosed frames; call once a structure is
/// believed to be complete.
pub fn finish(builder: &DerBuilder<'_>) -> Result<(), Error> {
    if builder.nesting_depth() == 0 {
        Ok(())
    } else {
        Err(Error::UnbalancedNesting)
    }
}

/// Writes `der` as a PEM block labeled `BEGIN/END {label}` into `out`,
/// wrapping the base64 body to 64 columns. Returns the number of bytes
/// written.
pub fn write_pem(out: &mut [u8], der: &[u8], label: &str) -> Result<usize, Error> {
    let mut n = 0;
    n += write_all(out, n, b"-----BEGIN ")?;
    n += write_all(out, n, label.as_bytes())?;
    n += write_all(out, n, b"-----\n")?;

    let b64_len = (der.len() + 2) / 3 * 4;
    if n + b64_len + b64_len / 64 + 2 > out.len() {
        return Err(Error::Overflow);
    }
    let mut b64 = [0u8; 4096];
    if b64_len > b64.len() {
        return Err(Error::Overflow);
    }
    let written = STANDARD
        .encode_slice(der, &mut b64[..b64_len])
        .map_err(|_| Error::Overflow)?;
    debug_assert_eq!(written, b64_len);

    let mut col = 0;
    let mut i = 0;
    while i < written {
        let chunk_end = core::cmp::min(i + 64, written);
        n += write_all(out, n, &b64[i..chunk_end])?;
        n += write_all(out, n, b"\n")?;
        col += chunk_end - i;
        i = chunk_end;
    }
    let _ = col;

    n += write_all(out, n, b"-----END ")?;
    n += write_all(out, n, label.as_bytes())?;
    n += write_all(out, n, b"-----\n")?;
    Ok(n)
}

fn write_all(out: &mut [u8], at: usize, bytes: &[u8]) -> Result<usize, Error> {
    let end = at.checked_add(bytes.len()).ok_or(Error::Overflow)?;
    let dst = out.get_mut(at..end).ok_or(Error::Overflow)?;
    dst.copy_from_slice(bytes);
    Ok(bytes.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_of_two_integers_round_trips() {
        let mut buf = [0u8; 64];
        let mut b = DerBuilder::new(&mut buf);
        b.start().unwrap();
        b.add_u32(1).unwrap();
        b.add_u32(300).unwrap();
        b.end(TAG_SEQUENCE).unwrap();
        finish(&b).unwrap();

        assert_eq!(
            b.as_bytes(),
            &[0x30, 0x06, 0x02, 0x01, 0x01, 0x02, 0x02, 0x01, 0x2C]
        );
    }

    #[test]
    fn empty_end_is_an_error() {
        let mut buf = [0u8; 16];
        let mut b = DerBuilder::new(&mut buf);
        assert_eq!(b.end(TAG_SEQUENCE), Err(Error::EmptyNesting));
    }

    #[test]
    fn integer_with_high_bit_gets_padded() {
        let mut buf = [0u8; 16];
        let mut b = DerBuilder::new(&mut buf);
        b.add_integer_bytes(&[0x80]).unwrap();
        assert_eq!(b.as_bytes(), &[0x02, 0x02, 0x00, 0x80]);
    }

    #[test]
    fn integer_strips_redundant_leading_zero() {
        let mut buf = [0u8; 16];
        let mut b = DerBuilder::new(&mut buf);
        b.add_integer_bytes(&[0x00, 0x01]).unwrap();
        assert_eq!(b.as_bytes(), &[0x02, 0x01, 0x01]);
    }

    #[test]
    fn long_form_length_for_large_content() {
        let mut buf = [0u8; 512];
        let mut b = DerBuilder::new(&mut buf);
        b.start().unwrap();
        for _ in 0..60 {
            b.add_octet_string(&[0xAA; 2]).unwrap();
        }
        b.end(TAG_SEQUENCE).unwrap();
        // 60 * 4 = 240 bytes of content, needs long-form length (0x81, 0xF0).
        assert_eq!(&b.as_bytes()[..3], &[0x30, 0x81, 0xF0]);
    }

    #[test]
    fn nested_bit_string_wraps_signature_sequence() {
        let mut buf = [0u8; 64];
        let mut b = DerBuilder::new(&mut buf);
        b.start().unwrap();
        b.start().unwrap();
        b.add_integer_bytes(&[0x01]).unwrap();
        b.add_integer_bytes(&[0x02]).unwrap();
        b.end(TAG_SEQUENCE).unwrap();
        b.end_bit_string().unwrap();
        finish(&b).unwrap();

        // BIT STRING(len=content+1) { 0x00 unused bits, SEQUENCE{INT 1, INT 2} }
        assert_eq!(
            b.as_bytes(),
            &[0x03, 0x07, 0x00, 0x30, 0x04, 0x02, 0x01, 0x01, 0x02, 0x01, 0x02]
        );
    }

    #[test]
    fn oid_encodes_ec_public_key() {
        let mut buf = [0u8; 16];
        let mut b = DerBuilder::new(&mut buf);
        // id-ecPublicKey: 1.2.840.10045.2.1
        b.add_oid(&[1, 2, 840, 10045, 2, 1]).unwrap();
        assert_eq!(
            b.as_bytes(),
            &[0x06, 0x07, 0x2A, 0x86, 0x48, 0xCE, 0x3D, 0x02, 0x01]
        );
    }

    #[test]
    fn pem_round_trip_labels() {
        let der = [0x30, 0x03, 0x02, 0x01, 0x2A];
        let mut out = [0u8; 256];
        let n = write_pem(&mut out, &der, "CERTIFICATE").unwrap();
        let text = core::str::from_utf8(&out[..n]).unwrap();
        assert!(text.starts_with("-----BEGIN CERTIFICATE-----\n"));
        assert!(text.ends_with("-----END CERTIFICATE-----\n"));
    }

    /// Decoding the base64 body back out of a `write_pem` block reproduces
    /// the original DER bytes exactly -- the one direction this crate's
    /// callers actually round-trip (PEM is written once at issuance time
    /// and handed off; nothing on-device ever parses a PEM block back in).
    #[test]
    fn pem_body_base64_decodes_to_original_der() {
        let der: [u8; 32] = core::array::from_fn(|i| i as u8);
        let mut out = [0u8; 256];
        let n = write_pem(&mut out, &der, "CERTIFICATE").unwrap();
        let text = core::str::from_utf8(&out[..n]).unwrap();

        let body: String = text
            .lines()
            .filter(|line| !line.starts_with("-----"))
            .collect();

        let mut decoded = [0u8; 64];
        let decoded_len = STANDARD.decode_slice(body.as_bytes(), &mut decoded).unwrap();
        assert_eq!(&decoded[..decoded_len], &der[..]);
    }
}
