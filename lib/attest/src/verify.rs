// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `AgentVerifier`: the per-boot measure-verify-attest state machine.
//!
//! States are modeled as a straight-line `Result`-chain through
//! [`AgentVerifier::run`] rather than as an explicit state enum -- there is
//! no branching back to an earlier state and no concurrent instance, so a
//! state struct would only add indirection that a plain `?`-chain, in the
//! style of `stage0::attest::validate_image`, doesn't need. Each transition
//! still logs to the ring buffer.

use agent_image::{
    measure_agent_code, signed_region, AgentHeader, FwCacheImage,
    IssuedCertsImage, MeasureError, StoredPem,
};
use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use dice::{
    derive_keypair, derive_serial, export_public_key, hash, sign, Cdi, CdiL1,
    DerivedKey, SeedBuf,
};
use dice_x509::{RawSignature, UtcTime};
use heapless::String;
use persistent_store::{
    CertStore, CertStoreError, FlashDevice, IssuedCertsFlags, Layout,
    PersistentStore, Slot,
};
use ringbuf::{ringbuf, ringbuf_entry};
use sha2::Sha256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trace {
    None,
    Start,
    Measured,
    DigestMismatch,
    AuthSkipped,
    AuthVerified,
    AuthFailed,
    RollbackDetected,
    CacheHit,
    CacheRefreshed,
    Assembled,
}

ringbuf!(Trace, 32, Trace::None);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyError {
    /// `hdr.magic`/`hdr.version` failed the `Start` guard.
    MalformedHeader,
    /// `codeBase` did not equal `&hdr + hdr.size`.
    CodeBaseMismatch,
    Measure(MeasureError),
    /// `hdr.agent.digest` did not match the measured digest.
    DigestMismatch,
    /// An author signature was required and did not verify.
    AuthInvalid,
    Crypto,
    Der,
    Flash,
    CertStore(CertStoreError),
}

impl From<MeasureError> for VerifyError {
    fn from(e: MeasureError) -> Self {
        VerifyError::Measure(e)
    }
}

impl From<dice::CryptoError> for VerifyError {
    fn from(_: dice::CryptoError) -> Self {
        VerifyError::Crypto
    }
}

impl From<dice_x509::Error> for VerifyError {
    fn from(_: dice_x509::Error) -> Self {
        VerifyError::Der
    }
}

impl From<CertStoreError> for VerifyError {
    fn from(e: CertStoreError) -> Self {
        VerifyError::CertStore(e)
    }
}

/// Everything `AgentVerifier` hands back to the loader: the assembled
/// agent-visible certificate chain, the compound key pair to copy into the
/// firewalled `CompoundId` region, and the policy-event flags the loader logs
/// but does not act on (rollback is report-only by default).
pub struct VerifierOutcome<const CAP: usize> {
    pub cert_store: CertStore<CAP>,
    pub compound_pubkey: [u8; 65],
    pub compound_privkey: [u8; 32],
    pub rollback_detected: bool,
    pub cache_refreshed: bool,
}

/// Derives a device-unique pseudo-GUID, `base64(SHA256(deviceIdPub))[:22]`,
/// standing in for a `"*"` alias subject common name.
fn device_unique_cn(device_pub: &[u8; 65]) -> String<32> {
    let digest = hash(device_pub);
    let mut raw = [0u8; 44];
    let n = STANDARD_NO_PAD.encode_slice(digest, &mut raw).unwrap_or(0);
    let encoded = core::str::from_utf8(&raw[..n]).unwrap_or("");
    let mut out = String::<32>::new();
    let _ = out.push_str(&encoded[..22.min(encoded.len())]);
    out
}

pub struct AgentVerifier;

impl AgentVerifier {
    /// Runs the full per-boot state machine. `header_bytes` is the raw
    /// `AgentHdr` region; `code` is the `AgentCode` region starting at
    /// `code_base`, sized at least `hdr.agent.size`.
    #[allow(clippy::too_many_arguments)]
    pub fn run<F: FlashDevice, const CAP: usize>(
        store: &mut PersistentStore<F>,
        layout: &Layout,
        header_bytes: &[u8],
        code_base: u32,
        code: &[u8],
        device_pub: &[u8; 65],
        device_priv: &[u8; 32],
        issued_certs: &IssuedCertsImage,
        cache: &FwCacheImage,
        not_before: &UtcTime,
        not_after: &UtcTime,
        device_cn: &str,
        alias_cn: &str,
    ) -> Result<VerifierOutcome<CAP>, VerifyError> {
        ringbuf_entry!(Trace::Start);

        // -- Start --
        let hdr = AgentHeader::read_from(header_bytes)
            .filter(AgentHeader::well_formed)
            .ok_or(VerifyError::MalformedHeader)?;

        // -- Measure --
        if code_base != layout.agent_hdr.base + hdr.code_offset() {
            return Err(VerifyError::CodeBaseMismatch);
        }
        let digest =
            measure_agent_code(store.flash(), code_base, code, hdr.agent.size)?;
        ringbuf_entry!(Trace::Measured);

        // -- CheckDigest --
        if digest != hdr.agent.digest {
            ringbuf_entry!(Trace::DigestMismatch);
            return Err(VerifyError::DigestMismatch);
        }
        let header_digest = hash(signed_region(header_bytes));

        // -- MaybeAuth --
        let flags = issued_certs.flags();
        let auth_required = flags.contains(IssuedCertsFlags::PROVISIONED)
            && flags.contains(IssuedCertsFlags::AUTHENTICATED_BOOT)
            && issued_certs.code_auth_pubkey_present;
        if auth_required {
            let sig = dice::Signature {
                r: hdr.signature.r,
                s: hdr.signature.s,
            };
            match dice::verify(&issued_certs.code_auth_pubkey, &header_digest, &sig)
            {
                Ok(()) => ringbuf_entry!(Trace::AuthVerified),
                Err(_) => {
                    ringbuf_entry!(Trace::AuthFailed);
                    return Err(VerifyError::AuthInvalid);
                }
            }
        } else {
            ringbuf_entry!(Trace::AuthSkipped);
        }

        // -- Compound: rollback check (report-only by default) --
        let rollback_detected = cache.is_provisioned()
            && (cache.last_version >= hdr.agent.version
                || cache.last_issued >= hdr.agent.issued);
        if rollback_detected {
            ringbuf_entry!(Trace::RollbackDetected);
        }

        let needs_refresh =
            !cache.is_provisioned() || header_digest != cache.agent_hdr_digest;

        let (compound_pub, compound_priv, alias_pem, cache_refreshed) =
            if needs_refresh {
                let (pub_, priv_, pem) = Self::refresh_cache(
                    store,
                    layout,
                    &header_digest,
                    device_pub,
                    device_priv,
                    &hdr,
                    not_before,
                    not_after,
                    device_cn,
                    alias_cn,
                )?;
                ringbuf_entry!(Trace::CacheRefreshed);
                (pub_, priv_, pem, true)
            } else {
                ringbuf_entry!(Trace::CacheHit);
                (
                    cache.compound_pubkey,
                    cache.compound_privkey,
                    cache.alias_cert.clone(),
                    false,
                )
            };

        // -- Assemble --
        let mut cert_store = CertStore::<CAP>::new();
        if issued_certs.root_cert.is_populated() {
            cert_store.append(Slot::Root, issued_certs.root_cert.as_slice())?;
        }
        if issued_certs.device_cert.is_populated() {
            cert_store
                .append(Slot::Device, issued_certs.device_cert.as_slice())?;
        }
        cert_store.append(Slot::Loader, alias_pem.as_slice())?;
        ringbuf_entry!(Trace::Assembled);

        Ok(VerifierOutcome {
            cert_store,
            compound_pubkey: compound_pub,
            compound_privkey: compound_priv,
            rollback_detected,
            cache_refreshed,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn refresh_cache<F: FlashDevice>(
        store: &mut PersistentStore<F>,
        layout: &Layout,
        header_digest: &[u8; 32],
        device_pub: &[u8; 65],
        device_priv: &[u8; 32],
        hdr: &AgentHeader,
        not_before: &UtcTime,
        not_after: &UtcTime,
        device_cn: &str,
        alias_cn: &str,
    ) -> Result<([u8; 65], [u8; 32], StoredPem), VerifyError> {
        // The device's persisted private scalar stands in for the CDI on
        // every boot after the one that minted it -- the true hardware CDI
        // is never itself persisted.
        let cdi = Cdi::new(*device_priv);
        let cdi_l1 = CdiL1::new(&cdi, header_digest);
        let compound_okm = DerivedKey::alias(&cdi_l1);
        let (compound_signing, compound_verifying) =
            derive_keypair(compound_okm.as_bytes())?;
        let compound_pub = export_public_key(&compound_verifying);
        let mut compound_priv = [0u8; 32];
        compound_priv.copy_from_slice(&compound_signing.to_bytes());

        let (device_signing, _) = derive_keypair(device_priv)?;

        let subject_cn_buf;
        let subject_cn = if alias_cn == "*" {
            subject_cn_buf = device_unique_cn(device_pub);
            subject_cn_buf.as_str()
        } else {
            alias_cn
        };

        let serial = derive_serial(&compound_pub);
        let curve = crate::curve::active();
        let mut tbs_buf = [0u8; 700];
        let tbs_len = dice_x509::build_alias_tbs(
            &mut tbs_buf,
            curve,
            &serial,
            device_cn,
            subject_cn,
            not_before,
            not_after,
            &compound_pub,
            device_pub,
            &hdr.agent.digest,
        )?;

        let digest = hash(&tbs_buf[..tbs_len]);
        let sig = sign(&device_signing, &digest);

        let mut cert_buf = [0u8; 900];
        let cert_len = dice_x509::wrap_signed(
            &mut cert_buf,
            curve,
            &tbs_buf[..tbs_len],
            &RawSignature { r: &sig.r, s: &sig.s },
        )?;

        let mut pem_buf = [0u8; 1024];
        let pem_len =
            dice_der::write_pem(&mut pem_buf, &cert_buf[..cert_len], "CERTIFICATE")
                .map_err(|_| VerifyError::Der)?;
        let alias_pem = StoredPem::from_pem(&pem_buf[..pem_len])
            .ok_or(VerifyError::Der)?;

        let cache_image = FwCacheImage {
            magic: agent_image::MAGIC,
            compound_pubkey: compound_pub,
            compound_privkey: compound_priv,
            agent_hdr_digest: *header_digest,
            last_version: hdr.agent.version,
            last_issued: hdr.agent.issued,
            alias_cert: alias_pem.clone(),
        };
        let mut buf = [0u8; FwCacheImage::MAX_SIZE];
        let n = hubpack::serialize(&mut buf, &cache_image)
            .map_err(|_| VerifyError::Flash)?;
        store
            .write_region(layout.fw_cache.base, &buf[..n])
            .map_err(|_| VerifyError::Flash)?;

        Ok((compound_pub, compound_priv, alias_pem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_image::{
        AgentInfo, AgentSignature, AGENT_NAME_LEN, SIGNED_REGION_LEN,
    };
    use persistent_store::Region;
    use sha2::Digest;
    use zerocopy::IntoBytes;

    struct FakeFlash {
        mem: [u8; 16384],
    }

    impl FakeFlash {
        fn new() -> Self {
            Self { mem: [0xFFu8; 16384] }
        }
    }

    impl FlashDevice for FakeFlash {
        type Error = ();
        const PAGE_SIZE: u32 = 512;

        fn erase(&mut self, addr: u32, len: u32) -> Result<(), ()> {
            let (addr, len) = (addr as usize, len as usize);
            self.mem[addr..addr + len].fill(0xFF);
            Ok(())
        }

        fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), ()> {
            let addr = addr as usize;
            self.mem[addr..addr + data.len()].copy_from_slice(data);
            Ok(())
        }

        fn is_programmed(&self, _addr: u32, _len: u32) -> bool {
            true
        }
    }

    fn layout() -> Layout {
        // `FwCacheImage` serializes at a fixed ~1.2 KiB (its embedded
        // `StoredPem` is a full `STORED_PEM_CAP`-sized `BigArray` regardless
        // of how much of it is populated), so `fw_cache` needs more
        // headroom than a naive per-field estimate would suggest.
        Layout {
            agent_hdr: Region::new(0, 512),
            agent_code: Region::new(512, 4096),
            issued_certs: Region::new(4608, 2048),
            fw_device_id: Region::new(6656, 512),
            fw_cache: Region::new(7168, 2048),
        }
    }

    fn device_keys() -> ([u8; 65], [u8; 32]) {
        let seed = [0x11u8; 32];
        let (_, verifying) = derive_keypair(&seed).unwrap();
        (export_public_key(&verifying), seed)
    }

    fn make_header(code: &[u8], version: u32, issued: u32) -> [u8; 512] {
        let digest: [u8; 32] = Sha256::digest(code).into();
        make_header_with_digest(code.len() as u32, digest, version, issued)
    }

    fn make_header_with_digest(
        code_len: u32,
        digest: [u8; 32],
        version: u32,
        issued: u32,
    ) -> [u8; 512] {
        let hdr = AgentHeader {
            magic: agent_image::MAGIC,
            version: 1,
            size: 512,
            agent: AgentInfo {
                name: [0u8; AGENT_NAME_LEN],
                version,
                issued,
                size: code_len,
                digest,
            },
            signature: AgentSignature {
                r: [0u8; 32],
                s: [0u8; 32],
            },
        };
        let mut out = [0u8; 512];
        let bytes = hdr.as_bytes();
        out[..bytes.len()].copy_from_slice(bytes);
        out
    }

    /// Builds a 512-byte header signed by `author_signing` over
    /// `signed_region`, the way an authenticated-boot image signer would.
    fn make_authenticated_header(
        code: &[u8],
        version: u32,
        issued: u32,
        author_signing: &p256::ecdsa::SigningKey,
    ) -> [u8; 512] {
        let unsigned = make_header(code, version, issued);
        let digest = hash(signed_region(&unsigned));
        let sig = sign(author_signing, &digest);
        let mut hdr = AgentHeader::read_from(&unsigned).unwrap();
        hdr.signature = AgentSignature { r: sig.r, s: sig.s };
        let mut out = [0u8; 512];
        out[..core::mem::size_of::<AgentHeader>()].copy_from_slice(hdr.as_bytes());
        out
    }

    fn issued_certs_with_auth(code_auth_pubkey: [u8; 65]) -> IssuedCertsImage {
        IssuedCertsImage {
            magic: agent_image::MAGIC,
            flags: (IssuedCertsFlags::PROVISIONED
                | IssuedCertsFlags::AUTHENTICATED_BOOT)
                .bits(),
            code_auth_pubkey,
            code_auth_pubkey_present: true,
            root_cert: StoredPem::empty(),
            device_cert: StoredPem::from_pem(b"-----BEGIN CERTIFICATE-----\nunit\n-----END CERTIFICATE-----\n")
                .unwrap(),
        }
    }

    fn issued_certs_no_auth() -> IssuedCertsImage {
        IssuedCertsImage {
            magic: agent_image::MAGIC,
            flags: IssuedCertsFlags::PROVISIONED.bits(),
            code_auth_pubkey: [0u8; 65],
            code_auth_pubkey_present: false,
            root_cert: StoredPem::empty(),
            device_cert: StoredPem::from_pem(b"-----BEGIN CERTIFICATE-----\nunit\n-----END CERTIFICATE-----\n")
                .unwrap(),
        }
    }

    fn blank_cache() -> FwCacheImage {
        FwCacheImage {
            magic: 0,
            compound_pubkey: [0u8; 65],
            compound_privkey: [0u8; 32],
            agent_hdr_digest: [0u8; 32],
            last_version: 0,
            last_issued: 0,
            alias_cert: StoredPem::empty(),
        }
    }

    const NOT_BEFORE: UtcTime = *b"260101000000Z";
    const NOT_AFTER: UtcTime = *b"360101000000Z";

    #[test]
    fn first_boot_refreshes_cache_and_assembles_chain() {
        let (device_pub, device_priv) = device_keys();
        let code = [0x42u8; 900];
        let header = make_header(&code, 1, 100);
        let mut store = PersistentStore::new(FakeFlash::new(), layout());
        let layout = layout();
        let issued = issued_certs_no_auth();

        let outcome = AgentVerifier::run::<_, 4096>(
            &mut store,
            &layout,
            &header,
            512,
            &code,
            &device_pub,
            &device_priv,
            &issued,
            &blank_cache(),
            &NOT_BEFORE,
            &NOT_AFTER,
            "unit-device",
            "unit-alias",
        )
        .unwrap();

        assert!(outcome.cache_refreshed);
        assert!(!outcome.rollback_detected);
        assert!(outcome.cert_store.slot(Slot::Device).is_some());
        assert!(outcome.cert_store.slot(Slot::Loader).is_some());
        assert!(outcome.cert_store.slot(Slot::Root).is_none());
    }

    #[test]
    fn repeat_boot_same_digest_hits_cache_byte_identical() {
        let (device_pub, device_priv) = device_keys();
        let code = [0x42u8; 900];
        let header = make_header(&code, 1, 100);
        let mut store = PersistentStore::new(FakeFlash::new(), layout());
        let layout = layout();
        let issued = issued_certs_no_auth();

        let first = AgentVerifier::run::<_, 4096>(
            &mut store, &layout, &header, 512, &code, &device_pub,
            &device_priv, &issued, &blank_cache(), &NOT_BEFORE, &NOT_AFTER,
            "unit-device", "unit-alias",
        )
        .unwrap();

        let mut raw = [0u8; 1024];
        raw.copy_from_slice(
            &store.flash().mem[layout.fw_cache.base as usize
                ..layout.fw_cache.base as usize + 1024],
        );
        let (cache, _): (FwCacheImage, _) = hubpack::deserialize(&raw).unwrap();

        let second = AgentVerifier::run::<_, 4096>(
            &mut store, &layout, &header, 512, &code, &device_pub,
            &device_priv, &issued, &cache, &NOT_BEFORE, &NOT_AFTER,
            "unit-device", "unit-alias",
        )
        .unwrap();

        assert!(!second.cache_refreshed);
        assert_eq!(first.cert_store.bytes(), second.cert_store.bytes());
        assert_eq!(first.compound_pubkey, second.compound_pubkey);
    }

    #[test]
    fn digest_change_derives_new_compound_key() {
        let (device_pub, device_priv) = device_keys();
        let code_a = [0x42u8; 900];
        let header_a = make_header(&code_a, 1, 100);
        let mut store = PersistentStore::new(FakeFlash::new(), layout());
        let layout = layout();
        let issued = issued_certs_no_auth();

        let first = AgentVerifier::run::<_, 4096>(
            &mut store, &layout, &header_a, 512, &code_a, &device_pub,
            &device_priv, &issued, &blank_cache(), &NOT_BEFORE, &NOT_AFTER,
            "unit-device", "unit-alias",
        )
        .unwrap();

        let mut raw = [0u8; 1024];
        raw.copy_from_slice(
            &store.flash().mem[layout.fw_cache.base as usize
                ..layout.fw_cache.base as usize + 1024],
        );
        let (cache, _): (FwCacheImage, _) = hubpack::deserialize(&raw).unwrap();

        let code_b = [0x99u8; 900];
        let header_b = make_header(&code_b, 2, 200);
        let second = AgentVerifier::run::<_, 4096>(
            &mut store, &layout, &header_b, 512, &code_b, &device_pub,
            &device_priv, &issued, &cache, &NOT_BEFORE, &NOT_AFTER,
            "unit-device", "unit-alias",
        )
        .unwrap();

        assert!(second.cache_refreshed);
        assert_ne!(first.compound_pubkey, second.compound_pubkey);
    }

    #[test]
    fn header_digest_mismatch_aborts_before_assembly() {
        let (device_pub, device_priv) = device_keys();
        let code = [0x42u8; 900];
        let header = make_header_with_digest(900, [0u8; 32], 1, 100);
        let mut store = PersistentStore::new(FakeFlash::new(), layout());
        let layout = layout();
        let issued = issued_certs_no_auth();

        let err = AgentVerifier::run::<_, 4096>(
            &mut store, &layout, &header, 512, &code, &device_pub,
            &device_priv, &issued, &blank_cache(), &NOT_BEFORE, &NOT_AFTER,
            "unit-device", "unit-alias",
        )
        .unwrap_err();

        assert_eq!(err, VerifyError::DigestMismatch);
    }

    #[test]
    fn rollback_is_reported_but_not_fatal() {
        let (device_pub, device_priv) = device_keys();
        let code = [0x77u8; 900];
        let header = make_header(&code, 4, 50);
        let mut store = PersistentStore::new(FakeFlash::new(), layout());
        let layout = layout();
        let issued = issued_certs_no_auth();

        let mut cache = blank_cache();
        cache.magic = agent_image::MAGIC;
        cache.last_version = 5;
        cache.last_issued = 200;
        cache.agent_hdr_digest = [0xAA; 32]; // force a cache miss too

        let outcome = AgentVerifier::run::<_, 4096>(
            &mut store, &layout, &header, 512, &code, &device_pub,
            &device_priv, &issued, &cache, &NOT_BEFORE, &NOT_AFTER,
            "unit-device", "unit-alias",
        )
        .unwrap();

        assert!(outcome.rollback_detected);
    }

    #[test]
    fn valid_author_signature_allows_alias_issuance() {
        let (device_pub, device_priv) = device_keys();
        let code = [0x55u8; 900];
        let author_seed = [0x22u8; 32];
        let (author_signing, author_verifying) =
            derive_keypair(&author_seed).unwrap();
        let author_pub = export_public_key(&author_verifying);
        let header = make_authenticated_header(&code, 1, 100, &author_signing);
        let mut store = PersistentStore::new(FakeFlash::new(), layout());
        let layout = layout();
        let issued = issued_certs_with_auth(author_pub);

        let outcome = AgentVerifier::run::<_, 4096>(
            &mut store, &layout, &header, 512, &code, &device_pub,
            &device_priv, &issued, &blank_cache(), &NOT_BEFORE, &NOT_AFTER,
            "unit-device", "unit-alias",
        )
        .unwrap();

        assert!(outcome.cache_refreshed);
        assert!(outcome.cert_store.slot(Slot::Loader).is_some());
    }

    #[test]
    fn flipped_author_signature_aborts_at_maybe_auth() {
        let (device_pub, device_priv) = device_keys();
        let code = [0x55u8; 900];
        let author_seed = [0x23u8; 32];
        let (author_signing, author_verifying) =
            derive_keypair(&author_seed).unwrap();
        let author_pub = export_public_key(&author_verifying);
        let mut header = make_authenticated_header(&code, 1, 100, &author_signing);
        header[SIGNED_REGION_LEN] ^= 0xFF;
        let mut store = PersistentStore::new(FakeFlash::new(), layout());
        let layout = layout();
        let issued = issued_certs_with_auth(author_pub);

        let err = AgentVerifier::run::<_, 4096>(
            &mut store, &layout, &header, 512, &code, &device_pub,
            &device_priv, &issued, &blank_cache(), &NOT_BEFORE, &NOT_AFTER,
            "unit-device", "unit-alias",
        )
        .unwrap_err();

        assert_eq!(err, VerifyError::AuthInvalid);
    }
}
