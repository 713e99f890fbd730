// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `IdentityProvisioner`: first-boot device key generation and
//! self-signed device certificate issuance.

use agent_image::{FwDeviceIdImage, IssuedCertsImage, StoredPem};
use dice::{
    derive_keypair, derive_serial, export_public_key, hash, sign, Cdi,
    DerivedKey, SeedBuf,
};
use dice_x509::{RawSignature, UtcTime};
use persistent_store::{FlashDevice, IssuedCertsFlags, Layout, PersistentStore};

/// The hardware RNG collaborator. A concrete implementation wraps the
/// target's TRNG peripheral the way `lpc55-puf::Puf` wraps `PUF`; tests
/// substitute a fixed byte source.
pub trait EntropySource {
    type Error;
    fn fill(&mut self, out: &mut [u8]) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionError {
    Rng,
    Crypto,
    Der,
    Flash,
}

impl From<dice::CryptoError> for ProvisionError {
    fn from(_: dice::CryptoError) -> Self {
        ProvisionError::Crypto
    }
}

impl From<dice_x509::Error> for ProvisionError {
    fn from(_: dice_x509::Error) -> Self {
        ProvisionError::Der
    }
}

/// Runs the one-time identity provisioning flow. A no-op (returns `Ok(())`
/// immediately) once `FwDeviceId.magic == MAGIC`.
pub struct IdentityProvisioner;

impl IdentityProvisioner {
    #[allow(clippy::too_many_arguments)]
    pub fn run<F: FlashDevice, R: EntropySource>(
        store: &mut PersistentStore<F>,
        layout: &Layout,
        rng: &mut R,
        device_id_provisioned: bool,
        issued_certs_provisioned: bool,
        not_before: &UtcTime,
        not_after: &UtcTime,
        device_cn: &str,
    ) -> Result<bool, ProvisionError> {
        if device_id_provisioned {
            return Ok(false);
        }

        let mut seed = [0u8; dice::SEED_LENGTH];
        rng.fill(&mut seed).map_err(|_| ProvisionError::Rng)?;
        let cdi = Cdi::new(seed);
        let identity_okm = DerivedKey::from_cdi(&cdi, b"Identity");
        let (signing_key, verifying_key) =
            derive_keypair(identity_okm.as_bytes())?;
        let device_pub = export_public_key(&verifying_key);
        let mut device_priv = [0u8; 32];
        device_priv.copy_from_slice(&signing_key.to_bytes());

        let device_id_image = FwDeviceIdImage::new(device_pub, device_priv);
        let mut buf = [0u8; FwDeviceIdImage::MAX_SIZE];
        let n = hubpack::serialize(&mut buf, &device_id_image)
            .map_err(|_| ProvisionError::Flash)?;
        store
            .write_region(layout.fw_device_id.base, &buf[..n])
            .map_err(|_| ProvisionError::Flash)?;

        if !issued_certs_provisioned {
            self::issue_device_cert(
                store, layout, &signing_key, &device_pub, not_before,
                not_after, device_cn,
            )?;
        }

        Ok(true)
    }
}

fn issue_device_cert<F: FlashDevice>(
    store: &mut PersistentStore<F>,
    layout: &Layout,
    signing_key: &p256::ecdsa::SigningKey,
    device_pub: &[u8; 65],
    not_before: &UtcTime,
    not_after: &UtcTime,
    device_cn: &str,
) -> Result<(), ProvisionError> {
    let serial = derive_serial(device_pub);
    let curve = crate::curve::active();

    let mut tbs_buf = [0u8; 512];
    let tbs_len = dice_x509::build_device_tbs(
        &mut tbs_buf,
        curve,
        &serial,
        device_cn,
        device_cn,
        not_before,
        not_after,
        device_pub,
        None,
    )?;

    let digest = hash(&tbs_buf[..tbs_len]);
    let sig = sign(signing_key, &digest);

    let mut cert_buf = [0u8; 700];
    let cert_len = dice_x509::wrap_signed(
        &mut cert_buf,
        curve,
        &tbs_buf[..tbs_len],
        &RawSignature { r: &sig.r, s: &sig.s },
    )?;

    let mut pem_buf = [0u8; 1024];
    let pem_len = dice_der::write_pem(&mut pem_buf, &cert_buf[..cert_len], "CERTIFICATE")
        .map_err(|_| ProvisionError::Der)?;

    let device_cert = StoredPem::from_pem(&pem_buf[..pem_len])
        .ok_or(ProvisionError::Der)?;

    let image = IssuedCertsImage {
        magic: agent_image::MAGIC,
        flags: IssuedCertsFlags::PROVISIONED.bits(),
        code_auth_pubkey: [0u8; 65],
        code_auth_pubkey_present: false,
        root_cert: StoredPem::empty(),
        device_cert,
    };
    let mut buf = [0u8; IssuedCertsImage::MAX_SIZE];
    let n = hubpack::serialize(&mut buf, &image).map_err(|_| ProvisionError::Flash)?;
    store
        .write_region(layout.issued_certs.base, &buf[..n])
        .map_err(|_| ProvisionError::Flash)
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_image::MAGIC;
    use persistent_store::Region;

    struct FakeFlash {
        mem: [u8; 16384],
        programmed: [bool; 16384],
    }

    impl FakeFlash {
        fn new() -> Self {
            Self {
                mem: [0xFFu8; 16384],
                programmed: [false; 16384],
            }
        }
    }

    impl FlashDevice for FakeFlash {
        type Error = ();
        const PAGE_SIZE: u32 = 512;

        fn erase(&mut self, addr: u32, len: u32) -> Result<(), ()> {
            let (addr, len) = (addr as usize, len as usize);
            self.mem[addr..addr + len].fill(0xFF);
            self.programmed[addr..addr + len].fill(false);
            Ok(())
        }

        fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), ()> {
            let addr = addr as usize;
            self.mem[addr..addr + data.len()].copy_from_slice(data);
            self.programmed[addr..addr + data.len()].fill(true);
            Ok(())
        }

        fn is_programmed(&self, addr: u32, len: u32) -> bool {
            let (addr, len) = (addr as usize, len as usize);
            self.programmed[addr..addr + len].iter().all(|&p| p)
        }
    }

    struct FixedRng(u8);
    impl EntropySource for FixedRng {
        type Error = ();
        fn fill(&mut self, out: &mut [u8]) -> Result<(), ()> {
            out.fill(self.0);
            Ok(())
        }
    }

    fn layout() -> Layout {
        // `IssuedCertsImage` serializes at a fixed ~2.1 KiB (two
        // `StoredPem`s, each a full `STORED_PEM_CAP`-sized `BigArray`
        // regardless of how much of it is populated), so its region needs
        // more headroom than a naive per-field estimate would suggest.
        Layout {
            agent_hdr: Region::new(0, 512),
            agent_code: Region::new(512, 4096),
            issued_certs: Region::new(4608, 4096),
            fw_device_id: Region::new(8704, 512),
            fw_cache: Region::new(9216, 1024),
        }
    }

    #[test]
    fn provisions_device_key_and_cert_on_blank_device() {
        let mut store = PersistentStore::new(FakeFlash::new(), layout());
        let layout = layout();
        let mut rng = FixedRng(0x37);
        let did = IdentityProvisioner::run(
            &mut store,
            &layout,
            &mut rng,
            false,
            false,
            b"260101000000Z",
            b"360101000000Z",
            "unit-device",
        )
        .unwrap();
        assert!(did);

        let mut raw = [0u8; 512];
        raw.copy_from_slice(
            &store.flash().mem[layout.fw_device_id.base as usize
                ..layout.fw_device_id.base as usize + 512],
        );
        let (decoded, _): (FwDeviceIdImage, _) =
            hubpack::deserialize(&raw).unwrap();
        assert_eq!(decoded.magic, MAGIC);

        let mut raw = [0u8; 4096];
        raw.copy_from_slice(
            &store.flash().mem[layout.issued_certs.base as usize
                ..layout.issued_certs.base as usize + 4096],
        );
        let (certs, _): (IssuedCertsImage, _) =
            hubpack::deserialize(&raw).unwrap();
        assert!(certs.device_cert.is_populated());
    }

    #[test]
    fn already_provisioned_is_a_no_op() {
        let mut store = PersistentStore::new(FakeFlash::new(), layout());
        let layout = layout();
        let mut rng = FixedRng(0x11);
        let did = IdentityProvisioner::run(
            &mut store,
            &layout,
            &mut rng,
            true,
            true,
            b"260101000000Z",
            b"360101000000Z",
            "unit-device",
        )
        .unwrap();
        assert!(!did);
    }
}
