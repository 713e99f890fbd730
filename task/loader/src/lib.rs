// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `Boot`: the single object that owns the whole measured-boot sequence --
//! an idiomatic reimplementation models it as a value owned by a top-level
//! object whose sole method is `run()`.
//!
//! `Boot::run` threads `provision -> verify -> seal` through one
//! `Result`-chain, composing the narrow per-crate errors of
//! [`attest`], [`persistent_store`] and [`security_gate`] into [`BootError`].

#![cfg_attr(not(test), no_std)]

use agent_image::{FwCacheImage, FwDeviceIdImage, IssuedCertsImage, MeasureError};
use attest::{AgentVerifier, EntropySource, IdentityProvisioner, ProvisionError, VerifyError};
use dice_x509::UtcTime;
use persistent_store::{CertStore, CertStoreError, MappedFlash, PersistentStore, Region};
use ringbuf::{ringbuf, ringbuf_entry};
use security_gate::{Firewall, ResetCauseSource, SecurityGate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trace {
    None,
    Provisioned,
    AlreadyProvisioned,
    Sealed,
    BootFailed,
}

ringbuf!(Trace, 16, Trace::None);

/// RNG failure, flash program/erase failure, or firewall activation no-op --
/// unrecoverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareError {
    Rng,
    Flash,
    Firewall,
}

/// A crypto primitive (hash/KDF/derive/sign/verify) returned non-success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CryptoError {
    Primitive,
}

/// Attestation failure: the agent must not receive a valid cert chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityError {
    MalformedHeader,
    CodeBaseMismatch,
    Measure(MeasureError),
    DigestMismatch,
    AuthInvalid,
    /// Only raised under the `rollback-abort` feature; report-only is the
    /// default policy.
    RollbackRejected,
}

/// DER/CertStore buffer overflow -- a programmer/configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityError {
    Der,
    CertStore(CertStoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    Hardware(HardwareError),
    Crypto(CryptoError),
    Integrity(IntegrityError),
    Capacity(CapacityError),
}

impl From<ProvisionError> for BootError {
    fn from(e: ProvisionError) -> Self {
        match e {
            ProvisionError::Rng => BootError::Hardware(HardwareError::Rng),
            ProvisionError::Flash => BootError::Hardware(HardwareError::Flash),
            ProvisionError::Crypto => BootError::Crypto(CryptoError::Primitive),
            ProvisionError::Der => BootError::Capacity(CapacityError::Der),
        }
    }
}

impl From<VerifyError> for BootError {
    fn from(e: VerifyError) -> Self {
        match e {
            VerifyError::MalformedHeader => {
                BootError::Integrity(IntegrityError::MalformedHeader)
            }
            VerifyError::CodeBaseMismatch => {
                BootError::Integrity(IntegrityError::CodeBaseMismatch)
            }
            VerifyError::Measure(m) => {
                BootError::Integrity(IntegrityError::Measure(m))
            }
            VerifyError::DigestMismatch => {
                BootError::Integrity(IntegrityError::DigestMismatch)
            }
            VerifyError::AuthInvalid => {
                BootError::Integrity(IntegrityError::AuthInvalid)
            }
            VerifyError::Crypto => BootError::Crypto(CryptoError::Primitive),
            VerifyError::Der => BootError::Capacity(CapacityError::Der),
            VerifyError::Flash => BootError::Hardware(HardwareError::Flash),
            VerifyError::CertStore(e) => {
                BootError::Capacity(CapacityError::CertStore(e))
            }
        }
    }
}

/// Copy of the compound key pair for this boot, handed off through the
/// firewalled RAM region.
#[derive(Debug, Clone, Copy)]
pub struct CompoundId {
    pub pubkey: [u8; 65],
    pub privkey: [u8; 32],
}

pub struct BootOutcome<const CAP: usize> {
    pub cert_store: CertStore<CAP>,
    pub compound_id: CompoundId,
    pub rollback_detected: bool,
    pub cache_refreshed: bool,
    pub provisioned_this_boot: bool,
}

pub struct Boot;

impl Boot {
    /// Runs the complete sequence: provision (if needed), verify and
    /// attest the agent, then seal the private regions behind the
    /// firewall. `compound_id_region` names the RAM span the caller has
    /// reserved for [`CompoundId`] so it can be included in the same
    /// firewall grant as `FwDeviceId`/`FwCache`.
    #[allow(clippy::too_many_arguments)]
    pub fn run<F, R, FW, RC, const CAP: usize>(
        store: &mut PersistentStore<F>,
        gate: &mut SecurityGate<FW, RC>,
        rng: &mut R,
        compound_id_region: Region,
        header_bytes: &[u8],
        code_base: u32,
        code: &[u8],
        not_before: &UtcTime,
        not_after: &UtcTime,
        device_cn: &str,
        alias_cn: &str,
    ) -> Result<BootOutcome<CAP>, BootError>
    where
        F: MappedFlash,
        R: EntropySource,
        FW: Firewall,
        RC: ResetCauseSource,
    {
        let layout = *store.layout();

        let device_id_provisioned =
            decode::<FwDeviceIdImage>(store.flash().region_bytes(layout.fw_device_id))
                .map(|d| d.is_provisioned())
                .unwrap_or(false);
        let issued_certs_provisioned =
            decode::<IssuedCertsImage>(store.flash().region_bytes(layout.issued_certs))
                .map(|d| d.is_provisioned())
                .unwrap_or(false);

        let provisioned_this_boot = IdentityProvisioner::run(
            store,
            &layout,
            rng,
            device_id_provisioned,
            issued_certs_provisioned,
            not_before,
            not_after,
            device_cn,
        )?;
        ringbuf_entry!(if provisioned_this_boot {
            Trace::Provisioned
        } else {
            Trace::AlreadyProvisioned
        });

        let device_id: FwDeviceIdImage =
            decode(store.flash().region_bytes(layout.fw_device_id))
                .ok_or(BootError::Hardware(HardwareError::Flash))?;
        let issued_certs: IssuedCertsImage =
            decode(store.flash().region_bytes(layout.issued_certs))
                .ok_or(BootError::Hardware(HardwareError::Flash))?;
        let cache: FwCacheImage = decode(store.flash().region_bytes(layout.fw_cache))
            .ok_or(BootError::Hardware(HardwareError::Flash))?;

        let outcome = AgentVerifier::run::<_, CAP>(
            store,
            &layout,
            header_bytes,
            code_base,
            code,
            &device_id.pubkey,
            &device_id.privkey,
            &issued_certs,
            &cache,
            not_before,
            not_after,
            device_cn,
            alias_cn,
        );
        let outcome = match outcome {
            Ok(o) => o,
            Err(e) => {
                ringbuf_entry!(Trace::BootFailed);
                return Err(e.into());
            }
        };

        #[cfg(feature = "rollback-abort")]
        if outcome.rollback_detected {
            ringbuf_entry!(Trace::BootFailed);
            return Err(BootError::Integrity(IntegrityError::RollbackRejected));
        }

        let compound_id = CompoundId {
            pubkey: outcome.compound_pubkey,
            privkey: outcome.compound_privkey,
        };

        gate.seal_private_regions(&[
            layout.fw_device_id,
            layout.fw_cache,
            compound_id_region,
        ])
        .map_err(|_| BootError::Hardware(HardwareError::Firewall))?;
        ringbuf_entry!(Trace::Sealed);

        Ok(BootOutcome {
            cert_store: outcome.cert_store,
            compound_id,
            rollback_detected: outcome.rollback_detected,
            cache_refreshed: outcome.cache_refreshed,
            provisioned_this_boot,
        })
    }
}

fn decode<T: hubpack::SerializedSize + serde::de::DeserializeOwned>(
    bytes: &[u8],
) -> Option<T> {
    hubpack::deserialize(bytes).ok().map(|(value, _)| value)
}
