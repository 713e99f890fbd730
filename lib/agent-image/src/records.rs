// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Persisted record shapes for the three private/public flash regions this
//! crate owns: `FwDeviceId`, `FwCache`, `IssuedCerts`.
//!
//! Unlike [`crate::header::AgentHeader`] these records are produced and
//! consumed entirely by this lineage's own code, so they go through
//! `hubpack`+`serde` the way `stage0-handoff::RotBootState` does, rather
//! than a raw `repr(C)` overlay. The certificate PEM bodies are the one
//! field too large for serde's native array support, so they go through
//! `serde-big-array` exactly as `serde-big-array` is vendored for in the
//! workspace dependency table.

use hubpack::SerializedSize;
use serde::{Deserialize, Serialize};
use serde_big_array::BigArray;

use crate::header::{COORD_LEN, MAGIC};

/// Capacity of a single stored PEM certificate body. A P-256 device or root
/// certificate PEM (DER ~450-600 bytes, base64'd and line-wrapped) comfortably
/// fits in 1 KiB with headroom for the riot extension on an alias cert should
/// one ever be stored this way too.
pub const STORED_PEM_CAP: usize = 1024;

/// A single PEM-encoded certificate body plus a length, storable via hubpack.
/// `len == 0` represents an unpopulated slot (the "null check" used to
/// decide whether an optional public-key slot is populated).
#[derive(Clone, Serialize, Deserialize, SerializedSize)]
pub struct StoredPem {
    pub len: u16,
    #[serde(with = "BigArray")]
    pub bytes: [u8; STORED_PEM_CAP],
}

impl StoredPem {
    pub const fn empty() -> Self {
        Self {
            len: 0,
            bytes: [0u8; STORED_PEM_CAP],
        }
    }

    pub fn from_pem(pem: &[u8]) -> Option<Self> {
        if pem.len() > STORED_PEM_CAP {
            return None;
        }
        let mut bytes = [0u8; STORED_PEM_CAP];
        bytes[..pem.len()].copy_from_slice(pem);
        Some(Self {
            len: pem.len() as u16,
            bytes,
        })
    }

    pub fn is_populated(&self) -> bool {
        self.len > 0
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

impl Default for StoredPem {
    fn default() -> Self {
        Self::empty()
    }
}

/// `FwDeviceId`: the device key pair, written exactly once in the device's
/// lifetime.
#[derive(Clone, Serialize, Deserialize, SerializedSize)]
pub struct FwDeviceIdImage {
    pub magic: u32,
    /// Uncompressed SEC1 point, `0x04 || X || Y`.
    pub pubkey: [u8; 65],
    pub privkey: [u8; COORD_LEN],
}

impl FwDeviceIdImage {
    pub fn new(pubkey: [u8; 65], privkey: [u8; COORD_LEN]) -> Self {
        Self {
            magic: MAGIC,
            pubkey,
            privkey,
        }
    }

    pub fn is_provisioned(&self) -> bool {
        self.magic == MAGIC
    }
}

/// `FwCache`: the compound key pair and alias cert from the last boot whose
/// agent digest produced them, used to decide whether `AgentVerifier` needs
/// to refresh the alias cert on this boot.
#[derive(Clone, Serialize, Deserialize, SerializedSize)]
pub struct FwCacheImage {
    pub magic: u32,
    pub compound_pubkey: [u8; 65],
    pub compound_privkey: [u8; COORD_LEN],
    /// `SHA256(hdr.signedRegion)` from the boot that last refreshed this
    /// cache -- compared against the current boot's header digest to decide
    /// whether a refresh is needed.
    pub agent_hdr_digest: [u8; 32],
    pub last_version: u32,
    pub last_issued: u32,
    pub alias_cert: StoredPem,
}

impl FwCacheImage {
    pub fn is_provisioned(&self) -> bool {
        self.magic == MAGIC
    }
}

/// `IssuedCerts`: factory-issued root/device certificates (either may be
/// empty), the author-verification public key, and the flags word.
#[derive(Clone, Serialize, Deserialize, SerializedSize)]
pub struct IssuedCertsImage {
    pub magic: u32,
    pub flags: u32,
    pub code_auth_pubkey: [u8; 65],
    pub code_auth_pubkey_present: bool,
    pub root_cert: StoredPem,
    pub device_cert: StoredPem,
}

impl IssuedCertsImage {
    pub fn is_provisioned(&self) -> bool {
        self.magic == MAGIC
    }

    pub fn flags(&self) -> persistent_store::IssuedCertsFlags {
        persistent_store::IssuedCertsFlags::from_bits_truncate(self.flags)
    }
}
