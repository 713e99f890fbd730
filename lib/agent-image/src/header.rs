// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The agent header: a fixed, externally-authored record prepended to the
//! agent's code in flash. Laid out with [`zerocopy`] the same way
//! `abi::ImageHeader`/`images::ImageVectorsLpc55` are in the upstream
//! lineage, since this struct -- unlike the persisted records in
//! [`crate::records`] -- is written by tooling outside this crate (the
//! image signer) and must match its layout byte-for-byte rather than go
//! through a versioned serializer.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Shared provisioning/header tag. A single magic spans both persisted
/// regions and the agent header (`BARNACLE_MAGIC`).
pub const MAGIC: u32 = persistent_store::MAGIC;

/// Highest header-format version this crate understands. `AgentHeader`
/// fields at or below this version decode with the layout below; anything
/// newer is rejected rather than guessed at.
pub const MAX_HEADER_VERSION: u32 = 1;

pub const AGENT_NAME_LEN: usize = 32;
/// ECDSA coordinate width. This lineage is wired for P-256 only (see
/// `dice::crypto`), so the header commits to a fixed 32-byte `r`/`s`.
pub const COORD_LEN: usize = 32;
pub const DIGEST_LEN: usize = 32;

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct AgentSignature {
    pub r: [u8; COORD_LEN],
    pub s: [u8; COORD_LEN],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct AgentInfo {
    pub name: [u8; AGENT_NAME_LEN],
    pub version: u32,
    pub issued: u32,
    pub size: u32,
    pub digest: [u8; DIGEST_LEN],
}

/// The record at the base of `AgentHdr`. `size` is the byte offset from the
/// start of this header to the start of `AgentCode`; `agent.size` is the
/// length of the code itself. `signature` is only meaningful when
/// authenticated boot is configured -- otherwise the signer leaves it zeroed
/// and `MaybeAuth` never reads it.
#[repr(C)]
#[derive(Clone, Copy, Debug, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct AgentHeader {
    pub magic: u32,
    pub version: u32,
    pub size: u32,
    pub agent: AgentInfo,
    pub signature: AgentSignature,
}

/// Byte length of the header fields the author's signature covers: every
/// byte of the header up to (not including) `signature`.
pub const SIGNED_REGION_LEN: usize =
    core::mem::size_of::<AgentHeader>() - core::mem::size_of::<AgentSignature>();

impl AgentHeader {
    /// Parses a header out of its raw flash bytes. Fails if `bytes` is
    /// shorter than the header or misaligned for direct field access.
    pub fn read_from(bytes: &[u8]) -> Option<AgentHeader> {
        let (header, _) = AgentHeader::read_from_prefix(bytes).ok()?;
        Some(header)
    }

    /// `true` once magic and version guards pass (the `Start` state's
    /// guard in the verifier's state machine).
    pub fn well_formed(&self) -> bool {
        self.magic == MAGIC && self.version <= MAX_HEADER_VERSION
    }

    /// The byte span of `AgentCode` relative to the header's own base
    /// address, i.e. `hdr.size`.
    pub fn code_offset(&self) -> u32 {
        self.size
    }
}

/// Slices out the portion of the header's raw bytes the author's signature
/// is computed over (everything up to `signature`).
pub fn signed_region(header_bytes: &[u8]) -> &[u8] {
    &header_bytes[..SIGNED_REGION_LEN]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bytes(magic: u32, version: u32) -> [u8; core::mem::size_of::<AgentHeader>()] {
        let hdr = AgentHeader {
            magic,
            version,
            size: 64,
            agent: AgentInfo {
                name: [0u8; AGENT_NAME_LEN],
                version: 1,
                issued: 100,
                size: 256,
                digest: [0xAB; DIGEST_LEN],
            },
            signature: AgentSignature {
                r: [0u8; COORD_LEN],
                s: [0u8; COORD_LEN],
            },
        };
        let mut out = [0u8; core::mem::size_of::<AgentHeader>()];
        out.copy_from_slice(hdr.as_bytes());
        out
    }

    #[test]
    fn well_formed_header_round_trips() {
        let bytes = sample_bytes(MAGIC, 1);
        let hdr = AgentHeader::read_from(&bytes).unwrap();
        assert!(hdr.well_formed());
        assert_eq!(hdr.agent.digest, [0xAB; DIGEST_LEN]);
    }

    #[test]
    fn bad_magic_is_not_well_formed() {
        let bytes = sample_bytes(0xDEAD_BEEF, 1);
        let hdr = AgentHeader::read_from(&bytes).unwrap();
        assert!(!hdr.well_formed());
    }

    #[test]
    fn version_above_max_is_rejected() {
        let bytes = sample_bytes(MAGIC, MAX_HEADER_VERSION + 1);
        let hdr = AgentHeader::read_from(&bytes).unwrap();
        assert!(!hdr.well_formed());
    }

    #[test]
    fn signed_region_excludes_signature() {
        let bytes = sample_bytes(MAGIC, 1);
        let region = signed_region(&bytes);
        assert_eq!(region.len(), SIGNED_REGION_LEN);
        assert_eq!(bytes.len() - region.len(), core::mem::size_of::<AgentSignature>());
    }
}
