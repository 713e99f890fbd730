// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The RAM-resident, agent-visible certificate chain assembled on every
//! boot: a small fixed slot index pointing into a contiguous PEM byte bag.

use crate::MAGIC;

/// Slot indices into a [`CertStore`], matching the fixed three-certificate
/// chain this lineage issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum Slot {
    Root = 0,
    Device = 1,
    Loader = 2,
}

pub const N_SLOTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertStoreError {
    /// The PEM bytes for this slot plus its NUL terminator don't fit in the
    /// remaining capacity.
    Overflow,
}

/// `CertStore ::= { magic, slots[{start,size}], cursor, bytes[] }`. Each
/// populated slot's PEM text is terminated with a single NUL byte so agent
/// code expecting a C string can consume it directly.
pub struct CertStore<const CAP: usize> {
    magic: u32,
    slots: [(usize, usize); N_SLOTS],
    cursor: usize,
    bytes: [u8; CAP],
}

impl<const CAP: usize> Default for CertStore<CAP> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const CAP: usize> CertStore<CAP> {
    pub fn new() -> Self {
        Self {
            magic: MAGIC,
            slots: [(0, 0); N_SLOTS],
            cursor: 0,
            bytes: [0u8; CAP],
        }
    }

    pub fn magic(&self) -> u32 {
        self.magic
    }

    /// Appends `pem` (plus a trailing NUL) into the slot. Each slot may be
    /// populated at most once per assembly; a capacity overflow aborts
    /// before any partial write lands, matching the "assembly is atomic or
    /// doesn't happen" assembly-time contract.
    pub fn append(
        &mut self,
        slot: Slot,
        pem: &[u8],
    ) -> Result<(), CertStoreError> {
        let needed = pem.len() + 1;
        if self.cursor + needed > CAP {
            return Err(CertStoreError::Overflow);
        }
        let start = self.cursor;
        self.bytes[start..start + pem.len()].copy_from_slice(pem);
        self.bytes[start + pem.len()] = 0;
        self.cursor += needed;
        self.slots[slot as usize] = (start, needed);
        Ok(())
    }

    pub fn slot(&self, slot: Slot) -> Option<&[u8]> {
        let (start, size) = self.slots[slot as usize];
        if size == 0 {
            None
        } else {
            Some(&self.bytes[start..start + size])
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.cursor]
    }
}
