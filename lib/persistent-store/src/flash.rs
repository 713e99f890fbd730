// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::dfu::{build_descriptor, MAX_DESCRIPTOR_LEN};
use crate::{Layout, Region, MAGIC};
use heapless::String;

/// The hardware collaborator this crate writes through. A concrete
/// implementation wraps the target's flash controller register block (the
/// way the upstream `Flash<'a>` type wraps `lpc55_pac::flash::RegisterBlock`
/// behind `start_erase_range`/`start_program`/`poll_*_result`); tests
/// substitute an in-memory fake.
pub trait FlashDevice {
    type Error;

    /// Native page size in bytes. Every `writeRegion` erase spans whole
    /// pages.
    const PAGE_SIZE: u32;

    /// Erases every page wholly or partially covered by `[addr, addr+len)`.
    fn erase(&mut self, addr: u32, len: u32) -> Result<(), Self::Error>;

    /// Programs `data` starting at `addr`. Callers only invoke this after a
    /// matching `erase`, so implementations may assume the destination is
    /// blank.
    fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), Self::Error>;

    /// True if every byte in `[addr, addr+len)` has been programmed (i.e.
    /// is not in the erased state). Used to detect write tears.
    fn is_programmed(&self, addr: u32, len: u32) -> bool;
}

/// Flash on this class of target is memory-mapped (XIP): a read is a direct
/// slice over the address space, never a round trip through the flash
/// controller the way [`FlashDevice::erase`]/`program` are. Implementations
/// wrap whatever `unsafe { core::slice::from_raw_parts(...) }` the platform
/// needs the way `stage0::image_header::get_image_a` dereferences `IMAGEA`
/// directly; host tests back it with a plain in-memory buffer.
pub trait MappedFlash: FlashDevice {
    fn region_bytes(&self, region: Region) -> &[u8];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error<E> {
    /// `writeRegion`'s destination/length do not lie within a single known
    /// region.
    OutOfRegion,
    Flash(E),
}

/// Owns the board's flash layout and provides the one write primitive every
/// region update goes through: erase the covering pages, then program.
pub struct PersistentStore<F> {
    flash: F,
    layout: Layout,
}

impl<F: FlashDevice> PersistentStore<F> {
    pub fn new(flash: F, layout: Layout) -> Self {
        Self { flash, layout }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    /// Erases the pages covering `[dest, dest+src.len())` and programs
    /// `src`. A crash between the erase and the program leaves the region
    /// blank, never partially written with stale and fresh bytes mixed.
    ///
    /// Fails with [`Error::OutOfRegion`] without touching flash if `dest`
    /// and `src.len()` don't fall entirely within one of this store's
    /// configured regions -- every write is to a known region, never a
    /// bare address.
    pub fn write_region(
        &mut self,
        dest: u32,
        src: &[u8],
    ) -> Result<(), Error<F::Error>> {
        let len = src.len() as u32;
        if !self.layout.contains(dest, len) {
            return Err(Error::OutOfRegion);
        }

        let page = F::PAGE_SIZE;
        let first_page = dest - (dest % page);
        let last_byte = dest + len;
        let span = last_byte - first_page;
        let span_pages = span.div_ceil(page) * page;

        self.flash
            .erase(first_page, span_pages)
            .map_err(Error::Flash)?;
        self.flash.program(dest, src).map_err(Error::Flash)
    }

    /// The DFU region descriptor covering the updatable span from the start
    /// of `AgentHdr` through the end of `IssuedCerts` -- `FwDeviceId` and
    /// `FwCache` are private and never externally updatable, so they're
    /// excluded. `issued_certs_locked` is the `IssuedCerts` region's
    /// `WRITELOCK` flag; when set, the terminal page is reported read-only.
    pub fn dfu_descriptor(
        &self,
        issued_certs_locked: bool,
    ) -> String<MAX_DESCRIPTOR_LEN> {
        let base = self.layout.agent_hdr.base;
        let total_len = self.layout.issued_certs.end() - base;
        build_descriptor(base, total_len, issued_certs_locked)
    }

    /// True if the region's leading 4 bytes equal [`MAGIC`], i.e. it has
    /// already been provisioned.
    pub fn is_provisioned(&self, region: Region) -> bool {
        self.flash.is_programmed(region.base, 4)
    }

    /// True if the whole region reads back as already programmed. Used to
    /// reject an erase-then-program that was torn mid-write.
    pub fn region_fully_programmed(&self, region: Region) -> bool {
        self.flash.is_programmed(region.base, region.len)
    }
}

pub fn read_magic(region_bytes: &[u8]) -> Option<u32> {
    region_bytes
        .get(..4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

pub fn is_provisioned_bytes(region_bytes: &[u8]) -> bool {
    read_magic(region_bytes) == Some(MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeFlash {
        mem: [u8; 4096],
        programmed: [bool; 4096],
    }

    impl FakeFlash {
        fn new() -> Self {
            Self {
                mem: [0xFF; 4096],
                programmed: [false; 4096],
            }
        }
    }

    impl FlashDevice for FakeFlash {
        type Error = ();
        const PAGE_SIZE: u32 = 512;

        fn erase(&mut self, addr: u32, len: u32) -> Result<(), ()> {
            let addr = addr as usize;
            let len = len as usize;
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
            let addr = addr as usize;
            let len = len as usize;
            self.programmed[addr..addr + len].iter().all(|&p| p)
        }
    }

    fn layout() -> Layout {
        Layout {
            agent_hdr: Region::new(0, 512),
            agent_code: Region::new(512, 1024),
            issued_certs: Region::new(1536, 512),
            fw_device_id: Region::new(2048, 256),
            fw_cache: Region::new(2304, 256),
        }
    }

    #[test]
    fn write_region_spans_whole_pages() {
        let mut store = PersistentStore::new(FakeFlash::new(), layout());
        store.write_region(1536, &[1, 2, 3, 4]).unwrap();
        assert!(store.flash.is_programmed(1536, 4));
        // Untouched neighboring bytes in the same page were erased, not
        // left with stale data, but they're not "programmed".
        assert!(!store.flash.is_programmed(1536 + 4, 1));
    }

    #[test]
    fn unprogrammed_region_reports_unprovisioned() {
        let store = PersistentStore::new(FakeFlash::new(), layout());
        assert!(!store.is_provisioned(layout().fw_device_id));
    }

    #[test]
    fn provisioned_after_write() {
        let mut store = PersistentStore::new(FakeFlash::new(), layout());
        let mut region = [0u8; 256];
        region[..4].copy_from_slice(&MAGIC.to_le_bytes());
        store.write_region(2048, &region).unwrap();
        assert!(store.is_provisioned(layout().fw_device_id));
    }

    #[test]
    fn write_spanning_two_regions_is_rejected() {
        let mut store = PersistentStore::new(FakeFlash::new(), layout());
        // `issued_certs` is only 512 bytes long; this write runs past its
        // end into `fw_device_id`, so it isn't contained in either region.
        let err = store.write_region(1536, &[0u8; 600]).unwrap_err();
        assert_eq!(err, Error::OutOfRegion);
    }

    #[test]
    fn write_outside_any_region_is_rejected() {
        let mut store = PersistentStore::new(FakeFlash::new(), layout());
        let err = store.write_region(3000, &[0u8; 16]).unwrap_err();
        assert_eq!(err, Error::OutOfRegion);
    }

    #[test]
    fn erase_without_program_leaves_region_blank_and_retry_succeeds() {
        let mut store = PersistentStore::new(FakeFlash::new(), layout());
        let mut region = [0u8; 256];
        region[..4].copy_from_slice(&MAGIC.to_le_bytes());
        store.write_region(2048, &region).unwrap();
        assert!(store.is_provisioned(layout().fw_device_id));

        // Simulate a crash between erase and program: the hardware erase
        // completed but the program call never landed.
        store.flash.erase(2048, 256).unwrap();
        assert!(!store.is_provisioned(layout().fw_device_id));

        // A retry from a blank region succeeds and leaves it provisioned.
        store.write_region(2048, &region).unwrap();
        assert!(store.is_provisioned(layout().fw_device_id));
    }
}
