// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Measures the agent's code bytes, guarding against a torn DFU write the
//! way `lpc55-rot-startup::images::FlashSlot` guards against a
//! partially-programmed image: before hashing, confirm the claimed length
//! lies entirely within flash pages the hardware reports as programmed.

use persistent_store::FlashDevice;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureError {
    /// The header claims more code than the supplied buffer holds.
    ClaimedSizeExceedsBuffer,
    /// The claimed code span is not fully covered by programmed flash pages
    /// -- a DFU write was torn, or the header is lying about `agent.size`.
    PartiallyProgrammed,
}

/// Hashes exactly `claimed_size` bytes of `code` (the `AgentCode` region,
/// starting at `code_base`), after confirming the whole span reads back as
/// programmed on `flash`.
pub fn measure_agent_code<F: FlashDevice>(
    flash: &F,
    code_base: u32,
    code: &[u8],
    claimed_size: u32,
) -> Result<[u8; 32], MeasureError> {
    let claimed = claimed_size as usize;
    if claimed > code.len() {
        return Err(MeasureError::ClaimedSizeExceedsBuffer);
    }

    let page = F::PAGE_SIZE;
    let rounded = claimed_size.div_ceil(page) * page;
    if !flash.is_programmed(code_base, rounded) {
        return Err(MeasureError::PartiallyProgrammed);
    }

    Ok(Sha256::digest(&code[..claimed]).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    // `FlashDevice::PAGE_SIZE` is an associated const, so it can't vary per
    // test instance; each fake below defines its own type with a fixed page
    // size instead.
    macro_rules! fake_flash_with_page {
        ($name:ident, $page:expr) => {
            struct $name {
                programmed_len: u32,
            }
            impl FlashDevice for $name {
                type Error = ();
                const PAGE_SIZE: u32 = $page;
                fn erase(&mut self, _addr: u32, _len: u32) -> Result<(), ()> {
                    Ok(())
                }
                fn program(&mut self, _addr: u32, _data: &[u8]) -> Result<(), ()> {
                    Ok(())
                }
                fn is_programmed(&self, addr: u32, len: u32) -> bool {
                    addr + len <= self.programmed_len
                }
            }
        };
    }

    fake_flash_with_page!(Page512Flash, 512);

    #[test]
    fn measures_fully_programmed_code() {
        let flash = Page512Flash { programmed_len: 1024 };
        let code = [0x42u8; 1024];
        let digest = measure_agent_code(&flash, 0, &code, 900).unwrap();
        assert_eq!(digest, Sha256::digest(&code[..900]).as_slice());
    }

    #[test]
    fn rejects_torn_write() {
        let flash = Page512Flash { programmed_len: 512 };
        let code = [0x42u8; 1024];
        let err = measure_agent_code(&flash, 0, &code, 900).unwrap_err();
        assert_eq!(err, MeasureError::PartiallyProgrammed);
    }

    #[test]
    fn rejects_claim_past_buffer() {
        let flash = Page512Flash { programmed_len: 2048 };
        let code = [0x42u8; 100];
        let err = measure_agent_code(&flash, 0, &code, 900).unwrap_err();
        assert_eq!(err, MeasureError::ClaimedSizeExceedsBuffer);
    }
}
