// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Placeholder board support: the flash layout and peripheral adapters an
//! integrator replaces with their target's actual memory map and register
//! definitions. Nothing here is exercised by host tests -- the traits in
//! [`persistent_store`], [`attest`] and [`security_gate`] are what's
//! specified; this module is one illustrative implementation of them.

use attest::EntropySource;
use persistent_store::{FlashDevice, MappedFlash, Region};
use security_gate::{Firewall, ResetCauseSource, ResetReason};

pub const AGENT_HDR_BASE: u32 = 0x0000_0000;
pub const AGENT_HDR_LEN: u32 = 512;
pub const AGENT_CODE_BASE: u32 = 0x0000_0200;
pub const AGENT_CODE_LEN: u32 = 128 * 1024;
pub const ISSUED_CERTS_BASE: u32 = 0x0002_0200;
pub const ISSUED_CERTS_LEN: u32 = 4096;
pub const FW_DEVICE_ID_BASE: u32 = 0x0002_1200;
pub const FW_DEVICE_ID_LEN: u32 = 512;
pub const FW_CACHE_BASE: u32 = 0x0002_1400;
pub const FW_CACHE_LEN: u32 = 2048;

pub const CERT_STORE_CAP: usize = 4096;
pub const DEVICE_CN: &str = "board-device";
pub const ALIAS_CN: &str = "board-alias";

const FLASH_PAGE_SIZE: u32 = 512;

/// Wraps the target's flash controller register block, the way the
/// upstream `Flash<'a>` wraps `lpc55_pac::flash::RegisterBlock`.
pub struct Flash;

impl Flash {
    pub fn new() -> Self {
        Self
    }
}

impl FlashDevice for Flash {
    type Error = ();
    const PAGE_SIZE: u32 = FLASH_PAGE_SIZE;

    fn erase(&mut self, _addr: u32, _len: u32) -> Result<(), ()> {
        // Integrator: start_erase_range + poll_erase_result on the target's
        // flash controller.
        Ok(())
    }

    fn program(&mut self, _addr: u32, _data: &[u8]) -> Result<(), ()> {
        // Integrator: start_program + poll_program_result.
        Ok(())
    }

    fn is_programmed(&self, _addr: u32, _len: u32) -> bool {
        // Integrator: read back and compare against the erased-word value.
        true
    }
}

impl MappedFlash for Flash {
    fn region_bytes(&self, region: Region) -> &[u8] {
        // Safety: flash on this class of target is memory-mapped (XIP) for
        // the whole program lifetime, the same assumption
        // `stage0::image_header::get_image_a` makes of `IMAGEA`.
        unsafe {
            core::slice::from_raw_parts(region.base as *const u8, region.len as usize)
        }
    }
}

/// Wraps the target's TRNG/PUF peripheral, the way `lpc55-puf::Puf` wraps
/// `PUF`.
pub struct Rng;

impl Rng {
    pub fn new() -> Self {
        Self
    }
}

impl EntropySource for Rng {
    type Error = ();

    fn fill(&mut self, _out: &mut [u8]) -> Result<(), ()> {
        // Integrator: request random words from the target's TRNG.
        Ok(())
    }
}

const FIREWALL_CTRL: *mut u32 = 0x4000_0000 as *mut u32;

/// Wraps the target's firewall/MPU-equivalent peripheral. No such
/// peripheral appears anywhere in the retrieved examples; this raw
/// register poke is illustrative, following the same idiom
/// `stage0::write_sau` uses for registers no PAC crate models.
pub struct FirewallHw;

impl FirewallHw {
    pub fn new() -> Self {
        Self
    }
}

impl Firewall for FirewallHw {
    type Error = ();

    fn seal(&mut self, regions: &[Region]) -> Result<(), ()> {
        for region in regions {
            // Safety: `FIREWALL_CTRL` is this illustrative target's
            // memory-mapped firewall configuration register.
            unsafe {
                core::ptr::write_volatile(FIREWALL_CTRL, region.base);
                core::ptr::write_volatile(FIREWALL_CTRL.add(1), region.len);
            }
        }
        Ok(())
    }
}

const RESET_CAUSE_REG: *const u32 = 0x4000_1000 as *const u32;

pub struct ResetCause;

impl ResetCause {
    pub fn new() -> Self {
        Self
    }
}

impl ResetCauseSource for ResetCause {
    fn read(&self) -> ResetReason {
        let raw = unsafe { core::ptr::read_volatile(RESET_CAUSE_REG) };
        match raw {
            0 => ResetReason::PowerOn,
            1 => ResetReason::Pin,
            2 => ResetReason::BrownOut,
            3 => ResetReason::System,
            4 => ResetReason::Watchdog,
            5 => ResetReason::FirewallViolation,
            other => ResetReason::Other(other),
        }
    }

    fn clear(&mut self) {
        unsafe { core::ptr::write_volatile(RESET_CAUSE_REG as *mut u32, 0) }
    }
}

/// Branches to the agent's reset vector, the way `stage0::main` writes the
/// non-secure VTOR and `bxns`-jumps into the next image. There is no
/// TrustZone secure/non-secure split in this lineage (the firewall here is a
/// single-domain access-control peripheral, not an execution-state
/// boundary), so this is a plain branch rather than `bxns`.
///
/// # Safety
/// `code_base` must point at a verified agent image whose vector table has
/// already been measured and authenticated by `Boot::run`.
pub unsafe fn jump_to_agent(code_base: u32) -> ! {
    core::ptr::write_volatile(0xE000_ED08 as *mut u32, code_base);
    cortex_m::asm::bootload(code_base as *const u32)
}
