// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cortex-M entry point. Wires the board's concrete flash, RNG, firewall
//! and reset-cause peripherals to [`loader::Boot`] and, on success, jumps
//! to the agent's reset vector the way `stage0`'s `main` branches into the
//! next image after its own validate-then-attest pair succeeds.
//!
//! Everything below `mod board` is this target's own memory map and is
//! expected to be replaced wholesale by the integrator; only the pattern
//! of writing directly to registers no PAC crate models (the same idiom
//! `stage0::write_sau` uses for the SAU) carries over, not the addresses
//! themselves (the hardware layer is an external collaborator).

#![no_std]
#![no_main]

extern crate panic_halt;

use cortex_m::peripheral::Peripherals;
use cortex_m_rt::entry;
use dice_x509::UtcTime;
use loader::Boot;
use persistent_store::{Layout, PersistentStore, Region};
use security_gate::SecurityGate;

mod board;

#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn MemoryManagement() {
    loop {}
}

#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn BusFault() {
    loop {}
}

#[allow(non_snake_case)]
#[no_mangle]
pub unsafe extern "C" fn UsageFault() {
    loop {}
}

const NOT_BEFORE: UtcTime = *b"260101000000Z";
const NOT_AFTER: UtcTime = *b"360101000000Z";

/// RAM span reserved for the compound key handoff. Must be included in
/// the same firewall grant as `FwDeviceId`/`FwCache`.
const COMPOUND_ID_REGION: Region = Region::new(0x2000_0000, 97);

#[entry]
fn main() -> ! {
    let _peripherals = Peripherals::take().unwrap();

    let layout = Layout {
        agent_hdr: Region::new(board::AGENT_HDR_BASE, board::AGENT_HDR_LEN),
        agent_code: Region::new(board::AGENT_CODE_BASE, board::AGENT_CODE_LEN),
        issued_certs: Region::new(board::ISSUED_CERTS_BASE, board::ISSUED_CERTS_LEN),
        fw_device_id: Region::new(board::FW_DEVICE_ID_BASE, board::FW_DEVICE_ID_LEN),
        fw_cache: Region::new(board::FW_CACHE_BASE, board::FW_CACHE_LEN),
    };

    let mut store = PersistentStore::new(board::Flash::new(), layout);
    let mut gate = SecurityGate::new(board::FirewallHw::new(), board::ResetCause::new());
    let mut rng = board::Rng::new();

    let header_base = layout.agent_hdr.base as usize;
    let header_len = layout.agent_hdr.len as usize;
    let code_base = layout.agent_code.base;
    let code_len = layout.agent_code.len as usize;

    // Safety: these spans are the board's own flash layout, memory-mapped
    // for the whole life of the program.
    let header_bytes = unsafe {
        core::slice::from_raw_parts(header_base as *const u8, header_len)
    };
    let code = unsafe {
        core::slice::from_raw_parts(code_base as *const u8, code_len)
    };

    let outcome = Boot::run::<_, _, _, _, { board::CERT_STORE_CAP }>(
        &mut store,
        &mut gate,
        &mut rng,
        COMPOUND_ID_REGION,
        header_bytes,
        code_base,
        code,
        &NOT_BEFORE,
        &NOT_AFTER,
        board::DEVICE_CN,
        board::ALIAS_CN,
    );

    match outcome {
        Ok(_outcome) => {
            // Safety: `code_base` has just been measured and verified by
            // `Boot::run`; its vector table is well-formed per `AgentHeader`.
            unsafe { board::jump_to_agent(code_base) }
        }
        Err(_) => panic!("measured boot failed"),
    }
}
