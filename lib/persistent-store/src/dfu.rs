// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Builds the `@Barnacle /0xADDR/NN*004Kf,...,01*04K[a|g]` DFU region
//! descriptor string: a run of updatable 4 KiB pages followed by a
//! single terminal page whose mode reflects the `IssuedCerts` write-lock.

use core::fmt::Write as _;
use heapless::String;

pub const PAGE_SIZE: u32 = 4096;

/// Maximum descriptor length we ever need to format: `"@Barnacle /0x"` (13) +
/// 8 hex digits + `"/"` (1) + up to 4 digits of page count + `"*004Kf,01*04K"`
/// (13) + one mode char, comfortably under 64 bytes.
pub const MAX_DESCRIPTOR_LEN: usize = 64;

/// Builds the descriptor for a DFU-updatable span of `total_len` bytes
/// starting at `base`, rounded up to whole 4 KiB pages. The last page is
/// reported `a` (read-only) when `locked` is set (the `IssuedCerts`
/// `WRITELOCK` flag), else `g` (generic/writable).
pub fn build_descriptor(
    base: u32,
    total_len: u32,
    locked: bool,
) -> String<MAX_DESCRIPTOR_LEN> {
    let total_pages = total_len.div_ceil(PAGE_SIZE).max(1);
    let leading_pages = total_pages - 1;
    let mode = if locked { 'a' } else { 'g' };

    let mut s = String::new();
    if leading_pages > 0 {
        let _ = write!(
            s,
            "@Barnacle /0x{base:X}/{leading_pages:02}*004Kf,01*04K{mode}"
        );
    } else {
        let _ = write!(s, "@Barnacle /0x{base:X}/01*04K{mode}");
    }
    s
}
