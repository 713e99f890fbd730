// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! OID arc tables used when building the certificate TBS structures.
//!
//! `RIOT_OID` is not an IANA-registered arc; it follows the convention of the
//! DICE/RIoT literature of hanging the firmware-measurement extension off a
//! private enterprise arc, the way `deviceid_cert_tmpl`/`alias_cert_tmpl` in
//! the upstream DICE implementation carry a project-private extension OID
//! baked into their templates.

pub const ID_EC_PUBLIC_KEY: &[u32] = &[1, 2, 840, 10045, 2, 1];

pub const PRIME256V1: &[u32] = &[1, 2, 840, 10045, 3, 1, 7];
pub const SECP384R1: &[u32] = &[1, 3, 132, 0, 34];
pub const SECP521R1: &[u32] = &[1, 3, 132, 0, 35];

pub const ECDSA_WITH_SHA256: &[u32] = &[1, 2, 840, 10045, 4, 3, 2];
pub const ECDSA_WITH_SHA384: &[u32] = &[1, 2, 840, 10045, 4, 3, 3];
pub const ECDSA_WITH_SHA512: &[u32] = &[1, 2, 840, 10045, 4, 3, 4];

pub const COMMON_NAME: &[u32] = &[2, 5, 4, 3];

pub const BASIC_CONSTRAINTS: &[u32] = &[2, 5, 29, 19];
pub const KEY_USAGE: &[u32] = &[2, 5, 29, 15];
pub const EXT_KEY_USAGE: &[u32] = &[2, 5, 29, 37];
pub const AUTHORITY_KEY_IDENTIFIER: &[u32] = &[2, 5, 29, 35];

pub const CLIENT_AUTH: &[u32] = &[1, 3, 6, 1, 5, 5, 7, 3, 2];

pub const SHA256: &[u32] = &[2, 16, 840, 1, 101, 3, 4, 2, 1];

/// Private, project-specific arc carrying the firmware-measurement
/// extension on Alias certificates.
pub const RIOT: &[u32] = &[1, 3, 6, 1, 4, 1, 57551, 1, 1];
