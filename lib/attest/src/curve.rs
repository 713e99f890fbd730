// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Selects the curve OID and coordinate width the certificate builders
//! encode, per the `curve-p256`/`curve-p384`/`curve-p521` Cargo features.
//! Exactly one must be configured.
//!
//! The signing backend (`dice::crypto`) only implements P-256, so this
//! selection only changes what the certificate *says* the curve is, not
//! what actually signs it, outside of the default feature. See DESIGN.md.

use dice_x509::Curve;

cfg_if::cfg_if! {
    if #[cfg(feature = "curve-p521")] {
        pub fn active() -> &'static Curve { &dice_x509::P521 }
    } else if #[cfg(feature = "curve-p384")] {
        pub fn active() -> &'static Curve { &dice_x509::P384 }
    } else {
        pub fn active() -> &'static Curve { &dice_x509::P256 }
    }
}
