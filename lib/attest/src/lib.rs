// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Identity provisioning and per-boot agent attestation: `IdentityProvisioner`
//! and `AgentVerifier`, built on [`dice`], [`dice_x509`] and
//! [`persistent_store`].

#![cfg_attr(not(test), no_std)]

mod curve;
mod provision;
mod verify;

pub use provision::{EntropySource, IdentityProvisioner, ProvisionError};
pub use verify::{AgentVerifier, Trace, VerifierOutcome, VerifyError};
