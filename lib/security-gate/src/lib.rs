// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Activates the on-chip firewall over the private flash regions before
//! control transfers to the agent, and exposes the "was the last reset
//! caused by a firewall violation" query used for post-violation
//! diagnostics.
//!
//! Grounded on the same register-wrapper shape as the upstream
//! `Handoff::turn_on`/`turn_off` (a thin owning wrapper constructed from a
//! borrowed register block) and `lpc55-reset-reason::get_reset_reason`
//! (decoding a reset-cause register into a small enum). No firewall
//! peripheral exists anywhere in the retrieved examples, so the trait
//! boundary here is this crate's own design, not a port of an existing one
//! -- see `DESIGN.md`.

#![cfg_attr(not(test), no_std)]

use persistent_store::Region;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    PowerOn,
    Pin,
    BrownOut,
    System,
    Watchdog,
    FirewallViolation,
    Other(u32),
}

/// The hardware collaborator backing reset-cause diagnostics (e.g. a
/// latched reset-cause register read-and-clear on this platform).
pub trait ResetCauseSource {
    fn read(&self) -> ResetReason;
    fn clear(&mut self);
}

/// The hardware collaborator backing firewall activation. `seal` is
/// expected to latch until the next reset: once called, any code or data
/// access to the sealed regions from outside the loader's own code segment
/// faults.
pub trait Firewall {
    type Error;

    fn seal(&mut self, regions: &[Region]) -> Result<(), Self::Error>;
}

pub struct SecurityGate<F, R> {
    firewall: F,
    reset_cause: R,
}

impl<F: Firewall, R: ResetCauseSource> SecurityGate<F, R> {
    pub fn new(firewall: F, reset_cause: R) -> Self {
        Self {
            firewall,
            reset_cause,
        }
    }

    /// Declares every region in `regions` as a non-volatile data segment
    /// with no code or volatile access from outside the loader, and latches
    /// that until reset. This must be the last action before jumping to the
    /// agent.
    pub fn seal_private_regions(
        &mut self,
        regions: &[Region],
    ) -> Result<(), F::Error> {
        self.firewall.seal(regions)
    }

    /// True if the device's last reset was caused by a firewall violation
    /// (an access attempt from the agent against a sealed region on the
    /// previous boot).
    pub fn last_reset_was_violation(&self) -> bool {
        matches!(self.reset_cause.read(), ResetReason::FirewallViolation)
    }

    pub fn clear_reset_cause(&mut self) {
        self.reset_cause.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeFirewall {
        sealed: Option<([Region; 2], usize)>,
    }

    impl Firewall for FakeFirewall {
        type Error = ();

        fn seal(&mut self, regions: &[Region]) -> Result<(), ()> {
            let mut buf = [Region::new(0, 0); 2];
            let n = regions.len().min(2);
            buf[..n].copy_from_slice(&regions[..n]);
            self.sealed = Some((buf, n));
            Ok(())
        }
    }

    struct FakeResetCause(ResetReason);

    impl ResetCauseSource for FakeResetCause {
        fn read(&self) -> ResetReason {
            self.0
        }
        fn clear(&mut self) {
            self.0 = ResetReason::PowerOn;
        }
    }

    #[test]
    fn seal_records_regions() {
        let mut gate = SecurityGate::new(
            FakeFirewall { sealed: None },
            FakeResetCause(ResetReason::PowerOn),
        );
        let regions = [Region::new(0x1000, 256), Region::new(0x1100, 128)];
        gate.seal_private_regions(&regions).unwrap();
        assert_eq!(gate.firewall.sealed.unwrap().1, 2);
    }

    #[test]
    fn detects_prior_firewall_violation() {
        let gate = SecurityGate::new(
            FakeFirewall { sealed: None },
            FakeResetCause(ResetReason::FirewallViolation),
        );
        assert!(gate.last_reset_was_violation());
    }

    #[test]
    fn ordinary_reset_is_not_a_violation() {
        let gate = SecurityGate::new(
            FakeFirewall { sealed: None },
            FakeResetCause(ResetReason::Watchdog),
        );
        assert!(!gate.last_reset_was_violation());
    }
}
