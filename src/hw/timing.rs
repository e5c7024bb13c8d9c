// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Bounded polling on top of an injected delay.
//!
//! Every hardware handshake the drivers wait on (AHB idle, core soft reset, FIFO flush, global OUT
//! NAK, endpoint disable, channel halt) goes through [`wait_until`], so a stuck core surfaces as a
//! [`Timeout`] instead of a hang, and tests can run the waits against a fake clock.

use embedded_hal::delay::DelayNs;

/// A wait that ran out of attempts.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Timeout;

/// How long a wait may poll: `attempts` checks with `step_ns` of delay between them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Bound {
    attempts: u32,
    step_ns: u32,
}

impl Bound {
    /// One check per millisecond for `ms` milliseconds.
    pub const fn millis(ms: u32) -> Self {
        Self {
            attempts: ms,
            step_ns: 1_000_000,
        }
    }

    /// One check per microsecond for `us` microseconds.
    pub const fn micros(us: u32) -> Self {
        Self {
            attempts: us,
            step_ns: 1_000,
        }
    }

    #[inline]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    #[inline]
    pub const fn step_ns(&self) -> u32 {
        self.step_ns
    }
}

/// AHB master idle and core soft reset.
pub const CORE_RESET: Bound = Bound::millis(100);
/// TX FIFO flush, global OUT NAK effective, endpoint disabled.
pub const HANDSHAKE: Bound = Bound::micros(1_000);
/// Channel halted after CHDIS.
pub const CHANNEL_HALT: Bound = Bound::micros(1_000);

/// Poll `done` until it returns `true`, delaying one step between checks.
///
/// The condition is checked once more after the last step, so a flag that sets during the final
/// delay still counts.
pub fn wait_until<D, F>(delay: &mut D, bound: Bound, mut done: F) -> Result<(), Timeout>
where
    D: DelayNs,
    F: FnMut() -> bool,
{
    for _ in 0..bound.attempts {
        if done() {
            return Ok(());
        }
        delay.delay_ns(bound.step_ns);
    }
    if done() {
        Ok(())
    } else {
        Err(Timeout)
    }
}
