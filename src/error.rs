// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Driver error codes.
//!
//! Only synchronous failures are reported here. STALL handshakes and bus errors on an accepted
//! transfer are delivered later as endpoint/pipe events.

use crate::hw::timing::Timeout;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Generic failure: controller not powered/initialized, port not connected, no packet pending.
    Failed,
    /// Endpoint/pipe address or index out of range, or a size that does not fit the FIFO layout.
    Parameter,
    /// A transfer is already active on the endpoint or pipe.
    Busy,
    /// A hardware handshake did not complete within its bound.
    Timeout,
    /// Requested power state is not supported.
    Unsupported,
}

impl From<Timeout> for Error {
    fn from(_: Timeout) -> Self {
        Error::Timeout
    }
}
