// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Endpoint bookkeeping.
//!
//! IN and OUT halves of the same endpoint number are separate records addressed by
//! [`EndpointId`], so neither direction can clobber the other's transfer state.

use core::ops::{Index, IndexMut};

use crate::config::MAX_ENDPOINT_NUM;
use crate::hw::regs::pid;
use crate::usb::{Buffer, Direction, EndpointAddress};

const SLOTS: usize = 2 * (MAX_ENDPOINT_NUM + 1);

/// Arena index of one endpoint direction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct EndpointId(usize);

impl EndpointId {
    /// `None` when the endpoint number is above `max_num`.
    #[inline]
    pub fn new(address: EndpointAddress, max_num: u8) -> Option<Self> {
        if address.number() > max_num {
            return None;
        }
        let dir = match address.direction() {
            Direction::Out => 0,
            Direction::In => 1,
        };
        Some(Self(address.number() as usize * 2 + dir))
    }

    #[inline]
    pub fn out(number: usize) -> Self {
        Self(number * 2)
    }

    #[inline]
    pub fn in_(number: usize) -> Self {
        Self(number * 2 + 1)
    }
}

/// Transfer state of one endpoint direction.
#[derive(Debug, Default)]
pub(crate) struct Endpoint {
    pub buffer: Option<Buffer>,
    /// Bytes still to move.
    pub remaining: u32,
    /// Bytes moved so far; the transfer result.
    pub transferred: u32,
    /// Bytes loaded into the TX FIFO and not yet acknowledged.
    pub in_flight: u32,
    pub max_packet_size: u16,
    /// Packets per (micro)frame; above 1 only for high-bandwidth isochronous endpoints.
    pub packet_count: u8,
    pub active: bool,
    /// Waiting for NAK-effective before the first IN packet is loaded.
    pub in_nak: bool,
    pub in_zlp: bool,
    /// Flush the TX FIFO once the endpoint reports disabled.
    pub in_flush: bool,
}

impl Endpoint {
    /// Bytes the next packet (or isochronous packet burst) carries.
    pub fn next_chunk(&self, isochronous: bool) -> u32 {
        let mut max = u32::from(self.max_packet_size);
        if isochronous && self.packet_count != 1 {
            max *= u32::from(self.packet_count);
        }
        self.remaining.min(max)
    }
}

pub(crate) struct Endpoints {
    slots: [Endpoint; SLOTS],
}

impl Endpoints {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|_| Endpoint::default()),
        }
    }

    pub fn clear(&mut self) {
        for ep in self.slots.iter_mut() {
            *ep = Endpoint::default();
        }
    }

    /// Whether any IN endpoint still waits for NAK-effective.
    pub fn any_in_nak(&self) -> bool {
        self.slots.iter().skip(1).step_by(2).any(|ep| ep.in_nak)
    }
}

impl Index<EndpointId> for Endpoints {
    type Output = Endpoint;

    fn index(&self, id: EndpointId) -> &Endpoint {
        &self.slots[id.0]
    }
}

impl IndexMut<EndpointId> for Endpoints {
    fn index_mut(&mut self, id: EndpointId) -> &mut Endpoint {
        &mut self.slots[id.0]
    }
}

/// Data PID the `received`-th packet (1-based) of a `requested`-packet isochronous burst must
/// carry: DATA0 alone; MDATA, DATA1 for two; MDATA, MDATA, DATA2 for three.
pub(crate) fn expected_iso_pid(requested: u8, received: u32) -> Option<u32> {
    match (requested, received) {
        (1, 1) => Some(pid::DATA0),
        (2, 1) => Some(pid::MDATA),
        (2, 2) => Some(pid::DATA1),
        (3, 1) | (3, 2) => Some(pid::MDATA),
        (3, 3) => Some(pid::DATA2),
        _ => None,
    }
}
