// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Pipe records and the sizing rules for channel starts.

use crate::hw::regs::hctsiz;
use crate::usb::{Buffer, Direction, EndpointType, Speed};

/// Handle of a pipe; wraps the index of the hardware channel it occupies.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PipeHandle(pub(crate) u8);

impl PipeHandle {
    #[inline]
    pub const fn channel(&self) -> usize {
        self.0 as usize
    }
}

/// Per-pipe events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PipeEvent {
    TransferComplete,
    HandshakeStall,
    /// CRC, timeout, bit-stuff, babble or toggle error, or the device went away.
    BusError,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Token {
    Setup,
    Out,
    In,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataPid {
    Data0,
    Data1,
}

/// What to send on a pipe transfer: the token, an optional forced data toggle, and whether to
/// PING before sending OUT data.
///
/// Without a forced toggle the channel continues with the toggle the previous transfer left.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Packet {
    pub token: Token,
    pub data: Option<DataPid>,
    pub ping: bool,
}

impl Packet {
    pub const fn new(token: Token) -> Self {
        Self {
            token,
            data: None,
            ping: false,
        }
    }

    pub const fn with_data(mut self, pid: DataPid) -> Self {
        self.data = Some(pid);
        self
    }

    pub const fn with_ping(mut self, ping: bool) -> Self {
        self.ping = ping;
        self
    }
}

/// State of one pipe.
#[derive(Debug)]
pub struct Pipe {
    pub(crate) packet: Packet,
    pub(crate) buffer: Option<Buffer>,
    /// Bytes requested.
    pub(crate) len: u32,
    pub(crate) transferred: u32,
    /// OUT: bytes loaded by the current start. IN: bytes received since it.
    pub(crate) transferring: u32,
    /// Bytes programmed into HCTSIZ by the current start.
    pub(crate) chunk: u32,
    pub(crate) max_packet_size: u16,
    pub(crate) interval_reload: u16,
    /// SOFs left before a periodic (or NAK-delayed bulk IN) pipe restarts.
    pub(crate) interval: u16,
    pub(crate) direction: Direction,
    pub(crate) ep_type: EndpointType,
    pub(crate) active: bool,
    /// The channel is enabled for this pipe.
    pub(crate) in_progress: bool,
    /// NAKed bulk IN sitting out its retry delay; the channel keeps its programming.
    pub(crate) parked: bool,
    pub(crate) event: Option<PipeEvent>,
}

impl Default for Pipe {
    fn default() -> Self {
        Self {
            packet: Packet::new(Token::Out),
            buffer: None,
            len: 0,
            transferred: 0,
            transferring: 0,
            chunk: 0,
            max_packet_size: 0,
            interval_reload: 0,
            interval: 0,
            direction: Direction::Out,
            ep_type: EndpointType::Control,
            active: false,
            in_progress: false,
            parked: false,
            event: None,
        }
    }
}

impl Pipe {
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn transferred(&self) -> u32 {
        self.transferred
    }

    #[inline]
    pub fn interval_reload(&self) -> u16 {
        self.interval_reload
    }

    #[inline]
    pub fn interval(&self) -> u16 {
        self.interval
    }

    #[inline]
    pub fn endpoint_type(&self) -> EndpointType {
        self.ep_type
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    #[inline]
    pub fn max_packet_size(&self) -> u16 {
        self.max_packet_size
    }

    #[inline]
    pub(crate) fn remaining(&self) -> u32 {
        self.len.saturating_sub(self.transferred)
    }

    /// Credit bytes the core sent before an OUT start was cut short, from the packets HCTSIZ
    /// still counts.
    pub(crate) fn credit_partial_out(&mut self, packets_left: u32, nyet: bool) {
        let mps = u32::from(self.max_packet_size);
        if self.transferring >= mps && packets_left > 0 {
            self.transferred += self.transferring.saturating_sub(mps * packets_left);
        } else if nyet {
            self.transferred += self.transferring;
        }
        self.transferring = 0;
    }
}

/// SOF countdown reload for a periodic pipe. High speed counts micro-frames with power-of-two
/// intervals `2^(interval-1)`; full and low speed count frames.
pub const fn interval_reload(speed: Speed, interval: u8) -> u16 {
    match speed {
        Speed::High if interval > 0 && interval <= 16 => 1 << (interval - 1),
        Speed::Full | Speed::Low if interval > 0 => interval as u16,
        _ => 0,
    }
}

/// Bytes and packet count of one channel start.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Chunk {
    pub bytes: u32,
    pub packets: u32,
}

impl Chunk {
    pub(crate) const ZLP: Chunk = Chunk {
        bytes: 0,
        packets: 1,
    };
}

#[inline]
fn packets_for(bytes: u32, mps: u32) -> u32 {
    if bytes == 0 {
        1
    } else {
        bytes.div_ceil(mps)
    }
}

/// Size an OUT/SETUP start against the free TX FIFO space and request queue slots.
///
/// A start that cannot send everything stops on a packet boundary. `None` means nothing fits yet.
pub fn out_chunk(remaining: u32, mps: u16, fifo_words: u32, queue_slots: u32) -> Option<Chunk> {
    if remaining == 0 {
        return Some(Chunk::ZLP);
    }
    let mps = u32::from(mps).max(1);

    let mut bytes = remaining.min(fifo_words * 4);
    let packets = packets_for(bytes, mps).min(queue_slots);
    bytes = bytes.min(packets * mps);
    if bytes < remaining {
        bytes -= bytes % mps;
    }
    if bytes == 0 {
        return None;
    }
    Some(Chunk {
        bytes,
        packets: packets_for(bytes, mps),
    })
}

/// Size an IN start; limited only by the HCTSIZ field widths.
pub fn in_chunk(remaining: u32, mps: u16) -> Chunk {
    let mps = u32::from(mps).max(1);
    let max_packets = (hctsiz::PKTCNT_MSK >> hctsiz::PKTCNT_POS).min(hctsiz::XFRSIZ_MSK / mps);
    let bytes = remaining.min(max_packets * mps);
    Chunk {
        bytes,
        packets: packets_for(bytes, mps),
    }
}
