// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! USB types shared by the device and host controllers.

use core::ptr::NonNull;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Out,
    In,
}

/// Endpoint address as it appears in descriptors: bits 0..3 number, bit 7 direction (1 = IN).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointAddress(u8);

impl EndpointAddress {
    const DIR_IN: u8 = 0x80;

    #[inline]
    pub const fn new(number: u8, direction: Direction) -> Self {
        match direction {
            Direction::Out => Self(number & 0x0F),
            Direction::In => Self((number & 0x0F) | Self::DIR_IN),
        }
    }

    /// From a raw descriptor byte. Reserved bits 4..6 are ignored.
    #[inline]
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw & (0x0F | Self::DIR_IN))
    }

    #[inline]
    pub const fn raw(&self) -> u8 {
        self.0
    }

    #[inline]
    pub const fn number(&self) -> u8 {
        self.0 & 0x0F
    }

    #[inline]
    pub const fn direction(&self) -> Direction {
        if self.0 & Self::DIR_IN != 0 {
            Direction::In
        } else {
            Direction::Out
        }
    }

    #[inline]
    pub const fn is_in(&self) -> bool {
        self.0 & Self::DIR_IN != 0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EndpointType {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

impl EndpointType {
    /// EPTYP field encoding.
    #[inline]
    pub const fn bits(&self) -> u32 {
        match self {
            EndpointType::Control => 0,
            EndpointType::Isochronous => 1,
            EndpointType::Bulk => 2,
            EndpointType::Interrupt => 3,
        }
    }

    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        match bits & 0x3 {
            0 => EndpointType::Control,
            1 => EndpointType::Isochronous,
            2 => EndpointType::Bulk,
            _ => EndpointType::Interrupt,
        }
    }

    #[inline]
    pub const fn is_periodic(&self) -> bool {
        matches!(self, EndpointType::Isochronous | EndpointType::Interrupt)
    }
}

/// Size field of `wMaxPacketSize`.
#[inline]
pub const fn max_packet_size(raw: u16) -> u16 {
    raw & 0x07FF
}

/// Transactions per micro-frame encoded in bits 11..12 of `wMaxPacketSize` (1..=3).
#[inline]
pub const fn transactions_per_microframe(raw: u16) -> u8 {
    1 + ((raw >> 11) & 0x3) as u8
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Speed {
    Low,
    Full,
    High,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerState {
    Off,
    Low,
    Full,
}

/// Driver version pair: API the driver implements and the driver's own revision, both
/// `major << 8 | minor`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Version {
    pub api: u16,
    pub driver: u16,
}

pub const VERSION: Version = Version {
    api: 0x0202,
    driver: 0x0219,
};

/// Caller-owned transfer buffer lent to a controller for the duration of one transfer.
///
/// The controller reads (IN/OUT to the bus) or writes (received data) through it from interrupt
/// context, so the memory must stay valid and untouched by the caller until the transfer completes
/// or is aborted.
#[derive(Debug)]
pub struct Buffer {
    ptr: NonNull<u8>,
    len: usize,
}

// The buffer is only touched by whoever owns the controller.
unsafe impl Send for Buffer {}

impl Buffer {
    pub fn new(data: &'static mut [u8]) -> Self {
        Self {
            len: data.len(),
            ptr: NonNull::from(data).cast(),
        }
    }

    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes until the transfer using this buffer
    /// completes or is aborted, and nothing else may access that memory meanwhile.
    pub unsafe fn from_raw_parts(ptr: *mut u8, len: usize) -> Self {
        match NonNull::new(ptr) {
            Some(ptr) => Self { ptr, len },
            None => Self::empty(),
        }
    }

    /// Zero-length buffer for ZLPs and status stages.
    pub const fn empty() -> Self {
        Self {
            ptr: NonNull::dangling(),
            len: 0,
        }
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub(crate) fn as_slice(&self) -> &[u8] {
        // SAFETY: validity for `len` bytes is the constructor's contract.
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    #[inline]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        // SAFETY: as above, and `&mut self` keeps the slice unique within the controller.
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}
