// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Controller configuration.
//!
//! FIFO partitioning is fixed when the core powers up. Sizes are in bytes and must be multiples of
//! four; the regions of one controller must fit the core's 4 KB of FIFO RAM. The defaults are
//! checked at compile time below.

use crate::Error;

/// Physical FIFO RAM shared by all RX/TX regions.
pub const FIFO_RAM_SIZE: u32 = 4096;

/// Highest device endpoint number supported by the core.
pub const MAX_ENDPOINT_NUM: usize = 5;

/// Host channels on the core.
pub const MAX_PIPES: usize = 16;

/// PHY wiring of the OTG_HS port.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phy {
    /// On-chip full-speed transceiver (PB14/PB15).
    InternalFullSpeed,
    /// External ULPI high-speed transceiver.
    UlpiHighSpeed,
}

impl Phy {
    #[inline]
    pub const fn is_ulpi(&self) -> bool {
        matches!(self, Phy::UlpiHighSpeed)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct DeviceConfig {
    pub rx_fifo_size: u16,
    /// TX FIFO per IN endpoint number; entries past `max_endpoint_num` are unused.
    pub tx_fifo_size: [u16; MAX_ENDPOINT_NUM + 1],
    /// Highest endpoint number the stack may configure.
    pub max_endpoint_num: u8,
    pub phy: Phy,
    /// Use the VBUS pin for session detection and report VBUS events.
    pub vbus_sensing: bool,
}

impl DeviceConfig {
    pub const DEFAULT: Self = Self {
        rx_fifo_size: 1152,
        tx_fifo_size: [384, 512, 512, 512, 512, 512],
        max_endpoint_num: 5,
        phy: Phy::InternalFullSpeed,
        vbus_sensing: false,
    };

    pub const fn with_phy(mut self, phy: Phy) -> Self {
        self.phy = phy;
        self
    }

    pub const fn with_vbus_sensing(mut self, enabled: bool) -> Self {
        self.vbus_sensing = enabled;
        self
    }

    /// Bytes of FIFO RAM claimed by the RX FIFO and the TX FIFOs in use.
    pub const fn fifo_total(&self) -> u32 {
        let mut total = self.rx_fifo_size as u32;
        let mut n = 0;
        while n <= self.max_endpoint_num as usize && n <= MAX_ENDPOINT_NUM {
            total += self.tx_fifo_size[n] as u32;
            n += 1;
        }
        total
    }

    /// Largest OUT max packet size the shared RX FIFO can take. The core reserves room for
    /// SETUP packets and one status word per OUT endpoint.
    pub const fn max_out_packet(&self) -> u32 {
        let reserved = 60 + 8 * self.max_endpoint_num as u32;
        (self.rx_fifo_size as u32).saturating_sub(reserved)
    }

    pub const fn validate(&self) -> Result<(), Error> {
        if self.max_endpoint_num as usize > MAX_ENDPOINT_NUM {
            return Err(Error::Parameter);
        }
        if self.rx_fifo_size % 4 != 0 {
            return Err(Error::Parameter);
        }
        let mut n = 0;
        while n <= MAX_ENDPOINT_NUM {
            if self.tx_fifo_size[n] % 4 != 0 {
                return Err(Error::Parameter);
            }
            n += 1;
        }
        if self.fifo_total() > FIFO_RAM_SIZE {
            return Err(Error::Parameter);
        }
        Ok(())
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HostConfig {
    pub rx_fifo_size: u16,
    /// Non-periodic (control/bulk) TX FIFO.
    pub nptx_fifo_size: u16,
    /// Periodic (interrupt/isochronous) TX FIFO.
    pub ptx_fifo_size: u16,
    /// Channels handed out to pipes.
    pub max_pipes: u8,
    /// SOFs to wait before retrying a NAKed bulk IN transfer. 0 retries at once.
    pub bulk_in_nak_delay: u16,
    pub phy: Phy,
}

impl HostConfig {
    pub const DEFAULT: Self = Self {
        rx_fifo_size: 2048,
        nptx_fifo_size: 1024,
        ptx_fifo_size: 1024,
        max_pipes: 16,
        bulk_in_nak_delay: 0,
        phy: Phy::InternalFullSpeed,
    };

    pub const fn with_phy(mut self, phy: Phy) -> Self {
        self.phy = phy;
        self
    }

    pub const fn with_bulk_in_nak_delay(mut self, sofs: u16) -> Self {
        self.bulk_in_nak_delay = sofs;
        self
    }

    pub const fn fifo_total(&self) -> u32 {
        self.rx_fifo_size as u32 + self.nptx_fifo_size as u32 + self.ptx_fifo_size as u32
    }

    pub const fn validate(&self) -> Result<(), Error> {
        if self.max_pipes == 0 || self.max_pipes as usize > MAX_PIPES {
            return Err(Error::Parameter);
        }
        if self.rx_fifo_size % 4 != 0 || self.nptx_fifo_size % 4 != 0 || self.ptx_fifo_size % 4 != 0
        {
            return Err(Error::Parameter);
        }
        if self.fifo_total() > FIFO_RAM_SIZE {
            return Err(Error::Parameter);
        }
        Ok(())
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self::DEFAULT
    }
}

const _: () = assert!(DeviceConfig::DEFAULT.validate().is_ok());
const _: () = assert!(HostConfig::DEFAULT.validate().is_ok());
