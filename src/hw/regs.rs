// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! DWC2 OTG_HS register map.
//!
//! Offsets are relative to the core base address. Per-endpoint and per-channel blocks repeat every
//! 0x20 bytes; the helpers below compute the address of register `n`.

/// Register offsets.
pub mod reg {
    pub const GOTGCTL: usize = 0x000;
    pub const GOTGINT: usize = 0x004;
    pub const GAHBCFG: usize = 0x008;
    pub const GUSBCFG: usize = 0x00C;
    pub const GRSTCTL: usize = 0x010;
    pub const GINTSTS: usize = 0x014;
    pub const GINTMSK: usize = 0x018;
    pub const GRXSTSR: usize = 0x01C;
    pub const GRXSTSP: usize = 0x020;
    pub const GRXFSIZ: usize = 0x024;
    /// DIEPTXF0 in device mode, HNPTXFSIZ in host mode.
    pub const DIEPTXF0_HNPTXFSIZ: usize = 0x028;
    pub const HNPTXSTS: usize = 0x02C;
    pub const GCCFG: usize = 0x038;
    pub const HPTXFSIZ: usize = 0x100;

    pub const HCFG: usize = 0x400;
    pub const HFIR: usize = 0x404;
    pub const HFNUM: usize = 0x408;
    pub const HPTXSTS: usize = 0x410;
    pub const HAINT: usize = 0x414;
    pub const HAINTMSK: usize = 0x418;
    pub const HPRT: usize = 0x440;

    pub const DCFG: usize = 0x800;
    pub const DCTL: usize = 0x804;
    pub const DSTS: usize = 0x808;
    pub const DIEPMSK: usize = 0x810;
    pub const DOEPMSK: usize = 0x814;
    pub const DAINT: usize = 0x818;
    pub const DAINTMSK: usize = 0x81C;

    pub const PCGCCTL: usize = 0xE00;

    /// Device IN endpoint TX FIFO size. FIFO 0 shares its slot with HNPTXFSIZ.
    #[inline]
    pub const fn dieptxf(n: usize) -> usize {
        if n == 0 {
            DIEPTXF0_HNPTXFSIZ
        } else {
            0x104 + 4 * (n - 1)
        }
    }

    #[inline]
    pub const fn hcchar(ch: usize) -> usize {
        0x500 + 0x20 * ch
    }
    #[inline]
    pub const fn hcint(ch: usize) -> usize {
        0x508 + 0x20 * ch
    }
    #[inline]
    pub const fn hcintmsk(ch: usize) -> usize {
        0x50C + 0x20 * ch
    }
    #[inline]
    pub const fn hctsiz(ch: usize) -> usize {
        0x510 + 0x20 * ch
    }

    #[inline]
    pub const fn diepctl(ep: usize) -> usize {
        0x900 + 0x20 * ep
    }
    #[inline]
    pub const fn diepint(ep: usize) -> usize {
        0x908 + 0x20 * ep
    }
    #[inline]
    pub const fn dieptsiz(ep: usize) -> usize {
        0x910 + 0x20 * ep
    }
    #[inline]
    pub const fn dtxfsts(ep: usize) -> usize {
        0x918 + 0x20 * ep
    }

    #[inline]
    pub const fn doepctl(ep: usize) -> usize {
        0xB00 + 0x20 * ep
    }
    #[inline]
    pub const fn doepint(ep: usize) -> usize {
        0xB08 + 0x20 * ep
    }
    #[inline]
    pub const fn doeptsiz(ep: usize) -> usize {
        0xB10 + 0x20 * ep
    }
}

pub mod gotgctl {
    pub const BVALOEN: u32 = 1 << 6;
    pub const BVALOVAL: u32 = 1 << 7;
}

pub mod gotgint {
    /// Session end detected.
    pub const SEDET: u32 = 1 << 2;
}

pub mod gahbcfg {
    pub const GINT: u32 = 1 << 0;
    pub const TXFELVL: u32 = 1 << 7;
}

pub mod gusbcfg {
    pub const PHYSEL: u32 = 1 << 6;
    pub const TRDT_POS: u32 = 10;
    pub const TRDT_MSK: u32 = 0xF << TRDT_POS;
    pub const PHYLPCS: u32 = 1 << 15;
    pub const ULPIFSLS: u32 = 1 << 17;
    pub const ULPIEVBUSD: u32 = 1 << 20;
    pub const ULPIEVBUSI: u32 = 1 << 21;
    pub const TSDPS: u32 = 1 << 22;
    pub const FHMOD: u32 = 1 << 29;
    pub const FDMOD: u32 = 1 << 30;
}

pub mod grstctl {
    pub const CSRST: u32 = 1 << 0;
    pub const TXFFLSH: u32 = 1 << 5;
    pub const TXFNUM_POS: u32 = 6;
    pub const TXFNUM_MSK: u32 = 0x1F << TXFNUM_POS;
    /// TXFNUM value selecting every TX FIFO.
    pub const TXFNUM_ALL: u32 = 0x10;
    pub const AHBIDL: u32 = 1 << 31;
}

/// Bits shared by GINTSTS and GINTMSK.
pub mod gintsts {
    pub const OTGINT: u32 = 1 << 2;
    pub const SOF: u32 = 1 << 3;
    pub const RXFLVL: u32 = 1 << 4;
    pub const GONAKEFF: u32 = 1 << 7;
    pub const USBSUSP: u32 = 1 << 11;
    pub const USBRST: u32 = 1 << 12;
    pub const ENUMDNE: u32 = 1 << 13;
    pub const EOPF: u32 = 1 << 15;
    pub const IEPINT: u32 = 1 << 18;
    pub const OEPINT: u32 = 1 << 19;
    pub const IISOIXFR: u32 = 1 << 20;
    pub const IPXFR: u32 = 1 << 21;
    pub const HPRTINT: u32 = 1 << 24;
    pub const HCINT: u32 = 1 << 25;
    pub const DISCINT: u32 = 1 << 29;
    pub const SRQINT: u32 = 1 << 30;
    pub const WKUPINT: u32 = 1 << 31;
}

pub mod gccfg {
    pub const PWRDWN: u32 = 1 << 16;
    /// VBUS detection enable.
    pub const VBDEN: u32 = 1 << 21;
}

pub mod pcgcctl {
    pub const STPPCLK: u32 = 1 << 0;
}

pub mod dcfg {
    pub const DSPD_MSK: u32 = 0x3;
    pub const DAD_POS: u32 = 4;
    pub const DAD_MSK: u32 = 0x7F << DAD_POS;
}

pub mod dctl {
    pub const RWUSIG: u32 = 1 << 0;
    pub const SDIS: u32 = 1 << 1;
    pub const CGINAK: u32 = 1 << 8;
    pub const SGONAK: u32 = 1 << 9;
    pub const CGONAK: u32 = 1 << 10;
}

pub mod dsts {
    pub const ENUMSPD_POS: u32 = 1;
    pub const ENUMSPD_MSK: u32 = 0x3 << ENUMSPD_POS;
    pub const FNSOF_POS: u32 = 8;
    pub const FNSOF_MSK: u32 = 0x3FFF << FNSOF_POS;
}

/// Bits shared by DIEPINTx and DIEPMSK.
pub mod diepint {
    pub const XFRC: u32 = 1 << 0;
    pub const EPDISD: u32 = 1 << 1;
    pub const TOC: u32 = 1 << 3;
    pub const ITTXFE: u32 = 1 << 4;
    pub const INEPNE: u32 = 1 << 6;
    pub const TXFE: u32 = 1 << 7;
}

/// Bits shared by DOEPINTx and DOEPMSK.
pub mod doepint {
    pub const XFRC: u32 = 1 << 0;
    pub const EPDISD: u32 = 1 << 1;
    pub const STUP: u32 = 1 << 3;
    pub const OTEPDIS: u32 = 1 << 4;
    pub const B2BSTUP: u32 = 1 << 6;
}

/// Bits shared by DIEPCTLx and DOEPCTLx.
pub mod depctl {
    pub const MPSIZ_MSK: u32 = 0x7FF;
    pub const USBAEP: u32 = 1 << 15;
    /// Even/odd frame of an isochronous endpoint.
    pub const EONUM: u32 = 1 << 16;
    pub const EPTYP_POS: u32 = 18;
    pub const EPTYP_MSK: u32 = 0x3 << EPTYP_POS;
    pub const STALL: u32 = 1 << 21;
    pub const TXFNUM_POS: u32 = 22;
    pub const CNAK: u32 = 1 << 26;
    pub const SNAK: u32 = 1 << 27;
    pub const SD0PID: u32 = 1 << 28;
    pub const SEVNFRM: u32 = 1 << 28;
    pub const SODDFRM: u32 = 1 << 29;
    pub const EPDIS: u32 = 1 << 30;
    pub const EPENA: u32 = 1 << 31;
}

/// Bits shared by DIEPTSIZx and DOEPTSIZx.
pub mod deptsiz {
    pub const XFRSIZ_MSK: u32 = 0x7FFFF;
    pub const PKTCNT_POS: u32 = 19;
    pub const PKTCNT_MSK: u32 = 0x3FF << PKTCNT_POS;
    /// IN: packets per frame. OUT: received data PID. EP0 OUT: SETUP packet count.
    pub const MCNT_POS: u32 = 29;
    pub const RXDPID_POS: u32 = 29;
    pub const RXDPID_MSK: u32 = 0x3 << RXDPID_POS;
    pub const STUPCNT_POS: u32 = 29;
}

pub mod dtxfsts {
    /// Free TX FIFO space in words.
    pub const INEPTFSAV_MSK: u32 = 0xFFFF;
}

pub mod hcfg {
    pub const FSLSPCS_48MHZ: u32 = 0x1;
    pub const FSLSPCS_6MHZ: u32 = 0x2;
}

/// Bits shared by HNPTXSTS and HPTXSTS.
pub mod txsts {
    /// Free TX FIFO space in words.
    pub const FSAV_MSK: u32 = 0xFFFF;
    /// Free request queue slots.
    pub const QSAV_POS: u32 = 16;
    pub const QSAV_MSK: u32 = 0xFF << QSAV_POS;
}

pub mod hprt {
    pub const PCSTS: u32 = 1 << 0;
    pub const PCDET: u32 = 1 << 1;
    pub const PENA: u32 = 1 << 2;
    pub const PENCHNG: u32 = 1 << 3;
    pub const POCA: u32 = 1 << 4;
    pub const POCCHNG: u32 = 1 << 5;
    pub const PRES: u32 = 1 << 6;
    pub const PSUSP: u32 = 1 << 7;
    pub const PRST: u32 = 1 << 8;
    pub const PPWR: u32 = 1 << 12;
    pub const PSPD_POS: u32 = 17;
    pub const PSPD_MSK: u32 = 0x3 << PSPD_POS;
    /// Write-1-to-clear bits. PENA is included: writing it back disables the port.
    pub const W1C: u32 = PCDET | PENA | PENCHNG | POCCHNG;
}

pub mod hcchar {
    pub const MPSIZ_MSK: u32 = 0x7FF;
    pub const EPNUM_POS: u32 = 11;
    pub const EPNUM_MSK: u32 = 0xF << EPNUM_POS;
    pub const EPDIR: u32 = 1 << 15;
    pub const LSDEV: u32 = 1 << 17;
    pub const EPTYP_POS: u32 = 18;
    pub const EPTYP_MSK: u32 = 0x3 << EPTYP_POS;
    pub const MC_POS: u32 = 20;
    pub const MC_MSK: u32 = 0x3 << MC_POS;
    pub const DAD_POS: u32 = 22;
    pub const DAD_MSK: u32 = 0x7F << DAD_POS;
    pub const ODDFRM: u32 = 1 << 29;
    pub const CHDIS: u32 = 1 << 30;
    pub const CHENA: u32 = 1 << 31;
    /// Every field except CHENA/CHDIS; all zero means the channel is free.
    pub const CONFIG_MSK: u32 = 0x3FFF_FFFF;
}

/// Bits shared by HCINTx and HCINTMSKx.
pub mod hcint {
    pub const XFRC: u32 = 1 << 0;
    pub const CHH: u32 = 1 << 1;
    pub const STALL: u32 = 1 << 3;
    pub const NAK: u32 = 1 << 4;
    pub const ACK: u32 = 1 << 5;
    pub const NYET: u32 = 1 << 6;
    pub const TXERR: u32 = 1 << 7;
    pub const BBERR: u32 = 1 << 8;
    pub const FRMOR: u32 = 1 << 9;
    pub const DTERR: u32 = 1 << 10;
    pub const ERRORS: u32 = TXERR | BBERR | FRMOR | DTERR;
    pub const ALL: u32 = 0x7FF;
}

pub mod hctsiz {
    pub const XFRSIZ_MSK: u32 = 0x7FFFF;
    pub const PKTCNT_POS: u32 = 19;
    pub const PKTCNT_MSK: u32 = 0x3FF << PKTCNT_POS;
    pub const DPID_POS: u32 = 29;
    pub const DPID_MSK: u32 = 0x3 << DPID_POS;
    pub const DOPING: u32 = 1 << 31;
}

/// Data PID encodings used by the DPID/RXDPID fields.
pub mod pid {
    pub const DATA0: u32 = 0b00;
    pub const DATA2: u32 = 0b01;
    pub const DATA1: u32 = 0b10;
    /// MDATA for data stages, SETUP for host control transfers.
    pub const MDATA: u32 = 0b11;
}

/// Packet status codes popped from GRXSTSP.
pub mod pktsts {
    pub const GLOBAL_OUT_NAK: u32 = 1;
    /// Device OUT data / host IN data.
    pub const DATA: u32 = 2;
    pub const TRANSFER_COMPLETE: u32 = 3;
    pub const SETUP_COMPLETE: u32 = 4;
    pub const SETUP_DATA: u32 = 6;
}

/// Receive status word popped from GRXSTSP.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RxStatus {
    raw: u32,
}

impl RxStatus {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self { raw }
    }

    #[inline]
    pub const fn raw(&self) -> u32 {
        self.raw
    }

    /// Endpoint number (device) or channel number (host).
    #[inline]
    pub const fn number(&self) -> usize {
        (self.raw & 0xF) as usize
    }

    /// Byte count of the packet.
    #[inline]
    pub const fn byte_count(&self) -> usize {
        ((self.raw >> 4) & 0x7FF) as usize
    }

    /// Data PID of the packet.
    #[inline]
    pub const fn dpid(&self) -> u32 {
        (self.raw >> 15) & 0x3
    }

    #[inline]
    pub const fn packet_status(&self) -> u32 {
        (self.raw >> 17) & 0xF
    }
}

/// Host channel transfer size register value.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ChannelSize {
    raw: u32,
}

impl ChannelSize {
    #[inline]
    pub const fn new(raw: u32) -> Self {
        Self { raw }
    }

    #[inline]
    pub const fn raw(&self) -> u32 {
        self.raw
    }

    #[inline]
    pub const fn transfer_size(&self) -> u32 {
        self.raw & hctsiz::XFRSIZ_MSK
    }

    /// Packets still to be transferred.
    #[inline]
    pub const fn packet_count(&self) -> u32 {
        (self.raw & hctsiz::PKTCNT_MSK) >> hctsiz::PKTCNT_POS
    }

    #[inline]
    pub const fn dpid(&self) -> u32 {
        (self.raw & hctsiz::DPID_MSK) >> hctsiz::DPID_POS
    }

    #[inline]
    pub const fn do_ping(&self) -> bool {
        (self.raw & hctsiz::DOPING) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_blocks_repeat_every_0x20() {
        assert_eq!(reg::hcchar(0), 0x500);
        assert_eq!(reg::hctsiz(15), 0x510 + 15 * 0x20);
        assert_eq!(reg::diepctl(5), 0x9A0);
        assert_eq!(reg::dtxfsts(1), 0x938);
        assert_eq!(reg::doeptsiz(0), 0xB10);
        assert_eq!(reg::dieptxf(0), 0x028);
        assert_eq!(reg::dieptxf(3), 0x10C);
    }

    #[test]
    fn rx_status_fields() {
        // ch 3, 64 bytes, DATA1, packet status DATA
        let raw = 3 | (64 << 4) | (pid::DATA1 << 15) | (pktsts::DATA << 17);
        let s = RxStatus::new(raw);
        assert_eq!(s.number(), 3);
        assert_eq!(s.byte_count(), 64);
        assert_eq!(s.dpid(), pid::DATA1);
        assert_eq!(s.packet_status(), pktsts::DATA);
    }

    #[test]
    fn channel_size_fields() {
        let s = ChannelSize::new(hctsiz::DOPING | (pid::MDATA << 29) | (2 << 19) | 1024);
        assert!(s.do_ping());
        assert_eq!(s.dpid(), pid::MDATA);
        assert_eq!(s.packet_count(), 2);
        assert_eq!(s.transfer_size(), 1024);
    }
}
