// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Device interrupt dispatch and the FIFO movers it drives.
//!
//! Flags are serviced in a fixed order: bus reset, suspend/resume, enumeration, first SOF, RX
//! FIFO, OUT endpoints, IN endpoints, end of periodic frame, VBUS session.

use embedded_hal::delay::DelayNs;

use super::endpoint::{expected_iso_pid, EndpointId};
use super::{DeviceEvent, DeviceState, EndpointEvent, Signals, UsbDevice};
use crate::hw::fifo;
use crate::hw::regs::{
    dcfg, dctl, depctl, deptsiz, diepint, doepint, dsts, dtxfsts, gintsts, gotgint, pcgcctl,
    pktsts, reg, RxStatus,
};
use crate::hw::Registers;
use crate::usb::{Direction, EndpointAddress, EndpointType, Speed};

/// `bmRequestType`/`bRequest` of a standard SET_ADDRESS request, as the first setup half-word.
const SET_ADDRESS: u32 = 0x0500;

impl<R, D, S> UsbDevice<R, D, S>
where
    R: Registers,
    D: DelayNs,
    S: Signals,
{
    /// Service the controller interrupt. Call from the OTG interrupt handler; does nothing while
    /// the controller is powered off.
    pub fn on_interrupt(&mut self) {
        if !self.powered {
            return;
        }
        let status = self.regs.read(reg::GINTSTS) & self.regs.read(reg::GINTMSK);

        if status & gintsts::USBRST != 0 {
            self.regs.write(reg::GINTSTS, gintsts::USBRST);
            // The first SOF after reset marks the bus active.
            self.regs.set_bits(reg::GINTMSK, gintsts::SOF);
            self.bus_reset();
            self.state.active = false;
            self.state.speed = Speed::Full;
            debug!("bus reset");
            self.signal_device(DeviceEvent::Reset);
        }

        if status & gintsts::USBSUSP != 0 {
            self.regs.write(reg::GINTSTS, gintsts::USBSUSP);
            if !self.config.phy.is_ulpi() {
                self.regs.set_bits(reg::PCGCCTL, pcgcctl::STPPCLK);
            }
            self.state.active = false;
            self.signal_device(DeviceEvent::Suspend);
        }

        if status & gintsts::WKUPINT != 0 {
            self.regs.write(reg::GINTSTS, gintsts::WKUPINT);
            if !self.config.phy.is_ulpi() {
                self.regs.clear_bits(reg::PCGCCTL, pcgcctl::STPPCLK);
            }
            self.state.active = true;
            self.signal_device(DeviceEvent::Resume);
        }

        if status & gintsts::ENUMDNE != 0 {
            self.regs.write(reg::GINTSTS, gintsts::ENUMDNE);
            match (self.regs.read(reg::DSTS) & dsts::ENUMSPD_MSK) >> dsts::ENUMSPD_POS {
                0 => {
                    self.state.speed = Speed::High;
                    self.signal_device(DeviceEvent::HighSpeed);
                }
                3 => self.state.speed = Speed::Full,
                _ => {}
            }
            self.regs.set_bits(reg::DCTL, dctl::CGINAK);
            self.regs.set_bits(reg::DCTL, dctl::CGONAK);
        }

        if !self.state.active && status & gintsts::SOF != 0 {
            self.regs.clear_bits(reg::GINTMSK, gintsts::SOF);
            self.regs.write(reg::GINTSTS, gintsts::SOF);
            self.state.active = true;
            self.signal_device(DeviceEvent::Resume);
        }

        if status & gintsts::RXFLVL != 0 {
            self.on_rx_status();
        }

        if status & gintsts::OEPINT != 0 {
            let pending = (self.regs.read(reg::DAINT) & self.regs.read(reg::DAINTMSK)) >> 16;
            self.for_each_endpoint(pending, Self::on_out_endpoint);
        }

        if status & gintsts::IEPINT != 0 {
            let pending = self.regs.read(reg::DAINT) & self.regs.read(reg::DAINTMSK) & 0xFFFF;
            self.for_each_endpoint(pending, Self::on_in_endpoint);
        }

        if status & gintsts::EOPF != 0 {
            self.on_end_of_periodic_frame();
        }

        if status & gintsts::SRQINT != 0 {
            self.regs.write(reg::GINTSTS, gintsts::SRQINT);
            self.state.vbus = true;
            self.signal_device(DeviceEvent::VbusOn);
        }

        if status & gintsts::OTGINT != 0 {
            let otg = self.regs.read(reg::GOTGINT);
            self.regs.write(reg::GOTGINT, otg);
            if otg & gotgint::SEDET != 0 {
                self.state = DeviceState::default();
                self.signal_device(DeviceEvent::VbusOff);
            }
        }
    }

    fn for_each_endpoint(&mut self, pending: u32, mut handler: impl FnMut(&mut Self, usize)) {
        for n in 0..=self.config.max_endpoint_num as usize {
            if pending & (1 << n) != 0 {
                handler(self, n);
            }
        }
    }

    fn on_rx_status(&mut self) {
        let status = RxStatus::new(self.regs.read(reg::GRXSTSP));
        let n = status.number();
        let count = status.byte_count();

        match status.packet_status() {
            pktsts::SETUP_DATA => {
                let words = [self.regs.read_fifo(0), self.regs.read_fifo(0)];
                // Anything past the 8-byte request is dropped.
                fifo::read_packet(&mut self.regs, 0, &mut [], count.saturating_sub(8));
                if words[0] & 0xFFFF == SET_ADDRESS {
                    let address = (words[0] >> 16) & 0x7F;
                    self.regs.modify(reg::DCFG, |v| {
                        (v & !dcfg::DAD_MSK) | (address << dcfg::DAD_POS)
                    });
                }
                self.setup.store(words);
            }
            pktsts::DATA => self.read_from_fifo(n, count),
            _ => {}
        }
    }

    fn on_out_endpoint(&mut self, n: usize) {
        let id = EndpointId::out(n);
        let events = self.regs.read(reg::doepint(n)) & self.regs.read(reg::DOEPMSK);
        let iso = self.out_type(n) == EndpointType::Isochronous;

        if events & doepint::EPDISD != 0 {
            if iso {
                // Re-arm an isochronous endpoint dropped for a missed frame.
                let ep = &self.endpoints[id];
                self.regs.write(
                    reg::doeptsiz(n),
                    (u32::from(ep.packet_count) << deptsiz::PKTCNT_POS) | ep.remaining,
                );
                self.set_frame_parity(reg::doepctl(n));
                self.regs
                    .set_bits(reg::doepctl(n), depctl::EPENA | depctl::CNAK);
            }
            self.regs.write(reg::doepint(n), doepint::EPDISD);
        }

        if events & doepint::STUP != 0 {
            self.endpoints[id].remaining = 0;
            self.regs.write(reg::doepint(n), doepint::STUP);
            self.signal_endpoint(
                EndpointAddress::new(n as u8, Direction::Out),
                EndpointEvent::Setup,
            );
        }

        if events & doepint::XFRC != 0 {
            self.regs.write(reg::doepint(n), doepint::XFRC);
            if self.endpoints[id].remaining != 0 {
                if !iso {
                    self.arm_out(n);
                }
            } else {
                self.endpoints[id].active = false;
                self.signal_endpoint(
                    EndpointAddress::new(n as u8, Direction::Out),
                    EndpointEvent::Out,
                );
            }
        }
    }

    fn on_in_endpoint(&mut self, n: usize) {
        let id = EndpointId::in_(n);
        let events = self.regs.read(reg::diepint(n)) & self.regs.read(reg::DIEPMSK);
        let iso = self.in_type(n) == EndpointType::Isochronous;

        if events & diepint::EPDISD != 0 {
            self.regs.write(reg::diepint(n), diepint::EPDISD);
            if self.endpoints[id].in_flush {
                self.endpoints[id].in_flush = false;
                self.flush_tx_fifo(n as u32);
            } else if iso && self.iso_in_incomplete & (1 << n) != 0 {
                // Drop the stale burst and resend it in the next frame.
                self.flush_tx_fifo(n as u32);
                let ep = &mut self.endpoints[id];
                if ep.buffer.is_some() {
                    ep.remaining += ep.in_flight;
                    self.write_to_fifo(n);
                }
                self.iso_in_incomplete &= !(1 << n);
            }
        }

        if events & diepint::INEPNE != 0 {
            if self.endpoints[id].in_nak {
                self.endpoints[id].in_nak = false;
                if !self.endpoints.any_in_nak() {
                    self.regs.clear_bits(reg::DIEPMSK, diepint::INEPNE);
                }
                let ep = &self.endpoints[id];
                if ep.remaining != 0 || ep.in_zlp {
                    self.write_to_fifo(n);
                }
            }
            self.regs.write(reg::diepint(n), diepint::INEPNE);
        }

        if events & diepint::XFRC != 0 {
            self.regs.write(reg::diepint(n), diepint::XFRC);
            let ep = &mut self.endpoints[id];
            ep.transferred += ep.in_flight;
            ep.in_flight = 0;
            if ep.remaining == 0 {
                ep.buffer = None;
                ep.active = false;
                self.signal_endpoint(
                    EndpointAddress::new(n as u8, Direction::In),
                    EndpointEvent::In,
                );
            } else if !iso {
                self.write_to_fifo(n);
            }
        }
    }

    fn on_end_of_periodic_frame(&mut self) {
        let raw = self.regs.read(reg::GINTSTS);
        self.regs.write(
            reg::GINTSTS,
            gintsts::EOPF | gintsts::IPXFR | gintsts::IISOIXFR,
        );
        let odd = u32::from(self.frame_number() & 1);

        for n in 1..=self.config.max_endpoint_num as usize {
            let ctl = self.regs.read(reg::doepctl(n));
            if self.out_type(n) != EndpointType::Isochronous || ctl & depctl::USBAEP == 0 {
                continue;
            }
            if raw & gintsts::IPXFR != 0 {
                let frame = (ctl & depctl::EONUM) >> 16;
                if frame == odd && ctl & depctl::EPENA != 0 {
                    self.regs.set_bits(reg::doepctl(n), depctl::EPDIS);
                }
            } else if self.endpoints[EndpointId::out(n)].remaining != 0 {
                self.arm_out(n);
            }
        }

        for n in 1..=self.config.max_endpoint_num as usize {
            let ctl = self.regs.read(reg::diepctl(n));
            if self.in_type(n) != EndpointType::Isochronous || ctl & depctl::USBAEP == 0 {
                continue;
            }
            if raw & gintsts::IISOIXFR != 0 {
                let frame = (ctl & depctl::EONUM) >> 16;
                if ctl & depctl::EPENA != 0 && frame == odd {
                    trace!("iso IN {} missed its frame", n);
                    self.iso_in_incomplete |= 1 << n;
                    self.regs
                        .set_bits(reg::diepctl(n), depctl::EPDIS | depctl::SNAK);
                }
            } else if self.endpoints[EndpointId::in_(n)].remaining != 0 {
                self.write_to_fifo(n);
            }
        }
    }

    /// Program OUT endpoint `n` for its next packet (or isochronous burst) and enable it.
    pub(super) fn arm_out(&mut self, n: usize) {
        let iso = self.out_type(n) == EndpointType::Isochronous;
        let ep = &self.endpoints[EndpointId::out(n)];

        let mut size = (u32::from(ep.packet_count) << deptsiz::PKTCNT_POS) | ep.next_chunk(iso);
        if n == 0 {
            size |= 3 << deptsiz::STUPCNT_POS;
        }
        self.regs.write(reg::doeptsiz(n), size);
        if iso {
            self.set_frame_parity(reg::doepctl(n));
        }
        self.regs
            .set_bits(reg::doepctl(n), depctl::EPENA | depctl::CNAK);
    }

    /// Copy one received OUT packet into the endpoint's buffer.
    ///
    /// The packet is always popped in full. Bytes past the buffer, packets for an inactive
    /// endpoint, and isochronous packets with an out-of-sequence PID are dropped.
    fn read_from_fifo(&mut self, n: usize, received: usize) {
        let id = EndpointId::out(n);
        let usable = n <= self.config.max_endpoint_num as usize
            && self.regs.read(reg::doepctl(n)) & depctl::USBAEP != 0
            && self.endpoints[id].buffer.is_some();
        if !usable {
            fifo::read_packet(&mut self.regs, 0, &mut [], received);
            return;
        }

        let mut keep = (received as u32).min(self.endpoints[id].remaining);
        if self.out_type(n) == EndpointType::Isochronous {
            let size = self.regs.read(reg::doeptsiz(n));
            let requested = self.endpoints[id].packet_count;
            let left = (size & deptsiz::PKTCNT_MSK) >> deptsiz::PKTCNT_POS;
            let position = u32::from(requested).saturating_sub(left);
            let pid = (size & deptsiz::RXDPID_MSK) >> deptsiz::RXDPID_POS;
            if expected_iso_pid(requested, position) != Some(pid) {
                trace!("iso OUT {} dropped packet {} with pid {}", n, position, pid);
                keep = 0;
            }
        }

        let ep = &mut self.endpoints[id];
        let start = ep.transferred as usize;
        let dest: &mut [u8] = match ep.buffer.as_mut() {
            Some(buffer) => buffer
                .as_mut_slice()
                .get_mut(start..start + keep as usize)
                .unwrap_or_default(),
            None => &mut [],
        };
        fifo::read_packet(&mut self.regs, 0, dest, received);

        ep.transferred += keep;
        if keep != u32::from(ep.max_packet_size) {
            // Short packet ends the transfer.
            ep.remaining = 0;
        } else {
            ep.remaining -= keep;
        }
    }

    /// Load the next IN packet (or isochronous burst) into TX FIFO `n` if it fits.
    fn write_to_fifo(&mut self, n: usize) {
        let id = EndpointId::in_(n);
        let iso = self.in_type(n) == EndpointType::Isochronous;
        let chunk = self.endpoints[id].next_chunk(iso);

        let space = (self.regs.read(reg::dtxfsts(n)) & dtxfsts::INEPTFSAV_MSK) * 4;
        if space < chunk {
            return;
        }

        let count = u32::from(self.endpoints[id].packet_count);
        self.regs.write(
            reg::dieptsiz(n),
            (count << deptsiz::PKTCNT_POS) | (count << deptsiz::MCNT_POS) | chunk,
        );
        if iso {
            self.set_frame_parity(reg::diepctl(n));
        }
        self.regs
            .set_bits(reg::diepctl(n), depctl::EPENA | depctl::CNAK);

        let ep = &mut self.endpoints[id];
        ep.in_flight = chunk;
        ep.remaining -= chunk;
        ep.in_zlp = false;

        let start = ep.transferred as usize;
        if let Some(buffer) = ep.buffer.as_ref() {
            let src = buffer
                .as_slice()
                .get(start..start + chunk as usize)
                .unwrap_or_default();
            self.regs
                .with_irq_masked(|regs| fifo::write_packet(regs, n, src));
        }
    }

    /// Schedule an isochronous endpoint for the frame after the current one.
    fn set_frame_parity(&mut self, ctl: usize) {
        if self.frame_number() & 1 != 0 {
            self.regs.set_bits(ctl, depctl::SEVNFRM);
        } else {
            self.regs.set_bits(ctl, depctl::SODDFRM);
        }
    }
}
