// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Host interrupt dispatch: root port, RX FIFO, channel status, SOF pacing and restarts.

use embedded_hal::delay::DelayNs;

use super::{PipeEvent, PortEvent, Signals, Start, Token, UsbHost};
use crate::hw::fifo;
use crate::hw::regs::{gintsts, hcchar, hcfg, hcint, hprt, pktsts, reg, ChannelSize, RxStatus};
use crate::hw::Registers;
use crate::usb::EndpointType;

/// Ask the core to halt channel `ch`; completion arrives as CHH.
fn halt<R: Registers>(regs: &mut R, ch: usize) {
    regs.write(reg::hcintmsk(ch), hcint::CHH);
    regs.set_bits(reg::hcchar(ch), hcchar::CHENA | hcchar::CHDIS);
}

impl<R, D, S> UsbHost<R, D, S>
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

        if status & gintsts::HPRTINT != 0 {
            self.on_port_interrupt();
        }

        if status & gintsts::DISCINT != 0 {
            self.regs.write(reg::GINTSTS, gintsts::DISCINT);
            if !self.port_reset {
                self.on_disconnect();
            }
        }

        if status & gintsts::RXFLVL != 0 {
            self.on_rx_status();
        }

        if status & gintsts::HCINT != 0 {
            let pending = self.regs.read(reg::HAINT);
            for ch in 0..self.config.max_pipes as usize {
                if pending & (1 << ch) != 0 {
                    self.on_channel(ch);
                }
            }
        }

        if status & gintsts::SOF != 0 {
            self.regs.write(reg::GINTSTS, gintsts::SOF);
            for p in self.pipes.iter_mut().filter(|p| p.active) {
                p.interval = p.interval.saturating_sub(1);
            }
        }

        self.restart_pipes();
    }

    pub(super) fn on_port_interrupt(&mut self) {
        let v = self.regs.read(reg::HPRT);
        // Acknowledge the change bits without writing PENA back.
        self.regs.write(reg::HPRT, v & !hprt::PENA);

        if v & hprt::PCDET != 0 {
            let ulpi = self.config.phy.is_ulpi();
            let (frame, clock) = match (v & hprt::PSPD_MSK) >> hprt::PSPD_POS {
                0 => (7500, None),
                2 => (6000, Some(hcfg::FSLSPCS_6MHZ)),
                _ if ulpi => (7500, None),
                _ => (48000, Some(hcfg::FSLSPCS_48MHZ)),
            };
            self.regs.write(reg::HFIR, frame);
            if let Some(clock) = clock {
                self.regs.write(reg::HCFG, clock);
            }
            if !self.port_reset {
                debug!("device connected");
                self.signal_port(PortEvent::Connect);
            }
        }

        if v & hprt::PENCHNG != 0 && v & hprt::PENA != 0 && self.port_reset {
            self.port_reset = false;
            debug!("port enabled");
            self.signal_port(PortEvent::Reset);
        }
    }

    fn on_disconnect(&mut self) {
        for ch in 0..self.config.max_pipes as usize {
            if !self.pipes[ch].active {
                continue;
            }
            let p = &mut self.pipes[ch];
            p.active = false;
            p.in_progress = false;
            p.parked = false;
            p.buffer = None;
            p.event = None;

            self.regs.write(reg::hcint(ch), hcint::ALL);
            halt(&mut self.regs, ch);
            self.signal_pipe(ch, PipeEvent::BusError);
        }
        debug!("device disconnected");
        self.signal_port(PortEvent::Disconnect);
    }

    fn on_rx_status(&mut self) {
        let status = RxStatus::new(self.regs.read(reg::GRXSTSP));
        let ch = status.number();
        let count = status.byte_count();

        if status.packet_status() == pktsts::DATA && ch < self.config.max_pipes as usize {
            let p = &mut self.pipes[ch];
            if let Some(buffer) = p.buffer.as_mut() {
                let dest = buffer.as_mut_slice();
                let start = (p.transferred as usize).min(dest.len());
                let keep = count.min(dest.len() - start);
                fifo::read_packet(&mut self.regs, ch, &mut dest[start..start + keep], count);
                p.transferring += count as u32;
                p.transferred += keep as u32;
                return;
            }
        }
        if count != 0 {
            trace!("discarding {} rx bytes on channel {}", count, ch);
            fifo::read_packet(&mut self.regs, 0, &mut [], count);
        }
    }

    fn on_channel(&mut self, ch: usize) {
        let pending = self.regs.read(reg::hcint(ch)) & self.regs.read(reg::hcintmsk(ch));
        let high_speed = self.port_high_speed();
        let nak_delay = self.config.bulk_in_nak_delay;

        let regs = &mut self.regs;
        let p = &mut self.pipes[ch];
        let is_in = p.packet.token == Token::In;
        let mps = u32::from(p.max_packet_size).max(1);

        if pending & hcint::CHH != 0 {
            regs.write(reg::hcintmsk(ch), 0);
            regs.write(reg::hcint(ch), hcint::ALL);
            p.in_progress = false;
        } else if pending & hcint::XFRC != 0 {
            if !is_in {
                regs.write(reg::hcintmsk(ch), 0);
                p.in_progress = false;
            }
            regs.write(reg::hcint(ch), hcint::ALL);
            if is_in {
                let more = p.transferred < p.len
                    && p.transferring == p.chunk
                    && p.chunk != 0
                    && p.transferred % mps == 0;
                if !more {
                    p.active = false;
                    p.event = Some(PipeEvent::TransferComplete);
                }
                halt(regs, ch);
            } else {
                p.transferred += p.transferring;
                p.transferring = 0;
                if p.transferred >= p.len {
                    p.active = false;
                    p.event = Some(PipeEvent::TransferComplete);
                }
            }
        } else if pending & hcint::ACK != 0 {
            regs.write(reg::hcint(ch), hcint::ACK);
            if is_in {
                if p.len != p.transferred && p.transferring != 0 && p.transferred % mps == 0 {
                    regs.set_bits(reg::hcchar(ch), hcchar::CHENA);
                }
            } else {
                // PING answered: the device has room for the data.
                p.packet.ping = false;
                halt(regs, ch);
            }
        } else if pending & (hcint::STALL | hcint::NAK | hcint::NYET | hcint::ERRORS) != 0 {
            if !is_in && !p.packet.ping {
                let left = ChannelSize::new(regs.read(reg::hctsiz(ch))).packet_count();
                p.credit_partial_out(left, pending & hcint::NYET != 0);
            }

            if pending & hcint::STALL != 0 {
                regs.write(reg::hcint(ch), hcint::STALL);
                p.active = false;
                p.event = Some(PipeEvent::HandshakeStall);
                halt(regs, ch);
            } else if pending & hcint::ERRORS != 0 {
                regs.write(reg::hcint(ch), hcint::ERRORS);
                p.active = false;
                p.event = Some(PipeEvent::BusError);
                halt(regs, ch);
            } else if pending & hcint::NYET != 0 {
                regs.write(reg::hcint(ch), hcint::NYET);
                if p.transferred < p.len && high_speed {
                    p.packet.ping = true;
                }
                halt(regs, ch);
            } else {
                regs.write(reg::hcint(ch), hcint::NAK);
                if is_in {
                    match p.ep_type {
                        EndpointType::Interrupt => halt(regs, ch),
                        EndpointType::Bulk if nak_delay != 0 => {
                            p.in_progress = false;
                            p.parked = true;
                            p.interval = nak_delay;
                        }
                        _ => regs.set_bits(reg::hcchar(ch), hcchar::CHENA),
                    }
                } else {
                    if high_speed
                        && matches!(p.ep_type, EndpointType::Control | EndpointType::Bulk)
                    {
                        p.packet.ping = true;
                    }
                    halt(regs, ch);
                }
            }
        }

        if !p.in_progress && !p.active {
            if let Some(event) = p.event.take() {
                p.buffer = None;
                self.signal_pipe(ch, event);
            }
        }
    }

    /// Start every active pipe that has no channel activity: periodic pipes whose interval
    /// expired, parked bulk IN pipes whose delay expired, halted continuations and deferred
    /// OUT starts.
    fn restart_pipes(&mut self) {
        for ch in 0..self.config.max_pipes as usize {
            let p = &mut self.pipes[ch];
            if !p.active || p.in_progress {
                continue;
            }

            if p.parked {
                if p.interval == 0 {
                    p.parked = false;
                    p.in_progress = true;
                    self.regs.set_bits(reg::hcchar(ch), hcchar::CHENA);
                }
                continue;
            }
            if p.ep_type == EndpointType::Interrupt {
                if p.interval != 0 {
                    continue;
                }
                p.interval = p.interval_reload;
            }

            p.in_progress = true;
            match self.start_transfer(ch) {
                Ok(Start::Started) => {}
                Ok(Start::Deferred) => self.pipes[ch].in_progress = false,
                Err(_) => {
                    let p = &mut self.pipes[ch];
                    p.in_progress = false;
                    p.active = false;
                    p.parked = false;
                    p.buffer = None;
                    p.event = None;
                    warn!("pipe {} restart failed", ch);
                    self.signal_pipe(ch, PipeEvent::BusError);
                }
            }
        }
    }
}
