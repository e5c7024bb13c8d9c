// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! USB host controller.
//!
//! [`UsbHost`] drives the OTG core as the root port of a host. Each pipe created with
//! [`UsbHost::pipe_create`] occupies one hardware channel until it is deleted; transfers are
//! chunked to fit the TX FIFOs, NAKed packets are retried, and periodic pipes are paced by the SOF
//! interrupt.

mod irq;
mod pipe;

pub use pipe::{DataPid, Packet, Pipe, PipeEvent, PipeHandle, Token};

use embedded_hal::delay::DelayNs;

use crate::config::{HostConfig, MAX_PIPES};
use crate::hw::regs::{
    gahbcfg, gintsts, hcchar, hcint, hctsiz, hprt, pid, reg, txsts, ChannelSize,
};
use crate::hw::timing::{self, wait_until, Timeout};
use crate::hw::{fifo, power, Registers};
use crate::usb::{Buffer, EndpointAddress, EndpointType, PowerState, Speed, Version, VERSION};
use crate::Error;

use pipe::{in_chunk, interval_reload, out_chunk, Chunk};

/// Root port events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PortEvent {
    Connect,
    Disconnect,
    /// Port reset finished and the port is enabled.
    Reset,
}

/// Receiver of controller events. Called from interrupt context, and from
/// [`UsbHost::port_reset`] while it waits for the port to come up.
pub trait Signals {
    fn port_event(&mut self, port: u8, event: PortEvent);
    fn pipe_event(&mut self, pipe: PipeHandle, event: PipeEvent);
}

/// Plain function-pointer signals.
#[derive(Copy, Clone)]
pub struct Callbacks {
    pub port: fn(u8, PortEvent),
    pub pipe: fn(PipeHandle, PipeEvent),
}

impl Signals for Callbacks {
    fn port_event(&mut self, port: u8, event: PortEvent) {
        (self.port)(port, event)
    }

    fn pipe_event(&mut self, pipe: PipeHandle, event: PipeEvent) {
        (self.pipe)(pipe, event)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PortState {
    pub connected: bool,
    pub overcurrent: bool,
    pub speed: Speed,
}

impl Default for PortState {
    fn default() -> Self {
        Self {
            connected: false,
            overcurrent: false,
            speed: Speed::Full,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    /// Bit per available root hub port.
    pub port_mask: u32,
    pub auto_split: bool,
    pub event_connect: bool,
    pub event_disconnect: bool,
    pub event_overcurrent: bool,
}

/// Result of sizing a channel start.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Start {
    Started,
    /// No TX FIFO room yet; retried on a later interrupt.
    Deferred,
}

/// Host-mode driver for one OTG core.
pub struct UsbHost<R, D, S> {
    regs: R,
    delay: D,
    config: HostConfig,
    signals: Option<S>,
    initialized: bool,
    powered: bool,
    /// Set while a port reset waits for the port-enabled interrupt.
    port_reset: bool,
    pipes: [Pipe; MAX_PIPES],
}

impl<R, D, S> UsbHost<R, D, S>
where
    R: Registers,
    D: DelayNs,
    S: Signals,
{
    pub fn new(regs: R, delay: D, config: HostConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            regs,
            delay,
            config,
            signals: None,
            initialized: false,
            powered: false,
            port_reset: false,
            pipes: core::array::from_fn(|_| Pipe::default()),
        })
    }

    pub fn free(self) -> (R, D) {
        (self.regs, self.delay)
    }

    #[inline]
    pub fn registers(&self) -> &R {
        &self.regs
    }

    #[inline]
    pub fn registers_mut(&mut self) -> &mut R {
        &mut self.regs
    }

    #[inline]
    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn version(&self) -> Version {
        VERSION
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            port_mask: 0x1,
            auto_split: false,
            event_connect: true,
            event_disconnect: true,
            event_overcurrent: false,
        }
    }

    /// Capture the event receiver. A second call while initialized keeps the first receiver.
    pub fn initialize(&mut self, signals: S) -> Result<(), Error> {
        if self.initialized {
            return Ok(());
        }
        self.signals = Some(signals);
        self.initialized = true;
        Ok(())
    }

    pub fn uninitialize(&mut self) -> Result<(), Error> {
        self.signals = None;
        self.initialized = false;
        Ok(())
    }

    pub fn power_control(&mut self, state: PowerState) -> Result<(), Error> {
        match state {
            PowerState::Off => {
                self.regs.set_irq_enabled(false);
                self.powered = false;
                self.port_reset = false;
                self.clear_pipes();
                self.regs
                    .set_clock_enabled(false, self.config.phy.is_ulpi());
                debug!("host powered off");
                Ok(())
            }
            PowerState::Full => {
                if !self.initialized {
                    return Err(Error::Failed);
                }
                if self.powered {
                    return Ok(());
                }
                self.power_up()
            }
            PowerState::Low => Err(Error::Unsupported),
        }
    }

    fn power_up(&mut self) -> Result<(), Error> {
        if let Err(e) = power::reset_core(&mut self.regs, &mut self.delay, self.config.phy, 1) {
            warn!("host core reset timed out");
            return Err(e.into());
        }
        self.port_reset = false;
        self.clear_pipes();
        power::force_mode(&mut self.regs, &mut self.delay, power::Mode::Host, 100);

        let rx = u32::from(self.config.rx_fifo_size);
        let nptx = u32::from(self.config.nptx_fifo_size);
        let ptx = u32::from(self.config.ptx_fifo_size);
        self.regs.write(reg::GRXFSIZ, rx / 4);
        self.regs
            .write(reg::DIEPTXF0_HNPTXFSIZ, ((nptx / 4) << 16) | (rx / 4));
        self.regs
            .write(reg::HPTXFSIZ, ((ptx / 4) << 16) | ((rx + nptx) / 4));

        self.regs
            .write(reg::HAINTMSK, (1 << self.config.max_pipes) - 1);
        self.regs.write(
            reg::GINTMSK,
            gintsts::DISCINT | gintsts::HCINT | gintsts::HPRTINT | gintsts::RXFLVL | gintsts::SOF,
        );
        self.regs.set_bits(reg::GAHBCFG, gahbcfg::GINT);

        self.powered = true;
        self.regs.set_irq_enabled(true);
        info!("host powered, phy {}", self.config.phy);
        Ok(())
    }

    fn clear_pipes(&mut self) {
        for p in self.pipes.iter_mut() {
            *p = Pipe::default();
        }
    }

    fn check_port(&self, port: u8) -> Result<(), Error> {
        if !self.powered {
            return Err(Error::Failed);
        }
        if port != 0 {
            return Err(Error::Parameter);
        }
        Ok(())
    }

    /// Read-modify-write HPRT without acknowledging its change bits or disabling the port.
    fn modify_port(&mut self, f: impl FnOnce(u32) -> u32) {
        let v = self.regs.read(reg::HPRT) & !hprt::W1C;
        self.regs.write(reg::HPRT, f(v));
    }

    fn port_high_speed(&self) -> bool {
        (self.regs.read(reg::HPRT) & hprt::PSPD_MSK) >> hprt::PSPD_POS == 0
    }

    pub fn port_vbus_on_off(&mut self, port: u8, on: bool) -> Result<(), Error> {
        self.check_port(port)?;
        if on {
            self.modify_port(|v| v | hprt::PPWR);
            self.regs.set_vbus(true);
        } else {
            self.regs.set_vbus(false);
            self.modify_port(|v| v & !hprt::PPWR);
        }
        Ok(())
    }

    /// Reset the device on `port`: drive reset for 11 ms, then allow 50 ms for the port to
    /// report itself enabled. Fails when it does not.
    pub fn port_reset(&mut self, port: u8) -> Result<(), Error> {
        self.check_port(port)?;

        self.port_reset = true;
        self.modify_port(|v| v | hprt::PRST);
        self.delay.delay_ms(11);
        self.modify_port(|v| v & !hprt::PRST);

        for _ in 0..50 {
            self.delay.delay_ms(1);
            if self.regs.read(reg::GINTSTS) & gintsts::HPRTINT != 0 {
                self.on_port_interrupt();
            }
            if !self.port_reset {
                break;
            }
        }

        if self.port_reset {
            self.port_reset = false;
            warn!("port reset failed");
            return Err(Error::Failed);
        }
        Ok(())
    }

    /// Whether a port reset is still waiting for the port to come up.
    #[inline]
    pub fn port_reset_pending(&self) -> bool {
        self.port_reset
    }

    /// Stop SOF generation on `port`.
    pub fn port_suspend(&mut self, port: u8) -> Result<(), Error> {
        self.check_port(port)?;
        self.modify_port(|v| v | hprt::PSUSP);
        Ok(())
    }

    /// Drive resume signalling for 25 ms.
    pub fn port_resume(&mut self, port: u8) -> Result<(), Error> {
        self.check_port(port)?;
        self.modify_port(|v| v | hprt::PRES);
        self.delay.delay_ms(25);
        self.modify_port(|v| v & !hprt::PRES);
        Ok(())
    }

    pub fn port_state(&self, port: u8) -> PortState {
        if self.check_port(port).is_err() {
            return PortState::default();
        }
        let v = self.regs.read(reg::HPRT);
        PortState {
            connected: v & hprt::PCSTS != 0,
            overcurrent: if self.config.phy.is_ulpi() {
                v & hprt::POCA != 0
            } else {
                self.regs.overcurrent()
            },
            speed: match (v & hprt::PSPD_MSK) >> hprt::PSPD_POS {
                0 => Speed::High,
                2 => Speed::Low,
                _ => Speed::Full,
            },
        }
    }

    /// Bind a free channel to an endpoint of an attached device. `None` when unpowered or every
    /// channel is taken.
    ///
    /// Hub address and port are accepted for split transactions, which the core does not do.
    #[allow(clippy::too_many_arguments)]
    pub fn pipe_create(
        &mut self,
        dev_addr: u8,
        dev_speed: Speed,
        _hub_addr: u8,
        _hub_port: u8,
        ep_addr: EndpointAddress,
        ep_type: EndpointType,
        max_packet: u16,
        interval: u8,
    ) -> Option<PipeHandle> {
        if !self.powered {
            return None;
        }
        let ch = (0..self.config.max_pipes as usize)
            .find(|&ch| self.regs.read(reg::hcchar(ch)) & hcchar::CONFIG_MSK == 0)?;

        let mut chr = (u32::from(max_packet) & hcchar::MPSIZ_MSK)
            | ((u32::from(ep_addr.number()) << hcchar::EPNUM_POS) & hcchar::EPNUM_MSK)
            | (ep_type.bits() << hcchar::EPTYP_POS)
            | ((u32::from(dev_addr) << hcchar::DAD_POS) & hcchar::DAD_MSK);
        if ep_addr.is_in() {
            chr |= hcchar::EPDIR;
        }
        if dev_speed == Speed::Low {
            chr |= hcchar::LSDEV;
        }

        let mut pipe = Pipe {
            max_packet_size: max_packet,
            ep_type,
            direction: ep_addr.direction(),
            ..Pipe::default()
        };
        if ep_type.is_periodic() {
            pipe.interval_reload = interval_reload(dev_speed, interval);
            let mc = ((u32::from(max_packet) >> 11) + 1) & 0x3;
            chr |= (mc << hcchar::MC_POS) & hcchar::MC_MSK;
        }
        self.regs.write(reg::hcchar(ch), chr);
        self.pipes[ch] = pipe;

        debug!(
            "pipe {} created: dev {} ep {} type {}",
            ch,
            dev_addr,
            ep_addr.raw(),
            ep_type
        );
        Some(PipeHandle(ch as u8))
    }

    fn pipe_index(&self, handle: PipeHandle) -> Result<usize, Error> {
        if !self.powered {
            return Err(Error::Failed);
        }
        let ch = handle.channel();
        if ch >= self.config.max_pipes as usize {
            return Err(Error::Parameter);
        }
        Ok(ch)
    }

    fn idle_pipe_index(&self, handle: PipeHandle) -> Result<usize, Error> {
        let ch = self.pipe_index(handle)?;
        if self.pipes[ch].active {
            return Err(Error::Busy);
        }
        Ok(ch)
    }

    /// Update device address, speed and max packet size, e.g. after the device was addressed.
    pub fn pipe_modify(
        &mut self,
        handle: PipeHandle,
        dev_addr: u8,
        dev_speed: Speed,
        _hub_addr: u8,
        _hub_port: u8,
        max_packet: u16,
    ) -> Result<(), Error> {
        let ch = self.idle_pipe_index(handle)?;

        let mut set = (u32::from(max_packet) & hcchar::MPSIZ_MSK)
            | ((u32::from(dev_addr) << hcchar::DAD_POS) & hcchar::DAD_MSK);
        if dev_speed == Speed::Low {
            set |= hcchar::LSDEV;
        }
        self.regs.modify(reg::hcchar(ch), |v| {
            (v & !(hcchar::MPSIZ_MSK | hcchar::LSDEV | hcchar::DAD_MSK)) | set
        });
        self.pipes[ch].max_packet_size = max_packet;
        Ok(())
    }

    /// Release the pipe's channel.
    pub fn pipe_delete(&mut self, handle: PipeHandle) -> Result<(), Error> {
        let ch = self.idle_pipe_index(handle)?;
        self.disable_channel(ch).map_err(|e| {
            warn!("pipe {} halt timed out", ch);
            Error::from(e)
        })?;

        self.regs.write(reg::hcchar(ch), 0);
        self.regs.write(reg::hcint(ch), hcint::ALL);
        self.regs.write(reg::hcintmsk(ch), 0);
        self.regs.write(reg::hctsiz(ch), 0);
        self.pipes[ch] = Pipe::default();
        debug!("pipe {} deleted", ch);
        Ok(())
    }

    /// Return the pipe's channel to DATA0 with no pending status.
    pub fn pipe_reset(&mut self, handle: PipeHandle) -> Result<(), Error> {
        let ch = self.idle_pipe_index(handle)?;
        self.disable_channel(ch)?;

        self.regs.write(reg::hcint(ch), hcint::ALL);
        self.regs.write(reg::hcintmsk(ch), 0);
        self.regs.write(reg::hctsiz(ch), 0);
        Ok(())
    }

    /// Start a transfer of `buffer.len()` bytes on the pipe.
    ///
    /// An interrupt pipe whose poll interval is still counting down is only marked active; the SOF
    /// interrupt starts it when the interval expires.
    pub fn pipe_transfer(
        &mut self,
        handle: PipeHandle,
        packet: Packet,
        buffer: Buffer,
    ) -> Result<(), Error> {
        let ch = self.pipe_index(handle)?;
        if self.regs.read(reg::HPRT) & hprt::PCSTS == 0 {
            return Err(Error::Failed);
        }
        if self.pipes[ch].active {
            return Err(Error::Busy);
        }

        let p = &mut self.pipes[ch];
        p.packet = packet;
        p.len = buffer.len() as u32;
        p.buffer = Some(buffer);
        p.transferred = 0;
        p.transferring = 0;
        p.chunk = 0;
        p.in_progress = false;
        p.parked = false;
        p.event = None;
        p.active = true;

        if p.ep_type == EndpointType::Interrupt {
            if p.interval != 0 {
                return Ok(());
            }
            // Later polls wait a full interval after this one.
            p.interval = p.interval_reload;
        }

        p.in_progress = true;
        match self.start_transfer(ch) {
            Ok(Start::Started) => Ok(()),
            Ok(Start::Deferred) => {
                self.pipes[ch].in_progress = false;
                Ok(())
            }
            Err(e) => {
                let p = &mut self.pipes[ch];
                p.in_progress = false;
                p.active = false;
                p.buffer = None;
                Err(e)
            }
        }
    }

    /// Bytes moved so far on the pipe; 0 for an invalid handle.
    pub fn pipe_transfer_result(&self, handle: PipeHandle) -> u32 {
        self.pipes
            .get(handle.channel())
            .map_or(0, |p| p.transferred)
    }

    /// Cancel the pipe's transfer and halt its channel.
    pub fn pipe_transfer_abort(&mut self, handle: PipeHandle) -> Result<(), Error> {
        let ch = self.pipe_index(handle)?;
        if !self.pipes[ch].active {
            return Ok(());
        }
        let p = &mut self.pipes[ch];
        p.active = false;
        p.buffer = None;

        self.disable_channel(ch).map_err(|e| {
            warn!("pipe {} abort: halt timed out", ch);
            Error::from(e)
        })?;
        self.pipes[ch].in_progress = false;
        Ok(())
    }

    pub fn pipe(&self, handle: PipeHandle) -> Option<&Pipe> {
        self.pipes[..self.config.max_pipes as usize].get(handle.channel())
    }

    /// Current frame number; 0 while unpowered.
    pub fn frame_number(&self) -> u16 {
        if !self.powered {
            return 0;
        }
        ((self.regs.read(reg::HFNUM) >> 3) & 0x7FF) as u16
    }

    /// Halt channel `ch` and wait for the core to confirm.
    ///
    /// A channel that is already halted, or NAKing, needs no halt request.
    fn disable_channel(&mut self, ch: usize) -> Result<(), Timeout> {
        self.regs.clear_bits(reg::hctsiz(ch), hctsiz::DOPING);

        if self.regs.read(reg::hcint(ch)) & hcint::CHH != 0 {
            return Ok(());
        }
        if self.regs.read(reg::hcchar(ch)) & hcchar::CHENA == 0 {
            return Ok(());
        }

        self.regs.write(reg::hcintmsk(ch), 0);
        self.delay.delay_ms(1);
        if self.regs.read(reg::hcint(ch)) & hcint::NAK != 0 {
            self.regs.write(reg::hcint(ch), hcint::ALL);
            return Ok(());
        }

        self.regs.write(reg::hcint(ch), hcint::ALL);
        self.regs
            .set_bits(reg::hcchar(ch), hcchar::CHENA | hcchar::CHDIS);
        let regs = &self.regs;
        wait_until(&mut self.delay, timing::CHANNEL_HALT, || {
            regs.read(reg::hcint(ch)) & hcint::CHH != 0
        })?;
        self.regs.write(reg::hcint(ch), hcint::ALL);
        Ok(())
    }

    /// Program channel `ch` for the next chunk of its pipe's transfer and enable it.
    fn start_transfer(&mut self, ch: usize) -> Result<Start, Error> {
        if self.regs.read(reg::HPRT) & hprt::PCSTS == 0 {
            return Err(Error::Failed);
        }

        let keep = hcchar::ODDFRM
            | hcchar::DAD_MSK
            | hcchar::MC_MSK
            | hcchar::EPTYP_MSK
            | hcchar::LSDEV
            | hcchar::EPNUM_MSK
            | hcchar::MPSIZ_MSK;
        let mut chr = self.regs.read(reg::hcchar(ch)) & keep;
        let mut size = self.regs.read(reg::hctsiz(ch)) & hctsiz::DPID_MSK;

        let p = &self.pipes[ch];
        let periodic = p.ep_type.is_periodic();
        let remaining = p.remaining();

        let (mask, out, chunk) = if p.packet.ping {
            size |= hctsiz::DOPING;
            let mask = hcint::TXERR | hcint::ACK | hcint::NAK | hcint::STALL | hcint::XFRC;
            (mask, true, Some(Chunk::ZLP))
        } else {
            match p.packet.token {
                Token::In => {
                    chr |= hcchar::EPDIR;
                    let mask = hcint::DTERR
                        | hcint::BBERR
                        | hcint::TXERR
                        | hcint::ACK
                        | hcint::NAK
                        | hcint::STALL
                        | hcint::XFRC;
                    (mask, false, Some(in_chunk(remaining, p.max_packet_size)))
                }
                token => {
                    let mask = if token == Token::Setup {
                        size |= pid::MDATA << hctsiz::DPID_POS;
                        hcint::TXERR | hcint::XFRC
                    } else {
                        hcint::TXERR | hcint::NYET | hcint::NAK | hcint::STALL | hcint::XFRC
                    };
                    let status = if periodic {
                        self.regs.read(reg::HPTXSTS)
                    } else {
                        self.regs.read(reg::HNPTXSTS)
                    };
                    let chunk = out_chunk(
                        remaining,
                        p.max_packet_size,
                        status & txsts::FSAV_MSK,
                        (status & txsts::QSAV_MSK) >> txsts::QSAV_POS,
                    );
                    (mask, true, chunk)
                }
            }
        };

        let Some(chunk) = chunk else {
            trace!("pipe {} waits for tx fifo room", ch);
            return Ok(Start::Deferred);
        };

        if periodic {
            if self.regs.read(reg::HFNUM) & 1 != 0 {
                chr &= !hcchar::ODDFRM;
            } else {
                chr |= hcchar::ODDFRM;
            }
        }
        chr = (chr & !hcchar::CHDIS) | hcchar::CHENA;

        if p.packet.token != Token::Setup {
            match p.packet.data {
                Some(DataPid::Data0) => {
                    size = (size & !hctsiz::DPID_MSK) | (pid::DATA0 << hctsiz::DPID_POS)
                }
                Some(DataPid::Data1) => {
                    size = (size & !hctsiz::DPID_MSK) | (pid::DATA1 << hctsiz::DPID_POS)
                }
                None => {}
            }
        }
        size |= (chunk.packets << hctsiz::PKTCNT_POS) | chunk.bytes;

        let p = &mut self.pipes[ch];
        p.transferring = if out { chunk.bytes } else { 0 };
        p.chunk = chunk.bytes;
        // Restarts continue with the toggle the core tracks.
        if !p.packet.ping {
            p.packet.data = None;
        }

        let start = p.transferred as usize;
        let src: &[u8] = match (out, p.buffer.as_ref()) {
            (true, Some(buffer)) => buffer
                .as_slice()
                .get(start..start + chunk.bytes as usize)
                .unwrap_or_default(),
            _ => &[],
        };
        self.regs.with_irq_masked(|regs| {
            regs.write(reg::hcintmsk(ch), mask);
            regs.write(reg::hctsiz(ch), size);
            regs.write(reg::hcchar(ch), chr);
            fifo::write_packet(regs, ch, src);
        });

        trace!(
            "pipe {} start: {} bytes, size {}",
            ch,
            chunk.bytes,
            ChannelSize::new(size).raw()
        );
        Ok(Start::Started)
    }

    fn signal_port(&mut self, event: PortEvent) {
        trace!("port event {}", event);
        if let Some(signals) = self.signals.as_mut() {
            signals.port_event(0, event);
        }
    }

    fn signal_pipe(&mut self, ch: usize, event: PipeEvent) {
        trace!("pipe {} event {}", ch, event);
        if let Some(signals) = self.signals.as_mut() {
            signals.pipe_event(PipeHandle(ch as u8), event);
        }
    }
}
