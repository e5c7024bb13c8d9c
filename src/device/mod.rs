// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! USB device controller.
//!
//! [`UsbDevice`] drives the OTG core as a peripheral with endpoint 0 plus up to
//! [`MAX_ENDPOINT_NUM`](crate::config::MAX_ENDPOINT_NUM) IN/OUT endpoint pairs. Each endpoint
//! direction has its own FIFO-backed transfer: the caller lends a [`Buffer`], the interrupt handler
//! moves packets between it and the core, and an [`EndpointEvent`] reports completion.
//!
//! All endpoints share one RX FIFO; each IN endpoint has a dedicated TX FIFO sized by
//! [`DeviceConfig`].

mod endpoint;
mod irq;

use embedded_hal::delay::DelayNs;

use crate::config::DeviceConfig;
use crate::hw::regs::{
    dcfg, dctl, depctl, diepint, doepint, dsts, gahbcfg, gccfg, gintsts, gotgctl, grstctl, gusbcfg,
    pcgcctl, reg,
};
use crate::hw::timing::{self, wait_until};
use crate::hw::{power, Registers};
use crate::usb::{
    max_packet_size, transactions_per_microframe, Buffer, EndpointAddress, EndpointType,
    PowerState, Speed, Version, VERSION,
};
use crate::Error;

use endpoint::{Endpoint, EndpointId, Endpoints};

/// Bus-level events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceEvent {
    /// Bus reset; every endpoint except 0 has been deconfigured.
    Reset,
    Suspend,
    /// Resume signalling, or the first SOF after a reset.
    Resume,
    /// Enumerated at high speed.
    HighSpeed,
    VbusOn,
    VbusOff,
}

/// Per-endpoint events.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EndpointEvent {
    /// A SETUP packet is waiting in the mailbox.
    Setup,
    /// OUT transfer finished (buffer full or short packet).
    Out,
    /// IN transfer finished.
    In,
}

/// Receiver of controller events. Called from interrupt context.
pub trait Signals {
    fn device_event(&mut self, event: DeviceEvent);
    fn endpoint_event(&mut self, endpoint: EndpointAddress, event: EndpointEvent);
}

/// Plain function-pointer signals.
#[derive(Copy, Clone)]
pub struct Callbacks {
    pub device: fn(DeviceEvent),
    pub endpoint: fn(EndpointAddress, EndpointEvent),
}

impl Signals for Callbacks {
    fn device_event(&mut self, event: DeviceEvent) {
        (self.device)(event)
    }

    fn endpoint_event(&mut self, endpoint: EndpointAddress, event: EndpointEvent) {
        (self.endpoint)(endpoint, event)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceState {
    pub vbus: bool,
    pub speed: Speed,
    /// Attached and not suspended.
    pub active: bool,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self {
            vbus: false,
            speed: Speed::Full,
            active: false,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Capabilities {
    pub vbus_detection: bool,
    pub event_vbus_on: bool,
    pub event_vbus_off: bool,
}

/// Single-slot SETUP packet store. A SETUP that lands before the previous one was read replaces
/// it and marks the mailbox overwritten.
#[derive(Debug, Default)]
struct SetupMailbox {
    packet: [u8; 8],
    received: bool,
    overwritten: bool,
}

impl SetupMailbox {
    fn store(&mut self, words: [u32; 2]) {
        if self.received {
            self.overwritten = true;
        }
        self.packet[..4].copy_from_slice(&words[0].to_le_bytes());
        self.packet[4..].copy_from_slice(&words[1].to_le_bytes());
        self.received = true;
    }

    fn take(&mut self, out: &mut [u8; 8]) -> Result<(), Error> {
        if !self.received {
            return Err(Error::Failed);
        }
        *out = self.packet;
        if self.overwritten {
            // The newest packet stays pending for the next read.
            self.overwritten = false;
            return Err(Error::Failed);
        }
        self.received = false;
        Ok(())
    }
}

/// Device-mode driver for one OTG core.
pub struct UsbDevice<R, D, S> {
    regs: R,
    delay: D,
    config: DeviceConfig,
    signals: Option<S>,
    initialized: bool,
    powered: bool,
    state: DeviceState,
    setup: SetupMailbox,
    endpoints: Endpoints,
    /// IN endpoints whose isochronous packet missed its frame, by endpoint number.
    iso_in_incomplete: u32,
}

impl<R, D, S> UsbDevice<R, D, S>
where
    R: Registers,
    D: DelayNs,
    S: Signals,
{
    pub fn new(regs: R, delay: D, config: DeviceConfig) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self {
            regs,
            delay,
            config,
            signals: None,
            initialized: false,
            powered: false,
            state: DeviceState::default(),
            setup: SetupMailbox::default(),
            endpoints: Endpoints::new(),
            iso_in_incomplete: 0,
        })
    }

    /// Release the register block and delay.
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
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn version(&self) -> Version {
        VERSION
    }

    pub fn capabilities(&self) -> Capabilities {
        let vbus = self.config.vbus_sensing || self.config.phy.is_ulpi();
        Capabilities {
            vbus_detection: vbus,
            event_vbus_on: vbus,
            event_vbus_off: vbus,
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
                self.power_off();
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

    fn power_off(&mut self) {
        let ulpi = self.config.phy.is_ulpi();

        self.regs.set_irq_enabled(false);
        self.powered = false;
        self.regs.set_bits(reg::DCTL, dctl::SDIS);
        self.regs.clear_bits(reg::GAHBCFG, gahbcfg::GINT);
        self.regs.set_module_reset(true);

        self.setup = SetupMailbox::default();
        self.state = DeviceState::default();
        self.endpoints.clear();
        self.iso_in_incomplete = 0;

        if !ulpi {
            self.regs.clear_bits(reg::GCCFG, gccfg::PWRDWN);
        }
        self.regs.set_bits(reg::PCGCCTL, pcgcctl::STPPCLK);
        self.regs.write(reg::GCCFG, 0);
        self.regs.set_clock_enabled(false, ulpi);
        debug!("device powered off");
    }

    fn power_up(&mut self) -> Result<(), Error> {
        let phy = self.config.phy;

        if let Err(e) = power::reset_core(&mut self.regs, &mut self.delay, phy, 2) {
            warn!("device core reset timed out");
            return Err(e.into());
        }

        self.regs.set_bits(reg::DCTL, dctl::SDIS);
        self.regs.modify(reg::GUSBCFG, |v| {
            (v & !gusbcfg::TRDT_MSK) | (15 << gusbcfg::TRDT_POS)
        });
        power::force_mode(&mut self.regs, &mut self.delay, power::Mode::Device, 50);

        self.bus_reset();

        if self.config.vbus_sensing {
            self.regs.set_bits(reg::GCCFG, gccfg::VBDEN);
        } else {
            self.regs
                .set_bits(reg::GOTGCTL, gotgctl::BVALOEN | gotgctl::BVALOVAL);
            self.regs.clear_bits(reg::GCCFG, gccfg::VBDEN);
        }

        if phy.is_ulpi() {
            self.regs.clear_bits(reg::DCFG, dcfg::DSPD_MSK);
        } else {
            self.regs.set_bits(reg::DCFG, dcfg::DSPD_MSK);
        }

        let mut mask = gintsts::USBSUSP
            | gintsts::USBRST
            | gintsts::ENUMDNE
            | gintsts::RXFLVL
            | gintsts::IEPINT
            | gintsts::OEPINT
            | gintsts::WKUPINT;
        if self.config.vbus_sensing || phy.is_ulpi() {
            mask |= gintsts::SRQINT | gintsts::OTGINT;
        }
        self.regs.write(reg::GINTMSK, mask);
        self.regs
            .set_bits(reg::GAHBCFG, gahbcfg::GINT | gahbcfg::TXFELVL);

        self.powered = true;
        self.regs.set_irq_enabled(true);
        info!("device powered, phy {}", phy);
        Ok(())
    }

    /// Return every endpoint to NAK/disabled, drop transfer state, and reprogram the FIFO layout.
    fn bus_reset(&mut self) {
        self.setup = SetupMailbox::default();
        self.endpoints.clear();

        self.regs.write(reg::DOEPMSK, 0);
        self.regs.write(reg::DIEPMSK, 0);

        let max = self.config.max_endpoint_num as usize;
        for n in 1..=max {
            let mut ctl = depctl::SNAK;
            if self.regs.read(reg::doepctl(n)) & depctl::EPENA != 0 {
                ctl |= depctl::EPDIS;
            }
            self.regs.write(reg::doepctl(n), ctl);

            let mut ctl = depctl::SNAK;
            if self.regs.read(reg::diepctl(n)) & depctl::EPENA != 0 {
                ctl |= depctl::EPDIS;
            }
            self.regs.write(reg::diepctl(n), ctl);

            self.regs.write(
                reg::diepint(n),
                diepint::XFRC
                    | diepint::EPDISD
                    | diepint::TOC
                    | diepint::ITTXFE
                    | diepint::INEPNE
                    | diepint::TXFE,
            );
            self.regs.write(
                reg::doepint(n),
                doepint::XFRC
                    | doepint::EPDISD
                    | doepint::STUP
                    | doepint::OTEPDIS
                    | doepint::B2BSTUP,
            );
        }

        self.flush_tx_fifo(grstctl::TXFNUM_ALL);

        self.regs.clear_bits(reg::DCFG, dcfg::DAD_MSK);
        self.regs.write(reg::DAINTMSK, 1 | (1 << 16));
        self.regs
            .write(reg::DOEPMSK, doepint::STUP | doepint::EPDISD | doepint::XFRC);
        self.regs.write(reg::DIEPMSK, diepint::EPDISD | diepint::XFRC);

        let rx = u32::from(self.config.rx_fifo_size);
        self.regs.write(reg::GRXFSIZ, rx / 4);
        let mut start = rx;
        for n in 0..=max {
            let size = u32::from(self.config.tx_fifo_size[n]);
            self.regs
                .write(reg::dieptxf(n), (start / 4) | ((size / 4) << 16));
            start += size;
        }
    }

    /// Flush one TX FIFO, logging instead of failing when the core does not finish.
    fn flush_tx_fifo(&mut self, fifo: u32) {
        if power::flush_tx_fifo(&mut self.regs, &mut self.delay, fifo).is_err() {
            warn!("tx fifo {} flush timed out", fifo);
        }
    }

    fn signal_device(&mut self, event: DeviceEvent) {
        trace!("device event {}", event);
        if let Some(signals) = self.signals.as_mut() {
            signals.device_event(event);
        }
    }

    fn signal_endpoint(&mut self, endpoint: EndpointAddress, event: EndpointEvent) {
        trace!("endpoint {} event {}", endpoint.raw(), event);
        if let Some(signals) = self.signals.as_mut() {
            signals.endpoint_event(endpoint, event);
        }
    }

    fn require_powered(&self) -> Result<(), Error> {
        if self.powered {
            Ok(())
        } else {
            Err(Error::Failed)
        }
    }

    fn endpoint_id(&self, address: EndpointAddress) -> Result<EndpointId, Error> {
        EndpointId::new(address, self.config.max_endpoint_num).ok_or(Error::Parameter)
    }

    /// Release soft-disconnect so the host sees the pull-up.
    pub fn connect(&mut self) -> Result<(), Error> {
        self.require_powered()?;
        self.regs.clear_bits(reg::DCTL, dctl::SDIS);
        if !self.config.phy.is_ulpi() {
            self.regs.set_bits(reg::GCCFG, gccfg::PWRDWN);
        }
        Ok(())
    }

    pub fn disconnect(&mut self) -> Result<(), Error> {
        self.require_powered()?;
        self.regs.set_bits(reg::DCTL, dctl::SDIS);
        if !self.config.phy.is_ulpi() {
            self.regs.clear_bits(reg::GCCFG, gccfg::PWRDWN);
        }
        Ok(())
    }

    #[inline]
    pub fn state(&self) -> DeviceState {
        self.state
    }

    /// Signal remote wakeup to a suspended host for 5 ms.
    pub fn remote_wakeup(&mut self) -> Result<(), Error> {
        self.require_powered()?;
        self.regs.set_bits(reg::DCTL, dctl::RWUSIG);
        self.delay.delay_ms(5);
        self.regs.clear_bits(reg::DCTL, dctl::RWUSIG);
        Ok(())
    }

    pub fn set_address(&mut self, address: u8) -> Result<(), Error> {
        self.require_powered()?;
        self.regs.modify(reg::DCFG, |v| {
            (v & !dcfg::DAD_MSK) | ((u32::from(address) << dcfg::DAD_POS) & dcfg::DAD_MSK)
        });
        Ok(())
    }

    /// Copy the pending SETUP packet into `out`.
    ///
    /// Fails when nothing is pending. Also fails when a newer SETUP replaced an unread one; `out`
    /// then holds the newer packet, which stays pending for the next read.
    pub fn read_setup_packet(&mut self, out: &mut [u8; 8]) -> Result<(), Error> {
        self.require_powered()?;
        self.setup.take(out)
    }

    pub fn endpoint_configure(
        &mut self,
        address: EndpointAddress,
        ep_type: EndpointType,
        max_packet: u16,
    ) -> Result<(), Error> {
        let id = self.endpoint_id(address)?;
        let n = address.number() as usize;
        let mps = max_packet_size(max_packet);

        if address.is_in() {
            if mps > self.config.tx_fifo_size[n] {
                return Err(Error::Parameter);
            }
        } else if u32::from(mps) > self.config.max_out_packet() {
            return Err(Error::Parameter);
        }
        self.require_powered()?;
        if self.endpoints[id].active {
            return Err(Error::Busy);
        }

        self.endpoints[id] = Endpoint {
            max_packet_size: mps,
            packet_count: if ep_type == EndpointType::Isochronous {
                transactions_per_microframe(max_packet)
            } else {
                1
            },
            ..Endpoint::default()
        };

        let toggle_reset = matches!(ep_type, EndpointType::Bulk | EndpointType::Interrupt);
        let typ = ep_type.bits() << depctl::EPTYP_POS;

        if address.is_in() {
            let mut ctl = ((n as u32) << depctl::TXFNUM_POS) | typ | u32::from(mps);
            if toggle_reset {
                ctl |= depctl::SD0PID;
            }
            self.regs.write(reg::diepctl(n), ctl);
            self.regs.set_bits(reg::diepctl(n), depctl::USBAEP);
            if self.regs.read(reg::diepctl(n)) & depctl::EPENA != 0 {
                self.regs.set_bits(reg::diepctl(n), depctl::EPDIS);
            }
            self.regs.set_bits(reg::DAINTMSK, 1 << n);
        } else {
            let mut ctl = typ | depctl::SNAK | u32::from(mps);
            if toggle_reset {
                ctl |= depctl::SD0PID;
            }
            self.regs.write(reg::doepctl(n), ctl);
            self.regs.set_bits(reg::doepctl(n), depctl::USBAEP);
            self.regs.set_bits(reg::DAINTMSK, 1 << (n + 16));
        }

        if ep_type == EndpointType::Isochronous {
            self.regs.set_bits(reg::GINTMSK, gintsts::EOPF);
        }

        debug!(
            "endpoint {} configured, type {}, mps {}",
            address.raw(),
            ep_type,
            mps
        );
        Ok(())
    }

    pub fn endpoint_unconfigure(&mut self, address: EndpointAddress) -> Result<(), Error> {
        let id = self.endpoint_id(address)?;
        self.require_powered()?;
        if self.endpoints[id].active {
            return Err(Error::Busy);
        }

        let n = address.number() as usize;
        let bit = if address.is_in() { n } else { n + 16 };
        self.regs.clear_bits(reg::DAINTMSK, 1 << bit);
        self.endpoints[id] = Endpoint::default();

        let (ctl, ty) = if address.is_in() {
            (reg::diepctl(n), self.in_type(n))
        } else {
            (reg::doepctl(n), self.out_type(n))
        };
        let counted = n != 0 && self.regs.read(ctl) & depctl::USBAEP != 0;
        if ty == EndpointType::Isochronous && counted && self.active_iso_endpoints() == 1 {
            // This endpoint is the last isochronous one still active.
            self.regs.clear_bits(reg::GINTMSK, gintsts::EOPF);
        }

        if address.is_in() {
            if self.regs.read(reg::diepctl(n)) & depctl::EPENA != 0 {
                self.regs.set_bits(reg::diepctl(n), depctl::EPDIS);
            }
            self.regs.set_bits(reg::diepctl(n), depctl::SNAK);
            if n != 0 {
                self.regs.clear_bits(reg::diepctl(n), depctl::USBAEP);
            }
        } else {
            self.global_out_nak()?;
            self.regs.set_bits(reg::doepctl(n), depctl::SNAK);
            if n != 0 {
                if self.regs.read(reg::doepctl(n)) & depctl::EPENA != 0 {
                    self.regs.set_bits(reg::doepctl(n), depctl::EPDIS);
                    let regs = &self.regs;
                    wait_until(&mut self.delay, timing::HANDSHAKE, || {
                        regs.read(reg::doepint(n)) & doepint::EPDISD != 0
                    })
                    .map_err(|e| {
                        warn!("endpoint {} disable timed out", address.raw());
                        Error::from(e)
                    })?;
                }
                self.regs.clear_bits(reg::doepctl(n), depctl::USBAEP);
            }
            self.regs.set_bits(reg::DCTL, dctl::CGONAK);
        }

        debug!("endpoint {} unconfigured", address.raw());
        Ok(())
    }

    pub fn endpoint_stall(&mut self, address: EndpointAddress, stall: bool) -> Result<(), Error> {
        let id = self.endpoint_id(address)?;
        self.require_powered()?;
        if self.endpoints[id].active {
            return Err(Error::Busy);
        }
        let n = address.number() as usize;

        if stall {
            if address.is_in() {
                if self.regs.read(reg::diepctl(n)) & depctl::EPENA != 0 {
                    self.endpoints[id].in_flush = true;
                    self.regs
                        .set_bits(reg::diepctl(n), depctl::STALL | depctl::EPDIS);
                } else {
                    self.regs.set_bits(reg::diepctl(n), depctl::STALL);
                    power::flush_tx_fifo(&mut self.regs, &mut self.delay, n as u32)?;
                }
            } else {
                self.global_out_nak()?;
                if self.regs.read(reg::doepctl(n)) & depctl::EPENA != 0 {
                    self.regs
                        .set_bits(reg::doepctl(n), depctl::STALL | depctl::EPDIS);
                } else {
                    self.regs.set_bits(reg::doepctl(n), depctl::STALL);
                }
                self.regs.set_bits(reg::DCTL, dctl::CGONAK);
            }
            debug!("endpoint {} stalled", address.raw());
        } else {
            let ep = &mut self.endpoints[id];
            ep.in_nak = false;
            ep.in_zlp = false;

            let ctl = if address.is_in() {
                reg::diepctl(n)
            } else {
                reg::doepctl(n)
            };
            if address.is_in() && self.regs.read(ctl) & depctl::EPENA != 0 {
                self.regs.set_bits(ctl, depctl::EPDIS);
            }
            let ty = EndpointType::from_bits(
                (self.regs.read(ctl) & depctl::EPTYP_MSK) >> depctl::EPTYP_POS,
            );
            if matches!(ty, EndpointType::Bulk | EndpointType::Interrupt) {
                self.regs.set_bits(ctl, depctl::SD0PID);
            }
            self.regs.clear_bits(ctl, depctl::STALL);
        }
        Ok(())
    }

    /// Start a transfer on `address` using `buffer`; an empty IN buffer sends a ZLP.
    ///
    /// OUT transfers end when the buffer is full or a short packet arrives.
    pub fn endpoint_transfer(&mut self, address: EndpointAddress, buffer: Buffer) -> Result<(), Error> {
        let id = self.endpoint_id(address)?;
        self.require_powered()?;
        if self.endpoints[id].active {
            return Err(Error::Busy);
        }
        let n = address.number() as usize;

        let ep = &mut self.endpoints[id];
        ep.active = true;
        ep.remaining = buffer.len() as u32;
        ep.transferred = 0;
        ep.in_flight = 0;
        let zlp = buffer.is_empty();
        ep.buffer = Some(buffer);

        if address.is_in() {
            if self.in_type(n) != EndpointType::Isochronous {
                let ep = &mut self.endpoints[id];
                if zlp {
                    ep.in_zlp = true;
                }
                ep.in_nak = true;
                // Loading starts once the core reports NAK effective.
                self.regs.set_bits(reg::diepctl(n), depctl::CNAK);
                self.regs.set_bits(reg::diepctl(n), depctl::SNAK);
                self.regs.set_bits(reg::DIEPMSK, diepint::INEPNE);
            }
        } else if self.out_type(n) != EndpointType::Isochronous {
            self.arm_out(n);
        }
        Ok(())
    }

    /// Bytes moved so far on `address`; 0 for an out-of-range endpoint.
    pub fn endpoint_transfer_result(&self, address: EndpointAddress) -> u32 {
        match self.endpoint_id(address) {
            Ok(id) => self.endpoints[id].transferred,
            Err(_) => 0,
        }
    }

    /// Whether a transfer is outstanding on `address`.
    pub fn endpoint_busy(&self, address: EndpointAddress) -> bool {
        match self.endpoint_id(address) {
            Ok(id) => self.endpoints[id].active,
            Err(_) => false,
        }
    }

    /// Cancel the transfer on `address`. An enabled IN endpoint finishes its FIFO flush later, in
    /// the endpoint-disabled interrupt.
    pub fn endpoint_transfer_abort(&mut self, address: EndpointAddress) -> Result<(), Error> {
        let id = self.endpoint_id(address)?;
        self.require_powered()?;
        let n = address.number() as usize;

        let ep = &mut self.endpoints[id];
        ep.remaining = 0;
        ep.in_nak = false;
        ep.in_zlp = false;
        ep.buffer = None;

        let result = if address.is_in() {
            if self.regs.read(reg::diepctl(n)) & depctl::EPENA != 0 {
                self.endpoints[id].in_flush = true;
                self.regs
                    .set_bits(reg::diepctl(n), depctl::EPDIS | depctl::SNAK);
                Ok(())
            } else {
                self.regs.set_bits(reg::diepctl(n), depctl::SNAK);
                power::flush_tx_fifo(&mut self.regs, &mut self.delay, n as u32)
            }
        } else {
            if self.regs.read(reg::doepctl(n)) & depctl::EPENA != 0 {
                self.regs
                    .set_bits(reg::doepctl(n), depctl::EPDIS | depctl::SNAK);
            } else {
                self.regs.set_bits(reg::doepctl(n), depctl::SNAK);
            }
            Ok(())
        };

        self.endpoints[id].active = false;
        result.map_err(Error::from)
    }

    /// Current (micro)frame number; 0 while unpowered.
    pub fn frame_number(&self) -> u16 {
        if !self.powered {
            return 0;
        }
        ((self.regs.read(reg::DSTS) & dsts::FNSOF_MSK) >> dsts::FNSOF_POS) as u16
    }

    /// Set global OUT NAK and wait for it to take effect.
    fn global_out_nak(&mut self) -> Result<(), Error> {
        self.regs.set_bits(reg::DCTL, dctl::SGONAK);
        let regs = &self.regs;
        wait_until(&mut self.delay, timing::HANDSHAKE, || {
            regs.read(reg::GINTSTS) & gintsts::GONAKEFF != 0
        })
        .map_err(|e| {
            warn!("global OUT NAK timed out");
            Error::from(e)
        })
    }

    fn in_type(&self, n: usize) -> EndpointType {
        let ctl = self.regs.read(reg::diepctl(n));
        EndpointType::from_bits((ctl & depctl::EPTYP_MSK) >> depctl::EPTYP_POS)
    }

    fn out_type(&self, n: usize) -> EndpointType {
        let ctl = self.regs.read(reg::doepctl(n));
        EndpointType::from_bits((ctl & depctl::EPTYP_MSK) >> depctl::EPTYP_POS)
    }

    fn active_iso_endpoints(&self) -> usize {
        let mut count = 0;
        for n in 1..=self.config.max_endpoint_num as usize {
            if self.regs.read(reg::doepctl(n)) & depctl::USBAEP != 0
                && self.out_type(n) == EndpointType::Isochronous
            {
                count += 1;
            }
            if self.regs.read(reg::diepctl(n)) & depctl::USBAEP != 0
                && self.in_type(n) == EndpointType::Isochronous
            {
                count += 1;
            }
        }
        count
    }
}
