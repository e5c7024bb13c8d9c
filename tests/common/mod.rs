//! Simulated OTG core for driving the controllers off-target.
//!
//! Models just enough of the register file for the drivers' handshakes to complete: self-clearing
//! reset and flush bits, write-1-to-clear status registers, derived summary bits (GINTSTS, DAINT,
//! HAINT), endpoint enable/disable, channel halt, and the root port's reset/enable sequence.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use otg_usb::device::{self, DeviceEvent, EndpointEvent};
use otg_usb::host::{self, PipeEvent, PipeHandle, PortEvent};
use otg_usb::hw::regs::{
    dctl, depctl, diepint, doepint, gintsts, grstctl, hcchar, hcint, hprt, pktsts, reg,
};
use otg_usb::hw::Registers;
use otg_usb::usb::{Buffer, EndpointAddress};

const EPCTL_ACTIONS: u32 = depctl::CNAK | depctl::SNAK | depctl::SD0PID | depctl::SODDFRM | depctl::EPDIS;

/// Free space reported by HNPTXSTS/HPTXSTS: 8 request slots, 256 words.
pub const TXSTS_DEFAULT: u32 = (8 << 16) | 256;

#[derive(Default)]
pub struct Core {
    regs: HashMap<usize, u32>,
    /// Every register write, in order.
    pub writes: Vec<(usize, u32)>,
    rx_status: VecDeque<u32>,
    rx_data: VecDeque<u32>,
    /// Words pushed into TX FIFOs, by FIFO index.
    pub tx: Vec<(usize, u32)>,
    /// Channel enables (CHENA without CHDIS), by channel.
    pub starts: Vec<usize>,
    /// Free words reported by DTXFSTSx.
    pub tx_space: u32,
    global_out_nak: bool,
    pub irq_enabled: bool,
    pub vbus: bool,

    pub ahb_stuck: bool,
    pub flush_stuck: bool,
    pub gonak_stuck: bool,
    pub halt_stuck: bool,
    /// Keep the port disabled after a port reset.
    pub port_dead: bool,
}

/// Shared handle to a simulated core; clones see the same state.
#[derive(Clone)]
pub struct Sim(Rc<RefCell<Core>>);

impl Sim {
    pub fn new() -> Self {
        let mut core = Core {
            tx_space: 128,
            ..Core::default()
        };
        core.regs.insert(reg::HNPTXSTS, TXSTS_DEFAULT);
        core.regs.insert(reg::HPTXSTS, TXSTS_DEFAULT);
        Self(Rc::new(RefCell::new(core)))
    }

    pub fn core(&self) -> std::cell::RefMut<'_, Core> {
        self.0.borrow_mut()
    }

    /// Raw stored value, without derived bits.
    pub fn get(&self, offset: usize) -> u32 {
        self.0.borrow().regs.get(&offset).copied().unwrap_or(0)
    }

    pub fn set(&self, offset: usize, value: u32) {
        self.0.borrow_mut().regs.insert(offset, value);
    }

    /// OR status bits into a register, as the core raising an interrupt would.
    pub fn raise(&self, offset: usize, bits: u32) {
        let v = self.get(offset);
        self.set(offset, v | bits);
    }

    pub fn clear(&self, offset: usize, bits: u32) {
        let v = self.get(offset);
        self.set(offset, v & !bits);
    }

    /// Values written to `offset`, in order.
    pub fn writes_to(&self, offset: usize) -> Vec<u32> {
        self.0
            .borrow()
            .writes
            .iter()
            .filter(|(o, _)| *o == offset)
            .map(|(_, v)| *v)
            .collect()
    }

    pub fn clear_log(&self) {
        let mut core = self.0.borrow_mut();
        core.writes.clear();
        core.tx.clear();
        core.starts.clear();
    }

    /// Queue a receive status word and its packet data.
    pub fn push_rx(&self, number: usize, status: u32, dpid: u32, data: &[u8]) {
        let word = number as u32 | ((data.len() as u32) << 4) | (dpid << 15) | (status << 17);
        let mut core = self.0.borrow_mut();
        core.rx_status.push_back(word);
        for chunk in data.chunks(4) {
            let mut w = [0u8; 4];
            w[..chunk.len()].copy_from_slice(chunk);
            core.rx_data.push_back(u32::from_le_bytes(w));
        }
    }

    pub fn push_setup(&self, packet: [u8; 8]) {
        self.push_rx(0, pktsts::SETUP_DATA, 0, &packet);
    }

    pub fn rx_words_left(&self) -> usize {
        self.0.borrow().rx_data.len()
    }

    /// Bytes pushed into TX FIFO `index`, padded to whole words.
    pub fn tx_bytes(&self, index: usize) -> Vec<u8> {
        self.0
            .borrow()
            .tx
            .iter()
            .filter(|(i, _)| *i == index)
            .flat_map(|(_, w)| w.to_le_bytes())
            .collect()
    }

    pub fn starts(&self, ch: usize) -> usize {
        self.0.borrow().starts.iter().filter(|&&c| c == ch).count()
    }

    /// Plug a device into the root port. `pspd` is the HPRT speed code (0 high, 1 full, 2 low).
    pub fn attach(&self, pspd: u32) {
        let v = self.get(reg::HPRT) & !hprt::PSPD_MSK;
        self.set(
            reg::HPRT,
            v | hprt::PCSTS | hprt::PCDET | (pspd << hprt::PSPD_POS),
        );
    }

    pub fn detach(&self) {
        self.clear(reg::HPRT, hprt::PCSTS | hprt::PENA);
        self.raise(reg::GINTSTS, gintsts::DISCINT);
    }

    /// Finish the IN transfer loaded on endpoint `n`.
    pub fn complete_in(&self, n: usize) {
        self.clear(reg::diepctl(n), depctl::EPENA);
        self.raise(reg::diepint(n), diepint::XFRC);
    }

    /// Finish the OUT transfer armed on endpoint `n`.
    pub fn complete_out(&self, n: usize) {
        self.clear(reg::doepctl(n), depctl::EPENA);
        self.raise(reg::doepint(n), doepint::XFRC);
    }
}

impl Core {
    fn stored(&self, offset: usize) -> u32 {
        self.regs.get(&offset).copied().unwrap_or(0)
    }

    fn daint(&self) -> u32 {
        let in_mask = self.stored(reg::DIEPMSK);
        let out_mask = self.stored(reg::DOEPMSK);
        (0..16).fold(0, |acc, n| {
            let mut acc = acc;
            if self.stored(reg::diepint(n)) & in_mask != 0 {
                acc |= 1 << n;
            }
            if self.stored(reg::doepint(n)) & out_mask != 0 {
                acc |= 1 << (n + 16);
            }
            acc
        })
    }

    fn haint(&self) -> u32 {
        (0..16).fold(0, |acc, ch| {
            if self.stored(reg::hcint(ch)) & self.stored(reg::hcintmsk(ch)) != 0 {
                acc | (1 << ch)
            } else {
                acc
            }
        })
    }

    fn gintsts(&self) -> u32 {
        let mut v = self.stored(reg::GINTSTS);
        if !self.rx_status.is_empty() {
            v |= gintsts::RXFLVL;
        }
        if self.global_out_nak {
            v |= gintsts::GONAKEFF;
        }
        let daint = self.daint() & self.stored(reg::DAINTMSK);
        if daint & 0xFFFF != 0 {
            v |= gintsts::IEPINT;
        }
        if daint >> 16 != 0 {
            v |= gintsts::OEPINT;
        }
        if self.haint() != 0 {
            v |= gintsts::HCINT;
        }
        if self.stored(reg::HPRT) & (hprt::PCDET | hprt::PENCHNG | hprt::POCCHNG) != 0 {
            v |= gintsts::HPRTINT;
        }
        v
    }

    fn is_w1c(offset: usize) -> bool {
        if offset == reg::GINTSTS || offset == reg::GOTGINT {
            return true;
        }
        (0..16).any(|n| offset == reg::diepint(n) || offset == reg::doepint(n) || offset == reg::hcint(n))
    }

    fn endpoint_ctl(offset: usize) -> Option<(usize, bool)> {
        (0..16).find_map(|n| {
            if offset == reg::diepctl(n) {
                Some((n, true))
            } else if offset == reg::doepctl(n) {
                Some((n, false))
            } else {
                None
            }
        })
    }

    fn channel_char(offset: usize) -> Option<usize> {
        (0..16).find(|&ch| offset == reg::hcchar(ch))
    }

    fn write_endpoint_ctl(&mut self, offset: usize, n: usize, is_in: bool, value: u32) {
        let old = self.stored(offset);
        let mut v = (value & !EPCTL_ACTIONS) | (old & depctl::EPENA);
        let int = if is_in { reg::diepint(n) } else { reg::doepint(n) };
        if value & depctl::EPDIS != 0 && old & depctl::EPENA != 0 {
            v &= !depctl::EPENA;
            let bits = self.stored(int) | diepint::EPDISD;
            self.regs.insert(int, bits);
        }
        if is_in && value & depctl::SNAK != 0 {
            let bits = self.stored(int) | diepint::INEPNE;
            self.regs.insert(int, bits);
        }
        self.regs.insert(offset, v);
    }

    fn write_channel_char(&mut self, ch: usize, value: u32) {
        let offset = reg::hcchar(ch);
        if value & hcchar::CHDIS != 0 {
            self.regs
                .insert(offset, value & !(hcchar::CHENA | hcchar::CHDIS));
            if !self.halt_stuck {
                let bits = self.stored(reg::hcint(ch)) | hcint::CHH;
                self.regs.insert(reg::hcint(ch), bits);
            }
        } else {
            if value & hcchar::CHENA != 0 {
                self.starts.push(ch);
            }
            self.regs.insert(offset, value);
        }
    }

    fn write_port(&mut self, value: u32) {
        let old = self.stored(reg::HPRT);
        let read_only = hprt::PCSTS | hprt::POCA | hprt::PSPD_MSK;
        let mut v = (old & (read_only | hprt::W1C)) | (value & !(read_only | hprt::W1C));
        v &= !(value & hprt::W1C);
        if old & hprt::PRST != 0
            && v & hprt::PRST == 0
            && v & hprt::PCSTS != 0
            && !self.port_dead
        {
            v |= hprt::PENA | hprt::PENCHNG;
        }
        self.regs.insert(reg::HPRT, v);
    }
}

impl Registers for Sim {
    fn read(&self, offset: usize) -> u32 {
        if offset == reg::GRXSTSP {
            return self.0.borrow_mut().rx_status.pop_front().unwrap_or(0);
        }
        let core = self.0.borrow();
        match offset {
            reg::GINTSTS => core.gintsts(),
            reg::DAINT => core.daint(),
            reg::HAINT => core.haint(),
            reg::GRSTCTL => {
                let v = core.stored(reg::GRSTCTL);
                if core.ahb_stuck {
                    v & !grstctl::AHBIDL
                } else {
                    v | grstctl::AHBIDL
                }
            }
            reg::GRXSTSR => core.rx_status.front().copied().unwrap_or(0),
            o if (0..16).any(|n| o == reg::dtxfsts(n)) => core.tx_space,
            o => core.stored(o),
        }
    }

    fn write(&mut self, offset: usize, value: u32) {
        let mut core = self.0.borrow_mut();
        core.writes.push((offset, value));

        if offset == reg::GRXSTSP {
            return;
        }
        if Core::is_w1c(offset) {
            let v = core.stored(offset) & !value;
            core.regs.insert(offset, v);
            return;
        }
        if let Some((n, is_in)) = Core::endpoint_ctl(offset) {
            core.write_endpoint_ctl(offset, n, is_in, value);
            return;
        }
        if let Some(ch) = Core::channel_char(offset) {
            core.write_channel_char(ch, value);
            return;
        }
        match offset {
            reg::GRSTCTL => {
                let mut v = value & !grstctl::CSRST;
                if !core.flush_stuck {
                    v &= !grstctl::TXFFLSH;
                }
                core.regs.insert(offset, v);
            }
            reg::DCTL => {
                if value & dctl::SGONAK != 0 && !core.gonak_stuck {
                    core.global_out_nak = true;
                }
                if value & dctl::CGONAK != 0 {
                    core.global_out_nak = false;
                }
                let v = value & !(dctl::SGONAK | dctl::CGONAK | dctl::CGINAK);
                core.regs.insert(offset, v);
            }
            reg::HPRT => core.write_port(value),
            _ => {
                core.regs.insert(offset, value);
            }
        }
    }

    fn read_fifo(&mut self, _index: usize) -> u32 {
        self.0.borrow_mut().rx_data.pop_front().unwrap_or(0)
    }

    fn write_fifo(&mut self, index: usize, word: u32) {
        self.0.borrow_mut().tx.push((index, word));
    }

    fn set_irq_enabled(&mut self, enabled: bool) {
        self.0.borrow_mut().irq_enabled = enabled;
    }

    fn set_vbus(&mut self, on: bool) {
        self.0.borrow_mut().vbus = on;
    }
}

/// Fake clock; counts the nanoseconds the drivers asked to wait.
#[derive(Clone, Default)]
pub struct TestDelay(Rc<Cell<u64>>);

impl TestDelay {
    pub fn elapsed_ms(&self) -> u64 {
        self.0.get() / 1_000_000
    }
}

impl DelayNs for TestDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.set(self.0.get() + u64::from(ns));
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Device(DeviceEvent),
    Endpoint(EndpointAddress, EndpointEvent),
    Port(u8, PortEvent),
    Pipe(PipeHandle, PipeEvent),
}

/// Records every signal from either controller.
#[derive(Clone, Default)]
pub struct Recorder(Rc<RefCell<Vec<Event>>>);

impl Recorder {
    pub fn events(&self) -> Vec<Event> {
        self.0.borrow().clone()
    }

    pub fn take(&self) -> Vec<Event> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    pub fn count(&self, event: Event) -> usize {
        self.0.borrow().iter().filter(|&&e| e == event).count()
    }
}

impl device::Signals for Recorder {
    fn device_event(&mut self, event: DeviceEvent) {
        self.0.borrow_mut().push(Event::Device(event));
    }

    fn endpoint_event(&mut self, endpoint: EndpointAddress, event: EndpointEvent) {
        self.0.borrow_mut().push(Event::Endpoint(endpoint, event));
    }
}

impl host::Signals for Recorder {
    fn port_event(&mut self, port: u8, event: PortEvent) {
        self.0.borrow_mut().push(Event::Port(port, event));
    }

    fn pipe_event(&mut self, pipe: PipeHandle, event: PipeEvent) {
        self.0.borrow_mut().push(Event::Pipe(pipe, event));
    }
}

/// Leaked test buffer: the transfer half and a raw pointer for reading results back.
pub struct TestBuffer {
    ptr: *mut u8,
    len: usize,
}

impl TestBuffer {
    pub fn new(len: usize) -> Self {
        Self::from_slice(&vec![0u8; len])
    }

    pub fn from_slice(data: &[u8]) -> Self {
        let leaked: &'static mut [u8] = Box::leak(data.to_vec().into_boxed_slice());
        Self {
            ptr: leaked.as_mut_ptr(),
            len: leaked.len(),
        }
    }

    pub fn buffer(&self) -> Buffer {
        // SAFETY: the allocation is leaked, and tests only read it back between transfers.
        unsafe { Buffer::from_raw_parts(self.ptr, self.len) }
    }

    pub fn contents(&self) -> Vec<u8> {
        // SAFETY: as above.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }.to_vec()
    }
}
