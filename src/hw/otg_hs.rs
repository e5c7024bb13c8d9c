// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! STM32F7 OTG_HS backend for [`Registers`].
//!
//! Registers are reached through the core's base address; the RCC clock and reset bits and the
//! NVIC line are driven directly, the same way the other peripheral wrappers in this crate do.
//!
//! Example:
//! ```no_run
//! let otg = OtgHs::new(dp.OTG_HS_GLOBAL, NoVbus);
//! let mut usb = UsbDevice::new(otg, delay, DeviceConfig::DEFAULT)?;
//! ```

use cortex_m::peripheral::NVIC;
use stm32f7xx_hal::pac::{self, Interrupt};

use super::Registers;

/// Offset of the first FIFO window; one 4 KiB window per endpoint or channel.
const FIFO_BASE: usize = 0x1000;
const FIFO_STRIDE: usize = 0x1000;

/// External VBUS power switch of a host port.
pub trait VbusSwitch {
    fn set(&mut self, on: bool);

    fn overcurrent(&self) -> bool {
        false
    }
}

/// Board without a switchable VBUS supply.
pub struct NoVbus;

impl VbusSwitch for NoVbus {
    fn set(&mut self, _on: bool) {}
}

/// The OTG_HS core. Owns the global register block; the device, host and power blocks that
/// follow it in the address space are reached by offset.
pub struct OtgHs<V = NoVbus> {
    otg: pac::OTG_HS_GLOBAL,
    vbus: V,
}

impl<V: VbusSwitch> OtgHs<V> {
    pub fn new(otg: pac::OTG_HS_GLOBAL, vbus: V) -> Self {
        Self { otg, vbus }
    }

    /// Consume the wrapper and return the underlying peripheral and VBUS switch.
    #[inline]
    pub fn free(self) -> (pac::OTG_HS_GLOBAL, V) {
        (self.otg, self.vbus)
    }

    #[inline]
    fn base(&self) -> usize {
        pac::OTG_HS_GLOBAL::ptr() as usize
    }

    #[inline]
    fn reg(&self, offset: usize) -> *mut u32 {
        (self.base() + offset) as *mut u32
    }

    #[inline]
    fn fifo(&self, index: usize) -> *mut u32 {
        (self.base() + FIFO_BASE + FIFO_STRIDE * index) as *mut u32
    }
}

impl<V: VbusSwitch> Registers for OtgHs<V> {
    #[inline]
    fn read(&self, offset: usize) -> u32 {
        // SAFETY: offsets come from the register map and stay inside the core's address window.
        unsafe { self.reg(offset).read_volatile() }
    }

    #[inline]
    fn write(&mut self, offset: usize, value: u32) {
        // SAFETY: as above; `&mut self` serializes access to the core.
        unsafe { self.reg(offset).write_volatile(value) }
    }

    #[inline]
    fn read_fifo(&mut self, index: usize) -> u32 {
        // SAFETY: FIFO windows are word-addressed; any read of the window pops one word.
        unsafe { self.fifo(index).read_volatile() }
    }

    #[inline]
    fn write_fifo(&mut self, index: usize, word: u32) {
        // SAFETY: as above.
        unsafe { self.fifo(index).write_volatile(word) }
    }

    fn set_clock_enabled(&mut self, enabled: bool, ulpi: bool) {
        let rcc = unsafe { &*pac::RCC::ptr() };
        rcc.ahb1enr.modify(|_, w| {
            w.otghsen().bit(enabled);
            w.otghsulpien().bit(enabled && ulpi)
        });
    }

    fn set_module_reset(&mut self, asserted: bool) {
        let rcc = unsafe { &*pac::RCC::ptr() };
        rcc.ahb1rstr.modify(|_, w| w.otghsrst().bit(asserted));
    }

    fn set_irq_enabled(&mut self, enabled: bool) {
        if enabled {
            // SAFETY: the handler only touches the controller through its owner.
            unsafe { NVIC::unmask(Interrupt::OTG_HS) };
        } else {
            NVIC::mask(Interrupt::OTG_HS);
            NVIC::unpend(Interrupt::OTG_HS);
        }
    }

    fn set_vbus(&mut self, on: bool) {
        self.vbus.set(on);
    }

    fn overcurrent(&self) -> bool {
        self.vbus.overcurrent()
    }

    fn with_irq_masked<R, F>(&mut self, f: F) -> R
    where
        F: FnOnce(&mut Self) -> R,
    {
        let was_enabled = NVIC::is_enabled(Interrupt::OTG_HS);
        NVIC::mask(Interrupt::OTG_HS);
        let r = f(self);
        if was_enabled {
            // SAFETY: restores the state found on entry.
            unsafe { NVIC::unmask(Interrupt::OTG_HS) };
        }
        r
    }
}
