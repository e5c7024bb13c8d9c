// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Register and FIFO access layer shared by the device and host controllers.

pub mod fifo;
pub mod power;
pub mod regs;
pub mod timing;

#[cfg(target_os = "none")]
pub mod otg_hs;

/// Access to one OTG core: 32-bit registers by offset, the packet FIFOs, and the few MCU-level
/// controls (clock, module reset, interrupt line, VBUS switch) that sit outside the core.
///
/// The MCU-level hooks default to no-ops so a bare register block only has to supply the four
/// access methods.
pub trait Registers {
    fn read(&self, offset: usize) -> u32;

    fn write(&mut self, offset: usize, value: u32);

    /// Pop one word from the shared receive FIFO through FIFO window `index`.
    fn read_fifo(&mut self, index: usize) -> u32;

    /// Push one word into TX FIFO `index` (device IN endpoint or host channel).
    fn write_fifo(&mut self, index: usize, word: u32);

    #[inline]
    fn modify<F>(&mut self, offset: usize, f: F)
    where
        F: FnOnce(u32) -> u32,
    {
        let v = self.read(offset);
        self.write(offset, f(v));
    }

    #[inline]
    fn set_bits(&mut self, offset: usize, bits: u32) {
        self.modify(offset, |v| v | bits);
    }

    #[inline]
    fn clear_bits(&mut self, offset: usize, bits: u32) {
        self.modify(offset, |v| v & !bits);
    }

    /// Gate the core's bus clock (and the ULPI clock when `ulpi` is set).
    fn set_clock_enabled(&mut self, _enabled: bool, _ulpi: bool) {}

    /// Hold or release the core in its RCC module reset.
    fn set_module_reset(&mut self, _asserted: bool) {}

    /// Enable or disable the controller interrupt line. Disabling also clears a pending request.
    fn set_irq_enabled(&mut self, _enabled: bool) {}

    /// Drive the external VBUS power switch.
    fn set_vbus(&mut self, _on: bool) {}

    /// Overcurrent flag of the external VBUS switch.
    fn overcurrent(&self) -> bool {
        false
    }

    /// Run `f` with the controller interrupt held off.
    fn with_irq_masked<R, F>(&mut self, f: F) -> R
    where
        Self: Sized,
        F: FnOnce(&mut Self) -> R,
    {
        f(self)
    }
}
