// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Core bring-up steps common to device and host mode.

use embedded_hal::delay::DelayNs;

use super::regs::{gccfg, grstctl, gusbcfg, pcgcctl, reg};
use super::timing::{self, wait_until, Timeout};
use super::Registers;
use crate::config::Phy;

/// Role the core is forced into after reset.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    Device,
    Host,
}

/// Clock the core, pulse its module reset, select the PHY and run a core soft reset.
///
/// `reset_pulse_ms` is held on both edges of the RCC module reset.
pub fn reset_core<R, D>(regs: &mut R, delay: &mut D, phy: Phy, reset_pulse_ms: u32) -> Result<(), Timeout>
where
    R: Registers,
    D: DelayNs,
{
    regs.set_clock_enabled(true, phy.is_ulpi());

    regs.set_module_reset(true);
    delay.delay_ms(reset_pulse_ms);
    regs.set_module_reset(false);
    delay.delay_ms(reset_pulse_ms);

    match phy {
        Phy::InternalFullSpeed => {
            regs.clear_bits(reg::PCGCCTL, pcgcctl::STPPCLK);
            regs.set_bits(reg::GCCFG, gccfg::PWRDWN);
            regs.set_bits(reg::GUSBCFG, gusbcfg::PHYSEL | gusbcfg::PHYLPCS);
        }
        Phy::UlpiHighSpeed => {
            regs.clear_bits(reg::GCCFG, gccfg::PWRDWN);
            regs.clear_bits(
                reg::GUSBCFG,
                gusbcfg::TSDPS | gusbcfg::ULPIFSLS | gusbcfg::PHYSEL | gusbcfg::ULPIEVBUSI,
            );
            regs.set_bits(reg::GUSBCFG, gusbcfg::ULPIEVBUSD);
        }
    }

    wait_until(delay, timing::CORE_RESET, || {
        regs.read(reg::GRSTCTL) & grstctl::AHBIDL != 0
    })?;

    regs.set_bits(reg::GRSTCTL, grstctl::CSRST);
    wait_until(delay, timing::CORE_RESET, || {
        regs.read(reg::GRSTCTL) & grstctl::CSRST == 0
    })?;
    delay.delay_ms(1);

    wait_until(delay, timing::CORE_RESET, || {
        regs.read(reg::GRSTCTL) & grstctl::AHBIDL != 0
    })
}

/// Force the core into `mode`, waiting `settle_ms` when the mode actually changes.
pub fn force_mode<R, D>(regs: &mut R, delay: &mut D, mode: Mode, settle_ms: u32)
where
    R: Registers,
    D: DelayNs,
{
    let (set, clear) = match mode {
        Mode::Device => (gusbcfg::FDMOD, gusbcfg::FHMOD),
        Mode::Host => (gusbcfg::FHMOD, gusbcfg::FDMOD),
    };
    let cfg = regs.read(reg::GUSBCFG);
    if cfg & set == 0 || cfg & clear != 0 {
        regs.write(reg::GUSBCFG, (cfg & !clear) | set);
        delay.delay_ms(settle_ms);
    }
}

/// Flush TX FIFO `fifo`, or every TX FIFO with [`grstctl::TXFNUM_ALL`].
pub fn flush_tx_fifo<R, D>(regs: &mut R, delay: &mut D, fifo: u32) -> Result<(), Timeout>
where
    R: Registers,
    D: DelayNs,
{
    wait_until(delay, timing::HANDSHAKE, || {
        regs.read(reg::GRSTCTL) & grstctl::TXFFLSH == 0
    })?;

    regs.modify(reg::GRSTCTL, |v| {
        (v & !grstctl::TXFNUM_MSK) | ((fifo << grstctl::TXFNUM_POS) & grstctl::TXFNUM_MSK)
    });
    regs.set_bits(reg::GRSTCTL, grstctl::TXFFLSH);

    wait_until(delay, timing::HANDSHAKE, || {
        regs.read(reg::GRSTCTL) & grstctl::TXFFLSH == 0
    })
}
