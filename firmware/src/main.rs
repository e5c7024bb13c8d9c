// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Bulk echo on the OTG_HS port (internal full-speed PHY, PB14/PB15).
//!
//! Endpoint 0 only logs SETUP packets; enumeration belongs to the stack above the driver. Whatever
//! arrives on endpoint 1 OUT is sent back on endpoint 1 IN.

#![no_main]
#![no_std]

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use cortex_m::interrupt::Mutex;
use cortex_m_rt::entry;
use defmt_rtt as _;
use panic_halt as _;

use hal::{
    pac::{self, interrupt},
    prelude::*,
    rcc::{HSEClock, HSEClockMode, PLL48CLK},
};
use stm32f7xx_hal as hal;

use otg_usb::config::DeviceConfig;
use otg_usb::device::{Callbacks, DeviceEvent, EndpointEvent, UsbDevice};
use otg_usb::hw::otg_hs::{NoVbus, OtgHs};
use otg_usb::usb::{Buffer, EndpointAddress, EndpointType, PowerState};

const EP0_OUT: EndpointAddress = EndpointAddress::from_raw(0x00);
const EP0_IN: EndpointAddress = EndpointAddress::from_raw(0x80);
const EP1_OUT: EndpointAddress = EndpointAddress::from_raw(0x01);
const EP1_IN: EndpointAddress = EndpointAddress::from_raw(0x81);

const ECHO_SIZE: usize = 512;

type Usb = UsbDevice<OtgHs, CycleDelay, Callbacks>;

static USB: Mutex<RefCell<Option<Usb>>> = Mutex::new(RefCell::new(None));

static BUS_RESET: AtomicBool = AtomicBool::new(false);
static SETUP: AtomicBool = AtomicBool::new(false);
static ECHO_RECEIVED: AtomicBool = AtomicBool::new(false);
static ECHO_SENT: AtomicBool = AtomicBool::new(false);

/// `DelayNs` over the SysTick busy-wait.
struct CycleDelay(cortex_m::delay::Delay);

impl embedded_hal::delay::DelayNs for CycleDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.delay_us(ns.div_ceil(1000));
    }

    fn delay_us(&mut self, us: u32) {
        self.0.delay_us(us);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.0.delay_ms(ms);
    }
}

fn on_device(event: DeviceEvent) {
    defmt::info!("bus: {}", event);
    if event == DeviceEvent::Reset {
        BUS_RESET.store(true, Ordering::Release);
    }
}

fn on_endpoint(endpoint: EndpointAddress, event: EndpointEvent) {
    match (endpoint.number(), event) {
        (0, EndpointEvent::Setup) => SETUP.store(true, Ordering::Release),
        (1, EndpointEvent::Out) => ECHO_RECEIVED.store(true, Ordering::Release),
        (1, EndpointEvent::In) => ECHO_SENT.store(true, Ordering::Release),
        _ => {}
    }
}

fn with_usb<R>(f: impl FnOnce(&mut Usb) -> R) -> Option<R> {
    cortex_m::interrupt::free(|cs| USB.borrow(cs).borrow_mut().as_mut().map(f))
}

#[entry]
fn main() -> ! {
    // Peripherals
    let dp = pac::Peripherals::take().unwrap();
    let cp = cortex_m::Peripherals::take().unwrap();

    // Clocks (PLL48CLK feeds the full-speed PHY)
    let rcc = dp.RCC.constrain();
    let clocks = rcc
        .cfgr
        .hse(HSEClock::new(8.MHz(), HSEClockMode::Bypass))
        .use_pll()
        .use_pll48clk(PLL48CLK::Pllq)
        .sysclk(216.MHz())
        .freeze();
    let delay = CycleDelay(cortex_m::delay::Delay::new(cp.SYST, clocks.sysclk().raw()));

    // GPIO
    let gpiob = dp.GPIOB.split();
    let _usb_dm = gpiob.pb14.into_alternate::<12>();
    let _usb_dp = gpiob.pb15.into_alternate::<12>();

    // Controller
    let otg = OtgHs::new(dp.OTG_HS_GLOBAL, NoVbus);
    let mut usb = UsbDevice::new(otg, delay, DeviceConfig::DEFAULT).unwrap();
    usb.initialize(Callbacks {
        device: on_device,
        endpoint: on_endpoint,
    })
    .unwrap();
    usb.power_control(PowerState::Full).unwrap();
    usb.connect().unwrap();
    cortex_m::interrupt::free(|cs| USB.borrow(cs).replace(Some(usb)));

    let setup: &'static mut [u8; 8] = cortex_m::singleton!(: [u8; 8] = [0; 8]).unwrap();
    let echo: &'static mut [u8; ECHO_SIZE] =
        cortex_m::singleton!(: [u8; ECHO_SIZE] = [0; ECHO_SIZE]).unwrap();
    let echo_ptr = echo.as_mut_ptr();

    loop {
        if BUS_RESET.swap(false, Ordering::Acquire) {
            let r = with_usb(|usb| {
                usb.endpoint_configure(EP0_OUT, EndpointType::Control, 64)?;
                usb.endpoint_configure(EP0_IN, EndpointType::Control, 64)?;
                usb.endpoint_configure(EP1_OUT, EndpointType::Bulk, 64)?;
                usb.endpoint_configure(EP1_IN, EndpointType::Bulk, 64)?;
                // SAFETY: the echo buffer is only lent to one endpoint at a time.
                usb.endpoint_transfer(EP1_OUT, unsafe { Buffer::from_raw_parts(echo_ptr, ECHO_SIZE) })
            });
            if let Some(Err(e)) = r {
                defmt::warn!("endpoint setup failed: {}", e);
            }
        }

        if SETUP.swap(false, Ordering::Acquire) {
            if let Some(Ok(())) = with_usb(|usb| usb.read_setup_packet(setup)) {
                defmt::info!("setup {=[u8]:x}", &setup[..]);
            }
        }

        if ECHO_RECEIVED.swap(false, Ordering::Acquire) {
            let r = with_usb(|usb| {
                let n = usb.endpoint_transfer_result(EP1_OUT) as usize;
                // SAFETY: the OUT transfer on this buffer has completed.
                usb.endpoint_transfer(EP1_IN, unsafe { Buffer::from_raw_parts(echo_ptr, n) })
            });
            if let Some(Err(e)) = r {
                defmt::warn!("echo IN failed: {}", e);
            }
        }

        if ECHO_SENT.swap(false, Ordering::Acquire) {
            let r = with_usb(|usb| {
                // SAFETY: the IN transfer on this buffer has completed.
                usb.endpoint_transfer(EP1_OUT, unsafe { Buffer::from_raw_parts(echo_ptr, ECHO_SIZE) })
            });
            if let Some(Err(e)) = r {
                defmt::warn!("echo OUT failed: {}", e);
            }
        }

        cortex_m::asm::wfi();
    }
}

#[interrupt]
fn OTG_HS() {
    with_usb(|usb| usb.on_interrupt());
}
