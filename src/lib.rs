// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! # OTG USB Controller Drivers
//!
//! Device-mode and host-mode drivers for the Synopsys DWC2 "OTG_HS" core found on STM32F7 MCUs,
//! running in slave mode (CPU-driven FIFO copies, no DMA).
//!
//! Both drivers sit below a USB stack: they own the controller registers, move packets between the
//! on-chip FIFOs and caller buffers, and report bus, endpoint and pipe events through a signal
//! trait. Enumeration, class drivers and hub scheduling live above this crate.
//!
//! ## Crate Structure
//!
//! | Module | Purpose |
//! | ------ | -------- |
//! | [`hw`] | Register map, register access trait, FIFO copies, bounded waits, STM32 backend |
//! | [`usb`] | Types shared by both sides (endpoint address/type, speed, power, buffers) |
//! | [`config`] | Compile-time FIFO partitioning and board options |
//! | [`device`] | Device controller: endpoints, setup mailbox, device interrupt dispatch |
//! | [`host`] | Host controller: root port, pipes bound to channels, host interrupt dispatch |
//!
//! ## Getting Started
//!
//! Run the host-side tests (they drive both controllers against a simulated register block):
//!
//! ```bash
//! cargo test
//! ```
//!
//! Flash the echo demo from `firmware/`:
//!
//! ```bash
//! cd firmware && cargo run --release
//! ```
//!
//! ## License
//!
//! Licensed under the **MIT License**.
//! See the `LICENSE` file in the repository root for full terms.
//!
//! © 2025–2026 Christopher Liu

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod log;

pub mod config;
pub mod device;
pub mod error;
pub mod host;
pub mod hw;
pub mod usb;

pub use error::Error;
