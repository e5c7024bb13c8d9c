// SPDX-License-Identifier: MIT
// © 2025–2026 Christopher Liu

//! Word-granular FIFO copies.
//!
//! The core only moves whole 32-bit words, little-endian. A packet of `n` bytes always occupies
//! `ceil(n / 4)` words, and all of them must be popped even when the caller keeps fewer bytes.

use super::Registers;

#[inline]
pub const fn words(bytes: usize) -> usize {
    (bytes + 3) / 4
}

/// Pop a `received`-byte packet from the RX FIFO, keeping the first `dest.len()` bytes.
///
/// `dest` may be shorter than `received` (overflowing or discarded data); the tail is drained.
pub fn read_packet<R: Registers>(regs: &mut R, index: usize, dest: &mut [u8], received: usize) {
    let mut chunks = dest.chunks_mut(4);
    for _ in 0..words(received) {
        let word = regs.read_fifo(index).to_le_bytes();
        if let Some(chunk) = chunks.next() {
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
}

/// Push `src` into TX FIFO `index`, padding the last word with zeros.
pub fn write_packet<R: Registers>(regs: &mut R, index: usize, src: &[u8]) {
    for chunk in src.chunks(4) {
        let mut word = [0u8; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        regs.write_fifo(index, u32::from_le_bytes(word));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    #[derive(Default)]
    struct Fifo {
        rx: VecDeque<u32>,
        tx: Vec<(usize, u32)>,
    }

    impl Registers for Fifo {
        fn read(&self, _offset: usize) -> u32 {
            0
        }
        fn write(&mut self, _offset: usize, _value: u32) {}
        fn read_fifo(&mut self, _index: usize) -> u32 {
            self.rx.pop_front().unwrap_or(0)
        }
        fn write_fifo(&mut self, index: usize, word: u32) {
            self.tx.push((index, word));
        }
    }

    #[test]
    fn reads_partial_last_word() {
        let mut f = Fifo::default();
        f.rx.extend([0x0403_0201, 0x0000_0605]);
        let mut buf = [0u8; 6];
        read_packet(&mut f, 0, &mut buf, 6);
        assert_eq!(buf, [1, 2, 3, 4, 5, 6]);
        assert!(f.rx.is_empty());
    }

    #[test]
    fn drains_bytes_past_destination() {
        let mut f = Fifo::default();
        f.rx.extend([0x0403_0201, 0x0807_0605, 0x0C0B_0A09, 0xAAAA_AAAA]);
        let mut buf = [0u8; 5];
        read_packet(&mut f, 0, &mut buf, 12);
        assert_eq!(buf, [1, 2, 3, 4, 5]);
        // Word belonging to the next packet stays queued.
        assert_eq!(f.rx.len(), 1);
    }

    #[test]
    fn discarded_packet_is_fully_drained() {
        let mut f = Fifo::default();
        f.rx.extend([1, 2, 3]);
        read_packet(&mut f, 0, &mut [], 10);
        assert!(f.rx.is_empty());
    }

    #[test]
    fn writes_padded_words() {
        let mut f = Fifo::default();
        write_packet(&mut f, 2, &[1, 2, 3, 4, 5]);
        assert_eq!(f.tx, vec![(2, 0x0403_0201), (2, 0x0000_0005)]);
    }
}
