// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

use quaver_core::errors::Error;

/// As defined in section 9.2.1 of the Vorbis I specification.
///
/// The `ilog` function returns the position number (1 through n) of the highest set bit in the two's
/// complement integer value `x`.
#[inline(always)]
pub fn ilog(x: u32) -> u32 {
    32 - x.leading_zeros()
}

/// Returns `true` if the error was caused by reading past the end of the packet.
#[inline(always)]
pub fn is_end_of_packet(err: &Error) -> bool {
    matches!(err, Error::IoError(e) if e.kind() == io::ErrorKind::UnexpectedEof)
}

pub struct BitSetIterator<'a> {
    bits: &'a [u32],
    pos: usize,
    count: usize,
}

impl Iterator for BitSetIterator<'_> {
    type Item = usize;

    fn next(&mut self) -> Option<Self::Item> {
        if self.count == 0 {
            return None;
        }

        for bits in &self.bits[self.pos >> 5..] {
            let bits_read = self.pos & 0x1f;

            let offset = (bits >> bits_read).trailing_zeros() as usize;

            if offset < 32 - bits_read {
                self.pos += offset + 1;
                self.count -= 1;
                return Some(self.pos - 1);
            }
            else {
                self.pos += 32 - bits_read;
            }
        }

        None
    }
}

/// A set of up-to 256 channel indicies.
#[derive(Clone, Default)]
pub struct BitSet256 {
    bits: [u32; 8],
    bit_count: usize,
}

impl BitSet256 {
    #[inline(always)]
    pub fn set(&mut self, idx: usize) {
        if !self.is_set(idx) {
            self.bits[idx >> 5] |= 1 << (idx & 0x1f);
            self.bit_count += 1;
        }
    }

    #[inline(always)]
    pub fn unset(&mut self, idx: usize) {
        if self.is_set(idx) {
            self.bits[idx >> 5] &= !(1 << (idx & 0x1f));
            self.bit_count -= 1;
        }
    }

    #[inline(always)]
    pub fn is_set(&self, idx: usize) -> bool {
        self.bits[idx >> 5] & (1 << (idx & 0x1f)) != 0
    }

    #[inline(always)]
    pub fn count(&self) -> usize {
        self.bit_count
    }

    #[inline(always)]
    pub fn iter(&self) -> BitSetIterator<'_> {
        BitSetIterator { bits: &self.bits, pos: 0, count: self.bit_count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_ilog() {
        assert_eq!(ilog(0), 0);
        assert_eq!(ilog(1), 1);
        assert_eq!(ilog(2), 2);
        assert_eq!(ilog(3), 2);
        assert_eq!(ilog(4), 3);
        assert_eq!(ilog(7), 3);
        assert_eq!(ilog(u32::MAX), 32);
    }

    #[test]
    fn verify_bitset() {
        let mut bitset: BitSet256 = Default::default();

        assert_eq!(bitset.count(), 0);
        assert_eq!(bitset.iter().next(), None);

        for idx in [1, 2, 56, 64, 127, 128, 250, 255, 2] {
            bitset.set(idx);
        }

        assert_eq!(bitset.count(), 8);
        assert!(bitset.is_set(56));
        assert!(!bitset.is_set(57));
        assert_eq!(bitset.iter().collect::<Vec<_>>(), vec![1, 2, 56, 64, 127, 128, 250, 255]);

        bitset.unset(64);
        bitset.unset(65);
        assert_eq!(bitset.count(), 7);
        assert!(!bitset.is_set(64));
        assert_eq!(bitset.iter().collect::<Vec<_>>(), vec![1, 2, 56, 127, 128, 250, 255]);
    }

    #[test]
    fn verify_end_of_packet() {
        let eop = Error::IoError(io::Error::new(io::ErrorKind::UnexpectedEof, "eop"));
        assert!(is_end_of_packet(&eop));
        assert!(!is_end_of_packet(&Error::DecodeError("vorbis: invalid codeword")));
    }
}
