// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

fn end_of_bitstream_error<T>() -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::UnexpectedEof, "unexpected end of bitstream"))
}

mod private {
    pub trait FetchBitsRtl {
        /// Append one byte from the source after the remaining bits. Returns `false` if the source
        /// is empty.
        fn fetch_byte(&mut self) -> bool;

        /// Get all the bits in the accumulator.
        fn get_bits(&self) -> u64;

        /// Get the number of bits left in the accumulator.
        fn num_bits_left(&self) -> u32;

        /// Consume `num` bits from the accumulator.
        fn consume_bits(&mut self, num: u32);

        /// Mark the bitstream as exhausted. All subsequent reads will fail.
        fn set_exhausted(&mut self);

        /// Returns `true` if a read ran past the end of the bitstream.
        fn is_exhausted(&self) -> bool;
    }
}

/// `ReadBitsRtl` reads bits from least-significant to most-significant.
///
/// Once any read runs past the end of the bitstream the reader becomes *exhausted*: the failed read
/// and every read after it return an end-of-bitstream error. Higher level decoders check for this
/// condition at well-defined points instead of after every read.
pub trait ReadBitsRtl: private::FetchBitsRtl {
    /// Ignores the specified number of bits from the stream or returns an error.
    #[inline(always)]
    fn ignore_bits(&mut self, mut num_bits: u32) -> io::Result<()> {
        while num_bits > 24 {
            self.read_bits_leq32(24)?;
            num_bits -= 24;
        }
        self.read_bits_leq32(num_bits)?;
        Ok(())
    }

    /// Read a single bit as a boolean value or returns an error.
    #[inline(always)]
    fn read_bit(&mut self) -> io::Result<bool> {
        Ok(self.read_bits_leq32(1)? == 1)
    }

    /// Reads up to 32-bits or returns an error.
    ///
    /// Reads of more than 24 bits are split into a 24-bit read followed by a read of the
    /// remainder.
    fn read_bits_leq32(&mut self, bit_width: u32) -> io::Result<u32> {
        debug_assert!(bit_width <= u32::BITS);

        if self.is_exhausted() {
            return end_of_bitstream_error();
        }

        if bit_width > 24 {
            let lo = self.read_bits_leq32(24)?;
            let hi = self.read_bits_leq32(bit_width - 24)?;
            return Ok(lo | (hi << 24));
        }

        while self.num_bits_left() < bit_width {
            if !self.fetch_byte() {
                self.set_exhausted();
                return end_of_bitstream_error();
            }
        }

        let bits = self.get_bits() & ((1 << bit_width) - 1);

        self.consume_bits(bit_width);

        Ok(bits as u32)
    }

    /// Refills the bit accumulator to at-least 32 bits, or as many bits as are left in the
    /// bitstream, in preparation of a codeword lookup.
    #[inline(always)]
    fn fill_lookahead(&mut self) {
        while self.num_bits_left() < 32 {
            if !self.fetch_byte() {
                break;
            }
        }
    }

    /// Gets up-to the next 32 bits without consuming them. Bits past the end of the bitstream
    /// read as 0. Use `lookahead_len` to get the number of valid bits.
    #[inline(always)]
    fn peek_lookahead(&self) -> u32 {
        self.get_bits() as u32
    }

    /// Gets the number of bits that may be peeked.
    #[inline(always)]
    fn lookahead_len(&self) -> u32 {
        if self.is_exhausted() {
            0
        }
        else {
            self.num_bits_left().min(32)
        }
    }

    /// Consumes `num` previously peeked bits. If less than `num` bits remain, the bitstream is
    /// exhausted and an error is returned.
    #[inline(always)]
    fn consume_lookahead(&mut self, num: u32) -> io::Result<()> {
        if self.is_exhausted() || num > self.num_bits_left() {
            self.set_exhausted();
            return end_of_bitstream_error();
        }
        self.consume_bits(num);
        Ok(())
    }

    /// Returns `true` if a read has run past the end of the bitstream.
    #[inline(always)]
    fn exhausted(&self) -> bool {
        self.is_exhausted()
    }
}

/// `BitReaderRtl` reads bits from least-significant to most-significant from any `&[u8]`.
///
/// Stated another way, if N-bits are read from a `BitReaderRtl` then bit 0, the first bit read,
/// is the least-significant bit, and bit N-1, the last bit read, is the most-significant.
///
/// Bytes are moved into the accumulator one at a time, and only when needed.
pub struct BitReaderRtl<'a> {
    buf: &'a [u8],
    bits: u64,
    n_bits_left: u32,
    exhausted: bool,
}

impl<'a> BitReaderRtl<'a> {
    /// Instantiate a new `BitReaderRtl` with the given buffer.
    pub fn new(buf: &'a [u8]) -> Self {
        BitReaderRtl { buf, bits: 0, n_bits_left: 0, exhausted: false }
    }

    /// Returns `true` if every byte of the source has been moved into the accumulator.
    pub fn is_source_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Gets the number of bits left unread.
    pub fn bits_left(&self) -> u64 {
        if self.exhausted {
            0
        }
        else {
            (8 * self.buf.len() as u64) + u64::from(self.n_bits_left)
        }
    }
}

impl private::FetchBitsRtl for BitReaderRtl<'_> {
    #[inline(always)]
    fn fetch_byte(&mut self) -> bool {
        match self.buf.split_first() {
            Some((&byte, rest)) => {
                self.bits |= u64::from(byte) << self.n_bits_left;
                self.n_bits_left += 8;
                self.buf = rest;
                true
            }
            None => false,
        }
    }

    #[inline(always)]
    fn get_bits(&self) -> u64 {
        self.bits
    }

    #[inline(always)]
    fn num_bits_left(&self) -> u32 {
        self.n_bits_left
    }

    #[inline(always)]
    fn consume_bits(&mut self, num: u32) {
        self.n_bits_left -= num;
        self.bits >>= num;
    }

    #[inline(always)]
    fn set_exhausted(&mut self) {
        self.exhausted = true;
        self.bits = 0;
        self.n_bits_left = 0;
    }

    #[inline(always)]
    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

impl ReadBitsRtl for BitReaderRtl<'_> {}
