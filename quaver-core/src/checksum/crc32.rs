// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use once_cell::sync::Lazy;

const CRC32_POLY: u32 = 0x04c1_1db7;

/// Lookup table for the non-reflected CRC-32 with polynomial 0x04c11db7, indexed by the
/// most-significant byte of the running CRC.
static CRC32_TABLE: Lazy<[u32; 256]> = Lazy::new(|| {
    let mut table = [0u32; 256];

    for (i, entry) in table.iter_mut().enumerate() {
        let mut r = (i as u32) << 24;

        for _ in 0..8 {
            r = if r & 0x8000_0000 != 0 { (r << 1) ^ CRC32_POLY } else { r << 1 };
        }

        *entry = r;
    }

    table
});

/// `Crc32` implements the CRC-32 checksum used by Ogg pages.
///
/// The polynomial is 0x04c11db7. Neither the input nor the output is reflected, and the output is
/// not inverted.
pub struct Crc32 {
    state: u32,
}

impl Crc32 {
    /// Instantiate a `Crc32` instance with an initial state.
    pub fn new(state: u32) -> Self {
        Crc32 { state }
    }

    /// Returns the computed CRC.
    pub fn crc(&self) -> u32 {
        self.state
    }

    /// Updates the CRC with a single byte.
    #[inline(always)]
    pub fn process_byte(&mut self, byte: u8) {
        self.state =
            (self.state << 8) ^ CRC32_TABLE[usize::from((self.state >> 24) as u8 ^ byte)];
    }

    /// Updates the CRC with a buffer of bytes.
    pub fn process_buf_bytes(&mut self, buf: &[u8]) {
        let table = &*CRC32_TABLE;

        for &byte in buf {
            self.state = (self.state << 8) ^ table[usize::from((self.state >> 24) as u8 ^ byte)];
        }
    }
}
