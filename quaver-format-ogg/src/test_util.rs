// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::page::{page_crc, PageFlags};

/// Builds OGG pages for tests.
pub struct PageBuilder {
    flags: PageFlags,
    granule: u64,
    sequence: u32,
    segments: Vec<u8>,
    body: Vec<u8>,
}

impl PageBuilder {
    pub fn new() -> Self {
        PageBuilder { flags: PageFlags::empty(), granule: 0, sequence: 0, segments: vec![], body: vec![] }
    }

    pub fn flags(mut self, flags: PageFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn granule(mut self, granule: u64) -> Self {
        self.granule = granule;
        self
    }

    pub fn sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    /// Appends a complete packet.
    pub fn packet(mut self, data: &[u8]) -> Self {
        let mut len = data.len();
        while len >= 255 {
            self.segments.push(255);
            len -= 255;
        }
        self.segments.push(len as u8);
        self.body.extend_from_slice(data);
        self
    }

    /// Appends the start of a packet that continues on the next page. The length must be a
    /// multiple of 255.
    pub fn partial(mut self, data: &[u8]) -> Self {
        assert_eq!(data.len() % 255, 0);
        self.segments.extend(std::iter::repeat(255).take(data.len() / 255));
        self.body.extend_from_slice(data);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"OggS");
        buf.push(0);
        buf.push(self.flags.bits());
        buf.extend_from_slice(&self.granule.to_le_bytes());
        buf.extend_from_slice(&0x1234_5678u32.to_le_bytes());
        buf.extend_from_slice(&self.sequence.to_le_bytes());
        buf.extend_from_slice(&[0; 4]);
        buf.push(self.segments.len() as u8);
        buf.extend_from_slice(&self.segments);
        buf.extend_from_slice(&self.body);

        let crc = page_crc(&buf);
        buf[22..26].copy_from_slice(&crc.to_le_bytes());
        buf
    }
}
