// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

use super::ReadBytes;

/// A `PacketReader` reads the byte-aligned fields of a packet held in memory.
pub struct PacketReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> PacketReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        PacketReader { buf, pos: 0 }
    }

    /// Gets the bytes that have not been read yet.
    pub fn remaining(&self) -> &'a [u8] {
        &self.buf[self.pos..]
    }

    /// Reads the next `len` bytes without copying them.
    pub fn read_bytes(&mut self, len: usize) -> io::Result<&'a [u8]> {
        match self.remaining().get(..len) {
            Some(bytes) => {
                self.pos += len;
                Ok(bytes)
            }
            None => Err(io::Error::new(io::ErrorKind::UnexpectedEof, "packet underrun")),
        }
    }
}

impl ReadBytes for PacketReader<'_> {
    #[inline(always)]
    fn read_byte(&mut self) -> io::Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    fn read_buf_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        buf.copy_from_slice(self.read_bytes(buf.len())?);
        Ok(())
    }

    #[inline(always)]
    fn pos(&self) -> u64 {
        self.pos as u64
    }
}
