// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `io` module reads the bytes of Ogg pages and Vorbis packets.
//!
//!  * [`SourceStream`] buffers a seekable [`MediaSource`] for pull-mode decoding.
//!  * [`PacketReader`] reads the fields of a header packet, or page header, held in memory.
//!  * [`BitReaderRtl`] reads the least-significant bit first fields of Vorbis packets.

use std::io;

mod bit;
mod packet_reader;
mod source_stream;

pub use bit::{BitReaderRtl, ReadBitsRtl};
pub use packet_reader::PacketReader;
pub use source_stream::SourceStream;

/// `MediaSource` is a composite trait of [`std::io::Read`] and [`std::io::Seek`]. A source *must*
/// implement this trait to be decoded in pull mode.
pub trait MediaSource: io::Read + io::Seek + Send + Sync {
    /// Returns the length in bytes, if available. The stream length can only be measured, and
    /// sought in, if the byte length is known.
    fn byte_len(&self) -> Option<u64>;
}

impl MediaSource for std::fs::File {
    fn byte_len(&self) -> Option<u64> {
        self.metadata().ok().map(|metadata| metadata.len())
    }
}

impl<T: AsRef<[u8]> + Send + Sync> MediaSource for io::Cursor<T> {
    fn byte_len(&self) -> Option<u64> {
        Some(self.get_ref().as_ref().len() as u64)
    }
}

/// `ReadBytes` reads the little-endian fields of Ogg page headers and Vorbis header packets.
///
/// All reads fail with an [`io::ErrorKind::UnexpectedEof`] error if the source ends first.
pub trait ReadBytes {
    /// Reads a single byte.
    fn read_byte(&mut self) -> io::Result<u8>;

    /// Reads exactly enough bytes to fill `buf`.
    fn read_buf_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;

    /// Gets the position of the next byte to be read.
    fn pos(&self) -> u64;

    /// Reads `N` bytes into an array.
    fn read_array<const N: usize>(&mut self) -> io::Result<[u8; N]> {
        let mut buf = [0; N];
        self.read_buf_exact(&mut buf)?;
        Ok(buf)
    }

    #[inline(always)]
    fn read_u32(&mut self) -> io::Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    #[inline(always)]
    fn read_i32(&mut self) -> io::Result<i32> {
        Ok(i32::from_le_bytes(self.read_array()?))
    }

    #[inline(always)]
    fn read_u64(&mut self) -> io::Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }
}
