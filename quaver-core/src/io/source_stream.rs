// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp;
use std::io;
use std::io::{Read, Seek};

use super::{MediaSource, ReadBytes};

const END_OF_STREAM_ERROR_STR: &str = "end of stream";

/// A `SourceStream` is the buffered, seekable byte reader used for pull-mode decoding.
///
/// To amortize the overhead of reads on the inner source, `SourceStream` implements a read-ahead
/// buffer. The read-ahead length starts at 1kB, and doubles as more sequential reads are performed
/// until it reaches 32kB. Seeking invalidates the buffer and restarts the read-ahead length, which
/// keeps the excess data read during the page probing of a seek small.
pub struct SourceStream {
    /// The source reader.
    inner: Box<dyn MediaSource>,
    /// The read-ahead buffer.
    buf: Box<[u8]>,
    /// The read position within the buffer.
    read_pos: usize,
    /// The end of valid data within the buffer.
    end_pos: usize,
    /// The current block size for a new read.
    read_block_len: usize,
    /// Absolute position of the inner stream, which is the position after the last buffered byte.
    abs_pos: u64,
    /// The cached length of the inner stream.
    byte_len: Option<u64>,
}

impl SourceStream {
    const MIN_BLOCK_LEN: usize = 1 * 1024;
    const MAX_BLOCK_LEN: usize = 32 * 1024;

    pub fn new(source: Box<dyn MediaSource>) -> Self {
        let byte_len = source.byte_len();

        SourceStream {
            inner: source,
            buf: vec![0; Self::MAX_BLOCK_LEN].into_boxed_slice(),
            read_pos: 0,
            end_pos: 0,
            read_block_len: Self::MIN_BLOCK_LEN,
            abs_pos: 0,
            byte_len,
        }
    }

    /// Gets the total length of the stream in bytes, if known.
    pub fn byte_len(&self) -> Option<u64> {
        self.byte_len
    }

    /// Returns if the buffer has been exhausted.
    #[inline(always)]
    fn is_buffer_exhausted(&self) -> bool {
        self.read_pos == self.end_pos
    }

    /// If the buffer has been exhausted, fetch a new block of data to replenish the buffer.
    fn fetch(&mut self) -> io::Result<()> {
        if self.is_buffer_exhausted() {
            let actual_read_len = loop {
                match self.inner.read(&mut self.buf[..self.read_block_len]) {
                    Ok(len) => break len,
                    Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            };

            self.read_pos = 0;
            self.end_pos = actual_read_len;
            self.abs_pos += actual_read_len as u64;

            // Grow the read block length exponentially to reduce the overhead of buffering on
            // consecutive sequential reads.
            self.read_block_len = cmp::min(self.read_block_len << 1, Self::MAX_BLOCK_LEN);
        }

        Ok(())
    }

    /// If the buffer has been exhausted, fetch a new block of data to replenish the buffer. If
    /// no more data could be fetched, return an end-of-stream error.
    fn fetch_or_eof(&mut self) -> io::Result<()> {
        self.fetch()?;

        if self.is_buffer_exhausted() {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, END_OF_STREAM_ERROR_STR));
        }

        Ok(())
    }

    /// Resets the read-ahead buffer, and sets the absolute stream position to `pos`.
    fn reset(&mut self, pos: u64) {
        self.read_pos = 0;
        self.end_pos = 0;
        self.read_block_len = Self::MIN_BLOCK_LEN;
        self.abs_pos = pos;
    }
}

impl io::Seek for SourceStream {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        // The inner reader is ahead of the logical position by the number of unread buffered
        // bytes. Seeking within the buffer avoids a round-trip to the inner reader.
        let target = match pos {
            io::SeekFrom::Start(pos) => Some(pos),
            io::SeekFrom::Current(delta) => self.pos().checked_add_signed(delta),
            io::SeekFrom::End(_) => None,
        };

        if let Some(target) = target {
            let buf_start = self.abs_pos - self.end_pos as u64;

            if target >= buf_start && target <= self.abs_pos {
                self.read_pos = (target - buf_start) as usize;
                return Ok(target);
            }
        }

        let pos = match pos {
            io::SeekFrom::Current(delta) => {
                let unread = (self.end_pos - self.read_pos) as i64;
                self.inner.seek(io::SeekFrom::Current(delta - unread))
            }
            _ => self.inner.seek(pos),
        }?;

        self.reset(pos);

        Ok(pos)
    }
}

impl ReadBytes for SourceStream {
    #[inline(always)]
    fn read_byte(&mut self) -> io::Result<u8> {
        if self.is_buffer_exhausted() {
            self.fetch_or_eof()?;
        }

        let value = self.buf[self.read_pos];
        self.read_pos += 1;

        Ok(value)
    }

    fn read_buf_exact(&mut self, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            self.fetch_or_eof()?;

            let len = cmp::min(self.end_pos - self.read_pos, buf.len());
            buf[..len].copy_from_slice(&self.buf[self.read_pos..self.read_pos + len]);
            self.read_pos += len;

            buf = &mut buf[len..];
        }

        Ok(())
    }

    fn pos(&self) -> u64 {
        self.abs_pos - (self.end_pos - self.read_pos) as u64
    }
}
