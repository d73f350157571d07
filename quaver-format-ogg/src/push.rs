// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use quaver_core::errors::{decode_error, setup_error, Error, Result};

use log::{debug, warn};

use super::common::{Discontinuity, OggPacket};
use super::logical::PacketAssembler;
use super::page::{page_crc, probe_page, split_page, PageProbe, OGG_PAGE_MARKER};

/// `PushFramer` reassembles packets from bytes supplied in arbitrarily sized chunks.
///
/// All of the state needed to resume framing between calls lives in the framer. Pushed bytes are
/// copied, so the caller's buffers need not outlive the call.
pub struct PushFramer {
    buf: Vec<u8>,
    read_pos: usize,
    assembler: PacketAssembler,
    /// Synchronization was lost and the framer is searching for a page with a valid CRC.
    resync: bool,
    /// No page has been read yet.
    first_page: bool,
    verify_crc: bool,
}

impl PushFramer {
    pub fn new(verify_crc: bool) -> Self {
        PushFramer {
            buf: Vec::new(),
            read_pos: 0,
            assembler: PacketAssembler::new(),
            resync: false,
            first_page: true,
            verify_crc,
        }
    }

    /// Appends bytes to the framer.
    pub fn push(&mut self, data: &[u8]) {
        // Compact the buffer before growing it.
        if self.read_pos > 0 {
            self.buf.drain(..self.read_pos);
            self.read_pos = 0;
        }

        self.buf.extend_from_slice(data);
    }

    /// Discards all buffered bytes and packets, and searches for a valid page in the bytes pushed
    /// next. Use this after a discontinuity in the input, such as after the caller seeks.
    pub fn flush(&mut self) {
        self.buf.clear();
        self.read_pos = 0;
        self.enter_resync();
    }

    /// Drops queued packets and searches the buffered bytes for the next valid page.
    pub fn enter_resync(&mut self) {
        self.assembler.reset();
        self.resync = true;
    }

    /// Gets the next packet.
    ///
    /// Returns `Ok(None)` if more data must be pushed before a packet is complete. A framing error
    /// is returned once, after which the framer searches for the next valid page.
    pub fn next_packet(&mut self) -> Result<Option<OggPacket>> {
        loop {
            if let Some(packet) = self.assembler.next_packet() {
                return Ok(Some(packet));
            }

            let progressed = if self.resync { self.resync_page() } else { self.read_page()? };

            if !progressed {
                return Ok(None);
            }
        }
    }

    /// Consumes one page. Returns `false` if the page is not yet complete.
    fn read_page(&mut self) -> Result<bool> {
        let avail = &self.buf[self.read_pos..];

        if avail.is_empty() {
            return Ok(false);
        }

        let (header, page_len) = match probe_page(avail) {
            Ok(PageProbe::Complete(header, page_len)) => (header, page_len),
            Ok(PageProbe::Incomplete) => return Ok(false),
            Err(Error::DecodeError(desc)) if self.first_page => return setup_error(desc),
            Err(Error::DecodeError(desc)) => {
                warn!("ogg: lost synchronization: {}", desc);
                self.read_pos += 1;
                self.enter_resync();
                return Err(Error::DecodeError(desc));
            }
            Err(err) => return Err(err),
        };

        let page = &avail[..page_len];

        if self.verify_crc && page_crc(page) != header.crc {
            warn!("ogg: crc mismatch on page {}", header.sequence);

            if self.first_page {
                return setup_error("ogg: crc mismatch on first page");
            }

            self.read_pos += 1;
            self.enter_resync();
            return decode_error("ogg: crc mismatch");
        }

        if self.first_page {
            if !header.is_first_page() || header.is_continuation() {
                return setup_error("ogg: invalid first page");
            }
            self.first_page = false;
        }

        let (segments, body) = split_page(page, &header);

        self.assembler.push_page(&header, segments, body);
        self.read_pos += page_len;

        Ok(true)
    }

    /// Searches for a page with a valid CRC and consumes it without emitting its packets. Returns
    /// `false` if more data is required.
    fn resync_page(&mut self) -> bool {
        loop {
            let avail = &self.buf[self.read_pos..];

            let start = match avail.windows(4).position(|win| win == OGG_PAGE_MARKER) {
                Some(start) => start,
                None => {
                    // Keep a tail that may hold the start of a capture pattern.
                    let keep = avail.len().min(OGG_PAGE_MARKER.len() - 1);
                    self.read_pos += avail.len() - keep;
                    return false;
                }
            };

            self.read_pos += start;

            let candidate = &self.buf[self.read_pos..];

            match probe_page(candidate) {
                Ok(PageProbe::Complete(header, page_len)) => {
                    if page_crc(&candidate[..page_len]) == header.crc {
                        debug!("ogg: regained synchronization on page {}", header.sequence);

                        self.read_pos += page_len;
                        self.resync = false;

                        self.assembler.reset();
                        self.assembler
                            .mark_discontinuity(Discontinuity::Resynced { granule: header.granule() });

                        return true;
                    }
                }
                Ok(PageProbe::Incomplete) => return false,
                Err(_) => (),
            }

            // A false capture pattern.
            self.read_pos += 1;
        }
    }
}
