// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io::{self, Seek, SeekFrom};

use quaver_core::errors::{decode_error, seek_error, setup_error, Error, Result, SeekErrorKind};
use quaver_core::io::{MediaSource, ReadBytes, SourceStream};

use log::{debug, warn};

use super::common::{Discontinuity, OggPacket};
use super::logical::PacketAssembler;
use super::page::{read_page, sync_page, Page};

/// The tunable constants of the page-level seek search.
///
/// Changing these affects only how many pages are probed during a search, never the position the
/// search arrives at.
#[derive(Copy, Clone, Debug)]
pub struct SeekPolicy {
    /// A byte range at most this long is scanned page by page instead of being bisected.
    pub linear_scan_len: u64,
    /// The minimum correction, in bytes, applied by the second (bounding) probe.
    pub min_probe_correction: f64,
    /// Binary search probes start this many bytes before the midpoint of the range.
    pub bisect_backoff: u64,
    /// The number of bytes at the end of the stream that are scanned for the last page.
    pub tail_scan_len: u64,
}

impl Default for SeekPolicy {
    fn default() -> Self {
        SeekPolicy {
            linear_scan_len: 64 * 1024,
            min_probe_correction: 8000.0,
            bisect_backoff: 32 * 1024,
            tail_scan_len: 64 * 1024,
        }
    }
}

/// The byte range and granule position of a page found while searching the stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProbedPage {
    /// Position of the capture pattern.
    pub page_start: u64,
    /// Position immediately after the page.
    pub page_end: u64,
    /// The granule position of the page, if any packet ends on it.
    pub granule: Option<u64>,
    /// The page has the end-of-stream flag set.
    pub is_last: bool,
}

/// Where a coarse seek left the stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SeekedTo {
    /// The stream was rewound to the first audio page.
    Start,
    /// The next packet is the last packet completed on a page with a known granule position.
    KnownGranule(u64),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ReadState {
    /// Pages are read one after another.
    Reading,
    /// Synchronization was lost. The next valid page is searched for and skipped.
    Resync,
    /// No more pages will be read.
    Eof,
}

/// `PhysicalStream` reads the packets of a single logical Ogg stream from a seekable source.
pub struct PhysicalStream {
    reader: SourceStream,
    assembler: PacketAssembler,
    page: Page,
    state: ReadState,
    verify_crc: bool,
    policy: SeekPolicy,
    /// Start position of the most recently read page.
    page_start: u64,
    /// Position of the first page containing audio packets.
    first_audio_pos: u64,
    /// The first page at or after `first_audio_pos` with a granule position.
    first_page: Option<ProbedPage>,
    /// The last page of the stream, if its granule position is known.
    last_page: Option<ProbedPage>,
    /// The cached stream length. The inner `None` means the length could not be determined.
    total_samples: Option<Option<u64>>,
}

impl PhysicalStream {
    /// Instantiates a `PhysicalStream` and reads the first page. The first page must be a
    /// beginning-of-stream page.
    pub fn try_new(source: Box<dyn MediaSource>, verify_crc: bool) -> Result<Self> {
        let mut stream = PhysicalStream {
            reader: SourceStream::new(source),
            assembler: PacketAssembler::new(),
            page: Page::default(),
            state: ReadState::Reading,
            verify_crc,
            policy: Default::default(),
            page_start: 0,
            first_audio_pos: 0,
            first_page: None,
            last_page: None,
            total_samples: None,
        };

        match read_page(&mut stream.reader, &mut stream.page) {
            Ok(_) => (),
            Err(Error::DecodeError(_)) => return setup_error("ogg: invalid first page"),
            Err(err) => return Err(err),
        }

        let header = stream.page.header;

        if !header.is_first_page() || header.is_continuation() {
            return setup_error("ogg: invalid first page");
        }

        if verify_crc && !stream.page.is_crc_valid() {
            return setup_error("ogg: crc mismatch on first page");
        }

        stream.assembler.push_page(&header, &stream.page.segments, &stream.page.body);

        Ok(stream)
    }

    /// Replaces the seek search policy.
    pub fn set_seek_policy(&mut self, policy: SeekPolicy) {
        self.policy = policy;
    }

    /// Records the current position as the start of the audio packets. This should be called
    /// once all header packets have been read.
    pub fn mark_audio_start(&mut self) {
        self.first_audio_pos = if self.assembler.is_empty() {
            self.reader.pos()
        }
        else {
            // Audio packets share a page with the headers. Restarting on that page will return
            // the trailing header packets again.
            warn!("ogg: first audio packet does not start a page");
            self.page_start
        };

        debug!("ogg: first audio page at byte {}", self.first_audio_pos);
    }

    /// Gets the next packet, or `None` at the end of the stream.
    ///
    /// A framing error is returned once. Reading then resumes after the next valid page.
    pub fn next_packet(&mut self) -> Result<Option<OggPacket>> {
        if self.fill()? {
            Ok(self.assembler.next_packet())
        }
        else {
            Ok(None)
        }
    }

    /// Gets the next packet without consuming it.
    pub fn peek_packet(&mut self) -> Result<Option<&OggPacket>> {
        if self.fill()? {
            Ok(self.assembler.peek_packet())
        }
        else {
            Ok(None)
        }
    }

    /// Reads pages until a packet is available. Returns `false` at the end of the stream.
    fn fill(&mut self) -> Result<bool> {
        while self.assembler.peek_packet().is_none() {
            match self.state {
                ReadState::Eof => return Ok(false),
                ReadState::Reading => self.read_next_page()?,
                ReadState::Resync => self.resync()?,
            }
        }
        Ok(true)
    }

    fn read_next_page(&mut self) -> Result<()> {
        let page_start = self.reader.pos();

        // A clean end-of-stream is only possible on a page boundary.
        if let Err(err) = self.reader.read_byte() {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                debug!("ogg: end of stream without end-of-stream page");
                self.state = ReadState::Eof;
                return Ok(());
            }
            return Err(err.into());
        }

        self.reader.seek(SeekFrom::Start(page_start))?;

        match read_page(&mut self.reader, &mut self.page) {
            Ok(_) => (),
            Err(Error::IoError(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                warn!("ogg: stream ends within a page");
                self.state = ReadState::Eof;
                return Err(Error::IoError(err));
            }
            Err(Error::DecodeError(desc)) => {
                warn!("ogg: lost synchronization at byte {}: {}", page_start, desc);
                self.reader.seek(SeekFrom::Start(page_start + 1))?;
                self.state = ReadState::Resync;
                return Err(Error::DecodeError(desc));
            }
            Err(err) => return Err(err),
        }

        if self.verify_crc && !self.page.is_crc_valid() {
            warn!(
                "ogg: crc mismatch: expected {:#x}, got {:#x}",
                self.page.header.crc, self.page.calculated_crc
            );
            self.reader.seek(SeekFrom::Start(page_start + 1))?;
            self.state = ReadState::Resync;
            return decode_error("ogg: crc mismatch");
        }

        self.page_start = page_start;

        let header = self.page.header;

        self.assembler.push_page(&header, &self.page.segments, &self.page.body);

        if header.is_last_page() {
            self.state = ReadState::Eof;
        }

        Ok(())
    }

    fn resync(&mut self) -> Result<()> {
        match self.find_page()? {
            Some(found) => {
                debug!("ogg: regained synchronization at byte {}", found.page_start);

                // The page that was found is consumed without emitting its packets.
                self.reader.seek(SeekFrom::Start(found.page_end))?;
                self.assembler.reset();
                self.assembler.mark_discontinuity(Discontinuity::Resynced { granule: found.granule });

                self.state = if found.is_last { ReadState::Eof } else { ReadState::Reading };
            }
            None => self.state = ReadState::Eof,
        }
        Ok(())
    }

    /// Scans forward from the current position for a page with a valid CRC. On success the reader
    /// is positioned at the start of the found page.
    fn find_page(&mut self) -> Result<Option<ProbedPage>> {
        loop {
            let page_start = match sync_page(&mut self.reader) {
                Ok(pos) => pos,
                Err(Error::IoError(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
                    return Ok(None)
                }
                Err(err) => return Err(err),
            };

            self.reader.seek(SeekFrom::Start(page_start))?;

            match read_page(&mut self.reader, &mut self.page) {
                Ok(_) if self.page.is_crc_valid() => {
                    let header = self.page.header;

                    let found = ProbedPage {
                        page_start,
                        page_end: self.reader.pos(),
                        granule: header.granule(),
                        is_last: header.is_last_page(),
                    };

                    self.reader.seek(SeekFrom::Start(page_start))?;

                    return Ok(Some(found));
                }
                Ok(_) | Err(Error::DecodeError(_)) => (),
                Err(Error::IoError(err)) if err.kind() == io::ErrorKind::UnexpectedEof => (),
                Err(err) => return Err(err),
            }

            // Not a page. Resume the scan immediately after the false capture pattern.
            self.reader.seek(SeekFrom::Start(page_start + 1))?;
        }
    }

    /// Rewinds to the first audio page. The next packet is the first audio packet.
    pub fn rewind(&mut self) -> Result<()> {
        self.reader.seek(SeekFrom::Start(self.first_audio_pos))?;
        self.assembler.reset();
        self.state = ReadState::Reading;
        Ok(())
    }

    fn stream_byte_len(&mut self) -> Result<u64> {
        match self.reader.byte_len() {
            Some(len) => Ok(len),
            None => Ok(self.reader.seek(SeekFrom::End(0))?),
        }
    }

    /// Gets the granule position of the last page of the stream, or `None` if it could not be
    /// determined. The result is cached, and the read position is preserved.
    pub fn total_samples(&mut self) -> Result<Option<u64>> {
        if let Some(total) = self.total_samples {
            return Ok(total);
        }

        let restore_pos = self.reader.pos();

        let total = self.find_last_page();

        self.reader.seek(SeekFrom::Start(restore_pos))?;

        let total = total?;

        self.total_samples = Some(total);

        Ok(total)
    }

    fn find_last_page(&mut self) -> Result<Option<u64>> {
        let byte_len = self.stream_byte_len()?;

        // The last page must start within the final scan window, unless the audio data is shorter
        // than the window.
        let scan_start = match byte_len.checked_sub(self.policy.tail_scan_len) {
            Some(pos) if pos >= self.first_audio_pos => pos,
            _ => self.first_audio_pos,
        };

        self.reader.seek(SeekFrom::Start(scan_start))?;

        let mut last = match self.find_page()? {
            Some(page) => page,
            None => {
                warn!("ogg: could not find the last page");
                return Ok(None);
            }
        };

        // Stop at the end-of-stream flag rather than the end of the source.
        while !last.is_last {
            self.reader.seek(SeekFrom::Start(last.page_end))?;

            match self.find_page()? {
                Some(page) => last = page,
                None => break,
            }
        }

        match last.granule {
            Some(granule) => {
                debug!("ogg: last page at byte {} with granule {}", last.page_start, granule);
                self.last_page = Some(last);
                Ok(Some(granule))
            }
            None => {
                warn!("ogg: last page has no granule position");
                Ok(None)
            }
        }
    }

    /// Finds the first page with a granule position at or after the first audio page.
    fn first_probed_page(&mut self) -> Result<ProbedPage> {
        if let Some(page) = self.first_page {
            return Ok(page);
        }

        self.reader.seek(SeekFrom::Start(self.first_audio_pos))?;

        let page = self.next_page_with_granule()?;

        self.first_page = Some(page);

        Ok(page)
    }

    /// Scans forward from the current position for a page with a granule position.
    fn next_page_with_granule(&mut self) -> Result<ProbedPage> {
        loop {
            match self.find_page()? {
                Some(page) if page.granule.is_some() => return Ok(page),
                // No packet ends on this page.
                Some(page) => self.reader.seek(SeekFrom::Start(page.page_end))?,
                None => return seek_error(SeekErrorKind::Failed),
            };
        }
    }

    /// Coarsely seeks to the page bracketing `limit`.
    ///
    /// On success the stream is positioned so that the next packet returned is either the first
    /// audio packet, or the last packet completed on the latest page whose granule position is
    /// at most `limit`. The stream length must already be known.
    ///
    /// If the search fails the stream is rewound to the first audio page.
    pub fn seek_to_granule(&mut self, limit: u64) -> Result<SeekedTo> {
        match self.coarse_seek(limit) {
            Ok(seeked_to) => Ok(seeked_to),
            Err(err) => {
                warn!("ogg: seek search failed: {}", err);
                self.rewind()?;
                seek_error(SeekErrorKind::Failed)
            }
        }
    }

    fn coarse_seek(&mut self, limit: u64) -> Result<SeekedTo> {
        let mut right = match self.last_page {
            Some(page) => page,
            None => return seek_error(SeekErrorKind::UnknownLength),
        };

        let mut left = self.first_probed_page()?;

        let granule_of = |page: &ProbedPage| page.granule.unwrap_or(0);

        // Starting from the start is handled differently.
        if limit <= granule_of(&left) {
            self.rewind()?;
            return Ok(SeekedTo::Start);
        }

        let policy = self.policy;

        let mut probe = 0;
        let mut offset = 0.0;
        let mut bytes_per_sample = 0.0;
        let mut mid_granule = 0;

        while left.page_end != right.page_start {
            if left.page_end > right.page_start {
                return seek_error(SeekErrorKind::Failed);
            }

            // The search range in bytes.
            let delta = right.page_start - left.page_end;

            if delta <= policy.linear_scan_len {
                // Small enough to handle linearly.
                self.reader.seek(SeekFrom::Start(left.page_end))?;
            }
            else {
                let pos = if probe < 2 {
                    if probe == 0 {
                        // First probe, interpolate.
                        let data_bytes = (right.page_end - left.page_start) as f64;
                        bytes_per_sample = data_bytes / granule_of(&right).max(1) as f64;
                        offset = left.page_start as f64
                            + bytes_per_sample * (limit - granule_of(&left)) as f64;
                    }
                    else {
                        // Second probe, try to bound the other side.
                        let mut error = (limit as f64 - mid_granule as f64) * bytes_per_sample;
                        if error >= 0.0 && error < policy.min_probe_correction {
                            error = policy.min_probe_correction;
                        }
                        if error < 0.0 && error > -policy.min_probe_correction {
                            error = -policy.min_probe_correction;
                        }
                        offset += error * 2.0;
                    }

                    offset = offset.max(left.page_end as f64);
                    offset = offset.min((right.page_start - policy.linear_scan_len) as f64);

                    offset as u64
                }
                else {
                    // Binary search, offset backwards to avoid landing on the right page.
                    (left.page_end + delta / 2).saturating_sub(policy.bisect_backoff)
                };

                self.reader.seek(SeekFrom::Start(pos.max(left.page_end)))?;
            }

            let mid = self.next_page_with_granule()?;

            if mid.page_start > right.page_start {
                return seek_error(SeekErrorKind::Failed);
            }

            mid_granule = granule_of(&mid);

            if mid.page_start == right.page_start {
                // The last page was found again. Close enough, unless this was an interpolation
                // probe into a large range.
                if probe >= 2 || delta <= policy.linear_scan_len {
                    break;
                }
            }
            else if limit < mid_granule {
                right = mid;
            }
            else {
                left = mid;
            }

            probe += 1;
        }

        debug!(
            "ogg: seek bracketed by pages at bytes {} and {} after {} probes",
            left.page_start, right.page_start, probe
        );

        self.restart_at_known_granule(left)?;

        Ok(SeekedTo::KnownGranule(granule_of(&left)))
    }

    /// Positions the stream at the start of the last packet completed on `page`.
    fn restart_at_known_granule(&mut self, page: ProbedPage) -> Result<()> {
        let mut page_start = page.page_start;

        self.reader.seek(SeekFrom::Start(page_start))?;
        read_page(&mut self.reader, &mut self.page)?;

        let mut end_seg = match self.page.segments.iter().rposition(|&seg| seg < 255) {
            Some(seg) => seg,
            None => return seek_error(SeekErrorKind::Failed),
        };

        let start_seg = loop {
            // Walk back to the first segment of the packet.
            let mut seg = end_seg;
            while seg > 0 && self.page.segments[seg - 1] == 255 {
                seg -= 1;
            }

            if seg > 0 || !self.page.header.is_continuation() {
                break seg;
            }

            // The packet begins on an earlier page.
            page_start = self.page_before(page_start)?;

            self.reader.seek(SeekFrom::Start(page_start))?;
            read_page(&mut self.reader, &mut self.page)?;

            end_seg = match self.page.segments.len().checked_sub(1) {
                Some(seg) => seg,
                None => return seek_error(SeekErrorKind::Failed),
            };
        };

        let header = self.page.header;

        self.page_start = page_start;
        self.assembler.push_page_from(&header, &self.page.segments, &self.page.body, start_seg);
        self.state = if header.is_last_page() { ReadState::Eof } else { ReadState::Reading };

        Ok(())
    }

    /// Finds the start of the page that ends at `limit`.
    fn page_before(&mut self, limit: u64) -> Result<u64> {
        let scan_start = match limit.checked_sub(self.policy.linear_scan_len) {
            Some(pos) if pos >= self.first_audio_pos => pos,
            _ => self.first_audio_pos,
        };

        self.reader.seek(SeekFrom::Start(scan_start))?;

        while let Some(page) = self.find_page()? {
            if page.page_end >= limit && page.page_start < limit {
                return Ok(page.page_start);
            }
            self.reader.seek(SeekFrom::Start(page.page_end))?;
        }

        seek_error(SeekErrorKind::Failed)
    }
}
