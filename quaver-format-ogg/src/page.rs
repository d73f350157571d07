// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use quaver_core::checksum::Crc32;
use quaver_core::errors::{decode_error, Result};
use quaver_core::io::{PacketReader, ReadBytes};

use bitflags::bitflags;

pub const OGG_PAGE_MARKER: [u8; 4] = *b"OggS";
pub const OGG_PAGE_HEADER_SIZE: usize = 27;

pub const OGG_PAGE_MAX_SIZE: usize = OGG_PAGE_HEADER_SIZE + 255 + 255 * 255;

/// Byte offset of the CRC field within the page header.
const OGG_PAGE_CRC_OFFSET: usize = 22;

bitflags! {
    /// Page header type flags.
    #[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
    pub struct PageFlags: u8 {
        /// The first packet on the page continues a packet started on an earlier page.
        const CONTINUED  = 0x01;
        /// The first page of a logical stream.
        const FIRST_PAGE = 0x02;
        /// The last page of a logical stream.
        const LAST_PAGE  = 0x04;
    }
}

#[derive(Copy, Clone, Debug, Default)]
pub struct PageHeader {
    pub flags: PageFlags,
    /// The raw absolute granule position. All ones means no packet is completed on this page.
    pub absgp: u64,
    pub serial: u32,
    pub sequence: u32,
    pub crc: u32,
    pub n_segments: u8,
}

impl PageHeader {
    pub fn is_continuation(&self) -> bool {
        self.flags.contains(PageFlags::CONTINUED)
    }

    pub fn is_first_page(&self) -> bool {
        self.flags.contains(PageFlags::FIRST_PAGE)
    }

    pub fn is_last_page(&self) -> bool {
        self.flags.contains(PageFlags::LAST_PAGE)
    }

    /// Gets the granule position, if one is set.
    pub fn granule(&self) -> Option<u64> {
        if self.absgp == u64::MAX {
            None
        }
        else {
            Some(self.absgp)
        }
    }
}

/// Parses a `PageHeader` from a buffer containing the complete fixed-size header.
pub fn read_page_header(buf: &[u8]) -> Result<PageHeader> {
    let mut reader = PacketReader::new(buf);

    // The OggS marker should be present.
    let marker: [u8; 4] = reader.read_array()?;

    if marker != OGG_PAGE_MARKER {
        return decode_error("ogg: missing capture pattern");
    }

    let version = reader.read_byte()?;

    // There is only one OGG version, and that is version 0.
    if version != 0 {
        return decode_error("ogg: invalid ogg version");
    }

    // Only the first 3 least-significant bits are used for flags.
    let flags = match PageFlags::from_bits(reader.read_byte()?) {
        Some(flags) => flags,
        None => return decode_error("ogg: invalid flag bits set"),
    };

    let absgp = reader.read_u64()?;
    let serial = reader.read_u32()?;
    let sequence = reader.read_u32()?;
    let crc = reader.read_u32()?;
    let n_segments = reader.read_byte()?;

    Ok(PageHeader { flags, absgp, serial, sequence, crc, n_segments })
}

/// Instantiates a `Crc32` that has processed the fixed-size page header with the CRC field zeroed.
fn header_crc(header_buf: &[u8]) -> Crc32 {
    let mut crc32 = Crc32::new(0);

    crc32.process_buf_bytes(&header_buf[..OGG_PAGE_CRC_OFFSET]);
    crc32.process_buf_bytes(&[0; 4]);
    crc32.process_buf_bytes(&header_buf[OGG_PAGE_CRC_OFFSET + 4..OGG_PAGE_HEADER_SIZE]);

    crc32
}

/// An OGG page that was read from a stream.
#[derive(Default)]
pub struct Page {
    /// The page header.
    pub header: PageHeader,
    /// The segment table.
    pub segments: Vec<u8>,
    /// The page body.
    pub body: Vec<u8>,
    /// The CRC calculated over the page as it was read.
    pub calculated_crc: u32,
}

impl Page {
    /// Returns `true` if the CRC in the page header matches the calculated CRC.
    pub fn is_crc_valid(&self) -> bool {
        self.header.crc == self.calculated_crc
    }

    /// Gets the total length of the page in bytes.
    pub fn len(&self) -> usize {
        OGG_PAGE_HEADER_SIZE + self.segments.len() + self.body.len()
    }
}

/// Reads a page from the provided reader. The reader must be positioned at the capture pattern.
///
/// The CRC is always calculated, but is not verified. On error, the contents of `page` are
/// unspecified.
pub fn read_page<B: ReadBytes>(reader: &mut B, page: &mut Page) -> Result<()> {
    let mut header_buf = [0u8; OGG_PAGE_HEADER_SIZE];

    reader.read_buf_exact(&mut header_buf)?;

    let header = read_page_header(&header_buf)?;

    page.segments.resize(usize::from(header.n_segments), 0);
    reader.read_buf_exact(&mut page.segments)?;

    let body_len = page.segments.iter().map(|&seg| usize::from(seg)).sum();

    page.body.resize(body_len, 0);
    reader.read_buf_exact(&mut page.body)?;

    let mut crc32 = header_crc(&header_buf);
    crc32.process_buf_bytes(&page.segments);
    crc32.process_buf_bytes(&page.body);

    page.calculated_crc = crc32.crc();
    page.header = header;

    Ok(())
}

/// Synchronizes the provided reader to the next OGG page capture pattern, but does not perform
/// any further verification. Returns the position of the capture pattern.
pub fn sync_page<B: ReadBytes>(reader: &mut B) -> Result<u64> {
    let mut marker = u32::from_be_bytes(reader.read_array()?);

    while marker.to_be_bytes() != OGG_PAGE_MARKER {
        marker <<= 8;
        marker |= u32::from(reader.read_byte()?);
    }

    Ok(reader.pos() - 4)
}

/// The result of examining a byte buffer for a complete page.
#[derive(Copy, Clone, Debug)]
pub enum PageProbe {
    /// More bytes are required to determine the length of the page, or to hold all of it.
    Incomplete,
    /// The buffer starts with a complete page of the given length.
    Complete(PageHeader, usize),
}

/// Examines the start of `buf` for a page. Returns an error if the bytes cannot start a page.
pub fn probe_page(buf: &[u8]) -> Result<PageProbe> {
    // Reject a bad capture pattern as early as possible, even before the header is complete.
    let marker_len = buf.len().min(OGG_PAGE_MARKER.len());

    if buf[..marker_len] != OGG_PAGE_MARKER[..marker_len] {
        return decode_error("ogg: missing capture pattern");
    }

    if buf.len() < OGG_PAGE_HEADER_SIZE {
        return Ok(PageProbe::Incomplete);
    }

    let header = read_page_header(&buf[..OGG_PAGE_HEADER_SIZE])?;

    let segments_end = OGG_PAGE_HEADER_SIZE + usize::from(header.n_segments);

    if buf.len() < segments_end {
        return Ok(PageProbe::Incomplete);
    }

    let body_len: usize =
        buf[OGG_PAGE_HEADER_SIZE..segments_end].iter().map(|&seg| usize::from(seg)).sum();

    let page_len = segments_end + body_len;

    if buf.len() < page_len {
        return Ok(PageProbe::Incomplete);
    }

    Ok(PageProbe::Complete(header, page_len))
}

/// Splits a complete page buffer into its segment table and body.
pub fn split_page<'a>(page: &'a [u8], header: &PageHeader) -> (&'a [u8], &'a [u8]) {
    page[OGG_PAGE_HEADER_SIZE..].split_at(usize::from(header.n_segments))
}

/// Calculates the CRC of a complete page buffer.
pub fn page_crc(page: &[u8]) -> u32 {
    let mut crc32 = header_crc(&page[..OGG_PAGE_HEADER_SIZE]);
    crc32.process_buf_bytes(&page[OGG_PAGE_HEADER_SIZE..]);
    crc32.crc()
}

#[cfg(test)]
mod tests {
    use quaver_core::io::PacketReader;

    use super::*;
    use crate::test_util::PageBuilder;

    #[test]
    fn verify_read_page() {
        let buf = PageBuilder::new()
            .flags(PageFlags::FIRST_PAGE)
            .granule(1234)
            .sequence(7)
            .packet(&[1; 300])
            .packet(&[2; 10])
            .build();

        let mut page = Page::default();
        read_page(&mut PacketReader::new(&buf), &mut page).unwrap();

        assert!(page.is_crc_valid());
        assert!(page.header.is_first_page());
        assert!(!page.header.is_continuation());
        assert_eq!(page.header.granule(), Some(1234));
        assert_eq!(page.header.sequence, 7);
        assert_eq!(page.segments, vec![255, 45, 10]);
        assert_eq!(page.body.len(), 310);
        assert_eq!(page.len(), buf.len());
    }

    #[test]
    fn verify_crc_mismatch_detected() {
        let mut buf = PageBuilder::new().packet(b"vorbis").build();

        // Corrupt a body byte.
        let last = buf.len() - 1;
        buf[last] ^= 0x40;

        let mut page = Page::default();
        read_page(&mut PacketReader::new(&buf), &mut page).unwrap();
        assert!(!page.is_crc_valid());
        assert_ne!(page_crc(&buf), page.header.crc);
    }

    #[test]
    fn verify_invalid_headers() {
        let good = PageBuilder::new().packet(&[0; 4]).build();

        let mut bad_marker = good.clone();
        bad_marker[1] = b'x';
        assert!(read_page_header(&bad_marker).is_err());
        assert!(probe_page(&bad_marker[..2]).is_err());

        let mut bad_version = good.clone();
        bad_version[4] = 1;
        assert!(read_page_header(&bad_version).is_err());

        let mut bad_flags = good.clone();
        bad_flags[5] = 0x08;
        assert!(read_page_header(&bad_flags).is_err());
    }

    #[test]
    fn verify_unknown_granule() {
        let buf = PageBuilder::new().granule(u64::MAX).packet(&[0; 4]).build();
        let header = read_page_header(&buf).unwrap();
        assert_eq!(header.granule(), None);
    }

    #[test]
    fn verify_probe_page() {
        let buf = PageBuilder::new().packet(&[9; 600]).build();

        for len in [0, 3, 26, 27, 29, 30, buf.len() - 1] {
            assert!(matches!(probe_page(&buf[..len]).unwrap(), PageProbe::Incomplete));
        }

        match probe_page(&buf).unwrap() {
            PageProbe::Complete(header, len) => {
                assert_eq!(len, buf.len());
                let (segments, body) = split_page(&buf, &header);
                assert_eq!(segments, &[255, 255, 90]);
                assert_eq!(body.len(), 600);
                assert_eq!(page_crc(&buf), header.crc);
            }
            _ => panic!("expected a complete page"),
        }
    }

    #[test]
    fn verify_sync_page() {
        let page = PageBuilder::new().packet(&[0; 4]).build();

        let mut buf = b"garbageOgg".to_vec();
        buf.extend_from_slice(&page);

        let mut reader = PacketReader::new(&buf);
        assert_eq!(sync_page(&mut reader).unwrap(), 10);

        assert!(sync_page(&mut PacketReader::new(b"no capture here")).is_err());
    }
}
