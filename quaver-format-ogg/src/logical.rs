// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::VecDeque;

use log::{debug, warn};

use super::common::{Discontinuity, OggPacket};
use super::page::PageHeader;

/// The state of the packet being assembled across pages.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Partial {
    /// There is no packet in progress.
    None,
    /// A packet is in progress and continues on the next page.
    Pending,
    /// The tail of a packet whose start was lost is being skipped.
    Skipping,
}

/// `PacketAssembler` reconstructs packets from the segments of consecutive pages.
pub struct PacketAssembler {
    buf: Vec<u8>,
    partial: Partial,
    packets: VecDeque<OggPacket>,
    discontinuity: Discontinuity,
}

impl Default for PacketAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketAssembler {
    const MAX_PACKET_LEN: usize = 16 * 1024 * 1024;

    pub fn new() -> Self {
        PacketAssembler {
            buf: Default::default(),
            partial: Partial::None,
            packets: Default::default(),
            discontinuity: Discontinuity::None,
        }
    }

    /// Drops all queued packets, any packet in progress, and any pending discontinuity.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.partial = Partial::None;
        self.packets.clear();
        self.discontinuity = Discontinuity::None;
    }

    /// Marks the next emitted packet with a discontinuity. A pending resynchronization is never
    /// downgraded to a dropped fragment.
    pub fn mark_discontinuity(&mut self, discontinuity: Discontinuity) {
        match (self.discontinuity, discontinuity) {
            (Discontinuity::Resynced { .. }, Discontinuity::DroppedFragment) => (),
            _ => self.discontinuity = discontinuity,
        }
    }

    /// Returns `true` if no packets are queued and no packet is in progress.
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty() && self.partial == Partial::None
    }

    /// Gets the next complete packet without consuming it.
    pub fn peek_packet(&self) -> Option<&OggPacket> {
        self.packets.front()
    }

    /// Consumes the next complete packet.
    pub fn next_packet(&mut self) -> Option<OggPacket> {
        self.packets.pop_front()
    }

    /// Consumes the segments of a page, queueing all packets completed on the page.
    pub fn push_page(&mut self, header: &PageHeader, segments: &[u8], body: &[u8]) {
        if header.is_continuation() {
            if self.partial == Partial::None {
                // The start of the packet this page continues was never seen.
                warn!("ogg: continuation page without a packet in progress, dropping fragment");
                self.partial = Partial::Skipping;
                self.mark_discontinuity(Discontinuity::DroppedFragment);
            }
        }
        else if self.partial != Partial::None {
            if self.partial == Partial::Pending {
                warn!("ogg: expected continuation page, dropping partial packet");
                self.mark_discontinuity(Discontinuity::DroppedFragment);
            }
            self.buf.clear();
            self.partial = Partial::None;
        }

        self.push_segments(header, segments, body, 0);
    }

    /// Starts assembly at segment `first_seg` of a page, discarding everything queued or in
    /// progress. Used to restart reading at a packet boundary after a seek.
    pub fn push_page_from(
        &mut self,
        header: &PageHeader,
        segments: &[u8],
        body: &[u8],
        first_seg: usize,
    ) {
        self.reset();

        let skip_len: usize = segments[..first_seg].iter().map(|&seg| usize::from(seg)).sum();

        self.push_segments(header, &segments[first_seg..], &body[skip_len..], first_seg);
    }

    fn push_segments(&mut self, header: &PageHeader, segments: &[u8], body: &[u8], base: usize) {
        // The granule position of a page belongs to the last packet completed on that page.
        let known_loc_seg = segments.iter().rposition(|&seg| seg < 255);

        let mut body = body;

        for (i, &seg) in segments.iter().enumerate() {
            let (data, rem) = body.split_at(usize::from(seg));
            body = rem;

            if self.partial == Partial::Skipping {
                if seg < 255 {
                    self.partial = Partial::None;
                }
                continue;
            }

            if self.buf.len() + data.len() > Self::MAX_PACKET_LEN {
                warn!("ogg: packet exceeds maximum length, dropping");
                self.buf.clear();
                self.partial = Partial::Skipping;
                self.mark_discontinuity(Discontinuity::DroppedFragment);
                if seg < 255 {
                    self.partial = Partial::None;
                }
                continue;
            }

            self.buf.extend_from_slice(data);

            if seg < 255 {
                let granule = if Some(i) == known_loc_seg { header.granule() } else { None };

                self.packets.push_back(OggPacket {
                    data: Box::from(&self.buf[..]),
                    granule,
                    is_last_page: header.is_last_page(),
                    discontinuity: std::mem::take(&mut self.discontinuity),
                });

                self.buf.clear();
                self.partial = Partial::None;
            }
            else {
                self.partial = Partial::Pending;
            }
        }

        if self.partial == Partial::Pending {
            debug!(
                "ogg: packet continues past page {} (from segment {}), {} bytes so far",
                header.sequence,
                base,
                self.buf.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use quaver_core::io::PacketReader;

    use super::*;
    use crate::page::{read_page, Page, PageFlags};
    use crate::test_util::PageBuilder;

    fn push(assembler: &mut PacketAssembler, buf: &[u8]) {
        let mut page = Page::default();
        read_page(&mut PacketReader::new(buf), &mut page).unwrap();
        assembler.push_page(&page.header, &page.segments, &page.body);
    }

    #[test]
    fn verify_granule_attribution() {
        let mut assembler = PacketAssembler::new();

        push(
            &mut assembler,
            &PageBuilder::new().granule(4096).packet(&[1; 10]).packet(&[2; 20]).partial(&[3; 255]).build(),
        );

        let first = assembler.next_packet().unwrap();
        assert_eq!(&first.data[..], &[1; 10]);
        assert_eq!(first.granule, None);

        let second = assembler.next_packet().unwrap();
        assert_eq!(&second.data[..], &[2; 20]);
        assert_eq!(second.granule, Some(4096));
        assert_eq!(second.discontinuity, Discontinuity::None);

        assert!(assembler.next_packet().is_none());
        assert!(!assembler.is_empty());

        push(
            &mut assembler,
            &PageBuilder::new()
                .flags(PageFlags::CONTINUED | PageFlags::LAST_PAGE)
                .granule(5000)
                .packet(&[4; 5])
                .build(),
        );

        let third = assembler.next_packet().unwrap();
        assert_eq!(third.data.len(), 260);
        assert_eq!(&third.data[255..], &[4; 5]);
        assert_eq!(third.granule, Some(5000));
        assert!(third.is_last_page);
        assert!(assembler.is_empty());
    }

    #[test]
    fn verify_continuation_without_partial_is_dropped() {
        let mut assembler = PacketAssembler::new();

        push(
            &mut assembler,
            &PageBuilder::new().flags(PageFlags::CONTINUED).packet(&[7; 3]).packet(&[8; 4]).build(),
        );

        let packet = assembler.next_packet().unwrap();
        assert_eq!(&packet.data[..], &[8; 4]);
        assert_eq!(packet.discontinuity, Discontinuity::DroppedFragment);
        assert!(assembler.next_packet().is_none());
    }

    #[test]
    fn verify_fragment_spanning_pages_is_dropped() {
        let mut assembler = PacketAssembler::new();

        push(&mut assembler, &PageBuilder::new().flags(PageFlags::CONTINUED).partial(&[1; 510]).build());
        assert!(assembler.next_packet().is_none());

        push(
            &mut assembler,
            &PageBuilder::new().flags(PageFlags::CONTINUED).packet(&[2; 1]).packet(&[3; 2]).build(),
        );

        let packet = assembler.next_packet().unwrap();
        assert_eq!(&packet.data[..], &[3; 2]);
        assert_eq!(packet.discontinuity, Discontinuity::DroppedFragment);
    }

    #[test]
    fn verify_partial_without_continuation_is_dropped() {
        let mut assembler = PacketAssembler::new();

        push(&mut assembler, &PageBuilder::new().partial(&[1; 255]).build());
        push(&mut assembler, &PageBuilder::new().packet(&[2; 9]).build());

        let packet = assembler.next_packet().unwrap();
        assert_eq!(&packet.data[..], &[2; 9]);
        assert_eq!(packet.discontinuity, Discontinuity::DroppedFragment);
    }

    #[test]
    fn verify_resync_is_not_downgraded() {
        let mut assembler = PacketAssembler::new();

        assembler.mark_discontinuity(Discontinuity::Resynced { granule: Some(10) });

        push(&mut assembler, &PageBuilder::new().flags(PageFlags::CONTINUED).packet(&[1]).packet(&[2]).build());

        let packet = assembler.next_packet().unwrap();
        assert_eq!(packet.discontinuity, Discontinuity::Resynced { granule: Some(10) });
    }

    #[test]
    fn verify_push_page_from() {
        let buf = PageBuilder::new().granule(99).packet(&[1; 300]).packet(&[2; 2]).packet(&[3; 3]).build();

        let mut page = Page::default();
        read_page(&mut PacketReader::new(&buf), &mut page).unwrap();

        let mut assembler = PacketAssembler::new();
        assembler.push_page_from(&page.header, &page.segments, &page.body, 3);

        let packet = assembler.next_packet().unwrap();
        assert_eq!(&packet.data[..], &[3; 3]);
        assert_eq!(packet.granule, Some(99));
        assert!(assembler.next_packet().is_none());
    }

    #[test]
    fn verify_zero_length_packet() {
        let mut assembler = PacketAssembler::new();

        push(&mut assembler, &PageBuilder::new().packet(&[]).packet(&[5]).build());

        assert!(assembler.next_packet().unwrap().data.is_empty());
        assert_eq!(&assembler.next_packet().unwrap().data[..], &[5]);
    }
}
