// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/// Describes a break in the packet sequence immediately before a packet.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Discontinuity {
    /// The packet directly follows the previous packet.
    #[default]
    None,
    /// A partial packet was dropped because the continuation flags of two pages did not agree.
    DroppedFragment,
    /// The framer lost synchronization and regained it on a page with the given granule position.
    /// That page was consumed without emitting its packets.
    Resynced { granule: Option<u64> },
}

/// OGG packet.
#[derive(Clone, Debug)]
pub struct OggPacket {
    /// The packet data.
    pub data: Box<[u8]>,
    /// The granule position of the page, if this is the last packet completed on that page.
    pub granule: Option<u64>,
    /// The packet was completed on a page with the end-of-stream flag set.
    pub is_last_page: bool,
    /// Any break in the packet sequence preceding this packet.
    pub discontinuity: Discontinuity,
}
