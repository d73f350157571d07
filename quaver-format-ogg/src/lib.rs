// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! Ogg framing for Quaver.
//!
//! Two readers share one packet assembler:
//!
//!  * [`PhysicalStream`] pulls pages from a seekable [`quaver_core::io::SourceStream`], and
//!    provides the page-level primitives used for seeking and for measuring the stream length.
//!  * [`PushFramer`] accepts bytes in arbitrarily sized chunks and yields packets as soon as they
//!    are complete.
//!
//! Only a single logical bitstream is supported. Page serial numbers are ignored.

mod common;
mod logical;
mod page;
mod physical;
mod push;

pub use common::{Discontinuity, OggPacket};
pub use logical::PacketAssembler;
pub use page::{PageFlags, PageHeader, OGG_PAGE_HEADER_SIZE, OGG_PAGE_MAX_SIZE};
pub use physical::{PhysicalStream, ProbedPage, SeekPolicy, SeekedTo};
pub use push::PushFramer;

#[cfg(test)]
mod test_util;
