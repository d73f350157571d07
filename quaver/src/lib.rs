// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

//! # Project Quaver
//!
//! Quaver is a 100% pure Rust streaming Ogg Vorbis decoder.
//!
//! # Usage
//!
//! A [`Decoder`] operates in one of two modes:
//!
//! * **Pull mode.** Open a stream with [`Decoder::open`], [`Decoder::open_memory`], or
//!   [`Decoder::open_file`]. The decoder reads the source as required, and can measure the length
//!   of the stream and seek.
//! * **Push mode.** Create a decoder with [`Decoder::new_push`] and supply bytes, in chunks of any
//!   size, with [`Decoder::push`]. The decoder never blocks. When all pushed data has been
//!   consumed, [`Error::NeedMoreData`][core::errors::Error::NeedMoreData] is returned.
//!
//! In both modes, call [`Decoder::next_frame`] repeatedly. Each [`Frame`] holds the samples
//! decoded from one packet as planar `f32` audio, and can be converted to 16-bit PCM with any
//! number of channels.
//!
//! Errors are returned as they occur. The code of the most recent error is also kept until it is
//! retrieved with [`Decoder::take_error`]. Corruption within the stream is recoverable, decoding
//! continues with the next good packet. Setup errors, and mixing the operations of the two modes,
//! are fatal.

mod decoder;
mod frame;

pub use decoder::{Decoder, DecoderOptions, Info};
pub use frame::Frame;

pub use quaver_codec_vorbis::Comments;
pub use quaver_core as core;
pub use quaver_core::errors::{Error, ErrorCode, Result};
pub use quaver_format_ogg::SeekPolicy;
