// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use quaver_core::conv::{interleave_i16, planar_i16};

use smallvec::SmallVec;

/// The maximum number of plane slices that are kept on the stack.
const MAX_STACK_PLANE_SLICES: usize = 8;

/// A `Frame` is the audio decoded from one packet.
///
/// The samples of each channel are stored in their own plane, in Vorbis channel order. A frame
/// borrows the decoder, so it is only valid until the decoder is used again.
pub struct Frame<'a> {
    planes: SmallVec<[&'a [f32]; MAX_STACK_PLANE_SLICES]>,
    len: usize,
}

impl<'a> Frame<'a> {
    pub(crate) fn new(planes: SmallVec<[&'a [f32]; MAX_STACK_PLANE_SLICES]>) -> Self {
        let len = planes.first().map_or(0, |plane| plane.len());
        Frame { planes, len }
    }

    /// Gets the number of channels.
    pub fn channels(&self) -> usize {
        self.planes.len()
    }

    /// Gets the number of samples per channel.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the frame has no samples.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Gets the samples of channel `ch`.
    pub fn plane(&self, ch: usize) -> &'a [f32] {
        self.planes[ch]
    }

    /// Gets the samples of all channels.
    pub fn planes(&self) -> &[&'a [f32]] {
        &self.planes
    }

    /// Converts the frame into interleaved 16-bit PCM with `channels` channels per sample frame,
    /// mixing or dropping channels as required. Returns the number of sample frames written.
    pub fn copy_interleaved_i16(&self, channels: usize, out: &mut [i16]) -> usize {
        interleave_i16(&self.planes, channels, out)
    }

    /// Converts the frame into planar 16-bit PCM with one output plane per channel, mixing or
    /// dropping channels as required. Returns the number of samples written per plane.
    pub fn copy_planar_i16(&self, out: &mut [&mut [i16]]) -> usize {
        planar_i16(&self.planes, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_frame() {
        let left = [0.5f32, -0.5, 0.0];
        let right = [0.25f32, 0.25, 1.5];

        let frame = Frame::new([&left[..], &right[..]].into_iter().collect());

        assert_eq!(frame.channels(), 2);
        assert_eq!(frame.len(), 3);
        assert_eq!(frame.plane(1), &right);

        let mut out = [0i16; 6];
        assert_eq!(frame.copy_interleaved_i16(2, &mut out), 3);
        assert_eq!(out, [16384, 8192, -16384, 8192, 0, i16::MAX]);

        // Stereo to mono sums the left and right channels.
        let mut out = [0i16; 3];
        assert_eq!(frame.copy_interleaved_i16(1, &mut out), 3);
        assert_eq!(out, [24576, -8192, i16::MAX]);

        let mut left_out = [0i16; 2];
        let mut right_out = [0i16; 2];
        assert_eq!(frame.copy_planar_i16(&mut [&mut left_out[..], &mut right_out[..]]), 2);
        assert_eq!(left_out, [16384, -16384]);
        assert_eq!(right_out, [8192, 8192]);

        let frame = Frame::new((0..2).map(|_| &[][..]).collect());
        assert!(frame.is_empty());
        assert_eq!(frame.channels(), 2);
    }
}
