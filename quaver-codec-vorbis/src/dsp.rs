// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::ops::Range;

use quaver_core::dsp::mdct::Imdct;

use super::residue::ResidueScratch;
use super::window::Windows;

/// The lapping geometry of a block.
///
/// The left and right ranges are the regions of the block that overlap the previous and next
/// blocks, respectively. Samples before the left range, and after the right range, are zero.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockGeometry {
    pub n: usize,
    pub left: Range<usize>,
    pub right: Range<usize>,
}

impl BlockGeometry {
    /// Computes the geometry of a block of size `n`. A long block that borders a short block on
    /// either side only overlaps it over the length of the short block's half.
    pub fn new(n: usize, bs0: usize, is_long: bool, prev_long: bool, next_long: bool) -> Self {
        let left = if is_long && !prev_long {
            (n - bs0) / 4..(n + bs0) / 4
        }
        else {
            0..n / 2
        };

        let right = if is_long && !next_long {
            (3 * n - bs0) / 4..(3 * n + bs0) / 4
        }
        else {
            n / 2..n
        };

        BlockGeometry { n, left, right }
    }

    /// Gets the number of samples the block advances the stream by. This is the distance between
    /// the start of the two overlaps.
    pub fn span(&self) -> usize {
        self.right.start - self.left.start
    }
}

pub struct DspChannel {
    /// The channel spectrum. First the residue, then the residue multiplied by the floor curve.
    pub spectrum: Vec<f32>,
    /// The floor 1 amplitudes decoded for the current packet.
    pub floor_y: Vec<i32>,
    /// The output of the inverse MDCT for the current block.
    block: Vec<f32>,
    /// The unwindowed right overlap of the previous block.
    overlap: Vec<f32>,
}

impl DspChannel {
    pub fn new(bs1: usize) -> Self {
        DspChannel {
            spectrum: vec![0.0; bs1 >> 1],
            floor_y: Vec::with_capacity(65),
            block: vec![0.0; bs1],
            overlap: vec![0.0; bs1 >> 1],
        }
    }
}

pub struct Dsp {
    /// DSP channels.
    pub channels: Vec<DspChannel>,
    /// Residue scratch-pad.
    pub residue_scratch: ResidueScratch,
    /// IMDCT for short-blocks.
    imdct_short: Imdct,
    /// IMDCT for long-blocks.
    imdct_long: Imdct,
    /// Windows for overlap-add.
    windows: Windows,
    /// The number of samples retained from the previous block, or 0 if there is no previous block.
    prev_len: usize,
    /// The range of each channel's block that was output by the last call to `finish_block`.
    output: Range<usize>,
}

impl Dsp {
    pub fn new(channels: usize, bs0: usize, bs1: usize) -> Self {
        Dsp {
            channels: (0..channels).map(|_| DspChannel::new(bs1)).collect(),
            residue_scratch: Default::default(),
            imdct_short: Imdct::new(bs0 >> 1),
            imdct_long: Imdct::new(bs1 >> 1),
            windows: Windows::new(bs0, bs1),
            prev_len: 0,
            output: 0..0,
        }
    }

    /// Forgets the previous block. The next block will only prime the overlap.
    pub fn reset(&mut self) {
        self.prev_len = 0;
        self.output = 0..0;
    }

    /// Clears the output of the last block.
    pub fn clear_output(&mut self) {
        self.output = 0..0;
    }

    /// Runs the inverse MDCT on the spectrum of every channel.
    pub fn imdct(&mut self, n: usize, is_long: bool) {
        let imdct = if is_long { &mut self.imdct_long } else { &mut self.imdct_short };

        for channel in self.channels.iter_mut() {
            imdct.imdct(&channel.spectrum[..n >> 1], &mut channel.block[..n]);
        }
    }

    /// Overlaps the current block of `n` samples with the previous block, retains the samples in
    /// `[right, len)` for the next block, and makes `[left, min(right, len))` the output.
    ///
    /// Returns the number of samples output. No samples are output if there was no previous block.
    pub fn finish_block(&mut self, n: usize, len: usize, left: usize, right: usize) -> usize {
        let prev_len = self.prev_len;

        if prev_len > 0 {
            let win = self.windows.slope(prev_len);

            for channel in self.channels.iter_mut() {
                // A corrupt window flag may describe an overlap longer than the block.
                let overlap_len = prev_len.min(n - left);

                let cur = &mut channel.block[left..left + overlap_len];

                for (j, (s, &p)) in cur.iter_mut().zip(&channel.overlap[..overlap_len]).enumerate() {
                    *s = *s * win[j] + p * win[prev_len - 1 - j];
                }
            }
        }

        self.prev_len = len.saturating_sub(right);

        for channel in self.channels.iter_mut() {
            let DspChannel { block, overlap, .. } = channel;
            overlap[..len.saturating_sub(right)].copy_from_slice(&block[right.min(len)..len]);
        }

        if prev_len == 0 {
            self.output = 0..0;
            return 0;
        }

        let right = right.min(len);

        self.output = left..right.max(left);
        self.output.len()
    }

    /// Drops the first `count` samples of the output.
    pub fn skip_output(&mut self, count: usize) {
        self.output.start = (self.output.start + count).min(self.output.end);
    }

    /// Gets the number of samples output.
    pub fn output_len(&self) -> usize {
        self.output.len()
    }

    /// Gets the output of a channel.
    pub fn output(&self, ch: usize) -> &[f32] {
        &self.channels[ch].block[self.output.clone()]
    }
}
