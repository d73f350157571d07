// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::f64::consts;

/// For a given block size, generates the rising slope of the Vorbis window that overlaps
/// `bs / 2` samples.
///
/// The inner sine is rounded to single precision and squared before the outer sine is taken, so
/// that the slope matches reference decoders exactly.
fn generate_win_curve(bs: usize) -> Vec<f32> {
    let len = bs / 2;
    let denom = f64::from(len as u32);

    let mut slope = vec![0.0; len];

    for (i, s) in slope.iter_mut().enumerate() {
        let num = f64::from(i as u32) + 0.5;
        let inner = (num / denom * 0.5 * consts::PI).sin() as f32;
        *s = (0.5 * consts::PI * f64::from(inner * inner)).sin() as f32;
    }

    slope
}

pub struct Windows {
    /// Short block window slope.
    pub short: Vec<f32>,
    /// Long block window slope.
    pub long: Vec<f32>,
}

impl Windows {
    pub fn new(blocksize0: usize, blocksize1: usize) -> Self {
        let short = generate_win_curve(blocksize0);
        let long = generate_win_curve(blocksize1);
        Windows { short, long }
    }

    /// Gets the slope used to overlap `len` samples. The overlap is always half of either block
    /// size.
    pub fn slope(&self, len: usize) -> &[f32] {
        if len == self.short.len() {
            &self.short
        }
        else {
            &self.long
        }
    }
}
