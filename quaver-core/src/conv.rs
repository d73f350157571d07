// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `conv` module converts decoded planar `f32` audio into 16-bit PCM, optionally coercing the
//! number of channels.
//!
//! When the number of requested channels differs from the number of decoded channels, the
//! requested channel count is 1 or 2, and the decoded channel count is 6 or less, the decoded
//! channels are mixed down (or up) according to their speaker positions:
//!
//! | Decoded | Positions            |
//! |---------|----------------------|
//! | 1       | C                    |
//! | 2       | L, R                 |
//! | 3       | L, C, R              |
//! | 4       | L, R, L, R           |
//! | 5       | L, C, R, L, R        |
//! | 6       | L, C, R, L, R, C     |
//!
//! A mono output is the sum of all decoded channels. A stereo output routes the L channels to the
//! left, the R channels to the right, and the C channels to both.
//!
//! In all other cases, the first `min(requested, decoded)` channels are copied and any remaining
//! requested channels are filled with silence.

use bitflags::bitflags;

bitflags! {
    /// The speaker positions a decoded channel contributes to.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    struct Playback: u8 {
        const MONO  = 0x1;
        const LEFT  = 0x2;
        const RIGHT = 0x4;
    }
}

const L: Playback = Playback::LEFT.union(Playback::MONO);
const C: Playback = Playback::LEFT.union(Playback::RIGHT).union(Playback::MONO);
const R: Playback = Playback::RIGHT.union(Playback::MONO);

/// Speaker positions, indexed by the decoded channel count.
const CHANNEL_POSITIONS: [&[Playback]; 7] = [
    &[],
    &[C],
    &[L, R],
    &[L, C, R],
    &[L, R, L, R],
    &[L, C, R, L, R],
    &[L, C, R, L, R, C],
];

/// The speaker mask selected by each output channel, indexed by the requested channel count.
const CHANNEL_SELECTORS: [&[Playback]; 3] =
    [&[], &[Playback::MONO], &[Playback::LEFT, Playback::RIGHT]];

/// Clamps the given value to the [-32_768, 32_767] range.
#[inline]
pub fn clamp_i16(val: i32) -> i16 {
    if val.wrapping_add(0x8000) & !0xffff == 0 {
        val as i16
    }
    else {
        0x7fff ^ val.wrapping_shr(31) as i16
    }
}

/// Converts a `f32` sample in the nominal range [-1.0, 1.0) to a saturated `i16` sample. The
/// sample is rounded to the nearest integer, with ties rounded to even.
#[inline]
pub fn f32_to_i16(s: f32) -> i16 {
    // Casting saturates, so values far beyond the i32 range (and NaN) remain well-defined.
    clamp_i16((s * 32_768.0).round_ties_even() as i32)
}

/// How a single output channel is produced.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Source {
    /// Sum every decoded channel whose position intersects the mask.
    Mix(Playback),
    /// Copy a decoded channel.
    Copy(usize),
    /// Silence.
    Zero,
}

fn output_sources(decoded: usize, requested: usize) -> impl Iterator<Item = Source> {
    let mix = decoded != requested && requested <= 2 && decoded <= 6;

    (0..requested).map(move |k| {
        if mix {
            Source::Mix(CHANNEL_SELECTORS[requested][k])
        }
        else if k < decoded {
            Source::Copy(k)
        }
        else {
            Source::Zero
        }
    })
}

#[inline(always)]
fn render_sample(planes: &[&[f32]], source: Source, i: usize) -> i16 {
    match source {
        Source::Mix(mask) => {
            let sum = CHANNEL_POSITIONS[planes.len()]
                .iter()
                .zip(planes)
                .filter(|(pos, _)| pos.intersects(mask))
                .map(|(_, plane)| plane[i])
                .sum::<f32>();

            f32_to_i16(sum)
        }
        Source::Copy(ch) => f32_to_i16(planes[ch][i]),
        Source::Zero => 0,
    }
}

/// Converts planar audio into interleaved 16-bit PCM with `channels` channels per frame.
///
/// Every plane must have the same length. Returns the number of frames written, which is the
/// lesser of the number of decoded frames and the number of whole frames that fit in `out`.
pub fn interleave_i16(planes: &[&[f32]], channels: usize, out: &mut [i16]) -> usize {
    if channels == 0 {
        return 0;
    }

    let frames = planes.first().map_or(0, |p| p.len()).min(out.len() / channels);

    for (k, source) in output_sources(planes.len(), channels).enumerate() {
        for (i, o) in out[..frames * channels].iter_mut().skip(k).step_by(channels).enumerate() {
            *o = render_sample(planes, source, i);
        }
    }

    frames
}

/// Converts planar audio into planar 16-bit PCM. The number of output channels is the number of
/// output planes.
///
/// Every input plane must have the same length. Returns the number of frames written, which is the
/// lesser of the number of decoded frames and the length of the shortest output plane.
pub fn planar_i16(planes: &[&[f32]], out: &mut [&mut [i16]]) -> usize {
    let capacity = out.iter().map(|o| o.len()).min().unwrap_or(0);
    let frames = planes.first().map_or(0, |p| p.len()).min(capacity);

    for (source, plane) in output_sources(planes.len(), out.len()).zip(out.iter_mut()) {
        for (i, o) in plane[..frames].iter_mut().enumerate() {
            *o = render_sample(planes, source, i);
        }
    }

    frames
}
