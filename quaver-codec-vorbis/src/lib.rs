// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// Disable to better express the specification.
#![allow(clippy::collapsible_else_if)]

//! A Vorbis I decoder.
//!
//! [`VorbisDecoder`] decodes audio packets into planar `f32` samples. It does not read a container.
//! The caller supplies the three header packets, and then each audio packet together with the
//! granule position and end-of-stream flag the container attributes to it.

use quaver_core::errors::{decode_error, Result};
use quaver_core::io::{BitReaderRtl, ReadBitsRtl};

use log::debug;

mod codebook;
mod common;
mod dsp;
mod floor;
mod header;
mod residue;
mod setup;
mod window;

use common::*;
use dsp::{BlockGeometry, Dsp};
use setup::{read_setup, Mapping, Setup};

pub use header::{Comments, IdentHeader};
pub use header::{
    VORBIS_PACKET_TYPE_COMMENT, VORBIS_PACKET_TYPE_IDENTIFICATION, VORBIS_PACKET_TYPE_SETUP,
};

/// Returns `true` if `data` is a non-empty audio packet.
pub fn is_audio_packet(data: &[u8]) -> bool {
    data.first().map_or(false, |&byte| byte & 0x1 == 0)
}

/// The mode and lapping geometry of an audio packet.
struct PacketHeader {
    mode: usize,
    is_long: bool,
    geometry: BlockGeometry,
}

/// Vorbis decoder.
pub struct VorbisDecoder {
    /// Identity header.
    ident: IdentHeader,
    /// Comment header.
    comments: Comments,
    /// Decoding tables from the setup header.
    setup: Setup,
    /// DSP.
    dsp: Dsp,
    /// The next packet is the first packet of the stream.
    first_decode: bool,
    /// Samples at the start of the next blocks that must be discarded.
    discard_deferred: usize,
    /// The stream position of the sample following the last output sample.
    loc: i64,
    /// `loc` is known.
    loc_valid: bool,
}

impl VorbisDecoder {
    /// Instantiates a decoder from the identification, comment, and setup header packets.
    ///
    /// A stream with more than `max_channels` channels is rejected with a limit error.
    pub fn try_new(ident: &[u8], comment: &[u8], setup: &[u8], max_channels: usize) -> Result<Self> {
        let ident = header::read_ident_header(ident, max_channels)?;
        let comments = header::read_comment_header(comment)?;
        let setup = read_setup(setup, &ident)?;

        let dsp = Dsp::new(usize::from(ident.n_channels), ident.blocksize0(), ident.blocksize1());

        Ok(VorbisDecoder {
            ident,
            comments,
            setup,
            dsp,
            first_decode: true,
            discard_deferred: 0,
            loc: 0,
            loc_valid: false,
        })
    }

    /// Gets the identification header.
    pub fn ident(&self) -> &IdentHeader {
        &self.ident
    }

    /// Gets the comment header.
    pub fn comments(&self) -> &Comments {
        &self.comments
    }

    /// Gets the number of channels.
    pub fn channels(&self) -> usize {
        usize::from(self.ident.n_channels)
    }

    /// Gets the sample rate.
    pub fn sample_rate(&self) -> u32 {
        self.ident.sample_rate
    }

    /// Gets the short and long block sizes.
    pub fn blocksizes(&self) -> (usize, usize) {
        (self.ident.blocksize0(), self.ident.blocksize1())
    }

    /// Gets the maximum number of samples per channel a single packet can output.
    pub fn max_frame_size(&self) -> usize {
        (3 * self.ident.blocksize1() - self.ident.blocksize0()) / 4
    }

    /// Gets the stream position of the next sample that will be output, if known.
    pub fn sample_offset(&self) -> Option<u64> {
        if self.loc_valid && self.loc >= 0 {
            Some(self.loc as u64)
        }
        else {
            None
        }
    }

    /// Gets the number of samples per channel output by the last packet.
    pub fn output_len(&self) -> usize {
        self.dsp.output_len()
    }

    /// Gets the samples of channel `ch` output by the last packet.
    pub fn output(&self, ch: usize) -> &[f32] {
        self.dsp.output(ch)
    }

    /// Drops the first `count` samples output by the last packet.
    pub fn skip_output(&mut self, count: usize) {
        self.dsp.skip_output(count);
    }

    /// Prepares to decode from the start of the stream.
    pub fn restart(&mut self) {
        self.dsp.reset();
        self.first_decode = true;
        self.discard_deferred = 0;
        self.loc_valid = false;
    }

    /// Forgets the previous packet after a discontinuity. If `loc` is provided, it is the stream
    /// position at the end of the packet preceding the next packet.
    pub fn reset(&mut self, loc: Option<u64>) {
        self.dsp.reset();
        self.first_decode = false;
        self.discard_deferred = 0;

        match loc {
            Some(loc) => {
                self.loc = i64::try_from(loc).unwrap_or(i64::MAX);
                self.loc_valid = true;
            }
            None => self.loc_valid = false,
        }
    }

    /// Gets the number of samples an audio packet advances the stream by, without decoding it.
    pub fn frame_span(&self, data: &[u8]) -> Option<usize> {
        let mut bs = BitReaderRtl::new(data);
        let header = self.read_packet_header(&mut bs).ok()?;

        let span = header.geometry.span();

        Some(span - self.discard_deferred.min(span))
    }

    /// Advances the stream past an audio packet without decoding it. The next packet decoded will
    /// only prime the overlap.
    pub fn skip_frame(&mut self, data: &[u8], granule: Option<u64>, is_last_page: bool) {
        let mut bs = BitReaderRtl::new(data);

        if let Ok(header) = self.read_packet_header(&mut bs) {
            self.advance(&header.geometry, granule, is_last_page);
        }

        self.dsp.reset();
    }

    /// Discards the output of the last packet.
    pub fn clear_output(&mut self) {
        self.dsp.clear_output();
    }

    /// Decodes an audio packet.
    ///
    /// `granule` is the granule position of the page the packet completed on, if the packet is the
    /// last packet completed on that page. `is_last_page` is set if that page ends the stream.
    ///
    /// Returns the number of samples per channel output.
    pub fn decode(&mut self, data: &[u8], granule: Option<u64>, is_last_page: bool) -> Result<usize> {
        self.dsp.clear_output();

        let mut bs = BitReaderRtl::new(data);

        let header = match self.read_packet_header(&mut bs) {
            Ok(header) => header,
            Err(ref err) if is_end_of_packet(err) => {
                return decode_error("vorbis: truncated packet header");
            }
            Err(err) => return Err(err),
        };

        self.synthesize(&mut bs, &header)?;

        let (len, left, right) = self.advance(&header.geometry, granule, is_last_page);

        Ok(self.dsp.finish_block(header.geometry.n, len, left, right))
    }

    fn read_packet_header(&self, bs: &mut BitReaderRtl<'_>) -> Result<PacketHeader> {
        // Section 4.3.1 - Packet Type, Mode, and Window Decode

        // First bit must be 0 to indicate audio packet.
        if bs.read_bit()? {
            return decode_error("vorbis: not an audio packet");
        }

        let modes = &self.setup.modes;

        let mode = bs.read_bits_leq32(ilog(modes.len() as u32 - 1))? as usize;

        if mode >= modes.len() {
            return decode_error("vorbis: invalid packet mode number");
        }

        let bs0 = self.ident.blocksize0();

        let geometry = if modes[mode].block_flag {
            let prev_long = bs.read_bit()?;
            let next_long = bs.read_bit()?;

            BlockGeometry::new(self.ident.blocksize1(), bs0, true, prev_long, next_long)
        }
        else {
            BlockGeometry::new(bs0, bs0, false, false, false)
        };

        Ok(PacketHeader { mode, is_long: modes[mode].block_flag, geometry })
    }

    /// Decodes the floors and residues of a packet, and transforms them into a block of samples for
    /// each channel.
    fn synthesize(&mut self, bs: &mut BitReaderRtl<'_>, header: &PacketHeader) -> Result<()> {
        let Setup { codebooks, floors, residues, mappings, modes } = &self.setup;

        let mapping: &Mapping = &mappings[usize::from(modes[header.mode].mapping)];

        let n = header.geometry.n;
        let n2 = n >> 1;

        // Section 4.3.2 - Floor Curve Decode

        // There is one floor per audio channel, selected by the submap the channel is multiplexed
        // to. The curve is rendered later, after the residue is decoded, so only the amplitudes
        // are kept.
        let mut zero: BitSet256 = Default::default();

        for (ch, (&submap_idx, channel)) in
            mapping.multiplex.iter().zip(self.dsp.channels.iter_mut()).enumerate()
        {
            let submap = &mapping.submaps[usize::from(submap_idx)];
            let floor = &floors[usize::from(submap.floor)];

            if !floor.read_channel(bs, codebooks, &mut channel.floor_y)? {
                zero.set(ch);
            }
        }

        // Channels with an unused floor are silent, regardless of their residue.
        let silent = zero.clone();

        // Section 4.3.3 - Non-zero Vector Propagate

        // If either channel of a coupled pair has a floor, the residues of both channels must be
        // decoded.
        for couple in &mapping.couplings {
            let magnitude_ch = usize::from(couple.magnitude_ch);
            let angle_ch = usize::from(couple.angle_ch);

            if !zero.is_set(magnitude_ch) || !zero.is_set(angle_ch) {
                zero.unset(magnitude_ch);
                zero.unset(angle_ch);
            }
        }

        // Section 4.3.4 - Residue Decode

        for (submap_idx, submap) in mapping.submaps.iter().enumerate() {
            let mut residue_channels: BitSet256 = Default::default();

            // Find the channels using this submap.
            for (c, &ch_submap_idx) in mapping.multiplex.iter().enumerate() {
                if submap_idx == usize::from(ch_submap_idx) {
                    residue_channels.set(c)
                }
            }

            residues[usize::from(submap.residue)].read_residue(
                bs,
                n2,
                codebooks,
                &residue_channels,
                &zero,
                &mut self.dsp.residue_scratch,
                &mut self.dsp.channels,
            )?;
        }

        // Section 4.3.5 - Inverse Coupling

        for coupling in mapping.couplings.iter().rev() {
            let magnitude_idx = usize::from(coupling.magnitude_ch);
            let angle_idx = usize::from(coupling.angle_ch);

            // Get mutable reference to each channel in the pair.
            let (magnitude_ch, angle_ch) = if magnitude_idx < angle_idx {
                let (a, b) = self.dsp.channels.split_at_mut(angle_idx);
                (&mut a[magnitude_idx], &mut b[0])
            }
            else {
                let (a, b) = self.dsp.channels.split_at_mut(magnitude_idx);
                (&mut b[0], &mut a[angle_idx])
            };

            let magnitudes = &mut magnitude_ch.spectrum[..n2];
            let angles = &mut angle_ch.spectrum[..n2];

            for (m, a) in magnitudes.iter_mut().zip(angles.iter_mut()) {
                let (new_m, new_a) = if *m > 0.0 {
                    if *a > 0.0 {
                        (*m, *m - *a)
                    }
                    else {
                        (*m + *a, *m)
                    }
                }
                else {
                    if *a > 0.0 {
                        (*m, *m + *a)
                    }
                    else {
                        (*m - *a, *m)
                    }
                };

                *m = new_m;
                *a = new_a;
            }
        }

        // Section 4.3.6 - Dot Product

        for (ch, channel) in self.dsp.channels.iter_mut().enumerate() {
            let spectrum = &mut channel.spectrum[..n2];

            if silent.is_set(ch) {
                spectrum.fill(0.0);
            }
            else {
                let submap = &mapping.submaps[usize::from(mapping.multiplex[ch])];
                floors[usize::from(submap.floor)].synthesis_step2(&channel.floor_y, spectrum);
            }
        }

        // Section 4.3.7 - Inverse MDCT
        self.dsp.imdct(n, header.is_long);

        Ok(())
    }

    /// Advances the stream position by a decoded packet, and computes the portion of the block to
    /// output. Returns the length of the block, and the start and end of the output.
    fn advance(
        &mut self,
        geometry: &BlockGeometry,
        granule: Option<u64>,
        is_last_page: bool,
    ) -> (usize, usize, usize) {
        let n2 = geometry.n >> 1;

        let mut left = geometry.left.start;
        let right = geometry.right.start;
        let right_end = geometry.right.end;

        let was_first = self.first_decode;

        if self.first_decode {
            // The first block only primes the overlap. It ends half a block into the stream.
            self.loc = -(n2 as i64);
            self.loc_valid = true;
            self.discard_deferred = geometry.n - right_end;
            self.first_decode = false;
        }
        else if self.discard_deferred > 0 {
            let span = right - left;

            if self.discard_deferred >= span {
                self.discard_deferred -= span;
                left = right;
            }
            else {
                left += self.discard_deferred;
                self.discard_deferred = 0;
            }
        }

        if let Some(granule) = granule {
            let granule = i64::try_from(granule).unwrap_or(i64::MAX);

            // The final page may end part way through the block.
            if self.loc_valid
                && is_last_page
                && granule < self.loc.saturating_add((right_end - left) as i64)
            {
                let len = ((granule - self.loc).max(0) as usize + left).min(right_end);

                debug!("vorbis: final block truncated to {} samples", len - left);

                self.loc += (len.min(right) - left) as i64;

                return (len, left, right);
            }

            self.loc = granule.saturating_sub(n2 as i64).saturating_add(left as i64);
            self.loc_valid = true;
        }

        if self.loc_valid {
            self.loc = self.loc.saturating_add((right - left) as i64);

            // A long first block with a short previous window ends before the start of the
            // stream. Output begins at sample 0 regardless.
            if was_first {
                self.loc = self.loc.max(0);
            }
        }

        (right_end, left, right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_is_audio_packet() {
        assert!(is_audio_packet(&[0x00]));
        assert!(is_audio_packet(&[0x02, 0x01]));
        assert!(!is_audio_packet(&[0x01]));
        assert!(!is_audio_packet(&[0x05]));
        assert!(!is_audio_packet(&[]));
    }
}
