// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::cmp::min;

use quaver_core::errors::{decode_error, setup_error, Result};
use quaver_core::io::{BitReaderRtl, ReadBitsRtl};

use log::warn;

use super::codebook::VorbisCodebook;
use super::common::*;
use super::dsp::DspChannel;

/// The maximum number of values in a precomputed classword table.
const MAX_CLASSDATA_LEN: u64 = 1 << 24;

/// `ResidueScratch` is a working-area that may be reused by many `Residue`s to reduce overall
/// memory consumption.
#[derive(Default)]
pub struct ResidueScratch {
    /// The classword entry read for each channel and partition set.
    part_classes: Vec<u32>,
    /// Vector to read interleaved format 2 residuals.
    buf: Vec<f32>,
}

#[derive(Debug)]
pub struct Residue {
    /// The residue format.
    residue_type: u16,
    /// The residue's starting offset.
    begin: u32,
    /// The residue's ending offset.
    end: u32,
    /// Residue partition size (max. value 2^24).
    partition_size: u32,
    /// Codebook for reading partition classifications.
    classbook: u8,
    /// The codebook for each pass of each classification.
    books: Vec<[Option<u8>; 8]>,
    /// The classification of each partition coded by each classbook entry. Each entry codes as many
    /// partitions as the classbook has dimensions.
    classdata: Vec<u8>,
}

impl Residue {
    pub fn read_setup(
        bs: &mut BitReaderRtl<'_>,
        residue_type: u16,
        codebooks: &[VorbisCodebook],
    ) -> Result<Self> {
        let begin = bs.read_bits_leq32(24)?;
        let end = bs.read_bits_leq32(24)?;
        let partition_size = bs.read_bits_leq32(24)? + 1;
        let classifications = bs.read_bits_leq32(6)? as u8 + 1;
        let classbook = bs.read_bits_leq32(8)? as u8;

        if end < begin {
            return setup_error("vorbis: invalid residue begin and end");
        }

        if usize::from(classbook) >= codebooks.len() {
            return setup_error("vorbis: invalid residue classbook");
        }

        let mut cascades = Vec::with_capacity(usize::from(classifications));

        for _ in 0..classifications {
            let low_bits = bs.read_bits_leq32(3)? as u8;

            let high_bits = if bs.read_bit()? { bs.read_bits_leq32(5)? as u8 } else { 0 };

            cascades.push((high_bits << 3) | low_bits);
        }

        let mut books = Vec::with_capacity(usize::from(classifications));

        for cascade in cascades {
            let mut class_books = [None; 8];

            // For each pass that codes this classification, read the codebook number.
            for (pass, book) in class_books.iter_mut().enumerate() {
                if cascade & (1 << pass) != 0 {
                    let book_num = bs.read_bits_leq32(8)? as u8;

                    if usize::from(book_num) >= codebooks.len() {
                        return setup_error("vorbis: invalid codebook for residue");
                    }

                    *book = Some(book_num);
                }
            }

            books.push(class_books);
        }

        let class_dims = usize::from(codebooks[usize::from(classbook)].dimensions());
        let class_entries = codebooks[usize::from(classbook)].entries() as usize;

        if (class_dims as u64) * (class_entries as u64) > MAX_CLASSDATA_LEN {
            return setup_error("vorbis: residue classbook too large");
        }

        let classdata = decompose_classwords(class_entries, class_dims, classifications);

        Ok(Residue { residue_type, begin, end, partition_size, classbook, books, classdata })
    }

    /// Reads the residue vectors of the channels in `residue_channels` into the channel spectrums.
    ///
    /// The spectrums of all the residue channels are zeroed first. Channels in `do_not_decode` are
    /// not read. Reaching the end of the packet is not an error, the remaining partitions are zero.
    #[allow(clippy::too_many_arguments)]
    pub fn read_residue(
        &self,
        bs: &mut BitReaderRtl<'_>,
        n2: usize,
        codebooks: &[VorbisCodebook],
        residue_channels: &BitSet256,
        do_not_decode: &BitSet256,
        scratch: &mut ResidueScratch,
        channels: &mut [DspChannel],
    ) -> Result<()> {
        for ch in residue_channels.iter() {
            channels[ch].spectrum[..n2].fill(0.0);
        }

        let ResidueScratch { part_classes, buf } = scratch;

        let result = if self.residue_type == 2 && residue_channels.count() > 1 {
            // Format 2 codes one vector with the samples of all channels interleaved. It is only
            // skipped when every channel is unused.
            if residue_channels.iter().all(|ch| do_not_decode.is_set(ch)) {
                return Ok(());
            }

            let stride = residue_channels.count();

            buf.clear();
            buf.resize(n2 * stride, 0.0);

            let mut targets = [&mut buf[..]];

            let result = self.read_partitions(bs, codebooks, &mut targets, &[false], part_classes);

            deinterleave(&buf[..], n2, stride, residue_channels, channels);

            result
        }
        else {
            let mut targets = Vec::with_capacity(residue_channels.count());
            let mut skip = Vec::with_capacity(residue_channels.count());

            for (ch, channel) in channels.iter_mut().enumerate() {
                if residue_channels.is_set(ch) {
                    targets.push(&mut channel.spectrum[..n2]);
                    skip.push(do_not_decode.is_set(ch));
                }
            }

            self.read_partitions(bs, codebooks, &mut targets, &skip, part_classes)
        };

        match result {
            Err(ref err) if is_end_of_packet(err) => {
                warn!("vorbis: residue reached the end of the packet");
                Ok(())
            }
            result => result,
        }
    }

    /// Reads the partitions of every target vector that is not skipped, as defined in section 8.6.2
    /// of the Vorbis I specification.
    fn read_partitions(
        &self,
        bs: &mut BitReaderRtl<'_>,
        codebooks: &[VorbisCodebook],
        targets: &mut [&mut [f32]],
        skip: &[bool],
        part_classes: &mut Vec<u32>,
    ) -> Result<()> {
        // The residue range is limited to the actual vector size. For format 2, the vector size is
        // that of the interleaved vector.
        let actual_size = targets.first().map_or(0, |t| t.len());

        let limit_begin = min(self.begin as usize, actual_size);
        let limit_end = min(self.end as usize, actual_size);

        let part_size = self.partition_size as usize;
        let n_parts = (limit_end - limit_begin) / part_size;

        if n_parts == 0 {
            return Ok(());
        }

        let classbook = &codebooks[usize::from(self.classbook)];
        let class_dims = usize::from(classbook.dimensions());

        if class_dims == 0 {
            return decode_error("vorbis: residue classbook has no dimensions");
        }

        let n_class_sets = n_parts.div_ceil(class_dims);

        part_classes.clear();
        part_classes.resize(targets.len() * n_class_sets, 0);

        for pass in 0..8 {
            let mut pcount = 0;
            let mut class_set = 0;

            while pcount < n_parts {
                // The classwords are read on the first pass only.
                if pass == 0 {
                    for (j, &skip_ch) in skip.iter().enumerate() {
                        if !skip_ch {
                            part_classes[j * n_class_sets + class_set] = classbook.read_scalar(bs)?;
                        }
                    }
                }

                for i in 0..class_dims {
                    if pcount >= n_parts {
                        break;
                    }

                    let offset = limit_begin + pcount * part_size;

                    for (j, target) in targets.iter_mut().enumerate() {
                        if skip[j] {
                            continue;
                        }

                        let entry = part_classes[j * n_class_sets + class_set] as usize;
                        let class = self.classdata[entry * class_dims + i];

                        if let Some(book) = self.books[usize::from(class)][pass] {
                            let book = &codebooks[usize::from(book)];
                            let part = &mut target[offset..offset + part_size];

                            if self.residue_type == 0 {
                                read_partition_type0(bs, book, part)?;
                            }
                            else {
                                read_partition_type1(bs, book, part)?;
                            }
                        }
                    }

                    pcount += 1;
                }

                class_set += 1;
            }
        }

        Ok(())
    }
}

/// Decomposes every classbook entry into the classifications of the `dims` partitions it codes.
/// The first partition is the most significant digit.
fn decompose_classwords(entries: usize, dims: usize, classifications: u8) -> Vec<u8> {
    let mut classdata = vec![0; dims * entries];

    for (entry, classes) in classdata.chunks_exact_mut(dims.max(1)).enumerate() {
        let mut temp = entry;

        for class in classes.iter_mut().rev() {
            *class = (temp % usize::from(classifications)) as u8;
            temp /= usize::from(classifications);
        }
    }

    classdata
}

/// Reads a format 0 partition. Each vector is interleaved across the partition.
fn read_partition_type0(
    bs: &mut BitReaderRtl<'_>,
    book: &VorbisCodebook,
    part: &mut [f32],
) -> Result<()> {
    if !book.is_vq() {
        return decode_error("vorbis: residue book is not a vq codebook");
    }

    let step = part.len() / usize::from(book.dimensions());

    for k in 0..step {
        let vq = book.read_vq(bs)?;

        for (i, &v) in vq.iter().enumerate() {
            part[k + i * step] += v;
        }
    }

    Ok(())
}

/// Reads a format 1 partition. Each vector is contiguous, and the last is truncated to fit.
fn read_partition_type1(
    bs: &mut BitReaderRtl<'_>,
    book: &VorbisCodebook,
    part: &mut [f32],
) -> Result<()> {
    if !book.is_vq() {
        return decode_error("vorbis: residue book is not a vq codebook");
    }

    for chunk in part.chunks_mut(usize::from(book.dimensions())) {
        let vq = book.read_vq(bs)?;

        for (o, &v) in chunk.iter_mut().zip(vq) {
            *o += v;
        }
    }

    Ok(())
}

/// Distributes an interleaved format 2 vector to the spectrums of the residue channels.
fn deinterleave(
    buf: &[f32],
    n2: usize,
    stride: usize,
    residue_channels: &BitSet256,
    channels: &mut [DspChannel],
) {
    if stride == 2 {
        let mut iter = residue_channels.iter();

        if let (Some(ch0), Some(ch1)) = (iter.next(), iter.next()) {
            // The channel set iterates in ascending order, so ch0 < ch1.
            let (lo, hi) = channels.split_at_mut(ch1);

            let left = &mut lo[ch0].spectrum[..n2];
            let right = &mut hi[0].spectrum[..n2];

            for ((l, r), pair) in left.iter_mut().zip(right.iter_mut()).zip(buf.chunks_exact(2)) {
                *l = pair[0];
                *r = pair[1];
            }
        }

        return;
    }

    for (i, ch) in residue_channels.iter().enumerate() {
        let samples = buf.chunks_exact(stride).map(|c| c[i]);

        for (o, s) in channels[ch].spectrum[..n2].iter_mut().zip(samples) {
            *o = s;
        }
    }
}
