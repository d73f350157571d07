// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Builds synthetic Ogg Vorbis streams.
//!
//! The streams use a minimal but complete setup: a two-point floor 1, a type 1 residue over the
//! first 128 bins, and two 1-bit codebooks so that any bit pattern in an audio packet decodes.
//! The audio packets are filled with pseudo-random residue bits.

#![allow(dead_code)]

use quaver::core::checksum::Crc32;
use quaver::{Decoder, Error};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

pub const BS0_EXP: u8 = 8;
pub const BS1_EXP: u8 = 11;
pub const BS0: usize = 1 << BS0_EXP;
pub const BS1: usize = 1 << BS1_EXP;

pub const SAMPLE_RATE: u32 = 44100;

const PAGE_FLAG_FIRST: u8 = 0x02;
const PAGE_FLAG_LAST: u8 = 0x04;

/// The number of residue partitions coded per channel.
const RESIDUE_PARTITIONS: usize = 8;
/// The number of values per residue partition.
const RESIDUE_PARTITION_SIZE: usize = 16;

/// Writes bits least-significant bit first.
#[derive(Default)]
pub struct BitWriter {
    buf: Vec<u8>,
    bits: usize,
}

impl BitWriter {
    pub fn write(&mut self, value: u32, count: u32) -> &mut Self {
        for i in 0..count {
            if self.bits % 8 == 0 {
                self.buf.push(0);
            }
            if value & (1 << i) != 0 {
                let last = self.buf.len() - 1;
                self.buf[last] |= 1 << (self.bits % 8);
            }
            self.bits += 1;
        }
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Encodes a float in the Vorbis 32-bit float format.
fn float32_pack(mantissa: u32, exp: i32, negative: bool) -> u32 {
    let sign = if negative { 0x8000_0000 } else { 0 };
    sign | (((exp + 788) as u32) << 21) | mantissa
}

pub fn ident_header(channels: u8, sample_rate: u32) -> Vec<u8> {
    let mut buf = vec![1];
    buf.extend_from_slice(b"vorbis");
    buf.extend_from_slice(&0u32.to_le_bytes());
    buf.push(channels);
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&0i32.to_le_bytes());
    buf.extend_from_slice(&96_000i32.to_le_bytes());
    buf.extend_from_slice(&0i32.to_le_bytes());
    buf.push((BS1_EXP << 4) | BS0_EXP);
    buf.push(1);
    buf
}

pub fn comment_header(vendor: &str, comments: &[&str]) -> Vec<u8> {
    let mut buf = vec![3];
    buf.extend_from_slice(b"vorbis");
    buf.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    buf.extend_from_slice(vendor.as_bytes());
    buf.extend_from_slice(&(comments.len() as u32).to_le_bytes());
    for comment in comments {
        buf.extend_from_slice(&(comment.len() as u32).to_le_bytes());
        buf.extend_from_slice(comment.as_bytes());
    }
    buf.push(1);
    buf
}

fn write_codebook(bits: &mut BitWriter, vq: bool) {
    // Sync, 1 dimension, 2 entries.
    bits.write(0x564342, 24).write(1, 16).write(2, 24);

    // Unordered, not sparse, both codewords 1 bit long.
    bits.write(0, 1).write(0, 1).write(0, 5).write(0, 5);

    if vq {
        // Lookup type 1, with the values -1.0 and 1.0.
        bits.write(1, 4);
        bits.write(float32_pack(1, 0, true), 32);
        bits.write(float32_pack(1, 1, false), 32);
        bits.write(0, 4).write(0, 1);
        bits.write(0, 1).write(1, 1);
    }
    else {
        bits.write(0, 4);
    }
}

/// Builds a setup header. If `floor_type` is 0 the stream is unsupported.
///
/// When `couple` is set, channels are coupled in pairs, `2k` with `2k + 1`. Channel `c` is
/// assigned to submap `c % submaps`, and every submap uses the same floor and residue.
pub fn setup_header(channels: u8, couple: bool, submaps: u8, floor_type: u32) -> Vec<u8> {
    assert!((1..=16).contains(&submaps));
    assert!(!couple || channels >= 2);

    let mut bits = BitWriter::default();

    // Codebooks. Book 0 is a VQ book for the residue, book 1 is the residue classbook.
    bits.write(1, 8);
    write_codebook(&mut bits, true);
    write_codebook(&mut bits, false);

    // Time domain transforms.
    bits.write(0, 6).write(0, 16);

    // One floor.
    bits.write(0, 6);

    if floor_type == 0 {
        // Order, rate, bark map size, amplitude bits, amplitude offset, and 1 book.
        bits.write(0, 16).write(8, 8).write(44100, 16).write(256, 16).write(6, 6).write(0, 8);
        bits.write(0, 4).write(0, 8);
    }
    else {
        // No partitions, a multiplier of 4, and 8 range bits.
        bits.write(1, 16).write(0, 5).write(3, 2).write(8, 4);
    }

    // One type 1 residue over bins 0..128, with partitions of 16 and a single classification.
    bits.write(0, 6).write(1, 16);
    bits.write(0, 24).write((RESIDUE_PARTITIONS * RESIDUE_PARTITION_SIZE) as u32, 24);
    bits.write(RESIDUE_PARTITION_SIZE as u32 - 1, 24).write(0, 6).write(1, 8);
    bits.write(1, 3).write(0, 1).write(0, 8);

    // One mapping.
    bits.write(0, 6).write(0, 16);

    if submaps > 1 {
        bits.write(1, 1).write(u32::from(submaps) - 1, 4);
    }
    else {
        bits.write(0, 1);
    }

    if couple {
        let steps = u32::from(channels / 2);
        // The width of a channel number.
        let width = u32::BITS - u32::from(channels - 1).leading_zeros();

        bits.write(1, 1).write(steps - 1, 8);

        for step in 0..steps {
            bits.write(2 * step, width).write(2 * step + 1, width);
        }
    }
    else {
        bits.write(0, 1);
    }

    bits.write(0, 2);

    if submaps > 1 {
        for ch in 0..channels {
            bits.write(u32::from(ch % submaps), 4);
        }
    }

    for _ in 0..submaps {
        bits.write(0, 8).write(0, 8).write(0, 8);
    }

    // A short mode, and a long mode.
    bits.write(1, 6);
    bits.write(0, 1).write(0, 16).write(0, 16).write(0, 8);
    bits.write(1, 1).write(0, 16).write(0, 16).write(0, 8);

    // Framing.
    bits.write(1, 1);

    let mut buf = vec![5];
    buf.extend_from_slice(b"vorbis");
    buf.extend(bits.into_bytes());
    buf
}

/// Builds an audio packet with pseudo-random contents.
pub fn audio_packet(
    rng: &mut SmallRng,
    channels: u8,
    long: bool,
    prev_long: bool,
    next_long: bool,
    padding: usize,
) -> Vec<u8> {
    let mut bits = BitWriter::default();

    bits.write(0, 1).write(u32::from(long), 1);

    if long {
        bits.write(u32::from(prev_long), 1).write(u32::from(next_long), 1);
    }

    for _ in 0..channels {
        // A non-zero floor with two random points.
        bits.write(1, 1).write(rng.random_range(20..63), 6).write(rng.random_range(20..63), 6);
    }

    let residue_bits = usize::from(channels) * RESIDUE_PARTITIONS * (RESIDUE_PARTITION_SIZE + 1);

    for _ in 0..residue_bits {
        bits.write(u32::from(rng.random::<bool>()), 1);
    }

    let mut buf = bits.into_bytes();

    // Trailing bytes are ignored by the decoder.
    buf.extend((0..padding).map(|_| rng.random::<u8>()));
    buf
}

/// Builds an Ogg page.
pub fn ogg_page(flags: u8, granule: u64, sequence: u32, packets: &[&[u8]]) -> Vec<u8> {
    let mut segments = Vec::new();
    let mut body = Vec::new();

    for packet in packets {
        let mut len = packet.len();
        while len >= 255 {
            segments.push(255);
            len -= 255;
        }
        segments.push(len as u8);
        body.extend_from_slice(packet);
    }

    assert!(segments.len() <= 255);

    let mut buf = Vec::new();
    buf.extend_from_slice(b"OggS");
    buf.push(0);
    buf.push(flags);
    buf.extend_from_slice(&granule.to_le_bytes());
    buf.extend_from_slice(&0x5155_4156u32.to_le_bytes());
    buf.extend_from_slice(&sequence.to_le_bytes());
    buf.extend_from_slice(&[0; 4]);
    buf.push(segments.len() as u8);
    buf.extend_from_slice(&segments);
    buf.extend_from_slice(&body);

    let mut crc = Crc32::new(0);
    crc.process_buf_bytes(&buf);
    buf[22..26].copy_from_slice(&crc.crc().to_le_bytes());
    buf
}

/// Builds a complete Ogg Vorbis stream.
#[derive(Clone, Debug)]
pub struct StreamBuilder {
    channels: u8,
    couple: bool,
    submaps: u8,
    floor_type: u32,
    /// The block flag of each audio packet.
    blocks: Vec<bool>,
    packets_per_page: usize,
    /// The first block, if long, signals a short previous window.
    lead_in_short: bool,
    padding: usize,
    packet_len_limit: Option<usize>,
    final_granule: Option<u64>,
    comments: Vec<String>,
    seed: u64,
}

impl StreamBuilder {
    /// A stream of `packets` long blocks.
    pub fn new(channels: u8, packets: usize) -> Self {
        StreamBuilder {
            channels,
            couple: false,
            submaps: 1,
            floor_type: 1,
            blocks: vec![true; packets],
            packets_per_page: 4,
            lead_in_short: false,
            padding: 0,
            packet_len_limit: None,
            final_granule: None,
            comments: Vec::new(),
            seed: 0,
        }
    }

    pub fn blocks(mut self, blocks: Vec<bool>) -> Self {
        self.blocks = blocks;
        self
    }

    pub fn couple(mut self) -> Self {
        self.couple = true;
        self
    }

    pub fn submaps(mut self, submaps: u8) -> Self {
        self.submaps = submaps;
        self
    }

    pub fn floor_type(mut self, floor_type: u32) -> Self {
        self.floor_type = floor_type;
        self
    }

    pub fn packets_per_page(mut self, count: usize) -> Self {
        self.packets_per_page = count;
        self
    }

    pub fn lead_in_short(mut self) -> Self {
        self.lead_in_short = true;
        self
    }

    /// Appends `padding` ignored bytes to each audio packet.
    pub fn padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    /// Cuts each audio packet to at most `len` bytes.
    pub fn packet_len_limit(mut self, len: usize) -> Self {
        self.packet_len_limit = Some(len);
        self
    }

    pub fn final_granule(mut self, granule: u64) -> Self {
        self.final_granule = Some(granule);
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comments.push(comment.to_string());
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// The granule position of each audio packet. Each packet completes the samples up to the
    /// centre of its block.
    pub fn granules(&self) -> Vec<u64> {
        let size = |long: bool| if long { BS1 as u64 } else { BS0 as u64 };

        let mut granules = Vec::with_capacity(self.blocks.len());
        let mut granule = 0;

        for (i, &long) in self.blocks.iter().enumerate() {
            if i > 0 {
                granule += size(self.blocks[i - 1]) / 4 + size(long) / 4;
            }
            granules.push(granule);
        }

        granules
    }

    /// The number of samples in the stream.
    pub fn total_samples(&self) -> u64 {
        self.final_granule.unwrap_or_else(|| self.granules().last().copied().unwrap_or(0))
    }

    pub fn build(&self) -> Vec<u8> {
        let mut rng = SmallRng::seed_from_u64(self.seed);

        let comments: Vec<&str> = self.comments.iter().map(|c| c.as_str()).collect();

        let ident = ident_header(self.channels, SAMPLE_RATE);
        let comment = comment_header("quaver test encoder", &comments);
        let setup = setup_header(self.channels, self.couple, self.submaps, self.floor_type);

        let mut buf = ogg_page(PAGE_FLAG_FIRST, 0, 0, &[&ident]);
        buf.extend(ogg_page(0, 0, 1, &[&comment, &setup]));

        let packets: Vec<Vec<u8>> = (0..self.blocks.len())
            .map(|i| {
                let long = self.blocks[i];
                let prev_long = if i > 0 { self.blocks[i - 1] } else { long && !self.lead_in_short };
                let next_long = self.blocks.get(i + 1).copied().unwrap_or(long);
                let mut packet =
                    audio_packet(&mut rng, self.channels, long, prev_long, next_long, self.padding);

                if let Some(len) = self.packet_len_limit {
                    packet.truncate(len);
                }

                packet
            })
            .collect();

        let granules = self.granules();

        let pages = packets.len().div_ceil(self.packets_per_page);

        for page in 0..pages {
            let start = page * self.packets_per_page;
            let end = (start + self.packets_per_page).min(packets.len());

            let is_last = page + 1 == pages;

            let (flags, granule) = if is_last {
                (PAGE_FLAG_LAST, self.total_samples())
            }
            else {
                (0, granules[end - 1])
            };

            let page_packets: Vec<&[u8]> = packets[start..end].iter().map(|p| p.as_slice()).collect();

            buf.extend(ogg_page(flags, granule, 2 + page as u32, &page_packets));
        }

        buf
    }
}

/// Decoded audio, one `Vec` per channel, and the length of each frame.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Decoded {
    pub planes: Vec<Vec<f32>>,
    pub frame_lens: Vec<usize>,
}

impl Decoded {
    pub fn new(channels: usize) -> Self {
        Decoded { planes: vec![Vec::new(); channels], frame_lens: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.planes.first().map_or(0, |p| p.len())
    }

    fn append(&mut self, frame: &quaver::Frame<'_>) {
        for (plane, samples) in self.planes.iter_mut().zip(frame.planes()) {
            plane.extend_from_slice(samples);
        }
        self.frame_lens.push(frame.len());
    }
}

/// Decodes a stream in pull mode until the end of the stream.
pub fn decode_pull(buf: &[u8]) -> Decoded {
    let mut decoder = Decoder::open_memory(buf.to_vec(), &Default::default()).unwrap();
    let channels = decoder.info().unwrap().channels;

    let mut decoded = Decoded::new(channels);

    while let Some(frame) = decoder.next_frame().unwrap() {
        decoded.append(&frame);
    }

    decoded
}

/// Decodes a stream in push mode, pushing the chunk sizes returned by `chunk_len` in turn.
///
/// Frames without samples are not recorded, since push mode also returns them for header packets.
pub fn decode_push<F: FnMut() -> usize>(buf: &[u8], mut chunk_len: F) -> Decoded {
    let mut decoder = Decoder::new_push(&Default::default());
    let mut decoded: Option<Decoded> = None;

    let mut pos = 0;

    while pos < buf.len() {
        let end = (pos + chunk_len().max(1)).min(buf.len());
        decoder.push(&buf[pos..end]).unwrap();
        pos = end;

        loop {
            match decoder.next_frame() {
                Ok(Some(frame)) => {
                    let decoded = decoded.get_or_insert_with(|| Decoded::new(frame.channels()));
                    if !frame.is_empty() {
                        decoded.append(&frame);
                    }
                }
                Ok(None) => unreachable!("push mode never ends"),
                Err(Error::NeedMoreData) => break,
                Err(err) => panic!("unexpected error: {}", err),
            }
        }
    }

    decoded.unwrap_or_default()
}

/// Removes the frames without samples from a pull mode decode.
pub fn without_empty_frames(mut decoded: Decoded) -> Decoded {
    decoded.frame_lens.retain(|&len| len > 0);
    decoded
}
