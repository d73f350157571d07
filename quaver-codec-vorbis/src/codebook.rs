// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use quaver_core::errors::{decode_error, setup_error, Result};
use quaver_core::io::ReadBitsRtl;

use log::debug;

use super::common::*;

/// The number of bits indexing the fast codeword lookup table.
const FAST_LOOKUP_BITS: u32 = 10;
const FAST_LOOKUP_SIZE: usize = 1 << FAST_LOOKUP_BITS;

/// Marks a fast lookup table slot that does not resolve to an entry.
const NO_ENTRY: u32 = u32::MAX;

/// Codebooks with at-most this many entries are searched linearly.
const LINEAR_SEARCH_MAX_ENTRIES: u32 = 8;

/// The maximum number of values in an unpacked VQ table.
const MAX_VQ_VALUES: u64 = 1 << 24;

/// As defined in section 9.2.2 of the Vorbis I specification.
///
/// `float32_unpack` is intended to translate the packed binary representation of a Vorbis
/// codebook float value into the representation used by the decoder for floating point numbers.
#[inline(always)]
fn float32_unpack(x: u32) -> f32 {
    let mantissa = x & 0x1fffff;
    let sign = x & 0x80000000;
    let exponent = (x & 0x7fe00000) >> 21;
    let value = (mantissa as f32) * 2.0f32.powi(exponent as i32 - 788);
    if sign == 0 {
        value
    }
    else {
        -value
    }
}

/// As defined in section 9.2.3 of the Vorbis I specification.
///
/// The return value for this function is defined to be 'the greatest integer value for which the
/// return value to the power of `dimensions` is less than or equal to `entries`.
fn lookup1_values(entries: u32, dimensions: u16) -> u32 {
    // Start from the floating point estimate and correct it using exact integer arithmetic.
    let mut value = f64::from(entries).powf(1.0 / f64::from(dimensions)).floor() as u32;

    let pow = |v: u32| u64::from(v).checked_pow(u32::from(dimensions));

    while value > 0 && pow(value).map_or(true, |p| p > u64::from(entries)) {
        value -= 1;
    }

    while pow(value + 1).map_or(false, |p| p <= u64::from(entries)) {
        value += 1;
    }

    value
}

/// As defined in section 3.2.1 of the Vorbis I specification.
///
/// Each vector is unpacked once when the setup is read so that decoding a VQ entry is a simple
/// slice lookup.
fn unpack_vq_lookup_type1(
    multiplicands: &[u16],
    min_value: f32,
    delta_value: f32,
    sequence_p: bool,
    codebook_entries: u32,
    codebook_dimensions: u16,
    lookup_values: u32,
) -> Vec<f32> {
    let mut vq_lookup = vec![0.0; codebook_entries as usize * codebook_dimensions as usize];

    for (v, value_vector) in vq_lookup.chunks_exact_mut(codebook_dimensions as usize).enumerate() {
        let lookup_offset = v as u64;

        let mut last = 0.0;
        let mut index_divisor = 1u64;

        for value in value_vector.iter_mut() {
            let multiplicand_offset =
                ((lookup_offset / index_divisor) % u64::from(lookup_values)) as usize;

            *value = f32::from(multiplicands[multiplicand_offset]) * delta_value + min_value + last;

            if sequence_p {
                last = *value;
            }

            index_divisor = index_divisor.saturating_mul(u64::from(lookup_values));
        }
    }

    vq_lookup
}

/// As defined in section 3.2.1 of the Vorbis I specification.
fn unpack_vq_lookup_type2(
    multiplicands: &[u16],
    min_value: f32,
    delta_value: f32,
    sequence_p: bool,
    codebook_dimensions: u16,
) -> Vec<f32> {
    let mut vq_lookup = vec![0.0; multiplicands.len()];

    for (value_vector, mults) in vq_lookup
        .chunks_exact_mut(codebook_dimensions as usize)
        .zip(multiplicands.chunks_exact(codebook_dimensions as usize))
    {
        let mut last = 0.0;

        for (value, &mult) in value_vector.iter_mut().zip(mults) {
            *value = f32::from(mult) * delta_value + min_value + last;

            if sequence_p {
                last = *value;
            }
        }
    }

    vq_lookup
}

/// Assigns canonical codewords to each used entry in a codebook given the codeword lengths.
///
/// The returned codewords are `len` bits long and are read most-significant bit first. Unused
/// entries (length 0) are assigned a codeword of 0.
///
/// The next available codeword of every length is tracked left-aligned in a 32-bit word. When an
/// entry requests a length for which no codeword is available, the longest shorter codeword that
/// is available is split. If none is, the tree is overspecified. Underspecified trees are allowed.
fn compute_codewords(code_lens: &[u8]) -> Result<Vec<u32>> {
    let mut codewords = vec![0u32; code_lens.len()];

    let first = match code_lens.iter().position(|&len| len > 0) {
        Some(first) => first,
        // All entries are unused.
        None => return Ok(codewords),
    };

    let mut available = [0u32; 32];

    // The first used entry takes the left-most leaf, codeword 0. The right siblings of every node
    // on its path become available.
    for (i, avail) in available.iter_mut().enumerate().take(usize::from(code_lens[first]) + 1).skip(1)
    {
        *avail = 1 << (32 - i);
    }

    for (entry, &len) in code_lens.iter().enumerate().skip(first + 1) {
        if len == 0 {
            continue;
        }

        let len = usize::from(len);

        // Find the deepest available node at or above the requested depth. An available codeword
        // of 0 would belong to the first entry, so it can never be available.
        let mut z = len;

        while z > 0 && available[z] == 0 {
            z -= 1;
        }

        if z == 0 {
            return setup_error("vorbis: codebook overspecified");
        }

        let res = available[z];
        available[z] = 0;

        codewords[entry] = res >> (32 - len);

        // Split the node, making the right siblings along the new path available.
        for (y, avail) in available.iter_mut().enumerate().take(len + 1).skip(z + 1) {
            *avail = res + (1 << (32 - y));
        }
    }

    Ok(codewords)
}

/// A codeword too long to be resolved by the fast lookup table.
#[derive(Copy, Clone, Debug)]
struct LongCodeword {
    /// The codeword, most-significant bit first, left-aligned in 32 bits.
    aligned: u32,
    len: u8,
    entry: u32,
}

pub struct VorbisCodebook {
    dimensions: u16,
    entries: u32,
    /// Codeword length of each entry, 0 if unused.
    code_lens: Box<[u8]>,
    /// Maps the next `FAST_LOOKUP_BITS` of the bitstream to an entry.
    fast_lookup: Box<[u32]>,
    /// Codewords longer than `FAST_LOOKUP_BITS`, sorted by their left-aligned value.
    long_codewords: Box<[LongCodeword]>,
    /// The unpacked VQ vectors, `dimensions` values per entry.
    vq_vec: Option<Box<[f32]>>,
}

impl VorbisCodebook {
    pub fn read<B: ReadBitsRtl>(bs: &mut B) -> Result<Self> {
        // Verify codebook synchronization word.
        let sync = bs.read_bits_leq32(24)?;

        if sync != 0x564342 {
            return setup_error("vorbis: invalid codebook sync");
        }

        // Read codebook number of dimensions and entries.
        let codebook_dimensions = bs.read_bits_leq32(16)? as u16;
        let codebook_entries = bs.read_bits_leq32(24)?;

        if codebook_dimensions == 0 && codebook_entries != 0 {
            return setup_error("vorbis: codebook has no dimensions");
        }

        // Ordered flag.
        let is_length_ordered = bs.read_bit()?;

        let mut code_lens = Vec::<u8>::with_capacity(codebook_entries as usize);

        if !is_length_ordered {
            // Codeword list is not length ordered.
            let is_sparse = bs.read_bit()?;

            for _ in 0..codebook_entries {
                let is_used = !is_sparse || bs.read_bit()?;

                let code_len = if is_used {
                    let len = bs.read_bits_leq32(5)? as u8 + 1;

                    if len == 32 {
                        return setup_error("vorbis: codeword length exceeds 31 bits");
                    }

                    len
                }
                else {
                    // Unused entries have a length of 0.
                    0
                };

                code_lens.push(code_len);
            }
        }
        else {
            // Codeword list is length ordered.
            let mut cur_entry = 0;
            let mut cur_len = bs.read_bits_leq32(5)? + 1;

            while cur_entry < codebook_entries {
                if cur_len >= 32 {
                    return setup_error("vorbis: codeword length exceeds 31 bits");
                }

                let num = bs.read_bits_leq32(ilog(codebook_entries - cur_entry))?;

                if num > codebook_entries - cur_entry {
                    return setup_error("vorbis: codeword length run exceeds entries");
                }

                code_lens.extend(std::iter::repeat(cur_len as u8).take(num as usize));

                cur_len += 1;
                cur_entry += num;
            }
        }

        // Read and unpack vector quantization (VQ) lookup table.
        let lookup_type = bs.read_bits_leq32(4)?;

        let vq_vec = match lookup_type {
            0 => None,
            1 | 2 => {
                let min_value = float32_unpack(bs.read_bits_leq32(32)?);
                let delta_value = float32_unpack(bs.read_bits_leq32(32)?);
                let value_bits = bs.read_bits_leq32(4)? + 1;
                let sequence_p = bs.read_bit()?;

                let vq_values = u64::from(codebook_entries) * u64::from(codebook_dimensions);

                if vq_values > MAX_VQ_VALUES {
                    return setup_error("vorbis: codebook vq table too large");
                }

                let lookup_values = if lookup_type == 1 {
                    lookup1_values(codebook_entries, codebook_dimensions)
                }
                else {
                    vq_values as u32
                };

                if lookup_values == 0 {
                    return setup_error("vorbis: codebook has no lookup values");
                }

                let mut multiplicands = Vec::<u16>::with_capacity(lookup_values as usize);

                for _ in 0..lookup_values {
                    multiplicands.push(bs.read_bits_leq32(value_bits)? as u16);
                }

                let vq_lookup = if lookup_type == 1 {
                    unpack_vq_lookup_type1(
                        &multiplicands,
                        min_value,
                        delta_value,
                        sequence_p,
                        codebook_entries,
                        codebook_dimensions,
                        lookup_values,
                    )
                }
                else {
                    unpack_vq_lookup_type2(
                        &multiplicands,
                        min_value,
                        delta_value,
                        sequence_p,
                        codebook_dimensions,
                    )
                };

                Some(vq_lookup.into_boxed_slice())
            }
            _ => return setup_error("vorbis: invalid codeword lookup type"),
        };

        Self::build(codebook_dimensions, code_lens, vq_vec)
    }

    /// Generates the codewords and lookup structures of a codebook.
    fn build(dimensions: u16, code_lens: Vec<u8>, vq_vec: Option<Box<[f32]>>) -> Result<Self> {
        let codewords = compute_codewords(&code_lens)?;

        let mut fast_lookup = vec![NO_ENTRY; FAST_LOOKUP_SIZE].into_boxed_slice();
        let mut long_codewords = Vec::new();

        for (entry, (&len, &codeword)) in code_lens.iter().zip(&codewords).enumerate() {
            if len == 0 {
                continue;
            }

            if u32::from(len) <= FAST_LOOKUP_BITS {
                // The bitstream is read least-significant bit first, so index the table with the
                // bit-reversed codeword and fill every slot sharing it as a prefix.
                let mut idx = (codeword.reverse_bits() >> (32 - u32::from(len))) as usize;

                while idx < FAST_LOOKUP_SIZE {
                    fast_lookup[idx] = entry as u32;
                    idx += 1 << len;
                }
            }
            else {
                long_codewords.push(LongCodeword {
                    aligned: codeword << (32 - u32::from(len)),
                    len,
                    entry: entry as u32,
                });
            }
        }

        long_codewords.sort_unstable_by_key(|c| c.aligned);

        debug!(
            "vorbis: codebook with {} entries, {} dimensions, {} long codewords",
            code_lens.len(),
            dimensions,
            long_codewords.len()
        );

        Ok(VorbisCodebook {
            dimensions,
            entries: code_lens.len() as u32,
            code_lens: code_lens.into_boxed_slice(),
            fast_lookup,
            long_codewords: long_codewords.into_boxed_slice(),
            vq_vec,
        })
    }

    /// Finds the long codeword that prefixes the peeked bits.
    fn search(&self, peeked: u32) -> Option<&LongCodeword> {
        // Codewords are stored most-significant bit first.
        let key = peeked.reverse_bits();

        let is_prefix = |c: &LongCodeword| (key ^ c.aligned) >> (32 - u32::from(c.len)) == 0;

        if self.entries <= LINEAR_SEARCH_MAX_ENTRIES {
            return self.long_codewords.iter().find(|c| is_prefix(c));
        }

        // In a prefix-free code, the only codeword that can prefix the key is the greatest codeword
        // that does not exceed it.
        let idx = self.long_codewords.partition_point(|c| c.aligned <= key);

        self.long_codewords[..idx].last().filter(|c| is_prefix(c))
    }

    /// Decodes the next entry from the bitstream.
    ///
    /// Returns an end-of-bitstream error if the packet ends before the codeword does, or a decode
    /// error if the bits do not form a valid codeword.
    #[inline(always)]
    pub fn read_scalar<B: ReadBitsRtl>(&self, bs: &mut B) -> Result<u32> {
        bs.fill_lookahead();

        let peeked = bs.peek_lookahead();

        let entry = self.fast_lookup[peeked as usize & (FAST_LOOKUP_SIZE - 1)];

        let (entry, len) = if entry != NO_ENTRY {
            (entry, u32::from(self.code_lens[entry as usize]))
        }
        else {
            match self.search(peeked) {
                Some(c) => (c.entry, u32::from(c.len)),
                None => {
                    // Garbage past the end of the packet is the end of the packet, not an
                    // invalid codeword.
                    if bs.lookahead_len() < 32 {
                        bs.consume_lookahead(32)?;
                    }
                    return decode_error("vorbis: invalid codeword");
                }
            }
        };

        // Fails if the codeword runs past the end of the packet.
        bs.consume_lookahead(len)?;

        Ok(entry)
    }

    /// Decodes the next entry from the bitstream and returns its VQ vector.
    #[inline(always)]
    pub fn read_vq<B: ReadBitsRtl>(&self, bs: &mut B) -> Result<&[f32]> {
        let entry = self.read_scalar(bs)?;

        if let Some(vq) = &self.vq_vec {
            let dim = usize::from(self.dimensions);
            let start = dim * entry as usize;

            Ok(&vq[start..start + dim])
        }
        else {
            decode_error("vorbis: not a vq codebook")
        }
    }

    #[inline(always)]
    pub fn dimensions(&self) -> u16 {
        self.dimensions
    }

    #[inline(always)]
    pub fn entries(&self) -> u32 {
        self.entries
    }

    #[inline(always)]
    pub fn is_vq(&self) -> bool {
        self.vq_vec.is_some()
    }
}
