// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::io;

use quaver_core::errors::{setup_error, Error, Result};
use quaver_core::io::{BitReaderRtl, PacketReader, ReadBitsRtl};

use log::debug;

use super::codebook::VorbisCodebook;
use super::common::*;
use super::floor::{read_floor, Floor1};
use super::header::{read_common_header, IdentHeader, VORBIS_PACKET_TYPE_SETUP};
use super::residue::Residue;

#[derive(Debug)]
pub struct ChannelCouple {
    pub magnitude_ch: u8,
    pub angle_ch: u8,
}

#[derive(Debug)]
pub struct SubMap {
    pub floor: u8,
    pub residue: u8,
}

#[derive(Debug)]
pub struct Mapping {
    pub couplings: Vec<ChannelCouple>,
    pub multiplex: Vec<u8>,
    pub submaps: Vec<SubMap>,
}

#[derive(Debug)]
pub struct Mode {
    pub block_flag: bool,
    pub mapping: u8,
}

/// The decoding tables of a setup header.
pub struct Setup {
    pub codebooks: Vec<VorbisCodebook>,
    pub floors: Vec<Floor1>,
    pub residues: Vec<Residue>,
    pub mappings: Vec<Mapping>,
    pub modes: Vec<Mode>,
}

/// Reads a setup header.
///
/// Every malformation, including a setup header that ends early, is a setup error.
pub fn read_setup(buf: &[u8], ident: &IdentHeader) -> Result<Setup> {
    let mut reader = PacketReader::new(buf);

    read_common_header(&mut reader, VORBIS_PACKET_TYPE_SETUP)?;

    // The remaining portion of the setup header packet is read bitwise.
    let mut bs = BitReaderRtl::new(reader.remaining());

    match read_setup_tables(&mut bs, ident) {
        Err(Error::IoError(err)) if err.kind() == io::ErrorKind::UnexpectedEof => {
            setup_error("vorbis: setup header truncated")
        }
        result => result,
    }
}

fn read_setup_tables(bs: &mut BitReaderRtl<'_>, ident: &IdentHeader) -> Result<Setup> {
    // Read codebooks.
    let codebooks = read_codebooks(bs)?;

    // Read time-domain transforms (placeholders in Vorbis 1).
    read_time_domain_transforms(bs)?;

    // Read floors.
    let floors = read_floors(bs, codebooks.len())?;

    // Read residues.
    let residues = read_residues(bs, &codebooks)?;

    // Read channel mappings.
    let mappings = read_mappings(bs, ident.n_channels, floors.len(), residues.len())?;

    // Read modes.
    let modes = read_modes(bs, mappings.len())?;

    // Framing flag must be set.
    if !bs.read_bit()? {
        return setup_error("vorbis: setup header framing flag unset");
    }

    if bs.bits_left() > 0 {
        debug!("vorbis: leftover bits in setup header");
    }

    debug!(
        "vorbis: setup has {} codebooks, {} floors, {} residues, {} mappings, {} modes",
        codebooks.len(),
        floors.len(),
        residues.len(),
        mappings.len(),
        modes.len()
    );

    Ok(Setup { codebooks, floors, residues, mappings, modes })
}

fn read_codebooks(bs: &mut BitReaderRtl<'_>) -> Result<Vec<VorbisCodebook>> {
    let count = bs.read_bits_leq32(8)? + 1;
    (0..count).map(|_| VorbisCodebook::read(bs)).collect()
}

fn read_time_domain_transforms(bs: &mut BitReaderRtl<'_>) -> Result<()> {
    let count = bs.read_bits_leq32(6)? + 1;

    for _ in 0..count {
        // All these values are placeholders and must be 0.
        if bs.read_bits_leq32(16)? != 0 {
            return setup_error("vorbis: invalid time domain tranform");
        }
    }

    Ok(())
}

fn read_floors(bs: &mut BitReaderRtl<'_>, max_codebook: usize) -> Result<Vec<Floor1>> {
    let count = bs.read_bits_leq32(6)? + 1;
    (0..count).map(|_| read_floor(bs, max_codebook)).collect()
}

fn read_residues(bs: &mut BitReaderRtl<'_>, codebooks: &[VorbisCodebook]) -> Result<Vec<Residue>> {
    let count = bs.read_bits_leq32(6)? + 1;
    (0..count).map(|_| read_residue(bs, codebooks)).collect()
}

fn read_residue(bs: &mut BitReaderRtl<'_>, codebooks: &[VorbisCodebook]) -> Result<Residue> {
    let residue_type = bs.read_bits_leq32(16)? as u16;

    match residue_type {
        0..=2 => Residue::read_setup(bs, residue_type, codebooks),
        _ => setup_error("vorbis: invalid residue type"),
    }
}

fn read_mappings(
    bs: &mut BitReaderRtl<'_>,
    audio_channels: u8,
    max_floor: usize,
    max_residue: usize,
) -> Result<Vec<Mapping>> {
    let count = bs.read_bits_leq32(6)? + 1;
    (0..count).map(|_| read_mapping(bs, audio_channels, max_floor, max_residue)).collect()
}

fn read_mapping(
    bs: &mut BitReaderRtl<'_>,
    audio_channels: u8,
    max_floor: usize,
    max_residue: usize,
) -> Result<Mapping> {
    let mapping_type = bs.read_bits_leq32(16)?;

    match mapping_type {
        0 => read_mapping_type0(bs, audio_channels, max_floor, max_residue),
        _ => setup_error("vorbis: invalid mapping type"),
    }
}

fn read_mapping_type0(
    bs: &mut BitReaderRtl<'_>,
    audio_channels: u8,
    max_floor: usize,
    max_residue: usize,
) -> Result<Mapping> {
    let num_submaps = if bs.read_bit()? { bs.read_bits_leq32(4)? as u8 + 1 } else { 1 };

    let mut couplings = Vec::new();

    if bs.read_bit()? {
        // Number of channel couplings (up-to 256).
        let coupling_steps = bs.read_bits_leq32(8)? as u16 + 1;

        if coupling_steps > u16::from(audio_channels) {
            return setup_error("vorbis: too many channel couplings");
        }

        couplings.reserve_exact(usize::from(coupling_steps));

        // The maximum channel number.
        let max_ch = audio_channels - 1;

        // The number of bits to read for the magnitude and angle channel numbers. Never exceeds 8.
        let coupling_bits = ilog(u32::from(max_ch));

        for _ in 0..coupling_steps {
            let magnitude_ch = bs.read_bits_leq32(coupling_bits)? as u8;
            let angle_ch = bs.read_bits_leq32(coupling_bits)? as u8;

            // Ensure the channels to be coupled are not the same, and that neither channel number
            // exceeds the maximum channel in the stream.
            if magnitude_ch == angle_ch || magnitude_ch > max_ch || angle_ch > max_ch {
                return setup_error("vorbis: invalid channel coupling");
            }

            couplings.push(ChannelCouple { magnitude_ch, angle_ch });
        }
    }

    if bs.read_bits_leq32(2)? != 0 {
        return setup_error("vorbis: reserved mapping bits non-zero");
    }

    let mut multiplex = Vec::with_capacity(usize::from(audio_channels));

    // If the number of submaps is > 1 read the multiplex numbers from the bitstream, otherwise
    // they're all 0.
    if num_submaps > 1 {
        for _ in 0..audio_channels {
            let mux = bs.read_bits_leq32(4)? as u8;

            if mux >= num_submaps {
                return setup_error("vorbis: invalid channel multiplex");
            }

            multiplex.push(mux);
        }
    }
    else {
        multiplex.resize(usize::from(audio_channels), 0);
    }

    let mut submaps = Vec::with_capacity(usize::from(num_submaps));

    for _ in 0..num_submaps {
        // Unused time configuration placeholder.
        let _ = bs.read_bits_leq32(8)?;

        let floor = bs.read_bits_leq32(8)? as u8;

        if usize::from(floor) >= max_floor {
            return setup_error("vorbis: invalid floor for mapping");
        }

        let residue = bs.read_bits_leq32(8)? as u8;

        if usize::from(residue) >= max_residue {
            return setup_error("vorbis: invalid residue for mapping");
        }

        submaps.push(SubMap { floor, residue });
    }

    Ok(Mapping { couplings, multiplex, submaps })
}

fn read_modes(bs: &mut BitReaderRtl<'_>, max_mapping: usize) -> Result<Vec<Mode>> {
    let count = bs.read_bits_leq32(6)? + 1;
    (0..count).map(|_| read_mode(bs, max_mapping)).collect()
}

fn read_mode(bs: &mut BitReaderRtl<'_>, max_mapping: usize) -> Result<Mode> {
    let block_flag = bs.read_bit()?;
    let window_type = bs.read_bits_leq32(16)? as u16;
    let transform_type = bs.read_bits_leq32(16)? as u16;
    let mapping = bs.read_bits_leq32(8)? as u8;

    // Only window type 0 is allowed in Vorbis 1 (section 4.2.4).
    if window_type != 0 {
        return setup_error("vorbis: invalid window type for mode");
    }

    // Only transform type 0 is allowed in Vorbis 1 (section 4.2.4).
    if transform_type != 0 {
        return setup_error("vorbis: invalid transform type for mode");
    }

    if usize::from(mapping) >= max_mapping {
        return setup_error("vorbis: invalid mode mapping");
    }

    Ok(Mode { block_flag, mapping })
}
