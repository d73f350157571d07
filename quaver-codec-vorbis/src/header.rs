// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use quaver_core::errors::{limit_error, setup_error, Result};
use quaver_core::io::{PacketReader, ReadBytes};

use log::{debug, warn};

/// The packet type for an identification header.
pub const VORBIS_PACKET_TYPE_IDENTIFICATION: u8 = 1;
/// The packet type for a comment header.
pub const VORBIS_PACKET_TYPE_COMMENT: u8 = 3;
/// The packet type for a setup header.
pub const VORBIS_PACKET_TYPE_SETUP: u8 = 5;

/// The common header packet signature.
const VORBIS_HEADER_PACKET_SIGNATURE: &[u8] = b"vorbis";

/// The Vorbis version supported by this decoder.
const VORBIS_VERSION: u32 = 0;

/// The length of an identification header.
const VORBIS_IDENT_HEADER_LEN: usize = 30;

/// The minimum block size (64) expressed as a power-of-2 exponent.
const VORBIS_BLOCKSIZE_MIN: u8 = 6;
/// The maximum block size (8192) expressed as a power-of-2 exponent.
const VORBIS_BLOCKSIZE_MAX: u8 = 13;

/// The Vorbis identification header.
#[derive(Clone, Debug)]
pub struct IdentHeader {
    pub n_channels: u8,
    pub sample_rate: u32,
    pub bitrate_max: i32,
    pub bitrate_nominal: i32,
    pub bitrate_min: i32,
    pub bs0_exp: u8,
    pub bs1_exp: u8,
}

impl IdentHeader {
    /// The short block size.
    pub fn blocksize0(&self) -> usize {
        1 << self.bs0_exp
    }

    /// The long block size.
    pub fn blocksize1(&self) -> usize {
        1 << self.bs1_exp
    }
}

/// The vendor string and user comments of a comment header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Comments {
    pub vendor: String,
    /// User comments, typically of the form `FIELD=value`.
    pub comments: Vec<String>,
}

impl Comments {
    /// Gets the values of all comments with the field name `field`. Field names are compared
    /// case-insensitively.
    pub fn get<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.comments.iter().filter_map(move |comment| {
            let (key, value) = comment.split_once('=')?;
            if key.eq_ignore_ascii_case(field) {
                Some(value)
            }
            else {
                None
            }
        })
    }
}

/// Reads the packet type and signature common to all header packets.
pub fn read_common_header(reader: &mut PacketReader<'_>, packet_type: u8) -> Result<()> {
    match reader.read_byte() {
        Ok(ty) if ty == packet_type => (),
        _ => return setup_error("vorbis: invalid packet type for header"),
    }

    let mut packet_sig_buf = [0; 6];

    if reader.read_buf_exact(&mut packet_sig_buf).is_err()
        || packet_sig_buf != VORBIS_HEADER_PACKET_SIGNATURE
    {
        return setup_error("vorbis: invalid header signature");
    }

    Ok(())
}

/// Reads and validates an identification header. A stream with more than `max_channels` channels
/// is rejected.
pub fn read_ident_header(buf: &[u8], max_channels: usize) -> Result<IdentHeader> {
    if buf.len() != VORBIS_IDENT_HEADER_LEN {
        return setup_error("vorbis: invalid identification header length");
    }

    let mut reader = PacketReader::new(buf);

    read_common_header(&mut reader, VORBIS_PACKET_TYPE_IDENTIFICATION)?;

    // The length was checked above, so the remaining reads cannot underrun.
    let version = reader.read_u32()?;

    if version != VORBIS_VERSION {
        return setup_error("vorbis: only vorbis 1 is supported");
    }

    // Next, the number of channels and sample rate must be non-zero.
    let n_channels = reader.read_byte()?;

    if n_channels == 0 {
        return setup_error("vorbis: number of channels cannot be 0");
    }

    if usize::from(n_channels) > max_channels {
        return limit_error("vorbis: too many channels");
    }

    let sample_rate = reader.read_u32()?;

    if sample_rate == 0 {
        return setup_error("vorbis: sample rate cannot be 0");
    }

    let bitrate_max = reader.read_i32()?;
    let bitrate_nominal = reader.read_i32()?;
    let bitrate_min = reader.read_i32()?;

    // Next, blocksize_0 and blocksize_1 are packed into a single byte.
    let block_sizes = reader.read_byte()?;

    let bs0_exp = (block_sizes & 0x0f) >> 0;
    let bs1_exp = (block_sizes & 0xf0) >> 4;

    // The block sizes must not exceed the bounds.
    if bs0_exp < VORBIS_BLOCKSIZE_MIN || bs0_exp > VORBIS_BLOCKSIZE_MAX {
        return setup_error("vorbis: blocksize_0 out-of-bounds");
    }

    if bs1_exp < VORBIS_BLOCKSIZE_MIN || bs1_exp > VORBIS_BLOCKSIZE_MAX {
        return setup_error("vorbis: blocksize_1 out-of-bounds");
    }

    // Blocksize_0 must be <= blocksize_1
    if bs0_exp > bs1_exp {
        return setup_error("vorbis: blocksize_0 exceeds blocksize_1");
    }

    // Framing flag must be set.
    if reader.read_byte()? & 0x1 != 0x1 {
        return setup_error("vorbis: ident header framing flag unset");
    }

    debug!(
        "vorbis: channels={}, sample_rate={}, blocksizes=({}, {})",
        n_channels,
        sample_rate,
        1 << bs0_exp,
        1 << bs1_exp
    );

    Ok(IdentHeader {
        n_channels,
        sample_rate,
        bitrate_max,
        bitrate_nominal,
        bitrate_min,
        bs0_exp,
        bs1_exp,
    })
}

/// Reads a comment header. Only the packet type and signature are validated. A truncated or
/// malformed comment list ends the list.
pub fn read_comment_header(buf: &[u8]) -> Result<Comments> {
    let mut reader = PacketReader::new(buf);

    read_common_header(&mut reader, VORBIS_PACKET_TYPE_COMMENT)?;

    let mut comments: Comments = Default::default();

    let vendor = match read_comment_string(&mut reader) {
        Some(vendor) => vendor,
        None => {
            warn!("vorbis: truncated vendor string");
            return Ok(comments);
        }
    };

    comments.vendor = vendor;

    let count = match reader.read_u32() {
        Ok(count) => count,
        Err(_) => return Ok(comments),
    };

    for _ in 0..count {
        match read_comment_string(&mut reader) {
            Some(comment) => comments.comments.push(comment),
            None => {
                warn!("vorbis: truncated comment list");
                break;
            }
        }
    }

    Ok(comments)
}

fn read_comment_string(reader: &mut PacketReader<'_>) -> Option<String> {
    let len = reader.read_u32().ok()? as usize;

    // The length is checked against the remaining bytes before anything is allocated.
    if len > reader.remaining().len() {
        return None;
    }

    let bytes = reader.read_bytes(len).ok()?;

    Some(String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quaver_core::errors::Error;

    fn ident(channels: u8, rate: u32, block_sizes: u8, framing: u8) -> Vec<u8> {
        let mut buf = vec![1];
        buf.extend_from_slice(b"vorbis");
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.push(channels);
        buf.extend_from_slice(&rate.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.extend_from_slice(&128_000i32.to_le_bytes());
        buf.extend_from_slice(&0i32.to_le_bytes());
        buf.push(block_sizes);
        buf.push(framing);
        buf
    }

    fn comment(vendor: &str, comments: &[&str]) -> Vec<u8> {
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

    #[test]
    fn verify_read_ident_header() {
        let header = read_ident_header(&ident(2, 44100, 0xb8, 1), 16).unwrap();

        assert_eq!(header.n_channels, 2);
        assert_eq!(header.sample_rate, 44100);
        assert_eq!(header.bitrate_nominal, 128_000);
        assert_eq!(header.blocksize0(), 256);
        assert_eq!(header.blocksize1(), 2048);
    }

    #[test]
    fn verify_ident_header_errors() {
        let setup_err = |buf: &[u8]| matches!(read_ident_header(buf, 16), Err(Error::SetupError(_)));

        // Channels, sample rate, block sizes, and framing.
        assert!(setup_err(&ident(0, 44100, 0xb8, 1)));
        assert!(setup_err(&ident(2, 0, 0xb8, 1)));
        assert!(setup_err(&ident(2, 44100, 0x8b, 1)));
        assert!(setup_err(&ident(2, 44100, 0xb5, 1)));
        assert!(setup_err(&ident(2, 44100, 0xe8, 1)));
        assert!(setup_err(&ident(2, 44100, 0xb8, 0)));

        // Wrong length.
        assert!(setup_err(&ident(2, 44100, 0xb8, 1)[..29]));

        // Wrong packet type and version.
        let mut buf = ident(2, 44100, 0xb8, 1);
        buf[0] = 3;
        assert!(setup_err(&buf));

        let mut buf = ident(2, 44100, 0xb8, 1);
        buf[7] = 1;
        assert!(setup_err(&buf));

        // Too many channels.
        assert!(matches!(read_ident_header(&ident(17, 44100, 0xb8, 1), 16), Err(Error::LimitError(_))));
        assert!(read_ident_header(&ident(17, 44100, 0xb8, 1), 17).is_ok());
    }

    #[test]
    fn verify_read_comment_header() {
        let comments =
            read_comment_header(&comment("quaver", &["TITLE=Test", "artist=Someone"])).unwrap();

        assert_eq!(comments.vendor, "quaver");
        assert_eq!(comments.comments.len(), 2);
        assert_eq!(comments.get("ARTIST").collect::<Vec<_>>(), vec!["Someone"]);
        assert_eq!(comments.get("title").collect::<Vec<_>>(), vec!["Test"]);

        // A truncated list keeps what was read.
        let buf = comment("quaver", &["TITLE=Test", "ARTIST=Someone"]);
        let comments = read_comment_header(&buf[..buf.len() - 10]).unwrap();
        assert_eq!(comments.comments, vec!["TITLE=Test".to_string()]);

        // Only the packet type and signature are fatal.
        assert!(read_comment_header(b"\x03vorbis").is_ok());
        assert!(matches!(read_comment_header(b"\x01vorbis"), Err(Error::SetupError(_))));
        assert!(matches!(read_comment_header(b"\x03vorbiz"), Err(Error::SetupError(_))));
    }
}
