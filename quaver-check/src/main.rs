// Quaver Check Tool
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]
// Justification: Fields on DecoderOptions may change at any time, but quaver-check doesn't want to
// be updated every time those fields change, therefore always fill in the remaining fields with
// default values.
#![allow(clippy::needless_update)]

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use quaver::{Decoder, DecoderOptions, Error, Result};

use clap::Parser;
use log::{info, warn};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Check that Quaver decodes a file identically in pull mode, push mode, and after seeking.
#[derive(Parser)]
#[command(name = "Quaver Check", version, about)]
struct Args {
    /// The input file path.
    input: PathBuf,

    /// The number of bytes pushed at a time when decoding in push mode.
    #[arg(long, short = 'c', default_value_t = 4096)]
    chunk: usize,

    /// The number of random seeks to check.
    #[arg(long, short = 's', default_value_t = 32)]
    seeks: usize,

    /// The seed for the random seek positions.
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Write the decoded audio to this path as raw interleaved signed 16-bit little-endian PCM.
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Verify the CRC of every page.
    #[arg(long)]
    verify_crc: bool,

    /// Only print test results.
    #[arg(long, short = 'q')]
    quiet: bool,
}

#[derive(Default)]
struct TestResult {
    n_frames: u64,
    n_samples: u64,
    n_decode_errors: u64,
    push_mismatch: Option<u64>,
    n_seeks: u64,
    n_failed_seeks: u64,
}

/// The audio decoded from the entire stream in pull mode.
struct Reference {
    channels: usize,
    planes: Vec<Vec<f32>>,
}

fn decode_pull(args: &Args, opts: &DecoderOptions, acct: &mut TestResult) -> Result<Reference> {
    let mut decoder = Decoder::open_file(&args.input, opts)?;

    // The headers are read when a file is opened.
    let info = decoder.info().unwrap();

    if !args.quiet {
        println!("  Channels:       {}", info.channels);
        println!("  Sample Rate:    {}", info.sample_rate);
        println!("  Max Frame Size: {}", info.max_frame_size);

        if let Some(comments) = decoder.comments() {
            println!("  Vendor:         {}", comments.vendor);

            for comment in comments.comments.iter() {
                println!("  Comment:        {}", comment);
            }
        }

        println!();
    }

    let mut writer = match &args.output {
        Some(path) => Some(BufWriter::new(File::create(path)?)),
        None => None,
    };

    let mut planes = vec![Vec::new(); info.channels];
    let mut pcm = Vec::new();

    loop {
        let frame = match decoder.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(Error::IoError(err)) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                warn!("stream ended unexpectedly");
                break;
            }
            Err(Error::DecodeError(err)) => {
                warn!("{}", err);
                acct.n_decode_errors += 1;
                continue;
            }
            Err(err) => return Err(err),
        };

        for (plane, samples) in planes.iter_mut().zip(frame.planes()) {
            plane.extend_from_slice(samples);
        }

        if let Some(writer) = writer.as_mut() {
            pcm.resize(frame.len() * info.channels, 0);
            frame.copy_interleaved_i16(info.channels, &mut pcm);

            for sample in pcm.iter() {
                writer.write_all(&sample.to_le_bytes())?;
            }
        }

        acct.n_frames += 1;
        acct.n_samples += frame.len() as u64;
    }

    if let Some(mut writer) = writer {
        writer.flush()?;
    }

    Ok(Reference { channels: info.channels, planes })
}

/// Decodes the file in push mode, and returns the position of the first sample that differs from
/// the reference.
fn check_push(args: &Args, opts: &DecoderOptions, reference: &Reference) -> Result<Option<u64>> {
    let data = std::fs::read(&args.input)?;

    let mut decoder = Decoder::new_push(opts);

    let mut pos = 0;

    for chunk in data.chunks(args.chunk.max(1)) {
        decoder.push(chunk)?;

        loop {
            let frame = match decoder.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) | Err(Error::NeedMoreData) => break,
                Err(Error::DecodeError(err)) => {
                    warn!("push: {}", err);
                    continue;
                }
                Err(err) => return Err(err),
            };

            for (ch, samples) in frame.planes().iter().enumerate() {
                let expected = reference.planes[ch].get(pos..pos + samples.len());

                if expected != Some(*samples) {
                    return Ok(Some(pos as u64));
                }
            }

            pos += frame.len();
        }
    }

    if pos != reference.planes.first().map_or(0, |plane| plane.len()) {
        return Ok(Some(pos as u64));
    }

    Ok(None)
}

/// Seeks to random positions and compares the first frame decoded after each seek with the
/// reference.
fn check_seeks(
    args: &Args,
    opts: &DecoderOptions,
    reference: &Reference,
    acct: &mut TestResult,
) -> Result<()> {
    let mut decoder = Decoder::open_file(&args.input, opts)?;

    let total = decoder.stream_length_in_samples()?;

    if total == 0 {
        warn!("stream length is unknown, skipping seek checks");
        return Ok(());
    }

    let mut rng = SmallRng::seed_from_u64(args.seed);

    for _ in 0..args.seeks {
        let target = rng.random_range(0..total);

        acct.n_seeks += 1;

        if let Err(err) = decoder.seek(target) {
            println!("[FAIL] seek to {:>12}: {}", target, err);
            acct.n_failed_seeks += 1;
            continue;
        }

        let frame = match decoder.next_frame()? {
            Some(frame) => frame,
            None => {
                println!("[FAIL] seek to {:>12}: no frame", target);
                acct.n_failed_seeks += 1;
                continue;
            }
        };

        let start = target as usize;

        let is_match = (0..reference.channels).all(|ch| {
            reference.planes[ch].get(start..start + frame.len()) == Some(frame.plane(ch))
        });

        if is_match {
            info!("seek to {} matched {} samples", target, frame.len());
        }
        else {
            if !args.quiet {
                println!("[FAIL] seek to {:>12}: samples differ", target);
            }
            acct.n_failed_seeks += 1;
        }
    }

    Ok(())
}

fn run_test(args: &Args, acct: &mut TestResult) -> Result<()> {
    let opts = DecoderOptions { verify_page_crc: args.verify_crc, ..Default::default() };

    // 1. Decode the entire file in pull mode.
    let reference = decode_pull(args, &opts, acct)?;

    // 2. Decode it again in push mode.
    acct.push_mismatch = check_push(args, &opts, &reference)?;

    // 3. Seek.
    check_seeks(args, &opts, &reference, acct)
}

fn main() {
    pretty_env_logger::init();

    let args = Args::parse();

    let mut res: TestResult = Default::default();

    println!("Input Path: {}", args.input.display());
    println!();

    if let Err(err) = run_test(&args, &mut res) {
        eprintln!("Test interrupted by error: {}", err);
        std::process::exit(2);
    }

    println!("Test Results");
    println!("=================================================");
    println!();
    println!("  Frames/Samples Decoded: {:>12}/{:>12}", res.n_frames, res.n_samples);
    println!("  Decode Errors:          {:>12}", res.n_decode_errors);
    match res.push_mismatch {
        Some(pos) => println!("  Push Mode:              differs at sample {}", pos),
        None => println!("  Push Mode:              identical"),
    }
    println!("  Failed/Total Seeks:     {:>12}/{:>12}", res.n_failed_seeks, res.n_seeks);
    println!();

    let ret = if res.push_mismatch.is_none() && res.n_failed_seeks == 0 {
        println!("PASS");
        0
    }
    else {
        println!("FAIL");
        1
    };
    println!();

    std::process::exit(ret);
}
