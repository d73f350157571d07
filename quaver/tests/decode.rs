// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

mod common;

use common::{decode_pull, decode_push, without_empty_frames, StreamBuilder, BS0, BS1, SAMPLE_RATE};

use quaver::core::conv::f32_to_i16;
use quaver::{Decoder, DecoderOptions, Error, ErrorCode, Info};

#[test]
fn verify_open_info_and_comments() {
    let buf = StreamBuilder::new(2, 8).comment("TITLE=Quaver").comment("artist=Tester").build();

    let decoder = Decoder::open_memory(buf, &Default::default()).unwrap();

    assert_eq!(
        decoder.info(),
        Some(Info { channels: 2, sample_rate: SAMPLE_RATE, max_frame_size: (3 * BS1 - BS0) / 4 })
    );

    let comments = decoder.comments().unwrap();

    assert_eq!(comments.vendor, "quaver test encoder");
    assert_eq!(comments.comments.len(), 2);
    assert_eq!(comments.get("title").collect::<Vec<_>>(), ["Quaver"]);
    assert_eq!(comments.get("ARTIST").collect::<Vec<_>>(), ["Tester"]);
    assert_eq!(comments.get("album").count(), 0);
}

#[test]
fn verify_three_packet_stream() {
    // Three long blocks on a single final page with a granule position of 3072.
    let buf = StreamBuilder::new(1, 3).packets_per_page(3).final_granule(3072).build();

    let mut decoder = Decoder::open_memory(buf, &Default::default()).unwrap();

    assert_eq!(decoder.stream_length_in_samples().unwrap(), 3072);

    let mut lens = Vec::new();

    while let Some(frame) = decoder.next_frame().unwrap() {
        assert_eq!(frame.channels(), 1);
        lens.push(frame.len());
    }

    assert_eq!(lens, [0, 1024, 1024]);
    assert_eq!(lens.iter().sum::<usize>(), 3072 - BS1 / 2);

    // The end of the stream is sticky.
    assert!(decoder.next_frame().unwrap().is_none());
    assert_eq!(decoder.take_error(), None);
}

#[test]
fn verify_total_samples_decoded() {
    for channels in [1, 2, 3] {
        let builder = StreamBuilder::new(channels, 21).seed(u64::from(channels));

        let decoded = decode_pull(&builder.build());

        assert_eq!(decoded.planes.len(), usize::from(channels));
        assert_eq!(decoded.len() as u64, builder.total_samples());
        assert_eq!(decoded.frame_lens[0], 0);
    }
}

#[test]
fn verify_final_page_truncation() {
    let builder = StreamBuilder::new(2, 10);
    let full = builder.total_samples();

    for trim in [1, 100, 512, 1023] {
        let builder = builder.clone().final_granule(full - trim);

        let decoded = decode_pull(&builder.build());

        assert_eq!(decoded.len() as u64, full - trim);

        // The final frame is shortened, every other frame is complete.
        assert_eq!(*decoded.frame_lens.last().unwrap(), 1024 - trim as usize);
        assert!(decoded.frame_lens[1..decoded.frame_lens.len() - 1].iter().all(|&len| len == 1024));
    }
}

#[test]
fn verify_deterministic() {
    let blocks = vec![true, true, false, false, false, true, true, false, true, true, true];

    let buf = StreamBuilder::new(2, 0).blocks(blocks).couple().seed(7).build();

    let first = decode_pull(&buf);
    let second = decode_pull(&buf);

    assert!(first.len() > 0);
    assert_eq!(first, second);

    // Decoding again after seeking to the start gives the same result.
    let mut decoder = Decoder::open_memory(buf, &Default::default()).unwrap();

    while decoder.next_frame().unwrap().is_some() {}

    decoder.seek_start().unwrap();

    let mut planes = vec![Vec::new(); 2];

    while let Some(frame) = decoder.next_frame().unwrap() {
        for (plane, samples) in planes.iter_mut().zip(frame.planes()) {
            plane.extend_from_slice(samples);
        }
    }

    assert_eq!(planes, first.planes);
}

#[test]
fn verify_decoded_samples_are_finite() {
    let buf = StreamBuilder::new(2, 16).couple().seed(3).build();

    let decoded = decode_pull(&buf);

    assert!(decoded.planes.iter().flatten().all(|s| s.is_finite()));
    assert!(decoded.planes.iter().flatten().any(|&s| s != 0.0));
}

#[test]
fn verify_residue_cut_short() {
    // Every packet ends 31 bits into the residue. The rest of the spectrum is left at zero.
    let builder = StreamBuilder::new(1, 10).packet_len_limit(6).seed(21);

    let decoded = decode_pull(&builder.build());

    assert_eq!(decoded.len() as u64, builder.total_samples());
    assert!(decoded.planes[0].iter().all(|s| s.is_finite()));
    assert!(decoded.planes[0].iter().any(|&s| s != 0.0));

    // The packets differ from the complete stream only after the cut.
    let complete = decode_pull(&builder.clone().packet_len_limit(usize::MAX).build());

    assert_eq!(complete.len(), decoded.len());
    assert_ne!(complete.planes, decoded.planes);
}

#[test]
fn verify_coupled_submaps() {
    // Channels 0 and 3 use submap 0, channels 1 and 4 use submap 1, and channel 2 uses submap 2.
    let builder = StreamBuilder::new(5, 14).submaps(3).seed(11);

    let plain = decode_pull(&builder.build());

    assert_eq!(plain.planes.len(), 5);
    assert_eq!(plain.len() as u64, builder.total_samples());
    assert!(plain.planes.iter().all(|plane| plane.iter().any(|&s| s != 0.0)));

    // Couple channels 0 with 1, and 2 with 3. The packets are unchanged.
    let coupled = decode_pull(&builder.clone().couple().build());

    assert_eq!(coupled.len(), plain.len());
    assert!(coupled.planes.iter().flatten().all(|s| s.is_finite()));

    for ch in 0..4 {
        assert_ne!(coupled.planes[ch], plain.planes[ch], "channel {}", ch);
    }

    assert_eq!(coupled.planes[4], plain.planes[4]);

    // Push mode decodes the same audio.
    let buf = builder.couple().build();
    assert_eq!(decode_push(&buf, || 333), without_empty_frames(coupled));
}

#[test]
fn verify_channel_coercion() {
    let buf = StreamBuilder::new(2, 6).seed(11).build();

    let mut decoder = Decoder::open_memory(buf, &Default::default()).unwrap();

    let mut checked = 0;

    while let Some(frame) = decoder.next_frame().unwrap() {
        let len = frame.len();

        // Stereo to mono sums the channels.
        let mut mono = vec![0i16; len];
        assert_eq!(frame.copy_interleaved_i16(1, &mut mono), len);

        for (i, &sample) in mono.iter().enumerate() {
            assert_eq!(sample, f32_to_i16(frame.plane(0)[i] + frame.plane(1)[i]));
        }

        // Stereo to quad keeps the channels and silences the rest.
        let mut quad = vec![1i16; 4 * len];
        assert_eq!(frame.copy_interleaved_i16(4, &mut quad), len);

        for (i, chunk) in quad.chunks_exact(4).enumerate() {
            assert_eq!(chunk[0], f32_to_i16(frame.plane(0)[i]));
            assert_eq!(chunk[1], f32_to_i16(frame.plane(1)[i]));
            assert_eq!(&chunk[2..], &[0, 0]);
        }

        // A short output buffer limits the number of samples converted.
        let mut short = [0i16; 10];
        assert_eq!(frame.copy_interleaved_i16(2, &mut short), len.min(5));

        let mut left = vec![0i16; len];
        assert_eq!(frame.copy_planar_i16(&mut [&mut left[..]]), len);

        for (i, &sample) in left.iter().enumerate() {
            assert_eq!(sample, f32_to_i16(frame.plane(0)[i] + frame.plane(1)[i]));
        }

        checked += len;
    }

    assert_eq!(checked, 5 * 1024);
}

#[test]
fn verify_too_many_channels() {
    let buf = StreamBuilder::new(6, 4).build();

    let options = DecoderOptions { max_channels: 2, ..Default::default() };

    match Decoder::open_memory(buf.clone(), &options) {
        Err(err) => assert_eq!(err.code(), ErrorCode::TooManyChannels),
        Ok(_) => panic!("expected the stream to be rejected"),
    }

    assert!(Decoder::open_memory(buf, &Default::default()).is_ok());
}

#[test]
fn verify_unsupported_floor() {
    let buf = StreamBuilder::new(1, 4).floor_type(0).build();

    match Decoder::open_memory(buf, &Default::default()) {
        Err(err) => assert_eq!(err.code(), ErrorCode::FeatureNotSupported),
        Ok(_) => panic!("expected floor type 0 to be unsupported"),
    }
}

#[test]
fn verify_invalid_sources() {
    let open = |buf: Vec<u8>| match Decoder::open_memory(buf, &Default::default()) {
        Err(err) => err.code(),
        Ok(_) => panic!("expected the source to be rejected"),
    };

    // Not an Ogg stream.
    assert_eq!(open(b"RIFF\x24\x00\x00\x00WAVEfmt ".repeat(8)), ErrorCode::InvalidSetup);

    // Only the first page.
    let buf = StreamBuilder::new(1, 4).build();
    assert_eq!(open(buf[..58].to_vec()), ErrorCode::UnexpectedEof);

    // A missing file.
    match Decoder::open_file("/nonexistent/quaver/test.ogg", &Default::default()) {
        Err(err) => assert_eq!(err.code(), ErrorCode::FileOpenFailure),
        Ok(_) => panic!("expected the file to be missing"),
    }
}

#[test]
fn verify_take_error_is_one_shot() {
    let buf = StreamBuilder::new(1, 8).build();

    let mut decoder = Decoder::open_memory(buf, &Default::default()).unwrap();
    let total = decoder.stream_length_in_samples().unwrap();

    assert_eq!(decoder.take_error(), None);

    match decoder.seek(total + 1) {
        Err(Error::SeekError(_)) => (),
        _ => panic!("expected a seek error"),
    }

    assert_eq!(decoder.take_error(), Some(ErrorCode::SeekInvalid));
    assert_eq!(decoder.take_error(), None);

    // Seek errors are recoverable.
    assert!(decoder.next_frame().is_ok());
}

#[test]
fn verify_api_mixing_is_fatal() {
    let buf = StreamBuilder::new(1, 8).build();

    let mut decoder = Decoder::open_memory(buf.clone(), &Default::default()).unwrap();

    match decoder.push(&buf) {
        Err(Error::ApiMixing(_)) => (),
        _ => panic!("expected an api mixing error"),
    }

    assert_eq!(decoder.take_error(), Some(ErrorCode::InvalidApiMixing));

    // The decoder is no longer usable.
    assert!(matches!(decoder.next_frame(), Err(Error::ResetRequired)));
    assert!(matches!(decoder.seek_start(), Err(Error::ResetRequired)));
    assert_eq!(decoder.take_error(), None);

    let mut decoder = Decoder::new_push(&Default::default());

    match decoder.seek(0) {
        Err(err) => assert_eq!(err.code(), ErrorCode::InvalidApiMixing),
        Ok(_) => panic!("expected an api mixing error"),
    }

    assert!(matches!(decoder.push(&buf), Err(Error::ResetRequired)));
}
