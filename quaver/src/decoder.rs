// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use quaver_codec_vorbis::{is_audio_packet, Comments, VorbisDecoder};
use quaver_core::errors::{api_mixing_error, decode_error, end_of_stream_error, seek_error};
use quaver_core::errors::{Error, ErrorCode, Result, SeekErrorKind};
use quaver_core::io::MediaSource;
use quaver_format_ogg::{Discontinuity, OggPacket, PhysicalStream, PushFramer, SeekPolicy, SeekedTo};

use log::{debug, warn};

use crate::frame::Frame;

/// The largest number of channels a decoder can be configured to accept.
const MAX_CHANNELS_LIMIT: usize = 255;

/// `DecoderOptions` is a common set of options that all decoders use.
#[derive(Copy, Clone, Debug)]
pub struct DecoderOptions {
    /// Streams with more channels than this are rejected. Values greater than 255 are treated as
    /// 255.
    pub max_channels: usize,
    /// Verify the CRC of every page read. Pages found while resynchronizing or seeking are always
    /// verified.
    pub verify_page_crc: bool,
    /// The tunable constants of the search used by [`Decoder::seek`] in pull mode.
    pub seek_policy: SeekPolicy,
}

impl Default for DecoderOptions {
    fn default() -> Self {
        DecoderOptions { max_channels: 16, verify_page_crc: false, seek_policy: Default::default() }
    }
}

/// Basic information about a stream.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Info {
    pub channels: usize,
    pub sample_rate: u32,
    /// The maximum number of samples per channel in a single frame.
    pub max_frame_size: usize,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum State {
    /// The header packets are still being pushed.
    AwaitingHeaders,
    Decoding,
    /// All packets were decoded.
    Eof,
    /// A fatal error occured.
    Error,
}

enum Input {
    Pull(PhysicalStream),
    Push { framer: PushFramer, headers: Vec<Box<[u8]>> },
}

/// The decoding engine, and the stream state the container adds to it.
struct Playback {
    engine: VorbisDecoder,
    /// A packet was decoded since the last discontinuity.
    primed: bool,
    /// Samples to drop from the start of the next frame.
    pending_skip: u64,
}

impl Playback {
    fn reset(&mut self, loc: Option<u64>) {
        self.engine.reset(loc);
        self.primed = false;
        self.pending_skip = 0;
    }

    fn decode(&mut self, packet: &OggPacket) -> Result<()> {
        match packet.discontinuity {
            Discontinuity::None => (),
            Discontinuity::DroppedFragment => {
                // A fragment dropped before any audio was produced loses nothing.
                if self.primed {
                    warn!("vorbis: packet fragment dropped");
                    self.reset(None);
                    return decode_error("ogg: packet fragment dropped");
                }
            }
            Discontinuity::Resynced { granule } => {
                debug!("vorbis: resynchronized at granule {:?}", granule);
                self.reset(granule);
            }
        }

        match self.engine.decode(&packet.data, packet.granule, packet.is_last_page) {
            Ok(len) => {
                self.primed = true;

                if self.pending_skip > 0 && len > 0 {
                    let skip = self.pending_skip.min(len as u64);
                    self.engine.skip_output(skip as usize);
                    self.pending_skip -= skip;
                }

                Ok(())
            }
            Err(err) => {
                self.reset(None);
                Err(err)
            }
        }
    }
}

/// An Ogg Vorbis decoder.
///
/// A `Decoder` is either opened on a seekable source and pulls data as required, or is created in
/// push mode and decodes bytes supplied in arbitrarily sized chunks. Operations belonging to the
/// other mode fail with [`ErrorCode::InvalidApiMixing`], after which the decoder is unusable.
pub struct Decoder {
    input: Input,
    playback: Option<Playback>,
    state: State,
    options: DecoderOptions,
    /// The error returned by `take_error`.
    error: Option<ErrorCode>,
}

impl Decoder {
    /// Opens a stream on a seekable source. The header packets are read immediately.
    pub fn open(source: Box<dyn MediaSource>, options: &DecoderOptions) -> Result<Decoder> {
        let options = sanitize(options);

        let mut stream = PhysicalStream::try_new(source, options.verify_page_crc)?;
        stream.set_seek_policy(options.seek_policy);

        let mut headers = Vec::with_capacity(3);

        while headers.len() < 3 {
            match stream.next_packet() {
                Ok(Some(packet)) => headers.push(packet.data),
                Ok(None) => return end_of_stream_error(),
                Err(Error::DecodeError(desc)) => return Err(Error::SetupError(desc)),
                Err(err) => return Err(err),
            }
        }

        stream.mark_audio_start();

        let engine =
            VorbisDecoder::try_new(&headers[0], &headers[1], &headers[2], options.max_channels)?;

        Ok(Decoder {
            input: Input::Pull(stream),
            playback: Some(Playback { engine, primed: false, pending_skip: 0 }),
            state: State::Decoding,
            options,
            error: None,
        })
    }

    /// Opens a stream held in memory.
    pub fn open_memory<T>(buf: T, options: &DecoderOptions) -> Result<Decoder>
    where
        T: AsRef<[u8]> + Send + Sync + 'static,
    {
        Decoder::open(Box::new(Cursor::new(buf)), options)
    }

    /// Opens a file.
    pub fn open_file<P: AsRef<Path>>(path: P, options: &DecoderOptions) -> Result<Decoder> {
        let file = File::open(path).map_err(Error::FileOpenError)?;
        Decoder::open(Box::new(file), options)
    }

    /// Creates a decoder in push mode. No data is read until bytes are pushed.
    pub fn new_push(options: &DecoderOptions) -> Decoder {
        let options = sanitize(options);

        Decoder {
            input: Input::Push {
                framer: PushFramer::new(options.verify_page_crc),
                headers: Vec::with_capacity(3),
            },
            playback: None,
            state: State::AwaitingHeaders,
            options,
            error: None,
        }
    }

    /// Gets information about the stream, or `None` if the header packets have not been read yet.
    pub fn info(&self) -> Option<Info> {
        self.playback.as_ref().map(|playback| {
            let engine = &playback.engine;

            Info {
                channels: engine.channels(),
                sample_rate: engine.sample_rate(),
                max_frame_size: engine.max_frame_size(),
            }
        })
    }

    /// Gets the comments of the stream, or `None` if the header packets have not been read yet.
    pub fn comments(&self) -> Option<&Comments> {
        self.playback.as_ref().map(|playback| playback.engine.comments())
    }

    /// Gets the position, in samples, of the first sample of the next frame, if known.
    pub fn sample_offset(&self) -> Option<u64> {
        let playback = self.playback.as_ref()?;
        playback.engine.sample_offset().map(|loc| loc + playback.pending_skip)
    }

    /// Returns and clears the code of the last error.
    ///
    /// Running out of pushed data is not recorded.
    pub fn take_error(&mut self) -> Option<ErrorCode> {
        self.error.take()
    }

    /// Appends bytes to a push mode decoder. If the header packets are complete, they are decoded
    /// and the stream information becomes available.
    pub fn push(&mut self, data: &[u8]) -> Result<()> {
        self.check_usable()?;

        let result = match &mut self.input {
            Input::Push { framer, .. } => {
                framer.push(data);
                self.read_pushed_headers()
            }
            Input::Pull(_) => api_mixing_error("push on a pull mode decoder"),
        };

        self.record(result)
    }

    /// Discards all pushed data that has not been decoded yet. Use this when the pushed data will
    /// continue from a different position, for example after the caller seeks the source. The
    /// decoder resynchronizes on the next valid page that is pushed.
    pub fn flush_push(&mut self) -> Result<()> {
        self.check_usable()?;

        let result = match &mut self.input {
            Input::Push { framer, .. } => {
                framer.flush();

                if let Some(playback) = &mut self.playback {
                    playback.reset(None);
                    self.state = State::Decoding;
                }

                Ok(())
            }
            Input::Pull(_) => api_mixing_error("flush on a pull mode decoder"),
        };

        self.record(result)
    }

    /// Decodes the next frame.
    ///
    /// Returns `Ok(None)` at the end of the stream. The first frame after opening, seeking to the
    /// start, or a discontinuity has no samples.
    ///
    /// In push mode, [`Error::NeedMoreData`] is returned when every pushed byte has been consumed.
    pub fn next_frame(&mut self) -> Result<Option<Frame<'_>>> {
        self.check_usable()?;

        let result = if matches!(self.input, Input::Pull(_)) {
            self.next_pulled_frame()
        }
        else {
            self.next_pushed_frame()
        };

        let has_frame = self.record(result)?;

        let playback = match &self.playback {
            Some(playback) if has_frame => playback,
            _ => return Ok(None),
        };

        let engine = &playback.engine;

        Ok(Some(Frame::new((0..engine.channels()).map(|ch| engine.output(ch)).collect())))
    }

    /// Gets the length of the stream in samples, or 0 if it is unknown.
    pub fn stream_length_in_samples(&mut self) -> Result<u64> {
        self.check_usable()?;

        let result = match &mut self.input {
            Input::Pull(stream) => stream.total_samples().map(|total| total.unwrap_or(0)),
            Input::Push { .. } => api_mixing_error("stream length of a push mode decoder"),
        };

        self.record(result)
    }

    /// Seeks to the start of the stream. The next frame has no samples.
    pub fn seek_start(&mut self) -> Result<()> {
        self.check_usable()?;

        let result = match (&mut self.input, &mut self.playback) {
            (Input::Pull(stream), Some(playback)) => stream.rewind().map(|_| {
                playback.engine.restart();
                playback.primed = false;
                playback.pending_skip = 0;
            }),
            _ => api_mixing_error("seek on a push mode decoder"),
        };

        if result.is_ok() {
            self.state = State::Decoding;
        }

        self.record(result)
    }

    /// Seeks so that the first sample of the next frame is the sample at position `sample`.
    pub fn seek(&mut self, sample: u64) -> Result<()> {
        self.check_usable()?;

        let result = match (&mut self.input, &mut self.playback) {
            (Input::Pull(stream), Some(playback)) => seek_to_sample(stream, playback, sample),
            _ => api_mixing_error("seek on a push mode decoder"),
        };

        if result.is_ok() {
            self.state = State::Decoding;
        }

        self.record(result)
    }

    fn check_usable(&self) -> Result<()> {
        if self.state == State::Error {
            return Err(Error::ResetRequired);
        }
        Ok(())
    }

    /// Records the error of a failed operation.
    fn record<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            match err {
                Error::NeedMoreData | Error::ResetRequired => (),
                err => {
                    self.error = Some(err.code());

                    if err.is_fatal() {
                        warn!("decoder failed: {}", err);
                        self.state = State::Error;
                    }
                }
            }
        }
        result
    }

    /// Reads header packets from the pushed data. Once all three are read, the engine is created.
    fn read_pushed_headers(&mut self) -> Result<()> {
        if self.playback.is_some() {
            return Ok(());
        }

        let (framer, headers) = match &mut self.input {
            Input::Push { framer, headers } => (framer, headers),
            Input::Pull(_) => return Ok(()),
        };

        while headers.len() < 3 {
            match framer.next_packet() {
                Ok(Some(packet)) => headers.push(packet.data),
                Ok(None) => return Ok(()),
                Err(Error::DecodeError(desc)) => return Err(Error::SetupError(desc)),
                Err(err) => return Err(err),
            }
        }

        let engine = VorbisDecoder::try_new(
            &headers[0],
            &headers[1],
            &headers[2],
            self.options.max_channels,
        )?;

        headers.clear();

        self.playback = Some(Playback { engine, primed: false, pending_skip: 0 });
        self.state = State::Decoding;

        Ok(())
    }

    fn next_pulled_frame(&mut self) -> Result<bool> {
        let (stream, playback) = match (&mut self.input, &mut self.playback) {
            (Input::Pull(stream), Some(playback)) => (stream, playback),
            _ => return Ok(false),
        };

        if self.state == State::Eof {
            return Ok(false);
        }

        loop {
            let packet = match stream.next_packet() {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    self.state = State::Eof;
                    return Ok(false);
                }
                Err(err) => {
                    playback.reset(None);
                    return Err(err);
                }
            };

            if !is_audio_packet(&packet.data) {
                continue;
            }

            playback.decode(&packet)?;

            return Ok(true);
        }
    }

    fn next_pushed_frame(&mut self) -> Result<bool> {
        self.read_pushed_headers()?;

        let (framer, playback) = match (&mut self.input, &mut self.playback) {
            (Input::Push { framer, .. }, Some(playback)) => (framer, playback),
            _ => return Err(Error::NeedMoreData),
        };

        let packet = match framer.next_packet() {
            Ok(Some(packet)) => packet,
            Ok(None) => return Err(Error::NeedMoreData),
            Err(err) => {
                // The framer searches for the next valid page on its own.
                playback.reset(None);
                return Err(err);
            }
        };

        if !is_audio_packet(&packet.data) {
            playback.engine.clear_output();
            return Ok(true);
        }

        if let Err(err) = playback.decode(&packet) {
            framer.enter_resync();
            return Err(err);
        }

        Ok(true)
    }
}

/// Clamps the options to what the decoder supports.
fn sanitize(options: &DecoderOptions) -> DecoderOptions {
    DecoderOptions { max_channels: options.max_channels.min(MAX_CHANNELS_LIMIT), ..*options }
}

/// Seeks `stream` and `playback` so that the next frame decoded starts at `target`.
fn seek_to_sample(stream: &mut PhysicalStream, playback: &mut Playback, target: u64) -> Result<()> {
    let total = match stream.total_samples()? {
        Some(total) => total,
        None => return seek_error(SeekErrorKind::UnknownLength),
    };

    if target > total {
        return seek_error(SeekErrorKind::OutOfRange);
    }

    match refine_seek(stream, playback, target) {
        Ok(()) => Ok(()),
        Err(err) => {
            warn!("vorbis: seek failed: {}", err);

            // Leave the decoder at the start of the stream.
            stream.rewind()?;
            playback.engine.restart();
            playback.primed = false;
            playback.pending_skip = 0;

            match err {
                Error::SeekError(kind) => seek_error(kind),
                _ => seek_error(SeekErrorKind::Failed),
            }
        }
    }
}

/// Seeks to the page before `target`, then decodes or skips packets until the next packet contains
/// `target`.
fn refine_seek(stream: &mut PhysicalStream, playback: &mut Playback, target: u64) -> Result<()> {
    let (bs0, bs1) = playback.engine.blocksizes();

    // The first sample output after restarting on a packet with a known granule position may be
    // up-to this many samples after that granule position.
    let lead = ((bs1 - bs0) / 4) as u64;

    let seeked_to = stream.seek_to_granule(target.saturating_sub(lead))?;

    debug!("vorbis: seeking to sample {} from {:?}", target, seeked_to);

    match seeked_to {
        SeekedTo::Start => playback.engine.restart(),
        SeekedTo::KnownGranule(_) => playback.engine.reset(None),
    }

    playback.primed = false;
    playback.pending_skip = 0;

    // Decode one packet to establish the position and prime the overlap.
    loop {
        let packet = match stream.next_packet()? {
            Some(packet) => packet,
            None => break,
        };

        if is_audio_packet(&packet.data) {
            playback.engine.decode(&packet.data, packet.granule, packet.is_last_page)?;
            playback.primed = true;
            break;
        }
    }

    let max_frame = playback.engine.max_frame_size() as u64;

    let mut loc = match playback.engine.sample_offset() {
        Some(loc) if loc <= target => loc,
        _ => return seek_error(SeekErrorKind::Failed),
    };

    while loc < target {
        let next = stream.peek_packet()?.map(|packet| {
            (is_audio_packet(&packet.data), playback.engine.frame_span(&packet.data))
        });

        let span = match next {
            Some((true, span)) => span.unwrap_or(0) as u64,
            Some((false, _)) => {
                stream.next_packet()?;
                continue;
            }
            None => break,
        };

        // The next packet contains the target.
        if loc + span > target {
            break;
        }

        let packet = match stream.next_packet()? {
            Some(packet) => packet,
            None => break,
        };

        if loc + span + max_frame > target {
            // The packet overlaps the packet containing the target.
            playback.engine.decode(&packet.data, packet.granule, packet.is_last_page)?;
            playback.primed = true;
        }
        else {
            playback.engine.skip_frame(&packet.data, packet.granule, packet.is_last_page);
            playback.primed = false;
        }

        loc = match playback.engine.sample_offset() {
            Some(loc) if loc <= target => loc,
            _ => return seek_error(SeekErrorKind::Failed),
        };
    }

    playback.pending_skip = target - loc;

    Ok(())
}
