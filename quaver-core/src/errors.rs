// Quaver
// Copyright (c) 2024 The Project Quaver Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `errors` module defines the common error type.

use std::error;
use std::fmt;
use std::io;
use std::result;

/// `SeekErrorKind` is a list of reasons why a seek may fail.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SeekErrorKind {
    /// The sample to seek to is beyond the end of the stream.
    OutOfRange,
    /// The total length of the stream could not be determined, so it cannot be searched.
    UnknownLength,
    /// The search could not position the stream at or before the requested sample.
    Failed,
}

impl SeekErrorKind {
    fn as_str(&self) -> &'static str {
        match *self {
            SeekErrorKind::OutOfRange => "requested sample is out-of-range for stream",
            SeekErrorKind::UnknownLength => "stream length is unknown",
            SeekErrorKind::Failed => "could not locate the requested sample",
        }
    }
}

/// `ErrorCode` is a compact, copyable classification of an [`Error`].
///
/// The decoder keeps the code of the most recent failure so that it may be polled after the fact.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorCode {
    /// A push-mode decoder requires more data before it can make progress.
    NeedMoreData,
    /// The header packets were malformed.
    InvalidSetup,
    /// The audio packets or container framing were malformed.
    InvalidStream,
    /// The stream ended unexpectedly.
    UnexpectedEof,
    /// The sample to seek to is out-of-range.
    SeekInvalid,
    /// The stream length is unknown, so it cannot be seeked.
    SeekWithoutLength,
    /// Seeking failed.
    SeekFailed,
    /// The stream has more channels than the decoder was configured to support.
    TooManyChannels,
    /// The stream uses a feature that is not supported.
    FeatureNotSupported,
    /// A file could not be opened.
    FileOpenFailure,
    /// Push-mode and pull-mode operations were mixed on one decoder.
    InvalidApiMixing,
    /// Any other IO error.
    Io,
}

/// `Error` provides an enumeration of all possible errors reported by Quaver.
#[derive(Debug)]
pub enum Error {
    /// An IO error occured while reading or seeking the stream.
    IoError(io::Error),
    /// The file to decode could not be opened.
    FileOpenError(io::Error),
    /// A push-mode decoder needs more data to continue. This is not a failure.
    NeedMoreData,
    /// The header packets were malformed and a decoder could not be constructed.
    SetupError(&'static str),
    /// The stream contained malformed data and could not be decoded.
    DecodeError(&'static str),
    /// The stream could not be seeked.
    SeekError(SeekErrorKind),
    /// An unsupported codec feature was encounted.
    Unsupported(&'static str),
    /// A configured limit was reached while reading the stream.
    LimitError(&'static str),
    /// A push-mode operation was attempted on a pull-mode decoder, or vice-versa.
    ApiMixing(&'static str),
    /// The decoder encountered a fatal error earlier and can no longer be used.
    ResetRequired,
}

impl Error {
    /// Gets the [`ErrorCode`] classifying this error.
    pub fn code(&self) -> ErrorCode {
        match *self {
            Error::IoError(ref err) => match err.kind() {
                io::ErrorKind::UnexpectedEof => ErrorCode::UnexpectedEof,
                _ => ErrorCode::Io,
            },
            Error::FileOpenError(_) => ErrorCode::FileOpenFailure,
            Error::NeedMoreData => ErrorCode::NeedMoreData,
            Error::SetupError(_) => ErrorCode::InvalidSetup,
            Error::DecodeError(_) => ErrorCode::InvalidStream,
            Error::SeekError(SeekErrorKind::OutOfRange) => ErrorCode::SeekInvalid,
            Error::SeekError(SeekErrorKind::UnknownLength) => ErrorCode::SeekWithoutLength,
            Error::SeekError(SeekErrorKind::Failed) => ErrorCode::SeekFailed,
            Error::Unsupported(_) => ErrorCode::FeatureNotSupported,
            Error::LimitError(_) => ErrorCode::TooManyChannels,
            Error::ApiMixing(_) => ErrorCode::InvalidApiMixing,
            Error::ResetRequired => ErrorCode::InvalidApiMixing,
        }
    }

    /// Returns `true` if the error leaves the decoder unusable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            *self,
            Error::SetupError(_)
                | Error::Unsupported(_)
                | Error::LimitError(_)
                | Error::ApiMixing(_)
                | Error::ResetRequired
                | Error::FileOpenError(_)
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Error::IoError(ref err) => err.fmt(f),
            Error::FileOpenError(ref err) => {
                write!(f, "could not open file: {}", err)
            }
            Error::NeedMoreData => {
                write!(f, "more data is required")
            }
            Error::SetupError(msg) => {
                write!(f, "malformed setup: {}", msg)
            }
            Error::DecodeError(msg) => {
                write!(f, "malformed stream: {}", msg)
            }
            Error::SeekError(ref kind) => {
                write!(f, "seek error: {}", kind.as_str())
            }
            Error::Unsupported(feature) => {
                write!(f, "unsupported feature: {}", feature)
            }
            Error::LimitError(constraint) => {
                write!(f, "limit reached: {}", constraint)
            }
            Error::ApiMixing(msg) => {
                write!(f, "invalid api usage: {}", msg)
            }
            Error::ResetRequired => {
                write!(f, "decoder failed earlier and must be recreated")
            }
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match *self {
            Error::IoError(ref err) => Some(err),
            Error::FileOpenError(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::IoError(err)
    }
}

pub type Result<T> = result::Result<T, Error>;

/// Convenience function to create a decode error.
pub fn decode_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::DecodeError(desc))
}

/// Convenience function to create a setup error.
pub fn setup_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::SetupError(desc))
}

/// Convenience function to create a seek error.
pub fn seek_error<T>(kind: SeekErrorKind) -> Result<T> {
    Err(Error::SeekError(kind))
}

/// Convenience function to create an unsupport feature error.
pub fn unsupported_error<T>(feature: &'static str) -> Result<T> {
    Err(Error::Unsupported(feature))
}

/// Convenience function to create a limit error.
pub fn limit_error<T>(constraint: &'static str) -> Result<T> {
    Err(Error::LimitError(constraint))
}

/// Convenience function to create an API mixing error.
pub fn api_mixing_error<T>(desc: &'static str) -> Result<T> {
    Err(Error::ApiMixing(desc))
}

/// Convenience function to create an end-of-stream error.
pub fn end_of_stream_error<T>() -> Result<T> {
    Err(Error::IoError(io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_error_codes() {
        let eof = Error::IoError(io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        assert_eq!(eof.code(), ErrorCode::UnexpectedEof);

        let other = Error::IoError(io::Error::new(io::ErrorKind::Other, "other"));
        assert_eq!(other.code(), ErrorCode::Io);

        assert_eq!(Error::SetupError("x").code(), ErrorCode::InvalidSetup);
        assert_eq!(Error::DecodeError("x").code(), ErrorCode::InvalidStream);
        assert_eq!(Error::SeekError(SeekErrorKind::OutOfRange).code(), ErrorCode::SeekInvalid);
        assert_eq!(
            Error::SeekError(SeekErrorKind::UnknownLength).code(),
            ErrorCode::SeekWithoutLength
        );
        assert_eq!(Error::SeekError(SeekErrorKind::Failed).code(), ErrorCode::SeekFailed);
        assert_eq!(Error::Unsupported("x").code(), ErrorCode::FeatureNotSupported);
        assert_eq!(Error::LimitError("x").code(), ErrorCode::TooManyChannels);
        assert_eq!(Error::ApiMixing("x").code(), ErrorCode::InvalidApiMixing);
    }

    #[test]
    fn verify_fatal_classification() {
        assert!(Error::SetupError("x").is_fatal());
        assert!(Error::ApiMixing("x").is_fatal());
        assert!(!Error::DecodeError("x").is_fatal());
        assert!(!Error::NeedMoreData.is_fatal());
        assert!(!Error::SeekError(SeekErrorKind::Failed).is_fatal());
    }
}
