//! Error taxonomy shared by every decode path.

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur while decoding NSx or NEV recordings.
///
/// The type is `Clone` so that a session whose header failed to decode can
/// hand the same cause back to every later call.
#[derive(Error, Debug, Clone)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(Arc<io::Error>),

    #[error("field {field} needs {width} bytes at offset {offset}, only {available} available")]
    MalformedField {
        field: String,
        offset: usize,
        width: usize,
        available: usize,
    },

    #[error("unknown extended header type {0:?}")]
    UnknownRecordType(String),

    #[error("data region of {region} bytes is not a whole number of {stride}-byte strides")]
    TruncatedFile { region: u64, stride: u64 },

    #[error("data block marker is {0}, expected 1")]
    InvalidDataBlockMarker(u8),

    #[error("electrode {electrode} declares {bytes} bytes per waveform sample")]
    UnsupportedWaveformWidth { electrode: u16, bytes: u8 },

    #[error("channel {0} is not in the channel map")]
    UnknownChannel(u16),

    #[error("electrode {0} has no spike waveform configuration")]
    MissingSpikeConfig(u16),

    #[error("downsample factor must be finite and at least 1/1024, got {0}")]
    InvalidDownsampleFactor(f64),

    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    #[error("cache error: {0}")]
    Cache(String),
}

impl From<io::Error> for DecodeError {
    fn from(err: io::Error) -> Self {
        DecodeError::Io(Arc::new(err))
    }
}

impl From<bincode::Error> for DecodeError {
    fn from(err: bincode::Error) -> Self {
        DecodeError::Cache(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DecodeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_is_shared_on_clone() {
        let err: DecodeError = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        let copy = err.clone();
        match (err, copy) {
            (DecodeError::Io(a), DecodeError::Io(b)) => assert!(Arc::ptr_eq(&a, &b)),
            _ => panic!("expected io errors"),
        }
    }

    #[test]
    fn test_messages_name_the_offending_value() {
        let err = DecodeError::UnsupportedWaveformWidth {
            electrode: 7,
            bytes: 4,
        };
        assert_eq!(
            err.to_string(),
            "electrode 7 declares 4 bytes per waveform sample"
        );
        assert!(DecodeError::UnknownRecordType("NEUEVXXX".into())
            .to_string()
            .contains("NEUEVXXX"));
    }
}
