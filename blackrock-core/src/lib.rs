//! Decoder for Blackrock NSx continuous and NEV event recordings.
//!
//! Both formats consist of a fixed basic header, a run of fixed-size
//! extended headers describing the electrodes, and a body: interleaved
//! 16-bit samples for NSx, fixed-size event packets for NEV. This crate
//! decodes the headers into typed structures, indexes the event packets by
//! type, decodes events and channel data on demand, and memoizes the
//! expensive calls in an on-disk cache.
//!
//! # Example
//!
//! ```no_run
//! use blackrock_core::{open, EventClass, Recording};
//!
//! match open("datafile001.nev").unwrap() {
//!     Recording::Nev(nev) => {
//!         let digital = nev.events(EventClass::Digital).unwrap();
//!         println!("{} digital events", digital.len());
//!     }
//!     Recording::Nsx(nsx) => {
//!         let series = nsx.channel_series(1, None, None, None).unwrap();
//!         println!("{} samples at {} Hz", series.len(), nsx.sampling_frequency().unwrap());
//!     }
//! }
//! ```
//!
//! # Features
//!
//! - Declarative record layouts for every header and packet type
//! - Lazy, idempotent decoding per open file
//! - Spike waveforms scaled by the digitization factor, or raw
//! - Calibrated, clipped and optionally downsampled channel series
//! - Content-addressed result cache with atomic writes

pub mod cache;
pub mod continuous;
pub mod error;
pub mod events;
pub mod header;
pub mod options;
pub mod parser;
pub mod resample;
pub mod schema;
pub mod session;
pub mod types;

#[doc(hidden)]
pub mod test_utils;

// Re-export commonly used types
pub use error::{DecodeError, Result};
pub use options::{ReaderOptions, WaveformScaling, DEFAULT_CACHE_DIR};
pub use session::{open, open_with, NevFile, NsxFile, Recording};
pub use types::{
    ChannelConfig, ChannelMap, ContinuousSeries, DeviceEvent, EventClass, EventRecord,
    SpikeWaveforms, TimeOrigin, Waveform, WAVEFORM_UNITS,
};
