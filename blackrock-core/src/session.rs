//! Decoding sessions over one open recording.
//!
//! A session owns a read-only memory map of the file and decodes each part
//! of it at most once: the header on first use, then the event index or
//! data block header on top of it. Every accessor forces whatever it depends
//! on, so calls may come in any order. A failed header decode is kept and
//! returned by every later call.

use std::cell::OnceCell;
use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use tracing::{debug, instrument};

use crate::cache::{CacheArg, ResultCache, SourceIdentity};
use crate::continuous::{self, linspace};
use crate::error::{DecodeError, Result};
use crate::events::{decode_events, index_events};
use crate::header::{decode_nev_header, decode_nsx_header, file_type_id, NevHeader, NsxHeader};
use crate::options::{ReaderOptions, WaveformScaling};
use crate::schema::{NEV_FILE_TYPE_ID, NSX_FILE_TYPE_ID};
use crate::types::{
    AuxiliaryRecords, ChannelMap, CommentEvent, ContinuousSeries, DigitalInput, EventClass,
    EventIndex, EventRecord, NevBasicHeader, NsxBasicHeader, NsxDataHeader, SpikeEvent,
    SpikeWaveforms,
};

fn map_file(path: &Path) -> Result<Mmap> {
    let file = File::open(path)?;
    // SAFETY: the map is only ever read, and recordings are not modified
    // while a session has them open.
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(mmap)
}

fn replay<T>(cell: &Result<T>) -> Result<&T> {
    cell.as_ref().map_err(DecodeError::clone)
}

/// The mapped file plus its cache handle.
#[derive(Debug)]
struct Source {
    path: PathBuf,
    mmap: Mmap,
    cache: Option<ResultCache>,
    identity: OnceCell<SourceIdentity>,
}

impl Source {
    fn new(path: PathBuf, mmap: Mmap, options: &ReaderOptions) -> Self {
        Self {
            path,
            mmap,
            cache: options.cache_dir.clone().map(ResultCache::new),
            identity: OnceCell::new(),
        }
    }

    fn bytes(&self) -> &[u8] {
        &self.mmap
    }

    /// Runs `compute` through the result cache, if one is configured.
    fn cached<T, F>(&self, header_len: u32, call: &str, args: &[CacheArg], compute: F) -> Result<T>
    where
        T: serde::Serialize + serde::de::DeserializeOwned,
        F: FnOnce() -> Result<T>,
    {
        match &self.cache {
            None => compute(),
            Some(cache) => {
                let identity = self.identity.get_or_init(|| {
                    SourceIdentity::new(&self.path, &self.mmap, header_len as usize)
                });
                cache.get_or_compute(identity, call, args, compute)
            }
        }
    }
}

/// An open NEV event file.
///
/// # Example
///
/// ```no_run
/// use blackrock_core::{EventClass, NevFile};
///
/// let nev = NevFile::open("datafile001.nev").unwrap();
/// for class in nev.available_event_classifications().unwrap() {
///     println!("{}: {} events", class, nev.events(class).unwrap().len());
/// }
/// let times = nev.spike_times_secs(1).unwrap();
/// ```
#[derive(Debug)]
pub struct NevFile {
    source: Source,
    scaling: WaveformScaling,
    header: OnceCell<Result<NevHeader>>,
    index: OnceCell<Result<EventIndex>>,
}

impl NevFile {
    /// Opens with default options and decodes the header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, ReaderOptions::default())
    }

    /// Opens and decodes the header, failing if it does not decode.
    pub fn open_with(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self> {
        let file = Self::open_lazy(path, options)?;
        file.header()?;
        Ok(file)
    }

    /// Maps the file without decoding anything.
    ///
    /// Header errors surface on the first call that needs the header, and on
    /// every call after it.
    pub fn open_lazy(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self::from_map(path.to_path_buf(), map_file(path)?, options))
    }

    fn from_map(path: PathBuf, mmap: Mmap, options: ReaderOptions) -> Self {
        debug!(path = %path.display(), len = mmap.len(), "opened nev file");
        Self {
            source: Source::new(path, mmap, &options),
            scaling: options.waveform_scaling,
            header: OnceCell::new(),
            index: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.source.path
    }

    pub fn header(&self) -> Result<&NevHeader> {
        replay(
            self.header
                .get_or_init(|| decode_nev_header(self.source.bytes())),
        )
    }

    pub fn basic_header(&self) -> Result<&NevBasicHeader> {
        Ok(&self.header()?.basic)
    }

    /// Per-electrode configuration merged from all electrode records.
    pub fn channel_map(&self) -> Result<&ChannelMap> {
        Ok(&self.header()?.channels)
    }

    pub fn auxiliary_records(&self) -> Result<&AuxiliaryRecords> {
        Ok(&self.header()?.auxiliary)
    }

    /// Offsets of every event packet, built on first use.
    pub fn event_index(&self) -> Result<&EventIndex> {
        replay(self.index.get_or_init(|| {
            let header = self.header()?;
            self.source
                .cached(header.basic.bytes_in_headers, "event_index", &[], || {
                    index_events(self.source.bytes(), &header.basic)
                })
        }))
    }

    /// Classifications present in the file, in sorted order.
    pub fn available_event_classifications(&self) -> Result<Vec<EventClass>> {
        Ok(self.event_index()?.classes())
    }

    /// Decodes every event of one classification.
    #[instrument(skip(self), fields(path = %self.source.path.display()))]
    pub fn events(&self, class: EventClass) -> Result<Vec<EventRecord>> {
        let header = self.header()?;
        let index = self.event_index()?;
        let scaling = match self.scaling {
            WaveformScaling::Scaled => 0,
            WaveformScaling::Raw => 1,
        };
        self.source.cached(
            header.basic.bytes_in_headers,
            "events",
            &[CacheArg::Text(class.to_string()), CacheArg::Int(scaling)],
            || decode_events(self.source.bytes(), header, index, class, self.scaling),
        )
    }

    pub fn digital_events(&self) -> Result<Vec<DigitalInput>> {
        Ok(self
            .events(EventClass::Digital)?
            .into_iter()
            .filter_map(|e| match e {
                EventRecord::DigitalInput(d) => Some(d),
                _ => None,
            })
            .collect())
    }

    pub fn comment_events(&self) -> Result<Vec<CommentEvent>> {
        Ok(self
            .events(EventClass::Comment)?
            .into_iter()
            .filter_map(|e| match e {
                EventRecord::Comment(c) => Some(c),
                _ => None,
            })
            .collect())
    }

    fn spikes(&self, electrode: u16) -> Result<Vec<SpikeEvent>> {
        Ok(self
            .events(EventClass::Spike(electrode))?
            .into_iter()
            .filter_map(|e| match e {
                EventRecord::Spike(s) => Some(s),
                _ => None,
            })
            .collect())
    }

    /// Spike timestamps of one electrode, in timestamp ticks.
    pub fn spike_timestamps(&self, electrode: u16) -> Result<Vec<u32>> {
        Ok(self.spikes(electrode)?.iter().map(|s| s.timestamp).collect())
    }

    /// Spike times of one electrode, in seconds.
    pub fn spike_times_secs(&self, electrode: u16) -> Result<Vec<f64>> {
        let resolution = self.basic_header()?.timestamp_resolution;
        if resolution == 0 {
            return Err(DecodeError::InvalidHeader(
                "TimeStamp_Resolution is 0".to_string(),
            ));
        }
        Ok(self
            .spikes(electrode)?
            .iter()
            .map(|s| s.timestamp as f64 / resolution as f64)
            .collect())
    }

    pub fn spike_unit_classes(&self, electrode: u16) -> Result<Vec<u8>> {
        Ok(self
            .spikes(electrode)?
            .iter()
            .map(|s| s.unit_classification)
            .collect())
    }

    /// Waveforms of one electrode with a time axis in milliseconds.
    pub fn spike_waveforms(&self, electrode: u16) -> Result<SpikeWaveforms> {
        let header = self.header()?;
        let width = header
            .channels
            .get(electrode)
            .and_then(|c| c.spike)
            .ok_or(DecodeError::MissingSpikeConfig(electrode))?
            .spike_width_samples as usize;
        let resolution = header.basic.sample_time_resolution;
        if resolution == 0 {
            return Err(DecodeError::InvalidHeader(
                "Sample_Time_Resolution is 0".to_string(),
            ));
        }

        let time_ms = linspace(0.0, width as f64 / resolution as f64, width)
            .into_iter()
            .map(|t| t * 1000.0)
            .collect();
        let waveforms = self
            .spikes(electrode)?
            .into_iter()
            .map(|s| s.waveform)
            .collect();
        Ok(SpikeWaveforms { time_ms, waveforms })
    }

    /// Releases the memory map.
    pub fn close(self) {
        debug!(path = %self.source.path.display(), "closed nev file");
    }
}

/// An open NSx continuous file.
///
/// # Example
///
/// ```no_run
/// use blackrock_core::NsxFile;
///
/// let nsx = NsxFile::open("datafile001.ns5").unwrap();
/// println!("{} Hz", nsx.sampling_frequency().unwrap());
/// let series = nsx.channel_series(1, Some(0.5), Some(1.5), Some(10.0)).unwrap();
/// println!("{} samples", series.len());
/// ```
#[derive(Debug)]
pub struct NsxFile {
    source: Source,
    header: OnceCell<Result<NsxHeader>>,
    data_header: OnceCell<Result<NsxDataHeader>>,
}

impl NsxFile {
    /// Opens with default options and decodes the header.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(path, ReaderOptions::default())
    }

    /// Opens and decodes the header, failing if it does not decode.
    pub fn open_with(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self> {
        let file = Self::open_lazy(path, options)?;
        file.header()?;
        Ok(file)
    }

    /// Maps the file without decoding anything.
    pub fn open_lazy(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self::from_map(path.to_path_buf(), map_file(path)?, options))
    }

    fn from_map(path: PathBuf, mmap: Mmap, options: ReaderOptions) -> Self {
        debug!(path = %path.display(), len = mmap.len(), "opened nsx file");
        Self {
            source: Source::new(path, mmap, &options),
            header: OnceCell::new(),
            data_header: OnceCell::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.source.path
    }

    pub fn header(&self) -> Result<&NsxHeader> {
        replay(
            self.header
                .get_or_init(|| decode_nsx_header(self.source.bytes())),
        )
    }

    pub fn basic_header(&self) -> Result<&NsxBasicHeader> {
        Ok(&self.header()?.basic)
    }

    pub fn channel_map(&self) -> Result<&ChannelMap> {
        Ok(&self.header()?.channels)
    }

    /// Samples per second per channel.
    pub fn sampling_frequency(&self) -> Result<f64> {
        Ok(self.basic_header()?.sampling_frequency())
    }

    pub fn data_header(&self) -> Result<NsxDataHeader> {
        let cell = self.data_header.get_or_init(|| {
            continuous::decode_data_header(self.source.bytes(), self.header()?)
        });
        replay(cell).copied()
    }

    /// Units of the time axis and of the samples of one channel.
    pub fn channel_units(&self, channel: u16) -> Result<(&'static str, String)> {
        let config = self
            .channel_map()?
            .get(channel)
            .ok_or(DecodeError::UnknownChannel(channel))?;
        Ok(("s", config.units.clone().unwrap_or_default()))
    }

    /// Calibrated samples of one channel.
    ///
    /// `start` and `stop` clip the series to an inclusive window in seconds;
    /// `downsample` then shrinks it by that factor.
    #[instrument(skip(self), fields(path = %self.source.path.display()))]
    pub fn channel_series(
        &self,
        channel: u16,
        start: Option<f64>,
        stop: Option<f64>,
        downsample: Option<f64>,
    ) -> Result<ContinuousSeries> {
        let header = self.header()?;
        if !header.channels.contains(channel) {
            return Err(DecodeError::UnknownChannel(channel));
        }
        if let Some(factor) = downsample {
            continuous::check_downsample_factor(factor)?;
        }
        let data = self.data_header()?;

        let full = self.source.cached(
            header.basic.bytes_in_headers,
            "channel_data",
            &[channel.into()],
            || continuous::extract_channel(self.source.bytes(), header, &data, channel),
        )?;
        let clipped = continuous::clip(full, start, stop);
        match downsample {
            Some(factor) => continuous::downsample(clipped, factor),
            None => Ok(clipped),
        }
    }

    /// Releases the memory map.
    pub fn close(self) {
        debug!(path = %self.source.path.display(), "closed nsx file");
    }
}

/// A recording of either format.
#[derive(Debug)]
pub enum Recording {
    Nsx(NsxFile),
    Nev(NevFile),
}

impl Recording {
    pub fn path(&self) -> &Path {
        match self {
            Recording::Nsx(f) => f.path(),
            Recording::Nev(f) => f.path(),
        }
    }

    pub fn close(self) {
        match self {
            Recording::Nsx(f) => f.close(),
            Recording::Nev(f) => f.close(),
        }
    }
}

/// Opens a recording with default options, choosing the format from its file type identifier.
pub fn open(path: impl AsRef<Path>) -> Result<Recording> {
    open_with(path, ReaderOptions::default())
}

/// Opens a recording, choosing the format from its file type identifier.
pub fn open_with(path: impl AsRef<Path>, options: ReaderOptions) -> Result<Recording> {
    let path = path.as_ref();
    let mmap = map_file(path)?;
    let recording = match file_type_id(&mmap)?.as_str() {
        NSX_FILE_TYPE_ID => {
            let file = NsxFile::from_map(path.to_path_buf(), mmap, options);
            file.header()?;
            Recording::Nsx(file)
        }
        NEV_FILE_TYPE_ID => {
            let file = NevFile::from_map(path.to_path_buf(), mmap, options);
            file.header()?;
            Recording::Nev(file)
        }
        other => {
            return Err(DecodeError::InvalidHeader(format!(
                "unsupported file type {:?}",
                other
            )))
        }
    };
    Ok(recording)
}
