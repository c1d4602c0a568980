//! Core types for decoded NSx and NEV data.
//!
//! This module defines the header structures, the per-electrode channel
//! table, the event classifications and records of NEV files, and the
//! calibrated continuous series of NSx files.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, Result};
use crate::parser::Record;
use crate::schema::ExtendedRecordKind;

const MONTHS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];
const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thr", "Fri", "Sat", "Sun"];

/// Recording start time, stored on disk as a Windows SYSTEMTIME structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeOrigin {
    pub year: u16,
    pub month: u16,
    pub day_of_week: u16,
    pub day: u16,
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
    pub millisecond: u16,
}

impl TimeOrigin {
    /// Builds a time origin from the eight SYSTEMTIME words, in file order.
    pub fn from_words(w: [u16; 8]) -> Self {
        Self {
            year: w[0],
            month: w[1],
            day_of_week: w[2],
            day: w[3],
            hour: w[4],
            minute: w[5],
            second: w[6],
            millisecond: w[7],
        }
    }

    /// The eight SYSTEMTIME words, in file order.
    pub fn words(&self) -> [u16; 8] {
        [
            self.year,
            self.month,
            self.day_of_week,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.millisecond,
        ]
    }

    /// Converts to a calendar timestamp, or `None` if the fields are not a valid date.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        NaiveDate::from_ymd_opt(self.year as i32, self.month as u32, self.day as u32)?
            .and_hms_milli_opt(
                self.hour as u32,
                self.minute as u32,
                self.second as u32,
                self.millisecond as u32,
            )
    }

    fn month_name(&self) -> &'static str {
        (self.month as usize)
            .checked_sub(1)
            .and_then(|i| MONTHS.get(i))
            .copied()
            .unwrap_or("???")
    }

    fn weekday_name(&self) -> &'static str {
        // SYSTEMTIME counts Sunday as 0; the name table starts at Monday = 1.
        match self.day_of_week {
            0 => "Sun",
            d => WEEKDAYS.get(d as usize - 1).copied().unwrap_or("???"),
        }
    }
}

impl fmt::Display for TimeOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}({}), {}:{}:{}.{}",
            self.month_name(),
            self.day,
            self.year,
            self.weekday_name(),
            self.hour,
            self.minute,
            self.second,
            self.millisecond
        )
    }
}

/// Basic header of an NSx (continuous) file.
#[derive(Debug, Clone, PartialEq)]
pub struct NsxBasicHeader {
    pub file_type_id: String,
    pub file_spec: String,
    pub bytes_in_headers: u32,
    pub label: String,
    pub comment: String,
    /// Sampling period in timestamp ticks
    pub period: u32,
    /// Timestamp ticks per second
    pub time_resolution: u32,
    pub time_origin: TimeOrigin,
    pub channel_count: u32,
}

impl NsxBasicHeader {
    /// Samples per second per channel.
    pub fn sampling_frequency(&self) -> f64 {
        self.time_resolution as f64 / self.period as f64
    }
}

/// Basic header of an NEV (event) file.
#[derive(Debug, Clone, PartialEq)]
pub struct NevBasicHeader {
    pub file_type_id: String,
    pub file_spec: String,
    pub add_flags: u16,
    pub bytes_in_headers: u32,
    pub bytes_in_data_packets: u32,
    /// Timestamp ticks per second
    pub timestamp_resolution: u32,
    /// Waveform samples per second
    pub sample_time_resolution: u32,
    pub time_origin: TimeOrigin,
    pub creating_application: String,
    pub comment: String,
    pub num_extended_headers: u32,
}

/// Digital and analog extremes used to calibrate continuous samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalogRange {
    pub min_digital: i16,
    pub max_digital: i16,
    pub min_analog: i16,
    pub max_analog: i16,
}

impl AnalogRange {
    /// Multiplier-free form of the calibration: `(bias_d, centered_d, bias_a, centered_a)`.
    fn terms(&self) -> (f64, f64, f64, f64) {
        let bias_d = (self.max_digital as f64 + self.min_digital as f64) / 2.0;
        let bias_a = (self.max_analog as f64 + self.min_analog as f64) / 2.0;
        (
            bias_d,
            self.max_digital as f64 - bias_d,
            bias_a,
            self.max_analog as f64 - bias_a,
        )
    }

    /// Whether the digital range is non-empty. A flat analog range is allowed
    /// and maps every sample to its midpoint.
    pub fn is_valid(&self) -> bool {
        self.max_digital != self.min_digital
    }

    /// Converts a digital value to its analog value.
    pub fn to_analog(&self, digital: f64) -> f64 {
        let (bias_d, centered_d, bias_a, centered_a) = self.terms();
        (digital - bias_d) * (centered_a / centered_d) + bias_a
    }
}

/// Hardware filter settings of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterConfig {
    pub high_freq_corner: u32,
    pub high_freq_order: u32,
    pub high_filter_type: u16,
    pub low_freq_corner: u32,
    pub low_freq_order: u32,
    pub low_filter_type: u16,
}

/// Spike waveform configuration of an NEV electrode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpikeConfig {
    pub digitization_factor: u16,
    pub energy_threshold: u16,
    pub high_threshold: i16,
    pub low_threshold: i16,
    pub num_sorted_units: u8,
    pub bytes_per_waveform: u8,
    pub spike_width_samples: u16,
}

impl SpikeConfig {
    /// Width of one stored waveform sample: 1 byte when `Bytes_Per_Waveform <= 1`, 2 bytes when 2.
    pub fn sample_width(&self, electrode: u16) -> Result<usize> {
        match self.bytes_per_waveform {
            0 | 1 => Ok(1),
            2 => Ok(2),
            bytes => Err(DecodeError::UnsupportedWaveformWidth { electrode, bytes }),
        }
    }
}

/// Everything the extended headers say about one electrode.
///
/// NEV files spread this over several records; fields already set are never
/// overwritten by a later record.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChannelConfig {
    pub electrode_id: u16,
    pub label: Option<String>,
    pub physical_connector: Option<u8>,
    pub connector_pin: Option<u8>,
    pub units: Option<String>,
    pub analog: Option<AnalogRange>,
    pub filter: Option<FilterConfig>,
    pub spike: Option<SpikeConfig>,
}

impl ChannelConfig {
    pub fn new(electrode_id: u16) -> Self {
        Self {
            electrode_id,
            ..Default::default()
        }
    }

    /// Fills every unset field from `other`. First writer wins.
    pub fn merge(&mut self, other: ChannelConfig) {
        self.label = self.label.take().or(other.label);
        self.physical_connector = self.physical_connector.or(other.physical_connector);
        self.connector_pin = self.connector_pin.or(other.connector_pin);
        self.units = self.units.take().or(other.units);
        self.analog = self.analog.or(other.analog);
        self.filter = self.filter.or(other.filter);
        self.spike = self.spike.or(other.spike);
    }

    /// Label shown in the channel map; empty when no label record was seen.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or("")
    }
}

/// Per-electrode configuration keyed by electrode id, in first-seen order.
///
/// The position of an electrode in this table is its ordinal in the
/// interleaved NSx sample region.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelMap {
    channels: Vec<ChannelConfig>,
    index: HashMap<u16, usize>,
}

impl ChannelMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a configuration, merging into an existing entry for the same electrode.
    pub fn merge(&mut self, config: ChannelConfig) {
        match self.index.get(&config.electrode_id) {
            Some(&pos) => self.channels[pos].merge(config),
            None => {
                self.index.insert(config.electrode_id, self.channels.len());
                self.channels.push(config);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    pub fn contains(&self, electrode_id: u16) -> bool {
        self.index.contains_key(&electrode_id)
    }

    pub fn get(&self, electrode_id: u16) -> Option<&ChannelConfig> {
        self.index.get(&electrode_id).map(|&pos| &self.channels[pos])
    }

    /// Ordinal of the electrode in first-seen order.
    pub fn position(&self, electrode_id: u16) -> Option<usize> {
        self.index.get(&electrode_id).copied()
    }

    pub fn label(&self, electrode_id: u16) -> Option<&str> {
        self.get(electrode_id).map(ChannelConfig::display_label)
    }

    pub fn ids(&self) -> impl Iterator<Item = u16> + '_ {
        self.channels.iter().map(|c| c.electrode_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelConfig> {
        self.channels.iter()
    }

    /// Electrode id to display label, in first-seen order.
    pub fn labels(&self) -> Vec<(u16, String)> {
        self.channels
            .iter()
            .map(|c| (c.electrode_id, c.display_label().to_string()))
            .collect()
    }
}

/// Non-electrode extended header records, grouped by record type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuxiliaryRecords {
    records: BTreeMap<ExtendedRecordKind, Vec<Record>>,
}

impl AuxiliaryRecords {
    pub fn push(&mut self, kind: ExtendedRecordKind, record: Record) {
        self.records.entry(kind).or_default().push(record);
    }

    /// All records of one type, in file order.
    pub fn get(&self, kind: ExtendedRecordKind) -> &[Record] {
        self.records.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The first record of one type.
    pub fn first(&self, kind: ExtendedRecordKind) -> Option<&Record> {
        self.get(kind).first()
    }

    pub fn kinds(&self) -> impl Iterator<Item = ExtendedRecordKind> + '_ {
        self.records.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Device events that are recognized by packet id but not decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeviceEvent {
    Configuration,
    Log,
    ButtonTrigger,
    Tracking,
    VideoSync,
}

impl DeviceEvent {
    pub fn packet_id(self) -> u16 {
        match self {
            DeviceEvent::Configuration => 65530,
            DeviceEvent::Log => 65531,
            DeviceEvent::ButtonTrigger => 65532,
            DeviceEvent::Tracking => 65533,
            DeviceEvent::VideoSync => 65534,
        }
    }
}

/// Classification of an NEV event packet by its type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventClass {
    /// Packet id 0
    Digital,
    /// Packet ids 1..=2048, one class per electrode
    Spike(u16),
    /// Packet id 65535
    Comment,
    /// Packet ids 65530..=65534
    Device(DeviceEvent),
    /// Any other packet id
    Unrecognized(u16),
}

/// Highest packet id that denotes a spike on an electrode.
pub const MAX_SPIKE_ELECTRODE: u16 = 2048;

impl EventClass {
    /// Classifies a packet by the type code at offset 4.
    pub fn from_packet_id(id: u16) -> Self {
        match id {
            0 => EventClass::Digital,
            1..=MAX_SPIKE_ELECTRODE => EventClass::Spike(id),
            65535 => EventClass::Comment,
            65530 => EventClass::Device(DeviceEvent::Configuration),
            65531 => EventClass::Device(DeviceEvent::Log),
            65532 => EventClass::Device(DeviceEvent::ButtonTrigger),
            65533 => EventClass::Device(DeviceEvent::Tracking),
            65534 => EventClass::Device(DeviceEvent::VideoSync),
            other => EventClass::Unrecognized(other),
        }
    }

    /// Whether packets of this class can be decoded into typed records.
    pub fn is_decodable(&self) -> bool {
        matches!(
            self,
            EventClass::Digital | EventClass::Spike(_) | EventClass::Comment
        )
    }
}

impl fmt::Display for EventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventClass::Digital => write!(f, "Digital_Events"),
            EventClass::Spike(id) => write!(f, "{}", id),
            EventClass::Comment => write!(f, "Comment_Events"),
            EventClass::Device(DeviceEvent::VideoSync) => write!(f, "Video_Sync_Event"),
            EventClass::Device(DeviceEvent::Tracking) => write!(f, "Tracking_Event"),
            EventClass::Device(DeviceEvent::ButtonTrigger) => write!(f, "Button_Trigger_Event"),
            EventClass::Device(DeviceEvent::Log) => write!(f, "Log_Event"),
            EventClass::Device(DeviceEvent::Configuration) => write!(f, "Configuration_Event"),
            EventClass::Unrecognized(id) => write!(f, "Unrecognized({})", id),
        }
    }
}

/// Byte offsets of every event packet, grouped by classification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventIndex {
    offsets: BTreeMap<EventClass, Vec<u64>>,
}

impl EventIndex {
    pub(crate) fn push(&mut self, class: EventClass, offset: u64) {
        self.offsets.entry(class).or_default().push(offset);
    }

    /// Classifications present in the file, sorted.
    pub fn classes(&self) -> Vec<EventClass> {
        self.offsets.keys().copied().collect()
    }

    /// Absolute packet offsets of one classification, in file order.
    pub fn offsets(&self, class: EventClass) -> &[u64] {
        self.offsets.get(&class).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of indexed packets.
    pub fn packet_count(&self) -> usize {
        self.offsets.values().map(Vec::len).sum()
    }
}

/// Spike waveform samples.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Waveform {
    /// Raw samples multiplied by the electrode's digitization factor
    Scaled(Vec<f64>),
    /// Raw samples widened to `i32` without scaling
    Raw(Vec<i32>),
}

impl Waveform {
    pub fn len(&self) -> usize {
        match self {
            Waveform::Scaled(v) => v.len(),
            Waveform::Raw(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples as floating point, whichever representation is stored.
    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            Waveform::Scaled(v) => v.clone(),
            Waveform::Raw(v) => v.iter().map(|&s| s as f64).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalInput {
    pub timestamp: u32,
    pub insertion_reason: u8,
    pub reserved: u8,
    pub digital_value: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpikeEvent {
    pub timestamp: u32,
    pub electrode: u16,
    pub unit_classification: u8,
    pub reserved: u8,
    pub waveform: Waveform,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentEvent {
    pub timestamp: u32,
    pub char_set: u8,
    pub flag: u8,
    pub data: u32,
    pub text: String,
}

/// A packet whose type is known or seen but whose payload is not decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnimplementedEvent {
    pub timestamp: u32,
    pub packet_id: u16,
}

/// One decoded NEV event packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventRecord {
    DigitalInput(DigitalInput),
    Spike(SpikeEvent),
    Comment(CommentEvent),
    Unimplemented(UnimplementedEvent),
}

impl EventRecord {
    pub fn timestamp(&self) -> u32 {
        match self {
            EventRecord::DigitalInput(e) => e.timestamp,
            EventRecord::Spike(e) => e.timestamp,
            EventRecord::Comment(e) => e.timestamp,
            EventRecord::Unimplemented(e) => e.timestamp,
        }
    }
}

/// Physical unit of scaled spike waveform samples.
pub const WAVEFORM_UNITS: &str = "nV";

/// All waveforms of one electrode with their shared time axis.
#[derive(Debug, Clone, PartialEq)]
pub struct SpikeWaveforms {
    /// Sample times in milliseconds from the start of the waveform
    pub time_ms: Vec<f64>,
    pub waveforms: Vec<Waveform>,
}

/// The data block descriptor that follows the NSx headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NsxDataHeader {
    /// Timestamp of the first stored sample
    pub timestamp: u32,
    /// Stored samples per channel
    pub num_data_points: u32,
}

impl NsxDataHeader {
    /// Stored samples plus the implicit zero run before the first one.
    pub fn total_data_points(&self) -> u64 {
        self.timestamp as u64 + self.num_data_points as u64
    }
}

/// Calibrated samples of one NSx channel and their time axis in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousSeries {
    pub channel: u16,
    pub time: Vec<f64>,
    pub samples: Vec<f64>,
    /// Number of leading zero samples standing in for the recording start offset
    pub zero_pad: usize,
}

impl ContinuousSeries {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
