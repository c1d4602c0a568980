//! Builders for small synthetic NSx and NEV files.
//!
//! Used by the unit tests, the integration tests and the benchmarks. The
//! output is bit-exact with the on-disk layouts in [`crate::schema`].

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use byteorder::{LittleEndian, WriteBytesExt};

use crate::schema::{
    ExtendedRecordKind, NEV_BASIC, NEV_EXTENDED_BODY_SIZE, NEV_EXTENDED_TAG_SIZE,
    NEV_FILE_TYPE_ID, NSX_BASIC, NSX_EXTENDED, NSX_FILE_TYPE_ID,
};

const TIME_ORIGIN: [u16; 8] = [2021, 4, 4, 1, 12, 30, 15, 250];
const DEFAULT_PACKET_SIZE: u32 = 104;

/// `text` truncated or NUL-padded to exactly `width` bytes.
fn text_field(text: &str, width: usize) -> Vec<u8> {
    let mut field = vec![0u8; width];
    let bytes = text.as_bytes();
    let n = bytes.len().min(width);
    field[..n].copy_from_slice(&bytes[..n]);
    field
}

fn write_text<W: Write>(w: &mut W, text: &str, width: usize) -> io::Result<()> {
    w.write_all(&text_field(text, width))
}

fn write_time_origin<W: Write>(w: &mut W) -> io::Result<()> {
    for word in TIME_ORIGIN {
        w.write_u16::<LittleEndian>(word)?;
    }
    Ok(())
}

fn write_file(
    path: &Path,
    encode: impl FnOnce(&mut BufWriter<File>) -> io::Result<()>,
) -> io::Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    encode(&mut w)?;
    w.flush()
}

/// One NSx channel description.
#[derive(Debug, Clone)]
pub struct NsxChannel {
    id: u16,
    label: String,
    units: String,
    range: [i16; 4],
}

impl NsxChannel {
    /// A channel whose digital and analog ranges match, so calibration is the identity.
    pub fn new(id: u16, label: &str) -> Self {
        Self {
            id,
            label: label.to_string(),
            units: "uV".to_string(),
            range: [i16::MIN, i16::MAX, i16::MIN, i16::MAX],
        }
    }

    pub fn units(mut self, units: &str) -> Self {
        self.units = units.to_string();
        self
    }

    pub fn range(
        mut self,
        min_digital: i16,
        max_digital: i16,
        min_analog: i16,
        max_analog: i16,
    ) -> Self {
        self.range = [min_digital, max_digital, min_analog, max_analog];
        self
    }
}

/// Writes an NSx 2.3 file with a single data block.
#[derive(Debug, Clone)]
pub struct NsxBuilder {
    label: String,
    period: u32,
    time_resolution: u32,
    channels: Vec<NsxChannel>,
    bytes_in_headers: Option<u32>,
    start_timestamp: u32,
    num_data_points: Option<u32>,
    frames: Vec<Vec<i16>>,
}

impl Default for NsxBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NsxBuilder {
    pub fn new() -> Self {
        Self {
            label: "30 kS/s".to_string(),
            period: 1,
            time_resolution: 30000,
            channels: Vec::new(),
            bytes_in_headers: None,
            start_timestamp: 0,
            num_data_points: None,
            frames: Vec::new(),
        }
    }

    pub fn label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn period(mut self, period: u32) -> Self {
        self.period = period;
        self
    }

    pub fn time_resolution(mut self, ticks_per_second: u32) -> Self {
        self.time_resolution = ticks_per_second;
        self
    }

    pub fn channel(mut self, channel: NsxChannel) -> Self {
        self.channels.push(channel);
        self
    }

    /// Overrides the declared header length.
    pub fn bytes_in_headers(mut self, bytes: u32) -> Self {
        self.bytes_in_headers = Some(bytes);
        self
    }

    pub fn start_timestamp(mut self, timestamp: u32) -> Self {
        self.start_timestamp = timestamp;
        self
    }

    /// Overrides the declared number of stored frames.
    pub fn num_data_points(mut self, n: u32) -> Self {
        self.num_data_points = Some(n);
        self
    }

    /// Sample frames, one value per channel in channel order.
    pub fn frames<const N: usize>(mut self, frames: &[[i16; N]]) -> Self {
        self.frames = frames.iter().map(|f| f.to_vec()).collect();
        self
    }

    /// Appends `n` frames generated by `sample(frame, channel_ordinal)`.
    pub fn generated_frames(mut self, n: usize, sample: impl Fn(usize, usize) -> i16) -> Self {
        let width = self.channels.len();
        self.frames
            .extend((0..n).map(|i| (0..width).map(|c| sample(i, c)).collect::<Vec<_>>()));
        self
    }

    pub fn write_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let header_len = NSX_BASIC.size + self.channels.len() * NSX_EXTENDED.size;
        let bytes_in_headers = self.bytes_in_headers.unwrap_or(header_len as u32);

        write_text(w, NSX_FILE_TYPE_ID, 8)?;
        w.write_all(&[2, 3])?;
        w.write_u32::<LittleEndian>(bytes_in_headers)?;
        write_text(w, &self.label, 16)?;
        write_text(w, "synthetic", 256)?;
        w.write_u32::<LittleEndian>(self.period)?;
        w.write_u32::<LittleEndian>(self.time_resolution)?;
        write_time_origin(w)?;
        w.write_u32::<LittleEndian>(self.channels.len() as u32)?;

        for (i, c) in self.channels.iter().enumerate() {
            write_text(w, "CC", 2)?;
            w.write_u16::<LittleEndian>(c.id)?;
            write_text(w, &c.label, 16)?;
            w.write_u8(1 + (i / 32) as u8)?;
            w.write_u8(1 + (i % 32) as u8)?;
            for v in c.range {
                w.write_i16::<LittleEndian>(v)?;
            }
            write_text(w, &c.units, 16)?;
            for (corner, order, kind) in [(300u32, 1u32, 1u16), (7500, 3, 1)] {
                w.write_u32::<LittleEndian>(corner)?;
                w.write_u32::<LittleEndian>(order)?;
                w.write_u16::<LittleEndian>(kind)?;
            }
        }

        w.write_u8(1)?;
        w.write_u32::<LittleEndian>(self.start_timestamp)?;
        w.write_u32::<LittleEndian>(self.num_data_points.unwrap_or(self.frames.len() as u32))?;
        for frame in &self.frames {
            for &s in frame {
                w.write_i16::<LittleEndian>(s)?;
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        // Writing into a Vec does not fail.
        let _ = self.write_into(&mut out);
        out
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> io::Result<()> {
        write_file(path.as_ref(), |w| self.write_into(w))
    }
}

/// Spike waveform configuration of one NEV electrode.
#[derive(Debug, Clone, Copy)]
pub struct SpikeChannel {
    id: u16,
    factor: u16,
    samples: u16,
    bytes_per_sample: u8,
}

impl SpikeChannel {
    /// 48 two-byte samples with a digitization factor of 1.
    pub fn new(id: u16) -> Self {
        Self {
            id,
            factor: 1,
            samples: 48,
            bytes_per_sample: 2,
        }
    }

    pub fn factor(mut self, factor: u16) -> Self {
        self.factor = factor;
        self
    }

    pub fn width(mut self, samples: u16, bytes_per_sample: u8) -> Self {
        self.samples = samples;
        self.bytes_per_sample = bytes_per_sample;
        self
    }

    fn stored_width(&self) -> usize {
        if self.bytes_per_sample <= 1 {
            1
        } else {
            2
        }
    }
}

#[derive(Debug, Clone)]
enum Packet {
    Digital { timestamp: u32, value: u16 },
    Spike { timestamp: u32, electrode: u16, unit: u8, samples: Vec<i16> },
    Comment { timestamp: u32, text: String },
    Raw { timestamp: u32, packet_id: u16 },
}

/// Writes an NEV file with extended headers and event packets.
#[derive(Debug, Clone)]
pub struct NevBuilder {
    packet_size: Option<u32>,
    application: String,
    timestamp_resolution: u32,
    sample_time_resolution: u32,
    extended: Vec<(ExtendedRecordKind, Vec<u8>)>,
    spike_channels: HashMap<u16, SpikeChannel>,
    packets: Vec<Packet>,
}

impl Default for NevBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl NevBuilder {
    pub fn new() -> Self {
        Self {
            packet_size: None,
            application: "synthetic".to_string(),
            timestamp_resolution: 30000,
            sample_time_resolution: 30000,
            extended: Vec::new(),
            spike_channels: HashMap::new(),
            packets: Vec::new(),
        }
    }

    /// Overrides `Bytes_in_DataPackets`, which otherwise fits the widest waveform.
    pub fn packet_size(mut self, size: u32) -> Self {
        self.packet_size = Some(size);
        self
    }

    pub fn application(mut self, name: &str) -> Self {
        self.application = name.to_string();
        self
    }

    pub fn sample_time_resolution(mut self, samples_per_second: u32) -> Self {
        self.sample_time_resolution = samples_per_second;
        self
    }

    pub fn timestamp_resolution(mut self, ticks_per_second: u32) -> Self {
        self.timestamp_resolution = ticks_per_second;
        self
    }

    fn record(mut self, kind: ExtendedRecordKind, body: Vec<u8>) -> Self {
        self.extended.push((kind, body));
        self
    }

    /// Adds a NEUEVWAV record.
    pub fn spike_channel(mut self, channel: SpikeChannel) -> Self {
        self.spike_channels.entry(channel.id).or_insert(channel);
        let mut body = Vec::with_capacity(NEV_EXTENDED_BODY_SIZE);
        body.extend_from_slice(&channel.id.to_le_bytes());
        body.extend_from_slice(&[1, (channel.id % 128) as u8]);
        body.extend_from_slice(&channel.factor.to_le_bytes());
        body.extend_from_slice(&0u16.to_le_bytes());
        body.extend_from_slice(&(-100i16).to_le_bytes());
        body.extend_from_slice(&(-50i16).to_le_bytes());
        body.extend_from_slice(&[2, channel.bytes_per_sample]);
        body.extend_from_slice(&channel.samples.to_le_bytes());
        self.record(ExtendedRecordKind::SpikeWaveform, body)
    }

    /// Adds a NEUEVLBL record.
    pub fn label(self, electrode: u16, label: &str) -> Self {
        let mut body = electrode.to_le_bytes().to_vec();
        body.extend_from_slice(label.as_bytes());
        self.record(ExtendedRecordKind::ElectrodeLabel, body)
    }

    /// Adds a NEUEVFLT record with the given corner frequencies.
    pub fn filter(self, electrode: u16, high_corner: u32, low_corner: u32) -> Self {
        let mut body = electrode.to_le_bytes().to_vec();
        for (corner, order, kind) in [(high_corner, 1u32, 1u16), (low_corner, 3, 1)] {
            body.extend_from_slice(&corner.to_le_bytes());
            body.extend_from_slice(&order.to_le_bytes());
            body.extend_from_slice(&kind.to_le_bytes());
        }
        self.record(ExtendedRecordKind::ElectrodeFilter, body)
    }

    pub fn array_name(self, name: &str) -> Self {
        self.record(ExtendedRecordKind::ArrayName, name.as_bytes().to_vec())
    }

    /// Adds an ECOMMENT record.
    pub fn comment(self, text: &str) -> Self {
        self.record(ExtendedRecordKind::ExtraComment, text.as_bytes().to_vec())
    }

    pub fn map_file(self, name: &str) -> Self {
        self.record(ExtendedRecordKind::MapFile, name.as_bytes().to_vec())
    }

    /// Adds a DIGLABEL record; `serial` selects serial over parallel mode.
    pub fn digital_label(self, label: &str, serial: bool) -> Self {
        let mut body = text_field(label, 16);
        body.push(serial as u8);
        self.record(ExtendedRecordKind::DigitalLabel, body)
    }

    /// Adds an NSASEXEV record with `(config, detect_value)` for analog inputs 1 to 5.
    pub fn serial_expansion(
        self,
        frequency: u16,
        digital_config: u8,
        analog: [(u8, i16); 5],
    ) -> Self {
        let mut body = frequency.to_le_bytes().to_vec();
        body.push(digital_config);
        for (config, detect) in analog {
            body.push(config);
            body.extend_from_slice(&detect.to_le_bytes());
        }
        self.record(ExtendedRecordKind::SerialExpansion, body)
    }

    /// Adds a VIDEOSYN record.
    pub fn video_sync(self, source_id: u16, source: &str, frame_rate: f32) -> Self {
        let mut body = source_id.to_le_bytes().to_vec();
        body.extend_from_slice(&text_field(source, 16));
        body.extend_from_slice(&frame_rate.to_le_bytes());
        self.record(ExtendedRecordKind::VideoSync, body)
    }

    /// Adds a TRACKOBJ record.
    pub fn track_object(self, kind: u16, id: u16, point_count: u16, source: &str) -> Self {
        let mut body = Vec::with_capacity(NEV_EXTENDED_BODY_SIZE);
        for word in [kind, id, point_count] {
            body.extend_from_slice(&word.to_le_bytes());
        }
        body.extend_from_slice(&text_field(source, 16));
        self.record(ExtendedRecordKind::TrackObject, body)
    }

    pub fn digital(mut self, timestamp: u32, value: u16) -> Self {
        self.packets.push(Packet::Digital { timestamp, value });
        self
    }

    /// Adds a spike packet, stored at the electrode's configured sample width.
    pub fn spike(mut self, timestamp: u32, electrode: u16, unit: u8, samples: &[i16]) -> Self {
        self.packets.push(Packet::Spike {
            timestamp,
            electrode,
            unit,
            samples: samples.to_vec(),
        });
        self
    }

    pub fn comment_event(mut self, timestamp: u32, text: &str) -> Self {
        self.packets.push(Packet::Comment {
            timestamp,
            text: text.to_string(),
        });
        self
    }

    /// Adds a packet with an arbitrary type code and an empty payload.
    pub fn raw_packet(mut self, timestamp: u32, packet_id: u16) -> Self {
        self.packets.push(Packet::Raw {
            timestamp,
            packet_id,
        });
        self
    }

    fn effective_packet_size(&self) -> usize {
        self.packet_size.map(|s| s as usize).unwrap_or_else(|| {
            self.spike_channels
                .values()
                .map(|c| 8 + c.samples as usize * c.stored_width())
                .fold(DEFAULT_PACKET_SIZE as usize, usize::max)
        })
    }

    fn encode_packet(&self, packet: &Packet, size: usize) -> io::Result<Vec<u8>> {
        let mut p = Vec::with_capacity(size);
        match packet {
            Packet::Digital { timestamp, value } => {
                p.write_u32::<LittleEndian>(*timestamp)?;
                p.write_u16::<LittleEndian>(0)?;
                p.write_u8(1)?;
                p.write_u8(0)?;
                p.write_u16::<LittleEndian>(*value)?;
            }
            Packet::Spike {
                timestamp,
                electrode,
                unit,
                samples,
            } => {
                p.write_u32::<LittleEndian>(*timestamp)?;
                p.write_u16::<LittleEndian>(*electrode)?;
                p.write_u8(*unit)?;
                p.write_u8(0)?;
                let width = self
                    .spike_channels
                    .get(electrode)
                    .map_or(2, SpikeChannel::stored_width);
                for &s in samples {
                    if width == 1 {
                        p.write_i8(s as i8)?;
                    } else {
                        p.write_i16::<LittleEndian>(s)?;
                    }
                }
            }
            Packet::Comment { timestamp, text } => {
                p.write_u32::<LittleEndian>(*timestamp)?;
                p.write_u16::<LittleEndian>(65535)?;
                p.write_u8(0)?;
                p.write_u8(0)?;
                p.write_u32::<LittleEndian>(0)?;
                p.write_all(text.as_bytes())?;
            }
            Packet::Raw {
                timestamp,
                packet_id,
            } => {
                p.write_u32::<LittleEndian>(*timestamp)?;
                p.write_u16::<LittleEndian>(*packet_id)?;
            }
        }
        p.resize(size, 0);
        Ok(p)
    }

    pub fn write_into<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let header_len =
            NEV_BASIC.size + self.extended.len() * (NEV_EXTENDED_TAG_SIZE + NEV_EXTENDED_BODY_SIZE);
        let packet_size = self.effective_packet_size();

        write_text(w, NEV_FILE_TYPE_ID, 8)?;
        w.write_all(&[2, 3])?;
        w.write_u16::<LittleEndian>(0)?;
        w.write_u32::<LittleEndian>(header_len as u32)?;
        w.write_u32::<LittleEndian>(packet_size as u32)?;
        w.write_u32::<LittleEndian>(self.timestamp_resolution)?;
        w.write_u32::<LittleEndian>(self.sample_time_resolution)?;
        write_time_origin(w)?;
        write_text(w, &self.application, 32)?;
        write_text(w, "synthetic", 256)?;
        w.write_u32::<LittleEndian>(self.extended.len() as u32)?;

        for (kind, body) in &self.extended {
            w.write_all(&kind.tag_bytes())?;
            let mut padded = body.clone();
            padded.resize(NEV_EXTENDED_BODY_SIZE, 0);
            w.write_all(&padded)?;
        }

        if packet_size > 0 {
            for packet in &self.packets {
                w.write_all(&self.encode_packet(packet, packet_size)?)?;
            }
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        // Writing into a Vec does not fail.
        let _ = self.write_into(&mut out);
        out
    }

    pub fn write_to(&self, path: impl AsRef<Path>) -> io::Result<()> {
        write_file(path.as_ref(), |w| self.write_into(w))
    }
}
