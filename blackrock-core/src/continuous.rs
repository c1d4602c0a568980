//! Continuous sample extraction for NSx files.
//!
//! The sample region holds one frame per time point, each frame carrying one
//! little-endian `i16` per channel in channel-map order. A single channel is
//! therefore a strided read across the whole region.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, instrument};

use crate::error::{DecodeError, Result};
use crate::header::NsxHeader;
use crate::parser::{decode_record, field_bytes};
use crate::resample::resample;
use crate::schema::{NSX_DATA_HEADER, NSX_SAMPLE_WIDTH};
use crate::types::{ContinuousSeries, NsxDataHeader};

/// Largest accepted ratio of output length to input length when resampling.
pub const MAX_UPSAMPLE_RATIO: f64 = 1024.0;

/// Accepts finite positive factors that upsample by at most [`MAX_UPSAMPLE_RATIO`].
pub fn check_downsample_factor(factor: f64) -> Result<()> {
    if factor.is_finite() && factor > 0.0 && factor * MAX_UPSAMPLE_RATIO >= 1.0 {
        Ok(())
    } else {
        Err(DecodeError::InvalidDownsampleFactor(factor))
    }
}

/// `n` evenly spaced points from `start` to `stop`, both inclusive.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Decodes the data block header that follows the extended headers.
pub fn decode_data_header(buf: &[u8], header: &NsxHeader) -> Result<NsxDataHeader> {
    let r = decode_record(&NSX_DATA_HEADER, buf, header.basic.bytes_in_headers as usize)?;
    let marker = r.u8("Header")?;
    if marker != 1 {
        return Err(DecodeError::InvalidDataBlockMarker(marker));
    }
    Ok(NsxDataHeader {
        timestamp: r.u32("Timestamp")?,
        num_data_points: r.u32("Number_of_Data_Points")?,
    })
}

/// Extracts and calibrates every sample of one channel.
///
/// The series starts with `data.timestamp` zero samples standing in for the
/// time before the first stored frame. The time axis spreads the padded
/// series evenly over `0..=total / fs` seconds.
#[instrument(level = "debug", skip(buf, header, data))]
pub fn extract_channel(
    buf: &[u8],
    header: &NsxHeader,
    data: &NsxDataHeader,
    channel: u16,
) -> Result<ContinuousSeries> {
    let ordinal = header
        .channels
        .position(channel)
        .ok_or(DecodeError::UnknownChannel(channel))?;
    let range = header
        .channels
        .get(channel)
        .and_then(|c| c.analog)
        .filter(|r| r.is_valid())
        .ok_or_else(|| {
            DecodeError::InvalidHeader(format!("channel {} has no usable analog range", channel))
        })?;

    let channel_count = header.basic.channel_count as usize;
    if ordinal >= channel_count {
        return Err(DecodeError::InvalidHeader(format!(
            "channel {} sits at position {} of a {}-channel frame",
            channel, ordinal, channel_count
        )));
    }

    let frame = channel_count * NSX_SAMPLE_WIDTH;
    let start = header.basic.bytes_in_headers as usize + NSX_DATA_HEADER.size;
    field_bytes(buf, "sample region", start, 0)?;
    let region = &buf[start..];
    let stored = data.num_data_points as usize;
    if region.len() % frame != 0 || region.len() / frame < stored {
        return Err(DecodeError::TruncatedFile {
            region: region.len() as u64,
            stride: frame as u64,
        });
    }

    let zero_pad = data.timestamp as usize;
    let at = ordinal * NSX_SAMPLE_WIDTH;
    let mut digital = vec![0i16; zero_pad];
    digital.extend(
        region
            .chunks_exact(frame)
            .take(stored)
            .map(|f| LittleEndian::read_i16(&f[at..at + NSX_SAMPLE_WIDTH])),
    );

    let samples: Vec<f64> = digital.iter().map(|&d| range.to_analog(d as f64)).collect();
    let duration = data.total_data_points() as f64 / header.basic.sampling_frequency();
    let time = linspace(0.0, duration, samples.len());

    debug!(stored, zero_pad, "extracted channel");
    Ok(ContinuousSeries {
        channel,
        time,
        samples,
        zero_pad,
    })
}

/// Keeps the points whose time lies in `[start, stop]`.
///
/// Missing bounds default to the first and last time point.
pub fn clip(series: ContinuousSeries, start: Option<f64>, stop: Option<f64>) -> ContinuousSeries {
    let (Some(&first), Some(&last)) = (series.time.first(), series.time.last()) else {
        return series;
    };
    let start = start.unwrap_or(first);
    let stop = stop.unwrap_or(last);

    let mut out = ContinuousSeries {
        channel: series.channel,
        time: Vec::new(),
        samples: Vec::new(),
        zero_pad: 0,
    };
    for (i, (&t, &s)) in series.time.iter().zip(&series.samples).enumerate() {
        if t >= start && t <= stop {
            out.time.push(t);
            out.samples.push(s);
            if i < series.zero_pad {
                out.zero_pad += 1;
            }
        }
    }
    out
}

/// Resamples the series to `len / factor` points.
///
/// The new time axis keeps the first time point and stretches the original
/// spacing by `len / new_len`.
pub fn downsample(series: ContinuousSeries, factor: f64) -> Result<ContinuousSeries> {
    check_downsample_factor(factor)?;
    let len = series.samples.len();
    let new_len = (len as f64 / factor) as usize;

    let t0 = series.time.first().copied().unwrap_or(0.0);
    let dt = match series.time.as_slice() {
        [a, b, ..] => b - a,
        _ => 0.0,
    };
    let stretch = if new_len == 0 {
        0.0
    } else {
        len as f64 / new_len as f64
    };
    let time = (0..new_len).map(|i| t0 + i as f64 * dt * stretch).collect();
    let zero_pad = if len == 0 {
        0
    } else {
        series.zero_pad * new_len / len
    };

    Ok(ContinuousSeries {
        channel: series.channel,
        time,
        samples: resample(&series.samples, new_len),
        zero_pad,
    })
}
