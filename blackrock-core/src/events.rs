//! NEV event packet indexing and payload decoding.
//!
//! The data region after the headers is a sequence of packets of one fixed
//! size. Indexing reads only the type code of every packet and records its
//! offset; payloads are decoded later, one classification at a time.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, instrument};

use crate::error::{DecodeError, Result};
use crate::header::NevHeader;
use crate::options::WaveformScaling;
use crate::parser::{decode_record, field_bytes, latin1_until_nul};
use crate::schema::{
    COMMENT_PACKET, DIGITAL_PACKET, PACKET_HEADER, PACKET_ID_OFFSET, SPIKE_PACKET,
};
use crate::types::{
    CommentEvent, DigitalInput, EventClass, EventIndex, EventRecord, NevBasicHeader, SpikeConfig,
    SpikeEvent, UnimplementedEvent, Waveform,
};

fn packet_size(basic: &NevBasicHeader) -> Result<usize> {
    let size = basic.bytes_in_data_packets as usize;
    if size < PACKET_HEADER.size {
        return Err(DecodeError::InvalidHeader(format!(
            "Bytes_in_DataPackets is {}, smaller than a packet header",
            size
        )));
    }
    Ok(size)
}

/// Classifies every packet in the data region by its type code.
///
/// Fails with `TruncatedFile` if the data region is not a whole number of
/// packets.
#[instrument(level = "debug", skip_all, fields(len = buf.len()))]
pub fn index_events(buf: &[u8], basic: &NevBasicHeader) -> Result<EventIndex> {
    let stride = packet_size(basic)?;
    let start = basic.bytes_in_headers as usize;
    field_bytes(buf, "data region", start, 0)?;

    let region = buf.len() - start;
    if region % stride != 0 {
        return Err(DecodeError::TruncatedFile {
            region: region as u64,
            stride: stride as u64,
        });
    }

    let mut index = EventIndex::default();
    for offset in (start..buf.len()).step_by(stride) {
        let code = field_bytes(buf, "Packet_ID", offset + PACKET_ID_OFFSET, 2)?;
        index.push(
            EventClass::from_packet_id(LittleEndian::read_u16(code)),
            offset as u64,
        );
    }

    debug!(
        packets = index.packet_count(),
        classes = index.classes().len(),
        "indexed event packets"
    );
    Ok(index)
}

/// Decodes every packet of one classification, in file order.
///
/// Classes missing from the index yield an empty list. Device and
/// unrecognized packets yield [`EventRecord::Unimplemented`].
#[instrument(
    level = "debug",
    skip(buf, header, index),
    fields(packets = index.offsets(class).len())
)]
pub fn decode_events(
    buf: &[u8],
    header: &NevHeader,
    index: &EventIndex,
    class: EventClass,
    scaling: WaveformScaling,
) -> Result<Vec<EventRecord>> {
    let offsets = index.offsets(class);
    if offsets.is_empty() {
        return Ok(Vec::new());
    }
    let size = packet_size(&header.basic)?;
    let packets = offsets
        .iter()
        .map(|&offset| field_bytes(buf, "event packet", offset as usize, size));

    match class {
        EventClass::Digital => packets
            .map(|p| decode_digital(p?).map(EventRecord::DigitalInput))
            .collect(),
        EventClass::Spike(electrode) => {
            let spike = header
                .channels
                .get(electrode)
                .and_then(|c| c.spike)
                .ok_or(DecodeError::MissingSpikeConfig(electrode))?;
            packets
                .map(|p| decode_spike(p?, electrode, &spike, scaling).map(EventRecord::Spike))
                .collect()
        }
        EventClass::Comment => packets
            .map(|p| decode_comment(p?).map(EventRecord::Comment))
            .collect(),
        EventClass::Device(_) | EventClass::Unrecognized(_) => packets
            .map(|p| decode_unimplemented(p?).map(EventRecord::Unimplemented))
            .collect(),
    }
}

fn decode_digital(packet: &[u8]) -> Result<DigitalInput> {
    let r = decode_record(&DIGITAL_PACKET, packet, 0)?;
    Ok(DigitalInput {
        timestamp: r.u32("Timestamp")?,
        insertion_reason: r.u8("Packet_Insertion_Reason")?,
        reserved: r.u8("Reserved")?,
        digital_value: r.u16("Digital_Input")?,
    })
}

fn decode_spike(
    packet: &[u8],
    electrode: u16,
    spike: &SpikeConfig,
    scaling: WaveformScaling,
) -> Result<SpikeEvent> {
    let r = decode_record(&SPIKE_PACKET, packet, 0)?;
    let width = spike.sample_width(electrode)?;
    let count = spike.spike_width_samples as usize;
    let bytes = field_bytes(packet, "Waveform", SPIKE_PACKET.size, width * count)?;

    let raw: Vec<i32> = match width {
        1 => bytes.iter().map(|&b| b as i8 as i32).collect(),
        _ => bytes
            .chunks_exact(2)
            .map(|c| LittleEndian::read_i16(c) as i32)
            .collect(),
    };
    let waveform = match scaling {
        WaveformScaling::Raw => Waveform::Raw(raw),
        WaveformScaling::Scaled => {
            let factor = spike.digitization_factor as f64;
            Waveform::Scaled(raw.into_iter().map(|s| s as f64 * factor).collect())
        }
    };

    Ok(SpikeEvent {
        timestamp: r.u32("Timestamp")?,
        electrode,
        unit_classification: r.u8("Unit_Classification")?,
        reserved: r.u8("Reserved")?,
        waveform,
    })
}

fn decode_comment(packet: &[u8]) -> Result<CommentEvent> {
    let r = decode_record(&COMMENT_PACKET, packet, 0)?;
    Ok(CommentEvent {
        timestamp: r.u32("Timestamp")?,
        char_set: r.u8("Char_Set")?,
        flag: r.u8("Flag")?,
        data: r.u32("Data")?,
        // Text runs to the end of the packet.
        text: latin1_until_nul(&packet[COMMENT_PACKET.size..]),
    })
}

fn decode_unimplemented(packet: &[u8]) -> Result<UnimplementedEvent> {
    let r = decode_record(&PACKET_HEADER, packet, 0)?;
    Ok(UnimplementedEvent {
        timestamp: r.u32("Timestamp")?,
        packet_id: r.u16("Packet_ID")?,
    })
}
