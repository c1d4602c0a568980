//! Basic and extended header decoding for NSx and NEV files.
//!
//! Both formats start with a fixed basic header at offset 0, followed by a
//! run of fixed-size extended headers. NSx extended headers all share one
//! layout; every NEV extended header carries an 8-byte tag that selects its
//! own layout. A tag that matches no known layout aborts decoding, since the
//! offset of every following record would be unknown.

use tracing::{debug, trace};

use crate::error::{DecodeError, Result};
use crate::parser::{decode_record, field_bytes, latin1_until_nul, Record};
use crate::schema::{
    ExtendedRecordKind, NEV_BASIC, NEV_EXTENDED_BODY_SIZE, NEV_EXTENDED_TAG_SIZE,
    NEV_FILE_TYPE_ID, NSX_BASIC, NSX_EXTENDED, NSX_EXTENDED_TYPE, NSX_FILE_TYPE_ID,
};
use crate::types::{
    AnalogRange, AuxiliaryRecords, ChannelConfig, ChannelMap, FilterConfig, NevBasicHeader,
    NsxBasicHeader, SpikeConfig,
};

/// Decoded headers of an NSx file.
#[derive(Debug, Clone, PartialEq)]
pub struct NsxHeader {
    pub basic: NsxBasicHeader,
    pub channels: ChannelMap,
}

/// Decoded headers of an NEV file.
#[derive(Debug, Clone, PartialEq)]
pub struct NevHeader {
    pub basic: NevBasicHeader,
    pub channels: ChannelMap,
    pub auxiliary: AuxiliaryRecords,
}

/// Reads the file type identifier without decoding the rest of the header.
pub fn file_type_id(buf: &[u8]) -> Result<String> {
    Ok(latin1_until_nul(field_bytes(buf, "File_Type_ID", 0, 8)?))
}

fn check_file_type(found: &str, expected: &str) -> Result<()> {
    if found != expected {
        return Err(DecodeError::InvalidHeader(format!(
            "file type is {:?}, expected {:?}",
            found, expected
        )));
    }
    Ok(())
}

fn check_header_length(declared: u32, consumed: usize) -> Result<()> {
    if declared as usize != consumed {
        return Err(DecodeError::InvalidHeader(format!(
            "Bytes_in_Headers is {} but the extended headers end at byte {}",
            declared, consumed
        )));
    }
    Ok(())
}

/// Decodes the NSx basic header at offset 0.
pub fn decode_nsx_basic(buf: &[u8]) -> Result<NsxBasicHeader> {
    let r = decode_record(&NSX_BASIC, buf, 0)?;
    let basic = NsxBasicHeader {
        file_type_id: r.text("File_Type_ID")?.to_string(),
        file_spec: r.text("File_Spec")?.to_string(),
        bytes_in_headers: r.u32("Bytes_in_Headers")?,
        label: r.text("Label")?.to_string(),
        comment: r.text("Comment")?.to_string(),
        period: r.u32("Period")?,
        time_resolution: r.u32("Time_Resolution_of_Time_Stamps")?,
        time_origin: r.time("Time_Origin")?,
        channel_count: r.u32("Channel_Count")?,
    };
    check_file_type(&basic.file_type_id, NSX_FILE_TYPE_ID)?;
    if basic.period == 0 {
        return Err(DecodeError::InvalidHeader("sampling period is 0".to_string()));
    }
    Ok(basic)
}

fn nsx_channel(r: &Record) -> Result<ChannelConfig> {
    Ok(ChannelConfig {
        electrode_id: r.u16("Electrode_ID")?,
        label: Some(r.text("Electrode_Label")?.to_string()),
        physical_connector: Some(r.u8("Physical_Connector")?),
        connector_pin: Some(r.u8("Connector_Pin")?),
        units: Some(r.text("Units")?.to_string()),
        analog: Some(AnalogRange {
            min_digital: r.i16("Min_Digital_Value")?,
            max_digital: r.i16("Max_Digital_Value")?,
            min_analog: r.i16("Min_Analog_Value")?,
            max_analog: r.i16("Max_Analog_Value")?,
        }),
        filter: Some(FilterConfig {
            high_freq_corner: r.u32("High_Freq_Corner")?,
            high_freq_order: r.u32("High_Freq_Order")?,
            high_filter_type: r.u16("High_Filter_Type")?,
            low_freq_corner: r.u32("Low_Freq_Corner")?,
            low_freq_order: r.u32("Low_Freq_Order")?,
            low_filter_type: r.u16("Low_Filter_Type")?,
        }),
        spike: None,
    })
}

/// Decodes the NSx basic header and its `Channel_Count` extended headers.
pub fn decode_nsx_header(buf: &[u8]) -> Result<NsxHeader> {
    let basic = decode_nsx_basic(buf)?;

    let mut channels = ChannelMap::new();
    let mut loc = NSX_BASIC.size;
    for _ in 0..basic.channel_count {
        let record = decode_record(&NSX_EXTENDED, buf, loc)?;
        let kind = record.text("Type")?;
        if kind != NSX_EXTENDED_TYPE {
            return Err(DecodeError::UnknownRecordType(kind.to_string()));
        }
        let channel = nsx_channel(&record)?;
        trace!(electrode = channel.electrode_id, offset = loc, "nsx extended header");
        // Frame ordinals follow the map, so every electrode must appear once.
        if channels.contains(channel.electrode_id) {
            return Err(DecodeError::InvalidHeader(format!(
                "electrode {} is described twice in the extended headers",
                channel.electrode_id
            )));
        }
        channels.merge(channel);
        loc += NSX_EXTENDED.size;
    }
    check_header_length(basic.bytes_in_headers, loc)?;

    debug!(
        channels = channels.len(),
        sampling_frequency = basic.sampling_frequency(),
        spec = %basic.file_spec,
        "decoded nsx header"
    );
    Ok(NsxHeader { basic, channels })
}

/// Decodes the NEV basic header at offset 0.
pub fn decode_nev_basic(buf: &[u8]) -> Result<NevBasicHeader> {
    let r = decode_record(&NEV_BASIC, buf, 0)?;
    let basic = NevBasicHeader {
        file_type_id: r.text("File_Type_ID")?.to_string(),
        file_spec: r.text("File_Spec")?.to_string(),
        add_flags: r.u16("Add_Flags")?,
        bytes_in_headers: r.u32("Bytes_in_Headers")?,
        bytes_in_data_packets: r.u32("Bytes_in_DataPackets")?,
        timestamp_resolution: r.u32("TimeStamp_Resolution")?,
        sample_time_resolution: r.u32("Sample_Time_Resolution")?,
        time_origin: r.time("Time_Origin")?,
        creating_application: r.text("Creating_Application")?.to_string(),
        comment: r.text("Comment")?.to_string(),
        num_extended_headers: r.u32("Num_Extended_Headers")?,
    };
    check_file_type(&basic.file_type_id, NEV_FILE_TYPE_ID)?;
    Ok(basic)
}

fn nev_channel(kind: ExtendedRecordKind, r: &Record) -> Result<ChannelConfig> {
    let mut channel = ChannelConfig::new(r.u16("Electrode_ID")?);
    match kind {
        ExtendedRecordKind::SpikeWaveform => {
            channel.physical_connector = Some(r.u8("Physical_Connector")?);
            channel.connector_pin = Some(r.u8("Connector_Pin")?);
            channel.spike = Some(SpikeConfig {
                digitization_factor: r.u16("Digitization_Factor")?,
                energy_threshold: r.u16("Energy_Threshold")?,
                high_threshold: r.i16("High_Threshold")?,
                low_threshold: r.i16("Low_Threshold")?,
                num_sorted_units: r.u8("Num_Sorted_Units")?,
                bytes_per_waveform: r.u8("Bytes_Per_Waveform")?,
                spike_width_samples: r.u16("Spike_Width_Samples")?,
            });
        }
        ExtendedRecordKind::ElectrodeLabel => {
            channel.label = Some(r.text("Label")?.to_string());
        }
        ExtendedRecordKind::ElectrodeFilter => {
            channel.filter = Some(FilterConfig {
                high_freq_corner: r.u32("High_Freq_Corner")?,
                high_freq_order: r.u32("High_Freq_Order")?,
                high_filter_type: r.u16("High_Freq_Type")?,
                low_freq_corner: r.u32("Low_Freq_Corner")?,
                low_freq_order: r.u32("Low_Freq_Order")?,
                low_filter_type: r.u16("Low_Freq_Type")?,
            });
        }
        other => {
            return Err(DecodeError::InvalidHeader(format!(
                "{} is not an electrode record",
                other.tag()
            )))
        }
    }
    Ok(channel)
}

/// Decodes the NEV basic header and its `Num_Extended_Headers` tagged records.
pub fn decode_nev_header(buf: &[u8]) -> Result<NevHeader> {
    let basic = decode_nev_basic(buf)?;

    let mut channels = ChannelMap::new();
    let mut auxiliary = AuxiliaryRecords::default();
    let mut loc = NEV_BASIC.size;
    for _ in 0..basic.num_extended_headers {
        let tag = field_bytes(buf, "Extended_Header_ID", loc, NEV_EXTENDED_TAG_SIZE)?;
        let kind = ExtendedRecordKind::from_tag(tag)
            .ok_or_else(|| DecodeError::UnknownRecordType(latin1_until_nul(tag)))?;
        loc += NEV_EXTENDED_TAG_SIZE;

        let record = decode_record(kind.layout(), buf, loc)?;
        trace!(tag = kind.tag(), offset = loc, "nev extended header");
        if kind.is_electrode() {
            channels.merge(nev_channel(kind, &record)?);
        } else {
            auxiliary.push(kind, record);
        }
        loc += NEV_EXTENDED_BODY_SIZE;
    }
    check_header_length(basic.bytes_in_headers, loc)?;

    debug!(
        electrodes = channels.len(),
        packet_size = basic.bytes_in_data_packets,
        spec = %basic.file_spec,
        "decoded nev header"
    );
    Ok(NevHeader {
        basic,
        channels,
        auxiliary,
    })
}
