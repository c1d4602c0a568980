//! Declarative layout of every fixed-width record in the NSx and NEV formats.
//!
//! Each record type is a static table of `(name, encoding, width)` entries in
//! file order. The tables are the single source of truth for byte offsets:
//! the header and packet decoders never hard-code a field position, they walk
//! these tables through [`crate::parser::decode_record`].

use serde::{Deserialize, Serialize};

/// How the bytes of a field are turned into a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Unsigned 8-bit integer
    U8,
    /// Single byte, non-zero is true
    Bool,
    /// Little-endian unsigned 16-bit integer
    U16,
    /// Little-endian signed 16-bit integer
    I16,
    /// Little-endian unsigned 32-bit integer
    U32,
    /// Little-endian IEEE-754 single-precision float
    F32,
    /// Fixed-width byte string, cut at the first NUL and read as Latin-1
    Text,
    /// Fixed-width array of unsigned bytes
    U8Array,
    /// Fixed-width array of little-endian unsigned 16-bit words
    U16Array,
    /// Fixed-width array of signed bytes
    I8Array,
    /// Fixed-width array of little-endian signed 16-bit words
    I16Array,
    /// Two bytes rendered as `"major.minor"`
    Version,
    /// Eight 16-bit words of a Windows SYSTEMTIME structure
    SystemTime,
    /// Reserved bytes, skipped by the decoder
    Padding,
}

impl Encoding {
    /// Width of one element of this encoding.
    ///
    /// Scalars must be declared with exactly this width; arrays, text and
    /// padding must be a whole multiple of it.
    pub fn element_width(self) -> usize {
        match self {
            Encoding::U8
            | Encoding::Bool
            | Encoding::Text
            | Encoding::U8Array
            | Encoding::I8Array
            | Encoding::Padding => 1,
            Encoding::U16 | Encoding::I16 | Encoding::U16Array | Encoding::I16Array => 2,
            Encoding::U32 | Encoding::F32 => 4,
            Encoding::Version => 2,
            Encoding::SystemTime => 16,
        }
    }

    /// Whether a field of this encoding has a width fixed by the encoding itself.
    pub fn is_scalar(self) -> bool {
        !matches!(
            self,
            Encoding::Text
                | Encoding::U8Array
                | Encoding::U16Array
                | Encoding::I8Array
                | Encoding::I16Array
                | Encoding::Padding
        )
    }
}

/// One field of a record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub encoding: Encoding,
    pub width: usize,
}

const fn field(name: &'static str, encoding: Encoding, width: usize) -> FieldSpec {
    FieldSpec {
        name,
        encoding,
        width,
    }
}

/// An ordered set of fields with a declared total size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLayout {
    pub name: &'static str,
    pub size: usize,
    pub fields: &'static [FieldSpec],
}

impl RecordLayout {
    /// Sum of all field widths; equals `size` for every layout in this module.
    pub fn width_sum(&self) -> usize {
        self.fields.iter().map(|f| f.width).sum()
    }

    /// Looks up a field by name.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Byte offset of a field relative to the start of the record.
    pub fn offset_of(&self, name: &str) -> Option<usize> {
        let mut offset = 0;
        for f in self.fields {
            if f.name == name {
                return Some(offset);
            }
            offset += f.width;
        }
        None
    }
}

use Encoding::*;

// ============================================================================
// NSx (NEURALCD, file spec 2.2 / 2.3)
// ============================================================================

pub const NSX_FILE_TYPE_ID: &str = "NEURALCD";

pub const NSX_BASIC: RecordLayout = RecordLayout {
    name: "NEURALCD",
    size: 314,
    fields: &[
        field("File_Type_ID", Text, 8),
        field("File_Spec", Version, 2),
        field("Bytes_in_Headers", U32, 4),
        field("Label", Text, 16),
        field("Comment", Text, 256),
        field("Period", U32, 4),
        field("Time_Resolution_of_Time_Stamps", U32, 4),
        field("Time_Origin", SystemTime, 16),
        field("Channel_Count", U32, 4),
    ],
};

/// Type marker every NSx extended header starts with.
pub const NSX_EXTENDED_TYPE: &str = "CC";

pub const NSX_EXTENDED: RecordLayout = RecordLayout {
    name: "CC",
    size: 66,
    fields: &[
        field("Type", Text, 2),
        field("Electrode_ID", U16, 2),
        field("Electrode_Label", Text, 16),
        field("Physical_Connector", U8, 1),
        field("Connector_Pin", U8, 1),
        field("Min_Digital_Value", I16, 2),
        field("Max_Digital_Value", I16, 2),
        field("Min_Analog_Value", I16, 2),
        field("Max_Analog_Value", I16, 2),
        field("Units", Text, 16),
        field("High_Freq_Corner", U32, 4),
        field("High_Freq_Order", U32, 4),
        field("High_Filter_Type", U16, 2),
        field("Low_Freq_Corner", U32, 4),
        field("Low_Freq_Order", U32, 4),
        field("Low_Filter_Type", U16, 2),
    ],
};

pub const NSX_DATA_HEADER: RecordLayout = RecordLayout {
    name: "NSX_DATA",
    size: 9,
    fields: &[
        field("Header", U8, 1),
        field("Timestamp", U32, 4),
        field("Number_of_Data_Points", U32, 4),
    ],
};

/// Width of one stored continuous sample.
pub const NSX_SAMPLE_WIDTH: usize = 2;

// ============================================================================
// NEV (NEURALEV)
// ============================================================================

pub const NEV_FILE_TYPE_ID: &str = "NEURALEV";

pub const NEV_BASIC: RecordLayout = RecordLayout {
    name: "NEURALEV",
    size: 336,
    fields: &[
        field("File_Type_ID", Text, 8),
        field("File_Spec", Version, 2),
        field("Add_Flags", U16, 2),
        field("Bytes_in_Headers", U32, 4),
        field("Bytes_in_DataPackets", U32, 4),
        field("TimeStamp_Resolution", U32, 4),
        field("Sample_Time_Resolution", U32, 4),
        field("Time_Origin", SystemTime, 16),
        field("Creating_Application", Text, 32),
        field("Comment", Text, 256),
        field("Num_Extended_Headers", U32, 4),
    ],
};

/// Width of the ASCII tag in front of every NEV extended header.
pub const NEV_EXTENDED_TAG_SIZE: usize = 8;
/// Width of an NEV extended header body (after the tag).
pub const NEV_EXTENDED_BODY_SIZE: usize = 24;

pub const ARRAYNME: RecordLayout = RecordLayout {
    name: "ARRAYNME",
    size: 24,
    fields: &[field("Array_Name", Text, 24)],
};

pub const ECOMMENT: RecordLayout = RecordLayout {
    name: "ECOMMENT",
    size: 24,
    fields: &[field("Extra_Comment", Text, 24)],
};

pub const CCOMMENT: RecordLayout = RecordLayout {
    name: "CCOMMENT",
    size: 24,
    fields: &[field("Cont_Comment", Text, 24)],
};

pub const MAPFILE: RecordLayout = RecordLayout {
    name: "MAPFILE",
    size: 24,
    fields: &[field("Map_File", Text, 24)],
};

pub const NEUEVWAV: RecordLayout = RecordLayout {
    name: "NEUEVWAV",
    size: 24,
    fields: &[
        field("Electrode_ID", U16, 2),
        field("Physical_Connector", U8, 1),
        field("Connector_Pin", U8, 1),
        field("Digitization_Factor", U16, 2),
        field("Energy_Threshold", U16, 2),
        field("High_Threshold", I16, 2),
        field("Low_Threshold", I16, 2),
        field("Num_Sorted_Units", U8, 1),
        field("Bytes_Per_Waveform", U8, 1),
        field("Spike_Width_Samples", U16, 2),
        field("Empty_Bytes", Padding, 8),
    ],
};

pub const NEUEVLBL: RecordLayout = RecordLayout {
    name: "NEUEVLBL",
    size: 24,
    fields: &[
        field("Electrode_ID", U16, 2),
        field("Label", Text, 16),
        field("Empty_Bytes", Padding, 6),
    ],
};

pub const NEUEVFLT: RecordLayout = RecordLayout {
    name: "NEUEVFLT",
    size: 24,
    fields: &[
        field("Electrode_ID", U16, 2),
        field("High_Freq_Corner", U32, 4),
        field("High_Freq_Order", U32, 4),
        field("High_Freq_Type", U16, 2),
        field("Low_Freq_Corner", U32, 4),
        field("Low_Freq_Order", U32, 4),
        field("Low_Freq_Type", U16, 2),
        field("Empty_Bytes", Padding, 2),
    ],
};

pub const DIGLABEL: RecordLayout = RecordLayout {
    name: "DIGLABEL",
    size: 24,
    fields: &[
        field("Label", Text, 16),
        field("Mode", Bool, 1),
        field("Empty_Bytes", Padding, 7),
    ],
};

pub const NSASEXEV: RecordLayout = RecordLayout {
    name: "NSASEXEV",
    size: 24,
    fields: &[
        field("Frequency", U16, 2),
        field("DigitalInputConfig", U8, 1),
        field("AnalogCh1Config", U8, 1),
        field("AnalogCh1DetectVal", I16, 2),
        field("AnalogCh2Config", U8, 1),
        field("AnalogCh2DetectVal", I16, 2),
        field("AnalogCh3Config", U8, 1),
        field("AnalogCh3DetectVal", I16, 2),
        field("AnalogCh4Config", U8, 1),
        field("AnalogCh4DetectVal", I16, 2),
        field("AnalogCh5Config", U8, 1),
        field("AnalogCh5DetectVal", I16, 2),
        field("Empty_Bytes", Padding, 6),
    ],
};

pub const VIDEOSYN: RecordLayout = RecordLayout {
    name: "VIDEOSYN",
    size: 24,
    fields: &[
        field("VideoSourceID", U16, 2),
        field("VideoSource", Text, 16),
        field("FrameRate", F32, 4),
        field("Empty_Bytes", Padding, 2),
    ],
};

pub const TRACKOBJ: RecordLayout = RecordLayout {
    name: "TRACKOBJ",
    size: 24,
    fields: &[
        field("TrackableType", U16, 2),
        field("TrackableID", U16, 2),
        field("PointCount", U16, 2),
        field("VideoSource", Text, 16),
        field("Empty_Bytes", Padding, 2),
    ],
};

// Event packets. Only the fixed prefix of each packet type is described here;
// the waveform and comment text run to the end of the packet, whose size comes
// from `Bytes_in_DataPackets`.

pub const PACKET_HEADER: RecordLayout = RecordLayout {
    name: "PACKET_HEADER",
    size: 6,
    fields: &[field("Timestamp", U32, 4), field("Packet_ID", U16, 2)],
};

pub const DIGITAL_PACKET: RecordLayout = RecordLayout {
    name: "DIGITAL_PACKET",
    size: 10,
    fields: &[
        field("Timestamp", U32, 4),
        field("Packet_ID", U16, 2),
        field("Packet_Insertion_Reason", U8, 1),
        field("Reserved", U8, 1),
        field("Digital_Input", U16, 2),
    ],
};

pub const SPIKE_PACKET: RecordLayout = RecordLayout {
    name: "SPIKE_PACKET",
    size: 8,
    fields: &[
        field("Timestamp", U32, 4),
        field("Packet_ID", U16, 2),
        field("Unit_Classification", U8, 1),
        field("Reserved", U8, 1),
    ],
};

pub const COMMENT_PACKET: RecordLayout = RecordLayout {
    name: "COMMENT_PACKET",
    size: 12,
    fields: &[
        field("Timestamp", U32, 4),
        field("Packet_ID", U16, 2),
        field("Char_Set", U8, 1),
        field("Flag", U8, 1),
        field("Data", U32, 4),
    ],
};

/// Byte offset of the packet type code inside every NEV event packet.
pub const PACKET_ID_OFFSET: usize = 4;

/// The closed set of NEV extended header types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ExtendedRecordKind {
    /// Electrode array name
    ArrayName,
    /// Free-text comment
    ExtraComment,
    /// Continuation of the previous comment
    ContComment,
    /// Map file name
    MapFile,
    /// Spike waveform configuration of an electrode
    SpikeWaveform,
    /// Display label of an electrode
    ElectrodeLabel,
    /// Filter settings of an electrode
    ElectrodeFilter,
    /// Digital input channel label
    DigitalLabel,
    /// Serial/analog expansion input configuration
    SerialExpansion,
    /// Video synchronisation source
    VideoSync,
    /// Trackable object description
    TrackObject,
}

impl ExtendedRecordKind {
    pub const ALL: [ExtendedRecordKind; 11] = [
        ExtendedRecordKind::ArrayName,
        ExtendedRecordKind::ExtraComment,
        ExtendedRecordKind::ContComment,
        ExtendedRecordKind::MapFile,
        ExtendedRecordKind::SpikeWaveform,
        ExtendedRecordKind::ElectrodeLabel,
        ExtendedRecordKind::ElectrodeFilter,
        ExtendedRecordKind::DigitalLabel,
        ExtendedRecordKind::SerialExpansion,
        ExtendedRecordKind::VideoSync,
        ExtendedRecordKind::TrackObject,
    ];

    /// Parses the 8-byte tag in front of an extended header.
    ///
    /// Tags shorter than eight characters are NUL padded on disk.
    pub fn from_tag(tag: &[u8]) -> Option<Self> {
        let end = tag.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
        let tag = &tag[..end];
        Self::ALL.into_iter().find(|kind| kind.tag().as_bytes() == tag)
    }

    /// The tag of this record type, without padding.
    pub fn tag(self) -> &'static str {
        self.layout().name
    }

    /// The tag as it is stored on disk.
    pub fn tag_bytes(self) -> [u8; NEV_EXTENDED_TAG_SIZE] {
        let mut bytes = [0u8; NEV_EXTENDED_TAG_SIZE];
        let tag = self.tag().as_bytes();
        bytes[..tag.len()].copy_from_slice(tag);
        bytes
    }

    /// Field layout of the record body.
    pub fn layout(self) -> &'static RecordLayout {
        match self {
            ExtendedRecordKind::ArrayName => &ARRAYNME,
            ExtendedRecordKind::ExtraComment => &ECOMMENT,
            ExtendedRecordKind::ContComment => &CCOMMENT,
            ExtendedRecordKind::MapFile => &MAPFILE,
            ExtendedRecordKind::SpikeWaveform => &NEUEVWAV,
            ExtendedRecordKind::ElectrodeLabel => &NEUEVLBL,
            ExtendedRecordKind::ElectrodeFilter => &NEUEVFLT,
            ExtendedRecordKind::DigitalLabel => &DIGLABEL,
            ExtendedRecordKind::SerialExpansion => &NSASEXEV,
            ExtendedRecordKind::VideoSync => &VIDEOSYN,
            ExtendedRecordKind::TrackObject => &TRACKOBJ,
        }
    }

    /// Whether the record carries per-electrode configuration.
    pub fn is_electrode(self) -> bool {
        matches!(
            self,
            ExtendedRecordKind::SpikeWaveform
                | ExtendedRecordKind::ElectrodeLabel
                | ExtendedRecordKind::ElectrodeFilter
        )
    }
}
