//! Low-level decoding of schema fields from raw bytes.
//!
//! All multi-byte values are little-endian. Every read is bounds-checked
//! against the buffer first, so a short buffer surfaces as
//! [`DecodeError::MalformedField`] and never as a panic.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{DecodeError, Result};
use crate::schema::{Encoding, RecordLayout};
use crate::types::TimeOrigin;

/// A decoded field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    U8(u8),
    Bool(bool),
    U16(u16),
    I16(i16),
    U32(u32),
    F32(f32),
    Text(String),
    U8Array(Vec<u8>),
    U16Array(Vec<u16>),
    I8Array(Vec<i8>),
    I16Array(Vec<i16>),
    Version(String),
    Time(TimeOrigin),
}

/// Returns `buf[offset..offset + width]` or a `MalformedField` error naming `field`.
#[inline]
pub fn field_bytes<'a>(
    buf: &'a [u8],
    field: &str,
    offset: usize,
    width: usize,
) -> Result<&'a [u8]> {
    match offset.checked_add(width) {
        Some(end) if end <= buf.len() => Ok(&buf[offset..end]),
        _ => Err(DecodeError::MalformedField {
            field: field.to_string(),
            offset,
            width,
            available: buf.len().saturating_sub(offset),
        }),
    }
}

/// Reads bytes as Latin-1 text up to the first NUL.
pub fn latin1_until_nul(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take_while(|&&b| b != 0)
        .map(|&b| b as char)
        .collect()
}

/// Decodes one field of `width` bytes at `offset`.
///
/// Never reads outside `offset..offset + width`.
pub fn decode_field(buf: &[u8], offset: usize, encoding: Encoding, width: usize) -> Result<Value> {
    let name = format!("{:?}", encoding);
    check_width(&name, encoding, offset, width)?;
    let bytes = field_bytes(buf, &name, offset, width)?;
    Ok(decode_bytes(bytes, encoding))
}

/// Scalars must be exactly one element wide, arrays a whole number of elements.
fn check_width(name: &str, encoding: Encoding, offset: usize, width: usize) -> Result<()> {
    let element = encoding.element_width();
    let fits = if encoding.is_scalar() {
        width == element
    } else {
        width % element == 0
    };
    if fits {
        Ok(())
    } else {
        Err(DecodeError::InvalidHeader(format!(
            "{} field at offset {} cannot be {} bytes wide ({} bytes per element)",
            name, offset, width, element
        )))
    }
}

fn decode_bytes(bytes: &[u8], encoding: Encoding) -> Value {
    match encoding {
        Encoding::U8 => Value::U8(bytes[0]),
        Encoding::Bool => Value::Bool(bytes[0] != 0),
        Encoding::U16 => Value::U16(LittleEndian::read_u16(bytes)),
        Encoding::I16 => Value::I16(LittleEndian::read_i16(bytes)),
        Encoding::U32 => Value::U32(LittleEndian::read_u32(bytes)),
        Encoding::F32 => Value::F32(LittleEndian::read_f32(bytes)),
        Encoding::Text => Value::Text(latin1_until_nul(bytes)),
        Encoding::U8Array | Encoding::Padding => Value::U8Array(bytes.to_vec()),
        Encoding::I8Array => Value::I8Array(bytes.iter().map(|&b| b as i8).collect()),
        Encoding::U16Array => {
            let mut words = vec![0u16; bytes.len() / 2];
            LittleEndian::read_u16_into(bytes, &mut words);
            Value::U16Array(words)
        }
        Encoding::I16Array => {
            let mut words = vec![0i16; bytes.len() / 2];
            LittleEndian::read_i16_into(bytes, &mut words);
            Value::I16Array(words)
        }
        Encoding::Version => Value::Version(format!("{}.{}", bytes[0], bytes[1])),
        Encoding::SystemTime => {
            let mut words = [0u16; 8];
            LittleEndian::read_u16_into(&bytes[..16], &mut words);
            Value::Time(TimeOrigin::from_words(words))
        }
    }
}

/// The decoded fields of one record, in layout order. Padding is omitted.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    layout: &'static str,
    values: Vec<(&'static str, Value)>,
}

/// Decodes every field of `layout` starting at `offset`.
pub fn decode_record(layout: &RecordLayout, buf: &[u8], offset: usize) -> Result<Record> {
    // Fail on the whole record before decoding any of it.
    field_bytes(buf, layout.name, offset, layout.size)?;

    let mut values = Vec::with_capacity(layout.fields.len());
    let mut loc = offset;
    for field in layout.fields {
        if field.encoding != Encoding::Padding {
            check_width(field.name, field.encoding, loc, field.width)?;
            let bytes = field_bytes(buf, field.name, loc, field.width)?;
            values.push((field.name, decode_bytes(bytes, field.encoding)));
        }
        loc += field.width;
    }
    Ok(Record {
        layout: layout.name,
        values,
    })
}

macro_rules! typed_getter {
    ($fn_name:ident, $variant:ident, $ty:ty) => {
        pub fn $fn_name(&self, name: &str) -> Result<$ty> {
            match self.get(name) {
                Some(Value::$variant(v)) => Ok(*v),
                _ => Err(self.missing(name, stringify!($variant))),
            }
        }
    };
}

impl Record {
    /// Name of the layout this record was decoded with.
    pub fn layout(&self) -> &'static str {
        self.layout
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(field, _)| *field == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.values.iter().map(|(field, value)| (*field, value))
    }

    typed_getter!(u8, U8, u8);
    typed_getter!(bool, Bool, bool);
    typed_getter!(u16, U16, u16);
    typed_getter!(i16, I16, i16);
    typed_getter!(u32, U32, u32);
    typed_getter!(f32, F32, f32);

    pub fn text(&self, name: &str) -> Result<&str> {
        match self.get(name) {
            Some(Value::Text(s)) | Some(Value::Version(s)) => Ok(s),
            _ => Err(self.missing(name, "Text")),
        }
    }

    pub fn time(&self, name: &str) -> Result<TimeOrigin> {
        match self.get(name) {
            Some(Value::Time(t)) => Ok(*t),
            _ => Err(self.missing(name, "Time")),
        }
    }

    fn missing(&self, name: &str, kind: &str) -> DecodeError {
        DecodeError::InvalidHeader(format!(
            "record {} has no {} field named {}",
            self.layout, kind, name
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DIGITAL_PACKET, NEUEVLBL};

    #[test]
    fn test_scalar_fields() {
        let buf = [0x34, 0x12, 0xFF, 0xFF, 0x78, 0x56, 0x34, 0x12];
        assert_eq!(
            decode_field(&buf, 0, Encoding::U16, 2).unwrap(),
            Value::U16(0x1234)
        );
        assert_eq!(decode_field(&buf, 2, Encoding::I16, 2).unwrap(), Value::I16(-1));
        assert_eq!(
            decode_field(&buf, 4, Encoding::U32, 4).unwrap(),
            Value::U32(0x1234_5678)
        );
        assert_eq!(decode_field(&buf, 2, Encoding::Bool, 1).unwrap(), Value::Bool(true));
        assert_eq!(decode_field(&[0u8], 0, Encoding::Bool, 1).unwrap(), Value::Bool(false));

        let rate = 29.97f32.to_le_bytes();
        assert_eq!(
            decode_field(&rate, 0, Encoding::F32, 4).unwrap(),
            Value::F32(29.97)
        );
        assert_eq!(
            decode_field(&(-0.5f32).to_le_bytes(), 0, Encoding::F32, 4).unwrap(),
            Value::F32(-0.5)
        );
    }

    #[test]
    fn test_field_width_must_match_encoding() {
        let buf = [0u8; 8];
        for (encoding, width) in [
            (Encoding::U32, 2),
            (Encoding::F32, 8),
            (Encoding::U16Array, 3),
            (Encoding::I16Array, 5),
        ] {
            assert!(
                matches!(
                    decode_field(&buf, 0, encoding, width),
                    Err(DecodeError::InvalidHeader(_))
                ),
                "{:?} with width {}",
                encoding,
                width
            );
        }
        assert_eq!(
            decode_field(&buf, 0, Encoding::U16Array, 4).unwrap(),
            Value::U16Array(vec![0, 0])
        );
    }

    #[test]
    fn test_text_stops_at_first_nul() {
        let buf = b"elec1\0junk\0\0\0\0\0\0";
        assert_eq!(
            decode_field(buf, 0, Encoding::Text, 16).unwrap(),
            Value::Text("elec1".to_string())
        );
    }

    #[test]
    fn test_text_is_latin1() {
        let buf = [b'5', 0xB5, b'V', 0];
        assert_eq!(
            decode_field(&buf, 0, Encoding::Text, 4).unwrap(),
            Value::Text("5\u{b5}V".to_string())
        );
    }

    #[test]
    fn test_version_and_time_post_processing() {
        let mut buf = vec![2, 3];
        for word in [2020u16, 1, 3, 15, 13, 4, 5, 7] {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        assert_eq!(
            decode_field(&buf, 0, Encoding::Version, 2).unwrap(),
            Value::Version("2.3".to_string())
        );
        match decode_field(&buf, 2, Encoding::SystemTime, 16).unwrap() {
            Value::Time(t) => assert_eq!(t.to_string(), "Jan.15.2020(Wed), 13:4:5.7"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_arrays() {
        let buf = [0xFE, 0x01, 0x00, 0x80];
        assert_eq!(
            decode_field(&buf, 0, Encoding::I8Array, 2).unwrap(),
            Value::I8Array(vec![-2, 1])
        );
        assert_eq!(
            decode_field(&buf, 0, Encoding::I16Array, 4).unwrap(),
            Value::I16Array(vec![0x01FE, i16::MIN])
        );
    }

    #[test]
    fn test_short_buffer_is_malformed() {
        let buf = [0u8; 3];
        let err = decode_field(&buf, 2, Encoding::U16, 2).unwrap_err();
        match err {
            DecodeError::MalformedField {
                offset,
                width,
                available,
                ..
            } => {
                assert_eq!((offset, width, available), (2, 2, 1));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(decode_field(&buf, usize::MAX, Encoding::U8, 1).is_err());
    }

    #[test]
    fn test_decode_record_skips_padding() {
        let mut buf = vec![0xAA];
        buf.extend_from_slice(&7u16.to_le_bytes());
        buf.extend_from_slice(b"chan-07\0\0\0\0\0\0\0\0\0");
        buf.extend_from_slice(&[0xEE; 6]);

        let record = decode_record(&NEUEVLBL, &buf, 1).unwrap();
        assert_eq!(record.layout(), "NEUEVLBL");
        assert_eq!(record.u16("Electrode_ID").unwrap(), 7);
        assert_eq!(record.text("Label").unwrap(), "chan-07");
        assert!(record.get("Empty_Bytes").is_none());
        assert_eq!(record.iter().count(), 2);
    }

    #[test]
    fn test_decode_record_rejects_short_buffer() {
        let buf = [0u8; 9];
        match decode_record(&DIGITAL_PACKET, &buf, 0).unwrap_err() {
            DecodeError::MalformedField { field, .. } => assert_eq!(field, "DIGITAL_PACKET"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_typed_getter_mismatch() {
        let buf = [0u8; 24];
        let record = decode_record(&NEUEVLBL, &buf, 0).unwrap();
        assert!(record.u32("Electrode_ID").is_err());
        assert!(record.u16("Missing").is_err());
    }
}
