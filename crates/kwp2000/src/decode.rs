//! Walks an aggregate record in lock-step with the field list.

use crate::types::{FieldDescriptor, Reading, Scalar, Width};
use thiserror::Error;

/// Per-field decode failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("field #{index} ({field}): needs {needed} bytes, {remaining} left")]
    Truncated {
        index: usize,
        field: String,
        needed: usize,
        remaining: usize,
    },
    #[error("field #{index} ({field}): formula failed: {reason}")]
    Transform {
        index: usize,
        field: String,
        reason: String,
    },
}

/// Bytes left in a record after every field was decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{count} leftover bytes after the last field: {bytes:02X?}")]
pub struct LayoutMismatch {
    pub count: usize,
    pub bytes: Vec<u8>,
}

/// Forward-only cursor over one record.
#[derive(Debug)]
pub struct RecordCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> RecordCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Take exactly `n` bytes. A short read still consumes what was left.
    pub fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let start = self.pos;
        if self.remaining() < n {
            self.pos = self.buf.len();
            return None;
        }
        self.pos += n;
        Some(&self.buf[start..self.pos])
    }

    pub fn rest(&mut self) -> &'a [u8] {
        let start = self.pos;
        self.pos = self.buf.len();
        &self.buf[start..]
    }
}

/// Big-endian integer of `bytes.len()` bytes, sign-extended when `signed`.
fn interpret(bytes: &[u8], signed: bool) -> i64 {
    let unsigned = bytes.iter().fold(0u64, |acc, &b| (acc << 8) | u64::from(b));
    if signed && !bytes.is_empty() {
        let shift = 64 - 8 * bytes.len() as u32;
        ((unsigned << shift) as i64) >> shift
    } else {
        unsigned as i64
    }
}

/// Read the raw integer of one field, advancing the cursor by its width.
pub fn read_raw(cursor: &mut RecordCursor<'_>, width: Width, signed: bool) -> Option<i64> {
    cursor.take(width.len()).map(|bytes| interpret(bytes, signed))
}

/// Decode one field: raw integer, then the optional transform.
pub fn decode_field(
    cursor: &mut RecordCursor<'_>,
    index: usize,
    field: &FieldDescriptor,
) -> Result<Reading, DecodeError> {
    let remaining = cursor.remaining();
    let raw = read_raw(cursor, field.width, field.signed).ok_or_else(|| DecodeError::Truncated {
        index,
        field: field.name.clone(),
        needed: field.width.len(),
        remaining,
    })?;
    let value = match &field.transform {
        Some(t) => t.apply(raw).map_err(|reason| DecodeError::Transform {
            index,
            field: field.name.clone(),
            reason,
        })?,
        None => Scalar::Int(raw),
    };
    Ok(Reading::Value { raw, value })
}

/// Result of one pass over a record.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
    /// One entry per field, in field order.
    pub readings: Vec<Reading>,
    pub errors: Vec<DecodeError>,
    pub leftover: Option<LayoutMismatch>,
}

impl DecodedRecord {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty() && self.leftover.is_none()
    }
}

/// Decode every field of `fields` from `data`, in order.
pub fn decode_record(fields: &[FieldDescriptor], data: &[u8]) -> DecodedRecord {
    let mut cursor = RecordCursor::new(data);
    let mut readings = Vec::with_capacity(fields.len());
    let mut errors = Vec::new();
    for (index, field) in fields.iter().enumerate() {
        match decode_field(&mut cursor, index, field) {
            Ok(reading) => readings.push(reading),
            Err(e) => {
                readings.push(Reading::Failed);
                errors.push(e);
            }
        }
    }
    let leftover = match cursor.rest() {
        [] => None,
        rest => Some(LayoutMismatch {
            count: rest.len(),
            bytes: rest.to_vec(),
        }),
    };
    DecodedRecord {
        readings,
        errors,
        leftover,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AddressingMethod, FieldList};

    fn field(name: &str, width: Width, signed: bool) -> FieldDescriptor {
        let f = FieldDescriptor::new(name, AddressingMethod::SymbolAddress, 1, width);
        if signed {
            f.signed()
        } else {
            f
        }
    }

    fn raw_of(reading: &Reading) -> i64 {
        match reading {
            Reading::Value { raw, .. } => *raw,
            Reading::Failed => panic!("field failed to decode"),
        }
    }

    #[test]
    fn test_signed_word() {
        let fields = [field("w", Width::Word, true)];
        assert_eq!(raw_of(&decode_record(&fields, &[0xFF, 0xFF]).readings[0]), -1);
        assert_eq!(raw_of(&decode_record(&fields, &[0x7F, 0xFF]).readings[0]), 32767);
        assert_eq!(raw_of(&decode_record(&fields, &[0x80, 0x00]).readings[0]), -32768);
    }

    #[test]
    fn test_unsigned_and_signed_widths() {
        let fields = [
            field("b", Width::Byte, false),
            field("sb", Width::Byte, true),
            field("l", Width::Long, false),
            field("sl", Width::Long, true),
        ];
        let data = [0xFF, 0xFE, 0xFF, 0xFF, 0xFF, 0xFF, 0x80, 0x00, 0x00, 0x00];
        let rec = decode_record(&fields, &data);
        assert!(rec.is_clean());
        let raws: Vec<i64> = rec.readings.iter().map(raw_of).collect();
        assert_eq!(raws, vec![255, -2, 4_294_967_295, -2_147_483_648]);
    }

    #[test]
    fn test_transform_applied() {
        let list = FieldList::new(vec![field("p", Width::Word, true)
            .with_formula("%v/10.0")
            .unwrap()])
        .unwrap();
        let rec = decode_record(&list, &[0x00, 0xED]);
        assert_eq!(
            rec.readings[0],
            Reading::Value {
                raw: 237,
                value: Scalar::Float(23.7)
            }
        );
    }

    #[test]
    fn test_short_record_decodes_leading_fields() {
        let fields = [
            field("a", Width::Word, false),
            field("b", Width::Word, false),
            field("c", Width::Byte, false),
        ];
        // three bytes: `a` fits, `b` is cut short, nothing remains for `c`
        let rec = decode_record(&fields, &[0x0D, 0x64, 0x01]);
        assert_eq!(raw_of(&rec.readings[0]), 3428);
        assert_eq!(rec.readings[1], Reading::Failed);
        assert_eq!(rec.readings[2], Reading::Failed);
        assert_eq!(rec.errors.len(), 2);
        assert_eq!(
            rec.errors[0],
            DecodeError::Truncated {
                index: 1,
                field: "b".into(),
                needed: 2,
                remaining: 1
            }
        );
        assert!(matches!(
            rec.errors[1],
            DecodeError::Truncated { index: 2, remaining: 0, .. }
        ));
        assert!(rec.leftover.is_none());
    }

    #[test]
    fn test_empty_record_fails_every_field() {
        let fields = [field("a", Width::Byte, false), field("b", Width::Long, true)];
        let rec = decode_record(&fields, &[]);
        assert_eq!(rec.readings, vec![Reading::Failed, Reading::Failed]);
        assert_eq!(rec.errors.len(), 2);
    }

    #[test]
    fn test_long_record_reports_one_mismatch() {
        let fields = [field("a", Width::Word, true), field("b", Width::Byte, false)];
        let rec = decode_record(&fields, &[0x0D, 0x64, 0x07, 0xAA, 0xBB]);
        assert!(rec.errors.is_empty());
        assert_eq!(raw_of(&rec.readings[0]), 3428);
        assert_eq!(raw_of(&rec.readings[1]), 7);
        assert_eq!(
            rec.leftover,
            Some(LayoutMismatch {
                count: 2,
                bytes: vec![0xAA, 0xBB]
            })
        );
    }

    #[test]
    fn test_failed_transform_keeps_alignment() {
        let fields = [
            field("div", Width::Byte, false).with_formula("100 / %v").unwrap(),
            field("next", Width::Byte, false),
        ];
        let rec = decode_record(&fields, &[0x00, 0x05]);
        assert_eq!(rec.readings[0], Reading::Failed);
        assert!(matches!(rec.errors[0], DecodeError::Transform { index: 0, .. }));
        assert_eq!(raw_of(&rec.readings[1]), 5);
    }

    #[test]
    fn test_cursor_never_reads_past_end() {
        let data = [1u8, 2, 3];
        let mut cursor = RecordCursor::new(&data);
        assert_eq!(cursor.take(2), Some(&data[..2]));
        assert_eq!(cursor.take(4), None);
        assert_eq!(cursor.remaining(), 0);
        assert_eq!(cursor.position(), 3);
        assert!(cursor.rest().is_empty());
    }
}
