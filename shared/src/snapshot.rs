//! Snapshot codec
//!
//! A snapshot is one MessagePack value describing every registered object:
//!
//! ```text
//! map{ type tag (str) -> map{ instance tag (uint) -> array[ field, ... ] } }
//! ```
//!
//! Integers always take the most compact MessagePack form, so a snapshot of a
//! single `"TestObject"` with one `true` field is exactly
//! `81 aa 54 65 73 74 4f 62 6a 65 63 74 81 01 91 c3`.
//!
//! Decoding preserves the order buckets and instances were written in, so a
//! decoded snapshot compares equal to the registry state that produced it.

use rmp::decode::{self, NumValueReadError, ValueReadError};
use rmp::encode;
use rmp::Marker;

use crate::error::CodecError;
use crate::replicatable::{FieldWriter, InstanceTag, Replicatable, TypeTag};

/// Nesting limit for arrays and maps inside a field list
const MAX_FIELD_DEPTH: usize = 32;

/// A single replicated value.
///
/// Non-negative integers are always held as [`Field::UInt`]; [`Field::Int`]
/// only carries negative values. The `From` conversions follow this rule, which
/// keeps encode and decode symmetric.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Nil,
    Bool(bool),
    Int(i64),
    UInt(u64),
    F32(f32),
    F64(f64),
    Str(String),
    Bin(Vec<u8>),
    Array(Vec<Field>),
    Map(Vec<(Field, Field)>),
}

impl Field {
    fn signed(value: i64) -> Self {
        if value >= 0 {
            Field::UInt(value as u64)
        } else {
            Field::Int(value)
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Field::Nil)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Field::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Field::UInt(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Field::Int(value) => Some(*value),
            Field::UInt(value) => i64::try_from(*value).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Field::F32(value) => Some(f64::from(*value)),
            Field::F64(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Field::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Field]> {
        match self {
            Field::Array(items) => Some(items),
            _ => None,
        }
    }
}

macro_rules! unsigned_field {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Field {
            fn from(value: $ty) -> Self {
                Field::UInt(u64::from(value))
            }
        })*
    };
}

macro_rules! signed_field {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Field {
            fn from(value: $ty) -> Self {
                Field::signed(i64::from(value))
            }
        })*
    };
}

unsigned_field!(u8, u16, u32, u64);
signed_field!(i8, i16, i32, i64);

impl From<usize> for Field {
    fn from(value: usize) -> Self {
        Field::UInt(value as u64)
    }
}

impl From<bool> for Field {
    fn from(value: bool) -> Self {
        Field::Bool(value)
    }
}

impl From<f32> for Field {
    fn from(value: f32) -> Self {
        Field::F32(value)
    }
}

impl From<f64> for Field {
    fn from(value: f64) -> Self {
        Field::F64(value)
    }
}

impl From<&str> for Field {
    fn from(value: &str) -> Self {
        Field::Str(value.to_string())
    }
}

impl From<String> for Field {
    fn from(value: String) -> Self {
        Field::Str(value)
    }
}

impl From<&[u8]> for Field {
    fn from(value: &[u8]) -> Self {
        Field::Bin(value.to_vec())
    }
}

impl From<Vec<u8>> for Field {
    fn from(value: Vec<u8>) -> Self {
        Field::Bin(value)
    }
}

impl From<Vec<Field>> for Field {
    fn from(items: Vec<Field>) -> Self {
        Field::Array(items)
    }
}

impl<T: Into<Field>> From<Option<T>> for Field {
    fn from(value: Option<T>) -> Self {
        value.map_or(Field::Nil, Into::into)
    }
}

fn container_len(len: usize) -> Result<u32, CodecError> {
    u32::try_from(len).map_err(|_| CodecError::LengthOverflow { len })
}

fn write_field(buf: &mut Vec<u8>, field: &Field) -> Result<(), CodecError> {
    match field {
        Field::Nil => encode::write_nil(buf)?,
        Field::Bool(value) => encode::write_bool(buf, *value)?,
        Field::Int(value) => {
            encode::write_sint(buf, *value)?;
        }
        Field::UInt(value) => {
            encode::write_uint(buf, *value)?;
        }
        Field::F32(value) => encode::write_f32(buf, *value)?,
        Field::F64(value) => encode::write_f64(buf, *value)?,
        Field::Str(value) => encode::write_str(buf, value)?,
        Field::Bin(value) => encode::write_bin(buf, value)?,
        Field::Array(items) => {
            encode::write_array_len(buf, container_len(items.len())?)?;
            for item in items {
                write_field(buf, item)?;
            }
        }
        Field::Map(entries) => {
            encode::write_map_len(buf, container_len(entries.len())?)?;
            for (key, value) in entries {
                write_field(buf, key)?;
                write_field(buf, value)?;
            }
        }
    }
    Ok(())
}

/// Streams registry contents into snapshot bytes.
///
/// The caller announces how many type buckets follow, then for each bucket its
/// type tag and instance count, then writes that many objects. Any deviation
/// from the announced counts is reported as [`CodecError::CountMismatch`]
/// rather than producing a malformed snapshot.
#[derive(Debug)]
pub struct SnapshotEncoder {
    buf: Vec<u8>,
    buckets_announced: usize,
    buckets_written: usize,
    instances_announced: usize,
    instances_written: usize,
}

impl SnapshotEncoder {
    pub fn new(bucket_count: usize) -> Result<Self, CodecError> {
        let mut buf = Vec::new();
        encode::write_map_len(&mut buf, container_len(bucket_count)?)?;

        Ok(Self {
            buf,
            buckets_announced: bucket_count,
            buckets_written: 0,
            instances_announced: 0,
            instances_written: 0,
        })
    }

    fn check_bucket_complete(&self) -> Result<(), CodecError> {
        if self.instances_written != self.instances_announced {
            return Err(CodecError::CountMismatch {
                what: "instances",
                announced: self.instances_announced,
                received: self.instances_written,
            });
        }
        Ok(())
    }

    pub fn begin_bucket(
        &mut self,
        type_tag: TypeTag,
        instance_count: usize,
    ) -> Result<(), CodecError> {
        self.check_bucket_complete()?;
        if self.buckets_written == self.buckets_announced {
            return Err(CodecError::CountMismatch {
                what: "buckets",
                announced: self.buckets_announced,
                received: self.buckets_written + 1,
            });
        }

        encode::write_str(&mut self.buf, type_tag.as_str())?;
        encode::write_map_len(&mut self.buf, container_len(instance_count)?)?;

        self.buckets_written += 1;
        self.instances_announced = instance_count;
        self.instances_written = 0;
        Ok(())
    }

    /// Writes one object as `instance tag -> field array` in the current bucket.
    pub fn write_object(&mut self, object: &dyn Replicatable) -> Result<(), CodecError> {
        if self.instances_written == self.instances_announced {
            return Err(CodecError::CountMismatch {
                what: "instances",
                announced: self.instances_announced,
                received: self.instances_written + 1,
            });
        }

        // Collect first so a refusing object leaves no partial bytes behind
        let mut fields = FieldWriter::new();
        object.encode(&mut fields)?;
        let fields = fields.into_fields();

        encode::write_uint(&mut self.buf, u64::from(object.instance_tag()))?;
        encode::write_array_len(&mut self.buf, container_len(fields.len())?)?;
        for field in &fields {
            write_field(&mut self.buf, field)?;
        }

        self.instances_written += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<Vec<u8>, CodecError> {
        self.check_bucket_complete()?;
        if self.buckets_written != self.buckets_announced {
            return Err(CodecError::CountMismatch {
                what: "buckets",
                announced: self.buckets_announced,
                received: self.buckets_written,
            });
        }
        Ok(self.buf)
    }
}

/// Decoded form of one registered object.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotInstance {
    pub instance_tag: InstanceTag,
    pub fields: Vec<Field>,
}

/// All objects of one type, in registration order.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotBucket {
    pub type_tag: String,
    pub instances: Vec<SnapshotInstance>,
}

impl SnapshotBucket {
    pub fn instance(&self, instance_tag: InstanceTag) -> Option<&SnapshotInstance> {
        self.instances
            .iter()
            .find(|instance| instance.instance_tag == instance_tag)
    }
}

/// Decoded snapshot, buckets in wire order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Snapshot {
    pub buckets: Vec<SnapshotBucket>,
}

impl Snapshot {
    pub fn bucket(&self, type_tag: &str) -> Option<&SnapshotBucket> {
        self.buckets
            .iter()
            .find(|bucket| bucket.type_tag == type_tag)
    }

    /// Looks an object up by instance tag across all buckets.
    pub fn instance(&self, instance_tag: InstanceTag) -> Option<(&str, &SnapshotInstance)> {
        self.buckets.iter().find_map(|bucket| {
            bucket
                .instance(instance_tag)
                .map(|instance| (bucket.type_tag.as_str(), instance))
        })
    }

    pub fn object_count(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.instances.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Cursor over the input, decoding through `rmp::decode`.
///
/// Offsets in errors point at the start of the value that failed.
struct Reader<'a> {
    input: &'a [u8],
    total: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self {
            input: bytes,
            total: bytes.len(),
        }
    }

    fn offset(&self) -> usize {
        self.total - self.input.len()
    }

    fn remaining(&self) -> usize {
        self.input.len()
    }

    /// Looks at the next marker without consuming it.
    fn peek_marker(&self) -> Result<(Marker, u8), CodecError> {
        match self.input.first() {
            Some(&byte) => Ok((Marker::from_u8(byte), byte)),
            None => Err(CodecError::Truncated {
                offset: self.offset(),
            }),
        }
    }

    fn take(&mut self, len: usize, offset: usize) -> Result<&'a [u8], CodecError> {
        if len > self.input.len() {
            return Err(CodecError::Truncated { offset });
        }
        let (head, tail) = self.input.split_at(len);
        self.input = tail;
        Ok(head)
    }

    fn read_map_header(&mut self, expected: &'static str) -> Result<usize, CodecError> {
        let offset = self.offset();
        decode::read_map_len(&mut self.input)
            .map(|len| len as usize)
            .map_err(|e| value_error(e, offset, expected))
    }

    fn read_array_header(&mut self, expected: &'static str) -> Result<usize, CodecError> {
        let offset = self.offset();
        decode::read_array_len(&mut self.input)
            .map(|len| len as usize)
            .map_err(|e| value_error(e, offset, expected))
    }

    fn read_str(&mut self, expected: &'static str) -> Result<String, CodecError> {
        let offset = self.offset();
        let len = decode::read_str_len(&mut self.input)
            .map_err(|e| value_error(e, offset, expected))?;

        let body_offset = self.offset();
        let raw = self.take(len as usize, offset)?;
        std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|_| CodecError::InvalidUtf8 {
                offset: body_offset,
            })
    }

    fn read_bin(&mut self) -> Result<Vec<u8>, CodecError> {
        let offset = self.offset();
        let len = decode::read_bin_len(&mut self.input)
            .map_err(|e| value_error(e, offset, "a binary field"))?;
        Ok(self.take(len as usize, offset)?.to_vec())
    }

    fn read_type_tag(&mut self) -> Result<String, CodecError> {
        self.read_str("a type tag string")
    }

    fn read_instance_tag(&mut self) -> Result<InstanceTag, CodecError> {
        const EXPECTED: &str = "an unsigned instance tag";

        let offset = self.offset();
        let (marker, byte) = self.peek_marker()?;
        // Signed markers are refused even for positive values
        if !matches!(
            marker,
            Marker::FixPos(_) | Marker::U8 | Marker::U16 | Marker::U32 | Marker::U64
        ) {
            return Err(CodecError::UnexpectedMarker {
                byte,
                offset,
                expected: EXPECTED,
            });
        }

        let value = decode::read_int::<u64, _>(&mut self.input)
            .map_err(|e| int_error(e, byte, offset, EXPECTED))?;
        InstanceTag::try_from(value).map_err(|_| CodecError::InstanceTagRange { value })
    }

    fn read_field(&mut self, depth: usize) -> Result<Field, CodecError> {
        const EXPECTED: &str = "a field value";

        let offset = self.offset();
        let (marker, byte) = self.peek_marker()?;
        let field = match marker {
            Marker::Null => {
                decode::read_nil(&mut self.input).map_err(|e| value_error(e, offset, EXPECTED))?;
                Field::Nil
            }
            Marker::True | Marker::False => decode::read_bool(&mut self.input)
                .map(Field::Bool)
                .map_err(|e| value_error(e, offset, EXPECTED))?,
            Marker::FixPos(_) | Marker::U8 | Marker::U16 | Marker::U32 | Marker::U64 => {
                decode::read_int::<u64, _>(&mut self.input)
                    .map(Field::UInt)
                    .map_err(|e| int_error(e, byte, offset, EXPECTED))?
            }
            Marker::FixNeg(_) | Marker::I8 | Marker::I16 | Marker::I32 | Marker::I64 => {
                decode::read_int::<i64, _>(&mut self.input)
                    .map(Field::signed)
                    .map_err(|e| int_error(e, byte, offset, EXPECTED))?
            }
            Marker::F32 => decode::read_f32(&mut self.input)
                .map(Field::F32)
                .map_err(|e| value_error(e, offset, EXPECTED))?,
            Marker::F64 => decode::read_f64(&mut self.input)
                .map(Field::F64)
                .map_err(|e| value_error(e, offset, EXPECTED))?,
            Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => {
                Field::Str(self.read_str(EXPECTED)?)
            }
            Marker::Bin8 | Marker::Bin16 | Marker::Bin32 => Field::Bin(self.read_bin()?),
            Marker::FixArray(_) | Marker::Array16 | Marker::Array32 => {
                check_depth(depth, offset)?;
                let len = self.read_array_header("an array")?;
                let mut items = Vec::with_capacity(len.min(self.remaining()));
                for _ in 0..len {
                    items.push(self.read_field(depth + 1)?);
                }
                Field::Array(items)
            }
            Marker::FixMap(_) | Marker::Map16 | Marker::Map32 => {
                check_depth(depth, offset)?;
                let len = self.read_map_header("a map")?;
                let mut entries = Vec::with_capacity(len.min(self.remaining()));
                for _ in 0..len {
                    let key = self.read_field(depth + 1)?;
                    let value = self.read_field(depth + 1)?;
                    entries.push((key, value));
                }
                Field::Map(entries)
            }
            // Extension types and the reserved marker
            _ => {
                return Err(CodecError::UnexpectedMarker {
                    byte,
                    offset,
                    expected: EXPECTED,
                })
            }
        };
        Ok(field)
    }
}

fn check_depth(depth: usize, offset: usize) -> Result<(), CodecError> {
    if depth >= MAX_FIELD_DEPTH {
        return Err(CodecError::TooDeep {
            limit: MAX_FIELD_DEPTH,
            offset,
        });
    }
    Ok(())
}

/// Maps a read failure of a marker-typed value. Reads from a slice only fail
/// on I/O when the input runs out.
fn value_error(error: ValueReadError, offset: usize, expected: &'static str) -> CodecError {
    match error {
        ValueReadError::InvalidMarkerRead(_) | ValueReadError::InvalidDataRead(_) => {
            CodecError::Truncated { offset }
        }
        ValueReadError::TypeMismatch(marker) => CodecError::UnexpectedMarker {
            byte: marker.to_u8(),
            offset,
            expected,
        },
    }
}

fn int_error(
    error: NumValueReadError,
    byte: u8,
    offset: usize,
    expected: &'static str,
) -> CodecError {
    match error {
        NumValueReadError::InvalidMarkerRead(_) | NumValueReadError::InvalidDataRead(_) => {
            CodecError::Truncated { offset }
        }
        NumValueReadError::TypeMismatch(_) | NumValueReadError::OutOfRange => {
            CodecError::UnexpectedMarker {
                byte,
                offset,
                expected,
            }
        }
    }
}

/// Decodes one snapshot from the front of `bytes`.
///
/// Returns the snapshot and the number of bytes it occupied, leaving any bytes
/// after it untouched. A snapshot cut short yields [`CodecError::Truncated`],
/// which a stream reader treats as "wait for more data".
pub fn decode_snapshot_prefix(bytes: &[u8]) -> Result<(Snapshot, usize), CodecError> {
    let mut reader = Reader::new(bytes);

    let bucket_count = reader.read_map_header("a snapshot map")?;
    let mut buckets = Vec::with_capacity(bucket_count.min(reader.remaining()));

    for _ in 0..bucket_count {
        let type_tag = reader.read_type_tag()?;
        let instance_count = reader.read_map_header("an instance map")?;
        let mut instances = Vec::with_capacity(instance_count.min(reader.remaining()));

        for _ in 0..instance_count {
            let instance_tag = reader.read_instance_tag()?;
            let field_count = reader.read_array_header("a field array")?;
            let mut fields = Vec::with_capacity(field_count.min(reader.remaining()));
            for _ in 0..field_count {
                fields.push(reader.read_field(1)?);
            }
            instances.push(SnapshotInstance {
                instance_tag,
                fields,
            });
        }

        buckets.push(SnapshotBucket {
            type_tag,
            instances,
        });
    }

    Ok((Snapshot { buckets }, reader.offset()))
}

/// Decodes a buffer that must contain exactly one snapshot.
pub fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot, CodecError> {
    let (snapshot, used) = decode_snapshot_prefix(bytes)?;
    if used != bytes.len() {
        return Err(CodecError::TrailingBytes {
            count: bytes.len() - used,
        });
    }
    Ok(snapshot)
}
