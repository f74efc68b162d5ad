//! Pluggable log serializers.
//!
//! The log is written as nested records and sequences of keyed scalars.
//! [`JsonLogWriter`] builds a `serde_json::Value` tree and pretty-prints it.
//! [`BinaryLogWriter`] writes a compact tagged stream. Keys are meaningful
//! only inside records; the binary encoding drops them entirely and relies
//! on field order.

use crate::config::LogFormat;
use crate::error::PersistError;
use serde_json::{Map, Value};
use std::iter::Peekable;
use std::vec::IntoIter;

pub trait LogWriter {
    fn begin_record(&mut self, key: &str) -> Result<(), PersistError>;
    fn end_record(&mut self) -> Result<(), PersistError>;
    fn begin_sequence(&mut self, key: &str, len: usize) -> Result<(), PersistError>;
    fn end_sequence(&mut self) -> Result<(), PersistError>;
    fn write_u64(&mut self, key: &str, value: u64) -> Result<(), PersistError>;
    fn write_i64(&mut self, key: &str, value: i64) -> Result<(), PersistError>;
    fn write_f64(&mut self, key: &str, value: f64) -> Result<(), PersistError>;
    fn write_bool(&mut self, key: &str, value: bool) -> Result<(), PersistError>;
    fn write_str(&mut self, key: &str, value: &str) -> Result<(), PersistError>;
    fn write_none(&mut self, key: &str) -> Result<(), PersistError>;

    /// Close the stream and hand back its bytes.
    fn finish(self: Box<Self>) -> Result<Vec<u8>, PersistError>;
}

pub trait LogReader {
    fn begin_record(&mut self, key: &str) -> Result<(), PersistError>;
    fn end_record(&mut self) -> Result<(), PersistError>;
    /// Returns the number of elements in the sequence.
    fn begin_sequence(&mut self, key: &str) -> Result<usize, PersistError>;
    fn end_sequence(&mut self) -> Result<(), PersistError>;
    fn read_u64(&mut self, key: &str) -> Result<u64, PersistError>;
    fn read_i64(&mut self, key: &str) -> Result<i64, PersistError>;
    fn read_f64(&mut self, key: &str) -> Result<f64, PersistError>;
    fn read_bool(&mut self, key: &str) -> Result<bool, PersistError>;
    fn read_str(&mut self, key: &str) -> Result<String, PersistError>;
    /// Consume a `none` marker if one is next; otherwise leave the stream alone.
    fn read_none(&mut self, key: &str) -> Result<bool, PersistError>;
}

pub fn writer_for(format: LogFormat) -> Box<dyn LogWriter> {
    match format {
        LogFormat::Json => Box::new(JsonLogWriter::new()),
        LogFormat::Binary => Box::new(BinaryLogWriter::new()),
    }
}

pub fn reader_for(format: LogFormat, bytes: Vec<u8>) -> Result<Box<dyn LogReader>, PersistError> {
    Ok(match format {
        LogFormat::Json => Box::new(JsonLogReader::new(&bytes)?),
        LogFormat::Binary => Box::new(BinaryLogReader::new(bytes)?),
    })
}

// ═══════════════════════════════════════════════════════════════════════
//  JSON
// ═══════════════════════════════════════════════════════════════════════

enum JsonFrame {
    Record { key: String, fields: Map<String, Value> },
    Sequence { key: String, items: Vec<Value> },
}

pub struct JsonLogWriter {
    stack: Vec<JsonFrame>,
    root: Option<Value>,
}

impl Default for JsonLogWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonLogWriter {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            root: None,
        }
    }

    fn put(&mut self, key: &str, value: Value) -> Result<(), PersistError> {
        match self.stack.last_mut() {
            Some(JsonFrame::Record { fields, .. }) => {
                fields.insert(key.to_string(), value);
            }
            Some(JsonFrame::Sequence { items, .. }) => items.push(value),
            None => {
                if self.root.is_some() {
                    return Err(PersistError::malformed("more than one top-level value"));
                }
                self.root = Some(value);
            }
        }
        Ok(())
    }
}

fn json_f64(value: f64) -> Value {
    if value.is_nan() {
        Value::String("NaN".to_string())
    } else if value == f64::INFINITY {
        Value::String("Infinity".to_string())
    } else if value == f64::NEG_INFINITY {
        Value::String("-Infinity".to_string())
    } else {
        // finite values always convert
        serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}

impl LogWriter for JsonLogWriter {
    fn begin_record(&mut self, key: &str) -> Result<(), PersistError> {
        self.stack.push(JsonFrame::Record {
            key: key.to_string(),
            fields: Map::new(),
        });
        Ok(())
    }

    fn end_record(&mut self) -> Result<(), PersistError> {
        match self.stack.pop() {
            Some(JsonFrame::Record { key, fields }) => self.put(&key, Value::Object(fields)),
            _ => Err(PersistError::malformed("end_record without open record")),
        }
    }

    fn begin_sequence(&mut self, key: &str, len: usize) -> Result<(), PersistError> {
        self.stack.push(JsonFrame::Sequence {
            key: key.to_string(),
            items: Vec::with_capacity(len),
        });
        Ok(())
    }

    fn end_sequence(&mut self) -> Result<(), PersistError> {
        match self.stack.pop() {
            Some(JsonFrame::Sequence { key, items }) => self.put(&key, Value::Array(items)),
            _ => Err(PersistError::malformed("end_sequence without open sequence")),
        }
    }

    fn write_u64(&mut self, key: &str, value: u64) -> Result<(), PersistError> {
        self.put(key, Value::from(value))
    }

    fn write_i64(&mut self, key: &str, value: i64) -> Result<(), PersistError> {
        self.put(key, Value::from(value))
    }

    fn write_f64(&mut self, key: &str, value: f64) -> Result<(), PersistError> {
        self.put(key, json_f64(value))
    }

    fn write_bool(&mut self, key: &str, value: bool) -> Result<(), PersistError> {
        self.put(key, Value::Bool(value))
    }

    fn write_str(&mut self, key: &str, value: &str) -> Result<(), PersistError> {
        self.put(key, Value::String(value.to_string()))
    }

    fn write_none(&mut self, key: &str) -> Result<(), PersistError> {
        self.put(key, Value::Null)
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, PersistError> {
        if !self.stack.is_empty() {
            return Err(PersistError::malformed("unterminated record or sequence"));
        }
        let root = self.root.unwrap_or(Value::Null);
        Ok(serde_json::to_vec_pretty(&root)?)
    }
}

enum JsonReadFrame {
    Record(Map<String, Value>),
    Sequence(Peekable<IntoIter<Value>>),
}

pub struct JsonLogReader {
    stack: Vec<JsonReadFrame>,
    root: Option<Value>,
}

impl JsonLogReader {
    pub fn new(bytes: &[u8]) -> Result<Self, PersistError> {
        Ok(Self {
            stack: Vec::new(),
            root: Some(serde_json::from_slice(bytes)?),
        })
    }

    fn take(&mut self, key: &str) -> Result<Value, PersistError> {
        let value = match self.stack.last_mut() {
            Some(JsonReadFrame::Record(fields)) => fields.remove(key),
            Some(JsonReadFrame::Sequence(items)) => items.next(),
            None => self.root.take(),
        };
        value.ok_or_else(|| PersistError::malformed(format!("missing value for '{key}'")))
    }

    fn type_error(key: &str, expected: &str, found: &Value) -> PersistError {
        PersistError::malformed(format!("'{key}': expected {expected}, found {found}"))
    }
}

impl LogReader for JsonLogReader {
    fn begin_record(&mut self, key: &str) -> Result<(), PersistError> {
        match self.take(key)? {
            Value::Object(fields) => {
                self.stack.push(JsonReadFrame::Record(fields));
                Ok(())
            }
            other => Err(Self::type_error(key, "record", &other)),
        }
    }

    fn end_record(&mut self) -> Result<(), PersistError> {
        match self.stack.pop() {
            Some(JsonReadFrame::Record(_)) => Ok(()),
            _ => Err(PersistError::malformed("end_record without open record")),
        }
    }

    fn begin_sequence(&mut self, key: &str) -> Result<usize, PersistError> {
        match self.take(key)? {
            Value::Array(items) => {
                let len = items.len();
                self.stack
                    .push(JsonReadFrame::Sequence(items.into_iter().peekable()));
                Ok(len)
            }
            other => Err(Self::type_error(key, "sequence", &other)),
        }
    }

    fn end_sequence(&mut self) -> Result<(), PersistError> {
        match self.stack.pop() {
            Some(JsonReadFrame::Sequence(mut rest)) => match rest.next() {
                None => Ok(()),
                Some(_) => Err(PersistError::malformed("sequence has trailing elements")),
            },
            _ => Err(PersistError::malformed("end_sequence without open sequence")),
        }
    }

    fn read_u64(&mut self, key: &str) -> Result<u64, PersistError> {
        let value = self.take(key)?;
        value
            .as_u64()
            .ok_or_else(|| Self::type_error(key, "u64", &value))
    }

    fn read_i64(&mut self, key: &str) -> Result<i64, PersistError> {
        let value = self.take(key)?;
        value
            .as_i64()
            .ok_or_else(|| Self::type_error(key, "i64", &value))
    }

    fn read_f64(&mut self, key: &str) -> Result<f64, PersistError> {
        let value = self.take(key)?;
        match &value {
            Value::Number(n) => n.as_f64().ok_or_else(|| Self::type_error(key, "f64", &value)),
            Value::String(s) if s == "NaN" => Ok(f64::NAN),
            Value::String(s) if s == "Infinity" => Ok(f64::INFINITY),
            Value::String(s) if s == "-Infinity" => Ok(f64::NEG_INFINITY),
            _ => Err(Self::type_error(key, "f64", &value)),
        }
    }

    fn read_bool(&mut self, key: &str) -> Result<bool, PersistError> {
        let value = self.take(key)?;
        value
            .as_bool()
            .ok_or_else(|| Self::type_error(key, "bool", &value))
    }

    fn read_str(&mut self, key: &str) -> Result<String, PersistError> {
        match self.take(key)? {
            Value::String(s) => Ok(s),
            other => Err(Self::type_error(key, "string", &other)),
        }
    }

    fn read_none(&mut self, key: &str) -> Result<bool, PersistError> {
        match self.stack.last_mut() {
            Some(JsonReadFrame::Record(fields)) => {
                if matches!(fields.get(key), Some(Value::Null)) {
                    fields.remove(key);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Some(JsonReadFrame::Sequence(items)) => {
                if matches!(items.peek(), Some(Value::Null)) {
                    items.next();
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            None => Ok(matches!(self.root, Some(Value::Null))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Binary
// ═══════════════════════════════════════════════════════════════════════

const MAGIC: &[u8; 4] = b"TTDB";
const VERSION: u8 = 1;

const TAG_U64: u8 = 0x01;
const TAG_I64: u8 = 0x02;
const TAG_F64: u8 = 0x03;
const TAG_BOOL: u8 = 0x04;
const TAG_STR: u8 = 0x05;
const TAG_NONE: u8 = 0x06;
const TAG_REC_START: u8 = 0xB0;
const TAG_REC_END: u8 = 0xB1;
const TAG_SEQ_START: u8 = 0xB2;
const TAG_SEQ_END: u8 = 0xB3;

pub struct BinaryLogWriter {
    buf: Vec<u8>,
    depth: usize,
}

impl Default for BinaryLogWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl BinaryLogWriter {
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(4096);
        buf.extend_from_slice(MAGIC);
        buf.push(VERSION);
        Self { buf, depth: 0 }
    }

    fn len_prefix(&mut self, len: usize) -> Result<(), PersistError> {
        let len = u32::try_from(len)
            .map_err(|_| PersistError::malformed(format!("length {len} exceeds u32")))?;
        self.buf.extend_from_slice(&len.to_le_bytes());
        Ok(())
    }
}

impl LogWriter for BinaryLogWriter {
    fn begin_record(&mut self, _key: &str) -> Result<(), PersistError> {
        self.buf.push(TAG_REC_START);
        self.depth += 1;
        Ok(())
    }

    fn end_record(&mut self) -> Result<(), PersistError> {
        self.depth = self
            .depth
            .checked_sub(1)
            .ok_or_else(|| PersistError::malformed("end_record without open record"))?;
        self.buf.push(TAG_REC_END);
        Ok(())
    }

    fn begin_sequence(&mut self, _key: &str, len: usize) -> Result<(), PersistError> {
        self.buf.push(TAG_SEQ_START);
        self.len_prefix(len)?;
        self.depth += 1;
        Ok(())
    }

    fn end_sequence(&mut self) -> Result<(), PersistError> {
        self.depth = self
            .depth
            .checked_sub(1)
            .ok_or_else(|| PersistError::malformed("end_sequence without open sequence"))?;
        self.buf.push(TAG_SEQ_END);
        Ok(())
    }

    fn write_u64(&mut self, _key: &str, value: u64) -> Result<(), PersistError> {
        self.buf.push(TAG_U64);
        self.buf.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn write_i64(&mut self, _key: &str, value: i64) -> Result<(), PersistError> {
        self.buf.push(TAG_I64);
        self.buf.extend_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn write_f64(&mut self, _key: &str, value: f64) -> Result<(), PersistError> {
        self.buf.push(TAG_F64);
        self.buf.extend_from_slice(&value.to_bits().to_le_bytes());
        Ok(())
    }

    fn write_bool(&mut self, _key: &str, value: bool) -> Result<(), PersistError> {
        self.buf.push(TAG_BOOL);
        self.buf.push(u8::from(value));
        Ok(())
    }

    fn write_str(&mut self, _key: &str, value: &str) -> Result<(), PersistError> {
        self.buf.push(TAG_STR);
        self.len_prefix(value.len())?;
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    fn write_none(&mut self, _key: &str) -> Result<(), PersistError> {
        self.buf.push(TAG_NONE);
        Ok(())
    }

    fn finish(self: Box<Self>) -> Result<Vec<u8>, PersistError> {
        if self.depth != 0 {
            return Err(PersistError::malformed("unterminated record or sequence"));
        }
        Ok(self.buf)
    }
}

pub struct BinaryLogReader {
    buf: Vec<u8>,
    pos: usize,
}

impl BinaryLogReader {
    pub fn new(buf: Vec<u8>) -> Result<Self, PersistError> {
        if buf.len() < MAGIC.len() + 1 || &buf[..MAGIC.len()] != MAGIC {
            return Err(PersistError::malformed("missing binary log header"));
        }
        if buf[MAGIC.len()] != VERSION {
            return Err(PersistError::malformed(format!(
                "unsupported binary log version {}",
                buf[MAGIC.len()]
            )));
        }
        Ok(Self {
            buf,
            pos: MAGIC.len() + 1,
        })
    }

    fn bytes(&mut self, n: usize) -> Result<&[u8], PersistError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| PersistError::malformed("unexpected end of binary log"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn expect_tag(&mut self, tag: u8, key: &str) -> Result<(), PersistError> {
        let found = self.bytes(1)?[0];
        if found != tag {
            return Err(PersistError::malformed(format!(
                "'{key}': expected tag {tag:#04x}, found {found:#04x} at offset {}",
                self.pos - 1
            )));
        }
        Ok(())
    }

    fn array8(&mut self) -> Result<[u8; 8], PersistError> {
        let mut out = [0u8; 8];
        out.copy_from_slice(self.bytes(8)?);
        Ok(out)
    }

    fn len_prefix(&mut self) -> Result<usize, PersistError> {
        let mut out = [0u8; 4];
        out.copy_from_slice(self.bytes(4)?);
        Ok(u32::from_le_bytes(out) as usize)
    }
}

impl LogReader for BinaryLogReader {
    fn begin_record(&mut self, key: &str) -> Result<(), PersistError> {
        self.expect_tag(TAG_REC_START, key)
    }

    fn end_record(&mut self) -> Result<(), PersistError> {
        self.expect_tag(TAG_REC_END, "<record end>")
    }

    fn begin_sequence(&mut self, key: &str) -> Result<usize, PersistError> {
        self.expect_tag(TAG_SEQ_START, key)?;
        let len = self.len_prefix()?;
        // every element takes at least one tag byte
        let remaining = self.buf.len() - self.pos;
        if len > remaining {
            return Err(PersistError::malformed(format!(
                "'{key}': sequence of {len} items but only {remaining} bytes left"
            )));
        }
        Ok(len)
    }

    fn end_sequence(&mut self) -> Result<(), PersistError> {
        self.expect_tag(TAG_SEQ_END, "<sequence end>")
    }

    fn read_u64(&mut self, key: &str) -> Result<u64, PersistError> {
        self.expect_tag(TAG_U64, key)?;
        Ok(u64::from_le_bytes(self.array8()?))
    }

    fn read_i64(&mut self, key: &str) -> Result<i64, PersistError> {
        self.expect_tag(TAG_I64, key)?;
        Ok(i64::from_le_bytes(self.array8()?))
    }

    fn read_f64(&mut self, key: &str) -> Result<f64, PersistError> {
        self.expect_tag(TAG_F64, key)?;
        Ok(f64::from_bits(u64::from_le_bytes(self.array8()?)))
    }

    fn read_bool(&mut self, key: &str) -> Result<bool, PersistError> {
        self.expect_tag(TAG_BOOL, key)?;
        match self.bytes(1)?[0] {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(PersistError::malformed(format!(
                "'{key}': invalid bool byte {other}"
            ))),
        }
    }

    fn read_str(&mut self, key: &str) -> Result<String, PersistError> {
        self.expect_tag(TAG_STR, key)?;
        let len = self.len_prefix()?;
        let raw = self.bytes(len)?.to_vec();
        String::from_utf8(raw)
            .map_err(|e| PersistError::malformed(format!("'{key}': invalid utf-8: {e}")))
    }

    fn read_none(&mut self, _key: &str) -> Result<bool, PersistError> {
        if self.buf.get(self.pos) == Some(&TAG_NONE) {
            self.pos += 1;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
