//! Tags, property ids, and the log-safe value representation.

use crate::arena::{Arena, StrRef};
use crate::error::PersistError;
use crate::writer::{LogReader, LogWriter};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable object identity used by snapshots, independent of addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityTag(pub u64);

impl IdentityTag {
    pub const INVALID: IdentityTag = IdentityTag(0);
}

/// Tag the log uses to name host objects (contexts, functions, values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogTag(pub u64);

impl LogTag {
    pub const INVALID: LogTag = LogTag(0);
}

/// Function body identity in the host engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BodyId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(pub u32);

impl PropertyId {
    pub const NO_PROPERTY: PropertyId = PropertyId(u32::MAX);

    pub fn is_none(self) -> bool {
        self == Self::NO_PROPERTY
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("<no property>")
        } else {
            write!(f, "#{}", self.0)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyAttributes(pub u8);

impl PropertyAttributes {
    pub const NONE: PropertyAttributes = PropertyAttributes(0x00);
    pub const ENUMERABLE: PropertyAttributes = PropertyAttributes(0x01);
    pub const CONFIGURABLE: PropertyAttributes = PropertyAttributes(0x02);
    pub const WRITABLE: PropertyAttributes = PropertyAttributes(0x04);
    pub const DEFAULT: PropertyAttributes = PropertyAttributes(0x07);
}

/// Portable description of one property id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyRecord {
    pub id: PropertyId,
    pub is_numeric: bool,
    pub is_bound: bool,
    pub is_symbol: bool,
    pub name: String,
}

impl PropertyRecord {
    pub fn named(id: PropertyId, name: impl Into<String>) -> Self {
        Self {
            id,
            is_numeric: false,
            is_bound: true,
            is_symbol: false,
            name: name.into(),
        }
    }

    pub(crate) fn emit(&self, writer: &mut dyn LogWriter) -> Result<(), PersistError> {
        writer.begin_record("")?;
        writer.write_u64("pid", u64::from(self.id.0))?;
        writer.write_bool("isNumeric", self.is_numeric)?;
        writer.write_bool("isBound", self.is_bound)?;
        writer.write_bool("isSymbol", self.is_symbol)?;
        writer.write_str("name", &self.name)?;
        writer.end_record()
    }

    pub(crate) fn parse(reader: &mut dyn LogReader) -> Result<Self, PersistError> {
        reader.begin_record("")?;
        let id = PropertyId(narrow_u32(reader.read_u64("pid")?)?);
        let is_numeric = reader.read_bool("isNumeric")?;
        let is_bound = reader.read_bool("isBound")?;
        let is_symbol = reader.read_bool("isSymbol")?;
        let name = reader.read_str("name")?;
        reader.end_record()?;
        Ok(Self {
            id,
            is_numeric,
            is_bound,
            is_symbol,
            name,
        })
    }
}

pub(crate) fn narrow_u32(value: u64) -> Result<u32, PersistError> {
    u32::try_from(value).map_err(|_| PersistError::malformed(format!("{value} does not fit in u32")))
}

/// A value as the host engine hands it to the log.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i32),
    Number(f64),
    String(String),
    Symbol(PropertyId),
    Object(LogTag),
}

/// A value flattened for storage in the log. Strings live in the arena.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i32),
    Number(f64),
    String(StrRef),
    Symbol(PropertyId),
    Object(LogTag),
}

impl LogValue {
    /// Flatten a host value, copying any string payload into `arena`.
    pub fn extract(value: &HostValue, arena: &mut Arena) -> LogValue {
        match value {
            HostValue::Undefined => LogValue::Undefined,
            HostValue::Null => LogValue::Null,
            HostValue::Bool(b) => LogValue::Bool(*b),
            HostValue::Int(i) => LogValue::Int(*i),
            HostValue::Number(n) => LogValue::Number(*n),
            HostValue::String(s) => LogValue::String(arena.alloc_str(s)),
            HostValue::Symbol(pid) => LogValue::Symbol(*pid),
            HostValue::Object(tag) => LogValue::Object(*tag),
        }
    }

    /// Rebuild the host-facing value.
    pub fn inflate(&self, arena: &Arena) -> HostValue {
        match self {
            LogValue::Undefined => HostValue::Undefined,
            LogValue::Null => HostValue::Null,
            LogValue::Bool(b) => HostValue::Bool(*b),
            LogValue::Int(i) => HostValue::Int(*i),
            LogValue::Number(n) => HostValue::Number(*n),
            LogValue::String(s) => HostValue::String(arena.get_str(*s).to_string()),
            LogValue::Symbol(pid) => HostValue::Symbol(*pid),
            LogValue::Object(tag) => HostValue::Object(*tag),
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            LogValue::Undefined => "undefined",
            LogValue::Null => "null",
            LogValue::Bool(_) => "bool",
            LogValue::Int(_) => "int",
            LogValue::Number(_) => "number",
            LogValue::String(_) => "string",
            LogValue::Symbol(_) => "symbol",
            LogValue::Object(_) => "object",
        }
    }

    pub(crate) fn emit(
        &self,
        key: &str,
        writer: &mut dyn LogWriter,
        arena: &Arena,
    ) -> Result<(), PersistError> {
        writer.begin_record(key)?;
        writer.write_str("kind", self.kind_name())?;
        match self {
            LogValue::Undefined | LogValue::Null => {}
            LogValue::Bool(b) => writer.write_bool("v", *b)?,
            LogValue::Int(i) => writer.write_i64("v", i64::from(*i))?,
            LogValue::Number(n) => writer.write_f64("v", *n)?,
            LogValue::String(s) => writer.write_str("v", arena.get_str(*s))?,
            LogValue::Symbol(pid) => writer.write_u64("v", u64::from(pid.0))?,
            LogValue::Object(tag) => writer.write_u64("v", tag.0)?,
        }
        writer.end_record()
    }

    pub(crate) fn parse(
        key: &str,
        reader: &mut dyn LogReader,
        arena: &mut Arena,
    ) -> Result<LogValue, PersistError> {
        reader.begin_record(key)?;
        let kind = reader.read_str("kind")?;
        let value = match kind.as_str() {
            "undefined" => LogValue::Undefined,
            "null" => LogValue::Null,
            "bool" => LogValue::Bool(reader.read_bool("v")?),
            "int" => {
                let raw = reader.read_i64("v")?;
                LogValue::Int(i32::try_from(raw).map_err(|_| {
                    PersistError::malformed(format!("int value {raw} out of range"))
                })?)
            }
            "number" => LogValue::Number(reader.read_f64("v")?),
            "string" => {
                let s = reader.read_str("v")?;
                LogValue::String(arena.alloc_str(&s))
            }
            "symbol" => LogValue::Symbol(PropertyId(narrow_u32(reader.read_u64("v")?)?)),
            "object" => LogValue::Object(LogTag(reader.read_u64("v")?)),
            other => {
                return Err(PersistError::malformed(format!(
                    "unknown value kind '{other}'"
                )))
            }
        };
        reader.end_record()?;
        Ok(value)
    }
}
