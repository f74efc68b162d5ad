//! Bump allocator for variable-length event payloads.
//!
//! Strings are appended to one growing text buffer and argument arrays to
//! one growing value buffer. Entries hold `Copy` handles into these buffers,
//! so nothing is freed until the whole arena is cleared with the log.

use crate::value::LogValue;

/// Handle to a string stored in an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StrRef {
    start: usize,
    len: usize,
}

impl StrRef {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Handle to a run of values stored in an [`Arena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValueSlice {
    start: usize,
    len: usize,
}

impl ValueSlice {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[derive(Debug, Default)]
pub struct Arena {
    text: String,
    values: Vec<LogValue>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc_str(&mut self, s: &str) -> StrRef {
        let start = self.text.len();
        self.text.push_str(s);
        StrRef {
            start,
            len: s.len(),
        }
    }

    pub fn get_str(&self, r: StrRef) -> &str {
        &self.text[r.start..r.start + r.len]
    }

    pub fn alloc_values(&mut self, values: &[LogValue]) -> ValueSlice {
        let start = self.values.len();
        self.values.extend_from_slice(values);
        ValueSlice {
            start,
            len: values.len(),
        }
    }

    pub fn get_values(&self, r: ValueSlice) -> &[LogValue] {
        &self.values[r.start..r.start + r.len]
    }

    /// Approximate payload footprint in bytes.
    pub fn bytes_used(&self) -> usize {
        self.text.len() + self.values.len() * std::mem::size_of::<LogValue>()
    }

    pub fn clear(&mut self) {
        self.text.clear();
        self.values.clear();
    }
}
