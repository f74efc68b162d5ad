//! Composite record/debug mode.
//!
//! Index 0 of the stack always holds one base mode. Everything above it is
//! the `ExcludedExecution` overlay, pushed and popped strictly LIFO. The
//! computed mode is the bitwise union of the whole stack and is mirrored
//! onto the attached script context through a [`ModeMirror`].

use crate::error::FatalError;
use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::rc::Rc;

/// Bitset of mode flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct TtdMode(u8);

impl TtdMode {
    pub const INVALID: TtdMode = TtdMode(0x00);
    pub const DISABLED: TtdMode = TtdMode(0x01);
    pub const DETACHED: TtdMode = TtdMode(0x02);
    pub const RECORD_ENABLED: TtdMode = TtdMode(0x04);
    pub const DEBUGGING_ENABLED: TtdMode = TtdMode(0x08);
    pub const EXCLUDED_EXECUTION: TtdMode = TtdMode(0x10);

    pub const TTD_ACTIVE: TtdMode = TtdMode(0x04 | 0x08);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: TtdMode) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn intersects(self, other: TtdMode) -> bool {
        (self.0 & other.0) != 0
    }

    fn is_base(self) -> bool {
        matches!(
            self,
            TtdMode::DISABLED
                | TtdMode::DETACHED
                | TtdMode::RECORD_ENABLED
                | TtdMode::DEBUGGING_ENABLED
        )
    }
}

impl BitOr for TtdMode {
    type Output = TtdMode;

    fn bitor(self, rhs: TtdMode) -> TtdMode {
        TtdMode(self.0 | rhs.0)
    }
}

impl BitOrAssign for TtdMode {
    fn bitor_assign(&mut self, rhs: TtdMode) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for TtdMode {
    type Output = TtdMode;

    fn bitand(self, rhs: TtdMode) -> TtdMode {
        TtdMode(self.0 & rhs.0)
    }
}

impl fmt::Debug for TtdMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(TtdMode, &str); 5] = [
            (TtdMode::DISABLED, "Disabled"),
            (TtdMode::DETACHED, "Detached"),
            (TtdMode::RECORD_ENABLED, "RecordEnabled"),
            (TtdMode::DEBUGGING_ENABLED, "DebuggingEnabled"),
            (TtdMode::EXCLUDED_EXECUTION, "ExcludedExecution"),
        ];

        if self.0 == 0 {
            return f.write_str("Invalid");
        }
        let names: Vec<&str> = NAMES
            .iter()
            .filter(|(m, _)| self.contains(*m))
            .map(|(_, n)| *n)
            .collect();
        f.write_str(&names.join("|"))
    }
}

/// Shared cell through which an attached script context observes the mode.
#[derive(Debug, Clone, Default)]
pub struct ModeMirror(Rc<Cell<TtdMode>>);

impl ModeMirror {
    pub fn new(mode: TtdMode) -> Self {
        Self(Rc::new(Cell::new(mode)))
    }

    pub fn get(&self) -> TtdMode {
        self.0.get()
    }

    pub(crate) fn set(&self, mode: TtdMode) {
        self.0.set(mode);
    }
}

/// Base mode plus a LIFO stack of overlays.
#[derive(Debug, Clone)]
pub struct ModeStack {
    stack: Vec<TtdMode>,
    computed: TtdMode,
}

impl Default for ModeStack {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeStack {
    pub fn new() -> Self {
        Self {
            stack: vec![TtdMode::DISABLED],
            computed: TtdMode::DISABLED,
        }
    }

    /// The bitwise union of the stack.
    pub fn computed(&self) -> TtdMode {
        self.computed
    }

    pub fn base(&self) -> TtdMode {
        self.stack[0]
    }

    pub fn depth(&self) -> usize {
        self.stack.len() - 1
    }

    /// Replace the base mode at index 0.
    pub fn set_global_mode(&mut self, mode: TtdMode) -> Result<(), FatalError> {
        if !mode.is_base() {
            return Err(FatalError::InvalidBaseMode(mode));
        }
        self.stack[0] = mode;
        self.recompute();
        Ok(())
    }

    /// Push an overlay. Only `EXCLUDED_EXECUTION` may be pushed.
    pub fn push_mode(&mut self, mode: TtdMode) -> Result<(), FatalError> {
        if mode != TtdMode::EXCLUDED_EXECUTION {
            return Err(FatalError::InvalidBaseMode(mode));
        }
        self.stack.push(mode);
        self.recompute();
        Ok(())
    }

    /// Pop an overlay; it must be the one on top and never the base.
    pub fn pop_mode(&mut self, mode: TtdMode) -> Result<(), FatalError> {
        if mode != TtdMode::EXCLUDED_EXECUTION
            || self.stack.len() < 2
            || self.stack.last() != Some(&mode)
        {
            return Err(FatalError::UnmatchedModePop { popped: mode });
        }
        self.stack.pop();
        self.recompute();
        Ok(())
    }

    fn recompute(&mut self) {
        self.computed = self
            .stack
            .iter()
            .fold(TtdMode::INVALID, |acc, m| acc | *m);
    }

    /// Record mode set and not inside excluded execution.
    pub fn should_perform_record_action(&self) -> bool {
        self.computed.contains(TtdMode::RECORD_ENABLED)
            && !self.computed.intersects(TtdMode::EXCLUDED_EXECUTION)
    }

    /// Debug mode set and not inside excluded execution.
    pub fn should_perform_debug_action(&self) -> bool {
        self.computed.contains(TtdMode::DEBUGGING_ENABLED)
            && !self.computed.intersects(TtdMode::EXCLUDED_EXECUTION)
    }

    pub fn is_ttd_active(&self) -> bool {
        self.computed.intersects(TtdMode::TTD_ACTIVE)
    }

    pub fn is_ttd_detached(&self) -> bool {
        self.computed.intersects(TtdMode::DETACHED)
    }
}
