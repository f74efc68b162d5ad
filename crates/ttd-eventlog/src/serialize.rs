//! Persisting the event log.
//!
//! The log stream is one record holding the chronological entry list and
//! the property table, written through a [`LogWriter`] in the configured
//! [`LogFormat`]. Checkpoint bodies are not part of the stream: each one is
//! written to its own file next to it and only its restore metadata is
//! inlined in the entry.

use crate::arena::Arena;
use crate::checkpoint::{CheckpointInfo, CheckpointKind};
use crate::config::{EventLogConfig, LogFormat};
use crate::entry::{ActionKind, EntryKind, EventLogEntry};
use crate::error::PersistError;
use crate::event_log::EventLog;
use crate::value::{
    narrow_u32, IdentityTag, LogTag, LogValue, PropertyAttributes, PropertyId, PropertyRecord,
};
use crate::writer::{reader_for, writer_for, LogReader, LogWriter};
use log::{debug, info};
use std::collections::BTreeMap;
use std::path::PathBuf;

impl EventLog {
    /// Write the log stream and any unpersisted checkpoint bodies to the log
    /// directory. Returns the path of the stream file.
    pub fn emit_log(&mut self) -> Result<PathBuf, PersistError> {
        std::fs::create_dir_all(&self.config.log_dir)?;

        let ids: Vec<_> = self.events.ids().collect();
        for id in ids {
            if let Some(info) = self.events.get_mut(id).kind.checkpoint_mut() {
                info.persist(&self.config.log_dir)?;
            }
        }

        let properties = self.property_table();
        let mut writer = writer_for(self.config.format);
        writer.begin_record("")?;
        writer.begin_sequence("events", self.events.len())?;
        for (_, entry) in self.events.iter() {
            emit_entry(entry, writer.as_mut(), &self.arena)?;
        }
        writer.end_sequence()?;
        writer.begin_sequence("properties", properties.len())?;
        for record in &properties {
            record.emit(writer.as_mut())?;
        }
        writer.end_sequence()?;
        writer.end_record()?;

        let path = self.config.log_file_path();
        std::fs::write(&path, writer.finish()?)?;
        info!(
            "emitted {} entries and {} property records to {}",
            self.events.len(),
            properties.len(),
            path.display()
        );
        Ok(path)
    }

    /// Load the log stream from the log directory into this (empty) log.
    /// Falls back to whichever format is present when the configured one is
    /// missing.
    pub fn parse_log_into(&mut self) -> Result<(), PersistError> {
        if !self.events.is_empty() {
            return Err(PersistError::malformed(format!(
                "cannot parse into a log that already holds {} entries",
                self.events.len()
            )));
        }
        if !self.config.log_file_path().is_file() {
            if let Some(found) = LogFormat::detect(&self.config.log_dir) {
                debug!("configured format missing, reading {found:?} log instead");
                self.config.format = found;
            }
        }

        let path = self.config.log_file_path();
        let bytes = std::fs::read(&path)?;
        let mut reader = reader_for(self.config.format, bytes)?;

        reader.begin_record("")?;
        let count = reader.begin_sequence("events")?;
        for _ in 0..count {
            let (time, kind) = parse_entry(reader.as_mut(), &mut self.arena)?;
            self.events
                .append(time, kind)
                .map_err(|e| PersistError::malformed(e.to_string()))?;
        }
        reader.end_sequence()?;
        let count = reader.begin_sequence("properties")?;
        let mut properties = Vec::new();
        for _ in 0..count {
            properties.push(PropertyRecord::parse(reader.as_mut())?);
        }
        reader.end_sequence()?;
        reader.end_record()?;

        self.property_records = properties;
        self.cursor = self.events.head();
        self.event_time = 0;
        info!(
            "parsed {} entries and {} property records from {}",
            self.events.len(),
            self.property_records.len(),
            path.display()
        );
        Ok(())
    }

    /// Parsed records overlaid with the pinned ones, in id order.
    fn property_table(&self) -> Vec<PropertyRecord> {
        let mut table: BTreeMap<PropertyId, PropertyRecord> = self
            .property_records
            .iter()
            .map(|r| (r.id, r.clone()))
            .collect();
        for record in self.pinned_property_records() {
            table.insert(record.id, record.clone());
        }
        table.into_values().collect()
    }
}

/// Open the log stored under `config.log_dir`.
pub fn load_event_log(config: EventLogConfig) -> Result<EventLog, PersistError> {
    let mut log = EventLog::new(config);
    log.parse_log_into()?;
    Ok(log)
}

// ═══════════════════════════════════════════════════════════════════════
//  Entries
// ═══════════════════════════════════════════════════════════════════════

fn emit_entry(
    entry: &EventLogEntry,
    writer: &mut dyn LogWriter,
    arena: &Arena,
) -> Result<(), PersistError> {
    writer.begin_record("")?;
    writer.write_u64("time", entry.time)?;
    writer.write_str("kind", entry.kind.name())?;
    match &entry.kind {
        EntryKind::Snapshot(info) => emit_checkpoint("checkpoint", info, writer)?,
        EntryKind::Double(v) => writer.write_f64("value", *v)?,
        EntryKind::UInt64(v) => writer.write_u64("value", *v)?,
        EntryKind::StringValue(s) => writer.write_str("value", arena.get_str(*s))?,
        EntryKind::PropertyEnumStep {
            return_code,
            pid,
            attributes,
            name,
        } => {
            writer.write_bool("returnCode", *return_code)?;
            writer.write_u64("pid", u64::from(pid.0))?;
            writer.write_u64("attributes", u64::from(attributes.0))?;
            emit_opt_str("name", name.map(|n| arena.get_str(n)), writer)?;
        }
        EntryKind::SymbolCreation(pid) => writer.write_u64("pid", u64::from(pid.0))?,
        EntryKind::ExternalCallBegin {
            root_depth,
            begin_time,
            function_name,
        } => {
            writer.write_i64("rootDepth", i64::from(*root_depth))?;
            writer.write_f64("beginTime", *begin_time)?;
            emit_opt_str("functionName", function_name.map(|n| arena.get_str(n)), writer)?;
        }
        EntryKind::ExternalCallEnd {
            root_depth,
            return_value,
            function_name,
        } => {
            writer.write_i64("rootDepth", i64::from(*root_depth))?;
            return_value.emit("returnValue", writer, arena)?;
            emit_opt_str("functionName", function_name.map(|n| arena.get_str(n)), writer)?;
        }
        EntryKind::Action { context, action } => {
            writer.write_u64("context", context.0)?;
            writer.write_str("action", action.name())?;
            emit_action(action, writer, arena)?;
        }
    }
    writer.end_record()
}

fn parse_entry(
    reader: &mut dyn LogReader,
    arena: &mut Arena,
) -> Result<(u64, EntryKind), PersistError> {
    reader.begin_record("")?;
    let time = reader.read_u64("time")?;
    let kind_name = reader.read_str("kind")?;
    let kind = match kind_name.as_str() {
        "snapshot" => EntryKind::Snapshot(parse_checkpoint("checkpoint", reader)?),
        "double" => EntryKind::Double(reader.read_f64("value")?),
        "uint64" => EntryKind::UInt64(reader.read_u64("value")?),
        "string" => {
            let s = reader.read_str("value")?;
            EntryKind::StringValue(arena.alloc_str(&s))
        }
        "propertyEnum" => {
            let return_code = reader.read_bool("returnCode")?;
            let pid = read_pid("pid", reader)?;
            let attributes = read_attributes("attributes", reader)?;
            let name = parse_opt_str("name", reader)?.map(|n| arena.alloc_str(&n));
            EntryKind::PropertyEnumStep {
                return_code,
                pid,
                attributes,
                name,
            }
        }
        "symbol" => EntryKind::SymbolCreation(read_pid("pid", reader)?),
        "externalCallBegin" => {
            let root_depth = read_i32("rootDepth", reader)?;
            let begin_time = reader.read_f64("beginTime")?;
            let function_name = parse_opt_str("functionName", reader)?.map(|n| arena.alloc_str(&n));
            EntryKind::ExternalCallBegin {
                root_depth,
                begin_time,
                function_name,
            }
        }
        "externalCallEnd" => {
            let root_depth = read_i32("rootDepth", reader)?;
            let return_value = LogValue::parse("returnValue", reader, arena)?;
            let function_name = parse_opt_str("functionName", reader)?.map(|n| arena.alloc_str(&n));
            EntryKind::ExternalCallEnd {
                root_depth,
                return_value,
                function_name,
            }
        }
        "action" => {
            let context = LogTag(reader.read_u64("context")?);
            let action_name = reader.read_str("action")?;
            let action = parse_action(&action_name, reader, arena)?;
            EntryKind::Action { context, action }
        }
        other => {
            return Err(PersistError::malformed(format!(
                "unknown entry kind '{other}' at time {time}"
            )))
        }
    };
    reader.end_record()?;
    Ok((time, kind))
}

fn emit_action(
    action: &ActionKind,
    writer: &mut dyn LogWriter,
    arena: &Arena,
) -> Result<(), PersistError> {
    match action {
        ActionKind::AllocateNumber { value } => value.emit("value", writer, arena),
        ActionKind::VarConvert {
            value,
            to_bool,
            to_number,
            to_string,
        } => {
            value.emit("value", writer, arena)?;
            writer.write_bool("toBool", *to_bool)?;
            writer.write_bool("toNumber", *to_number)?;
            writer.write_bool("toString", *to_string)
        }
        ActionKind::GetAndClearException => Ok(()),
        ActionKind::GetProperty { pid, value } => {
            writer.write_u64("pid", u64::from(pid.0))?;
            value.emit("value", writer, arena)
        }
        ActionKind::Callback {
            is_cancel,
            is_repeating,
            host_callback_id,
            function,
            created_callback_id,
        } => {
            writer.write_bool("isCancel", *is_cancel)?;
            writer.write_bool("isRepeating", *is_repeating)?;
            emit_opt_i64("hostCallbackId", *host_callback_id, writer)?;
            writer.write_u64("function", function.0)?;
            writer.write_i64("createdCallbackId", *created_callback_id)
        }
        ActionKind::CodeParse {
            is_expression,
            source,
            document_id,
            source_uri,
        } => {
            writer.write_bool("isExpression", *is_expression)?;
            writer.write_str("source", arena.get_str(*source))?;
            writer.write_u64("documentId", *document_id)?;
            writer.write_str("sourceUri", arena.get_str(*source_uri))
        }
        ActionKind::CallFunction {
            root_depth,
            host_callback_id,
            begin_time,
            function,
            args,
            elapsed_ms,
            ready_to_run,
            name,
        } => {
            writer.write_i64("rootDepth", i64::from(*root_depth))?;
            emit_opt_i64("hostCallbackId", *host_callback_id, writer)?;
            writer.write_f64("beginTime", *begin_time)?;
            writer.write_u64("function", function.0)?;
            let values = arena.get_values(*args);
            writer.begin_sequence("args", values.len())?;
            for value in values {
                value.emit("", writer, arena)?;
            }
            writer.end_sequence()?;
            writer.write_f64("elapsedMs", *elapsed_ms)?;
            match ready_to_run {
                Some(info) => emit_checkpoint("readyToRun", info, writer)?,
                None => writer.write_none("readyToRun")?,
            }
            emit_opt_str("name", name.map(|n| arena.get_str(n)), writer)
        }
    }
}

fn parse_action(
    action_name: &str,
    reader: &mut dyn LogReader,
    arena: &mut Arena,
) -> Result<ActionKind, PersistError> {
    Ok(match action_name {
        "allocateNumber" => ActionKind::AllocateNumber {
            value: LogValue::parse("value", reader, arena)?,
        },
        "varConvert" => ActionKind::VarConvert {
            value: LogValue::parse("value", reader, arena)?,
            to_bool: reader.read_bool("toBool")?,
            to_number: reader.read_bool("toNumber")?,
            to_string: reader.read_bool("toString")?,
        },
        "getAndClearException" => ActionKind::GetAndClearException,
        "getProperty" => ActionKind::GetProperty {
            pid: read_pid("pid", reader)?,
            value: LogValue::parse("value", reader, arena)?,
        },
        "callback" => ActionKind::Callback {
            is_cancel: reader.read_bool("isCancel")?,
            is_repeating: reader.read_bool("isRepeating")?,
            host_callback_id: parse_opt_i64("hostCallbackId", reader)?,
            function: LogTag(reader.read_u64("function")?),
            created_callback_id: reader.read_i64("createdCallbackId")?,
        },
        "codeParse" => {
            let is_expression = reader.read_bool("isExpression")?;
            let source = reader.read_str("source")?;
            let document_id = reader.read_u64("documentId")?;
            let source_uri = reader.read_str("sourceUri")?;
            ActionKind::CodeParse {
                is_expression,
                source: arena.alloc_str(&source),
                document_id,
                source_uri: arena.alloc_str(&source_uri),
            }
        }
        "callFunction" => {
            let root_depth = read_i32("rootDepth", reader)?;
            let host_callback_id = parse_opt_i64("hostCallbackId", reader)?;
            let begin_time = reader.read_f64("beginTime")?;
            let function = LogTag(reader.read_u64("function")?);
            let count = reader.begin_sequence("args")?;
            let mut values = Vec::new();
            for _ in 0..count {
                values.push(LogValue::parse("", reader, arena)?);
            }
            reader.end_sequence()?;
            let args = arena.alloc_values(&values);
            let elapsed_ms = reader.read_f64("elapsedMs")?;
            let ready_to_run = if reader.read_none("readyToRun")? {
                None
            } else {
                Some(parse_checkpoint("readyToRun", reader)?)
            };
            let name = parse_opt_str("name", reader)?.map(|n| arena.alloc_str(&n));
            ActionKind::CallFunction {
                root_depth,
                host_callback_id,
                begin_time,
                function,
                args,
                elapsed_ms,
                ready_to_run,
                name,
            }
        }
        other => {
            return Err(PersistError::malformed(format!(
                "unknown action kind '{other}'"
            )))
        }
    })
}

// ═══════════════════════════════════════════════════════════════════════
//  Field helpers
// ═══════════════════════════════════════════════════════════════════════

fn checkpoint_kind_name(kind: CheckpointKind) -> &'static str {
    match kind {
        CheckpointKind::Snapshot => "snapshot",
        CheckpointKind::ReadyToRun => "readyToRun",
    }
}

fn emit_checkpoint(
    key: &str,
    info: &CheckpointInfo,
    writer: &mut dyn LogWriter,
) -> Result<(), PersistError> {
    writer.begin_record(key)?;
    writer.write_str("kind", checkpoint_kind_name(info.kind))?;
    writer.write_u64("restoreEventTime", info.restore_event_time)?;
    writer.write_u64("logTag", info.log_tag.0)?;
    writer.write_u64("identityTag", info.identity_tag.0)?;
    writer.end_record()
}

/// Checkpoint metadata. The body stays on disk until first inflated.
fn parse_checkpoint(key: &str, reader: &mut dyn LogReader) -> Result<CheckpointInfo, PersistError> {
    reader.begin_record(key)?;
    let kind = match reader.read_str("kind")?.as_str() {
        "snapshot" => CheckpointKind::Snapshot,
        "readyToRun" => CheckpointKind::ReadyToRun,
        other => {
            return Err(PersistError::malformed(format!(
                "unknown checkpoint kind '{other}'"
            )))
        }
    };
    let restore_event_time = reader.read_u64("restoreEventTime")?;
    let log_tag = LogTag(reader.read_u64("logTag")?);
    let identity_tag = IdentityTag(reader.read_u64("identityTag")?);
    reader.end_record()?;
    Ok(CheckpointInfo::persisted(
        kind,
        restore_event_time,
        log_tag,
        identity_tag,
    ))
}

fn emit_opt_str(key: &str, value: Option<&str>, writer: &mut dyn LogWriter) -> Result<(), PersistError> {
    match value {
        Some(s) => writer.write_str(key, s),
        None => writer.write_none(key),
    }
}

fn parse_opt_str(key: &str, reader: &mut dyn LogReader) -> Result<Option<String>, PersistError> {
    if reader.read_none(key)? {
        Ok(None)
    } else {
        reader.read_str(key).map(Some)
    }
}

fn emit_opt_i64(key: &str, value: Option<i64>, writer: &mut dyn LogWriter) -> Result<(), PersistError> {
    match value {
        Some(v) => writer.write_i64(key, v),
        None => writer.write_none(key),
    }
}

fn parse_opt_i64(key: &str, reader: &mut dyn LogReader) -> Result<Option<i64>, PersistError> {
    if reader.read_none(key)? {
        Ok(None)
    } else {
        reader.read_i64(key).map(Some)
    }
}

fn read_pid(key: &str, reader: &mut dyn LogReader) -> Result<PropertyId, PersistError> {
    Ok(PropertyId(narrow_u32(reader.read_u64(key)?)?))
}

fn read_attributes(key: &str, reader: &mut dyn LogReader) -> Result<PropertyAttributes, PersistError> {
    let raw = reader.read_u64(key)?;
    u8::try_from(raw)
        .map(PropertyAttributes)
        .map_err(|_| PersistError::malformed(format!("'{key}': attributes {raw:#x} out of range")))
}

fn read_i32(key: &str, reader: &mut dyn LogReader) -> Result<i32, PersistError> {
    let raw = reader.read_i64(key)?;
    i32::try_from(raw).map_err(|_| PersistError::malformed(format!("'{key}': {raw} out of range")))
}
