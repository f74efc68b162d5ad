//! TTD event log CLI: inspect and convert persisted logs

use clap::{Parser, Subcommand};
use log::info;
use snafu::Snafu;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use ttd_eventlog::arena::Arena;
use ttd_eventlog::entry::{ActionKind, EntryKind, EventLogEntry};
use ttd_eventlog::{load_event_log, EventFilter, EventLog, EventLogConfig, LogFormat, PersistError};

/// CLI errors for the event log binary.
#[derive(Debug, Snafu)]
enum CliError {
    #[snafu(display("Log error: {source}"), context(false))]
    Persist { source: PersistError },
    #[snafu(display("{message}"))]
    Other { message: String },
}

#[derive(Parser)]
#[command(name = "ttd-eventlog")]
#[command(about = "Inspect and convert time-travel debugging event logs")]
#[command(version)]
struct Cli {
    /// Log directory (overrides the config file)
    #[arg(short, long, global = true)]
    log_dir: Option<PathBuf>,

    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show log summary
    Info,

    /// List entries from the log
    Events {
        /// Filter entries by kind
        #[arg(short, long, value_enum, default_value = "all")]
        filter: EntryFilterType,

        /// Start event time (inclusive)
        #[arg(long)]
        from: Option<u64>,

        /// End event time (inclusive)
        #[arg(long)]
        to: Option<u64>,
    },

    /// List the property table
    Properties,

    /// Rewrite the log stream in another encoding
    Convert {
        /// Target encoding
        #[arg(short, long, value_enum)]
        to: FormatArg,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum EntryFilterType {
    All,
    Checkpoints,
    Actions,
    TopLevel,
    External,
    PropertyEnum,
    Values,
}

impl EntryFilterType {
    fn to_filter(self) -> Option<EventFilter> {
        match self {
            EntryFilterType::All => None,
            EntryFilterType::Checkpoints => Some(EventFilter::Checkpoint),
            EntryFilterType::Actions => Some(EventFilter::AnyAction),
            EntryFilterType::TopLevel => Some(EventFilter::TopLevelCall),
            EntryFilterType::External => Some(EventFilter::ExternalCall),
            EntryFilterType::PropertyEnum => Some(EventFilter::PropertyEnum),
            EntryFilterType::Values => Some(EventFilter::Value),
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum FormatArg {
    Json,
    Binary,
}

impl From<FormatArg> for LogFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Json => LogFormat::Json,
            FormatArg::Binary => LogFormat::Binary,
        }
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = resolve_config(cli.config.as_deref(), cli.log_dir).and_then(|config| {
        match cli.command {
            Commands::Info => cmd_info(config),
            Commands::Events { filter, from, to } => cmd_events(config, filter, from, to),
            Commands::Properties => cmd_properties(config),
            Commands::Convert { to } => cmd_convert(config, to.into()),
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn resolve_config(path: Option<&Path>, log_dir: Option<PathBuf>) -> Result<EventLogConfig, CliError> {
    let mut config = match path {
        Some(path) => EventLogConfig::load(path)?,
        None => EventLogConfig::default(),
    };
    if let Some(dir) = log_dir {
        config.log_dir = dir;
    }
    if LogFormat::detect(&config.log_dir).is_none() {
        return OtherSnafu {
            message: format!("no event log found in {}", config.log_dir.display()),
        }
        .fail();
    }
    Ok(config)
}

fn cmd_info(config: EventLogConfig) -> Result<(), CliError> {
    let log = load_event_log(config)?;
    let events = log.events();

    println!("=== Event Log Info ===");
    println!("Directory: {}", log.config().log_dir.display());
    println!("Format: {:?}", log.config().format);
    println!("Entries: {}", events.len());
    if let (Some(head), Some(tail)) = (events.head(), events.tail()) {
        println!(
            "Event times: {}-{}",
            events.get(head).time,
            events.get(tail).time
        );
    }

    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for (_, entry) in events.iter() {
        *counts.entry(kind_label(&entry.kind)).or_default() += 1;
    }
    println!("\n=== Entry Summary ===");
    for (kind, count) in &counts {
        println!("{:<28} {}", kind, count);
    }

    println!("\n=== Checkpoints ===");
    let mut any = false;
    for (_, entry) in events.iter() {
        if let Some(info) = entry.kind.checkpoint() {
            any = true;
            println!(
                "  [{:>8}] {:?} restore at {} ({})",
                entry.time,
                info.kind,
                info.restore_event_time,
                info.file_name()
            );
        }
    }
    if !any {
        println!("  (none)");
    }

    let records = log.property_records();
    println!("\n=== Properties ===");
    match (records.first(), records.last()) {
        (Some(first), Some(last)) => println!(
            "{} records, ids {}-{}",
            records.len(),
            first.id.0,
            last.id.0
        ),
        _ => println!("(none)"),
    }

    Ok(())
}

fn cmd_events(
    config: EventLogConfig,
    filter: EntryFilterType,
    from: Option<u64>,
    to: Option<u64>,
) -> Result<(), CliError> {
    let log = load_event_log(config)?;

    let from_time = from.unwrap_or(0);
    let to_time = to.unwrap_or(u64::MAX);
    let wanted = filter.to_filter();

    println!(
        "Entries (filter: {:?}, times: {}-{}):",
        filter, from_time, to_time
    );
    println!();

    for (_, entry) in log.events().iter() {
        if entry.time < from_time || entry.time > to_time {
            continue;
        }
        if wanted.is_some_and(|f| !f.matches(entry)) {
            continue;
        }
        println!("[{:>8}] {}", entry.time, format_entry(entry, log.arena()));
    }

    Ok(())
}

fn cmd_properties(config: EventLogConfig) -> Result<(), CliError> {
    let log = load_event_log(config)?;

    for record in log.property_records() {
        let mut flags = Vec::new();
        if record.is_numeric {
            flags.push("numeric");
        }
        if record.is_bound {
            flags.push("bound");
        }
        if record.is_symbol {
            flags.push("symbol");
        }
        println!("{:>6}  {:<24} {}", record.id.0, record.name, flags.join(","));
    }

    Ok(())
}

fn cmd_convert(config: EventLogConfig, to: LogFormat) -> Result<(), CliError> {
    let mut log: EventLog = load_event_log(config)?;
    if log.config().format == to {
        return OtherSnafu {
            message: format!("log is already stored as {:?}", to),
        }
        .fail();
    }

    log.set_log_format(to);
    let path = log.emit_log()?;
    info!("converted {} entries", log.events().len());
    println!("Wrote {}", path.display());

    Ok(())
}

// Helper functions

fn kind_label(kind: &EntryKind) -> String {
    match kind {
        EntryKind::Action { action, .. } => format!("action/{}", action.name()),
        other => other.name().to_string(),
    }
}

fn format_entry(entry: &EventLogEntry, arena: &Arena) -> String {
    match &entry.kind {
        EntryKind::Snapshot(info) => format!("checkpoint ({})", info.file_name()),
        EntryKind::Double(v) => format!("double {}", v),
        EntryKind::UInt64(v) => format!("uint64 {}", v),
        EntryKind::StringValue(s) => format!("string {:?}", arena.get_str(*s)),
        EntryKind::PropertyEnumStep {
            return_code,
            pid,
            name,
            ..
        } => {
            if !*return_code {
                return "property enum: done".to_string();
            }
            match name {
                Some(name) => format!("property enum: {} {:?}", pid.0, arena.get_str(*name)),
                None => format!("property enum: {}", pid.0),
            }
        }
        EntryKind::SymbolCreation(pid) => format!("symbol {}", pid.0),
        EntryKind::ExternalCallBegin {
            root_depth,
            function_name,
            ..
        } => format!(
            "external call {} (depth {})",
            function_name.map_or("?", |n| arena.get_str(n)),
            root_depth
        ),
        EntryKind::ExternalCallEnd {
            root_depth,
            return_value,
            ..
        } => format!(
            "external return {:?} (depth {})",
            return_value.inflate(arena),
            root_depth
        ),
        EntryKind::Action { context, action } => format_action(context.0, action, arena),
    }
}

fn format_action(context: u64, action: &ActionKind, arena: &Arena) -> String {
    let detail = match action {
        ActionKind::CallFunction {
            root_depth,
            function,
            args,
            elapsed_ms,
            ready_to_run,
            name,
            ..
        } => format!(
            "{} fn#{} args={} depth={} {:.1}ms{}",
            name.map_or("?", |n| arena.get_str(n)),
            function.0,
            arena.get_values(*args).len(),
            root_depth,
            elapsed_ms,
            if ready_to_run.is_some() { " +rtr" } else { "" }
        ),
        ActionKind::Callback {
            is_cancel,
            created_callback_id,
            ..
        } => format!(
            "{} id={}",
            if *is_cancel { "cancel" } else { "register" },
            created_callback_id
        ),
        ActionKind::CodeParse { source_uri, .. } => arena.get_str(*source_uri).to_string(),
        ActionKind::GetProperty { pid, .. } => format!("pid {}", pid.0),
        ActionKind::AllocateNumber { value } | ActionKind::VarConvert { value, .. } => {
            format!("{:?}", value.inflate(arena))
        }
        ActionKind::GetAndClearException => String::new(),
    };
    format!("ctx {} {} {}", context, action.name(), detail)
        .trim_end()
        .to_string()
}
