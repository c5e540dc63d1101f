//! Logging setup on top of flexi_logger
//!
//! The logger is started once per process and its handle kept until exit so
//! file output is flushed. Format, colour and file output are fixed at start.

use colored::Colorize;
use flexi_logger::DeferredNow;
use log::{Level, Record};
use std::io::Write;
use std::sync::OnceLock;

static LOGGER_HANDLE: OnceLock<flexi_logger::LoggerHandle> = OnceLock::new();

/// Log output formats accepted on the command line and in the config file
pub const LOG_FORMATS: [&str; 3] = ["text", "ext", "json"];

/// Log levels accepted on the command line and in the config file
pub const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

const TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub fn init_logging(
    log_level: Option<&str>,
    log_format: Option<&str>,
    log_file: Option<&str>,
    color_enabled: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    use flexi_logger::{FileSpec, Logger};

    let mut logger = Logger::try_with_str(log_level.unwrap_or("info"))?;
    logger = match (log_format.unwrap_or("text"), color_enabled) {
        ("json", _) => logger.format(json_format),
        ("ext", true) => logger.format(extended_color_format),
        ("ext", false) => logger.format(extended_format),
        (_, true) => logger.format(simple_color_format),
        (_, false) => logger.format(simple_format),
    };

    if let Some(file_path) = log_file {
        let file_spec = FileSpec::try_from(std::path::Path::new(file_path))?;
        logger = logger.log_to_file(file_spec);
    }

    let handle = logger.start()?;
    if LOGGER_HANDLE.set(handle).is_err() {
        return Err("logging was already initialised".into());
    }
    Ok(())
}

fn level_abbr(level: Level) -> &'static str {
    match level {
        Level::Error => "ERR",
        Level::Warn => "WRN",
        Level::Info => "INF",
        Level::Debug => "DBG",
        Level::Trace => "TRC",
    }
}

fn colored_level(level: Level) -> colored::ColoredString {
    let abbr = level_abbr(level);
    match level {
        Level::Error => abbr.red().bold(),
        Level::Warn => abbr.yellow(),
        Level::Info => abbr.green(),
        Level::Debug => abbr.blue(),
        Level::Trace => abbr.magenta(),
    }
}

/// Shared body of the text formats, with optional location and colour
fn write_line(
    w: &mut dyn Write,
    now: &mut DeferredNow,
    record: &Record,
    with_location: bool,
    color: bool,
) -> Result<(), std::io::Error> {
    let timestamp = now.format(TIMESTAMP).to_string();
    if color {
        write!(w, "{} {} {}", timestamp.dimmed(), colored_level(record.level()), record.args())?;
    } else {
        write!(w, "{} {} {}", timestamp, level_abbr(record.level()), record.args())?;
    }
    if with_location {
        let location = format_target_as_path(record.target(), record.line());
        if color {
            write!(w, " ({})", location.dimmed())?;
        } else {
            write!(w, " ({})", location)?;
        }
    }
    Ok(())
}

// "2025-01-01 12:00:00.000 INF Produced 10000 messages"
fn simple_format(w: &mut dyn Write, now: &mut DeferredNow, record: &Record) -> Result<(), std::io::Error> {
    write_line(w, now, record, false, false)
}

fn simple_color_format(
    w: &mut dyn Write,
    now: &mut DeferredNow,
    record: &Record,
) -> Result<(), std::io::Error> {
    write_line(w, now, record, false, true)
}

// Same as text, followed by "(producer/service.rs:42)"
fn extended_format(w: &mut dyn Write, now: &mut DeferredNow, record: &Record) -> Result<(), std::io::Error> {
    write_line(w, now, record, true, false)
}

fn extended_color_format(
    w: &mut dyn Write,
    now: &mut DeferredNow,
    record: &Record,
) -> Result<(), std::io::Error> {
    write_line(w, now, record, true, true)
}

fn json_format(w: &mut dyn Write, now: &mut DeferredNow, record: &Record) -> Result<(), std::io::Error> {
    let line = serde_json::json!({
        "timestamp": now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        "level": level_abbr(record.level()),
        "message": record.args().to_string(),
        "target": format_target_as_path(record.target(), record.line()),
    });
    match serde_json::to_string(&line) {
        Ok(json) => w.write_all(json.as_bytes()),
        Err(_) => w.write_all(b"{\"error\":\"unserialisable log record\"}"),
    }
}

// streamload::producer::service -> producer/service.rs
fn format_target_as_path(target: &str, line: Option<u32>) -> String {
    let path = match target.strip_prefix("streamload::") {
        Some(module) => module.replace("::", "/") + ".rs",
        None => target.replace("::", "/"),
    };
    match line {
        Some(line) => format!("{}:{}", path, line),
        None => path,
    }
}
