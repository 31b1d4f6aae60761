// Copyright 2025 Google LLC
// SPDX-License-Identifier: MIT

use anyhow::{Result, anyhow};
use serde_json::json;
use std::{borrow::Cow, io::Write, str};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Error => log::LevelFilter::Error,
        }
    }
}

impl str::FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(anyhow!("unrecognized log level {s:?}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Logfmt,
    Json,
}

impl str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "logfmt" => Ok(LogFormat::Logfmt),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow!("unrecognized log format {s:?}")),
        }
    }
}

fn level_str(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "error",
        log::Level::Warn => "warn",
        log::Level::Info => "info",
        log::Level::Debug => "debug",
        log::Level::Trace => "trace",
    }
}

fn logfmt_value(val: &str) -> Cow<'_, str> {
    let needs_quote = val.is_empty()
        || val
            .chars()
            .any(|c| c == ' ' || c == '=' || c == '"' || c == '\\' || c.is_control());
    if !needs_quote {
        return Cow::Borrowed(val);
    }

    let mut quoted = String::with_capacity(val.len() + 2);
    quoted.push('"');
    for c in val.chars() {
        match c {
            '"' => quoted.push_str("\\\""),
            '\\' => quoted.push_str("\\\\"),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            _ => quoted.push(c),
        }
    }
    quoted.push('"');

    Cow::Owned(quoted)
}

fn format_logfmt(ts: &str, record: &log::Record) -> String {
    let msg = record.args().to_string();
    format!(
        "ts={} level={} target={} msg={}",
        ts,
        level_str(record.level()),
        logfmt_value(record.target()),
        logfmt_value(&msg)
    )
}

fn format_json(ts: &str, record: &log::Record) -> String {
    json!({
        "ts": ts,
        "level": level_str(record.level()),
        "target": record.target(),
        "msg": record.args().to_string(),
    })
    .to_string()
}

/// Installs the global logger for this crate's log records.
///
/// Installing over an existing logger is not an error; the existing one
/// stays in place.
pub fn init(level: &str, format: &str) -> Result<()> {
    let level: LogLevel = level.parse()?;
    let format: LogFormat = format.parse()?;
    let module = env!("CARGO_CRATE_NAME");

    let res = env_logger::Builder::from_default_env()
        .filter_module(module, level.filter())
        .format(move |buf, record| {
            let ts = buf.timestamp_millis().to_string();
            let line = match format {
                LogFormat::Logfmt => format_logfmt(&ts, record),
                LogFormat::Json => format_json(&ts, record),
            };
            writeln!(buf, "{line}")
        })
        .try_init();
    if res.is_err() {
        log::debug!("logger already initialized");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with<F: FnOnce(&log::Record) -> String>(level: log::Level, msg: &str, f: F) -> String {
        f(&log::Record::builder()
            .level(level)
            .target("node_exporter_launcher::server")
            .args(format_args!("{msg}"))
            .build())
    }

    #[test]
    fn parse_levels_and_formats() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("error".parse::<LogLevel>().unwrap(), LogLevel::Error);
        assert!("verbose".parse::<LogLevel>().is_err());
        assert!("INFO".parse::<LogLevel>().is_err());

        assert_eq!("logfmt".parse::<LogFormat>().unwrap(), LogFormat::Logfmt);
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert!("text".parse::<LogFormat>().is_err());
    }

    #[test]
    fn logfmt_quoting() {
        assert_eq!(logfmt_value("plain"), "plain");
        assert_eq!(logfmt_value(""), "\"\"");
        assert_eq!(logfmt_value("two words"), "\"two words\"");
        assert_eq!(logfmt_value("a=\"b\""), "\"a=\\\"b\\\"\"");
        assert_eq!(logfmt_value("line\nbreak"), "\"line\\nbreak\"");
    }

    #[test]
    fn logfmt_line() {
        let line = record_with(log::Level::Warn, "listening on 0.0.0.0:9100", |record| {
            format_logfmt("2025-01-01T00:00:00.000Z", record)
        });
        assert_eq!(
            line,
            "ts=2025-01-01T00:00:00.000Z level=warn target=node_exporter_launcher::server \
             msg=\"listening on 0.0.0.0:9100\""
        );
    }

    #[test]
    fn json_line() {
        let line = record_with(log::Level::Info, "say \"hi\"", |record| {
            format_json("2025-01-01T00:00:00.000Z", record)
        });
        let val: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(val["level"], "info");
        assert_eq!(val["msg"], "say \"hi\"");
        assert_eq!(val["ts"], "2025-01-01T00:00:00.000Z");
    }

    #[test]
    fn init_rejects_bad_values() {
        assert!(init("loud", "logfmt").is_err());
        assert!(init("info", "xml").is_err());
        assert!(init("info", "logfmt").is_ok());
        assert!(init("debug", "json").is_ok());
    }
}
