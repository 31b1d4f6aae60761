// Copyright 2025 Google LLC
// SPDX-License-Identifier: MIT

use clap::{Arg, ArgAction, Command, value_parser};
use std::path;

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_LOG_FORMAT: &str = "logfmt";
pub const DEFAULT_LISTEN_PORT: i32 = 9100;
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_EXPORTER_PATH: &str = "/";
pub const DEFAULT_MAX_REQUESTS: i32 = 40;
pub const DEFAULT_PROCFS_PATH: &str = "/proc";
pub const DEFAULT_SYSFS_PATH: &str = "/sys";
pub const DEFAULT_ROOTFS_PATH: &str = "/";

/// Exporter settings.
///
/// Empty strings and non-positive numbers mean "use the default"; see
/// [`Config::apply_defaults`].
#[derive(Clone, Debug, Default)]
pub struct Config {
    /// One of `debug`, `info`, `warn` or `error`.
    pub log_level: String,
    /// Either `logfmt` or `json`.
    pub log_format: String,
    /// TCP port to listen on.
    pub listen_port: i32,
    /// Path under which metrics are exposed.
    pub metrics_path: String,
    /// Path of the landing page.
    pub exporter_path: String,
    /// Exclude the process and promhttp metrics of the exporter itself.
    pub disable_exporter_metrics: bool,
    /// Maximum number of concurrent scrapes.
    pub max_requests: i32,
    /// Start from an empty collector set instead of the default one.
    pub disable_default_collectors: bool,
    /// Collectors to enable on top of the default set.
    pub enable_collectors: Vec<String>,
    /// Collectors to disable.
    pub disable_collectors: Vec<String>,
    /// Path to a web configuration file enabling TLS or basic auth.
    pub config_file: String,
    /// procfs mount point.
    pub procfs_path: path::PathBuf,
    /// sysfs mount point.
    pub sysfs_path: path::PathBuf,
    /// Where the host root filesystem is mounted, for filesystem stats.
    pub rootfs_path: path::PathBuf,
}

impl Config {
    /// Fills in every unset field.
    pub fn apply_defaults(&mut self) {
        if self.log_level.is_empty() {
            self.log_level = DEFAULT_LOG_LEVEL.to_string();
        }
        if self.log_format.is_empty() {
            self.log_format = DEFAULT_LOG_FORMAT.to_string();
        }
        if self.listen_port <= 0 {
            self.listen_port = DEFAULT_LISTEN_PORT;
        }
        if self.metrics_path.is_empty() {
            self.metrics_path = DEFAULT_METRICS_PATH.to_string();
        }
        if self.exporter_path.is_empty() {
            self.exporter_path = DEFAULT_EXPORTER_PATH.to_string();
        }
        if self.max_requests <= 0 {
            self.max_requests = DEFAULT_MAX_REQUESTS;
        }
        if self.procfs_path.as_os_str().is_empty() {
            self.procfs_path = path::PathBuf::from(DEFAULT_PROCFS_PATH);
        }
        if self.sysfs_path.as_os_str().is_empty() {
            self.sysfs_path = path::PathBuf::from(DEFAULT_SYSFS_PATH);
        }
        if self.rootfs_path.as_os_str().is_empty() {
            self.rootfs_path = path::PathBuf::from(DEFAULT_ROOTFS_PATH);
        }
    }
}

fn command() -> Command {
    Command::new("node-exporter-launcher")
        .version(env!("CARGO_PKG_VERSION"))
        .arg(
            Arg::new("log_level")
                .long("log.level")
                .default_value(DEFAULT_LOG_LEVEL),
        )
        .arg(
            Arg::new("log_format")
                .long("log.format")
                .default_value(DEFAULT_LOG_FORMAT),
        )
        .arg(
            Arg::new("port")
                .long("web.listen-port")
                .value_parser(value_parser!(i32))
                .default_value("9100"),
        )
        .arg(
            Arg::new("metrics_path")
                .long("web.telemetry-path")
                .default_value(DEFAULT_METRICS_PATH),
        )
        .arg(
            Arg::new("exporter_path")
                .long("web.exporter-path")
                .default_value(DEFAULT_EXPORTER_PATH),
        )
        .arg(
            Arg::new("disable_exporter_metrics")
                .long("web.disable-exporter-metrics")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("max_requests")
                .long("web.max-requests")
                .value_parser(value_parser!(i32))
                .default_value("40"),
        )
        .arg(
            Arg::new("config_file")
                .long("web.config.file")
                .default_value(""),
        )
        .arg(
            Arg::new("disable_defaults")
                .long("collector.disable-defaults")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("enable")
                .long("collector.enable")
                .value_name("NAME")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("disable")
                .long("collector.disable")
                .value_name("NAME")
                .action(ArgAction::Append),
        )
        .arg(
            Arg::new("procfs")
                .long("path.procfs")
                .default_value(DEFAULT_PROCFS_PATH),
        )
        .arg(
            Arg::new("sysfs")
                .long("path.sysfs")
                .default_value(DEFAULT_SYSFS_PATH),
        )
        .arg(
            Arg::new("rootfs")
                .long("path.rootfs")
                .default_value(DEFAULT_ROOTFS_PATH),
        )
}

fn from_matches(matches: &clap::ArgMatches) -> Config {
    let string = |id: &str| {
        matches
            .get_one::<String>(id)
            .cloned()
            .unwrap_or_default()
    };
    let strings = |id: &str| -> Vec<String> {
        matches
            .get_many::<String>(id)
            .map(|vals| vals.cloned().collect())
            .unwrap_or_default()
    };

    Config {
        log_level: string("log_level"),
        log_format: string("log_format"),
        listen_port: matches.get_one::<i32>("port").copied().unwrap_or(0),
        metrics_path: string("metrics_path"),
        exporter_path: string("exporter_path"),
        disable_exporter_metrics: matches.get_flag("disable_exporter_metrics"),
        max_requests: matches.get_one::<i32>("max_requests").copied().unwrap_or(0),
        disable_default_collectors: matches.get_flag("disable_defaults"),
        enable_collectors: strings("enable"),
        disable_collectors: strings("disable"),
        config_file: string("config_file"),
        procfs_path: path::PathBuf::from(string("procfs")),
        sysfs_path: path::PathBuf::from(string("sysfs")),
        rootfs_path: path::PathBuf::from(string("rootfs")),
    }
}

/// Parses the process command line.
pub fn parse_args() -> Config {
    from_matches(&command().get_matches())
}
