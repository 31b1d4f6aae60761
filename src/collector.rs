// Copyright 2025 Google LLC
// SPDX-License-Identifier: MIT

mod cpu;
mod diskstats;
mod filesystem;
mod loadavg;
mod meminfo;
mod netdev;
mod stat;
mod thermal_zone;
mod time;
mod uname;

use crate::{config, metric};
use anyhow::{Context, Result, anyhow};
use log::{debug, info};
use std::{fs, io, path, sync, time as stdtime};

pub const NAMESPACE: &str = "node";

/// A source of one category of host metrics.
pub trait Collector: Send + Sync {
    fn update(&self, enc: &mut metric::Encoder) -> Result<()>;
}

/// Mount points of the filesystems the collectors read from.
pub struct Paths {
    procfs: path::PathBuf,
    sysfs: path::PathBuf,
    rootfs: path::PathBuf,
}

impl Paths {
    pub fn new(procfs: impl Into<path::PathBuf>, sysfs: impl Into<path::PathBuf>) -> Self {
        Paths {
            procfs: procfs.into(),
            sysfs: sysfs.into(),
            rootfs: path::PathBuf::from(config::DEFAULT_ROOTFS_PATH),
        }
    }

    pub fn with_rootfs(mut self, rootfs: impl Into<path::PathBuf>) -> Self {
        self.rootfs = rootfs.into();
        self
    }

    /// Maps a host mount point to its location under the rootfs prefix.
    fn rootfs_path(&self, mount_point: &str) -> path::PathBuf {
        self.rootfs.join(mount_point.trim_start_matches('/'))
    }

    pub fn procfs_open(&self, file: &str) -> Result<io::BufReader<fs::File>> {
        let path = self.procfs.join(file);
        let fp = fs::File::open(&path).with_context(|| format!("failed to open {:?}", path))?;
        Ok(io::BufReader::new(fp))
    }

    pub fn procfs_read_dir(&self, dir: &str) -> Result<fs::ReadDir> {
        let path = self.procfs.join(dir);
        fs::read_dir(&path).with_context(|| format!("failed to open {:?}", path))
    }

    fn sysfs_read_dir(&self, dir: &str) -> Result<fs::ReadDir> {
        let path = self.sysfs.join(dir);
        fs::read_dir(&path).with_context(|| format!("failed to open {:?}", path))
    }
}

fn read_string(path: impl AsRef<path::Path>) -> Result<String> {
    let mut s =
        fs::read_to_string(&path).with_context(|| format!("failed to read {:?}", path.as_ref()))?;
    s.truncate(s.trim_end().len());
    Ok(s)
}

fn read_i64(path: impl AsRef<path::Path>) -> Result<i64> {
    let s = read_string(&path)?;
    s.parse::<i64>()
        .with_context(|| format!("failed to parse {:?}", path.as_ref()))
}

/// Returns the system boot time in seconds since the epoch.
pub fn boot_time(paths: &Paths) -> Result<u64> {
    let reader = paths.procfs_open("stat")?;
    let stat = stat::parse_kernel_stat(reader)?;
    Ok(stat.boot_time)
}

struct Factory {
    name: &'static str,
    default_enabled: bool,
    new: fn(sync::Arc<Paths>) -> Result<Box<dyn Collector>>,
}

const FACTORIES: &[Factory] = &[
    Factory {
        name: "cpu",
        default_enabled: true,
        new: cpu::new,
    },
    Factory {
        name: "diskstats",
        default_enabled: true,
        new: diskstats::new,
    },
    Factory {
        name: "filesystem",
        default_enabled: true,
        new: filesystem::new,
    },
    Factory {
        name: "loadavg",
        default_enabled: true,
        new: loadavg::new,
    },
    Factory {
        name: "meminfo",
        default_enabled: true,
        new: meminfo::new,
    },
    Factory {
        name: "netdev",
        default_enabled: true,
        new: netdev::new,
    },
    Factory {
        name: "stat",
        default_enabled: true,
        new: stat::new,
    },
    Factory {
        name: "thermal_zone",
        default_enabled: true,
        new: thermal_zone::new,
    },
    Factory {
        name: "time",
        default_enabled: true,
        new: time::new,
    },
    Factory {
        name: "uname",
        default_enabled: true,
        new: uname::new,
    },
];

/// Resolves the enabled collector set, in registry order.
fn select(config: &config::Config) -> Result<Vec<&'static Factory>> {
    let mut enabled: Vec<bool> = FACTORIES
        .iter()
        .map(|factory| factory.default_enabled && !config.disable_default_collectors)
        .collect();

    for (names, val) in [
        (&config.enable_collectors, true),
        (&config.disable_collectors, false),
    ] {
        for name in names {
            let idx = FACTORIES
                .iter()
                .position(|factory| factory.name == name.as_str())
                .ok_or_else(|| anyhow!("unknown collector {name:?}"))?;
            enabled[idx] = val;
        }
    }

    Ok(FACTORIES
        .iter()
        .zip(enabled)
        .filter_map(|(factory, enabled)| enabled.then_some(factory))
        .collect())
}

struct ScrapeMetrics {
    duration: metric::Info<1>,
    success: metric::Info<1>,
}

impl ScrapeMetrics {
    fn new() -> Self {
        ScrapeMetrics {
            duration: metric::Info {
                subsys: "scrape",
                name: "collector_duration",
                help: "Duration of a collector scrape.",
                unit: metric::Unit::Seconds,
                ty: metric::Type::Gauge,
                label_keys: ["collector"],
            },
            success: metric::Info {
                subsys: "scrape",
                name: "collector_success",
                help: "Whether a collector succeeded.",
                unit: metric::Unit::None,
                ty: metric::Type::Gauge,
                label_keys: ["collector"],
            },
        }
    }
}

fn log_update_error(name: &str, err: &anyhow::Error) {
    let mut level = log::Level::Error;
    if let Some(err) = err.downcast_ref::<io::Error>() {
        if matches!(
            err.kind(),
            io::ErrorKind::NotFound | io::ErrorKind::PermissionDenied
        ) {
            level = log::Level::Debug;
        }
    }

    log::log!(level, "collector {name} failed: {err:?}");
}

/// The set of enabled collectors.
pub struct NodeCollector {
    collectors: Vec<(&'static str, Box<dyn Collector>)>,
    metrics: ScrapeMetrics,
}

impl NodeCollector {
    pub fn new(config: &config::Config) -> Result<Self> {
        let paths = sync::Arc::new(
            Paths::new(&config.procfs_path, &config.sysfs_path).with_rootfs(&config.rootfs_path),
        );

        let mut collectors = Vec::new();
        for factory in select(config)? {
            let collector = (factory.new)(paths.clone())
                .with_context(|| format!("failed to create collector {}", factory.name))?;
            collectors.push((factory.name, collector));
        }

        let names: Vec<&str> = collectors.iter().map(|(name, _)| *name).collect();
        info!("enabled collectors: {}", names.join(","));

        Ok(NodeCollector {
            collectors,
            metrics: ScrapeMetrics::new(),
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.collectors.iter().map(|(name, _)| *name)
    }

    /// Applies the `collect[]` and `exclude[]` parameters of a scrape
    /// query to the enabled set.
    pub fn filter(&self, query: Option<&str>) -> Result<Vec<&'static str>> {
        let mut collect = Vec::new();
        let mut exclude = Vec::new();
        if let Some(query) = query {
            for (key, val) in url::form_urlencoded::parse(query.as_bytes()) {
                match key.as_ref() {
                    "collect[]" => collect.push(val.into_owned()),
                    "exclude[]" => exclude.push(val.into_owned()),
                    _ => (),
                }
            }
        }

        if !collect.is_empty() && !exclude.is_empty() {
            return Err(anyhow!("cannot use both collect[] and exclude[]"));
        }

        for name in collect.iter().chain(&exclude) {
            if !self.names().any(|enabled| enabled == name.as_str()) {
                return Err(anyhow!("missing collector: {name}"));
            }
        }

        let names = self
            .names()
            .filter(|name| {
                if collect.is_empty() {
                    !exclude.iter().any(|excluded| excluded.as_str() == *name)
                } else {
                    collect.iter().any(|collected| collected.as_str() == *name)
                }
            })
            .collect();

        Ok(names)
    }

    /// Runs the named collectors and encodes their samples into `buf`.
    pub fn collect(&self, names: &[&str], buf: &mut String) {
        debug!("collecting metrics");

        let mut results = Vec::with_capacity(names.len());
        let mut enc = metric::Encoder::new(buf, NAMESPACE);
        for (name, collector) in &self.collectors {
            if !names.contains(name) {
                continue;
            }

            let begin = stdtime::Instant::now();
            let res = collector.update(&mut enc);
            let elapsed = begin.elapsed().as_secs_f64();

            if let Err(err) = &res {
                log_update_error(name, err);
            }
            results.push((*name, elapsed, res.is_ok()));
        }

        let mut menc = enc.with_info(&self.metrics.duration);
        for &(name, elapsed, _) in &results {
            menc.write(&[name], elapsed);
        }

        let mut menc = enc.with_info(&self.metrics.success);
        for &(name, _, success) in &results {
            menc.write(&[name], success as u8);
        }
    }
}
