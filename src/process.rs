// Copyright 2025 Google LLC
// SPDX-License-Identifier: MIT

//! Metrics about the exporter process itself.

use crate::{collector, metric};
use anyhow::{Context, Result, anyhow};
use log::debug;
use std::{io::Read, sync};

#[derive(Debug, PartialEq)]
struct ProcStat {
    utime: u64,
    stime: u64,
    start_ticks: u64,
    vsize: u64,
    rss_pages: u64,
}

fn parse_proc_stat(s: &str) -> Result<ProcStat> {
    // 1:pid 2:(comm) 3:state ... 14:utime 15:stime ... 22:starttime
    // 23:vsize 24:rss; comm may contain spaces and parens
    let (_, rest) = s
        .rsplit_once(')')
        .ok_or_else(|| anyhow!("failed to parse process stat"))?;
    let cols: Vec<&str> = rest.split_ascii_whitespace().collect();
    if cols.len() < 22 {
        return Err(anyhow!("failed to parse process stat"));
    }

    let val = |field: usize| -> Result<u64> {
        let col = cols[field - 3];
        col.parse()
            .with_context(|| format!("failed to parse process stat field {field}"))
    };

    Ok(ProcStat {
        utime: val(14)?,
        stime: val(15)?,
        start_ticks: val(22)?,
        vsize: val(23)?,
        rss_pages: val(24)?,
    })
}

/// Returns the soft open files limit, or `None` when unlimited.
fn parse_max_fds(s: &str) -> Result<Option<u64>> {
    for line in s.lines() {
        let Some(rest) = line.strip_prefix("Max open files") else {
            continue;
        };

        let soft = rest
            .split_ascii_whitespace()
            .next()
            .ok_or_else(|| anyhow!("failed to parse process limits"))?;
        if soft == "unlimited" {
            return Ok(None);
        }

        return Ok(Some(soft.parse()?));
    }

    Err(anyhow!("failed to find open files limit"))
}

struct Metrics {
    cpu: metric::Info<0>,
    resident_memory: metric::Info<0>,
    virtual_memory: metric::Info<0>,
    start_time: metric::Info<0>,
    open_fds: metric::Info<0>,
    max_fds: metric::Info<0>,
    build: metric::Info<2>,
}

pub struct Process {
    paths: sync::Arc<collector::Paths>,
    user_hz: f64,
    page_size: u64,
    metrics: Metrics,
}

impl Process {
    pub fn new(paths: sync::Arc<collector::Paths>) -> Self {
        use metric::{Type, Unit};

        let gauge = |name: &'static str, help: &'static str, unit: Unit| metric::Info {
            subsys: "",
            name,
            help,
            unit,
            ty: Type::Gauge,
            label_keys: [],
        };

        let metrics = Metrics {
            cpu: metric::Info {
                subsys: "cpu",
                name: "",
                help: "Total user and system CPU time spent in seconds.",
                unit: Unit::Seconds,
                ty: Type::Counter,
                label_keys: [],
            },
            resident_memory: gauge(
                "resident_memory",
                "Resident memory size in bytes.",
                Unit::Bytes,
            ),
            virtual_memory: gauge(
                "virtual_memory",
                "Virtual memory size in bytes.",
                Unit::Bytes,
            ),
            start_time: gauge(
                "start_time",
                "Start time of the process since unix epoch in seconds.",
                Unit::Seconds,
            ),
            open_fds: gauge("open_fds", "Number of open file descriptors.", Unit::None),
            max_fds: gauge(
                "max_fds",
                "Maximum number of open file descriptors.",
                Unit::None,
            ),
            build: metric::Info {
                subsys: "exporter",
                name: "build",
                help: "A metric with a constant '1' value labeled by version and target.",
                unit: Unit::Info,
                ty: Type::Gauge,
                label_keys: ["target", "version"],
            },
        };

        Process {
            paths,
            user_hz: crate::libc::sysconf_user_hz() as f64,
            page_size: crate::libc::sysconf_page_size(),
            metrics,
        }
    }

    fn read_proc(&self, file: &str) -> Result<String> {
        let mut s = String::new();
        self.paths
            .procfs_open(file)?
            .read_to_string(&mut s)
            .with_context(|| format!("failed to read {file}"))?;
        Ok(s)
    }

    fn write_process(&self, enc: &mut metric::Encoder) -> Result<()> {
        let stat = parse_proc_stat(&self.read_proc("self/stat")?)?;
        let boot_time = collector::boot_time(&self.paths)?;

        enc.write(
            &self.metrics.cpu,
            (stat.utime + stat.stime) as f64 / self.user_hz,
        );
        enc.write(
            &self.metrics.resident_memory,
            stat.rss_pages * self.page_size,
        );
        enc.write(&self.metrics.virtual_memory, stat.vsize);
        enc.write(
            &self.metrics.start_time,
            boot_time as f64 + stat.start_ticks as f64 / self.user_hz,
        );

        let open_fds = self.paths.procfs_read_dir("self/fd")?.count();
        enc.write(&self.metrics.open_fds, open_fds);

        if let Some(max_fds) = parse_max_fds(&self.read_proc("self/limits")?)? {
            enc.write(&self.metrics.max_fds, max_fds);
        }

        Ok(())
    }

    /// Encodes the process metrics and the build info into `buf`.
    pub fn collect(&self, buf: &mut String) {
        let mut enc = metric::Encoder::new(buf, "process");
        if let Err(err) = self.write_process(&mut enc) {
            debug!("failed to collect process metrics: {err:?}");
        }

        let target = format!("{}-{}", std::env::consts::ARCH, std::env::consts::OS);
        metric::Encoder::new(buf, collector::NAMESPACE)
            .with_info(&self.metrics.build)
            .write(&[target.as_str(), env!("CARGO_PKG_VERSION")], 1);
    }
}
