// Copyright 2025 Google LLC
// SPDX-License-Identifier: MIT

use super::{Collector, Paths};
use crate::metric;
use anyhow::{Context, Result, anyhow};
use std::{io::BufRead, sync};

const SECTOR_SIZE: u64 = 512;

pub(super) struct DiskStats {
    pub device: String,
    pub reads_completed: u64,
    pub read_bytes: u64,
    pub read_ms: u64,
    pub writes_completed: u64,
    pub written_bytes: u64,
    pub write_ms: u64,
    pub io_now: u64,
    pub io_ms: u64,
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// Matches ram disks, loop devices, floppies and partitions of
/// whole disks that are already reported.
fn is_ignored_device(name: &str) -> bool {
    for prefix in ["ram", "zram", "loop", "fd"] {
        if name.strip_prefix(prefix).is_some_and(all_digits) {
            return true;
        }
    }

    // (h|s|v|xv)d[a-z]N
    for prefix in ["hd", "sd", "vd", "xvd"] {
        if let Some(rest) = name.strip_prefix(prefix) {
            let mut chars = rest.chars();
            if chars.next().is_some_and(|c| c.is_ascii_lowercase()) && all_digits(chars.as_str())
            {
                return true;
            }
        }
    }

    // nvmeNnNpN
    if let Some(rest) = name.strip_prefix("nvme") {
        let parts: Vec<&str> = rest.split(['n', 'p']).collect();
        if parts.len() == 3 && parts.iter().all(|part| all_digits(part)) {
            return rest.contains('p');
        }
    }

    false
}

fn parse_diskstats_line(line: &str) -> Result<DiskStats> {
    // 0:major 1:minor 2:device
    // 3:reads 4:reads_merged 5:sectors_read 6:read_ms
    // 7:writes 8:writes_merged 9:sectors_written 10:write_ms
    // 11:io_now 12:io_ms 13:weighted_io_ms ...
    let cols: Vec<&str> = line.split_ascii_whitespace().collect();
    if cols.len() < 14 {
        return Err(anyhow!("failed to parse diskstats line {line:?}"));
    }

    let val = |idx: usize| -> u64 { cols[idx].parse().unwrap_or(0) };

    Ok(DiskStats {
        device: cols[2].to_string(),
        reads_completed: val(3),
        read_bytes: val(5).saturating_mul(SECTOR_SIZE),
        read_ms: val(6),
        writes_completed: val(7),
        written_bytes: val(9).saturating_mul(SECTOR_SIZE),
        write_ms: val(10),
        io_now: val(11),
        io_ms: val(12),
    })
}

pub(super) fn parse_diskstats(reader: impl BufRead) -> Result<Vec<DiskStats>> {
    let mut stats = Vec::new();

    for line in reader.lines() {
        let line = line.context("failed to read diskstats")?;
        let stat = parse_diskstats_line(&line)?;
        if is_ignored_device(&stat.device) {
            continue;
        }

        stats.push(stat);
    }

    Ok(stats)
}

struct Metrics {
    reads_completed: metric::Info<1>,
    read_bytes: metric::Info<1>,
    read_time: metric::Info<1>,
    writes_completed: metric::Info<1>,
    written_bytes: metric::Info<1>,
    write_time: metric::Info<1>,
    io_now: metric::Info<1>,
    io_time: metric::Info<1>,
}

pub(super) struct Disk {
    paths: sync::Arc<Paths>,
    metrics: Metrics,
}

fn disk_info(
    name: &'static str,
    help: &'static str,
    unit: metric::Unit,
    ty: metric::Type,
) -> metric::Info<1> {
    metric::Info {
        subsys: "disk",
        name,
        help,
        unit,
        ty,
        label_keys: ["device"],
    }
}

pub(super) fn new(paths: sync::Arc<Paths>) -> Result<Box<dyn Collector>> {
    use metric::{Type, Unit};

    let metrics = Metrics {
        reads_completed: disk_info(
            "reads_completed",
            "The total number of reads completed successfully.",
            Unit::None,
            Type::Counter,
        ),
        read_bytes: disk_info(
            "read",
            "The total number of bytes read successfully.",
            Unit::Bytes,
            Type::Counter,
        ),
        read_time: disk_info(
            "read_time",
            "The total number of seconds spent by all reads.",
            Unit::Seconds,
            Type::Counter,
        ),
        writes_completed: disk_info(
            "writes_completed",
            "The total number of writes completed successfully.",
            Unit::None,
            Type::Counter,
        ),
        written_bytes: disk_info(
            "written",
            "The total number of bytes written successfully.",
            Unit::Bytes,
            Type::Counter,
        ),
        write_time: disk_info(
            "write_time",
            "This is the total number of seconds spent by all writes.",
            Unit::Seconds,
            Type::Counter,
        ),
        io_now: disk_info(
            "io_now",
            "The number of I/Os currently in progress.",
            Unit::None,
            Type::Gauge,
        ),
        io_time: disk_info(
            "io_time",
            "Total seconds spent doing I/Os.",
            Unit::Seconds,
            Type::Counter,
        ),
    };

    Ok(Box::new(Disk { paths, metrics }))
}

impl Collector for Disk {
    fn update(&self, enc: &mut metric::Encoder) -> Result<()> {
        let stats = parse_diskstats(self.paths.procfs_open("diskstats")?)?;

        let fields: [(&metric::Info<1>, fn(&DiskStats) -> f64); 8] = [
            (&self.metrics.reads_completed, |s| s.reads_completed as f64),
            (&self.metrics.read_bytes, |s| s.read_bytes as f64),
            (&self.metrics.read_time, |s| s.read_ms as f64 / 1000.0),
            (&self.metrics.writes_completed, |s| s.writes_completed as f64),
            (&self.metrics.written_bytes, |s| s.written_bytes as f64),
            (&self.metrics.write_time, |s| s.write_ms as f64 / 1000.0),
            (&self.metrics.io_now, |s| s.io_now as f64),
            (&self.metrics.io_time, |s| s.io_ms as f64 / 1000.0),
        ];
        for (info, field) in fields {
            let mut menc = enc.with_info(info);
            for stat in &stats {
                menc.write(&[stat.device.as_str()], field(stat));
            }
        }

        Ok(())
    }
}
