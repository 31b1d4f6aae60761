// Copyright 2025 Google LLC
// SPDX-License-Identifier: MIT

use super::{Collector, Paths};
use crate::metric;
use anyhow::{Context, Result, anyhow};
use std::{io::BufRead, sync};

#[derive(Default)]
pub(super) struct KernelStat {
    pub boot_time: u64,
    pub context_switches: u64,
    pub forks: u64,
    pub interrupts: u64,
    pub procs_running: u64,
    pub procs_blocked: u64,
}

pub(super) fn parse_kernel_stat(reader: impl BufRead) -> Result<KernelStat> {
    let mut stat = KernelStat::default();
    let mut found_btime = false;

    for line in reader.lines() {
        let line = line.context("failed to read stat")?;

        // key value [values...]
        let mut cols = line.split_ascii_whitespace();
        let (Some(key), Some(val)) = (cols.next(), cols.next()) else {
            continue;
        };
        let val: u64 = val.parse().unwrap_or(0);

        match key {
            "btime" => {
                stat.boot_time = val;
                found_btime = true;
            }
            "ctxt" => stat.context_switches = val,
            "processes" => stat.forks = val,
            "intr" => stat.interrupts = val,
            "procs_running" => stat.procs_running = val,
            "procs_blocked" => stat.procs_blocked = val,
            _ => (),
        }
    }

    if !found_btime {
        return Err(anyhow!("failed to find btime in stat"));
    }

    Ok(stat)
}

struct Metrics {
    boot_time: metric::Info<0>,
    context_switches: metric::Info<0>,
    forks: metric::Info<0>,
    interrupts: metric::Info<0>,
    procs_running: metric::Info<0>,
    procs_blocked: metric::Info<0>,
}

pub(super) struct Stat {
    paths: sync::Arc<Paths>,
    metrics: Metrics,
}

pub(super) fn new(paths: sync::Arc<Paths>) -> Result<Box<dyn Collector>> {
    let metrics = Metrics {
        boot_time: metric::Info {
            subsys: "",
            name: "boot_time",
            help: "Node boot time, in unixtime.",
            unit: metric::Unit::Seconds,
            ty: metric::Type::Gauge,
            label_keys: [],
        },
        context_switches: metric::Info {
            subsys: "",
            name: "context_switches",
            help: "Total number of context switches.",
            unit: metric::Unit::None,
            ty: metric::Type::Counter,
            label_keys: [],
        },
        forks: metric::Info {
            subsys: "",
            name: "forks",
            help: "Total number of forks.",
            unit: metric::Unit::None,
            ty: metric::Type::Counter,
            label_keys: [],
        },
        interrupts: metric::Info {
            subsys: "",
            name: "intr",
            help: "Total number of interrupts serviced.",
            unit: metric::Unit::None,
            ty: metric::Type::Counter,
            label_keys: [],
        },
        procs_running: metric::Info {
            subsys: "",
            name: "procs_running",
            help: "Number of processes in runnable state.",
            unit: metric::Unit::None,
            ty: metric::Type::Gauge,
            label_keys: [],
        },
        procs_blocked: metric::Info {
            subsys: "",
            name: "procs_blocked",
            help: "Number of processes blocked waiting for I/O to complete.",
            unit: metric::Unit::None,
            ty: metric::Type::Gauge,
            label_keys: [],
        },
    };

    Ok(Box::new(Stat { paths, metrics }))
}

impl Collector for Stat {
    fn update(&self, enc: &mut metric::Encoder) -> Result<()> {
        let stat = parse_kernel_stat(self.paths.procfs_open("stat")?)?;

        enc.write(&self.metrics.boot_time, stat.boot_time);
        enc.write(&self.metrics.context_switches, stat.context_switches);
        enc.write(&self.metrics.forks, stat.forks);
        enc.write(&self.metrics.interrupts, stat.interrupts);
        enc.write(&self.metrics.procs_running, stat.procs_running);
        enc.write(&self.metrics.procs_blocked, stat.procs_blocked);

        Ok(())
    }
}
