// Copyright 2025 Google LLC
// SPDX-License-Identifier: MIT

use super::{Collector, Paths};
use crate::metric;
use anyhow::{Context, Result, anyhow};
use std::{io::Read, sync};

fn parse_loadavg(s: &str) -> Result<[f64; 3]> {
    // 0:load1 1:load5 2:load15 3:running/total 4:last_pid
    let cols: Vec<&str> = s.split_ascii_whitespace().collect();
    if cols.len() < 3 {
        return Err(anyhow!("failed to parse loadavg {s:?}"));
    }

    let mut loads = [0.0; 3];
    for (load, col) in loads.iter_mut().zip(&cols) {
        *load = col
            .parse()
            .with_context(|| format!("failed to parse load {col:?}"))?;
    }

    Ok(loads)
}

pub(super) struct LoadAvg {
    paths: sync::Arc<Paths>,
    metrics: [metric::Info<0>; 3],
}

pub(super) fn new(paths: sync::Arc<Paths>) -> Result<Box<dyn Collector>> {
    let metrics = [
        ("load1", "1m load average."),
        ("load5", "5m load average."),
        ("load15", "15m load average."),
    ]
    .map(|(name, help)| metric::Info {
        subsys: "",
        name,
        help,
        unit: metric::Unit::None,
        ty: metric::Type::Gauge,
        label_keys: [],
    });

    Ok(Box::new(LoadAvg { paths, metrics }))
}

impl Collector for LoadAvg {
    fn update(&self, enc: &mut metric::Encoder) -> Result<()> {
        let mut s = String::new();
        self.paths
            .procfs_open("loadavg")?
            .read_to_string(&mut s)
            .context("failed to read loadavg")?;

        let loads = parse_loadavg(&s)?;
        for (info, load) in self.metrics.iter().zip(loads) {
            enc.write(info, load);
        }

        Ok(())
    }
}
