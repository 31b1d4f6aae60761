// Copyright 2025 Google LLC
// SPDX-License-Identifier: MIT

use super::{Collector, Paths};
use crate::metric;
use anyhow::{Context, Result, anyhow};
use std::{collections::HashMap, io::BufRead, sync};

// meminfo keys exported as node_memory_<key>_bytes
const FIELDS: [&str; 16] = [
    "MemTotal",
    "MemFree",
    "MemAvailable",
    "Buffers",
    "Cached",
    "SwapCached",
    "Active",
    "Inactive",
    "SwapTotal",
    "SwapFree",
    "Dirty",
    "Writeback",
    "AnonPages",
    "Mapped",
    "Shmem",
    "Slab",
];

/// Parses `/proc/meminfo` into byte values keyed by field name.
fn parse_meminfo(reader: impl BufRead) -> Result<HashMap<String, u64>> {
    let mut fields = HashMap::new();

    for line in reader.lines() {
        let line = line.context("failed to read meminfo")?;

        // key: value [unit]
        let cols: Vec<&str> = line.split_ascii_whitespace().collect();
        if cols.len() < 2 {
            return Err(anyhow!("failed to parse meminfo line {line:?}"));
        }
        let Some(key) = cols[0].strip_suffix(':') else {
            return Err(anyhow!("failed to parse meminfo line {line:?}"));
        };
        let mut val: u64 = cols[1]
            .parse()
            .with_context(|| format!("failed to parse meminfo value {:?}", cols[1]))?;
        if cols.get(2) == Some(&"kB") {
            val = val.saturating_mul(1024);
        }

        fields.insert(key.to_string(), val);
    }

    Ok(fields)
}

pub(super) struct MemInfo {
    paths: sync::Arc<Paths>,
    metrics: Vec<(&'static str, metric::Info<0>)>,
}

pub(super) fn new(paths: sync::Arc<Paths>) -> Result<Box<dyn Collector>> {
    let metrics = FIELDS
        .iter()
        .map(|&field| {
            let info = metric::Info {
                subsys: "memory",
                name: field,
                help: "Memory information field from /proc/meminfo.",
                unit: metric::Unit::Bytes,
                ty: metric::Type::Gauge,
                label_keys: [],
            };
            (field, info)
        })
        .collect();

    Ok(Box::new(MemInfo { paths, metrics }))
}

impl Collector for MemInfo {
    fn update(&self, enc: &mut metric::Encoder) -> Result<()> {
        let fields = parse_meminfo(self.paths.procfs_open("meminfo")?)?;

        for (field, info) in &self.metrics {
            if let Some(val) = fields.get(*field) {
                enc.write(info, val);
            }
        }

        Ok(())
    }
}
