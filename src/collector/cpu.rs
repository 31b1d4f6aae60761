// Copyright 2025 Google LLC
// SPDX-License-Identifier: MIT

use super::{Collector, Paths};
use crate::metric;
use anyhow::{Context, Result, anyhow};
use std::{io::BufRead, sync};

// columns of a cpuN line in /proc/stat, in order
const MODES: [&str; 8] = [
    "user", "nice", "system", "idle", "iowait", "irq", "softirq", "steal",
];
const GUEST_MODES: [&str; 2] = ["user", "nice"];

pub(super) struct CpuStat {
    pub cpu: String,
    pub ticks: [u64; 10],
}

fn parse_stat_line(line: &str) -> Result<CpuStat> {
    // 0:cpuN 1:user 2:nice 3:system 4:idle 5:iowait 6:irq 7:softirq
    // 8:steal 9:guest 10:guest_nice
    let cols: Vec<&str> = line.split_ascii_whitespace().collect();
    if cols.len() < 5 {
        return Err(anyhow!("failed to parse stat line {line:?}"));
    }

    let cpu = cols[0]
        .strip_prefix("cpu")
        .ok_or_else(|| anyhow!("failed to parse stat line {line:?}"))?
        .to_string();

    let mut ticks = [0; 10];
    for (tick, col) in ticks.iter_mut().zip(&cols[1..]) {
        *tick = col.parse().unwrap_or(0);
    }

    Ok(CpuStat { cpu, ticks })
}

pub(super) struct StatIter<R> {
    reader: R,
}

impl<R: BufRead> StatIter<R> {
    pub fn new(reader: R) -> Self {
        StatIter { reader }
    }
}

impl<R: BufRead> Iterator for StatIter<R> {
    type Item = Result<CpuStat>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let mut line = String::new();
            match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => (),
                Err(err) => return Some(Err(err).context("failed to read stat")),
            };

            // the aggregate "cpu " line is skipped; per-cpu lines come first
            match line.strip_prefix("cpu") {
                Some(rest) => {
                    if rest.starts_with(' ') {
                        continue;
                    }
                }
                None => return None,
            };

            return Some(parse_stat_line(&line));
        }
    }
}

struct Metrics {
    seconds: metric::Info<2>,
    guest_seconds: metric::Info<2>,
}

pub(super) struct Cpu {
    paths: sync::Arc<Paths>,
    user_hz: f64,
    metrics: Metrics,
}

impl Cpu {
    fn new(paths: sync::Arc<Paths>, user_hz: f64) -> Self {
        let metrics = Metrics {
            seconds: metric::Info {
                subsys: "cpu",
                name: "",
                help: "Seconds the CPUs spent in each mode.",
                unit: metric::Unit::Seconds,
                ty: metric::Type::Counter,
                label_keys: ["cpu", "mode"],
            },
            guest_seconds: metric::Info {
                subsys: "cpu",
                name: "guest",
                help: "Seconds the CPUs spent in guests (VMs) for each mode.",
                unit: metric::Unit::Seconds,
                ty: metric::Type::Counter,
                label_keys: ["cpu", "mode"],
            },
        };

        Cpu {
            paths,
            user_hz,
            metrics,
        }
    }
}

pub(super) fn new(paths: sync::Arc<Paths>) -> Result<Box<dyn Collector>> {
    let user_hz = crate::libc::sysconf_user_hz() as f64;
    Ok(Box::new(Cpu::new(paths, user_hz)))
}

impl Collector for Cpu {
    fn update(&self, enc: &mut metric::Encoder) -> Result<()> {
        let stats: Vec<CpuStat> =
            StatIter::new(self.paths.procfs_open("stat")?).collect::<Result<_>>()?;

        let mut menc = enc.with_info(&self.metrics.seconds);
        for stat in &stats {
            for (mode, ticks) in MODES.into_iter().zip(stat.ticks) {
                menc.write(&[stat.cpu.as_str(), mode], ticks as f64 / self.user_hz);
            }
        }

        let mut menc = enc.with_info(&self.metrics.guest_seconds);
        for stat in &stats {
            for (mode, ticks) in GUEST_MODES.into_iter().zip(&stat.ticks[8..]) {
                menc.write(&[stat.cpu.as_str(), mode], *ticks as f64 / self.user_hz);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::testutil::write_file;

    const STAT: &str = "\
cpu  400 20 300 10000 50 0 7 0 0 0
cpu0 200 10 150 5000 25 0 4 0 8 2
cpu1 200 10 150 5000 25 0 3 0 0 0
intr 1234 0 0
ctxt 5678
btime 1700000000
";

    #[test]
    fn parse_per_cpu_lines() {
        let stats: Vec<CpuStat> = StatIter::new(STAT.as_bytes())
            .collect::<Result<_>>()
            .unwrap();

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].cpu, "0");
        assert_eq!(stats[0].ticks, [200, 10, 150, 5000, 25, 0, 4, 0, 8, 2]);
        assert_eq!(stats[1].cpu, "1");
    }

    #[test]
    fn short_lines_are_padded() {
        let stat = parse_stat_line("cpu3 1 2 3 4").unwrap();
        assert_eq!(stat.cpu, "3");
        assert_eq!(stat.ticks, [1, 2, 3, 4, 0, 0, 0, 0, 0, 0]);

        assert!(parse_stat_line("cpu3 1 2").is_err());
    }

    #[test]
    fn update_writes_seconds() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "stat", STAT);
        let paths = sync::Arc::new(Paths::new(dir.path(), dir.path()));

        let cpu = Cpu::new(paths, 100.0);

        let mut buf = String::new();
        cpu.update(&mut metric::Encoder::new(&mut buf, "node"))
            .unwrap();

        assert!(buf.contains("node_cpu_seconds_total{cpu=\"0\",mode=\"idle\"} 50\n"));
        assert!(buf.contains("node_cpu_seconds_total{cpu=\"1\",mode=\"softirq\"} 0.03\n"));
        assert!(buf.contains("node_cpu_guest_seconds_total{cpu=\"0\",mode=\"user\"} 0.08\n"));
        assert!(buf.contains("node_cpu_guest_seconds_total{cpu=\"0\",mode=\"nice\"} 0.02\n"));
        assert!(!buf.contains("cpu=\"\""));
    }
}
