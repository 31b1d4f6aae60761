// Copyright 2025 Google LLC
// SPDX-License-Identifier: MIT

use super::{Collector, Paths};
use crate::metric;
use anyhow::{Context, Result, anyhow};
use log::debug;
use std::{io::BufRead, sync};

pub(super) struct Mount {
    pub mount_point: String,
    pub fs_type: String,
    pub source: String,
}

impl Mount {
    fn labels(&self) -> [&str; 3] {
        [&self.source, &self.fs_type, &self.mount_point]
    }
}

/// Undoes the octal escaping of spaces, tabs and backslashes in mountinfo.
fn unescape(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());

    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let val = digits
                    .iter()
                    .fold(0u16, |val, b| val * 8 + (b - b'0') as u16);
                if let Ok(c) = u8::try_from(val) {
                    out.push(c);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn parse_mountinfo_line(line: &str) -> Result<Mount> {
    // 0:id 1:parent_id 2:major:minor 3:root 4:mountpoint 5:options
    // optional fields... n:separator
    // n+1:fs_type n+2:src n+3:super
    let cols: Vec<&str> = line.split_ascii_whitespace().collect();
    let sep_min = 6;
    let sep = cols
        .get(sep_min..)
        .and_then(|cols| cols.iter().position(|&col| col == "-"))
        .map(|idx| sep_min + idx);
    let Some(sep) = sep else {
        return Err(anyhow!("failed to parse mountinfo line {line:?}"));
    };
    if cols.len() < sep + 3 {
        return Err(anyhow!("failed to parse mountinfo line {line:?}"));
    }

    Ok(Mount {
        mount_point: unescape(cols[4]),
        fs_type: cols[sep + 1].to_string(),
        source: unescape(cols[sep + 2]),
    })
}

/// Returns the block-device backed mounts.
pub(super) fn parse_mountinfo(reader: impl BufRead) -> Result<Vec<Mount>> {
    let mut mounts = Vec::new();

    for line in reader.lines() {
        let line = line.context("failed to read mountinfo")?;
        let mount = parse_mountinfo_line(&line)?;
        if !mount.source.starts_with('/') {
            continue;
        }

        mounts.push(mount);
    }

    Ok(mounts)
}

struct Metrics {
    size: metric::Info<3>,
    free: metric::Info<3>,
    avail: metric::Info<3>,
    files: metric::Info<3>,
    files_free: metric::Info<3>,
    readonly: metric::Info<3>,
    device_error: metric::Info<3>,
}

pub(super) struct Filesystem {
    paths: sync::Arc<Paths>,
    metrics: Metrics,
}

fn fs_info(name: &'static str, help: &'static str, unit: metric::Unit) -> metric::Info<3> {
    metric::Info {
        subsys: "filesystem",
        name,
        help,
        unit,
        ty: metric::Type::Gauge,
        label_keys: ["device", "fstype", "mountpoint"],
    }
}

pub(super) fn new(paths: sync::Arc<Paths>) -> Result<Box<dyn Collector>> {
    let metrics = Metrics {
        size: fs_info("size", "Filesystem size in bytes.", metric::Unit::Bytes),
        free: fs_info("free", "Filesystem free space in bytes.", metric::Unit::Bytes),
        avail: fs_info(
            "avail",
            "Filesystem space available to non-root users in bytes.",
            metric::Unit::Bytes,
        ),
        files: fs_info("files", "Filesystem total file nodes.", metric::Unit::None),
        files_free: fs_info(
            "files_free",
            "Filesystem total free file nodes.",
            metric::Unit::None,
        ),
        readonly: fs_info("readonly", "Filesystem read-only status.", metric::Unit::None),
        device_error: fs_info(
            "device_error",
            "Whether an error occurred while getting statistics for the given device.",
            metric::Unit::None,
        ),
    };

    Ok(Box::new(Filesystem { paths, metrics }))
}

impl Collector for Filesystem {
    fn update(&self, enc: &mut metric::Encoder) -> Result<()> {
        let mounts = parse_mountinfo(self.paths.procfs_open("self/mountinfo")?)?;

        let mut stats = Vec::with_capacity(mounts.len());
        for mount in &mounts {
            match crate::libc::statvfs(self.paths.rootfs_path(&mount.mount_point)) {
                Ok(stat) => stats.push((mount, Some(stat))),
                Err(err) => {
                    debug!("failed to stat filesystem: {err:?}");
                    stats.push((mount, None));
                }
            }
        }

        let mut menc = enc.with_info(&self.metrics.device_error);
        for (mount, stat) in &stats {
            menc.write(&mount.labels(), stat.is_none() as u8);
        }

        let fields: [(&metric::Info<3>, fn(&crate::libc::FsStat) -> u64); 6] = [
            (&self.metrics.size, |stat| stat.size),
            (&self.metrics.free, |stat| stat.free),
            (&self.metrics.avail, |stat| stat.avail),
            (&self.metrics.files, |stat| stat.files),
            (&self.metrics.files_free, |stat| stat.files_free),
            (&self.metrics.readonly, |stat| stat.readonly as u64),
        ];
        for (info, field) in fields {
            let mut menc = enc.with_info(info);
            for (mount, stat) in &stats {
                let Some(stat) = stat else {
                    continue;
                };

                menc.write(&mount.labels(), field(stat));
            }
        }

        Ok(())
    }
}
