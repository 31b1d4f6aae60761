// Copyright 2025 Google LLC
// SPDX-License-Identifier: MIT

use super::{Collector, Paths};
use crate::metric;
use anyhow::Result;
use std::sync;

pub(super) struct Uname {
    info: metric::Info<5>,
}

pub(super) fn new(_paths: sync::Arc<Paths>) -> Result<Box<dyn Collector>> {
    let info = metric::Info {
        subsys: "uname",
        name: "",
        help: "Labeled system information as provided by the uname system call.",
        unit: metric::Unit::Info,
        ty: metric::Type::Gauge,
        label_keys: ["machine", "nodename", "release", "sysname", "version"],
    };

    Ok(Box::new(Uname { info }))
}

impl Collector for Uname {
    fn update(&self, enc: &mut metric::Encoder) -> Result<()> {
        let uts = crate::libc::uname()?;

        enc.with_info(&self.info).write(
            &[
                uts.machine.as_str(),
                uts.nodename.as_str(),
                uts.release.as_str(),
                uts.sysname.as_str(),
                uts.version.as_str(),
            ],
            1,
        );

        Ok(())
    }
}
