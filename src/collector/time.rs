// Copyright 2025 Google LLC
// SPDX-License-Identifier: MIT

use super::{Collector, Paths};
use crate::metric;
use anyhow::{Context, Result};
use std::{sync, time};

pub(super) struct Time {
    now: metric::Info<0>,
}

pub(super) fn new(_paths: sync::Arc<Paths>) -> Result<Box<dyn Collector>> {
    let now = metric::Info {
        subsys: "time",
        name: "",
        help: "System time in seconds since epoch (1970).",
        unit: metric::Unit::Seconds,
        ty: metric::Type::Gauge,
        label_keys: [],
    };

    Ok(Box::new(Time { now }))
}

impl Collector for Time {
    fn update(&self, enc: &mut metric::Encoder) -> Result<()> {
        let now = time::SystemTime::now()
            .duration_since(time::UNIX_EPOCH)
            .context("system time is before the epoch")?;
        enc.write(&self.now, now.as_secs_f64());

        Ok(())
    }
}
