// Copyright 2025 Google LLC
// SPDX-License-Identifier: MIT

use super::{Collector, Paths};
use crate::metric;
use anyhow::{Context, Result};
use std::{fs, sync};

pub(super) struct ThermalZone {
    pub zone: String,
    pub ty: String,
    pub millicelsius: i64,
}

fn parse_thermal_zone_device(dir: fs::DirEntry, zone: &str) -> Result<ThermalZone> {
    let dir_path = dir.path();

    let ty = super::read_string(dir_path.join("type"))?;
    let millicelsius = super::read_i64(dir_path.join("temp"))?;

    Ok(ThermalZone {
        zone: zone.to_string(),
        ty,
        millicelsius,
    })
}

pub(super) struct ClassThermalIter {
    dir_iter: fs::ReadDir,
}

impl Iterator for ClassThermalIter {
    type Item = Result<ThermalZone>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let dir = match self.dir_iter.next() {
                Some(Ok(dir)) => dir,
                Some(Err(err)) => return Some(Err(err).context("failed to read class/thermal")),
                None => return None,
            };

            // cooling_deviceN entries live in the same directory
            let name = dir.file_name();
            if let Some(zone) = name
                .to_str()
                .and_then(|name| name.strip_prefix("thermal_zone"))
            {
                return Some(parse_thermal_zone_device(dir, zone));
            }
        }
    }
}

pub(super) struct Thermal {
    paths: sync::Arc<Paths>,
    temp: metric::Info<2>,
}

pub(super) fn new(paths: sync::Arc<Paths>) -> Result<Box<dyn Collector>> {
    let temp = metric::Info {
        subsys: "thermal_zone",
        name: "temp",
        help: "Zone temperature in Celsius",
        unit: metric::Unit::None,
        ty: metric::Type::Gauge,
        label_keys: ["type", "zone"],
    };

    Ok(Box::new(Thermal { paths, temp }))
}

impl Collector for Thermal {
    fn update(&self, enc: &mut metric::Encoder) -> Result<()> {
        let dir_iter = self.paths.sysfs_read_dir("class/thermal")?;

        let mut zones = Vec::new();
        for zone in (ClassThermalIter { dir_iter }) {
            match zone {
                Ok(zone) => zones.push(zone),
                // zones of powered-down devices fail to read
                Err(err) => log::debug!("failed to read thermal zone: {err:?}"),
            }
        }
        zones.sort_by(|a, b| a.zone.cmp(&b.zone));

        let mut menc = enc.with_info(&self.temp);
        for zone in &zones {
            menc.write(
                &[zone.ty.as_str(), zone.zone.as_str()],
                zone.millicelsius as f64 / 1000.0,
            );
        }

        Ok(())
    }
}
