// Copyright 2025 Google LLC
// SPDX-License-Identifier: MIT

//! Node Exporter Launcher command line entry point.

fn main() {
    node_exporter_launcher::start(node_exporter_launcher::parse_args());
}
