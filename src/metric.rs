// Copyright 2025 Google LLC
// SPDX-License-Identifier: MIT

//! Prometheus text exposition format encoder.

use std::{
    fmt::{self, Write},
    iter,
};

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

pub enum Unit {
    Bytes,
    Info,
    None,
    Seconds,
}

impl Unit {
    fn as_suffix(&self) -> &'static str {
        match self {
            Unit::Bytes => "_bytes",
            Unit::Info => "_info",
            Unit::None => "",
            Unit::Seconds => "_seconds",
        }
    }
}

pub enum Type {
    Counter,
    Gauge,
}

impl Type {
    fn as_suffix(&self) -> &'static str {
        match self {
            Type::Counter => "_total",
            Type::Gauge => "",
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Type::Counter => "counter",
            Type::Gauge => "gauge",
        }
    }
}

/// Static description of a metric family.
///
/// The full name is `namespace_subsys_name` with empty parts skipped,
/// followed by the unit suffix and, for counters, `_total`.
pub struct Info<const N: usize> {
    pub subsys: &'static str,
    pub name: &'static str,
    pub help: &'static str,
    pub unit: Unit,
    pub ty: Type,
    pub label_keys: [&'static str; N],
}

fn write_escaped(writer: &mut String, val: &str, quote: bool) {
    for c in val.chars() {
        match c {
            '\\' => writer.push_str("\\\\"),
            '\n' => writer.push_str("\\n"),
            '"' if quote => writer.push_str("\\\""),
            _ => writer.push(c),
        }
    }
}

pub struct MetricEncoder<'a, 'b, const N: usize> {
    writer: &'a mut String,
    name: String,
    info: &'b Info<N>,
    header_written: bool,
}

impl<'a, 'b, const N: usize> MetricEncoder<'a, 'b, N> {
    fn new(writer: &'a mut String, namespace: &str, info: &'b Info<N>) -> Self {
        let mut name = String::new();
        for part in [namespace, info.subsys, info.name] {
            if part.is_empty() {
                continue;
            }
            if !name.is_empty() {
                name.push('_');
            }
            name.push_str(part);
        }
        name.push_str(info.unit.as_suffix());
        name.push_str(info.ty.as_suffix());

        MetricEncoder {
            writer,
            name,
            info,
            header_written: false,
        }
    }

    fn write_header(&mut self) {
        let _ = write!(self.writer, "# HELP {} ", self.name);
        write_escaped(self.writer, self.info.help, false);
        let _ = writeln!(self.writer);
        let _ = writeln!(self.writer, "# TYPE {} {}", self.name, self.info.ty.as_str());
    }

    fn write_labels(&mut self, label_vals: &[&str; N]) {
        if N == 0 {
            return;
        }

        self.writer.push('{');

        let mut first = true;
        for (key, val) in iter::zip(&self.info.label_keys, label_vals) {
            if first {
                first = false;
            } else {
                self.writer.push(',');
            }

            let _ = write!(self.writer, "{key}=\"");
            write_escaped(self.writer, val, true);
            self.writer.push('"');
        }

        self.writer.push('}');
    }

    /// Writes one sample, preceded by the family header on first use.
    pub fn write<T: fmt::Display>(&mut self, label_vals: &[&str; N], val: T) {
        if !self.header_written {
            self.write_header();
            self.header_written = true;
        }

        self.writer.push_str(&self.name);
        self.write_labels(label_vals);
        let _ = writeln!(self.writer, " {val}");
    }
}

pub struct Encoder<'a> {
    writer: &'a mut String,
    namespace: &'static str,
}

impl<'a> Encoder<'a> {
    pub fn new(writer: &'a mut String, namespace: &'static str) -> Self {
        Encoder { writer, namespace }
    }

    pub fn with_info<'b, const N: usize>(&mut self, info: &'b Info<N>) -> MetricEncoder<'_, 'b, N> {
        MetricEncoder::new(&mut *self.writer, self.namespace, info)
    }

    pub fn write<T: fmt::Display>(&mut self, info: &Info<0>, val: T) {
        self.with_info(info).write(&[], val);
    }
}
