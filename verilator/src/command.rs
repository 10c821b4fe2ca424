// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::VerilatorOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceFormat {
    Vcd,
    Fst,
}

impl TraceFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            TraceFormat::Vcd => "vcd",
            TraceFormat::Fst => "fst",
        }
    }

    fn flag(&self) -> &'static str {
        match self {
            TraceFormat::Vcd => "--trace",
            TraceFormat::Fst => "--trace-fst",
        }
    }
}

/// How to build one simulation executable. Its JSON serialization is part of
/// the build cache key, so every field that changes the produced binary lives
/// here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileConfig {
    /// Top-level module of the simulation, usually the harness.
    pub top_module: String,

    /// Passed as `--default-language`; `None` selects `-sv`.
    pub language_standard: Option<String>,

    /// If a value from `0` to `3` inclusive, the flag `-O<level>` is passed.
    pub optimization: Option<u8>,

    pub trace: Option<TraceFormat>,
    pub coverage: bool,
    pub assertions: bool,

    /// Simulation threads (`--threads`); `None` leaves Verilator's default.
    pub threads: Option<usize>,

    /// Macro definitions; an empty value defines the macro without one.
    pub defines: BTreeMap<String, String>,
    pub include_dirs: Vec<Utf8PathBuf>,
    pub ignored_warnings: Vec<String>,

    /// Fail the compile on any warning that is not recoverable.
    pub warnings_as_errors: bool,

    /// Deadline for the whole Verilator invocation, C++ build included.
    pub timeout_secs: Option<u64>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        Self {
            top_module: String::new(),
            language_standard: None,
            optimization: None,
            trace: Some(TraceFormat::Vcd),
            coverage: false,
            assertions: true,
            threads: None,
            defines: BTreeMap::new(),
            include_dirs: vec![],
            ignored_warnings: vec![],
            warnings_as_errors: false,
            timeout_secs: Some(600),
        }
    }
}

/// The executable `verilator --binary` leaves in `mdir`.
pub fn executable_path(mdir: &Utf8Path, top_module: &str) -> Utf8PathBuf {
    mdir.join(format!("V{top_module}"))
}

/// The makefile Verilator generates next to the executable.
pub fn build_descriptor_path(mdir: &Utf8Path, top_module: &str) -> Utf8PathBuf {
    mdir.join(format!("V{top_module}.mk"))
}

/// Builds the argument list for `verilator --binary`.
///
/// `-Wno-fatal` is always passed: whether a warning fails the build is
/// decided from the classified diagnostics, not by Verilator.
pub fn compile_arguments(
    options: &VerilatorOptions,
    config: &CompileConfig,
    mdir: &Utf8Path,
    sources: &[Utf8PathBuf],
) -> Vec<String> {
    let mut args = vec![
        "--binary".to_string(),
        "-j".into(),
        options.jobs.unwrap_or(0).to_string(),
    ];

    match &config.language_standard {
        Some(standard) => {
            args.push("--default-language".into());
            args.push(standard.clone());
        }
        None => args.push("-sv".into()),
    }

    args.push("--top-module".into());
    args.push(config.top_module.clone());
    args.push("--Mdir".into());
    args.push(mdir.to_string());

    if let Some(level) = config.optimization {
        args.push(format!("-O{}", level.min(3)));
    }
    if let Some(trace) = config.trace {
        args.push(trace.flag().into());
    }
    if config.coverage {
        args.push("--coverage".into());
    }
    if config.assertions {
        args.push("--assert".into());
    }
    if let Some(threads) = config.threads {
        args.push("--threads".into());
        args.push(threads.max(1).to_string());
    }

    for (name, value) in &config.defines {
        if value.is_empty() {
            args.push(format!("-D{name}"));
        } else {
            args.push(format!("-D{name}={value}"));
        }
    }
    for directory in &config.include_dirs {
        args.push(format!("-I{directory}"));
    }

    let mut ignored = options
        .ignored_warnings
        .iter()
        .chain(&config.ignored_warnings)
        .collect::<Vec<_>>();
    ignored.sort();
    ignored.dedup();
    for warning in ignored {
        args.push(format!("-Wno-{warning}"));
    }
    args.push("-Wno-fatal".into());

    args.extend(options.extra_flags.iter().cloned());
    args.extend(sources.iter().map(ToString::to_string));
    args
}
