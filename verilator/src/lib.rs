// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! The Verilator boundary: building command lines, running the tool (and the
//! simulations it produces) under a deadline, and turning what they print into
//! structured diagnostics.
//!
//! Nothing here decides whether a failure is worth retrying or whether a
//! warning should fail a build. Those policies belong to the orchestrator in
//! `benchwright-pipeline`.

use serde::{Deserialize, Serialize};

pub mod classify;
pub mod command;
mod probe;
pub mod runner;

pub use classify::{
    AssertionResult, ClassifiedOutput, Counters, Diagnostic,
    DiagnosticCategory, Severity, classify, classify_output,
};
pub use command::{CompileConfig, TraceFormat};
pub use probe::{MINIMUM_BINARY_VERSION, ToolchainInfo, parse_version};
pub use runner::{
    ProcessOutput, RetryPolicy, RunError, RunOptions, run, run_with_retry,
};

/// Optional configuration for invoking Verilator. Usually, you can just use
/// [`VerilatorOptions::default()`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VerilatorOptions {
    /// The name of the `verilator` executable, interpreted in some way by the
    /// OS/shell.
    pub executable: String,

    /// A list of warnings to disable on every invocation.
    pub ignored_warnings: Vec<String>,

    /// Passed verbatim before the source files.
    pub extra_flags: Vec<String>,

    /// Parallel C++ build jobs (`-j`). `None` passes `-j 0`, which lets
    /// Verilator use every core.
    pub jobs: Option<usize>,
}

impl Default for VerilatorOptions {
    fn default() -> Self {
        Self {
            executable: "verilator".into(),
            ignored_warnings: vec![],
            extra_flags: vec![],
            jobs: None,
        }
    }
}
