// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use std::{fmt, io};

use benchwright_testbench::SynthesizeError;
use benchwright_verilator::{Diagnostic, RunError};
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use snafu::Snafu;

use crate::cache::CacheKeyError;

/// The phase that invoked an external process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Compile,
    Execute,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Phase::Compile => "compile",
            Phase::Execute => "execute",
        })
    }
}

/// A stable tag for [`PipelineError`], suitable for callers that branch on
/// the failure class without matching the error itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    NotFound,
    MalformedInput,
    Launch,
    Timeout,
    OutputOverflow,
    ToolDiagnostic,
    Synthesis,
    Io,
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum PipelineError {
    #[snafu(display("{what} was not found"))]
    NotFound { what: String },

    #[snafu(display("Malformed input: {reason}"))]
    MalformedInput { reason: String },

    #[snafu(display(
        "Could not launch `{program}`; make sure Verilator 5 is installed and on your PATH, or set `toolchain.executable` in benchwright.toml"
    ))]
    Launch { program: String, source: RunError },

    #[snafu(display(
        "`{executable}` ({banner}) is too old for `verilator --binary`; Verilator 5.0 or newer is required"
    ))]
    UnsupportedToolchain { executable: String, banner: String },

    #[snafu(display("The {phase} phase timed out"))]
    Timeout { phase: Phase, source: RunError },

    #[snafu(display("The {phase} phase produced too much output"))]
    OutputOverflow { phase: Phase, source: RunError },

    #[snafu(display("Failed while waiting on the {phase} phase"))]
    Process { phase: Phase, source: RunError },

    /// The toolchain itself rejected the input. Every diagnostic is kept.
    #[snafu(display(
        "The {phase} phase reported {} error(s)",
        diagnostics.iter().filter(|diagnostic| diagnostic.is_error()).count()
    ))]
    ToolDiagnostic {
        phase: Phase,
        diagnostics: Vec<Diagnostic>,
    },

    #[snafu(display("Failed to synthesize a testbench"))]
    Synthesis { source: SynthesizeError },

    #[snafu(display("Failed to compute the build cache key"))]
    CacheKey { source: CacheKeyError },

    #[snafu(display("I/O error on {path}"))]
    Io { path: Utf8PathBuf, source: io::Error },
}

impl PipelineError {
    pub(crate) fn from_run(phase: Phase, error: RunError) -> Self {
        match error {
            RunError::Launch { ref program, .. } => PipelineError::Launch {
                program: program.clone(),
                source: error,
            },
            RunError::Timeout { .. } => PipelineError::Timeout {
                phase,
                source: error,
            },
            RunError::OutputOverflow { .. } => PipelineError::OutputOverflow {
                phase,
                source: error,
            },
            RunError::Wait { .. } => PipelineError::Process {
                phase,
                source: error,
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::NotFound { .. } => ErrorKind::NotFound,
            PipelineError::MalformedInput { .. } => ErrorKind::MalformedInput,
            PipelineError::Launch { .. }
            | PipelineError::UnsupportedToolchain { .. } => ErrorKind::Launch,
            PipelineError::Timeout { .. } => ErrorKind::Timeout,
            PipelineError::OutputOverflow { .. } => ErrorKind::OutputOverflow,
            PipelineError::ToolDiagnostic { .. } => ErrorKind::ToolDiagnostic,
            PipelineError::Synthesis { .. } => ErrorKind::Synthesis,
            PipelineError::Process { .. }
            | PipelineError::CacheKey { .. }
            | PipelineError::Io { .. } => ErrorKind::Io,
        }
    }

    /// Only launch races caused by momentary resource exhaustion are worth
    /// another attempt. Diagnostic-driven failures are deterministic.
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Launch { source, .. } => source.is_transient_launch(),
            _ => false,
        }
    }

    /// The toolchain diagnostics carried by this error, if any.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        match self {
            PipelineError::ToolDiagnostic { diagnostics, .. } => diagnostics,
            _ => &[],
        }
    }
}

/// The serializable record of why a run ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    /// The error and its chain of causes, outermost first.
    pub message: String,
    pub retryable: bool,
    pub diagnostics: Vec<Diagnostic>,
}

impl From<&PipelineError> for Failure {
    fn from(error: &PipelineError) -> Self {
        let mut message = error.to_string();
        let mut source = std::error::Error::source(error);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        Self {
            kind: error.kind(),
            message,
            retryable: error.is_retryable(),
            diagnostics: error.diagnostics().to_vec(),
        }
    }
}
