// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Best-effort classification of Verilator and simulation output.
//!
//! Lines that match no known shape are dropped, so classification never
//! fails.

use std::{fmt, sync::LazyLock};

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticCategory {
    Syntax,
    Lint,
    Elaboration,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// The `-CODE` suffix, e.g. `WIDTHTRUNC` in `%Warning-WIDTHTRUNC:`.
    pub code: Option<String>,
    pub source_file: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub message: String,
}

impl Diagnostic {
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }

    pub fn category(&self) -> DiagnosticCategory {
        categorize(self)
    }

    pub fn is_recoverable(&self) -> bool {
        is_recoverable(self)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.severity)?;
        if let Some(code) = &self.code {
            write!(f, "[{code}]")?;
        }
        write!(f, ": ")?;
        if let Some(file) = &self.source_file {
            write!(f, "{file}:")?;
            if let Some(line) = self.line {
                write!(f, "{line}:")?;
            }
            if let Some(column) = self.column {
                write!(f, "{column}:")?;
            }
            write!(f, " ")?;
        }
        write!(f, "{}", self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionResult {
    pub name: String,
    pub source_file: String,
    pub line: u32,
    pub passed: bool,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub cycle_count: Option<u64>,
    pub event_count: Option<u64>,
}

/// The three extraction passes over one blob of output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedOutput {
    pub diagnostics: Vec<Diagnostic>,
    pub assertions: Vec<AssertionResult>,
    pub counters: Counters,
}

impl ClassifiedOutput {
    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }

    pub fn failed_assertions(&self) -> impl Iterator<Item = &AssertionResult> {
        self.assertions.iter().filter(|assertion| !assertion.passed)
    }
}

static SEVERITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?:\[[^\]]*\]\s*)?%(Error|Warning|Info)(?:-([A-Z0-9_]+))?:\s*(.*)$",
    )
    .expect("valid regex")
});

static LOCATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([^\s:]+):(\d+)(?::(\d+))?:\s*(.*)$").expect("valid regex")
});

static ASSERTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?:^|\s)([A-Za-z_][\w$.]*) at ([^\s:]+):(\d+) (passed|failed)(?::\s*(.*))?",
    )
    .expect("valid regex")
});

static COUNTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(cycle|event)s?(?:[ _]count)?\s*[:=]\s*(\d+)")
        .expect("valid regex")
});

fn parse_line(line: &str) -> Option<Diagnostic> {
    let captures = SEVERITY.captures(line)?;
    let severity = match &captures[1] {
        "Error" => Severity::Error,
        "Warning" => Severity::Warning,
        _ => Severity::Info,
    };
    let code = captures.get(2).map(|code| code.as_str().to_string());
    let rest = captures.get(3).map_or("", |rest| rest.as_str());

    let located = LOCATION.captures(rest).and_then(|location| {
        let line = location[2].parse().ok()?;
        let column = match location.get(3) {
            Some(column) => Some(column.as_str().parse().ok()?),
            None => None,
        };
        Some(Diagnostic {
            severity,
            code: code.clone(),
            source_file: Some(location[1].to_string()),
            line: Some(line),
            column,
            message: location[4].trim_end().to_string(),
        })
    });

    Some(located.unwrap_or_else(|| Diagnostic {
        severity,
        code,
        source_file: None,
        line: None,
        column: None,
        message: rest.trim_end().to_string(),
    }))
}

/// Extracts diagnostics in the order they appear.
///
/// Verilator's indented source excerpts and `: ... note` continuation lines
/// are not diagnostics of their own and are skipped.
pub fn classify(text: &str) -> Vec<Diagnostic> {
    text.lines().filter_map(parse_line).collect()
}

/// Extracts `<name> at <file>:<line> passed|failed[: message]` records.
pub fn classify_assertions(text: &str) -> Vec<AssertionResult> {
    text.lines()
        .filter_map(|line| {
            let captures = ASSERTION.captures(line)?;
            Some(AssertionResult {
                name: captures[1].to_string(),
                source_file: captures[2].to_string(),
                line: captures[3].parse().ok()?,
                passed: &captures[4] == "passed",
                message: captures
                    .get(5)
                    .map(|message| message.as_str().trim().to_string())
                    .filter(|message| !message.is_empty()),
            })
        })
        .collect()
}

/// Scans for labeled cycle and event counts. When a label repeats, the last
/// value wins, since simulations print running totals.
pub fn classify_counters(text: &str) -> Counters {
    let mut counters = Counters::default();
    for captures in COUNTER.captures_iter(text) {
        let Ok(value) = captures[2].parse() else {
            continue;
        };
        if captures[1].eq_ignore_ascii_case("cycle") {
            counters.cycle_count = Some(value);
        } else {
            counters.event_count = Some(value);
        }
    }
    counters
}

pub fn classify_output(text: &str) -> ClassifiedOutput {
    ClassifiedOutput {
        diagnostics: classify(text),
        assertions: classify_assertions(text),
        counters: classify_counters(text),
    }
}

const LINT_CODES: &[&str] = &[
    "WIDTH",
    "UNUSED",
    "UNDRIVEN",
    "DECLFILENAME",
    "PINCONNECTEMPTY",
    "PINMISSING",
    "CASEINCOMPLETE",
    "CASEOVERLAP",
    "TIMESCALEMOD",
    "EOFNEWLINE",
    "VARHIDDEN",
    "GENUNNAMED",
    "INITIALDLY",
    "STMTDLY",
    "BLKSEQ",
    "COMBDLY",
    "LATCH",
    "MULTIDRIVEN",
    "SYNCASYNCNET",
    "IMPLICIT",
];

const ELABORATION_CODES: &[&str] = &[
    "PINNOTFOUND",
    "MODMISSING",
    "SELRANGE",
    "MULTITOP",
    "BLKLOOPINIT",
];

fn code_in(code: &str, family: &[&str]) -> bool {
    family.iter().any(|prefix| code.starts_with(prefix))
}

fn categorize(diagnostic: &Diagnostic) -> DiagnosticCategory {
    if let Some(code) = diagnostic.code.as_deref() {
        if code_in(code, ELABORATION_CODES) {
            return DiagnosticCategory::Elaboration;
        }
        if code_in(code, LINT_CODES) {
            return DiagnosticCategory::Lint;
        }
    }

    let message = diagnostic.message.to_ascii_lowercase();
    if ["syntax error", "unexpected", "unterminated", "expecting"]
        .iter()
        .any(|keyword| message.contains(keyword))
    {
        DiagnosticCategory::Syntax
    } else if [
        "cannot find",
        "not found",
        "can't find",
        "unsupported",
        "parameter",
        "instance",
        "pin ",
        "top module",
    ]
    .iter()
    .any(|keyword| message.contains(keyword))
    {
        DiagnosticCategory::Elaboration
    } else if diagnostic.severity == Severity::Warning
        || ["width", "unused", "undriven", "lint"]
            .iter()
            .any(|keyword| message.contains(keyword))
    {
        DiagnosticCategory::Lint
    } else {
        DiagnosticCategory::Other
    }
}

/// Warning classes that are safe to continue past.
pub const RECOVERABLE_WARNINGS: &[&str] = &[
    "WIDTH",
    "UNUSED",
    "UNDRIVEN",
    "DECLFILENAME",
    "PINCONNECTEMPTY",
    "CASEINCOMPLETE",
    "TIMESCALEMOD",
    "EOFNEWLINE",
    "VARHIDDEN",
    "GENUNNAMED",
    "INITIALDLY",
    "STMTDLY",
    "PINMISSING",
    "COVERIGN",
];

/// Whether `diagnostic` is a warning of a class that never invalidates a
/// build. `WIDTH` and `UNUSED` cover their suffixed variants, such as
/// `WIDTHTRUNC` and `UNUSEDSIGNAL`. Errors are never recoverable.
pub fn is_recoverable(diagnostic: &Diagnostic) -> bool {
    if diagnostic.severity == Severity::Error {
        return false;
    }
    if diagnostic.severity == Severity::Info {
        return true;
    }
    diagnostic.code.as_deref().is_some_and(|code| {
        code.starts_with("WIDTH")
            || code.starts_with("UNUSED")
            || RECOVERABLE_WARNINGS.contains(&code)
    })
}
