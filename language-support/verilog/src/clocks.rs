// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Clock and reset inference from port naming conventions.
//!
//! Both classifiers are scored rather than boolean so the cut-off is an
//! explicit, testable constant. Names are split into lowercase `_`-separated
//! segments; a port is a clock when a segment is a clock token (`clk`,
//! `clock`, `aclk`, `sysclk`, `clk2x`) and no segment marks it as a
//! clock-related control signal (`clk_en`, `clk_sel`). Resets are bound to
//! clocks by comparing the names left over after the clock and reset tokens
//! are removed.

use crate::{ClockDomain, Port, PortDirection, ResetPolarity, ResetSignal};

/// Minimum [`score_clock_name`] for a single-bit input to be treated as a
/// clock.
pub const CLOCK_CONFIDENCE_THRESHOLD: u8 = 60;

/// Minimum [`score_reset_binding`] for a reset to be bound to a clock.
pub const RESET_BINDING_THRESHOLD: u8 = 60;

const CLOCK_TOKENS: &[&str] = &["clk", "clock"];

/// Segments that turn a clock-looking name into a control signal.
const CLOCK_DISQUALIFIERS: &[&str] = &[
    "en", "ena", "enable", "sel", "select", "div", "divider", "gate", "cnt",
    "count", "mux", "req", "ack", "valid", "locked", "lock", "stable", "ok",
    "rdy", "ready", "cfg", "freq", "period", "edge", "stop",
];

/// Port direction markers that carry no domain information (`clk_i`,
/// `i_clk`).
const IO_MARKERS: &[&str] = &["i", "in", "o", "out"];

const RESET_BASES: &[&str] = &["rst", "reset"];

/// Prefixes allowed directly in front of a reset base within one segment.
/// `n` negates; the rest name the reset kind (`arst`, `sysrst`, `presetn`).
const RESET_PREFIXES: &[&str] = &[
    "", "n", "a", "s", "g", "h", "m", "p", "sys", "por", "core", "soft", "hard",
    "sync", "async", "global",
];

/// Suffixes allowed directly after a reset base within one segment.
const RESET_SUFFIXES: &[&str] = &["", "n", "b", "l", "ni", "i", "in"];

/// Segments that negate the reset they follow (`rst_n`, `reset_b`, `rst_ni`).
const NEGATION_MARKERS: &[&str] = &["n", "b", "l", "ni", "neg", "bar"];

fn segments(name: &str) -> Vec<String> {
    name.split('_')
        .filter(|segment| !segment.is_empty())
        .map(str::to_ascii_lowercase)
        .collect()
}

fn is_clock_token(segment: &str) -> bool {
    CLOCK_TOKENS.iter().any(|token| {
        if segment == *token {
            return true;
        }
        if let Some(prefix) = segment.strip_suffix(token) {
            // aclk, sysclk, hclk
            return !prefix.is_empty()
                && prefix.chars().all(|c| c.is_ascii_alphabetic());
        }
        if let Some(suffix) = segment.strip_prefix(token) {
            // clk2x, clk100
            return suffix.starts_with(|c: char| c.is_ascii_digit())
                && suffix.chars().all(|c| c.is_ascii_alphanumeric());
        }
        false
    })
}

/// Scores how strongly `name` reads as a clock, from 0 to 100.
///
/// - `clk`, `clock`, `clk_i`, `i_clk`: 100
/// - a segment that is exactly a clock token (`core_clk`, `clk_a`): 90
/// - a segment that embeds one (`aclk`, `sysclk`, `clk2x`): 70
/// - any other name merely containing `clk`: 30
/// - a clock control signal (`clk_en`, `clk_sel`) or anything else: 0
pub fn score_clock_name(name: &str) -> u8 {
    let segments = segments(name);
    if segments
        .iter()
        .any(|segment| CLOCK_DISQUALIFIERS.contains(&segment.as_str()))
    {
        return 0;
    }

    let significant = segments
        .iter()
        .filter(|segment| !IO_MARKERS.contains(&segment.as_str()))
        .collect::<Vec<_>>();

    if significant.len() == 1 && CLOCK_TOKENS.contains(&significant[0].as_str())
    {
        100
    } else if significant
        .iter()
        .any(|segment| CLOCK_TOKENS.contains(&segment.as_str()))
    {
        90
    } else if significant.iter().any(|segment| is_clock_token(segment)) {
        70
    } else if name.to_ascii_lowercase().contains("clk") {
        30
    } else {
        0
    }
}

/// Whether a segment names a reset, and if so whether it is negated.
fn classify_reset_segment(segment: &str) -> Option<bool> {
    for prefix in RESET_PREFIXES {
        let Some(rest) = segment.strip_prefix(prefix) else {
            continue;
        };
        for base in RESET_BASES {
            let Some(suffix) = rest.strip_prefix(base) else {
                continue;
            };
            if RESET_SUFFIXES.contains(&suffix) {
                let negated = *prefix == "n"
                    || matches!(suffix, "n" | "b" | "l" | "ni");
                return Some(negated);
            }
        }
    }
    None
}

struct ResetName {
    polarity: ResetPolarity,
    residual: Vec<String>,
}

fn analyze_reset(name: &str) -> Option<ResetName> {
    let segments = segments(name);
    let (index, mut negated) =
        segments.iter().enumerate().find_map(|(index, segment)| {
            classify_reset_segment(segment).map(|negated| (index, negated))
        })?;

    let mut residual = vec![];
    for (other_index, segment) in segments.iter().enumerate() {
        if other_index == index {
            continue;
        }
        if other_index > index && NEGATION_MARKERS.contains(&segment.as_str())
        {
            negated = true;
            continue;
        }
        if IO_MARKERS.contains(&segment.as_str()) {
            continue;
        }
        residual.push(segment.clone());
    }

    Some(ResetName {
        polarity: if negated {
            ResetPolarity::ActiveLow
        } else {
            ResetPolarity::ActiveHigh
        },
        residual,
    })
}

fn clock_residual(name: &str) -> Vec<String> {
    segments(name)
        .into_iter()
        .filter(|segment| {
            !is_clock_token(segment) && !IO_MARKERS.contains(&segment.as_str())
        })
        .collect()
}

/// Scores how well `reset_name` fits as the reset of `clock_name`, from 0 to
/// 100, returning the inferred polarity alongside.
///
/// - same residual name (`clk`/`rst_n`, `clk_a`/`rst_a_n`): 100
/// - overlapping residual names (`clk_core`/`core_sys_rst`): 75
/// - a reset with no residual name, i.e. a global reset: 60
/// - a reset that names some other domain, or is not a reset: 0
pub fn score_reset_binding(
    clock_name: &str,
    reset_name: &str,
) -> (u8, ResetPolarity) {
    let Some(reset) = analyze_reset(reset_name) else {
        return (0, ResetPolarity::ActiveHigh);
    };
    let clock = clock_residual(clock_name);

    let score = if clock == reset.residual {
        100
    } else if reset
        .residual
        .iter()
        .any(|segment| clock.contains(segment))
    {
        75
    } else if reset.residual.is_empty() {
        60
    } else {
        0
    };
    (score, reset.polarity)
}

fn is_single_bit_input(port: &Port) -> bool {
    port.direction == PortDirection::Input && port.is_scalar()
}

/// Derives clock domains from a port list, in clock declaration order.
///
/// Only single-bit inputs are considered. A clock without a reset scoring at
/// least [`RESET_BINDING_THRESHOLD`] gets no reset; one reset may serve
/// several clocks.
pub fn infer_clock_domains(ports: &[Port]) -> Vec<ClockDomain> {
    let clocks = ports
        .iter()
        .filter(|port| {
            is_single_bit_input(port)
                && score_clock_name(&port.name) >= CLOCK_CONFIDENCE_THRESHOLD
        })
        .collect::<Vec<_>>();

    clocks
        .iter()
        .map(|clock| {
            let mut best: Option<(u8, ResetSignal)> = None;
            for candidate in ports.iter().filter(|port| {
                is_single_bit_input(port)
                    && !clocks.iter().any(|clock| clock.name == port.name)
            }) {
                let (score, polarity) =
                    score_reset_binding(&clock.name, &candidate.name);
                if score < RESET_BINDING_THRESHOLD {
                    continue;
                }
                if best.as_ref().is_none_or(|(best_score, _)| score > *best_score)
                {
                    best = Some((
                        score,
                        ResetSignal {
                            port: candidate.name.clone(),
                            polarity,
                        },
                    ));
                }
            }

            if best.is_none() {
                log::debug!("no reset bound to clock `{}`", clock.name);
            }

            ClockDomain {
                clock: clock.name.clone(),
                reset: best.map(|(_, reset)| reset),
            }
        })
        .collect()
}
