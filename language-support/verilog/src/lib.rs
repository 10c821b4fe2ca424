// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Declaration-level interface extraction for (System)Verilog modules.
//!
//! This is not a parser. It locates a module header with a bracket-aware
//! scanner and recovers enough of the port list to drive testbench
//! synthesis: directions, widths, unpacked dimensions, parameters and a
//! best-effort clock/reset topology. Input that is well formed but
//! semantically partial (for example, widths that depend on parameters)
//! still extracts; the affected fields are marked as approximate.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod clocks;
mod extract;
mod scan;
mod width;

pub use clocks::{
    CLOCK_CONFIDENCE_THRESHOLD, RESET_BINDING_THRESHOLD, infer_clock_domains,
    score_clock_name, score_reset_binding,
};
pub use extract::{ExtractError, extract};
pub use width::PARAMETERIZED_WIDTH_FALLBACK;

/// <https://www.digikey.com/en/maker/blogs/2024/verilog-ports-part-7-of-our-verilog-journey>
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortDirection {
    Input,
    Output,
    Inout,
}

impl fmt::Display for PortDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            PortDirection::Input => "input",
            PortDirection::Output => "output",
            PortDirection::Inout => "inout",
        })
    }
}

/// Whether a port is declared as a net or as a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ElementType {
    /// `wire`, `tri`, or no storage keyword at all.
    WireLike,
    /// `reg`, `logic`, `bit`, `var`, integer atoms and user-defined types.
    RegisterLike,
}

/// A single port on a module boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    pub name: String,
    pub direction: PortDirection,

    /// Total packed width in bits, always at least 1. When `width_exact` is
    /// false this is [`PARAMETERIZED_WIDTH_FALLBACK`] (or a product involving
    /// it) rather than the real width.
    pub width: usize,

    /// Whether `width` was computed from literal ranges only.
    pub width_exact: bool,

    /// The packed ranges exactly as written, brackets included, e.g.
    /// `[WIDTH-1:0]`.
    pub packed_range: Option<String>,

    pub element_type: ElementType,

    /// The data type keyword as written (`logic`, `reg`, `my_pkg::word_t`).
    pub data_type: Option<String>,

    pub signed: bool,

    /// Unpacked dimensions, outermost first.
    pub array_dimensions: Option<Vec<usize>>,

    /// The unpacked dimensions exactly as written, e.g. `[0:3]`.
    pub unpacked_range: Option<String>,
}

impl Port {
    /// A single-bit port with no unpacked dimensions.
    pub fn is_scalar(&self) -> bool {
        self.width == 1 && self.array_dimensions.is_none()
    }

    /// Renders the port as an ANSI port declaration, e.g. `input logic [7:0]
    /// data [0:3]`.
    pub fn to_declaration(&self) -> String {
        let mut declaration = self.direction.to_string();
        if let Some(data_type) = &self.data_type {
            declaration.push(' ');
            declaration.push_str(data_type);
        }
        if self.signed {
            declaration.push_str(" signed");
        }
        if let Some(range) = &self.packed_range {
            declaration.push(' ');
            declaration.push_str(range);
        }
        declaration.push(' ');
        declaration.push_str(&self.name);
        if let Some(range) = &self.unpacked_range {
            declaration.push(' ');
            declaration.push_str(range);
        }
        declaration
    }
}

/// A module parameter. The default value is kept as opaque source text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub declared_type: Option<String>,
    pub default_value: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResetPolarity {
    ActiveHigh,
    ActiveLow,
}

impl ResetPolarity {
    /// The single-bit literal that holds the design in reset.
    pub fn asserted(&self) -> &'static str {
        match self {
            ResetPolarity::ActiveHigh => "1'b1",
            ResetPolarity::ActiveLow => "1'b0",
        }
    }

    /// The single-bit literal that releases reset.
    pub fn deasserted(&self) -> &'static str {
        match self {
            ResetPolarity::ActiveHigh => "1'b0",
            ResetPolarity::ActiveLow => "1'b1",
        }
    }
}

impl fmt::Display for ResetPolarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            ResetPolarity::ActiveHigh => "active-high",
            ResetPolarity::ActiveLow => "active-low",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResetSignal {
    pub port: String,
    pub polarity: ResetPolarity,
}

/// A clock input plus the reset that was heuristically bound to it, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockDomain {
    pub clock: String,
    pub reset: Option<ResetSignal>,
}

/// The parsed shape of one hardware module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInterface {
    pub name: String,
    pub ports: Vec<Port>,
    /// Declaration order is preserved so regeneration is deterministic.
    pub parameters: Vec<Parameter>,
    pub clock_domains: Vec<ClockDomain>,
}

impl ModuleInterface {
    pub fn port(&self, name: &str) -> Option<&Port> {
        self.ports.iter().find(|port| port.name == name)
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters
            .iter()
            .find(|parameter| parameter.name == name)
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Port> {
        self.ports
            .iter()
            .filter(|port| port.direction == PortDirection::Input)
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Port> {
        self.ports
            .iter()
            .filter(|port| port.direction == PortDirection::Output)
    }

    /// Whether `name` is the clock or the bound reset of some clock domain.
    /// Such ports are driven exclusively by the clock and reset blocks.
    pub fn is_clock_or_reset(&self, name: &str) -> bool {
        self.clock_domains.iter().any(|domain| {
            domain.clock == name
                || domain
                    .reset
                    .as_ref()
                    .is_some_and(|reset| reset.port == name)
        })
    }

    /// Renders an ANSI module header that declares the same ports and
    /// parameters.
    pub fn to_header(&self) -> String {
        let mut header = format!("module {}", self.name);
        if !self.parameters.is_empty() {
            let parameters = self
                .parameters
                .iter()
                .map(|parameter| {
                    let mut text = String::from("parameter ");
                    if let Some(declared_type) = &parameter.declared_type {
                        text.push_str(declared_type);
                        text.push(' ');
                    }
                    text.push_str(&parameter.name);
                    if let Some(default_value) = &parameter.default_value {
                        text.push_str(" = ");
                        text.push_str(default_value);
                    }
                    text
                })
                .collect::<Vec<_>>();
            header.push_str(" #(\n    ");
            header.push_str(&parameters.join(",\n    "));
            header.push_str("\n)");
        }
        if self.ports.is_empty() {
            header.push(';');
            return header;
        }
        let ports = self
            .ports
            .iter()
            .map(Port::to_declaration)
            .collect::<Vec<_>>();
        header.push_str(" (\n    ");
        header.push_str(&ports.join(",\n    "));
        header.push_str("\n);");
        header
    }
}
