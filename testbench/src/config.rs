// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use std::{fmt, str::FromStr};

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

/// How much verification scaffolding a harness carries by default.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum TemplateStyle {
    #[default]
    Basic,
    /// Enables assertions, coverage and response checkers regardless of the
    /// individual flags.
    Advanced,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum StimulusStrategy {
    /// A handful of fixed vectors derived from the vector index.
    #[default]
    Directed,
    /// Uniformly random values from a seeded generator.
    Random,
    /// Random values biased towards all-zeros and all-ones.
    ConstrainedRandom,
    /// Protocol transaction sequences. Requires a protocol.
    Sequence,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum WaveformFormat {
    #[default]
    Vcd,
    Fst,
}

impl WaveformFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            WaveformFormat::Vcd => "vcd",
            WaveformFormat::Fst => "fst",
        }
    }
}

macro_rules! keyword_enum {
    ($name:ident { $($variant:ident => $text:literal),* $(,)? }) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(match self {
                    $($name::$variant => $text,)*
                })
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(text: &str) -> Result<Self, Self::Err> {
                match text {
                    $($text => Ok($name::$variant),)*
                    other => Err(format!(
                        "unknown {} `{}` (expected one of: {})",
                        stringify!($name),
                        other,
                        [$($text),*].join(", ")
                    )),
                }
            }
        }
    };
}

keyword_enum!(TemplateStyle {
    Basic => "basic",
    Advanced => "advanced",
});

keyword_enum!(StimulusStrategy {
    Directed => "directed",
    Random => "random",
    ConstrainedRandom => "constrained-random",
    Sequence => "sequence",
});

keyword_enum!(WaveformFormat {
    Vcd => "vcd",
    Fst => "fst",
});

/// Options for testbench synthesis. Every field has a default, so partial
/// `[generation]` tables deserialize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    pub template: TemplateStyle,

    /// A protocol name or alias from the registry, e.g. `apb` or `axis`.
    pub protocol: Option<String>,

    pub stimulus: StimulusStrategy,

    /// Clock period in timescale units.
    pub clock_period: u64,

    /// How many cycles of the bound clock each reset is held for.
    pub reset_cycles: u32,

    /// Watchdog limit in timescale units.
    pub duration: u64,

    pub seed: u64,

    pub assertions: bool,
    pub coverage: bool,
    pub checkers: bool,

    /// `None` disables waveform dumping.
    pub waveform: Option<WaveformFormat>,

    /// The `` `timescale `` directive, e.g. `1ns/1ps`.
    pub timescale: String,

    /// Where the harness should be written. Defaults to `tb_<module>.sv`
    /// under the output directory.
    pub output_path: Option<Utf8PathBuf>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            template: TemplateStyle::default(),
            protocol: None,
            stimulus: StimulusStrategy::default(),
            clock_period: 10,
            reset_cycles: 5,
            duration: 10_000,
            seed: 1,
            assertions: false,
            coverage: false,
            checkers: false,
            waveform: Some(WaveformFormat::Vcd),
            timescale: "1ns/1ps".into(),
            output_path: None,
        }
    }
}

impl GenerationConfig {
    pub fn assertions_enabled(&self) -> bool {
        self.assertions || self.template == TemplateStyle::Advanced
    }

    pub fn coverage_enabled(&self) -> bool {
        self.coverage || self.template == TemplateStyle::Advanced
    }

    pub fn checkers_enabled(&self) -> bool {
        self.checkers || self.template == TemplateStyle::Advanced
    }
}
