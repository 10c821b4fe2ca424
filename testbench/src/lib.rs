// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Testbench synthesis: turns a [`ModuleInterface`] into a self-checking
//! SystemVerilog harness that Verilator can build with `--binary`.
//!
//! Synthesis is a pure function of its inputs. Two calls with equal
//! interfaces and configs produce byte-identical source, which the pipeline
//! relies on for cache keys.

use std::fmt;

use benchwright_verilog::ModuleInterface;
use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu, ensure};

mod config;
mod emit;
pub mod protocol;

pub use config::{
    GenerationConfig, StimulusStrategy, TemplateStyle, WaveformFormat,
};
pub use emit::{
    COVERAGE_WIDTH_LIMIT, DIRECTED_VECTORS, RANDOM_ITERATIONS, SEQUENCE_LENGTH,
};

use emit::Harness;
use protocol::ProtocolBinding;

/// A block of the generated harness. [`GeneratedArtifact::features`] lists
/// the blocks actually emitted, in emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Feature {
    Header,
    Declarations,
    Instantiation,
    Clocks,
    Resets,
    ProtocolTasks,
    Stimulus,
    Checkers,
    Assertions,
    Coverage,
    Waveform,
    Termination,
}

/// A synthesized harness and the inputs it was synthesized from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    /// The harness module name, `tb_<module>`.
    pub module_name: String,
    pub source: String,
    pub interface: ModuleInterface,
    pub config: GenerationConfig,
    pub features: Vec<Feature>,
    /// Relative paths are resolved against the output directory by whoever
    /// persists the artifact.
    pub output_path: Utf8PathBuf,
}

impl GeneratedArtifact {
    pub fn has_feature(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }
}

#[derive(Debug, Snafu)]
pub enum SynthesizeError {
    #[snafu(display("Invalid generation config: {reason}"))]
    InvalidConfig { reason: String },
    #[snafu(display("Failed to format testbench for module {module}"))]
    Format { module: String, source: fmt::Error },
}

fn resolve_protocol<'a>(
    interface: &'a ModuleInterface,
    config: &GenerationConfig,
) -> Option<ProtocolBinding<'a>> {
    let name = config.protocol.as_deref()?;
    let Some(template) = protocol::lookup(name) else {
        log::warn!(
            "unknown protocol `{name}` for `{}`; using generic stimulus",
            interface.name
        );
        return None;
    };
    if interface.clock_domains.is_empty() {
        log::warn!(
            "protocol `{}` needs a clock but `{}` has none; using generic stimulus",
            template.name,
            interface.name
        );
        return None;
    }
    match template.bind(interface) {
        Ok(binding) if !binding.available().is_empty() => {
            log::debug!(
                "bound protocol `{}` on `{}`: {:?}",
                template.name,
                interface.name,
                binding
                    .ports
                    .iter()
                    .map(|(role, port)| format!("{role}={}", port.name))
                    .collect::<Vec<_>>()
            );
            Some(binding)
        }
        Ok(_) => {
            log::warn!(
                "protocol `{}` bound on `{}` but no transaction is usable; using generic stimulus",
                template.name,
                interface.name
            );
            None
        }
        Err(missing) => {
            log::warn!(
                "protocol `{}` cannot bind roles {} on `{}`; using generic stimulus",
                template.name,
                missing.join(", "),
                interface.name
            );
            None
        }
    }
}

/// Synthesizes a harness for `interface`.
///
/// Unknown protocols and protocols whose required roles do not bind degrade
/// to generic stimulus with a warning; only an unusable config is an error.
pub fn synthesize(
    interface: &ModuleInterface,
    config: &GenerationConfig,
) -> Result<GeneratedArtifact, SynthesizeError> {
    ensure!(
        config.clock_period > 0,
        InvalidConfigSnafu {
            reason: "`clock_period` must be positive"
        }
    );
    ensure!(
        config.duration > 0,
        InvalidConfigSnafu {
            reason: "`duration` must be positive"
        }
    );
    ensure!(
        !config.timescale.trim().is_empty(),
        InvalidConfigSnafu {
            reason: "`timescale` must not be empty"
        }
    );

    let binding = resolve_protocol(interface, config);
    let harness = Harness::new(interface, config, binding);

    let mut source = String::new();
    let features = harness.emit(&mut source).context(FormatSnafu {
        module: interface.name.clone(),
    })?;

    let module_name = harness.name();
    let output_path = config
        .output_path
        .clone()
        .unwrap_or_else(|| Utf8PathBuf::from(format!("{module_name}.sv")));

    log::debug!(
        "synthesized {} ({} bytes, features {:?})",
        module_name,
        source.len(),
        features
    );

    Ok(GeneratedArtifact {
        module_name,
        source,
        interface: interface.clone(),
        config: config.clone(),
        features,
        output_path,
    })
}
