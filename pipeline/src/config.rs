// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! `benchwright.toml`.

use std::{fs, io};

use benchwright_testbench::GenerationConfig;
use benchwright_verilator::{CompileConfig, VerilatorOptions};
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu, ensure};

pub const CONFIG_FILE_NAME: &str = "benchwright.toml";

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("Failed to read {path}"))]
    Read { path: Utf8PathBuf, source: io::Error },
    #[snafu(display("Failed to parse {path}"))]
    Parse {
        path: Utf8PathBuf,
        source: toml::de::Error,
    },
    #[snafu(display("Invalid source pattern `{pattern}`"))]
    Pattern {
        pattern: String,
        source: glob::PatternError,
    },
    #[snafu(display("Failed to expand source pattern `{pattern}`"))]
    Expand {
        pattern: String,
        source: glob::GlobError,
    },
    #[snafu(display("Source path {} is not valid UTF-8", path.display()))]
    NonUtf8Path { path: std::path::PathBuf },
    #[snafu(display("Source pattern `{pattern}` matched no files"))]
    NoMatches { pattern: String },
}

/// Where artifacts go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root of generated testbenches, `build/` and `runs/`.
    pub directory: Utf8PathBuf,
    /// Groups run directories: `<directory>/runs/<project>/`.
    pub project: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: "benchwright-out".into(),
            project: "default".into(),
        }
    }
}

/// The execute phase and the retry policy for launching processes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Synthesize a harness when `simulate` is given no testbench.
    pub auto_generate: bool,
    /// Deadline for one simulation executable.
    pub timeout_secs: Option<u64>,
    /// Per-stream ceiling on captured output, in bytes.
    pub output_limit: usize,
    /// Overrides `generation.seed` for `+verilator+seed+`.
    pub seed: Option<u64>,
    /// Extra `+plusargs` handed to the executable.
    pub plusargs: Vec<String>,
    /// Launch attempts when process creation fails transiently.
    pub launch_attempts: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            auto_generate: true,
            timeout_secs: Some(60),
            output_limit: benchwright_verilator::runner::DEFAULT_OUTPUT_LIMIT,
            seed: None,
            plusargs: vec![],
            launch_attempts: 3,
        }
    }
}

/// Everything `benchwright.toml` can set. Every key is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Glob patterns for design files, relative to the config file.
    pub sources: Vec<String>,
    pub toolchain: VerilatorOptions,
    pub output: OutputConfig,
    pub compile: CompileConfig,
    pub generation: GenerationConfig,
    pub run: RunConfig,
}

impl PipelineConfig {
    /// Parses `contents`; `path` is only used in error messages.
    pub fn parse(contents: &str, path: &Utf8Path) -> Result<Self, ConfigError> {
        toml::from_str(contents).context(ParseSnafu { path })
    }

    pub fn from_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).context(ReadSnafu { path })?;
        Self::parse(&contents, path)
    }

    /// Reads `benchwright.toml` from `directory`, or uses the defaults when
    /// there is none. A relative output directory is anchored at `directory`
    /// either way.
    pub fn load(directory: &Utf8Path) -> Result<Self, ConfigError> {
        let path = directory.join(CONFIG_FILE_NAME);
        let mut config = if path.is_file() {
            log::info!("reading configuration from {path}");
            Self::from_file(&path)?
        } else {
            log::debug!("no {path}; using default configuration");
            Self::default()
        };
        if config.output.directory.is_relative() {
            config.output.directory = directory.join(&config.output.directory);
        }
        Ok(config)
    }

    /// Expands [`PipelineConfig::sources`] against `base`.
    pub fn resolve_sources(
        &self,
        base: &Utf8Path,
    ) -> Result<Vec<Utf8PathBuf>, ConfigError> {
        expand_patterns(base, &self.sources)
    }
}

/// Expands each glob pattern relative to `base`. Every pattern has to match
/// at least one file; the result is sorted and free of duplicates.
pub fn expand_patterns<S: AsRef<str>>(
    base: &Utf8Path,
    patterns: &[S],
) -> Result<Vec<Utf8PathBuf>, ConfigError> {
    let mut files = vec![];
    for pattern in patterns {
        let pattern = pattern.as_ref();
        let absolute = if Utf8Path::new(pattern).is_absolute() {
            pattern.to_string()
        } else {
            base.join(pattern).to_string()
        };
        let before = files.len();
        for entry in glob::glob(&absolute).context(PatternSnafu { pattern })? {
            let path = entry.context(ExpandSnafu { pattern })?;
            if !path.is_file() {
                continue;
            }
            files.push(
                Utf8PathBuf::from_path_buf(path)
                    .map_err(|path| ConfigError::NonUtf8Path { path })?,
            );
        }
        ensure!(files.len() > before, NoMatchesSnafu { pattern });
    }
    files.sort();
    files.dedup();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use benchwright_testbench::{StimulusStrategy, TemplateStyle};
    use benchwright_verilator::TraceFormat;
    use snafu::{OptionExt, ResultExt, Whatever};

    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config =
            PipelineConfig::parse("", Utf8Path::new(CONFIG_FILE_NAME))
                .expect("parses");
        assert_eq!(config, PipelineConfig::default());
        assert!(config.run.auto_generate);
        assert!(config.compile.assertions);
        assert_eq!(config.toolchain.executable, "verilator");
    }

    #[test]
    fn every_table_is_read() {
        let config = PipelineConfig::parse(
            r#"
            sources = ["rtl/**/*.sv"]

            [toolchain]
            executable = "/opt/verilator/bin/verilator"
            ignored_warnings = ["UNUSED"]

            [output]
            directory = "out"
            project = "alu"

            [compile]
            optimization = 2
            trace = "fst"
            coverage = true
            defines = { SIM = "", DEPTH = "4" }

            [generation]
            template = "advanced"
            stimulus = "random"
            seed = 9

            [run]
            timeout_secs = 5
            plusargs = ["+verbose"]
            "#,
            Utf8Path::new(CONFIG_FILE_NAME),
        )
        .expect("parses");

        assert_eq!(config.sources, ["rtl/**/*.sv"]);
        assert_eq!(config.toolchain.ignored_warnings, ["UNUSED"]);
        assert_eq!(config.output.project, "alu");
        assert_eq!(config.compile.trace, Some(TraceFormat::Fst));
        assert_eq!(config.compile.defines.len(), 2);
        assert_eq!(config.generation.template, TemplateStyle::Advanced);
        assert_eq!(config.generation.stimulus, StimulusStrategy::Random);
        assert_eq!(config.generation.seed, 9);
        assert_eq!(config.run.timeout_secs, Some(5));
        assert_eq!(config.run.launch_attempts, 3);
    }

    #[test]
    fn unknown_enum_values_are_parse_errors() {
        let result = PipelineConfig::parse(
            "[generation]\nstimulus = \"exhaustive\"\n",
            Utf8Path::new(CONFIG_FILE_NAME),
        );
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    #[snafu::report]
    fn load_and_expand_sources() -> Result<(), Whatever> {
        let scratch = tempfile::tempdir().whatever_context("tempdir")?;
        let root = Utf8Path::from_path(scratch.path())
            .whatever_context("utf8 tempdir")?;

        let defaults = PipelineConfig::load(root)
            .whatever_context("missing file is fine")?;
        assert_eq!(defaults.output.directory, root.join("benchwright-out"));
        assert_eq!(defaults.compile, CompileConfig::default());

        fs::create_dir_all(root.join("rtl/sub"))
            .whatever_context("create rtl")?;
        for file in ["rtl/b.sv", "rtl/a.sv", "rtl/sub/c.sv", "rtl/notes.txt"] {
            fs::write(root.join(file), "").whatever_context("write")?;
        }
        fs::write(
            root.join(CONFIG_FILE_NAME),
            "sources = [\"rtl/**/*.sv\", \"rtl/a.sv\"]\n",
        )
        .whatever_context("write config")?;

        let config =
            PipelineConfig::load(root).whatever_context("loads config")?;
        assert_eq!(config.output.directory, root.join("benchwright-out"));
        let sources = config
            .resolve_sources(root)
            .whatever_context("expands")?;
        assert_eq!(sources, [
            root.join("rtl/a.sv"),
            root.join("rtl/b.sv"),
            root.join("rtl/sub/c.sv"),
        ]);

        assert!(matches!(
            expand_patterns(root, &["rtl/*.vhd"]),
            Err(ConfigError::NoMatches { .. })
        ));
        Ok(())
    }
}
