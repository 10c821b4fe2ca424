// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use std::{
    fs, io,
    sync::{
        Arc, LazyLock, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use benchwright_testbench::{
    GeneratedArtifact, GenerationConfig, WaveformFormat, synthesize,
};
use benchwright_verilator::{
    AssertionResult, CompileConfig, Counters, Diagnostic, ProcessOutput,
    RetryPolicy, RunError, RunOptions, Severity, ToolchainInfo, TraceFormat,
    classify, classify_output,
    command::{build_descriptor_path, compile_arguments, executable_path},
    run_with_retry,
};
use benchwright_verilog::{ExtractError, extract};
use camino::{Utf8Path, Utf8PathBuf};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, ensure};
use xxhash_rust::xxh3::xxh3_64;

use crate::{
    cache::{ArtifactStore, CacheKey},
    config::PipelineConfig,
    error::{
        CacheKeySnafu, Failure, IoSnafu, MalformedInputSnafu, NotFoundSnafu,
        Phase, PipelineError, SynthesisSnafu, ToolDiagnosticSnafu,
        UnsupportedToolchainSnafu,
    },
    run_dir::RunDirectory,
    state::{RunState, Transition},
};

/// What one compilation produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileOutcome {
    /// Exit code zero, no error diagnostic, the executable and build
    /// descriptor both present, and (with `warnings_as_errors`) no
    /// unrecoverable warning.
    pub success: bool,
    pub diagnostics: Vec<Diagnostic>,
    pub produced_artifact_path: Option<Utf8PathBuf>,
    pub build_directory: Utf8PathBuf,
    pub log_path: Utf8PathBuf,
    pub cache_key: CacheKey,
    /// Served from the artifact store without invoking Verilator.
    pub cached: bool,
    pub exit_code: Option<i32>,
    pub duration: Duration,
}

/// What one run of a simulation executable produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteOutcome {
    /// Exit code zero, no error diagnostic and no failed assertion.
    pub passed: bool,
    pub exit_code: Option<i32>,
    pub wall_clock_duration: Duration,
    pub diagnostics: Vec<Diagnostic>,
    pub assertion_results: Vec<AssertionResult>,
    pub counters: Counters,
    pub run_directory: Utf8PathBuf,
    pub log_path: Utf8PathBuf,
    pub waveform_path: Option<Utf8PathBuf>,
    pub coverage_path: Option<Utf8PathBuf>,
}

/// Inputs to [`Orchestrator::simulate`]. Everything else comes from the
/// orchestrator's [`PipelineConfig`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulateRequest {
    pub design: Vec<Utf8PathBuf>,
    /// The design module under test.
    pub module: String,
    /// A hand-written testbench, compiled instead of a synthesized one.
    pub testbench: Option<Utf8PathBuf>,
    /// Top module of `testbench`; defaults to its file stem.
    pub testbench_top: Option<String>,
    /// An already-built executable. Skips testbench resolution and
    /// compilation entirely.
    pub prebuilt: Option<Utf8PathBuf>,
}

/// The record of one [`Orchestrator::simulate`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub module: String,
    /// Either [`RunState::Done`] or [`RunState::Failed`].
    pub state: RunState,
    pub transitions: Vec<Transition>,
    pub testbench: Option<GeneratedArtifact>,
    pub compile: Option<CompileOutcome>,
    pub execute: Option<ExecuteOutcome>,
    pub failure: Option<Failure>,
}

impl PipelineResult {
    pub fn passed(&self) -> bool {
        self.state == RunState::Done
            && self.execute.as_ref().is_some_and(|execute| execute.passed)
    }
}

struct Run {
    result: PipelineResult,
    start: Instant,
}

impl Run {
    fn new(module: &str) -> Self {
        Self {
            result: PipelineResult {
                module: module.to_string(),
                state: RunState::Idle,
                transitions: vec![],
                testbench: None,
                compile: None,
                execute: None,
                failure: None,
            },
            start: Instant::now(),
        }
    }

    fn advance(&mut self, next: RunState) {
        let from = self.result.state;
        debug_assert!(
            from.can_transition_to(next),
            "invalid transition {from} -> {next}"
        );
        log::info!("{}: {from} -> {next}", self.result.module);
        self.result.transitions.push(Transition {
            from,
            to: next,
            elapsed: self.start.elapsed(),
        });
        self.result.state = next;
    }

    fn fail(&mut self, error: &PipelineError) {
        log::warn!("{} failed: {error}", self.result.module);
        self.result.failure = Some(error.into());
        self.advance(RunState::Failed);
    }
}

#[derive(Default)]
struct BuildDirectoryLock;

/// The file_guard handles locking across processes, but does not guarantee
/// locking between threads in one process.
static THREAD_LOCK: LazyLock<
    DashMap<Utf8PathBuf, Arc<Mutex<BuildDirectoryLock>>>,
> = LazyLock::new(DashMap::default);

/// Distinguishes scratch files written by concurrent generations.
static SCRATCH_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Writes through a scratch file and a rename, so a concurrent reader sees
/// either the old contents or the new ones.
fn write_atomically(path: &Utf8Path, contents: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let scratch = Utf8PathBuf::from(format!(
        "{path}.{}-{}.tmp",
        std::process::id(),
        SCRATCH_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::write(&scratch, contents)?;
    fs::rename(&scratch, path).inspect_err(|_| {
        let _ = fs::remove_file(&scratch);
    })
}

fn read_design(path: &Utf8Path) -> Result<String, PipelineError> {
    fs::read_to_string(path).map_err(|source| {
        if source.kind() == io::ErrorKind::NotFound {
            PipelineError::NotFound {
                what: format!("design file {path}"),
            }
        } else {
            PipelineError::Io {
                path: path.to_owned(),
                source,
            }
        }
    })
}

/// Sequences testbench generation, compilation and execution against one
/// probed toolchain.
pub struct Orchestrator {
    toolchain: ToolchainInfo,
    config: PipelineConfig,
    store: Option<Arc<dyn ArtifactStore>>,
}

impl Orchestrator {
    /// `toolchain` is probed once by the caller; the orchestrator never
    /// re-discovers it.
    pub fn new(toolchain: ToolchainInfo, config: PipelineConfig) -> Self {
        Self {
            toolchain,
            config,
            store: None,
        }
    }

    /// Serves repeated compilations of unchanged inputs from `store`.
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn toolchain(&self) -> &ToolchainInfo {
        &self.toolchain
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.config.run.launch_attempts.max(1),
            ..Default::default()
        }
    }

    /// Extracts `module_name` from `target_source`, synthesizes a harness for
    /// it and writes the harness under the output directory. The returned
    /// artifact's `output_path` is where it was written.
    pub fn generate_testbench(
        &self,
        target_source: &Utf8Path,
        module_name: &str,
        config: &GenerationConfig,
    ) -> Result<GeneratedArtifact, PipelineError> {
        let artifact =
            self.synthesize_harness(target_source, module_name, config)?;
        let output_path = if artifact.output_path.is_relative() {
            self.config.output.directory.join(&artifact.output_path)
        } else {
            artifact.output_path.clone()
        };
        self.write_harness(artifact, output_path)
    }

    fn synthesize_harness(
        &self,
        target_source: &Utf8Path,
        module_name: &str,
        config: &GenerationConfig,
    ) -> Result<GeneratedArtifact, PipelineError> {
        let text = read_design(target_source)?;
        let interface =
            extract(&text, module_name).map_err(|error| match error {
                ExtractError::NotFound { module } => PipelineError::NotFound {
                    what: format!("module `{module}` in {target_source}"),
                },
                ExtractError::Malformed { .. } => {
                    PipelineError::MalformedInput {
                        reason: format!("{error} (in {target_source})"),
                    }
                }
            })?;
        synthesize(&interface, config).context(SynthesisSnafu)
    }

    fn write_harness(
        &self,
        artifact: GeneratedArtifact,
        output_path: Utf8PathBuf,
    ) -> Result<GeneratedArtifact, PipelineError> {
        write_atomically(&output_path, &artifact.source)
            .context(IoSnafu { path: &output_path })?;
        log::info!("generated {} at {output_path}", artifact.module_name);

        Ok(GeneratedArtifact {
            output_path,
            ..artifact
        })
    }

    /// Where a harness synthesized during [`Orchestrator::simulate`] lands.
    /// Without an explicit `output_path` the directory is named by the
    /// harness contents, so orchestrators sharing an output directory never
    /// overwrite each other's harness.
    fn harness_path(&self, artifact: &GeneratedArtifact) -> Utf8PathBuf {
        if self.config.generation.output_path.is_some() {
            return if artifact.output_path.is_relative() {
                self.config.output.directory.join(&artifact.output_path)
            } else {
                artifact.output_path.clone()
            };
        }
        let file_name = artifact
            .output_path
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}.sv", artifact.module_name));
        self.config
            .output
            .directory
            .join("generated")
            .join(format!("{:016x}", xxh3_64(artifact.source.as_bytes())))
            .join(file_name)
    }

    fn locate_module(
        &self,
        design: &[Utf8PathBuf],
        module: &str,
    ) -> Result<Utf8PathBuf, PipelineError> {
        for path in design {
            let text = read_design(path)?;
            match extract(&text, module) {
                Ok(_) => return Ok(path.clone()),
                Err(ExtractError::NotFound { .. }) => {}
                Err(error @ ExtractError::Malformed { .. }) => {
                    return MalformedInputSnafu {
                        reason: format!("{error} (in {path})"),
                    }
                    .fail();
                }
            }
        }
        NotFoundSnafu {
            what: format!(
                "module `{module}` in {} design file(s)",
                design.len()
            ),
        }
        .fail()
    }

    fn cached_outcome(&self, key: &CacheKey) -> Option<CompileOutcome> {
        let store = self.store.as_ref()?;
        let bytes = match store.get(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                log::debug!("build cache miss for {key}");
                return None;
            }
            Err(error) => {
                log::warn!("artifact store lookup for {key} failed: {error}");
                return None;
            }
        };

        let outcome = serde_json::from_slice::<CompileOutcome>(&bytes)
            .inspect_err(|error| {
                log::warn!("discarding unreadable cache entry {key}: {error}")
            })
            .ok()
            .filter(|outcome| {
                outcome
                    .produced_artifact_path
                    .as_ref()
                    .is_some_and(|path| path.is_file())
            });
        match outcome {
            Some(outcome) => {
                log::debug!("build cache hit for {key}");
                Some(CompileOutcome {
                    cached: true,
                    ..outcome
                })
            }
            None => {
                log::debug!("invalidating stale build cache entry {key}");
                if let Err(error) = store.invalidate(key) {
                    log::warn!("failed to invalidate {key}: {error}");
                }
                None
            }
        }
    }

    fn store_outcome(&self, key: &CacheKey, outcome: &CompileOutcome) {
        let Some(store) = &self.store else {
            return;
        };
        let stored = serde_json::to_vec(outcome)
            .map_err(|error| error.to_string())
            .and_then(|bytes| {
                store.set(key, bytes).map_err(|error| error.to_string())
            });
        if let Err(error) = stored {
            log::warn!("failed to store build outcome {key}: {error}");
        }
    }

    /// Builds `files` into a simulation executable with `verilator --binary`.
    ///
    /// A build the toolchain rejects is `Ok` with `success == false` and the
    /// full diagnostic list; `Err` is reserved for failures of the pipeline
    /// itself.
    pub fn compile(
        &self,
        files: &[Utf8PathBuf],
        config: &CompileConfig,
    ) -> Result<CompileOutcome, PipelineError> {
        ensure!(
            self.toolchain.supports_binary,
            UnsupportedToolchainSnafu {
                executable: &self.toolchain.executable,
                banner: &self.toolchain.banner,
            }
        );
        ensure!(
            !config.top_module.is_empty(),
            MalformedInputSnafu {
                reason: "the compile configuration names no top module"
            }
        );
        ensure!(
            !files.is_empty(),
            MalformedInputSnafu {
                reason: "there is nothing to compile"
            }
        );
        for file in files {
            ensure!(
                file.is_file(),
                NotFoundSnafu {
                    what: format!("input file {file}")
                }
            );
        }

        let key = CacheKey::compute(files, config, &self.config.toolchain)
            .context(CacheKeySnafu)?;
        if let Some(outcome) = self.cached_outcome(&key) {
            return Ok(outcome);
        }

        let build_directory = key.build_directory(&self.config.output.directory);
        fs::create_dir_all(&build_directory)
            .context(IoSnafu {
                path: &build_directory,
            })?;

        // # Safety
        // concurrent Verilator runs in one Mdir clobber each other's
        // generated sources, so the build directory is locked
        let thread_mutex = THREAD_LOCK
            .entry(build_directory.clone())
            .or_default()
            .clone();
        let _thread_lock =
            thread_mutex.lock().unwrap_or_else(PoisonError::into_inner);

        let lock_path = build_directory.with_extension("lock");
        let lock_file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&lock_path)
            .context(IoSnafu { path: &lock_path })?;
        let _file_lock =
            file_guard::lock(&lock_file, file_guard::Lock::Exclusive, 0, 1)
                .context(IoSnafu { path: &lock_path })?;

        // another thread may have finished this build while we waited
        if let Some(outcome) = self.cached_outcome(&key) {
            return Ok(outcome);
        }

        log::info!(
            "compiling `{}` from {} file(s) in {build_directory}",
            config.top_module,
            files.len()
        );
        let args = compile_arguments(
            &self.config.toolchain,
            config,
            &build_directory,
            files,
        );
        let run_options = RunOptions {
            timeout: config.timeout_secs.map(Duration::from_secs),
            output_limit: self.config.run.output_limit,
            ..Default::default()
        };
        let output = run_with_retry(
            &self.toolchain.executable,
            &args[..],
            &run_options,
            self.retry_policy(),
            RunError::is_transient_launch,
        )
        .map_err(|error| PipelineError::from_run(Phase::Compile, error))?;

        let combined = output.combined();
        let log_path = build_directory.join("compile.log");
        fs::write(&log_path, &combined).context(IoSnafu { path: &log_path })?;

        let diagnostics = classify(&combined);
        let executable = executable_path(&build_directory, &config.top_module);
        let produced = executable.is_file()
            && build_descriptor_path(&build_directory, &config.top_module)
                .is_file();
        if output.success() && !produced {
            log::warn!(
                "`{}` exited cleanly but left no {executable}",
                self.toolchain.executable
            );
        }
        let has_errors = diagnostics.iter().any(Diagnostic::is_error);
        let blocking_warnings = config.warnings_as_errors
            && diagnostics.iter().any(|diagnostic| {
                diagnostic.severity == Severity::Warning
                    && !diagnostic.is_recoverable()
            });
        let success =
            output.success() && produced && !has_errors && !blocking_warnings;

        let outcome = CompileOutcome {
            success,
            diagnostics,
            produced_artifact_path: produced.then_some(executable),
            build_directory,
            log_path,
            cache_key: key.clone(),
            cached: false,
            exit_code: output.exit_code,
            duration: output.duration,
        };
        if success {
            self.store_outcome(&key, &outcome);
        } else {
            log::warn!(
                "compilation of `{}` failed with {} diagnostic(s)",
                config.top_module,
                outcome.diagnostics.len()
            );
        }
        Ok(outcome)
    }

    /// Runs the whole pipeline for one module. Never fails: every failure is
    /// recorded in [`PipelineResult::failure`] with the run in
    /// [`RunState::Failed`].
    pub fn simulate(&self, request: &SimulateRequest) -> PipelineResult {
        let mut run = Run::new(&request.module);
        if let Err(error) = self.drive(&mut run, request) {
            run.fail(&error);
        }
        run.result
    }

    fn drive(
        &self,
        run: &mut Run,
        request: &SimulateRequest,
    ) -> Result<(), PipelineError> {
        let executable = match &request.prebuilt {
            Some(prebuilt) => {
                ensure!(
                    prebuilt.is_file(),
                    NotFoundSnafu {
                        what: format!("prebuilt executable {prebuilt}")
                    }
                );
                run.advance(RunState::Executing);
                prebuilt.clone()
            }
            None => {
                run.advance(RunState::ResolvingTestbench);
                let (testbench, top_module) =
                    self.resolve_testbench(run, request)?;

                run.advance(RunState::Compiling);
                let mut sources = request.design.clone();
                sources.push(testbench);
                let mut config = CompileConfig {
                    top_module,
                    ..self.config.compile.clone()
                };
                if run.result.testbench.is_some() {
                    // a synthesized harness dumps exactly the configured
                    // waveform, and `$dumpvars` needs a tracing build
                    let trace = trace_format(self.config.generation.waveform);
                    if trace != config.trace {
                        log::debug!(
                            "tracing as {trace:?} to match the harness"
                        );
                    }
                    config.trace = trace;
                }
                let outcome = self.compile(&sources, &config)?;
                run.result.compile = Some(outcome.clone());
                ensure!(
                    outcome.success,
                    ToolDiagnosticSnafu {
                        phase: Phase::Compile,
                        diagnostics: outcome.diagnostics,
                    }
                );
                let executable = outcome.produced_artifact_path.context(
                    NotFoundSnafu {
                        what: "the compiled executable",
                    },
                )?;
                run.advance(RunState::Executing);
                executable
            }
        };

        let (directory, output) = self.execute(&executable, &request.module)?;

        run.advance(RunState::Classifying);
        run.result.execute = Some(classify_run(&directory, &output));
        run.advance(RunState::Done);
        Ok(())
    }

    fn resolve_testbench(
        &self,
        run: &mut Run,
        request: &SimulateRequest,
    ) -> Result<(Utf8PathBuf, String), PipelineError> {
        if let Some(testbench) = &request.testbench {
            ensure!(
                testbench.is_file(),
                NotFoundSnafu {
                    what: format!("testbench {testbench}")
                }
            );
            let top_module = request
                .testbench_top
                .clone()
                .or_else(|| testbench.file_stem().map(str::to_string))
                .context(MalformedInputSnafu {
                    reason: format!("cannot name the top module of {testbench}"),
                })?;
            log::debug!("using supplied testbench {testbench} ({top_module})");
            return Ok((testbench.clone(), top_module));
        }

        ensure!(
            self.config.run.auto_generate,
            MalformedInputSnafu {
                reason: "no testbench was supplied and auto-generation is disabled"
            }
        );
        let source = self.locate_module(&request.design, &request.module)?;
        let artifact = self.synthesize_harness(
            &source,
            &request.module,
            &self.config.generation,
        )?;
        let output_path = self.harness_path(&artifact);
        let artifact = self.write_harness(artifact, output_path)?;
        let resolved = (artifact.output_path.clone(), artifact.module_name.clone());
        run.result.testbench = Some(artifact);
        Ok(resolved)
    }

    fn execute(
        &self,
        executable: &Utf8Path,
        module: &str,
    ) -> Result<(RunDirectory, ProcessOutput), PipelineError> {
        // the run directory becomes the working directory
        let executable = executable
            .canonicalize_utf8()
            .context(IoSnafu { path: executable })?;
        let output_directory = &self.config.output.directory;
        let directory = RunDirectory::create(
            output_directory,
            &self.config.output.project,
            module,
        )
        .context(IoSnafu {
            path: output_directory,
        })?;

        let seed = self.config.run.seed.unwrap_or(self.config.generation.seed);
        let mut args = vec![format!("+verilator+seed+{seed}")];
        if self.config.compile.coverage {
            if let Some(name) = directory.coverage_path().file_name() {
                args.push(format!("+verilator+coverage+file+{name}"));
            }
        }
        args.extend(self.config.run.plusargs.iter().cloned());

        let run_options = RunOptions {
            timeout: self.config.run.timeout_secs.map(Duration::from_secs),
            working_directory: Some(directory.path().to_owned()),
            output_limit: self.config.run.output_limit,
            ..Default::default()
        };
        log::info!("running {executable} in {}", directory.path());
        let result = run_with_retry(
            executable.as_str(),
            &args[..],
            &run_options,
            self.retry_policy(),
            RunError::is_transient_launch,
        );

        let log_path = directory.log_path();
        match result {
            Ok(output) => {
                fs::write(&log_path, output.combined())
                    .context(IoSnafu { path: &log_path })?;
                Ok((directory, output))
            }
            Err(error) => {
                if let RunError::Timeout { partial, .. } = &error {
                    if let Err(write_error) =
                        fs::write(&log_path, partial.combined())
                    {
                        log::warn!(
                            "failed to save partial output to {log_path}: {write_error}"
                        );
                    }
                }
                Err(PipelineError::from_run(Phase::Execute, error))
            }
        }
    }
}

fn trace_format(waveform: Option<WaveformFormat>) -> Option<TraceFormat> {
    waveform.map(|format| match format {
        WaveformFormat::Vcd => TraceFormat::Vcd,
        WaveformFormat::Fst => TraceFormat::Fst,
    })
}

fn classify_run(
    directory: &RunDirectory,
    output: &ProcessOutput,
) -> ExecuteOutcome {
    let classified = classify_output(&output.combined());
    let passed = output.success()
        && !classified.has_errors()
        && classified.failed_assertions().next().is_none();
    if !passed {
        log::warn!(
            "simulation in {} did not pass (exit code {:?})",
            directory.path(),
            output.exit_code
        );
    }
    ExecuteOutcome {
        passed,
        exit_code: output.exit_code,
        wall_clock_duration: output.duration,
        diagnostics: classified.diagnostics,
        assertion_results: classified.assertions,
        counters: classified.counters,
        run_directory: directory.path().to_owned(),
        log_path: directory.log_path(),
        waveform_path: directory.find_waveform(),
        coverage_path: directory.find_coverage(),
    }
}
