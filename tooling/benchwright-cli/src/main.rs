// Copyright (C) 2024 Ethan Uppal.
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3 of the License only.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program.  If not, see <https://www.gnu.org/licenses/>.

use std::{
    env::{self, current_dir},
    fmt, fs,
    sync::{Arc, mpsc},
    thread::available_parallelism,
};

use argh::FromArgs;
use benchwright_pipeline::{
    CompileOutcome, MemoryStore, Orchestrator, PipelineConfig, PipelineResult,
    SimulateRequest, expand_patterns,
};
use benchwright_testbench::{StimulusStrategy, TemplateStyle};
use benchwright_verilator::{CompileConfig, Diagnostic, Severity, ToolchainInfo};
use camino::{Utf8Path, Utf8PathBuf};
use indicatif::ProgressBar;
use owo_colors::OwoColorize;
use serde::Deserialize;
use snafu::{ResultExt, Whatever, whatever};
use threadpool::ThreadPool;

/// Generate, build and run Verilator testbenches for Verilog modules
#[derive(FromArgs)]
struct BenchwrightCommand {
    /// run as if started in this directory, reading its benchwright.toml
    #[argh(option, short = 'C')]
    directory: Option<Utf8PathBuf>,

    #[argh(subcommand)]
    subcommand: Subcommand,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Subcommand {
    Generate(GenerateSubcommand),
    Compile(CompileSubcommand),
    Simulate(SimulateSubcommand),
    Batch(BatchSubcommand),
}

/// synthesize a testbench for one module
#[derive(FromArgs)]
#[argh(subcommand, name = "generate")]
struct GenerateSubcommand {
    /// the Verilog file declaring the module
    #[argh(positional)]
    source: Utf8PathBuf,

    /// the module to build a harness for
    #[argh(positional)]
    module: String,

    /// where to write the harness, relative to the output directory
    /// (default: tb_<module>.sv)
    #[argh(option, short = 'o')]
    output: Option<Utf8PathBuf>,

    /// basic or advanced
    #[argh(option)]
    template: Option<TemplateStyle>,

    /// directed, random, constrained-random or sequence
    #[argh(option)]
    stimulus: Option<StimulusStrategy>,

    /// a protocol name or alias, e.g. apb or axis
    #[argh(option)]
    protocol: Option<String>,

    /// print the generated source instead of a summary
    #[argh(switch)]
    print: bool,
}

/// build design files into a simulation executable
#[derive(FromArgs)]
#[argh(subcommand, name = "compile")]
struct CompileSubcommand {
    /// design files or glob patterns (default: `sources` in benchwright.toml)
    #[argh(positional)]
    files: Vec<String>,

    /// the top-level module
    #[argh(option)]
    top: String,

    /// fail on warnings that are not known to be harmless
    #[argh(switch)]
    warnings_as_errors: bool,

    /// print the outcome as JSON on stdout
    #[argh(switch)]
    json: bool,
}

/// generate, build and run a testbench for one module
#[derive(FromArgs)]
#[argh(subcommand, name = "simulate")]
struct SimulateSubcommand {
    /// design files or glob patterns (default: `sources` in benchwright.toml)
    #[argh(positional)]
    files: Vec<String>,

    /// the module under test
    #[argh(option)]
    top: String,

    /// use this testbench instead of synthesizing one
    #[argh(option)]
    testbench: Option<Utf8PathBuf>,

    /// top module of --testbench (default: its file stem)
    #[argh(option)]
    testbench_top: Option<String>,

    /// run an already-built executable, skipping compilation
    #[argh(option)]
    prebuilt: Option<Utf8PathBuf>,

    /// override the simulation seed
    #[argh(option)]
    seed: Option<u64>,

    /// print the result as JSON on stdout
    #[argh(switch)]
    json: bool,
}

/// run every simulation in a manifest in parallel
#[derive(FromArgs)]
#[argh(subcommand, name = "batch")]
struct BatchSubcommand {
    /// a TOML file with one [[run]] table per simulation
    #[argh(positional)]
    manifest: Utf8PathBuf,

    /// number of simulations to run at once (default: available parallelism)
    #[argh(option, short = 'j')]
    jobs: Option<usize>,

    /// print every result as a JSON array on stdout
    #[argh(switch)]
    json: bool,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Manifest {
    #[serde(default, rename = "run")]
    runs: Vec<ManifestRun>,
}

/// Paths are relative to the manifest.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestRun {
    module: String,
    #[serde(default)]
    design: Vec<String>,
    testbench: Option<Utf8PathBuf>,
    testbench_top: Option<String>,
    prebuilt: Option<Utf8PathBuf>,
}

enum Status {
    Progress,
    Success,
    Failure,
}

fn status(kind: Status, label: &str, message: impl fmt::Display) {
    let label = format!("{label:>12}");
    match kind {
        Status::Progress => {
            eprintln!("{} {message}", label.bold().bright_cyan())
        }
        Status::Success => {
            eprintln!("{} {message}", label.bold().bright_green())
        }
        Status::Failure => {
            eprintln!("{} {message}", label.bold().bright_red())
        }
    }
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    for diagnostic in diagnostics {
        match diagnostic.severity {
            Severity::Error => eprintln!("{}", diagnostic.bright_red()),
            Severity::Warning => eprintln!("{}", diagnostic.yellow()),
            Severity::Info => eprintln!("{diagnostic}"),
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), Whatever> {
    let json = serde_json::to_string_pretty(value)
        .whatever_context("Failed to serialize result as JSON")?;
    println!("{json}");
    Ok(())
}

fn probe_toolchain(config: &PipelineConfig) -> Result<ToolchainInfo, Whatever> {
    let toolchain = ToolchainInfo::probe(&config.toolchain).whatever_context(
        format!(
            "Failed to run `{} --version`; install Verilator 5 or set `toolchain.executable` in benchwright.toml",
            config.toolchain.executable
        ),
    )?;
    log::info!("using {}", toolchain.banner);
    Ok(toolchain)
}

/// Expands `patterns` against `base`, falling back to the configured
/// sources when there are none.
fn design_files(
    base: &Utf8Path,
    patterns: &[String],
    config: &PipelineConfig,
) -> Result<Vec<Utf8PathBuf>, Whatever> {
    if patterns.is_empty() {
        return config
            .resolve_sources(base)
            .whatever_context("Failed to expand `sources` in benchwright.toml");
    }
    expand_patterns(base, patterns)
        .whatever_context("Failed to expand design file patterns")
}

fn describe(outcome: &CompileOutcome) -> String {
    let artifact = outcome
        .produced_artifact_path
        .as_ref()
        .unwrap_or(&outcome.build_directory);
    if outcome.cached {
        format!("{artifact} (cached)")
    } else {
        format!("{artifact} in {:.2}s", outcome.duration.as_secs_f64())
    }
}

fn report(result: &PipelineResult) {
    if let Some(compile) = &result.compile {
        print_diagnostics(&compile.diagnostics);
        if compile.success {
            status(Status::Success, "Finished", describe(compile));
        }
    }
    if let Some(execute) = &result.execute {
        print_diagnostics(&execute.diagnostics);
        for assertion in execute
            .assertion_results
            .iter()
            .filter(|assertion| !assertion.passed)
        {
            eprintln!(
                "{} {} at {}:{}: {}",
                "assertion failed:".bold().bright_red(),
                assertion.name,
                assertion.source_file,
                assertion.line,
                assertion.message.as_deref().unwrap_or("<no message>")
            );
        }
        if let Some(cycles) = execute.counters.cycle_count {
            eprintln!("  cycles: {cycles}");
        }
        if let Some(events) = execute.counters.event_count {
            eprintln!("  events: {events}");
        }
        eprintln!("  log: {}", execute.log_path);
        if let Some(waveform) = &execute.waveform_path {
            eprintln!("  waveform: {waveform}");
        }
        if let Some(coverage) = &execute.coverage_path {
            eprintln!("  coverage: {coverage}");
        }
    }
    if let Some(failure) = &result.failure {
        eprintln!("{} {}", "error:".bold().bright_red(), failure.message);
    }
}

fn verdict(result: &PipelineResult) -> String {
    let elapsed = result
        .transitions
        .last()
        .map(|transition| transition.elapsed.as_secs_f64())
        .unwrap_or_default();
    if result.passed() {
        format!(
            "         {} [{}] in {elapsed:.2}s",
            "PASS".bold().bright_green(),
            result.module
        )
    } else {
        format!(
            "         {} [{}] in {elapsed:.2}s ({})",
            "FAIL".bold().bright_red(),
            result.module,
            result.state
        )
    }
}

fn generate(
    base: &Utf8Path,
    config: PipelineConfig,
    options: GenerateSubcommand,
) -> Result<(), Whatever> {
    let mut generation = config.generation.clone();
    if let Some(output) = options.output {
        generation.output_path = Some(output);
    }
    if let Some(template) = options.template {
        generation.template = template;
    }
    if let Some(stimulus) = options.stimulus {
        generation.stimulus = stimulus;
    }
    if options.protocol.is_some() {
        generation.protocol = options.protocol;
    }

    // synthesis never invokes the toolchain
    let orchestrator =
        Orchestrator::new(ToolchainInfo::assume(&config.toolchain), config);
    let artifact = orchestrator
        .generate_testbench(
            &base.join(&options.source),
            &options.module,
            &generation,
        )
        .whatever_context(format!(
            "Failed to generate a testbench for `{}`",
            options.module
        ))?;

    if options.print {
        print!("{}", artifact.source);
    } else {
        status(
            Status::Success,
            "Generated",
            format!("{} at {}", artifact.module_name, artifact.output_path),
        );
    }
    Ok(())
}

fn compile(
    base: &Utf8Path,
    config: PipelineConfig,
    options: CompileSubcommand,
) -> Result<(), Whatever> {
    let files = design_files(base, &options.files, &config)?;
    let compile_config = CompileConfig {
        top_module: options.top.clone(),
        warnings_as_errors: options.warnings_as_errors
            || config.compile.warnings_as_errors,
        ..config.compile.clone()
    };
    let orchestrator = Orchestrator::new(probe_toolchain(&config)?, config);

    status(
        Status::Progress,
        "Compiling",
        format!("{} ({} file(s))", options.top, files.len()),
    );
    let outcome = orchestrator
        .compile(&files, &compile_config)
        .whatever_context(format!("Failed to compile `{}`", options.top))?;

    print_diagnostics(&outcome.diagnostics);
    if options.json {
        print_json(&outcome)?;
    }
    if !outcome.success {
        whatever!(
            "Compilation of `{}` failed; see {}",
            options.top,
            outcome.log_path
        );
    }
    status(Status::Success, "Finished", describe(&outcome));
    Ok(())
}

fn simulate(
    base: &Utf8Path,
    mut config: PipelineConfig,
    options: SimulateSubcommand,
) -> Result<(), Whatever> {
    if options.seed.is_some() {
        config.run.seed = options.seed;
    }
    let (design, toolchain) = if options.prebuilt.is_some() {
        (vec![], ToolchainInfo::assume(&config.toolchain))
    } else {
        (
            design_files(base, &options.files, &config)?,
            probe_toolchain(&config)?,
        )
    };
    let orchestrator = Orchestrator::new(toolchain, config);
    let request = SimulateRequest {
        design,
        module: options.top,
        testbench: options.testbench,
        testbench_top: options.testbench_top,
        prebuilt: options.prebuilt,
    };

    status(Status::Progress, "Running", &request.module);
    let result = orchestrator.simulate(&request);
    report(&result);
    if options.json {
        print_json(&result)?;
    }
    eprintln!("{}", verdict(&result));

    if !result.passed() {
        whatever!("Simulation of `{}` did not pass", result.module);
    }
    Ok(())
}

/// Runs without a `design` list fall back to the configured sources, which
/// are relative to `config_base` rather than to the manifest.
fn load_manifest(
    path: &Utf8Path,
    config_base: &Utf8Path,
    config: &PipelineConfig,
) -> Result<Vec<SimulateRequest>, Whatever> {
    let contents = fs::read_to_string(path)
        .whatever_context(format!("Failed to read manifest {path}"))?;
    let manifest: Manifest = toml::from_str(&contents)
        .whatever_context(format!("Failed to parse manifest {path}"))?;
    let base = path.parent().unwrap_or(Utf8Path::new("."));

    let mut requests = vec![];
    for run in manifest.runs {
        let design = if run.prebuilt.is_some() {
            vec![]
        } else if run.design.is_empty() {
            design_files(config_base, &[], config)?
        } else {
            design_files(base, &run.design, config).whatever_context(
                format!("Failed to resolve design files for `{}`", run.module),
            )?
        };
        requests.push(SimulateRequest {
            design,
            module: run.module,
            testbench: run.testbench.map(|testbench| base.join(testbench)),
            testbench_top: run.testbench_top,
            prebuilt: run.prebuilt.map(|prebuilt| base.join(prebuilt)),
        });
    }
    log::debug!("loaded {} run(s) from {path}", requests.len());
    Ok(requests)
}

fn batch(
    base: &Utf8Path,
    config: PipelineConfig,
    options: BatchSubcommand,
) -> Result<(), Whatever> {
    let manifest_path = base.join(&options.manifest);
    let requests = load_manifest(&manifest_path, base, &config)?;
    if requests.is_empty() {
        whatever!("{manifest_path} lists no [[run]] tables");
    }

    let toolchain = if requests.iter().all(|request| request.prebuilt.is_some())
    {
        ToolchainInfo::assume(&config.toolchain)
    } else {
        probe_toolchain(&config)?
    };
    // identical builds across runs are compiled once
    let orchestrator = Arc::new(
        Orchestrator::new(toolchain, config)
            .with_store(Arc::new(MemoryStore::new())),
    );

    let worker_count = options.jobs.unwrap_or_else(|| {
        available_parallelism()
            .map(|value| value.get())
            .unwrap_or(1)
    });
    let worker_count = worker_count.max(1);
    let pool = ThreadPool::new(worker_count);

    let run_count = requests.len();
    status(
        Status::Progress,
        "Starting",
        format!(
            "{} simulation{} [{}] across {} thread{}",
            run_count,
            if run_count == 1 { "" } else { "s" },
            manifest_path,
            worker_count,
            if worker_count == 1 { "" } else { "s" },
        ),
    );

    let (tx, rx) = mpsc::channel();
    for (index, request) in requests.into_iter().enumerate() {
        let tx = tx.clone();
        let orchestrator = Arc::clone(&orchestrator);
        pool.execute(move || {
            let result = orchestrator.simulate(&request);
            let _ = tx.send((index, result));
        });
    }
    drop(tx);

    let progress = ProgressBar::new(run_count as u64);
    let mut results = Vec::with_capacity(run_count);
    for (index, result) in rx.iter() {
        progress.println(verdict(&result));
        if let Some(failure) = &result.failure {
            progress.println(format!("             {}", failure.message));
        }
        progress.inc(1);
        results.push((index, result));
    }
    progress.finish_and_clear();

    if results.len() < run_count {
        whatever!(
            "{} simulation(s) never reported back",
            run_count - results.len()
        );
    }
    results.sort_by_key(|(index, _)| *index);
    let results = results
        .into_iter()
        .map(|(_, result)| result)
        .collect::<Vec<_>>();
    if options.json {
        print_json(&results)?;
    }

    let failures = results.iter().filter(|result| !result.passed()).count();
    status(
        if failures == 0 {
            Status::Success
        } else {
            Status::Failure
        },
        "Finished",
        format!(
            "with {} failure{}",
            failures,
            if failures == 1 { "" } else { "s" }
        ),
    );
    if failures > 0 {
        whatever!("Exiting due to failure(s)");
    }
    Ok(())
}

#[snafu::report]
fn main() -> Result<(), Whatever> {
    if env::var("RUST_LOG").is_ok() {
        env_logger::init();
    }

    let command: BenchwrightCommand = argh::from_env();

    let current_directory = Utf8PathBuf::from_path_buf(
        current_dir()
            .whatever_context("Failed to determine current directory")?,
    )
    .map_err(|_| "?")
    .whatever_context("Failed to parse current directory as UTF-8")?;
    let base = match command.directory {
        Some(directory) => current_directory.join(directory),
        None => current_directory,
    };

    let config = PipelineConfig::load(&base)
        .whatever_context(format!("Failed to load configuration in {base}"))?;

    match command.subcommand {
        Subcommand::Generate(options) => generate(&base, config, options),
        Subcommand::Compile(options) => compile(&base, config, options),
        Subcommand::Simulate(options) => simulate(&base, config, options),
        Subcommand::Batch(options) => batch(&base, config, options),
    }
}
