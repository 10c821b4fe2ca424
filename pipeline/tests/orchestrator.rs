// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Runs the orchestrator against a shell script that impersonates
//! `verilator --binary` and the executables it would build.

#![cfg(unix)]

use std::{
    env, fs, os::unix::fs::PermissionsExt, sync::Arc, thread, time::Duration,
};

use benchwright_pipeline::{
    ErrorKind, MemoryStore, Orchestrator, PipelineConfig, PipelineError,
    RunState, SimulateRequest,
};
use benchwright_testbench::{GenerationConfig, WaveformFormat};
use benchwright_verilator::{
    CompileConfig, Severity, ToolchainInfo, TraceFormat,
};
use camino::{Utf8Path, Utf8PathBuf};
use snafu::{OptionExt, ResultExt, Whatever};
use tempfile::TempDir;

const FAKE_VERILATOR: &str = r##"#!/bin/sh
here=$(dirname "$0")
if [ "$1" = "--version" ]; then
    echo "Verilator 5.020 2024-01-01 rev v5.020"
    exit 0
fi
echo "$*" >> "$here/invocations"
mdir=""
top=""
prev=""
for arg in "$@"; do
    case "$prev" in
        --Mdir) mdir="$arg" ;;
        --top-module) top="$arg" ;;
    esac
    prev="$arg"
done
for arg in "$@"; do
    case "$arg" in
        *.sv|*.v)
            if grep -q FAKE_SYNTAX_ERROR "$arg"; then
                echo "%Error: $arg:3:5: syntax error, unexpected endmodule" >&2
                echo "%Error: Exiting due to 1 error(s)" >&2
                exit 1
            fi
            if grep -q FAKE_QUIET_ERROR "$arg"; then
                echo "%Error-PINNOTFOUND: $arg:7:12: Pin not found: 'bogus'" >&2
            fi
            if grep -q FAKE_WIDTH_WARNING "$arg"; then
                echo "%Warning-WIDTHTRUNC: $arg:4:20: Operator ASSIGN expects 4 bits" >&2
            fi
            if grep -q FAKE_MULTIDRIVEN "$arg"; then
                echo "%Warning-MULTIDRIVEN: $arg:9:3: Signal has multiple driving blocks" >&2
            fi
            ;;
    esac
done
mkdir -p "$mdir"
rm -f "$mdir/V$top"
if [ -f "$here/sim-$top.sh" ]; then
    cp "$here/sim-$top.sh" "$mdir/V$top"
else
    cp "$here/sim-default.sh" "$mdir/V$top"
fi
chmod +x "$mdir/V$top"
echo "# fake build" > "$mdir/V$top.mk"
exit 0
"##;

const PASSING_SIMULATION: &str = r#"#!/bin/sh
echo "args: $*"
echo "assert_count_known at tb_counter.sv:80 passed"
echo "Cycles: 12"
echo "Events: 5"
echo "TEST PASSED"
echo '$end' > counter.vcd
"#;

const COUNTER: &str = r#"
module counter #(parameter WIDTH = 8) (
    input  wire             clk,
    input  wire             rst_n,
    input  wire             en,
    output reg  [WIDTH-1:0] count
);
    always @(posedge clk or negedge rst_n)
        if (!rst_n) count <= '0;
        else if (en) count <= count + 1'b1;
endmodule
"#;

struct Fixture {
    _scratch: TempDir,
    root: Utf8PathBuf,
}

impl Fixture {
    fn new() -> Self {
        if env::var("RUST_LOG").is_ok() {
            let _ = env_logger::builder().is_test(true).try_init();
        }
        let scratch = tempfile::tempdir().expect("tempdir");
        let root = Utf8PathBuf::from_path_buf(scratch.path().to_path_buf())
            .expect("utf8 tempdir");
        let fixture = Self {
            _scratch: scratch,
            root,
        };
        fixture.script("verilator", FAKE_VERILATOR);
        fixture.script("sim-default.sh", PASSING_SIMULATION);
        fixture
    }

    fn write(&self, name: &str, contents: &str) -> Utf8PathBuf {
        let path = self.root.join(name);
        fs::write(&path, contents).expect("write fixture");
        path
    }

    fn script(&self, name: &str, contents: &str) -> Utf8PathBuf {
        let path = self.write(name, contents);
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))
            .expect("chmod fixture");
        path
    }

    fn invocations(&self) -> usize {
        fs::read_to_string(self.root.join("invocations"))
            .map(|log| log.lines().count())
            .unwrap_or(0)
    }

    fn config(&self) -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.toolchain.executable = self.root.join("verilator").to_string();
        config.output.directory = self.root.join("out");
        config.output.project = "tests".into();
        config.run.timeout_secs = Some(30);
        config
    }

    fn orchestrator(&self, config: PipelineConfig) -> Orchestrator {
        // a script written moments ago can be briefly busy while another
        // test thread forks
        let mut attempts = 0;
        let toolchain = loop {
            match ToolchainInfo::probe(&config.toolchain) {
                Err(error) if error.is_transient_launch() && attempts < 5 => {
                    attempts += 1;
                    thread::sleep(Duration::from_millis(50));
                }
                result => break result.expect("fake probes"),
            }
        };
        assert_eq!(toolchain.version, Some((5, 20)));
        Orchestrator::new(toolchain, config)
    }

    fn counter_request(&self) -> SimulateRequest {
        SimulateRequest {
            design: vec![self.write("counter.sv", COUNTER)],
            module: "counter".into(),
            ..Default::default()
        }
    }
}

fn states(result: &benchwright_pipeline::PipelineResult) -> Vec<RunState> {
    result
        .transitions
        .iter()
        .map(|transition| transition.to)
        .collect()
}

#[test]
#[snafu::report]
fn generate_testbench_writes_the_harness() -> Result<(), Whatever> {
    let fixture = Fixture::new();
    let design = fixture.write("counter.sv", COUNTER);
    let orchestrator = fixture.orchestrator(fixture.config());

    let artifact = orchestrator
        .generate_testbench(&design, "counter", &GenerationConfig::default())
        .whatever_context("generates")?;
    assert_eq!(artifact.output_path, fixture.root.join("out/tb_counter.sv"));
    let written = fs::read_to_string(&artifact.output_path)
        .whatever_context("harness on disk")?;
    assert_eq!(written, artifact.source);
    Ok(())
}

#[test]
fn generate_testbench_reports_missing_inputs() {
    let fixture = Fixture::new();
    let design = fixture.write("counter.sv", COUNTER);
    let orchestrator = fixture.orchestrator(fixture.config());
    let config = GenerationConfig::default();

    let missing_module = orchestrator
        .generate_testbench(&design, "alu", &config)
        .expect_err("no such module");
    assert_eq!(missing_module.kind(), ErrorKind::NotFound);

    let missing_file = orchestrator
        .generate_testbench(Utf8Path::new("/nonexistent/x.sv"), "x", &config)
        .expect_err("no such file");
    assert_eq!(missing_file.kind(), ErrorKind::NotFound);

    let malformed = fixture.write("broken.sv", "module broken (input a;");
    let error = orchestrator
        .generate_testbench(&malformed, "broken", &config)
        .expect_err("unbalanced header");
    assert_eq!(error.kind(), ErrorKind::MalformedInput);
}

#[test]
#[snafu::report]
fn simulate_end_to_end() -> Result<(), Whatever> {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator(fixture.config());
    let result = orchestrator.simulate(&fixture.counter_request());

    assert_eq!(result.failure, None);
    assert!(result.passed());
    assert_eq!(states(&result), [
        RunState::ResolvingTestbench,
        RunState::Compiling,
        RunState::Executing,
        RunState::Classifying,
        RunState::Done,
    ]);
    assert_eq!(result.transitions[0].from, RunState::Idle);

    let testbench = result.testbench.as_ref().whatever_context("generated")?;
    assert_eq!(testbench.module_name, "tb_counter");

    let compile = result.compile.as_ref().whatever_context("compiled")?;
    assert!(compile.success);
    assert!(!compile.cached);
    let executable = compile
        .produced_artifact_path
        .as_ref()
        .whatever_context("executable")?;
    assert_eq!(executable.file_name(), Some("Vtb_counter"));
    assert!(executable.starts_with(fixture.root.join("out/build")));

    let execute = result.execute.as_ref().whatever_context("executed")?;
    assert_eq!(execute.exit_code, Some(0));
    assert_eq!(execute.counters.cycle_count, Some(12));
    assert_eq!(execute.counters.event_count, Some(5));
    assert_eq!(execute.assertion_results.len(), 1);
    assert!(execute.assertion_results[0].passed);
    assert_eq!(
        execute.run_directory,
        fixture.root.join("out/runs/tests/counter-0")
    );
    assert_eq!(
        execute.waveform_path,
        Some(execute.run_directory.join("counter.vcd"))
    );
    let log = fs::read_to_string(&execute.log_path)
        .whatever_context("log written")?;
    assert!(log.contains("+verilator+seed+1"));
    assert!(log.contains("TEST PASSED"));

    // the testbench and design were both handed to the compiler
    let invocation = fs::read_to_string(fixture.root.join("invocations"))
        .whatever_context("invoked")?;
    assert!(invocation.contains("--top-module tb_counter"));
    assert!(invocation.contains("counter.sv"));
    assert!(invocation.contains("tb_counter.sv"));
    Ok(())
}

#[test]
#[snafu::report]
fn synthesized_harness_decides_the_trace_format() -> Result<(), Whatever> {
    let fixture = Fixture::new();
    let request = fixture.counter_request();

    let mut config = fixture.config();
    config.compile.trace = Some(TraceFormat::Vcd);
    config.generation.waveform = Some(WaveformFormat::Fst);
    let fst = fixture.orchestrator(config.clone()).simulate(&request);
    assert!(fst.passed());
    let harness = fst.testbench.as_ref().whatever_context("generated")?;
    assert!(harness.source.contains("$dumpfile(\"counter.fst\")"));

    config.generation.waveform = None;
    let untraced = fixture.orchestrator(config).simulate(&request);
    assert!(untraced.passed());
    let harness = untraced.testbench.as_ref().whatever_context("generated")?;
    assert!(!harness.source.contains("$dumpvars"));

    let invocations = fs::read_to_string(fixture.root.join("invocations"))
        .whatever_context("invoked")?;
    let flags = invocations
        .lines()
        .map(|line| {
            line.split_whitespace()
                .filter(|arg| arg.starts_with("--trace"))
                .collect::<Vec<_>>()
        })
        .collect::<Vec<_>>();
    assert_eq!(flags, [vec!["--trace-fst"], vec![]]);
    Ok(())
}

#[test]
#[snafu::report]
fn synthesized_harnesses_never_share_a_file() -> Result<(), Whatever> {
    let fixture = Fixture::new();
    let request = fixture.counter_request();

    let mut quiet = fixture.config();
    quiet.generation.waveform = None;
    let first = fixture.orchestrator(fixture.config()).simulate(&request);
    let second = fixture.orchestrator(quiet).simulate(&request);

    let first = first.testbench.whatever_context("first harness")?;
    let second = second.testbench.whatever_context("second harness")?;
    assert_ne!(first.source, second.source);
    assert_ne!(first.output_path, second.output_path);
    for harness in [&first, &second] {
        assert!(
            harness
                .output_path
                .starts_with(fixture.root.join("out/generated"))
        );
        assert_eq!(harness.output_path.file_name(), Some("tb_counter.sv"));
        let written = fs::read_to_string(&harness.output_path)
            .whatever_context("harness on disk")?;
        assert_eq!(written, harness.source);
    }
    Ok(())
}

#[test]
fn compile_errors_end_the_run_with_diagnostics() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator(fixture.config());
    let mut request = fixture.counter_request();
    request.design = vec![fixture.write(
        "counter.sv",
        &format!("// FAKE_SYNTAX_ERROR\n{COUNTER}"),
    )];

    let result = orchestrator.simulate(&request);
    assert_eq!(result.state, RunState::Failed);
    assert_eq!(states(&result).last(), Some(&RunState::Failed));
    assert_eq!(
        result.transitions.last().map(|transition| transition.from),
        Some(RunState::Compiling)
    );
    assert!(result.execute.is_none());

    let failure = result.failure.expect("failure recorded");
    assert_eq!(failure.kind, ErrorKind::ToolDiagnostic);
    assert!(!failure.retryable);
    assert_eq!(failure.diagnostics.len(), 2);
    assert_eq!(failure.diagnostics[0].line, Some(3));
    assert_eq!(failure.diagnostics[0].column, Some(5));

    let compile = result.compile.expect("compile outcome kept");
    assert!(!compile.success);
    assert_eq!(compile.exit_code, Some(1));
}

#[test]
fn error_diagnostics_fail_a_clean_exit() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator(fixture.config());
    let design =
        fixture.write("quiet.sv", "// FAKE_QUIET_ERROR\nmodule quiet; endmodule");
    let config = CompileConfig {
        top_module: "quiet".into(),
        ..Default::default()
    };

    let outcome = orchestrator.compile(&[design], &config).expect("compiles");
    assert_eq!(outcome.exit_code, Some(0));
    assert!(!outcome.success);
    assert_eq!(outcome.diagnostics[0].severity, Severity::Error);
    assert_eq!(outcome.diagnostics[0].code.as_deref(), Some("PINNOTFOUND"));
}

#[test]
fn warnings_fail_only_when_unrecoverable_and_escalated() {
    let fixture = Fixture::new();
    let orchestrator = fixture.orchestrator(fixture.config());
    let width = fixture.write(
        "width.sv",
        "// FAKE_WIDTH_WARNING\nmodule width; endmodule",
    );
    let driven = fixture.write(
        "driven.sv",
        "// FAKE_MULTIDRIVEN\nmodule driven; endmodule",
    );
    let compile = |file: &Utf8PathBuf, top: &str, strict: bool| {
        let config = CompileConfig {
            top_module: top.into(),
            warnings_as_errors: strict,
            ..Default::default()
        };
        orchestrator
            .compile(std::slice::from_ref(file), &config)
            .expect("compiles")
    };

    assert!(compile(&width, "width", false).success);
    assert!(compile(&width, "width", true).success);
    assert!(compile(&driven, "driven", false).success);
    assert!(!compile(&driven, "driven", true).success);
}

#[test]
fn unchanged_inputs_are_served_from_the_store() {
    let fixture = Fixture::new();
    let store = Arc::new(MemoryStore::new());
    let orchestrator =
        fixture.orchestrator(fixture.config()).with_store(store.clone());
    let design = fixture.write("counter.sv", COUNTER);
    let config = CompileConfig {
        top_module: "counter".into(),
        ..Default::default()
    };

    let first = orchestrator
        .compile(std::slice::from_ref(&design), &config)
        .expect("first compile");
    assert!(first.success && !first.cached);
    assert_eq!(store.len(), 1);

    let second = orchestrator
        .compile(std::slice::from_ref(&design), &config)
        .expect("second compile");
    assert!(second.cached);
    assert_eq!(second.cache_key, first.cache_key);
    assert_eq!(fixture.invocations(), 1);

    // a vanished executable is a stale entry
    fs::remove_file(first.produced_artifact_path.as_ref().expect("built"))
        .expect("remove executable");
    let third = orchestrator
        .compile(std::slice::from_ref(&design), &config)
        .expect("third compile");
    assert!(!third.cached);
    assert_eq!(fixture.invocations(), 2);

    fixture.write("counter.sv", &format!("{COUNTER}\n// edited\n"));
    let fourth = orchestrator
        .compile(std::slice::from_ref(&design), &config)
        .expect("fourth compile");
    assert_ne!(fourth.cache_key, first.cache_key);
    assert_eq!(fixture.invocations(), 3);
}

#[test]
fn simulation_timeout_is_terminal() {
    let fixture = Fixture::new();
    fixture.script(
        "sim-tb_hang.sh",
        "#!/bin/sh\necho started\nsleep 30\necho unreachable\n",
    );
    let mut config = fixture.config();
    config.run.timeout_secs = Some(1);
    let orchestrator = fixture.orchestrator(config);

    let mut request = fixture.counter_request();
    request.testbench =
        Some(fixture.write("tb_hang.sv", "module tb_hang; endmodule"));
    let result = orchestrator.simulate(&request);

    assert_eq!(result.state, RunState::Failed);
    assert_eq!(
        result.transitions.last().map(|transition| transition.from),
        Some(RunState::Executing)
    );
    assert!(result.testbench.is_none());
    let failure = result.failure.expect("failure recorded");
    assert_eq!(failure.kind, ErrorKind::Timeout);
    assert!(!failure.retryable);

    let partial = fs::read_to_string(
        fixture.root.join("out/runs/tests/counter-0/counter.log"),
    )
    .expect("partial log saved");
    assert!(partial.contains("started"));
    assert!(!partial.contains("unreachable"));
}

#[test]
fn failed_assertions_fail_the_verdict_not_the_run() {
    let fixture = Fixture::new();
    fixture.script(
        "sim-tb_bad.sh",
        "#!/bin/sh\n\
         echo '[50] %Error: tb_bad.sv:10: assert_q_known at tb_bad.sv:7 failed: q is unknown after reset'\n\
         echo 'Cycles: 5'\n",
    );
    let orchestrator = fixture.orchestrator(fixture.config());
    let mut request = fixture.counter_request();
    request.testbench =
        Some(fixture.write("tb_bad.sv", "module tb_bad; endmodule"));

    let result = orchestrator.simulate(&request);
    assert_eq!(result.state, RunState::Done);
    assert!(!result.passed());
    let execute = result.execute.expect("executed");
    assert!(!execute.passed);
    assert_eq!(execute.exit_code, Some(0));
    assert_eq!(execute.assertion_results[0].name, "assert_q_known");
    assert!(!execute.assertion_results[0].passed);
    assert_eq!(execute.counters.cycle_count, Some(5));
}

#[test]
fn prebuilt_executables_skip_compilation() {
    let fixture = Fixture::new();
    let prebuilt = fixture.script("Vprebuilt", PASSING_SIMULATION);
    let orchestrator = fixture.orchestrator(fixture.config());
    let request = SimulateRequest {
        module: "counter".into(),
        prebuilt: Some(prebuilt),
        ..Default::default()
    };

    let result = orchestrator.simulate(&request);
    assert!(result.passed());
    assert_eq!(states(&result), [
        RunState::Executing,
        RunState::Classifying,
        RunState::Done
    ]);
    assert!(result.compile.is_none());
    assert_eq!(fixture.invocations(), 0);
}

#[test]
fn missing_toolchain_is_a_launch_error() {
    let fixture = Fixture::new();
    let mut config = fixture.config();
    config.toolchain.executable = "/nonexistent/verilator".into();
    let orchestrator =
        Orchestrator::new(ToolchainInfo::assume(&config.toolchain), config);
    let design = fixture.write("counter.sv", COUNTER);
    let compile = CompileConfig {
        top_module: "counter".into(),
        ..Default::default()
    };

    let error = orchestrator
        .compile(&[design], &compile)
        .expect_err("cannot launch");
    assert!(matches!(error, PipelineError::Launch { .. }));
    assert_eq!(error.kind(), ErrorKind::Launch);
    assert!(!error.is_retryable());
    assert!(error.to_string().contains("PATH"));
}

#[test]
fn no_testbench_without_auto_generation() {
    let fixture = Fixture::new();
    let mut config = fixture.config();
    config.run.auto_generate = false;
    let orchestrator = fixture.orchestrator(config);

    let result = orchestrator.simulate(&fixture.counter_request());
    assert_eq!(result.state, RunState::Failed);
    assert_eq!(
        result.failure.map(|failure| failure.kind),
        Some(ErrorKind::MalformedInput)
    );
}

#[test]
#[snafu::report]
fn concurrent_runs_use_disjoint_directories() -> Result<(), Whatever> {
    let fixture = Fixture::new();
    let orchestrator = fixture
        .orchestrator(fixture.config())
        .with_store(Arc::new(MemoryStore::new()));
    let request = fixture.counter_request();

    let results = thread::scope(|scope| {
        let handles = (0..3)
            .map(|_| scope.spawn(|| orchestrator.simulate(&request)))
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("run thread"))
            .collect::<Vec<_>>()
    });

    let mut directories = vec![];
    for result in &results {
        assert!(result.passed(), "{:?}", result.failure);
        let execute = result.execute.as_ref().whatever_context("executed")?;
        directories.push(execute.run_directory.clone());
    }
    directories.sort();
    directories.dedup();
    assert_eq!(directories.len(), 3);
    // the build lock lets the later runs reuse the first build
    assert_eq!(fixture.invocations(), 1);
    Ok(())
}
