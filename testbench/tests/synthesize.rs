// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use benchwright_testbench::{
    DIRECTED_VECTORS, Feature, GenerationConfig, StimulusStrategy,
    SynthesizeError, TemplateStyle, WaveformFormat, synthesize,
};
use benchwright_verilog::{ModuleInterface, extract};
use snafu::{ResultExt, Whatever};

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

const APB_REGS: &str = r#"
module regs (
    input  logic        pclk,
    input  logic        presetn,
    input  logic        psel,
    input  logic        penable,
    input  logic        pwrite,
    input  logic [11:0] paddr,
    input  logic [31:0] pwdata,
    output logic [31:0] prdata,
    output logic        pready,
    input  logic        irq_mask
);
endmodule
"#;

fn interface(source: &str, module: &str) -> ModuleInterface {
    extract(source, module).expect("fixture extracts")
}

fn lines_starting<'a>(source: &'a str, prefix: &str) -> Vec<&'a str> {
    source
        .lines()
        .map(str::trim)
        .filter(|line| line.starts_with(prefix))
        .collect()
}

#[test]
#[snafu::report]
fn counter_end_to_end() -> Result<(), Whatever> {
    let counter = interface(COUNTER, "counter");
    let config = GenerationConfig {
        template: TemplateStyle::Basic,
        stimulus: StimulusStrategy::Directed,
        clock_period: 10,
        ..Default::default()
    };
    let artifact =
        synthesize(&counter, &config).whatever_context("synthesize")?;
    let source = &artifact.source;

    assert_eq!(artifact.module_name, "tb_counter");
    assert_eq!(artifact.output_path, "tb_counter.sv");
    assert!(source.contains("module tb_counter;"));
    assert!(source.trim_end().ends_with("endmodule"));

    // one free-running clock at half the period
    assert_eq!(lines_starting(source, "always #"), ["always #5 clk = ~clk;"]);

    // one active-low reset block
    assert_eq!(lines_starting(source, "// reset "), [
        "// reset rst_n (active-low), held for 5 cycles of clk"
    ]);
    assert_eq!(lines_starting(source, "rst_n = "), [
        "rst_n = 1'b0;",
        "rst_n = 1'b1;"
    ]);

    // five directed vectors alternating 0,1,0,1,0
    assert_eq!(lines_starting(source, "en = 1'b"), [
        "en = 1'b0;",
        "en = 1'b1;",
        "en = 1'b0;",
        "en = 1'b1;",
        "en = 1'b0;"
    ]);
    assert_eq!(lines_starting(source, "// vector ").len(), DIRECTED_VECTORS);

    // clock and reset are never driven as stimulus
    assert!(lines_starting(source, "clk = 1'b1").is_empty());

    assert!(source.contains("localparam WIDTH = 8;"));
    assert!(source.contains("counter #(\n        .WIDTH(WIDTH)\n    ) dut ("));
    assert!(source.contains("wire [WIDTH-1:0] count;"));

    assert_eq!(
        artifact.features,
        [
            Feature::Header,
            Feature::Declarations,
            Feature::Instantiation,
            Feature::Clocks,
            Feature::Resets,
            Feature::Stimulus,
            Feature::Waveform,
            Feature::Termination,
        ]
    );

    Ok(())
}

#[test]
fn every_port_is_bound_exactly_once() {
    for (source, module) in [(COUNTER, "counter"), (APB_REGS, "regs")] {
        let interface = interface(source, module);
        let config = GenerationConfig {
            template: TemplateStyle::Advanced,
            protocol: Some("apb".into()),
            ..Default::default()
        };
        let artifact = synthesize(&interface, &config).expect("synthesizes");
        for port in &interface.ports {
            let binding = format!(".{0}({0})", port.name);
            assert_eq!(
                artifact.source.matches(&binding).count(),
                1,
                "{binding} in {module}"
            );
        }
    }
}

#[test]
fn synthesis_is_deterministic() {
    let interface = interface(APB_REGS, "regs");
    for stimulus in [
        StimulusStrategy::Directed,
        StimulusStrategy::Random,
        StimulusStrategy::ConstrainedRandom,
        StimulusStrategy::Sequence,
    ] {
        for protocol in [None, Some("apb".to_string())] {
            let config = GenerationConfig {
                template: TemplateStyle::Advanced,
                stimulus,
                protocol,
                seed: 7,
                ..Default::default()
            };
            let first = synthesize(&interface, &config).expect("first");
            let second = synthesize(&interface, &config).expect("second");
            assert_eq!(first, second);
        }
    }
}

#[test]
fn random_stimulus_is_seeded() {
    let counter = interface(COUNTER, "counter");
    let config = GenerationConfig {
        stimulus: StimulusStrategy::Random,
        seed: 42,
        ..Default::default()
    };
    let artifact = synthesize(&counter, &config).expect("synthesizes");
    assert!(artifact.source.contains("void'($urandom(42));"));
    assert!(artifact.source.contains("repeat (20) begin"));
    assert!(artifact.source.contains("en = 1'($urandom);"));

    let constrained = GenerationConfig {
        stimulus: StimulusStrategy::ConstrainedRandom,
        ..config
    };
    let source = synthesize(&counter, &constrained)
        .expect("synthesizes")
        .source;
    // single-bit inputs have no corners to bias towards
    assert!(!source.contains("randcase"));
}

#[test]
fn apb_protocol_uses_transaction_tasks() {
    let regs = interface(APB_REGS, "regs");
    let config = GenerationConfig {
        protocol: Some("APB".into()),
        ..Default::default()
    };
    let artifact = synthesize(&regs, &config).expect("synthesizes");
    let source = &artifact.source;

    assert!(artifact.has_feature(Feature::ProtocolTasks));
    assert!(source.contains("protocol: apb"));
    assert!(source.contains("task automatic apb_write("));
    assert_eq!(lines_starting(source, "apb_write(").len(), DIRECTED_VECTORS);
    assert!(source.contains("apb_write('h10, 'h5);"));
    assert!(source.contains("apb_read('h10, read_data);"));
    assert!(source.contains("logic [31:0] read_data;"));

    // bound roles are only driven by the tasks, free inputs by stimulus
    assert!(source.contains("psel <= '0;"));
    assert!(lines_starting(source, "psel = ").is_empty());
    assert!(source.contains("irq_mask = '0;"));
}

#[test]
fn protocol_sequence_writes_then_reads() {
    let regs = interface(APB_REGS, "regs");
    let config = GenerationConfig {
        protocol: Some("apb".into()),
        stimulus: StimulusStrategy::Sequence,
        ..Default::default()
    };
    let source = synthesize(&regs, &config).expect("synthesizes").source;
    let write = source.find("apb_write(tb_k << 2, $urandom);");
    let read = source.find("apb_read(tb_k << 2, read_data);");
    assert!(write.is_some() && read.is_some());
    assert!(write < read);
}

#[test]
fn unusable_protocol_falls_back() {
    let counter = interface(COUNTER, "counter");
    for protocol in ["axi4-lite", "pcie"] {
        let config = GenerationConfig {
            protocol: Some(protocol.into()),
            stimulus: StimulusStrategy::Sequence,
            ..Default::default()
        };
        let artifact = synthesize(&counter, &config).expect("synthesizes");
        assert!(!artifact.has_feature(Feature::ProtocolTasks));
        assert!(artifact.has_feature(Feature::Stimulus));
        assert!(artifact.source.contains("stimulus: directed, protocol: none"));
        assert_eq!(
            lines_starting(&artifact.source, "en = 1'b").len(),
            DIRECTED_VECTORS
        );
    }
}

#[test]
fn advanced_template_adds_verification_blocks() {
    let counter = interface(COUNTER, "counter");
    let config = GenerationConfig {
        template: TemplateStyle::Advanced,
        waveform: Some(WaveformFormat::Fst),
        ..Default::default()
    };
    let artifact = synthesize(&counter, &config).expect("synthesizes");
    let source = &artifact.source;

    let position = |feature| {
        artifact
            .features
            .iter()
            .position(|candidate| *candidate == feature)
            .expect("feature emitted")
    };
    assert!(position(Feature::Stimulus) < position(Feature::Checkers));
    assert!(position(Feature::Checkers) < position(Feature::Assertions));
    assert!(position(Feature::Assertions) < position(Feature::Coverage));
    assert!(position(Feature::Coverage) < position(Feature::Waveform));

    assert!(source.contains(
        "$error(\"assert_count_known at %s:%0d failed: count is unknown after reset\""
    ));
    assert!(source.contains("$display(\"assert_count_known at %s:%0d passed\""));
    assert!(source.contains("cp_en: coverpoint en;"));
    assert!(!source.contains("coverpoint clk"));
    assert!(source.contains("$dumpfile(\"counter.fst\");"));

    // the recorded line constant points at the assert statement itself
    let lines = source.lines().collect::<Vec<_>>();
    let constant = lines
        .iter()
        .position(|line| line.contains("assert_count_known_line = `__LINE__ + 3"))
        .expect("line constant emitted");
    assert!(lines[constant + 3].trim_start().starts_with("assert ("));
}

#[test]
fn unclocked_designs_use_delays() {
    let source = "module add (input [3:0] a, b, output [4:0] sum); endmodule";
    let adder = interface(source, "add");
    let config = GenerationConfig {
        clock_period: 4,
        ..Default::default()
    };
    let artifact = synthesize(&adder, &config).expect("synthesizes");

    assert!(!artifact.has_feature(Feature::Clocks));
    assert!(!artifact.has_feature(Feature::Resets));
    assert!(!artifact.source.contains("posedge"));
    assert!(artifact.source.contains("int resets_pending = 0;"));
    assert_eq!(lines_starting(&artifact.source, "#4;").len(), DIRECTED_VECTORS);
    assert_eq!(lines_starting(&artifact.source, "b = 4'd"), [
        "b = 4'd0;",
        "b = 4'd1;",
        "b = 4'd2;",
        "b = 4'd3;",
        "b = 4'd4;"
    ]);
}

#[test]
fn inout_ports_get_tristate_drivers() {
    let source = r#"
module pad (input logic clk, inout wire [3:0] io);
endmodule
"#;
    let pad = interface(source, "pad");
    let artifact =
        synthesize(&pad, &GenerationConfig::default()).expect("synthesizes");
    assert!(artifact.source.contains("wire [3:0] io;"));
    assert!(artifact.source.contains("logic [3:0] io_drive = '0;"));
    assert!(artifact.source.contains("assign io = io_oe ? io_drive : 'z;"));
}

#[test]
fn config_reads_from_toml() {
    let config: GenerationConfig = toml::from_str(
        r#"
        template = "advanced"
        stimulus = "constrained-random"
        protocol = "axis"
        clock_period = 4
        "#,
    )
    .expect("parses");
    assert_eq!(config.template, TemplateStyle::Advanced);
    assert_eq!(config.stimulus, StimulusStrategy::ConstrainedRandom);
    assert_eq!(config.protocol.as_deref(), Some("axis"));
    assert_eq!(config.clock_period, 4);
    assert_eq!(config.reset_cycles, 5);
    assert_eq!(config.waveform, Some(WaveformFormat::Vcd));
}

#[test]
fn rejects_unusable_configs() {
    let counter = interface(COUNTER, "counter");
    let config = GenerationConfig {
        clock_period: 0,
        ..Default::default()
    };
    assert!(matches!(
        synthesize(&counter, &config),
        Err(SynthesizeError::InvalidConfig { .. })
    ));
}
