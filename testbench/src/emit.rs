// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Harness emission. Every block is written by its own method and can be
//! left out without breaking the blocks around it; the bookkeeping signals
//! they share (`reset_released`, `stimulus_done`, the counters) are always
//! declared.

use std::{
    collections::BTreeSet,
    fmt::{self, Write},
};

use benchwright_verilog::{
    ClockDomain, ModuleInterface, Port, PortDirection, ResetSignal,
};

use crate::{
    Feature, GenerationConfig, StimulusStrategy,
    protocol::{ProtocolBinding, TransactionKind},
};

/// Vectors emitted by the `directed` strategy.
pub const DIRECTED_VECTORS: usize = 5;

/// Iterations emitted by the `random` and `constrained-random` strategies.
pub const RANDOM_ITERATIONS: usize = 20;

/// Transactions per direction in a protocol `sequence`.
pub const SEQUENCE_LENGTH: usize = 8;

/// Inputs wider than this get no coverpoint.
pub const COVERAGE_WIDTH_LIMIT: usize = 8;

const NET_KEYWORDS: &[&str] = &[
    "wire", "tri", "wand", "wor", "uwire", "tri0", "tri1", "supply0",
    "supply1",
];

/// Data types that accept `'0`, integer literals and `$urandom` without a
/// cast.
const INTEGRAL_KEYWORDS: &[&str] = &[
    "logic", "reg", "bit", "var", "byte", "shortint", "int", "longint",
    "integer", "time",
];

fn is_user_type(port: &Port) -> bool {
    port.data_type.as_deref().is_some_and(|data_type| {
        !NET_KEYWORDS.contains(&data_type)
            && !INTEGRAL_KEYWORDS.contains(&data_type)
    })
}

fn with_shape(mut text: String, port: &Port) -> String {
    if port.signed {
        text.push_str(" signed");
    }
    if let Some(range) = &port.packed_range {
        text.push(' ');
        text.push_str(range);
    }
    text
}

/// The type of a procedurally driven variable with the same shape as
/// `port`, excluding unpacked dimensions.
pub(crate) fn variable_type(port: &Port) -> String {
    let base = match port.data_type.as_deref() {
        None | Some("reg" | "var") => "logic",
        Some(data_type) if NET_KEYWORDS.contains(&data_type) => "logic",
        Some(data_type) => data_type,
    };
    with_shape(base.to_string(), port)
}

/// Outputs are observed through nets where the data type allows it.
fn observed_type(port: &Port) -> String {
    match port.data_type.as_deref() {
        None | Some("logic" | "reg" | "var" | "bit") => {
            with_shape("wire".to_string(), port)
        }
        Some(data_type) if NET_KEYWORDS.contains(&data_type) => {
            with_shape("wire".to_string(), port)
        }
        Some(_) => variable_type(port),
    }
}

fn declaration(port: &Port, data_type: &str) -> String {
    match &port.unpacked_range {
        Some(range) => format!("{data_type} {} {range}", port.name),
        None => format!("{data_type} {}", port.name),
    }
}

/// For array ports, a `foreach` prefix and the element expression;
/// otherwise an empty prefix and the port itself.
fn element(port: &Port) -> (String, String) {
    match &port.array_dimensions {
        Some(dimensions) if !dimensions.is_empty() => {
            let indices = (0..dimensions.len())
                .map(|index| format!("tb_i{index}"))
                .collect::<Vec<_>>();
            let prefix =
                format!("foreach ({}[{}]) ", port.name, indices.join(", "));
            let target = format!("{}[{}]", port.name, indices.join("]["));
            (prefix, target)
        }
        _ => (String::new(), port.name.clone()),
    }
}

fn cast(port: &Port, value: &str) -> String {
    if is_user_type(port) {
        let data_type = port.data_type.as_deref().unwrap_or("logic");
        format!("{data_type}'({value})")
    } else {
        value.to_string()
    }
}

fn zero(port: &Port) -> String {
    if is_user_type(port) {
        cast(port, "0")
    } else {
        "'0".into()
    }
}

fn directed_value(port: &Port, index: usize) -> String {
    if port.width == 1 {
        format!("1'b{}", index % 2)
    } else if port.width_exact && port.width <= 4 {
        format!("{}'d{}", port.width, index % (1 << port.width))
    } else {
        format!("'h{index:x}")
    }
}

fn random_value(port: &Port) -> String {
    let words = port.width.div_ceil(32);
    let draw = if words > 1 {
        format!("{{{}}}", vec!["$urandom"; words].join(", "))
    } else {
        "$urandom".to_string()
    };
    if port.width_exact && port.width % 32 != 0 {
        format!("{}'({draw})", port.width)
    } else {
        draw
    }
}

fn half_period(period: u64) -> String {
    if period % 2 == 0 {
        (period / 2).to_string()
    } else {
        format!("{}.5", period / 2)
    }
}

/// How the harness advances time. Designs without an inferred clock are
/// paced with plain delays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Timing {
    Clock(String),
    Delay(u64),
}

impl Timing {
    /// Where stimulus is applied: half a period away from sampling.
    fn drive(&self) -> String {
        match self {
            Timing::Clock(clock) => format!("@(negedge {clock})"),
            Timing::Delay(period) => format!("#{period}"),
        }
    }

    /// The event control used by checkers, assertions and counters.
    fn sample(&self) -> String {
        match self {
            Timing::Clock(clock) => format!("@(posedge {clock})"),
            Timing::Delay(period) => format!("#{period}"),
        }
    }
}

struct Assertion {
    name: String,
}

impl Assertion {
    fn line_constant(&self) -> String {
        format!("{}_line", self.name)
    }

    fn failures(&self) -> String {
        format!("{}_failures", self.name)
    }
}

pub(crate) struct Harness<'a> {
    interface: &'a ModuleInterface,
    config: &'a GenerationConfig,
    binding: Option<ProtocolBinding<'a>>,
    timing: Timing,
    stimulus: StimulusStrategy,
}

impl<'a> Harness<'a> {
    pub(crate) fn new(
        interface: &'a ModuleInterface,
        config: &'a GenerationConfig,
        binding: Option<ProtocolBinding<'a>>,
    ) -> Self {
        let timing = match interface.clock_domains.first() {
            Some(domain) => Timing::Clock(domain.clock.clone()),
            None => Timing::Delay(config.clock_period),
        };
        let stimulus = match config.stimulus {
            StimulusStrategy::Sequence if binding.is_none() => {
                log::warn!(
                    "sequence stimulus for `{}` has no usable protocol; emitting directed vectors",
                    interface.name
                );
                StimulusStrategy::Directed
            }
            other => other,
        };
        Self {
            interface,
            config,
            binding,
            timing,
            stimulus,
        }
    }

    pub(crate) fn name(&self) -> String {
        format!("tb_{}", self.interface.name)
    }

    /// Inputs that generic stimulus drives: everything but clocks, resets
    /// and protocol-bound ports.
    fn driven_inputs(&self) -> Vec<&'a Port> {
        self.interface
            .inputs()
            .filter(|port| !self.interface.is_clock_or_reset(&port.name))
            .filter(|port| {
                self.binding
                    .as_ref()
                    .is_none_or(|binding| !binding.is_bound(&port.name))
            })
            .collect()
    }

    fn observed_outputs(&self) -> Vec<&'a Port> {
        self.interface
            .outputs()
            .filter(|port| !self.interface.is_clock_or_reset(&port.name))
            .collect()
    }

    /// Each reset port once, paired with the first domain it was bound to.
    fn resets(&self) -> Vec<(&'a ClockDomain, &'a ResetSignal)> {
        let mut seen = BTreeSet::new();
        self.interface
            .clock_domains
            .iter()
            .filter_map(|domain| {
                domain.reset.as_ref().map(|reset| (domain, reset))
            })
            .filter(|(_, reset)| seen.insert(reset.port.as_str()))
            .collect()
    }

    fn assertions(&self) -> Vec<Assertion> {
        self.observed_outputs()
            .iter()
            .map(|port| Assertion {
                name: format!("assert_{}_known", port.name),
            })
            .collect()
    }

    /// Writes every enabled block in order and reports which ones were
    /// emitted.
    pub(crate) fn emit(
        &self,
        buffer: &mut String,
    ) -> Result<Vec<Feature>, fmt::Error> {
        let mut features = vec![];

        self.header(buffer)?;
        features.push(Feature::Header);

        self.declarations(buffer)?;
        features.push(Feature::Declarations);

        self.instantiation(buffer)?;
        features.push(Feature::Instantiation);

        if !self.interface.clock_domains.is_empty() {
            self.clocks(buffer)?;
            features.push(Feature::Clocks);
        }

        if !self.resets().is_empty() {
            self.reset_sequences(buffer)?;
            features.push(Feature::Resets);
        }

        if let Some(binding) = &self.binding {
            if let Timing::Clock(clock) = &self.timing {
                writeln!(
                    buffer,
                    "    // {} transactions",
                    binding.template.name
                )?;
                binding.render_tasks(buffer, clock)?;
                features.push(Feature::ProtocolTasks);
            }
        }

        match &self.binding {
            Some(binding) if matches!(self.timing, Timing::Clock(_)) => {
                self.protocol_stimulus(buffer, binding)?
            }
            _ => self.generic_stimulus(buffer)?,
        }
        features.push(Feature::Stimulus);

        let outputs = self.observed_outputs();
        if self.config.checkers_enabled() && !outputs.is_empty() {
            self.checkers(buffer, &outputs)?;
            features.push(Feature::Checkers);
        }

        let assertions = if self.config.assertions_enabled() {
            self.assertions()
        } else {
            vec![]
        };
        if !assertions.is_empty() {
            self.assertion_block(buffer, &outputs, &assertions)?;
            features.push(Feature::Assertions);
        }

        if self.config.coverage_enabled() && self.coverage(buffer)? {
            features.push(Feature::Coverage);
        }

        if self.config.waveform.is_some() {
            self.waveform(buffer)?;
            features.push(Feature::Waveform);
        }

        self.termination(buffer, &assertions)?;
        features.push(Feature::Termination);

        Ok(features)
    }

    fn header(&self, buffer: &mut String) -> fmt::Result {
        let config = self.config;
        let protocol = self
            .binding
            .as_ref()
            .map(|binding| binding.template.name)
            .unwrap_or("none");
        writeln!(
            buffer,
            "// Testbench for `{}`, generated by benchwright. Regenerate instead of editing.",
            self.interface.name
        )?;
        writeln!(
            buffer,
            "// template: {}, stimulus: {}, protocol: {}",
            config.template, self.stimulus, protocol
        )?;
        writeln!(
            buffer,
            "// clock period: {}, reset cycles: {}, duration: {}, seed: {}",
            config.clock_period,
            config.reset_cycles,
            config.duration,
            config.seed
        )?;
        writeln!(buffer)?;
        writeln!(buffer, "`timescale {}", config.timescale)?;
        writeln!(buffer)?;
        writeln!(buffer, "module {};", self.name())
    }

    fn declarations(&self, buffer: &mut String) -> fmt::Result {
        let mirrored = self
            .interface
            .parameters
            .iter()
            .filter(|parameter| parameter.default_value.is_some())
            .collect::<Vec<_>>();
        if !mirrored.is_empty() {
            writeln!(buffer, "    // parameters of `{}`", self.interface.name)?;
            for parameter in mirrored {
                let declared_type = parameter
                    .declared_type
                    .as_deref()
                    .map(|declared_type| format!("{declared_type} "))
                    .unwrap_or_default();
                writeln!(
                    buffer,
                    "    localparam {}{} = {};",
                    declared_type,
                    parameter.name,
                    parameter.default_value.as_deref().unwrap_or("0")
                )?;
            }
            writeln!(buffer)?;
        }

        if !self.interface.ports.is_empty() {
            writeln!(buffer, "    // design signals")?;
        }
        for port in &self.interface.ports {
            match port.direction {
                PortDirection::Input => writeln!(
                    buffer,
                    "    {};",
                    declaration(port, &variable_type(port))
                )?,
                PortDirection::Output => writeln!(
                    buffer,
                    "    {};",
                    declaration(port, &observed_type(port))
                )?,
                PortDirection::Inout => {
                    let net = with_shape("wire".to_string(), port);
                    writeln!(buffer, "    {};", declaration(port, &net))?;
                    if port.array_dimensions.is_none() {
                        writeln!(
                            buffer,
                            "    {} {}_drive = '0;",
                            variable_type(port),
                            port.name
                        )?;
                        writeln!(buffer, "    bit {}_oe = 1'b0;", port.name)?;
                        writeln!(
                            buffer,
                            "    assign {0} = {0}_oe ? {0}_drive : 'z;",
                            port.name
                        )?;
                    }
                }
            }
        }

        writeln!(buffer)?;
        writeln!(buffer, "    // bookkeeping")?;
        writeln!(buffer, "    longint unsigned cycle_count = 0;")?;
        writeln!(buffer, "    longint unsigned event_count = 0;")?;
        writeln!(buffer, "    int error_count = 0;")?;
        writeln!(buffer, "    int resets_pending = {};", self.resets().len())?;
        writeln!(buffer, "    wire reset_released = (resets_pending == 0);")?;
        writeln!(buffer, "    bit stimulus_done = 1'b0;")?;
        writeln!(buffer)
    }

    fn instantiation(&self, buffer: &mut String) -> fmt::Result {
        let overrides = self
            .interface
            .parameters
            .iter()
            .filter(|parameter| parameter.default_value.is_some())
            .map(|parameter| format!(".{0}({0})", parameter.name))
            .collect::<Vec<_>>();

        write!(buffer, "    {}", self.interface.name)?;
        if !overrides.is_empty() {
            write!(
                buffer,
                " #(\n        {}\n    )",
                overrides.join(",\n        ")
            )?;
        }

        if self.interface.ports.is_empty() {
            writeln!(buffer, " dut ();")?;
        } else {
            let bindings = self
                .interface
                .ports
                .iter()
                .map(|port| format!(".{0}({0})", port.name))
                .collect::<Vec<_>>();
            writeln!(
                buffer,
                " dut (\n        {}\n    );",
                bindings.join(",\n        ")
            )?;
        }
        writeln!(buffer)
    }

    fn clocks(&self, buffer: &mut String) -> fmt::Result {
        let half = half_period(self.config.clock_period);
        for domain in &self.interface.clock_domains {
            writeln!(
                buffer,
                "    // clock {}, period {}",
                domain.clock, self.config.clock_period
            )?;
            writeln!(buffer, "    initial {} = 1'b0;", domain.clock)?;
            writeln!(buffer, "    always #{half} {0} = ~{0};", domain.clock)?;
            writeln!(buffer)?;
        }
        Ok(())
    }

    fn reset_sequences(&self, buffer: &mut String) -> fmt::Result {
        for (domain, reset) in self.resets() {
            writeln!(
                buffer,
                "    // reset {} ({}), held for {} cycles of {}",
                reset.port,
                reset.polarity,
                self.config.reset_cycles,
                domain.clock
            )?;
            writeln!(buffer, "    initial begin")?;
            writeln!(
                buffer,
                "        {} = {};",
                reset.port,
                reset.polarity.asserted()
            )?;
            writeln!(
                buffer,
                "        repeat ({}) @(posedge {});",
                self.config.reset_cycles, domain.clock
            )?;
            writeln!(buffer, "        @(negedge {});", domain.clock)?;
            writeln!(
                buffer,
                "        {} = {};",
                reset.port,
                reset.polarity.deasserted()
            )?;
            writeln!(buffer, "        resets_pending--;")?;
            writeln!(buffer, "    end")?;
            writeln!(buffer)?;
        }
        Ok(())
    }

    fn generic_stimulus(&self, buffer: &mut String) -> fmt::Result {
        let inputs = self.driven_inputs();
        let drive = self.timing.drive();

        match self.stimulus {
            StimulusStrategy::Directed | StimulusStrategy::Sequence => {
                writeln!(
                    buffer,
                    "    // stimulus: directed, {DIRECTED_VECTORS} vectors"
                )?
            }
            strategy => writeln!(
                buffer,
                "    // stimulus: {}, {} iterations, seed {}",
                strategy, RANDOM_ITERATIONS, self.config.seed
            )?,
        }
        writeln!(buffer, "    initial begin : stimulus")?;
        for port in &inputs {
            let (prefix, target) = element(port);
            writeln!(buffer, "        {prefix}{target} = {};", zero(port))?;
        }
        writeln!(buffer, "        wait (reset_released);")?;

        match self.stimulus {
            StimulusStrategy::Directed | StimulusStrategy::Sequence => {
                for index in 0..DIRECTED_VECTORS {
                    writeln!(buffer, "        // vector {index}")?;
                    writeln!(buffer, "        {drive};")?;
                    for port in &inputs {
                        let (prefix, target) = element(port);
                        writeln!(
                            buffer,
                            "        {prefix}{target} = {};",
                            cast(port, &directed_value(port, index))
                        )?;
                    }
                    writeln!(buffer, "        event_count++;")?;
                }
            }
            StimulusStrategy::Random => {
                writeln!(
                    buffer,
                    "        void'($urandom({}));",
                    self.config.seed & 0xffff_ffff
                )?;
                writeln!(buffer, "        repeat ({RANDOM_ITERATIONS}) begin")?;
                writeln!(buffer, "            {drive};")?;
                for port in &inputs {
                    let (prefix, target) = element(port);
                    writeln!(
                        buffer,
                        "            {prefix}{target} = {};",
                        cast(port, &random_value(port))
                    )?;
                }
                writeln!(buffer, "            event_count++;")?;
                writeln!(buffer, "        end")?;
            }
            StimulusStrategy::ConstrainedRandom => {
                writeln!(
                    buffer,
                    "        void'($urandom({}));",
                    self.config.seed & 0xffff_ffff
                )?;
                writeln!(buffer, "        repeat ({RANDOM_ITERATIONS}) begin")?;
                writeln!(buffer, "            {drive};")?;
                for port in &inputs {
                    let (prefix, target) = element(port);
                    let random = cast(port, &random_value(port));
                    if port.width == 1 {
                        writeln!(
                            buffer,
                            "            {prefix}{target} = {random};"
                        )?;
                        continue;
                    }
                    writeln!(buffer, "            {prefix}randcase")?;
                    writeln!(
                        buffer,
                        "                1: {target} = {};",
                        zero(port)
                    )?;
                    writeln!(
                        buffer,
                        "                1: {target} = {};",
                        cast(port, "'1")
                    )?;
                    writeln!(buffer, "                2: {target} = {random};")?;
                    writeln!(buffer, "            endcase")?;
                }
                writeln!(buffer, "            event_count++;")?;
                writeln!(buffer, "        end")?;
            }
        }

        writeln!(buffer, "        stimulus_done = 1'b1;")?;
        writeln!(buffer, "    end")?;
        writeln!(buffer)
    }

    fn protocol_stimulus(
        &self,
        buffer: &mut String,
        binding: &ProtocolBinding<'_>,
    ) -> fmt::Result {
        // template order puts writes before the reads that observe them
        let kinds = binding.available();
        let read = kinds.contains(&TransactionKind::Read);

        writeln!(
            buffer,
            "    // stimulus: {}, {} transactions",
            self.stimulus, binding.template.name
        )?;
        writeln!(buffer, "    initial begin : stimulus")?;
        if read {
            if let Some(data_type) = binding.data_type(TransactionKind::Read) {
                writeln!(buffer, "        {data_type} read_data;")?;
            }
        }
        for port in self.driven_inputs() {
            let (prefix, target) = element(port);
            writeln!(buffer, "        {prefix}{target} = {};", zero(port))?;
        }
        for port in binding.ports.values() {
            if port.direction == PortDirection::Input {
                writeln!(buffer, "        {} <= '0;", port.name)?;
            }
        }
        if matches!(
            self.stimulus,
            StimulusStrategy::Random | StimulusStrategy::ConstrainedRandom
        ) {
            writeln!(
                buffer,
                "        void'($urandom({}));",
                self.config.seed & 0xffff_ffff
            )?;
        }
        writeln!(buffer, "        wait (reset_released);")?;
        writeln!(buffer, "        {};", self.timing.sample())?;

        match self.stimulus {
            StimulusStrategy::Directed => {
                for &kind in &kinds {
                    for index in 0..DIRECTED_VECTORS {
                        transaction_call(
                            buffer,
                            binding,
                            "        ",
                            kind,
                            &format!("'h{:x}", index * 4),
                            &format!("'h{:x}", index + 1),
                        )?;
                    }
                }
            }
            StimulusStrategy::Random | StimulusStrategy::ConstrainedRandom => {
                let (address, data) =
                    if self.stimulus == StimulusStrategy::Random {
                        ("$urandom", "$urandom")
                    } else {
                        (
                            "$urandom_range(0, 15) << 2",
                            "($urandom_range(0, 3) == 0) ? '1 : $urandom",
                        )
                    };
                writeln!(buffer, "        repeat ({RANDOM_ITERATIONS}) begin")?;
                for &kind in &kinds {
                    transaction_call(
                        buffer,
                        binding,
                        "            ",
                        kind,
                        address,
                        data,
                    )?;
                }
                writeln!(buffer, "        end")?;
            }
            StimulusStrategy::Sequence => {
                for &kind in &kinds {
                    writeln!(
                        buffer,
                        "        for (int tb_k = 0; tb_k < {SEQUENCE_LENGTH}; tb_k++) begin"
                    )?;
                    transaction_call(
                        buffer,
                        binding,
                        "            ",
                        kind,
                        "tb_k << 2",
                        "$urandom",
                    )?;
                    writeln!(buffer, "        end")?;
                }
            }
        }

        writeln!(buffer, "        stimulus_done = 1'b1;")?;
        writeln!(buffer, "    end")?;
        writeln!(buffer)
    }

    fn checkers(&self, buffer: &mut String, outputs: &[&Port]) -> fmt::Result {
        writeln!(buffer, "    // response checkers")?;
        writeln!(buffer, "    always {} begin", self.timing.sample())?;
        writeln!(buffer, "        if (reset_released) begin")?;
        for port in outputs {
            let (prefix, target) = element(port);
            writeln!(
                buffer,
                "            {prefix}if ($isunknown({target})) begin"
            )?;
            writeln!(buffer, "                error_count++;")?;
            writeln!(
                buffer,
                "                $display(\"[%0t] check failed: {} is unknown\", $time);",
                port.name
            )?;
            writeln!(buffer, "            end")?;
        }
        writeln!(buffer, "        end")?;
        writeln!(buffer, "    end")?;
        writeln!(buffer)
    }

    fn assertion_block(
        &self,
        buffer: &mut String,
        outputs: &[&Port],
        assertions: &[Assertion],
    ) -> fmt::Result {
        writeln!(buffer, "    // assertions")?;
        for (port, assertion) in outputs.iter().zip(assertions) {
            let (prefix, target) = element(port);
            writeln!(buffer, "    int {} = 0;", assertion.failures())?;
            // points at the `assert` three lines below
            writeln!(
                buffer,
                "    localparam int {} = `__LINE__ + 3;",
                assertion.line_constant()
            )?;
            writeln!(buffer, "    always {} begin", self.timing.sample())?;
            writeln!(buffer, "        if (reset_released) begin")?;
            writeln!(
                buffer,
                "            {prefix}assert (!$isunknown({target})) else begin"
            )?;
            writeln!(buffer, "                {}++;", assertion.failures())?;
            writeln!(buffer, "                error_count++;")?;
            writeln!(
                buffer,
                "                $error(\"{} at %s:%0d failed: {} is unknown after reset\", `__FILE__, {});",
                assertion.name,
                port.name,
                assertion.line_constant()
            )?;
            writeln!(buffer, "            end")?;
            writeln!(buffer, "        end")?;
            writeln!(buffer, "    end")?;
            writeln!(buffer)?;
        }
        Ok(())
    }

    /// Returns whether any input was narrow enough to cover.
    fn coverage(&self, buffer: &mut String) -> Result<bool, fmt::Error> {
        let covered = self
            .interface
            .inputs()
            .filter(|port| !self.interface.is_clock_or_reset(&port.name))
            .filter(|port| {
                port.array_dimensions.is_none()
                    && port.width_exact
                    && port.width <= COVERAGE_WIDTH_LIMIT
            })
            .collect::<Vec<_>>();
        if covered.is_empty() {
            return Ok(false);
        }

        writeln!(
            buffer,
            "    // coverage of inputs up to {COVERAGE_WIDTH_LIMIT} bits wide"
        )?;
        writeln!(buffer, "    covergroup input_coverage;")?;
        for port in covered {
            writeln!(buffer, "        cp_{0}: coverpoint {0};", port.name)?;
        }
        writeln!(buffer, "    endgroup")?;
        writeln!(buffer, "    input_coverage input_coverage_inst = new();")?;
        writeln!(
            buffer,
            "    always {} if (reset_released) input_coverage_inst.sample();",
            self.timing.sample()
        )?;
        writeln!(buffer)?;
        Ok(true)
    }

    fn waveform(&self, buffer: &mut String) -> fmt::Result {
        let Some(format) = self.config.waveform else {
            return Ok(());
        };
        writeln!(buffer, "    // waveform capture")?;
        writeln!(buffer, "    initial begin")?;
        writeln!(
            buffer,
            "        $dumpfile(\"{}.{}\");",
            self.interface.name,
            format.extension()
        )?;
        writeln!(buffer, "        $dumpvars(0, {});", self.name())?;
        writeln!(buffer, "    end")?;
        writeln!(buffer)
    }

    fn termination(
        &self,
        buffer: &mut String,
        assertions: &[Assertion],
    ) -> fmt::Result {
        let duration = self.config.duration;
        writeln!(buffer, "    // termination")?;
        writeln!(buffer, "    always {} cycle_count++;", self.timing.sample())?;
        writeln!(buffer)?;
        writeln!(buffer, "    initial begin : watchdog")?;
        writeln!(buffer, "        #{duration};")?;
        writeln!(buffer, "        if (!stimulus_done) begin")?;
        writeln!(buffer, "            error_count++;")?;
        writeln!(
            buffer,
            "            $display(\"watchdog: stimulus still running after {duration} time units\");"
        )?;
        writeln!(buffer, "        end")?;
        writeln!(buffer, "        $finish;")?;
        writeln!(buffer, "    end")?;
        writeln!(buffer)?;
        writeln!(buffer, "    initial begin : completion")?;
        writeln!(buffer, "        wait (stimulus_done);")?;
        writeln!(buffer, "        repeat (2) {};", self.timing.sample())?;
        writeln!(buffer, "        $finish;")?;
        writeln!(buffer, "    end")?;
        writeln!(buffer)?;
        writeln!(buffer, "    final begin")?;
        writeln!(buffer, "        $display(\"Cycles: %0d\", cycle_count);")?;
        writeln!(buffer, "        $display(\"Events: %0d\", event_count);")?;
        for assertion in assertions {
            writeln!(
                buffer,
                "        if ({} == 0) $display(\"{} at %s:%0d passed\", `__FILE__, {});",
                assertion.failures(),
                assertion.name,
                assertion.line_constant()
            )?;
        }
        writeln!(buffer, "        if (error_count == 0) $display(\"TEST PASSED\");")?;
        writeln!(
            buffer,
            "        else $error(\"TEST FAILED: %0d errors\", error_count);"
        )?;
        writeln!(buffer, "    end")?;
        writeln!(buffer, "endmodule")
    }
}

fn transaction_call(
    buffer: &mut String,
    binding: &ProtocolBinding<'_>,
    indent: &str,
    kind: TransactionKind,
    address: &str,
    data: &str,
) -> fmt::Result {
    let task = binding.task_name(kind);
    match kind {
        TransactionKind::Write => {
            writeln!(buffer, "{indent}{task}({address}, {data});")?
        }
        TransactionKind::Send => writeln!(buffer, "{indent}{task}({data});")?,
        TransactionKind::Read => {
            writeln!(buffer, "{indent}{task}({address}, read_data);")?;
            writeln!(
                buffer,
                "{indent}$display(\"[%0t] {task} returned %h\", $time, read_data);"
            )?;
        }
    }
    writeln!(buffer, "{indent}event_count++;")
}

#[cfg(test)]
mod tests {
    use benchwright_verilog::ElementType;

    use super::*;

    fn port(name: &str, width: usize, exact: bool) -> Port {
        Port {
            name: name.into(),
            direction: PortDirection::Input,
            width,
            width_exact: exact,
            packed_range: (width > 1).then(|| format!("[{}:0]", width - 1)),
            element_type: ElementType::WireLike,
            data_type: None,
            signed: false,
            array_dimensions: None,
            unpacked_range: None,
        }
    }

    #[test]
    fn directed_values_by_width() {
        let bit = port("a", 1, true);
        let narrow = port("b", 2, true);
        let wide = port("c", 16, true);
        let guessed = port("d", 4, false);

        let column = |port: &Port| {
            (0..DIRECTED_VECTORS)
                .map(|index| directed_value(port, index))
                .collect::<Vec<_>>()
        };
        assert_eq!(column(&bit), ["1'b0", "1'b1", "1'b0", "1'b1", "1'b0"]);
        assert_eq!(column(&narrow), ["2'd0", "2'd1", "2'd2", "2'd3", "2'd0"]);
        assert_eq!(column(&wide), ["'h0", "'h1", "'h2", "'h3", "'h4"]);
        assert_eq!(directed_value(&guessed, 3), "'h3");
    }

    #[test]
    fn random_values_concatenate_words() {
        assert_eq!(random_value(&port("a", 1, true)), "1'($urandom)");
        assert_eq!(random_value(&port("b", 32, true)), "$urandom");
        assert_eq!(
            random_value(&port("c", 40, true)),
            "40'({$urandom, $urandom})"
        );
        assert_eq!(
            random_value(&port("d", 64, true)),
            "{$urandom, $urandom}"
        );
        assert_eq!(random_value(&port("e", 8, false)), "$urandom");
    }

    #[test]
    fn arrays_iterate_elements() {
        let mut memory = port("mem", 8, true);
        memory.array_dimensions = Some(vec![4, 2]);
        memory.unpacked_range = Some("[4][2]".into());
        assert_eq!(
            element(&memory),
            (
                "foreach (mem[tb_i0, tb_i1]) ".to_string(),
                "mem[tb_i0][tb_i1]".to_string()
            )
        );
        assert_eq!(
            declaration(&memory, &variable_type(&memory)),
            "logic [7:0] mem [4][2]"
        );
    }

    #[test]
    fn user_types_are_cast() {
        let mut state = port("state", 8, false);
        state.data_type = Some("fsm_pkg::state_t".into());
        state.packed_range = None;
        assert_eq!(zero(&state), "fsm_pkg::state_t'(0)");
        assert_eq!(variable_type(&state), "fsm_pkg::state_t");

        let mut count = port("count", 32, true);
        count.data_type = Some("int".into());
        count.packed_range = None;
        assert_eq!(zero(&count), "'0");
        assert_eq!(variable_type(&count), "int");
    }

    #[test]
    fn odd_periods_keep_half_units() {
        assert_eq!(half_period(10), "5");
        assert_eq!(half_period(7), "3.5");
        assert_eq!(half_period(1), "0.5");
    }
}
