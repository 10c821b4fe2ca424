// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Bus protocol templates.
//!
//! A template is plain data: a table of signal roles (which port names fill
//! which role) and a list of transactions, each a sequence of [`Step`]s.
//! [`ProtocolBinding::render_tasks`] interprets the steps into
//! SystemVerilog tasks, so adding a protocol never touches the emitter.

use std::{collections::BTreeMap, fmt, fmt::Write};

use benchwright_verilog::{ModuleInterface, Port, PortDirection};

use crate::emit::variable_type;

/// A value driven onto a role's port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Value {
    High,
    Low,
    /// All bits set, e.g. for byte strobes.
    Ones,
    /// The transaction's address argument.
    Address,
    /// The transaction's data argument.
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Drive a role. Skipped when the role is unbound.
    Set(&'static str, Value),
    /// Advance one clock edge.
    Tick,
    /// Wait for a clock edge on which the role is high. Degrades to a single
    /// tick when the role is unbound.
    WaitFor(&'static str),
    /// Wait for a clock edge on which every bound role is high.
    WaitAll(&'static [&'static str]),
    /// Copy a role's port into the transaction's data argument.
    Capture(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TransactionKind {
    Write,
    Read,
    Send,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            TransactionKind::Write => "write",
            TransactionKind::Read => "read",
            TransactionKind::Send => "send",
        })
    }
}

#[derive(Debug)]
pub struct Transaction {
    pub kind: TransactionKind,
    pub steps: &'static [Step],
}

#[derive(Debug)]
pub struct SignalRole {
    pub role: &'static str,
    /// Matched case-insensitively against the whole port name and against
    /// each `_`-separated segment of it.
    pub patterns: &'static [&'static str],
    /// Direction as seen from the design under test.
    pub direction: PortDirection,
    pub required: bool,
}

#[derive(Debug)]
pub struct ProtocolTemplate {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub roles: &'static [SignalRole],
    pub transactions: &'static [Transaction],
}

const fn role(
    role: &'static str,
    patterns: &'static [&'static str],
    direction: PortDirection,
    required: bool,
) -> SignalRole {
    SignalRole {
        role,
        patterns,
        direction,
        required,
    }
}

use PortDirection::{Input, Output};
use Step::{Capture, Set, Tick, WaitAll, WaitFor};
use Value::{Address, Data, High, Low, Ones};

pub static PROTOCOLS: &[ProtocolTemplate] = &[
    ProtocolTemplate {
        name: "apb",
        aliases: &[],
        roles: &[
            role("psel", &["psel", "sel"], Input, true),
            role("penable", &["penable", "enable"], Input, true),
            role("pwrite", &["pwrite", "write", "we"], Input, true),
            role("paddr", &["paddr", "addr"], Input, true),
            role("pwdata", &["pwdata", "wdata"], Input, true),
            role("pstrb", &["pstrb", "strb"], Input, false),
            role("prdata", &["prdata", "rdata"], Output, false),
            role("pready", &["pready", "ready"], Output, false),
        ],
        transactions: &[
            Transaction {
                kind: TransactionKind::Write,
                steps: &[
                    Set("paddr", Address),
                    Set("pwrite", High),
                    Set("pwdata", Data),
                    Set("pstrb", Ones),
                    Set("psel", High),
                    Tick,
                    Set("penable", High),
                    WaitFor("pready"),
                    Set("psel", Low),
                    Set("penable", Low),
                ],
            },
            Transaction {
                kind: TransactionKind::Read,
                steps: &[
                    Set("paddr", Address),
                    Set("pwrite", Low),
                    Set("psel", High),
                    Tick,
                    Set("penable", High),
                    WaitFor("pready"),
                    Capture("prdata"),
                    Set("psel", Low),
                    Set("penable", Low),
                ],
            },
        ],
    },
    ProtocolTemplate {
        name: "axi4-lite",
        aliases: &["axi-lite", "axil"],
        roles: &[
            role("awaddr", &["awaddr"], Input, true),
            role("awvalid", &["awvalid"], Input, true),
            role("awready", &["awready"], Output, true),
            role("wdata", &["wdata"], Input, true),
            role("wstrb", &["wstrb"], Input, false),
            role("wvalid", &["wvalid"], Input, true),
            role("wready", &["wready"], Output, true),
            role("bvalid", &["bvalid"], Output, true),
            role("bready", &["bready"], Input, true),
            role("araddr", &["araddr"], Input, false),
            role("arvalid", &["arvalid"], Input, false),
            role("arready", &["arready"], Output, false),
            role("rdata", &["rdata"], Output, false),
            role("rvalid", &["rvalid"], Output, false),
            role("rready", &["rready"], Input, false),
        ],
        transactions: &[
            Transaction {
                kind: TransactionKind::Write,
                steps: &[
                    Set("awaddr", Address),
                    Set("awvalid", High),
                    Set("wdata", Data),
                    Set("wstrb", Ones),
                    Set("wvalid", High),
                    Set("bready", High),
                    WaitAll(&["awready", "wready"]),
                    Set("awvalid", Low),
                    Set("wvalid", Low),
                    WaitFor("bvalid"),
                    Set("bready", Low),
                ],
            },
            Transaction {
                kind: TransactionKind::Read,
                steps: &[
                    Set("araddr", Address),
                    Set("arvalid", High),
                    Set("rready", High),
                    WaitFor("arready"),
                    Set("arvalid", Low),
                    WaitFor("rvalid"),
                    Capture("rdata"),
                    Set("rready", Low),
                ],
            },
        ],
    },
    ProtocolTemplate {
        name: "wishbone",
        aliases: &["wb"],
        roles: &[
            role("cyc", &["cyc"], Input, true),
            role("stb", &["stb"], Input, true),
            role("we", &["we"], Input, true),
            role("adr", &["adr", "addr"], Input, true),
            role("dat_w", &["dat", "wdata"], Input, true),
            role("sel", &["sel"], Input, false),
            role("ack", &["ack"], Output, true),
            role("dat_r", &["dat", "rdata"], Output, false),
        ],
        transactions: &[
            Transaction {
                kind: TransactionKind::Write,
                steps: &[
                    Set("adr", Address),
                    Set("dat_w", Data),
                    Set("we", High),
                    Set("sel", Ones),
                    Set("cyc", High),
                    Set("stb", High),
                    WaitFor("ack"),
                    Set("cyc", Low),
                    Set("stb", Low),
                    Set("we", Low),
                ],
            },
            Transaction {
                kind: TransactionKind::Read,
                steps: &[
                    Set("adr", Address),
                    Set("we", Low),
                    Set("sel", Ones),
                    Set("cyc", High),
                    Set("stb", High),
                    WaitFor("ack"),
                    Capture("dat_r"),
                    Set("cyc", Low),
                    Set("stb", Low),
                ],
            },
        ],
    },
    ProtocolTemplate {
        name: "axi-stream",
        aliases: &["axis", "axi4-stream"],
        roles: &[
            role("tdata", &["tdata"], Input, true),
            role("tvalid", &["tvalid"], Input, true),
            role("tready", &["tready"], Output, false),
            role("tlast", &["tlast"], Input, false),
        ],
        transactions: &[Transaction {
            kind: TransactionKind::Send,
            steps: &[
                Set("tdata", Data),
                Set("tvalid", High),
                Set("tlast", High),
                WaitFor("tready"),
                Set("tvalid", Low),
                Set("tlast", Low),
            ],
        }],
    },
];

/// Finds a template by name or alias, ignoring case.
pub fn lookup(name: &str) -> Option<&'static ProtocolTemplate> {
    let name = name.trim().to_ascii_lowercase();
    PROTOCOLS.iter().find(|template| {
        template.name == name || template.aliases.contains(&name.as_str())
    })
}

fn name_matches(port_name: &str, pattern: &str) -> bool {
    let port_name = port_name.to_ascii_lowercase();
    port_name == pattern
        || port_name.split('_').any(|segment| segment == pattern)
}

impl ProtocolTemplate {
    /// The identifier used to prefix generated tasks, e.g. `axi4_lite`.
    pub fn identifier(&self) -> String {
        self.name.replace('-', "_")
    }

    /// Assigns ports to roles in table order. Each port fills at most one
    /// role, and clocks and resets are never considered. On failure, returns
    /// the required roles that found no port.
    pub fn bind<'a>(
        &'static self,
        interface: &'a ModuleInterface,
    ) -> Result<ProtocolBinding<'a>, Vec<&'static str>> {
        let mut ports = BTreeMap::new();
        let mut missing = vec![];

        for signal in self.roles {
            let candidate = interface.ports.iter().find(|port| {
                port.direction == signal.direction
                    && !interface.is_clock_or_reset(&port.name)
                    && !ports
                        .values()
                        .any(|bound: &&Port| bound.name == port.name)
                    && signal
                        .patterns
                        .iter()
                        .any(|pattern| name_matches(&port.name, pattern))
            });
            match candidate {
                Some(port) => {
                    ports.insert(signal.role, port);
                }
                None if signal.required => missing.push(signal.role),
                None => {}
            }
        }

        if missing.is_empty() {
            Ok(ProtocolBinding {
                template: self,
                ports,
            })
        } else {
            Err(missing)
        }
    }
}

/// A template whose required roles all resolved to ports of one module.
#[derive(Debug)]
pub struct ProtocolBinding<'a> {
    pub template: &'static ProtocolTemplate,
    /// Role to port.
    pub ports: BTreeMap<&'static str, &'a Port>,
}

impl ProtocolBinding<'_> {
    pub fn is_bound(&self, port_name: &str) -> bool {
        self.ports.values().any(|port| port.name == port_name)
    }

    /// A transaction is usable when every role feeding or receiving its
    /// arguments is bound.
    fn argument_ports(
        &self,
        transaction: &Transaction,
    ) -> Option<(Option<&Port>, Option<&Port>)> {
        let mut address = None;
        let mut data = None;
        for step in transaction.steps {
            match *step {
                Set(role, Address) => address = Some(*self.ports.get(role)?),
                Set(role, Data) | Capture(role) => {
                    data = Some(*self.ports.get(role)?)
                }
                _ => {}
            }
        }
        Some((address, data))
    }

    /// The transactions this binding can render, in template order.
    pub fn available(&self) -> Vec<TransactionKind> {
        self.template
            .transactions
            .iter()
            .filter(|transaction| self.argument_ports(transaction).is_some())
            .map(|transaction| transaction.kind)
            .collect()
    }

    pub fn task_name(&self, kind: TransactionKind) -> String {
        format!("{}_{}", self.template.identifier(), kind)
    }

    /// The variable type of the data argument of `kind`, used to declare a
    /// capture variable for reads.
    pub fn data_type(&self, kind: TransactionKind) -> Option<String> {
        let transaction = self
            .template
            .transactions
            .iter()
            .find(|transaction| transaction.kind == kind)?;
        let (_, data) = self.argument_ports(transaction)?;
        data.map(variable_type)
    }

    fn value(&self, port: &Port, value: Value) -> &'static str {
        match value {
            High if port.is_scalar() => "1'b1",
            Low if port.is_scalar() => "1'b0",
            High => "'1",
            Low => "'0",
            Ones => "'1",
            Address => "address",
            Data => "data",
        }
    }

    /// Writes one task per available transaction. Signals are driven with
    /// nonblocking assignments and sampled on rising edges of `clock`.
    pub fn render_tasks(
        &self,
        buffer: &mut String,
        clock: &str,
    ) -> fmt::Result {
        for transaction in self.template.transactions {
            let Some((address, data)) = self.argument_ports(transaction) else {
                continue;
            };

            let mut arguments = vec![];
            if let Some(port) = address {
                arguments
                    .push(format!("input {} address", variable_type(port)));
            }
            if let Some(port) = data {
                let direction = match transaction.kind {
                    TransactionKind::Read => "output",
                    _ => "input",
                };
                arguments
                    .push(format!("{} {} data", direction, variable_type(port)));
            }

            writeln!(
                buffer,
                "    task automatic {}({});",
                self.task_name(transaction.kind),
                arguments.join(", ")
            )?;
            for step in transaction.steps {
                self.render_step(buffer, clock, step)?;
            }
            writeln!(buffer, "    endtask\n")?;
        }
        Ok(())
    }

    fn render_step(
        &self,
        buffer: &mut String,
        clock: &str,
        step: &Step,
    ) -> fmt::Result {
        match *step {
            Set(role, value) => {
                if let Some(port) = self.ports.get(role) {
                    writeln!(
                        buffer,
                        "        {} <= {};",
                        port.name,
                        self.value(port, value)
                    )?;
                }
            }
            Tick => writeln!(buffer, "        @(posedge {clock});")?,
            WaitFor(role) => match self.ports.get(role) {
                Some(port) => writeln!(
                    buffer,
                    "        do @(posedge {clock}); while (!{});",
                    port.name
                )?,
                None => writeln!(buffer, "        @(posedge {clock});")?,
            },
            WaitAll(roles) => {
                let bound = roles
                    .iter()
                    .filter_map(|role| self.ports.get(role))
                    .map(|port| port.name.as_str())
                    .collect::<Vec<_>>();
                if bound.is_empty() {
                    writeln!(buffer, "        @(posedge {clock});")?;
                } else {
                    writeln!(
                        buffer,
                        "        do @(posedge {clock}); while (!({}));",
                        bound.join(" && ")
                    )?;
                }
            }
            Capture(role) => {
                if let Some(port) = self.ports.get(role) {
                    writeln!(buffer, "        data = {};", port.name)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use benchwright_verilog::extract;

    use super::*;

    const APB_SLAVE: &str = r#"
module regs (
    input  logic        pclk,
    input  logic        presetn,
    input  logic        psel,
    input  logic        penable,
    input  logic        pwrite,
    input  logic [11:0] paddr,
    input  logic [31:0] pwdata,
    output logic [31:0] prdata,
    output logic        pready
);
endmodule
"#;

    #[test]
    fn lookup_by_alias() {
        let name = |query| lookup(query).map(|template| template.name);
        assert_eq!(name("AXIS"), Some("axi-stream"));
        assert_eq!(name("axi-lite"), Some("axi4-lite"));
        assert_eq!(name("wb"), Some("wishbone"));
        assert!(lookup("pcie").is_none());
    }

    #[test]
    fn binds_apb_roles() {
        let interface = extract(APB_SLAVE, "regs").expect("extracts");
        let binding = lookup("apb")
            .expect("apb is registered")
            .bind(&interface)
            .expect("all required roles bind");
        assert_eq!(binding.ports["paddr"].name, "paddr");
        assert_eq!(binding.ports["prdata"].name, "prdata");
        assert!(!binding.ports.contains_key("pstrb"));
        assert!(!binding.is_bound("pclk"));
        assert_eq!(
            binding.available(),
            [TransactionKind::Write, TransactionKind::Read]
        );
    }

    #[test]
    fn reports_missing_roles() {
        let interface = extract(APB_SLAVE, "regs").expect("extracts");
        let missing = lookup("axi4-lite")
            .expect("registered")
            .bind(&interface)
            .expect_err("no AXI ports");
        assert!(missing.contains(&"awaddr"));
        assert!(missing.contains(&"bready"));
    }

    #[test]
    fn wishbone_data_roles_follow_direction() {
        let source = r#"
module wb_slave (
    input  wire        clk_i,
    input  wire        rst_i,
    input  wire        wb_cyc_i,
    input  wire        wb_stb_i,
    input  wire        wb_we_i,
    input  wire [31:0] wb_adr_i,
    input  wire [31:0] wb_dat_i,
    output wire [31:0] wb_dat_o,
    output wire        wb_ack_o
);
endmodule
"#;
        let interface = extract(source, "wb_slave").expect("extracts");
        let binding = lookup("wishbone")
            .expect("registered")
            .bind(&interface)
            .expect("binds");
        assert_eq!(binding.ports["dat_w"].name, "wb_dat_i");
        assert_eq!(binding.ports["dat_r"].name, "wb_dat_o");
    }

    #[test]
    fn tasks_interpret_steps() {
        let interface = extract(APB_SLAVE, "regs").expect("extracts");
        let binding = lookup("apb")
            .expect("registered")
            .bind(&interface)
            .expect("binds");
        let mut buffer = String::new();
        binding.render_tasks(&mut buffer, "pclk").expect("formats");

        assert!(buffer.contains(
            "task automatic apb_write(input logic [11:0] address, input logic [31:0] data);"
        ));
        assert!(buffer.contains(
            "task automatic apb_read(input logic [11:0] address, output logic [31:0] data);"
        ));
        assert!(buffer.contains("psel <= 1'b1;"));
        assert!(buffer.contains("do @(posedge pclk); while (!pready);"));
        assert!(buffer.contains("data = prdata;"));
        assert_eq!(buffer.matches("endtask").count(), 2);
    }
}
