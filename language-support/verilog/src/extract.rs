// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

use std::{collections::HashSet, sync::LazyLock};

use regex::Regex;
use snafu::{Snafu, ensure};

use crate::{
    ElementType, ModuleInterface, Parameter, Port, PortDirection,
    clocks::infer_clock_domains,
    scan::{
        Token, find_matching, skip_whitespace, split_top_level, strip_comments,
        tokenize,
    },
    width::{RangeWidth, range_width},
};

static MODULE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(?:macro)?module\s+(?:(?:automatic|static)\s+)?([A-Za-z_][A-Za-z0-9_$]*)",
    )
    .expect("module header pattern is valid")
});

static BODY_PORT_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(input|output|inout)\b([^;]*);")
        .expect("port declaration pattern is valid")
});

static BODY_PARAMETER_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bparameter\b([^;]*);")
        .expect("parameter declaration pattern is valid")
});

static BODY_REG_DECLARATION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:reg|logic)\b([^;]*);")
        .expect("variable declaration pattern is valid")
});

/// Interface extraction failure.
#[derive(Debug, Snafu)]
pub enum ExtractError {
    #[snafu(display("No declaration of module `{module}` was found"))]
    NotFound { module: String },

    #[snafu(display("Could not parse the header of module `{module}`: {reason}"))]
    Malformed { module: String, reason: String },
}

/// Extracts the interface of the module named `module_name` declared in
/// `source`.
///
/// Widths that depend on parameters resolve to
/// [`crate::PARAMETERIZED_WIDTH_FALLBACK`] rather than failing. Ports that
/// cannot be modeled (interface ports, undeclared non-ANSI ports) are skipped
/// with a warning.
pub fn extract(
    source: &str,
    module_name: &str,
) -> Result<ModuleInterface, ExtractError> {
    let text = strip_comments(source);

    let Some(name_end) = MODULE_HEADER
        .captures_iter(&text)
        .filter_map(|captures| captures.get(1))
        .find(|name| name.as_str() == module_name)
        .map(|name| name.end())
    else {
        return NotFoundSnafu {
            module: module_name,
        }
        .fail();
    };

    let malformed = |reason: &str| ExtractError::Malformed {
        module: module_name.to_string(),
        reason: reason.to_string(),
    };

    let mut position = skip_whitespace(&text, name_end);

    // package imports may precede the parameter list
    while text[position..].starts_with("import") {
        let end = text[position..]
            .find(';')
            .ok_or_else(|| malformed("unterminated package import"))?;
        position = skip_whitespace(&text, position + end + 1);
    }

    let mut header_parameters = "";
    if text[position..].starts_with('#') {
        position = skip_whitespace(&text, position + 1);
        ensure!(
            text[position..].starts_with('('),
            MalformedSnafu {
                module: module_name,
                reason: "expected `(` after `#`",
            }
        );
        let close = find_matching(&text, position)
            .ok_or_else(|| malformed("unbalanced parameter list"))?;
        header_parameters = &text[position + 1..close];
        position = skip_whitespace(&text, close + 1);
    }

    let mut header_ports = "";
    if text[position..].starts_with('(') {
        let close = find_matching(&text, position)
            .ok_or_else(|| malformed("unbalanced port list"))?;
        header_ports = &text[position + 1..close];
        position = skip_whitespace(&text, close + 1);
    }
    ensure!(
        text[position..].starts_with(';'),
        MalformedSnafu {
            module: module_name,
            reason: "module header is not terminated by `;`",
        }
    );

    let body_start = position + 1;
    let body_end = text[body_start..]
        .find("endmodule")
        .map(|offset| body_start + offset)
        .unwrap_or(text.len());
    let body = &text[body_start..body_end];

    let parameters = extract_parameters(header_parameters, body);

    let elements = split_top_level(header_ports, b',')
        .into_iter()
        .map(str::trim)
        .filter(|element| !element.is_empty())
        .collect::<Vec<_>>();
    let is_ansi = elements.iter().any(|element| {
        matches!(
            tokenize(element).first(),
            Some(Token::Word("input" | "output" | "inout"))
        )
    });

    let ports = if is_ansi {
        parse_ansi_ports(module_name, &elements)
    } else {
        parse_non_ansi_ports(module_name, &elements, body)
    };

    let mut seen = HashSet::new();
    for port in &ports {
        ensure!(
            seen.insert(port.name.as_str()),
            MalformedSnafu {
                module: module_name,
                reason: format!("port `{}` is declared twice", port.name),
            }
        );
    }

    let clock_domains = infer_clock_domains(&ports);
    log::debug!(
        "extracted module `{}`: {} ports, {} parameters, {} clock domains",
        module_name,
        ports.len(),
        parameters.len(),
        clock_domains.len()
    );

    Ok(ModuleInterface {
        name: module_name.to_string(),
        ports,
        parameters,
        clock_domains,
    })
}

fn extract_parameters(header: &str, body: &str) -> Vec<Parameter> {
    let mut parameters: Vec<Parameter> = vec![];
    let mut push = |parameter: Parameter| {
        if !parameters.iter().any(|existing| existing.name == parameter.name) {
            parameters.push(parameter);
        }
    };

    // `parameter A = 1, B = 2` continues a declaration; `localparam` is not
    // overridable, so it and its continuations are skipped
    let mut in_localparam = false;
    let mut inherited_type = None;
    for element in split_top_level(header, b',') {
        let tokens = tokenize(element);
        let tokens = match tokens.first() {
            Some(Token::Word("localparam")) => {
                in_localparam = true;
                continue;
            }
            Some(Token::Word("parameter")) => {
                in_localparam = false;
                inherited_type = None;
                &tokens[1..]
            }
            _ if in_localparam => continue,
            _ => &tokens[..],
        };
        if let Some(parameter) = parse_parameter(tokens, &mut inherited_type) {
            push(parameter);
        }
    }

    for captures in BODY_PARAMETER_DECLARATION.captures_iter(body) {
        let mut inherited_type = None;
        for element in split_top_level(&captures[1], b',') {
            if let Some(parameter) =
                parse_parameter(&tokenize(element), &mut inherited_type)
            {
                push(parameter);
            }
        }
    }

    parameters
}

fn parse_parameter(
    tokens: &[Token<'_>],
    inherited_type: &mut Option<String>,
) -> Option<Parameter> {
    let mut words = vec![];
    let mut default_value = None;
    for token in tokens {
        match token {
            Token::Word(word) => words.push(word.to_string()),
            Token::Range(range) => {
                // packed range on a typed parameter, e.g. `logic [7:0] P`
                if let Some(last) = words.last_mut() {
                    last.push(' ');
                    last.push_str(range);
                }
            }
            Token::Default(value) => default_value = Some(value.to_string()),
            Token::Other(_) => {}
        }
    }

    let name = words.pop()?;
    let declared_type = if words.is_empty() {
        inherited_type.clone()
    } else {
        let declared_type = words.join(" ");
        *inherited_type = Some(declared_type.clone());
        Some(declared_type)
    };

    Some(Parameter {
        name,
        declared_type,
        default_value,
    })
}

/// Everything about a port declaration except the identifier and its
/// unpacked dimensions; shared by comma-continued declarations.
#[derive(Debug, Clone)]
struct Declaration {
    direction: PortDirection,
    element_type: ElementType,
    data_type: Option<String>,
    signed: bool,
    packed_range: Option<String>,
    width: usize,
    width_exact: bool,
}

fn direction_keyword(word: &str) -> Option<PortDirection> {
    match word {
        "input" => Some(PortDirection::Input),
        "output" => Some(PortDirection::Output),
        "inout" => Some(PortDirection::Inout),
        _ => None,
    }
}

/// Base width and storage class for built-in data type keywords.
fn data_type_keyword(word: &str) -> Option<(ElementType, usize)> {
    match word {
        "wire" | "tri" | "wand" | "wor" | "uwire" | "tri0" | "tri1"
        | "supply0" | "supply1" => Some((ElementType::WireLike, 1)),
        "reg" | "logic" | "bit" | "var" => Some((ElementType::RegisterLike, 1)),
        "byte" => Some((ElementType::RegisterLike, 8)),
        "shortint" => Some((ElementType::RegisterLike, 16)),
        "int" | "integer" => Some((ElementType::RegisterLike, 32)),
        "longint" => Some((ElementType::RegisterLike, 64)),
        _ => None,
    }
}

fn resolve_ranges(ranges: &[&str]) -> (usize, bool) {
    ranges.iter().fold((1, true), |(width, exact), range| {
        let RangeWidth {
            width: range_width,
            exact: range_exact,
        } = range_width(range);
        (width.saturating_mul(range_width), exact && range_exact)
    })
}

/// Parses one element of a port list or body declaration. `previous` is the
/// declaration of the preceding element, which an element without a
/// direction keyword continues.
fn parse_port_element(
    module_name: &str,
    element: &str,
    previous: Option<&Declaration>,
) -> Option<(Declaration, Port)> {
    let tokens = tokenize(element);
    let tokens = match tokens
        .iter()
        .position(|token| matches!(token, Token::Default(_)))
    {
        Some(index) => &tokens[..index],
        None => &tokens[..],
    };

    // the identifier is the last word; ranges before it are packed, ranges
    // after it are unpacked
    let name_index = tokens
        .iter()
        .rposition(|token| matches!(token, Token::Word(_)))?;
    let Token::Word(name) = tokens[name_index] else {
        return None;
    };

    let mut direction = None;
    let mut storage: Option<(ElementType, usize, &str)> = None;
    let mut user_type = None;
    let mut signed = false;
    let mut packed_ranges = vec![];
    for token in &tokens[..name_index] {
        match token {
            Token::Word(word) => {
                if let Some(keyword) = direction_keyword(word) {
                    direction = Some(keyword);
                } else if let Some((element_type, width)) =
                    data_type_keyword(word)
                {
                    // `var logic` keeps the more specific keyword
                    if storage.is_none_or(|(_, _, keyword)| keyword == "var") {
                        storage = Some((element_type, width, *word));
                    }
                } else if *word == "signed" {
                    signed = true;
                } else if *word != "unsigned" {
                    user_type = Some(*word);
                }
            }
            Token::Range(range) => packed_ranges.push(*range),
            Token::Default(_) | Token::Other(_) => {}
        }
    }
    let unpacked_ranges = tokens[name_index + 1..]
        .iter()
        .filter_map(|token| match token {
            Token::Range(range) => Some(*range),
            _ => None,
        })
        .collect::<Vec<_>>();

    if user_type
        .is_some_and(|user_type| user_type.contains('.') || user_type == "interface")
    {
        log::warn!(
            "skipping interface port `{}` of module `{}`",
            name,
            module_name
        );
        return None;
    }

    let direction = match (direction, previous) {
        (Some(direction), _) => direction,
        (None, Some(previous)) => {
            if packed_ranges.is_empty()
                && storage.is_none()
                && user_type.is_none()
                && !signed
            {
                return Some(build_port(
                    module_name,
                    name,
                    previous.clone(),
                    &unpacked_ranges,
                ));
            }
            previous.direction
        }
        (None, None) => {
            log::warn!(
                "skipping port element `{}` of module `{}`: no direction",
                element.trim(),
                module_name
            );
            return None;
        }
    };

    let (element_type, base_width, data_type, base_exact) =
        match (storage, user_type) {
            (Some((element_type, width, keyword)), _) => {
                (element_type, width, Some(keyword.to_string()), true)
            }
            (None, Some(user_type)) => (
                ElementType::RegisterLike,
                crate::PARAMETERIZED_WIDTH_FALLBACK,
                Some(user_type.to_string()),
                false,
            ),
            (None, None) => (ElementType::WireLike, 1, None, true),
        };
    let (range_width, range_exact) = resolve_ranges(&packed_ranges);

    let declaration = Declaration {
        direction,
        element_type,
        data_type,
        signed,
        packed_range: (!packed_ranges.is_empty())
            .then(|| packed_ranges.concat()),
        width: base_width.saturating_mul(range_width),
        width_exact: base_exact && range_exact,
    };
    Some(build_port(module_name, name, declaration, &unpacked_ranges))
}

fn build_port(
    module_name: &str,
    name: &str,
    declaration: Declaration,
    unpacked_ranges: &[&str],
) -> (Declaration, Port) {
    if !declaration.width_exact {
        log::warn!(
            "port `{}` of module `{}` has a non-literal width; assuming {} bits",
            name,
            module_name,
            declaration.width
        );
    }

    let (array_dimensions, unpacked_range) = if unpacked_ranges.is_empty() {
        (None, None)
    } else {
        (
            Some(
                unpacked_ranges
                    .iter()
                    .map(|range| range_width(range).width)
                    .collect(),
            ),
            Some(unpacked_ranges.concat()),
        )
    };

    let port = Port {
        name: name.to_string(),
        direction: declaration.direction,
        width: declaration.width.max(1),
        width_exact: declaration.width_exact,
        packed_range: declaration.packed_range.clone(),
        element_type: declaration.element_type,
        data_type: declaration.data_type.clone(),
        signed: declaration.signed,
        array_dimensions,
        unpacked_range,
    };
    (declaration, port)
}

fn parse_ansi_ports(module_name: &str, elements: &[&str]) -> Vec<Port> {
    let mut ports = vec![];
    let mut previous: Option<Declaration> = None;
    for element in elements {
        if let Some((declaration, port)) =
            parse_port_element(module_name, element, previous.as_ref())
        {
            previous = Some(declaration);
            ports.push(port);
        }
    }
    ports
}

fn parse_non_ansi_ports(
    module_name: &str,
    names: &[&str],
    body: &str,
) -> Vec<Port> {
    let mut declared: Vec<Port> = vec![];
    for captures in BODY_PORT_DECLARATION.captures_iter(body) {
        let mut previous: Option<Declaration> = None;
        let keyword = &captures[1];
        for (index, element) in
            split_top_level(&captures[2], b',').into_iter().enumerate()
        {
            let element = if index == 0 {
                format!("{keyword} {element}")
            } else {
                element.to_string()
            };
            if let Some((declaration, port)) =
                parse_port_element(module_name, &element, previous.as_ref())
            {
                previous = Some(declaration);
                declared.push(port);
            }
        }
    }

    // `output q; reg q;` makes `q` a variable
    let variables = BODY_REG_DECLARATION
        .captures_iter(body)
        .flat_map(|captures| {
            split_top_level(captures.get(1).map_or("", |m| m.as_str()), b',')
                .into_iter()
                .filter_map(|element| {
                    tokenize(element).into_iter().find_map(|token| match token {
                        Token::Word(word) if word != "signed" => {
                            Some(word.to_string())
                        }
                        _ => None,
                    })
                })
                .collect::<Vec<_>>()
        })
        .collect::<HashSet<_>>();

    names
        .iter()
        .filter_map(|name| {
            let name = name.trim();
            let Some(port) = declared.iter().find(|port| port.name == name)
            else {
                log::warn!(
                    "port `{}` of module `{}` has no direction declaration; skipping it",
                    name,
                    module_name
                );
                return None;
            };
            let mut port = port.clone();
            if variables.contains(name) {
                port.element_type = ElementType::RegisterLike;
            }
            Some(port)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_typed_port_is_approximate() {
        let interface = extract(
            "module m (input my_pkg::word_t w, output state_t s); endmodule",
            "m",
        )
        .expect("extracts");
        let word = interface.port("w").expect("w");
        assert_eq!(word.data_type.as_deref(), Some("my_pkg::word_t"));
        assert!(!word.width_exact);
        assert_eq!(word.element_type, ElementType::RegisterLike);
        assert_eq!(interface.port("s").map(|s| s.direction), Some(PortDirection::Output));
    }

    #[test]
    fn continued_declarations_inherit() {
        let interface = extract(
            "module m (input [3:0] a, b, output logic c, d [2]); endmodule",
            "m",
        )
        .expect("extracts");
        let b = interface.port("b").expect("b");
        assert_eq!(b.direction, PortDirection::Input);
        assert_eq!(b.width, 4);
        let d = interface.port("d").expect("d");
        assert_eq!(d.direction, PortDirection::Output);
        assert_eq!(d.element_type, ElementType::RegisterLike);
        assert_eq!(d.array_dimensions, Some(vec![2]));
    }
}
