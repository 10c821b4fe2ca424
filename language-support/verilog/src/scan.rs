// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Bracket-aware scanning primitives. Port lists contain commas inside
//! dimension brackets and parameter overrides, so nothing here splits on a
//! separator without tracking nesting depth first.

/// Replaces line and block comments with spaces. Byte offsets and newlines
/// are preserved so positions in the result map back onto the source.
pub(crate) fn strip_comments(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut index = 0;
    let mut in_string = false;

    while index < bytes.len() {
        let byte = bytes[index];
        if in_string {
            result.push(byte);
            if byte == b'\\' && index + 1 < bytes.len() {
                result.push(bytes[index + 1]);
                index += 2;
                continue;
            }
            if byte == b'"' {
                in_string = false;
            }
            index += 1;
        } else if byte == b'"' {
            in_string = true;
            result.push(byte);
            index += 1;
        } else if bytes[index..].starts_with(b"//") {
            while index < bytes.len() && bytes[index] != b'\n' {
                result.push(b' ');
                index += 1;
            }
        } else if bytes[index..].starts_with(b"/*") {
            let mut closed = false;
            while index < bytes.len() {
                if bytes[index..].starts_with(b"*/") {
                    result.extend_from_slice(b"  ");
                    index += 2;
                    closed = true;
                    break;
                }
                result.push(if bytes[index] == b'\n' { b'\n' } else { b' ' });
                index += 1;
            }
            if !closed {
                break;
            }
        } else {
            result.push(byte);
            index += 1;
        }
    }

    // only ASCII bytes were substituted, and always for whole comment spans
    String::from_utf8(result)
        .unwrap_or_else(|error| String::from_utf8_lossy(error.as_bytes()).into())
}

fn closing_for(open: u8) -> Option<u8> {
    match open {
        b'(' => Some(b')'),
        b'[' => Some(b']'),
        b'{' => Some(b'}'),
        _ => None,
    }
}

/// Given the byte index of an opening bracket, returns the index of its
/// matching closing bracket. Nested brackets of every kind are tracked;
/// mismatched nesting yields `None`.
pub(crate) fn find_matching(text: &str, open_index: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut stack = vec![closing_for(*bytes.get(open_index)?)?];
    let mut in_string = false;

    for (offset, &byte) in bytes[open_index + 1..].iter().enumerate() {
        if in_string {
            if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'(' | b'[' | b'{' => stack.push(closing_for(byte)?),
            b')' | b']' | b'}' => {
                if stack.pop()? != byte {
                    return None;
                }
                if stack.is_empty() {
                    return Some(open_index + 1 + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Splits `text` on `separator` occurrences at nesting depth zero.
pub(crate) fn split_top_level(text: &str, separator: u8) -> Vec<&str> {
    let mut pieces = vec![];
    let mut depth = 0usize;
    let mut start = 0;
    let mut in_string = false;

    for (index, &byte) in text.as_bytes().iter().enumerate() {
        if in_string {
            if byte == b'"' {
                in_string = false;
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            _ if byte == separator && depth == 0 => {
                pieces.push(&text[start..index]);
                start = index + 1;
            }
            _ => {}
        }
    }
    pieces.push(&text[start..]);
    pieces
}

pub(crate) fn skip_whitespace(text: &str, mut index: usize) -> usize {
    let bytes = text.as_bytes();
    while index < bytes.len() && bytes[index].is_ascii_whitespace() {
        index += 1;
    }
    index
}

/// A lexical unit of a single declaration such as `input logic [7:0] a [4]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Token<'a> {
    /// Identifiers and keywords, including scoped names (`pkg::t`,
    /// `bus.master`) and escaped identifiers.
    Word(&'a str),
    /// A bracketed range, brackets included.
    Range(&'a str),
    /// Everything after a top-level `=`.
    Default(&'a str),
    /// Any other character, e.g. an interface-port `.` separator.
    Other(char),
}

fn is_word_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_' || byte == b'\\' || byte == b'$'
}

fn is_word_continue(byte: u8) -> bool {
    byte.is_ascii_alphanumeric()
        || byte == b'_'
        || byte == b'$'
        || byte == b'.'
        || byte == b':'
}

pub(crate) fn tokenize(text: &str) -> Vec<Token<'_>> {
    let bytes = text.as_bytes();
    let mut tokens = vec![];
    let mut index = 0;

    while index < bytes.len() {
        let byte = bytes[index];
        if byte.is_ascii_whitespace() {
            index += 1;
        } else if byte == b'[' {
            let end = find_matching(text, index).unwrap_or(bytes.len() - 1);
            tokens.push(Token::Range(&text[index..=end]));
            index = end + 1;
        } else if byte == b'=' {
            tokens.push(Token::Default(text[index + 1..].trim()));
            break;
        } else if byte == b'\\' {
            // escaped identifiers run until whitespace
            let start = index;
            while index < bytes.len() && !bytes[index].is_ascii_whitespace()
            {
                index += 1;
            }
            tokens.push(Token::Word(&text[start..index]));
        } else if is_word_start(byte) {
            let start = index;
            index += 1;
            while index < bytes.len() && is_word_continue(bytes[index]) {
                index += 1;
            }
            tokens.push(Token::Word(&text[start..index]));
        } else {
            // multi-byte characters are never part of a declaration we model
            let character = text[index..].chars().next().unwrap_or(' ');
            tokens.push(Token::Other(character));
            index += character.len_utf8();
        }
    }

    tokens
}
