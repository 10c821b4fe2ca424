// Copyright (C) 2024 Ethan Uppal.
//
// This Source Code Form is subject to the terms of the Mozilla Public License,
// v. 2.0. If a copy of the MPL was not distributed with this file, You can
// obtain one at https://mozilla.org/MPL/2.0/.

//! Width resolution for packed and unpacked ranges.

use crate::scan::split_top_level;

/// Width substituted for any range that mentions an identifier (usually a
/// parameter). Parameter values are never evaluated, so this is a known
/// precision loss; such ports report `width_exact == false`.
pub const PARAMETERIZED_WIDTH_FALLBACK: usize = 8;

/// The width of one range, and whether it was computed exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RangeWidth {
    pub(crate) width: usize,
    pub(crate) exact: bool,
}

impl RangeWidth {
    const FALLBACK: RangeWidth = RangeWidth {
        width: PARAMETERIZED_WIDTH_FALLBACK,
        exact: false,
    };
}

/// Resolves the width of a single bracketed range such as `[7:0]`,
/// `[WIDTH-1:0]`, `[base +: 4]` or the unpacked shorthand `[16]`.
pub(crate) fn range_width(range: &str) -> RangeWidth {
    let inner = range
        .trim()
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .unwrap_or(range)
        .trim();

    for part_select in ["+:", "-:"] {
        if let Some((_, length)) = inner.split_once(part_select) {
            return match evaluate(length) {
                Some(length) if length >= 1 => RangeWidth {
                    width: length as usize,
                    exact: true,
                },
                _ => RangeWidth::FALLBACK,
            };
        }
    }

    let bounds = split_top_level(inner, b':');
    let width = match bounds.as_slice() {
        [single] => evaluate(single).filter(|size| *size >= 1),
        [msb, lsb] => match (evaluate(msb), evaluate(lsb)) {
            (Some(msb), Some(lsb)) => msb
                .checked_sub(lsb)
                .and_then(i64::checked_abs)
                .and_then(|width| width.checked_add(1)),
            _ => None,
        },
        _ => None,
    };

    match width.and_then(|width| usize::try_from(width).ok()) {
        Some(width) => RangeWidth { width, exact: true },
        None => RangeWidth::FALLBACK,
    }
}

/// Evaluates a constant integer expression over literals, `+ - * / %`, unary
/// minus and parentheses. Any identifier makes the expression non-constant.
pub(crate) fn evaluate(expression: &str) -> Option<i64> {
    let mut parser = ExpressionParser {
        bytes: expression.as_bytes(),
        position: 0,
    };
    let value = parser.sum()?;
    parser.skip_whitespace();
    (parser.position == parser.bytes.len()).then_some(value)
}

struct ExpressionParser<'a> {
    bytes: &'a [u8],
    position: usize,
}

impl ExpressionParser<'_> {
    fn skip_whitespace(&mut self) {
        while self
            .bytes
            .get(self.position)
            .is_some_and(|byte| byte.is_ascii_whitespace())
        {
            self.position += 1;
        }
    }

    fn peek(&mut self) -> Option<u8> {
        self.skip_whitespace();
        self.bytes.get(self.position).copied()
    }

    fn sum(&mut self) -> Option<i64> {
        let mut value = self.product()?;
        loop {
            match self.peek() {
                Some(b'+') => {
                    self.position += 1;
                    value = value.checked_add(self.product()?)?;
                }
                Some(b'-') => {
                    self.position += 1;
                    value = value.checked_sub(self.product()?)?;
                }
                _ => return Some(value),
            }
        }
    }

    fn product(&mut self) -> Option<i64> {
        let mut value = self.unary()?;
        loop {
            match self.peek() {
                Some(b'*') => {
                    self.position += 1;
                    value = value.checked_mul(self.unary()?)?;
                }
                Some(b'/') => {
                    self.position += 1;
                    value = value.checked_div(self.unary()?)?;
                }
                Some(b'%') => {
                    self.position += 1;
                    value = value.checked_rem(self.unary()?)?;
                }
                _ => return Some(value),
            }
        }
    }

    fn unary(&mut self) -> Option<i64> {
        match self.peek()? {
            b'-' => {
                self.position += 1;
                self.unary()?.checked_neg()
            }
            b'+' => {
                self.position += 1;
                self.unary()
            }
            b'(' => {
                self.position += 1;
                let value = self.sum()?;
                (self.peek()? == b')').then(|| self.position += 1)?;
                Some(value)
            }
            byte if byte.is_ascii_digit() || byte == b'\'' => self.literal(),
            _ => None,
        }
    }

    /// Decimal literals and sized or unsized based literals (`8'd12`,
    /// `'hff`).
    fn literal(&mut self) -> Option<i64> {
        let size = self.digits(10);
        if self.bytes.get(self.position) != Some(&b'\'') {
            return size;
        }
        self.position += 1;
        if matches!(self.bytes.get(self.position), Some(b's' | b'S')) {
            self.position += 1;
        }
        let radix = match self.bytes.get(self.position)? {
            b'd' | b'D' => 10,
            b'h' | b'H' => 16,
            b'b' | b'B' => 2,
            b'o' | b'O' => 8,
            _ => return None,
        };
        self.position += 1;
        self.skip_whitespace();
        self.digits(radix)
    }

    fn digits(&mut self, radix: u32) -> Option<i64> {
        let start = self.position;
        while self.bytes.get(self.position).is_some_and(|byte| {
            (*byte as char).is_digit(radix) || *byte == b'_'
        }) {
            self.position += 1;
        }
        let text: String = self.bytes[start..self.position]
            .iter()
            .filter(|byte| **byte != b'_')
            .map(|byte| *byte as char)
            .collect();
        i64::from_str_radix(&text, radix).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_ranges() {
        assert_eq!(range_width("[7:0]"), RangeWidth { width: 8, exact: true });
        assert_eq!(range_width("[0:7]"), RangeWidth { width: 8, exact: true });
        assert_eq!(
            range_width("[ 8 - 1 : 0 ]"),
            RangeWidth { width: 8, exact: true }
        );
        assert_eq!(
            range_width("[4*8-1:0]"),
            RangeWidth {
                width: 32,
                exact: true
            }
        );
        assert_eq!(range_width("[16]"), RangeWidth { width: 16, exact: true });
        assert_eq!(range_width("[0 +: 4]"), RangeWidth { width: 4, exact: true });
        assert_eq!(
            range_width("[8'd15:0]"),
            RangeWidth {
                width: 16,
                exact: true
            }
        );
    }

    #[test]
    fn parameterized_ranges_fall_back() {
        assert_eq!(range_width("[WIDTH-1:0]"), RangeWidth::FALLBACK);
        assert_eq!(range_width("[$clog2(DEPTH)-1:0]"), RangeWidth::FALLBACK);
        assert_eq!(range_width("[]"), RangeWidth::FALLBACK);
    }

    #[test]
    fn overflowing_literal_ranges_fall_back() {
        assert_eq!(
            range_width("[9223372036854775807:-1]"),
            RangeWidth::FALLBACK
        );
        assert_eq!(
            range_width("[-9223372036854775807:1]"),
            RangeWidth::FALLBACK
        );
    }

    #[test]
    fn expressions() {
        assert_eq!(evaluate("(2+3)*4"), Some(20));
        assert_eq!(evaluate("-1 + 2"), Some(1));
        assert_eq!(evaluate("'hff"), Some(255));
        assert_eq!(evaluate("1/0"), None);
        assert_eq!(evaluate("N-1"), None);
        assert_eq!(evaluate("3 3"), None);
    }
}
