//! One text line to an ordered vector of finite floats.

use thiserror::Error;

/// Why a line failed to parse.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line contained no numeric fields at all.
    #[error("line has no numeric fields")]
    Empty,

    /// A field could not be read as a finite float.
    #[error("unparseable field at byte {offset}")]
    BadField {
        /// Byte offset of the offending field.
        offset: usize,
    },

    /// A character that is neither a separator nor part of a number.
    #[error("stray character {found:?} at byte {offset}")]
    StrayChar {
        /// The offending character.
        found: char,
        /// Byte offset where it was found.
        offset: usize,
    },

    /// An empty field after the first value (e.g. `1,,2`).
    #[error("empty field at byte {offset}")]
    EmptyField {
        /// Byte offset of the second separator.
        offset: usize,
    },
}

/// Stateless parser for one frame per line.
///
/// Fields are separated by `,`, `;`, `|`, or runs of spaces and tabs.
/// Runs of separators are tolerated at the head of the line only (some
/// firmware emits a leading comma), so `",,,1,2"` parses as `[1.0, 2.0]`
/// while `"1,,2"` fails: past the first value an empty field indicates
/// corruption. A trailing separator after the last value is accepted.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvFloatParser;

impl CsvFloatParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse one line into its numeric fields.
    pub fn parse_line(&self, line: &str) -> Result<Vec<f32>, ParseError> {
        let bytes = line.as_bytes();
        let mut i = 0;

        // Head tolerance: skip any mix of whitespace and separators.
        while i < bytes.len() && (is_ws(bytes[i]) || is_sep(bytes[i])) {
            i += 1;
        }
        if i >= bytes.len() {
            return Err(ParseError::Empty);
        }

        let mut vals = Vec::with_capacity(16);
        loop {
            let start = i;
            while i < bytes.len() && is_num_byte(bytes[i]) {
                i += 1;
            }
            if i == start {
                return Err(ParseError::StrayChar {
                    found: line[start..].chars().next().unwrap_or('\u{fffd}'),
                    offset: start,
                });
            }
            let v: f32 = line[start..i]
                .parse()
                .map_err(|_| ParseError::BadField { offset: start })?;
            if !v.is_finite() {
                return Err(ParseError::BadField { offset: start });
            }
            vals.push(v);

            while i < bytes.len() && is_ws(bytes[i]) {
                i += 1;
            }
            if i >= bytes.len() {
                break;
            }

            if is_sep(bytes[i]) {
                i += 1;
                while i < bytes.len() && is_ws(bytes[i]) {
                    i += 1;
                }
                if i >= bytes.len() {
                    break; // trailing separator
                }
                if is_sep(bytes[i]) {
                    return Err(ParseError::EmptyField { offset: i });
                }
            }
            // Whitespace alone also joins fields; anything else is caught
            // by the number scan at the top of the loop.
        }
        Ok(vals)
    }
}

fn is_ws(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

fn is_sep(b: u8) -> bool {
    b == b',' || b == b';' || b == b'|'
}

fn is_num_byte(b: u8) -> bool {
    b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<Vec<f32>, ParseError> {
        CsvFloatParser::new().parse_line(line)
    }

    #[test]
    fn mixed_separators() {
        assert_eq!(
            parse("  1.5, -2 ; 3\t4|5").unwrap(),
            vec![1.5, -2.0, 3.0, 4.0, 5.0]
        );
    }

    #[test]
    fn leading_separators_tolerated() {
        assert_eq!(parse(",,,1,2").unwrap(), vec![1.0, 2.0]);
        assert_eq!(parse(",1").unwrap(), vec![1.0]);
        assert_eq!(parse("\t , 7").unwrap(), vec![7.0]);
    }

    #[test]
    fn mid_line_empty_field_fails() {
        assert!(matches!(parse("1,,2"), Err(ParseError::EmptyField { .. })));
        assert!(matches!(parse("1, ,2"), Err(ParseError::EmptyField { .. })));
        assert!(matches!(parse("1;;2"), Err(ParseError::EmptyField { .. })));
    }

    #[test]
    fn empty_inputs_fail() {
        assert_eq!(parse(""), Err(ParseError::Empty));
        assert_eq!(parse(",,"), Err(ParseError::Empty));
        assert_eq!(parse("   "), Err(ParseError::Empty));
    }

    #[test]
    fn trailing_separator_tolerated() {
        assert_eq!(parse("1,2,").unwrap(), vec![1.0, 2.0]);
        assert_eq!(parse("1,2, ").unwrap(), vec![1.0, 2.0]);
    }

    #[test]
    fn stray_characters_fail() {
        assert!(matches!(parse("1,x,2"), Err(ParseError::StrayChar { .. })));
        assert!(matches!(parse("abc"), Err(ParseError::StrayChar { .. })));
    }

    #[test]
    fn malformed_numbers_fail() {
        assert!(matches!(parse("1.2.3"), Err(ParseError::BadField { .. })));
        assert!(matches!(parse("1e"), Err(ParseError::BadField { .. })));
        // "nan"/"inf" are not numeric fields on this wire format.
        assert!(parse("nan").is_err());
        assert!(parse("1,inf").is_err());
        // Overflowing literals are non-finite.
        assert!(matches!(parse("1e999"), Err(ParseError::BadField { .. })));
    }

    #[test]
    fn scientific_notation() {
        assert_eq!(parse("1e-3,2.5E2").unwrap(), vec![0.001, 250.0]);
    }

    #[test]
    fn parser_is_pure() {
        let p = CsvFloatParser::new();
        let a = p.parse_line("1,2,3").unwrap();
        let b = p.parse_line("1,2,3").unwrap();
        assert_eq!(a, b);
    }
}
