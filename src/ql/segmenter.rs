//! Query-string segmenter
//!
//! Splits raw query text on separators that sit at the top level, i.e.
//! outside parentheses and quoted literals. It knows nothing about OData
//! option names; callers decide what the pieces mean.

use std::ops::ControlFlow;

use log::trace;

use crate::core::errors::{ODataError, Result};

/// A piece of the input between two top-level separators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub text: &'a str,
    /// Byte offset of `text` within the scanned input
    pub offset: usize,
}

impl<'a> Segment<'a> {
    /// Split `name=value` on the first `=`; a bare name gets an empty value
    pub fn assignment(&self) -> (&'a str, &'a str) {
        match self.text.split_once('=') {
            Some((name, value)) => (name.trim(), value.trim()),
            None => (self.text.trim(), ""),
        }
    }
}

/// Decode `%XX` escapes. `+` is kept as is; malformed escapes are left
/// untouched.
pub fn percent_decode(input: &str) -> Result<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && bytes[i + 1].is_ascii_hexdigit()
            && bytes[i + 2].is_ascii_hexdigit()
        {
            out.push((hex_value(bytes[i + 1]) << 4) | hex_value(bytes[i + 2]));
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8(out).map_err(|e| ODataError::Syntax {
        offset: e.utf8_error().valid_up_to(),
        message: "percent-encoded text is not valid UTF-8".to_string(),
    })
}

fn hex_value(digit: u8) -> u8 {
    match digit {
        b'0'..=b'9' => digit - b'0',
        b'a'..=b'f' => digit - b'a' + 10,
        _ => digit - b'A' + 10,
    }
}

/// Split `input` on any of `separators` found outside parentheses and
/// quotes. Empty pieces are dropped.
pub fn split_top_level<'a>(input: &'a str, separators: &[char]) -> Result<Vec<Segment<'a>>> {
    let mut segments = Vec::new();
    let mut start = 0;

    scan(input, |offset, c, depth| {
        if depth == 0 && separators.contains(&c) {
            push_trimmed(&mut segments, input, start, offset);
            start = offset + c.len_utf8();
        }
        ControlFlow::Continue(())
    })?;
    push_trimmed(&mut segments, input, start, input.len());

    trace!("segmented {:?} into {} piece(s)", input, segments.len());
    Ok(segments)
}

/// Split a raw, still percent-encoded query string into `name=value`
/// pieces. Structured options end at the next top-level `&`; free text
/// (`$search` and custom options) ends at the next `&` whatever it holds.
pub fn split_query(input: &str) -> Result<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut start = 0;

    while start < input.len() {
        let rest = &input[start..];
        let name = rest.split(['=', '&']).next().unwrap_or("");
        let end = if is_free_text(&percent_decode(name.trim())?) {
            rest.find('&').unwrap_or(rest.len())
        } else {
            top_level_end(rest, '&').map_err(|e| shift_offset(e, start))?
        };
        push_trimmed(&mut segments, input, start, start + end);
        start += end + 1;
    }

    trace!("split query {:?} into {} option(s)", input, segments.len());
    Ok(segments)
}

fn is_free_text(name: &str) -> bool {
    name == "$search" || !name.starts_with('$')
}

/// Offset of the first top-level `separator`, or the input length
fn top_level_end(input: &str, separator: char) -> Result<usize> {
    let mut end = input.len();
    scan(input, |offset, c, depth| {
        if depth == 0 && c == separator {
            end = offset;
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;
    Ok(end)
}

fn shift_offset(error: ODataError, by: usize) -> ODataError {
    match error {
        ODataError::Syntax { offset, message } => ODataError::Syntax { offset: offset + by, message },
        other => other,
    }
}

/// Fail on unbalanced parentheses or an unterminated quote
pub fn check_balanced(input: &str) -> Result<()> {
    scan(input, |_, _, _| ControlFlow::Continue(()))
}

fn push_trimmed<'a>(segments: &mut Vec<Segment<'a>>, input: &'a str, start: usize, end: usize) {
    let raw = &input[start..end];
    let text = raw.trim();
    if !text.is_empty() {
        let lead = raw.len() - raw.trim_start().len();
        segments.push(Segment { text, offset: start + lead });
    }
}

/// Walk the input, reporting every character outside quotes together with
/// the current parenthesis depth. Doubled quotes inside a literal re-open it
/// immediately, so `'O''Neil'` stays one literal. A `Break` from `visit`
/// ends the walk without the balance checks.
fn scan<F>(input: &str, mut visit: F) -> Result<()>
where
    F: FnMut(usize, char, usize) -> ControlFlow<()>,
{
    let mut open_parens: Vec<usize> = Vec::new();
    let mut quote: Option<(char, usize)> = None;

    for (offset, c) in input.char_indices() {
        if let Some((q, _)) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '\'' | '"' => quote = Some((c, offset)),
            '(' => open_parens.push(offset),
            ')' => {
                if open_parens.pop().is_none() {
                    return Err(ODataError::Syntax {
                        offset,
                        message: "unmatched ')'".to_string(),
                    });
                }
            },
            _ => {
                if visit(offset, c, open_parens.len()).is_break() {
                    return Ok(());
                }
            },
        }
    }

    if let Some((q, offset)) = quote {
        return Err(ODataError::Syntax {
            offset,
            message: format!("unterminated {} literal", if q == '\'' { "string" } else { "quoted" }),
        });
    }

    if let Some(&offset) = open_parens.first() {
        return Err(ODataError::Syntax {
            offset,
            message: "unmatched '('".to_string(),
        });
    }

    Ok(())
}
