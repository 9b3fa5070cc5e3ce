//! Regex primitives for pulling numbers and words out of TOPAS text.
//!
//! All functions are pure and never fail: absence of a match yields an
//! empty collection or `None`.

use regex::Regex;
use std::sync::OnceLock;

/// Signed decimal or scientific literal.
const NUMBER_PATTERN: &str = r"[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?";

/// Marker that introduces the standard error of a refined value: `1.5`_0.02`.
pub const ERROR_SUFFIX: &str = "`_";

fn number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(NUMBER_PATTERN).expect("number pattern is valid"))
}

fn word_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z][A-Za-z_]*").expect("word pattern is valid"))
}

fn site_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([A-Za-z]+)(\d*)").expect("site label pattern is valid"))
}

fn temperature_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(-?\d+)C(?:[^A-Za-z]|$)").expect("temperature pattern is valid"))
}

/// A numeric literal located in a line, with its optional error suffix.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueLiteral {
    /// Byte offset of the literal.
    pub column: usize,
    pub literal: String,
    pub value: f64,
    pub error_literal: Option<String>,
    pub error: Option<f64>,
}

impl ValueLiteral {
    /// Byte offset just past the literal and its error suffix.
    pub fn end(&self) -> usize {
        let mut end = self.column + self.literal.len();
        if let Some(err) = &self.error_literal {
            end += ERROR_SUFFIX.len() + err.len();
        }
        end
    }
}

/// True when the match at `start` is glued to a preceding identifier
/// (`Ph1`, `lp_a2`). The TOPAS error marker "`_" is not glue.
fn is_glued(text: &str, start: usize) -> bool {
    let mut before = text[..start].chars().rev();
    match before.next() {
        Some(c) if c.is_ascii_alphabetic() => true,
        Some('_') => before.next() != Some('`'),
        _ => false,
    }
}

/// Every standalone numeric literal in `text`, in order.
fn standalone_numbers(text: &str) -> impl Iterator<Item = regex::Match<'_>> + '_ {
    number_re()
        .find_iter(text)
        .filter(move |m| !is_glued(text, m.start()))
}

/// All integers in the line, including indices glued to labels (`O1` gives `1`).
pub fn find_integers(line: &str) -> Vec<i64> {
    number_re()
        .find_iter(line)
        .map(|m| m.as_str())
        .filter(|s| !s.contains(['.', 'e', 'E']))
        .filter_map(|s| s.trim_start_matches('+').parse().ok())
        .collect()
}

/// All standalone floats in the line, scientific notation included.
///
/// Numbers glued to an identifier (`Ph1`) are skipped, while a sign glued to
/// a previous number splits it (`0.34-0.12` gives two values).
pub fn find_floats(line: &str) -> Vec<f64> {
    standalone_numbers(line)
        .filter_map(|m| m.as_str().parse().ok())
        .collect()
}

/// Bare words with every numeric run removed first, so `O1` yields `O`.
pub fn find_words(line: &str) -> Vec<String> {
    let mut stripped = String::with_capacity(line.len());
    let mut last = 0;
    for m in number_re().find_iter(line) {
        stripped.push_str(&line[last..m.start()]);
        stripped.push(' ');
        last = m.end();
    }
    stripped.push_str(&line[last..]);

    word_re()
        .find_iter(&stripped)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// True iff the refinement marker `@` appears outside an inline comment.
pub fn is_refined(line: &str) -> bool {
    strip_inline_comment(line).contains('@')
}

/// Byte offset where an inline `'` comment starts, ignoring quotes inside `"..."`.
pub fn inline_comment_start(line: &str) -> Option<usize> {
    let mut quoted = false;
    for (i, c) in line.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '\'' if !quoted => return Some(i),
            _ => {}
        }
    }
    None
}

pub fn strip_inline_comment(line: &str) -> &str {
    match inline_comment_start(line) {
        Some(i) => &line[..i],
        None => line,
    }
}

/// Copies of `lines` with comment text blanked out.
///
/// Block comments (`/* ... */`, possibly spanning lines) and inline `'`
/// comments are replaced by spaces of equal byte length, so byte columns in
/// the result address the same characters in the original line.
pub fn visible_text<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
    let mut in_block = false;
    let mut out = Vec::with_capacity(lines.len());

    for line in lines {
        let line = line.as_ref();
        let mut visible = String::with_capacity(line.len());
        let mut quoted = false;
        let mut in_inline = false;
        let mut chars = line.char_indices().peekable();

        while let Some((i, c)) = chars.next() {
            if c == '\n' || c == '\r' {
                visible.push(c);
                continue;
            }
            if in_block {
                if line[i..].starts_with("*/") {
                    in_block = false;
                    chars.next();
                    visible.push_str("  ");
                } else {
                    blank(&mut visible, c);
                }
                continue;
            }
            if in_inline {
                blank(&mut visible, c);
                continue;
            }
            match c {
                '"' => {
                    quoted = !quoted;
                    visible.push(c);
                }
                '\'' if !quoted => {
                    in_inline = true;
                    blank(&mut visible, c);
                }
                '/' if !quoted && line[i..].starts_with("/*") => {
                    in_block = true;
                    chars.next();
                    visible.push_str("  ");
                }
                _ => visible.push(c),
            }
        }
        out.push(visible);
    }
    out
}

fn blank(buf: &mut String, c: char) {
    for _ in 0..c.len_utf8() {
        buf.push(' ');
    }
}

/// Every standalone literal in `text` with its error suffix attached.
///
/// The error literal of `0.25`_0.01` is consumed by its value and not
/// reported again.
pub fn scan_values(text: &str) -> Vec<ValueLiteral> {
    let mut values = Vec::new();
    let mut consumed = 0;

    for m in standalone_numbers(text) {
        if m.start() < consumed {
            continue;
        }
        let Ok(value) = m.as_str().parse::<f64>() else {
            continue;
        };
        let mut lit = ValueLiteral {
            column: m.start(),
            literal: m.as_str().to_string(),
            value,
            error_literal: None,
            error: None,
        };
        if let Some((err_lit, err)) = error_suffix_at(text, m.end()) {
            lit.error_literal = Some(err_lit);
            lit.error = Some(err);
        }
        consumed = lit.end();
        values.push(lit);
    }
    values
}

/// Reads "`_<number>" starting exactly at `at`.
pub fn error_suffix_at(text: &str, at: usize) -> Option<(String, f64)> {
    let rest = text.get(at..)?;
    if !rest.starts_with(ERROR_SUFFIX) {
        return None;
    }
    let start = at + ERROR_SUFFIX.len();
    let m = number_re().find_at(text, start)?;
    if m.start() != start {
        return None;
    }
    let value = m.as_str().parse().ok()?;
    Some((m.as_str().to_string(), value))
}

/// Splits a site label into element and index: `"O1"` gives `("O", Some(1))`.
pub fn split_site_label(label: &str) -> (String, Option<u32>) {
    match site_label_re().captures(label) {
        Some(caps) => {
            let element = caps[1].to_string();
            let index = caps.get(2).and_then(|m| m.as_str().parse().ok());
            (element, index)
        }
        None => (label.to_string(), None),
    }
}

/// Shortest literal that parses back to `value`.
///
/// Plain notation inside `[1e-4, 1e7)`, scientific outside it.
pub fn format_value(value: f64) -> String {
    if value == 0.0 {
        return "0".to_string();
    }
    let magnitude = value.abs();
    if (1e-4..1e7).contains(&magnitude) {
        format!("{}", value)
    } else {
        format!("{:e}", value)
    }
}

/// Temperature tag in a file name: `"scan_25C_03"` gives `Some(25)`.
pub fn extract_temperature(name: &str) -> Option<i64> {
    temperature_re()
        .captures(name)
        .and_then(|caps| caps[1].parse().ok())
}
