//! In-place rewriting of line buffers driven by a [`StructuredModel`].
//!
//! Every edit is a substring replacement at a recorded column, verified
//! against the text it expects to find. Column positions of other entries on
//! the edited line are shifted so the model stays valid for the next edit.

mod block;

pub use block::{insert_block, insert_block_tracked, rename_output, set_pattern};

use crate::error::{RfResult, RietForgeError};
use crate::parser::model::{ParamKey, StructuredModel};
use crate::parser::tokens::{format_value, strip_inline_comment, ERROR_SUFFIX};
use std::ops::Range;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorChange {
    /// Leave any existing error suffix as written.
    Keep,
    Set(f64),
    /// Drop the error suffix.
    Clear,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterUpdate {
    pub key: ParamKey,
    pub value: f64,
    pub error: ErrorChange,
}

impl ParameterUpdate {
    pub fn new(key: ParamKey, value: f64) -> Self {
        Self {
            key,
            value,
            error: ErrorChange::Keep,
        }
    }

    pub fn with_error(mut self, error: f64) -> Self {
        self.error = ErrorChange::Set(error);
        self
    }

    pub fn clearing_error(mut self) -> Self {
        self.error = ErrorChange::Clear;
        self
    }
}

/// Applies `updates` in order. The model is updated alongside the text, so
/// applying the same update twice leaves the buffer as after the first.
pub fn mutate(
    mut lines: Vec<String>,
    model: &mut StructuredModel,
    updates: &[ParameterUpdate],
) -> RfResult<Vec<String>> {
    for update in updates {
        apply_update(&mut lines, model, update)?;
    }
    Ok(lines)
}

fn apply_update(
    lines: &mut [String],
    model: &mut StructuredModel,
    update: &ParameterUpdate,
) -> RfResult<()> {
    let entry = model
        .entry(&update.key)
        .ok_or_else(|| RietForgeError::missing_target(format!("no entry for {}", update.key)))?;
    let line_index = entry.line_index;
    let (Some(column), Some(literal)) = (entry.column, entry.literal.clone()) else {
        return Err(RietForgeError::target_not_found(
            line_index,
            format!("{} has no literal to replace", update.key),
        ));
    };
    let old_error = entry.error_literal.clone();

    let line = line_at(lines, line_index)?;
    expect_text(line, line_index, column, &literal)?;

    let mut end = column + literal.len();
    let existing_suffix = old_error
        .as_ref()
        .map(|e| format!("{}{}", ERROR_SUFFIX, e))
        .filter(|s| line[end..].starts_with(s.as_str()));
    if let Some(suffix) = &existing_suffix {
        end += suffix.len();
    }

    let new_literal = format_value(update.value);
    let mut replacement = new_literal.clone();
    let new_error_literal = match update.error {
        ErrorChange::Keep => existing_suffix.as_ref().and(old_error),
        ErrorChange::Set(err) => Some(format_value(err)),
        ErrorChange::Clear => None,
    };
    if let Some(err) = &new_error_literal {
        replacement.push_str(ERROR_SUFFIX);
        replacement.push_str(err);
    }

    splice(lines, model, line_index, column..end, &replacement)?;

    if let Some(entry) = model.entry_mut(&update.key) {
        entry.value = Some(update.value);
        entry.literal = Some(new_literal);
        entry.error = new_error_literal.as_ref().and_then(|e| e.parse().ok());
        entry.error_literal = new_error_literal;
    }
    debug!("{} -> {} (line {})", update.key, replacement, line_index);
    Ok(())
}

/// Toggles `key` between refined and fixed by editing only its markers:
/// the `@` before the value, or the `!` before a parameter name.
pub fn set_refinement(
    mut lines: Vec<String>,
    model: &mut StructuredModel,
    key: &ParamKey,
    refined: bool,
) -> RfResult<Vec<String>> {
    let entry = model
        .entry(key)
        .ok_or_else(|| RietForgeError::missing_target(format!("no entry for {}", key)))?
        .clone();
    if entry.refined == refined {
        return Ok(lines);
    }
    let line_index = entry.line_index;
    let banged = match entry.name_column {
        Some(nc) => line_at(&lines, line_index)?
            .get(nc..)
            .is_some_and(|rest| rest.starts_with('!')),
        None => false,
    };

    if refined {
        match (entry.name_column, entry.column) {
            (Some(nc), _) if banged => {
                splice(&mut lines, model, line_index, nc..nc + 1, "")?;
            }
            (None, Some(column)) if entry.marker_column.is_none() => {
                splice(&mut lines, model, line_index, column..column, "@ ")?;
                if let Some(e) = model.entry_mut(key) {
                    e.marker_column = Some(column);
                }
            }
            _ => {
                return Err(RietForgeError::target_not_found(
                    line_index,
                    format!("{} has no marker position", key),
                ))
            }
        }
    } else {
        if let Some(m) = entry.marker_column {
            expect_text(line_at(&lines, line_index)?, line_index, m, "@")?;
            splice(&mut lines, model, line_index, m..m + 1, "")?;
            // a bkg '@' is shared by every term on its line
            for e in model.entries_on_line_mut(line_index) {
                if e.marker_column == Some(m) {
                    e.marker_column = None;
                    if e.name.is_none() {
                        e.refined = false;
                        e.fixed = true;
                    }
                }
            }
        }
        if let (Some(nc), false) = (entry.name_column, banged) {
            splice(&mut lines, model, line_index, nc..nc, "!")?;
            if let Some(e) = model.entry_mut(key) {
                e.name_column = Some(nc);
            }
        }
    }

    if let Some(e) = model.entry_mut(key) {
        e.refined = refined;
        e.fixed = !refined;
    }
    debug!("{} refined={} (line {})", key, refined, line_index);
    Ok(lines)
}

/// Appends ` min <bound>` to the code part of a line that has no `min` yet.
pub fn append_lower_bound(
    mut lines: Vec<String>,
    model: &mut StructuredModel,
    line_index: usize,
    bound: f64,
) -> RfResult<Vec<String>> {
    let line = line_at(&lines, line_index)?;
    let code = strip_inline_comment(line.trim_end_matches(['\r', '\n']));
    if code.split_whitespace().any(|t| t == "min") {
        return Ok(lines);
    }
    let at = code.trim_end().len();
    let text = format!(" min {}", format_value(bound));
    splice(&mut lines, model, line_index, at..at, &text)?;

    for e in model.entries_on_line_mut(line_index) {
        if e.literal.is_some() && e.min.is_none() {
            e.min = Some(bound);
        }
    }
    Ok(lines)
}

/// Updates for every key present in both models whose refined value differs.
pub fn carry_forward(template: &StructuredModel, refined: &StructuredModel) -> Vec<ParameterUpdate> {
    template
        .keys()
        .into_iter()
        .filter_map(|key| {
            let current = template.entry(&key)?;
            let next = refined.entry(&key)?;
            current.literal.as_ref()?;
            let value = next.value?;
            if current.value == Some(value) && current.error == next.error {
                return None;
            }
            let error = match next.error {
                Some(e) => ErrorChange::Set(e),
                None => ErrorChange::Keep,
            };
            Some(ParameterUpdate { key, value, error })
        })
        .collect()
}

fn line_at(lines: &[String], line_index: usize) -> RfResult<&String> {
    lines.get(line_index).ok_or_else(|| {
        RietForgeError::target_not_found(
            line_index,
            format!("buffer has {} lines", lines.len()),
        )
    })
}

fn expect_text(line: &str, line_index: usize, column: usize, expected: &str) -> RfResult<()> {
    match line.get(column..) {
        Some(rest) if rest.starts_with(expected) => Ok(()),
        _ => Err(RietForgeError::target_not_found(
            line_index,
            format!("expected '{}' at column {}", expected, column),
        )),
    }
}

/// Replaces `range` of one line and keeps every recorded column on that
/// line pointing at the same text.
fn splice(
    lines: &mut [String],
    model: &mut StructuredModel,
    line_index: usize,
    range: Range<usize>,
    replacement: &str,
) -> RfResult<()> {
    let total = lines.len();
    let line = lines.get_mut(line_index).ok_or_else(|| {
        RietForgeError::target_not_found(line_index, format!("buffer has {} lines", total))
    })?;
    if line.get(range.clone()).is_none() {
        return Err(RietForgeError::target_not_found(
            line_index,
            format!("columns {:?} outside the line", range),
        ));
    }
    line.replace_range(range.clone(), replacement);
    let raw = line.trim_end_matches(['\r', '\n']).to_string();
    let delta = replacement.len() as isize - range.len() as isize;
    let from = range.end;

    for e in model.entries_on_line_mut(line_index) {
        shift(&mut e.column, from, delta);
        shift(&mut e.marker_column, from, delta);
        shift(&mut e.name_column, from, delta);
        e.raw_text.clone_from(&raw);
    }
    if let Some(out) = model.output.as_mut().filter(|o| o.line_index == line_index) {
        let mut col = Some(out.column);
        shift(&mut col, from, delta);
        out.column = col.unwrap_or(out.column);
    }
    if let Some(xdd) = model.xdd.as_mut().filter(|x| x.line_index == line_index) {
        let mut col = Some(xdd.column);
        shift(&mut col, from, delta);
        xdd.column = col.unwrap_or(xdd.column);
    }
    Ok(())
}

fn shift(position: &mut Option<usize>, from: usize, delta: isize) {
    if let Some(p) = position {
        if *p >= from {
            *p = p.saturating_add_signed(delta);
        }
    }
}
