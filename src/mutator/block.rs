use super::{expect_text, line_at, splice};
use crate::error::{RfResult, RietForgeError};
use crate::parser::model::StructuredModel;
use tracing::debug;

/// Inserts `new_lines` before `at_index` and returns the number of lines added.
///
/// Recorded line indices are NOT adjusted here; callers either call
/// [`StructuredModel::shift_lines`] right after, or use [`insert_block_tracked`].
pub fn insert_block(
    mut lines: Vec<String>,
    at_index: usize,
    new_lines: &[String],
) -> RfResult<(Vec<String>, usize)> {
    if at_index > lines.len() {
        return Err(RietForgeError::target_not_found(
            at_index,
            format!("insertion point past the end of {} lines", lines.len()),
        ));
    }
    if at_index == lines.len() {
        if let Some(last) = lines.last_mut().filter(|l| !l.ends_with('\n')) {
            last.push('\n');
        }
    }
    let block: Vec<String> = new_lines
        .iter()
        .map(|l| {
            if l.ends_with('\n') {
                l.clone()
            } else {
                format!("{}\n", l)
            }
        })
        .collect();
    let offset = block.len();
    lines.splice(at_index..at_index, block);
    Ok((lines, offset))
}

/// [`insert_block`] followed by the matching [`StructuredModel::shift_lines`].
pub fn insert_block_tracked(
    lines: Vec<String>,
    model: &mut StructuredModel,
    at_index: usize,
    new_lines: &[String],
) -> RfResult<Vec<String>> {
    let (lines, offset) = insert_block(lines, at_index, new_lines)?;
    model.shift_lines(at_index, offset);
    debug!("Inserted {} lines at {}", offset, at_index);
    Ok(lines)
}

/// Replaces the output stem `<prefix>_<temp>_<method>` with
/// `<prefix>_<new_suffix>` and returns the new stem.
///
/// A model without an output directive is left alone and yields `None`.
pub fn rename_output(
    mut lines: Vec<String>,
    model: &mut StructuredModel,
    new_suffix: &str,
) -> RfResult<(Vec<String>, Option<String>)> {
    let Some(output) = model.output.clone() else {
        return Ok((lines, None));
    };
    let old_stem = output.stem();
    expect_text(line_at(&lines, output.line_index)?, output.line_index, output.column, &old_stem)?;

    let new_stem = format!("{}_{}", output.prefix, new_suffix);
    let range = output.column..output.column + old_stem.len();
    splice(&mut lines, model, output.line_index, range, &new_stem)?;

    if let Some(out) = model.output.as_mut() {
        let (temp, method) = new_suffix.rsplit_once('_').unwrap_or((new_suffix, ""));
        out.temp = temp.to_string();
        out.method = method.to_string();
    }
    debug!("Output stem {} -> {}", old_stem, new_stem);
    Ok((lines, Some(new_stem)))
}

/// Points the `xdd` directive at `path`.
pub fn set_pattern(
    mut lines: Vec<String>,
    model: &mut StructuredModel,
    path: &str,
) -> RfResult<Vec<String>> {
    let Some(xdd) = model.xdd.clone() else {
        return Err(RietForgeError::missing_target("no xdd directive"));
    };
    expect_text(line_at(&lines, xdd.line_index)?, xdd.line_index, xdd.column, &xdd.filename)?;

    let range = xdd.column..xdd.column + xdd.filename.len();
    splice(&mut lines, model, xdd.line_index, range, path)?;
    if let Some(x) = model.xdd.as_mut() {
        x.filename = path.to_string();
    }
    Ok(lines)
}
