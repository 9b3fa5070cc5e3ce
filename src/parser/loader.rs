use super::correlation::CORRELATION_MARKER;
use super::model::{
    BackgroundBlock, FitMetrics, Occupancy, OutputName, ParameterEntry, PatternRef, PhaseBlock,
    PhaseKind, SiteEntry, StructuredModel,
};
use super::tokens::{self, ValueLiteral};
use crate::error::RfResult;
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// Directive that closes a phase block.
pub const HKL_EXPORT: &str = "Create_hklm_d_Th2_Ip_file";
/// Directive naming the XY output artifact of a refinement.
pub const OUTPUT_DIRECTIVE: &str = "Out_X_Yobs_Ycalc_Ydiff";

/// Single-value keywords recorded as phase parameters.
const PHASE_KEYWORDS: &[&str] = &[
    "scale",
    "a",
    "b",
    "c",
    "al",
    "be",
    "ga",
    "r_bragg",
    "weight_percent",
    "cell_mass",
    "cell_volume",
    "volume",
    "phase_MAC",
];

const SITE_KEYWORDS: &[&str] = &["x", "y", "z", "occ", "beq", "num_posns", "rand_xyz", "adps"];

struct MacroSpec {
    name: &'static str,
    keys: &'static [&'static str],
    /// `(code, value)` argument pairs instead of one argument per key.
    paired: bool,
}

const PHASE_MACROS: &[MacroSpec] = &[
    MacroSpec { name: "Cubic", keys: &["a"], paired: false },
    MacroSpec { name: "Tetragonal", keys: &["a", "c"], paired: false },
    MacroSpec { name: "Hexagonal", keys: &["a", "c"], paired: false },
    MacroSpec { name: "Rhombohedral", keys: &["a", "al"], paired: false },
    MacroSpec { name: "MVW", keys: &["cell_mass", "cell_volume", "weight_percent"], paired: false },
    MacroSpec { name: "CS_L", keys: &["CS_L"], paired: true },
    MacroSpec { name: "CS_G", keys: &["CS_G"], paired: true },
    MacroSpec { name: "Strain_L", keys: &["Strain_L"], paired: true },
    MacroSpec { name: "Strain_G", keys: &["Strain_G"], paired: true },
];

const DISPLACEMENT_MACRO: MacroSpec = MacroSpec {
    name: "Specimen_Displacement",
    keys: &["Specimen_Displacement"],
    paired: true,
};

const GLOBAL_MACROS: &[MacroSpec] = &[
    MacroSpec { name: "Zero_Error", keys: &["Zero_Error"], paired: true },
    MacroSpec { name: "One_on_X", keys: &["One_on_X"], paired: true },
];

fn output_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"Out_X_Yobs_Ycalc_Ydiff\s*\(\s*"?([^")\s]+)"?"#).expect("output pattern is valid")
    })
}

fn xdd_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"^\s*xdd\s+"?([^"\s]+)"?"#).expect("xdd pattern is valid"))
}

fn r_wp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\br_wp\b").expect("r_wp pattern is valid"))
}

fn metric_pair_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"([A-Za-z_][A-Za-z0-9_]*)\s+([+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)")
            .expect("metric pattern is valid")
    })
}

/// Which record types [`parse`] keeps.
#[derive(Debug, Clone)]
pub struct ParseOptions {
    pub phases: bool,
    pub background: bool,
    pub displacement: bool,
    pub fit_metrics: bool,
    pub output: bool,
    pub xdd: bool,
    /// Extension of the XY artifact named by the output directive.
    pub pattern_extension: String,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            phases: true,
            background: true,
            displacement: true,
            fit_metrics: true,
            output: true,
            xdd: true,
            pattern_extension: "xy".to_string(),
        }
    }
}

/// Reads a file into lines that keep their terminators.
pub fn read_lines<P: AsRef<Path>>(path: P) -> RfResult<Vec<String>> {
    let content = fs::read_to_string(path)?;
    Ok(split_lines(&content))
}

pub fn split_lines(content: &str) -> Vec<String> {
    content.split_inclusive('\n').map(String::from).collect()
}

pub fn write_lines<P: AsRef<Path>>(path: P, lines: &[String]) -> RfResult<()> {
    fs::write(path, lines.concat())?;
    Ok(())
}

pub fn parse_file<P: AsRef<Path>>(
    path: P,
    options: &ParseOptions,
) -> RfResult<(Vec<String>, StructuredModel)> {
    let path = path.as_ref();
    debug!("Parsing {:?}", path);
    let lines = read_lines(path)?;
    let model = parse(&lines, options);
    Ok((lines, model))
}

/// The parts of one source line the handlers work on.
struct LineCtx<'a> {
    index: usize,
    /// Original text without terminator.
    raw: &'a str,
    /// Same bytes with comments blanked.
    text: &'a str,
}

#[derive(Default)]
struct ParseState {
    phase: Option<usize>,
    last_site: Option<String>,
    bkg_open: bool,
}

/// Builds the structured model of an input or output file in one pass.
///
/// Line-level problems never fail the parse: a field whose tokens are
/// missing or malformed is simply left `None`.
pub fn parse<S: AsRef<str>>(lines: &[S], options: &ParseOptions) -> StructuredModel {
    let visible = tokens::visible_text(lines);
    let mut model = StructuredModel::default();
    let mut state = ParseState::default();
    let mut last_index = 0;

    for (index, (line, text)) in lines.iter().zip(&visible).enumerate() {
        let ctx = LineCtx {
            index,
            raw: line.as_ref().trim_end_matches(['\r', '\n']),
            text: text.trim_end_matches(['\r', '\n']),
        };
        let trimmed = ctx.text.trim();
        if trimmed.is_empty() {
            state.bkg_open = false;
            continue;
        }
        last_index = index;
        if trimmed.starts_with(CORRELATION_MARKER) {
            debug!("Correlation block at line {}, stopping", index);
            break;
        }

        if state.bkg_open {
            if extend_background(&mut model, &ctx) {
                continue;
            }
            state.bkg_open = false;
        }

        if r_wp_re().is_match(ctx.text) {
            if options.fit_metrics && model.fit.is_none() {
                model.fit = Some(read_fit_metrics(&ctx));
            }
            continue;
        }

        let indent = ctx.text.len() - ctx.text.trim_start().len();
        let keyword = trimmed.split_whitespace().next().unwrap_or_default();
        let after_keyword = indent + keyword.len();

        if let Ok(kind) = keyword.parse::<PhaseKind>() {
            close_phase(&mut model, &mut state, index.saturating_sub(1));
            let id = model.phases.len();
            model.phases.push(PhaseBlock::new(id, kind, index));
            state.phase = Some(id);
            debug!("Phase {} ({}) opens at line {}", id, kind, index);
            continue;
        }

        match keyword {
            "xdd" => {
                if options.xdd {
                    model.xdd = read_pattern_ref(&ctx);
                }
                continue;
            }
            "bkg" => {
                if options.background {
                    model.background = Some(read_background(&ctx, after_keyword));
                    state.bkg_open = true;
                }
                continue;
            }
            _ => {}
        }

        if ctx.text.contains(HKL_EXPORT) {
            close_phase(&mut model, &mut state, index);
            continue;
        }

        if ctx.text.contains(OUTPUT_DIRECTIVE) {
            if options.output {
                model.output = read_output_name(&ctx, &options.pattern_extension);
            }
            continue;
        }

        if read_global_macros(&mut model, &ctx, options) {
            continue;
        }

        match state.phase {
            Some(id) => {
                if options.phases {
                    parse_phase_line(&mut model.phases[id], &mut state, &ctx, keyword, after_keyword);
                }
            }
            None => match keyword {
                "scale" => model.scale = Some(read_entry(&ctx, after_keyword, ctx.text.len())),
                "prm" | "local" => {
                    if let Some(entry) = read_prm(&ctx, after_keyword) {
                        if let Some(name) = entry.name.clone() {
                            model.globals.insert(name, entry);
                        }
                    }
                }
                _ => {}
            },
        }
    }

    close_phase(&mut model, &mut state, last_index);
    model
}

fn close_phase(model: &mut StructuredModel, state: &mut ParseState, end_line: usize) {
    if let Some(id) = state.phase.take() {
        model.phases[id].end_line = Some(end_line);
    }
    state.last_site = None;
}

fn parse_phase_line(
    phase: &mut PhaseBlock,
    state: &mut ParseState,
    ctx: &LineCtx,
    keyword: &str,
    after_keyword: usize,
) {
    match keyword {
        "phase_name" => phase.name = Some(unquote(&ctx.text[after_keyword..])),
        "space_group" => phase.space_group = Some(unquote(&ctx.text[after_keyword..])),
        "site" => {
            if let Some(label) = read_site(phase, ctx, after_keyword) {
                state.last_site = Some(label);
            }
        }
        "x" | "y" | "z" | "occ" | "beq" => {
            // continuation of the previous site line
            if let Some(site) = state.last_site.as_ref().and_then(|l| phase.sites.get_mut(l)) {
                read_site_fields(site, ctx, ctx.text.len() - ctx.text.trim_start().len());
            }
        }
        "prm" | "local" => {
            if let Some(entry) = read_prm(ctx, after_keyword) {
                if let Some(name) = entry.name.clone() {
                    phase.parameters.insert(name, entry);
                }
            }
        }
        k if PHASE_KEYWORDS.contains(&k) => {
            let start = ctx.text.len() - ctx.text.trim_start().len();
            for region in keyword_regions(ctx.text, start, PHASE_KEYWORDS) {
                let entry = read_entry(ctx, region.start, region.end);
                phase.parameters.insert(region.keyword.to_string(), entry);
            }
        }
        _ => {}
    }

    for spec in PHASE_MACROS {
        read_macro(spec, ctx, |key, entry| {
            phase.parameters.insert(key.to_string(), entry);
        });
    }
}

/// Top-level paired macros; returns true when the line held one.
fn read_global_macros(model: &mut StructuredModel, ctx: &LineCtx, options: &ParseOptions) -> bool {
    let mut found = false;
    if options.displacement {
        found |= read_macro(&DISPLACEMENT_MACRO, ctx, |_, entry| {
            model.specimen_displacement = Some(entry);
        });
    }
    for spec in GLOBAL_MACROS {
        found |= read_macro(spec, ctx, |key, entry| {
            model.globals.insert(key.to_string(), entry);
        });
    }
    found
}

fn unquote(text: &str) -> String {
    text.trim().trim_end_matches(';').trim().trim_matches('"').to_string()
}

/// Whitespace and comma separated tokens of `text[from..]`, with absolute offsets.
fn split_tokens(text: &str, from: usize, to: usize) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start: Option<usize> = None;
    let slice = &text[from..to];
    for (i, c) in slice.char_indices() {
        let sep = c.is_whitespace() || c == ',';
        match (sep, start) {
            (true, Some(s)) => {
                out.push((from + s, &slice[s..i]));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push((from + s, &slice[s..]));
    }
    out
}

struct KeywordRegion<'k> {
    keyword: &'k str,
    start: usize,
    end: usize,
}

/// For each keyword token after `from`, the span up to the next keyword token.
fn keyword_regions<'k>(text: &str, from: usize, keywords: &[&'k str]) -> Vec<KeywordRegion<'k>> {
    let hits: Vec<(usize, &'k str)> = split_tokens(text, from, text.len())
        .into_iter()
        .filter_map(|(off, tok)| keywords.iter().find(|k| **k == tok).map(|k| (off, *k)))
        .collect();

    hits.iter()
        .enumerate()
        .map(|(i, (off, kw))| KeywordRegion {
            keyword: kw,
            start: off + kw.len(),
            end: hits.get(i + 1).map_or(text.len(), |(next, _)| *next),
        })
        .collect()
}

fn is_identifier(tok: &str) -> bool {
    let mut chars = tok.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// A literal occupying the start of `tok`, followed by nothing but an
/// annotation (a backtick tail, `;` or `)`).
fn literal_token(tok: &str, offset: usize) -> Option<ValueLiteral> {
    let mut lit = tokens::scan_values(tok).into_iter().next()?;
    if lit.column != 0 {
        return None;
    }
    let rest = &tok[lit.end()..];
    if !(rest.is_empty() || rest.starts_with(['`', ';', ')'])) {
        return None;
    }
    lit.column += offset;
    Some(lit)
}

fn set_literal(entry: &mut ParameterEntry, lit: ValueLiteral) {
    entry.column = Some(lit.column);
    entry.value = Some(lit.value);
    entry.literal = Some(lit.literal);
    entry.error = lit.error;
    entry.error_literal = lit.error_literal;
}

/// Reads one value with its annotations from `text[start..end]`.
///
/// Understands `@` (refined), a leading name (`!name` is fixed), `min`/`max`
/// bounds in any position, and equations (`= expr; : value`), which are
/// neither refined nor fixed.
fn read_entry(ctx: &LineCtx, start: usize, end: usize) -> ParameterEntry {
    let mut entry = ParameterEntry::new(ctx.index, ctx.raw);
    let toks = split_tokens(ctx.text, start, end);
    let mut banged = false;
    let mut equation = false;
    let mut i = 0;

    while i < toks.len() {
        let (off, tok) = toks[i];
        match tok {
            "min" | "max" => {
                let bound = toks
                    .get(i + 1)
                    .and_then(|(o, t)| literal_token(t, *o))
                    .map(|l| l.value);
                if tok == "min" {
                    entry.min = bound;
                } else {
                    entry.max = bound;
                }
                i += 2;
                continue;
            }
            _ if tok.starts_with('=') => {
                equation = true;
                if let Some(colon) = ctx.text[off..end].find(':') {
                    let after = off + colon + 1;
                    if let Some(mut lit) = tokens::scan_values(&ctx.text[after..end]).into_iter().next() {
                        lit.column += after;
                        set_literal(&mut entry, lit);
                    }
                }
                break;
            }
            _ if tok.starts_with('@') => {
                entry.marker_column = Some(off);
                if entry.literal.is_none() {
                    if let Some(lit) = literal_token(&tok[1..], off + 1) {
                        set_literal(&mut entry, lit);
                    }
                }
            }
            _ if tok.starts_with('!') && is_identifier(&tok[1..]) => {
                if entry.name.is_none() {
                    entry.name = Some(tok[1..].to_string());
                    entry.name_column = Some(off);
                    banged = true;
                }
            }
            _ if is_identifier(tok) => {
                if entry.name.is_none() && entry.literal.is_none() {
                    entry.name = Some(tok.to_string());
                    entry.name_column = Some(off);
                }
            }
            _ => {
                if entry.literal.is_none() {
                    if let Some(lit) = literal_token(tok, off) {
                        set_literal(&mut entry, lit);
                    }
                }
            }
        }
        i += 1;
    }

    entry.refined = !equation && (entry.marker_column.is_some() || (entry.name.is_some() && !banged));
    entry.fixed = !equation && !entry.refined;
    entry
}

fn read_prm(ctx: &LineCtx, after_keyword: usize) -> Option<ParameterEntry> {
    let entry = read_entry(ctx, after_keyword, ctx.text.len());
    entry.name.is_some().then_some(entry)
}

fn read_site(phase: &mut PhaseBlock, ctx: &LineCtx, after_keyword: usize) -> Option<String> {
    let (label_off, label) = split_tokens(ctx.text, after_keyword, ctx.text.len())
        .into_iter()
        .next()?;
    let (element, index) = tokens::split_site_label(label);
    let site = phase.sites.entry(label.to_string()).or_insert_with(|| SiteEntry {
        label: label.to_string(),
        element,
        index,
        line_index: ctx.index,
        ..Default::default()
    });
    read_site_fields(site, ctx, label_off + label.len());
    Some(label.to_string())
}

fn read_site_fields(site: &mut SiteEntry, ctx: &LineCtx, from: usize) {
    for region in keyword_regions(ctx.text, from, SITE_KEYWORDS) {
        match region.keyword {
            "x" => site.x = Some(read_entry(ctx, region.start, region.end)),
            "y" => site.y = Some(read_entry(ctx, region.start, region.end)),
            "z" => site.z = Some(read_entry(ctx, region.start, region.end)),
            "beq" => site.b_value = Some(read_entry(ctx, region.start, region.end)),
            "occ" => {
                let Some((el_off, element)) = split_tokens(ctx.text, region.start, region.end)
                    .into_iter()
                    .next()
                else {
                    continue;
                };
                let entry = read_entry(ctx, el_off + element.len(), region.end);
                match site.occupancies.iter_mut().find(|o| o.element == element) {
                    Some(occ) => occ.entry = entry,
                    None => site.occupancies.push(Occupancy {
                        element: element.to_string(),
                        entry,
                    }),
                }
            }
            _ => {}
        }
    }
}

fn read_background(ctx: &LineCtx, after_keyword: usize) -> BackgroundBlock {
    let mut block = BackgroundBlock {
        line_index: ctx.index,
        ..Default::default()
    };
    let mut marker = None;
    for (off, tok) in split_tokens(ctx.text, after_keyword, ctx.text.len()) {
        if tok == "@" {
            marker = Some(off);
            block.refined = true;
            continue;
        }
        if let Some(lit) = literal_token(tok, off) {
            block.terms.push(background_term(ctx, lit, marker));
        }
    }
    block
}

/// Extra coefficient lines after `bkg`; true when the whole line was numeric.
fn extend_background(model: &mut StructuredModel, ctx: &LineCtx) -> bool {
    let Some(block) = model.background.as_mut() else {
        return false;
    };
    let toks = split_tokens(ctx.text, 0, ctx.text.len());
    let lits: Vec<ValueLiteral> = toks
        .iter()
        .filter_map(|(off, tok)| literal_token(tok, *off))
        .collect();
    if lits.is_empty() || lits.len() != toks.len() {
        return false;
    }
    let refined = block.refined;
    for lit in lits {
        let mut term = background_term(ctx, lit, None);
        term.refined = refined;
        term.fixed = !refined;
        block.terms.push(term);
    }
    true
}

fn background_term(ctx: &LineCtx, lit: ValueLiteral, marker: Option<usize>) -> ParameterEntry {
    let mut term = ParameterEntry::new(ctx.index, ctx.raw);
    set_literal(&mut term, lit);
    term.marker_column = marker;
    term.refined = marker.is_some();
    term.fixed = !term.refined;
    term
}

/// Argument spans of every `name(...)` call in the line.
fn macro_calls(text: &str, name: &str) -> Vec<Vec<(usize, usize)>> {
    let mut calls = Vec::new();
    for (pos, _) in text.match_indices(name) {
        let glued = text[..pos]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
        let after = pos + name.len();
        let open = match text[after..].find(|c: char| !c.is_whitespace()) {
            Some(rel) if text[after + rel..].starts_with('(') => after + rel,
            _ => continue,
        };
        if glued {
            continue;
        }

        let mut args = Vec::new();
        let mut depth = 0usize;
        let mut arg_start = open + 1;
        let mut closed = false;
        for (i, c) in text[open + 1..].char_indices() {
            let at = open + 1 + i;
            match c {
                '(' => depth += 1,
                ')' if depth == 0 => {
                    args.push((arg_start, at));
                    closed = true;
                    break;
                }
                ')' => depth -= 1,
                ',' if depth == 0 => {
                    args.push((arg_start, at));
                    arg_start = at + 1;
                }
                _ => {}
            }
        }
        if !closed {
            args.push((arg_start, text.len()));
        }
        calls.push(args);
    }
    calls
}

/// Records the keys of `spec` for every call found; true if any call was found.
fn read_macro<F: FnMut(&str, ParameterEntry)>(spec: &MacroSpec, ctx: &LineCtx, mut sink: F) -> bool {
    let calls = macro_calls(ctx.text, spec.name);
    for args in &calls {
        for (k, key) in spec.keys.iter().enumerate() {
            let span = if spec.paired {
                match (args.get(2 * k), args.get(2 * k + 1)) {
                    (Some(code), Some(value)) => (code.0, value.1),
                    _ => continue,
                }
            } else {
                match args.get(k) {
                    Some(arg) => *arg,
                    None => continue,
                }
            };
            let entry = read_entry(ctx, span.0, span.1);
            if entry.literal.is_some() || entry.name.is_some() {
                sink(key, entry);
            }
        }
    }
    !calls.is_empty()
}

fn read_pattern_ref(ctx: &LineCtx) -> Option<PatternRef> {
    let caps = xdd_re().captures(ctx.text)?;
    let file = caps.get(1)?;
    Some(PatternRef {
        line_index: ctx.index,
        column: file.start(),
        filename: file.as_str().to_string(),
        frozen: false,
    })
}

fn read_output_name(ctx: &LineCtx, extension: &str) -> Option<OutputName> {
    let caps = output_re().captures(ctx.text)?;
    let path = caps.get(1)?;
    let file_start = path
        .as_str()
        .rfind(['/', '\\'])
        .map_or(0, |i| i + 1);
    let file = &path.as_str()[file_start..];
    let (stem, ext) = file.rsplit_once('.')?;
    if !ext.eq_ignore_ascii_case(extension) {
        debug!("Output directive names a .{} file, expected .{}", ext, extension);
        return None;
    }

    let mut parts = stem.rsplitn(3, '_');
    let (method, temp, prefix) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(t), Some(p)) => (m, t, p),
        _ => ("", "", stem),
    };

    Some(OutputName {
        line_index: ctx.index,
        column: path.start() + file_start,
        prefix: prefix.to_string(),
        temp: temp.to_string(),
        method: method.to_string(),
        extension: ext.to_string(),
        frozen: false,
    })
}

fn read_fit_metrics(ctx: &LineCtx) -> FitMetrics {
    let values = metric_pair_re()
        .captures_iter(ctx.text)
        .filter_map(|caps| Some((caps[1].to_string(), caps[2].parse().ok()?)))
        .collect();
    FitMetrics {
        line_index: ctx.index,
        values,
    }
}
