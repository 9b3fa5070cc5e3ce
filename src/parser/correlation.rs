use crate::error::{RfResult, RietForgeError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use strum_macros::{Display, EnumString};
use tracing::debug;

/// Line that opens the normalised correlation block of an output file.
pub const CORRELATION_MARKER: &str = "C_matrix_normalized";

/// Flagging threshold in percent. The engine prints correlations as whole
/// percents (the diagonal is `100`) and values are kept on that scale.
pub const DEFAULT_THRESHOLD: f64 = 50.0;

fn row_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\S+)\s+(\d+)\s*:(.*)$").expect("row pattern is valid"))
}

fn signed_number_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?").expect("number pattern is valid")
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum CorrelationFlag {
    #[strum(serialize = "OK")]
    Ok,
    #[strum(serialize = "CHECK")]
    Check,
    #[strum(serialize = "N/A")]
    NotApplicable,
}

impl CorrelationFlag {
    /// `CHECK` iff `|value| > threshold`; no threshold means `N/A`.
    pub fn classify(value: f64, threshold: Option<f64>) -> Self {
        match threshold {
            None => Self::NotApplicable,
            Some(t) if value.abs() > t => Self::Check,
            Some(_) => Self::Ok,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    /// Name of the other variable.
    pub name: String,
    pub value: f64,
    pub flag: CorrelationFlag,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CorrelationRow {
    pub name: String,
    pub correlations: BTreeMap<usize, Correlation>,
}

/// Correlations keyed by variable index on both axes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    pub rows: BTreeMap<usize, CorrelationRow>,
}

/// One off-diagonal pair, as listed by [`CorrelationMatrix::flagged`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationPair {
    pub index_a: usize,
    pub name_a: String,
    pub index_b: usize,
    pub name_b: String,
    pub value: f64,
    pub flag: CorrelationFlag,
}

impl CorrelationMatrix {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, a: usize, b: usize) -> Option<&Correlation> {
        self.rows.get(&a)?.correlations.get(&b)
    }

    /// Looks a pair up in whichever triangle the engine printed it.
    pub fn value(&self, a: usize, b: usize) -> Option<f64> {
        self.get(a, b).or_else(|| self.get(b, a)).map(|c| c.value)
    }

    /// Off-diagonal pairs, each reported once, optionally restricted to one flag.
    pub fn flagged(&self, flag: Option<CorrelationFlag>) -> Vec<CorrelationPair> {
        let mut seen = std::collections::BTreeSet::new();
        let mut pairs = Vec::new();
        for (&a, row) in &self.rows {
            for (&b, corr) in &row.correlations {
                if a == b || flag.is_some_and(|f| f != corr.flag) {
                    continue;
                }
                if !seen.insert((a.min(b), a.max(b))) {
                    continue;
                }
                pairs.push(CorrelationPair {
                    index_a: a,
                    name_a: row.name.clone(),
                    index_b: b,
                    name_b: corr.name.clone(),
                    value: corr.value,
                    flag: corr.flag,
                });
            }
        }
        pairs
    }
}

/// Lenient entry point: a missing block yields an empty matrix.
pub fn parse_correlations<S: AsRef<str>>(lines: &[S], threshold: Option<f64>) -> CorrelationMatrix {
    match try_parse_correlations(lines, threshold) {
        Ok(matrix) => matrix,
        Err(e) => {
            debug!("{}; using an empty correlation matrix", e);
            CorrelationMatrix::default()
        }
    }
}

/// Parses the block after [`CORRELATION_MARKER`].
///
/// The first non-blank line lists the variable indices. Each following row
/// is `<name> <index>: <values>` and may hold either one value per header
/// index or one fewer (the diagonal omitted). Values are scanned as signed
/// numeric runs so `0.34-0.12` reads as two values. The block ends at a
/// blank line, a closing brace or end of input.
pub fn try_parse_correlations<S: AsRef<str>>(
    lines: &[S],
    threshold: Option<f64>,
) -> RfResult<CorrelationMatrix> {
    let marker = lines
        .iter()
        .position(|l| l.as_ref().contains(CORRELATION_MARKER))
        .ok_or(RietForgeError::CorrelationBlockMissing)?;

    let mut rest = lines[marker + 1..]
        .iter()
        .map(|l| l.as_ref().trim())
        .skip_while(|l| l.is_empty() || *l == "{");

    let header: Vec<usize> = match rest.next() {
        Some(line) => line
            .split_whitespace()
            .map(|t| t.parse::<usize>())
            .collect::<Result<_, _>>()
            .map_err(|_| RietForgeError::CorrelationBlockMissing)?,
        None => return Err(RietForgeError::CorrelationBlockMissing),
    };
    if header.is_empty() {
        return Err(RietForgeError::CorrelationBlockMissing);
    }

    let mut raw_rows: Vec<(usize, String, Vec<f64>)> = Vec::new();
    for line in rest {
        if line.is_empty() || line.starts_with('}') {
            break;
        }
        let Some(caps) = row_re().captures(line) else {
            break;
        };
        let Ok(index) = caps[2].parse::<usize>() else {
            break;
        };
        let values = signed_number_re()
            .find_iter(&caps[3])
            .filter_map(|m| m.as_str().parse().ok())
            .collect();
        raw_rows.push((index, caps[1].to_string(), values));
    }

    let names: BTreeMap<usize, String> = raw_rows
        .iter()
        .map(|(index, name, _)| (*index, name.clone()))
        .collect();

    let mut matrix = CorrelationMatrix::default();
    for (index, name, values) in raw_rows {
        let targets: Vec<usize> = if values.len() >= header.len() {
            header.clone()
        } else {
            header.iter().copied().filter(|h| *h != index).collect()
        };
        let correlations = targets
            .into_iter()
            .zip(values)
            .map(|(target, value)| {
                let corr = Correlation {
                    name: names.get(&target).cloned().unwrap_or_default(),
                    value,
                    flag: CorrelationFlag::classify(value, threshold),
                };
                (target, corr)
            })
            .collect();
        matrix.rows.insert(index, CorrelationRow { name, correlations });
    }

    debug!(
        "Parsed {} correlation rows over {} variables",
        matrix.rows.len(),
        header.len()
    );
    Ok(matrix)
}
