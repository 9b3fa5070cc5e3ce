use crate::error::RfResult;
use crate::mutator::{self, carry_forward};
use crate::parser::correlation::{parse_correlations, CorrelationFlag, CorrelationPair};
use crate::parser::loader::{parse_file, read_lines, ParseOptions};
use crate::parser::model::{PhaseKind, StructuredModel};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PhaseSummary {
    pub id: usize,
    pub kind: PhaseKind,
    pub name: Option<String>,
    pub space_group: Option<String>,
    pub start_line: usize,
    pub end_line: Option<usize>,
    pub site_count: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ParameterRow {
    pub key: String,
    pub name: Option<String>,
    pub value: Option<f64>,
    pub error: Option<f64>,
    pub refined: bool,
    pub fixed: bool,
    pub line: usize,
}

/// Flat view of a parsed file for tables and JSON output.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub phases: Vec<PhaseSummary>,
    pub parameters: Vec<ParameterRow>,
    pub output_stem: Option<String>,
    pub pattern: Option<String>,
    pub fit: BTreeMap<String, f64>,
}

impl From<&StructuredModel> for ModelSummary {
    fn from(model: &StructuredModel) -> Self {
        let phases = model
            .phases
            .iter()
            .map(|p| PhaseSummary {
                id: p.id,
                kind: p.kind,
                name: p.name.clone(),
                space_group: p.space_group.clone(),
                start_line: p.start_line,
                end_line: p.end_line,
                site_count: p.sites.len(),
            })
            .collect();

        let parameters = model
            .keys()
            .into_iter()
            .filter_map(|key| {
                let e = model.entry(&key)?;
                Some(ParameterRow {
                    key: key.to_string(),
                    name: e.name.clone(),
                    value: e.value,
                    error: e.error,
                    refined: e.refined,
                    fixed: e.fixed,
                    line: e.line_index,
                })
            })
            .collect();

        Self {
            phases,
            parameters,
            output_stem: model.output.as_ref().map(|o| o.stem()),
            pattern: model.xdd.as_ref().map(|x| x.filename.clone()),
            fit: model.fit.as_ref().map(|f| f.values.clone()).unwrap_or_default(),
        }
    }
}

/// Service: parse an input or output file.
pub fn inspect_file<P: AsRef<Path>>(path: P) -> RfResult<(StructuredModel, ModelSummary)> {
    let (_, model) = parse_file(path, &ParseOptions::default())?;
    let summary = ModelSummary::from(&model);
    Ok((model, summary))
}

/// Service: correlation pairs of an output file, flagged ones only unless `all`.
pub fn correlation_pairs<P: AsRef<Path>>(
    path: P,
    threshold: f64,
    all: bool,
) -> RfResult<Vec<CorrelationPair>> {
    let lines = read_lines(path)?;
    let matrix = parse_correlations(&lines, Some(threshold));
    let filter = if all { None } else { Some(CorrelationFlag::Check) };
    Ok(matrix.flagged(filter))
}

/// Service: copy refined values from an output file into a template.
///
/// Returns the rewritten template lines and the number of values changed.
pub fn carry_values<P: AsRef<Path>, Q: AsRef<Path>>(
    refined_path: P,
    template_path: Q,
) -> RfResult<(Vec<String>, usize)> {
    let options = ParseOptions::default();
    let (_, refined) = parse_file(refined_path, &options)?;
    let (lines, mut template) = parse_file(template_path, &options)?;

    let updates = carry_forward(&template, &refined);
    info!("Carrying {} refined values into the template", updates.len());
    let lines = mutator::mutate(lines, &mut template, &updates)?;
    Ok((lines, updates.len()))
}
