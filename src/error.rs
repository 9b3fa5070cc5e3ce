use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RietForgeError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV Error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Parse Error (line {line}): {message}")]
    Parse { line: usize, message: String },

    /// `line_index` is `None` when the key or directive is absent from the model.
    #[error("Mutation target not found{}: {detail}", at_line(.line_index))]
    MutationTargetNotFound {
        line_index: Option<usize>,
        detail: String,
    },

    #[error("Engine invocation failed for {input:?}: {message}")]
    EngineInvocation { input: PathBuf, message: String },

    #[error("No correlation matrix block found")]
    CorrelationBlockMissing,

    #[error("Cycle {cycle} failed on pattern {pattern:?}: {source}")]
    CycleFailed {
        cycle: usize,
        pattern: PathBuf,
        #[source]
        source: Box<RietForgeError>,
    },
}

impl RietForgeError {
    pub fn target_not_found(line_index: usize, detail: impl Into<String>) -> Self {
        Self::MutationTargetNotFound {
            line_index: Some(line_index),
            detail: detail.into(),
        }
    }

    pub fn missing_target(detail: impl Into<String>) -> Self {
        Self::MutationTargetNotFound {
            line_index: None,
            detail: detail.into(),
        }
    }
}

fn at_line(line_index: &Option<usize>) -> String {
    line_index.map(|i| format!(" at line {}", i)).unwrap_or_default()
}

pub type RfResult<T> = Result<T, RietForgeError>;
