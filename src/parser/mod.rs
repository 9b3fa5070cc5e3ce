pub mod correlation;
pub mod loader;
pub mod model;
pub mod tokens;

pub use correlation::{
    parse_correlations, try_parse_correlations, Correlation, CorrelationFlag, CorrelationMatrix,
    CorrelationPair, CORRELATION_MARKER,
};
pub use loader::{parse, parse_file, read_lines, split_lines, write_lines, ParseOptions};
pub use model::{
    BackgroundBlock, FitMetrics, FreezeTarget, Occupancy, OutputName, ParamKey, ParameterEntry,
    PatternRef, PhaseBlock, PhaseKind, SiteEntry, SiteField, StructuredModel,
};
