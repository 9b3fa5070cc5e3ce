use crate::reports;
use clap::Args;
use rietforge::api;
use rietforge::error::RfResult;
use rietforge::parser::correlation::DEFAULT_THRESHOLD;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct CorrelationArgs {
    pub file: PathBuf,

    /// Flag pairs whose |correlation| exceeds this many percent.
    #[arg(short = 't', long, default_value_t = DEFAULT_THRESHOLD)]
    pub threshold: f64,

    /// List every pair, not only those above the threshold.
    #[arg(long, default_value_t = false)]
    pub all: bool,
}

pub fn run(args: &CorrelationArgs) -> RfResult<()> {
    let pairs = api::correlation_pairs(&args.file, args.threshold, args.all)?;
    reports::print_correlation_report(&pairs, args.threshold);
    Ok(())
}
