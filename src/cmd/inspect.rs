use crate::reports;
use clap::Args;
use rietforge::api;
use rietforge::error::RfResult;
use std::path::PathBuf;

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    pub file: PathBuf,

    /// Emit the summary as JSON instead of tables.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

pub fn run(args: &InspectArgs) -> RfResult<()> {
    let (_, summary) = api::inspect_file(&args.file)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        reports::print_model_report(&args.file, &summary);
    }
    Ok(())
}
