use clap::Args;
use rietforge::api;
use rietforge::error::RfResult;
use rietforge::parser::write_lines;
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug, Clone)]
pub struct UpdateArgs {
    /// Refined output file to take values from.
    #[arg(long)]
    pub from: PathBuf,

    /// Input template to rewrite.
    #[arg(long)]
    pub template: PathBuf,

    /// Where to write the result; stdout when omitted.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

pub fn run(args: &UpdateArgs) -> RfResult<()> {
    let (lines, changed) = api::carry_values(&args.from, &args.template)?;
    match &args.output {
        Some(path) => {
            write_lines(path, &lines)?;
            info!("📝 Wrote {:?} ({} values updated)", path, changed);
        }
        None => print!("{}", lines.concat()),
    }
    Ok(())
}
