use crate::reports;
use clap::Args;
use rietforge::config::Config;
use rietforge::error::{RfResult, RietForgeError};
use rietforge::refine::{run_campaigns, Campaign};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Args, Debug, Clone)]
pub struct RefineArgs {
    #[command(flatten)]
    pub config: Config,

    /// Campaign JSON file (one object or an array); repeatable.
    #[arg(long)]
    pub campaign: Vec<PathBuf>,

    // Single campaign from flags
    #[arg(long)]
    pub template: Option<PathBuf>,
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    #[arg(long)]
    pub work_dir: Option<PathBuf>,
    #[arg(long, default_value = "campaign")]
    pub name: String,
    #[arg(long, default_value_t = false)]
    pub reverse: bool,
    #[arg(short = 'n', long)]
    pub count: Option<usize>,
}

fn collect_campaigns(args: &RefineArgs) -> RfResult<Vec<Campaign>> {
    let mut campaigns = Vec::new();
    for path in &args.campaign {
        campaigns.extend(Campaign::load_from_file(path)?);
    }

    match (&args.template, &args.data_dir, &args.work_dir) {
        (Some(template), Some(data_dir), Some(work_dir)) => campaigns.push(Campaign {
            name: args.name.clone(),
            template: template.clone(),
            data_dir: data_dir.clone(),
            work_dir: work_dir.clone(),
            reverse_order: args.reverse,
            count: args.count,
        }),
        (None, None, None) => {}
        _ => {
            return Err(RietForgeError::Config(
                "--template, --data-dir and --work-dir must be given together".to_string(),
            ))
        }
    }

    if campaigns.is_empty() {
        return Err(RietForgeError::Config(
            "Nothing to refine: pass --campaign or --template/--data-dir/--work-dir".to_string(),
        ));
    }
    Ok(campaigns)
}

pub fn run(args: &RefineArgs, config: &Config) -> RfResult<()> {
    let campaigns = collect_campaigns(args)?;
    if config.engine.simulate {
        info!("🧪 Simulated engine (noise {})", config.engine.simulate_noise);
    } else {
        info!("🔧 Engine: {}", config.engine.engine_program);
    }

    let results = run_campaigns(&campaigns, config);

    let mut first_error = None;
    for (campaign, result) in campaigns.iter().zip(results) {
        match result {
            Ok(summary) => reports::print_run_summary(&summary),
            Err(e) => {
                error!("❌ Campaign '{}' failed: {}", campaign.name, e);
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
