use clap::{ArgMatches, CommandFactory, FromArgMatches, Parser, Subcommand};
use rietforge::config::Config;
use rietforge::error::RfResult;
use std::process;
use tracing::{error, info, Level};

mod cmd;
mod reports;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON config; command-line flags override its values.
    #[arg(global = true, long)]
    config: Option<String>,

    #[arg(global = true, long, default_value_t = false)]
    debug: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse an input or output file and print its model.
    Inspect(cmd::inspect::InspectArgs),
    /// Print correlated parameter pairs of an output file.
    Correlations(cmd::correlations::CorrelationArgs),
    /// Copy refined values from an output file into a template.
    Update(cmd::update::UpdateArgs),
    /// Run refinement cycles over one or more pattern sequences.
    Refine(cmd::refine::RefineArgs),
}

fn main() {
    // Raw matches tell user input apart from defaults
    let matches = Cli::command().get_matches();
    let cli = Cli::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());

    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    let result = match &cli.command {
        Commands::Inspect(args) => cmd::inspect::run(args),
        Commands::Correlations(args) => cmd::correlations::run(args),
        Commands::Update(args) => cmd::update::run(args),
        Commands::Refine(args) => resolve_config(
            cli.config.as_deref(),
            &args.config,
            matches.subcommand_matches("refine"),
        )
        .and_then(|config| cmd::refine::run(args, &config)),
    };

    if let Err(e) = result {
        error!("❌ {}", e);
        process::exit(1);
    }
}

fn resolve_config(
    path: Option<&str>,
    cli_config: &Config,
    sub_matches: Option<&ArgMatches>,
) -> RfResult<Config> {
    let Some(path) = path else {
        return Ok(cli_config.clone());
    };
    info!("⚙️  Loading config from {}", path);
    let mut config = Config::load_from_file(path)?;
    if let Some(m) = sub_matches {
        config.merge_from_cli(cli_config, m);
    }
    Ok(config)
}
