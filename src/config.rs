use crate::error::{RfResult, RietForgeError};
use clap::{parser::ValueSource, ArgMatches, Args};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Args, Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    #[command(flatten)]
    pub engine: EngineParams,
    #[command(flatten)]
    pub monitor: MonitorParams,
    #[command(flatten)]
    pub naming: NamingParams,
}

#[derive(Args, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineParams {
    /// Refinement engine executable, called as `<program> <input>`.
    #[arg(long, default_value = "tc")]
    pub engine_program: String,
    /// Working directory for the engine process.
    #[arg(long)]
    pub engine_dir: Option<String>,
    #[arg(long, default_value_t = 3600)]
    pub engine_timeout_secs: u64,
    #[arg(long, default_value = "out")]
    pub output_extension: String,

    // Dry runs
    #[arg(long, default_value_t = false)]
    pub simulate: bool,
    #[arg(long, default_value_t = 0.05)]
    pub simulate_noise: f64,
    #[arg(long)]
    pub simulate_seed: Option<u64>,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            engine_program: "tc".to_string(),
            engine_dir: None,
            engine_timeout_secs: 3600,
            output_extension: "out".to_string(),
            simulate: false,
            simulate_noise: 0.05,
            simulate_seed: None,
        }
    }
}

#[derive(Args, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorParams {
    /// Comma list of phases to switch off once their scale collapses.
    #[arg(long, default_value = "")]
    pub phases_off: String,
    /// Comma list of suppressed phases to switch on once Rwp degrades.
    #[arg(long, default_value = "")]
    pub phases_on: String,

    // One value for every phase, or one per phase
    #[arg(long, default_value = "0.01")]
    pub threshold_off: String,
    #[arg(long, default_value = "0.0195")]
    pub threshold_on: String,

    #[arg(long, default_value_t = 1e-100)]
    pub off_scale_value: f64,
    #[arg(long, default_value_t = 1e-5)]
    pub on_scale_value: f64,
}

impl Default for MonitorParams {
    fn default() -> Self {
        Self {
            phases_off: String::new(),
            phases_on: String::new(),
            threshold_off: "0.01".to_string(),
            threshold_on: "0.0195".to_string(),
            off_scale_value: 1e-100,
            on_scale_value: 1e-5,
        }
    }
}

#[derive(Args, Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NamingParams {
    #[arg(long, default_value = "rietveld")]
    pub method: String,
    /// File name the mutated input is written to inside the work dir.
    #[arg(long, default_value = "cycle.inp")]
    pub input_name: String,
    #[arg(long, default_value = "xy")]
    pub pattern_extension: String,
    /// Stem prefix used when the template has no XY output directive.
    #[arg(long, default_value = "result")]
    pub output_prefix: String,
}

impl Default for NamingParams {
    fn default() -> Self {
        Self {
            method: "rietveld".to_string(),
            input_name: "cycle.inp".to_string(),
            pattern_extension: "xy".to_string(),
            output_prefix: "result".to_string(),
        }
    }
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> RfResult<Self> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Copies onto `self` only the values the user typed on the command line.
    pub fn merge_from_cli(&mut self, cli: &Config, matches: &ArgMatches) {
        macro_rules! update_if_present {
            ($section:ident, $field:ident) => {
                if matches.value_source(stringify!($field)) == Some(ValueSource::CommandLine) {
                    self.$section.$field = cli.$section.$field.clone();
                }
            };
        }

        update_if_present!(engine, engine_program);
        update_if_present!(engine, engine_dir);
        update_if_present!(engine, engine_timeout_secs);
        update_if_present!(engine, output_extension);
        update_if_present!(engine, simulate);
        update_if_present!(engine, simulate_noise);
        update_if_present!(engine, simulate_seed);

        update_if_present!(monitor, phases_off);
        update_if_present!(monitor, phases_on);
        update_if_present!(monitor, threshold_off);
        update_if_present!(monitor, threshold_on);
        update_if_present!(monitor, off_scale_value);
        update_if_present!(monitor, on_scale_value);

        update_if_present!(naming, method);
        update_if_present!(naming, input_name);
        update_if_present!(naming, pattern_extension);
        update_if_present!(naming, output_prefix);
    }
}

impl MonitorParams {
    pub fn phases_off_list(&self) -> Vec<String> {
        split_list(&self.phases_off)
    }

    pub fn phases_on_list(&self) -> Vec<String> {
        split_list(&self.phases_on)
    }

    pub fn thresholds_off(&self) -> RfResult<Vec<f64>> {
        let values = parse_f64_list(&self.threshold_off, "threshold_off")?;
        broadcast(values, self.phases_off_list().len(), "threshold_off")
    }

    pub fn thresholds_on(&self) -> RfResult<Vec<f64>> {
        let values = parse_f64_list(&self.threshold_on, "threshold_on")?;
        broadcast(values, self.phases_on_list().len(), "threshold_on")
    }
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

fn parse_f64_list(s: &str, name: &str) -> RfResult<Vec<f64>> {
    split_list(s)
        .iter()
        .map(|p| {
            p.parse::<f64>()
                .map_err(|_| RietForgeError::Config(format!("Invalid number '{}' in --{}", p, name)))
        })
        .collect()
}

fn broadcast(values: Vec<f64>, count: usize, name: &str) -> RfResult<Vec<f64>> {
    match values.len() {
        _ if count == 0 => Ok(Vec::new()),
        1 => Ok(vec![values[0]; count]),
        n if n == count => Ok(values),
        n => Err(RietForgeError::Config(format!(
            "--{} has {} values for {} phases",
            name, n, count
        ))),
    }
}
