use super::engine::{RefinementEngine, SimulatedEngine, TopasEngine};
use super::ledger::{write_ledger, LEDGER_FILE};
use super::monitor::{MonitorEntry, PhaseMonitor};
use crate::config::{Config, EngineParams};
use crate::error::{RfResult, RietForgeError};
use crate::mutator::{rename_output, set_pattern};
use crate::parser::loader::{parse, read_lines, write_lines, ParseOptions};
use crate::parser::model::FreezeTarget;
use crate::parser::tokens::extract_temperature;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use strum_macros::Display;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
pub enum CycleStage {
    Idle,
    Parsing,
    Mutating,
    Invoking,
    Collecting,
}

pub struct RefinementOptions {
    pub method: String,
    pub input_name: String,
    pub output_prefix: String,
    pub output_extension: String,
    pub parse: ParseOptions,
}

impl From<&Config> for RefinementOptions {
    fn from(cfg: &Config) -> Self {
        Self {
            method: cfg.naming.method.clone(),
            input_name: cfg.naming.input_name.clone(),
            output_prefix: cfg.naming.output_prefix.clone(),
            output_extension: cfg.engine.output_extension.clone(),
            parse: ParseOptions {
                pattern_extension: cfg.naming.pattern_extension.clone(),
                ..ParseOptions::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle: usize,
    pub pattern: PathBuf,
    pub stem: String,
    /// Archived output file.
    pub output: PathBuf,
    pub r_wp: Option<f64>,
    pub r_exp: Option<f64>,
    pub gof: Option<f64>,
    /// Phase enable/disable events of this cycle.
    pub events: Vec<String>,
}

/// Receives every finished cycle.
/// Returning false stops the run after that cycle.
pub trait CycleCallback {
    fn on_cycle(&self, report: &CycleReport) -> bool;
}

impl<F: Fn(&CycleReport) -> bool> CycleCallback for F {
    fn on_cycle(&self, report: &CycleReport) -> bool {
        self(report)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub campaign: String,
    pub cycles: Vec<CycleReport>,
    pub monitors: Vec<MonitorEntry>,
    /// False when a callback stopped the run early.
    pub completed: bool,
    pub ledger: PathBuf,
}

/// Drives the cycles of one pattern sequence. Each cycle's output becomes
/// the next cycle's template, so cycles run strictly in order.
pub struct Refiner<E: RefinementEngine> {
    engine: E,
    options: RefinementOptions,
    monitor: PhaseMonitor,
    stage: CycleStage,
}

impl<E: RefinementEngine> Refiner<E> {
    pub fn new(engine: E, options: RefinementOptions, monitor: PhaseMonitor) -> Self {
        Self {
            engine,
            options,
            monitor,
            stage: CycleStage::Idle,
        }
    }

    pub fn stage(&self) -> CycleStage {
        self.stage
    }

    pub fn monitor(&self) -> &PhaseMonitor {
        &self.monitor
    }

    /// Runs one cycle per pattern, then writes the ledger into `work_dir`.
    ///
    /// The first failing cycle aborts the sequence with
    /// [`RietForgeError::CycleFailed`]; the ledger still lists the cycles
    /// that completed before it.
    pub fn run<CB: CycleCallback>(
        &mut self,
        template: &Path,
        patterns: &[PathBuf],
        work_dir: &Path,
        callback: CB,
    ) -> RfResult<RunSummary> {
        fs::create_dir_all(work_dir)?;
        let work_dir = fs::canonicalize(work_dir)?;
        let ledger = work_dir.join(LEDGER_FILE);
        let mut current = read_lines(template)?;
        let mut cycles = Vec::with_capacity(patterns.len());
        let mut completed = true;

        for (cycle, pattern) in patterns.iter().enumerate() {
            let report = match self.run_cycle(cycle, pattern, &mut current, &work_dir) {
                Ok(report) => report,
                Err(e) => {
                    warn!("❌ Cycle {} failed at stage {}: {}", cycle, self.stage, e);
                    self.stage = CycleStage::Idle;
                    write_ledger(&ledger, &cycles)?;
                    return Err(RietForgeError::CycleFailed {
                        cycle,
                        pattern: pattern.clone(),
                        source: Box::new(e),
                    });
                }
            };
            self.stage = CycleStage::Idle;

            let keep_going = callback.on_cycle(&report);
            cycles.push(report);
            if !keep_going {
                info!("🛑 Run stopped after cycle {}", cycle);
                completed = false;
                break;
            }
        }

        write_ledger(&ledger, &cycles)?;
        Ok(RunSummary {
            campaign: String::new(),
            cycles,
            monitors: self.monitor.entries().to_vec(),
            completed,
            ledger,
        })
    }

    fn run_cycle(
        &mut self,
        cycle: usize,
        pattern: &Path,
        current: &mut Vec<String>,
        work_dir: &Path,
    ) -> RfResult<CycleReport> {
        let opts = &self.options;

        self.stage = CycleStage::Parsing;
        let mut model = parse(current, &opts.parse);
        let expected_phases = model.phases.len();

        self.stage = CycleStage::Mutating;
        let label = cycle_label(cycle, pattern);
        let suffix = format!("{}_{}", label, opts.method);
        let mut lines = current.clone();
        if model.xdd.is_some() {
            let absolute = fs::canonicalize(pattern).unwrap_or_else(|_| pattern.to_path_buf());
            lines = set_pattern(lines, &mut model, &absolute.to_string_lossy())?;
        }
        let (lines, stem) = rename_output(lines, &mut model, &suffix)?;
        model.freeze(FreezeTarget::Output);
        let stem = stem.unwrap_or_else(|| format!("{}_{}", opts.output_prefix, suffix));

        let input = work_dir.join(&opts.input_name);
        write_lines(&input, &lines)?;

        self.stage = CycleStage::Invoking;
        info!("🔬 Cycle {} [{}] {}", cycle, label, pattern.display());
        let output = self.engine.invoke(&input)?;

        self.stage = CycleStage::Collecting;
        if !output.exists() {
            return Err(RietForgeError::EngineInvocation {
                input,
                message: format!("output file {:?} is missing", output),
            });
        }
        let mut out_lines = read_lines(&output)?;
        if out_lines.iter().all(|l| l.trim().is_empty()) {
            return Err(RietForgeError::Parse {
                line: 0,
                message: format!("{:?} is empty", output),
            });
        }
        let mut out_model = parse(&out_lines, &opts.parse);
        if expected_phases > 0 && out_model.phases.is_empty() {
            return Err(RietForgeError::Parse {
                line: 0,
                message: format!(
                    "{:?} has no phases, template had {}",
                    output, expected_phases
                ),
            });
        }

        let instructions = self.monitor.observe(&out_model);
        if !instructions.is_empty() {
            out_lines = self.monitor.apply(out_lines, &mut out_model, &instructions)?;
            write_lines(&output, &out_lines)?;
        }

        let archived = work_dir.join(format!("{}.{}", stem, opts.output_extension));
        if archived != output {
            fs::copy(&output, &archived)?;
        }

        info!(
            "✅ Cycle {} done: r_wp {}",
            cycle,
            out_model.r_wp().map_or("n/a".to_string(), |r| format!("{:.4}", r))
        );
        let report = CycleReport {
            cycle,
            pattern: pattern.to_path_buf(),
            stem,
            output: archived,
            r_wp: out_model.r_wp(),
            r_exp: out_model.r_exp(),
            gof: out_model.gof(),
            events: instructions.iter().map(|i| i.describe()).collect(),
        };
        *current = out_lines;
        Ok(report)
    }
}

/// `<temp>C` when the pattern name carries a temperature, else the
/// 1-based cycle ordinal padded to six digits.
pub fn cycle_label(cycle: usize, pattern: &Path) -> String {
    let stem = pattern
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    match extract_temperature(&stem) {
        Some(t) => format!("{}C", t),
        None => format!("{:06}", cycle + 1),
    }
}

/// `count` indices spread evenly over `0..n`, first and last included.
pub fn select_evenly(n: usize, count: usize) -> Vec<usize> {
    if count == 0 || count >= n {
        return (0..n).collect();
    }
    if count == 1 {
        return vec![0];
    }
    (0..count).map(|i| i * (n - 1) / (count - 1)).collect()
}

/// One independent pattern sequence with its own template and work dir.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub name: String,
    pub template: PathBuf,
    pub data_dir: PathBuf,
    pub work_dir: PathBuf,
    #[serde(default)]
    pub reverse_order: bool,
    /// Evenly spaced subsample of the discovered patterns.
    #[serde(default)]
    pub count: Option<usize>,
}

impl Campaign {
    /// Reads one campaign object or an array of them.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> RfResult<Vec<Self>> {
        let content = fs::read_to_string(path)?;
        if content.trim_start().starts_with('[') {
            Ok(serde_json::from_str(&content)?)
        } else {
            Ok(vec![serde_json::from_str(&content)?])
        }
    }

    /// Pattern files in `data_dir`, sorted by name, subsampled and ordered.
    pub fn discover_patterns(&self, extension: &str) -> RfResult<Vec<PathBuf>> {
        let mut files: Vec<PathBuf> = fs::read_dir(&self.data_dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.is_file()
                    && p.extension()
                        .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(extension))
            })
            .collect();
        files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

        let mut picked: Vec<PathBuf> = match self.count {
            Some(count) => select_evenly(files.len(), count)
                .into_iter()
                .map(|i| files[i].clone())
                .collect(),
            None => files,
        };
        if self.reverse_order {
            picked.reverse();
        }
        Ok(picked)
    }

    pub fn run(&self, config: &Config, seed_offset: u64) -> RfResult<RunSummary> {
        let patterns = self.discover_patterns(&config.naming.pattern_extension)?;
        if patterns.is_empty() {
            warn!("⚠️  Campaign '{}': no patterns in {:?}", self.name, self.data_dir);
        }
        info!(
            "🚀 Campaign '{}': {} patterns from {:?}",
            self.name,
            patterns.len(),
            self.data_dir
        );

        let engine = build_engine(&config.engine, seed_offset);
        let monitor = PhaseMonitor::from_params(&config.monitor)?;
        let mut refiner = Refiner::new(engine, RefinementOptions::from(config), monitor);

        let name = self.name.as_str();
        let mut summary = refiner.run(
            &self.template,
            &patterns,
            &self.work_dir,
            |report: &CycleReport| {
                info!("[{}] cycle {} -> {}", name, report.cycle, report.stem);
                true
            },
        )?;
        summary.campaign = self.name.clone();
        Ok(summary)
    }
}

pub fn build_engine(params: &EngineParams, seed_offset: u64) -> Box<dyn RefinementEngine + Send> {
    if params.simulate {
        let seed = params.simulate_seed.map(|s| s.wrapping_add(seed_offset));
        Box::new(SimulatedEngine::new(
            params.simulate_noise,
            seed,
            &params.output_extension,
        ))
    } else {
        Box::new(TopasEngine::from(params))
    }
}

/// Runs independent campaigns in parallel; results keep the input order.
pub fn run_campaigns(campaigns: &[Campaign], config: &Config) -> Vec<RfResult<RunSummary>> {
    campaigns
        .par_iter()
        .enumerate()
        .map(|(i, campaign)| campaign.run(config, i as u64))
        .collect()
}
