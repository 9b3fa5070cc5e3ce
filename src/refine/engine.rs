use crate::config::EngineParams;
use crate::error::{RfResult, RietForgeError};
use crate::mutator::{self, ErrorChange, ParameterUpdate};
use crate::parser::loader::{parse, read_lines, write_lines, ParseOptions};
use crate::parser::tokens::format_value;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The external refinement program, seen only through its file contract:
/// it takes an input path and leaves an output file behind.
pub trait RefinementEngine {
    fn invoke(&mut self, input: &Path) -> RfResult<PathBuf>;
}

impl<E: RefinementEngine + ?Sized> RefinementEngine for Box<E> {
    fn invoke(&mut self, input: &Path) -> RfResult<PathBuf> {
        (**self).invoke(input)
    }
}

impl<E: RefinementEngine + ?Sized> RefinementEngine for &mut E {
    fn invoke(&mut self, input: &Path) -> RfResult<PathBuf> {
        (**self).invoke(input)
    }
}

/// `<input stem>.<extension>` next to the input.
pub fn expected_output(input: &Path, extension: &str) -> PathBuf {
    input.with_extension(extension)
}

fn invocation_error(input: &Path, message: impl Into<String>) -> RietForgeError {
    RietForgeError::EngineInvocation {
        input: input.to_path_buf(),
        message: message.into(),
    }
}

/// Runs the real engine as a child process.
pub struct TopasEngine {
    program: PathBuf,
    working_dir: Option<PathBuf>,
    timeout: Duration,
    output_extension: String,
}

impl TopasEngine {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration, output_extension: &str) -> Self {
        Self {
            program: program.into(),
            working_dir: None,
            timeout,
            output_extension: output_extension.to_string(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl From<&EngineParams> for TopasEngine {
    fn from(params: &EngineParams) -> Self {
        let engine = Self::new(
            &params.engine_program,
            Duration::from_secs(params.engine_timeout_secs),
            &params.output_extension,
        );
        match &params.engine_dir {
            Some(dir) => engine.with_working_dir(dir),
            None => engine,
        }
    }
}

impl RefinementEngine for TopasEngine {
    fn invoke(&mut self, input: &Path) -> RfResult<PathBuf> {
        let mut cmd = Command::new(&self.program);
        cmd.arg(input).stdout(Stdio::null()).stderr(Stdio::null());
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        debug!("Running {:?} {:?}", self.program, input);
        let mut child = cmd
            .spawn()
            .map_err(|e| invocation_error(input, format!("failed to start {:?}: {}", self.program, e)))?;

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if start.elapsed() >= self.timeout {
                if let Err(e) = child.kill() {
                    debug!("Kill after timeout failed for {:?}: {}", input, e);
                }
                if let Err(e) = child.wait() {
                    debug!("Reaping timed-out engine failed for {:?}: {}", input, e);
                }
                return Err(invocation_error(
                    input,
                    format!("timed out after {}s", self.timeout.as_secs()),
                ));
            }
            thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            return Err(invocation_error(input, format!("exited with {}", status)));
        }

        let output = expected_output(input, &self.output_extension);
        if !output.exists() {
            return Err(invocation_error(
                input,
                format!("no output file at {:?}", output),
            ));
        }
        Ok(output)
    }
}

/// Dry-run stand-in: nudges every refined value by relative noise and
/// writes a fresh fit-metrics line.
pub struct SimulatedEngine {
    noise: f64,
    rng: fastrand::Rng,
    output_extension: String,
}

impl SimulatedEngine {
    pub fn new(noise: f64, seed: Option<u64>, output_extension: &str) -> Self {
        let rng = match seed {
            Some(s) => fastrand::Rng::with_seed(s),
            None => fastrand::Rng::new(),
        };
        Self {
            noise,
            rng,
            output_extension: output_extension.to_string(),
        }
    }

    fn jitter(&mut self, value: f64) -> f64 {
        value * (1.0 + self.noise * (2.0 * self.rng.f64() - 1.0))
    }
}

impl From<&EngineParams> for SimulatedEngine {
    fn from(params: &EngineParams) -> Self {
        Self::new(
            params.simulate_noise,
            params.simulate_seed,
            &params.output_extension,
        )
    }
}

impl RefinementEngine for SimulatedEngine {
    fn invoke(&mut self, input: &Path) -> RfResult<PathBuf> {
        let lines = read_lines(input)?;
        let mut model = parse(&lines, &ParseOptions::default());

        let mut updates = Vec::new();
        for key in model.keys() {
            let Some(entry) = model.entry(&key) else { continue };
            let (true, Some(value), Some(_)) = (entry.refined, entry.value, entry.literal.as_ref()) else {
                continue;
            };
            let new_value = self.jitter(value);
            let error = (new_value * self.noise * 0.1).abs();
            updates.push(ParameterUpdate {
                key,
                value: new_value,
                error: ErrorChange::Set(error),
            });
        }
        let mut lines = mutator::mutate(lines, &mut model, &updates)
            .map_err(|e| invocation_error(input, e.to_string()))?;

        let r_exp = 2.0 + 2.0 * self.rng.f64();
        let r_wp = r_exp * (1.0 + self.rng.f64());
        let metrics = format!(
            "r_exp {} r_wp {} gof {}\n",
            format_value(r_exp),
            format_value(r_wp),
            format_value(r_wp / r_exp)
        );
        match model.fit.as_ref().map(|f| f.line_index) {
            Some(i) if i < lines.len() => lines[i] = metrics,
            _ => lines.insert(0, metrics),
        }

        let output = expected_output(input, &self.output_extension);
        write_lines(&output, &lines)?;
        debug!("Simulated refinement of {} values into {:?}", updates.len(), output);
        Ok(output)
    }
}
