//! Per-phase automaton that switches phases off when their scale collapses
//! and on when the global fit degrades.

use crate::config::MonitorParams;
use crate::error::{RfResult, RietForgeError};
use crate::mutator::{self, append_lower_bound, ParameterUpdate};
use crate::parser::model::{ParamKey, PhaseBlock, StructuredModel};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
pub enum MonitorMode {
    TurnOn,
    TurnOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum MonitorState {
    #[strum(serialize = "MONITORING")]
    Monitoring,
    #[strum(serialize = "STOPPED")]
    Stopped,
}

/// History of one monitored phase. Once `stopped` it never changes again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorEntry {
    pub phase_name: String,
    pub mode: MonitorMode,
    pub history: Vec<f64>,
    pub stopped: bool,
    pub threshold: f64,
}

impl MonitorEntry {
    pub fn new(phase_name: impl Into<String>, mode: MonitorMode, threshold: f64) -> Self {
        Self {
            phase_name: phase_name.into(),
            mode,
            history: Vec::new(),
            stopped: false,
            threshold,
        }
    }

    pub fn state(&self) -> MonitorState {
        if self.stopped {
            MonitorState::Stopped
        } else {
            MonitorState::Monitoring
        }
    }

    /// Feeds one cycle's observation; true when the monitor fires.
    ///
    /// The first observation only seeds the history. `TurnOff` fires when
    /// `value / max(history)` falls to the threshold or below; `TurnOn`
    /// fires when `(value - min) / min` reaches the threshold. A history
    /// whose reference value is not positive never fires.
    pub fn advance(&mut self, value: f64) -> bool {
        if self.stopped {
            return false;
        }
        if self.history.is_empty() {
            self.history.push(value);
            return false;
        }

        let fire = match self.mode {
            MonitorMode::TurnOff => {
                let max = self.history.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                max > 0.0 && value / max <= self.threshold
            }
            MonitorMode::TurnOn => {
                let min = self.history.iter().copied().fold(f64::INFINITY, f64::min);
                min > 0.0 && (value - min) / min >= self.threshold
            }
        };

        if fire {
            self.stopped = true;
        } else {
            self.history.push(value);
        }
        fire
    }
}

/// Rewrite emitted when a monitor fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewriteInstruction {
    pub monitor: usize,
    pub phase: usize,
    pub phase_name: String,
    pub mode: MonitorMode,
    /// New scale factor.
    pub value: f64,
    pub lower_bound: Option<f64>,
}

impl RewriteInstruction {
    pub fn describe(&self) -> String {
        let verb = match self.mode {
            MonitorMode::TurnOff => "disabled",
            MonitorMode::TurnOn => "enabled",
        };
        format!("{} {}", self.phase_name, verb)
    }
}

pub struct PhaseMonitor {
    entries: Vec<MonitorEntry>,
    off_value: f64,
    on_value: f64,
}

impl PhaseMonitor {
    pub fn new(entries: Vec<MonitorEntry>, off_value: f64, on_value: f64) -> Self {
        Self {
            entries,
            off_value,
            on_value,
        }
    }

    /// Off monitors first, then on monitors, each in list order.
    pub fn from_params(params: &MonitorParams) -> RfResult<Self> {
        let off = params.phases_off_list();
        let on = params.phases_on_list();
        let off_thresholds = params.thresholds_off()?;
        let on_thresholds = params.thresholds_on()?;

        if let Some(dup) = off.iter().find(|p| on.contains(p)) {
            return Err(RietForgeError::Config(format!(
                "Phase '{}' is listed in both --phases-off and --phases-on",
                dup
            )));
        }

        let entries = off
            .into_iter()
            .zip(off_thresholds)
            .map(|(name, t)| MonitorEntry::new(name, MonitorMode::TurnOff, t))
            .chain(
                on.into_iter()
                    .zip(on_thresholds)
                    .map(|(name, t)| MonitorEntry::new(name, MonitorMode::TurnOn, t)),
            )
            .collect();

        Ok(Self::new(entries, params.off_scale_value, params.on_scale_value))
    }

    pub fn entries(&self) -> &[MonitorEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<MonitorEntry> {
        self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Advances every live monitor against one refined model.
    pub fn observe(&mut self, model: &StructuredModel) -> Vec<RewriteInstruction> {
        let mut instructions = Vec::new();
        let r_wp = model.r_wp();

        for (i, entry) in self.entries.iter_mut().enumerate() {
            if entry.stopped {
                continue;
            }
            let Some(phase) = find_phase(model, &entry.phase_name) else {
                warn!("⚠️  Monitored phase '{}' not found", entry.phase_name);
                continue;
            };
            let observed = match entry.mode {
                MonitorMode::TurnOff => phase.scale().and_then(|s| s.value),
                MonitorMode::TurnOn => r_wp,
            };
            let Some(observed) = observed else {
                warn!(
                    "⚠️  No {} value for monitored phase '{}'",
                    if entry.mode == MonitorMode::TurnOff { "scale" } else { "r_wp" },
                    entry.phase_name
                );
                continue;
            };

            if entry.advance(observed) {
                let (value, lower_bound) = match entry.mode {
                    MonitorMode::TurnOff => (self.off_value, Some(0.0)),
                    MonitorMode::TurnOn => (self.on_value, None),
                };
                instructions.push(RewriteInstruction {
                    monitor: i,
                    phase: phase.id,
                    phase_name: entry.phase_name.clone(),
                    mode: entry.mode,
                    value,
                    lower_bound,
                });
            }
        }
        instructions
    }

    /// Applies rewrites in order to the scale line of each phase.
    pub fn apply(
        &self,
        mut lines: Vec<String>,
        model: &mut StructuredModel,
        instructions: &[RewriteInstruction],
    ) -> RfResult<Vec<String>> {
        for ins in instructions {
            let key = ParamKey::phase(ins.phase, "scale");
            let update = ParameterUpdate::new(key.clone(), ins.value).clearing_error();
            lines = mutator::mutate(lines, model, &[update])?;

            if let Some(bound) = ins.lower_bound {
                let line_index = model
                    .entry(&key)
                    .map(|e| e.line_index)
                    .ok_or_else(|| RietForgeError::missing_target(format!("no entry for {}", key)))?;
                lines = append_lower_bound(lines, model, line_index, bound)?;
            }

            match ins.mode {
                MonitorMode::TurnOff => info!("🔻 DISABLED {} (scale {})", ins.phase_name, ins.value),
                MonitorMode::TurnOn => info!("🔺 ENABLED {} (scale {})", ins.phase_name, ins.value),
            }
        }
        Ok(lines)
    }
}

/// Case-insensitive substring match on the scale parameter name, then the phase name.
pub fn find_phase<'m>(model: &'m StructuredModel, pattern: &str) -> Option<&'m PhaseBlock> {
    let pattern = pattern.to_lowercase();
    let matches = |name: Option<&str>| name.is_some_and(|n| n.to_lowercase().contains(&pattern));

    model
        .phases
        .iter()
        .find(|p| matches(p.scale().and_then(|s| s.name.as_deref())))
        .or_else(|| model.phases.iter().find(|p| matches(p.name.as_deref())))
}
