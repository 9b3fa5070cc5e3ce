use super::runner::CycleReport;
use crate::error::RfResult;
use serde::Serialize;
use std::path::Path;

/// File name of the per-run ledger inside the work directory.
pub const LEDGER_FILE: &str = "cycles.csv";

#[derive(Debug, Serialize)]
struct LedgerRow<'a> {
    cycle: usize,
    pattern: String,
    stem: &'a str,
    r_wp: Option<f64>,
    r_exp: Option<f64>,
    gof: Option<f64>,
    events: String,
}

/// One CSV row per completed cycle.
pub fn write_ledger<P: AsRef<Path>>(path: P, reports: &[CycleReport]) -> RfResult<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for report in reports {
        writer.serialize(LedgerRow {
            cycle: report.cycle,
            pattern: report.pattern.display().to_string(),
            stem: &report.stem,
            r_wp: report.r_wp,
            r_exp: report.r_exp,
            gof: report.gof,
            events: report.events.join("; "),
        })?;
    }
    writer.flush()?;
    Ok(())
}
