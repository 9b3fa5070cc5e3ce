pub mod engine;
pub mod ledger;
pub mod monitor;
pub mod runner;

pub use engine::{expected_output, RefinementEngine, SimulatedEngine, TopasEngine};
pub use ledger::{write_ledger, LEDGER_FILE};
pub use monitor::{
    find_phase, MonitorEntry, MonitorMode, MonitorState, PhaseMonitor, RewriteInstruction,
};
pub use runner::{
    build_engine, cycle_label, run_campaigns, select_evenly, Campaign, CycleCallback, CycleReport,
    CycleStage, RefinementOptions, Refiner, RunSummary,
};
