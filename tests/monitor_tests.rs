mod common;

use common::*;
use rietforge::config::MonitorParams;
use rietforge::mutator::{mutate, ParameterUpdate};
use rietforge::parser::*;
use rietforge::refine::*;
use rstest::rstest;

fn params(off: &str, on: &str) -> MonitorParams {
    MonitorParams {
        phases_off: off.to_string(),
        phases_on: on.to_string(),
        ..MonitorParams::default()
    }
}

#[rstest]
#[case(0.00001, true)] // 0.0067 of the peak
#[case(0.00003, false)] // 0.02 of the peak
#[case(0.0012, false)]
fn test_turn_off_threshold(#[case] value: f64, #[case] fires: bool) {
    let mut entry = MonitorEntry::new("anatase", MonitorMode::TurnOff, 0.01);
    assert!(!entry.advance(0.0015), "first value only seeds");
    assert_eq!(entry.advance(value), fires);
    assert_eq!(entry.state() == MonitorState::Stopped, fires);
}

#[test]
fn test_turn_off_fires_at_threshold() {
    let mut entry = MonitorEntry::new("p", MonitorMode::TurnOff, 0.5);
    entry.advance(1.0);
    assert!(!entry.advance(0.75));
    assert!(entry.advance(0.5), "norm == threshold disables");
    assert_eq!(entry.state(), MonitorState::Stopped);
}

#[test]
fn test_turn_off_exact_percent_threshold() {
    let mut entry = MonitorEntry::new("p", MonitorMode::TurnOff, 0.01);
    entry.advance(1.0);
    assert!(entry.advance(0.01));
}

#[test]
fn test_turn_off_uses_historical_peak() {
    let mut entry = MonitorEntry::new("p", MonitorMode::TurnOff, 0.5);
    for v in [1.0, 2.0, 1.5, 1.1] {
        assert!(!entry.advance(v));
    }
    assert_eq!(entry.history, vec![1.0, 2.0, 1.5, 1.1]);
    // 0.9 is below half of the peak 2.0 but not of the first value
    assert!(entry.advance(0.9));
}

#[rstest]
#[case(6.0, true)]
#[case(5.9, false)]
#[case(3.0, false)]
fn test_turn_on_threshold(#[case] value: f64, #[case] fires: bool) {
    let mut entry = MonitorEntry::new("rutile", MonitorMode::TurnOn, 0.5);
    entry.advance(4.0);
    assert_eq!(entry.advance(value), fires);
}

#[test]
fn test_turn_on_measures_against_minimum() {
    let mut entry = MonitorEntry::new("p", MonitorMode::TurnOn, 0.5);
    entry.advance(8.0);
    entry.advance(4.0);
    assert!(entry.advance(6.0), "6 is 50% above the best value 4");
}

#[test]
fn test_non_positive_reference_never_fires() {
    let mut off = MonitorEntry::new("p", MonitorMode::TurnOff, 0.5);
    off.advance(0.0);
    assert!(!off.advance(-1.0));

    let mut on = MonitorEntry::new("p", MonitorMode::TurnOn, 0.01);
    on.advance(0.0);
    assert!(!on.advance(100.0));
}

#[test]
fn test_stopped_entry_is_final() {
    let mut entry = MonitorEntry::new("p", MonitorMode::TurnOff, 0.5);
    entry.advance(1.0);
    assert!(entry.advance(0.1));
    let history = entry.history.clone();

    assert!(!entry.advance(0.01));
    assert!(!entry.advance(10.0));
    assert!(entry.stopped);
    assert_eq!(entry.history, history);
}

#[test]
fn test_history_grows_by_one_per_observation() {
    let mut entry = MonitorEntry::new("p", MonitorMode::TurnOn, 0.5);
    for (i, v) in [5.0, 4.9, 5.1, 4.8].into_iter().enumerate() {
        entry.advance(v);
        assert_eq!(entry.history.len(), i + 1);
    }
}

#[test]
fn test_from_params_orders_off_before_on() {
    let monitor = PhaseMonitor::from_params(&MonitorParams {
        threshold_off: "0.02".to_string(),
        ..params("anatase, brookite", "rutile")
    })
    .unwrap();
    let names: Vec<(&str, MonitorMode)> = monitor
        .entries()
        .iter()
        .map(|e| (e.phase_name.as_str(), e.mode))
        .collect();
    assert_eq!(
        names,
        vec![
            ("anatase", MonitorMode::TurnOff),
            ("brookite", MonitorMode::TurnOff),
            ("rutile", MonitorMode::TurnOn),
        ]
    );
    assert_eq!(monitor.entries()[1].threshold, 0.02);
    assert_eq!(monitor.entries()[2].threshold, 0.0195);
}

#[test]
fn test_from_params_rejects_conflicts() {
    assert!(PhaseMonitor::from_params(&params("anatase", "anatase")).is_err());
    assert!(PhaseMonitor::from_params(&MonitorParams {
        threshold_off: "0.1,0.2".to_string(),
        ..params("a,b,c", "")
    })
    .is_err());
    assert!(PhaseMonitor::from_params(&params("", "")).unwrap().is_empty());
}

#[test]
fn test_find_phase_prefers_scale_name() {
    let model = parse(&sample_lines(), &ParseOptions::default());
    assert_eq!(find_phase(&model, "SF_RUT").map(|p| p.id), Some(1));
    assert_eq!(find_phase(&model, "anatase").map(|p| p.id), Some(0));
    assert!(find_phase(&model, "brookite").is_none());
}

#[test]
fn test_observe_and_apply_rewrites() {
    let lines = sample_lines();
    let mut model = parse(&lines, &ParseOptions::default());
    let mut monitor = PhaseMonitor::from_params(&params("anatase", "rutile")).unwrap();

    assert!(monitor.observe(&model).is_empty());

    let lines = mutate(
        lines,
        &mut model,
        &[ParameterUpdate::new(ParamKey::phase(0, "scale"), 0.00001)],
    )
    .unwrap();
    if let Some(fit) = model.fit.as_mut() {
        fit.values.insert("r_wp".to_string(), 6.8);
    }

    let instructions = monitor.observe(&model);
    assert_eq!(instructions.len(), 2);
    assert_eq!(instructions[0].mode, MonitorMode::TurnOff);
    assert_eq!(instructions[0].phase, 0);
    assert_eq!(instructions[0].lower_bound, Some(0.0));
    assert_eq!(instructions[1].mode, MonitorMode::TurnOn);
    assert_eq!(instructions[1].phase, 1);
    assert_eq!(instructions[1].value, 1e-5);
    assert_eq!(instructions[0].describe(), "anatase disabled");

    let out = monitor.apply(lines, &mut model, &instructions).unwrap();
    assert_eq!(out[LINE_SCALE_A], "\t\tscale @ 1e-100 min 0 ' main phase\n");
    assert_eq!(out[LINE_SCALE_B], "\t\tscale sf_rutile 1e-5\n");

    // both monitors are done; later cycles change nothing
    assert!(monitor.observe(&model).is_empty());
    assert!(monitor.entries().iter().all(|e| e.state() == MonitorState::Stopped));
}

#[test]
fn test_missing_phase_is_skipped() {
    let model = parse(&sample_lines(), &ParseOptions::default());
    let mut monitor = PhaseMonitor::from_params(&params("brookite", "")).unwrap();
    assert!(monitor.observe(&model).is_empty());
    assert!(monitor.entries()[0].history.is_empty());
    assert_eq!(monitor.entries()[0].state(), MonitorState::Monitoring);
}
