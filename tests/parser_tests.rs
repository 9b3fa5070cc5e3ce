mod common;

use common::*;
use rietforge::parser::*;
use std::collections::HashSet;
use std::io::Write;
use tempfile::NamedTempFile;

fn parsed() -> StructuredModel {
    parse(&sample_lines(), &ParseOptions::default())
}

#[test]
fn test_str_phase_scale_scenario() {
    let lines = split_lines("str\n\tspace_group \"P21/c\"\n\tscale @ 1.5e-5\n");
    let model = parse(&lines, &ParseOptions::default());

    assert_eq!(model.phases.len(), 1);
    let phase = &model.phases[0];
    assert_eq!(phase.kind, PhaseKind::StrPhase);
    assert_eq!(phase.space_group.as_deref(), Some("P21/c"));

    let scale = phase.scale().expect("scale recorded");
    assert_eq!(scale.value, Some(1.5e-5));
    assert!(scale.refined);
    assert!(!scale.fixed);
    assert_eq!(scale.line_index, 2);
}

#[test]
fn test_phase_blocks_and_ranges() {
    let model = parsed();
    assert_eq!(model.phases.len(), 2);

    let anatase = &model.phases[0];
    assert_eq!(anatase.name.as_deref(), Some("Anatase"));
    assert_eq!(anatase.space_group.as_deref(), Some("I41/amd"));
    assert_eq!(anatase.start_line, LINE_STR_A);
    assert_eq!(anatase.end_line, Some(LINE_HKL_A));

    let rutile = &model.phases[1];
    assert_eq!(rutile.id, 1);
    assert_eq!(rutile.name.as_deref(), Some("Rutile"));
    assert_eq!(rutile.start_line, LINE_STR_B);
    assert_eq!(rutile.end_line, Some(LINE_OUTPUT));
}

#[test]
fn test_scale_with_error_and_inline_comment() {
    let model = parsed();
    let scale = model.phases[0].scale().unwrap();
    assert_eq!(scale.value, Some(0.0015));
    assert_eq!(scale.error, Some(0.0002));
    assert_eq!(scale.line_index, LINE_SCALE_A);
    assert_eq!(scale.marker_column, Some(8));
    assert_eq!(scale.column, Some(10));
    assert_eq!(scale.literal.as_deref(), Some("0.0015"));
    assert!(scale.raw_text.contains("' main phase"));
}

#[test]
fn test_named_scale_factor_is_refined() {
    let model = parsed();
    let scale = model.phases[1].scale().unwrap();
    assert_eq!(scale.name.as_deref(), Some("sf_rutile"));
    assert_eq!(scale.value, Some(0.00012));
    assert!(scale.refined);
    assert_eq!(model.phases[1].scale_name(), Some("sf_rutile"));
}

#[test]
fn test_block_comment_hides_parameters() {
    let model = parsed();
    assert!(model.scale.is_none(), "scale inside /* */ must be skipped");
}

#[test]
fn test_lattice_keywords_and_macros() {
    let model = parsed();
    let a = &model.phases[0].parameters;
    assert_eq!(a["a"].value, Some(3.7852));
    assert_eq!(a["c"].value, Some(9.5143));
    assert!(a["a"].refined);
    assert_eq!(a["CS_L"].value, Some(210.5));
    assert_eq!(a["CS_L"].error, Some(12.1));
    assert_eq!(a["cell_mass"].value, Some(1239.98));
    assert_eq!(a["weight_percent"].value, Some(62.5));
    assert!(a["weight_percent"].fixed);
    assert_eq!(a["r_bragg"].value, Some(1.234));

    let b = &model.phases[1].parameters;
    assert_eq!(b["a"].name.as_deref(), Some("lp_a"));
    assert!(b["a"].refined);
    assert_eq!(b["b"].value, Some(4.5937));
    assert!(b["b"].fixed);
    assert!(b["c"].refined);
    assert_eq!(b["c"].line_index, LINE_LATTICE_B);
}

#[test]
fn test_sites_and_mixed_occupancy() {
    let model = parsed();
    let sites = &model.phases[0].sites;
    assert_eq!(sites.len(), 3);

    let ti = &sites["Ti1"];
    assert_eq!(ti.element, "Ti");
    assert_eq!(ti.index, Some(1));
    assert_eq!(ti.line_index, LINE_SITE_TI);
    assert_eq!(ti.x.as_ref().unwrap().value, Some(0.0));
    assert_eq!(ti.y.as_ref().unwrap().value, Some(0.75));
    assert_eq!(ti.occupancy("Ti+4"), Some(1.0));
    let beq = ti.b_value.as_ref().unwrap();
    assert!(beq.refined);
    assert_eq!(beq.error, Some(0.03));

    let o = &sites["O1"];
    assert!(o.z.as_ref().unwrap().refined);
    assert!(!o.y.as_ref().unwrap().refined);

    let m = &sites["M1"];
    assert_eq!(m.line_index, LINE_SITE_M);
    assert_eq!(m.occupancies.len(), 2);
    assert_eq!(m.occupancies[0].element, "Fe+3");
    assert_eq!(m.occupancy("Mg"), Some(0.4));
    assert!((m.total_occupancy() - 1.0).abs() < 1e-12);
}

#[test]
fn test_background_spans_continuation_lines() {
    let model = parsed();
    let bkg = model.background.as_ref().unwrap();
    assert_eq!(bkg.line_index, LINE_BKG);
    assert!(bkg.refined);
    let values: Vec<f64> = bkg.terms.iter().filter_map(|t| t.value).collect();
    assert_eq!(values, vec![120.5, -35.2, 12.1, 4.5, -1.2]);
    assert_eq!(bkg.terms[0].error, Some(1.2));
    assert_eq!(bkg.terms[2].error, None);
    assert_eq!(bkg.terms[3].line_index, LINE_BKG_MORE);
}

#[test]
fn test_global_macros_and_prm() {
    let model = parsed();
    let disp = model.specimen_displacement.as_ref().unwrap();
    assert_eq!(disp.value, Some(-0.0451));
    assert_eq!(disp.line_index, LINE_DISPLACEMENT);
    assert!(disp.refined);

    let zero = &model.globals["Zero_Error"];
    assert_eq!(zero.value, Some(0.0123));
    assert_eq!(zero.line_index, LINE_ZERO);

    let ratio = &model.globals["fixed_ratio"];
    assert_eq!(ratio.line_index, LINE_GLOBAL_PRM);
    assert!(ratio.fixed);
    assert!(!ratio.refined);

    let total = &model.phases[1].parameters["sf_total"];
    assert_eq!(total.value, Some(0.00024));
    assert!(!total.refined && !total.fixed, "equations are neither");
}

#[test]
fn test_output_pattern_and_fit() {
    let model = parsed();
    let out = model.output.as_ref().unwrap();
    assert_eq!(out.line_index, LINE_OUTPUT);
    assert_eq!(out.prefix, "result");
    assert_eq!(out.temp, "25C");
    assert_eq!(out.method, "rietveld");
    assert_eq!(out.stem(), "result_25C_rietveld");

    let xdd = model.xdd.as_ref().unwrap();
    assert_eq!(xdd.line_index, LINE_XDD);
    assert_eq!(xdd.filename, "data/scan_25C_01.xy");
    assert_eq!(xdd.file_name(), "scan_25C_01.xy");

    assert_eq!(model.r_wp(), Some(6.54));
    assert_eq!(model.r_exp(), Some(3.21));
    assert_eq!(model.gof(), Some(2.04));
    assert_eq!(model.fit.as_ref().unwrap().line_index, LINE_FIT);
}

#[test]
fn test_entries_are_unique_per_position() {
    let model = parsed();
    let mut seen = HashSet::new();
    for e in model.entries() {
        let pos = (e.line_index, e.column);
        assert!(seen.insert(pos), "duplicate entry at {:?}", pos);
        assert!(e.line_index < sample_lines().len());
    }
    assert_eq!(model.keys().len(), model.entries().len());
}

#[test]
fn test_parsing_stops_at_correlation_block() {
    let lines = with_correlations(sample_lines(), "1 2\nstr\n\tscale @ 1\n");
    let model = parse(&lines, &ParseOptions::default());
    assert_eq!(model.phases.len(), 2);
}

#[test]
fn test_options_disable_records() {
    let options = ParseOptions {
        background: false,
        xdd: false,
        fit_metrics: false,
        phases: false,
        ..ParseOptions::default()
    };
    let model = parse(&sample_lines(), &options);
    assert!(model.background.is_none());
    assert!(model.xdd.is_none());
    assert!(model.fit.is_none());
    assert_eq!(model.phases.len(), 2, "phase blocks are still delimited");
    assert!(model.phases[0].parameters.is_empty());
    assert!(model.output.is_some());
}

#[test]
fn test_missing_tokens_degrade_to_none() {
    let lines = split_lines("str\n\tscale @\n\tsite X1 x\n\ta\n");
    let model = parse(&lines, &ParseOptions::default());
    let phase = &model.phases[0];

    let scale = phase.scale().unwrap();
    assert_eq!(scale.value, None);
    assert!(scale.refined);

    let site = &phase.sites["X1"];
    assert_eq!(site.x.as_ref().unwrap().value, None);
    assert!(site.y.is_none());
    assert_eq!(phase.parameters["a"].value, None);
}

#[test]
fn test_site_fields_on_continuation_lines() {
    let lines = split_lines("str\n\tsite Zr1 x 0.1 y 0.2 z 0.3\n\t\tocc Zr+4 0.9 beq 0.5\n");
    let model = parse(&lines, &ParseOptions::default());
    let site = &model.phases[0].sites["Zr1"];
    assert_eq!(site.occupancy("Zr+4"), Some(0.9));
    assert_eq!(site.b_value.as_ref().unwrap().line_index, 2);
}

#[test]
fn test_all_phase_openers() {
    let lines = split_lines("hkl_Is\n\tscale @ 1\nxo_Is\n\tscale 2\nstr\n\tscale 3\n");
    let model = parse(&lines, &ParseOptions::default());
    let kinds: Vec<PhaseKind> = model.phases.iter().map(|p| p.kind).collect();
    assert_eq!(
        kinds,
        vec![PhaseKind::HklIsPhase, PhaseKind::XoIsPhase, PhaseKind::StrPhase]
    );
    assert_eq!(model.phases[0].end_line, Some(1));
    assert_eq!(model.phases[1].scale().unwrap().value, Some(2.0));
}

#[test]
fn test_bounds_are_recorded() {
    let lines = split_lines("str\n\tscale @ 1e-5 min 0 max 1\n\tprm k min 1 2.5 max 4\n");
    let model = parse(&lines, &ParseOptions::default());
    let scale = model.phases[0].scale().unwrap();
    assert_eq!(scale.min, Some(0.0));
    assert_eq!(scale.max, Some(1.0));
    assert_eq!(scale.value, Some(1e-5));

    let k = &model.phases[0].parameters["k"];
    assert_eq!(k.value, Some(2.5));
    assert_eq!(k.min, Some(1.0));
    assert_eq!(k.max, Some(4.0));
}

#[test]
fn test_file_round_trip_is_byte_identical() {
    let content = "str\r\n\tscale @ 0.5 ' note\r\n\n\tr_bragg 2";
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{}", content).unwrap();

    let (lines, model) = parse_file(file.path(), &ParseOptions::default()).unwrap();
    assert_eq!(lines.len(), 4);
    assert_eq!(model.phases[0].parameters["r_bragg"].value, Some(2.0));
    assert_eq!(model.phases[0].scale().unwrap().raw_text, "\tscale @ 0.5 ' note");

    let out = NamedTempFile::new().unwrap();
    write_lines(out.path(), &lines).unwrap();
    assert_eq!(std::fs::read_to_string(out.path()).unwrap(), content);
}
