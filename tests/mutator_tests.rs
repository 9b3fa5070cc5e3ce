mod common;

use common::*;
use rietforge::error::RietForgeError;
use rietforge::mutator::*;
use rietforge::parser::*;

fn setup() -> (Vec<String>, StructuredModel) {
    let lines = sample_lines();
    let model = parse(&lines, &ParseOptions::default());
    (lines, model)
}

fn scale_a() -> ParamKey {
    ParamKey::phase(0, "scale")
}

#[test]
fn test_value_replacement_keeps_error_and_comment() {
    let (lines, mut model) = setup();
    let out = mutate(lines, &mut model, &[ParameterUpdate::new(scale_a(), 0.0021)]).unwrap();
    assert_eq!(out[LINE_SCALE_A], "\t\tscale @ 0.0021`_0.0002 ' main phase\n");
    assert_eq!(model.entry(&scale_a()).unwrap().value, Some(0.0021));
}

#[test]
fn test_error_can_be_set_or_cleared() {
    let (lines, mut model) = setup();
    let out = mutate(
        lines,
        &mut model,
        &[ParameterUpdate::new(scale_a(), 0.0021).with_error(0.0003)],
    )
    .unwrap();
    assert_eq!(out[LINE_SCALE_A], "\t\tscale @ 0.0021`_0.0003 ' main phase\n");

    let out = mutate(out, &mut model, &[ParameterUpdate::new(scale_a(), 1e-100).clearing_error()]).unwrap();
    assert_eq!(out[LINE_SCALE_A], "\t\tscale @ 1e-100 ' main phase\n");
    let entry = model.entry(&scale_a()).unwrap();
    assert_eq!(entry.error, None);
    assert_eq!(entry.error_literal, None);
}

#[test]
fn test_other_lines_are_untouched() {
    let (lines, mut model) = setup();
    let original = lines.clone();
    let out = mutate(lines, &mut model, &[ParameterUpdate::new(scale_a(), 0.5)]).unwrap();
    assert_eq!(out.len(), original.len());
    for (i, (a, b)) in original.iter().zip(&out).enumerate() {
        if i != LINE_SCALE_A {
            assert_eq!(a, b, "line {} changed", i);
        }
    }
}

#[test]
fn test_columns_shift_for_later_entries_on_the_line() {
    let (lines, mut model) = setup();
    let updates = [
        ParameterUpdate::new(ParamKey::phase(0, "a"), 3.79).clearing_error(),
        ParameterUpdate::new(ParamKey::phase(0, "c"), 9.52),
    ];
    let out = mutate(lines, &mut model, &updates).unwrap();
    assert_eq!(out[LINE_LATTICE_A], "\t\tTetragonal(@ 3.79, @ 9.52`_0.0004)\n");
}

#[test]
fn test_mixed_site_occupancies() {
    let (lines, mut model) = setup();
    let occ = |element: &str| ParamKey::Occupancy {
        phase: 0,
        label: "M1".to_string(),
        element: element.to_string(),
    };
    let out = mutate(
        lines,
        &mut model,
        &[
            ParameterUpdate::new(occ("Fe+3"), 0.55),
            ParameterUpdate::new(occ("Mg"), 0.45),
        ],
    )
    .unwrap();
    assert_eq!(
        out[LINE_SITE_M],
        "\t\tsite M1 x 0.5 y 0.5 z 0.5 occ Fe+3 0.55 occ Mg 0.45 beq 1\n"
    );
}

#[test]
fn test_applying_twice_is_idempotent() {
    let (lines, mut model) = setup();
    let updates = [
        ParameterUpdate::new(scale_a(), 0.0031).with_error(0.0001),
        ParameterUpdate::new(ParamKey::Background { term: 3 }, 4.75),
        ParameterUpdate::new(ParamKey::SpecimenDisplacement, -0.05),
    ];
    let once = mutate(lines, &mut model, &updates).unwrap();
    let twice = mutate(once.clone(), &mut model, &updates).unwrap();
    assert_eq!(once, twice);
    assert_eq!(once[LINE_BKG_MORE], "\t\t4.5 -1.2\n".replace("4.5", "4.75"));
    assert_eq!(once[LINE_DISPLACEMENT], "\tSpecimen_Displacement(@, -0.05`_0.0021)\n");
}

#[test]
fn test_stale_model_fails_with_target_not_found() {
    let (mut lines, mut model) = setup();
    lines[LINE_SCALE_A] = "\t\tscale @ 9.9\n".to_string();
    let err = mutate(lines, &mut model, &[ParameterUpdate::new(scale_a(), 1.0)]).unwrap_err();
    match err {
        RietForgeError::MutationTargetNotFound { line_index, .. } => {
            assert_eq!(line_index, Some(LINE_SCALE_A))
        }
        other => panic!("unexpected error: {}", other),
    }
}

#[test]
fn test_unknown_key_fails() {
    let (lines, mut model) = setup();
    let key = ParamKey::phase(7, "scale");
    let err = mutate(lines, &mut model, &[ParameterUpdate::new(key, 1.0)]).unwrap_err();
    match &err {
        RietForgeError::MutationTargetNotFound { line_index, detail } => {
            assert_eq!(*line_index, None);
            assert!(detail.contains("scale"), "{}", detail);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(!err.to_string().contains("at line"));
}

#[test]
fn test_fix_and_refine_named_parameter() {
    let (lines, mut model) = setup();
    let key = ParamKey::phase(1, "scale");

    let fixed = set_refinement(lines.clone(), &mut model, &key, false).unwrap();
    assert_eq!(fixed[LINE_SCALE_B], "\t\tscale !sf_rutile 0.00012`_0.00001\n");
    assert!(model.entry(&key).unwrap().fixed);

    let refined = set_refinement(fixed, &mut model, &key, true).unwrap();
    assert_eq!(refined, lines);
    assert!(model.entry(&key).unwrap().refined);
}

#[test]
fn test_refine_and_fix_bare_value() {
    let (lines, mut model) = setup();
    let b = ParamKey::phase(1, "b");
    let c = ParamKey::phase(1, "c");

    let out = set_refinement(lines, &mut model, &b, true).unwrap();
    assert_eq!(out[LINE_LATTICE_B], "\t\ta lp_a 4.5937 b @ 4.5937 c @ 2.9587\n");

    let out = set_refinement(out, &mut model, &c, false).unwrap();
    assert_eq!(out[LINE_LATTICE_B], "\t\ta lp_a 4.5937 b @ 4.5937 c  2.9587\n");
    assert!(model.entry(&c).unwrap().fixed);

    // columns still valid after both edits
    let out = mutate(out, &mut model, &[ParameterUpdate::new(c, 3.0)]).unwrap();
    assert_eq!(out[LINE_LATTICE_B], "\t\ta lp_a 4.5937 b @ 4.5937 c  3\n");
}

#[test]
fn test_refinement_noop_and_equation() {
    let (lines, mut model) = setup();
    let out = set_refinement(lines.clone(), &mut model, &scale_a(), true).unwrap();
    assert_eq!(out, lines);

    let equation = ParamKey::phase(1, "sf_total");
    assert!(set_refinement(lines, &mut model, &equation, true).is_err());
}

#[test]
fn test_lower_bound_goes_before_comment_once() {
    let (lines, mut model) = setup();
    let out = append_lower_bound(lines, &mut model, LINE_SCALE_A, 0.0).unwrap();
    assert_eq!(out[LINE_SCALE_A], "\t\tscale @ 0.0015`_0.0002 min 0 ' main phase\n");
    assert_eq!(model.entry(&scale_a()).unwrap().min, Some(0.0));

    let again = append_lower_bound(out.clone(), &mut model, LINE_SCALE_A, 0.0).unwrap();
    assert_eq!(again, out);
}

#[test]
fn test_insert_block_offsets_and_terminators() {
    let lines = split_lines("a 1\nb 2");
    let (out, offset) = insert_block(lines.clone(), 2, &["c 3".to_string(), "d 4\n".to_string()]).unwrap();
    assert_eq!(offset, 2);
    assert_eq!(out.concat(), "a 1\nb 2\nc 3\nd 4\n");

    let (out, offset) = insert_block(lines.clone(), 0, &[]).unwrap();
    assert_eq!(offset, 0);
    assert_eq!(out, lines);

    assert!(matches!(
        insert_block(lines, 3, &["x".to_string()]),
        Err(RietForgeError::MutationTargetNotFound { line_index: Some(3), .. })
    ));
}

#[test]
fn test_tracked_insert_shifts_model() {
    let (lines, mut model) = setup();
    let block = vec!["\t' inserted\n".to_string(), "\tprm extra 1\n".to_string()];
    let out = insert_block_tracked(lines, &mut model, LINE_STR_B, &block).unwrap();

    assert_eq!(out.len(), 30);
    assert_eq!(model.phases[0].start_line, LINE_STR_A);
    assert_eq!(model.phases[1].start_line, LINE_STR_B + 2);
    assert_eq!(model.output.as_ref().unwrap().line_index, LINE_OUTPUT + 2);
    assert_eq!(model.phases[1].scale().unwrap().line_index, LINE_SCALE_B + 2);

    // the shifted model still addresses the right text
    let out = mutate(out, &mut model, &[ParameterUpdate::new(ParamKey::phase(1, "scale"), 0.0002)]).unwrap();
    assert_eq!(out[LINE_SCALE_B + 2], "\t\tscale sf_rutile 0.0002`_0.00001\n");
}

#[test]
fn test_frozen_positions_do_not_shift() {
    let (lines, mut model) = setup();
    model.freeze(FreezeTarget::Entry(scale_a()));
    model.freeze(FreezeTarget::Output);
    model.freeze(FreezeTarget::Phase(1));

    let _ = insert_block_tracked(lines, &mut model, 0, &["' header".to_string()]).unwrap();
    assert_eq!(model.entry(&scale_a()).unwrap().line_index, LINE_SCALE_A);
    assert_eq!(model.output.as_ref().unwrap().line_index, LINE_OUTPUT);
    assert_eq!(model.phases[1].start_line, LINE_STR_B);
    assert_eq!(model.phases[0].start_line, LINE_STR_A + 1);
    assert_eq!(model.xdd.as_ref().unwrap().line_index, LINE_XDD + 1);
}

#[test]
fn test_rename_output_stem() {
    let (lines, mut model) = setup();
    let (out, stem) = rename_output(lines, &mut model, "30C_rietveld").unwrap();
    assert_eq!(stem.as_deref(), Some("result_30C_rietveld"));
    assert_eq!(out[LINE_OUTPUT], "\tOut_X_Yobs_Ycalc_Ydiff(\"result_30C_rietveld.xy\")\n");

    let output = model.output.as_ref().unwrap();
    assert_eq!(output.temp, "30C");
    assert_eq!(output.stem(), "result_30C_rietveld");

    let (out, stem) = rename_output(out, &mut model, "000002_rietveld").unwrap();
    assert_eq!(stem.as_deref(), Some("result_000002_rietveld"));
    assert!(out[LINE_OUTPUT].contains("\"result_000002_rietveld.xy\""));
}

#[test]
fn test_rename_without_directive_is_noop() {
    let lines = split_lines("str\n\tscale 1\n");
    let mut model = parse(&lines, &ParseOptions::default());
    let (out, stem) = rename_output(lines.clone(), &mut model, "1C_x").unwrap();
    assert_eq!(out, lines);
    assert!(stem.is_none());
}

#[test]
fn test_set_pattern() {
    let (lines, mut model) = setup();
    let out = set_pattern(lines, &mut model, "/data/run/scan_30C_02.xy").unwrap();
    assert_eq!(out[LINE_XDD], "xdd \"/data/run/scan_30C_02.xy\"\n");
    assert_eq!(model.xdd.as_ref().unwrap().file_name(), "scan_30C_02.xy");

    let bare = split_lines("str\n");
    let mut empty = parse(&bare, &ParseOptions::default());
    assert!(matches!(
        set_pattern(bare, &mut empty, "x.xy"),
        Err(RietForgeError::MutationTargetNotFound { line_index: None, .. })
    ));
}

#[test]
fn test_carry_forward_values_into_template() {
    let (template_lines, mut template) = setup();
    let (refined_lines, mut refined) = setup();
    let refined_lines = mutate(
        refined_lines,
        &mut refined,
        &[
            ParameterUpdate::new(scale_a(), 0.002).with_error(0.0001),
            ParameterUpdate::new(ParamKey::phase(1, "c"), 2.96),
        ],
    )
    .unwrap();
    let refined = parse(&refined_lines, &ParseOptions::default());

    let updates = carry_forward(&template, &refined);
    assert_eq!(updates.len(), 2);
    assert!(updates.iter().any(|u| u.key == scale_a() && u.error == ErrorChange::Set(0.0001)));

    let out = mutate(template_lines, &mut template, &updates).unwrap();
    assert_eq!(out[LINE_SCALE_A], refined_lines[LINE_SCALE_A]);
    assert_eq!(out[LINE_LATTICE_B], refined_lines[LINE_LATTICE_B]);
}
