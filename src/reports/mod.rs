use comfy_table::presets::ASCII_FULL;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};
use rietforge::api::ModelSummary;
use rietforge::parser::correlation::{CorrelationFlag, CorrelationPair};
use rietforge::refine::{MonitorState, RunSummary};
use std::path::Path;

fn fmt_opt(v: Option<f64>) -> String {
    match v {
        Some(x) if x != 0.0 && (x.abs() < 1e-3 || x.abs() >= 1e6) => format!("{:.4e}", x),
        Some(x) => format!("{:.5}", x),
        None => "-".to_string(),
    }
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(ASCII_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

pub fn print_model_report(path: &Path, summary: &ModelSummary) {
    println!("\n📄 {}", path.display());

    if !summary.phases.is_empty() {
        let mut table = new_table();
        table.add_row(vec![
            Cell::new("#").add_attribute(Attribute::Bold),
            Cell::new("Kind"),
            Cell::new("Name").add_attribute(Attribute::Bold),
            Cell::new("Space group"),
            Cell::new("Lines"),
            Cell::new("Sites"),
        ]);
        for p in &summary.phases {
            let lines = match p.end_line {
                Some(end) => format!("{}-{}", p.start_line, end),
                None => format!("{}-", p.start_line),
            };
            table.add_row(vec![
                Cell::new(p.id),
                Cell::new(p.kind),
                Cell::new(p.name.as_deref().unwrap_or("-")).add_attribute(Attribute::Bold),
                Cell::new(p.space_group.as_deref().unwrap_or("-")),
                Cell::new(lines),
                Cell::new(p.site_count).set_alignment(CellAlignment::Right),
            ]);
        }
        println!("{}", table);
    }

    let mut table = new_table();
    table.add_row(vec![
        Cell::new("Parameter").add_attribute(Attribute::Bold),
        Cell::new("Name"),
        Cell::new("Value").fg(Color::Cyan),
        Cell::new("Error"),
        Cell::new("State"),
        Cell::new("Line"),
    ]);
    for col in [2, 3, 5] {
        if let Some(c) = table.column_mut(col) {
            c.set_cell_alignment(CellAlignment::Right);
        }
    }
    for row in &summary.parameters {
        let state = match (row.refined, row.fixed) {
            (true, _) => Cell::new("refined").fg(Color::Green),
            (false, true) => Cell::new("fixed"),
            (false, false) => Cell::new("equation").fg(Color::Yellow),
        };
        table.add_row(vec![
            Cell::new(&row.key),
            Cell::new(row.name.as_deref().unwrap_or("")),
            Cell::new(fmt_opt(row.value)).fg(Color::Cyan),
            Cell::new(fmt_opt(row.error)),
            state,
            Cell::new(row.line),
        ]);
    }
    println!("{}", table);

    if let Some(stem) = &summary.output_stem {
        println!("Output stem: {}", stem);
    }
    if let Some(pattern) = &summary.pattern {
        println!("Pattern:     {}", pattern);
    }
    if !summary.fit.is_empty() {
        let metrics: Vec<String> = summary
            .fit
            .iter()
            .map(|(k, v)| format!("{} {:.4}", k, v))
            .collect();
        println!("Fit:         {}", metrics.join(", "));
    }
}

pub fn print_correlation_report(pairs: &[CorrelationPair], threshold: f64) {
    if pairs.is_empty() {
        println!("\n✅ No correlations above {}%", threshold);
        return;
    }
    let mut table = new_table();
    table.add_row(vec![
        Cell::new("A").add_attribute(Attribute::Bold),
        Cell::new("Name A"),
        Cell::new("B").add_attribute(Attribute::Bold),
        Cell::new("Name B"),
        Cell::new("Corr").fg(Color::Cyan),
        Cell::new("Flag"),
    ]);
    if let Some(c) = table.column_mut(4) {
        c.set_cell_alignment(CellAlignment::Right);
    }
    for p in pairs {
        let flag = match p.flag {
            CorrelationFlag::Check => Cell::new(p.flag).fg(Color::Red),
            _ => Cell::new(p.flag),
        };
        table.add_row(vec![
            Cell::new(p.index_a),
            Cell::new(&p.name_a),
            Cell::new(p.index_b),
            Cell::new(&p.name_b),
            Cell::new(p.value).fg(Color::Cyan),
            flag,
        ]);
    }
    println!("\n{}", table);
}

pub fn print_run_summary(summary: &RunSummary) {
    println!(
        "\n🏁 Campaign '{}': {} cycles{}",
        summary.campaign,
        summary.cycles.len(),
        if summary.completed { "" } else { " (stopped early)" }
    );

    let mut table = new_table();
    table.add_row(vec![
        Cell::new("Cycle").add_attribute(Attribute::Bold),
        Cell::new("Stem"),
        Cell::new("Rwp").fg(Color::Cyan),
        Cell::new("Rexp"),
        Cell::new("GoF"),
        Cell::new("Events"),
    ]);
    for i in [0, 2, 3, 4] {
        if let Some(c) = table.column_mut(i) {
            c.set_cell_alignment(CellAlignment::Right);
        }
    }
    for c in &summary.cycles {
        table.add_row(vec![
            Cell::new(c.cycle),
            Cell::new(&c.stem),
            Cell::new(fmt_opt(c.r_wp)).fg(Color::Cyan),
            Cell::new(fmt_opt(c.r_exp)),
            Cell::new(fmt_opt(c.gof)),
            Cell::new(c.events.join("; ")),
        ]);
    }
    println!("{}", table);

    if !summary.monitors.is_empty() {
        let mut table = new_table();
        table.add_row(vec![
            Cell::new("Phase").add_attribute(Attribute::Bold),
            Cell::new("Mode"),
            Cell::new("Threshold"),
            Cell::new("History"),
            Cell::new("State"),
        ]);
        for m in &summary.monitors {
            let state = match m.state() {
                MonitorState::Stopped => Cell::new(m.state()).fg(Color::Red),
                MonitorState::Monitoring => Cell::new(m.state()).fg(Color::Green),
            };
            table.add_row(vec![
                Cell::new(&m.phase_name),
                Cell::new(m.mode),
                Cell::new(m.threshold),
                Cell::new(m.history.len()),
                state,
            ]);
        }
        println!("{}", table);
    }
    println!("Ledger: {}", summary.ledger.display());
}
