//! CPLEX LP text encoding of a schedule model.
//!
//! Row and variable names are kept symbolic (`grid_upper(12)`,
//! `flow(3,7)`) so the file can be read next to the schedule. The objective
//! constant is not representable in every LP dialect and is written as a
//! comment instead.

use std::collections::BTreeSet;
use std::io::{self, Write};

use super::model::{LinExpr, ScheduleModel, VarKind};

/// Continuation lines start once a line grows past this width
const WRAP_AT: usize = 100;

pub fn write_lp<W: Write>(model: &ScheduleModel, writer: &mut W) -> io::Result<()> {
    let rows: Vec<usize> = (0..model.rows().len()).collect();
    let vars: BTreeSet<usize> = (0..model.variables().len()).collect();
    write_sections(model, Some(model.objective()), &rows, &vars, writer)
}

/// Only `rows`, with the bounds and integrality of the variables they touch
/// and an empty objective.
pub fn write_lp_subset<W: Write>(model: &ScheduleModel, rows: &[usize], writer: &mut W) -> io::Result<()> {
    let vars: BTreeSet<usize> = rows
        .iter()
        .flat_map(|&index| model.row(index).expr.terms().iter().map(|(var, _)| var.index()))
        .collect();
    write_sections(model, None, rows, &vars, writer)
}

fn write_sections<W: Write>(
    model: &ScheduleModel,
    objective: Option<&LinExpr>,
    rows: &[usize],
    vars: &BTreeSet<usize>,
    w: &mut W,
) -> io::Result<()> {
    let specs = model.variables();
    writeln!(w, "\\ Schedule model for horizon '{}'", model.horizon().name())?;
    writeln!(
        w,
        "\\ {} intervals, {} vehicles, {} variables, {} rows",
        model.horizon().len(),
        model.horizon().vehicles().len(),
        vars.len(),
        rows.len()
    )?;

    writeln!(w, "Minimize")?;
    match objective {
        Some(objective) => {
            writeln!(w, "\\ objective constant: {}", objective.constant_value())?;
            writeln!(w, "{}", expression(model, " obj:", objective))?;
        }
        None => writeln!(w, " obj:")?,
    }

    writeln!(w, "Subject To")?;
    for &index in rows {
        let row = model.row(index);
        let head = format!(" {}:", row.name);
        writeln!(
            w,
            "{} {} {}",
            expression(model, &head, &row.expr),
            row.sense.symbol(),
            number(row.rhs)
        )?;
    }

    writeln!(w, "Bounds")?;
    for &index in vars {
        let spec = &specs[index];
        if spec.kind == VarKind::Binary && spec.lower == 0.0 && spec.upper == 1.0 {
            continue;
        }
        match (spec.lower.is_finite(), spec.upper.is_finite()) {
            _ if spec.lower == spec.upper => writeln!(w, " {} = {}", spec.name, number(spec.lower))?,
            (true, true) => writeln!(w, " {} <= {} <= {}", number(spec.lower), spec.name, number(spec.upper))?,
            (true, false) if spec.lower == 0.0 => {}
            (true, false) => writeln!(w, " {} >= {}", spec.name, number(spec.lower))?,
            (false, true) => writeln!(w, " -inf <= {} <= {}", spec.name, number(spec.upper))?,
            (false, false) => writeln!(w, " {} free", spec.name)?,
        }
    }

    for (section, kind) in [("Generals", VarKind::Integer), ("Binaries", VarKind::Binary)] {
        let names: Vec<&str> = vars
            .iter()
            .map(|&index| &specs[index])
            .filter(|spec| spec.kind == kind)
            .map(|spec| spec.name.as_str())
            .collect();
        if names.is_empty() {
            continue;
        }
        writeln!(w, "{}", section)?;
        let mut line = String::new();
        for name in names {
            if line.len() + name.len() + 1 > WRAP_AT {
                writeln!(w, "{}", line)?;
                line.clear();
            }
            line.push(' ');
            line.push_str(name);
        }
        writeln!(w, "{}", line)?;
    }

    writeln!(w, "End")
}

fn number(value: f64) -> String {
    if value == f64::INFINITY {
        "inf".to_string()
    } else if value == f64::NEG_INFINITY {
        "-inf".to_string()
    } else {
        format!("{}", value)
    }
}

/// `head` followed by the terms of `expr`, wrapped over several lines.
fn expression(model: &ScheduleModel, head: &str, expr: &LinExpr) -> String {
    let mut out = head.to_string();
    let mut line_len = out.len();

    let terms = expr.terms();
    if terms.is_empty() {
        if let Some(spec) = model.variables().first() {
            out.push_str(&format!(" 0 {}", spec.name));
        }
        return out;
    }

    for (position, (var, coefficient)) in terms.iter().enumerate() {
        let name = &model.variable(*var).name;
        let sign = if *coefficient < 0.0 { "-" } else { "+" };
        let magnitude = coefficient.abs();
        let mut term = String::new();
        if position > 0 || *coefficient < 0.0 {
            term.push(' ');
            term.push_str(sign);
        }
        term.push(' ');
        if magnitude != 1.0 {
            term.push_str(&number(magnitude));
            term.push(' ');
        }
        term.push_str(name);

        if line_len + term.len() > WRAP_AT {
            out.push('\n');
            out.push(' ');
            line_len = 1;
        }
        line_len += term.len();
        out.push_str(&term);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EnergyProfile, Horizon, IntervalLimits, TimeGrid, VehicleProfile, VehicleSpec};
    use crate::optimizer::builder::ModelBuilder;
    use crate::optimizer::Constraints;
    use chrono::NaiveDate;

    fn model(len: usize) -> ScheduleModel {
        let start = NaiveDate::from_ymd_opt(2024, 7, 15)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let vehicle = VehicleProfile::new("213E", VehicleSpec::default(), vec![true; len], vec![0.0; len]);
        let horizon = Horizon::new(
            "lp",
            TimeGrid::new(start, len),
            EnergyProfile::new(vec![20.0; len], vec![8.0; len], vec![2.0; len], vec![0.25; len]),
            vec![vehicle],
            IntervalLimits::constant(len, 0.5, 65.0, 0.0),
        )
        .unwrap();
        ModelBuilder::new(&Constraints::default()).build(horizon).unwrap()
    }

    fn render(model: &ScheduleModel) -> String {
        let mut buffer = Vec::new();
        write_lp(model, &mut buffer).unwrap();
        String::from_utf8(buffer).unwrap()
    }

    #[test]
    fn test_sections_in_order() {
        let text = render(&model(4));
        let positions: Vec<usize> = ["Minimize", "Subject To", "Bounds", "Generals", "Binaries", "End"]
            .iter()
            .map(|section| text.find(section).unwrap())
            .collect();
        assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
        assert!(text.contains("\\ objective constant: 26"));
    }

    #[test]
    fn test_rows_and_bounds_are_named() {
        let text = render(&model(4));
        assert!(text.contains(" grid_upper(2):"));
        assert!(text.contains(" charge_window(213E,0): charge(213E,0) <= 11"));
        assert!(text.contains(" 20 <= soc(213E,1) <= 100"));
        assert!(text.contains(" -72 <= offset(3) <= 72"));
    }

    #[test]
    fn test_long_rows_wrap() {
        let text = render(&model(40));
        assert!(text.lines().all(|line| line.len() <= 255));
        // assign_once(5) lists stay(5) and 39 routes
        let start = text.lines().position(|line| line.starts_with(" assign_once(5):")).unwrap();
        assert!(text.lines().nth(start + 1).unwrap().starts_with("  + route(5,"));
    }

    #[test]
    fn test_subset_only_touches_its_variables() {
        let model = model(4);
        let index = model.rows().iter().position(|row| row.name == "grid_upper(1)").unwrap();
        let mut buffer = Vec::new();
        write_lp_subset(&model, &[index], &mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.contains(" grid_upper(1):"));
        assert!(!text.contains("grid_upper(0)"));
        assert!(!text.contains("soc(213E"));
        assert!(!text.contains("offset("));
        assert!(text.contains(" obj:\n"));
    }
}
