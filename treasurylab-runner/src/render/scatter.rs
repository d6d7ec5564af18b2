//! Year-colored scatter of one column against another, with a 1:1 diagonal.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Datelike;
use plotters::prelude::*;
use treasurylab_core::table::Table;

use super::{draw_err, fit_range, ChartSpec, RenderError, ScatterChart};

/// Points grouped by calendar year, skipping rows where either side is null.
fn points_by_year(table: &Table, chart: &ScatterChart) -> BTreeMap<i32, Vec<(f64, f64)>> {
    let mut by_year: BTreeMap<i32, Vec<(f64, f64)>> = BTreeMap::new();
    let (Some(xs), Some(ys)) = (table.column(&chart.x), table.column(&chart.y)) else {
        return by_year;
    };
    for ((date, x), y) in table.dates().iter().zip(&xs.values).zip(&ys.values) {
        if let (Some(x), Some(y)) = (x, y) {
            if x.is_finite() && y.is_finite() {
                by_year
                    .entry(date.year())
                    .or_default()
                    .push((*x, *y));
            }
        }
    }
    by_year
}

pub(super) fn draw(
    table: &Table,
    spec: &ChartSpec,
    chart: &ScatterChart,
    path: &Path,
) -> Result<(), RenderError> {
    let by_year = points_by_year(table, chart);
    let xs: Vec<f64> = by_year.values().flatten().map(|(x, _)| *x).collect();
    let ys: Vec<f64> = by_year.values().flatten().map(|(_, y)| *y).collect();
    let no_data = || RenderError::NoData {
        chart: spec.file.clone(),
    };
    let (x_lo, x_hi) = fit_range(&xs).ok_or_else(no_data)?;
    let (y_lo, y_hi) = fit_range(&ys).ok_or_else(no_data)?;

    let root = SVGBackend::new(path, super::CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(draw_err)?;

    let mut ctx = ChartBuilder::on(&root)
        .caption(&spec.title, ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(90)
        .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
        .map_err(draw_err)?;
    ctx.configure_mesh()
        .x_desc(chart.x.as_str())
        .y_desc(chart.y.as_str())
        .draw()
        .map_err(draw_err)?;

    for (i, (year, points)) in by_year.iter().enumerate() {
        let color = Palette99::pick(i).to_rgba().mix(0.6);
        ctx.draw_series(
            points
                .iter()
                .map(|(x, y)| Circle::new((*x, *y), 3, color.filled())),
        )
        .map_err(draw_err)?
        .label(year.to_string())
        .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));
    }

    // 1:1 line from the origin to the largest value on either axis.
    let max_val = xs.iter().chain(&ys).copied().fold(0.0_f64, f64::max);
    ctx.draw_series(LineSeries::new(vec![(0.0, 0.0), (max_val, max_val)], &BLACK.mix(0.5)))
        .map_err(draw_err)?
        .label("1:1 Line")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK.mix(0.5).stroke_width(1)));

    ctx.configure_series_labels()
        .position(SeriesLabelPosition::UpperLeft)
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(draw_err)?;

    root.present().map_err(draw_err)?;
    Ok(())
}
