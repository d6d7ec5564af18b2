//! Multi-series line charts over time, linear or log scale.

use std::path::Path;

use plotters::prelude::*;
use treasurylab_core::table::Table;

use super::{draw_err, fit_range, segments, x_range, x_to_label, ChartSpec, LineChart, RenderError};

type Segments = Vec<Vec<(f64, f64)>>;

pub(super) fn draw(
    table: &Table,
    spec: &ChartSpec,
    chart: &LineChart,
    path: &Path,
) -> Result<(), RenderError> {
    let series: Vec<(&str, Segments)> = chart
        .columns
        .iter()
        .filter_map(|name| table.column(name))
        .map(|c| {
            let mut segs = segments(table.dates(), &c.values);
            if chart.log_y {
                // Log axes cannot show non-positive values; split around them.
                segs = segs.iter().flat_map(|s| split_non_positive(s)).collect();
            }
            (c.name.as_str(), segs)
        })
        .collect();

    let all_y: Vec<f64> = series
        .iter()
        .flat_map(|(_, segs)| segs.iter().flatten().map(|(_, y)| *y))
        .collect();
    let no_data = || RenderError::NoData {
        chart: spec.file.clone(),
    };
    let (y_lo, y_hi) = match chart.y_range {
        Some(range) => range,
        None => fit_range(&all_y).ok_or_else(no_data)?,
    };
    let x = x_range(table, &spec.file)?;

    let root = SVGBackend::new(path, super::CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(draw_err)?;

    if chart.log_y {
        let lo = all_y.iter().copied().fold(f64::INFINITY, f64::min);
        let hi = all_y.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !lo.is_finite() || !hi.is_finite() {
            return Err(no_data());
        }
        let hi = if hi > lo { hi } else { lo * 10.0 };

        let mut ctx = ChartBuilder::on(&root)
            .caption(&spec.title, ("sans-serif", 24))
            .margin(20)
            .x_label_area_size(40)
            .y_label_area_size(90)
            .build_cartesian_2d(x, (lo..hi).log_scale())
            .map_err(draw_err)?;
        ctx.configure_mesh()
            .x_labels(10)
            .x_label_formatter(&x_to_label)
            .y_desc(chart.y_label.as_str())
            .draw()
            .map_err(draw_err)?;

        for (i, (name, segs)) in series.iter().enumerate() {
            let color = Palette99::pick(i).to_rgba();
            for (k, seg) in segs.iter().enumerate() {
                let anno = ctx
                    .draw_series(LineSeries::new(seg.iter().copied(), color.stroke_width(2)))
                    .map_err(draw_err)?;
                if k == 0 {
                    anno.label(*name).legend(move |(x, y)| {
                        PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2))
                    });
                }
            }
        }
        if let Some(y) = chart.reference.filter(|y| *y > 0.0) {
            let xr = ctx.x_range();
            ctx.draw_series(LineSeries::new(vec![(xr.start, y), (xr.end, y)], &RED.mix(0.5)))
                .map_err(draw_err)?;
        }
        ctx.configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()
            .map_err(draw_err)?;
    } else {
        let mut ctx = ChartBuilder::on(&root)
            .caption(&spec.title, ("sans-serif", 24))
            .margin(20)
            .x_label_area_size(40)
            .y_label_area_size(90)
            .build_cartesian_2d(x, y_lo..y_hi)
            .map_err(draw_err)?;
        ctx.configure_mesh()
            .x_labels(10)
            .x_label_formatter(&x_to_label)
            .y_desc(chart.y_label.as_str())
            .draw()
            .map_err(draw_err)?;

        for (i, (name, segs)) in series.iter().enumerate() {
            let color = Palette99::pick(i).to_rgba();
            for (k, seg) in segs.iter().enumerate() {
                let anno = ctx
                    .draw_series(LineSeries::new(seg.iter().copied(), color.stroke_width(2)))
                    .map_err(draw_err)?;
                if k == 0 {
                    anno.label(*name).legend(move |(x, y)| {
                        PathElement::new(vec![(x, y), (x + 20, y)], color.stroke_width(2))
                    });
                }
            }
        }
        if let Some(y) = chart.reference {
            let xr = ctx.x_range();
            ctx.draw_series(LineSeries::new(vec![(xr.start, y), (xr.end, y)], &RED.mix(0.5)))
                .map_err(draw_err)?;
        }
        ctx.configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()
            .map_err(draw_err)?;
    }

    root.present().map_err(draw_err)?;
    Ok(())
}

fn split_non_positive(seg: &[(f64, f64)]) -> Segments {
    seg.split(|(_, y)| *y <= 0.0)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_vec())
        .collect()
}
