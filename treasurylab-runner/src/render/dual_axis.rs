//! Net value to holdings ratio against holdings growth, on two y axes.
//!
//! Left axis: `(market cap - liabilities) / holdings value`, fixed to 0..2.
//! Right axis: change in holdings over `yoy_periods` rows, fixed to 0..1.

use std::path::Path;

use plotters::prelude::*;
use treasurylab_core::table::Table;

use super::{draw_err, segments, x_range, x_to_label, ChartSpec, NetValueChart, RenderError};
use crate::analysis::pct_change_periods;

const LEFT_RANGE: (f64, f64) = (0.0, 2.0);
const RIGHT_RANGE: (f64, f64) = (0.0, 1.0);

/// `(market_cap - liabilities) / holdings_value` per row; null when any
/// operand is null or the holdings value is zero.
pub(crate) fn net_value_ratio(table: &Table, chart: &NetValueChart) -> Vec<Option<f64>> {
    let (Some(cap), Some(liab), Some(value)) = (
        table.column(&chart.market_cap),
        table.column(&chart.liabilities),
        table.column(&chart.holdings_value),
    ) else {
        return vec![None; table.height()];
    };
    cap.values
        .iter()
        .zip(&liab.values)
        .zip(&value.values)
        .map(|((c, l), v)| match (c, l, v) {
            (Some(c), Some(l), Some(v)) if *v != 0.0 => Some((c - l) / v).filter(|r| r.is_finite()),
            _ => None,
        })
        .collect()
}

pub(super) fn draw(
    table: &Table,
    spec: &ChartSpec,
    chart: &NetValueChart,
    path: &Path,
) -> Result<(), RenderError> {
    let ratio = net_value_ratio(table, chart);
    let holdings = table
        .column(&chart.holdings)
        .map(|c| pct_change_periods(&c.values, chart.yoy_periods))
        .unwrap_or_default();
    let left = segments(table.dates(), &ratio);
    let right = segments(table.dates(), &holdings);
    if left.is_empty() && right.is_empty() {
        return Err(RenderError::NoData {
            chart: spec.file.clone(),
        });
    }
    let x = x_range(table, &spec.file)?;

    let root = SVGBackend::new(path, super::CHART_SIZE).into_drawing_area();
    root.fill(&WHITE).map_err(draw_err)?;

    let left_color = Palette99::pick(0).to_rgba();
    let right_color = Palette99::pick(1).to_rgba();

    let mut ctx = ChartBuilder::on(&root)
        .caption(&spec.title, ("sans-serif", 20))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(70)
        .right_y_label_area_size(70)
        .build_cartesian_2d(x.clone(), LEFT_RANGE.0..LEFT_RANGE.1)
        .map_err(draw_err)?
        .set_secondary_coord(x.clone(), RIGHT_RANGE.0..RIGHT_RANGE.1);

    ctx.configure_mesh()
        .x_labels(10)
        .x_label_formatter(&x_to_label)
        .y_desc("Net Value to Holdings Ratio")
        .draw()
        .map_err(draw_err)?;
    ctx.configure_secondary_axes()
        .y_desc("Holdings YoY Change")
        .draw()
        .map_err(draw_err)?;

    for (k, seg) in left.iter().enumerate() {
        let anno = ctx
            .draw_series(LineSeries::new(seg.iter().copied(), left_color.stroke_width(2)))
            .map_err(draw_err)?;
        if k == 0 {
            anno.label("Net value / holdings").legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 20, y)], left_color.stroke_width(2))
            });
        }
    }
    for (k, seg) in right.iter().enumerate() {
        let anno = ctx
            .draw_secondary_series(LineSeries::new(seg.iter().copied(), right_color.stroke_width(2)))
            .map_err(draw_err)?;
        if k == 0 {
            anno.label("Holdings YoY").legend(move |(x, y)| {
                PathElement::new(vec![(x, y), (x + 20, y)], right_color.stroke_width(2))
            });
        }
    }

    // Guides at each axis ceiling.
    ctx.draw_series(LineSeries::new(
        vec![(x.start, LEFT_RANGE.1), (x.end, LEFT_RANGE.1)],
        left_color.mix(0.5).stroke_width(1),
    ))
    .map_err(draw_err)?;
    ctx.draw_secondary_series(LineSeries::new(
        vec![(x.start, RIGHT_RANGE.1), (x.end, RIGHT_RANGE.1)],
        right_color.mix(0.5).stroke_width(1),
    ))
    .map_err(draw_err)?;

    ctx.configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(draw_err)?;

    root.present().map_err(draw_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use treasurylab_core::table::TableColumn;

    #[test]
    fn net_value_ratio_nulls_on_zero_holdings() {
        let d = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
        let table = Table::new(vec![d("2024-01-01"), d("2024-01-02")])
            .unwrap()
            .with_column(TableColumn::new("Cap", vec![Some(300.0), Some(300.0)]))
            .unwrap()
            .with_column(TableColumn::new("Liab", vec![Some(100.0), Some(100.0)]))
            .unwrap()
            .with_column(TableColumn::new("Value", vec![Some(100.0), Some(0.0)]))
            .unwrap();
        let chart = NetValueChart {
            market_cap: "Cap".into(),
            liabilities: "Liab".into(),
            holdings_value: "Value".into(),
            holdings: "Held".into(),
            yoy_periods: 365,
        };
        assert_eq!(net_value_ratio(&table, &chart), vec![Some(2.0), None]);
    }
}
