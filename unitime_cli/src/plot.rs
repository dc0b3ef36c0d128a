use std::panic;
use std::path::Path;

use anyhow::Result;
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};
use unitime::Alignment;

pub enum ChartKind {
    Png,
    Svg,
}

const PALETTE: [RGBColor; 8] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
];

struct ChartSeries<'a> {
    label: &'a str,
    /// Runs of consecutive non-null points, as (seconds from start, value).
    segments: Vec<Vec<(f64, f64)>>,
    color: RGBColor,
}

fn chart_series(alignment: &Alignment) -> Vec<ChartSeries<'_>> {
    let step = alignment.timeline.step_seconds();
    alignment
        .series
        .iter()
        .enumerate()
        .map(|(idx, (param, series))| {
            let mut segments = Vec::new();
            let mut current = Vec::new();
            for (k, value) in series.values.iter().enumerate() {
                match value {
                    Some(v) => current.push((k as f64 * step, *v)),
                    None if !current.is_empty() => segments.push(std::mem::take(&mut current)),
                    None => {}
                }
            }
            if !current.is_empty() {
                segments.push(current);
            }
            ChartSeries {
                label: param.as_str(),
                segments,
                color: PALETTE[idx % PALETTE.len()],
            }
        })
        .collect()
}

/// Render the chart, turning backend panics (missing fonts and the like)
/// into errors.
pub fn render_chart_guard(
    alignment: &Alignment,
    path: &Path,
    kind: ChartKind,
) -> Result<(), String> {
    let render = || -> Result<(), String> {
        render_chart(alignment, path, kind).map_err(|e| format!("plotting error: {}", e))
    };

    panic::catch_unwind(panic::AssertUnwindSafe(render))
        .map_err(|_| "plotting backend panicked".to_string())?
}

fn render_chart(alignment: &Alignment, path: &Path, kind: ChartKind) -> Result<()> {
    let series = chart_series(alignment);
    let values = series
        .iter()
        .flat_map(|s| s.segments.iter().flatten().map(|(_, v)| *v));
    let (y_min, y_max) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if !y_min.is_finite() {
        return Err(anyhow::anyhow!("no values to plot"));
    }
    let pad = ((y_max - y_min) * 0.05).max(1e-6);
    let x_max = alignment.timeline.duration_seconds().max(1e-6);
    let caption = format!(
        "Universal timeline from {} (step {} s)",
        alignment.timeline.start().format("%Y-%m-%d %H:%M:%S"),
        alignment.timeline.step_seconds()
    );

    match kind {
        ChartKind::Png => {
            let root = BitMapBackend::new(path, (1280, 720)).into_drawing_area();
            draw_chart(root, &caption, &series, x_max, (y_min - pad)..(y_max + pad))?;
        }
        ChartKind::Svg => {
            let root = SVGBackend::new(path, (1280, 720)).into_drawing_area();
            draw_chart(root, &caption, &series, x_max, (y_min - pad)..(y_max + pad))?;
        }
    }
    Ok(())
}

fn legend_swatch(color: RGBColor) -> impl Fn((i32, i32)) -> PathElement<(i32, i32)> {
    move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], color)
}

fn draw_chart<DB>(
    area: DrawingArea<DB, plotters::coord::Shift>,
    caption: &str,
    series: &[ChartSeries],
    x_max: f64,
    y_range: std::ops::Range<f64>,
) -> Result<()>
where
    DB: DrawingBackend,
    DB::ErrorType: 'static,
{
    area.fill(&WHITE)?;
    let caption_font = FontDesc::new(FontFamily::SansSerif, 22.0, FontStyle::Normal);
    let mut chart = ChartBuilder::on(&area)
        .caption(caption, caption_font)
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 60)
        .set_label_area_size(LabelAreaPosition::Bottom, 40)
        .build_cartesian_2d(0.0..x_max, y_range)?;

    let axis_font = FontDesc::new(FontFamily::SansSerif, 18.0, FontStyle::Normal);
    chart
        .configure_mesh()
        .light_line_style(&TRANSPARENT)
        .x_desc("Seconds from start")
        .x_label_formatter(&|v| format!("{:.0}", v))
        .y_label_formatter(&|v| format!("{:.2}", v))
        .label_style(axis_font.color(&BLACK.mix(0.85)))
        .draw()?;

    for s in series {
        let color = s.color;
        let style = ShapeStyle {
            color: color.to_rgba(),
            filled: false,
            stroke_width: 2,
        };
        for (idx, segment) in s.segments.iter().enumerate() {
            let line = LineSeries::new(segment.iter().copied(), style);
            if idx == 0 {
                chart
                    .draw_series(line)?
                    .label(s.label)
                    .legend(legend_swatch(color));
            } else {
                chart.draw_series(line)?;
            }
        }
    }

    let legend_font = FontDesc::new(FontFamily::SansSerif, 16.0, FontStyle::Normal);
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.7))
        .border_style(&BLACK.mix(0.3))
        .label_font(legend_font.color(&BLACK))
        .position(SeriesLabelPosition::UpperRight)
        .draw()?;

    area.present()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use unitime::{Aligner, Cell, Column, MethodChoice, Table};

    #[test]
    fn test_segments_split_on_nulls() {
        let table = Table::new(vec![
            Column::new(
                "Time_1",
                vec![
                    Cell::from_text("2024-01-01 00:00:00"),
                    Cell::from_text("2024-01-01 00:00:02"),
                ],
            ),
            Column::new("A_1", vec![Cell::Number(1.0), Cell::Number(2.0)]),
            Column::new(
                "Time_2",
                vec![
                    Cell::from_text("2024-01-01 00:00:03"),
                    Cell::from_text("2024-01-01 00:00:04"),
                ],
            ),
            Column::new("B_2", vec![Cell::Number(5.0), Cell::Number(6.0)]),
        ]);
        let alignment = Aligner::default()
            .run(&table, None, Some(1.0), MethodChoice::default())
            .unwrap();
        let series = chart_series(&alignment);
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].label, "A_1");
        assert_eq!(
            series[0].segments,
            vec![vec![(0.0, 1.0), (1.0, 1.5), (2.0, 2.0)]]
        );
        assert_eq!(series[1].segments, vec![vec![(3.0, 5.0), (4.0, 6.0)]]);
    }
}
