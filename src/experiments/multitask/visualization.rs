use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};

use plotters::prelude::*;

use crate::error::{Result, TrainError};

fn plot_error(err: impl Display) -> TrainError {
    TrainError::Plot(err.to_string())
}

/// Y range of a series, widened when every value is equal.
fn value_range(values: &[f32]) -> (f64, f64) {
    let max = values.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b)) as f64;
    let min = values.iter().fold(f32::INFINITY, |a, &b| a.min(b)) as f64;
    if (max - min).abs() < f64::EPSILON {
        (min - 0.5, max + 0.5)
    } else {
        (min, max)
    }
}

fn draw_line_chart(values: &[f32], output_path: &Path, caption: &str, x_desc: &str) -> Result<()> {
    let root = BitMapBackend::new(output_path, (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    let (min, max) = value_range(values);
    let mut chart = ChartBuilder::on(&root)
        .caption(caption, ("sans-serif", 40))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(0..values.len(), min..max)
        .map_err(plot_error)?;

    chart
        .configure_mesh()
        .x_desc(x_desc)
        .y_desc(caption)
        .draw()
        .map_err(plot_error)?;

    chart
        .draw_series(LineSeries::new(
            values.iter().enumerate().map(|(i, &v)| (i, v as f64)),
            &RED,
        ))
        .map_err(plot_error)?;

    root.present().map_err(plot_error)?;
    Ok(())
}

/// Draws `values` as a line chart into `{output_dir}/{prefix}{name}.png`.
///
/// Returns the written path, or `None` when there is nothing to draw.
pub fn plot_series(
    values: &[f32],
    output_dir: &Path,
    prefix: &str,
    name: &str,
    caption: &str,
    x_desc: &str,
) -> Result<Option<PathBuf>> {
    let values: Vec<f32> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if values.is_empty() {
        return Ok(None);
    }
    fs::create_dir_all(output_dir)?;
    let output_path = output_dir.join(format!("{prefix}{name}.png"));

    draw_line_chart(&values, &output_path, caption, x_desc)?;
    Ok(Some(output_path))
}

pub fn plot_training_loss(losses: &[f32], output_dir: &Path, prefix: &str) -> Result<Option<PathBuf>> {
    plot_series(losses, output_dir, prefix, "loss", "Training Loss", "Epoch")
}

pub fn plot_dev_score(scores: &[f32], output_dir: &Path, prefix: &str) -> Result<Option<PathBuf>> {
    plot_series(scores, output_dir, prefix, "dev_score", "Dev Score", "Epoch")
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_flat_series_gets_a_range() {
        assert_eq!(value_range(&[2.0, 2.0]), (1.5, 2.5));
        assert_eq!(value_range(&[1.0, 3.0, 2.0]), (1.0, 3.0));
    }

    #[test]
    fn test_plot_writes_png_or_reports_plot_error() {
        let dir = tempdir().unwrap();
        match plot_training_loss(&[3.0, 2.0, 1.5], dir.path(), "pcgrad_") {
            Ok(Some(path)) => {
                assert_eq!(path, dir.path().join("pcgrad_loss.png"));
                assert!(path.exists());
            }
            Ok(None) => panic!("a finite series must be drawn"),
            // headless machines may lack a font for the caption
            Err(err) => assert!(matches!(err, TrainError::Plot(_))),
        }
    }

    #[test]
    fn test_nothing_to_plot() {
        let dir = tempdir().unwrap();
        let path = plot_training_loss(&[], dir.path(), "pcgrad_").unwrap();
        assert!(path.is_none());
        let path = plot_training_loss(&[f32::NAN], dir.path(), "pcgrad_").unwrap();
        assert!(path.is_none());
    }
}
