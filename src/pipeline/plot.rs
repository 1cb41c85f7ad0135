//! Host contamination chart for the kneaddata summary.

use super::kneaddata::SampleMetrics;
use super::report::with_thousands;
use anyhow::{anyhow, Result};
use log::{info, warn};
use plotters::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

const REMAINING_COLOR: RGBColor = RGBColor(0x4C, 0x72, 0xB0);
const HOST_COLOR: RGBColor = RGBColor(0xDD, 0x84, 0x52);

fn plot_err<E: std::fmt::Display>(e: E) -> anyhow::Error {
    anyhow!("Plot error: {}", e)
}

/// (sample, host reads, remaining reads) for samples with a known total.
fn bar_values(metrics: &[SampleMetrics]) -> Vec<(String, u64, u64)> {
    metrics
        .iter()
        .filter_map(|m| {
            m.non_host_reads()
                .map(|rest| (m.sample.clone(), m.host_reads(), rest))
        })
        .collect()
}

/// Writes a stacked bar chart (remaining reads below, host reads on top) as PNG.
///
/// Returns `None` without writing anything when no sample has a total read count.
pub fn plot_host_contamination(metrics: &[SampleMetrics], path: &Path) -> Result<Option<PathBuf>> {
    let bars = bar_values(metrics);
    if bars.is_empty() {
        warn!("No sample has a total read count; skipping the contamination plot");
        return Ok(None);
    }
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let width = (bars.len() as u32 * 60).max(1200);
    let height = 900;
    let y_max = bars
        .iter()
        .map(|(_, host, rest)| host + rest)
        .max()
        .unwrap_or(0)
        .max(1);
    let y_max = y_max + y_max / 20;
    let names: Vec<String> = bars.iter().map(|(name, _, _)| name.clone()).collect();

    let root = BitMapBackend::new(path, (width, height)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(
            "Host contamination versus total reads (kneaddata)",
            ("sans-serif", 30),
        )
        .margin(20)
        .x_label_area_size(160)
        .y_label_area_size(110)
        .build_cartesian_2d((0..bars.len()).into_segmented(), 0u64..y_max)
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .y_desc("Read count")
        .x_labels(bars.len())
        .x_label_formatter(&|v| match v {
            SegmentValue::CenterOf(i) | SegmentValue::Exact(i) => {
                names.get(*i).cloned().unwrap_or_default()
            }
            SegmentValue::Last => String::new(),
        })
        .x_label_style(("sans-serif", 14).into_font().transform(FontTransform::Rotate90))
        .y_label_formatter(&|v| with_thousands(*v))
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(bars.iter().enumerate().map(|(i, (_, _, rest))| {
            let mut bar = Rectangle::new(
                [(SegmentValue::Exact(i), 0), (SegmentValue::Exact(i + 1), *rest)],
                REMAINING_COLOR.filled(),
            );
            bar.set_margin(0, 0, 4, 4);
            bar
        }))
        .map_err(plot_err)?
        .label("Remaining reads")
        .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], REMAINING_COLOR.filled()));

    chart
        .draw_series(bars.iter().enumerate().map(|(i, (_, host, rest))| {
            let mut bar = Rectangle::new(
                [
                    (SegmentValue::Exact(i), *rest),
                    (SegmentValue::Exact(i + 1), rest + host),
                ],
                HOST_COLOR.filled(),
            );
            bar.set_margin(0, 0, 4, 4);
            bar
        }))
        .map_err(plot_err)?
        .label("Host contamination")
        .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 10, y + 5)], HOST_COLOR.filled()));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    info!("Contamination plot written to {}", path.display());
    Ok(Some(path.to_path_buf()))
}
