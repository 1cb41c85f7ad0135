use super::kneaddata::SampleMetrics;
use itertools::Itertools;

const COLUMNS: [&str; 7] = [
    "Sample",
    "Total",
    "Host",
    "Non-host",
    "Final pair1",
    "Final pair2",
    "Host %",
];

/// Formats an integer with `,` thousands separators.
pub fn with_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

fn count_cell(value: Option<u64>) -> String {
    value.map_or_else(|| "NA".to_string(), with_thousands)
}

fn row(m: &SampleMetrics) -> Vec<String> {
    vec![
        m.sample.clone(),
        count_cell(m.total_reads),
        with_thousands(m.host_reads()),
        count_cell(m.non_host_reads()),
        count_cell(m.final_paired_1_reads),
        count_cell(m.final_paired_2_reads),
        m.host_fraction()
            .map_or_else(|| "NA".to_string(), |f| format!("{:.2}%", f * 100.0)),
    ]
}

/// Renders the kneaddata summary as an aligned plain-text table.
pub fn generate_report(metrics: &[SampleMetrics]) -> String {
    let rows: Vec<Vec<String>> = metrics.iter().map(row).collect();
    let widths: Vec<usize> = COLUMNS
        .iter()
        .enumerate()
        .map(|(i, header)| {
            rows.iter()
                .map(|r| r[i].len())
                .chain(std::iter::once(header.len()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let pad = |cells: &[String]| {
        cells
            .iter()
            .zip(&widths)
            .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
            .join(" | ")
    };

    let header: Vec<String> = COLUMNS.iter().map(|c| c.to_string()).collect();
    let mut report = String::new();
    report.push_str(&pad(&header));
    report.push('\n');
    report.push_str(&widths.iter().map(|w| "-".repeat(*w)).join("-+-"));
    report.push('\n');
    for r in &rows {
        report.push_str(&pad(r));
        report.push('\n');
    }
    report
}
