//! SVG line plot of allocated memory (KiB) against call index.
//!
//! One polyline per table. With more than one table a legend keyed by
//! experiment label is drawn.

use crate::profiling::MemoryTable;
use anyhow::Result;
use std::fmt::Write as _;
use std::path::Path;

const WIDTH: f64 = 800.0;
const HEIGHT: f64 = 320.0;
const MARGIN_LEFT: f64 = 70.0;
const MARGIN_RIGHT: f64 = 20.0;
const MARGIN_TOP: f64 = 20.0;
const MARGIN_BOTTOM: f64 = 40.0;
const PALETTE: &[&str] = &[
    "#1f77b4", "#ff7f0e", "#2ca02c", "#d62728", "#9467bd", "#8c564b",
];

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Render `tables` as a standalone SVG document.
pub fn render_svg(tables: &[&MemoryTable]) -> String {
    let max_call = tables
        .iter()
        .flat_map(|t| t.iter().map(|r| r.call_index))
        .max()
        .unwrap_or(0)
        .max(1) as f64;
    let kib = |bytes: i64| bytes as f64 / 1024.0;
    let (mut y_min, mut y_max) = tables
        .iter()
        .flat_map(|t| t.iter().map(|r| kib(r.bytes_allocated)))
        .fold((0.0f64, 0.0f64), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if (y_max - y_min).abs() < f64::EPSILON {
        y_min -= 1.0;
        y_max += 1.0;
    }

    let plot_w = WIDTH - MARGIN_LEFT - MARGIN_RIGHT;
    let plot_h = HEIGHT - MARGIN_TOP - MARGIN_BOTTOM;
    let sx = |x: f64| MARGIN_LEFT + x / max_call * plot_w;
    let sy = |y: f64| MARGIN_TOP + (y_max - y) / (y_max - y_min) * plot_h;

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="sans-serif" font-size="11">"#
    );
    let _ = writeln!(svg, r#"<rect width="100%" height="100%" fill="white"/>"#);

    // axes
    let (x0, x1) = (MARGIN_LEFT, WIDTH - MARGIN_RIGHT);
    let (y0, y1) = (HEIGHT - MARGIN_BOTTOM, MARGIN_TOP);
    let _ = writeln!(svg, r#"<line x1="{x0}" y1="{y0}" x2="{x1}" y2="{y0}" stroke="black"/>"#);
    let _ = writeln!(svg, r#"<line x1="{x0}" y1="{y0}" x2="{x0}" y2="{y1}" stroke="black"/>"#);
    for i in 0..=4 {
        let value = y_min + (y_max - y_min) * i as f64 / 4.0;
        let y = sy(value);
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="end">{:.1}</text>"#,
            x0 - 6.0,
            y + 4.0,
            value
        );
        let call = max_call * i as f64 / 4.0;
        let _ = writeln!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" text-anchor="middle">{:.0}</text>"#,
            sx(call),
            y0 + 16.0,
            call
        );
    }
    let _ = writeln!(
        svg,
        r#"<text x="{:.1}" y="{:.1}" text-anchor="middle">call index</text>"#,
        MARGIN_LEFT + plot_w / 2.0,
        HEIGHT - 6.0
    );
    let _ = writeln!(
        svg,
        r#"<text x="14" y="{:.1}" text-anchor="middle" transform="rotate(-90 14 {:.1})">Memory allocated (KiB)</text>"#,
        MARGIN_TOP + plot_h / 2.0,
        MARGIN_TOP + plot_h / 2.0
    );

    for (i, table) in tables.iter().enumerate() {
        let color = PALETTE[i % PALETTE.len()];
        let points: Vec<String> = table
            .iter()
            .map(|r| format!("{:.1},{:.1}", sx(r.call_index as f64), sy(kib(r.bytes_allocated))))
            .collect();
        let _ = writeln!(
            svg,
            r#"<polyline fill="none" stroke="{color}" stroke-width="1.5" points="{}"/>"#,
            points.join(" ")
        );
    }

    if tables.len() > 1 {
        for (i, table) in tables.iter().enumerate() {
            let color = PALETTE[i % PALETTE.len()];
            let label = table.experiment_label().unwrap_or("unlabeled");
            let ly = MARGIN_TOP + 10.0 + i as f64 * 16.0;
            let lx = WIDTH - MARGIN_RIGHT - 150.0;
            let _ = writeln!(
                svg,
                r#"<line x1="{lx:.1}" y1="{ly:.1}" x2="{:.1}" y2="{ly:.1}" stroke="{color}" stroke-width="2"/>"#,
                lx + 20.0
            );
            let _ = writeln!(
                svg,
                r#"<text x="{:.1}" y="{:.1}">{}</text>"#,
                lx + 26.0,
                ly + 4.0,
                escape_xml(label)
            );
        }
    }

    svg.push_str("</svg>\n");
    svg
}

/// Render and write to `path`.
pub fn write_svg(path: &Path, tables: &[&MemoryTable]) -> Result<()> {
    std::fs::write(path, render_svg(tables))
        .map_err(|e| anyhow::anyhow!("write plot {}: {}", path.display(), e))?;
    tracing::info!(path = %path.display(), series = tables.len(), "memory plot written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::HookPhase;
    use crate::profiling::{MemoryLog, Snapshot};

    fn table(label: &str, values: &[u64]) -> MemoryTable {
        let mut log = MemoryLog::new();
        for &v in values {
            log.append(Snapshot {
                layer_index: 0,
                layer_type: "Linear".into(),
                experiment_label: Some(label.into()),
                hook_phase: HookPhase::Pre,
                bytes_allocated: v,
                bytes_reserved: 0,
                peak_bytes_allocated: v,
                input_shape: vec![1],
                output_shape: None,
            });
        }
        log.normalize(0)
    }

    #[test]
    fn single_series_has_no_legend() {
        let svg = render_svg(&[&table("a", &[0, 1024, 2048])]);
        assert!(svg.starts_with("<svg"));
        assert_eq!(svg.matches("<polyline").count(), 1);
        assert!(!svg.contains(">a</text>"));
    }

    #[test]
    fn overlay_draws_legend_per_label() {
        let a = table("fp32", &[0, 4096]);
        let b = table("<bf16>", &[0, 2048]);
        let svg = render_svg(&[&a, &b]);
        assert_eq!(svg.matches("<polyline").count(), 2);
        assert!(svg.contains(">fp32</text>"));
        assert!(svg.contains(">&lt;bf16&gt;</text>"));
    }

    #[test]
    fn empty_input_still_renders() {
        let svg = render_svg(&[]);
        assert!(svg.trim_end().ends_with("</svg>"));
    }
}
