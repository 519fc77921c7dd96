//! Built-in analyzers
//!
//! These are small enough to serve as reference implementations and are what
//! the command-line tool registers by default.

use crate::plugin::{MetricSample, Plugin};
use serde_json::{json, Value};

/// Name of the [`anchor_count`] plugin
pub const ANCHOR_COUNT: &str = "anchor-count";

/// Name of the [`load_time`] plugin
pub const LOAD_TIME: &str = "load-time";

/// Counts `<a>` elements per page
///
/// Page record: `{"anchors": n}`. Summary: `{"pages", "total", "average", "max"}`.
pub fn anchor_count() -> Plugin {
    Plugin::new(
        ANCHOR_COUNT,
        |page, _| Ok(json!({ "anchors": page.count("a")? })),
        |samples| {
            let counts = field_values(samples, "anchors");
            let total: f64 = counts.iter().sum();
            let max = counts.iter().copied().fold(0.0, f64::max);

            Ok(json!({
                "pages": counts.len(),
                "total": total as u64,
                "average": mean(&counts),
                "max": max as u64,
            }))
        },
    )
}

/// Records the time the renderer took to load each page
///
/// Page record: `{"ms": n}`. Summary: `{"min", "max", "mean"}`, all `null`
/// when no page was measured.
pub fn load_time() -> Plugin {
    Plugin::new(
        LOAD_TIME,
        |_, load_time| Ok(json!({ "ms": load_time.as_millis() as u64 })),
        |samples| {
            let times = field_values(samples, "ms");
            if times.is_empty() {
                return Ok(json!({ "min": null, "max": null, "mean": null }));
            }

            let min = times.iter().copied().fold(f64::INFINITY, f64::min);
            let max = times.iter().copied().fold(0.0, f64::max);

            Ok(json!({
                "min": min as u64,
                "max": max as u64,
                "mean": mean(&times),
            }))
        },
    )
}

/// The default plugin set
pub fn defaults() -> Vec<Plugin> {
    vec![anchor_count(), load_time()]
}

fn field_values(samples: &[MetricSample<'_>], field: &str) -> Vec<f64> {
    samples
        .iter()
        .filter_map(|sample| sample.metrics.get(field).and_then(Value::as_f64))
        .collect()
}

/// Mean rounded to two decimals, `0` for an empty slice
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    (mean * 100.0).round() / 100.0
}
