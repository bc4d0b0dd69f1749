//! Prometheus text exposition renderer.

use std::fmt::Write;

use crate::collector::Family;

/// Render a value the way the text format spells it: literal `NaN`,
/// `+Inf`, `-Inf`, integers without a fraction.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        }
    } else if value == value.trunc() && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

fn escape_label_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

fn escape_help(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

/// Emit the exposition for a list of families.
///
/// Each family contributes exactly one `# HELP` and one `# TYPE` line
/// followed by all of its samples, so headers always precede samples even
/// when a family spans several servers.
pub fn render(families: &[Family]) -> String {
    let mut out = String::new();

    for family in families {
        let _ = writeln!(out, "# HELP {} {}", family.name, escape_help(&family.help));
        let _ = writeln!(out, "# TYPE {} {}", family.name, family.kind.as_str());

        for sample in &family.samples {
            if sample.labels.is_empty() {
                let _ = writeln!(out, "{} {}", sample.name, format_value(sample.value));
            } else {
                let labels = sample
                    .labels
                    .iter()
                    .map(|(k, v)| format!("{k}=\"{}\"", escape_label_value(v)))
                    .collect::<Vec<_>>()
                    .join(",");
                let _ = writeln!(out, "{}{{{}}} {}", sample.name, labels, format_value(sample.value));
            }
        }
    }

    out
}
