//! Numeric interpretation of raw field bytes.
//!
//! Values arrive as PostgreSQL text-format bytes. They are parsed as
//! signed 64-bit integers or doubles; booleans map to 0/1 and NULL to NaN.
//! The exporter reports what the server returned, so unparsable values
//! also become NaN rather than failing the scrape.

use log::warn;

/// Parse one field into a sample value.
pub fn parse_numeric(raw: Option<&[u8]>) -> f64 {
    let raw = match raw {
        Some(raw) => raw,
        None => return f64::NAN,
    };

    let text = String::from_utf8_lossy(raw);
    let text = text.trim();

    match text {
        "t" | "true" => return 1.0,
        "f" | "false" => return 0.0,
        _ => (),
    }

    if let Ok(v) = text.parse::<i64>() {
        return v as f64;
    }

    match text.parse::<f64>() {
        Ok(v) => v,
        Err(_) => {
            warn!("unparsable numeric value {text:?}, reporting NaN");
            f64::NAN
        }
    }
}

/// Parse a PostgreSQL array literal (`{1,2.5,3}`) into floats.
pub fn parse_float_array(raw: &[u8]) -> Option<Vec<f64>> {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim();
    let inner = text.strip_prefix('{')?.strip_suffix('}')?;

    if inner.trim().is_empty() {
        return Some(Vec::new());
    }

    inner
        .split(',')
        .map(|part| part.trim().parse::<f64>().ok())
        .collect()
}
