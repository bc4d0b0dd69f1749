//! Collection of one (server, metric) pair: run the selected query variant
//! and turn the result set into metric families.

use std::time::Duration;

use log::warn;

use crate::catalog::{ColumnKind, DatabaseScope, MetricDef, QueryVariant, ServerRole, SortOrder};
use crate::config::{ServerConfig, User};
use crate::errors::Error;
use crate::server::{Rows, Server};

mod value;

pub use value::{parse_float_array, parse_numeric};

#[cfg(test)]
mod tests;

/// One exposition sample: composed metric name, label pairs in output
/// order, and the value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: Vec<(String, String)>,
    pub value: f64,
}

/// Exposition type of a family.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FamilyKind {
    Gauge,
    Counter,
    Histogram,
}

impl FamilyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FamilyKind::Gauge => "gauge",
            FamilyKind::Counter => "counter",
            FamilyKind::Histogram => "histogram",
        }
    }
}

/// All samples sharing one metric base name, plus its HELP/TYPE metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct Family {
    pub name: String,
    pub help: String,
    pub kind: FamilyKind,
    pub samples: Vec<Sample>,
}

impl Family {
    pub fn new(name: &str, help: &str, kind: FamilyKind) -> Family {
        Family {
            name: name.to_string(),
            help: help.to_string(),
            kind,
            samples: Vec::new(),
        }
    }
}

/// Append families from `src` into `dst`, merging samples of families that
/// already exist there. Family order is first-seen order, which keeps
/// HELP/TYPE ahead of every sample of the family.
pub fn merge_families(dst: &mut Vec<Family>, src: Vec<Family>) {
    for family in src {
        match dst.iter_mut().find(|f| f.name == family.name) {
            Some(existing) => existing.samples.extend(family.samples),
            None => dst.push(family),
        }
    }
}

/// Collect one metric from one server.
///
/// `conn` is the server's owned connection to its default database. For
/// all-database metrics the databases are iterated sequentially on
/// short-lived extra connections, keeping output order deterministic.
pub async fn collect(
    server: &ServerConfig,
    user: &User,
    conn: &mut Server,
    metric: &MetricDef,
    version: u32,
    role: ServerRole,
    timeout: Duration,
) -> Result<Vec<Family>, Error> {
    let variant = match metric.select(version, role) {
        Some(variant) => variant,
        None => return Ok(Vec::new()),
    };

    let mut families = Vec::new();

    match metric.database {
        DatabaseScope::Single => {
            let rows = conn.simple_query_timeout(&variant.query, timeout).await?;
            merge_families(
                &mut families,
                rows_to_families(metric, variant, &rows, &server.name, None)?,
            );
        }
        DatabaseScope::All => {
            for database in conn.databases().await? {
                let rows = if database == server.database {
                    conn.simple_query_timeout(&variant.query, timeout).await?
                } else {
                    let mut extra =
                        match tokio::time::timeout(timeout, Server::startup(server, user, &database))
                            .await
                        {
                            Ok(conn) => conn?,
                            Err(_) => return Err(Error::QueryTimeout),
                        };
                    extra.simple_query_timeout(&variant.query, timeout).await?
                };
                merge_families(
                    &mut families,
                    rows_to_families(metric, variant, &rows, &server.name, Some(&database))?,
                );
            }
        }
    }

    sort_families(metric.sort, &mut families);

    Ok(families)
}

/// Apply a metric's sort policy: `name` orders samples lexicographically by
/// metric name and labels, `data` preserves result-set order.
pub fn sort_families(sort: SortOrder, families: &mut [Family]) {
    if sort == SortOrder::Name {
        for family in families {
            family
                .samples
                .sort_by(|a, b| (&a.name, &a.labels).cmp(&(&b.name, &b.labels)));
        }
    }
}

/// Convert a result set into families according to the variant's column
/// descriptors. Pure; the scrape path and the tests share it.
pub fn rows_to_families(
    metric: &MetricDef,
    variant: &QueryVariant,
    rows: &Rows,
    server_name: &str,
    database: Option<&str>,
) -> Result<Vec<Family>, Error> {
    let value_columns = variant.value_columns().count();
    let mut families: Vec<Family> = Vec::new();

    // Families exist even when the query returned zero rows, so the
    // exposition still carries the HELP/TYPE headers.
    for column in variant.value_columns() {
        let name = compose_name(&metric.tag, column.name.as_deref(), value_columns);
        let kind = match column.kind {
            ColumnKind::Counter => FamilyKind::Counter,
            ColumnKind::Histogram => FamilyKind::Histogram,
            _ => FamilyKind::Gauge,
        };
        if !families.iter().any(|f| f.name == name) {
            families.push(Family::new(
                &name,
                column.description.as_deref().unwrap_or(""),
                kind,
            ));
        }
    }

    for tuple in rows.iter() {
        let mut labels: Vec<(String, String)> = Vec::new();

        for (pos, column) in variant.columns.iter().enumerate() {
            if column.kind != ColumnKind::Label {
                continue;
            }
            let raw = field(tuple, pos, &metric.tag)?;
            let value = raw
                .map(|v| String::from_utf8_lossy(v).to_string())
                .unwrap_or_default();
            labels.push((column.name.clone().unwrap_or_default(), value));
        }

        labels.push(("server".to_string(), server_name.to_string()));
        if let Some(database) = database {
            labels.push(("database".to_string(), database.to_string()));
        }

        for (pos, column) in variant.columns.iter().enumerate() {
            let name = compose_name(&metric.tag, column.name.as_deref(), value_columns);
            match column.kind {
                ColumnKind::Label => (),
                ColumnKind::Gauge | ColumnKind::Counter => {
                    let value = parse_numeric(field(tuple, pos, &metric.tag)?);
                    push_sample(&mut families, &name, Sample {
                        name: name.clone(),
                        labels: labels.clone(),
                        value,
                    });
                }
                ColumnKind::Histogram => {
                    let samples = histogram_samples(&metric.tag, &name, tuple, pos, &labels)?;
                    for sample in samples {
                        push_sample(&mut families, &name, sample);
                    }
                }
            }
        }
    }

    Ok(families)
}

fn push_sample(families: &mut [Family], family_name: &str, sample: Sample) {
    if let Some(family) = families.iter_mut().find(|f| f.name == family_name) {
        family.samples.push(sample);
    }
}

/// Metric name composition: the bare tag when the metric has exactly one
/// value column, `tag_column` otherwise.
fn compose_name(tag: &str, column: Option<&str>, value_columns: usize) -> String {
    match column {
        Some(column) if value_columns > 1 && !column.is_empty() => format!("{tag}_{column}"),
        _ => tag.to_string(),
    }
}

fn field<'a>(
    tuple: &'a [Option<Vec<u8>>],
    pos: usize,
    tag: &str,
) -> Result<Option<&'a [u8]>, Error> {
    match tuple.get(pos) {
        Some(value) => Ok(value.as_deref()),
        None => Err(Error::RenderShape {
            metric: tag.to_string(),
            reason: format!("tuple has no column at position {pos}"),
        }),
    }
}

/// Expand the histogram column group into bucket/sum/count samples.
///
/// The group is implicit: the histogram-typed column holds the sum and the
/// next three tuple fields hold the count, the bucket upper bounds, and the
/// cumulative bucket counts.
fn histogram_samples(
    tag: &str,
    name: &str,
    tuple: &[Option<Vec<u8>>],
    pos: usize,
    labels: &[(String, String)],
) -> Result<Vec<Sample>, Error> {
    let shape_err = |reason: String| Error::RenderShape {
        metric: tag.to_string(),
        reason,
    };

    let sum = parse_numeric(field(tuple, pos, tag)?);
    let count = parse_numeric(field(tuple, pos + 1, tag)?);

    let bounds_raw = field(tuple, pos + 2, tag)?
        .ok_or_else(|| shape_err("histogram bucket bounds are NULL".into()))?;
    let counts_raw = field(tuple, pos + 3, tag)?
        .ok_or_else(|| shape_err("histogram bucket counts are NULL".into()))?;

    let bounds = parse_float_array(bounds_raw)
        .ok_or_else(|| shape_err("histogram bucket bounds are not an array".into()))?;
    let counts = parse_float_array(counts_raw)
        .ok_or_else(|| shape_err("histogram bucket counts are not an array".into()))?;

    if bounds.len() != counts.len() {
        return Err(shape_err(format!(
            "bucket counts ({}) do not match bucket bounds ({})",
            counts.len(),
            bounds.len()
        )));
    }
    if bounds.windows(2).any(|w| w[0] >= w[1]) {
        return Err(shape_err(
            "bucket upper bounds are not strictly increasing".into(),
        ));
    }
    if counts.windows(2).any(|w| w[0] > w[1]) {
        return Err(shape_err(
            "cumulative bucket counts decrease".into(),
        ));
    }

    let mut samples = Vec::with_capacity(bounds.len() + 3);

    for (bound, bucket_count) in bounds.iter().zip(counts.iter()) {
        let mut labels = labels.to_vec();
        labels.push(("le".to_string(), crate::prometheus::format_value(*bound)));
        samples.push(Sample {
            name: format!("{name}_bucket"),
            labels,
            value: *bucket_count,
        });
    }

    // The implicit +Inf bucket equals the total count.
    let mut inf_labels = labels.to_vec();
    inf_labels.push(("le".to_string(), "+Inf".to_string()));
    samples.push(Sample {
        name: format!("{name}_bucket"),
        labels: inf_labels,
        value: count,
    });

    samples.push(Sample {
        name: format!("{name}_sum"),
        labels: labels.to_vec(),
        value: sum,
    });
    samples.push(Sample {
        name: format!("{name}_count"),
        labels: labels.to_vec(),
        value: count,
    });

    if let Some(last) = counts.last() {
        if *last > count {
            warn!("histogram {name} last bucket exceeds its count");
        }
    }

    Ok(samples)
}
