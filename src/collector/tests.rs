use super::*;
use crate::catalog::Catalog;
use crate::server::Rows;
use crate::messages::FieldDescription;

fn rows(names: &[&str], tuples: Vec<Vec<Option<&[u8]>>>) -> Rows {
    Rows {
        fields: names
            .iter()
            .map(|n| FieldDescription {
                name: n.to_string(),
                type_oid: 0,
            })
            .collect(),
        tuples: tuples
            .into_iter()
            .map(|t| t.into_iter().map(|v| v.map(|v| v.to_vec())).collect())
            .collect(),
    }
}

fn metric(yaml: &str) -> MetricDef {
    Catalog::from_yaml(yaml).unwrap().metrics.remove(0)
}

#[test]
fn test_single_value_column_uses_bare_tag() {
    let metric = metric(
        r#"
metrics:
  - tag: pg_up
    collector: general
    queries:
      - {query: SELECT 1, columns: [{type: gauge, description: up}]}
"#,
    );
    let variant = metric.select(16, ServerRole::Primary).unwrap();
    let rows = rows(&["?column?"], vec![vec![Some(b"1")]]);

    let families = rows_to_families(&metric, variant, &rows, "a", None).unwrap();
    assert_eq!(families.len(), 1);
    assert_eq!(families[0].name, "pg_up");
    assert_eq!(families[0].kind, FamilyKind::Gauge);
    let sample = &families[0].samples[0];
    assert_eq!(sample.labels, vec![("server".to_string(), "a".to_string())]);
    assert_eq!(sample.value, 1.0);
}

#[test]
fn test_multiple_value_columns_compose_names() {
    let metric = metric(
        r#"
metrics:
  - tag: pg_stat_archiver
    collector: archiver
    queries:
      - query: SELECT archived_count, failed_count FROM pg_stat_archiver
        columns:
          - {name: archived_count, type: counter}
          - {name: failed_count, type: counter}
"#,
    );
    let variant = metric.select(16, ServerRole::Primary).unwrap();
    let rows = rows(
        &["archived_count", "failed_count"],
        vec![vec![Some(b"10"), Some(b"2")]],
    );

    let families = rows_to_families(&metric, variant, &rows, "a", None).unwrap();
    let names: Vec<_> = families.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["pg_stat_archiver_archived_count", "pg_stat_archiver_failed_count"]
    );
    assert!(families.iter().all(|f| f.kind == FamilyKind::Counter));
}

#[test]
fn test_labels_in_declared_order_with_server_and_database() {
    let metric = metric(
        r#"
metrics:
  - tag: pg_database_size_bytes
    collector: db
    database: all
    queries:
      - query: SELECT ...
        columns:
          - {name: datname, type: label}
          - {name: size, type: gauge}
"#,
    );
    let variant = metric.select(16, ServerRole::Primary).unwrap();
    let rows = rows(&["datname", "size"], vec![vec![Some(b"app"), Some(b"1024")]]);

    let families = rows_to_families(&metric, variant, &rows, "srv1", Some("app")).unwrap();
    let sample = &families[0].samples[0];
    assert_eq!(
        sample.labels,
        vec![
            ("datname".to_string(), "app".to_string()),
            ("server".to_string(), "srv1".to_string()),
            ("database".to_string(), "app".to_string()),
        ]
    );
}

#[test]
fn test_null_value_becomes_nan() {
    let metric = metric(
        r#"
metrics:
  - tag: pg_up
    collector: general
    queries:
      - {query: SELECT NULL, columns: [{type: gauge}]}
"#,
    );
    let variant = metric.select(16, ServerRole::Primary).unwrap();
    let rows = rows(&["?column?"], vec![vec![None]]);

    let families = rows_to_families(&metric, variant, &rows, "a", None).unwrap();
    assert!(families[0].samples[0].value.is_nan());
}

#[test]
fn test_zero_rows_keeps_family_headers() {
    let metric = metric(
        r#"
metrics:
  - tag: pg_up
    collector: general
    queries:
      - {query: SELECT 1, columns: [{type: gauge, description: up}]}
"#,
    );
    let variant = metric.select(16, ServerRole::Primary).unwrap();
    let rows = rows(&["?column?"], vec![]);

    let families = rows_to_families(&metric, variant, &rows, "a", None).unwrap();
    assert_eq!(families.len(), 1);
    assert_eq!(families[0].help, "up");
    assert!(families[0].samples.is_empty());
}

fn histogram_metric() -> MetricDef {
    metric(
        r#"
metrics:
  - tag: pg_stat_statements_time
    collector: stat
    queries:
      - query: SELECT app, sum, count, bounds, counts FROM ...
        columns:
          - {name: app, type: label}
          - {name: seconds, type: histogram, description: Query time}
"#,
    )
}

#[test]
fn test_histogram_expansion() {
    let metric = histogram_metric();
    let variant = metric.select(16, ServerRole::Primary).unwrap();
    let rows = rows(
        &["app", "sum", "count", "bounds", "counts"],
        vec![vec![
            Some(b"web"),
            Some(b"12.5"),
            Some(b"100"),
            Some(b"{0.1,0.5,1}"),
            Some(b"{50,90,99}"),
        ]],
    );

    let families = rows_to_families(&metric, variant, &rows, "a", None).unwrap();
    assert_eq!(families.len(), 1);
    let family = &families[0];
    assert_eq!(family.name, "pg_stat_statements_time");
    assert_eq!(family.kind, FamilyKind::Histogram);

    let buckets: Vec<_> = family
        .samples
        .iter()
        .filter(|s| s.name.ends_with("_bucket"))
        .collect();
    assert_eq!(buckets.len(), 4); // 3 explicit + +Inf
    assert_eq!(
        buckets[3].labels.last().unwrap(),
        &("le".to_string(), "+Inf".to_string())
    );
    assert_eq!(buckets[3].value, 100.0);

    let sum = family
        .samples
        .iter()
        .find(|s| s.name.ends_with("_sum"))
        .unwrap();
    assert_eq!(sum.value, 12.5);
    let count = family
        .samples
        .iter()
        .find(|s| s.name.ends_with("_count"))
        .unwrap();
    assert_eq!(count.value, 100.0);
}

#[test]
fn test_histogram_bucket_length_mismatch_is_render_shape() {
    let metric = histogram_metric();
    let variant = metric.select(16, ServerRole::Primary).unwrap();
    // One fewer count than bounds.
    let rows = rows(
        &["app", "sum", "count", "bounds", "counts"],
        vec![vec![
            Some(b"web"),
            Some(b"12.5"),
            Some(b"100"),
            Some(b"{0.1,0.5,1}"),
            Some(b"{50,90}"),
        ]],
    );

    let err = rows_to_families(&metric, variant, &rows, "a", None).unwrap_err();
    assert!(matches!(err, Error::RenderShape { .. }));
}

#[test]
fn test_histogram_bounds_must_increase() {
    let metric = histogram_metric();
    let variant = metric.select(16, ServerRole::Primary).unwrap();
    let rows = rows(
        &["app", "sum", "count", "bounds", "counts"],
        vec![vec![
            Some(b"web"),
            Some(b"1"),
            Some(b"10"),
            Some(b"{0.5,0.5,1}"),
            Some(b"{1,2,3}"),
        ]],
    );

    let err = rows_to_families(&metric, variant, &rows, "a", None).unwrap_err();
    assert!(matches!(err, Error::RenderShape { .. }));
}

#[test]
fn test_sort_name_orders_samples() {
    let mut families = vec![Family {
        name: "pg_database_size_bytes".into(),
        help: String::new(),
        kind: FamilyKind::Gauge,
        samples: vec![
            Sample {
                name: "pg_database_size_bytes".into(),
                labels: vec![("datname".into(), "zulu".into())],
                value: 2.0,
            },
            Sample {
                name: "pg_database_size_bytes".into(),
                labels: vec![("datname".into(), "alpha".into())],
                value: 1.0,
            },
        ],
    }];

    sort_families(SortOrder::Name, &mut families);
    assert_eq!(families[0].samples[0].labels[0].1, "alpha");

    // data order is untouched
    families[0].samples.reverse();
    let before = families[0].samples.clone();
    sort_families(SortOrder::Data, &mut families);
    assert_eq!(families[0].samples, before);
}

#[test]
fn test_merge_families_appends_samples() {
    let mut dst = vec![Family {
        name: "pg_up".into(),
        help: "up".into(),
        kind: FamilyKind::Gauge,
        samples: vec![Sample {
            name: "pg_up".into(),
            labels: vec![("server".into(), "a".into())],
            value: 1.0,
        }],
    }];
    let src = vec![Family {
        name: "pg_up".into(),
        help: "up".into(),
        kind: FamilyKind::Gauge,
        samples: vec![Sample {
            name: "pg_up".into(),
            labels: vec![("server".into(), "b".into())],
            value: 1.0,
        }],
    }];

    merge_families(&mut dst, src);
    assert_eq!(dst.len(), 1);
    assert_eq!(dst[0].samples.len(), 2);
}
