use super::*;

fn catalog(yaml: &str) -> Result<Catalog, Error> {
    Catalog::from_yaml(yaml)
}

#[test]
fn test_builtin_catalog_loads() {
    let catalog = Catalog::builtin().unwrap();
    assert!(catalog.metrics.iter().any(|m| m.tag == "pg_up"));
}

#[test]
fn test_select_highest_version_wins() {
    let catalog = catalog(
        r#"
metrics:
  - tag: pg_stat_database
    collector: stat_db
    queries:
      - query: SELECT old
        version: 10
        columns: [{name: v, type: gauge}]
      - query: SELECT new
        version: 12
        columns: [{name: v, type: gauge}]
"#,
    )
    .unwrap();
    let metric = &catalog.metrics[0];

    // Against v11 the v10 variant is used; against v12+ the v12 one.
    assert_eq!(
        metric.select(11, ServerRole::Primary).unwrap().query,
        "SELECT old"
    );
    assert_eq!(
        metric.select(12, ServerRole::Primary).unwrap().query,
        "SELECT new"
    );
    assert_eq!(
        metric.select(16, ServerRole::Replica).unwrap().query,
        "SELECT new"
    );
}

#[test]
fn test_select_below_every_minimum_is_none() {
    let catalog = catalog(
        r#"
metrics:
  - tag: pg_new_feature
    collector: general
    queries:
      - query: SELECT 1
        version: 14
        columns: [{type: gauge}]
"#,
    )
    .unwrap();
    assert!(catalog.metrics[0].select(13, ServerRole::Primary).is_none());
}

#[test]
fn test_select_respects_role() {
    let catalog = catalog(
        r#"
metrics:
  - tag: pg_wal_receiver
    collector: wal
    queries:
      - query: SELECT replica_side
        version: 10
        server: replica
        columns: [{type: gauge}]
"#,
    )
    .unwrap();
    let metric = &catalog.metrics[0];
    assert!(metric.select(16, ServerRole::Primary).is_none());
    assert!(metric.select(16, ServerRole::Replica).is_some());
}

#[test]
fn test_select_is_stable() {
    let catalog = catalog(
        r#"
metrics:
  - tag: pg_up
    collector: general
    queries:
      - {query: SELECT 1, version: 10, columns: [{type: gauge}]}
      - {query: SELECT 2, version: 13, columns: [{type: gauge}]}
"#,
    )
    .unwrap();
    let metric = &catalog.metrics[0];
    let first = metric.select(15, ServerRole::Primary).unwrap().query.clone();
    for _ in 0..10 {
        assert_eq!(metric.select(15, ServerRole::Primary).unwrap().query, first);
    }
}

#[test]
fn test_duplicate_version_role_rejected() {
    let err = catalog(
        r#"
metrics:
  - tag: pg_up
    collector: general
    queries:
      - {query: SELECT 1, version: 10, columns: [{type: gauge}]}
      - {query: SELECT 2, version: 10, columns: [{type: gauge}]}
"#,
    )
    .unwrap_err();
    assert!(matches!(err, Error::BadCatalog(_)));
}

#[test]
fn test_same_version_different_roles_allowed() {
    let catalog = catalog(
        r#"
metrics:
  - tag: pg_lag
    collector: wal
    queries:
      - {query: SELECT p, version: 10, server: primary, columns: [{type: gauge}]}
      - {query: SELECT r, version: 10, server: replica, columns: [{type: gauge}]}
"#,
    )
    .unwrap();
    let metric = &catalog.metrics[0];
    assert_eq!(metric.select(16, ServerRole::Primary).unwrap().query, "SELECT p");
    assert_eq!(metric.select(16, ServerRole::Replica).unwrap().query, "SELECT r");
}

#[test]
fn test_metric_without_variants_rejected() {
    let err = catalog(
        r#"
metrics:
  - tag: pg_up
    collector: general
    queries: []
"#,
    )
    .unwrap_err();
    assert!(matches!(err, Error::BadCatalog(_)));
}

#[test]
fn test_label_without_name_rejected() {
    let err = catalog(
        r#"
metrics:
  - tag: pg_up
    collector: general
    queries:
      - query: SELECT 1
        columns: [{type: label}]
"#,
    )
    .unwrap_err();
    assert!(matches!(err, Error::BadCatalog(_)));
}

#[test]
fn test_reserved_server_label_rejected() {
    let err = catalog(
        r#"
metrics:
  - tag: pg_up
    collector: general
    queries:
      - query: SELECT 1
        columns: [{name: server, type: label}, {name: v, type: gauge}]
"#,
    )
    .unwrap_err();
    assert!(matches!(err, Error::BadCatalog(_)));
}

#[test]
fn test_columns_after_histogram_rejected() {
    let err = catalog(
        r#"
metrics:
  - tag: pg_latency
    collector: stat
    queries:
      - query: SELECT ...
        columns:
          - {name: latency, type: histogram}
          - {name: extra, type: gauge}
"#,
    )
    .unwrap_err();
    assert!(matches!(err, Error::BadCatalog(_)));
}

#[test]
fn test_histogram_as_last_column_allowed() {
    let catalog = catalog(
        r#"
metrics:
  - tag: pg_latency
    collector: stat
    queries:
      - query: SELECT ...
        columns:
          - {name: app, type: label}
          - {name: latency, type: histogram}
"#,
    )
    .unwrap();
    assert_eq!(catalog.metrics.len(), 1);
}

#[test]
fn test_unknown_key_rejected() {
    let err = catalog(
        r#"
metrics:
  - tag: pg_up
    collector: general
    frobnicate: true
    queries:
      - {query: SELECT 1, columns: [{type: gauge}]}
"#,
    )
    .unwrap_err();
    assert!(matches!(err, Error::BadCatalog(_)));
}
