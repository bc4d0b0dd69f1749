//! Metric definition catalog.
//!
//! The catalog is a list of metric definitions, each carrying one or more
//! SQL query variants gated by minimum server version and server role.
//! Definitions are loaded from YAML once, validated fatally, and never
//! mutated afterwards; a reload builds a whole new catalog.

use std::collections::BTreeMap;

use log::info;
use serde_derive::{Deserialize, Serialize};

use crate::errors::Error;

#[cfg(test)]
mod tests;

/// Versions below this are never considered; it is also the default
/// minimum version of a variant that does not declare one.
pub const DEFAULT_MIN_VERSION: u32 = 10;

/// The synthetic label every sample carries; metric definitions may not
/// declare it themselves.
pub const SERVER_LABEL: &str = "server";

/// Role of a running server, determined by `pg_is_in_recovery()`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ServerRole {
    Primary,
    Replica,
}

impl std::fmt::Display for ServerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ServerRole::Primary => write!(f, "primary"),
            ServerRole::Replica => write!(f, "replica"),
        }
    }
}

/// Which roles a metric or query variant applies to.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Applicability {
    Primary,
    Replica,
    #[default]
    Both,
}

impl Applicability {
    pub fn matches(&self, role: ServerRole) -> bool {
        match self {
            Applicability::Both => true,
            Applicability::Primary => role == ServerRole::Primary,
            Applicability::Replica => role == ServerRole::Replica,
        }
    }
}

/// Output ordering within one metric family.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Name,
    Data,
}

/// Whether the query runs once or once per database.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseScope {
    #[default]
    Single,
    All,
}

/// How a tuple field contributes to the exposition.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Label,
    Gauge,
    Counter,
    Histogram,
}

/// Descriptor of one result column.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ColumnDef {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "type")]
    pub kind: ColumnKind,

    #[serde(default)]
    pub description: Option<String>,
}

/// One SQL query within a metric definition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct QueryVariant {
    pub query: String,

    #[serde(default = "QueryVariant::default_version")]
    pub version: u32,

    #[serde(default)]
    pub server: Applicability,

    pub columns: Vec<ColumnDef>,
}

impl QueryVariant {
    fn default_version() -> u32 {
        DEFAULT_MIN_VERSION
    }

    /// Columns that produce samples (everything except labels).
    pub fn value_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| c.kind != ColumnKind::Label)
    }
}

/// One metric family definition.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricDef {
    pub tag: String,
    pub collector: String,
    pub sort: SortOrder,
    pub server: Applicability,
    pub database: DatabaseScope,
    pub variants: Vec<QueryVariant>,

    // Variant index per role, keyed by minimum version so selection is a
    // range lookup. Values are positions in `variants`.
    primary: BTreeMap<u32, usize>,
    replica: BTreeMap<u32, usize>,
}

impl MetricDef {
    /// Deterministic variant selection: among variants whose minimum
    /// version is at or below `version` and whose applicability covers
    /// `role`, the one with the highest minimum version wins.
    pub fn select(&self, version: u32, role: ServerRole) -> Option<&QueryVariant> {
        let index = match role {
            ServerRole::Primary => &self.primary,
            ServerRole::Replica => &self.replica,
        };
        index
            .range(..=version)
            .next_back()
            .map(|(_, &pos)| &self.variants[pos])
    }
}

/// The loaded, validated catalog. Read-only after construction.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Catalog {
    pub metrics: Vec<MetricDef>,
}

// On-disk schema.
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct CatalogFile {
    metrics: Vec<MetricSpec>,
}

#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct MetricSpec {
    tag: String,
    collector: String,
    #[serde(default)]
    sort: SortOrder,
    #[serde(default)]
    server: Applicability,
    #[serde(default)]
    database: DatabaseScope,
    queries: Vec<QueryVariant>,
}

impl Catalog {
    /// Load the catalog from a YAML file, or from every `.yaml`/`.yml`
    /// file in a directory (sorted by name).
    pub fn load(path: &str) -> Result<Catalog, Error> {
        let meta = std::fs::metadata(path)
            .map_err(|err| Error::BadCatalog(format!("could not open '{path}': {err}")))?;

        let mut metrics = Vec::new();
        if meta.is_dir() {
            let mut files: Vec<_> = std::fs::read_dir(path)
                .map_err(|err| Error::BadCatalog(format!("could not read '{path}': {err}")))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| {
                    matches!(
                        p.extension().and_then(|e| e.to_str()),
                        Some("yaml") | Some("yml")
                    )
                })
                .collect();
            files.sort();
            for file in files {
                let contents = std::fs::read_to_string(&file).map_err(|err| {
                    Error::BadCatalog(format!("could not read '{}': {err}", file.display()))
                })?;
                metrics.extend(parse_metrics(&contents)?);
            }
        } else {
            let contents = std::fs::read_to_string(path)
                .map_err(|err| Error::BadCatalog(format!("could not read '{path}': {err}")))?;
            metrics.extend(parse_metrics(&contents)?);
        }

        let catalog = build(metrics)?;
        info!("Loaded {} metric definitions from {path}", catalog.metrics.len());
        Ok(catalog)
    }

    /// The catalog used when no `metrics_path` is configured.
    pub fn builtin() -> Result<Catalog, Error> {
        build(parse_metrics(BUILTIN_CATALOG)?)
    }

    /// Parse and validate a catalog from YAML text.
    pub fn from_yaml(contents: &str) -> Result<Catalog, Error> {
        build(parse_metrics(contents)?)
    }

    /// Metric definitions in catalog order.
    pub fn iter(&self) -> std::slice::Iter<'_, MetricDef> {
        self.metrics.iter()
    }
}

fn parse_metrics(contents: &str) -> Result<Vec<MetricSpec>, Error> {
    let file: CatalogFile = serde_yaml::from_str(contents)
        .map_err(|err| Error::BadCatalog(format!("YAML parse error: {err}")))?;
    Ok(file.metrics)
}

fn build(specs: Vec<MetricSpec>) -> Result<Catalog, Error> {
    let mut metrics = Vec::with_capacity(specs.len());

    for spec in specs {
        let tag = spec.tag;

        if spec.queries.is_empty() {
            return Err(Error::BadCatalog(format!(
                "metric {tag:?} has no query variants"
            )));
        }

        for variant in &spec.queries {
            validate_columns(&tag, variant)?;
        }

        let mut primary = BTreeMap::new();
        let mut replica = BTreeMap::new();
        for (pos, variant) in spec.queries.iter().enumerate() {
            if variant.server.matches(ServerRole::Primary)
                && primary.insert(variant.version, pos).is_some()
            {
                return Err(Error::BadCatalog(format!(
                    "metric {tag:?} has two variants for version {} on primaries",
                    variant.version
                )));
            }
            if variant.server.matches(ServerRole::Replica)
                && replica.insert(variant.version, pos).is_some()
            {
                return Err(Error::BadCatalog(format!(
                    "metric {tag:?} has two variants for version {} on replicas",
                    variant.version
                )));
            }
        }

        metrics.push(MetricDef {
            tag,
            collector: spec.collector,
            sort: spec.sort,
            server: spec.server,
            database: spec.database,
            variants: spec.queries,
            primary,
            replica,
        });
    }

    Ok(Catalog { metrics })
}

fn validate_columns(tag: &str, variant: &QueryVariant) -> Result<(), Error> {
    if variant.columns.is_empty() {
        return Err(Error::BadCatalog(format!(
            "metric {tag:?} has a variant without columns"
        )));
    }

    for (pos, column) in variant.columns.iter().enumerate() {
        match column.kind {
            ColumnKind::Label => {
                let name = column.name.as_deref().unwrap_or("");
                if name.is_empty() {
                    return Err(Error::BadCatalog(format!(
                        "metric {tag:?} has a label column without a name"
                    )));
                }
                if name == SERVER_LABEL {
                    return Err(Error::BadCatalog(format!(
                        "metric {tag:?} declares the reserved label {SERVER_LABEL:?}"
                    )));
                }
            }
            ColumnKind::Histogram => {
                // The histogram group consumes the rest of the tuple; no
                // column may be declared after it.
                if pos != variant.columns.len() - 1 {
                    return Err(Error::BadCatalog(format!(
                        "metric {tag:?} declares columns after a histogram column"
                    )));
                }
            }
            ColumnKind::Gauge | ColumnKind::Counter => (),
        }
    }

    Ok(())
}

/// Definitions served when the configuration names no catalog file.
const BUILTIN_CATALOG: &str = r#"
metrics:
  - tag: pg_up
    collector: general
    queries:
      - query: SELECT 1
        version: 10
        columns:
          - type: gauge
            description: Is the server reachable
  - tag: pg_database_size_bytes
    collector: db
    queries:
      - query: >-
          SELECT datname, pg_database_size(datname) FROM pg_database
          WHERE datistemplate = false ORDER BY datname
        version: 10
        columns:
          - name: datname
            type: label
          - name: size
            type: gauge
            description: Size of the database in bytes
  - tag: pg_stat_database
    collector: stat_db
    queries:
      - query: >-
          SELECT datname, xact_commit, xact_rollback, blks_read, blks_hit,
          deadlocks FROM pg_stat_database WHERE datname IS NOT NULL
        version: 10
        columns:
          - name: datname
            type: label
          - name: xact_commit
            type: counter
            description: Transactions committed
          - name: xact_rollback
            type: counter
            description: Transactions rolled back
          - name: blks_read
            type: counter
            description: Disk blocks read
          - name: blks_hit
            type: counter
            description: Buffer cache hits
          - name: deadlocks
            type: counter
            description: Deadlocks detected
      - query: >-
          SELECT datname, xact_commit, xact_rollback, blks_read, blks_hit,
          deadlocks, checksum_failures FROM pg_stat_database
          WHERE datname IS NOT NULL
        version: 12
        columns:
          - name: datname
            type: label
          - name: xact_commit
            type: counter
            description: Transactions committed
          - name: xact_rollback
            type: counter
            description: Transactions rolled back
          - name: blks_read
            type: counter
            description: Disk blocks read
          - name: blks_hit
            type: counter
            description: Buffer cache hits
          - name: deadlocks
            type: counter
            description: Deadlocks detected
          - name: checksum_failures
            type: counter
            description: Data page checksum failures
  - tag: pg_stat_archiver
    collector: archiver
    queries:
      - query: >-
          SELECT archived_count, failed_count FROM pg_stat_archiver
        version: 10
        columns:
          - name: archived_count
            type: counter
            description: WAL files archived
          - name: failed_count
            type: counter
            description: WAL archiving failures
  - tag: pg_wal_last_received_lsn
    collector: wal
    server: replica
    queries:
      - query: >-
          SELECT ('x' || lpad(split_part(pg_last_wal_receive_lsn()::text, '/', 1), 8, '0'))::bit(32)::bigint * 4294967296
          + ('x' || lpad(split_part(pg_last_wal_receive_lsn()::text, '/', 2), 8, '0'))::bit(32)::bigint
        version: 11
        columns:
          - type: counter
            description: Last write-ahead log location received
"#;
