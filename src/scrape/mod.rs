//! Scrape orchestration: fan collectors out across servers, join results
//! under the scrape deadline, and merge everything into one exposition.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use log::{error, warn};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, Semaphore};
use tokio::task::JoinSet;

use crate::catalog::ServerRole;
use crate::collector::{self, merge_families, Family, FamilyKind, Sample};
use crate::config::{get_config, Config, ServerConfig, User, VERSION};
use crate::errors::Error;
use crate::server::Server;
use crate::stats;

#[cfg(test)]
mod tests;

/// Runtime state of one configured server, updated by the probe logic.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerState {
    /// Major version; 0 until the first successful probe.
    pub version: u32,
    pub role: Option<ServerRole>,
    pub healthy: bool,
    /// Authentication was rejected; the server stays unhealthy until the
    /// next configuration reload.
    pub auth_failed: bool,
    pub last_seen: Option<SystemTime>,
}

static STATES: Lazy<RwLock<HashMap<String, ServerState>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

/// One owned connection slot per server. The async mutex is the lease: a
/// server's metrics always run on its single connection, serialized.
static LEASES: Lazy<Mutex<HashMap<String, Arc<AsyncMutex<Option<Server>>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Bound on concurrently running server tasks. The pool size is
/// restart-required, so sizing it once at first use is safe.
static WORKERS: Lazy<Arc<Semaphore>> =
    Lazy::new(|| Arc::new(Semaphore::new(get_config().worker_bound())));

fn lease_for(name: &str) -> Arc<AsyncMutex<Option<Server>>> {
    let mut leases = LEASES.lock();
    leases
        .entry(name.to_string())
        .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
        .clone()
}

/// Snapshot of every server's state, for the management surface.
pub fn server_states() -> HashMap<String, ServerState> {
    STATES.read().clone()
}

/// Forget all probe state and pooled connections. Called after a
/// successful configuration reload.
pub fn reset_states() {
    STATES.write().clear();
    LEASES.lock().clear();
}

fn update_state(name: &str, update: impl FnOnce(&mut ServerState)) {
    let mut states = STATES.write();
    update(states.entry(name.to_string()).or_default());
}

struct ServerScrape {
    families: Vec<Family>,
    healthy: bool,
}

/// Run one scrape over every configured server and render the exposition.
///
/// A scrape always produces a document: per-(server, metric) failures are
/// logged and the metric is absent, never half-rendered.
pub async fn scrape() -> Result<String, Error> {
    let config = get_config();
    let timeout = config.general.blocking_timeout.as_std();

    let mut set: JoinSet<(usize, ServerScrape)> = JoinSet::new();
    for (index, server) in config.servers.iter().enumerate() {
        let config = config.clone();
        let server = server.clone();
        set.spawn(async move {
            let _permit = WORKERS.clone().acquire_owned().await;
            (index, scrape_server(&config, &server).await)
        });
    }

    let mut results: Vec<Option<ServerScrape>> = Vec::new();
    results.resize_with(config.servers.len(), || None);

    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        match tokio::time::timeout_at(deadline, set.join_next()).await {
            Ok(Some(Ok((index, result)))) => results[index] = Some(result),
            Ok(Some(Err(err))) => error!("Scrape task failed: {err}"),
            Ok(None) => break,
            Err(_) => {
                // Deadline: completed servers render, the rest are absent.
                // Aborting a task drops its leased connection, which closes
                // the socket and terminates the server-side query.
                warn!("Scrape deadline of {}ms reached", timeout.as_millis());
                set.abort_all();
                break;
            }
        }
    }

    let mut families = meta_families(&config, &results);
    for result in results.into_iter().flatten() {
        merge_families(&mut families, result.families);
    }

    Ok(crate::prometheus::render(&families))
}

/// Collect every applicable metric from one server on its leased
/// connection, in catalog order.
async fn scrape_server(config: &Config, server: &ServerConfig) -> ServerScrape {
    let mut scrape = ServerScrape {
        families: Vec::new(),
        healthy: false,
    };

    if STATES
        .read()
        .get(&server.name)
        .map(|s| s.auth_failed)
        .unwrap_or(false)
    {
        return scrape;
    }

    let user = match config.user(&server.user) {
        Some(user) => user.clone(),
        None => return scrape,
    };

    let lease = lease_for(&server.name);
    let mut slot = lease.lock().await;

    let (version, role) = match ensure_connection(config, server, &user, &mut slot).await {
        Ok(state) => state,
        Err(_) => return scrape,
    };
    scrape.healthy = true;

    let timeout = config.general.blocking_timeout.as_std();

    for metric in config.catalog.iter() {
        if !metric.server.matches(role) {
            continue;
        }

        let conn = match slot.as_mut() {
            Some(conn) => conn,
            None => break,
        };

        match collector::collect(server, &user, conn, metric, version, role, timeout).await {
            Ok(families) => merge_families(&mut scrape.families, families),
            Err(Error::QueryError { sqlstate, message }) => {
                warn!(
                    "Metric {} dropped for server {}: {sqlstate} {message}",
                    metric.tag, server.name
                );
            }
            Err(Error::RenderShape { metric, reason }) => {
                error!("Metric {metric} dropped for server {}: {reason}", server.name);
            }
            Err(Error::QueryTimeout) => {
                warn!(
                    "Metric {} timed out on server {}, closing its connection",
                    metric.tag, server.name
                );
                *slot = None;
                break;
            }
            Err(err) => {
                // Transport-level failure: reopen on the next scrape.
                warn!(
                    "Metric {} failed on server {}: {err}",
                    metric.tag, server.name
                );
                *slot = None;
                scrape.healthy = false;
                break;
            }
        }

        if slot.as_ref().map(|c| c.is_bad()).unwrap_or(false) {
            *slot = None;
            break;
        }
    }

    update_state(&server.name, |state| {
        state.healthy = scrape.healthy;
        state.last_seen = Some(SystemTime::now());
    });

    scrape
}

/// Make sure the slot holds a live connection and the server's version and
/// role are known. Returns the (version, role) used for variant selection.
async fn ensure_connection(
    config: &Config,
    server: &ServerConfig,
    user: &User,
    slot: &mut Option<Server>,
) -> Result<(u32, ServerRole), Error> {
    if slot.as_ref().map(|c| c.is_bad()).unwrap_or(false) {
        *slot = None;
    }

    let fresh = slot.is_none();
    if fresh {
        let timeout = config.general.blocking_timeout.as_std();
        let conn = match tokio::time::timeout(timeout, Server::startup(server, user, &server.database))
            .await
        {
            Ok(Ok(conn)) => conn,
            Ok(Err(err)) => {
                let auth = matches!(
                    err,
                    Error::ServerAuthError(_, _)
                        | Error::AuthUnsupported { .. }
                        | Error::ScramClientError(_)
                );
                if auth {
                    error!("Authentication against server {} failed: {err}", server.name);
                } else {
                    warn!("Could not connect to server {}: {err}", server.name);
                }
                update_state(&server.name, |state| {
                    state.healthy = false;
                    state.auth_failed = auth;
                });
                return Err(err);
            }
            Err(_) => {
                warn!("Connecting to server {} timed out", server.name);
                update_state(&server.name, |state| state.healthy = false);
                return Err(Error::QueryTimeout);
            }
        };
        *slot = Some(conn);
    }

    let known = STATES
        .read()
        .get(&server.name)
        .filter(|s| s.version > 0 && s.role.is_some() && !fresh)
        .map(|s| (s.version, s.role.unwrap_or(ServerRole::Primary)));
    if let Some(state) = known {
        return Ok(state);
    }

    let conn = slot.as_mut().ok_or(Error::QueryTimeout)?;
    let probe = async {
        let version = conn.version_number().await?;
        let role = if conn.in_recovery().await? {
            ServerRole::Replica
        } else {
            ServerRole::Primary
        };
        Ok::<(u32, ServerRole), Error>((version, role))
    };

    match probe.await {
        Ok((version, role)) => {
            update_state(&server.name, |state| {
                state.version = version;
                state.role = Some(role);
            });
            Ok((version, role))
        }
        Err(err) => {
            warn!("Probing server {} failed: {err}", server.name);
            *slot = None;
            update_state(&server.name, |state| state.healthy = false);
            Err(err)
        }
    }
}

/// The exporter's own families: per-server state, version info, and the
/// logging counters. Rendered ahead of the collected metrics.
fn meta_families(config: &Config, results: &[Option<ServerScrape>]) -> Vec<Family> {
    let mut state = Family::new(
        "pgexporter_state",
        "Is the last probe of the server successful",
        FamilyKind::Gauge,
    );
    for (index, server) in config.servers.iter().enumerate() {
        let healthy = results
            .get(index)
            .and_then(|r| r.as_ref())
            .map(|r| r.healthy)
            .unwrap_or(false);
        state.samples.push(Sample {
            name: "pgexporter_state".into(),
            labels: vec![("server".into(), server.name.clone())],
            value: if healthy { 1.0 } else { 0.0 },
        });
    }

    let mut version = Family::new(
        "pgexporter_version",
        "The pgexporter version",
        FamilyKind::Gauge,
    );
    version.samples.push(Sample {
        name: "pgexporter_version".into(),
        labels: vec![("version".into(), VERSION.to_string())],
        value: 1.0,
    });

    let mut families = vec![state, version];

    for (level, count) in stats::log_counters() {
        let name = format!("pgexporter_logging_{level}");
        let mut family = Family::new(
            &name,
            &format!("Number of {level} log events"),
            FamilyKind::Counter,
        );
        family.samples.push(Sample {
            name: name.clone(),
            labels: Vec::new(),
            value: count as f64,
        });
        families.push(family);
    }

    families
}
