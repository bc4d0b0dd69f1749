//! Management verb implementations.

use log::{error, info};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde_json::{json, Value};

use crate::cache::{self, METRICS_CACHE};
use crate::config::{self, get_config, Config};
use crate::errors::Error;
use crate::scrape;

use super::{
    ERROR_BAD_REQUEST, ERROR_CONF_GET_UNKNOWN_KEY, ERROR_CONF_SET_RESTART_REQUIRED,
    ERROR_CONF_SET_UNKNOWN_KEY, ERROR_RELOAD_INVALID, ERROR_RELOAD_RESTART_REQUIRED,
};

type VerbResult = Result<Value, (i32, String)>;

/// Ask the process to shut down, the same way a signal would.
pub fn shutdown() -> VerbResult {
    info!("Shutdown requested over the management interface");

    let pid = std::process::id();
    if signal::kill(Pid::from_raw(pid as i32), Signal::SIGINT).is_err() {
        error!("Unable to send SIGINT to PID: {pid}");
        return Err((ERROR_BAD_REQUEST, "could not signal the process".into()));
    }

    Ok(json!({}))
}

pub fn status() -> Value {
    let config = get_config();
    let states = scrape::server_states();
    let healthy = states.values().filter(|s| s.healthy).count();

    json!({
        "version": config::VERSION,
        "servers": config.servers.len(),
        "healthy_servers": healthy,
        "metrics": config.catalog.metrics.len(),
        "cache_entries": METRICS_CACHE.entry_count(),
        "cache_bytes": METRICS_CACHE.total_bytes(),
        "bridge_failed_fetches": crate::stats::BRIDGE_FAILED.load(std::sync::atomic::Ordering::Relaxed),
    })
}

pub fn status_details() -> Value {
    let config = get_config();
    let states = scrape::server_states();

    let servers: Vec<Value> = config
        .servers
        .iter()
        .map(|server| {
            let state = states.get(&server.name).copied().unwrap_or_default();
            json!({
                "name": server.name,
                "host": server.host,
                "port": server.port,
                "version": state.version,
                "role": state.role.map(|r| r.to_string()),
                "healthy": state.healthy,
            })
        })
        .collect();

    let mut details = status();
    details["servers_detail"] = json!(servers);
    details
}

pub fn conf_reload() -> VerbResult {
    match config::reload_config() {
        Ok(reloaded) => {
            // Probe state is dropped even for a no-op reload so servers
            // marked unhealthy by an auth failure are retried.
            scrape::reset_states();
            Ok(json!({ "reloaded": reloaded }))
        }
        Err(Error::RestartRequired(fields)) => Err((
            ERROR_RELOAD_RESTART_REQUIRED,
            format!("restart required: {fields}"),
        )),
        Err(err) => Err((ERROR_RELOAD_INVALID, err.to_string())),
    }
}

pub fn conf_ls() -> Value {
    let config = get_config();
    let value = serde_json::to_value(&*config).unwrap_or_default();

    let mut keys = Vec::new();
    if let Value::Object(sections) = &value {
        for (section, content) in sections {
            match content {
                Value::Object(fields) => {
                    for field in fields.keys() {
                        keys.push(format!("{section}.{field}"));
                    }
                }
                _ => keys.push(section.clone()),
            }
        }
    }

    json!({ "keys": keys })
}

/// `conf get key` returns one value; without a key the whole configuration
/// is returned.
pub fn conf_get(args: Option<&Value>) -> VerbResult {
    let config = get_config();
    let value = serde_json::to_value(&*config).unwrap_or_default();

    let key = args
        .and_then(|args| args.get("key"))
        .and_then(|key| key.as_str())
        .unwrap_or("");

    if key.is_empty() {
        return Ok(value);
    }

    match lookup(&value, key) {
        Some(found) => Ok(json!({ key: found })),
        None => Err((
            ERROR_CONF_GET_UNKNOWN_KEY,
            format!("unknown configuration key: {key}"),
        )),
    }
}

/// `conf set key value` builds a candidate configuration, validates it,
/// and swaps it in unless the key is restart-required.
pub fn conf_set(args: Option<&Value>) -> VerbResult {
    let args = args.ok_or((ERROR_CONF_SET_UNKNOWN_KEY, "missing arguments".to_string()))?;
    let key = args
        .get("key")
        .and_then(|v| v.as_str())
        .ok_or((ERROR_CONF_SET_UNKNOWN_KEY, "missing key".to_string()))?;
    let new_value = args
        .get("value")
        .cloned()
        .ok_or((ERROR_CONF_SET_UNKNOWN_KEY, "missing value".to_string()))?;

    // Only general settings are settable at runtime; servers and
    // credentials change through a reload.
    if !key.starts_with("general.") {
        return Err((
            ERROR_CONF_SET_UNKNOWN_KEY,
            format!("key {key} cannot be set at runtime"),
        ));
    }

    let old_config = get_config();
    let mut value = serde_json::to_value(&*old_config).unwrap_or_default();

    if !set_value(&mut value, key, new_value) {
        return Err((
            ERROR_CONF_SET_UNKNOWN_KEY,
            format!("unknown configuration key: {key}"),
        ));
    }

    let mut candidate: Config = serde_json::from_value(value).map_err(|err| {
        (
            ERROR_CONF_SET_UNKNOWN_KEY,
            format!("invalid value for {key}: {err}"),
        )
    })?;

    // Serialization drops the runtime-only fields and the credential
    // secrets; carry them over before validating.
    candidate.path = old_config.path.clone();
    candidate.catalog = old_config.catalog.clone();
    candidate.users = old_config.users.clone();
    candidate.admins = old_config.admins.clone();

    candidate.validate().map_err(|err| {
        (
            ERROR_CONF_SET_UNKNOWN_KEY,
            format!("invalid configuration: {err}"),
        )
    })?;

    let restart = old_config.restart_required_changes(&candidate);
    if !restart.is_empty() {
        return Err((
            ERROR_CONF_SET_RESTART_REQUIRED,
            format!("restart required: {}", restart.join(", ")),
        ));
    }

    config::store(candidate);
    cache::bump_epoch();
    info!("Configuration key {key} updated over the management interface");

    Ok(json!({ "key": key }))
}

pub fn clear_prometheus() -> Value {
    METRICS_CACHE.clear();
    cache::bump_epoch();
    info!("Prometheus cache cleared over the management interface");
    json!({})
}

fn lookup<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    let mut current = value;
    for part in key.split('.') {
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn set_value(value: &mut Value, key: &str, new_value: Value) -> bool {
    let mut current = value;
    let parts: Vec<&str> = key.split('.').collect();
    let mut new_value = Some(new_value);

    for (pos, part) in parts.iter().enumerate() {
        let last = pos == parts.len() - 1;
        match current {
            Value::Object(map) => {
                if !map.contains_key(*part) {
                    return false;
                }
                if last {
                    map.insert(part.to_string(), new_value.take().unwrap_or_default());
                    return true;
                }
                current = map.get_mut(*part).unwrap();
            }
            Value::Array(items) => {
                let index = match part.parse::<usize>() {
                    Ok(index) if index < items.len() => index,
                    _ => return false,
                };
                if last {
                    items[index] = new_value.take().unwrap_or_default();
                    return true;
                }
                current = &mut items[index];
            }
            _ => return false,
        }
    }

    false
}
