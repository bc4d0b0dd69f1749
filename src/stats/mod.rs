//! Atomic counters re-exported as the exporter's own meta-metrics.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

/// Log events seen at each level since process start. `fatal` exists for
/// parity with the exposition; nothing below `error` terminates us.
pub static LOG_INFO: AtomicU64 = AtomicU64::new(0);
pub static LOG_WARN: AtomicU64 = AtomicU64::new(0);
pub static LOG_ERROR: AtomicU64 = AtomicU64::new(0);
pub static LOG_FATAL: AtomicU64 = AtomicU64::new(0);

/// Bridge endpoint fetches that failed.
pub static BRIDGE_FAILED: AtomicU64 = AtomicU64::new(0);

/// Layer counting every log event by level, installed next to the fmt
/// subscriber so call sites stay plain `log`/`tracing` macros.
pub struct LogCounterLayer;

impl<S: Subscriber> Layer<S> for LogCounterLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        match *event.metadata().level() {
            Level::INFO => LOG_INFO.fetch_add(1, Ordering::Relaxed),
            Level::WARN => LOG_WARN.fetch_add(1, Ordering::Relaxed),
            Level::ERROR => LOG_ERROR.fetch_add(1, Ordering::Relaxed),
            _ => 0,
        };
    }
}

/// Snapshot of the per-level counters, in exposition order.
pub fn log_counters() -> [(&'static str, u64); 4] {
    [
        ("info", LOG_INFO.load(Ordering::Relaxed)),
        ("warn", LOG_WARN.load(Ordering::Relaxed)),
        ("error", LOG_ERROR.load(Ordering::Relaxed)),
        ("fatal", LOG_FATAL.load(Ordering::Relaxed)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let before = LOG_WARN.load(Ordering::Relaxed);
        LOG_WARN.fetch_add(2, Ordering::Relaxed);
        assert_eq!(LOG_WARN.load(Ordering::Relaxed), before + 2);
    }

    #[test]
    fn test_snapshot_order() {
        let counters = log_counters();
        assert_eq!(counters[0].0, "info");
        assert_eq!(counters[3].0, "fatal");
    }
}
