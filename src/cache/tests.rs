use super::*;

const KB: u64 = 1024;

fn publish(cache: &MetricsCache, fp: &str, bytes: &[u8], max_size: u64, ttl: Duration) {
    match cache.begin(fp, max_size, ttl) {
        Flight::Leader(guard) => {
            guard.publish(bytes.to_vec());
        }
        _ => panic!("expected to lead"),
    }
}

#[test]
fn test_hit_within_ttl() {
    let cache = MetricsCache::new();
    publish(&cache, "fp", b"payload", KB, Duration::from_secs(60));

    match cache.begin("fp", KB, Duration::from_secs(60)) {
        Flight::Cached(bytes) => assert_eq!(&bytes[..], b"payload"),
        _ => panic!("expected a cache hit"),
    };
}

#[test]
fn test_expired_entry_is_removed_on_touch() {
    let cache = MetricsCache::new();
    publish(&cache, "fp", b"payload", KB, Duration::from_millis(1));
    std::thread::sleep(Duration::from_millis(5));

    match cache.begin("fp", KB, Duration::from_millis(1)) {
        Flight::Leader(guard) => guard.fail("test"),
        _ => panic!("expected to lead after expiry"),
    }
    assert_eq!(cache.entry_count(), 0);
}

#[test]
fn test_disabled_cache_bypasses() {
    let cache = MetricsCache::new();
    publish(&cache, "fp", b"payload", 0, Duration::from_secs(60));
    assert_eq!(cache.entry_count(), 0);

    // Every caller leads; nothing waits, nothing is stored.
    match cache.begin("fp", 0, Duration::from_secs(60)) {
        Flight::Leader(_) => (),
        _ => panic!("disabled cache must always lead"),
    };
}

#[test]
fn test_eviction_in_insertion_order() {
    let cache = MetricsCache::new();
    let ttl = Duration::from_secs(60);
    publish(&cache, "a", &[0u8; 400], KB, ttl);
    publish(&cache, "b", &[0u8; 400], KB, ttl);
    // 400 + 400 + 400 > 1024: "a" (oldest) must go.
    publish(&cache, "c", &[0u8; 400], KB, ttl);

    assert_eq!(cache.entry_count(), 2);
    assert!(matches!(cache.begin("a", KB, ttl), Flight::Leader(_)));
    match cache.begin("b", KB, ttl) {
        Flight::Cached(_) => (),
        _ => panic!("b should have survived"),
    };
}

#[test]
fn test_oversize_entry_is_served_uncached() {
    let cache = MetricsCache::new();
    let ttl = Duration::from_secs(60);
    publish(&cache, "big", &[0u8; 2048], KB, ttl);
    assert_eq!(cache.entry_count(), 0);
}

#[tokio::test]
async fn test_single_flight_coalesces() {
    use std::sync::Arc as StdArc;

    let cache = StdArc::new(MetricsCache::new());
    let ttl = Duration::from_secs(60);

    let guard = match cache.begin("fp", KB, ttl) {
        Flight::Leader(guard) => guard,
        _ => panic!("first caller must lead"),
    };

    // Second caller with the same fingerprint becomes a follower.
    let rx = match cache.begin("fp", KB, ttl) {
        Flight::Follower(rx) => rx,
        _ => panic!("second caller must follow"),
    };

    let waiter = tokio::spawn(async move { wait(rx).await });

    guard.publish(b"payload".to_vec());

    let bytes = waiter.await.unwrap().unwrap();
    assert_eq!(&bytes[..], b"payload");
    // Exactly one backend scrape ran; exactly one entry exists.
    assert_eq!(cache.entry_count(), 1);
}

#[tokio::test]
async fn test_single_flight_failure_wakes_waiters() {
    let cache = MetricsCache::new();
    let ttl = Duration::from_secs(60);

    let guard = match cache.begin("fp", KB, ttl) {
        Flight::Leader(guard) => guard,
        _ => panic!(),
    };
    let rx = match cache.begin("fp", KB, ttl) {
        Flight::Follower(rx) => rx,
        _ => panic!(),
    };

    let waiter = tokio::spawn(async move { wait(rx).await });
    guard.fail("upstream unavailable");

    let err = waiter.await.unwrap().unwrap_err();
    assert_eq!(err, "upstream unavailable");
    assert_eq!(cache.entry_count(), 0);
}

#[tokio::test]
async fn test_dropped_leader_releases_waiters() {
    let cache = MetricsCache::new();
    let ttl = Duration::from_secs(60);

    let guard = match cache.begin("fp", KB, ttl) {
        Flight::Leader(guard) => guard,
        _ => panic!(),
    };
    let rx = match cache.begin("fp", KB, ttl) {
        Flight::Follower(rx) => rx,
        _ => panic!(),
    };

    drop(guard);
    assert!(wait(rx).await.is_err());
}

#[test]
fn test_clear_empties_cache() {
    let cache = MetricsCache::new();
    publish(&cache, "fp", b"payload", KB, Duration::from_secs(60));
    cache.clear();
    assert_eq!(cache.entry_count(), 0);
    assert_eq!(cache.total_bytes(), 0);
}

#[test]
fn test_epoch_bumps() {
    let before = epoch();
    bump_epoch();
    assert_eq!(epoch(), before + 1);
}
