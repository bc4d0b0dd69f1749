use super::*;
use crate::collector::FamilyKind;

fn test_config(servers: &[&str]) -> Config {
    let mut config = Config::default();
    for name in servers {
        config.servers.push(ServerConfig {
            name: name.to_string(),
            host: "localhost".into(),
            port: 5432,
            user: "exporter".into(),
            database: "postgres".into(),
            data_dir: None,
            wal_dir: None,
            tls: false,
            tls_cert_file: None,
            tls_key_file: None,
            tls_ca_file: None,
        });
    }
    config.users.push(User::new("exporter", "secret"));
    config
}

#[test]
fn test_meta_families_state_per_server() {
    let config = test_config(&["a", "b"]);
    let results = vec![
        Some(ServerScrape {
            families: Vec::new(),
            healthy: true,
        }),
        None, // server b never finished
    ];

    let families = meta_families(&config, &results);

    let state = families.iter().find(|f| f.name == "pgexporter_state").unwrap();
    assert_eq!(state.kind, FamilyKind::Gauge);
    assert_eq!(state.samples.len(), 2);
    assert_eq!(state.samples[0].labels[0], ("server".into(), "a".into()));
    assert_eq!(state.samples[0].value, 1.0);
    assert_eq!(state.samples[1].value, 0.0);
}

#[test]
fn test_meta_families_contain_version_and_log_counters() {
    let config = test_config(&[]);
    let families = meta_families(&config, &[]);

    let version = families
        .iter()
        .find(|f| f.name == "pgexporter_version")
        .unwrap();
    assert_eq!(version.samples[0].labels[0].0, "version");

    for level in ["info", "warn", "error", "fatal"] {
        assert!(families
            .iter()
            .any(|f| f.name == format!("pgexporter_logging_{level}")));
    }
}

#[test]
fn test_state_updates() {
    reset_states();
    update_state("a", |state| {
        state.version = 16;
        state.role = Some(ServerRole::Primary);
        state.healthy = true;
    });

    let states = server_states();
    let state = states.get("a").unwrap();
    assert_eq!(state.version, 16);
    assert_eq!(state.role, Some(ServerRole::Primary));
    assert!(state.healthy);

    reset_states();
    assert!(server_states().is_empty());
}
