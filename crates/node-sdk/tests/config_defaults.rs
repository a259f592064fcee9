use std::time::Duration;

use cl_node_sdk::config::{ConfigSeverity, NodeConfig};
use cl_node_sdk::{EndpointStore, LocationMode, PermissionKind, PermissionProvider};

#[test]
fn empty_config_uses_defaults() {
    let config = NodeConfig::from_toml("").unwrap();

    assert!(config.gateways.is_empty());
    assert_eq!(config.preferred_gateway, None);
    assert_eq!(config.node.client_id, "clawlink-node");
    assert_eq!(config.node.client_mode, "node");
    assert!(!config.settings.paused);
    assert!(!config.settings.camera_enabled);
    assert_eq!(config.settings.location_mode, LocationMode::Off);

    let session = config.session.to_settings();
    assert_eq!(session.heartbeat_interval, Duration::from_secs(30));
    assert_eq!(session.connect_timeout, Duration::from_secs(10));
    assert_eq!(session.max_concurrent_invokes, 16);
    assert_eq!(session.invoke_timeout, Some(Duration::from_secs(120)));

    let backoff = config.reconnect.to_backoff();
    assert_eq!(backoff.initial_delay, Duration::from_secs(1));
    assert_eq!(backoff.max_delay, Duration::from_secs(10));
    assert_eq!(backoff.backoff_factor, 2);
}

#[test]
fn full_config_parses() {
    let raw = r#"
preferred_gateway = "studio"

[node]
client_id = "clawlink-linux"
display_name = "Workshop PC"
scopes = ["operator.read"]

[[gateways]]
stable_id = "studio"
url = "wss://studio.local:18789"
token = "inline-secret"

[[gateways]]
url = "ws://10.0.0.5:18789"
password = "hunter2"

[settings]
camera_enabled = true
location_mode = "whileUsing"

[permissions]
camera = true
notifications = false

[session]
heartbeat_interval_ms = 5000
invoke_timeout_ms = 0

[reconnect]
initial_delay_ms = 500
max_delay_ms = 4000

[tls]
trust_store_path = "/tmp/clawlink-pins.json"
"#;
    let config = NodeConfig::from_toml(raw).unwrap();

    let identity = config.identity();
    assert_eq!(identity.client_id, "clawlink-linux");
    assert_eq!(identity.display_name, "Workshop PC");
    assert_eq!(identity.scopes, vec!["operator.read"]);

    assert_eq!(config.gateways.len(), 2);
    assert_eq!(config.gateways[0].resolved_stable_id(), "studio");
    assert_eq!(config.gateways[1].resolved_stable_id(), "10.0.0.5:18789");
    assert_eq!(
        config.gateways[0].endpoint().token.as_deref(),
        Some("inline-secret")
    );
    assert_eq!(
        config.gateways[1].endpoint().password.as_deref(),
        Some("hunter2")
    );

    assert!(config.settings.camera_enabled);
    assert_eq!(config.settings.location_mode, LocationMode::WhileUsing);

    let session = config.session.to_settings();
    assert_eq!(session.heartbeat_interval, Duration::from_secs(5));
    assert_eq!(session.invoke_timeout, None);
    assert_eq!(
        config.reconnect.to_backoff().initial_delay,
        Duration::from_millis(500)
    );
    assert_eq!(
        config.trust_store_path(),
        std::path::PathBuf::from("/tmp/clawlink-pins.json")
    );

    // Only warning: the plaintext gateway.
    let issues = config.validate();
    assert!(issues
        .iter()
        .all(|i| i.severity == ConfigSeverity::Warning));
    assert_eq!(issues.len(), 1, "{issues:?}");
    assert_eq!(issues[0].field, "gateways[1].url");
}

#[tokio::test]
async fn known_gateways_follow_preference() {
    let raw = r#"
preferred_gateway = "b"

[[gateways]]
stable_id = "a"
url = "wss://a.local"

[[gateways]]
stable_id = "b"
url = "wss://b.local:9443"
"#;
    let config = NodeConfig::from_toml(raw).unwrap();
    let (store, prefs) = config.known_gateways();

    assert_eq!(store.require_config().await.unwrap().url, "wss://b.local:9443");

    prefs.set_preferred_stable_id(Some("a".into()));
    assert_eq!(store.require_config().await.unwrap().url, "wss://a.local");

    prefs.set_preferred_stable_id(Some("gone".into()));
    assert_eq!(store.require_config().await.unwrap().url, "wss://a.local");
}

#[tokio::test]
async fn bonjour_gateway_is_keyed_by_service_identity() {
    let raw = r#"
preferred_gateway = "_clawlink-gw._tcp|local.|Studio Gateway"

[[gateways]]
url = "wss://10.0.0.9:18789"

[[gateways]]
url = "wss://studio.local:18789"
service = { name = "Studio\\032Gateway" }

[settings]
location_mode = "sometimes"
"#;
    let config = NodeConfig::from_toml(raw).unwrap();
    assert_eq!(
        config.gateways[1].resolved_stable_id(),
        "_clawlink-gw._tcp|local.|Studio Gateway"
    );
    assert_eq!(config.settings.location_mode, LocationMode::Off);
    assert!(config
        .validate()
        .iter()
        .all(|i| i.field != "preferred_gateway"));

    let (store, _) = config.known_gateways();
    assert_eq!(
        store.require_config().await.unwrap().url,
        "wss://studio.local:18789"
    );
}

#[tokio::test]
async fn static_permissions_skip_unknown_names() {
    let raw = r#"
[permissions]
camera = true
screenRecording = false
teleportation = true
"#;
    let config = NodeConfig::from_toml(raw).unwrap();
    let grants = config.static_permissions().status().await;

    assert_eq!(grants.get(&PermissionKind::Camera), Some(&true));
    assert_eq!(grants.get(&PermissionKind::ScreenRecording), Some(&false));
    assert_eq!(grants.len(), 2);

    let issues = config.validate();
    assert!(issues
        .iter()
        .any(|i| i.field == "permissions.teleportation" && i.severity == ConfigSeverity::Warning));
}

#[test]
fn token_falls_back_to_env_var() {
    let raw = r#"
[[gateways]]
url = "wss://gw.local"
token_env = "CL_TEST_CONFIG_TOKEN_7f3a"
"#;
    let config = NodeConfig::from_toml(raw).unwrap();
    assert_eq!(config.gateways[0].resolved_token(), None);

    std::env::set_var("CL_TEST_CONFIG_TOKEN_7f3a", "from-env");
    assert_eq!(
        config.gateways[0].endpoint().token.as_deref(),
        Some("from-env")
    );
    std::env::remove_var("CL_TEST_CONFIG_TOKEN_7f3a");
}

#[test]
fn validate_reports_errors() {
    let raw = r#"
preferred_gateway = "nowhere"

[node]
client_id = ""

[[gateways]]
url = "http://gw.local"

[[gateways]]
stable_id = "dup"
url = "wss://one.local"

[[gateways]]
stable_id = "dup"
url = "wss://two.local"

[session]
heartbeat_interval_ms = 0
max_concurrent_invokes = 0

[reconnect]
initial_delay_ms = 5000
max_delay_ms = 1000
"#;
    let config = NodeConfig::from_toml(raw).unwrap();
    let issues = config.validate();
    let errors: Vec<&str> = issues
        .iter()
        .filter(|i| i.severity == ConfigSeverity::Error)
        .map(|i| i.field.as_str())
        .collect();

    assert!(errors.contains(&"gateways[0].url"), "{errors:?}");
    assert!(errors.contains(&"gateways[2].stable_id"), "{errors:?}");
    assert!(errors.contains(&"node.client_id"), "{errors:?}");
    assert!(errors.contains(&"session.heartbeat_interval_ms"), "{errors:?}");
    assert!(errors.contains(&"session.max_concurrent_invokes"), "{errors:?}");
    assert!(errors.contains(&"reconnect"), "{errors:?}");

    assert!(issues
        .iter()
        .any(|i| i.field == "preferred_gateway" && i.severity == ConfigSeverity::Warning));
    assert!(issues
        .iter()
        .any(|i| i.to_string().starts_with("[ERROR] node.client_id:")));
}

#[test]
fn oversized_heartbeat_is_an_error() {
    let config = NodeConfig::from_toml(
        r#"
[session]
heartbeat_interval_ms = 86400001
"#,
    )
    .unwrap();
    assert!(config.validate().iter().any(|i| {
        i.field == "session.heartbeat_interval_ms" && i.severity == ConfigSeverity::Error
    }));
    assert!(config.session.to_settings().validate().is_err());
}

#[test]
fn missing_file_loads_defaults_and_bad_toml_errors() {
    let dir = tempfile::tempdir().unwrap();

    let missing = NodeConfig::load(&dir.path().join("absent.toml")).unwrap();
    assert!(missing.gateways.is_empty());

    let bad = dir.path().join("bad.toml");
    std::fs::write(&bad, "gateways = 12").unwrap();
    let err = NodeConfig::load(&bad).unwrap_err();
    assert!(err.to_string().contains("bad.toml"));
}
