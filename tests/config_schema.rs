//! Config boundary tests: defaults, unknown-key tolerance, invalid input
//! rejection, and the first-run default-file write.

use wabridge::config::Config;

#[test]
fn config_unknown_keys_parse_without_error() {
    let toml_str = r#"
totally_unknown_key = "should be ignored"

[bridge]
poll_interval_secs = 7
another_fake = 42
"#;
    let parsed: Config = toml::from_str(toml_str).expect("unknown keys should be ignored");
    assert_eq!(parsed.bridge.poll_interval_secs, 7);
}

#[test]
fn config_wrong_type_for_port_fails() {
    let toml_str = r#"
[gateway]
port = "not_a_number"
"#;
    let result: Result<Config, _> = toml::from_str(toml_str);
    assert!(result.is_err(), "string for u16 port should fail to parse");
}

#[test]
fn config_overflow_port_fails() {
    let toml_str = r#"
[gateway]
port = 99999
"#;
    let result: Result<Config, _> = toml::from_str(toml_str);
    assert!(result.is_err(), "port > 65535 should fail for u16");
}

#[test]
fn config_wrong_type_for_poll_interval_fails() {
    let toml_str = r#"
[bridge]
poll_interval_secs = "often"
"#;
    let result: Result<Config, _> = toml::from_str(toml_str);
    assert!(result.is_err());
}

#[test]
fn empty_config_gets_full_defaults() {
    let parsed: Config = toml::from_str("").expect("empty config parses");
    assert_eq!(parsed.green_api.api_url, "https://api.green-api.com");
    assert_eq!(parsed.telegram.api_base, "https://api.telegram.org");
    assert_eq!(parsed.bridge.poll_interval_secs, 10);
    assert_eq!(parsed.bridge.history_depth, 30);
    assert_eq!(parsed.bridge.replay_limit, 10);
    assert_eq!(parsed.bridge.seen_cache_size, 4096);
    assert_eq!(parsed.bridge.media_max_bytes, 20 * 1024 * 1024);
    assert_eq!(parsed.gateway.host, "0.0.0.0");
    assert_eq!(parsed.gateway.port, 10_000);
    assert_eq!(parsed.reliability.initial_backoff_secs, 2);
    assert_eq!(parsed.reliability.max_backoff_secs, 60);
}

#[test]
fn partial_sections_keep_sibling_defaults() {
    let toml_str = r#"
[green_api]
id_instance = "7103000001"
api_token = "secret"
source_chat = "1203@g.us"
"#;
    let parsed: Config = toml::from_str(toml_str).expect("partial config parses");
    assert_eq!(parsed.green_api.id_instance, "7103000001");
    assert_eq!(
        parsed.green_api.api_url, "https://api.green-api.com",
        "untouched field keeps default"
    );
    assert_eq!(parsed.gateway.port, 10_000);
}

#[tokio::test]
async fn load_or_init_writes_default_config_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::env::set_var("WABRIDGE_CONFIG_DIR", dir.path());

    let config = Config::load_or_init().await.expect("load_or_init");
    let config_path = dir.path().join("config.toml");
    assert!(config_path.exists(), "default config.toml should be written");
    assert_eq!(config.config_path, config_path);

    let contents = std::fs::read_to_string(&config_path).expect("read back");
    let reparsed: Config = toml::from_str(&contents).expect("template parses");
    assert_eq!(reparsed.bridge.poll_interval_secs, 10);

    std::env::remove_var("WABRIDGE_CONFIG_DIR");
}
