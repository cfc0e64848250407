use std::time::Duration;

use tick_digits::config::{symbol_label, Config, DerivConfig, DEFAULT_SYMBOL, KNOWN_SYMBOLS};

fn deriv_config(symbol: &str, symbols: &[&str]) -> DerivConfig {
    DerivConfig {
        ws_base_url: "wss://ws.derivws.com/websockets/v3".to_string(),
        app_id: "1089".to_string(),
        symbol: symbol.to_string(),
        symbols: symbols.iter().map(|s| s.to_string()).collect(),
        tick_count: 1000,
        reconnect_delay_ms: 2000,
        ping_interval_secs: 30,
        request_timeout_ms: 30_000,
        api_token: None,
    }
}

#[test]
fn parse_default_toml() {
    let toml_str = r#"
[deriv]
ws_base_url = "wss://ws.derivws.com/websockets/v3"
app_id = "1089"
symbol = "R_50"
symbols = ["R_10", "1HZ100V"]
tick_count = 500
reconnect_delay_ms = 1500
ping_interval_secs = 20
request_timeout_ms = 10000

[analysis]
reference_digit = 5
recent_digits = 30
report_interval_ms = 250

[logging]
level = "debug"
json = true
"#;
    let config = Config::from_toml_str(toml_str).unwrap();
    assert_eq!(config.deriv.symbol, "R_50");
    assert_eq!(config.deriv.symbols.len(), 2);
    assert_eq!(config.deriv.tick_count, 500);
    assert_eq!(config.deriv.reconnect_delay(), Duration::from_millis(1500));
    assert_eq!(config.deriv.ping_interval(), Duration::from_secs(20));
    assert_eq!(config.deriv.request_timeout(), Some(Duration::from_secs(10)));
    assert_eq!(config.deriv.api_token, None);
    assert_eq!(config.analysis.reference_digit, Some(5));
    assert_eq!(config.analysis.recent_digits, 30);
    assert_eq!(config.analysis.report_interval_ms, 250);
    assert_eq!(config.logging.level, "debug");
    assert!(config.logging.json);
}

#[test]
/// Verifies defaults: only the endpoint and app id are required.
fn minimal_toml_uses_defaults() {
    let toml_str = r#"
[deriv]
ws_base_url = "wss://ws.derivws.com/websockets/v3"
app_id = "1089"
"#;
    let config = Config::from_toml_str(toml_str).unwrap();
    assert_eq!(config.deriv.symbol, DEFAULT_SYMBOL);
    assert_eq!(config.deriv.symbols.len(), KNOWN_SYMBOLS.len());
    assert_eq!(config.deriv.tick_count, 1000);
    assert_eq!(config.deriv.reconnect_delay(), Duration::from_secs(2));
    assert_eq!(config.deriv.request_timeout(), Some(Duration::from_secs(30)));
    assert_eq!(config.analysis.reference_digit, None);
    assert_eq!(config.analysis.recent_digits, 50);
    assert_eq!(config.logging.level, "info");
    assert!(!config.logging.json);
}

#[test]
/// Verifies the application id is attached to the websocket endpoint.
fn ws_url_appends_app_id() {
    let cfg = deriv_config("R_100", &[]);
    assert_eq!(
        cfg.ws_url().unwrap(),
        "wss://ws.derivws.com/websockets/v3?app_id=1089"
    );
    let session = cfg.session_config().unwrap();
    assert_eq!(session.url, "wss://ws.derivws.com/websockets/v3?app_id=1089");
    assert_eq!(session.ping_interval, Duration::from_secs(30));
}

#[test]
/// Verifies validation rejects values the feed cannot run with.
fn invalid_values_are_rejected() {
    let cases = [
        r#"
[deriv]
ws_base_url = "https://ws.derivws.com/websockets/v3"
app_id = "1089"
"#,
        r#"
[deriv]
ws_base_url = "wss://ws.derivws.com/websockets/v3"
app_id = "1089"
tick_count = 0
"#,
        r#"
[deriv]
ws_base_url = "wss://ws.derivws.com/websockets/v3"
app_id = "  "
"#,
        r#"
[deriv]
ws_base_url = "wss://ws.derivws.com/websockets/v3"
app_id = "1089"
symbol = ""
"#,
        r#"
[deriv]
ws_base_url = "wss://ws.derivws.com/websockets/v3"
app_id = "1089"

[analysis]
reference_digit = 12
"#,
    ];
    for case in cases {
        assert!(Config::from_toml_str(case).is_err(), "accepted: {}", case);
    }
}

#[test]
fn tradable_symbols_dedup_and_include_primary() {
    let cfg = deriv_config(" R_100 ", &["R_50", "R_100", "  ", "1HZ10V", "R_50"]);
    assert_eq!(
        cfg.tradable_symbols(),
        vec!["R_100".to_string(), "R_50".to_string(), "1HZ10V".to_string()]
    );
}

#[test]
fn known_symbols_have_labels() {
    assert_eq!(symbol_label("1HZ10V"), Some("Volatility 10 (1s) Index"));
    assert_eq!(symbol_label("RDBULL"), Some("Bull Market Index"));
    assert_eq!(symbol_label("frxEURUSD"), None);
}
