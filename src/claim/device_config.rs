//! Fix-ups applied to the server-issued device configuration.
//!
//! Development servers answer with placeholder `0.0.0.0` hosts (they bind to
//! every interface and do not know their public name). Builds without TLS
//! cannot speak `wss`/`https`, so those schemes are downgraded.

use serde_json::Value;

const PLACEHOLDER_HOST: &str = "0.0.0.0";

/// Rewrite every string in `config` in place. Returns the number of strings
/// changed.
pub fn rewrite_device_config(config: &mut Value, api_host: &str, tls_enabled: bool) -> usize {
    match config {
        Value::String(s) => match rewrite_str(s, api_host, tls_enabled) {
            Some(new) => {
                *s = new;
                1
            }
            None => 0,
        },
        Value::Array(items) => items
            .iter_mut()
            .map(|v| rewrite_device_config(v, api_host, tls_enabled))
            .sum(),
        Value::Object(map) => map
            .values_mut()
            .map(|v| rewrite_device_config(v, api_host, tls_enabled))
            .sum(),
        _ => 0,
    }
}

fn rewrite_str(s: &str, api_host: &str, tls_enabled: bool) -> Option<String> {
    let mut out = s.to_string();

    if !api_host.is_empty() {
        if let Some(replaced) = replace_placeholder_host(&out, api_host) {
            out = replaced;
        }
    }
    if !tls_enabled {
        if let Some(rest) = out.strip_prefix("wss://") {
            out = format!("ws://{}", rest);
        } else if let Some(rest) = out.strip_prefix("https://") {
            out = format!("http://{}", rest);
        }
    }

    (out != s).then_some(out)
}

/// Replace `0.0.0.0` when it is the whole host: the entire string, a
/// `host:port` pair, or the authority of a URL.
fn replace_placeholder_host(s: &str, api_host: &str) -> Option<String> {
    let start = s.find("://").map_or(0, |i| i + 3);
    let rest = s[start..].strip_prefix(PLACEHOLDER_HOST)?;
    if !(rest.is_empty() || rest.starts_with([':', '/', '?', '#'])) {
        return None;
    }
    if start == 0 && rest.starts_with(['/', '?', '#']) {
        // "0.0.0.0/8" is a subnet, not a host
        return None;
    }
    Some(format!("{}{}{}", &s[..start], api_host, rest))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_placeholder_host_replaced() {
        let mut config = json!({
            "ws_url": "wss://0.0.0.0:8443/ws",
            "host": "0.0.0.0",
            "port": 8443
        });
        let changed = rewrite_device_config(&mut config, "api.teddy.example", true);
        assert_eq!(changed, 2);
        assert_eq!(config["ws_url"], "wss://api.teddy.example:8443/ws");
        assert_eq!(config["host"], "api.teddy.example");
        assert_eq!(config["port"], 8443);
    }

    #[test]
    fn test_schemes_downgraded_without_tls() {
        let mut config = json!({
            "ws_url": "wss://api.teddy.example/ws",
            "audio": {"upload_url": "https://0.0.0.0/upload"},
            "mirrors": ["https://a.example", "ws://b.example"]
        });
        rewrite_device_config(&mut config, "10.0.0.5", false);
        assert_eq!(config["ws_url"], "ws://api.teddy.example/ws");
        assert_eq!(config["audio"]["upload_url"], "http://10.0.0.5/upload");
        assert_eq!(config["mirrors"][0], "http://a.example");
        assert_eq!(config["mirrors"][1], "ws://b.example");
    }

    #[test]
    fn test_only_whole_host_replaced() {
        let original = json!({
            "allowed_subnet": "10.0.0.0/8",
            "ntp": "100.0.0.0",
            "default_route": "0.0.0.0/0",
            "mirror": "https://10.0.0.0:8443/ws",
            "note": "bind 0.0.0.0 locally"
        });
        let mut config = original.clone();
        assert_eq!(rewrite_device_config(&mut config, "api.teddy.example", true), 0);
        assert_eq!(config, original);

        let mut config = json!({"listen": "0.0.0.0:8080", "api": "http://0.0.0.0?x=1"});
        assert_eq!(rewrite_device_config(&mut config, "api.teddy.example", true), 2);
        assert_eq!(config["listen"], "api.teddy.example:8080");
        assert_eq!(config["api"], "http://api.teddy.example?x=1");
    }

    #[test]
    fn test_untouched_with_tls() {
        let original = json!({"ws_url": "wss://api.teddy.example/ws", "retries": 3});
        let mut config = original.clone();
        assert_eq!(rewrite_device_config(&mut config, "api.teddy.example", true), 0);
        assert_eq!(config, original);
    }
}
