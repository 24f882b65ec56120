//! Load client configuration from file and environment.

use serde::Deserialize;
use std::path::PathBuf;

/// Client configuration. File: ~/.config/fcp/config.toml or
/// /etc/fcp/config.toml. Env overrides: FCP_CLIENT_NAME, FCP_HOST, FCP_PORT.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    /// Client name, unique per application instance; the node drops the
    /// older connection on a collision. Generated when absent.
    #[serde(default)]
    pub name: Option<String>,
    /// Node FCP host (default 127.0.0.1).
    #[serde(default = "default_host")]
    pub host: String,
    /// Node FCP port (default 9481).
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    9481
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            name: None,
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Load config: merge default, then config file (if present), then env vars.
pub fn load() -> ClientConfig {
    let mut c = load_file().unwrap_or_default();
    if let Ok(s) = std::env::var("FCP_CLIENT_NAME") {
        if !s.is_empty() {
            c.name = Some(s);
        }
    }
    if let Ok(s) = std::env::var("FCP_HOST") {
        if !s.is_empty() {
            c.host = s;
        }
    }
    if let Ok(s) = std::env::var("FCP_PORT") {
        if let Ok(p) = s.parse::<u16>() {
            c.port = p;
        }
    }
    c
}

fn config_paths() -> Vec<PathBuf> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let mut out = Vec::new();
    if let Some(h) = home {
        out.push(h.join(".config/fcp/config.toml"));
    }
    out.push(PathBuf::from("/etc/fcp/config.toml"));
    out
}

fn load_file() -> Option<ClientConfig> {
    for p in config_paths() {
        if p.exists() {
            if let Ok(s) = std::fs::read_to_string(&p) {
                if let Ok(c) = toml::from_str::<ClientConfig>(&s) {
                    return Some(c);
                }
            }
            break;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_local_node() {
        let config = ClientConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9481);
        assert!(config.name.is_none());
    }

    #[test]
    fn parses_partial_toml() {
        let config: ClientConfig = toml::from_str("port = 19481\n").unwrap();
        assert_eq!(config.port, 19481);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(toml::from_str::<ClientConfig>("nodehost = \"x\"\n").is_err());
    }
}
