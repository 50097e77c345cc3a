use std::path::Path;

use serde::Deserialize;

use crate::error::{HopgateError, Result};

#[derive(Debug, Clone, Deserialize)]
pub struct LatencyConfig {
    pub url: String,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub global: String,
    pub latency: LatencyConfig,
    pub proxies: Vec<ProxyConfig>,
    /// Path to the MaxMind GeoLite2-Country .mmdb used by `geoip:XX` rules.
    /// Not part of the wire format in upstream configs; defaults to a file
    /// alongside the rules file so deployments without GeoIP simply omit it.
    #[serde(default)]
    pub geoip_path: Option<String>,
}

impl Config {
    /// Load a `Config` from a JSON file on disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| HopgateError::Config(format!("reading {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| HopgateError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RouteConfig {
    pub rule: String,
    #[serde(default)]
    pub forward: String,
    pub selector: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    pub name: String,
    pub hostnames: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RulesConfig {
    pub routes: Vec<RouteConfig>,
    #[serde(default)]
    pub groups: Vec<GroupConfig>,
}

impl RulesConfig {
    /// Load a `RulesConfig` from a JSON file on disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| HopgateError::Config(format!("reading {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| HopgateError::Config(format!("parsing {}: {e}", path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_tmp(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parses_full_config() {
        let f = write_tmp(
            r#"{
                "global": "fast",
                "latency": {"url": "http://example.com/", "timeout_ms": 2000},
                "proxies": [
                    {"name": "a", "type": "direct", "url": "", "labels": ["fast"]},
                    {"name": "b", "type": "ss", "url": "ss://...", "labels": []}
                ]
            }"#,
        );
        let cfg = Config::load(f.path()).unwrap();
        assert_eq!(cfg.global, "fast");
        assert_eq!(cfg.latency.timeout_ms, 2000);
        assert_eq!(cfg.proxies.len(), 2);
        assert_eq!(cfg.proxies[0].labels, vec!["fast"]);
        assert!(cfg.geoip_path.is_none());
    }

    #[test]
    fn rejects_malformed_config() {
        let f = write_tmp("{not json");
        assert!(Config::load(f.path()).is_err());
    }

    #[test]
    fn parses_rules_with_groups() {
        let f = write_tmp(
            r#"{
                "routes": [
                    {"rule": "example.com", "forward": "", "selector": "DIRECT"},
                    {"rule": "group:cn", "forward": "", "selector": "GLOBAL"},
                    {"rule": "**", "forward": "", "selector": "REJECT"}
                ],
                "groups": [
                    {"name": "cn", "hostnames": ["*.cn"]}
                ]
            }"#,
        );
        let rules = RulesConfig::load(f.path()).unwrap();
        assert_eq!(rules.routes.len(), 3);
        assert_eq!(rules.groups[0].name, "cn");
    }
}
