use crate::retry::RetryPolicy;
use crate::tunnel::tls::TlsSettings;
use anyhow::{bail, Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const CIPHER_SUITES_ENV: &str = "CF_CONDUIT_CIPHERSUITES";
pub const MIN_TLS_VERSION_ENV: &str = "CF_CONDUIT_MIN_TLS_VERSION";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ConduitSettings {
    pub org: String,
    pub space: String,
    /// Name of the proxy app. Must not exist unless `reuse` is set.
    pub app_name: String,
    /// First local port handed out by the planner.
    pub local_port: u16,
    /// Keep the proxy app around and pick it up again on the next run.
    pub reuse: bool,
    pub bind_parameters: Map<String, Value>,
    pub tls: TlsSettings,
    pub verbose: bool,
    #[serde(skip)]
    pub timings: Timings,
}

/// Retry behaviour of the orchestration steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    pub tunnel_dial: RetryPolicy,
    pub readiness_probe: RetryPolicy,
    pub app_start: RetryPolicy,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            tunnel_dial: RetryPolicy::tunnel_dial(),
            readiness_probe: RetryPolicy::readiness_probe(),
            app_start: RetryPolicy::app_start(),
        }
    }
}

impl Default for ConduitSettings {
    fn default() -> Self {
        Self {
            org: String::new(),
            space: String::new(),
            app_name: default_app_name(),
            local_port: 7080,
            reuse: false,
            bind_parameters: Map::new(),
            tls: TlsSettings::default(),
            verbose: false,
            timings: Timings::default(),
        }
    }
}

impl ConduitSettings {
    /// Fills TLS options the caller left unset from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if self.tls.cipher_suites.is_empty() {
            if let Some(raw) = lookup(CIPHER_SUITES_ENV).filter(|v| !v.is_empty()) {
                debug!("cipher suites from {CIPHER_SUITES_ENV}: {raw}");
                self.tls.cipher_suites = raw.split(',').map(|s| s.trim().to_string()).collect();
            }
        }

        if self.tls.min_version.is_empty() {
            self.tls.min_version = lookup(MIN_TLS_VERSION_ENV)
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "TLS12".to_string());
        }
    }
}

/// `__conduit_<8 random chars>__`
pub fn default_app_name() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("__conduit_{}__", &suffix[..8])
}

/// Parses the raw `--bind-parameters` style JSON object.
pub fn parse_bind_parameters(raw: &str) -> Result<Map<String, Value>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(raw).context("bind parameters are not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("bind parameters must be a JSON object, got {other}"),
    }
}
