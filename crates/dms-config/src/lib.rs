//! Layered YAML configuration for the delivery daemon and CLI.
//!
//! Layers are merged in order (earlier = base, later = override), converted
//! to JSON, checked for secret literals, and hashed. The merged JSON is then
//! deserialised into [`DaemonConfig`]; every field has a serde default so an
//! empty config is valid.
//!
//! Secrets are never stored in YAML. The config carries env var NAMES and
//! [`secrets`] resolves them once at startup.

pub mod secrets;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

pub use secrets::{resolve_database_url, DatabaseUrl};

/// Comma-separated list of YAML layer paths, in merge order.
pub const ENV_CONFIG_PATHS: &str = "DMS_CONFIG";
/// Overrides `server.bind_addr`.
pub const ENV_DAEMON_ADDR: &str = "DMS_DAEMON_ADDR";
/// Overrides `progression.tick_ms`.
pub const ENV_TICK_MS: &str = "DMS_PROGRESSION_TICK_MS";

/// Leaf string prefixes that look like credentials. Any match aborts loading
/// with `CONFIG_SECRET_DETECTED`.
const SECRET_PREFIXES: &[&str] = &[
    "sk-",        // OpenAI / Stripe style
    "sk_live",
    "sk_test",
    "AKIA",       // AWS access key ID
    "-----BEGIN", // PEM private keys
    "ghp_",       // GitHub PAT
    "glpat-",     // GitLab PAT
    "xoxb-",      // Slack bot token
    "eyJ",        // bare JWT
];

// ---------------------------------------------------------------------------
// Typed config
// ---------------------------------------------------------------------------

/// Which order store backend the daemon wires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Postgres => "postgres",
            StoreBackend::Memory => "memory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// NAME of the env var holding the Postgres URL.
    pub url_env: String,
    pub max_connections: u32,
    /// Apply embedded migrations at daemon boot.
    pub migrate_on_boot: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url_env: "DMS_DATABASE_URL".to_string(),
            max_connections: 10,
            migrate_on_boot: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Postgres,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressionSection {
    /// Delay between two lifecycle transitions.
    pub tick_ms: u64,
    /// Restart progression for orders left mid-lifecycle by a previous process.
    pub resume_on_boot: bool,
    /// How long shutdown waits for progression tasks before aborting them.
    pub shutdown_grace_ms: u64,
}

impl Default for ProgressionSection {
    fn default() -> Self {
        Self {
            tick_ms: 5_000,
            resume_on_boot: true,
            shutdown_grace_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub capacity: usize,
    pub heartbeat_ms: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            heartbeat_ms: 1_000,
        }
    }
}

/// Fully-defaulted daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub store: StoreConfig,
    pub progression: ProgressionSection,
    pub bus: BusConfig,
}

impl DaemonConfig {
    /// Deserialise from merged config JSON and validate ranges.
    pub fn from_json(v: &Value) -> Result<Self> {
        let cfg: DaemonConfig = serde_json::from_value(v.clone())
            .map_err(|e| anyhow::anyhow!("CONFIG_INVALID: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.progression.tick_ms == 0 {
            bail!("CONFIG_INVALID: progression.tick_ms must be > 0");
        }
        if self.bus.capacity == 0 {
            bail!("CONFIG_INVALID: bus.capacity must be > 0");
        }
        if self.bus.heartbeat_ms == 0 {
            bail!("CONFIG_INVALID: bus.heartbeat_ms must be > 0");
        }
        if self.database.max_connections == 0 {
            bail!("CONFIG_INVALID: database.max_connections must be > 0");
        }
        if self.database.url_env.trim().is_empty() {
            bail!("CONFIG_INVALID: database.url_env must name an env var");
        }
        Ok(())
    }

    /// Apply `DMS_DAEMON_ADDR` / `DMS_PROGRESSION_TICK_MS` from the process env.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|k| std::env::var(k).ok())
    }

    /// Same as [`Self::apply_env_overrides`] with an injectable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup(ENV_DAEMON_ADDR).filter(|s| !s.trim().is_empty()) {
            self.server.bind_addr = addr.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_TICK_MS).filter(|s| !s.trim().is_empty()) {
            let ms: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("CONFIG_INVALID: {ENV_TICK_MS} is not an integer"))?;
            self.progression.tick_ms = ms;
        }
        self.validate()
    }
}

// ---------------------------------------------------------------------------
// Layered loading
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    pub fn daemon(&self) -> Result<DaemonConfig> {
        DaemonConfig::from_json(&self.config_json)
    }
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }
    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        // Empty or null documents are empty layers.
        if raw.trim().is_empty() {
            continue;
        }
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        if v_yaml.is_null() {
            continue;
        }
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    enforce_no_secret_literals(&merged)?;

    let canonical_json = serde_json::to_string(&merged).context("canonical json serialize failed")?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

/// Load the layers named in `DMS_CONFIG`. Unset means "all defaults".
pub fn load_from_env() -> Result<LoadedConfig> {
    let raw = std::env::var(ENV_CONFIG_PATHS).unwrap_or_default();
    let paths: Vec<&str> = raw
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if paths.is_empty() {
        return load_layered_yaml_from_strings(&[]);
    }
    load_layered_yaml(&paths)
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

// ---------------------------------------------------------------------------
// Secret-literal guard
// ---------------------------------------------------------------------------

fn enforce_no_secret_literals(v: &Value) -> Result<()> {
    let mut hits = Vec::new();
    walk_strings(v, "", &mut |ptr, s| {
        if looks_like_secret(s) {
            hits.push(ptr.to_string());
        }
    });
    if let Some(first) = hits.first() {
        bail!("CONFIG_SECRET_DETECTED leaf={} value=REDACTED", first);
    }
    Ok(())
}

fn walk_strings(v: &Value, prefix: &str, f: &mut dyn FnMut(&str, &str)) {
    match v {
        Value::Object(map) => {
            for (k, vv) in map {
                let next = format!("{}/{}", prefix, k.replace('~', "~0").replace('/', "~1"));
                walk_strings(vv, &next, f);
            }
        }
        Value::Array(arr) => {
            for (i, vv) in arr.iter().enumerate() {
                walk_strings(vv, &format!("{prefix}/{i}"), f);
            }
        }
        Value::String(s) => f(if prefix.is_empty() { "/" } else { prefix }, s),
        _ => {}
    }
}

/// Token-like prefixes, or a URL carrying `user:password@` credentials.
fn looks_like_secret(s: &str) -> bool {
    let t = s.trim();
    if url_has_password(t) {
        return true;
    }
    if t.len() < 8 {
        return false;
    }
    SECRET_PREFIXES.iter().any(|p| t.starts_with(p))
}

fn url_has_password(s: &str) -> bool {
    let Some((_, rest)) = s.split_once("://") else {
        return false;
    };
    let authority = rest.split('/').next().unwrap_or("");
    match authority.rsplit_once('@') {
        Some((userinfo, _)) => userinfo.contains(':'),
        None => false,
    }
}
