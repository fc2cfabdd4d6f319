//! Runtime secret resolution.
//!
//! Config YAML stores only env var NAMES (e.g. `database.url_env:
//! "DMS_DATABASE_URL"`). Binaries call [`resolve_database_url`] once at
//! startup and pass the result into constructors. `Debug` output redacts the
//! value, and error messages name the env var, never its contents.

use anyhow::{bail, Result};

use crate::DaemonConfig;

/// A resolved Postgres connection URL. **Redacted in `Debug` output.**
#[derive(Clone)]
pub struct DatabaseUrl {
    /// Env var the value came from.
    pub source_var: String,
    value: String,
}

impl DatabaseUrl {
    pub fn expose(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for DatabaseUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseUrl")
            .field("source_var", &self.source_var)
            .field("value", &"<REDACTED>")
            .finish()
    }
}

/// Resolve the database URL named by `cfg.database.url_env` from the process env.
pub fn resolve_database_url(cfg: &DaemonConfig) -> Result<DatabaseUrl> {
    resolve_database_url_with(cfg, |k| std::env::var(k).ok())
}

/// Same as [`resolve_database_url`] with an injectable lookup.
pub fn resolve_database_url_with<F>(cfg: &DaemonConfig, lookup: F) -> Result<DatabaseUrl>
where
    F: Fn(&str) -> Option<String>,
{
    let var = cfg.database.url_env.trim();
    match lookup(var) {
        Some(v) if !v.trim().is_empty() => Ok(DatabaseUrl {
            source_var: var.to_string(),
            value: v.trim().to_string(),
        }),
        _ => bail!("SECRET_MISSING: env var {var} is unset or empty"),
    }
}
