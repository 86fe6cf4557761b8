use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};

/// Admin secrets shorter than this are rejected at startup.
pub const MIN_ADMIN_SECRET_LEN: usize = 16;

#[derive(Clone)]
pub struct Config {
    pub listen: String,
    pub admin_secret: String,
    pub vault_addr: String,
    pub vault_role: String,
    pub vault_secret: String,
    pub argo_addr: String,
    pub argo_namespace: String,
    pub ssh_pem_file: PathBuf,
    pub repo_cache_path: PathBuf,
    pub catalog_path: PathBuf,
    pub request_timeout: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("listen", &self.listen)
            .field("admin_secret", &"<redacted>")
            .field("vault_addr", &self.vault_addr)
            .field("vault_role", &self.vault_role)
            .field("vault_secret", &"<redacted>")
            .field("argo_addr", &self.argo_addr)
            .field("argo_namespace", &self.argo_namespace)
            .field("ssh_pem_file", &self.ssh_pem_file)
            .field("repo_cache_path", &self.repo_cache_path)
            .field("catalog_path", &self.catalog_path)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary key lookup. `load` passes the
    /// process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let required = |key: &str| -> anyhow::Result<String> {
            match lookup(key) {
                Some(v) if !v.is_empty() => Ok(v),
                _ => bail!("{key} is undefined"),
            }
        };

        let admin_secret = required("CLOUDOPS_ADMIN_SECRET")?;
        if admin_secret.len() < MIN_ADMIN_SECRET_LEN {
            bail!("CLOUDOPS_ADMIN_SECRET must be at least {MIN_ADMIN_SECRET_LEN} characters long");
        }

        let request_timeout = match lookup("CLOUDOPS_REQUEST_TIMEOUT_SECS") {
            Some(v) => Duration::from_secs(
                v.parse()
                    .with_context(|| format!("invalid CLOUDOPS_REQUEST_TIMEOUT_SECS '{v}'"))?,
            ),
            None => Duration::from_secs(30),
        };

        Ok(Self {
            listen: lookup("CLOUDOPS_LISTEN").unwrap_or_else(|| "0.0.0.0:8443".into()),
            admin_secret,
            vault_addr: required("VAULT_ADDR")?,
            vault_role: required("VAULT_ROLE")?,
            vault_secret: required("VAULT_SECRET")?,
            argo_addr: required("ARGO_ADDR")?,
            argo_namespace: lookup("ARGO_NAMESPACE").unwrap_or_else(|| "argo".into()),
            ssh_pem_file: required("SSH_PEM_FILE")?.into(),
            repo_cache_path: lookup("CLOUDOPS_REPO_CACHE")
                .map_or_else(|| env::temp_dir().join("cloudops-repos"), PathBuf::from),
            catalog_path: lookup("CLOUDOPS_CONFIG")
                .map_or_else(|| PathBuf::from("cloudops.yaml"), PathBuf::from),
            request_timeout,
        })
    }
}
