use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, bail};

/// Secrets shipped in sample env files. Refused unless explicitly allowed.
const PLACEHOLDER_SECRETS: &[&str] = &["change-me", "dev-secret-change-me", "secret", "changeme"];

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub jwt_secret: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let jwt_secret = get("KINDRED_JWT_SECRET").unwrap_or_default();
        let allow_dev = get("KINDRED_ALLOW_DEV_SECRET").as_deref() == Some("1");
        if jwt_secret.is_empty() {
            bail!("KINDRED_JWT_SECRET is unset");
        }
        if PLACEHOLDER_SECRETS.contains(&jwt_secret.as_str()) && !allow_dev {
            bail!("KINDRED_JWT_SECRET is still a placeholder; set KINDRED_ALLOW_DEV_SECRET=1 to run with it anyway");
        }

        let host = get("KINDRED_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let port: u16 = get("KINDRED_PORT")
            .unwrap_or_else(|| "3000".into())
            .parse()
            .context("KINDRED_PORT must be a port number")?;
        let db_path = get("KINDRED_DB_PATH").unwrap_or_else(|| "kindred.db".into()).into();

        Ok(Self {
            host,
            port,
            db_path,
            jwt_secret,
        })
    }

    pub fn addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_only_the_secret_is_set() {
        let cfg = Config::from_lookup(lookup(&[("KINDRED_JWT_SECRET", "a-real-secret")])).unwrap();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.db_path, PathBuf::from("kindred.db"));
        assert_eq!(cfg.addr().unwrap().port(), 3000);
    }

    #[test]
    fn missing_or_placeholder_secret_is_refused() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        assert!(Config::from_lookup(lookup(&[("KINDRED_JWT_SECRET", "change-me")])).is_err());

        let cfg = Config::from_lookup(lookup(&[
            ("KINDRED_JWT_SECRET", "change-me"),
            ("KINDRED_ALLOW_DEV_SECRET", "1"),
        ]))
        .unwrap();
        assert_eq!(cfg.jwt_secret, "change-me");
    }

    #[test]
    fn bad_port_is_an_error() {
        let res = Config::from_lookup(lookup(&[
            ("KINDRED_JWT_SECRET", "a-real-secret"),
            ("KINDRED_PORT", "eighty"),
        ]));
        assert!(res.is_err());
    }
}
