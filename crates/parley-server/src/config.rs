use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use tower_http::cors::{AllowOrigin, CorsLayer};

const DEFAULT_PORT: u16 = 4000;

/// Process configuration, read from the environment after `.env` is loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    /// Allowed browser origins. Empty means any origin.
    pub web_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup("PARLEY_HOST").unwrap_or_else(|| "0.0.0.0".into());

        // PORT is what most hosting platforms inject
        let port = match lookup("PARLEY_PORT").or_else(|| lookup("PORT")) {
            Some(raw) => raw.parse().with_context(|| format!("invalid port '{}'", raw))?,
            None => DEFAULT_PORT,
        };

        let db_path = lookup("PARLEY_DB_PATH")
            .unwrap_or_else(|| "parley.db".into())
            .into();

        let web_origins = lookup("PARLEY_WEB_URL")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty() && s != "*")
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host,
            port,
            db_path,
            web_origins,
        })
    }

    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid listen address {}:{}", self.host, self.port))
    }

    pub fn cors_layer(&self) -> Result<CorsLayer> {
        if self.web_origins.is_empty() {
            return Ok(CorsLayer::permissive());
        }

        let origins = self
            .web_origins
            .iter()
            .map(|o| o.parse::<HeaderValue>().with_context(|| format!("invalid origin '{}'", o)))
            .collect::<Result<Vec<_>>>()?;

        Ok(CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([Method::GET, Method::POST]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 4000);
        assert_eq!(cfg.db_path, PathBuf::from("parley.db"));
        assert!(cfg.web_origins.is_empty());
        assert!(cfg.addr().is_ok());
    }

    #[test]
    fn test_port_precedence() {
        assert_eq!(config(&[("PORT", "8080")]).unwrap().port, 8080);
        assert_eq!(
            config(&[("PORT", "8080"), ("PARLEY_PORT", "9000")]).unwrap().port,
            9000
        );
        assert!(config(&[("PARLEY_PORT", "nope")]).is_err());
    }

    #[test]
    fn test_web_origins() {
        assert!(config(&[("PARLEY_WEB_URL", "*")]).unwrap().web_origins.is_empty());

        let cfg = config(&[("PARLEY_WEB_URL", "https://a.example, https://b.example")]).unwrap();
        assert_eq!(cfg.web_origins, vec!["https://a.example", "https://b.example"]);
        assert!(cfg.cors_layer().is_ok());
    }
}
