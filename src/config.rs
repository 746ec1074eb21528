use crate::tmdb::TMDB_BASE;
use anyhow::{bail, Context, Result};
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings, read from the environment (after `.env` is loaded).
#[derive(Debug, Clone)]
pub struct Config {
    pub tmdb_api_key: String,
    pub tmdb_base_url: String,
    pub bind_addr: SocketAddr,
    pub favorites_dir: PathBuf,
    pub poll_interval: Duration,
    pub http_timeout: Duration,
    /// Requests per minute per client on the search routes.
    pub search_rate_limit: u32,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let tmdb_api_key = lookup("TMDB_API_KEY")
            .filter(|s| !s.trim().is_empty())
            .context("Missing required environment variable: TMDB_API_KEY")?;

        Ok(Self {
            tmdb_api_key,
            tmdb_base_url: lookup("TMDB_BASE_URL").unwrap_or_else(|| TMDB_BASE.to_string()),
            bind_addr: parse_or(&lookup, "BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 3000)))?,
            favorites_dir: lookup("FAVORITES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("data")),
            poll_interval: parse_poll_interval(&lookup)?,
            http_timeout: Duration::from_secs(parse_or(&lookup, "HTTP_TIMEOUT_SECS", 10)?),
            search_rate_limit: parse_or(&lookup, "SEARCH_RATE_LIMIT", 60)?,
        })
    }
}

fn parse_poll_interval<F>(lookup: &F) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let millis: u64 = parse_or(lookup, "FAVORITES_POLL_MS", 500)?;
    if millis == 0 {
        bail!("Invalid value for FAVORITES_POLL_MS: must be at least 1");
    }
    Ok(Duration::from_millis(millis))
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {key}: '{raw}'")),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn applies_defaults() {
        let cfg = Config::from_lookup(lookup(&[("TMDB_API_KEY", "k")])).unwrap();
        assert_eq!(cfg.tmdb_base_url, TMDB_BASE);
        assert_eq!(cfg.bind_addr.port(), 3000);
        assert_eq!(cfg.favorites_dir, PathBuf::from("data"));
        assert_eq!(cfg.poll_interval, Duration::from_millis(500));
        assert_eq!(cfg.http_timeout, Duration::from_secs(10));
        assert_eq!(cfg.search_rate_limit, 60);
    }

    #[test]
    fn requires_api_key() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        assert!(Config::from_lookup(lookup(&[("TMDB_API_KEY", "  ")])).is_err());
    }

    #[test]
    fn parses_overrides_and_rejects_garbage() {
        let cfg = Config::from_lookup(lookup(&[
            ("TMDB_API_KEY", "k"),
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("FAVORITES_POLL_MS", "250"),
            ("FAVORITES_DIR", "/tmp/favs"),
        ]))
        .unwrap();
        assert_eq!(cfg.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(cfg.poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.favorites_dir, PathBuf::from("/tmp/favs"));

        let err = Config::from_lookup(lookup(&[
            ("TMDB_API_KEY", "k"),
            ("HTTP_TIMEOUT_SECS", "soon"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("HTTP_TIMEOUT_SECS"));
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let err = Config::from_lookup(lookup(&[
            ("TMDB_API_KEY", "k"),
            ("FAVORITES_POLL_MS", "0"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("FAVORITES_POLL_MS"));
    }
}
