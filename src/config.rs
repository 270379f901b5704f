use std::path::PathBuf;
use std::str::FromStr;

use tracing::warn;

pub const DEFAULT_PORT: u16 = 5433;
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;
pub const DEFAULT_COMPACT_THRESHOLD: u64 = 1000;

/// Server settings, read from `INNKEEP_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            bind: "0.0.0.0".into(),
            data_dir: PathBuf::from("./data"),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            compact_threshold: DEFAULT_COMPACT_THRESHOLD,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unparseable numbers fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            port: parsed(&lookup, "INNKEEP_PORT").unwrap_or(defaults.port),
            bind: lookup("INNKEEP_BIND").unwrap_or(defaults.bind),
            data_dir: lookup("INNKEEP_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            max_connections: parsed(&lookup, "INNKEEP_MAX_CONNECTIONS")
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_connections),
            compact_threshold: parsed(&lookup, "INNKEEP_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed(&lookup, "INNKEEP_METRICS_PORT"),
            tls_cert: lookup("INNKEEP_TLS_CERT"),
            tls_key: lookup("INNKEEP_TLS_KEY"),
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("innkeep.wal")
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring {key}={raw:?}: not a valid value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_when_unset() {
        let c = config(&[]);
        assert_eq!(c, Config::default());
        assert_eq!(c.listen_addr(), "0.0.0.0:5433");
        assert_eq!(c.wal_path(), PathBuf::from("./data/innkeep.wal"));
    }

    #[test]
    fn reads_every_variable() {
        let c = config(&[
            ("INNKEEP_PORT", "6000"),
            ("INNKEEP_BIND", "127.0.0.1"),
            ("INNKEEP_DATA_DIR", "/var/lib/innkeep"),
            ("INNKEEP_MAX_CONNECTIONS", "32"),
            ("INNKEEP_COMPACT_THRESHOLD", "50"),
            ("INNKEEP_METRICS_PORT", "9100"),
            ("INNKEEP_TLS_CERT", "cert.pem"),
            ("INNKEEP_TLS_KEY", "key.pem"),
        ]);
        assert_eq!(c.listen_addr(), "127.0.0.1:6000");
        assert_eq!(c.data_dir, PathBuf::from("/var/lib/innkeep"));
        assert_eq!(c.max_connections, 32);
        assert_eq!(c.compact_threshold, 50);
        assert_eq!(c.metrics_port, Some(9100));
        assert_eq!(c.tls_cert.as_deref(), Some("cert.pem"));
        assert_eq!(c.tls_key.as_deref(), Some("key.pem"));
    }

    #[test]
    fn bad_numbers_fall_back() {
        let c = config(&[
            ("INNKEEP_PORT", "not-a-port"),
            ("INNKEEP_MAX_CONNECTIONS", "0"),
            ("INNKEEP_METRICS_PORT", "99999"),
        ]);
        assert_eq!(c.port, DEFAULT_PORT);
        assert_eq!(c.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(c.metrics_port, None);
    }
}
