use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Runtime settings, read from `ROOMBOOK_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub user_name: String,
    pub auth_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            compact_threshold: 1000,
            metrics_port: None,
            user_name: "guest".into(),
            auth_timeout: Duration::from_millis(5000),
        }
    }
}

fn parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("ignoring unparseable {name}={raw}");
            None
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Config::default();
        Self {
            data_dir: env::var("ROOMBOOK_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            compact_threshold: parsed("ROOMBOOK_COMPACT_THRESHOLD")
                .unwrap_or(defaults.compact_threshold),
            metrics_port: parsed("ROOMBOOK_METRICS_PORT"),
            user_name: env::var("ROOMBOOK_USER")
                .or_else(|_| env::var("USER"))
                .unwrap_or(defaults.user_name),
            auth_timeout: parsed("ROOMBOOK_AUTH_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.auth_timeout),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("bookings.wal")
    }

    pub fn session_path(&self) -> PathBuf {
        self.data_dir.join("session.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_derived_paths() {
        let config = Config::default();
        assert_eq!(config.compact_threshold, 1000);
        assert_eq!(config.auth_timeout, Duration::from_secs(5));
        assert!(config.metrics_port.is_none());
        assert_eq!(config.wal_path(), PathBuf::from("./data/bookings.wal"));
        assert_eq!(config.session_path(), PathBuf::from("./data/session.json"));
    }
}
