use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Knobs the booking engine reads on every workflow.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Extra attempts after a grid commit loses a version race.
    pub max_conflict_retries: u32,
    /// Budget from workflow start to the grid commit.
    pub workflow_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_conflict_retries: 5,
            workflow_timeout: Duration::from_millis(5000),
        }
    }
}

/// Daemon settings from `SEATLINE_*` environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub seed_file: Option<PathBuf>,
    pub engine: EngineConfig,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] over an arbitrary key lookup. Unparseable
    /// values fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
            lookup(key).and_then(|s| s.trim().parse().ok())
        }

        let defaults = EngineConfig::default();
        Self {
            data_dir: lookup("SEATLINE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data")),
            metrics_port: parsed(&lookup, "SEATLINE_METRICS_PORT"),
            compact_threshold: parsed(&lookup, "SEATLINE_COMPACT_THRESHOLD").unwrap_or(1000),
            seed_file: lookup("SEATLINE_SEED_FILE")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
            engine: EngineConfig {
                max_conflict_retries: parsed(&lookup, "SEATLINE_MAX_CONFLICT_RETRIES")
                    .unwrap_or(defaults.max_conflict_retries),
                workflow_timeout: parsed(&lookup, "SEATLINE_WORKFLOW_TIMEOUT_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.workflow_timeout),
            },
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("seatline.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let c = config(&[]);
        assert_eq!(c.data_dir, PathBuf::from("./data"));
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.compact_threshold, 1000);
        assert_eq!(c.seed_file, None);
        assert_eq!(c.engine.max_conflict_retries, 5);
        assert_eq!(c.engine.workflow_timeout, Duration::from_secs(5));
        assert_eq!(c.wal_path(), PathBuf::from("./data/seatline.wal"));
    }

    #[test]
    fn overrides() {
        let c = config(&[
            ("SEATLINE_DATA_DIR", "/var/lib/seatline"),
            ("SEATLINE_METRICS_PORT", "9100"),
            ("SEATLINE_COMPACT_THRESHOLD", "50"),
            ("SEATLINE_MAX_CONFLICT_RETRIES", "2"),
            ("SEATLINE_WORKFLOW_TIMEOUT_MS", "250"),
            ("SEATLINE_SEED_FILE", "trains.json"),
        ]);
        assert_eq!(c.data_dir, PathBuf::from("/var/lib/seatline"));
        assert_eq!(c.metrics_port, Some(9100));
        assert_eq!(c.compact_threshold, 50);
        assert_eq!(c.engine.max_conflict_retries, 2);
        assert_eq!(c.engine.workflow_timeout, Duration::from_millis(250));
        assert_eq!(c.seed_file, Some(PathBuf::from("trains.json")));
    }

    #[test]
    fn garbage_falls_back() {
        let c = config(&[("SEATLINE_METRICS_PORT", "http"), ("SEATLINE_COMPACT_THRESHOLD", "-1")]);
        assert_eq!(c.metrics_port, None);
        assert_eq!(c.compact_threshold, 1000);
    }
}
