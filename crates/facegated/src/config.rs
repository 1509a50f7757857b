use std::path::PathBuf;
use std::time::Duration;

use facegate_core::service::{DEFAULT_MAX_DIMENSION, DEFAULT_MIN_DIMENSION};
use facegate_core::PipelineConfig;

/// Which message bus to register on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    pub pipeline: PipelineConfig,
    /// Upper bound on one request, queueing included.
    pub request_timeout: Duration,
    pub bus: BusKind,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = PipelineConfig::default();

        let model_dir = var("FACEGATE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(facegate_core::default_model_dir);

        let pipeline = PipelineConfig {
            match_threshold: parsed(&var, "FACEGATE_MATCH_THRESHOLD")
                .unwrap_or(defaults.match_threshold),
            liveness_threshold: parsed(&var, "FACEGATE_ANTI_SPOOF_THRESHOLD")
                .unwrap_or(defaults.liveness_threshold),
            min_dimension: parsed(&var, "FACEGATE_MIN_FACE_SIZE").unwrap_or(DEFAULT_MIN_DIMENSION),
            max_dimension: parsed(&var, "FACEGATE_MAX_DIMENSION").unwrap_or(DEFAULT_MAX_DIMENSION),
            liveness_single_face: flag(&var, "FACEGATE_LIVENESS_SINGLE_FACE")
                .unwrap_or(defaults.liveness_single_face),
        };

        let bus = match var("FACEGATE_BUS").as_deref() {
            Some("system") => BusKind::System,
            Some("session") | None => BusKind::Session,
            Some(other) => {
                tracing::warn!(value = other, "unknown FACEGATE_BUS, using session bus");
                BusKind::Session
            }
        };

        let timeout_secs: u64 = parsed(&var, "FACEGATE_REQUEST_TIMEOUT_SECS").unwrap_or(30);

        Self {
            model_dir,
            pipeline,
            request_timeout: Duration::from_secs(timeout_secs),
            bus,
        }
    }
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = var(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "invalid value, using default");
            None
        }
    }
}

/// Boolean switch: `1/true/yes/on` or `0/false/no/off`, case-insensitive.
fn flag(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<bool> {
    let raw = var(key)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(key, value = %raw, "invalid value, using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = config(&[]);
        assert_eq!(c.pipeline, PipelineConfig::default());
        assert_eq!(c.request_timeout, Duration::from_secs(30));
        assert_eq!(c.bus, BusKind::Session);
        assert!(c.model_dir.ends_with("facegate/models"));
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("FACEGATE_MODEL_DIR", "/opt/models"),
            ("FACEGATE_MATCH_THRESHOLD", "0.45"),
            ("FACEGATE_ANTI_SPOOF_THRESHOLD", "0.9"),
            ("FACEGATE_MIN_FACE_SIZE", "64"),
            ("FACEGATE_MAX_DIMENSION", "0"),
            ("FACEGATE_LIVENESS_SINGLE_FACE", "1"),
            ("FACEGATE_REQUEST_TIMEOUT_SECS", "5"),
            ("FACEGATE_BUS", "system"),
        ]);
        assert_eq!(c.model_dir, PathBuf::from("/opt/models"));
        assert_eq!(c.pipeline.match_threshold, 0.45);
        assert_eq!(c.pipeline.liveness_threshold, 0.9);
        assert_eq!(c.pipeline.min_dimension, 64);
        assert_eq!(c.pipeline.max_dimension, 0);
        assert!(c.pipeline.liveness_single_face);
        assert_eq!(c.request_timeout, Duration::from_secs(5));
        assert_eq!(c.bus, BusKind::System);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let c = config(&[
            ("FACEGATE_MATCH_THRESHOLD", "close"),
            ("FACEGATE_MIN_FACE_SIZE", "-3"),
            ("FACEGATE_BUS", "carrier-pigeon"),
        ]);
        assert_eq!(c.pipeline.match_threshold, 0.6);
        assert_eq!(c.pipeline.min_dimension, 80);
        assert_eq!(c.bus, BusKind::Session);
    }

    #[test]
    fn test_single_face_flag_parsing() {
        let single = |v: &str| config(&[("FACEGATE_LIVENESS_SINGLE_FACE", v)]).pipeline.liveness_single_face;
        assert!(single("true"));
        assert!(single("YES"));
        assert!(!single("false"));
        assert!(!single("no"));
        assert!(!single("0"));
        assert!(!single(""));
        assert!(!single("maybe"));
    }
}
