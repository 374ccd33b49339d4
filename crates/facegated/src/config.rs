use crate::debouncer::DebouncerConfig;
use facegate_core::matcher::{
    DEFAULT_ACCEPTANCE_THRESHOLD, DEFAULT_HIGH_SIMILARITY_CUTOFF, DEFAULT_LOW_CONFIDENCE_CUTOFF,
};
use facegate_core::MatchThresholds;
use facegate_hw::quality::{DEFAULT_DARK_THRESHOLD, DEFAULT_FLATNESS_THRESHOLD};
use facegate_hw::{CaptureConstraints, QualityGate};
use std::path::PathBuf;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub capture_width: u32,
    pub capture_height: u32,
    pub capture_fps: u32,
    /// Unix socket of the face analyzer process.
    pub analyzer_socket: PathBuf,
    pub analyzer_timeout_ms: u64,
    /// TOML manifest listing enrollment photos.
    pub enrollment_manifest: PathBuf,
    /// Maximum Euclidean distance accepted as a match (exclusive).
    pub acceptance_threshold: f32,
    pub low_confidence_cutoff: f32,
    pub high_similarity_cutoff: f32,
    pub dark_threshold: f32,
    pub flatness_threshold: f32,
    /// Recognition trigger period.
    pub tick_ms: u64,
    /// Minimum time since the last completed evaluation before a new one.
    pub min_cycle_spacing_ms: u64,
    /// How long a decision stays visible.
    pub display_ms: u64,
    pub health_check_ms: u64,
    pub stall_timeout_ms: u64,
    /// Display "No face detected" decisions instead of silently idling.
    pub show_inconclusive: bool,
    /// Serve on the session bus instead of the system bus.
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let parse_u64 = |key: &str, default: u64| -> u64 {
            get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let parse_f32 = |key: &str, default: f32| -> f32 {
            get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let parse_u32 = |key: &str, default: u32| -> u32 {
            get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };
        let flag = |key: &str| get(key).map(|v| v != "0" && !v.is_empty()).unwrap_or(false);

        let data_dir = get("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                let home = get("HOME").unwrap_or_else(|| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("facegate");

        Self {
            camera_device: get("FACEGATE_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            capture_width: parse_u32("FACEGATE_CAPTURE_WIDTH", 1280),
            capture_height: parse_u32("FACEGATE_CAPTURE_HEIGHT", 720),
            capture_fps: parse_u32("FACEGATE_CAPTURE_FPS", 30),
            analyzer_socket: get("FACEGATE_ANALYZER_SOCKET")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/run/facegate/analyzer.sock")),
            analyzer_timeout_ms: parse_u64("FACEGATE_ANALYZER_TIMEOUT_MS", 5000),
            enrollment_manifest: get("FACEGATE_ENROLLMENT_MANIFEST")
                .map(PathBuf::from)
                .unwrap_or_else(|| data_dir.join("enrollment.toml")),
            acceptance_threshold: parse_f32("FACEGATE_ACCEPTANCE_THRESHOLD", DEFAULT_ACCEPTANCE_THRESHOLD),
            low_confidence_cutoff: parse_f32("FACEGATE_LOW_CONFIDENCE_CUTOFF", DEFAULT_LOW_CONFIDENCE_CUTOFF),
            high_similarity_cutoff: parse_f32(
                "FACEGATE_HIGH_SIMILARITY_CUTOFF",
                DEFAULT_HIGH_SIMILARITY_CUTOFF,
            ),
            dark_threshold: parse_f32("FACEGATE_DARK_THRESHOLD", DEFAULT_DARK_THRESHOLD),
            flatness_threshold: parse_f32("FACEGATE_FLATNESS_THRESHOLD", DEFAULT_FLATNESS_THRESHOLD),
            tick_ms: parse_u64("FACEGATE_TICK_MS", 1000),
            min_cycle_spacing_ms: parse_u64("FACEGATE_MIN_CYCLE_SPACING_MS", 500),
            display_ms: parse_u64("FACEGATE_DISPLAY_MS", 5000),
            health_check_ms: parse_u64("FACEGATE_HEALTH_CHECK_MS", 2000),
            stall_timeout_ms: parse_u64("FACEGATE_STALL_TIMEOUT_MS", 5000),
            show_inconclusive: flag("FACEGATE_SHOW_INCONCLUSIVE"),
            session_bus: flag("FACEGATE_SESSION_BUS"),
        }
    }

    pub fn debouncer(&self) -> DebouncerConfig {
        DebouncerConfig {
            min_cycle_spacing: Duration::from_millis(self.min_cycle_spacing_ms),
            display_for: Duration::from_millis(self.display_ms),
            show_inconclusive: self.show_inconclusive,
        }
    }

    pub fn thresholds(&self) -> MatchThresholds {
        MatchThresholds {
            acceptance_threshold: self.acceptance_threshold,
            low_confidence_cutoff: self.low_confidence_cutoff,
            high_similarity_cutoff: self.high_similarity_cutoff,
        }
    }

    pub fn quality_gate(&self) -> QualityGate {
        QualityGate::new(self.dark_threshold, self.flatness_threshold)
    }

    pub fn capture_constraints(&self) -> CaptureConstraints {
        CaptureConstraints {
            width: self.capture_width,
            height: self.capture_height,
            frame_rate: self.capture_fps,
        }
    }

    pub fn analyzer_timeout(&self) -> Duration {
        Duration::from_millis(self.analyzer_timeout_ms)
    }
}

impl Default for Config {
    /// Built-in defaults, ignoring the environment.
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("HOME", "/home/gate")]));
        assert_eq!(config.camera_device, "/dev/video0");
        assert_eq!(config.capture_constraints(), CaptureConstraints::default());
        assert_eq!(config.analyzer_socket, PathBuf::from("/run/facegate/analyzer.sock"));
        assert_eq!(
            config.enrollment_manifest,
            PathBuf::from("/home/gate/.local/share/facegate/enrollment.toml")
        );
        assert_eq!(config.thresholds(), MatchThresholds::default());
        assert_eq!(config.quality_gate(), QualityGate::default());
        assert_eq!(config.tick_ms, 1000);
        assert_eq!(config.min_cycle_spacing_ms, 500);
        assert_eq!(config.display_ms, 5000);
        assert_eq!(config.health_check_ms, 2000);
        assert_eq!(config.stall_timeout_ms, 5000);
        assert_eq!(config.analyzer_timeout(), Duration::from_secs(5));
        assert_eq!(config.debouncer(), DebouncerConfig::default());
        assert!(!config.show_inconclusive);
        assert!(!config.session_bus);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("XDG_DATA_HOME", "/var/lib"),
            ("FACEGATE_CAMERA_DEVICE", "/dev/video2"),
            ("FACEGATE_ACCEPTANCE_THRESHOLD", "0.4"),
            ("FACEGATE_DISPLAY_MS", "3000"),
            ("FACEGATE_SHOW_INCONCLUSIVE", "1"),
            ("FACEGATE_SESSION_BUS", "0"),
        ]));
        assert_eq!(config.camera_device, "/dev/video2");
        assert_eq!(config.acceptance_threshold, 0.4);
        assert_eq!(config.display_ms, 3000);
        assert_eq!(config.enrollment_manifest, PathBuf::from("/var/lib/facegate/enrollment.toml"));
        assert!(config.show_inconclusive);
        assert!(!config.session_bus);
    }

    #[test]
    fn test_unparseable_values_fall_back() {
        let config = Config::from_lookup(lookup(&[
            ("FACEGATE_TICK_MS", "soon"),
            ("FACEGATE_DARK_THRESHOLD", "dim"),
        ]));
        assert_eq!(config.tick_ms, 1000);
        assert_eq!(config.dark_threshold, DEFAULT_DARK_THRESHOLD);
    }
}
