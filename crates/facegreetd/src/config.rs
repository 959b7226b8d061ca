use facegreet_core::cooldown::DEFAULT_COOLDOWN_MS;
use facegreet_core::recognizer::ARCFACE_MATCH_THRESHOLD;
use facegreet_core::reference::DEFAULT_IMAGES_PER_IDENTITY;
use std::path::PathBuf;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub frame_width: u32,
    pub frame_height: u32,
    /// Directory containing the SCRFD and ArcFace ONNX files.
    pub model_dir: PathBuf,
    /// Root of `<identity>/<n>.jpg` reference images.
    pub reference_dir: PathBuf,
    /// Known identities, in match-priority order.
    pub identities: Vec<String>,
    pub images_per_identity: usize,
    /// Euclidean distance threshold for a positive match, calibrated for ArcFace.
    pub match_threshold: f32,
    /// Minimum time between greetings for one identity.
    pub cooldown_ms: u64,
    /// Minimum time between processed frames.
    pub frame_interval_ms: u64,
    /// Frames slower than this are logged.
    pub frame_budget_ms: u64,
    /// Frames discarded after the stream starts (exposure settling).
    pub warmup_frames: usize,
    /// Frames with a mean luma below this are not analyzed.
    pub dark_threshold: f32,
    pub speech_enabled: bool,
    pub speech_language: String,
    /// Optional TOML file with extra or replacement greetings.
    pub greetings_file: Option<PathBuf>,
    /// Optional JPEG path refreshed with the latest annotated frame.
    pub overlay_path: Option<PathBuf>,
    /// Serve D-Bus on the session bus instead of the system bus.
    pub session_bus: bool,
}

impl Config {
    /// Load configuration from `FACEGREET_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let identities = lookup("FACEGREET_IDENTITIES")
            .map(|v| parse_list(&v))
            .filter(|ids| !ids.is_empty())
            .unwrap_or_else(|| vec!["badhusha".to_string(), "abhishek".to_string()]);

        Self {
            camera_device: lookup("FACEGREET_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            frame_width: parsed(&lookup, "FACEGREET_FRAME_WIDTH", 640),
            frame_height: parsed(&lookup, "FACEGREET_FRAME_HEIGHT", 480),
            model_dir: lookup("FACEGREET_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(facegreet_core::default_model_dir),
            reference_dir: lookup("FACEGREET_REFERENCE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("labeled_images")),
            identities,
            images_per_identity: parsed(&lookup, "FACEGREET_IMAGES_PER_IDENTITY", DEFAULT_IMAGES_PER_IDENTITY),
            match_threshold: positive(&lookup, "FACEGREET_MATCH_THRESHOLD", ARCFACE_MATCH_THRESHOLD),
            cooldown_ms: parsed(&lookup, "FACEGREET_COOLDOWN_MS", DEFAULT_COOLDOWN_MS),
            frame_interval_ms: parsed(&lookup, "FACEGREET_FRAME_INTERVAL_MS", 33),
            frame_budget_ms: parsed(&lookup, "FACEGREET_FRAME_BUDGET_MS", 1000),
            warmup_frames: parsed(&lookup, "FACEGREET_WARMUP_FRAMES", 4),
            dark_threshold: parsed(&lookup, "FACEGREET_DARK_THRESHOLD", 8.0),
            speech_enabled: lookup("FACEGREET_SPEECH_ENABLED")
                .map(|v| v != "0")
                .unwrap_or(true),
            speech_language: lookup("FACEGREET_SPEECH_LANGUAGE").unwrap_or_else(|| "en-US".to_string()),
            greetings_file: lookup("FACEGREET_GREETINGS_FILE").map(PathBuf::from),
            overlay_path: lookup("FACEGREET_OVERLAY_PATH").map(PathBuf::from),
            session_bus: lookup("FACEGREET_SESSION_BUS")
                .map(|v| v != "0")
                .unwrap_or(false),
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join(facegreet_core::OnnxAnalyzer::DETECTOR_FILE)
            .to_string_lossy()
            .into_owned()
    }

    /// Path to the ArcFace recognition model.
    pub fn arcface_model_path(&self) -> String {
        self.model_dir
            .join(facegreet_core::OnnxAnalyzer::RECOGNIZER_FILE)
            .to_string_lossy()
            .into_owned()
    }
}

fn parsed<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unparseable value, using default");
            default
        }),
        None => default,
    }
}

/// Like [`parsed`], but only finite values above zero are accepted.
fn positive(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: f32) -> f32 {
    let value = parsed(lookup, key, default);
    if value.is_finite() && value > 0.0 {
        value
    } else {
        tracing::warn!(key, value, "value must be finite and above zero, using default");
        default
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
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
        assert_eq!(c.camera_device, "/dev/video0");
        assert_eq!(c.identities, vec!["badhusha", "abhishek"]);
        assert_eq!(c.images_per_identity, 2);
        assert!((c.match_threshold - ARCFACE_MATCH_THRESHOLD).abs() < 1e-6);
        assert!((c.dark_threshold - 8.0).abs() < 1e-6);
        assert_eq!(c.cooldown_ms, 60_000);
        assert_eq!(c.reference_dir, PathBuf::from("labeled_images"));
        assert!(c.speech_enabled);
        assert_eq!(c.speech_language, "en-US");
        assert!(c.greetings_file.is_none());
        assert!(!c.session_bus);
    }

    #[test]
    fn test_overrides() {
        let c = config(&[
            ("FACEGREET_IDENTITIES", " alice, bob ,,carol "),
            ("FACEGREET_MATCH_THRESHOLD", "0.45"),
            ("FACEGREET_COOLDOWN_MS", "5000"),
            ("FACEGREET_SPEECH_ENABLED", "0"),
            ("FACEGREET_MODEL_DIR", "/opt/models"),
            ("FACEGREET_SESSION_BUS", "1"),
        ]);
        assert_eq!(c.identities, vec!["alice", "bob", "carol"]);
        assert!((c.match_threshold - 0.45).abs() < 1e-6);
        assert_eq!(c.cooldown_ms, 5000);
        assert!(!c.speech_enabled);
        assert!(c.session_bus);
        assert_eq!(c.scrfd_model_path(), "/opt/models/det_10g.onnx");
        assert_eq!(c.arcface_model_path(), "/opt/models/w600k_r50.onnx");
    }

    #[test]
    fn test_bad_values_fall_back() {
        let c = config(&[
            ("FACEGREET_COOLDOWN_MS", "soon"),
            ("FACEGREET_IDENTITIES", " , "),
        ]);
        assert_eq!(c.cooldown_ms, 60_000);
        assert_eq!(c.identities, vec!["badhusha", "abhishek"]);
    }

    #[test]
    fn test_threshold_rejects_nan_and_non_positive() {
        for raw in ["NaN", "inf", "-0.5", "0"] {
            let c = config(&[("FACEGREET_MATCH_THRESHOLD", raw)]);
            assert_eq!(c.match_threshold, ARCFACE_MATCH_THRESHOLD, "accepted {raw}");
        }
    }
}
