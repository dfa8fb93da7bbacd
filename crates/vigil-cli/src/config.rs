use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use vigil_core::{FaceSelection, LoopSettings, Mode};
use vigil_hw::ActionCommands;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}={value:?}: {reason}")]
    Env {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Runtime configuration, loaded from a TOML file with `VIGIL_*`
/// environment overrides.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Cosine distance below which a face matches the reference set.
    pub tolerance: f32,
    /// Seconds of unconfirmed presence before the protective action.
    pub timeout_seconds: u64,
    /// Consecutive positive ticks needed to confirm presence.
    pub required_consecutive_ok: u32,
    pub mode: Mode,
    pub face_selection: FaceSelection,
    /// Minimum time between detection ticks.
    pub sampling_interval_seconds: f64,
    /// Sleep between loop cycles (timeout and interrupt check resolution).
    pub poll_interval_ms: u64,
    /// V4L2 device path.
    pub camera_device: String,
    /// Directory containing det_10g.onnx and w600k_r50.onnx.
    pub model_dir: PathBuf,
    /// Reference embeddings written by `vigil enroll`.
    pub reference_path: PathBuf,
    pub actions: ActionCommands,
    pub enroll: EnrollConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnrollConfig {
    /// How long to record reference faces.
    pub record_seconds: u64,
    /// Whether to keep a PNG of every recorded face.
    pub save_faces: bool,
    pub photo_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = data_dir();
        Self {
            tolerance: 0.4,
            timeout_seconds: 5,
            required_consecutive_ok: 3,
            mode: Mode::Debug,
            face_selection: FaceSelection::AnyMatch,
            sampling_interval_seconds: 1.0,
            poll_interval_ms: 50,
            camera_device: "/dev/video0".to_string(),
            model_dir: data_dir.join("models"),
            reference_path: data_dir.join("reference_embeddings.json"),
            actions: ActionCommands::default(),
            enroll: EnrollConfig::default(),
        }
    }
}

impl Default for EnrollConfig {
    fn default() -> Self {
        Self {
            record_seconds: 30,
            save_faces: true,
            photo_dir: data_dir().join("reference_photos"),
        }
    }
}

impl Config {
    /// Load from `explicit`, else `$VIGIL_CONFIG`, else the default path.
    ///
    /// A named file must exist; a missing default file yields defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let named = explicit
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("VIGIL_CONFIG").map(PathBuf::from));

        let mut config = match named {
            Some(path) => Self::from_file(&path)?,
            None => {
                let path = default_config_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    tracing::debug!(path = %path.display(), "no config file, using defaults");
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    /// Apply `VIGIL_*` overrides obtained through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        override_parsed(&lookup, "VIGIL_TOLERANCE", &mut self.tolerance)?;
        override_parsed(&lookup, "VIGIL_TIMEOUT_SECONDS", &mut self.timeout_seconds)?;
        override_parsed(&lookup, "VIGIL_REQUIRED_CONSECUTIVE_OK", &mut self.required_consecutive_ok)?;
        override_parsed(&lookup, "VIGIL_MODE", &mut self.mode)?;
        override_parsed(&lookup, "VIGIL_FACE_SELECTION", &mut self.face_selection)?;
        override_parsed(&lookup, "VIGIL_SAMPLING_INTERVAL_SECONDS", &mut self.sampling_interval_seconds)?;
        if let Some(v) = lookup("VIGIL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("VIGIL_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("VIGIL_REFERENCE_PATH") {
            self.reference_path = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0 && self.tolerance <= 2.0) {
            return Err(ConfigError::Invalid(format!(
                "tolerance must be in (0, 2], got {}",
                self.tolerance
            )));
        }
        if self.timeout_seconds == 0 {
            return Err(ConfigError::Invalid("timeout_seconds must be at least 1".into()));
        }
        if self.required_consecutive_ok == 0 {
            return Err(ConfigError::Invalid(
                "required_consecutive_ok must be at least 1".into(),
            ));
        }
        if !(self.sampling_interval_seconds.is_finite() && self.sampling_interval_seconds > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "sampling_interval_seconds must be positive, got {}",
                self.sampling_interval_seconds
            )));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be at least 1".into()));
        }
        if self.camera_device.is_empty() {
            return Err(ConfigError::Invalid("camera_device is empty".into()));
        }
        let empty = self.actions.empty_actions();
        if !empty.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "empty command for action(s): {}",
                empty.join(", ")
            )));
        }
        if self.enroll.record_seconds == 0 {
            return Err(ConfigError::Invalid("enroll.record_seconds must be at least 1".into()));
        }
        Ok(())
    }

    /// Decision settings for the sampling loop.
    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            mode: self.mode,
            tolerance: self.tolerance,
            timeout: Duration::from_secs(self.timeout_seconds),
            required_consecutive_ok: self.required_consecutive_ok,
            selection: self.face_selection,
            sampling_interval: Duration::from_secs_f64(self.sampling_interval_seconds),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        }
    }
}

fn override_parsed<F, T>(lookup: &F, key: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(value) = lookup(key) {
        *slot = value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
            key,
            value: value.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

fn home_dir() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string()))
}

/// `$XDG_DATA_HOME/vigil`, falling back to `~/.local/share/vigil`.
fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
        .join("vigil")
}

/// `$XDG_CONFIG_HOME/vigil/config.toml`, falling back to `~/.config`.
pub fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("vigil/config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let c = Config::default();
        c.validate().unwrap();
        assert_eq!(c.tolerance, 0.4);
        assert_eq!(c.timeout_seconds, 5);
        assert_eq!(c.required_consecutive_ok, 3);
        assert_eq!(c.mode, Mode::Debug);
        assert_eq!(c.face_selection, FaceSelection::AnyMatch);
        assert_eq!(c.enroll.record_seconds, 30);
    }

    #[test]
    fn test_parse_full_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
tolerance = 0.35
timeout_seconds = 10
required_consecutive_ok = 4
mode = "monitor"
face_selection = "largest-face"
sampling_interval_seconds = 0.5
camera_device = "/dev/video2"

[actions]
display_off = ["busctl", "--user", "call", "org.gnome.Shell"]

[enroll]
record_seconds = 12
save_faces = false
"#,
        )
        .unwrap();

        let c = Config::from_file(&path).unwrap();
        c.validate().unwrap();
        assert_eq!(c.mode, Mode::Monitor);
        assert_eq!(c.face_selection, FaceSelection::LargestFace);
        assert_eq!(c.camera_device, "/dev/video2");
        assert_eq!(c.actions.display_off[0], "busctl");
        assert_eq!(c.actions.display_on, ActionCommands::default().display_on);
        assert!(!c.enroll.save_faces);

        let s = c.loop_settings();
        assert_eq!(s.timeout, Duration::from_secs(10));
        assert_eq!(s.sampling_interval, Duration::from_millis(500));
        assert_eq!(s.required_consecutive_ok, 4);
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "mode = \"veracrypt\"\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "tolerence = 0.4\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_explicit_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/vigil.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut c = Config::default();
        c.apply_env(env(&[
            ("VIGIL_TOLERANCE", "0.3"),
            ("VIGIL_MODE", "Lockdown"),
            ("VIGIL_FACE_SELECTION", "largest-face"),
            ("VIGIL_TIMEOUT_SECONDS", " 20 "),
            ("VIGIL_REFERENCE_PATH", "/srv/refs.json"),
        ]))
        .unwrap();
        assert_eq!(c.tolerance, 0.3);
        assert_eq!(c.mode, Mode::Lockdown);
        assert_eq!(c.face_selection, FaceSelection::LargestFace);
        assert_eq!(c.timeout_seconds, 20);
        assert_eq!(c.reference_path, PathBuf::from("/srv/refs.json"));
    }

    #[test]
    fn test_env_unparsable_value() {
        let mut c = Config::default();
        let err = c.apply_env(env(&[("VIGIL_REQUIRED_CONSECUTIVE_OK", "three")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { key: "VIGIL_REQUIRED_CONSECUTIVE_OK", .. }));
        let err = c.apply_env(env(&[("VIGIL_MODE", "sleep")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { key: "VIGIL_MODE", .. }));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let cases: Vec<Box<dyn Fn(&mut Config)>> = vec![
            Box::new(|c: &mut Config| c.tolerance = 0.0),
            Box::new(|c: &mut Config| c.tolerance = 2.5),
            Box::new(|c: &mut Config| c.tolerance = f32::NAN),
            Box::new(|c: &mut Config| c.timeout_seconds = 0),
            Box::new(|c: &mut Config| c.required_consecutive_ok = 0),
            Box::new(|c: &mut Config| c.sampling_interval_seconds = 0.0),
            Box::new(|c: &mut Config| c.sampling_interval_seconds = f64::INFINITY),
            Box::new(|c: &mut Config| c.poll_interval_ms = 0),
            Box::new(|c: &mut Config| c.actions.hibernate_system.clear()),
            Box::new(|c: &mut Config| c.enroll.record_seconds = 0),
        ];
        for (i, mutate) in cases.iter().enumerate() {
            let mut c = Config::default();
            mutate(&mut c);
            assert!(
                matches!(c.validate(), Err(ConfigError::Invalid(_))),
                "case {i} should be rejected"
            );
        }
    }
}
