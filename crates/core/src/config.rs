// crates/core/src/config.rs
//! Runtime configuration.
//!
//! Layering: built-in defaults, then an optional TOML file, then
//! `STEMSPLIT_*` environment variables.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_ENV: &str = "STEMSPLIT_CONFIG";

/// Compute device handed to the separator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Auto,
    Cuda,
    Cpu,
}

impl Device {
    /// Resolve `Auto` by probing for an NVIDIA GPU.
    pub fn resolve(self) -> Device {
        self.resolve_with(crate::preflight::gpu_available)
    }

    /// Resolve `Auto` with `gpu_present`; explicit choices are kept and
    /// never probe.
    pub fn resolve_with(self, gpu_present: impl FnOnce() -> bool) -> Device {
        match self {
            Device::Auto if gpu_present() => Device::Cuda,
            Device::Auto => Device::Cpu,
            other => other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Auto => "auto",
            Device::Cuda => "cuda",
            Device::Cpu => "cpu",
        }
    }
}

impl FromStr for Device {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Device::Auto),
            "cuda" | "gpu" => Ok(Device::Cuda),
            "cpu" => Ok(Device::Cpu),
            other => Err(format!("unknown device {other}")),
        }
    }
}

/// Encoding of the stem files written by the separator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    #[default]
    Wav,
    Flac,
    Mp3,
}

impl AudioFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Flac => "flac",
            AudioFormat::Mp3 => "mp3",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            AudioFormat::Wav => "audio/wav",
            AudioFormat::Flac => "audio/flac",
            AudioFormat::Mp3 => "audio/mpeg",
        }
    }

    /// demucs switch selecting this encoding; wav is its default.
    pub fn demucs_flag(&self) -> Option<&'static str> {
        match self {
            AudioFormat::Wav => None,
            AudioFormat::Flac => Some("--flac"),
            AudioFormat::Mp3 => Some("--mp3"),
        }
    }

    /// Format of an existing file, judged by its extension.
    pub fn from_path(path: &Path) -> Option<AudioFormat> {
        path.extension()?.to_str()?.parse().ok()
    }
}

impl FromStr for AudioFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wav" => Ok(AudioFormat::Wav),
            "flac" => Ok(AudioFormat::Flac),
            "mp3" => Ok(AudioFormat::Mp3),
            other => Err(format!("unsupported audio format {other}")),
        }
    }
}

/// Paths of the external programs the collaborators drive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub ffmpeg: String,
    pub yt_dlp: String,
    pub demucs: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".into(),
            yt_dlp: "yt-dlp".into(),
            demucs: "demucs".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_model: String,
    pub available_models: Vec<String>,
    pub device: Device,
    pub output_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub log_dir: PathBuf,
    pub supported_platforms: Vec<String>,
    pub min_free_space_gb: u64,
    pub max_retries: u32,
    pub download_timeout_secs: u64,
    pub keep_original: bool,
    pub cleanup_temp: bool,
    pub output_format: AudioFormat,
    /// Jobs allowed past the admission gate at once.
    pub max_concurrent_jobs: usize,
    pub log_level: String,
    pub tools: ToolPaths,
    pub bind: SocketAddr,
    pub static_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        let app_dir = crate::paths::app_cache_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            default_model: "htdemucs".into(),
            available_models: vec![
                "htdemucs".into(),
                "htdemucs_ft".into(),
                "htdemucs_6s".into(),
                "mdx_extra".into(),
            ],
            device: Device::Auto,
            output_dir: PathBuf::from("output"),
            temp_dir: app_dir.join("temp"),
            log_dir: app_dir.join("logs"),
            supported_platforms: vec![
                "youtube.com".into(),
                "youtu.be".into(),
                "soundcloud.com".into(),
                "m.soundcloud.com".into(),
            ],
            min_free_space_gb: 2,
            max_retries: 3,
            download_timeout_secs: 30,
            keep_original: true,
            cleanup_temp: true,
            output_format: AudioFormat::Wav,
            max_concurrent_jobs: 2,
            log_level: "info".into(),
            tools: ToolPaths::default(),
            bind: SocketAddr::from(([127, 0, 0, 1], 5000)),
            static_dir: None,
        }
    }
}

impl Config {
    /// Load configuration from `path` (or `$STEMSPLIT_CONFIG`), then apply
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env_path = std::env::var(CONFIG_ENV).ok().map(PathBuf::from);
        let mut config = match path.map(Path::to_path_buf).or(env_path) {
            Some(p) => Self::from_file(&p)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&raw).map_err(|message| ConfigError::Malformed {
            path: path.to_path_buf(),
            message,
        })
    }

    pub fn from_toml(raw: &str) -> Result<Self, String> {
        toml::from_str(raw).map_err(|e| e.to_string())
    }

    /// Apply `STEMSPLIT_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("STEMSPLIT_DEFAULT_MODEL") {
            self.default_model = v;
        }
        if let Some(v) = lookup("STEMSPLIT_AVAILABLE_MODELS") {
            self.available_models = split_list(&v);
        }
        if let Some(v) = lookup("STEMSPLIT_SUPPORTED_PLATFORMS") {
            self.supported_platforms = split_list(&v);
        }
        if let Some(v) = lookup("STEMSPLIT_OUTPUT_DIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("STEMSPLIT_TEMP_DIR") {
            self.temp_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("STEMSPLIT_LOG_DIR") {
            self.log_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("STEMSPLIT_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("STEMSPLIT_STATIC_DIR") {
            self.static_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("STEMSPLIT_FFMPEG") {
            self.tools.ffmpeg = v;
        }
        if let Some(v) = lookup("STEMSPLIT_YT_DLP") {
            self.tools.yt_dlp = v;
        }
        if let Some(v) = lookup("STEMSPLIT_DEMUCS") {
            self.tools.demucs = v;
        }
        parse_into(&lookup, "STEMSPLIT_DEVICE", &mut self.device)?;
        parse_into(&lookup, "STEMSPLIT_OUTPUT_FORMAT", &mut self.output_format)?;
        parse_into(&lookup, "STEMSPLIT_MIN_FREE_SPACE_GB", &mut self.min_free_space_gb)?;
        parse_into(&lookup, "STEMSPLIT_MAX_RETRIES", &mut self.max_retries)?;
        parse_into(&lookup, "STEMSPLIT_DOWNLOAD_TIMEOUT_SECS", &mut self.download_timeout_secs)?;
        parse_into(&lookup, "STEMSPLIT_KEEP_ORIGINAL", &mut self.keep_original)?;
        parse_into(&lookup, "STEMSPLIT_CLEANUP_TEMP", &mut self.cleanup_temp)?;
        parse_into(&lookup, "STEMSPLIT_MAX_CONCURRENT_JOBS", &mut self.max_concurrent_jobs)?;
        parse_into(&lookup, "STEMSPLIT_BIND", &mut self.bind)?;

        let mut port: Option<u16> = None;
        parse_into_opt(&lookup, "STEMSPLIT_PORT", &mut port)?;
        if let Some(port) = port {
            self.bind.set_port(port);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.is_known_model(&self.default_model) {
            return Err(ConfigError::UnknownDefaultModel(self.default_model.clone()));
        }
        Ok(())
    }

    pub fn is_known_model(&self, model: &str) -> bool {
        self.available_models.iter().any(|m| m == model)
    }

    /// Admission limit, never below one.
    pub fn admission_limit(&self) -> usize {
        self.max_concurrent_jobs.max(1)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_into<F, T>(lookup: &F, key: &str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        *slot = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            key: key.to_string(),
            value: raw.clone(),
        })?;
    }
    Ok(())
}

fn parse_into_opt<F, T>(lookup: &F, key: &str, slot: &mut Option<T>) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(raw) = lookup(key) {
        let parsed = raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
            key: key.to_string(),
            value: raw.clone(),
        })?;
        *slot = Some(parsed);
    }
    Ok(())
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
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.default_model, "htdemucs");
        assert_eq!(config.available_models.len(), 4);
        assert!(config.supported_platforms.contains(&"youtu.be".to_string()));
        assert_eq!(config.min_free_space_gb, 2);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.bind.port(), 5000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("STEMSPLIT_DEFAULT_MODEL", "htdemucs_ft"),
                ("STEMSPLIT_MAX_CONCURRENT_JOBS", "4"),
                ("STEMSPLIT_SUPPORTED_PLATFORMS", "youtube.com, bandcamp.com"),
                ("STEMSPLIT_DEVICE", "cpu"),
                ("STEMSPLIT_PORT", "8080"),
            ]))
            .unwrap();
        assert_eq!(config.default_model, "htdemucs_ft");
        assert_eq!(config.max_concurrent_jobs, 4);
        assert_eq!(config.supported_platforms, vec!["youtube.com", "bandcamp.com"]);
        assert_eq!(config.device, Device::Cpu);
        assert_eq!(config.bind.port(), 8080);
    }

    #[test]
    fn test_invalid_env_value() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("STEMSPLIT_MAX_RETRIES", "lots")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref key, .. } if key == "STEMSPLIT_MAX_RETRIES"));
    }

    #[test]
    fn test_from_toml_partial() {
        let config = Config::from_toml(
            r#"
            default_model = "mdx_extra"
            max_concurrent_jobs = 1
            keep_original = false

            [tools]
            demucs = "/opt/demucs/bin/demucs"
            "#,
        )
        .unwrap();
        assert_eq!(config.default_model, "mdx_extra");
        assert_eq!(config.max_concurrent_jobs, 1);
        assert!(!config.keep_original);
        assert_eq!(config.tools.demucs, "/opt/demucs/bin/demucs");
        assert_eq!(config.tools.ffmpeg, "ffmpeg");
        assert_eq!(config.max_retries, 3);
    }

    #[test]
    fn test_output_format_from_toml_and_env() {
        let config = Config::from_toml(r#"output_format = "flac""#).unwrap();
        assert_eq!(config.output_format, AudioFormat::Flac);
        assert_eq!(Config::default().output_format, AudioFormat::Wav);

        let mut config = Config::default();
        config.apply_env(env(&[("STEMSPLIT_OUTPUT_FORMAT", "MP3")])).unwrap();
        assert_eq!(config.output_format, AudioFormat::Mp3);

        let err = config
            .apply_env(env(&[("STEMSPLIT_OUTPUT_FORMAT", "ogg")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref key, .. } if key == "STEMSPLIT_OUTPUT_FORMAT"));
        assert!(Config::from_toml(r#"output_format = "ogg""#).is_err());
    }

    #[test]
    fn test_device_resolution() {
        assert_eq!(Device::Auto.resolve_with(|| true), Device::Cuda);
        assert_eq!(Device::Auto.resolve_with(|| false), Device::Cpu);
        assert_eq!(
            Device::Cpu.resolve_with(|| panic!("explicit device must not probe")),
            Device::Cpu
        );
        assert_eq!(Device::Cuda.resolve_with(|| false), Device::Cuda);
        assert_eq!("GPU".parse::<Device>(), Ok(Device::Cuda));
    }

    #[test]
    fn test_audio_format_properties() {
        assert_eq!(AudioFormat::Wav.demucs_flag(), None);
        assert_eq!(AudioFormat::Flac.demucs_flag(), Some("--flac"));
        assert_eq!(AudioFormat::Mp3.extension(), "mp3");
        assert_eq!(AudioFormat::Mp3.content_type(), "audio/mpeg");
        assert_eq!(AudioFormat::from_path(Path::new("a/b_vocals.FLAC")), Some(AudioFormat::Flac));
        assert_eq!(AudioFormat::from_path(Path::new("a/b_vocals")), None);
    }

    #[test]
    fn test_unknown_default_model_rejected() {
        let config = Config {
            default_model: "nope".into(),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownDefaultModel(_))
        ));
    }

    #[test]
    fn test_admission_limit_never_zero() {
        let config = Config {
            max_concurrent_jobs: 0,
            ..Config::default()
        };
        assert_eq!(config.admission_limit(), 1);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stemsplit.toml");
        std::fs::write(&path, "min_free_space_gb = 10\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.min_free_space_gb, 10);

        let missing = Config::from_file(&dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
