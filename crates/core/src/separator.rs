// crates/core/src/separator.rs
//! Separator: runs a pretrained source-separation model over one file.
//!
//! The model is materialized lazily and cached. The cache sits behind its own
//! reload lock (never the registry lock), so two jobs asking for different
//! models serialize their (re)loads instead of racing on the cached handle.
//! Each call keeps its own `Arc<LoadedModel>` for the whole run, so a swap
//! triggered by another job cannot change the model under it.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::config::{AudioFormat, Device};
use crate::error::SeparationError;
use crate::process::stderr_excerpt;
use crate::types::StemMap;

/// Stem layout and audio format a model expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub samplerate: u32,
    pub audio_channels: u16,
    pub sources: Vec<String>,
}

/// Known pretrained models and their stem layouts.
pub fn model_spec(name: &str) -> Option<ModelSpec> {
    let sources: &[&str] = match name {
        "htdemucs" | "htdemucs_ft" | "mdx_extra" | "mdx_extra_q" | "mdx" | "mdx_q" => {
            &["drums", "bass", "other", "vocals"]
        }
        "htdemucs_6s" => &["drums", "bass", "other", "vocals", "guitar", "piano"],
        _ => return None,
    };
    Some(ModelSpec {
        name: name.to_string(),
        samplerate: 44_100,
        audio_channels: 2,
        sources: sources.iter().map(|s| s.to_string()).collect(),
    })
}

/// A materialized model, ready for inference on `device`.
#[derive(Debug)]
pub struct LoadedModel {
    pub spec: ModelSpec,
    pub device: Device,
    pub loaded_at: Instant,
}

/// Materializes a named model.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, name: &str, device: Device) -> Result<LoadedModel, SeparationError>;
}

/// Lazily loaded, single-slot model cache.
///
/// Asking for a different model name than the cached one drops the cached
/// model and forces a reload.
pub struct ModelCache {
    loader: Box<dyn ModelLoader>,
    device: Device,
    slot: Mutex<Option<Arc<LoadedModel>>>,
    loads: AtomicU64,
}

impl ModelCache {
    pub fn new(loader: Box<dyn ModelLoader>, device: Device) -> Self {
        Self {
            loader,
            device,
            slot: Mutex::new(None),
            loads: AtomicU64::new(0),
        }
    }

    /// Return the cached model if its name matches, loading it otherwise.
    pub async fn get(&self, name: &str) -> Result<Arc<LoadedModel>, SeparationError> {
        let mut slot = self.slot.lock().await;
        if let Some(model) = slot.as_ref() {
            if model.spec.name == name {
                return Ok(Arc::clone(model));
            }
            tracing::info!(from = %model.spec.name, to = name, "Model changed, forcing reload");
            *slot = None;
        }

        tracing::info!(model = name, device = self.device.as_str(), "Loading model");
        let model = Arc::new(self.loader.load(name, self.device).await.map_err(|e| {
            tracing::error!(model = name, error = %e, "Failed to load model");
            e
        })?);
        self.loads.fetch_add(1, Ordering::Relaxed);
        tracing::info!(model = name, "Model loaded successfully");
        *slot = Some(Arc::clone(&model));
        Ok(model)
    }

    /// Name of the cached model, if any.
    pub async fn current(&self) -> Option<String> {
        self.slot.lock().await.as_ref().map(|m| m.spec.name.clone())
    }

    /// Number of times a model has been materialized.
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn device(&self) -> Device {
        self.device
    }
}

/// Splits one audio file into stems.
#[async_trait]
pub trait Separator: Send + Sync {
    /// Separate `input` with `model`, writing one file per stem under
    /// `output_dir`. Returns stem name → produced file.
    async fn separate(
        &self,
        model: &str,
        input: &Path,
        output_dir: &Path,
    ) -> Result<StemMap, SeparationError>;
}

/// Loader for the demucs CLI: resolves the stem layout and checks that the
/// backend starts.
pub struct DemucsLoader {
    program: String,
}

impl DemucsLoader {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl ModelLoader for DemucsLoader {
    async fn load(&self, name: &str, device: Device) -> Result<LoadedModel, SeparationError> {
        let spec = model_spec(name).ok_or_else(|| SeparationError::ModelLoad {
            model: name.to_string(),
            reason: "unknown model".to_string(),
        })?;

        let output = Command::new(&self.program)
            .arg("--help")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| SeparationError::ModelLoad {
                model: name.to_string(),
                reason: format!("cannot start {}: {e}", self.program),
            })?;
        if !output.status.success() {
            return Err(SeparationError::ModelLoad {
                model: name.to_string(),
                reason: stderr_excerpt(&output.stderr),
            });
        }

        Ok(LoadedModel {
            spec,
            device,
            loaded_at: Instant::now(),
        })
    }
}

/// Separator backed by ffmpeg (input conditioning) and the demucs CLI
/// (inference).
pub struct DemucsSeparator {
    demucs: String,
    ffmpeg: String,
    format: AudioFormat,
    cache: ModelCache,
}

impl DemucsSeparator {
    /// `device` is resolved here, so `Auto` probes for a GPU once.
    pub fn new(demucs: impl Into<String>, ffmpeg: impl Into<String>, device: Device) -> Self {
        let demucs = demucs.into();
        let device = device.resolve();
        tracing::info!(device = device.as_str(), "Using device");
        Self {
            cache: ModelCache::new(Box::new(DemucsLoader::new(demucs.clone())), device),
            demucs,
            ffmpeg: ffmpeg.into(),
            format: AudioFormat::Wav,
        }
    }

    pub fn with_format(mut self, format: AudioFormat) -> Self {
        self.format = format;
        self
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    /// Resample to the model rate and normalize the channel layout.
    /// ffmpeg's `-ac 2` duplicates a mono input into both channels.
    async fn condition_input(
        &self,
        spec: &ModelSpec,
        input: &Path,
        prepared: &Path,
    ) -> Result<(), SeparationError> {
        let output = Command::new(&self.ffmpeg)
            .args(["-hide_banner", "-loglevel", "error", "-y", "-i"])
            .arg(input)
            .args(["-vn", "-ar", &spec.samplerate.to_string()])
            .args(["-ac", &spec.audio_channels.to_string()])
            .args(["-c:a", "pcm_f32le"])
            .arg(prepared)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|source| SeparationError::Spawn {
                tool: self.ffmpeg.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(SeparationError::Failed {
                tool: self.ffmpeg.clone(),
                code: output.status.code(),
                stderr: stderr_excerpt(&output.stderr),
            });
        }
        Ok(())
    }

    fn inference_command(&self, model: &LoadedModel, prepared: &Path, output_dir: &Path) -> Command {
        let mut cmd = Command::new(&self.demucs);
        cmd.args(["-n", &model.spec.name, "-d", model.device.as_str()])
            .arg("-o")
            .arg(output_dir)
            .args(["--filename", "{stem}.{ext}"]);
        if let Some(flag) = self.format.demucs_flag() {
            cmd.arg(flag);
        }
        cmd.arg(prepared).stdin(Stdio::null());
        cmd
    }

    async fn run_inference(
        &self,
        model: &LoadedModel,
        prepared: &Path,
        output_dir: &Path,
    ) -> Result<(), SeparationError> {
        let output = self
            .inference_command(model, prepared, output_dir)
            .output()
            .await
            .map_err(|source| SeparationError::Spawn {
                tool: self.demucs.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(SeparationError::Failed {
                tool: self.demucs.clone(),
                code: output.status.code(),
                stderr: stderr_excerpt(&output.stderr),
            });
        }
        Ok(())
    }
}

/// Where demucs writes a stem with our filename template.
fn stem_output_path(output_dir: &Path, model: &str, stem: &str, format: AudioFormat) -> PathBuf {
    output_dir.join(model).join(format!("{stem}.{}", format.extension()))
}

/// Collect the expected stems, failing on the first one that is missing.
fn collect_stems(
    spec: &ModelSpec,
    output_dir: &Path,
    format: AudioFormat,
) -> Result<StemMap, SeparationError> {
    let mut stems = StemMap::new();
    for stem in &spec.sources {
        let path = stem_output_path(output_dir, &spec.name, stem, format);
        if !path.is_file() {
            return Err(SeparationError::MissingStem {
                stem: stem.clone(),
                path,
            });
        }
        tracing::debug!(stem = %stem, path = %path.display(), "Saved stem");
        stems.insert(stem.clone(), path);
    }
    Ok(stems)
}

#[async_trait]
impl Separator for DemucsSeparator {
    async fn separate(
        &self,
        model: &str,
        input: &Path,
        output_dir: &Path,
    ) -> Result<StemMap, SeparationError> {
        if !input.is_file() {
            return Err(SeparationError::MissingInput(input.to_path_buf()));
        }
        let loaded = self.cache.get(model).await?;

        tokio::fs::create_dir_all(output_dir)
            .await
            .map_err(|e| SeparationError::io(output_dir, e))?;

        let t0 = Instant::now();
        tracing::info!(
            input = %input.display(),
            model = %loaded.spec.name,
            samplerate = loaded.spec.samplerate,
            format = self.format.extension(),
            "Separating"
        );

        let prepared = output_dir.join("input.wav");
        self.condition_input(&loaded.spec, input, &prepared).await?;
        let result = self.run_inference(&loaded, &prepared, output_dir).await;
        if let Err(e) = tokio::fs::remove_file(&prepared).await {
            tracing::debug!(path = %prepared.display(), error = %e, "Could not remove conditioned input");
        }
        result?;

        let stems = collect_stems(&loaded.spec, output_dir, self.format)?;
        tracing::info!(
            stems = stems.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Separation complete"
        );
        Ok(stems)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Loader that counts loads and takes a little time, to widen races.
    struct CountingLoader {
        loads: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ModelLoader for CountingLoader {
        async fn load(&self, name: &str, device: Device) -> Result<LoadedModel, SeparationError> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let spec = model_spec(name).ok_or_else(|| SeparationError::ModelLoad {
                model: name.to_string(),
                reason: "unknown model".to_string(),
            })?;
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(LoadedModel {
                spec,
                device,
                loaded_at: Instant::now(),
            })
        }
    }

    fn counting_cache() -> (ModelCache, Arc<AtomicUsize>) {
        let loads = Arc::new(AtomicUsize::new(0));
        let cache = ModelCache::new(
            Box::new(CountingLoader {
                loads: Arc::clone(&loads),
            }),
            Device::Cpu,
        );
        (cache, loads)
    }

    #[test]
    fn test_model_specs() {
        let four = model_spec("htdemucs").unwrap();
        assert_eq!(four.sources, vec!["drums", "bass", "other", "vocals"]);
        assert_eq!(four.samplerate, 44_100);
        assert_eq!(four.audio_channels, 2);

        let six = model_spec("htdemucs_6s").unwrap();
        assert!(six.sources.contains(&"guitar".to_string()));
        assert!(six.sources.contains(&"piano".to_string()));

        assert!(model_spec("not-a-model").is_none());
    }

    #[tokio::test]
    async fn test_cache_loads_once_for_same_model() {
        let (cache, loads) = counting_cache();
        let a = cache.get("htdemucs").await.unwrap();
        let b = cache.get("htdemucs").await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.current().await.as_deref(), Some("htdemucs"));
    }

    #[tokio::test]
    async fn test_model_change_forces_reload() {
        let (cache, loads) = counting_cache();
        let first = cache.get("htdemucs").await.unwrap();
        let second = cache.get("htdemucs_6s").await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
        assert_eq!(cache.current().await.as_deref(), Some("htdemucs_6s"));
        // The earlier caller still holds a consistent model.
        assert_eq!(first.spec.name, "htdemucs");
        assert_eq!(second.spec.name, "htdemucs_6s");

        cache.get("htdemucs").await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 3);
        assert_eq!(cache.load_count(), 3);
    }

    #[tokio::test]
    async fn test_concurrent_requests_for_same_model_load_once() {
        let (cache, loads) = counting_cache();
        let cache = Arc::new(cache);
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            tasks.push(tokio::spawn(async move { cache.get("htdemucs").await.map(|m| m.spec.name.clone()) }));
        }
        for t in tasks {
            assert_eq!(t.await.unwrap().unwrap(), "htdemucs");
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_load_leaves_cache_empty() {
        let (cache, _) = counting_cache();
        cache.get("htdemucs").await.unwrap();
        let err = cache.get("bogus").await.unwrap_err();
        assert!(matches!(err, SeparationError::ModelLoad { .. }));
        assert_eq!(cache.current().await, None);
    }

    #[tokio::test]
    async fn test_separate_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let separator = DemucsSeparator::new("demucs", "ffmpeg", Device::Cpu);
        let err = separator
            .separate("htdemucs", &dir.path().join("missing.wav"), dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, SeparationError::MissingInput(_)));
        assert_eq!(separator.cache().load_count(), 0);
    }

    #[test]
    fn test_collect_stems() {
        let dir = tempfile::tempdir().unwrap();
        let spec = model_spec("htdemucs").unwrap();
        std::fs::create_dir_all(dir.path().join("htdemucs")).unwrap();
        for stem in &spec.sources {
            std::fs::write(stem_output_path(dir.path(), "htdemucs", stem, AudioFormat::Wav), b"RIFF").unwrap();
        }
        let stems = collect_stems(&spec, dir.path(), AudioFormat::Wav).unwrap();
        assert_eq!(stems.len(), 4);
        assert!(stems["vocals"].ends_with("htdemucs/vocals.wav"));

        std::fs::remove_file(stem_output_path(dir.path(), "htdemucs", "bass", AudioFormat::Wav)).unwrap();
        let err = collect_stems(&spec, dir.path(), AudioFormat::Wav).unwrap_err();
        assert!(matches!(err, SeparationError::MissingStem { ref stem, .. } if stem == "bass"));
    }

    #[test]
    fn test_collect_stems_uses_configured_format() {
        let dir = tempfile::tempdir().unwrap();
        let spec = model_spec("htdemucs").unwrap();
        std::fs::create_dir_all(dir.path().join("htdemucs")).unwrap();
        for stem in &spec.sources {
            std::fs::write(stem_output_path(dir.path(), "htdemucs", stem, AudioFormat::Flac), b"fLaC").unwrap();
        }
        let stems = collect_stems(&spec, dir.path(), AudioFormat::Flac).unwrap();
        assert!(stems["drums"].ends_with("htdemucs/drums.flac"));
        // wav files were never produced
        assert!(collect_stems(&spec, dir.path(), AudioFormat::Wav).is_err());
    }

    fn command_args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_inference_command_carries_format_flag() {
        let model = LoadedModel {
            spec: model_spec("htdemucs").unwrap(),
            device: Device::Cpu,
            loaded_at: Instant::now(),
        };
        let input = Path::new("/tmp/in.wav");
        let out = Path::new("/tmp/out");

        let wav = DemucsSeparator::new("demucs", "ffmpeg", Device::Cpu);
        let args = command_args(&wav.inference_command(&model, input, out));
        assert!(!args.iter().any(|a| a == "--flac" || a == "--mp3"));
        assert_eq!(args.last().map(String::as_str), Some("/tmp/in.wav"));

        let mp3 = DemucsSeparator::new("demucs", "ffmpeg", Device::Cpu).with_format(AudioFormat::Mp3);
        let args = command_args(&mp3.inference_command(&model, input, out));
        assert!(args.contains(&"--mp3".to_string()));
        assert!(args.windows(2).any(|w| w == ["-n", "htdemucs"]));
    }
}
