//! Tesseract command-line backend
//!
//! Each recognition writes the image to a temp file and runs the engine with
//! TSV output. Word rows are joined into text and their confidences averaged.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info};

use super::assets::{join_asset, stage_key, AssetCache};
use super::{BackendOptions, OcrBackend, OcrBackendFactory, Recognition};

/// Page segmentation mode: a single uniform block of text
const PAGE_SEGMENTATION_MODE: &str = "6";
/// Orientation/script model file name
const CORE_MODEL_FILE: &str = "osd.traineddata";

/// Builds [`TesseractBackend`]s for a tier
pub struct TesseractFactory {
    binary: PathBuf,
    cache: Arc<AssetCache>,
}

impl TesseractFactory {
    pub fn new(binary: PathBuf, cache: Arc<AssetCache>) -> Self {
        Self { binary, cache }
    }

    async fn verify_binary(&self) -> Result<String> {
        let output = Command::new(&self.binary)
            .arg("--version")
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.binary.display()))?;

        if !output.status.success() {
            return Err(anyhow!(
                "{} --version exited with {}",
                self.binary.display(),
                output.status
            ));
        }

        // Older releases print the version on stderr
        let text = if output.stdout.is_empty() {
            output.stderr
        } else {
            output.stdout
        };
        Ok(String::from_utf8_lossy(&text)
            .lines()
            .next()
            .unwrap_or_default()
            .trim()
            .to_string())
    }

    /// Stage the tier's model files; `None` means the engine's own data
    async fn prepare_tessdata(
        &self,
        language: &str,
        options: &BackendOptions,
    ) -> Result<Option<PathBuf>> {
        let Some(lang_source) = language_source(options, language) else {
            if options.core_asset_path.is_some() {
                anyhow::bail!("tier provides a core model but no {language} language model");
            }
            return Ok(None);
        };

        let key = stage_key(&[
            Some(lang_source.as_str()),
            options.core_asset_path.as_deref(),
            Some(language),
        ]);
        let dir = self.cache.tessdata_dir(&key);

        options.report("loading language data", 0.0);
        self.cache
            .stage(&lang_source, &dir.join(format!("{language}.traineddata")), options)
            .await
            .with_context(|| format!("Failed to stage language model from {lang_source}"))?;

        if let Some(core) = &options.core_asset_path {
            self.cache
                .stage(core, &dir.join(CORE_MODEL_FILE), options)
                .await
                .with_context(|| format!("Failed to stage core model from {core}"))?;
        }
        options.report("loading language data", 1.0);

        Ok(Some(dir))
    }
}

/// Where the language model comes from: the worker asset, else the data base
pub fn language_source(options: &BackendOptions, language: &str) -> Option<String> {
    options.worker_asset_path.clone().or_else(|| {
        options
            .lang_data_path
            .as_deref()
            .map(|base| join_asset(base, &format!("{language}.traineddata")))
    })
}

#[async_trait]
impl OcrBackendFactory for TesseractFactory {
    async fn create(
        &self,
        language: &str,
        worker_count: usize,
        options: BackendOptions,
    ) -> Result<Arc<dyn OcrBackend>> {
        options.report("initializing tesseract", 0.0);
        let version = self.verify_binary().await?;
        let tessdata_dir = self.prepare_tessdata(language, &options).await?;

        info!(
            %version,
            language,
            workers = worker_count,
            tessdata = ?tessdata_dir,
            "tesseract ready"
        );
        options.report("initialized tesseract", 1.0);

        Ok(Arc::new(TesseractBackend {
            binary: self.binary.clone(),
            tessdata_dir,
            language: language.to_string(),
            variables: options.extra_options.clone().into_iter().collect(),
            permits: Semaphore::new(worker_count.max(1)),
            terminated: AtomicBool::new(false),
            options,
        }))
    }
}

/// A configured engine invocation
pub struct TesseractBackend {
    binary: PathBuf,
    tessdata_dir: Option<PathBuf>,
    language: String,
    variables: Vec<(String, String)>,
    /// Bounds concurrent engine processes
    permits: Semaphore,
    terminated: AtomicBool,
    options: BackendOptions,
}

impl TesseractBackend {
    fn command_args(&self, input: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![input.into(), "stdout".into()];
        if let Some(dir) = &self.tessdata_dir {
            args.push("--tessdata-dir".into());
            args.push(dir.into());
        }
        args.push("-l".into());
        args.push(self.language.clone().into());
        args.push("--psm".into());
        args.push(PAGE_SEGMENTATION_MODE.into());
        for (key, value) in &self.variables {
            args.push("-c".into());
            args.push(format!("{key}={value}").into());
        }
        args.push("tsv".into());
        args
    }
}

#[async_trait]
impl OcrBackend for TesseractBackend {
    async fn recognize(&self, image: &[u8]) -> Result<Recognition> {
        if self.terminated.load(Ordering::SeqCst) {
            anyhow::bail!("tesseract backend terminated");
        }
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| anyhow!("tesseract backend terminated"))?;

        self.options.report("recognizing text", 0.0);

        let input = NamedTempFile::with_suffix(".png")?;
        tokio::fs::write(input.path(), image)
            .await
            .context("Failed to write image for tesseract")?;

        let output = Command::new(&self.binary)
            .args(self.command_args(input.path()))
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.binary.display()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!("Tesseract failed: {}", stderr.trim()));
        }

        let recognition = parse_tsv(&String::from_utf8_lossy(&output.stdout));
        debug!(
            text = %recognition.text,
            confidence = recognition.confidence,
            "tesseract result"
        );
        self.options.report("recognizing text", 1.0);
        Ok(recognition)
    }

    fn terminate(&self) {
        if !self.terminated.swap(true, Ordering::SeqCst) {
            self.permits.close();
            debug!("tesseract backend terminated");
        }
    }
}

/// Parse TSV output: words grouped into lines, confidence averaged over words
pub fn parse_tsv(tsv: &str) -> Recognition {
    let mut lines: Vec<Vec<&str>> = Vec::new();
    let mut current_line: Option<(&str, &str, &str)> = None;
    let mut conf_sum = 0.0f32;
    let mut word_count = 0usize;

    for row in tsv.lines().skip(1) {
        // level, page, block, par, line, word, left, top, width, height, conf, text
        let fields: Vec<&str> = row.split('\t').collect();
        if fields.len() < 12 || fields[0] != "5" {
            continue;
        }

        let conf: f32 = fields[10].trim().parse().unwrap_or(-1.0);
        let text = fields[11].trim();
        if conf < 0.0 || text.is_empty() {
            continue;
        }

        let line_id = (fields[2], fields[3], fields[4]);
        if current_line != Some(line_id) {
            lines.push(Vec::new());
            current_line = Some(line_id);
        }
        if let Some(words) = lines.last_mut() {
            words.push(text);
        }
        conf_sum += conf;
        word_count += 1;
    }

    let text = lines
        .iter()
        .map(|words| words.join(" "))
        .collect::<Vec<_>>()
        .join("\n");
    let confidence = if word_count > 0 {
        conf_sum / word_count as f32
    } else {
        0.0
    };

    Recognition { text, confidence }
}
