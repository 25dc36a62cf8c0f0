//! Engine fallback tiers
//!
//! Each tier names where the engine's model files come from. Attempts walk the
//! list in order and stay on the last tier once it is reached.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const JSDELIVR_BASE: &str = "https://cdn.jsdelivr.net/gh/tesseract-ocr/tessdata_fast@main";
const GITHUB_BASE: &str = "https://raw.githubusercontent.com/tesseract-ocr/tessdata_fast/main";

/// One fallback configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerTier {
    pub name: String,
    /// Recognition model for the configured language
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_asset_path: Option<String>,
    /// Orientation/script model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub core_asset_path: Option<String>,
    /// Base the language model is taken from when no worker asset is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lang_data_path: Option<String>,
    /// Engine variables passed through verbatim
    #[serde(default)]
    pub extra_options: BTreeMap<String, String>,
}

impl WorkerTier {
    /// A tier with no paths, using whatever data the engine ships with
    pub fn bundled(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            worker_asset_path: None,
            core_asset_path: None,
            lang_data_path: None,
            extra_options: BTreeMap::new(),
        }
    }

    /// Asset URIs that need a reachability probe before committing
    pub fn remote_assets(&self) -> Vec<&str> {
        [&self.worker_asset_path, &self.core_asset_path]
            .into_iter()
            .flatten()
            .map(String::as_str)
            .filter(|uri| is_remote(uri))
            .collect()
    }

    /// True when the tier carries no asset paths at all
    pub fn is_bundled(&self) -> bool {
        self.worker_asset_path.is_none()
            && self.core_asset_path.is_none()
            && self.lang_data_path.is_none()
    }
}

/// Whether `uri` is fetched over the network
pub fn is_remote(uri: &str) -> bool {
    reqwest::Url::parse(uri)
        .map(|url| matches!(url.scheme(), "http" | "https"))
        .unwrap_or(false)
}

/// Tier used for a given number of failed attempts
pub fn tier_index(retry_count: u32, tier_count: usize) -> usize {
    (retry_count as usize).min(tier_count.saturating_sub(1))
}

/// Built-in fallback list: self-hosted files, two CDN mirrors, engine default
pub fn default_tiers() -> Vec<WorkerTier> {
    let digits_only = BTreeMap::from([(
        "tessedit_char_whitelist".to_string(),
        "0123456789 ".to_string(),
    )]);

    let cdn = |name: &str, base: &str| WorkerTier {
        name: name.to_string(),
        worker_asset_path: Some(format!("{base}/eng.traineddata")),
        core_asset_path: Some(format!("{base}/osd.traineddata")),
        lang_data_path: Some(base.to_string()),
        extra_options: digits_only.clone(),
    };

    vec![
        WorkerTier {
            name: "local-assets".to_string(),
            worker_asset_path: Some("assets/tessdata/eng.traineddata".to_string()),
            core_asset_path: Some("assets/tessdata/osd.traineddata".to_string()),
            lang_data_path: None,
            extra_options: digits_only.clone(),
        },
        cdn("cdn-jsdelivr", JSDELIVR_BASE),
        cdn("cdn-github", GITHUB_BASE),
        WorkerTier::bundled("bundled-default"),
    ]
}
