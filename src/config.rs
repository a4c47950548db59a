use std::{fs::File, path::Path};

use anyhow::{Context, Result, anyhow};
use encoding_rs::Encoding;
use serde::{Deserialize, Serialize};

pub const DEFAULT_UPLOAD_PREVIEW_ROWS: usize = 50;
pub const DEFAULT_RESULT_PREVIEW_ROWS: usize = 1000;
pub const DEFAULT_FALLBACK_ENCODING: &str = "gbk";

/// Engine settings, loadable from YAML. Unset cache capacities mean entries
/// live until they are evicted explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub upload_preview_rows: usize,
    pub result_preview_rows: usize,
    pub fallback_encoding: String,
    pub source_cache_bytes: Option<usize>,
    pub result_cache_bytes: Option<usize>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            upload_preview_rows: DEFAULT_UPLOAD_PREVIEW_ROWS,
            result_preview_rows: DEFAULT_RESULT_PREVIEW_ROWS,
            fallback_encoding: DEFAULT_FALLBACK_ENCODING.to_string(),
            source_cache_bytes: None,
            result_cache_bytes: None,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let config: EngineConfig =
            serde_yaml::from_reader(file).with_context(|| format!("Parsing config {path:?}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.fallback_encoding()?;
        if self.result_preview_rows == 0 {
            return Err(anyhow!("result_preview_rows must be at least 1"));
        }
        Ok(())
    }

    pub fn fallback_encoding(&self) -> Result<&'static Encoding> {
        Encoding::for_label(self.fallback_encoding.trim().as_bytes()).ok_or_else(|| {
            anyhow!(
                "Unknown fallback encoding '{}'",
                self.fallback_encoding
            )
        })
    }
}
