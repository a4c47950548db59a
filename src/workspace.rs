//! The operations offered to a request layer: upload, incremental statistics,
//! diff, paging and export.
//!
//! A [`Workspace`] is `Send + Sync`. Every operation takes `&self`, runs to
//! completion on the calling thread, and leaves the caches untouched when it
//! fails, so a host can dispatch each request onto its own worker thread.

use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    align,
    cache::SourceCache,
    condition::{Condition, DiffMode},
    config::EngineConfig,
    error::{EngineError, EngineResult},
    ids::{ResultId, SourceId},
    results::{Page, ResultStore},
    source::{DEFAULT_SHEET, SourceFormat, SourceParser},
    table::{Table, TablePreview},
};

pub use crate::align::DiffStats;

#[derive(Debug, Clone, Serialize)]
pub struct UploadSummary {
    pub source_id: SourceId,
    pub format: SourceFormat,
    pub sheet_names: Vec<String>,
    pub previews: BTreeMap<String, TablePreview>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DiffSummary {
    pub result_id: ResultId,
    pub total_rows: usize,
    pub preview: TablePreview,
}

/// Wire shape of a statistics or diff request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffRequest {
    pub source_id_a: SourceId,
    pub sheet_a: String,
    pub source_id_b: SourceId,
    pub sheet_b: String,
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub mode: DiffMode,
}

pub struct Workspace {
    config: EngineConfig,
    parser: SourceParser,
    sources: SourceCache,
    results: ResultStore,
}

impl Default for Workspace {
    fn default() -> Self {
        let config = EngineConfig::default();
        Self {
            parser: SourceParser::default(),
            sources: SourceCache::new(config.source_cache_bytes),
            results: ResultStore::new(config.result_cache_bytes),
            config,
        }
    }
}

impl Workspace {
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let parser = SourceParser::new(config.fallback_encoding()?);
        Ok(Self {
            parser,
            sources: SourceCache::new(config.source_cache_bytes),
            results: ResultStore::new(config.result_cache_bytes),
            config,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Parses every sheet of an upload, caches the bytes and the tables, and
    /// returns a bounded preview per sheet.
    pub fn upload(&self, bytes: Vec<u8>, filename: &str) -> EngineResult<UploadSummary> {
        let format = SourceFormat::from_filename(filename)?;
        let sheets = self.parser.parse_all(&bytes, format)?;

        let source_id = SourceId::generate();
        self.sources.put(source_id, format, bytes);

        let mut sheet_names = Vec::with_capacity(sheets.len());
        let mut previews = BTreeMap::new();
        for (name, table) in sheets {
            previews.insert(name.clone(), table.preview(self.config.upload_preview_rows));
            self.sources.put_table(source_id, &name, table);
            sheet_names.push(name);
        }
        info!(
            "Uploaded '{filename}' as {format} source {source_id} with {} sheet(s)",
            sheet_names.len()
        );
        Ok(UploadSummary {
            source_id,
            format,
            sheet_names,
            previews,
        })
    }

    /// Read-through lookup: a table miss with cached raw bytes re-parses the
    /// sheet and publishes it. `None` when the source or sheet is unknown.
    fn load_table(&self, source_id: SourceId, sheet: &str) -> EngineResult<Option<Arc<Table>>> {
        if let Some(table) = self.sources.get_table(source_id, sheet) {
            return Ok(Some(table));
        }
        let Some(raw) = self.sources.get_raw(source_id) else {
            return Ok(None);
        };
        if !raw.format.is_workbook() && sheet != DEFAULT_SHEET {
            return Ok(None);
        }
        debug!("Table cache miss for {source_id}/{sheet}; re-parsing");
        match self.parser.parse(&raw.bytes, raw.format, Some(sheet), None) {
            Ok(table) => Ok(Some(self.sources.put_table(source_id, sheet, table))),
            Err(EngineError::NotFound { kind: "sheet", .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn require_table(&self, source_id: SourceId, sheet: &str) -> EngineResult<Arc<Table>> {
        match self.load_table(source_id, sheet)? {
            Some(table) => Ok(table),
            None if self.sources.contains(source_id) => {
                Err(EngineError::not_found("sheet", format!("{source_id}/{sheet}")))
            }
            None => Err(EngineError::not_found("source", source_id)),
        }
    }

    /// A parsed sheet of an uploaded source.
    pub fn table(&self, source_id: SourceId, sheet: &str) -> EngineResult<Arc<Table>> {
        self.require_table(source_id, sheet)
    }

    /// Per-condition running counts. Unknown sources or sheets yield zeros
    /// rather than an error so callers can poll before both sides exist.
    pub fn diff_stats(&self, request: &DiffRequest) -> EngineResult<DiffStats> {
        let left = self.load_table(request.source_id_a, &request.sheet_a)?;
        let right = self.load_table(request.source_id_b, &request.sheet_b)?;
        match (left, right) {
            (Some(left), Some(right)) => Ok(align::diff_stats(&left, &right, &request.conditions)),
            _ => {
                debug!("Statistics requested before both sources are available");
                Ok(DiffStats::zeroed(request.conditions.len()))
            }
        }
    }

    /// Runs the diff, stores the result and returns its id, size and preview.
    pub fn run_diff(&self, request: &DiffRequest) -> EngineResult<DiffSummary> {
        let left = self.require_table(request.source_id_a, &request.sheet_a)?;
        let right = self.require_table(request.source_id_b, &request.sheet_b)?;
        let table = align::run_diff(&left, &right, &request.conditions, request.mode)?.into_table();

        let total_rows = table.row_count();
        let preview = table.preview(self.config.result_preview_rows);
        let result_id = self.results.store(table);
        Ok(DiffSummary {
            result_id,
            total_rows,
            preview,
        })
    }

    pub fn get_page(&self, result_id: ResultId, page: usize, size: usize) -> EngineResult<Page> {
        self.results.page(result_id, page, size)
    }

    pub fn export(&self, result_id: ResultId) -> EngineResult<Vec<u8>> {
        self.results.export(result_id)
    }

    pub fn result_table(&self, result_id: ResultId) -> EngineResult<Arc<Table>> {
        self.results.get(result_id)
    }

    pub fn evict_source(&self, source_id: SourceId) -> bool {
        self.sources.evict(source_id)
    }

    pub fn evict_result(&self, result_id: ResultId) -> bool {
        self.results.evict(result_id)
    }
}
