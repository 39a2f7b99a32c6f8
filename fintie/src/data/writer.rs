//! Artifact writer.
//!
//! Serializes a [`FetchResult`] to JSON or CSV and moves it into place
//! atomically: bytes go to a temp file in the target directory which is then
//! renamed without clobbering. A partially written artifact is never visible
//! under its final name.

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use fintie_common::{Error, Result, ResultExt};

use super::request::{ArtifactFormat, Category};
use super::symbol::Symbol;
use super::{FetchResult, Table};

/// Directory name for artifacts not tied to one instrument.
const MARKET_DIR: &str = "market";

/// Give up on unique names after this many collisions.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Writes fetch results under a root directory.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
}

impl ArtifactWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<category>/<symbol or "market">`
    pub fn artifact_dir(&self, category: Category, symbol: Option<&Symbol>) -> PathBuf {
        let owner = symbol.map_or_else(|| MARKET_DIR.to_string(), Symbol::dotted);
        self.root.join(category.as_str()).join(owner)
    }

    /// File stem: `<symbol>-<category>[-<tag>]-<YYYYmmddHHMMSS>`.
    pub fn artifact_stem(
        category: Category,
        symbol: Option<&Symbol>,
        tag: Option<&str>,
        captured_at: NaiveDateTime,
    ) -> String {
        let owner = symbol.map_or_else(|| MARKET_DIR.to_string(), Symbol::dotted);
        let mut parts = vec![owner, category.as_str().to_string()];
        if let Some(tag) = tag.filter(|t| !t.is_empty()) {
            parts.push(sanitize_file_name(tag));
        }
        parts.push(captured_at.format("%Y%m%d%H%M%S").to_string());
        parts.join("-")
    }

    /// Persist a result in the category's format.
    pub fn persist(
        &self,
        category: Category,
        symbol: Option<&Symbol>,
        result: &FetchResult,
        captured_at: NaiveDateTime,
    ) -> Result<PathBuf> {
        self.persist_tagged(category, symbol, None, result, captured_at)
    }

    /// Persist a result with an extra tag (variant, trading day) in the name.
    pub fn persist_tagged(
        &self,
        category: Category,
        symbol: Option<&Symbol>,
        tag: Option<&str>,
        result: &FetchResult,
        captured_at: NaiveDateTime,
    ) -> Result<PathBuf> {
        let format = category.artifact_format();
        let bytes = match format {
            ArtifactFormat::Json => to_pretty_json(&result.to_json())?,
            ArtifactFormat::Csv => to_csv(result)?,
        };

        let dir = self.artifact_dir(category, symbol);
        let stem = Self::artifact_stem(category, symbol, tag, captured_at);
        let path = write_atomic(&dir, &stem, format.extension(), &bytes)?;

        info!(
            category = %category,
            path = %path.display(),
            bytes = bytes.len(),
            "Artifact written"
        );
        Ok(path)
    }

    /// Store a downloaded file (announcement PDF etc.) under the category
    /// directory, keeping the given name.
    pub fn persist_raw(
        &self,
        category: Category,
        symbol: Option<&Symbol>,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf> {
        let file_name = sanitize_file_name(file_name);
        let (stem, extension) = match file_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), ext.to_string()),
            _ => (file_name.clone(), String::new()),
        };

        let dir = self.artifact_dir(category, symbol);
        let path = write_atomic(&dir, &stem, &extension, bytes)?;

        info!(
            category = %category,
            path = %path.display(),
            bytes = bytes.len(),
            "Raw file written"
        );
        Ok(path)
    }
}

// ============================================================================
// Serialization
// ============================================================================

/// Four-space indented JSON; non-ASCII text is written as-is.
fn to_pretty_json(value: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut serializer)?;
    buf.push(b'\n');
    Ok(buf)
}

fn to_csv(result: &FetchResult) -> Result<Vec<u8>> {
    let table = match result {
        FetchResult::Table(table) => table.clone(),
        FetchResult::Record(record) => Table::from_records(std::iter::once(record)),
    };

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(row.iter().map(csv_cell))?;
    }

    writer
        .into_inner()
        .map_err(|e| Error::Internal(format!("flushing CSV buffer: {e}")))
}

fn csv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ============================================================================
// Atomic Placement
// ============================================================================

/// Write `bytes` to `<dir>/<stem>.<ext>`, or `<stem>-N.<ext>` if taken.
fn write_atomic(dir: &Path, stem: &str, extension: &str, bytes: &[u8]) -> Result<PathBuf> {
    fs::create_dir_all(dir).context(format!("creating {}", dir.display()))?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".fintie-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .context(format!("creating temp file in {}", dir.display()))?;
    tmp.write_all(bytes).context("writing artifact")?;
    tmp.as_file().sync_all().context("syncing artifact")?;

    place(tmp, dir, stem, extension)
}

fn place(mut tmp: NamedTempFile, dir: &Path, stem: &str, extension: &str) -> Result<PathBuf> {
    for attempt in 0..MAX_NAME_ATTEMPTS {
        let name = match (attempt, extension.is_empty()) {
            (0, true) => stem.to_string(),
            (0, false) => format!("{stem}.{extension}"),
            (n, true) => format!("{stem}-{n}"),
            (n, false) => format!("{stem}-{n}.{extension}"),
        };
        let path = dir.join(name);

        match tmp.persist_noclobber(&path) {
            Ok(_) => return Ok(path),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "Artifact name taken, trying next suffix");
                tmp = e.file;
            }
            Err(e) => {
                return Err(Error::Io(e.error).with_context(format!("moving artifact to {}", path.display())))
            }
        }
    }

    Err(Error::Internal(format!(
        "no free artifact name for {stem} in {}",
        dir.display()
    )))
}

/// Replace path separators and control characters.
fn sanitize_file_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

// ============================================================================
// Tests
// ============================================================================
