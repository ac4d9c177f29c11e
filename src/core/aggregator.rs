//! Content aggregation engine.
//!
//! Turns a sorted set of selected files into a single rendered string:
//! per-file sections in a fixed wire format, joined by a reserved
//! sentinel, with a token count of the final result. File contents are
//! served from the bounded cache where possible and read from disk on
//! a miss. Individual file failures never abort a batch; they are
//! classified and collected alongside the rendered output.

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::core::cache::ContentCache;
use crate::core::error::CoreError;
use crate::core::path_key::PathKey;
use crate::core::tokens::TokenCounterOperations;
use crate::core::Progress;
use crate::utils::file_detection;

/// Delimiter between rendered sections. Reserved: legitimate source
/// content is not expected to contain this line.
pub const SECTION_SEPARATOR: &str =
    "\n----------------------SECTION-BREAK-------------------\n";

/// One progress callback per this many aggregated files.
const PROGRESS_UPDATE_INTERVAL: usize = 16;

/// Rendering style for the aggregated output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Markdown,
    Xml,
}

/// Snapshot of everything one aggregation run needs. Taken under the
/// state lock and then processed without it, so concurrent selection
/// changes cannot race the in-flight batch.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Absolute paths to aggregate. Sorted and deduplicated by the
    /// engine before rendering.
    pub files: Vec<PathBuf>,
    /// Scan root; sections display paths relative to it.
    pub root: PathBuf,
    pub format: OutputFormat,
    /// Optional instruction block rendered as the first section.
    pub base_prompt: Option<String>,
    /// Optional pre-rendered directory outline section.
    pub outline: Option<String>,
    /// Generation counter used by the caller to discard stale results.
    pub epoch: u64,
}

/// Outcome of one aggregation run.
#[derive(Debug, Clone)]
pub struct AggregationResult {
    pub content: String,
    pub token_count: usize,
    /// Human-readable diagnostics for files that could not be read.
    pub read_errors: Vec<String>,
    /// Files that vanished between selection and read.
    pub deleted_files: Vec<PathBuf>,
    pub epoch: u64,
}

/// Stateless renderer over a shared cache and token counter.
pub struct AggregationEngine<'a, T: TokenCounterOperations> {
    cache: &'a ContentCache,
    tokens: &'a T,
}

impl<'a, T: TokenCounterOperations> AggregationEngine<'a, T> {
    pub fn new(cache: &'a ContentCache, tokens: &'a T) -> Self {
        Self { cache, tokens }
    }

    /// Renders the request into one output string.
    ///
    /// Files are processed in sorted path order, so identical inputs
    /// produce byte-identical output. Per-file failures are classified:
    /// vanished files land in `deleted_files`, everything else in
    /// `read_errors`; neither aborts the batch.
    pub fn generate(
        &self,
        request: GenerateRequest,
        progress: &(dyn Fn(Progress) + Send + Sync),
    ) -> AggregationResult {
        let started = Instant::now();
        let mut files = request.files;
        files.sort();
        files.dedup();
        let total = files.len();

        let mut sections: Vec<String> = Vec::new();
        if let Some(prompt) = &request.base_prompt {
            if !prompt.trim().is_empty() {
                sections.push(prompt.trim_end().to_string());
            }
        }
        if let Some(outline) = &request.outline {
            sections.push(outline.trim_end().to_string());
        }

        let mut read_errors = Vec::new();
        let mut deleted_files = Vec::new();

        for (i, path) in files.iter().enumerate() {
            if i % PROGRESS_UPDATE_INTERVAL == 0 {
                progress(Progress {
                    processed: i,
                    total,
                    elapsed_secs: started.elapsed().as_secs_f64(),
                });
            }

            match self.file_content(path) {
                Ok(content) => {
                    sections.push(render_section(path, &request.root, &content, request.format));
                }
                Err(CoreError::NotFound(p)) => {
                    tracing::info!("Skipping vanished file {}", p.display());
                    deleted_files.push(p);
                }
                Err(e) => {
                    tracing::warn!("Skipping unreadable file {}: {e}", path.display());
                    read_errors.push(format!("{}: {e}", path.display()));
                }
            }
        }

        let content = sections.join(SECTION_SEPARATOR);
        let token_count = self.tokens.count_tokens(&content);
        progress(Progress {
            processed: total,
            total,
            elapsed_secs: started.elapsed().as_secs_f64(),
        });
        tracing::info!(
            "Aggregated {} of {} files into {} bytes ({} tokens)",
            total - deleted_files.len() - read_errors.len(),
            total,
            content.len(),
            token_count
        );

        AggregationResult {
            content,
            token_count,
            read_errors,
            deleted_files,
            epoch: request.epoch,
        }
    }

    /// Cache-first content lookup. A miss reads from disk, decodes with
    /// best-effort recovery, and populates the cache.
    fn file_content(&self, path: &Path) -> Result<Arc<str>, CoreError> {
        let key = PathKey::from_path(path);
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }
        let content: Arc<str> = Arc::from(read_text_content(path)?);
        self.cache.put(key, Arc::clone(&content));
        Ok(content)
    }
}

/// Reads a file and decodes it as UTF-8 with best-effort recovery.
///
/// Files that look binary (null bytes in the leading kilobyte) are a
/// decode failure: they were either misclassified at scan time or
/// replaced on disk since. Invalid UTF-8 sequences in otherwise textual
/// files are dropped rather than fatal.
fn read_text_content(path: &Path) -> Result<String, CoreError> {
    let bytes = fs::read(path).map_err(|e| CoreError::from_io(e, path))?;
    let head = &bytes[..bytes.len().min(1024)];
    if head.contains(&0) {
        return Err(CoreError::Decode(path.to_path_buf()));
    }
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        Err(e) => Ok(String::from_utf8_lossy(e.as_bytes()).replace('\u{FFFD}', "")),
    }
}

fn render_section(path: &Path, root: &Path, content: &str, format: OutputFormat) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    match format {
        OutputFormat::Markdown => render_markdown(relative, content),
        OutputFormat::Xml => render_xml(relative, content),
    }
}

fn render_markdown(relative: &Path, content: &str) -> String {
    let lang = relative
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    let mut section = String::with_capacity(content.len() + 64);
    section.push_str(&format!("File: {}\n", relative.display()));
    section.push_str("Content:\n");
    section.push_str(&format!("```{lang}\n"));
    section.push_str(content);
    if !content.ends_with('\n') {
        section.push('\n');
    }
    section.push_str("```\n");
    section
}

fn render_xml(relative: &Path, content: &str) -> String {
    let mut section = String::with_capacity(content.len() + 64);
    section.push_str(&format!(
        "<file path=\"{}\">\n",
        escape_xml_attribute(&relative.display().to_string())
    ));
    section.push_str("<![CDATA[\n");
    // A literal "]]>" inside the content would close the CDATA section
    // early, so it is split across two sections.
    section.push_str(&content.replace("]]>", "]]]]><![CDATA[>"));
    if !content.ends_with('\n') {
        section.push('\n');
    }
    section.push_str("]]>\n</file>\n");
    section
}

fn escape_xml_attribute(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Renders the first `max_lines` lines of a file for display.
///
/// Directories and non-text files get a marker string instead of
/// content; oversized previews are truncated with a trailing notice.
pub fn preview_file(
    path: &Path,
    max_lines: usize,
    config: &AppConfig,
) -> Result<String, CoreError> {
    if path.is_dir() {
        return Ok("[DIRECTORY]".to_string());
    }
    if !file_detection::is_text_file(path, config) {
        return Ok("[BINARY FILE]".to_string());
    }

    let file = fs::File::open(path).map_err(|e| CoreError::from_io(e, path))?;
    let reader = BufReader::new(file);
    let mut preview = String::new();
    for (count, line) in reader.lines().enumerate() {
        if count >= max_lines {
            preview.push_str("...\n[Preview truncated]");
            break;
        }
        match line {
            Ok(text) => {
                preview.push_str(&text);
                preview.push('\n');
            }
            Err(_) => preview.push_str("[ERROR READING LINE]\n"),
        }
    }
    Ok(preview)
}
