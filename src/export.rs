//! Markdown files offered for download, one per displayed response.

use std::path::PathBuf;

use tokio::fs;

use crate::config::ExportConfig;
use crate::error::{AnalystError, Result};
use crate::session::{History, HistoryEntry};

/// A response written to disk and read straight back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub file_name: String,
    pub path: PathBuf,
    pub bytes: Vec<u8>,
}

/// The downloadable document: a short header, then the raw response.
pub fn render_document(entry: &HistoryEntry) -> String {
    format!(
        "# Investment Analysis\n\n**Query:** {}\n\n**Date:** {}\n\n{}",
        entry.query, entry.timestamp, entry.response
    )
}

#[derive(Debug, Clone)]
pub struct ResponseExporter {
    dir: PathBuf,
    prefix: String,
}

impl ResponseExporter {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn from_config(cfg: &ExportConfig) -> Self {
        Self::new(cfg.dir.clone(), cfg.file_prefix.clone())
    }

    /// File name for the 1-based display `number`.
    pub fn file_name(&self, number: usize) -> String {
        format!("{}_{number}.md", self.prefix)
    }

    pub fn path_for(&self, number: usize) -> PathBuf {
        self.dir.join(self.file_name(number))
    }

    /// Writes `entry` as the file for display `position` (0-based), replacing
    /// whatever was there, then reads it back.
    pub async fn export(&self, position: usize, entry: &HistoryEntry) -> Result<ExportedFile> {
        let file_name = self.file_name(position + 1);
        let path = self.dir.join(&file_name);
        fs::write(&path, render_document(entry)).await.map_err(|err| {
            AnalystError::Storage(format!("failed to write `{}`: {err}", path.display()))
        })?;
        let bytes = fs::read(&path).await.map_err(|err| {
            AnalystError::Storage(format!("failed to read back `{}`: {err}", path.display()))
        })?;
        tracing::debug!(file = %path.display(), bytes = bytes.len(), "exported response");
        Ok(ExportedFile {
            file_name,
            path,
            bytes,
        })
    }

    /// Exports every entry in display order.
    pub async fn export_all(&self, history: &History) -> Result<Vec<ExportedFile>> {
        let mut files = Vec::with_capacity(history.len());
        for (position, entry) in history.display().enumerate() {
            files.push(self.export(position, entry).await?);
        }
        Ok(files)
    }

    /// Reads a previously exported file, `None` if it does not exist.
    pub async fn read(&self, number: usize) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(number);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(AnalystError::Storage(format!(
                "failed to read `{}`: {err}",
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(query: &str, response: &str) -> HistoryEntry {
        HistoryEntry {
            query: query.into(),
            response: response.into(),
            timestamp: "2025-01-02 03:04:05".into(),
        }
    }

    #[test]
    fn document_starts_with_header() {
        let doc = render_document(&entry("What is a P/E ratio?", "## P/E\nPrice over earnings."));
        assert_eq!(
            doc,
            "# Investment Analysis\n\n**Query:** What is a P/E ratio?\n\n**Date:** 2025-01-02 03:04:05\n\n## P/E\nPrice over earnings."
        );
    }

    #[tokio::test]
    async fn export_writes_then_reads_back() {
        let dir = TempDir::new().unwrap();
        let exporter = ResponseExporter::new(dir.path(), "investment_analysis");
        let item = entry("q", "| a | b |\n|---|---|");

        let file = exporter.export(0, &item).await.unwrap();

        assert_eq!(file.file_name, "investment_analysis_1.md");
        assert_eq!(file.bytes, render_document(&item).into_bytes());
        assert_eq!(file.path, dir.path().join("investment_analysis_1.md"));
        let on_disk = std::fs::read_to_string(&file.path).unwrap();
        assert!(on_disk.ends_with("| a | b |\n|---|---|"));
    }

    #[tokio::test]
    async fn export_all_numbers_by_display_position() {
        let dir = TempDir::new().unwrap();
        let exporter = ResponseExporter::new(dir.path(), "analysis");
        let mut history = History::default();
        history.push(entry("older", "1"));
        history.push(entry("newer", "2"));

        let files = exporter.export_all(&history).await.unwrap();

        assert_eq!(files.len(), 2);
        assert_eq!(files[0].file_name, "analysis_1.md");
        assert!(String::from_utf8_lossy(&files[0].bytes).contains("**Query:** newer"));
        assert!(String::from_utf8_lossy(&files[1].bytes).contains("**Query:** older"));
    }

    #[tokio::test]
    async fn rerender_rewrites_same_file() {
        let dir = TempDir::new().unwrap();
        let exporter = ResponseExporter::new(dir.path(), "analysis");
        let mut history = History::default();
        history.push(entry("first", "1"));
        exporter.export_all(&history).await.unwrap();

        history.push(entry("second", "2"));
        exporter.export_all(&history).await.unwrap();

        let first_slot = exporter.read(1).await.unwrap().unwrap();
        assert!(String::from_utf8_lossy(&first_slot).contains("**Query:** second"));
        assert!(exporter.read(3).await.unwrap().is_none());
    }
}
