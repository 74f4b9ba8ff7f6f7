use super::OutputSink;
use crate::errors::{EngineError, EngineResult};
use crate::types::TableRow;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Writes rows to one CSV file. The file is truncated on creation and the
/// header goes out with the first row; later writes append.
pub struct CsvSink {
    path: PathBuf,
    writer: ::csv::Writer<File>,
    rows_written: usize,
}

impl CsvSink {
    pub fn create(path: impl AsRef<Path>) -> EngineResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| EngineError::Sink(format!("create dir {}: {e}", parent.display())))?;
        }
        let file = File::create(&path)
            .map_err(|e| EngineError::Sink(format!("create {}: {e}", path.display())))?;
        let writer = ::csv::WriterBuilder::new().has_headers(true).from_writer(file);
        Ok(Self {
            path,
            writer,
            rows_written: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }
}

impl OutputSink for CsvSink {
    fn write(&mut self, rows: &[TableRow]) -> EngineResult<()> {
        for row in rows {
            self.writer.serialize(row)?;
        }
        self.writer.flush()?;
        self.rows_written += rows.len();
        tracing::debug!(path = %self.path.display(), rows = rows.len(), "csv rows written");
        Ok(())
    }
}
