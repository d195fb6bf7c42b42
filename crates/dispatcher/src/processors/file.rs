//! FileProcessor - appends dispatches to a JSON lines file

use contracts::{ContractError, Dispatch, DispatchProcessor};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, instrument};

/// Configuration for FileProcessor
#[derive(Debug, Clone)]
pub struct FileProcessorConfig {
    /// Output directory
    pub base_path: PathBuf,
    /// File name inside `base_path` (defaults to `<processor id>.jsonl`)
    pub file_name: Option<String>,
}

impl FileProcessorConfig {
    /// Read `base_path` and `file_name` from a params map
    pub fn from_params(params: &HashMap<String, String>) -> Self {
        let base_path = params
            .get("base_path")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./output"));

        Self {
            base_path,
            file_name: params.get("file_name").cloned(),
        }
    }
}

/// Processor that writes one JSON object per line
pub struct FileProcessor {
    id: String,
    path: PathBuf,
    writer: BufWriter<File>,
}

impl FileProcessor {
    /// Create the output directory and open the file for appending
    pub fn new(id: impl Into<String>, config: FileProcessorConfig) -> std::io::Result<Self> {
        let id = id.into();
        fs::create_dir_all(&config.base_path)?;

        let file_name = config
            .file_name
            .unwrap_or_else(|| format!("{id}.jsonl"));
        let path = config.base_path.join(file_name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            id,
            path,
            writer: BufWriter::new(file),
        })
    }

    /// Create from params map (for factory)
    pub fn from_params(
        id: impl Into<String>,
        params: &HashMap<String, String>,
    ) -> std::io::Result<Self> {
        Self::new(id, FileProcessorConfig::from_params(params))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_batch(&mut self, dispatches: &[Dispatch]) -> Result<(), ContractError> {
        for dispatch in dispatches {
            serde_json::to_writer(&mut self.writer, dispatch)?;
            self.writer.write_all(b"\n")?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

impl DispatchProcessor for FileProcessor {
    fn id(&self) -> &str {
        &self.id
    }

    #[instrument(
        name = "file_processor_deliver",
        skip(self, dispatches),
        fields(processor = %self.id, count = dispatches.len())
    )]
    async fn deliver(&mut self, dispatches: &[Dispatch]) -> Result<(), ContractError> {
        self.write_batch(dispatches).map_err(|e| {
            error!(processor = %self.id, path = %self.path.display(), error = %e, "Write failed");
            ContractError::processor_delivery(&self.id, e.to_string())
        })
    }

    #[instrument(name = "file_processor_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        self.writer
            .flush()
            .map_err(|e| ContractError::processor_close(&self.id, e.to_string()))?;
        debug!(processor = %self.id, "FileProcessor closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::DataObject;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn writes_one_line_per_dispatch() {
        let dir = tempdir().unwrap();
        let config = FileProcessorConfig {
            base_path: dir.path().join("out"),
            file_name: None,
        };
        let mut processor = FileProcessor::new("archive", config).unwrap();

        let payload = json!({"k": "v"}).as_object().cloned().unwrap();
        let batch = vec![
            Dispatch::new("view", payload),
            Dispatch::new("purchase", DataObject::new()),
        ];
        processor.deliver(&batch).await.unwrap();
        processor.close().await.unwrap();

        let path = dir.path().join("out").join("archive.jsonl");
        assert_eq!(processor.path(), path.as_path());
        let content = fs::read_to_string(path).unwrap();
        let lines: Vec<Dispatch> = content
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines, batch);
    }

    #[test]
    fn params_select_file_name() {
        let params = HashMap::from([
            ("base_path".to_string(), "/tmp/x".to_string()),
            ("file_name".to_string(), "events.log".to_string()),
        ]);
        let config = FileProcessorConfig::from_params(&params);
        assert_eq!(config.base_path, PathBuf::from("/tmp/x"));
        assert_eq!(config.file_name.as_deref(), Some("events.log"));
    }
}
