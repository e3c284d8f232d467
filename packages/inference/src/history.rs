//! Scan history
//!
//! Saving is a separate step the caller takes after accepting a result;
//! [`crate::ScanEngine::perform_scan`] never writes anything.

use crate::postprocess::Prediction;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

const HISTORY_FILE: &str = "history.jsonl";
const IMAGES_DIR: &str = "images";

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("History I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed history record: {0}")]
    Json(#[from] serde_json::Error),
}

/// One accepted scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Where the stored copy of the image can be found
    pub image_url: String,
    pub condition: String,
    /// Confidence in percent
    pub confidence: f32,
    pub timestamp: DateTime<Utc>,
}

impl ScanRecord {
    pub fn new(image_url: impl Into<String>, prediction: &Prediction) -> Self {
        Self {
            image_url: image_url.into(),
            condition: prediction.condition.clone(),
            confidence: prediction.percentage(),
            timestamp: Utc::now(),
        }
    }
}

/// The original image as supplied by the user
#[derive(Debug, Clone, Copy)]
pub struct ScanImage<'a> {
    pub file_name: &'a str,
    pub bytes: &'a [u8],
}

#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn save(
        &self,
        image: &ScanImage<'_>,
        prediction: &Prediction,
    ) -> Result<ScanRecord, HistoryError>;
}

/// JSON-lines log with image copies stored alongside
#[derive(Debug, Clone)]
pub struct LocalHistory {
    root: PathBuf,
}

impl LocalHistory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn log_path(&self) -> PathBuf {
        self.root.join(HISTORY_FILE)
    }

    /// All records, oldest first; an absent log is an empty history
    pub async fn load(&self) -> Result<Vec<ScanRecord>, HistoryError> {
        let raw = match tokio::fs::read_to_string(self.log_path()).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(HistoryError::from))
            .collect()
    }
}

/// Keep the extension, drop any directory part and odd characters.
/// Attempts after the first get a `-N` suffix on the timestamp.
fn stored_name(file_name: &str, timestamp: &DateTime<Utc>, attempt: u32) -> String {
    let base = Path::new(file_name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("image");
    let clean: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    match attempt {
        0 => format!("{}_{}", timestamp.timestamp_millis(), clean),
        n => format!("{}-{}_{}", timestamp.timestamp_millis(), n, clean),
    }
}

/// Write `bytes` under a name no other save has taken
async fn write_unique(
    dir: &Path,
    file_name: &str,
    timestamp: &DateTime<Utc>,
    bytes: &[u8],
) -> std::io::Result<PathBuf> {
    let mut attempt = 0;
    loop {
        let path = dir.join(stored_name(file_name, timestamp, attempt));
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(mut file) => {
                file.write_all(bytes).await?;
                file.flush().await?;
                return Ok(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e),
        }
    }
}

#[async_trait]
impl HistorySink for LocalHistory {
    async fn save(
        &self,
        image: &ScanImage<'_>,
        prediction: &Prediction,
    ) -> Result<ScanRecord, HistoryError> {
        let images = self.root.join(IMAGES_DIR);
        tokio::fs::create_dir_all(&images).await?;

        let mut record = ScanRecord::new(String::new(), prediction);
        let image_path =
            write_unique(&images, image.file_name, &record.timestamp, image.bytes).await?;
        record.image_url = image_path.display().to_string();

        let mut line = serde_json::to_string(&record)?;
        line.push('\n');
        let mut log = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.log_path())
            .await?;
        log.write_all(line.as_bytes()).await?;
        log.flush().await?;

        tracing::info!(
            "Saved scan {} ({:.1}%) to {}",
            record.condition,
            record.confidence,
            self.root.display()
        );
        Ok(record)
    }
}
