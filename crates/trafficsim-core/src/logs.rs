//! 過去のセッションログの参照

use crate::error::LogError;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// 記録済みセッション1件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub id: u64,
    /// ログ種別ID
    #[serde(rename = "type")]
    pub log_type: u32,
    pub title: String,
    pub start_time: NaiveDateTime,
    /// 再生時間（秒）
    pub play_time: u64,
    /// 接続数
    pub connections: u32,
    pub file_name: String,
}

impl LogRecord {
    /// 再生時間を `hh:mm:ss` で表示する
    pub fn play_time_display(&self) -> String {
        let secs = self.play_time;
        format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

/// セッションログの読み出しAPI
pub trait LogCatalog: Send + Sync {
    /// 全件（ID順）
    fn list_logs(&self) -> Result<Vec<LogRecord>, LogError>;

    fn get_log(&self, id: u64) -> Result<LogRecord, LogError>;
}

/// JSON配列ファイルに保存されたログカタログ
#[derive(Debug, Clone)]
pub struct JsonLogCatalog {
    path: PathBuf,
}

impl JsonLogCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogCatalog for JsonLogCatalog {
    fn list_logs(&self) -> Result<Vec<LogRecord>, LogError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Log catalog not found, returning empty list");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(LogError::Io {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let mut records: Vec<LogRecord> = serde_json::from_str(&content)?;
        records.sort_by_key(|r| r.id);
        Ok(records)
    }

    fn get_log(&self, id: u64) -> Result<LogRecord, LogError> {
        self.list_logs()?
            .into_iter()
            .find(|r| r.id == id)
            .ok_or(LogError::NotFound(id))
    }
}
