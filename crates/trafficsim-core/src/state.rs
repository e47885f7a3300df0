//! 監視状態の永続化
//!
//! 実行中のシナリオ名とPIDを1つの状態ファイル（JSON）にまとめて記録します。
//! 書き込みは一時ファイル + rename で行うため、読み手が書きかけの状態を見ることはありません。

use crate::error::{ProcessError, Result, SupervisorError};
use crate::process::{PidStore, is_process_alive, write_atomic};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const STATE_VERSION: u32 = 1;

/// 監視対象プロセスのフェーズ
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", content = "scenery", rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Stopped,
    Starting(String),
    Running(String),
    Stopping(String),
}

impl Phase {
    /// フェーズに紐づくシナリオ名
    pub fn scenery(&self) -> Option<&str> {
        match self {
            Phase::Stopped => None,
            Phase::Starting(name) | Phase::Running(name) | Phase::Stopping(name) => Some(name),
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Stopped => write!(f, "stopped"),
            Phase::Starting(name) => write!(f, "starting ({})", name),
            Phase::Running(name) => write!(f, "running ({})", name),
            Phase::Stopping(name) => write!(f, "stopping ({})", name),
        }
    }
}

/// 状態ファイルの内容
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorState {
    /// 状態ファイルのバージョン
    pub version: u32,
    pub phase: Phase,
    /// 監視対象プロセスのPID
    pub pid: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

impl Default for SupervisorState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            phase: Phase::Stopped,
            pid: None,
            updated_at: Utc::now(),
        }
    }
}

impl SupervisorState {
    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        self.updated_at = Utc::now();
    }

    pub fn set_pid(&mut self, pid: Option<u32>) {
        self.pid = pid;
        self.updated_at = Utc::now();
    }
}

/// 状態ファイルの読み書き
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    stale_lock_after: Duration,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            stale_lock_after: Duration::minutes(10),
        }
    }

    /// この時間より古いロックは放棄されたものとみなす
    pub fn with_stale_lock_after(mut self, age: Duration) -> Self {
        self.stale_lock_after = age;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(format!("{}.lock", file_name))
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// 現在の状態を読む（ファイルがなければ停止状態）
    ///
    /// 読めない状態ファイルは警告を出して削除し、停止状態として扱う。
    /// 新しいバージョンの状態ファイルは削除せずにエラーにする。
    pub fn load(&self) -> Result<SupervisorState> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(SupervisorState::default());
            }
            Err(e) => return Err(e.into()),
        };

        let value: serde_json::Value = match serde_json::from_str(&content) {
            Ok(value) => value,
            Err(e) => return self.discard(e),
        };
        if let Some(version) = value.get("version").and_then(|v| v.as_u64()) {
            if version > u64::from(STATE_VERSION) {
                return Err(SupervisorError::State(format!(
                    "状態ファイルのバージョン {} はサポート対象 ({}) より新しいです",
                    version, STATE_VERSION
                )));
            }
        }

        match serde_json::from_value(value) {
            Ok(state) => Ok(state),
            Err(e) => self.discard(e),
        }
    }

    fn discard(&self, err: serde_json::Error) -> Result<SupervisorState> {
        warn!(path = %self.path.display(), error = %err, "Discarding unreadable state file");
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(SupervisorState::default())
    }

    pub fn save(&self, state: &SupervisorState) -> Result<()> {
        let content = serde_json::to_string_pretty(state)?;
        write_atomic(&self.path, content.as_bytes())?;
        debug!(path = %self.path.display(), phase = %state.phase, pid = ?state.pid, "Saved supervisor state");
        Ok(())
    }

    /// 読み込み・変更・保存をまとめて行う
    pub fn update<F>(&self, f: F) -> Result<SupervisorState>
    where
        F: FnOnce(&mut SupervisorState),
    {
        let mut state = self.load()?;
        f(&mut state);
        self.save(&state)?;
        Ok(state)
    }

    pub fn set_phase(&self, phase: Phase) -> Result<SupervisorState> {
        self.update(|state| state.set_phase(phase))
    }

    /// 状態遷移の排他ロックを取得する
    pub fn acquire_lock(&self) -> Result<StateLock> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock_info = LockInfo {
            holder: std::env::var("HOSTNAME")
                .or_else(|_| std::env::var("HOST"))
                .unwrap_or_else(|_| "unknown".to_string()),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let content = serde_json::to_string_pretty(&lock_info)?;

        // 放棄されたロックを1度だけ取り除いて再試行する
        for _ in 0..2 {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(mut file) => {
                    file.write_all(content.as_bytes())?;
                    debug!(path = %lock_path.display(), "Acquired state lock");
                    return Ok(StateLock {
                        lock_path,
                        released: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    let existing = fs::read_to_string(&lock_path)
                        .ok()
                        .and_then(|c| serde_json::from_str::<LockInfo>(&c).ok());
                    match existing {
                        Some(info) if !self.is_stale(&info) => {
                            return Err(SupervisorError::Locked {
                                holder: format!("{} (pid {})", info.holder, info.pid),
                                since: info.acquired_at,
                            });
                        }
                        Some(info) => {
                            warn!(holder = %info.holder, pid = info.pid, "Removing stale lock");
                        }
                        None => {
                            warn!(path = %lock_path.display(), "Removing unreadable lock file");
                        }
                    }
                    match fs::remove_file(&lock_path) {
                        Ok(()) => {}
                        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                        Err(e) => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SupervisorError::State(format!(
            "ロックを取得できません: {}",
            lock_path.display()
        )))
    }

    fn is_stale(&self, info: &LockInfo) -> bool {
        let age = Utc::now().signed_duration_since(info.acquired_at);
        age >= self.stale_lock_after || !is_process_alive(info.pid)
    }

    fn record_error(&self, err: SupervisorError) -> ProcessError {
        ProcessError::PidRecord {
            path: self.path.clone(),
            message: err.to_string(),
        }
    }
}

impl PidStore for StateStore {
    fn load_pid(&self) -> std::result::Result<Option<u32>, ProcessError> {
        self.load()
            .map(|state| state.pid)
            .map_err(|e| self.record_error(e))
    }

    fn save_pid(&self, pid: u32) -> std::result::Result<(), ProcessError> {
        self.update(|state| state.set_pid(Some(pid)))
            .map(|_| ())
            .map_err(|e| self.record_error(e))
    }

    fn clear_pid(&self) -> std::result::Result<(), ProcessError> {
        // 記録がなければ状態ファイルを作らない
        if !self.exists() {
            return Ok(());
        }
        self.update(|state| {
            state.set_pid(None);
            state.set_phase(Phase::Stopped);
        })
        .map(|_| ())
        .map_err(|e| self.record_error(e))
    }

    fn clear_pid_if(&self, pid: u32) -> std::result::Result<bool, ProcessError> {
        if !self.exists() {
            return Ok(false);
        }
        let mut state = self.load().map_err(|e| self.record_error(e))?;
        if state.pid != Some(pid) {
            return Ok(false);
        }
        state.set_pid(None);
        state.set_phase(Phase::Stopped);
        self.save(&state).map_err(|e| self.record_error(e))?;
        Ok(true)
    }
}

/// ロック情報
#[derive(Debug, Serialize, Deserialize)]
struct LockInfo {
    holder: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// 状態ロックのRAIIガード
#[derive(Debug)]
pub struct StateLock {
    lock_path: PathBuf,
    released: bool,
}

impl StateLock {
    /// ロックを解放する
    pub fn release(mut self) -> Result<()> {
        if !self.released {
            match fs::remove_file(&self.lock_path) {
                Ok(()) => debug!("Released state lock"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            self.released = true;
        }
        Ok(())
    }
}

impl Drop for StateLock {
    fn drop(&mut self) {
        if !self.released {
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}
