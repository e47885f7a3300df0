use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

/// プロセス操作のエラー
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error(
        "コマンド '{command}' を起動できません: {source}\n\nヒント:\n  • コマンドのパスが正しいか確認してください\n  • 実行権限があるか確認してください"
    )]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("プロセス {pid} へのシグナル送信に失敗しました: {source}")]
    Signal {
        pid: u32,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("PIDレコードの読み書きに失敗しました: {path}\n理由: {message}")]
    PidRecord { path: PathBuf, message: String },

    #[error("ログファイルを開けません: {path}\n理由: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// シミュレータ監視のエラー
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("シナリオディレクトリが見つかりません: {0}")]
    SceneryDirNotFound(PathBuf),

    #[error("シナリオ '{name}' が見つかりません ({path})")]
    SceneryNotFound { name: String, path: PathBuf },

    #[error("不正なシナリオ名です: '{0}'")]
    InvalidSceneryName(String),

    #[error(
        "シナリオ '{scenery}' の起動直後にプロセスが終了しました\n\nヒント:\n  • ログを確認してください: {log}"
    )]
    StartFailed { scenery: String, log: PathBuf },

    #[error(
        "プロセス {pid} が停止しませんでした\n\nヒント:\n  • 手動で停止してください: kill -9 {pid}"
    )]
    ProcessStillAlive { pid: u32 },

    #[error(
        "状態が不整合です: プロセス {pid} は実行中ですが、シナリオ名が記録されていません"
    )]
    StateInconsistency { pid: u32 },

    #[error("状態ファイルは {holder} によってロックされています（{since} から）")]
    Locked {
        holder: String,
        since: DateTime<Utc>,
    },

    #[error("状態ファイルエラー: {0}")]
    State(String),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON エラー: {0}")]
    Json(#[from] serde_json::Error),
}

/// ログカタログのエラー
#[derive(Error, Debug)]
pub enum LogError {
    #[error("ログ {0} が見つかりません")]
    NotFound(u64),

    #[error("ログカタログの読み込みに失敗しました: {path}\n理由: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("ログカタログの形式が不正です: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = SupervisorError> = std::result::Result<T, E>;
