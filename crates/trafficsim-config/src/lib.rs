pub mod error;

pub use error::*;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// 設定ファイル名の候補（優先順）
const CANDIDATES: [&str; 2] = ["trafficsim.local.yaml", "trafficsim.yaml"];

/// TrafficSim の設定
///
/// 省略した項目は既定値になります。相対パスは設定ファイルのあるディレクトリ基準です。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// `<name>.info` / `<name>.xml` を置くディレクトリ
    pub scenery_dir: PathBuf,
    /// シミュレータの実行ファイル
    pub command: PathBuf,
    /// XMLファイルの前に付ける引数（`null` でパスのみ）
    pub xml_flag: Option<String>,
    /// PID/出力ログの置き場所
    pub run_dir: PathBuf,
    /// 状態ファイル
    pub state_file: PathBuf,
    /// セッションログのカタログ（JSON）
    pub log_catalog: PathBuf,
    pub stop_timeout_ms: u64,
    pub kill_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub spawn_grace_ms: u64,
    /// 停止タイムアウト後に SIGKILL を送るか
    pub force_kill: bool,
    /// `simctl serve` の待ち受けアドレス
    pub listen: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scenery_dir: PathBuf::from("Logs"),
            command: PathBuf::from("./bin/STd"),
            xml_flag: Some("--xml".to_string()),
            run_dir: PathBuf::from("."),
            state_file: PathBuf::from("trafficsim.state.json"),
            log_catalog: PathBuf::from("logs.json"),
            stop_timeout_ms: 5000,
            kill_timeout_ms: 2000,
            poll_interval_ms: 200,
            spawn_grace_ms: 300,
            force_kill: true,
            listen: "127.0.0.1:8080".to_string(),
        }
    }
}

impl Config {
    /// 設定ファイルを探して読み込む（見つからなければ既定値）
    pub fn load() -> Result<(Self, Option<PathBuf>)> {
        match find_config_file()? {
            Some(path) => Ok((Self::from_file(&path)?, Some(path))),
            None => {
                debug!("No config file found, using defaults");
                Ok((Self::default(), None))
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        if let Some(base) = path.parent() {
            config.resolve_relative_to(base);
        }
        config.validate()?;

        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// 相対パスを `base` 基準に解決する
    ///
    /// `command` は `STd` のような単独のコマンド名なら PATH から探すためそのまま残す。
    pub fn resolve_relative_to(&mut self, base: &Path) {
        if self.command.is_relative() && self.command.components().count() > 1 {
            self.command = base.join(&self.command);
        }
        for path in [
            &mut self.scenery_dir,
            &mut self.run_dir,
            &mut self.state_file,
            &mut self.log_catalog,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.command.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("command が空です".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms は 1 以上にしてください".to_string(),
            ));
        }
        if self.poll_interval_ms > self.stop_timeout_ms {
            return Err(ConfigError::Invalid(format!(
                "poll_interval_ms ({}) が stop_timeout_ms ({}) より長いです",
                self.poll_interval_ms, self.stop_timeout_ms
            )));
        }
        Ok(())
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn spawn_grace(&self) -> Duration {
        Duration::from_millis(self.spawn_grace_ms)
    }
}

/// 設定ファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 TRAFFICSIM_CONFIG_PATH (直接パス指定、存在しなければエラー)
/// 2. カレントディレクトリ: trafficsim.local.yaml, trafficsim.yaml
/// 3. ~/.config/trafficsim/trafficsim.yaml (グローバル設定)
pub fn find_config_file() -> Result<Option<PathBuf>> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var("TRAFFICSIM_CONFIG_PATH") {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(Some(path));
        }
        return Err(ConfigError::ConfigFileNotFound(path));
    }

    // 2. カレントディレクトリで検索
    let current_dir = std::env::current_dir()?;
    for filename in &CANDIDATES {
        let path = current_dir.join(filename);
        if path.exists() {
            return Ok(Some(path));
        }
    }

    // 3. グローバル設定ファイル
    if let Some(config_dir) = dirs::config_dir() {
        let global_config = config_dir.join("trafficsim").join("trafficsim.yaml");
        if global_config.exists() {
            return Ok(Some(global_config));
        }
    }

    Ok(None)
}
