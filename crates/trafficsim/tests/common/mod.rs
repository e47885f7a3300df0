use assert_cmd::Command;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// 一時ディレクトリに作るテスト用の TrafficSim 設置先
pub struct TestInstallation {
    pub root: TempDir,
}

impl TestInstallation {
    pub fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("Logs")).unwrap();

        let installation = Self { root };
        installation.write_config("");
        installation
    }

    /// 既定の設定に `extra` を追記して trafficsim.yaml を書く
    pub fn write_config(&self, extra: &str) {
        let content = format!(
            "scenery_dir: Logs\ncommand: ./STd\nrun_dir: .\nstate_file: state.json\nlog_catalog: logs.json\npoll_interval_ms: 20\nspawn_grace_ms: 200\n{}",
            extra
        );
        fs::write(self.config_path(), content).unwrap();
    }

    pub fn add_scenery(&self, name: &str, info: &str) {
        let dir = self.path().join("Logs");
        fs::write(dir.join(format!("{}.info", name)), info).unwrap();
        fs::write(dir.join(format!("{}.xml", name)), "<log/>").unwrap();
    }

    /// 引数を無視して眠り続ける偽のシミュレータ
    #[allow(dead_code)]
    pub fn install_simulator(&self) {
        let path = self.path().join("STd");
        fs::write(&path, "#!/bin/sh\nexec sleep 30\n").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[allow(dead_code)]
    pub fn write_log_catalog(&self, content: &str) {
        fs::write(self.path().join("logs.json"), content).unwrap();
    }

    pub fn config_path(&self) -> PathBuf {
        self.path().join("trafficsim.yaml")
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// この設置先の設定で simctl を実行するコマンド
    #[allow(deprecated)]
    pub fn simctl(&self) -> Command {
        let mut cmd = Command::cargo_bin("simctl").unwrap();
        cmd.current_dir(self.path())
            .env("TRAFFICSIM_CONFIG_PATH", self.config_path())
            .env_remove("TRAFFICSIM_SCENERY_DIR")
            .env("NO_COLOR", "1");
        cmd
    }
}
