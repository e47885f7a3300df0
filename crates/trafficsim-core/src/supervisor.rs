//! シミュレータの監視
//!
//! [`ProcessHandle`]、[`SceneryDirectory`]、[`StateStore`] を組み合わせ、
//! 「シナリオを1つだけ実行している / 何も実行していない」を保証します。
//! 状態遷移（起動・停止）はプロセス内の Mutex とロックファイルで直列化されます。

use crate::error::{Result, SupervisorError};
use crate::process::{ProcessHandle, ProcessOptions};
use crate::scenery::{SceneryDescriptor, SceneryDirectory};
use crate::state::{Phase, StateStore};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// 監視の設定
#[derive(Debug, Clone)]
pub struct SupervisorOptions {
    /// シナリオディレクトリ
    pub scenery_dir: PathBuf,
    /// シミュレータの実行ファイル
    pub command: PathBuf,
    /// XMLファイルの前に付ける引数（`None` ならパスのみを渡す）
    pub xml_flag: Option<String>,
    /// PID/出力ログを置くディレクトリ
    pub run_dir: PathBuf,
    /// 状態ファイル
    pub state_file: PathBuf,
    pub process: ProcessOptions,
}

impl Default for SupervisorOptions {
    fn default() -> Self {
        Self {
            scenery_dir: PathBuf::from("Logs"),
            command: PathBuf::from("./bin/STd"),
            xml_flag: Some("--xml".to_string()),
            run_dir: PathBuf::from("."),
            state_file: PathBuf::from("trafficsim.state.json"),
            process: ProcessOptions::default(),
        }
    }
}

/// 実行中のシナリオ
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "scenery", rename_all = "snake_case")]
pub enum RunningScenery {
    NotRunning,
    Running(String),
    /// 別の起動が状態遷移中
    Transitioning(Phase),
    /// プロセスは実行中だがシナリオ名が記録されていない
    Unknown,
}

/// 状態のスナップショット
#[derive(Debug, Clone, Serialize)]
pub struct SupervisorStatus {
    pub scenery: RunningScenery,
    pub pid: Option<u32>,
}

pub struct SimulatorSupervisor {
    sceneries: SceneryDirectory,
    xml_flag: Option<String>,
    process: Mutex<ProcessHandle<StateStore>>,
}

impl SimulatorSupervisor {
    pub fn new(options: SupervisorOptions) -> Self {
        let store = StateStore::new(&options.state_file);
        let process = ProcessHandle::new(&options.command, Vec::new(), store)
            .with_log_dir(&options.run_dir)
            .with_options(options.process);

        Self {
            sceneries: SceneryDirectory::new(options.scenery_dir),
            xml_flag: options.xml_flag,
            process: Mutex::new(process),
        }
    }

    pub fn sceneries(&self) -> &SceneryDirectory {
        &self.sceneries
    }

    pub fn list_sceneries(&self) -> Result<Vec<String>> {
        self.sceneries.list_sceneries()
    }

    pub fn scenery_info(&self, name: &str) -> Result<String> {
        self.sceneries.get_info(name)
    }

    pub fn descriptors(&self) -> Result<Vec<SceneryDescriptor>> {
        self.sceneries.descriptors()
    }

    /// シミュレータ出力の保存先
    pub async fn log_path(&self) -> PathBuf {
        self.process.lock().await.log_path().to_path_buf()
    }

    /// シナリオを起動する
    ///
    /// 何かが実行中なら（同じシナリオでも）先に停止してから起動し直す。
    pub async fn start_scenery(&self, name: &str) -> Result<()> {
        let xml = self.sceneries.xml_path(name)?;

        let mut process = self.process.lock().await;
        let lock = process.store().acquire_lock()?;
        let result = self.start_locked(&mut process, name, &xml).await;
        lock.release()?;
        result
    }

    async fn start_locked(
        &self,
        process: &mut ProcessHandle<StateStore>,
        name: &str,
        xml: &Path,
    ) -> Result<()> {
        if process.status()? {
            let previous = process.store().load()?.phase;
            info!(previous = %previous, next = name, "Restarting simulator");
            self.stop_locked(process).await?;
        }

        process.store().set_phase(Phase::Starting(name.to_string()))?;
        process.set_args(self.scenery_args(xml));

        match process.start().await {
            Ok(true) => {
                process.store().set_phase(Phase::Running(name.to_string()))?;
                info!(scenery = name, pid = ?process.last_known_pid(), "Scenery started");
                Ok(())
            }
            Ok(false) => {
                process.store().set_phase(Phase::Stopped)?;
                Err(SupervisorError::StartFailed {
                    scenery: name.to_string(),
                    log: process.log_path().to_path_buf(),
                })
            }
            Err(e) => {
                if let Err(reset) = process.store().set_phase(Phase::Stopped) {
                    warn!(error = %reset, "Failed to reset state after spawn failure");
                }
                Err(e.into())
            }
        }
    }

    fn scenery_args(&self, xml: &Path) -> Vec<String> {
        let mut args = Vec::with_capacity(2);
        if let Some(flag) = &self.xml_flag {
            args.push(flag.clone());
        }
        args.push(xml.display().to_string());
        args
    }

    /// 実行中のシナリオを停止する
    ///
    /// 停止を確認できた場合のみ実行中の記録を消す。
    pub async fn stop_scenery(&self) -> Result<()> {
        let mut process = self.process.lock().await;
        let lock = process.store().acquire_lock()?;
        let result = self.stop_locked(&mut process).await;
        lock.release()?;
        result
    }

    async fn stop_locked(&self, process: &mut ProcessHandle<StateStore>) -> Result<()> {
        if !process.status()? {
            let store = process.store();
            if store.exists() && store.load()?.phase != Phase::Stopped {
                store.set_phase(Phase::Stopped)?;
            }
            info!("No scenery is running");
            return Ok(());
        }

        let previous = process.store().load()?.phase;
        let pid = process.pid()?;
        if let Some(name) = previous.scenery() {
            process.store().set_phase(Phase::Stopping(name.to_string()))?;
        }

        if process.stop().await? {
            process.store().set_phase(Phase::Stopped)?;
            info!(pid = ?pid, previous = %previous, "Scenery stopped");
            return Ok(());
        }

        // 停止を確認できないので実行中の記録を残す
        let restored = match previous {
            Phase::Starting(name) | Phase::Stopping(name) => Phase::Running(name),
            other => other,
        };
        process.store().set_phase(restored)?;
        let pid = process.pid()?.or(pid).unwrap_or_default();
        warn!(pid, "Stop was not confirmed, keeping running marker");
        Err(SupervisorError::ProcessStillAlive { pid })
    }

    /// 実行中のシナリオ
    ///
    /// プロセスが実行されていなければ、状態ファイルの内容にかかわらず `NotRunning`。
    pub async fn running_scenery(&self) -> Result<RunningScenery> {
        Ok(self.status().await?.scenery)
    }

    pub async fn status(&self) -> Result<SupervisorStatus> {
        let mut process = self.process.lock().await;
        if !process.status()? {
            return Ok(SupervisorStatus {
                scenery: RunningScenery::NotRunning,
                pid: None,
            });
        }

        let pid = process.pid()?;
        let scenery = match process.store().load()?.phase {
            Phase::Running(name) => RunningScenery::Running(name),
            Phase::Stopped => {
                warn!(pid = ?pid, "Process is running but no scenery is recorded");
                RunningScenery::Unknown
            }
            phase => RunningScenery::Transitioning(phase),
        };
        Ok(SupervisorStatus { scenery, pid })
    }

    /// 実行中のシナリオ名（実行中でなければ `None`）
    ///
    /// 名前の分からないプロセスが実行中の場合は [`SupervisorError::StateInconsistency`]。
    pub async fn get_running_scenery(&self) -> Result<Option<String>> {
        let status = self.status().await?;
        match status.scenery {
            RunningScenery::Running(name) => Ok(Some(name)),
            RunningScenery::NotRunning | RunningScenery::Transitioning(_) => Ok(None),
            RunningScenery::Unknown => Err(SupervisorError::StateInconsistency {
                pid: status.pid.unwrap_or_default(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::is_process_alive;
    use crate::state::SupervisorState;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::{TempDir, tempdir};

    /// `--xml <path>` を受け取って眠り続けるシミュレータの代役
    fn fake_simulator(dir: &Path) -> PathBuf {
        let script = dir.join("STd");
        fs::write(&script, "#!/bin/sh\nexec sleep 30\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        }
        script
    }

    fn setup() -> (TempDir, SimulatorSupervisor) {
        let temp_dir = tempdir().unwrap();
        let root = temp_dir.path();
        let scenery_dir = root.join("Logs");
        fs::create_dir(&scenery_dir).unwrap();
        for name in ["alpha", "beta"] {
            fs::write(scenery_dir.join(format!("{}.info", name)), name).unwrap();
            fs::write(scenery_dir.join(format!("{}.xml", name)), "<log/>").unwrap();
        }

        let options = SupervisorOptions {
            scenery_dir,
            command: fake_simulator(root),
            xml_flag: Some("--xml".to_string()),
            run_dir: root.to_path_buf(),
            state_file: root.join("state.json"),
            process: ProcessOptions {
                stop_timeout: Duration::from_secs(3),
                kill_timeout: Duration::from_secs(1),
                poll_interval: Duration::from_millis(20),
                spawn_grace: Duration::from_millis(200),
                force_kill: true,
                working_dir: None,
            },
        };
        (temp_dir, SimulatorSupervisor::new(options))
    }

    #[tokio::test]
    async fn test_alpha_beta_scenario() {
        let (temp_dir, supervisor) = setup();

        let sceneries = supervisor.list_sceneries().unwrap();
        assert_eq!(sceneries, vec!["alpha", "beta"]);

        supervisor.start_scenery("alpha").await.unwrap();
        assert_eq!(
            supervisor.get_running_scenery().await.unwrap(),
            Some("alpha".to_string())
        );
        let alpha_pid = supervisor.status().await.unwrap().pid.unwrap();

        supervisor.start_scenery("beta").await.unwrap();
        assert_eq!(
            supervisor.get_running_scenery().await.unwrap(),
            Some("beta".to_string())
        );
        let beta_pid = supervisor.status().await.unwrap().pid.unwrap();
        assert_ne!(alpha_pid, beta_pid);
        assert!(!is_process_alive(alpha_pid));

        supervisor.stop_scenery().await.unwrap();
        assert_eq!(supervisor.get_running_scenery().await.unwrap(), None);
        assert!(!is_process_alive(beta_pid));

        let state: SupervisorState =
            serde_json::from_str(&fs::read_to_string(temp_dir.path().join("state.json")).unwrap())
                .unwrap();
        assert_eq!(state.phase, Phase::Stopped);
        assert_eq!(state.pid, None);
        assert!(!temp_dir.path().join("state.json.lock").exists());
    }

    #[tokio::test]
    async fn test_start_same_scenery_twice_restarts_once() {
        let (_temp_dir, supervisor) = setup();

        supervisor.start_scenery("alpha").await.unwrap();
        let first = supervisor.status().await.unwrap().pid.unwrap();

        supervisor.start_scenery("alpha").await.unwrap();
        let second = supervisor.status().await.unwrap().pid.unwrap();

        assert_ne!(first, second);
        assert!(!is_process_alive(first));
        assert_eq!(
            supervisor.running_scenery().await.unwrap(),
            RunningScenery::Running("alpha".to_string())
        );

        supervisor.stop_scenery().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_when_nothing_running_creates_no_files() {
        let (temp_dir, supervisor) = setup();

        supervisor.stop_scenery().await.unwrap();

        assert!(!temp_dir.path().join("state.json").exists());
        assert!(!temp_dir.path().join("state.json.lock").exists());
        assert!(!temp_dir.path().join("STd.pid").exists());
        assert!(!temp_dir.path().join("scenery.text").exists());
    }

    #[tokio::test]
    async fn test_marker_is_ignored_when_process_is_gone() {
        let (temp_dir, supervisor) = setup();

        // 状態ファイルは実行中を主張しているが、PIDのプロセスは存在しない
        let store = StateStore::new(temp_dir.path().join("state.json"));
        let mut state = SupervisorState::default();
        state.set_phase(Phase::Running("alpha".to_string()));
        state.set_pid(Some(u32::MAX - 1));
        store.save(&state).unwrap();

        assert_eq!(
            supervisor.running_scenery().await.unwrap(),
            RunningScenery::NotRunning
        );
        let healed = store.load().unwrap();
        assert_eq!(healed.phase, Phase::Stopped);
        assert_eq!(healed.pid, None);
    }

    #[tokio::test]
    async fn test_running_without_name_is_unknown() {
        let (temp_dir, supervisor) = setup();

        let store = StateStore::new(temp_dir.path().join("state.json"));
        let mut state = SupervisorState::default();
        state.set_pid(Some(std::process::id()));
        store.save(&state).unwrap();

        assert_eq!(
            supervisor.running_scenery().await.unwrap(),
            RunningScenery::Unknown
        );
        assert!(matches!(
            supervisor.get_running_scenery().await,
            Err(SupervisorError::StateInconsistency { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_scenery_is_rejected_before_stopping() {
        let (_temp_dir, supervisor) = setup();

        supervisor.start_scenery("alpha").await.unwrap();
        assert!(matches!(
            supervisor.start_scenery("gamma").await,
            Err(SupervisorError::SceneryNotFound { .. })
        ));
        assert_eq!(
            supervisor.get_running_scenery().await.unwrap(),
            Some("alpha".to_string())
        );

        supervisor.stop_scenery().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_failure_leaves_stopped_state() {
        let (temp_dir, _) = setup();
        let script = temp_dir.path().join("broken");
        fs::write(&script, "#!/bin/sh\necho 'cannot open xml' >&2\nexit 1\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        }

        let supervisor = SimulatorSupervisor::new(SupervisorOptions {
            scenery_dir: temp_dir.path().join("Logs"),
            command: script,
            xml_flag: Some("--xml".to_string()),
            run_dir: temp_dir.path().to_path_buf(),
            state_file: temp_dir.path().join("broken-state.json"),
            process: ProcessOptions {
                spawn_grace: Duration::from_millis(200),
                ..ProcessOptions::default()
            },
        });

        let err = supervisor.start_scenery("alpha").await.unwrap_err();
        assert!(matches!(err, SupervisorError::StartFailed { .. }));
        assert_eq!(
            supervisor.running_scenery().await.unwrap(),
            RunningScenery::NotRunning
        );

        let log = fs::read_to_string(temp_dir.path().join("broken.log.txt")).unwrap();
        assert!(log.contains("cannot open xml"));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let (temp_dir, _) = setup();
        let supervisor = SimulatorSupervisor::new(SupervisorOptions {
            scenery_dir: temp_dir.path().join("Logs"),
            command: temp_dir.path().join("missing-binary"),
            run_dir: temp_dir.path().to_path_buf(),
            state_file: temp_dir.path().join("state.json"),
            ..SupervisorOptions::default()
        });

        let err = supervisor.start_scenery("alpha").await.unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::Process(crate::error::ProcessError::Spawn { .. })
        ));
        assert_eq!(
            StateStore::new(temp_dir.path().join("state.json"))
                .load()
                .unwrap()
                .phase,
            Phase::Stopped
        );
    }

    #[tokio::test]
    async fn test_empty_state_file_is_recovered() {
        let (temp_dir, supervisor) = setup();
        let state_file = temp_dir.path().join("state.json");
        fs::write(&state_file, "").unwrap();

        assert_eq!(
            supervisor.running_scenery().await.unwrap(),
            RunningScenery::NotRunning
        );

        fs::write(&state_file, "").unwrap();
        supervisor.stop_scenery().await.unwrap();

        fs::write(&state_file, "{\"version\": 1").unwrap();
        supervisor.start_scenery("alpha").await.unwrap();
        assert_eq!(
            supervisor.get_running_scenery().await.unwrap(),
            Some("alpha".to_string())
        );
        supervisor.stop_scenery().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_starts_leave_one_simulator() {
        let (temp_dir, _) = setup();
        let root = temp_dir.path();

        // 起動のたびに自分のPIDを書き残すシミュレータ
        let pids_file = root.join("pids.txt");
        let script = root.join("STd-recording");
        fs::write(
            &script,
            format!("#!/bin/sh\necho $$ >> '{}'\nexec sleep 30\n", pids_file.display()),
        )
        .unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        }

        let supervisor = Arc::new(SimulatorSupervisor::new(SupervisorOptions {
            scenery_dir: root.join("Logs"),
            command: script,
            xml_flag: Some("--xml".to_string()),
            run_dir: root.to_path_buf(),
            state_file: root.join("concurrent-state.json"),
            process: ProcessOptions {
                poll_interval: Duration::from_millis(20),
                spawn_grace: Duration::from_millis(200),
                ..ProcessOptions::default()
            },
        }));

        let (a, b) = tokio::join!(
            {
                let supervisor = Arc::clone(&supervisor);
                async move { supervisor.start_scenery("alpha").await }
            },
            {
                let supervisor = Arc::clone(&supervisor);
                async move { supervisor.start_scenery("beta").await }
            }
        );
        a.unwrap();
        b.unwrap();

        let status = supervisor.status().await.unwrap();
        let winner = match &status.scenery {
            RunningScenery::Running(name) => name.clone(),
            other => panic!("unexpected state: {:?}", other),
        };
        assert!(winner == "alpha" || winner == "beta");

        let pids: Vec<u32> = fs::read_to_string(&pids_file)
            .unwrap()
            .lines()
            .map(|line| line.trim().parse().unwrap())
            .collect();
        assert_eq!(pids.len(), 2);
        let alive: Vec<u32> = pids.into_iter().filter(|&pid| is_process_alive(pid)).collect();
        assert_eq!(alive, vec![status.pid.unwrap()]);

        supervisor.stop_scenery().await.unwrap();
        assert!(!is_process_alive(alive[0]));
    }

    #[test]
    fn test_scenery_args() {
        let supervisor = SimulatorSupervisor::new(SupervisorOptions::default());
        assert_eq!(
            supervisor.scenery_args(Path::new("Logs/alpha.xml")),
            vec!["--xml", "Logs/alpha.xml"]
        );

        let positional = SimulatorSupervisor::new(SupervisorOptions {
            xml_flag: None,
            ..SupervisorOptions::default()
        });
        assert_eq!(
            positional.scenery_args(Path::new("Logs/alpha.xml")),
            vec!["Logs/alpha.xml"]
        );
    }
}
