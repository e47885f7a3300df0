//! 外部プロセスの起動・停止・状態確認
//!
//! 1つのコマンドを1つのOSプロセスとして管理します。
//! PIDは [`PidStore`] に永続化され、別プロセス（CLIの別起動など）からも
//! 同じプロセスを追跡できます。

use crate::error::ProcessError;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

type Result<T> = std::result::Result<T, ProcessError>;

/// PIDの永続化先
pub trait PidStore: Send + Sync {
    /// 記録されているPIDを読む（記録なしは `None`）
    fn load_pid(&self) -> Result<Option<u32>>;

    /// 起動したプロセスのPIDを記録する
    fn save_pid(&self, pid: u32) -> Result<()>;

    /// PIDの記録を消す（記録がなければ何もしない）
    fn clear_pid(&self) -> Result<()>;

    /// 記録が `pid` のままなら消す
    ///
    /// 確認と削除の間に別の起動が新しいPIDを記録していれば何もせず `false`。
    fn clear_pid_if(&self, pid: u32) -> Result<bool>;
}

/// `<command>.pid` 形式のPIDファイル
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// コマンド名から `<dir>/<command>.pid` を作る
    pub fn for_command(dir: impl AsRef<Path>, command: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(format!("{}.pid", command_file_name(command))))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn record_error(&self, err: impl std::fmt::Display) -> ProcessError {
        ProcessError::PidRecord {
            path: self.path.clone(),
            message: err.to_string(),
        }
    }
}

impl PidStore for PidFile {
    fn load_pid(&self) -> Result<Option<u32>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.record_error(e)),
        };

        match content.trim().parse::<u32>() {
            Ok(pid) if pid > 0 => Ok(Some(pid)),
            _ => {
                // 壊れたPIDファイルは「記録なし」として扱う
                warn!(path = %self.path.display(), content = %content.trim(), "Discarding unreadable pid file");
                self.clear_pid()?;
                Ok(None)
            }
        }
    }

    fn save_pid(&self, pid: u32) -> Result<()> {
        write_atomic(&self.path, pid.to_string().as_bytes()).map_err(|e| self.record_error(e))
    }

    fn clear_pid(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.record_error(e)),
        }
    }

    fn clear_pid_if(&self, pid: u32) -> Result<bool> {
        if self.load_pid()? != Some(pid) {
            return Ok(false);
        }
        self.clear_pid()?;
        Ok(true)
    }
}

/// 同じディレクトリの一時ファイルに書いてから rename する
///
/// 一時ファイル名は書き手ごとに一意。
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}

fn command_file_name(command: impl AsRef<Path>) -> String {
    let command = command.as_ref();
    command
        .file_name()
        .unwrap_or(command.as_os_str())
        .to_string_lossy()
        .into_owned()
}

/// 指定PIDのプロセスが存在するか
pub fn is_process_alive(pid: u32) -> bool {
    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }

    // signal 0 を送ることで存在確認が可能
    match signal::kill(Pid::from_raw(raw), None) {
        Ok(()) => !is_zombie(pid),
        // 存在するが権限がない
        Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(target_os = "linux")]
fn is_zombie(pid: u32) -> bool {
    // /proc/<pid>/stat の3番目のフィールドが状態（コマンド名は括弧内に空白を含みうる）
    fs::read_to_string(format!("/proc/{}/stat", pid))
        .ok()
        .and_then(|stat| {
            stat.rsplit_once(')')
                .map(|(_, rest)| rest.trim_start().starts_with('Z'))
        })
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn is_zombie(_pid: u32) -> bool {
    false
}

/// 停止・起動時の待機設定
#[derive(Debug, Clone)]
pub struct ProcessOptions {
    /// SIGTERM 後に終了を待つ時間
    pub stop_timeout: Duration,
    /// SIGKILL 後に終了を待つ時間
    pub kill_timeout: Duration,
    /// 終了確認のポーリング間隔
    pub poll_interval: Duration,
    /// 起動直後の終了を検出するための待機時間
    pub spawn_grace: Duration,
    /// タイムアウト後に SIGKILL を送るか
    pub force_kill: bool,
    /// 子プロセスの作業ディレクトリ
    pub working_dir: Option<PathBuf>,
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(5),
            kill_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(200),
            spawn_grace: Duration::from_millis(300),
            force_kill: true,
            working_dir: None,
        }
    }
}

/// 1つの外部プロセスのハンドル
///
/// 自分で起動した子プロセスは [`Child`] を保持して `try_wait` で回収し、
/// それ以外（別の起動で記録されたPID）はOSへの存在確認にフォールバックします。
#[derive(Debug)]
pub struct ProcessHandle<S: PidStore = PidFile> {
    command: PathBuf,
    args: Vec<String>,
    store: S,
    log_path: PathBuf,
    options: ProcessOptions,
    pid: Option<u32>,
    child: Option<Child>,
    last_exit: Option<ExitStatus>,
}

impl ProcessHandle<PidFile> {
    /// `<run_dir>/<command>.pid` と `<run_dir>/<command>.log.txt` を使うハンドル
    pub fn in_dir(
        command: impl Into<PathBuf>,
        args: Vec<String>,
        run_dir: impl AsRef<Path>,
    ) -> Self {
        let command = command.into();
        let store = PidFile::for_command(run_dir.as_ref(), &command);
        Self::new(command, args, store).with_log_dir(run_dir)
    }
}

impl<S: PidStore> ProcessHandle<S> {
    pub fn new(command: impl Into<PathBuf>, args: Vec<String>, store: S) -> Self {
        let command = command.into();
        let log_path = PathBuf::from(format!("{}.log.txt", command_file_name(&command)));
        Self {
            command,
            args,
            store,
            log_path,
            options: ProcessOptions::default(),
            pid: None,
            child: None,
            last_exit: None,
        }
    }

    /// 出力の保存先を `<dir>/<command>.log.txt` にする
    pub fn with_log_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.log_path = dir
            .as_ref()
            .join(format!("{}.log.txt", command_file_name(&self.command)));
        self
    }

    pub fn with_options(mut self, options: ProcessOptions) -> Self {
        self.options = options;
        self
    }

    pub fn command(&self) -> &Path {
        &self.command
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// 次回の起動で使う引数を差し替える（実行中のプロセスには影響しない）
    pub fn set_args(&mut self, args: Vec<String>) {
        self.args = args;
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// 直近に回収した子プロセスの終了ステータス
    pub fn last_exit(&self) -> Option<ExitStatus> {
        self.last_exit
    }

    /// 直近の状態確認で追跡していたPID（再確認はしない）
    pub fn last_known_pid(&self) -> Option<u32> {
        self.pid
    }

    /// プロセスが実行中か確認する
    ///
    /// 記録されたプロセスが既に存在しなければ、PIDの記録を削除して `false` を返す。
    pub fn status(&mut self) -> Result<bool> {
        let Some(pid) = self.store.load_pid()? else {
            self.pid = None;
            return Ok(false);
        };

        if let Some(child) = self.child.as_mut() {
            if child.id() == pid {
                match child.try_wait() {
                    Ok(Some(exit)) => {
                        debug!(pid, %exit, "Reaped child process");
                        self.last_exit = Some(exit);
                        self.child = None;
                        self.forget(pid)?;
                        return Ok(false);
                    }
                    Ok(None) => {
                        self.pid = Some(pid);
                        return Ok(true);
                    }
                    Err(e) => {
                        warn!(pid, error = %e, "try_wait failed, falling back to signal check");
                    }
                }
            } else {
                // 記録が別のプロセスを指している
                if let Ok(Some(exit)) = child.try_wait() {
                    self.last_exit = Some(exit);
                }
                self.child = None;
            }
        }

        if is_process_alive(pid) {
            self.pid = Some(pid);
            Ok(true)
        } else {
            self.forget(pid)?;
            Ok(false)
        }
    }

    /// 状態を再確認してから追跡中のPIDを返す
    pub fn pid(&mut self) -> Result<Option<u32>> {
        self.status()?;
        Ok(self.pid)
    }

    /// プロセスを起動する
    ///
    /// 既に実行中なら何もせず `true` を返す。起動直後に終了した場合は `false`。
    pub async fn start(&mut self) -> Result<bool> {
        if self.status()? {
            debug!(pid = ?self.pid, command = %self.command.display(), "Process already running");
            return Ok(true);
        }

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|source| ProcessError::LogFile {
                path: self.log_path.clone(),
                source,
            })?;
        let log_err = log.try_clone().map_err(|source| ProcessError::LogFile {
            path: self.log_path.clone(),
            source,
        })?;

        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        if let Some(dir) = &self.options.working_dir {
            command.current_dir(dir);
        }
        #[cfg(unix)]
        {
            // 呼び出し元の端末シグナルを受けないよう別プロセスグループにする
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            command: self.command.display().to_string(),
            source,
        })?;
        let pid = child.id();

        if let Err(e) = self.store.save_pid(pid) {
            // 追跡できないプロセスを残さない
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }

        info!(
            pid,
            command = %self.command.display(),
            args = ?self.args,
            log = %self.log_path.display(),
            "Process started"
        );
        self.child = Some(child);
        self.pid = Some(pid);
        self.last_exit = None;

        tokio::time::sleep(self.options.spawn_grace).await;

        let running = self.status()?;
        if !running {
            warn!(
                pid,
                exit = ?self.last_exit,
                log = %self.log_path.display(),
                "Process exited right after start"
            );
        }
        Ok(running)
    }

    /// プロセスを停止する
    ///
    /// SIGTERM を送り、終了を確認できなければ（`force_kill` 時）SIGKILL を送る。
    /// 停止を確認できたら `true`。何も実行されていなければ何もせず `true`。
    pub async fn stop(&mut self) -> Result<bool> {
        if !self.status()? {
            return Ok(true);
        }
        let Some(pid) = self.pid else {
            return Ok(true);
        };

        info!(pid, "Sending SIGTERM to process");
        self.send_signal(pid, Signal::SIGTERM)?;
        if self.wait_for_exit(self.options.stop_timeout).await? {
            info!(pid, "Process exited gracefully");
            return Ok(true);
        }

        if self.options.force_kill {
            warn!(pid, "Timeout reached. Sending SIGKILL to process");
            self.send_signal(pid, Signal::SIGKILL)?;
            if self.wait_for_exit(self.options.kill_timeout).await? {
                info!(pid, "Process killed");
                return Ok(true);
            }
        }

        warn!(pid, "Process is still alive after stop");
        Ok(false)
    }

    fn send_signal(&self, pid: u32, sig: Signal) -> Result<()> {
        let raw = i32::try_from(pid).map_err(|_| ProcessError::Signal {
            pid,
            source: Errno::EINVAL,
        })?;
        match signal::kill(Pid::from_raw(raw), sig) {
            Ok(()) => Ok(()),
            // 既に終了している
            Err(Errno::ESRCH) => Ok(()),
            Err(source) => Err(ProcessError::Signal { pid, source }),
        }
    }

    async fn wait_for_exit(&mut self, timeout: Duration) -> Result<bool> {
        let start = Instant::now();
        loop {
            if !self.status()? {
                return Ok(true);
            }
            if start.elapsed() >= timeout {
                return Ok(false);
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    fn forget(&mut self, pid: u32) -> Result<()> {
        if self.store.clear_pid_if(pid)? {
            info!(pid, command = %self.command.display(), "Process is gone, cleared pid record");
        } else {
            debug!(pid, "Pid record was replaced by another start, leaving it");
        }
        self.pid = None;
        Ok(())
    }
}
