use std::path::Path;
use trafficsim_config::Config;
use trafficsim_core::{JsonLogCatalog, ProcessOptions, SimulatorSupervisor, SupervisorOptions};

/// 設定を読み込み、コマンドライン引数で上書きする
pub fn load_config(path: Option<&Path>, scenery_dir: Option<&Path>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)?,
        None => {
            let (config, found) = Config::load()?;
            match found {
                Some(path) => tracing::debug!(path = %path.display(), "Using config file"),
                None => tracing::debug!("Using default config"),
            }
            config
        }
    };

    if let Some(dir) = scenery_dir {
        config.scenery_dir = dir.to_path_buf();
    }
    Ok(config)
}

pub fn supervisor_options(config: &Config) -> SupervisorOptions {
    SupervisorOptions {
        scenery_dir: config.scenery_dir.clone(),
        command: config.command.clone(),
        xml_flag: config.xml_flag.clone(),
        run_dir: config.run_dir.clone(),
        state_file: config.state_file.clone(),
        process: ProcessOptions {
            stop_timeout: config.stop_timeout(),
            kill_timeout: config.kill_timeout(),
            poll_interval: config.poll_interval(),
            spawn_grace: config.spawn_grace(),
            force_kill: config.force_kill,
            working_dir: None,
        },
    }
}

pub fn build_supervisor(config: &Config) -> SimulatorSupervisor {
    SimulatorSupervisor::new(supervisor_options(config))
}

pub fn build_log_catalog(config: &Config) -> JsonLogCatalog {
    JsonLogCatalog::new(&config.log_catalog)
}
