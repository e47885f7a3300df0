use colored::Colorize;
use trafficsim_core::{RunningScenery, SimulatorSupervisor};

pub async fn handle(supervisor: &SimulatorSupervisor) -> anyhow::Result<()> {
    let running = supervisor.running_scenery().await?;
    if running == RunningScenery::NotRunning {
        println!("{}", "ℹ 実行中のシナリオはありません".dimmed());
        // 状態ファイルの後始末のため停止処理は常に通す
        supervisor.stop_scenery().await?;
        return Ok(());
    }

    println!("{}", "シナリオを停止中...".yellow());
    supervisor.stop_scenery().await?;

    println!();
    match running {
        RunningScenery::Running(name) => {
            println!("{}", format!("✓ '{}' を停止しました", name).green().bold());
        }
        _ => {
            println!("{}", "✓ シミュレータを停止しました".green().bold());
        }
    }

    Ok(())
}
