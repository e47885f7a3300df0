use colored::Colorize;
use trafficsim_core::{RunningScenery, SimulatorSupervisor};

pub async fn handle(supervisor: &SimulatorSupervisor, json: bool) -> anyhow::Result<()> {
    let status = supervisor.status().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let pid = status
        .pid
        .map(|pid| pid.to_string())
        .unwrap_or_else(|| "-".to_string());

    match &status.scenery {
        RunningScenery::Running(name) => {
            println!(
                "{} {} {}",
                "●".green(),
                name.cyan().bold(),
                format!("(pid {})", pid).dimmed()
            );
        }
        RunningScenery::NotRunning => {
            println!("{}", "○ 実行中のシナリオはありません".dimmed());
        }
        RunningScenery::Transitioning(phase) => {
            println!(
                "{} 状態遷移中: {} {}",
                "◐".yellow(),
                phase.to_string().yellow(),
                format!("(pid {})", pid).dimmed()
            );
        }
        RunningScenery::Unknown => {
            println!(
                "{} シナリオ不明のプロセスが実行中です (pid {})",
                "⚠".yellow(),
                pid
            );
            println!("  ヒント: {} で停止できます", "simctl stop".cyan());
        }
    }

    Ok(())
}
