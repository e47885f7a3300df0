use colored::Colorize;
use trafficsim_core::SimulatorSupervisor;

pub async fn handle(supervisor: &SimulatorSupervisor, scenery: &str) -> anyhow::Result<()> {
    println!("{}", format!("シナリオ '{}' を起動中...", scenery).green());

    supervisor.start_scenery(scenery).await?;

    let status = supervisor.status().await?;
    println!();
    println!(
        "{}",
        format!("✓ '{}' を起動しました", scenery).green().bold()
    );
    if let Some(pid) = status.pid {
        println!("  pid: {}", pid.to_string().cyan());
    }
    println!(
        "  ログ: {}",
        supervisor.log_path().await.display().to_string().cyan()
    );

    Ok(())
}
