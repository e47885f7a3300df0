use colored::Colorize;
use trafficsim_core::{RunningScenery, SimulatorSupervisor};

pub async fn handle_list(supervisor: &SimulatorSupervisor) -> anyhow::Result<()> {
    let sceneries = supervisor.list_sceneries()?;
    let running = match supervisor.running_scenery().await? {
        RunningScenery::Running(name) => Some(name),
        _ => None,
    };

    println!(
        "📂 {} ({} 件)",
        supervisor.sceneries().dir().display().to_string().cyan(),
        sceneries.len()
    );
    if sceneries.is_empty() {
        println!("{}", "  シナリオが見つかりません".dimmed());
        return Ok(());
    }

    for name in &sceneries {
        if running.as_deref() == Some(name.as_str()) {
            println!("  {} {} {}", "●".green(), name.bold(), "(実行中)".green());
        } else {
            println!("  {} {}", "○".dimmed(), name);
        }
    }

    Ok(())
}

pub fn handle_info(supervisor: &SimulatorSupervisor, scenery: &str) -> anyhow::Result<()> {
    let info = supervisor.scenery_info(scenery)?;
    println!("{}", scenery.cyan().bold());
    println!("{}", info.trim_end());
    Ok(())
}
