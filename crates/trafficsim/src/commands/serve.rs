use crate::{utils, web};
use colored::Colorize;
use std::net::SocketAddr;
use std::sync::Arc;
use trafficsim_config::Config;
use trafficsim_core::SimulatorSupervisor;

pub async fn handle(
    supervisor: SimulatorSupervisor,
    config: &Config,
    listen: &str,
) -> anyhow::Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .map_err(|e| anyhow::anyhow!("待ち受けアドレス '{}' が不正です: {}", listen, e))?;

    let state = web::AppState::new(
        Arc::new(supervisor),
        Arc::new(utils::build_log_catalog(config)),
    )?;

    println!("{}", "TrafficSim Web フロントエンド".bold());
    println!("  URL: {}", format!("http://{}", addr).cyan());
    println!("  停止: Ctrl+C");
    println!();

    web::serve(state, addr).await
}
