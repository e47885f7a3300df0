mod commands;
mod utils;
mod web;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "simctl")]
#[command(about = "TrafficSim シミュレータの起動・停止・監視", long_about = None)]
struct Cli {
    /// 設定ファイル（TRAFFICSIM_CONFIG_PATH 環境変数でも指定可能）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// シナリオディレクトリ（設定ファイルより優先）
    #[arg(long, global = true, env = "TRAFFICSIM_SCENERY_DIR")]
    scenery_dir: Option<PathBuf>,
    /// 詳細ログを出力
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 実行中のシナリオを表示
    Status {
        /// JSONで出力
        #[arg(long)]
        json: bool,
    },
    /// シナリオの一覧を表示
    List,
    /// シナリオの説明を表示
    Info {
        /// シナリオ名
        scenery: String,
    },
    /// シナリオを起動（実行中のシナリオは停止してから起動し直す）
    Start {
        /// シナリオ名
        scenery: String,
    },
    /// 実行中のシナリオを停止
    Stop,
    /// 過去のセッションログを表示
    Logs {
        /// ログID（省略時は一覧）
        id: Option<u64>,
    },
    /// Webフロントエンドを起動
    Serve {
        /// 待ち受けアドレス（例: 0.0.0.0:8080）
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// バージョン情報を表示
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 通常のCLIコマンドは警告以上、serve は info 以上を stderr に出力
    let default_level = if cli.verbose {
        "debug"
    } else if matches!(cli.command, Commands::Serve { .. }) {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    // Versionコマンドは設定ファイル不要
    if matches!(cli.command, Commands::Version) {
        println!("trafficsim {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config = utils::load_config(cli.config.as_deref(), cli.scenery_dir.as_deref())?;
    let supervisor = utils::build_supervisor(&config);

    // コマンドディスパッチ
    match cli.command {
        Commands::Status { json } => {
            commands::status::handle(&supervisor, json).await?;
        }
        Commands::List => {
            commands::scenery::handle_list(&supervisor).await?;
        }
        Commands::Info { scenery } => {
            commands::scenery::handle_info(&supervisor, &scenery)?;
        }
        Commands::Start { scenery } => {
            commands::start::handle(&supervisor, &scenery).await?;
        }
        Commands::Stop => {
            commands::stop::handle(&supervisor).await?;
        }
        Commands::Logs { id } => {
            let catalog = utils::build_log_catalog(&config);
            commands::logs::handle(&catalog, id)?;
        }
        Commands::Serve { listen } => {
            let listen = listen.unwrap_or_else(|| config.listen.clone());
            commands::serve::handle(supervisor, &config, &listen).await?;
        }
        Commands::Version => {
            unreachable!("Version is handled before config loading");
        }
    }

    Ok(())
}
