use colored::Colorize;
use trafficsim_core::{LogCatalog, LogRecord};

pub fn handle(catalog: &impl LogCatalog, id: Option<u64>) -> anyhow::Result<()> {
    match id {
        Some(id) => print_record(&catalog.get_log(id)?),
        None => print_table(&catalog.list_logs()?),
    }
    Ok(())
}

fn print_table(logs: &[LogRecord]) {
    if logs.is_empty() {
        println!("{}", "ログがありません".dimmed());
        return;
    }

    println!(
        "{:<6} {:<6} {:<30} {:<20} {:<10} {:>5}",
        "ID".bold(),
        "TYPE".bold(),
        "TITLE".bold(),
        "START".bold(),
        "PLAY".bold(),
        "CONN".bold()
    );
    for log in logs {
        println!(
            "{:<6} {:<6} {:<30} {:<20} {:<10} {:>5}",
            log.id,
            log.log_type,
            log.title,
            log.start_time.format("%Y-%m-%d %H:%M:%S"),
            log.play_time_display(),
            log.connections
        );
    }
}

fn print_record(log: &LogRecord) {
    println!("{}", log.title.cyan().bold());
    println!("  ID:       {}", log.id);
    println!("  種別:     {}", log.log_type);
    println!("  開始:     {}", log.start_time.format("%Y-%m-%d %H:%M:%S"));
    println!("  再生時間: {}", log.play_time_display());
    println!("  接続数:   {}", log.connections);
    println!("  ファイル: {}", log.file_name);
}
