//! Logs, statistics and integrity commands.

use super::{run, unexpected};
use cookiesync_engine::{Command, Engine, Reply};
use cookiesync_protocol::{LogLevel, StatsBook};

/// Runs the logs command.
pub async fn logs(
    engine: &Engine,
    limit: Option<usize>,
    clear: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if clear {
        run(engine, Command::ClearLogs).await?;
        println!("✓ Activity log cleared");
        return Ok(());
    }

    let reply = run(engine, Command::GetLogs).await?;
    let Reply::Logs(entries) = &reply else {
        return Err(unexpected(&reply));
    };
    if entries.is_empty() {
        println!("Activity log is empty");
        return Ok(());
    }
    for entry in entries.iter().take(limit.unwrap_or(usize::MAX)) {
        let marker = match entry.level {
            LogLevel::Info => " ",
            LogLevel::Success => "✓",
            LogLevel::Error => "✗",
        };
        println!(
            "{} {} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            marker,
            entry.message
        );
    }
    Ok(())
}

/// Runs the stats command.
pub async fn stats(engine: &Engine, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let reply = run(engine, Command::KeepAliveStats).await?;
    let Reply::Stats(book) = &reply else {
        return Err(unexpected(&reply));
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(book)?),
        "text" => print_stats(book),
        other => return Err(format!("Unknown format: {other}").into()),
    }
    Ok(())
}

fn print_stats(book: &StatsBook) {
    if book.is_empty() {
        println!("No keep-alive statistics yet");
        return;
    }
    println!(
        "{:<48} {:>8} {:>8}  {}",
        "Cookie", "Renewed", "Failed", "Last change"
    );
    for (key, entry) in book.iter() {
        let last = entry
            .last_change_timestamp
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<48} {:>8} {:>8}  {}",
            key.as_str(),
            entry.success_count,
            entry.failure_count,
            last
        );
    }
}

/// Runs the check command.
pub async fn check(engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
    println!("Running integrity check...");
    match run(engine, Command::IntegrityCheck).await {
        Ok(Reply::Integrity(report)) => {
            println!("  Monitored cookies: {}", report.monitored);
            println!("  Orphaned statistics removed: {}", report.orphans_removed);
            println!();
            println!("✓ Integrity check passed");
            Ok(())
        }
        Ok(other) => Err(unexpected(&other)),
        Err(e) => {
            println!("✗ Integrity check failed");
            Err(e)
        }
    }
}
