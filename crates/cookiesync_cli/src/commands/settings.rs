//! Configure and status commands.

use super::{run, unexpected};
use cookiesync_engine::{Command, Engine, Reply, SettingsUpdate};
use cookiesync_protocol::StoredSettings;

/// Runs the configure command.
pub async fn configure(
    engine: &Engine,
    endpoint: Option<String>,
    token: Option<String>,
    frequency: Option<u32>,
) -> Result<(), Box<dyn std::error::Error>> {
    if endpoint.is_none() && token.is_none() && frequency.is_none() {
        return Err("Nothing to configure; pass --endpoint, --token or --frequency".into());
    }
    let settings = SettingsUpdate {
        api_endpoint: endpoint,
        auth_token: token,
        keep_alive_frequency: frequency,
    };
    let reply = run(engine, Command::SaveSettings { settings }).await?;
    let Reply::Settings(view) = &reply else {
        return Err(unexpected(&reply));
    };

    println!("✓ Settings saved");
    println!("  Endpoint: {}", view.api_endpoint.as_deref().unwrap_or("(not set)"));
    println!("  Token: {}", if view.has_token { "set" } else { "(not set)" });
    let stored = StoredSettings {
        keep_alive_frequency: view.keep_alive_frequency,
        ..StoredSettings::default()
    };
    let (period, clamped) = engine.config().keep_alive_period(&stored);
    print!("  Keep-alive: every {} min", period.as_secs() / 60);
    if clamped {
        print!(" (raised to the minimum)");
    }
    println!();
    Ok(())
}

/// Runs the status command.
pub async fn status(engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
    let view = engine.sync().settings()?;
    let list = engine.sync().sync_list()?;
    let queue = engine.sync().retry_queue()?;

    println!("CookieSync status");
    println!();
    println!("Settings:");
    println!("  Endpoint: {}", view.api_endpoint.as_deref().unwrap_or("(not set)"));
    println!("  Token: {}", if view.has_token { "set" } else { "(not set)" });
    match view.keep_alive_frequency {
        Some(minutes) => println!("  Keep-alive frequency: {minutes} min"),
        None => println!("  Keep-alive frequency: (default)"),
    }
    println!();
    println!("Sync list: {} cookies", list.len());
    if queue.is_empty() {
        println!("Retry queue: empty");
    } else {
        println!(
            "Retry queue: {} cookies pending (run `cookiesync push`)",
            queue.len()
        );
    }

    if let Some(last) = engine.log().entries()?.first() {
        println!();
        println!(
            "Last activity: [{}] {}",
            last.timestamp.format("%Y-%m-%d %H:%M:%S"),
            last.message
        );
    }
    Ok(())
}
