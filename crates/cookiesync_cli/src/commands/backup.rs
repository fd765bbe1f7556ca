//! Export and import commands.
//!
//! The backup file is the JSON document of the user-owned buckets, so a
//! file exported here can be imported by any CookieSync client.

use super::{run, unexpected};
use cookiesync_engine::{Command, Engine, Reply};
use cookiesync_protocol::Backup;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Writes all user data to `output`.
pub async fn export(engine: &Engine, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    info!("Exporting to {:?}", output);
    let reply = run(engine, Command::ExportAll).await?;
    let Reply::Backup(backup) = &reply else {
        return Err(unexpected(&reply));
    };

    let json = serde_json::to_vec_pretty(backup.as_ref())?;
    let mut file = fs::File::create(output)?;
    file.write_all(&json)?;
    file.sync_all()?;

    println!("✓ Export written");
    println!("  Path: {:?}", output);
    println!(
        "  Cookies: {}",
        backup.sync_list.as_ref().map_or(0, |l| l.len())
    );
    println!("  Size: {} bytes", json.len());
    Ok(())
}

/// Replaces all user data with the contents of `input`.
pub async fn import(engine: &Engine, input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    info!("Importing from {:?}", input);
    let bytes = fs::read(input)?;
    let backup: Backup = serde_json::from_slice(&bytes)?;
    let cookies = backup.sync_list.as_ref().map_or(0, |l| l.len());

    let reply = run(engine, Command::ImportAll { backup }).await?;
    let Reply::Integrity(report) = &reply else {
        return Err(unexpected(&reply));
    };

    println!("✓ Import complete");
    println!("  Cookies: {cookies}");
    println!("  Monitored after import: {}", report.monitored);
    Ok(())
}
