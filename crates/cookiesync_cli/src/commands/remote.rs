//! Commands that talk to the remote API.

use super::{run, unexpected};
use cookiesync_engine::{Command, Engine, Reply};

/// Runs the test-connection command.
pub async fn test_connection(engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
    match run(engine, Command::TestConnection).await {
        Ok(_) => {
            println!("✓ Connection and authentication OK");
            Ok(())
        }
        Err(e) => {
            println!("✗ Connection test failed");
            Err(e)
        }
    }
}

/// Runs the sharing command. `None` only shows the current state.
pub async fn sharing(
    engine: &Engine,
    change: Option<bool>,
) -> Result<(), Box<dyn std::error::Error>> {
    let command = match change {
        Some(sharing_enabled) => Command::UpdateUserSettings { sharing_enabled },
        None => Command::GetUserSettings,
    };
    let reply = run(engine, command).await?;
    let Reply::UserSettings(settings) = &reply else {
        return Err(unexpected(&reply));
    };
    let state = if settings.sharing_enabled {
        "enabled"
    } else {
        "disabled"
    };
    match change {
        Some(_) => println!("✓ Sharing {state}"),
        None => println!("Sharing is {state}"),
    }
    Ok(())
}
