//! Sync list commands.

use super::{parse_key, run, unexpected};
use cookiesync_engine::{Command, Engine, PushOutcome, Reply};
use cookiesync_protocol::{registrable_domain, SyncList};

/// Runs the list command.
pub async fn list(engine: &Engine, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let reply = run(engine, Command::GetSyncList).await?;
    let Reply::SyncList(list) = &reply else {
        return Err(unexpected(&reply));
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(list)?),
        "text" => print_list(list),
        other => return Err(format!("Unknown format: {other}").into()),
    }
    Ok(())
}

fn print_list(list: &SyncList) {
    if list.is_empty() {
        println!("Sync list is empty");
        return;
    }
    println!("{} cookies:", list.len());

    let mut records: Vec<_> = list.iter().collect();
    records.sort_by_key(|r| (registrable_domain(&r.domain), r.domain.clone(), r.name.clone()));

    let mut current = None;
    for record in records {
        let group = registrable_domain(&record.domain);
        if current.as_ref() != Some(&group) {
            println!();
            println!("{group}");
            current = Some(group);
        }
        let mut flags = Vec::new();
        if record.is_sharable() {
            flags.push("sharable".to_string());
        }
        if let Some(remark) = &record.remark {
            flags.push(format!("remark: {remark}"));
        }
        let flags = if flags.is_empty() {
            String::new()
        } else {
            format!("  ({})", flags.join(", "))
        };
        println!("  {}{}", record.identity_key(), flags);
    }
}

/// Runs the remove command.
pub async fn remove(
    engine: &Engine,
    key: &str,
    push_after: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = parse_key(key)?;
    let reply = run(engine, Command::RemoveCookie { key: key.clone() }).await?;
    let Reply::Removed(summary) = &reply else {
        return Err(unexpected(&reply));
    };
    println!("✓ Removed {key} ({} left)", summary.total);
    finish_edit(engine, push_after).await
}

/// Runs the remove-domain command.
pub async fn remove_domain(
    engine: &Engine,
    domain: &str,
    push_after: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let reply = run(
        engine,
        Command::RemoveDomain {
            domain: domain.to_string(),
        },
    )
    .await?;
    let Reply::Removed(summary) = &reply else {
        return Err(unexpected(&reply));
    };
    println!(
        "✓ Removed {} cookies of {domain} ({} left)",
        summary.removed, summary.total
    );
    finish_edit(engine, push_after).await
}

/// Runs the remark command.
pub async fn remark(
    engine: &Engine,
    key: &str,
    remark: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let key = parse_key(key)?;
    run(engine, Command::UpdateRemark { key: key.clone(), remark }).await?;
    println!("✓ Remark of {key} updated");
    Ok(())
}

/// Runs the push command.
pub async fn push(engine: &Engine) -> Result<(), Box<dyn std::error::Error>> {
    let reply = run(engine, Command::ManualPush).await?;
    match reply {
        Reply::Pushed(PushOutcome::Pushed { count }) => println!("✓ Pushed {count} cookies"),
        Reply::Pushed(PushOutcome::Empty) => println!("Nothing to push"),
        other => return Err(unexpected(&other)),
    }
    Ok(())
}

/// A one-shot process never sees the debounce window close.
async fn finish_edit(engine: &Engine, push_after: bool) -> Result<(), Box<dyn std::error::Error>> {
    if push_after {
        push(engine).await
    } else {
        println!("  Run `cookiesync push` to sync the change");
        Ok(())
    }
}
