//! CLI command implementations.

pub mod backup;
pub mod health;
pub mod list;
pub mod remote;
pub mod settings;

use cookiesync_engine::{
    Command, Engine, EngineBuilder, EngineConfig, HttpRemote, HttpSilentLoader, MemoryCookieStore,
    Reply,
};
use cookiesync_protocol::IdentityKey;
use cookiesync_storage::FileStore;
use std::path::Path;
use std::sync::Arc;

/// Opens an engine over the state directory at `dir`.
///
/// The CLI has no browser, so the cookie store is empty and keep-alive
/// loads go over plain HTTP.
pub fn open_engine(dir: &Path, secret: Option<&str>) -> Result<Engine, Box<dyn std::error::Error>> {
    let mut config = EngineConfig::new();
    if let Some(secret) = secret {
        config = config.with_credential_secret(secret);
    }
    let store = FileStore::open_with_create_dirs(dir)?;
    let remote = HttpRemote::new(config.http_timeout)?;
    let loader = HttpSilentLoader::new(config.load_timeout)?;

    let (engine, _events) = EngineBuilder::new(Arc::new(store))
        .config(config)
        .remote(Arc::new(remote))
        .cookie_store(Arc::new(MemoryCookieStore::new()))
        .silent_loader(Arc::new(loader))
        .build()?;
    Ok(engine)
}

/// Dispatches `command` and turns a failed response into an error.
pub async fn run(engine: &Engine, command: Command) -> Result<Reply, Box<dyn std::error::Error>> {
    let response = engine.dispatch(command).await;
    if response.success {
        Ok(response.reply)
    } else {
        Err(response
            .error
            .unwrap_or_else(|| "command failed".to_string())
            .into())
    }
}

/// Parses a `name|domain|path` identity key.
pub fn parse_key(raw: &str) -> Result<IdentityKey, Box<dyn std::error::Error>> {
    let key = IdentityKey::from_raw(raw);
    key.parts()?;
    Ok(key)
}

fn unexpected(reply: &Reply) -> Box<dyn std::error::Error> {
    format!("unexpected reply: {reply:?}").into()
}
