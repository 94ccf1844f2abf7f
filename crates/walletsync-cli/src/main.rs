//! walletsync - command line front end for wallet-authorized backup sync.
//!
//! Runs sync checks and backup transfers with the configured credentials,
//! inspects stored login state, and serves the authentication proxy.

mod app;

use std::io;
use std::net::SocketAddr;
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use walletsync_core::auth::token::token_expiry;
use walletsync_core::auth::{
    is_valid_token, AuthStatus, CredentialStore, Notice, UcanRoot, UcanSession,
};
use walletsync_core::proxy::{self, ProxyState};
use walletsync_core::store::keys;
use walletsync_core::{Config, StorageError};

use app::App;

// ============================================================================
// Constants
// ============================================================================

/// Directory for an additional daily-rolling log file
const LOG_DIR_ENV: &str = "WALLETSYNC_LOG_DIR";

const LOG_FILE_PREFIX: &str = "walletsync.log";

/// Default bind address for the authentication proxy
const DEFAULT_PROXY_ADDR: &str = "127.0.0.1:3000";

/// Backup key passed to the sync client; the remote path is fixed.
const BACKUP_KEY: &str = "sync";

const USAGE: &str = "\
Usage: walletsync <command>

Commands:
  init                          Write a default config file
  check                         Check that the sync remote is reachable
  pull [file]                   Download the backup (stdout when no file is given)
  push <file>                   Upload a backup file
  status                        Show account, token and UCAN authorization state
  token [jwt]                   Inspect an access token (defaults to the stored one)
  ucan import <session> <root>  Store a signed UCAN session and root (JSON files)
  ucan clear                    Forget the stored UCAN session and root
  lock [release]                Show or release the wallet sign lock
  set-password <username>       Store a basic-auth password in the OS keychain
  forget-password <username>    Remove a basic-auth password from the OS keychain
  serve-auth-proxy [addr]       Forward login endpoints to ROUTER_BACKEND_URL
";

/// Initialize the tracing subscriber for logging
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("help");
    let rest = args.get(1..).unwrap_or_default();

    let config = Config::load()?;
    info!(command, "walletsync starting");

    match command {
        "init" => init(),
        "check" => check(&App::new(config)?).await,
        "pull" => pull(&App::new(config)?, rest.first()).await,
        "push" => push(&App::new(config)?, rest.first()).await,
        "status" => status(&App::new(config)?),
        "token" => token(&App::new(config)?, rest.first()),
        "ucan" => ucan(&App::new(config)?, rest),
        "lock" => lock(&App::new(config)?, rest.first()),
        "set-password" => set_password(rest.first()),
        "forget-password" => forget_password(rest.first()),
        "serve-auth-proxy" => serve_auth_proxy(&config, rest.first()).await,
        "help" | "--help" | "-h" => {
            print!("{}", USAGE);
            Ok(())
        }
        other => {
            eprint!("{}", USAGE);
            bail!("Unknown command: {}", other)
        }
    }
}

fn init() -> Result<()> {
    let path = Config::config_path()?;
    if path.exists() {
        bail!("Config already exists at {}", path.display());
    }
    Config::default().save()?;
    println!("Wrote default config to {}", path.display());
    Ok(())
}

/// Attach the user-facing explanation for a failed sync call.
fn sync_failure(err: StorageError) -> anyhow::Error {
    let notice = Notice::for_error(&err.classify());
    anyhow::Error::new(err).context(notice.message)
}

async fn check(app: &App) -> Result<()> {
    if app.sync_client().check().await {
        println!("Sync remote reachable");
        Ok(())
    } else {
        bail!("Sync remote is not reachable (run with RUST_LOG=debug for details)")
    }
}

async fn pull(app: &App, file: Option<&String>) -> Result<()> {
    let backup = app
        .sync_client()
        .get(BACKUP_KEY)
        .await
        .map_err(sync_failure)?;
    if backup.is_empty() {
        println!("No remote backup yet");
        return Ok(());
    }
    match file {
        Some(path) => {
            std::fs::write(path, &backup)
                .with_context(|| format!("Failed to write backup to {}", path))?;
            println!("Saved {} bytes to {}", backup.len(), path);
        }
        None => println!("{}", backup),
    }
    Ok(())
}

async fn push(app: &App, file: Option<&String>) -> Result<()> {
    let Some(path) = file else {
        bail!("Usage: walletsync push <file>");
    };
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read backup file {}", path))?;
    serde_json::from_str::<serde_json::Value>(&contents)
        .with_context(|| format!("{} is not valid JSON", path))?;

    app.sync_client()
        .set(BACKUP_KEY, &contents)
        .await
        .map_err(sync_failure)?;
    println!("Uploaded {} bytes", contents.len());
    Ok(())
}

fn status(app: &App) -> Result<()> {
    let account = app.auth.current_account();
    println!(
        "Account:  {}",
        if account.is_empty() { "(none)" } else { account.as_str() }
    );

    let token = match app.auth.auth_token() {
        None => "(none)".to_string(),
        Some(token) => describe_token(&token),
    };
    println!("Token:    {}", token);

    let ucan = match app.auth.status() {
        AuthStatus::Authorized => "authorized",
        AuthStatus::Expired => "expired, sign in again",
        AuthStatus::Unauthorized => "not authorized",
    };
    println!("UCAN:     {}", ucan);
    println!(
        "Sign lock: {}",
        if app.sign_lock.is_pending() { "pending" } else { "free" }
    );
    Ok(())
}

fn token(app: &App, raw: Option<&String>) -> Result<()> {
    let token = match raw {
        Some(token) => token.clone(),
        None => app
            .store
            .get(keys::AUTH_TOKEN)
            .context("No stored access token")?,
    };
    println!("{}", describe_token(&token));
    Ok(())
}

fn describe_token(token: &str) -> String {
    let Some(exp) = token_expiry(token) else {
        return "malformed".to_string();
    };
    let expires = DateTime::<Utc>::from_timestamp(exp as i64, 0)
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| exp.to_string());
    if is_valid_token(token, Utc::now().timestamp()) {
        format!("valid until {}", expires)
    } else {
        format!("expired at {}", expires)
    }
}

fn ucan(app: &App, args: &[String]) -> Result<()> {
    match args {
        [cmd, session, root] if cmd == "import" => {
            let session: UcanSession = read_json(Path::new(session))?;
            let root: UcanRoot = read_json(Path::new(root))?;
            app.sessions.validate_root(&root, &session)?;
            app.sessions.store_session(session);
            app.sessions.store_root(&root);
            app.auth.announce_auth_change();
            println!("UCAN session stored");
            Ok(())
        }
        [cmd] if cmd == "clear" => {
            app.sessions.clear();
            println!("UCAN session cleared");
            Ok(())
        }
        _ => bail!("Usage: walletsync ucan import <session.json> <root.json> | ucan clear"),
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse {}", path.display()))
}

fn lock(app: &App, action: Option<&String>) -> Result<()> {
    match action.map(String::as_str) {
        None => {
            println!("{}", if app.sign_lock.is_pending() { "pending" } else { "free" });
            Ok(())
        }
        Some("release") => {
            app.sign_lock.release();
            println!("Sign lock released");
            Ok(())
        }
        Some(other) => bail!("Unknown lock action: {}", other),
    }
}

fn set_password(username: Option<&String>) -> Result<()> {
    let Some(username) = username else {
        bail!("Usage: walletsync set-password <username>");
    };
    let password = rpassword::prompt_password("Password: ")?;
    CredentialStore::store(username, &password)?;
    println!("Password stored in the OS keychain for {}", username);
    Ok(())
}

fn forget_password(username: Option<&String>) -> Result<()> {
    let Some(username) = username else {
        bail!("Usage: walletsync forget-password <username>");
    };
    if CredentialStore::delete(username)? {
        println!("Password removed from the OS keychain for {}", username);
    } else {
        println!("No stored password for {}", username);
    }
    Ok(())
}

async fn serve_auth_proxy(config: &Config, addr: Option<&String>) -> Result<()> {
    let addr: SocketAddr = addr
        .map(String::as_str)
        .unwrap_or(DEFAULT_PROXY_ADDR)
        .parse()
        .context("Invalid listen address")?;
    let state = ProxyState::new(&config.auth.router_backend_url)?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    println!("Auth proxy listening on {}", listener.local_addr()?);
    proxy::serve(listener, state).await?;
    Ok(())
}
