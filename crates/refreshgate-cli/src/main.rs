//! refreshgate - issue authenticated API calls from the command line.
//!
//! Every call goes through the refresh-aware client, so an expired session
//! credential is renewed transparently. The session expiry is kept in the
//! cache directory between runs.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use refreshgate_core::{
    ApiClient, ApiRequest, ApiResponse, ClientConfig, FileSessionStore, SessionTerminated,
};
use tokio::sync::broadcast;
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const USAGE: &str = "\
Usage: refreshgate <command>

Commands:
  get <path>                 GET <path> from the API
  post <path> [json]         POST <path> with an optional JSON body
  establish <rfc3339>        Record the session expiry returned by a login
  status                     Show the stored session
  logout                     Log out and forget the session";

/// How long to wait for a pending termination notice once the command is done
const NOTIFY_TIMEOUT: Duration = Duration::from_millis(500);

enum Command {
    Get(String),
    Post(String, Option<serde_json::Value>),
    Establish(DateTime<Utc>),
    Status,
    Logout,
}

/// Initialize the tracing subscriber for logging
fn init_tracing() -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();
    guard
}

fn parse_args(args: &[String]) -> Result<Command> {
    let arg = |i: usize| args.get(i).map(String::as_str);
    match (arg(0), arg(1), arg(2)) {
        (Some("get"), Some(path), None) => Ok(Command::Get(path.to_string())),
        (Some("post"), Some(path), body) => {
            let body = body
                .map(serde_json::from_str)
                .transpose()
                .context("Request body is not valid JSON")?;
            Ok(Command::Post(path.to_string(), body))
        }
        (Some("establish"), Some(expiry), None) => {
            let expires_at = DateTime::parse_from_rfc3339(expiry)
                .context("Expiry must be an RFC 3339 timestamp")?
                .with_timezone(&Utc);
            Ok(Command::Establish(expires_at))
        }
        (Some("status"), None, None) => Ok(Command::Status),
        (Some("logout"), None, None) => Ok(Command::Logout),
        _ => bail!("{}", USAGE),
    }
}

fn print_response(response: ApiResponse) -> Result<()> {
    match serde_json::from_str::<serde_json::Value>(&response.body) {
        Ok(json) => println!("{}", serde_json::to_string_pretty(&json)?),
        Err(_) if !response.body.is_empty() => println!("{}", response.body),
        Err(_) => {}
    }
    if !response.is_success() {
        bail!("Request failed with status {}", response.status);
    }
    Ok(())
}

/// First termination event, or `None` once the event channel closes.
async fn next_termination(
    mut events: broadcast::Receiver<SessionTerminated>,
) -> Option<SessionTerminated> {
    loop {
        match events.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

async fn run(client: &ApiClient, command: Command) -> Result<()> {
    match command {
        Command::Get(path) => print_response(client.send(ApiRequest::get(path)).await?),
        Command::Post(path, body) => {
            let mut request = ApiRequest::post(path);
            if let Some(body) = body {
                request = request.with_json(body);
            }
            print_response(client.send(request).await?)
        }
        Command::Establish(expires_at) => {
            client.establish_session(expires_at)?;
            println!("Session expires at {}", expires_at.to_rfc3339());
            Ok(())
        }
        Command::Status => {
            match client.session() {
                Some(session) if session.is_expired() => {
                    println!("Session expired at {} (renews on next call)", session.expires_at.to_rfc3339());
                }
                Some(session) => println!(
                    "Session expires at {} ({}m remaining)",
                    session.expires_at.to_rfc3339(),
                    session.minutes_until_expiry()
                ),
                None => println!("No session - log in and run `refreshgate establish <expiry>`"),
            }
            Ok(())
        }
        Command::Logout => {
            client.logout().await?;
            println!("Logged out");
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let _guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;

    let config = ClientConfig::load()?;
    let store = Arc::new(FileSessionStore::open(ClientConfig::cache_dir()?)?);
    // No reset hook: the process exits long before any grace delay elapses
    let client = ApiClient::new(config, store).context("Failed to create API client")?;

    let notifier = tokio::spawn(next_termination(client.subscribe_terminated()));

    let result = run(&client, command).await;

    // Dropping the client closes the event channel, so the notifier finishes
    drop(client);
    match tokio::time::timeout(NOTIFY_TIMEOUT, notifier).await {
        Ok(Ok(Some(event))) => {
            eprintln!("Session expired ({}). Please log in again.", event.reason);
        }
        Ok(_) => {}
        Err(_) => debug!("Timed out waiting for session events"),
    }
    result
}
