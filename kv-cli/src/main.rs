use std::env;
use std::panic;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use log::info;
use tokio::net::TcpStream;

use kvcli::config::ConfigLoad;
use kvcli::trace;
use metakv::client::{self, Transaction};
use metakv::conn::Connection;
use metakv::error::{CResult, Error};
use metakv::wire::Message;

/// A client of the transactional KV wire protocol: each subcommand opens
/// one connection, runs exactly one transaction through the real client
/// runtime, and prints the result. There is no REPL and no SQL-like query
/// language here — every operation maps directly onto spec §6's
/// language-agnostic transaction API.
#[derive(Debug, Parser)]
#[command(name = "kvcli", author, version, about = "transactional KV store CLI")]
struct Args {
    /// Address to connect to, overriding the config file.
    #[clap(short = 'H', long)]
    connect: Option<String>,

    /// Configuration file path.
    #[clap(short = 'c', long)]
    config: Option<String>,

    /// Transaction retry budget, overriding the config file.
    #[clap(long)]
    max_retry: Option<u32>,

    #[clap(short = 'l', long)]
    log_level: Option<String>,

    #[clap(subcommand)]
    cmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// Fetch one key.
    Get { key: String },
    /// Set one key to a value.
    Put { key: String, value: String },
    /// Delete one key.
    Del { key: String },
    /// List keys in `[start, end)`.
    Scan {
        start: String,
        end: String,
        #[clap(long)]
        keys_only: bool,
        #[clap(long, default_value_t = 0)]
        limit: u64,
    },
    /// Delete every key under `prefix` in one transaction.
    DeleteRange { prefix: String },
    /// Wipe every entry in the store.
    Reset,
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_panic_hooks();

    let args = Args::parse();
    let cfg = match &args.config {
        Some(path) => ConfigLoad::load_path(path).unwrap_or_default(),
        None => ConfigLoad::load().unwrap_or_default(),
    };

    let log_dir = format!("{}/.kvcli", env::var("HOME").unwrap_or_else(|_| ".".to_string()));
    let log_level = args.log_level.as_deref().unwrap_or(&cfg.log_level);
    let _guards = trace::init_logging(&log_dir, "kvcli", log_level)?;

    let addr = args.connect.clone().unwrap_or_else(|| cfg.connect.clone());
    let max_retry = args.max_retry.unwrap_or(cfg.max_retry);

    info!("kvcli connecting to {addr}");
    let stream = TcpStream::connect(&addr).await.map_err(|err| anyhow!("connect to {addr} failed: {err}"))?;
    let conn = Connection::spawn(stream);

    match run_cmd(conn, max_retry, args.cmd).await {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(err) => {
            eprintln!("{} {err}", "error:".red().bold());
            std::process::exit(1);
        }
    }
}

async fn run_cmd(conn: Arc<Connection>, max_retry: u32, cmd: Cmd) -> CResult<String> {
    match cmd {
        Cmd::Get { key } => {
            let key = key.into_bytes();
            client::run(conn, max_retry, |tx: &mut Transaction| {
                let key = key.clone();
                Box::pin(async move {
                    match tx.get(&key).await? {
                        Some(value) => Ok(format_value(&value)),
                        None => Ok("(not found)".to_string()),
                    }
                })
            })
            .await
        }

        Cmd::Put { key, value } => {
            let key = key.into_bytes();
            let value = value.into_bytes();
            client::run(conn, max_retry, |tx: &mut Transaction| {
                let (key, value) = (key.clone(), value.clone());
                Box::pin(async move {
                    tx.set(&key, value);
                    Ok(())
                })
            })
            .await?;
            Ok("OK".green().to_string())
        }

        Cmd::Del { key } => {
            let key = key.into_bytes();
            client::run(conn, max_retry, |tx: &mut Transaction| {
                let key = key.clone();
                Box::pin(async move {
                    tx.delete(&key);
                    Ok(())
                })
            })
            .await?;
            Ok("OK".green().to_string())
        }

        Cmd::Scan { start, end, keys_only, limit } => {
            let (start, end) = (start.into_bytes(), end.into_bytes());
            client::run(conn, max_retry, |tx: &mut Transaction| {
                let (start, end) = (start.clone(), end.clone());
                Box::pin(async move {
                    let mut lines = Vec::new();
                    let mut seen = 0u64;
                    tx.scan(&start, &end, keys_only, |key, value| {
                        lines.push(format_entry(key, value));
                        seen += 1;
                        limit == 0 || seen < limit
                    })
                    .await?;
                    Ok(lines.join("\n"))
                })
            })
            .await
        }

        Cmd::DeleteRange { prefix } => {
            let prefix = prefix.into_bytes();
            let n = client::run(conn, max_retry, |tx: &mut Transaction| {
                let prefix = prefix.clone();
                Box::pin(async move { tx.delete_range(&prefix).await })
            })
            .await?;
            Ok(format!("{} deleted {n} key(s)", "OK".green()))
        }

        Cmd::Reset => {
            let Message::ResetResp { ok, error, .. } = conn.call(|id| Message::ResetReq { id }).await? else {
                return Err(Error::Protocol("expected ResetResp".into()));
            };
            if ok {
                Ok("OK".green().to_string())
            } else {
                Err(Error::Internal(error.unwrap_or_default()))
            }
        }
    }
}

fn format_value(value: &[u8]) -> String {
    match std::str::from_utf8(value) {
        Ok(text) => text.to_string(),
        Err(_) => format!("0x{}", hex::encode(value)),
    }
}

fn format_entry(key: &[u8], value: Option<&[u8]>) -> String {
    let key = format_value(key);
    match value {
        Some(value) => format!("{key} = {}", format_value(value)),
        None => key,
    }
}

fn setup_panic_hooks() {
    let meta = human_panic::Metadata {
        version: env!("CARGO_PKG_VERSION").into(),
        name: env!("CARGO_PKG_NAME").into(),
        authors: env!("CARGO_PKG_AUTHORS").replace(':', ", ").into(),
        homepage: env!("CARGO_PKG_HOMEPAGE").into(),
    };

    let default_hook = panic::take_hook();
    if env::var("RUST_BACKTRACE").is_err() {
        panic::set_hook(Box::new(move |info: &panic::PanicHookInfo| {
            default_hook(info);
            let file_path = human_panic::handle_dump(&meta, info);
            human_panic::print_msg(file_path, &meta).expect("human-panic: failed to print error message");
        }));
    }
}
