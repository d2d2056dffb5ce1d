use std::env;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures::SinkExt;
use log::{info, warn};
use tokio::net::TcpListener;
use tokio_util::codec::Framed;

use kvcli::config::ConfigLoad;
use kvcli::trace;
use metakv::server::Session;
use metakv::storage::log_cask::LogCask;
use metakv::storage::memory::Memory;
use metakv::store::Store;
use metakv::wire::{Message, MessageCodec};

/// Runs the store described in spec §3-4: one shared `Store` behind a TCP
/// listener, one `Session` per accepted connection. Every connection
/// first receives an `InitNotification` carrying the configured storage
/// identity, exactly as spec §4.6 describes the mount bootstrap; a plain
/// admin client (like `kvcli`) simply ignores it.
#[derive(Debug, Parser)]
#[command(name = "kv-server", author, version, about = "transactional KV store server")]
struct Args {
    /// Address to listen on, overriding the config file.
    #[clap(short = 'L', long)]
    listen: Option<String>,

    /// Configuration file path.
    #[clap(short = 'c', long)]
    config: Option<String>,

    /// Run against an in-memory engine instead of the on-disk `LogCask`,
    /// overriding the config file's `data_dir`.
    #[clap(long)]
    memory: bool,

    #[clap(short = 'l', long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let cfg = match &args.config {
        Some(path) => ConfigLoad::load_path(path).unwrap_or_default(),
        None => ConfigLoad::load().unwrap_or_default(),
    };

    let log_dir = format!("{}/.kvcli", env::var("HOME").unwrap_or_else(|_| ".".to_string()));
    let log_level = args.log_level.as_deref().unwrap_or(&cfg.log_level);
    let _guards = trace::init_logging(&log_dir, "kv-server", log_level)?;

    let addr = args.listen.clone().unwrap_or_else(|| cfg.listen.clone());
    let listener = TcpListener::bind(&addr).await.with_context(|| format!("binding {addr}"))?;
    info!("kv-server listening on {addr}");

    if args.memory || cfg.data_dir.is_none() {
        let store = Arc::new(Store::new(Memory::new()));
        serve_forever(listener, store, cfg).await
    } else {
        let dir = cfg.data_dir.clone().unwrap();
        let path = std::path::PathBuf::from(dir).join("kvdb");
        let engine = LogCask::new(path).with_context(|| "opening LogCask data directory")?;
        let store = Arc::new(Store::new(engine));
        serve_forever(listener, store, cfg).await
    }
}

async fn serve_forever<E: metakv::storage::engine::Engine + 'static>(
    listener: TcpListener,
    store: Arc<Store<E>>,
    cfg: ConfigLoad,
) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await.context("accepting connection")?;
        let store = store.clone();
        let init = Message::InitNotification {
            storage: cfg.storage.clone(),
            bucket: cfg.bucket.clone(),
            access_key: cfg.access_key.clone(),
            secret_key: cfg.secret_key.clone(),
            volume_name: cfg.volume_name.clone(),
        };

        tokio::spawn(async move {
            info!("accepted connection from {peer}");
            let mut framed = Framed::new(stream, MessageCodec::new());
            if let Err(err) = framed.send(init).await {
                warn!("{peer}: failed to send InitNotification: {err}");
                return;
            }
            Session::new(store).serve_framed(framed).await;
            info!("{peer}: session closed");
        });
    }
}
